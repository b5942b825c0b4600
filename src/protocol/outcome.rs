//! The no-callbacks return contract every protocol step produces. Neither
//! `ClientConnection` nor `ServerConnection` ever calls back into an
//! embedder or holds a listener -- every effect the embedder must act on
//! (messages to send, transactions to broadcast, open/close events) comes
//! back out of `receive`/`tick` as data.

use bitcoin::Transaction;

use crate::message::Message;

/// Why a connection reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The local or remote side sent `CLOSE` and the channel settled normally.
    ClientRequestedClose,
    /// The peer sent `ERROR`; the session tears down without broadcasting.
    RemoteSentError,
    /// A handshake step exceeded its wall-clock deadline.
    Timeout,
}

/// Everything a `receive`/`tick` call produced. `emit` are messages to hand
/// to the transport; `broadcast` are transactions to hand to the
/// `Broadcaster`; `opened`/`closed` are one-shot session lifecycle events.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub emit: Vec<Message>,
    pub broadcast: Vec<Transaction>,
    pub opened: bool,
    pub closed: Option<CloseReason>,
}

impl Outcome {
    pub fn empty() -> Self {
        Outcome::default()
    }

    pub fn emit_one(msg: Message) -> Self {
        Outcome {
            emit: vec![msg],
            ..Outcome::default()
        }
    }

    pub fn error(code: crate::message::ErrorCode) -> Self {
        Outcome::emit_one(Message::error(code))
    }
}
