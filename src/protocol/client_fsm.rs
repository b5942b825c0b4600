//! The payer's protocol state machine -- component 4.4. Drives a
//! [`ClientChannelState`] through the wire handshake and reports every
//! effect back through [`Outcome`]; it never touches a transport or a
//! broadcaster directly.

use bitcoin::consensus::encode::serialize;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{Amount, ScriptBuf, TxIn};

use crate::channel::ClientChannelState;
use crate::config::{ChannelConfig, PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION};
use crate::error::ChannelError;
use crate::message::{ClientVersion, Initiate, Message, ProvideContract, ProvideRefund, UpdatePayment};

use super::outcome::{CloseReason, Outcome};

/// Local states named in spec.md §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLocalState {
    WaitingForServerVersion,
    WaitingForInitiate,
    WaitingForRefundReturn,
    WaitingForChannelOpen,
    Open,
    Closed,
    Error,
}

struct PendingOpen {
    value: Amount,
    funding_inputs: Vec<TxIn>,
    change: Option<(ScriptBuf, Amount)>,
}

/// Drives one client-side session. One instance per connection attempt;
/// a resumed session wraps an already-open [`ClientChannelState`] instead
/// of building a fresh one.
pub struct ClientConnection {
    local_state: ClientLocalState,
    channel: ClientChannelState,
    config: ChannelConfig,
    pending: Option<PendingOpen>,
    resume_hash: Option<[u8; 32]>,
    deadline: Option<u64>,
}

impl ClientConnection {
    /// Starts a brand-new channel: no prior contract hash, the full
    /// INITIATE/PROVIDE_REFUND/RETURN_REFUND/PROVIDE_CONTRACT sequence runs.
    pub fn start_new(
        payer_sk: SecretKey,
        payer_payout_script: ScriptBuf,
        value: Amount,
        funding_inputs: Vec<TxIn>,
        change: Option<(ScriptBuf, Amount)>,
        config: ChannelConfig,
        now_unix: u64,
    ) -> (Self, Outcome) {
        let channel = ClientChannelState::new(payer_sk, payer_payout_script, config);
        let conn = ClientConnection {
            local_state: ClientLocalState::WaitingForServerVersion,
            channel,
            config,
            pending: Some(PendingOpen {
                value,
                funding_inputs,
                change,
            }),
            resume_hash: None,
            deadline: Some(now_unix + config.handshake_timeout_secs),
        };
        let outcome = Outcome::emit_one(Message::ClientVersion(ClientVersion {
            major: PROTOCOL_MAJOR_VERSION,
            minor: PROTOCOL_MINOR_VERSION,
            previous_channel_contract_hash: None,
        }));
        (conn, outcome)
    }

    /// Resumes a previously-open channel: `channel` must already be in
    /// [`ClientState::Open`] (as reconstructed by the embedder from the
    /// client store). Skips straight to `CHANNEL_OPEN` after the version
    /// exchange.
    pub fn start_resume(
        channel: ClientChannelState,
        prior_contract_hash: [u8; 32],
        config: ChannelConfig,
        now_unix: u64,
    ) -> (Self, Outcome) {
        let conn = ClientConnection {
            local_state: ClientLocalState::WaitingForServerVersion,
            channel,
            config,
            pending: None,
            resume_hash: Some(prior_contract_hash),
            deadline: Some(now_unix + config.handshake_timeout_secs),
        };
        let outcome = Outcome::emit_one(Message::ClientVersion(ClientVersion {
            major: PROTOCOL_MAJOR_VERSION,
            minor: PROTOCOL_MINOR_VERSION,
            previous_channel_contract_hash: Some(prior_contract_hash),
        }));
        (conn, outcome)
    }

    pub fn local_state(&self) -> ClientLocalState {
        self.local_state
    }

    pub fn channel(&self) -> &ClientChannelState {
        &self.channel
    }

    fn fail(&mut self, code: crate::message::ErrorCode) -> Outcome {
        self.local_state = ClientLocalState::Error;
        let mut outcome = Outcome::error(code);
        outcome.closed = Some(CloseReason::RemoteSentError);
        outcome
    }

    /// Checks the per-step handshake deadline; returns an outcome tearing
    /// the session down with `TIMEOUT` if it has elapsed. A no-op once the
    /// session has reached `Open` or a terminal state.
    pub fn check_timeout(&mut self, now_unix: u64) -> Option<Outcome> {
        if matches!(
            self.local_state,
            ClientLocalState::Open | ClientLocalState::Closed | ClientLocalState::Error
        ) {
            return None;
        }
        let deadline = self.deadline?;
        if now_unix < deadline {
            return None;
        }
        self.local_state = ClientLocalState::Error;
        let mut outcome = Outcome::error(crate::message::ErrorCode::Timeout);
        outcome.closed = Some(CloseReason::Timeout);
        Some(outcome)
    }

    /// Feeds one inbound message to the session.
    pub fn receive(&mut self, msg: Message, now_unix: u64) -> Outcome {
        let outcome = match (self.local_state, msg) {
            (ClientLocalState::WaitingForServerVersion, Message::ServerVersion(sv)) => {
                self.on_server_version(sv)
            }
            (ClientLocalState::WaitingForInitiate, Message::Initiate(initiate)) => {
                self.on_initiate(initiate, now_unix)
            }
            (ClientLocalState::WaitingForRefundReturn, Message::ReturnRefund(rr)) => {
                self.on_return_refund(&rr.signature)
            }
            (ClientLocalState::WaitingForChannelOpen, Message::ChannelOpen(_)) => self.on_channel_open(),
            (ClientLocalState::Open, Message::Close(_)) => self.on_close_ack(),
            (_, Message::Error(err)) => {
                log::warn!("client session received remote ERROR ({:?}), tearing down", err.code);
                self.local_state = ClientLocalState::Error;
                Outcome {
                    closed: Some(CloseReason::RemoteSentError),
                    ..Outcome::empty()
                }
            }
            _ => self.fail(crate::message::ErrorCode::SyntaxError),
        };
        if !matches!(self.local_state, ClientLocalState::Open | ClientLocalState::Closed | ClientLocalState::Error) {
            self.deadline = Some(now_unix + self.config.handshake_timeout_secs);
        }
        outcome
    }

    fn on_server_version(&mut self, sv: crate::message::ServerVersion) -> Outcome {
        if sv.major != PROTOCOL_MAJOR_VERSION {
            return self.fail(crate::message::ErrorCode::NoAcceptableVersion);
        }
        if self.resume_hash.is_some() {
            self.local_state = ClientLocalState::WaitingForChannelOpen;
        } else {
            self.local_state = ClientLocalState::WaitingForInitiate;
        }
        Outcome::empty()
    }

    fn on_initiate(&mut self, initiate: Initiate, now_unix: u64) -> Outcome {
        let pending = match self.pending.take() {
            Some(p) => p,
            None => return self.fail(crate::message::ErrorCode::SyntaxError),
        };
        let server_pubkey = match PublicKey::from_slice(&initiate.multisig_key) {
            Ok(k) => k,
            Err(_) => return self.fail(crate::message::ErrorCode::BadTransaction),
        };

        let result = self.channel.provide_initiate(
            server_pubkey,
            pending.funding_inputs,
            pending.value,
            pending.change,
            initiate.min_accepted_channel_size,
            initiate.expire_time_secs,
            now_unix,
        );
        match result {
            Ok(()) => {}
            Err(ChannelError::ValueTooLarge { .. }) => {
                return self.fail(crate::message::ErrorCode::ChannelValueTooLarge);
            }
            Err(ChannelError::TimeWindowTooLarge { .. }) => {
                return self.fail(crate::message::ErrorCode::TimeWindowTooLarge);
            }
            Err(_) => return self.fail(crate::message::ErrorCode::SyntaxError),
        }

        let refund_tx = self
            .channel
            .get_refund_for_signing()
            .expect("provide_initiate just succeeded, refund must exist");
        self.local_state = ClientLocalState::WaitingForRefundReturn;
        Outcome::emit_one(Message::ProvideRefund(ProvideRefund {
            multisig_key: self.channel_pubkey_bytes(),
            tx: serialize(refund_tx),
        }))
    }

    fn channel_pubkey_bytes(&self) -> Vec<u8> {
        self.channel
            .contract()
            .map(|c| c.payer_pubkey.serialize().to_vec())
            .unwrap_or_default()
    }

    fn on_return_refund(&mut self, signature: &[u8]) -> Outcome {
        if self.channel.provide_refund_signature(signature).is_err() {
            return self.fail(crate::message::ErrorCode::BadTransaction);
        }
        let contract_tx = match self.channel.get_contract() {
            Ok(tx) => tx.clone(),
            Err(_) => return self.fail(crate::message::ErrorCode::BadTransaction),
        };
        self.local_state = ClientLocalState::WaitingForChannelOpen;
        Outcome {
            emit: vec![Message::ProvideContract(ProvideContract {
                tx: serialize(&contract_tx),
            })],
            broadcast: vec![contract_tx],
            ..Outcome::empty()
        }
    }

    fn on_channel_open(&mut self) -> Outcome {
        if self.channel.mark_open().is_err() {
            return self.fail(crate::message::ErrorCode::SyntaxError);
        }
        self.local_state = ClientLocalState::Open;
        Outcome {
            opened: true,
            ..Outcome::empty()
        }
    }

    /// Pays the payee `delta` more sats. Only valid once `Open`.
    pub fn send_payment(&mut self, delta: u64) -> Result<Outcome, ChannelError> {
        if self.local_state != ClientLocalState::Open {
            return Err(ChannelError::ChannelNotOpen);
        }
        let (_tx, sig) = self.channel.increment_payment(delta)?;
        let client_change_value = self.channel.value_remaining();
        Ok(Outcome::emit_one(Message::UpdatePayment(UpdatePayment {
            client_change_value,
            signature: sig,
        })))
    }

    /// Initiates a normal close: produces the final settlement and emits
    /// `CLOSE`. Idempotent -- a second call reuses the channel's idempotent
    /// `close()` and does not re-emit.
    pub fn close(&mut self) -> Outcome {
        if self.local_state == ClientLocalState::Closed {
            return Outcome::empty();
        }
        let _ = self.channel.close();
        self.local_state = ClientLocalState::Closed;
        Outcome {
            emit: vec![Message::Close(crate::message::Close {})],
            closed: Some(CloseReason::ClientRequestedClose),
            ..Outcome::empty()
        }
    }

    fn on_close_ack(&mut self) -> Outcome {
        let _ = self.channel.close();
        self.local_state = ClientLocalState::Closed;
        Outcome {
            closed: Some(CloseReason::ClientRequestedClose),
            ..Outcome::empty()
        }
    }
}
