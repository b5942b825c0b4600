//! A two-party Bitcoin micropayment channel: payer and payee open a
//! 2-of-2 multisig contract, exchange progressively-signed settlement
//! transactions off-chain, and close either cooperatively or by falling
//! back to a time-locked refund. See spec.md / SPEC_FULL.md for the full
//! protocol description; each module below corresponds to one of its
//! components.

pub mod channel;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod message;
pub mod protocol;
pub mod store;
pub mod tx;

#[cfg(test)]
mod tests;

pub use channel::{ClientChannelState, ClientState, ServerChannelState, ServerState};
pub use config::ChannelConfig;
pub use error::ChannelError;
pub use interfaces::{Broadcaster, Clock, InMemoryPersist, Persist, RecordingBroadcaster, SystemClock, TestClock};
pub use message::Message;
pub use protocol::{ClientConnection, ClientLocalState, CloseReason, Outcome, ServerConnection, ServerLocalState};
pub use store::{ClientChannelKey, ClientChannelRecord, ClientStore, ServerChannelKey, ServerChannelRecord, ServerStore};
pub use tx::ChannelContract;
