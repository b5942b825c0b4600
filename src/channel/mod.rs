//! The channel core -- the per-channel state machines that own contracts,
//! refunds and settlements, independent of wire framing or storage. See
//! `crate::protocol` for the message-driven layer built on top of these.

pub mod client;
pub mod server;

pub use client::{ClientChannelState, ClientState};
pub use server::{ServerChannelState, ServerState};
