//! The message-driven protocol layer -- components 4.4 and 4.5. Wraps
//! `crate::channel`'s per-side state objects with the wire handshake and
//! the no-callbacks `Outcome` contract described in spec.md §9.

pub mod client_fsm;
pub mod outcome;
pub mod server_fsm;

pub use client_fsm::{ClientConnection, ClientLocalState};
pub use outcome::{CloseReason, Outcome};
pub use server_fsm::{ServerConnection, ServerLocalState};
