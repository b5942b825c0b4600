//! Persistent channel stores -- component 4.6. Each side keeps its own
//! store: the client's is keyed by `(serverId, contractHash)` since one
//! wallet may hold channels to many servers, the server's by contractHash
//! alone. Both drive their expiry broadcasts off the same [`timer`]
//! min-heap and never invoke the broadcaster while holding their lock.

pub mod client_store;
pub mod server_store;
pub mod timer;

pub use client_store::{ClientChannelKey, ClientChannelRecord, ClientStore};
pub use server_store::{ServerChannelKey, ServerChannelRecord, ServerStore};
pub use timer::TimerWheel;
