//! Shared error type for the transaction layer, channel state objects, and
//! protocol state machines.

use crate::message::ErrorCode;

/// Errors produced anywhere in the channel core.
///
/// Variants map onto spec error *kinds*, not onto the wire `ErrorCode`
/// enum directly -- see [`ChannelError::wire_code`] for that mapping.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("signature did not verify against the expected redeem script")]
    BadSignature,

    #[error("redeem script is not a canonical 2-of-2 multisig")]
    BadScript,

    #[error("transaction is malformed or does not spend the expected output: {0}")]
    BadTransaction(String),

    #[error("requested value {requested} exceeds the acceptable bound {bound}")]
    ValueTooLarge { requested: u64, bound: u64 },

    #[error("proposed channel value {value} is below the minimum this side will accept ({minimum})")]
    MinPaymentTooLarge { value: u64, minimum: u64 },

    #[error("offered expiry window ({offered_secs}s) exceeds the maximum ({max_secs}s)")]
    TimeWindowTooLarge { offered_secs: u64, max_secs: u64 },

    #[error("channel is not OPEN; incrementPayment cannot be serviced")]
    ChannelNotOpen,

    #[error("settlement value {new} is not strictly greater than current best {current}")]
    NonMonotonicValue { current: u64, new: u64 },

    #[error("message arrived out of sequence for the current local state")]
    SyntaxError,

    #[error("no mutually acceptable protocol version (local major {local}, remote major {remote})")]
    NoAcceptableVersion { local: u32, remote: u32 },

    #[error("handshake step exceeded its deadline")]
    Timeout,

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("persistence hook failed: {0}")]
    Persist(String),

    #[error("broadcaster rejected the transaction: {0}")]
    Broadcast(String),
}

impl ChannelError {
    /// Maps an error to the wire-level code an `ERROR` message should carry,
    /// for the variants that are ever protocol-visible. Internal-only
    /// variants (`Internal`, `Persist`, `Broadcast`) are not expected to
    /// cross the wire; they fall back to `Other` if an embedder chooses to
    /// surface them defensively.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            ChannelError::BadSignature | ChannelError::BadTransaction(_) | ChannelError::BadScript => {
                ErrorCode::BadTransaction
            }
            ChannelError::ValueTooLarge { .. } => ErrorCode::ChannelValueTooLarge,
            ChannelError::MinPaymentTooLarge { .. } => ErrorCode::MinPaymentTooLarge,
            ChannelError::TimeWindowTooLarge { .. } => ErrorCode::TimeWindowTooLarge,
            ChannelError::SyntaxError => ErrorCode::SyntaxError,
            ChannelError::NoAcceptableVersion { .. } => ErrorCode::NoAcceptableVersion,
            ChannelError::Timeout => ErrorCode::Timeout,
            ChannelError::ChannelNotOpen
            | ChannelError::NonMonotonicValue { .. }
            | ChannelError::Internal(_)
            | ChannelError::Persist(_)
            | ChannelError::Broadcast(_) => ErrorCode::Other,
        }
    }
}
