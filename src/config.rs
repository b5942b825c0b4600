//! Tunable protocol parameters.
//!
//! Every constant here has a spec-mandated default (spec.md §8's end to
//! end scenarios) but is overridable per embedder, the same way the
//! teacher's BOLT3 exercises accept `feerate_per_kw` / `dust_limit_satoshis`
//! as parameters rather than hard-coding them.

/// Only one major protocol version is understood by this crate.
pub const PROTOCOL_MAJOR_VERSION: u32 = 1;
pub const PROTOCOL_MINOR_VERSION: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Fixed protocol minimum fee, in satoshis, subtracted from the payer's
    /// settlement output.
    pub fee_sats: u64,
    /// Outputs below this value are suppressed rather than created.
    pub dust_limit_sats: u64,
    /// Maximum expiry window (`T_exp - now`) a client will accept from a
    /// server's `INITIATE`.
    pub max_time_window_secs: u64,
    /// How long before `T_exp` the server store broadcasts the best
    /// settlement.
    pub server_safety_margin_secs: u64,
    /// How long after `T_exp` the client store waits before broadcasting
    /// the contract and refund.
    pub client_post_expiry_slack_secs: u64,
    /// Wall-clock cap on a single protocol handshake step.
    pub handshake_timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            fee_sats: 1_000,
            dust_limit_sats: 546,
            max_time_window_secs: 24 * 60 * 60,
            server_safety_margin_secs: 2,
            client_post_expiry_slack_secs: 5 * 60,
            handshake_timeout_secs: 60,
        }
    }
}
