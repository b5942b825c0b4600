//! The wire message schema.
//!
//! The actual framing (length prefixes, transport, TLS) is out of scope for
//! this crate -- see spec.md §1. What lives here is the typed payload each
//! frame would carry: a tagged union of records, serialized with serde the
//! way `dlc-messages`' sub-channel protocol tags its offer/accept/confirm
//! records. Binary fields (`tx`, `signature`, `multisigKey`) are carried as
//! raw bytes; this crate never interprets the surrounding transport.
use serde::{Deserialize, Serialize};

/// Reasons a protocol-visible `ERROR` message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    SyntaxError,
    BadTransaction,
    Timeout,
    NoAcceptableVersion,
    ChannelValueTooLarge,
    MinPaymentTooLarge,
    TimeWindowTooLarge,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientVersion {
    pub major: u32,
    pub minor: u32,
    /// 32-byte contract hash of a channel this client wants to resume, or
    /// absent to start fresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_channel_contract_hash: Option<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiate {
    /// 33-byte compressed pubkey.
    pub multisig_key: Vec<u8>,
    pub min_accepted_channel_size: u64,
    pub expire_time_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvideRefund {
    /// 33-byte compressed pubkey.
    pub multisig_key: Vec<u8>,
    /// Raw consensus-encoded transaction bytes.
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRefund {
    /// DER-encoded ECDSA signature plus sighash-type byte.
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvideContract {
    /// Raw consensus-encoded transaction bytes.
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOpen {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayment {
    /// The payer's change output value after this update, in satoshis.
    pub client_change_value: u64,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Close {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    pub code: ErrorCode,
}

/// The tagged union of every message type exchanged between payer and
/// payee. One `Message` is one logical protocol step; a transport frames
/// and delivers these independently of this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    ClientVersion(ClientVersion),
    ServerVersion(ServerVersion),
    Initiate(Initiate),
    ProvideRefund(ProvideRefund),
    ReturnRefund(ReturnRefund),
    ProvideContract(ProvideContract),
    ChannelOpen(ChannelOpen),
    UpdatePayment(UpdatePayment),
    Close(Close),
    Error(Error),
}

impl Message {
    pub fn error(code: ErrorCode) -> Message {
        Message::Error(Error { code })
    }
}
