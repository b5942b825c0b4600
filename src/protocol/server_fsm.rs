//! The payee's protocol state machine -- component 4.5. Mirrors
//! `ClientConnection`: consumes wire messages and returns every effect as
//! an [`Outcome`], never calling back into an embedder directly.
//!
//! The server does not speak first -- a session starts once a
//! `CLIENT_VERSION` arrives. Resume decisions (attach to an inactive
//! stored channel vs. start fresh) are the embedder's to make by
//! consulting the server store; [`ServerConnection::on_client_version`]
//! just takes the result as a parameter instead of reaching for any store
//! itself.

use bitcoin::consensus::encode::deserialize;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{Amount, ScriptBuf};

use crate::channel::ServerChannelState;
use crate::config::{ChannelConfig, PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION};
use crate::message::{ChannelOpen, ClientVersion, Close, Initiate, Message, ReturnRefund, ServerVersion};
use crate::tx::build_settlement_tx;

use super::outcome::{CloseReason, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLocalState {
    WaitingForClientVersion,
    WaitingForRefund,
    WaitingForContract,
    Open,
    Closed,
    Error,
}

pub struct ServerConnection {
    local_state: ServerLocalState,
    channel: ServerChannelState,
    config: ChannelConfig,
    offered_min_value: u64,
    offered_expire_time_secs: u64,
    deadline: Option<u64>,
}

impl ServerConnection {
    pub fn new(
        payee_sk: SecretKey,
        payee_payout_script: ScriptBuf,
        config: ChannelConfig,
        offered_min_value: u64,
        offered_expire_time_secs: u64,
        now_unix: u64,
    ) -> Self {
        ServerConnection {
            local_state: ServerLocalState::WaitingForClientVersion,
            channel: ServerChannelState::new(payee_sk, payee_payout_script, config),
            config,
            offered_min_value,
            offered_expire_time_secs,
            deadline: Some(now_unix + config.handshake_timeout_secs),
        }
    }

    pub fn local_state(&self) -> ServerLocalState {
        self.local_state
    }

    pub fn channel(&self) -> &ServerChannelState {
        &self.channel
    }

    fn fail(&mut self, code: crate::message::ErrorCode) -> Outcome {
        self.local_state = ServerLocalState::Error;
        let mut outcome = Outcome::error(code);
        outcome.closed = Some(CloseReason::RemoteSentError);
        outcome
    }

    pub fn check_timeout(&mut self, now_unix: u64) -> Option<Outcome> {
        if matches!(self.local_state, ServerLocalState::Open | ServerLocalState::Closed | ServerLocalState::Error) {
            return None;
        }
        let deadline = self.deadline?;
        if now_unix < deadline {
            return None;
        }
        self.local_state = ServerLocalState::Error;
        let mut outcome = Outcome::error(crate::message::ErrorCode::Timeout);
        outcome.closed = Some(CloseReason::Timeout);
        Some(outcome)
    }

    /// Handles the initial `CLIENT_VERSION`. `resumed` must be `Some` only
    /// when the embedder found the client's `previousChannelContractHash`
    /// in the server store and it was not already active -- the three
    /// resume rules in spec.md §4.5 live at that call site, not here.
    pub fn on_client_version(&mut self, cv: ClientVersion, resumed: Option<ServerChannelState>, now_unix: u64) -> Outcome {
        if self.local_state != ServerLocalState::WaitingForClientVersion {
            return self.fail(crate::message::ErrorCode::SyntaxError);
        }
        let server_version = Message::ServerVersion(ServerVersion {
            major: PROTOCOL_MAJOR_VERSION,
            minor: PROTOCOL_MINOR_VERSION,
        });
        if cv.major != PROTOCOL_MAJOR_VERSION {
            self.local_state = ServerLocalState::Error;
            return Outcome {
                emit: vec![server_version, Message::error(crate::message::ErrorCode::NoAcceptableVersion)],
                closed: Some(CloseReason::RemoteSentError),
                ..Outcome::empty()
            };
        }

        if let Some(existing) = resumed {
            self.channel = existing;
            self.local_state = ServerLocalState::Open;
            return Outcome {
                emit: vec![server_version, Message::ChannelOpen(ChannelOpen {})],
                opened: true,
                ..Outcome::empty()
            };
        }

        self.local_state = ServerLocalState::WaitingForRefund;
        self.deadline = Some(now_unix + self.config.handshake_timeout_secs);
        Outcome {
            emit: vec![
                server_version,
                Message::Initiate(Initiate {
                    multisig_key: self.channel.payee_pubkey().serialize().to_vec(),
                    min_accepted_channel_size: self.offered_min_value,
                    expire_time_secs: self.offered_expire_time_secs,
                }),
            ],
            ..Outcome::empty()
        }
    }

    pub fn receive(&mut self, msg: Message, now_unix: u64) -> Outcome {
        let outcome = match (self.local_state, msg) {
            (ServerLocalState::WaitingForRefund, Message::ProvideRefund(pr)) => {
                self.on_provide_refund(&pr.multisig_key, &pr.tx)
            }
            (ServerLocalState::WaitingForContract, Message::ProvideContract(pc)) => self.on_provide_contract(&pc.tx),
            (ServerLocalState::Open, Message::UpdatePayment(up)) => {
                self.on_update_payment(up.client_change_value, &up.signature)
            }
            (ServerLocalState::Open, Message::Close(_)) => self.on_close_request(),
            (_, Message::Error(err)) => {
                log::warn!("server session received remote ERROR ({:?}), tearing down", err.code);
                self.local_state = ServerLocalState::Error;
                Outcome {
                    closed: Some(CloseReason::RemoteSentError),
                    ..Outcome::empty()
                }
            }
            _ => self.fail(crate::message::ErrorCode::SyntaxError),
        };
        if !matches!(self.local_state, ServerLocalState::Open | ServerLocalState::Closed | ServerLocalState::Error) {
            self.deadline = Some(now_unix + self.config.handshake_timeout_secs);
        }
        outcome
    }

    fn on_provide_refund(&mut self, multisig_key: &[u8], tx_bytes: &[u8]) -> Outcome {
        let payer_pubkey = match PublicKey::from_slice(multisig_key) {
            Ok(k) => k,
            Err(_) => return self.fail(crate::message::ErrorCode::BadTransaction),
        };
        let refund_tx: bitcoin::Transaction = match deserialize(tx_bytes) {
            Ok(tx) => tx,
            Err(_) => return self.fail(crate::message::ErrorCode::BadTransaction),
        };
        let value = match refund_tx.output.first() {
            Some(out) if out.value.to_sat() >= self.offered_min_value => out.value.to_sat(),
            _ => return self.fail(crate::message::ErrorCode::BadTransaction),
        };

        let sig = match self
            .channel
            .provide_refund(&refund_tx, payer_pubkey, value, self.offered_expire_time_secs)
        {
            Ok(sig) => sig,
            Err(_) => return self.fail(crate::message::ErrorCode::BadTransaction),
        };

        self.local_state = ServerLocalState::WaitingForContract;
        Outcome::emit_one(Message::ReturnRefund(ReturnRefund { signature: sig }))
    }

    fn on_provide_contract(&mut self, tx_bytes: &[u8]) -> Outcome {
        let contract_tx: bitcoin::Transaction = match deserialize(tx_bytes) {
            Ok(tx) => tx,
            Err(_) => return self.fail(crate::message::ErrorCode::BadTransaction),
        };
        if self.channel.provide_contract(&contract_tx, self.offered_expire_time_secs).is_err() {
            return self.fail(crate::message::ErrorCode::BadTransaction);
        }
        if self.channel.mark_open().is_err() {
            return self.fail(crate::message::ErrorCode::SyntaxError);
        }
        self.local_state = ServerLocalState::Open;
        Outcome {
            emit: vec![Message::ChannelOpen(ChannelOpen {})],
            broadcast: vec![contract_tx],
            opened: true,
            ..Outcome::empty()
        }
    }

    fn on_update_payment(&mut self, client_change_value: u64, signature: &[u8]) -> Outcome {
        let contract = match self.channel.contract() {
            Some(c) => c.clone(),
            None => return self.fail(crate::message::ErrorCode::SyntaxError),
        };
        let spendable = contract.value_sats.saturating_sub(self.config.fee_sats);
        let new_v_s = match spendable.checked_sub(client_change_value) {
            Some(v) => v,
            None => return self.fail(crate::message::ErrorCode::BadTransaction),
        };

        let settlement_tx = match build_settlement_tx(
            contract.funding_outpoint(),
            crate::tx::p2wpkh_script(&contract.payee_pubkey),
            contract.payer_payout_script.clone(),
            Amount::from_sat(contract.value_sats),
            Amount::from_sat(new_v_s),
            Amount::from_sat(self.config.fee_sats),
            Amount::from_sat(self.config.dust_limit_sats),
        ) {
            Ok(tx) => tx,
            Err(_) => return self.fail(crate::message::ErrorCode::BadTransaction),
        };

        match self.channel.increment_payment(settlement_tx, signature) {
            Ok(()) => Outcome::empty(),
            Err(_) => self.fail(crate::message::ErrorCode::BadTransaction),
        }
    }

    fn on_close_request(&mut self) -> Outcome {
        let settlement = match self.channel.close() {
            Ok(tx) => tx,
            Err(_) => return self.fail(crate::message::ErrorCode::SyntaxError),
        };
        self.local_state = ServerLocalState::Closed;
        Outcome {
            emit: vec![Message::Close(Close {})],
            broadcast: settlement.into_iter().collect(),
            closed: Some(CloseReason::ClientRequestedClose),
            ..Outcome::empty()
        }
    }
}

