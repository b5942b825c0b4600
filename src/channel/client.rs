//! The payer's view of a single channel -- component 4.2 of the channel
//! core. Owns the contract, the refund, and the latest self-signed
//! settlement; commissions `crate::tx` to build and sign them.

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxIn};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::tx::{
    build_contract_tx, build_multisig_witness, build_refund_tx, build_settlement_tx,
    sign_contract_input, verify_contract_signature, ChannelContract,
};

/// `ClientChannelState`'s internal lifecycle. Transitions are strictly
/// forward; any malformed peer input moves the state to `Error` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    New,
    WaitingForRefundSig,
    Ready,
    Open,
    Closed,
    Error,
}

/// The payer's side of one channel. One instance per channel; the
/// protocol state machine in `crate::protocol::client_fsm` owns one of
/// these and drives it through `receive`.
pub struct ClientChannelState {
    secp: Secp256k1<bitcoin::secp256k1::All>,
    config: ChannelConfig,
    payer_sk: SecretKey,
    payer_pk: PublicKey,
    payer_payout_script: ScriptBuf,

    state: ClientState,
    contract: Option<ChannelContract>,
    funding_tx: Option<Transaction>,
    contract_broadcast: bool,
    refund_tx: Option<Transaction>,
    refund_complete: bool,
    v_s: u64,
    latest_settlement: Option<Transaction>,
}

impl ClientChannelState {
    pub fn new(payer_sk: SecretKey, payer_payout_script: ScriptBuf, config: ChannelConfig) -> Self {
        let secp = Secp256k1::new();
        let payer_pk = PublicKey::from_secret_key(&secp, &payer_sk);
        ClientChannelState {
            secp,
            config,
            payer_sk,
            payer_pk,
            payer_payout_script,
            state: ClientState::New,
            contract: None,
            funding_tx: None,
            contract_broadcast: false,
            refund_tx: None,
            refund_complete: false,
            v_s: 0,
            latest_settlement: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn contract(&self) -> Option<&ChannelContract> {
        self.contract.as_ref()
    }

    pub fn value_paid(&self) -> u64 {
        self.v_s
    }

    pub fn value_remaining(&self) -> u64 {
        self.contract
            .as_ref()
            .map(|c| c.value_sats.saturating_sub(self.v_s).saturating_sub(self.config.fee_sats))
            .unwrap_or(0)
    }

    /// Step 1: the server has offered `min_value`/`max_time_window`; build
    /// the contract and the unsigned refund, or reject the offer.
    pub fn provide_initiate(
        &mut self,
        server_pubkey: PublicKey,
        funding_inputs: Vec<TxIn>,
        value: Amount,
        change: Option<(ScriptBuf, Amount)>,
        min_value: u64,
        expiry_unix: u64,
        now_unix: u64,
    ) -> Result<(), ChannelError> {
        if self.state != ClientState::New {
            self.state = ClientState::Error;
            return Err(ChannelError::SyntaxError);
        }
        if min_value > value.to_sat() {
            self.state = ClientState::Error;
            return Err(ChannelError::ValueTooLarge {
                requested: min_value,
                bound: value.to_sat(),
            });
        }
        let window = expiry_unix.saturating_sub(now_unix);
        if window > self.config.max_time_window_secs {
            self.state = ClientState::Error;
            return Err(ChannelError::TimeWindowTooLarge {
                offered_secs: window,
                max_secs: self.config.max_time_window_secs,
            });
        }

        let (contract_tx, redeem_script) =
            build_contract_tx(&self.payer_pk, &server_pubkey, funding_inputs, value, change);
        let contract_txid = contract_tx.compute_txid();

        let refund_tx = build_refund_tx(
            OutPoint {
                txid: contract_txid,
                vout: 0,
            },
            self.payer_payout_script.clone(),
            value,
            expiry_unix,
        )?;

        self.contract = Some(ChannelContract {
            contract_txid,
            vout: 0,
            value_sats: value.to_sat(),
            expiry_unix,
            payer_pubkey: self.payer_pk,
            payee_pubkey: server_pubkey,
            redeem_script,
            payer_payout_script: self.payer_payout_script.clone(),
        });
        // The unsigned funding tx itself is kept inside the contract's
        // identity only via its txid; the caller is responsible for
        // broadcasting the exact bytes it built. We stash the tx for
        // `get_contract`.
        self.funding_tx = Some(contract_tx);
        self.refund_tx = Some(refund_tx);
        self.state = ClientState::WaitingForRefundSig;
        Ok(())
    }

    /// Step 2: hand the unsigned refund to the peer for their signature.
    pub fn get_refund_for_signing(&self) -> Result<&Transaction, ChannelError> {
        self.refund_tx.as_ref().ok_or(ChannelError::Internal("no refund built yet".into()))
    }

    /// Step 3: attach the payee's refund signature (and our own), making
    /// the refund fully signed and ready to broadcast if the payee
    /// disappears.
    pub fn provide_refund_signature(&mut self, payee_signature: &[u8]) -> Result<(), ChannelError> {
        if self.state != ClientState::WaitingForRefundSig {
            self.state = ClientState::Error;
            return Err(ChannelError::SyntaxError);
        }
        let contract = self.contract.clone().ok_or(ChannelError::Internal("missing contract".into()))?;
        let refund_tx = self.refund_tx.clone().ok_or(ChannelError::Internal("missing refund".into()))?;

        verify_contract_signature(
            &self.secp,
            &refund_tx,
            &contract.redeem_script,
            Amount::from_sat(contract.value_sats),
            payee_signature,
            &contract.payee_pubkey,
        )
        .map_err(|_| {
            self.state = ClientState::Error;
            ChannelError::BadTransaction("refund signature did not verify".into())
        })?;

        let own_sig = sign_contract_input(
            &self.secp,
            &refund_tx,
            &contract.redeem_script,
            Amount::from_sat(contract.value_sats),
            &self.payer_sk,
        )?;
        let witness = build_multisig_witness(
            &contract.redeem_script,
            &own_sig,
            &self.payer_pk,
            payee_signature,
            &contract.payee_pubkey,
        )?;
        let mut completed = refund_tx;
        completed.input[0].witness = witness;

        self.refund_tx = Some(completed);
        self.refund_complete = true;
        self.state = ClientState::Ready;
        log::debug!("client channel: refund fully signed, contract ready for broadcast");
        Ok(())
    }

    /// Step 4: hand the contract to the embedder for broadcast. The
    /// channel is not considered `Open` until the embedder calls
    /// `mark_open` once the contract has actually been relayed and the
    /// protocol machine has received `CHANNEL_OPEN`.
    pub fn get_contract(&mut self) -> Result<&Transaction, ChannelError> {
        if self.state != ClientState::Ready {
            return Err(ChannelError::SyntaxError);
        }
        self.contract_broadcast = true;
        self.funding_tx.as_ref().ok_or(ChannelError::Internal("missing funding tx".into()))
    }

    pub fn contract_broadcast(&self) -> bool {
        self.contract_broadcast
    }

    pub fn mark_open(&mut self) -> Result<(), ChannelError> {
        if self.state != ClientState::Ready {
            return Err(ChannelError::SyntaxError);
        }
        self.state = ClientState::Open;
        Ok(())
    }

    /// Step 5: build and self-sign a new settlement paying the payee
    /// `delta` more than the current best.
    pub fn increment_payment(&mut self, delta: u64) -> Result<(Transaction, Vec<u8>), ChannelError> {
        if self.state != ClientState::Open {
            return Err(ChannelError::ChannelNotOpen);
        }
        let contract = self.contract.clone().ok_or(ChannelError::Internal("missing contract".into()))?;
        let new_v_s = self.v_s.checked_add(delta).ok_or(ChannelError::ValueTooLarge {
            requested: u64::MAX,
            bound: contract.value_sats,
        })?;
        let bound = contract.value_sats.saturating_sub(self.config.fee_sats).saturating_sub(self.config.dust_limit_sats);
        if new_v_s > bound {
            return Err(ChannelError::ValueTooLarge {
                requested: new_v_s,
                bound,
            });
        }

        let tx = build_settlement_tx(
            contract.funding_outpoint(),
            crate::tx::p2wpkh_script(&contract.payee_pubkey),
            self.payer_payout_script.clone(),
            Amount::from_sat(contract.value_sats),
            Amount::from_sat(new_v_s),
            Amount::from_sat(self.config.fee_sats),
            Amount::from_sat(self.config.dust_limit_sats),
        )?;
        let sig = sign_contract_input(
            &self.secp,
            &tx,
            &contract.redeem_script,
            Amount::from_sat(contract.value_sats),
            &self.payer_sk,
        )?;

        self.v_s = new_v_s;
        self.latest_settlement = Some(tx.clone());
        Ok((tx, sig))
    }

    /// Step 6: idempotently produce the final (latest) settlement and
    /// move to `Closed`. A second call is a no-op that returns the same
    /// settlement.
    pub fn close(&mut self) -> Result<Option<Transaction>, ChannelError> {
        if self.state == ClientState::Closed {
            return Ok(self.latest_settlement.clone());
        }
        if !matches!(self.state, ClientState::Open | ClientState::Ready) {
            return Err(ChannelError::SyntaxError);
        }
        self.state = ClientState::Closed;
        Ok(self.latest_settlement.clone())
    }

    pub fn refund_tx(&self) -> Option<&Transaction> {
        self.refund_tx.as_ref()
    }

    pub fn refund_complete(&self) -> bool {
        self.refund_complete
    }
}
