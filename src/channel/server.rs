//! The payee's view of a single channel -- component 4.3 of the channel
//! core. Mirrors `ClientChannelState`: tracks the contract, the best
//! settlement seen so far, and drives the close/settlement path.

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::tx::{
    build_multisig_witness, build_settlement_tx, sign_contract_input, verify_contract_signature,
    ChannelContract,
};

/// `ServerChannelState`'s internal lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    WaitingForRefund,
    WaitingForContract,
    Ready,
    Open,
    Closing,
    Closed,
    Error,
}

pub struct ServerChannelState {
    secp: Secp256k1<bitcoin::secp256k1::All>,
    config: ChannelConfig,
    payee_sk: SecretKey,
    payee_pk: PublicKey,
    payee_payout_script: ScriptBuf,

    state: ServerState,
    payer_pubkey: Option<PublicKey>,
    payer_payout_script: Option<ScriptBuf>,
    contract: Option<ChannelContract>,
    v_s: u64,
    best_settlement: Option<Transaction>,
    active: bool,
}

impl ServerChannelState {
    pub fn new(payee_sk: SecretKey, payee_payout_script: ScriptBuf, config: ChannelConfig) -> Self {
        let secp = Secp256k1::new();
        let payee_pk = PublicKey::from_secret_key(&secp, &payee_sk);
        ServerChannelState {
            secp,
            config,
            payee_sk,
            payee_pk,
            payee_payout_script,
            state: ServerState::WaitingForRefund,
            payer_pubkey: None,
            payer_payout_script: None,
            contract: None,
            v_s: 0,
            best_settlement: None,
            active: true,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn payee_pubkey(&self) -> PublicKey {
        self.payee_pk
    }

    pub fn contract(&self) -> Option<&ChannelContract> {
        self.contract.as_ref()
    }

    pub fn best_value(&self) -> u64 {
        self.v_s
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Step 1: validate the structurally-unsigned refund the client
    /// offers, check it is locked at or after `expiry_unix`, pays the
    /// payer's address, and spends from the 2-of-2 we expect -- then sign
    /// it and return our half.
    pub fn provide_refund(
        &mut self,
        refund_tx: &Transaction,
        payer_multisig_key: PublicKey,
        value: u64,
        expiry_unix: u64,
    ) -> Result<Vec<u8>, ChannelError> {
        if self.state != ServerState::WaitingForRefund {
            self.state = ServerState::Error;
            return Err(ChannelError::SyntaxError);
        }
        if refund_tx.input.len() != 1 || refund_tx.output.len() != 1 {
            self.state = ServerState::Error;
            return Err(ChannelError::BadTransaction("refund must have exactly one input and output".into()));
        }
        if !refund_tx.lock_time.is_block_time() {
            self.state = ServerState::Error;
            return Err(ChannelError::BadTransaction("refund must use a time-based lock time".into()));
        }
        let lock_time_secs = refund_tx.lock_time.to_consensus_u32() as u64;
        if lock_time_secs < expiry_unix {
            self.state = ServerState::Error;
            return Err(ChannelError::BadTransaction("refund lock time precedes channel expiry".into()));
        }
        if refund_tx.input[0].sequence == Sequence::MAX {
            self.state = ServerState::Error;
            return Err(ChannelError::BadTransaction("refund sequence disables its own lock time".into()));
        }

        let redeem_script = crate::tx::build_contract_script(&payer_multisig_key, &self.payee_pk);

        let sig = sign_contract_input(&self.secp, refund_tx, &redeem_script, Amount::from_sat(value), &self.payee_sk)?;

        self.payer_pubkey = Some(payer_multisig_key);
        self.payer_payout_script = Some(refund_tx.output[0].script_pubkey.clone());
        self.state = ServerState::WaitingForContract;
        log::debug!("server channel: refund validated and co-signed, awaiting contract");
        Ok(sig)
    }

    /// Step 2: verify the contract spends as expected (an output of
    /// `value` to our 2-of-2, matching the previously-seen refund's
    /// input) and move to `Ready`.
    pub fn provide_contract(&mut self, contract_tx: &Transaction, expiry_unix: u64) -> Result<(), ChannelError> {
        if self.state != ServerState::WaitingForContract {
            self.state = ServerState::Error;
            return Err(ChannelError::SyntaxError);
        }
        let payer_pubkey = self.payer_pubkey.ok_or(ChannelError::Internal("missing payer pubkey".into()))?;
        let payer_payout_script = self
            .payer_payout_script
            .clone()
            .ok_or(ChannelError::Internal("missing payer payout script".into()))?;
        let redeem_script = crate::tx::build_contract_script(&payer_pubkey, &self.payee_pk);
        let expected_spk = redeem_script.to_p2wsh();

        let output = contract_tx.output.first().ok_or_else(|| {
            self.state = ServerState::Error;
            ChannelError::BadTransaction("contract has no outputs".into())
        })?;
        if output.script_pubkey != expected_spk {
            self.state = ServerState::Error;
            return Err(ChannelError::BadTransaction("contract does not pay the expected 2-of-2".into()));
        }

        self.contract = Some(ChannelContract {
            contract_txid: contract_tx.compute_txid(),
            vout: 0,
            value_sats: output.value.to_sat(),
            expiry_unix,
            payer_pubkey,
            payee_pubkey: self.payee_pk,
            redeem_script,
            payer_payout_script,
        });
        self.state = ServerState::Ready;
        log::debug!("server channel: contract verified, channel ready to open");
        Ok(())
    }

    pub fn mark_open(&mut self) -> Result<(), ChannelError> {
        if self.state != ServerState::Ready {
            return Err(ChannelError::SyntaxError);
        }
        self.state = ServerState::Open;
        Ok(())
    }

    /// Step 3: verify the payer's signature over a new settlement and
    /// enforce strict monotonicity of `v_s`.
    pub fn increment_payment(&mut self, settlement_tx: Transaction, payer_sig: &[u8]) -> Result<(), ChannelError> {
        if self.state != ServerState::Open {
            return Err(ChannelError::ChannelNotOpen);
        }
        let contract = self.contract.clone().ok_or(ChannelError::Internal("missing contract".into()))?;

        let new_v_s = settlement_tx
            .output
            .iter()
            .find(|o| o.script_pubkey == crate::tx::p2wpkh_script(&self.payee_pk))
            .map(|o| o.value.to_sat())
            .unwrap_or(0);
        if new_v_s <= self.v_s {
            return Err(ChannelError::NonMonotonicValue {
                current: self.v_s,
                new: new_v_s,
            });
        }

        verify_contract_signature(
            &self.secp,
            &settlement_tx,
            &contract.redeem_script,
            Amount::from_sat(contract.value_sats),
            payer_sig,
            &contract.payer_pubkey,
        )?;

        let our_sig = sign_contract_input(
            &self.secp,
            &settlement_tx,
            &contract.redeem_script,
            Amount::from_sat(contract.value_sats),
            &self.payee_sk,
        )?;
        let witness = build_multisig_witness(
            &contract.redeem_script,
            payer_sig,
            &contract.payer_pubkey,
            &our_sig,
            &self.payee_pk,
        )?;
        let mut completed = settlement_tx;
        completed.input[0].witness = witness;

        self.v_s = new_v_s;
        self.best_settlement = Some(completed);
        log::debug!("server channel: accepted settlement update, best v_s now {new_v_s}");
        Ok(())
    }

    /// Step 4: complete the best settlement with our signature (it is
    /// already fully signed by `increment_payment`) and hand it to the
    /// embedder to broadcast. Idempotent: a second call just returns the
    /// same settlement.
    pub fn close(&mut self) -> Result<Option<Transaction>, ChannelError> {
        if self.state == ServerState::Closed {
            return Ok(self.best_settlement.clone());
        }
        if !matches!(self.state, ServerState::Open | ServerState::Ready) {
            return Err(ChannelError::SyntaxError);
        }
        self.state = ServerState::Closed;
        self.active = false;
        Ok(self.best_settlement.clone())
    }

    /// Builds a fresh, unsigned settlement spending the fee/dust-adjusted
    /// split and co-signs it with our key; used when the embedder needs
    /// a best-settlement-so-far snapshot outside of `increment_payment`
    /// (for example, the store's expiry-driven broadcast before any
    /// update has landed).
    pub fn best_settlement_tx(&self) -> Option<&Transaction> {
        self.best_settlement.as_ref()
    }

    pub fn rebuild_zero_value_settlement(&self) -> Result<Transaction, ChannelError> {
        let contract = self.contract.as_ref().ok_or(ChannelError::Internal("missing contract".into()))?;
        build_settlement_tx(
            contract.funding_outpoint(),
            self.payee_payout_script.clone(),
            contract.payer_payout_script.clone(),
            Amount::from_sat(contract.value_sats),
            Amount::from_sat(self.v_s),
            Amount::from_sat(self.config.fee_sats),
            Amount::from_sat(self.config.dust_limit_sats),
        )
    }
}
