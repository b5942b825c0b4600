//! The channel-opening contract transaction: a single 2-of-2 output that
//! locks the channel's total value, plus whatever change the payer's
//! wallet needs back.

use bitcoin::hashes::Hash;
use bitcoin::locktime::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Txid};

use crate::tx::script::build_contract_script;

/// The fully on-chain-identifying record of a channel's funding.
///
/// Immutable once created -- spec.md §3's invariant that every settlement
/// spends exactly this output depends on nothing here ever changing after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelContract {
    pub contract_txid: Txid,
    pub vout: u32,
    pub value_sats: u64,
    pub expiry_unix: u64,
    pub payer_pubkey: bitcoin::secp256k1::PublicKey,
    pub payee_pubkey: bitcoin::secp256k1::PublicKey,
    pub redeem_script: ScriptBuf,
    /// The script the refund (and every settlement) pays the payer's
    /// change back to. Carried here rather than re-derived as
    /// `p2wpkh(payer_pubkey)` -- the payer's wallet may hand in an
    /// arbitrary change address, and the refund is the one place both
    /// sides already agree on it.
    pub payer_payout_script: ScriptBuf,
}

impl ChannelContract {
    pub fn funding_outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.contract_txid,
            vout: self.vout,
        }
    }

    /// The 32-byte `contractHash` used to key both stores and to carry in
    /// `CLIENT_VERSION { previousChannelContractHash }` -- the contract
    /// txid doubles as this hash since it already uniquely identifies the
    /// funding output the whole channel is built on.
    pub fn contract_hash(&self) -> [u8; 32] {
        self.contract_txid.to_byte_array()
    }
}

/// Assembles the funding transaction: already-selected (and, by
/// construction out of scope, already-signed) inputs from the payer's
/// wallet, a single 2-of-2 output of `value`, and an optional change
/// output. The 2-of-2 output itself is never signed here -- it has
/// nothing to sign against until a settlement or refund spends it.
pub fn build_contract_tx(
    payer_pubkey: &bitcoin::secp256k1::PublicKey,
    payee_pubkey: &bitcoin::secp256k1::PublicKey,
    inputs: Vec<TxIn>,
    value: Amount,
    change: Option<(ScriptBuf, Amount)>,
) -> (Transaction, ScriptBuf) {
    let redeem_script = build_contract_script(payer_pubkey, payee_pubkey);

    let mut output = vec![TxOut {
        value,
        script_pubkey: redeem_script.to_p2wsh(),
    }];
    if let Some((change_script, change_value)) = change {
        output.push(TxOut {
            value: change_value,
            script_pubkey: change_script,
        });
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output,
    };
    (tx, redeem_script)
}
