//! Settlement transactions: repeatedly re-signed splits of the contract
//! value between payee and payer. No lock time -- either party can
//! broadcast the latest fully-signed one at any time.

use bitcoin::locktime::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::error::ChannelError;

/// Builds the unsigned settlement transaction for state `v_s`: `v_s` sats
/// to the payee, `value - v_s - fee` to the payer. Either output is
/// dropped if it would fall below `dust_limit`.
///
/// Returns `ValueTooLarge` if `v_s + fee` would exceed `value` -- the
/// payer's change can shrink to zero but never go negative.
pub fn build_settlement_tx(
    contract_outpoint: OutPoint,
    payee_script: ScriptBuf,
    payer_script: ScriptBuf,
    value: Amount,
    v_s: Amount,
    fee: Amount,
    dust_limit: Amount,
) -> Result<Transaction, ChannelError> {
    let spendable = value.checked_sub(fee).ok_or(ChannelError::ValueTooLarge {
        requested: v_s.to_sat(),
        bound: value.to_sat(),
    })?;
    if v_s > spendable {
        return Err(ChannelError::ValueTooLarge {
            requested: v_s.to_sat(),
            bound: spendable.to_sat(),
        });
    }
    let payer_value = spendable - v_s;

    let mut output = Vec::with_capacity(2);
    if v_s >= dust_limit {
        output.push(TxOut {
            value: v_s,
            script_pubkey: payee_script,
        });
    }
    if payer_value >= dust_limit {
        output.push(TxOut {
            value: payer_value,
            script_pubkey: payer_script,
        });
    }

    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: contract_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output,
    })
}
