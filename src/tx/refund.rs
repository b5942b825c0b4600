//! The absolute-timelock refund transaction: the payer's safety net if the
//! payee disappears. Spends the contract output entirely back to the
//! payer once `T_exp` has passed.

use bitcoin::locktime::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::error::ChannelError;

/// Builds the unsigned refund transaction spending `contract_outpoint` back
/// to `payer_script`, locked until `expiry_unix`.
///
/// `Sequence::ENABLE_LOCKTIME_NO_RBF` is required on the input -- a max
/// sequence would silently disable the locktime and let the refund be
/// mined before expiry.
pub fn build_refund_tx(
    contract_outpoint: OutPoint,
    payer_script: ScriptBuf,
    value: Amount,
    expiry_unix: u64,
) -> Result<Transaction, ChannelError> {
    let lock_time = LockTime::from_time(
        u32::try_from(expiry_unix)
            .map_err(|_| ChannelError::Internal("expiry_unix does not fit in u32".into()))?,
    )
    .map_err(|_| ChannelError::Internal("expiry_unix is not a valid absolute locktime".into()))?;

    Ok(Transaction {
        version: Version::TWO,
        lock_time,
        input: vec![TxIn {
            previous_output: contract_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value,
            script_pubkey: payer_script,
        }],
    })
}
