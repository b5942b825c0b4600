//! Signing and signature verification over the contract's 2-of-2 P2WSH
//! output, following the same `SighashCache::p2wsh_signature_hash` +
//! `EcdsaSighashType::All` approach the teacher's `InMemorySigner` uses for
//! BOLT3 commitment transactions.

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey, Signing, Verification};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, ScriptBuf, Transaction, Witness};

use crate::error::ChannelError;
use crate::tx::script::parse_contract_script;

/// Computes the sighash for spending a P2WSH input and signs it with
/// `secret_key`. Returns a DER signature with the sighash-type byte
/// appended, ready to drop into a multisig witness.
pub fn sign_contract_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    redeem_script: &ScriptBuf,
    input_value: Amount,
    secret_key: &SecretKey,
) -> Result<Vec<u8>, ChannelError> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .p2wsh_signature_hash(0, redeem_script, input_value, EcdsaSighashType::All)
        .map_err(|e| ChannelError::BadTransaction(format!("cannot compute sighash: {e}")))?;

    let msg = Message::from_digest(sighash.to_byte_array());
    let sig = secp.sign_ecdsa(&msg, secret_key);

    let mut bytes = sig.serialize_der().to_vec();
    bytes.push(EcdsaSighashType::All as u8);
    Ok(bytes)
}

/// Verifies a counterparty-supplied signature (with its trailing
/// sighash-type byte) against `pubkey` over the same P2WSH sighash.
pub fn verify_contract_signature<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    redeem_script: &ScriptBuf,
    input_value: Amount,
    signature: &[u8],
    pubkey: &PublicKey,
) -> Result<(), ChannelError> {
    if signature.is_empty() {
        return Err(ChannelError::BadSignature);
    }
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .p2wsh_signature_hash(0, redeem_script, input_value, EcdsaSighashType::All)
        .map_err(|e| ChannelError::BadTransaction(format!("cannot compute sighash: {e}")))?;
    let msg = Message::from_digest(sighash.to_byte_array());

    let der = &signature[..signature.len() - 1];
    let sig = Signature::from_der(der).map_err(|_| ChannelError::BadSignature)?;

    secp.verify_ecdsa(&msg, &sig, pubkey)
        .map_err(|_| ChannelError::BadSignature)
}

/// Builds the `[OP_0, sig_for_key_a, sig_for_key_b, redeem_script]`
/// witness stack, ordering the two signatures to match the key order
/// baked into `redeem_script` (required by `OP_CHECKMULTISIG`).
pub fn build_multisig_witness(
    redeem_script: &ScriptBuf,
    sig_payer: &[u8],
    payer_pubkey: &PublicKey,
    sig_payee: &[u8],
    payee_pubkey: &PublicKey,
) -> Result<Witness, ChannelError> {
    let (key_a, _key_b) = parse_contract_script(redeem_script)?;
    let (first_sig, second_sig) = if *payer_pubkey == key_a {
        (sig_payer, sig_payee)
    } else {
        (sig_payee, sig_payer)
    };
    Ok(Witness::from_slice(&[
        &[][..],
        first_sig,
        second_sig,
        redeem_script.as_bytes(),
    ]))
}

/// Verifies the counterparty's signature and, if it checks out, attaches
/// both signatures to `tx`'s sole input -- the "verify-and-complete" step
/// shared by refund and settlement finalization on both sides.
#[allow(clippy::too_many_arguments)]
pub fn verify_and_complete<C: Verification>(
    secp: &Secp256k1<C>,
    mut tx: Transaction,
    redeem_script: &ScriptBuf,
    input_value: Amount,
    own_sig: &[u8],
    own_pubkey: &PublicKey,
    counterparty_sig: &[u8],
    counterparty_pubkey: &PublicKey,
) -> Result<Transaction, ChannelError> {
    verify_contract_signature(secp, &tx, redeem_script, input_value, counterparty_sig, counterparty_pubkey)?;
    let witness = build_multisig_witness(redeem_script, own_sig, own_pubkey, counterparty_sig, counterparty_pubkey)?;
    tx.input[0].witness = witness;
    Ok(tx)
}
