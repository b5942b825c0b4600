//! The 2-of-2 contract redeem script and the plain payout scripts spent by
//! refund/settlement transactions.

use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::script::{Builder, Instruction, ScriptBuf};
use bitcoin::secp256k1::PublicKey;

use crate::error::ChannelError;

/// Builds the canonical 2-of-2 `OP_CHECKMULTISIG` redeem script for a
/// channel contract output, with pubkeys in lexicographic order so both
/// sides independently derive the same script (the same convention the
/// teacher's `create_funding_script` uses for BOLT3 funding outputs).
pub fn build_contract_script(payer_pubkey: &PublicKey, payee_pubkey: &PublicKey) -> ScriptBuf {
    let (lesser, larger) = sorted(payer_pubkey, payee_pubkey);
    Builder::new()
        .push_int(2)
        .push_slice(lesser.serialize())
        .push_slice(larger.serialize())
        .push_int(2)
        .push_opcode(opcodes::OP_CHECKMULTISIG)
        .into_script()
}

fn sorted<'a>(a: &'a PublicKey, b: &'a PublicKey) -> (&'a PublicKey, &'a PublicKey) {
    if a.serialize() < b.serialize() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Parses a redeem script back into its two pubkeys, failing with
/// `BadScript` unless it is exactly `OP_2 <key_a> <key_b> OP_2
/// OP_CHECKMULTISIG` with `key_a` lexicographically first. Used when a
/// counterparty hands us a contract/refund and we must confirm it actually
/// spends the 2-of-2 output we expect.
pub fn parse_contract_script(script: &ScriptBuf) -> Result<(PublicKey, PublicKey), ChannelError> {
    let instructions: Vec<Instruction> = script
        .instructions()
        .collect::<Result<_, _>>()
        .map_err(|_| ChannelError::BadScript)?;

    let (key_a, key_b) = match instructions.as_slice() {
        [Instruction::Op(op_m), Instruction::PushBytes(a), Instruction::PushBytes(b), Instruction::Op(op_n), Instruction::Op(op_checkmultisig)]
            if *op_m == opcodes::OP_PUSHNUM_2
                && *op_n == opcodes::OP_PUSHNUM_2
                && *op_checkmultisig == opcodes::OP_CHECKMULTISIG =>
        {
            let key_a = PublicKey::from_slice(a.as_bytes()).map_err(|_| ChannelError::BadScript)?;
            let key_b = PublicKey::from_slice(b.as_bytes()).map_err(|_| ChannelError::BadScript)?;
            (key_a, key_b)
        }
        _ => return Err(ChannelError::BadScript),
    };

    let expected = build_contract_script(&key_a, &key_b);
    if &expected != script {
        return Err(ChannelError::BadScript);
    }
    let (a, b) = sorted(&key_a, &key_b);
    Ok((*a, *b))
}

/// A plain P2WPKH payout script for a given pubkey, used for refund and
/// settlement outputs that pay a single party directly (no further
/// multisig).
pub fn p2wpkh_script(pubkey: &PublicKey) -> ScriptBuf {
    let compressed = bitcoin::PublicKey::new(*pubkey);
    ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash().expect("compressed key always has a wpubkey hash"))
}
