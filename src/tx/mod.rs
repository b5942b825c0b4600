//! Pure, stateless transaction construction and signing -- component 4.1
//! of the channel core. Nothing in this module holds state across calls;
//! `ClientChannelState`/`ServerChannelState` are what remember where a
//! channel is in its lifecycle.

pub mod contract;
pub mod refund;
pub mod script;
pub mod settlement;
pub mod sign;

pub use contract::{build_contract_tx, ChannelContract};
pub use refund::build_refund_tx;
pub use script::{build_contract_script, p2wpkh_script, parse_contract_script};
pub use settlement::build_settlement_tx;
pub use sign::{build_multisig_witness, sign_contract_input, verify_and_complete, verify_contract_signature};

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::Secp256k1;
    use bitcoin::{Amount, OutPoint, Txid};

    use super::*;

    fn keypair(byte: u8) -> (bitcoin::secp256k1::SecretKey, bitcoin::secp256k1::PublicKey) {
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        let pk = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    #[test]
    fn contract_script_round_trips() {
        let (_, payer_pk) = keypair(1);
        let (_, payee_pk) = keypair(2);
        let script = build_contract_script(&payer_pk, &payee_pk);
        let (a, b) = parse_contract_script(&script).unwrap();
        let mut expected = [payer_pk, payee_pk];
        expected.sort_by_key(|k| k.serialize());
        assert_eq!((a, b), (expected[0], expected[1]));
    }

    #[test]
    fn parse_contract_script_rejects_garbage() {
        let script = ScriptBuf::from_hex("76a914000000000000000000000000000000000000000088ac").unwrap();
        assert!(matches!(parse_contract_script(&script), Err(crate::error::ChannelError::BadScript)));
    }

    #[test]
    fn settlement_splits_value_and_respects_dust() {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([7u8; 32]),
            vout: 0,
        };
        let (_, payer_pk) = keypair(1);
        let (_, payee_pk) = keypair(2);
        let tx = build_settlement_tx(
            outpoint,
            p2wpkh_script(&payee_pk),
            p2wpkh_script(&payer_pk),
            Amount::from_sat(100_000_000),
            Amount::from_sat(3_000_000),
            Amount::from_sat(1_000),
            Amount::from_sat(546),
        )
        .unwrap();
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value, Amount::from_sat(3_000_000));
        assert_eq!(tx.output[1].value, Amount::from_sat(96_999_000));
    }

    #[test]
    fn settlement_drops_dust_payer_output() {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([7u8; 32]),
            vout: 0,
        };
        let (_, payer_pk) = keypair(1);
        let (_, payee_pk) = keypair(2);
        let value = Amount::from_sat(100_000);
        let fee = Amount::from_sat(1_000);
        let v_s = value - fee; // leaves 0 for the payer
        let tx = build_settlement_tx(
            outpoint,
            p2wpkh_script(&payee_pk),
            p2wpkh_script(&payer_pk),
            value,
            v_s,
            fee,
            Amount::from_sat(546),
        )
        .unwrap();
        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].value, v_s);
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let secp = Secp256k1::new();
        let (payer_sk, payer_pk) = keypair(1);
        let (payee_sk, payee_pk) = keypair(2);
        let redeem_script = build_contract_script(&payer_pk, &payee_pk);
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([9u8; 32]),
            vout: 0,
        };
        let value = Amount::from_sat(1_000_000);
        let tx = build_refund_tx(outpoint, p2wpkh_script(&payer_pk), value, 1_700_000_000).unwrap();

        let payer_sig = sign_contract_input(&secp, &tx, &redeem_script, value, &payer_sk).unwrap();
        let payee_sig = sign_contract_input(&secp, &tx, &redeem_script, value, &payee_sk).unwrap();

        let completed = verify_and_complete(
            &secp,
            tx,
            &redeem_script,
            value,
            &payer_sig,
            &payer_pk,
            &payee_sig,
            &payee_pk,
        )
        .unwrap();
        assert_eq!(completed.input[0].witness.len(), 4);
    }

    #[test]
    fn verify_and_complete_rejects_bad_signature() {
        let secp = Secp256k1::new();
        let (payer_sk, payer_pk) = keypair(1);
        let (_, payee_pk) = keypair(2);
        let (attacker_sk, _) = keypair(3);
        let redeem_script = build_contract_script(&payer_pk, &payee_pk);
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([9u8; 32]),
            vout: 0,
        };
        let value = Amount::from_sat(1_000_000);
        let tx = build_refund_tx(outpoint, p2wpkh_script(&payer_pk), value, 1_700_000_000).unwrap();

        let payer_sig = sign_contract_input(&secp, &tx, &redeem_script, value, &payer_sk).unwrap();
        let forged_sig = sign_contract_input(&secp, &tx, &redeem_script, value, &attacker_sk).unwrap();

        let result = verify_and_complete(
            &secp,
            tx,
            &redeem_script,
            value,
            &payer_sig,
            &payer_pk,
            &forged_sig,
            &payee_pk,
        );
        assert!(matches!(result, Err(ChannelError::BadSignature)));
    }
}
