use std::sync::Arc;

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, Txid, Witness};

use crate::config::ChannelConfig;
use crate::interfaces::{InMemoryPersist, RecordingBroadcaster};
use crate::message::{ErrorCode, Message, ProvideRefund};
use crate::protocol::{ClientConnection, ClientLocalState, ServerConnection, ServerLocalState};
use crate::store::client_store::{ClientChannelKey, ClientChannelRecord};
use crate::store::server_store::ServerChannelRecord;
use crate::store::{ClientStore, ServerStore};

const NOW: u64 = 1_700_000_000;

struct Parties {
    payer_sk: SecretKey,
    payer_pk: PublicKey,
    payee_sk: SecretKey,
    payee_pk: PublicKey,
}

fn parties() -> Parties {
    let secp = Secp256k1::new();
    let payer_sk = SecretKey::from_slice(&[11u8; 32]).unwrap();
    let payee_sk = SecretKey::from_slice(&[22u8; 32]).unwrap();
    Parties {
        payer_pk: PublicKey::from_secret_key(&secp, &payer_sk),
        payer_sk,
        payee_pk: PublicKey::from_secret_key(&secp, &payee_sk),
        payee_sk,
    }
}

fn funding_input() -> TxIn {
    TxIn {
        previous_output: OutPoint {
            txid: Txid::from_byte_array([3u8; 32]),
            vout: 0,
        },
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

/// Drives a full CLIENT_VERSION..CHANNEL_OPEN handshake for a fresh
/// channel and returns both connections, opened and ready for payments.
fn open_channel(p: &Parties, config: ChannelConfig, value_sats: u64, min_value: u64, expiry_unix: u64) -> (ClientConnection, ServerConnection) {
    let payer_payout = crate::tx::p2wpkh_script(&p.payer_pk);
    let payee_payout = crate::tx::p2wpkh_script(&p.payee_pk);

    let mut server = ServerConnection::new(p.payee_sk, payee_payout, config, min_value, expiry_unix, NOW);
    let (mut client, hello) = ClientConnection::start_new(
        p.payer_sk,
        payer_payout,
        Amount::from_sat(value_sats),
        vec![funding_input()],
        None,
        config,
        NOW,
    );

    let cv = match &hello.emit[0] {
        Message::ClientVersion(cv) => cv.clone(),
        _ => panic!("expected CLIENT_VERSION"),
    };
    let server_hello = server.on_client_version(cv, None, NOW);
    let _ = client.receive(server_hello.emit[0].clone(), NOW);
    let provide_refund = client.receive(server_hello.emit[1].clone(), NOW);
    let return_refund = server.receive(provide_refund.emit[0].clone(), NOW);
    let provide_contract = client.receive(return_refund.emit[0].clone(), NOW);
    let channel_open = server.receive(provide_contract.emit[0].clone(), NOW);
    let _ = client.receive(channel_open.emit[0].clone(), NOW);

    (client, server)
}

#[test]
fn scenario_simple_channel_three_payments_then_close() {
    let p = parties();
    let config = ChannelConfig::default();
    let value = 100_000_000u64; // 1 COIN
    let payment = 1_000_000u64; // 1 CENT
    let expiry = NOW + config.max_time_window_secs;

    let (mut client, mut server) = open_channel(&p, config, value, 0, expiry);
    assert_eq!(client.local_state(), ClientLocalState::Open);
    assert_eq!(server.local_state(), ServerLocalState::Open);

    let server_broadcaster = Arc::new(RecordingBroadcaster::default());
    let server_store = ServerStore::new(Arc::new(InMemoryPersist::default()), server_broadcaster, "server", config);
    let contract_hash = server.channel().contract().unwrap().contract_hash();
    server_store
        .put(
            contract_hash,
            ServerChannelRecord {
                schema_version: crate::store::server_store::SCHEMA_VERSION,
                contract_hash,
                value_sats: value,
                v_s: 0,
                expiry_unix: expiry,
                active: true,
                best_settlement_tx: vec![],
            },
        )
        .unwrap();

    let mut persist_count = 0;
    for _ in 0..3 {
        let pay_out = client.send_payment(payment).unwrap();
        let ack = server.receive(pay_out.emit[0].clone(), NOW);
        assert!(ack.emit.is_empty());
        server_store
            .update_best(&contract_hash, server.channel().best_value(), vec![])
            .unwrap();
        persist_count += 1;
    }
    assert_eq!(persist_count, 3);
    assert_eq!(server.channel().best_value(), 3 * payment);

    let close_out = client.close();
    let server_close = server.receive(close_out.emit[0].clone(), NOW);
    // The contract already hit the chain during the handshake; close
    // broadcasts the one remaining transaction, the final settlement.
    assert_eq!(server_close.broadcast.len(), 1);
}

#[tokio::test]
async fn scenario_bad_refund_is_rejected_and_nothing_persisted() {
    let p = parties();
    let config = ChannelConfig::default();
    let payee_payout = crate::tx::p2wpkh_script(&p.payee_pk);
    let mut server = ServerConnection::new(p.payee_sk, payee_payout, config, 0, NOW + 3600, NOW);

    let cv = crate::message::ClientVersion {
        major: crate::config::PROTOCOL_MAJOR_VERSION,
        minor: crate::config::PROTOCOL_MINOR_VERSION,
        previous_channel_contract_hash: None,
    };
    let _ = server.on_client_version(cv, None, NOW);

    let out = server.receive(
        Message::ProvideRefund(ProvideRefund {
            multisig_key: vec![],
            tx: vec![],
        }),
        NOW,
    );
    assert_eq!(out.emit.len(), 1);
    match &out.emit[0] {
        Message::Error(e) => assert_eq!(e.code, ErrorCode::BadTransaction),
        other => panic!("expected ERROR, got {other:?}"),
    }
    assert_eq!(server.local_state(), ServerLocalState::Error);

    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let store = ServerStore::new(Arc::new(InMemoryPersist::default()), broadcaster, "server", config);
    assert!(store.is_empty());
}

#[test]
fn scenario_unknown_prior_hash_falls_through_to_fresh_initiate() {
    let p = parties();
    let config = ChannelConfig::default();
    let payee_payout = crate::tx::p2wpkh_script(&p.payee_pk);
    let mut server = ServerConnection::new(p.payee_sk, payee_payout, config, 0, NOW + 3600, NOW);

    let unknown_hash = bitcoin::hashes::sha256::Hash::hash(&[0x03]).to_byte_array();
    let cv = crate::message::ClientVersion {
        major: crate::config::PROTOCOL_MAJOR_VERSION,
        minor: crate::config::PROTOCOL_MINOR_VERSION,
        previous_channel_contract_hash: Some(unknown_hash),
    };

    // The embedder looked the hash up in the store, found nothing, and
    // passes `None` through -- exactly as it would for a truly fresh
    // client. The FSM itself never touches the store.
    let out = server.on_client_version(cv, None, NOW);
    assert_eq!(out.emit.len(), 2);
    assert!(matches!(out.emit[0], Message::ServerVersion(_)));
    assert!(matches!(out.emit[1], Message::Initiate(_)));
    assert_eq!(server.local_state(), ServerLocalState::WaitingForRefund);
}

#[test]
fn scenario_time_window_too_large_is_rejected_by_client() {
    let p = parties();
    let config = ChannelConfig::default();
    let payer_payout = crate::tx::p2wpkh_script(&p.payer_pk);
    let (mut client, _hello) = ClientConnection::start_new(
        p.payer_sk,
        payer_payout,
        Amount::from_sat(100_000_000),
        vec![funding_input()],
        None,
        config,
        NOW,
    );
    let _ = client.receive(
        Message::ServerVersion(crate::message::ServerVersion {
            major: crate::config::PROTOCOL_MAJOR_VERSION,
            minor: crate::config::PROTOCOL_MINOR_VERSION,
        }),
        NOW,
    );

    let out = client.receive(
        Message::Initiate(crate::message::Initiate {
            multisig_key: p.payee_pk.serialize().to_vec(),
            min_accepted_channel_size: 0,
            expire_time_secs: NOW + 48 * 3600,
        }),
        NOW,
    );
    assert_eq!(out.emit.len(), 1);
    match &out.emit[0] {
        Message::Error(e) => assert_eq!(e.code, ErrorCode::TimeWindowTooLarge),
        other => panic!("expected ERROR, got {other:?}"),
    }
    assert_eq!(client.local_state(), ClientLocalState::Error);
}

#[test]
fn scenario_value_too_large_is_rejected_by_client() {
    let p = parties();
    let config = ChannelConfig::default();
    let value = 100_000_000u64;
    let payer_payout = crate::tx::p2wpkh_script(&p.payer_pk);
    let (mut client, _hello) = ClientConnection::start_new(
        p.payer_sk,
        payer_payout,
        Amount::from_sat(value),
        vec![funding_input()],
        None,
        config,
        NOW,
    );
    let _ = client.receive(
        Message::ServerVersion(crate::message::ServerVersion {
            major: crate::config::PROTOCOL_MAJOR_VERSION,
            minor: crate::config::PROTOCOL_MINOR_VERSION,
        }),
        NOW,
    );

    let out = client.receive(
        Message::Initiate(crate::message::Initiate {
            multisig_key: p.payee_pk.serialize().to_vec(),
            min_accepted_channel_size: value + 1,
            expire_time_secs: NOW + 3600,
        }),
        NOW,
    );
    match &out.emit[0] {
        Message::Error(e) => assert_eq!(e.code, ErrorCode::ChannelValueTooLarge),
        other => panic!("expected ERROR, got {other:?}"),
    }
    assert_eq!(client.local_state(), ClientLocalState::Error);
}

#[tokio::test]
async fn scenario_expiry_broadcast_fires_client_then_server_side() {
    let p = parties();
    let config = ChannelConfig::default();
    let value = 100_000_000u64;
    let expiry = NOW + 24 * 3600;

    let (client, server) = open_channel(&p, config, value, 0, expiry);
    let contract = client.channel().contract().unwrap().clone();
    let contract_hash = contract.contract_hash();

    let client_broadcaster = Arc::new(RecordingBroadcaster::default());
    let client_store = ClientStore::new(Arc::new(InMemoryPersist::default()), client_broadcaster.clone(), "client", config);
    let client_key: ClientChannelKey = ([0u8; 32], contract_hash);
    client_store
        .put(
            client_key,
            ClientChannelRecord {
                schema_version: crate::store::client_store::SCHEMA_VERSION,
                server_id: [0u8; 32],
                contract_hash,
                value_sats: value,
                v_s: 0,
                expiry_unix: expiry,
                active: false,
                contract_tx: serialize(client.channel().refund_tx().unwrap()),
                refund_tx: serialize(client.channel().refund_tx().unwrap()),
                latest_settlement_tx: vec![],
            },
        )
        .unwrap();

    let server_broadcaster = Arc::new(RecordingBroadcaster::default());
    let server_store = ServerStore::new(Arc::new(InMemoryPersist::default()), server_broadcaster.clone(), "server", config);
    server_store
        .put(
            contract_hash,
            ServerChannelRecord {
                schema_version: crate::store::server_store::SCHEMA_VERSION,
                contract_hash,
                value_sats: value,
                v_s: server.channel().best_value(),
                expiry_unix: expiry,
                active: true,
                best_settlement_tx: vec![],
            },
        )
        .unwrap();

    client_store.tick(expiry + 24 * 3600 + 5 * 60).await;
    assert_eq!(client_broadcaster.count(), 2);
    assert!(client_store.is_empty());

    server_store.tick(expiry - config.server_safety_margin_secs).await;
    assert_eq!(server_broadcaster.count(), 0); // best_settlement_tx was empty, nothing to decode
    assert!(server_store.is_empty());
}

#[test]
fn client_store_round_trips_through_serialize_and_load() {
    let config = ChannelConfig::default();
    let persist = Arc::new(InMemoryPersist::default());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let store = ClientStore::new(persist.clone(), broadcaster.clone(), "wallet.client_store", config);

    for i in 0..3u8 {
        let key: ClientChannelKey = ([i; 32], [i + 10; 32]);
        store
            .put(
                key,
                ClientChannelRecord {
                    schema_version: crate::store::client_store::SCHEMA_VERSION,
                    server_id: [i; 32],
                    contract_hash: [i + 10; 32],
                    value_sats: 1_000_000 * (i as u64 + 1),
                    v_s: 0,
                    expiry_unix: NOW + 3600,
                    active: false,
                    contract_tx: vec![],
                    refund_tx: vec![],
                    latest_settlement_tx: vec![],
                },
            )
            .unwrap();
    }

    let reloaded = ClientStore::load(persist, broadcaster, "wallet.client_store", config).unwrap();
    assert_eq!(reloaded.len(), 3);
    for i in 0..3u8 {
        let key: ClientChannelKey = ([i; 32], [i + 10; 32]);
        let original = store.get(&key).unwrap();
        let restored = reloaded.get(&key).unwrap();
        assert_eq!(restored.contract_hash, original.contract_hash);
        assert_eq!(restored.value_sats, original.value_sats);
        assert_eq!(restored.v_s, original.v_s);
        assert_eq!(restored.expiry_unix, original.expiry_unix);
        assert_eq!(restored.active, original.active);
    }
}

#[test]
fn server_store_round_trips_through_serialize_and_load() {
    let config = ChannelConfig::default();
    let persist = Arc::new(InMemoryPersist::default());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let store = ServerStore::new(persist.clone(), broadcaster.clone(), "wallet.server_store", config);

    for i in 0..3u8 {
        let key: crate::store::server_store::ServerChannelKey = [i; 32];
        store
            .put(
                key,
                ServerChannelRecord {
                    schema_version: crate::store::server_store::SCHEMA_VERSION,
                    contract_hash: key,
                    value_sats: 1_000_000 * (i as u64 + 1),
                    v_s: 0,
                    expiry_unix: NOW + 3600,
                    active: false,
                    best_settlement_tx: vec![],
                },
            )
            .unwrap();
    }

    let reloaded = ServerStore::load(persist, broadcaster, "wallet.server_store", config).unwrap();
    assert_eq!(reloaded.len(), 3);
    for i in 0..3u8 {
        let key: crate::store::server_store::ServerChannelKey = [i; 32];
        let original = store.get(&key).unwrap();
        let restored = reloaded.get(&key).unwrap();
        assert_eq!(restored.contract_hash, original.contract_hash);
        assert_eq!(restored.value_sats, original.value_sats);
        assert_eq!(restored.v_s, original.v_s);
        assert_eq!(restored.expiry_unix, original.expiry_unix);
        assert_eq!(restored.active, original.active);
    }
}

#[test]
fn resume_attach_skips_initiate_and_goes_straight_to_channel_open() {
    let p = parties();
    let config = ChannelConfig::default();
    let payee_payout = crate::tx::p2wpkh_script(&p.payee_pk);

    // Stands in for the channel state the embedder reconstructed from a
    // server-store record found via `ServerStore::try_attach`.
    let resumed_channel = crate::channel::ServerChannelState::new(p.payee_sk, payee_payout.clone(), config);

    let mut server = ServerConnection::new(p.payee_sk, payee_payout, config, 0, NOW + 3600, NOW);
    let cv = crate::message::ClientVersion {
        major: crate::config::PROTOCOL_MAJOR_VERSION,
        minor: crate::config::PROTOCOL_MINOR_VERSION,
        previous_channel_contract_hash: Some([9u8; 32]),
    };
    let out = server.on_client_version(cv, Some(resumed_channel), NOW);
    assert_eq!(out.emit.len(), 2);
    assert!(matches!(out.emit[0], Message::ServerVersion(_)));
    assert!(matches!(out.emit[1], Message::ChannelOpen(_)));
    assert!(out.opened);
    assert_eq!(server.local_state(), ServerLocalState::Open);
}
