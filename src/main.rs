//! Demo binary: drives one payer/payee channel through open, several
//! payments, and a cooperative close entirely in-process, using the
//! deterministic `TestClock`-style fixed timestamp and the in-memory
//! `Persist`/`Broadcaster` reference implementations. Useful for
//! eyeballing the wire trace; not a test.

use std::sync::Arc;

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, Txid, Witness};
use clap::Parser;

use microchan_core::interfaces::{InMemoryPersist, RecordingBroadcaster};
use microchan_core::message::Message;
use microchan_core::store::client_store::{ClientChannelKey, ClientChannelRecord};
use microchan_core::store::server_store::ServerChannelRecord;
use microchan_core::{ChannelConfig, ClientConnection, ClientStore, ServerConnection, ServerStore};

#[derive(Parser, Debug)]
#[command(name = "microchan", about = "Two-party micropayment channel demo")]
struct Args {
    /// Channel value, in satoshis.
    #[arg(long, default_value_t = 100_000_000)]
    value_sats: u64,

    /// Individual payment size, in satoshis.
    #[arg(long, default_value_t = 10_000_000)]
    payment_sats: u64,

    /// Number of payments to send before closing.
    #[arg(long, default_value_t = 3)]
    num_payments: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    println!("=== Micropayment Channel Demo ===\n");

    let secp = Secp256k1::new();
    let payer_sk = SecretKey::from_slice(&[11u8; 32]).unwrap();
    let payer_pk = PublicKey::from_secret_key(&secp, &payer_sk);
    let payee_sk = SecretKey::from_slice(&[22u8; 32]).unwrap();
    let payee_pk = PublicKey::from_secret_key(&secp, &payee_sk);
    let payer_payout = microchan_core::tx::p2wpkh_script(&payer_pk);
    let payee_payout = microchan_core::tx::p2wpkh_script(&payee_pk);
    println!("✓ Payer and payee keys generated");

    let config = ChannelConfig::default();
    let now = 1_700_000_000u64;
    let offered_min_value = args.value_sats / 2;
    let offered_expire_time_secs = now + config.max_time_window_secs / 2;

    let client_broadcaster = Arc::new(RecordingBroadcaster::default());
    let client_store = ClientStore::new(
        Arc::new(InMemoryPersist::default()),
        client_broadcaster.clone(),
        "demo.client_store",
        config,
    );
    let server_broadcaster = Arc::new(RecordingBroadcaster::default());
    let server_store = ServerStore::new(
        Arc::new(InMemoryPersist::default()),
        server_broadcaster.clone(),
        "demo.server_store",
        config,
    );

    let mut server = ServerConnection::new(payee_sk, payee_payout, config, offered_min_value, offered_expire_time_secs, now);
    let funding_input = TxIn {
        previous_output: OutPoint {
            txid: Txid::from_byte_array([7u8; 32]),
            vout: 0,
        },
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    };
    let (mut client, open_out) = ClientConnection::start_new(
        payer_sk,
        payer_payout,
        Amount::from_sat(args.value_sats),
        vec![funding_input],
        None,
        config,
        now,
    );
    println!("✓ Client emitted CLIENT_VERSION");

    let client_version = match &open_out.emit[0] {
        Message::ClientVersion(cv) => cv.clone(),
        other => panic!("expected CLIENT_VERSION, got {other:?}"),
    };
    let server_hello = server.on_client_version(client_version, None, now);
    println!("✓ Server replied with SERVER_VERSION + INITIATE");

    let _ = client.receive(server_hello.emit[0].clone(), now);
    let provide_refund_out = client.receive(server_hello.emit[1].clone(), now);
    println!("✓ Client built contract + refund, emitted PROVIDE_REFUND");

    let return_refund_out = server.receive(provide_refund_out.emit[0].clone(), now);
    println!("✓ Server co-signed the refund, emitted RETURN_REFUND");

    let provide_contract_out = client.receive(return_refund_out.emit[0].clone(), now);
    let contract_tx_bytes = serialize(&provide_contract_out.broadcast[0]);
    println!("✓ Client completed the refund and broadcast the contract transaction");

    let channel_open_out = server.receive(provide_contract_out.emit[0].clone(), now);
    println!("✓ Server verified the contract, emitted CHANNEL_OPEN (opened={})", channel_open_out.opened);

    let final_out = client.receive(channel_open_out.emit[0].clone(), now);
    println!("✓ Client marked the channel open (opened={})", final_out.opened);

    let contract = client.channel().contract().expect("contract must be set once open").clone();
    let refund_tx_bytes = client.channel().refund_tx().map(serialize).unwrap_or_default();
    let client_key: ClientChannelKey = ([0u8; 32], contract.contract_hash());
    client_store
        .put(
            client_key,
            ClientChannelRecord {
                schema_version: microchan_core::store::client_store::SCHEMA_VERSION,
                server_id: [0u8; 32],
                contract_hash: contract.contract_hash(),
                value_sats: contract.value_sats,
                v_s: 0,
                expiry_unix: contract.expiry_unix,
                active: true,
                contract_tx: contract_tx_bytes,
                refund_tx: refund_tx_bytes,
                latest_settlement_tx: vec![],
            },
        )
        .expect("persist should succeed");

    let server_key = contract.contract_hash();
    server_store
        .put(
            server_key,
            ServerChannelRecord {
                schema_version: microchan_core::store::server_store::SCHEMA_VERSION,
                contract_hash: server_key,
                value_sats: contract.value_sats,
                v_s: 0,
                expiry_unix: contract.expiry_unix,
                active: true,
                best_settlement_tx: vec![],
            },
        )
        .expect("persist should succeed");
    println!("✓ Both sides persisted the new channel\n");

    for i in 1..=args.num_payments {
        let pay_out = client.send_payment(args.payment_sats).expect("payment should be accepted");
        let server_ack = server.receive(pay_out.emit[0].clone(), now);
        debug_assert!(server_ack.emit.is_empty());
        println!("✓ Payment {i}: sent {} sats (cumulative: {})", args.payment_sats, client.channel().value_paid());
    }

    let close_out = client.close();
    let server_close_ack = server.receive(close_out.emit[0].clone(), now);
    println!(
        "\n✓ Channel closed cooperatively; server broadcasts {} settlement transaction(s)",
        server_close_ack.broadcast.len()
    );

    println!("\n=== Demo Complete ===");
    println!("Client-side broadcasts so far: {}", client_broadcaster.count());
    println!("Server-side broadcasts so far: {}", server_broadcaster.count());
}
