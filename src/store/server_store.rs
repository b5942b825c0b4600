//! The payee-side persistent store -- component 4.6 (server half). Keyed
//! by contract hash alone (the server only ever sees one contract per
//! channel). Fires a single settlement broadcast `safetyMargin` seconds
//! before the refund becomes spendable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bitcoin::consensus::encode::deserialize;
use bitcoin::Transaction;
use serde::{Deserialize, Serialize};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::interfaces::{Broadcaster, Persist};

pub const SCHEMA_VERSION: u8 = 1;

pub type ServerChannelKey = [u8; 32];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerChannelRecord {
    pub schema_version: u8,
    pub contract_hash: [u8; 32],
    pub value_sats: u64,
    pub v_s: u64,
    pub expiry_unix: u64,
    pub active: bool,
    /// The fully co-signed best settlement, updated on every accepted
    /// `UPDATE_PAYMENT`. Empty if no payment has landed yet.
    pub best_settlement_tx: Vec<u8>,
}

struct Inner {
    records: HashMap<ServerChannelKey, ServerChannelRecord>,
    timers: super::timer::TimerWheel<ServerChannelKey>,
}

pub struct ServerStore {
    persist: Arc<dyn Persist>,
    broadcaster: Arc<dyn Broadcaster>,
    persist_key: String,
    safety_margin_secs: u64,
    inner: Mutex<Inner>,
}

impl ServerStore {
    pub fn new(persist: Arc<dyn Persist>, broadcaster: Arc<dyn Broadcaster>, persist_key: impl Into<String>, config: ChannelConfig) -> Self {
        ServerStore {
            persist,
            broadcaster,
            persist_key: persist_key.into(),
            safety_margin_secs: config.server_safety_margin_secs,
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                timers: super::timer::TimerWheel::new(),
            }),
        }
    }

    pub fn load(persist: Arc<dyn Persist>, broadcaster: Arc<dyn Broadcaster>, persist_key: impl Into<String>, config: ChannelConfig) -> Result<Self, ChannelError> {
        let persist_key = persist_key.into();
        let store = ServerStore::new(persist.clone(), broadcaster, persist_key.clone(), config);
        if let Some(blob) = persist.load(&persist_key)? {
            store.restore(&blob)?;
        }
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("server store mutex poisoned")
    }

    fn persist_snapshot(&self, inner: &Inner) -> Result<(), ChannelError> {
        // serde_json map keys must be strings; [u8; 32] is not, so the
        // snapshot goes out as a plain (key, value) vector instead of the
        // HashMap itself.
        let entries: Vec<(ServerChannelKey, &ServerChannelRecord)> = inner.records.iter().map(|(k, v)| (*k, v)).collect();
        let blob = serde_json::to_vec(&entries).map_err(|e| ChannelError::Persist(e.to_string()))?;
        self.persist.save(&self.persist_key, &blob)
    }

    pub fn put(&self, key: ServerChannelKey, record: ServerChannelRecord) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        let fire_at = record.expiry_unix.saturating_sub(self.safety_margin_secs);
        inner.timers.schedule(fire_at, key);
        inner.records.insert(key, record);
        self.persist_snapshot(&inner)
    }

    pub fn get(&self, key: &ServerChannelKey) -> Option<ServerChannelRecord> {
        self.lock().records.get(key).cloned()
    }

    pub fn update_best(&self, key: &ServerChannelKey, new_v_s: u64, new_settlement_tx: Vec<u8>) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        let record = inner.records.get_mut(key).ok_or_else(|| ChannelError::Internal("unknown server channel".into()))?;
        record.v_s = new_v_s;
        record.best_settlement_tx = new_settlement_tx;
        self.persist_snapshot(&inner)
    }

    /// Returns `Some(record)` (marked active) only if `key` is known and
    /// not already active -- the resume attach rule from spec.md §4.5.
    /// Returns `None` for unknown, malformed, or already-active channels,
    /// leaving the caller to fall through to a fresh `INITIATE`.
    pub fn try_attach(&self, key: &ServerChannelKey) -> Option<ServerChannelRecord> {
        let mut inner = self.lock();
        let record = inner.records.get_mut(key)?;
        if record.active {
            return None;
        }
        record.active = true;
        let snapshot = record.clone();
        let _ = self.persist_snapshot(&inner);
        Some(snapshot)
    }

    pub fn mark_inactive(&self, key: &ServerChannelKey) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        let record = inner.records.get_mut(key).ok_or_else(|| ChannelError::Internal("unknown server channel".into()))?;
        record.active = false;
        self.persist_snapshot(&inner)
    }

    pub fn remove(&self, key: &ServerChannelKey) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        inner.records.remove(key);
        self.persist_snapshot(&inner)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter_active(&self) -> Vec<ServerChannelRecord> {
        self.lock().records.values().filter(|r| r.active).cloned().collect()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ChannelError> {
        let inner = self.lock();
        let entries: Vec<(ServerChannelKey, &ServerChannelRecord)> = inner.records.iter().map(|(k, v)| (*k, v)).collect();
        serde_json::to_vec(&entries).map_err(|e| ChannelError::Persist(e.to_string()))
    }

    fn restore(&self, blob: &[u8]) -> Result<(), ChannelError> {
        let entries: Vec<(ServerChannelKey, ServerChannelRecord)> =
            serde_json::from_slice(blob).map_err(|e| ChannelError::Persist(e.to_string()))?;
        let mut inner = self.lock();
        for (key, record) in entries.into_iter() {
            if record.schema_version != SCHEMA_VERSION {
                return Err(ChannelError::Persist(format!(
                    "unsupported server channel record schema version {}",
                    record.schema_version
                )));
            }
            let fire_at = record.expiry_unix.saturating_sub(self.safety_margin_secs);
            inner.timers.schedule(fire_at, key);
            inner.records.insert(key, record);
        }
        Ok(())
    }

    /// Broadcasts the best settlement for every channel whose
    /// `T_exp - safetyMargin` has passed, then deletes the record.
    pub async fn tick(&self, now: u64) {
        let due = { self.lock().timers.pop_due(now) };
        for key in due {
            let record = { self.lock().records.get(&key).cloned() };
            let Some(record) = record else { continue };

            if record.best_settlement_tx.is_empty() {
                log::warn!("server store: channel expired with no settlement ever signed, nothing to broadcast");
            } else {
                match decode(&record.best_settlement_tx) {
                    Some(tx) => {
                        if let Err(e) = self.broadcaster.broadcast(tx).await {
                            log::warn!("server store: settlement broadcast failed: {e}");
                        }
                    }
                    None => log::error!("server store: stored settlement bytes do not decode, dropping channel"),
                }
            }
            let _ = self.remove(&key);
        }
    }
}

fn decode(bytes: &[u8]) -> Option<Transaction> {
    deserialize(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{InMemoryPersist, RecordingBroadcaster};
    use crate::tx::{build_contract_script, build_settlement_tx, p2wpkh_script};
    use bitcoin::consensus::encode::serialize;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use bitcoin::{Amount, OutPoint, Txid};

    fn sample_settlement() -> Vec<u8> {
        let secp = Secp256k1::new();
        let payer_sk = SecretKey::from_slice(&[5u8; 32]).unwrap();
        let payer_pk = PublicKey::from_secret_key(&secp, &payer_sk);
        let payee_sk = SecretKey::from_slice(&[6u8; 32]).unwrap();
        let payee_pk = PublicKey::from_secret_key(&secp, &payee_sk);
        let _ = build_contract_script(&payer_pk, &payee_pk);
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([3u8; 32]),
            vout: 0,
        };
        let tx = build_settlement_tx(
            outpoint,
            p2wpkh_script(&payee_pk),
            p2wpkh_script(&payer_pk),
            Amount::from_sat(1_000_000),
            Amount::from_sat(10_000),
            Amount::from_sat(1_000),
            Amount::from_sat(546),
        )
        .unwrap();
        serialize(&tx)
    }

    #[tokio::test]
    async fn tick_broadcasts_best_settlement_before_expiry() {
        let persist = Arc::new(InMemoryPersist::default());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let config = ChannelConfig::default();
        let store = ServerStore::new(persist, broadcaster.clone(), "wallet.server_store", config);

        let key: ServerChannelKey = [9u8; 32];
        store
            .put(
                key,
                ServerChannelRecord {
                    schema_version: SCHEMA_VERSION,
                    contract_hash: key,
                    value_sats: 1_000_000,
                    v_s: 10_000,
                    expiry_unix: 1_700_000_000,
                    active: true,
                    best_settlement_tx: sample_settlement(),
                },
            )
            .unwrap();

        store.tick(1_700_000_000 - config.server_safety_margin_secs).await;
        assert_eq!(broadcaster.count(), 1);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn try_attach_rejects_an_already_active_channel() {
        let persist = Arc::new(InMemoryPersist::default());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let config = ChannelConfig::default();
        let store = ServerStore::new(persist, broadcaster, "wallet.server_store", config);

        let key: ServerChannelKey = [9u8; 32];
        store
            .put(
                key,
                ServerChannelRecord {
                    schema_version: SCHEMA_VERSION,
                    contract_hash: key,
                    value_sats: 1_000_000,
                    v_s: 0,
                    expiry_unix: 1_700_000_000,
                    active: true,
                    best_settlement_tx: vec![],
                },
            )
            .unwrap();

        assert!(store.try_attach(&key).is_none());
        store.mark_inactive(&key).unwrap();
        assert!(store.try_attach(&key).is_some());
    }
}
