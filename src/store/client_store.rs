//! The payer-side persistent store -- component 4.6 (client half). Keeps a
//! snapshot of every channel the wallet knows about, keyed by
//! `(serverId, contractHash)` so multiple concurrent channels to one
//! server coexist, and fires `contract-then-refund` broadcasts once a
//! channel's expiry (plus slack) has passed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bitcoin::consensus::encode::deserialize;
use bitcoin::Transaction;
use serde::{Deserialize, Serialize};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::interfaces::{Broadcaster, Persist};

pub const SCHEMA_VERSION: u8 = 1;

/// `(serverId, contractHash)`, both 32-byte opaque hashes.
pub type ClientChannelKey = ([u8; 32], [u8; 32]);

/// A serializable snapshot of one client-side channel. Holds raw
/// transaction bytes rather than a live [`crate::channel::ClientChannelState`]
/// -- the private key stays with the wallet and is never persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientChannelRecord {
    pub schema_version: u8,
    pub server_id: [u8; 32],
    pub contract_hash: [u8; 32],
    pub value_sats: u64,
    pub v_s: u64,
    pub expiry_unix: u64,
    pub active: bool,
    /// Empty until `get_contract()` has been called on the live channel.
    pub contract_tx: Vec<u8>,
    /// Empty until the payee's refund signature has been attached.
    pub refund_tx: Vec<u8>,
    /// The latest self-signed settlement, kept for display/debugging; the
    /// client store never broadcasts it itself.
    pub latest_settlement_tx: Vec<u8>,
}

struct Inner {
    records: HashMap<ClientChannelKey, ClientChannelRecord>,
    timers: super::timer::TimerWheel<ClientChannelKey>,
}

pub struct ClientStore {
    persist: Arc<dyn Persist>,
    broadcaster: Arc<dyn Broadcaster>,
    persist_key: String,
    post_expiry_slack_secs: u64,
    inner: Mutex<Inner>,
}

impl ClientStore {
    pub fn new(persist: Arc<dyn Persist>, broadcaster: Arc<dyn Broadcaster>, persist_key: impl Into<String>, config: ChannelConfig) -> Self {
        ClientStore {
            persist,
            broadcaster,
            persist_key: persist_key.into(),
            post_expiry_slack_secs: config.client_post_expiry_slack_secs,
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                timers: super::timer::TimerWheel::new(),
            }),
        }
    }

    /// Loads a store from a previously-`serialize`d blob, re-scheduling
    /// expiry timers for every active record.
    pub fn load(persist: Arc<dyn Persist>, broadcaster: Arc<dyn Broadcaster>, persist_key: impl Into<String>, config: ChannelConfig) -> Result<Self, ChannelError> {
        let persist_key = persist_key.into();
        let store = ClientStore::new(persist.clone(), broadcaster, persist_key.clone(), config);
        if let Some(blob) = persist.load(&persist_key)? {
            store.restore(&blob)?;
        }
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("client store mutex poisoned")
    }

    fn persist_snapshot(&self, inner: &Inner) -> Result<(), ChannelError> {
        // serde_json map keys must be strings; `([u8;32],[u8;32])` is not,
        // so the snapshot goes out as a plain (key, value) vector instead
        // of the HashMap itself.
        let entries: Vec<(ClientChannelKey, &ClientChannelRecord)> = inner.records.iter().map(|(k, v)| (*k, v)).collect();
        let blob = serde_json::to_vec(&entries).map_err(|e| ChannelError::Persist(e.to_string()))?;
        self.persist.save(&self.persist_key, &blob)
    }

    pub fn put(&self, key: ClientChannelKey, record: ClientChannelRecord) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        inner.timers.schedule(record.expiry_unix + self.post_expiry_slack_secs, key);
        inner.records.insert(key, record);
        self.persist_snapshot(&inner)
    }

    pub fn get(&self, key: &ClientChannelKey) -> Option<ClientChannelRecord> {
        self.lock().records.get(key).cloned()
    }

    pub fn update_best(&self, key: &ClientChannelKey, new_v_s: u64, new_settlement_tx: Vec<u8>) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        let record = inner.records.get_mut(key).ok_or_else(|| ChannelError::Internal("unknown client channel".into()))?;
        record.v_s = new_v_s;
        record.latest_settlement_tx = new_settlement_tx;
        self.persist_snapshot(&inner)
    }

    pub fn mark_inactive(&self, key: &ClientChannelKey) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        let record = inner.records.get_mut(key).ok_or_else(|| ChannelError::Internal("unknown client channel".into()))?;
        record.active = false;
        self.persist_snapshot(&inner)
    }

    pub fn remove(&self, key: &ClientChannelKey) -> Result<(), ChannelError> {
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

    pub fn iter_active(&self) -> Vec<ClientChannelRecord> {
        self.lock().records.values().filter(|r| r.active).cloned().collect()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ChannelError> {
        let inner = self.lock();
        let entries: Vec<(ClientChannelKey, &ClientChannelRecord)> = inner.records.iter().map(|(k, v)| (*k, v)).collect();
        serde_json::to_vec(&entries).map_err(|e| ChannelError::Persist(e.to_string()))
    }

    fn restore(&self, blob: &[u8]) -> Result<(), ChannelError> {
        let entries: Vec<(ClientChannelKey, ClientChannelRecord)> =
            serde_json::from_slice(blob).map_err(|e| ChannelError::Persist(e.to_string()))?;
        let mut inner = self.lock();
        for (key, record) in entries.into_iter() {
            if record.schema_version != SCHEMA_VERSION {
                return Err(ChannelError::Persist(format!(
                    "unsupported client channel record schema version {}",
                    record.schema_version
                )));
            }
            inner.timers.schedule(record.expiry_unix + self.post_expiry_slack_secs, key);
            inner.records.insert(key, record);
        }
        Ok(())
    }

    /// Advances time to `now`; broadcasts contract-then-refund for every
    /// channel whose `T_exp + postExpirySlack` has passed, then deletes
    /// the record. Broadcasts are issued sequentially, outside the store
    /// lock.
    pub async fn tick(&self, now: u64) {
        let due = { self.lock().timers.pop_due(now) };
        for key in due {
            let record = { self.lock().records.get(&key).cloned() };
            let Some(record) = record else { continue };

            if record.contract_tx.is_empty() {
                log::error!("client store: channel expired with no completed contract, refusing to broadcast a refund");
                let _ = self.remove(&key);
                continue;
            }
            match decode(&record.contract_tx) {
                Some(tx) => {
                    if let Err(e) = self.broadcaster.broadcast(tx).await {
                        log::warn!("client store: contract broadcast failed: {e}");
                    }
                }
                None => log::error!("client store: stored contract bytes do not decode, dropping channel"),
            }
            if record.refund_tx.is_empty() {
                log::warn!("client store: channel expired before the refund was fully signed");
            } else {
                match decode(&record.refund_tx) {
                    Some(tx) => {
                        if let Err(e) = self.broadcaster.broadcast(tx).await {
                            log::warn!("client store: refund broadcast failed: {e}");
                        }
                    }
                    None => log::error!("client store: stored refund bytes do not decode, dropping channel"),
                }
            }
            let _ = self.remove(&key);
        }
    }
}

fn decode(bytes: &[u8]) -> Option<Transaction> {
    deserialize(bytes).ok()
}
