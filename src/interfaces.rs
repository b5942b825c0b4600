//! Capability interfaces the channel core depends on but never implements
//! for real: wallet/broadcaster/clock. Passed in at construction per
//! spec.md §9 -- the state machines and stores never capture these in
//! ambient or global state.

use async_trait::async_trait;
use bitcoin::{Transaction, Txid};

use crate::error::ChannelError;

/// Source of the current time, as Unix seconds. Production embedders wrap
/// `SystemTime`; tests use [`TestClock`] for deterministic expiry.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Wall-clock backed `Clock`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs()
    }
}

/// A clock an embedder (or a test) advances explicitly. This is the
/// "deterministic tick" called for in spec.md §9 in place of the original
/// implementation's polling sleep.
pub struct TestClock {
    now: std::sync::atomic::AtomicU64,
}

impl TestClock {
    pub fn new(start: u64) -> Self {
        TestClock {
            now: std::sync::atomic::AtomicU64::new(start),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, value: u64) {
        self.now.store(value, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_unix(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// The wallet's opaque-blob persistence hook. Stores call this to save and
/// restore their serialized state; the key is a stable extension
/// identifier chosen by the embedder (e.g. `"microchan.client_store"`).
pub trait Persist: Send + Sync {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), ChannelError>;
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, ChannelError>;
}

/// In-memory `Persist` used by tests and as a reference implementation.
#[derive(Default)]
pub struct InMemoryPersist {
    inner: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl Persist for InMemoryPersist {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), ChannelError> {
        self.inner
            .lock()
            .map_err(|_| ChannelError::Persist("persist mutex poisoned".into()))?
            .insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, ChannelError> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| ChannelError::Persist("persist mutex poisoned".into()))?
            .get(key)
            .cloned())
    }
}

/// The peer-to-peer broadcaster. `broadcast` resolves once the transaction
/// is accepted for relay -- it does not wait for confirmation.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: Transaction) -> Result<Txid, ChannelError>;
}

/// In-memory `Broadcaster` used by tests: records every transaction it was
/// asked to relay, in submission order, and always "succeeds".
#[derive(Default)]
pub struct RecordingBroadcaster {
    sent: std::sync::Mutex<Vec<Transaction>>,
}

impl RecordingBroadcaster {
    pub fn sent_txids(&self) -> Vec<Txid> {
        self.sent
            .lock()
            .expect("recording broadcaster mutex poisoned")
            .iter()
            .map(|tx| tx.compute_txid())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().expect("recording broadcaster mutex poisoned").len()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(&self, tx: Transaction) -> Result<Txid, ChannelError> {
        let txid = tx.compute_txid();
        self.sent
            .lock()
            .map_err(|_| ChannelError::Broadcast("recording broadcaster mutex poisoned".into()))?
            .push(tx);
        Ok(txid)
    }
}
