//! Persistence bridge — the only path to the durable cross-process store
//!
//! Guards run synchronously inline with the page, but the durable store is
//! asynchronous. The bridge owns one writer task: every operation is queued
//! on a channel and applied in submission order, so writes are
//! fire-and-forget for the caller, a later write to a key always supersedes
//! an earlier one, and reads observe every write submitted before them.

use crate::error::{GuardError, Result};
use crate::types::{
    FirstLoadMetadata, IntegrityBaseline, IntegrityCheckRecord, IntegrityWarningRecord,
    SecurityStatus, SecurityWarning,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

/// Persisted key names shared with the popup and diagnostics
pub mod keys {
    pub const SECURITY_STATUS: &str = "securityStatus";
    pub const SECURITY_WARNING: &str = "securityWarning";
    pub const LAST_INTEGRITY_CHECK: &str = "lastIntegrityCheck";
    pub const INTEGRITY_WARNING: &str = "integrityWarning";
    pub const INTEGRITY_BASELINE_DIGEST: &str = "integrityBaselineDigest";
    pub const INTEGRITY_BASELINE_TIMESTAMP: &str = "integrityBaselineTimestamp";
    pub const INTEGRITY_FIRST_LOAD: &str = "integrityFirstLoad";
}

/// Durable key/value store shared across processes (extension storage)
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a single key
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write several keys as one operation
    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Remove keys; missing keys are ignored
    async fn remove(&self, keys: &[String]) -> Result<()>;
}

/// In-memory durable store for testing
#[derive(Default)]
pub struct MemoryDurableStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryDurableStore {
    /// Snapshot of everything stored
    pub async fn dump(&self) -> HashMap<String, Value> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut map = self.entries.write().await;
        map.extend(entries);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let mut map = self.entries.write().await;
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }
}

/// JSON file-backed durable store
///
/// The whole map is rewritten on each change via temp file + rename, so a
/// crash never leaves a half-written file behind.
pub struct FileDurableStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDurableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_map(&self) -> Result<HashMap<String, Value>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(GuardError::Persistence(format!(
                    "Failed to read store file {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&json).map_err(|e| {
            GuardError::Persistence(format!(
                "Failed to parse store file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn save_map(&self, map: &HashMap<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(map)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GuardError::Persistence(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            GuardError::Persistence(format!(
                "Failed to write store file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            GuardError::Persistence(format!(
                "Failed to rename store file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), keys = map.len(), "Store saved");
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FileDurableStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_map().await?.remove(key))
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load_map().await?;
        map.extend(entries);
        self.save_map(&map).await
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load_map().await?;
        let before = map.len();
        for key in keys {
            map.remove(key);
        }
        if map.len() == before {
            return Ok(());
        }
        self.save_map(&map).await
    }
}

enum Command {
    Set(Vec<(String, Value)>),
    Remove(Vec<String>),
    Get {
        key: String,
        reply: oneshot::Sender<Result<Option<Value>>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Ordered, fire-and-forget gateway to a `DurableStore`
///
/// Cheap to clone; all clones feed the same writer task. The writer stops
/// once every clone has been dropped.
#[derive(Clone)]
pub struct PersistenceBridge {
    tx: mpsc::UnboundedSender<Command>,
}

impl PersistenceBridge {
    /// Start the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(store: Arc<dyn DurableStore>) -> Self {
        Self::spawn_on(&Handle::current(), store)
    }

    /// Like [`spawn`](Self::spawn), but fails instead of panicking outside a runtime
    pub fn try_spawn(store: Arc<dyn DurableStore>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            GuardError::Persistence(format!("persistence bridge needs a Tokio runtime: {}", e))
        })?;
        Ok(Self::spawn_on(&handle, store))
    }

    fn spawn_on(handle: &Handle, store: Arc<dyn DurableStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        handle.spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Set(entries) => {
                        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
                        if let Err(e) = store.set(entries).await {
                            tracing::warn!(keys = ?keys, error = %e, "Durable write failed");
                        }
                    }
                    Command::Remove(keys) => {
                        if let Err(e) = store.remove(&keys).await {
                            tracing::warn!(keys = ?keys, error = %e, "Durable remove failed");
                        }
                    }
                    Command::Get { key, reply } => {
                        let _ = reply.send(store.get(&key).await);
                    }
                    Command::Flush(reply) => {
                        let _ = reply.send(());
                    }
                }
            }
            tracing::debug!("Persistence bridge stopped");
        });

        Self { tx }
    }

    /// Queue a write; returns once queued, not once stored
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.write_many(vec![(key.to_string(), serde_json::to_value(value)?)])
    }

    /// Queue several writes applied as one store operation
    pub fn write_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        self.submit(Command::Set(entries))
    }

    /// Queue key removal
    pub fn remove(&self, keys: &[&str]) -> Result<()> {
        self.submit(Command::Remove(
            keys.iter().map(|k| k.to_string()).collect(),
        ))
    }

    /// Read a key, after every previously queued operation has applied
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Get {
            key: key.to_string(),
            reply,
        })?;

        let value = rx
            .await
            .map_err(|_| GuardError::Persistence("persistence bridge dropped a read".into()))??;

        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Wait until everything queued so far has been applied
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Flush(reply))?;
        rx.await
            .map_err(|_| GuardError::Persistence("persistence bridge stopped".into()))
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| GuardError::Persistence("persistence bridge is closed".into()))
    }

    // ─── Security status ─────────────────────────────────────────

    pub fn persist_security_status(&self, status: &SecurityStatus) -> Result<()> {
        self.write(keys::SECURITY_STATUS, status)
    }

    pub fn persist_security_warning(&self, warning: &SecurityWarning) -> Result<()> {
        self.write(keys::SECURITY_WARNING, warning)
    }

    pub async fn security_status(&self) -> Result<Option<SecurityStatus>> {
        self.read(keys::SECURITY_STATUS).await
    }

    pub async fn security_warning(&self) -> Result<Option<SecurityWarning>> {
        self.read(keys::SECURITY_WARNING).await
    }

    // ─── Integrity ───────────────────────────────────────────────

    /// Baseline digest and timestamp, written together
    pub fn persist_baseline(&self, baseline: &IntegrityBaseline) -> Result<()> {
        self.write_many(vec![
            (
                keys::INTEGRITY_BASELINE_DIGEST.to_string(),
                Value::String(baseline.digest_hex.clone()),
            ),
            (
                keys::INTEGRITY_BASELINE_TIMESTAMP.to_string(),
                Value::from(baseline.established_at),
            ),
        ])
    }

    pub async fn baseline(&self) -> Result<Option<IntegrityBaseline>> {
        let Some(digest_hex) = self.read::<String>(keys::INTEGRITY_BASELINE_DIGEST).await? else {
            return Ok(None);
        };
        let established_at = self
            .read::<u64>(keys::INTEGRITY_BASELINE_TIMESTAMP)
            .await?
            .unwrap_or_default();

        Ok(Some(IntegrityBaseline {
            digest_hex,
            established_at,
        }))
    }

    pub fn clear_baseline(&self) -> Result<()> {
        self.remove(&[
            keys::INTEGRITY_BASELINE_DIGEST,
            keys::INTEGRITY_BASELINE_TIMESTAMP,
        ])
    }

    pub fn persist_first_load(&self, metadata: &FirstLoadMetadata) -> Result<()> {
        self.write(keys::INTEGRITY_FIRST_LOAD, metadata)
    }

    pub async fn first_load(&self) -> Result<Option<FirstLoadMetadata>> {
        self.read(keys::INTEGRITY_FIRST_LOAD).await
    }

    pub fn persist_integrity_warning(&self, warning: &IntegrityWarningRecord) -> Result<()> {
        self.write(keys::INTEGRITY_WARNING, warning)
    }

    pub async fn integrity_warning(&self) -> Result<Option<IntegrityWarningRecord>> {
        self.read(keys::INTEGRITY_WARNING).await
    }

    pub fn clear_integrity_warning(&self) -> Result<()> {
        self.remove(&[keys::INTEGRITY_WARNING])
    }

    pub fn persist_last_check(&self, record: &IntegrityCheckRecord) -> Result<()> {
        self.write(keys::LAST_INTEGRITY_CHECK, record)
    }

    pub async fn last_integrity_check(&self) -> Result<Option<IntegrityCheckRecord>> {
        self.read(keys::LAST_INTEGRITY_CHECK).await
    }
}
