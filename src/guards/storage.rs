//! Storage guard — observe-only decorator over the page's key/value store
//!
//! Wraps the page's own storage area, not the extension's durable store.
//! Writes always go through; the guard only watches for keys rewritten far
//! more often than a page normally would, and for unusually large values.

use super::{GuardContext, GuardKind, InstallMarker};
use crate::error::Result;
use crate::types::ActivityCategory;
use std::collections::HashMap;

/// Page-scoped persistent key/value storage
pub trait PageStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&mut self, key: &str) -> Result<()>;
}

/// Observing decorator over a [`PageStorage`]
pub struct GuardedStorage<S> {
    inner: S,
    ctx: GuardContext,
    writes: HashMap<String, u64>,
    large_writes: u64,
    _marker: InstallMarker,
}

impl<S: PageStorage> GuardedStorage<S> {
    pub fn new(inner: S, ctx: GuardContext) -> Self {
        let marker = ctx.install(GuardKind::Storage);
        Self {
            inner,
            ctx,
            writes: HashMap::new(),
            large_writes: 0,
            _marker: marker,
        }
    }

    /// Writes seen for `key` during this page lifetime
    pub fn write_count(&self, key: &str) -> u64 {
        self.writes.get(key).copied().unwrap_or_default()
    }

    /// Large-write observations so far
    pub fn large_write_count(&self) -> u64 {
        self.large_writes
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn observe_write(&mut self, key: &str, value: &str) {
        let limit = self.ctx.config().storage_write_limit;
        let count = self.writes.entry(key.to_string()).or_insert(0);
        *count += 1;

        if *count > limit {
            tracing::warn!(key, writes = *count, limit, "Excessive storage writes");
            self.ctx.ledger().record(ActivityCategory::Storage, key);
        }

        // Length in UTF-16 code units, the unit page scripts measure strings in.
        let length = value.encode_utf16().count();
        if length > self.ctx.config().large_write_threshold {
            self.large_writes += 1;
            tracing::warn!(key, length, "Large storage write");
        }
    }
}

impl<S: PageStorage> PageStorage for GuardedStorage<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_item(key)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.observe_write(key, value);
        self.inner.set_item(key, value)
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        self.inner.remove_item(key)
    }
}
