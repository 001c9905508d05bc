//! # Cached Backing Documents
//!
//! Both the package catalog and the user list follow the same pattern: the
//! whole document lives in memory, is reloaded wholesale from its backing file
//! once it is older than the staleness window, and is rewritten in full on
//! every mutation.
//!
//! ## Cache States
//!
//! A [`CachedDocument`] is either [`CacheState::Fresh`] or [`CacheState::Stale`].
//! It starts out stale (nothing loaded) and every accessor moves it back to
//! fresh by reloading. There are no other states.
//!
//! ## Write-Then-Own-Read Consistency
//!
//! [`CachedDocument::update`] mutates a working copy, flushes it, and only then
//! swaps it into the cache and stamps the load time with "now". The writer's
//! next read therefore sees its own write without waiting out the window,
//! and a failed flush leaves the cached value exactly as it was.
//!
//! Other processes sharing the same backing file still observe staleness up to
//! the window, and concurrent whole-document rewrites from several processes
//! can lose updates. This type does not coordinate across processes.

use crate::clock::Clock;
use crate::error::StoreResult;
use crate::storage;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Freshness of a cached document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Fresh,
    Stale,
}

/// Outcome of a mutation closure passed to [`CachedDocument::update`].
#[derive(Debug)]
pub enum Change<R> {
    /// The working copy changed and must be flushed.
    Persist(R),
    /// Nothing changed; skip the flush.
    Unchanged(R),
}

/// Snapshot of cache bookkeeping, for debugging and monitoring.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub loaded_at: Option<DateTime<Utc>>,
    pub state: CacheState,
}

/// A document that can back a [`CachedDocument`].
pub trait Document: Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn entry_count(&self) -> usize;
}

impl<V> Document for BTreeMap<String, V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn entry_count(&self) -> usize {
        self.len()
    }
}

impl<T> Document for Vec<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn entry_count(&self) -> usize {
        self.len()
    }
}

struct Slot<T> {
    value: Arc<T>,
    loaded_at: Option<DateTime<Utc>>,
}

/// In-memory copy of a file-backed document with a staleness window.
pub struct CachedDocument<T> {
    path: PathBuf,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
    slot: Mutex<Slot<T>>,
}

impl<T: Document> CachedDocument<T> {
    pub fn new(path: impl Into<PathBuf>, stale_after: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            stale_after: Duration::from_std(stale_after).unwrap_or(Duration::MAX),
            clock,
            slot: Mutex::new(Slot {
                value: Arc::new(T::default()),
                loaded_at: None,
            }),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state_at(&self, slot: &Slot<T>, now: DateTime<Utc>) -> CacheState {
        match slot.loaded_at {
            Some(loaded_at) if now - loaded_at <= self.stale_after => CacheState::Fresh,
            _ => CacheState::Stale,
        }
    }

    async fn refresh_if_stale(&self, slot: &mut Slot<T>) -> StoreResult<()> {
        let now = self.clock.now();
        if self.state_at(slot, now) == CacheState::Fresh {
            return Ok(());
        }

        let value = storage::read_document::<T, _>(&self.path)
            .await?
            .unwrap_or_default();
        debug!(
            path = %self.path.display(),
            entries = value.entry_count(),
            "Reloaded backing document"
        );
        slot.value = Arc::new(value);
        slot.loaded_at = Some(now);
        Ok(())
    }

    /// Current document, reloading it first when stale.
    pub async fn read(&self) -> StoreResult<Arc<T>> {
        let mut slot = self.slot.lock().await;
        self.refresh_if_stale(&mut slot).await?;
        Ok(Arc::clone(&slot.value))
    }

    /// Apply `mutate` to a working copy and flush it when it reports a change.
    ///
    /// The cache only adopts the working copy after the flush succeeded.
    pub async fn update<R, F>(&self, mutate: F) -> StoreResult<R>
    where
        F: FnOnce(&mut T) -> StoreResult<Change<R>>,
    {
        let mut slot = self.slot.lock().await;
        self.refresh_if_stale(&mut slot).await?;

        let mut working = (*slot.value).clone();
        match mutate(&mut working)? {
            Change::Unchanged(result) => Ok(result),
            Change::Persist(result) => {
                storage::write_document(&self.path, &working).await?;
                info!(
                    path = %self.path.display(),
                    entries = working.entry_count(),
                    "Flushed backing document"
                );
                slot.value = Arc::new(working);
                slot.loaded_at = Some(self.clock.now());
                Ok(result)
            }
        }
    }

    pub async fn state(&self) -> CacheState {
        let slot = self.slot.lock().await;
        self.state_at(&slot, self.clock.now())
    }

    /// Force the next access to reload from the backing file.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        slot.loaded_at = None;
        debug!(path = %self.path.display(), "Cache invalidated");
    }

    pub async fn stats(&self) -> CacheStats {
        let slot = self.slot.lock().await;
        CacheStats {
            entries: slot.value.entry_count(),
            loaded_at: slot.loaded_at,
            state: self.state_at(&slot, self.clock.now()),
        }
    }
}
