//! Package catalog store.
//!
//! The whole catalog (package name to [`PackageDocument`]) is one cached,
//! file-backed document. Every read and write first reloads it when stale;
//! every write rewrites the file in full.
//!
//! A document exists only while it has at least one version. Unpublishing the
//! last version removes the document entirely.

use crate::cache::{CacheStats, CachedDocument, Change};
use crate::clock::Clock;
use crate::error::StoreResult;
use crate::merge::{self, MergeStrategy, StandardMerge};
use crate::model::{Catalog, PackageDocument, VersionRecord, TIME_MODIFIED};
use crate::tarball::TarballKey;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub struct MetadataStore {
    catalog: CachedDocument<Catalog>,
    merger: Arc<dyn MergeStrategy>,
    clock: Arc<dyn Clock>,
}

impl MetadataStore {
    /// Store using [`StandardMerge`].
    pub fn new(path: impl AsRef<Path>, stale_after: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_strategy(path, stale_after, clock, Arc::new(StandardMerge))
    }

    pub fn with_strategy(
        path: impl AsRef<Path>,
        stale_after: Duration,
        clock: Arc<dyn Clock>,
        merger: Arc<dyn MergeStrategy>,
    ) -> Self {
        Self {
            catalog: CachedDocument::new(path.as_ref(), stale_after, Arc::clone(&clock)),
            merger,
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        self.catalog.path()
    }

    #[instrument(skip(self))]
    pub async fn get_package(&self, name: &str) -> StoreResult<Option<PackageDocument>> {
        let catalog = self.catalog.read().await?;
        let doc = catalog.get(name).cloned();
        debug!(package = %name, found = doc.is_some(), "Package lookup");
        Ok(doc)
    }

    #[instrument(skip(self))]
    pub async fn get_version(&self, name: &str, version: &str) -> StoreResult<Option<VersionRecord>> {
        let catalog = self.catalog.read().await?;
        Ok(catalog
            .get(name)
            .and_then(|doc| doc.versions.get(version))
            .cloned())
    }

    /// Merge `payload` in as `name@version` and persist the catalog.
    ///
    /// Existing versions are replaced; conflict detection is the caller's job.
    #[instrument(skip(self, payload))]
    pub async fn publish(
        &self,
        name: &str,
        version: &str,
        payload: VersionRecord,
    ) -> StoreResult<PackageDocument> {
        let now = self.clock.now();
        let merger = Arc::clone(&self.merger);
        let doc = self
            .catalog
            .update(move |catalog| {
                let merged = merger.merge(catalog.get(name), name, version, payload, now)?;
                catalog.insert(name.to_string(), merged.clone());
                Ok(Change::Persist(merged))
            })
            .await?;

        info!(
            package = %name,
            version = %version,
            latest = doc.latest().unwrap_or_default(),
            "Published package version"
        );
        Ok(doc)
    }

    /// Remove one version. Returns `false` when it was not published.
    ///
    /// `latest` is recomputed, other dist-tags pointing at the removed version
    /// are dropped, and the document goes away with its last version.
    #[instrument(skip(self))]
    pub async fn unpublish_version(&self, name: &str, version: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let removed = self
            .catalog
            .update(|catalog| {
                let Some(doc) = catalog.get_mut(name) else {
                    return Ok(Change::Unchanged(false));
                };
                if doc.versions.remove(version).is_none() {
                    return Ok(Change::Unchanged(false));
                }
                doc.time.remove(version);

                if doc.versions.is_empty() {
                    catalog.remove(name);
                    info!(package = %name, "Last version removed, dropping package");
                    return Ok(Change::Persist(true));
                }

                doc.dist_tags.retain(|_, tagged| tagged != version);
                merge::refresh_latest(doc);
                doc.time.insert(TIME_MODIFIED.to_string(), now);
                Ok(Change::Persist(true))
            })
            .await?;

        if removed {
            info!(package = %name, version = %version, "Unpublished package version");
        }
        Ok(removed)
    }

    /// Remove the whole document, returning every version it held.
    #[instrument(skip(self))]
    pub async fn unpublish_all(&self, name: &str) -> StoreResult<Vec<String>> {
        let versions = self
            .catalog
            .update(|catalog| match catalog.remove(name) {
                Some(doc) => Ok(Change::Persist(doc.versions.into_keys().collect())),
                None => Ok(Change::Unchanged(Vec::new())),
            })
            .await?;

        if !versions.is_empty() {
            info!(package = %name, count = versions.len(), "Unpublished package");
        }
        Ok(versions)
    }

    /// The catalog as currently cached, reloaded first when stale.
    pub async fn snapshot(&self) -> StoreResult<Arc<Catalog>> {
        self.catalog.read().await
    }

    pub async fn package_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.catalog.read().await?.keys().cloned().collect())
    }

    /// Blob keys of every published version of `name`.
    pub async fn tarball_keys(&self, name: &str) -> StoreResult<Vec<TarballKey>> {
        let catalog = self.catalog.read().await?;
        let Some(doc) = catalog.get(name) else {
            return Ok(Vec::new());
        };
        doc.versions
            .keys()
            .map(|version| TarballKey::new(name, version.as_str()))
            .collect()
    }

    pub async fn stats(&self) -> CacheStats {
        self.catalog.stats().await
    }

    pub async fn invalidate(&self) {
        self.catalog.invalidate().await
    }
}
