//! # Registry Facade
//!
//! [`Registry`] wires the stores together the way an npm-compatible service
//! uses them, minus HTTP:
//!
//! - conflict checks and writes for one package name (or user name) run
//!   inside a per-key critical section, so "is it free? then take it" is
//!   atomic within the process;
//! - publish stores the archive before the metadata, so a version that is
//!   visible always has its archive;
//! - unpublish deletes archives before committing the metadata removal, so
//!   a failed cascade leaves the package intact and retryable;
//! - tarball URLs are derived from `server.base_url` whenever documents are
//!   handed out.
//!
//! ```rust,no_run
//! # use registry_store::{config::Config, registry::Registry, search::SearchQuery};
//! # async fn example(payload: serde_json::Value) -> registry_store::error::StoreResult<()> {
//! let registry = Registry::new(Config::load_or_default("registry.json")?)?;
//! registry.publish_payload(payload).await?;
//! let hits = registry.search(&SearchQuery::text("left-pad")).await?;
//! # Ok(())
//! # }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::credentials::{CredentialHasher, Pbkdf2Hasher};
use crate::error::{StoreError, StoreResult};
use crate::locks::KeyedLocks;
use crate::merge::{MergeStrategy, StandardMerge};
use crate::metadata::MetadataStore;
use crate::model::{PackageDocument, UserProfile, VersionRecord};
use crate::publish::PublishRequest;
use crate::ranking::{FuzzyRanker, Ranker};
use crate::search::{CatalogSearch, PackageDetail, PackageSummary, SearchQuery, SearchSettings};
use crate::tarball::{Tarball, TarballKey, TarballStore};
use crate::upstream::{self, HttpUpstream, UpstreamRegistry};
use crate::users::{NewUser, UserStore, UserUpdate};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A package document from the local catalog or, on a local miss, from upstream.
#[derive(Debug, Clone)]
pub enum PackageView {
    Local(PackageDocument),
    Upstream(Value),
}

impl PackageView {
    pub fn is_local(&self) -> bool {
        matches!(self, PackageView::Local(_))
    }

    pub fn into_json(self) -> StoreResult<Value> {
        match self {
            PackageView::Local(doc) => Ok(serde_json::to_value(doc)?),
            PackageView::Upstream(value) => Ok(value),
        }
    }
}

/// Collaborators used by [`Registry`]; anything left unset gets the default.
pub struct RegistryBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    hasher: Option<Arc<dyn CredentialHasher>>,
    ranker: Option<Arc<dyn Ranker>>,
    merger: Option<Arc<dyn MergeStrategy>>,
    upstream: Option<Arc<dyn UpstreamRegistry>>,
}

impl RegistryBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn hasher(mut self, hasher: Arc<dyn CredentialHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn ranker(mut self, ranker: Arc<dyn Ranker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    pub fn merge_strategy(mut self, merger: Arc<dyn MergeStrategy>) -> Self {
        self.merger = Some(merger);
        self
    }

    /// Use this upstream regardless of `upstream.enabled`.
    pub fn upstream(mut self, upstream: Arc<dyn UpstreamRegistry>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn build(self) -> StoreResult<Registry> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let hasher = match self.hasher {
            Some(hasher) => hasher,
            None => Arc::new(Pbkdf2Hasher::new(config.security.pbkdf2_iterations)?),
        };
        let ranker = self.ranker.unwrap_or_else(|| Arc::new(FuzzyRanker));
        let merger = self.merger.unwrap_or_else(|| Arc::new(StandardMerge));
        let upstream = match self.upstream {
            Some(upstream) => Some(upstream),
            None if config.upstream.enabled => Some(Arc::new(HttpUpstream::new(
                &config.upstream.url,
                config.upstream.timeout(),
            )?) as Arc<dyn UpstreamRegistry>),
            None => None,
        };

        let stale_after = config.stale_after();
        let metadata = MetadataStore::with_strategy(
            &config.storage.metadata_path,
            stale_after,
            Arc::clone(&clock),
            merger,
        );
        let users = UserStore::new(&config.storage.users_path, stale_after, clock, hasher);
        let tarballs = TarballStore::new(&config.storage.tarball_dir);
        let search = CatalogSearch::new(
            ranker,
            SearchSettings {
                max_results: config.search.max_results,
                threshold: config.search.threshold,
                distance: config.search.distance,
            },
        );

        info!(
            metadata = %config.storage.metadata_path.display(),
            users = %config.storage.users_path.display(),
            tarballs = %config.storage.tarball_dir.display(),
            upstream = upstream.is_some(),
            "Registry storage initialized"
        );

        Ok(Registry {
            base_url: config.server.base_url.trim_end_matches('/').to_string(),
            config,
            metadata,
            tarballs,
            users,
            search,
            upstream,
            package_locks: KeyedLocks::new(),
            user_locks: KeyedLocks::new(),
        })
    }
}

pub struct Registry {
    config: Config,
    base_url: String,
    metadata: MetadataStore,
    tarballs: TarballStore,
    users: UserStore,
    search: CatalogSearch,
    upstream: Option<Arc<dyn UpstreamRegistry>>,
    package_locks: KeyedLocks,
    user_locks: KeyedLocks,
}

impl Registry {
    /// Registry with default collaborators for `config`.
    pub fn new(config: Config) -> StoreResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> RegistryBuilder {
        RegistryBuilder {
            config,
            clock: None,
            hasher: None,
            ranker: None,
            merger: None,
            upstream: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn tarballs(&self) -> &TarballStore {
        &self.tarballs
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Public download URL of one archive.
    pub fn tarball_url(&self, name: &str, version: &str) -> String {
        let basename = name.rsplit('/').next().unwrap_or(name);
        format!("{}/{}/-/{}-{}.tgz", self.base_url, name, basename, version)
    }

    fn with_tarball_url(&self, mut record: VersionRecord) -> VersionRecord {
        record.dist.tarball = Some(self.tarball_url(&record.name, &record.version));
        record
    }

    fn with_tarball_urls(&self, mut doc: PackageDocument) -> PackageDocument {
        for (version, record) in doc.versions.iter_mut() {
            record.dist.tarball = Some(self.tarball_url(&doc.name, version));
        }
        doc
    }

    /// Decode an npm publish document and publish it.
    pub async fn publish_payload(&self, payload: Value) -> StoreResult<PackageDocument> {
        self.publish(PublishRequest::from_payload(payload)?).await
    }

    /// Publish a new version. An existing `name@version` is [`StoreError::AlreadyExists`].
    #[instrument(skip(self, request), fields(package = %request.name, version = %request.version))]
    pub async fn publish(&self, request: PublishRequest) -> StoreResult<PackageDocument> {
        let key = request.tarball_key()?;
        let _guard = self.package_locks.lock(&request.name).await;

        if self
            .metadata
            .get_version(&request.name, &request.version)
            .await?
            .is_some()
        {
            warn!(package = %request.name, version = %request.version, "Publish conflict");
            return Err(StoreError::AlreadyExists(format!(
                "{}@{}",
                request.name, request.version
            )));
        }

        self.tarballs.write(&key, &request.tarball).await?;
        match self
            .metadata
            .publish(&request.name, &request.version, request.record)
            .await
        {
            Ok(doc) => Ok(self.with_tarball_urls(doc)),
            Err(e) => {
                // Nothing references the archive yet
                if let Err(cleanup) = self.tarballs.delete(&key).await {
                    warn!(key = %key, error = %cleanup, "Failed to remove orphaned tarball");
                }
                Err(e)
            }
        }
    }

    /// Local document, or the upstream one on a local miss when configured.
    #[instrument(skip(self))]
    pub async fn package(&self, name: &str) -> StoreResult<Option<PackageView>> {
        if let Some(doc) = self.metadata.get_package(name).await? {
            return Ok(Some(PackageView::Local(self.with_tarball_urls(doc))));
        }

        let Some(upstream) = &self.upstream else {
            return Ok(None);
        };
        match upstream.fetch(&upstream::package_path(name)).await {
            Ok(found) => Ok(found.map(PackageView::Upstream)),
            Err(e) => {
                warn!(package = %name, error = %e, "Upstream lookup failed, treating as miss");
                Ok(None)
            }
        }
    }

    /// Local document only.
    pub async fn local_package(&self, name: &str) -> StoreResult<Option<PackageDocument>> {
        Ok(self
            .metadata
            .get_package(name)
            .await?
            .map(|doc| self.with_tarball_urls(doc)))
    }

    pub async fn version(&self, name: &str, version: &str) -> StoreResult<Option<VersionRecord>> {
        Ok(self
            .metadata
            .get_version(name, version)
            .await?
            .map(|record| self.with_tarball_url(record)))
    }

    /// Open the archive of `name@version`; `None` when it is not stored.
    pub async fn tarball(&self, name: &str, version: &str) -> StoreResult<Option<Tarball>> {
        let key = match TarballKey::new(name, version) {
            Ok(key) => key,
            Err(e) => {
                debug!(package = %name, version = %version, error = %e, "Not a valid tarball key");
                return Ok(None);
            }
        };
        self.tarballs.read(&key).await
    }

    /// Remove one version and its archive. `false` when it was not published.
    #[instrument(skip(self))]
    pub async fn unpublish_version(&self, name: &str, version: &str) -> StoreResult<bool> {
        let _guard = self.package_locks.lock(name).await;

        if self.metadata.get_version(name, version).await?.is_none() {
            return Ok(false);
        }
        self.delete_tarball(&TarballKey::new(name, version)?).await?;
        self.metadata.unpublish_version(name, version).await
    }

    /// Remove a package and every archive, returning the removed versions.
    ///
    /// Archives go first; if one cannot be deleted the metadata is left in
    /// place and the call fails, so it can simply be retried.
    #[instrument(skip(self))]
    pub async fn unpublish_all(&self, name: &str) -> StoreResult<Vec<String>> {
        let _guard = self.package_locks.lock(name).await;

        let keys = self.metadata.tarball_keys(name).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        for key in &keys {
            self.delete_tarball(key).await?;
        }
        let versions = self.metadata.unpublish_all(name).await?;
        info!(package = %name, count = versions.len(), "Package removed with its tarballs");
        Ok(versions)
    }

    async fn delete_tarball(&self, key: &TarballKey) -> StoreResult<()> {
        match self.tarballs.delete(key).await {
            Err(StoreError::NotFound(_)) => {
                warn!(key = %key, "Tarball already missing, continuing");
                Ok(())
            }
            other => other,
        }
    }

    /// Register a user. An existing name is [`StoreError::AlreadyExists`].
    #[instrument(skip(self, user), fields(user = %user.name))]
    pub async fn register_user(&self, user: NewUser) -> StoreResult<UserProfile> {
        let _guard = self.user_locks.lock(&user.name).await;

        if self.users.user_exists(&user.name).await? {
            warn!(user = %user.name, "Registration conflict");
            return Err(StoreError::AlreadyExists(format!("user {}", user.name)));
        }
        let record = self.users.create_user(user).await?;
        Ok(UserProfile::from(&record))
    }

    pub async fn user(&self, name: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.users.get_user(name).await?.as_ref().map(UserProfile::from))
    }

    pub async fn update_user(
        &self,
        name: &str,
        update: UserUpdate,
    ) -> StoreResult<Option<UserProfile>> {
        let _guard = self.user_locks.lock(name).await;
        Ok(self
            .users
            .update_user(name, update)
            .await?
            .as_ref()
            .map(UserProfile::from))
    }

    pub async fn authorize(&self, name: &str, password: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self
            .users
            .authorize(name, password)
            .await?
            .as_ref()
            .map(UserProfile::from))
    }

    /// Search the local catalog. At least one of query, author or sort is required.
    pub async fn search(&self, query: &SearchQuery) -> StoreResult<Vec<PackageDocument>> {
        if query.is_unconstrained() {
            return Err(StoreError::BadRequest(
                "search needs at least one of query, author or sort".to_string(),
            ));
        }
        let catalog = self.metadata.snapshot().await?;
        Ok(self
            .search
            .search(&catalog, query)
            .into_iter()
            .map(|doc| self.with_tarball_urls(doc))
            .collect())
    }

    pub async fn autocomplete(&self, prefix: &str) -> StoreResult<Vec<PackageSummary>> {
        let catalog = self.metadata.snapshot().await?;
        Ok(self.search.autocomplete(&catalog, prefix))
    }

    pub async fn package_detail(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> StoreResult<Option<PackageDetail>> {
        let catalog = self.metadata.snapshot().await?;
        Ok(catalog
            .get(name)
            .and_then(|doc| PackageDetail::from_document(doc, version)))
    }
}
