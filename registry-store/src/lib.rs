//! # registry-store
//!
//! Storage engine for a self-hosted npm-compatible package registry.
//!
//! The crate persists per-package metadata documents, version tarballs and a
//! user credential list, and answers catalog searches. HTTP routing is left to
//! the embedding service; [`Registry`] exposes the operations such a service
//! needs.
//!
//! ## Components
//!
//! - [`metadata::MetadataStore`]: cached, file-backed catalog of package documents
//! - [`merge::StandardMerge`]: merges a published version into its document
//! - [`tarball::TarballStore`]: one archive file per `(name, version)`
//! - [`users::UserStore`]: cached, file-backed user list with hashed passwords
//! - [`search::CatalogSearch`]: ranking, filtering, sorting and pagination
//! - [`registry::Registry`]: the facade composing all of the above
//!
//! Both backing documents follow the same caching rules, described in
//! [`cache`]: reload wholesale once older than the staleness window, and
//! treat a successful write as a fresh load.

pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod locks;
pub mod logging;
pub mod merge;
pub mod metadata;
pub mod model;
pub mod publish;
pub mod ranking;
pub mod registry;
pub mod search;
pub mod storage;
pub mod tarball;
pub mod upstream;
pub mod users;
pub mod validation;
pub mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ErrorCode, StoreError, StoreResult};
pub use model::{PackageDocument, UserProfile, UserRecord, VersionRecord};
pub use registry::{PackageView, Registry, RegistryBuilder};
pub use search::{SearchQuery, SortOrder};
pub use users::{NewUser, UserUpdate};
