//! Merging a published version into its package document.
//!
//! The store picks one [`MergeStrategy`] at construction time and applies it
//! on every publish. [`StandardMerge`] is the npm-compatible behaviour and the
//! default.

use crate::error::{StoreError, StoreResult};
use crate::model::{PackageDocument, VersionRecord, LATEST_TAG, TIME_CREATED, TIME_MODIFIED};
use crate::version;
use chrono::{DateTime, Utc};

/// Produces the next state of a package document for one publish.
///
/// Implementations must not mutate `current`; it may be a live cache entry.
pub trait MergeStrategy: Send + Sync {
    fn merge(
        &self,
        current: Option<&PackageDocument>,
        name: &str,
        version: &str,
        payload: VersionRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<PackageDocument>;
}

/// Add or replace `versions[version]`, stamp `time`, recompute `latest`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardMerge;

impl MergeStrategy for StandardMerge {
    fn merge(
        &self,
        current: Option<&PackageDocument>,
        name: &str,
        version: &str,
        mut payload: VersionRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<PackageDocument> {
        version::parse(version)?;
        if payload.name != name {
            return Err(StoreError::BadRequest(format!(
                "payload names package '{}' but was published as '{}'",
                payload.name, name
            )));
        }
        if payload.version != version {
            return Err(StoreError::BadRequest(format!(
                "payload carries version '{}' but was published as '{}'",
                payload.version, version
            )));
        }

        let mut doc = current
            .filter(|doc| !doc.versions.is_empty())
            .cloned()
            .unwrap_or_else(|| first_publish(name, &payload, now));

        // Tarball URLs are derived on every read
        payload.dist.tarball = None;

        doc.time.insert(version.to_string(), now);
        doc.time.insert(TIME_MODIFIED.to_string(), now);
        doc.versions.insert(version.to_string(), payload);
        refresh_latest(&mut doc);

        Ok(doc)
    }
}

fn first_publish(name: &str, payload: &VersionRecord, now: DateTime<Utc>) -> PackageDocument {
    let mut doc = PackageDocument::new(name);
    doc.description = payload.description.clone();
    doc.contributors = payload.contributors.clone();
    doc.license = payload.license.clone();
    doc.maintainers = payload.maintainers.clone();
    doc.time.insert(TIME_CREATED.to_string(), now);
    doc
}

/// Point `latest` at the highest-precedence version key.
///
/// Returns the new value, or `None` (and removes the tag) when no versions remain.
pub fn refresh_latest(doc: &mut PackageDocument) -> Option<String> {
    match version::max_version(doc.versions.keys().map(String::as_str)) {
        Some(max) => {
            let max = max.to_string();
            doc.dist_tags.insert(LATEST_TAG.to_string(), max.clone());
            Some(max)
        }
        None => {
            doc.dist_tags.remove(LATEST_TAG);
            None
        }
    }
}
