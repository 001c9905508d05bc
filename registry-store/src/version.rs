//! Semantic-version precedence helpers.
//!
//! "latest" is always the key with the highest precedence: major, minor and
//! patch compared numerically, then pre-release identifiers, where a
//! pre-release sorts below the same release without one. Build metadata does
//! not take part in precedence.

use crate::error::{StoreError, StoreResult};
use std::cmp::Ordering;

/// Parse a version string, mapping failures to [`StoreError::InvalidVersion`].
pub fn parse(version: &str) -> StoreResult<semver::Version> {
    semver::Version::parse(version)
        .map_err(|e| StoreError::InvalidVersion(format!("{}: {}", version, e)))
}

fn precedence(a: &semver::Version, b: &semver::Version) -> Ordering {
    a.major
        .cmp(&b.major)
        .then(a.minor.cmp(&b.minor))
        .then(a.patch.cmp(&b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// Compare two version strings by precedence.
///
/// Unparseable strings sort below every valid version. Equal precedence falls
/// back to plain string order so the result is total and deterministic.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => precedence(&va, &vb).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Highest-precedence version among `versions`.
pub fn max_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions.into_iter().max_by(|a, b| compare(a, b))
}

/// Sort newest first.
pub fn sort_descending(versions: &mut [String]) {
    versions.sort_by(|a, b| compare(b, a));
}
