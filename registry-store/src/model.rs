//! Persisted document shapes
//!
//! These types mirror the JSON an npm client reads and writes: a
//! [`PackageDocument`] per package name holding every [`VersionRecord`], and a
//! flat list of [`UserRecord`]s. Fields the registry does not interpret are
//! carried in flattened `extra` maps so unknown keys survive a round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Reserved `time` key holding the first publish timestamp
pub const TIME_CREATED: &str = "created";

/// Reserved `time` key holding the last mutation timestamp
pub const TIME_MODIFIED: &str = "modified";

/// The dist-tag that always points at the highest published version
pub const LATEST_TAG: &str = "latest";

/// The whole package catalog, keyed by package name.
pub type Catalog = BTreeMap<String, PackageDocument>;

/// A maintainer, contributor or publisher.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Person {
    pub fn new(name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            name: name.into(),
            email,
            url: None,
        }
    }
}

/// `author` as found in package.json: either an object or `"Name <email> (url)"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    Detail(Person),
    Text(String),
}

impl Author {
    pub fn name(&self) -> &str {
        match self {
            Author::Detail(person) => &person.name,
            Author::Text(text) => text
                .split(['<', '('])
                .next()
                .map(str::trim)
                .unwrap_or_default(),
        }
    }
}

/// `repository` as found in package.json: either an object or a bare URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Repository {
    Detail {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        url: String,
    },
    Url(String),
}

impl Repository {
    pub fn url(&self) -> &str {
        match self {
            Repository::Detail { url, .. } => url,
            Repository::Url(url) => url,
        }
    }
}

/// Distribution info of one version.
///
/// `tarball` is never persisted; it is computed from the configured base URL
/// whenever a document is handed out.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of one published version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Person>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributors: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    /// Account that published this version.
    #[serde(rename = "_npmUser", default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Person>,
    pub dist: DistInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VersionRecord {
    /// Minimal record with empty dist info.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            readme: None,
            keywords: Vec::new(),
            dependencies: BTreeMap::new(),
            maintainers: Vec::new(),
            author: None,
            contributors: None,
            license: None,
            repository: None,
            publisher: None,
            dist: DistInfo::default(),
            extra: Map::new(),
        }
    }

    pub fn publisher_name(&self) -> Option<&str> {
        self.publisher.as_ref().map(|p| p.name.as_str())
    }
}

/// Everything the registry knows about one package name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
    #[serde(default)]
    pub time: BTreeMap<String, DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Person>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributors: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageDocument {
    /// Empty document for `name`; it only becomes valid once a version is added.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            description: None,
            dist_tags: BTreeMap::new(),
            versions: BTreeMap::new(),
            time: BTreeMap::new(),
            maintainers: Vec::new(),
            license: None,
            contributors: None,
            readme: None,
            extra: Map::new(),
        }
    }

    pub fn latest(&self) -> Option<&str> {
        self.dist_tags.get(LATEST_TAG).map(String::as_str)
    }

    pub fn latest_version(&self) -> Option<&VersionRecord> {
        self.latest().and_then(|v| self.versions.get(v))
    }

    /// Publish time of the version `dist-tags.latest` points at.
    pub fn latest_published_at(&self) -> Option<DateTime<Utc>> {
        self.latest().and_then(|v| self.time.get(v)).copied()
    }
}

/// A registered account. `password_hash` is persisted under `password`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The publicly visible part of a [`UserRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Keys serialized from the typed fields; `extra` must never carry them.
    pub const FIELDS: [&'static str; 4] = ["name", "email", "password", "date"];

    /// Drop `extra` entries that would duplicate a typed field on disk.
    pub fn strip_reserved_extra(&mut self) {
        self.extra.retain(|key, _| !Self::FIELDS.contains(&key.as_str()));
    }
}

impl From<&UserRecord> for UserProfile {
    fn from(user: &UserRecord) -> Self {
        Self {
            name: user.name.clone(),
            email: user.email.clone(),
            date: user.date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_record_keeps_unknown_fields() {
        let payload = json!({
            "name": "foo",
            "version": "1.0.0",
            "description": "a foo",
            "main": "index.js",
            "scripts": {"test": "node test.js"},
            "_npmUser": {"name": "alice", "email": "alice@example.com"},
            "author": "Alice Example <alice@example.com> (https://example.com)",
            "repository": {"type": "git", "url": "git+https://github.com/alice/foo.git"},
            "dist": {"shasum": "abc", "tarball": "http://old/foo-1.0.0.tgz", "fileCount": 3}
        });

        let record: VersionRecord = serde_json::from_value(payload).expect("should parse");
        assert_eq!(record.publisher_name(), Some("alice"));
        assert_eq!(record.author.as_ref().map(Author::name), Some("Alice Example"));
        assert_eq!(
            record.repository.as_ref().map(Repository::url),
            Some("git+https://github.com/alice/foo.git")
        );
        assert_eq!(record.extra.get("main"), Some(&json!("index.js")));
        assert_eq!(record.dist.extra.get("fileCount"), Some(&json!(3)));

        let back = serde_json::to_value(&record).expect("should serialize");
        assert_eq!(back["scripts"]["test"], "node test.js");
        assert_eq!(back["_npmUser"]["name"], "alice");
    }

    #[test]
    fn test_version_record_requires_dist() {
        let payload = json!({"name": "foo", "version": "1.0.0"});
        assert!(serde_json::from_value::<VersionRecord>(payload).is_err());
    }

    #[test]
    fn test_package_document_wire_names() {
        let mut doc = PackageDocument::new("foo");
        doc.dist_tags.insert(LATEST_TAG.to_string(), "1.0.0".to_string());
        doc.versions
            .insert("1.0.0".to_string(), VersionRecord::new("foo", "1.0.0"));

        let value = serde_json::to_value(&doc).expect("should serialize");
        assert_eq!(value["_id"], "foo");
        assert_eq!(value["dist-tags"]["latest"], "1.0.0");
        assert!(value.get("readme").is_none());
        assert_eq!(doc.latest_version().map(|v| v.version.as_str()), Some("1.0.0"));
    }

    #[test]
    fn test_user_record_hides_hash_in_profile() {
        let user: UserRecord = serde_json::from_value(json!({
            "name": "alice",
            "email": "alice@example.com",
            "password": "pbkdf2-sha256$1$c2FsdA==$aGFzaA==",
            "date": "2024-01-01T00:00:00.000Z",
            "type": "user"
        }))
        .expect("should parse");
        assert_eq!(user.extra.get("type"), Some(&json!("user")));

        let profile = serde_json::to_value(UserProfile::from(&user)).expect("should serialize");
        assert!(profile.get("password").is_none());
        assert_eq!(profile["name"], "alice");
    }
}
