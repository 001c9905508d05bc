//! Version archive storage.
//!
//! Each `(name, version)` pair maps to exactly one file:
//! `<root>/<escaped name>/<escaped name>-<version>.tgz`. Package names are
//! escaped by [`escape_package_name`] and nowhere else, so scoped names such as
//! `@scope/pkg` never introduce a directory level and never collide with an
//! unscoped name.

use crate::error::{StoreError, StoreResult};
use crate::storage;
use crate::version;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument};

const CHUNK_SIZE: usize = 64 * 1024;

/// Escape a package name into a single path segment.
///
/// The mapping is injective: `%` is escaped first, then the path-unsafe
/// characters, and a leading `.` so `.`/`..` can never be produced.
pub fn escape_package_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2f"),
            '\\' => escaped.push_str("%5c"),
            '.' if i == 0 => escaped.push_str("%2e"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Identifies one version archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TarballKey {
    name: String,
    version: String,
}

impl TarballKey {
    /// Build a key, rejecting an empty name or a non-semver version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        let version = version.into();
        if name.is_empty() || name.contains('\0') {
            return Err(StoreError::BadRequest(format!(
                "invalid package name for tarball: {:?}",
                name
            )));
        }
        version::parse(&version)?;
        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Path relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        let escaped = escape_package_name(&self.name);
        let file_name = format!("{}-{}.tgz", escaped, self.version);
        PathBuf::from(escaped).join(file_name)
    }
}

impl fmt::Display for TarballKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// An open archive. Nothing is read until the caller consumes it.
#[derive(Debug)]
pub struct Tarball {
    size: u64,
    file: fs::File,
}

impl Tarball {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lazily read the archive in fixed-size chunks.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::unfold(Some(self.file), |state| async move {
            let mut file = state?;
            let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
            match file.read_buf(&mut buf).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(buf.freeze()), Some(file))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Buffer the whole archive.
    pub async fn read_to_bytes(mut self) -> StoreResult<Bytes> {
        let mut data = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        self.file.read_to_end(&mut data).await?;
        Ok(Bytes::from(data))
    }
}

/// Directory-backed blob store for version archives.
#[derive(Debug, Clone)]
pub struct TarballStore {
    root: PathBuf,
}

impl TarballStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &TarballKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Store an archive, replacing any previous content for the key.
    #[instrument(skip(self, data), fields(key = %key))]
    pub async fn write(&self, key: &TarballKey, data: impl AsRef<[u8]>) -> StoreResult<()> {
        let path = self.path_for(key);
        storage::save_file(&path, data).await?;
        info!(package = %key.name(), version = %key.version(), "Tarball stored");
        Ok(())
    }

    /// Open an archive; `None` when it was never stored.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn read(&self, key: &TarballKey) -> StoreResult<Option<Tarball>> {
        let path = self.path_for(key);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Tarball not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        debug!(path = %path.display(), size, "Opened tarball");
        Ok(Some(Tarball { size, file }))
    }

    pub async fn exists(&self, key: &TarballKey) -> StoreResult<bool> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    /// Remove an archive. Deleting an absent key is [`StoreError::NotFound`].
    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &TarballKey) -> StoreResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("tarball {}", key)));
            }
            Err(e) => return Err(e.into()),
        }
        info!(package = %key.name(), version = %key.version(), "Tarball deleted");

        // Drop the per-package directory once its last archive is gone
        if let Some(dir) = path.parent() {
            if fs::remove_dir(dir).await.is_ok() {
                debug!(dir = %dir.display(), "Removed empty package directory");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn key(name: &str, version: &str) -> TarballKey {
        TarballKey::new(name, version).expect("key should be valid")
    }

    #[test]
    fn test_escape_is_single_segment_and_injective() {
        let names = ["@scope/pkg", "@scope%2fpkg", "scope/pkg", ".hidden", "%2ehidden", "plain"];
        let escaped: HashSet<String> = names.iter().map(|n| escape_package_name(n)).collect();
        assert_eq!(escaped.len(), names.len());
        for e in &escaped {
            assert!(!e.contains('/'));
            assert!(!e.starts_with('.'));
        }
        assert_eq!(escape_package_name("@scope/pkg"), "@scope%2fpkg");
        assert_eq!(escape_package_name("left-pad"), "left-pad");
    }

    #[test]
    fn test_key_layout_and_validation() {
        let k = key("@scope/pkg", "1.2.3");
        assert_eq!(
            k.relative_path(),
            PathBuf::from("@scope%2fpkg").join("@scope%2fpkg-1.2.3.tgz")
        );
        assert_eq!(k.to_string(), "@scope/pkg@1.2.3");

        // Without the per-package directory these two would share a file name
        let a = key("foo-1", "0.0.1").relative_path();
        let b = key("foo", "1-0.0.1").relative_path();
        assert_ne!(a, b);

        assert!(TarballKey::new("", "1.0.0").is_err());
        assert!(TarballKey::new("foo", "../../etc").is_err());
    }

    #[tokio::test]
    async fn test_write_read_overwrite() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let store = TarballStore::new(temp_dir.path());
        let k = key("@scope/pkg", "1.0.0");

        assert!(store.read(&k).await.expect("should read").is_none());
        assert!(!store.exists(&k).await.expect("should check"));

        store.write(&k, b"first").await.expect("should write");
        store.write(&k, b"second").await.expect("should overwrite");
        assert!(store.exists(&k).await.expect("should check"));

        let tarball = store.read(&k).await.expect("should read").expect("should exist");
        assert_eq!(tarball.size(), 6);
        assert_eq!(&tarball.read_to_bytes().await.expect("should buffer")[..], b"second");
    }

    #[tokio::test]
    async fn test_stream_yields_all_chunks() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let store = TarballStore::new(temp_dir.path());
        let k = key("big", "1.0.0");
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        store.write(&k, &data).await.expect("should write");

        let tarball = store.read(&k).await.expect("should read").expect("should exist");
        let chunks: Vec<Bytes> = tarball
            .into_stream()
            .map(|chunk| chunk.expect("chunk should read"))
            .collect()
            .await;
        assert!(chunks.len() >= 3);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let store = TarballStore::new(temp_dir.path());
        let k = key("foo", "1.0.0");

        let result = store.delete(&k).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        store.write(&k, b"data").await.expect("should write");
        store.delete(&k).await.expect("should delete");
        assert!(!store.exists(&k).await.expect("should check"));
        assert!(!temp_dir.path().join("foo").exists());
        assert!(store.delete(&k).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_keeps_sibling_versions() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let store = TarballStore::new(temp_dir.path());
        let v1 = key("foo", "1.0.0");
        let v2 = key("foo", "2.0.0");
        store.write(&v1, b"one").await.expect("should write");
        store.write(&v2, b"two").await.expect("should write");

        store.delete(&v1).await.expect("should delete");
        assert!(store.exists(&v2).await.expect("should check"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overwrites_all_succeed() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let store = std::sync::Arc::new(TarballStore::new(temp_dir.path()));

        for round in 0..20 {
            let tasks: Vec<_> = (0..8)
                .map(|i| {
                    let store = std::sync::Arc::clone(&store);
                    tokio::spawn(async move {
                        store
                            .write(&key("foo", "1.0.0"), format!("round {round} writer {i}"))
                            .await
                    })
                })
                .collect();
            for task in tasks {
                task.await.expect("task should finish").expect("write should succeed");
            }
        }

        let data = store
            .read(&key("foo", "1.0.0"))
            .await
            .expect("should read")
            .expect("should exist")
            .read_to_bytes()
            .await
            .expect("should buffer");
        assert!(data.starts_with(b"round 19 writer "));

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path().join("foo"))
            .expect("should list")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
