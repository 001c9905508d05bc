//! File helpers shared by the stores.
//!
//! Backing documents and tarballs are always replaced with a write-to-temp then
//! rename sequence so a crash mid-write never leaves a truncated file behind.

use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

/// Save bytes to the specified path atomically, creating parent directories.
pub async fn save_file<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> StoreResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
            debug!(parent = %parent.display(), "Ensured parent directory");
        }
    }

    let content = content.as_ref();
    let tmp = temp_path(path);
    fs::write(&tmp, content).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    info!(
        path = %path.display(),
        size = content.len(),
        "File saved successfully"
    );
    Ok(())
}

/// Read and parse a JSON document, returning `None` when the file is absent.
pub async fn read_document<T, P>(path: P) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Backing document does not exist yet");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize a document as JSON and replace the backing file in full.
pub async fn write_document<T, P>(path: P, document: &T) -> StoreResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let content = serde_json::to_vec_pretty(document)?;
    save_file(path, content).await
}

// Distinguishes concurrent writes of one target within this process
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let sequence = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".{}.{}.tmp", std::process::id(), sequence));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_document_reads_as_none() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let doc: Option<BTreeMap<String, u32>> =
            read_document(temp_dir.path().join("absent.json"))
                .await
                .expect("should read missing file");
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_document() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let path = temp_dir.path().join("nested/dir/doc.json");

        let mut doc = BTreeMap::new();
        doc.insert("answer".to_string(), 42u32);
        write_document(&path, &doc).await.expect("should write");

        let back: BTreeMap<String, u32> = read_document(&path)
            .await
            .expect("should read")
            .expect("document should exist");
        assert_eq!(back, doc);

        // No temp file left next to the document
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().expect("has parent"))
            .expect("should list dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_document_is_corrupt() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{not json").expect("should write");

        let result: StoreResult<Option<BTreeMap<String, u32>>> = read_document(&path).await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
