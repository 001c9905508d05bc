//! Decoding of an npm publish document.
//!
//! `npm publish` sends the package document with exactly one new version
//! (named by `dist-tags.latest`) and the archive base64-encoded under
//! `_attachments`. [`PublishRequest::from_payload`] turns that into a
//! validated version record plus the raw archive bytes.

use crate::error::{StoreError, StoreResult};
use crate::model::VersionRecord;
use crate::tarball::TarballKey;
use crate::validation;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

/// Calculate SHA1 hash of data as lowercase hex (npm `shasum`).
pub fn sha1_hash(data: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Subresource-integrity string for data (npm `integrity`).
pub fn sha512_integrity(data: &[u8]) -> String {
    use sha2::{Digest, Sha512};
    let mut hasher = Sha512::new();
    hasher.update(data);
    format!("sha512-{}", STANDARD.encode(hasher.finalize()))
}

/// A decoded, validated publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub name: String,
    pub version: String,
    pub record: VersionRecord,
    pub tarball: Bytes,
}

impl PublishRequest {
    pub fn from_payload(payload: Value) -> StoreResult<Self> {
        let Value::Object(mut payload) = payload else {
            return Err(StoreError::BadRequest(
                "publish payload is not an object".to_string(),
            ));
        };

        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::BadRequest("publish payload has no 'name'".to_string()))?;
        let name = validation::validate_package_name(name)?;

        let version = payload
            .get("dist-tags")
            .and_then(|tags| tags.get("latest"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::BadRequest(format!(
                    "Package '{}': publish payload has no 'dist-tags.latest'",
                    name
                ))
            })?;
        let version = validation::validate_version(version)?;

        let record = payload
            .get_mut("versions")
            .and_then(|versions| versions.get_mut(&version))
            .map(Value::take)
            .ok_or_else(|| {
                StoreError::BadRequest(format!(
                    "Package '{}': 'versions' has no entry for {}",
                    name, version
                ))
            })?;
        let mut record: VersionRecord = serde_json::from_value(record).map_err(|e| {
            StoreError::BadRequest(format!(
                "Package '{}': version {} is malformed: {}",
                name, version, e
            ))
        })?;
        if record.name != name || record.version != version {
            return Err(StoreError::BadRequest(format!(
                "Package '{}': version document names {}@{}",
                name, record.name, record.version
            )));
        }

        let tarball = decode_attachment(&payload, &name, &version)?;

        let shasum = sha1_hash(&tarball);
        if let Some(declared) = record.dist.shasum.as_deref() {
            if !declared.eq_ignore_ascii_case(&shasum) {
                warn!(package = %name, version = %version, declared, computed = %shasum, "Tarball shasum mismatch");
                return Err(StoreError::BadRequest(format!(
                    "Package '{}': tarball shasum {} does not match declared {}",
                    name, shasum, declared
                )));
            }
        }
        record.dist.shasum = Some(shasum);
        if record.dist.integrity.is_none() {
            record.dist.integrity = Some(sha512_integrity(&tarball));
        }

        debug!(package = %name, version = %version, size = tarball.len(), "Decoded publish payload");
        Ok(Self {
            name,
            version,
            record,
            tarball,
        })
    }

    pub fn tarball_key(&self) -> StoreResult<TarballKey> {
        TarballKey::new(self.name.as_str(), self.version.as_str())
    }
}

fn decode_attachment(
    payload: &serde_json::Map<String, Value>,
    name: &str,
    version: &str,
) -> StoreResult<Bytes> {
    let attachments = payload
        .get("_attachments")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            StoreError::BadRequest(format!(
                "Package '{}': '_attachments' field is not an object",
                name
            ))
        })?;

    let expected = format!("{}-{}.tgz", name, version);
    let attachment = attachments
        .get(&expected)
        .or_else(|| {
            attachments
                .iter()
                .find(|(filename, _)| filename.ends_with(".tgz"))
                .map(|(_, attachment)| attachment)
        })
        .ok_or_else(|| {
            StoreError::BadRequest(format!(
                "Package '{}': no .tgz attachment found",
                name
            ))
        })?;

    let data = attachment
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            StoreError::BadRequest("Attachment 'data' field is not a string".to_string())
        })?;

    validation::validate_base64_size(data, None, None)?;
    validation::validate_base64_characters(data)?;
    let decoded = STANDARD
        .decode(data)
        .map_err(|e| StoreError::BadRequest(format!("Invalid base64 encoding: {}", e)))?;
    Ok(Bytes::from(decoded))
}
