//! Password hashing for the user store.
//!
//! The store only ever sees the [`CredentialHasher`] capability. The bundled
//! [`Pbkdf2Hasher`] derives PBKDF2-HMAC-SHA256 digests encoded as
//! `pbkdf2-sha256$<iterations>$<salt>$<hash>` (standard base64), so a digest
//! carries everything needed to verify it even after the configured
//! iteration count changes.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

const SCHEME: &str = "pbkdf2-sha256";

/// Salt length in bytes
const SALT_LENGTH: usize = 16;

/// Derived key length in bytes
const HASH_LENGTH: usize = 32;

pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Hash and verify plaintext passwords.
#[async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> StoreResult<String>;

    /// `Ok(false)` for a wrong password; `Err` only for an unusable digest.
    async fn verify(&self, plaintext: &str, digest: &str) -> StoreResult<bool>;
}

#[derive(Debug, Clone)]
pub struct Pbkdf2Hasher {
    iterations: u32,
}

impl Pbkdf2Hasher {
    pub fn new(iterations: u32) -> StoreResult<Self> {
        if iterations == 0 {
            return Err(StoreError::Config(
                "PBKDF2 iteration count must be positive".to_string(),
            ));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

fn derive(plaintext: &[u8], salt: &[u8], iterations: u32) -> [u8; HASH_LENGTH] {
    let mut key = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(plaintext, salt, iterations, &mut key);
    key
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

struct ParsedDigest {
    iterations: u32,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

fn parse_digest(digest: &str) -> StoreResult<ParsedDigest> {
    let malformed = || StoreError::Credential("stored password digest is malformed".to_string());

    let mut parts = digest.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(malformed());
    };
    if scheme != SCHEME {
        return Err(StoreError::Credential(format!(
            "unsupported password scheme '{}'",
            scheme
        )));
    }

    let iterations: u32 = iterations.parse().map_err(|_| malformed())?;
    if iterations == 0 {
        return Err(malformed());
    }
    Ok(ParsedDigest {
        iterations,
        salt: STANDARD.decode(salt).map_err(|_| malformed())?,
        hash: STANDARD.decode(hash).map_err(|_| malformed())?,
    })
}

async fn run_blocking<T, F>(work: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Credential(format!("hashing task failed: {}", e)))
}

#[async_trait]
impl CredentialHasher for Pbkdf2Hasher {
    async fn hash(&self, plaintext: &str) -> StoreResult<String> {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);

        let iterations = self.iterations;
        let plaintext = plaintext.as_bytes().to_vec();
        let hash = run_blocking(move || derive(&plaintext, &salt, iterations)).await?;

        Ok(format!(
            "{}${}${}${}",
            SCHEME,
            iterations,
            STANDARD.encode(salt),
            STANDARD.encode(hash)
        ))
    }

    async fn verify(&self, plaintext: &str, digest: &str) -> StoreResult<bool> {
        let parsed = parse_digest(digest)?;
        if plaintext.is_empty() {
            return Ok(false);
        }

        let plaintext = plaintext.as_bytes().to_vec();
        run_blocking(move || {
            let candidate = derive(&plaintext, &parsed.salt, parsed.iterations);
            constant_time_eq(&candidate, &parsed.hash)
        })
        .await
    }
}
