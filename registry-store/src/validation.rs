//! # Input Validation
//!
//! Validation helpers for the identifiers and payloads that flow into the stores:
//! package names, semantic versions and base64 tarball attachments. Every check
//! runs before anything touches the backing files, so a rejected input never
//! leaves partial state behind.
//!
//! ## Usage
//!
//! ```rust
//! use registry_store::validation::{validate_package_name, validate_version};
//!
//! assert!(validate_package_name("@scope/left-pad").is_ok());
//! assert!(validate_package_name("Left-Pad").is_err());
//! assert!(validate_version("1.2.3-beta.1").is_ok());
//! assert!(validate_version("1.2").is_err());
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length of an npm package name, scope included
pub const MAX_PACKAGE_NAME_LENGTH: usize = 214;

/// Maximum length of a version string
pub const MAX_VERSION_LENGTH: usize = 64;

/// Maximum base64 encoded attachment size (110 MB)
pub const MAX_BASE64_ENCODED_SIZE: usize = 110 * 1024 * 1024;

/// Maximum decoded attachment size (80 MB)
pub const MAX_BASE64_DECODED_SIZE: usize = 80 * 1024 * 1024;

/// One name segment: the scope or the bare package name.
static NAME_SEGMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._~-]+$")
        .expect("npm name segment regex should compile - this is a static pattern")
});

/// Error types for validation failures
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Input too long: {actual} exceeds maximum {max}")]
    TooLong { actual: usize, max: usize },

    #[error("Input too short: {actual} is below minimum {min}")]
    TooShort { actual: usize, min: usize },

    #[error("Invalid characters in input: {input}")]
    InvalidCharacters { input: String },

    #[error("File size exceeds limit: {actual} > {max}")]
    FileTooLarge { actual: u64, max: u64 },

    #[error("Invalid format: {reason}")]
    InvalidFormat { reason: String },

    #[error("Contains null bytes")]
    NullBytes,

    #[error("Contains control characters")]
    ControlCharacters,
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

fn check_common(input: &str, max: usize) -> ValidationResult<()> {
    if input.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if input.len() > max {
        return Err(ValidationError::TooLong {
            actual: input.len(),
            max,
        });
    }

    if input.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if input.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters);
    }

    Ok(())
}

/// Validate an npm package name, optionally scoped (`@scope/name`).
///
/// Names must be lowercase, must not start with `.` or `_`, and each segment
/// may only use URL-safe characters. Returns the validated name.
pub fn validate_package_name(name: &str) -> ValidationResult<String> {
    check_common(name, MAX_PACKAGE_NAME_LENGTH)?;

    if name.to_lowercase() != name {
        return Err(ValidationError::InvalidFormat {
            reason: "npm package names must be lowercase".to_string(),
        });
    }

    let bare = match name.strip_prefix('@') {
        Some(scoped) => {
            let (scope, bare) = scoped.split_once('/').ok_or_else(|| {
                ValidationError::InvalidFormat {
                    reason: "scoped package names must look like @scope/name".to_string(),
                }
            })?;
            if scope.is_empty() || !NAME_SEGMENT_REGEX.is_match(scope) {
                return Err(ValidationError::InvalidCharacters {
                    input: name.to_string(),
                });
            }
            bare
        }
        None => name,
    };

    if bare.starts_with('.') || bare.starts_with('_') {
        return Err(ValidationError::InvalidFormat {
            reason: "npm package names cannot start with . or _".to_string(),
        });
    }

    if !NAME_SEGMENT_REGEX.is_match(bare) {
        return Err(ValidationError::InvalidCharacters {
            input: name.to_string(),
        });
    }

    Ok(name.to_string())
}

/// Validate a version string as a semantic version.
pub fn validate_version(version: &str) -> ValidationResult<String> {
    check_common(version, MAX_VERSION_LENGTH)?;

    semver::Version::parse(version).map_err(|e| ValidationError::InvalidFormat {
        reason: format!("'{}' is not a semantic version: {}", version, e),
    })?;

    Ok(version.to_string())
}

/// Validate base64 encoded data size before decoding to prevent base64 bombs.
///
/// Falls back to [`MAX_BASE64_ENCODED_SIZE`] and [`MAX_BASE64_DECODED_SIZE`]
/// when no explicit limits are given.
pub fn validate_base64_size(
    encoded_data: &str,
    max_encoded_size: Option<usize>,
    max_decoded_size: Option<usize>,
) -> ValidationResult<()> {
    let encoded_limit = max_encoded_size.unwrap_or(MAX_BASE64_ENCODED_SIZE);
    let decoded_limit = max_decoded_size.unwrap_or(MAX_BASE64_DECODED_SIZE);

    if encoded_data.len() > encoded_limit {
        return Err(ValidationError::FileTooLarge {
            actual: encoded_data.len() as u64,
            max: encoded_limit as u64,
        });
    }

    // base64 encodes 3 bytes as 4 characters
    let estimated_decoded_size = (encoded_data.len() * 3) / 4;
    if estimated_decoded_size > decoded_limit {
        return Err(ValidationError::FileTooLarge {
            actual: estimated_decoded_size as u64,
            max: decoded_limit as u64,
        });
    }

    Ok(())
}

/// Validate that base64 data contains only valid characters.
pub fn validate_base64_characters(data: &str) -> ValidationResult<()> {
    if data.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if !data
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        return Err(ValidationError::InvalidCharacters {
            input: "Invalid base64 characters detected".to_string(),
        });
    }

    Ok(())
}
