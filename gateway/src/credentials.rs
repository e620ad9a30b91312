//! The single operator credential: persistence, verification, migration.
//!
//! Exactly one credential record exists system-wide, stored as a small
//! JSON file. The canonical form carries a PBKDF2-HMAC-SHA256 hash with a
//! random salt; a legacy form carries the password in plaintext and is
//! rewritten to the hashed form the first time it verifies successfully.
//!
//! A missing or unparseable file is the normal first-run state, not an
//! error: it drives the setup flow on both front doors.
//!
//! No lock guards the file. Writes happen once at setup and at most once
//! per legacy record at migration, so last-writer-wins is an acceptable
//! and intentional simplification.

use std::fs;
use std::path::{Path, PathBuf};

use base64::prelude::*;
use pbkdf2::pbkdf2_hmac_array;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};

/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 120_000;

/// Random salt length in bytes.
const SALT_BYTES: usize = 16;

/// Derived hash length in bytes (SHA-256 output).
const HASH_BYTES: usize = 32;

/// Errors that can occur while saving the credential record.
///
/// Reads never error: any failure to read or parse is reported as the
/// record being absent.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Writing the credential file failed.
    #[error("failed to write credential file: {0}")]
    Write(#[from] std::io::Error),

    /// Serializing the credential record failed.
    #[error("failed to encode credential record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk credential record.
///
/// The canonical form has `salt` + `password_hash`; the legacy form has
/// `password`. When both are somehow present, the hashed form wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub username: String,

    /// Base64-encoded random salt (canonical form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,

    /// Base64-encoded PBKDF2 hash (canonical form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    /// Legacy plaintext password, rewritten to the hashed form on the
    /// first successful verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// File-backed store for the single operator credential.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Creates a store backed by the given file path. The file is not
    /// touched until [`save`](Self::save) is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the credential record, or `None` when no usable record
    /// exists (missing file, unreadable file, parse failure, empty
    /// username). This is the normal first-run state.
    pub fn load(&self) -> Option<CredentialRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "credential file not readable");
                return None;
            }
        };

        match serde_json::from_slice::<CredentialRecord>(&bytes) {
            Ok(record) if !record.username.is_empty() => Some(record),
            Ok(_) => {
                debug!(path = %self.path.display(), "credential record has empty username");
                None
            }
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "credential file failed to parse");
                None
            }
        }
    }

    /// Returns `true` when a usable credential record exists.
    pub fn is_configured(&self) -> bool {
        self.load().is_some()
    }

    /// Saves the credential in the salted+hashed canonical form.
    ///
    /// The record is written to a temporary file and renamed into place
    /// so concurrent readers never observe a partial write.
    pub fn save(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        let mut salt = [0u8; SALT_BYTES];
        rand::rng().fill(&mut salt);

        let record = CredentialRecord {
            username: username.to_string(),
            salt: Some(BASE64_STANDARD.encode(salt)),
            password_hash: Some(BASE64_STANDARD.encode(derive_hash(password, &salt))),
            password: None,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&record)?)?;
        fs::rename(&tmp, &self.path)?;

        info!(username = %username, path = %self.path.display(), "credential record saved");
        Ok(())
    }

    /// Verifies a username/password pair against the stored record.
    ///
    /// Hash comparisons are constant-time. A successful match against a
    /// legacy plaintext record rewrites the store to the hashed form; a
    /// failed rewrite is logged and the verification still succeeds.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        let Some(record) = self.load() else {
            return false;
        };
        if record.username != username {
            return false;
        }

        // Hashed form wins when both forms are present.
        if let (Some(salt_b64), Some(hash_b64)) = (&record.salt, &record.password_hash) {
            let Ok(salt) = BASE64_STANDARD.decode(salt_b64) else {
                warn!("credential record has undecodable salt");
                return false;
            };
            let Ok(expected) = BASE64_STANDARD.decode(hash_b64) else {
                warn!("credential record has undecodable password hash");
                return false;
            };
            let actual = derive_hash(password, &salt);
            return bool::from(actual.as_slice().ct_eq(expected.as_slice()));
        }

        let Some(plain) = &record.password else {
            return false;
        };
        if bool::from(plain.as_bytes().ct_eq(password.as_bytes())) {
            // One-time legacy-to-hash migration.
            match self.save(username, password) {
                Ok(()) => info!("migrated legacy plaintext credential to hashed form"),
                Err(err) => {
                    warn!(error = %err, "legacy credential migration failed, keeping plaintext record");
                }
            }
            return true;
        }
        false
    }
}

/// Derives the PBKDF2-HMAC-SHA256 hash for a password and salt.
fn derive_hash(password: &str, salt: &[u8]) -> [u8; HASH_BYTES] {
    pbkdf2_hmac_array::<Sha256, HASH_BYTES>(password.as_bytes(), salt, PBKDF2_ITERATIONS)
}
