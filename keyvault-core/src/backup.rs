//! Full-vault backup envelope: export under a (possibly different)
//! password, import with a merge policy.
//!
//! The backup is one envelope (same framing as entry envelopes) over a
//! JSON snapshot of decrypted entries and settings, sealed with the
//! associated data `"backup:v1"` so a backup blob can never be confused
//! with an entry envelope.

use crate::crypto::{envelope, CryptoError};
use crate::model::{Entry, Environment, Settings};
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Associated data binding an envelope to the backup format.
pub const BACKUP_AAD: &[u8] = b"backup:v1";

/// How an incoming entry is reconciled against an existing entry with the
/// same `service_name` (case-insensitive, advisory uniqueness).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    SkipDuplicate,
    Overwrite,
    Rename,
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "skip_duplicate" | "skip" => Ok(MergePolicy::SkipDuplicate),
            "overwrite" => Ok(MergePolicy::Overwrite),
            "rename" => Ok(MergePolicy::Rename),
            other => Err(format!("unknown merge policy: {other}")),
        }
    }
}

/// Outcome counts of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,
    pub overwritten: usize,
    pub renamed: usize,
}

/// One decrypted entry inside a backup payload.
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BackupEntry {
    #[zeroize(skip)]
    #[serde(default)]
    pub id: String,
    #[zeroize(skip)]
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub plaintext: String,
    #[zeroize(skip)]
    #[serde(default)]
    pub environment: Environment,
    #[zeroize(skip)]
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[zeroize(skip)]
    #[serde(default)]
    pub domains: BTreeSet<String>,
    #[zeroize(skip)]
    #[serde(default)]
    pub notes: String,
    #[zeroize(skip)]
    #[serde(default)]
    pub color: String,
    #[zeroize(skip)]
    #[serde(default)]
    pub favorite: bool,
    #[zeroize(skip)]
    #[serde(default)]
    pub created_at: i64,
    #[zeroize(skip)]
    #[serde(default)]
    pub last_used_at: Option<i64>,
    #[zeroize(skip)]
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[zeroize(skip)]
    #[serde(default)]
    pub usage_count: u64,
    #[zeroize(skip)]
    #[serde(default)]
    pub rate_limit: String,
}

impl Default for BackupEntry {
    fn default() -> Self {
        Self {
            id: String::new(),
            service_name: String::new(),
            plaintext: String::new(),
            environment: Environment::default(),
            tags: BTreeSet::new(),
            domains: BTreeSet::new(),
            notes: String::new(),
            color: String::new(),
            favorite: false,
            created_at: 0,
            last_used_at: None,
            expires_at: None,
            usage_count: 0,
            rate_limit: String::new(),
        }
    }
}

impl BackupEntry {
    pub fn from_entry(entry: &Entry, plaintext: String) -> Self {
        Self {
            id: entry.id.clone(),
            service_name: entry.service_name.clone(),
            plaintext,
            environment: entry.environment,
            tags: entry.tags.clone(),
            domains: entry.domains.clone(),
            notes: entry.notes.clone(),
            color: entry.color.clone(),
            favorite: entry.favorite,
            created_at: entry.created_at,
            last_used_at: entry.last_used_at,
            expires_at: entry.expires_at,
            usage_count: entry.usage_count,
            rate_limit: entry.rate_limit.clone(),
        }
    }
}

/// The snapshot sealed inside a backup envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupPayload {
    pub format_version: u32,
    /// Milliseconds since the Unix epoch.
    pub exported_at: i64,
    pub settings: Settings,
    pub entries: Vec<BackupEntry>,
}

/// Seal a snapshot under the backup password.
pub fn seal_payload(payload: &BackupPayload, backup_password: &str) -> Result<Vec<u8>> {
    let mut plaintext = serde_json::to_vec(payload)
        .map_err(|err| VaultError::Corrupt(format!("unserializable backup payload: {err}")))?;

    let sealed = envelope::seal_with_password(backup_password.as_bytes(), BACKUP_AAD, &plaintext);
    plaintext.zeroize();
    Ok(sealed?)
}

/// Open a backup blob.
///
/// A tag mismatch means the supplied password is wrong for this blob and
/// surfaces as [`VaultError::BadBackupPassword`]; mangled framing or an
/// unparsable snapshot is a validation problem with the provided bytes,
/// not vault corruption.
pub fn open_payload(bytes: &[u8], backup_password: &str) -> Result<BackupPayload> {
    let mut plaintext = envelope::open_with_password(backup_password.as_bytes(), BACKUP_AAD, bytes)
        .map_err(|err| match err {
            CryptoError::AuthFailure => VaultError::BadBackupPassword,
            other => VaultError::Validation {
                field: "backup",
                reason: other.to_string(),
            },
        })?;

    let payload = serde_json::from_slice(&plaintext).map_err(|err| VaultError::Validation {
        field: "backup",
        reason: format!("unreadable payload: {err}"),
    });
    plaintext.zeroize();
    payload
}
