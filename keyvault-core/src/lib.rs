//! Encrypted vault engine for API credentials.
//!
//! This library provides the core of the secret store: password-based key
//! derivation, authenticated encryption envelopes, the locked/unlocked
//! session state machine, the crash-safe persistent store, and the
//! metadata index that answers queries without ever decrypting.
//!
//! Hosts (the CLI, or any other shell) talk to [`VaultManager`] and never
//! touch key material directly.
//!
//! The store is single-writer within a process. Concurrent shells sharing
//! a store directory are expected to be read-mostly; the root record is
//! last-writer-wins across processes, which is acceptable because audit
//! entries and usage counters are advisory.

pub mod audit;
pub mod backup;
pub mod crypto;
pub mod model;
pub mod query;
pub mod session;
pub mod store;
pub mod vault;

pub use audit::{AuditLog, AuditRecord, MAX_AUDIT_RECORDS};
pub use backup::{BackupPayload, ImportReport, MergePolicy};
pub use crypto::{generate_secret, CryptoError};
pub use model::{
    Entry, EntryPatch, EntryView, EntryWithPlaintext, Environment, NewEntry, Settings, Theme,
};
pub use query::EntryFilter;
pub use session::{Clock, ManualClock, Session, SessionToken, SystemClock};
pub use store::{VaultRoot, VaultStore, FORMAT_VERSION};
pub use vault::{VaultManager, VaultStatus};

use thiserror::Error;

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Error taxonomy surfaced to hosts.
///
/// Internal cryptographic failures ([`CryptoError`]) on envelopes the vault
/// itself wrote are promoted to [`VaultError::Corrupt`]: an authentication
/// failure on a known-good envelope means the store was tampered with or
/// damaged, not that the caller got a password wrong.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("vault is not initialized")]
    NotInitialized,

    #[error("vault is already initialized")]
    AlreadyInitialized,

    #[error("vault is locked")]
    Locked,

    #[error("invalid master password")]
    BadPassword,

    #[error("invalid backup password")]
    BadBackupPassword,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("vault is corrupt: {0}")]
    Corrupt(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        VaultError::Corrupt(err.to_string())
    }
}
