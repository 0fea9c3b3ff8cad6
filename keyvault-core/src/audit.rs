//! Bounded audit log kept inside the vault root.
//!
//! Actions are short, stable, machine-readable tags. The log never holds
//! plaintext, entry names, or paths.

use serde::{Deserialize, Serialize};

/// Maximum retained records; the oldest are dropped first.
pub const MAX_AUDIT_RECORDS: usize = 1000;

/// Stable action tags.
pub mod action {
    pub const VAULT_INITIALIZED: &str = "vault.initialized";
    pub const VAULT_UNLOCKED: &str = "vault.unlocked";
    pub const VAULT_UNLOCK_FAILED: &str = "vault.unlock_failed";
    pub const VAULT_LOCKED: &str = "vault.locked";
    pub const VAULT_AUTO_LOCKED: &str = "vault.auto_locked";
    pub const VAULT_REKEYED: &str = "vault.rekeyed";
    pub const ENTRY_ADDED: &str = "entry.added";
    pub const ENTRY_UPDATED: &str = "entry.updated";
    pub const ENTRY_DELETED: &str = "entry.deleted";
    pub const ENTRY_USED: &str = "entry.used";
    pub const BACKUP_EXPORTED: &str = "backup.exported";
    pub const BACKUP_IMPORTED: &str = "backup.imported";
    pub const SETTINGS_UPDATED: &str = "settings.updated";
}

/// One timestamped action record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Ring of at most [`MAX_AUDIT_RECORDS`] records, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    records: Vec<AuditRecord>,
}

impl AuditLog {
    /// Append a record, dropping the oldest past the bound.
    pub fn record(&mut self, action: &str, timestamp: i64) {
        self.records.push(AuditRecord {
            action: action.to_string(),
            timestamp,
        });
        if self.records.len() > MAX_AUDIT_RECORDS {
            let overflow = self.records.len() - MAX_AUDIT_RECORDS;
            self.records.drain(..overflow);
        }
    }

    /// The `n` most recent records, newest first.
    pub fn tail(&self, n: usize) -> Vec<AuditRecord> {
        self.records.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
