//! Crash-safe persistence for the vault root.
//!
//! The root is a self-describing JSON object at `<dir>/vault.json`.
//! Commits are atomic: serialize to a temp file in the same directory,
//! fsync, rename over the target, then best-effort fsync the directory.
//! Unknown fields survive a load/commit round-trip.

use crate::audit::AuditLog;
use crate::crypto::PasswordVerifier;
use crate::model::{Entry, Settings};
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

const VAULT_FILE: &str = "vault.json";

/// The root persistent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRoot {
    pub format_version: u32,

    pub initialized: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<PasswordVerifier>,

    #[serde(default)]
    pub entries: BTreeMap<String, Entry>,

    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub audit_log: AuditLog,

    /// Milliseconds since the Unix epoch; drives auto-lock.
    #[serde(default)]
    pub last_activity: i64,

    /// Fields written by newer versions, preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl VaultRoot {
    /// A fresh, uninitialized root.
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            initialized: false,
            verifier: None,
            entries: BTreeMap::new(),
            settings: Settings::default(),
            audit_log: AuditLog::default(),
            last_activity: 0,
            extra: serde_json::Map::new(),
        }
    }

    /// Structural invariants checked on load. A violation puts the
    /// manager into read-only mode rather than panicking.
    pub fn integrity_problem(&self) -> Option<&'static str> {
        if self.initialized && self.verifier.is_none() {
            return Some("initialized vault has no verifier");
        }
        None
    }
}

impl Default for VaultRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-writer persistence handle for one store directory.
#[derive(Debug, Clone)]
pub struct VaultStore {
    dir: PathBuf,
}

impl VaultStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The conventional store directory, `~/.keyvault/`.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".keyvault")
    }

    /// Directory this store lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical location of the root record.
    pub fn path(&self) -> PathBuf {
        self.dir.join(VAULT_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Load the root, or `None` when no vault exists yet. Unparsable or
    /// future-versioned roots surface as [`VaultError::Corrupt`].
    pub fn load(&self) -> Result<Option<VaultRoot>> {
        let path = self.path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let root: VaultRoot = serde_json::from_str(&content)
            .map_err(|err| VaultError::Corrupt(format!("unreadable vault root: {err}")))?;

        if root.format_version > FORMAT_VERSION {
            return Err(VaultError::Corrupt(format!(
                "vault format version {} is newer than supported version {}",
                root.format_version, FORMAT_VERSION
            )));
        }

        debug!(entries = root.entries.len(), "vault root loaded");
        Ok(Some(root))
    }

    /// Atomically persist the root.
    ///
    /// A crash at any point leaves either the previous root or the new one
    /// on disk, never a torn write.
    pub fn commit(&self, root: &VaultRoot) -> Result<()> {
        self.ensure_dir()?;

        let content = serde_json::to_string_pretty(root)
            .map_err(|err| VaultError::Corrupt(format!("unserializable vault root: {err}")))?;

        let suffix: [u8; 8] = crate::crypto::random_array().map_err(VaultError::from)?;
        let tmp_path = self
            .dir
            .join(format!("{VAULT_FILE}.tmp.{}", u64::from_be_bytes(suffix)));
        let final_path = self.path();

        {
            let mut file = File::create(&tmp_path)?;

            #[cfg(unix)]
            {
                let perms = fs::Permissions::from_mode(0o600);
                if let Err(err) = fs::set_permissions(&tmp_path, perms) {
                    warn!(%err, "failed to restrict vault file permissions");
                }
            }

            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        if let Err(err) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }

        #[cfg(unix)]
        {
            if let Ok(dir) = File::open(&self.dir) {
                let _ = dir.sync_all();
            }
        }

        debug!(entries = root.entries.len(), "vault root committed");
        Ok(())
    }

    fn ensure_dir(&self) -> Result<()> {
        if self.dir.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;

        #[cfg(unix)]
        {
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(&self.dir, perms)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_returns_none() {
        let tmp = TempDir::new().unwrap();
        let store = VaultStore::new(tmp.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn commit_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = VaultStore::new(tmp.path());

        let mut root = VaultRoot::new();
        root.initialized = false;
        root.last_activity = 1234;
        store.commit(&root).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.format_version, FORMAT_VERSION);
        assert_eq!(loaded.last_activity, 1234);
        assert!(loaded.entries.is_empty());
    }

    #[test]
    fn unknown_root_fields_survive_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = VaultStore::new(tmp.path());

        let mut root = VaultRoot::new();
        root.extra.insert(
            "future_feature".to_string(),
            serde_json::json!({"enabled": true}),
        );
        store.commit(&root).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.extra["future_feature"]["enabled"], true);

        store.commit(&loaded).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("future_feature"));
    }

    #[test]
    fn garbage_root_is_corrupt_not_panic() {
        let tmp = TempDir::new().unwrap();
        let store = VaultStore::new(tmp.path());
        fs::create_dir_all(tmp.path()).unwrap();
        fs::write(store.path(), b"{ not json").unwrap();

        assert!(matches!(store.load(), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn future_format_version_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = VaultStore::new(tmp.path());
        fs::write(
            store.path(),
            serde_json::json!({"format_version": 99, "initialized": false}).to_string(),
        )
        .unwrap();

        assert!(matches!(store.load(), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn crash_between_temp_write_and_rename_keeps_prior_root() {
        let tmp = TempDir::new().unwrap();
        let store = VaultStore::new(tmp.path());

        let mut root = VaultRoot::new();
        root.last_activity = 1;
        store.commit(&root).unwrap();

        // Simulated crash: a temp file exists but was never renamed.
        fs::write(
            tmp.path().join("vault.json.tmp.12345"),
            b"half-written garbage",
        )
        .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.last_activity, 1);
    }

    #[test]
    fn no_temp_files_left_after_commit() {
        let tmp = TempDir::new().unwrap();
        let store = VaultStore::new(tmp.path());
        store.commit(&VaultRoot::new()).unwrap();

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[cfg(unix)]
    #[test]
    fn vault_file_is_owner_only() {
        use std::os::unix::fs::MetadataExt;

        let tmp = TempDir::new().unwrap();
        let store = VaultStore::new(tmp.path());
        store.commit(&VaultRoot::new()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn integrity_problem_detects_missing_verifier() {
        let mut root = VaultRoot::new();
        assert!(root.integrity_problem().is_none());
        root.initialized = true;
        assert!(root.integrity_problem().is_some());
    }
}
