//! Vault manager: ties the crypto layer, session state machine, store,
//! index, and audit log together behind the host-facing API.


use crate::audit::{action, AuditRecord};
use crate::backup::{self, BackupEntry, BackupPayload, ImportReport, MergePolicy};
use crate::crypto::{
    envelope, kdf, CryptoError, KdfParams, PasswordVerifier, SALT_LEN,
};
use crate::model::{random_color, Entry, EntryPatch, EntryView, EntryWithPlaintext, NewEntry, Settings};
use crate::query::{self, EntryFilter};
use crate::session::{Clock, Session, SessionToken, SystemClock};
use crate::store::{VaultRoot, VaultStore, FORMAT_VERSION};
use crate::{Result, VaultError};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

/// Snapshot returned by `status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VaultStatus {
    pub initialized: bool,
    pub unlocked: bool,
    pub entry_count: usize,
    /// Milliseconds since the Unix epoch.
    pub last_activity: i64,
}

/// One vault handle: the store, its in-memory root, and the session.
///
/// Explicitly constructed: tests point it at a temp directory, hosts at
/// the conventional `~/.keyvault/`. All operations are synchronous; an
/// in-flight call either completes or fails with [`VaultError::Locked`]
/// after an auto-lock transition.
pub struct VaultManager {
    store: VaultStore,
    root: VaultRoot,
    session: Session,
    read_only: bool,
}

impl VaultManager {
    /// Open a handle on a store directory with the system clock.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with_clock(dir, Arc::new(SystemClock))
    }

    /// Open a handle with an injected clock (tests drive auto-lock with a
    /// manual clock).
    pub fn open_with_clock<P: AsRef<Path>>(dir: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = VaultStore::new(dir);
        let root = store.load()?.unwrap_or_default();

        let read_only = match root.integrity_problem() {
            Some(problem) => {
                warn!(problem, "vault failed integrity check; read-only mode");
                true
            }
            None => false,
        };

        Ok(Self {
            store,
            root,
            session: Session::new(clock),
            read_only,
        })
    }

    /// Open a handle on the conventional `~/.keyvault/` directory.
    pub fn open_default() -> Result<Self> {
        Self::open(VaultStore::default_dir())
    }

    /// Directory this vault persists under.
    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn settings(&self) -> &Settings {
        &self.root.settings
    }

    pub fn status(&self) -> VaultStatus {
        VaultStatus {
            initialized: self.root.initialized,
            unlocked: self.session.is_unlocked(),
            entry_count: self.root.entries.len(),
            last_activity: self.root.last_activity,
        }
    }

    /// Create the vault. Only legal while uninitialized; there is no
    /// password reset, deleting the store file is the only destroy path.
    pub fn initialize(&mut self, password: &str) -> Result<()> {
        if self.root.initialized {
            return Err(VaultError::AlreadyInitialized);
        }
        if password.is_empty() {
            return Err(VaultError::Validation {
                field: "password",
                reason: "must not be empty".to_string(),
            });
        }

        self.root = VaultRoot::new();
        self.root.initialized = true;
        self.root.verifier = Some(PasswordVerifier::install(password.as_bytes())?);
        self.root.last_activity = self.session.now_ms();
        self.read_only = false;

        self.record_audit(action::VAULT_INITIALIZED);
        self.store.commit(&self.root)?;
        info!("vault initialized");
        Ok(())
    }

    /// Re-create the vault from scratch, discarding the existing root.
    /// The explicit opt-in for hosts that really mean to start over;
    /// [`Self::initialize`] refuses when a vault already exists.
    pub fn initialize_overwrite(&mut self, password: &str) -> Result<()> {
        self.session.close();
        self.root = VaultRoot::new();
        self.read_only = false;
        self.initialize(password)
    }

    /// Verify the master password and cache the derived key. Returns the
    /// entry count on success.
    ///
    /// Failed attempts are counted; past the threshold an advisory backoff
    /// delay is inserted before responding.
    pub fn unlock(&mut self, password: &str) -> Result<usize> {
        if !self.root.initialized {
            return Err(VaultError::NotInitialized);
        }
        let verifier = self
            .root
            .verifier
            .clone()
            .ok_or_else(|| VaultError::Corrupt("missing verifier".to_string()))?;

        if !verifier.verify(password.as_bytes())? {
            let delay = self.session.record_failure();
            self.record_audit(action::VAULT_UNLOCK_FAILED);
            if let Err(err) = self.store.commit(&self.root) {
                warn!(%err, "failed to persist unlock-failure audit record");
            }
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            return Err(VaultError::BadPassword);
        }

        let salt = *verifier.salt();
        let key = kdf::derive_key(password.as_bytes(), &KdfParams::with_salt(salt))?;
        self.session.open(key, salt);
        self.root.last_activity = self.session.last_activity_ms();

        self.record_audit(action::VAULT_UNLOCKED);
        self.store.commit(&self.root)?;
        Ok(self.root.entries.len())
    }

    /// Re-enter *Unlocked* from a file-backed session token previously
    /// issued by [`Self::issue_session_token`]. Does not write an audit
    /// record; the token came from an audited unlock.
    pub fn unlock_with_token(&mut self, token: &SessionToken) -> Result<usize> {
        if !self.root.initialized {
            return Err(VaultError::NotInitialized);
        }
        if token.expires_at <= self.session.now_ms() {
            return Err(VaultError::Locked);
        }

        let key_bytes: [u8; 32] = token.key.as_slice().try_into().map_err(|_| {
            VaultError::Validation {
                field: "session",
                reason: "token key has wrong length".to_string(),
            }
        })?;
        let salt: [u8; SALT_LEN] = token.salt.as_slice().try_into().map_err(|_| {
            VaultError::Validation {
                field: "session",
                reason: "token salt has wrong length".to_string(),
            }
        })?;

        self.session
            .open(crate::crypto::DerivedKey::from_bytes(key_bytes), salt);
        Ok(self.root.entries.len())
    }

    /// Mint a session token for hosts that cannot hold process memory
    /// between invocations. Requires *Unlocked*.
    pub fn issue_session_token(&mut self, ttl_ms: i64) -> Result<SessionToken> {
        self.ensure_unlocked()?;
        let session_key = self.session.key().ok_or(VaultError::Locked)?;
        Ok(SessionToken {
            key: session_key.key.as_bytes().to_vec(),
            salt: session_key.salt.to_vec(),
            expires_at: self.session.now_ms().saturating_add(ttl_ms),
        })
    }

    /// Drop the cached key and return to *Locked*.
    pub fn lock(&mut self) {
        if self.session.is_unlocked() {
            self.session.close();
            self.record_audit(action::VAULT_LOCKED);
            if let Err(err) = self.store.commit(&self.root) {
                warn!(%err, "failed to persist lock audit record");
            }
        }
    }

    /// Drive the auto-lock check; hosts with a timer call this on an
    /// interval of at most 60 seconds. Returns true when this call locked
    /// the vault. The same check also runs lazily inside every
    /// authenticated operation.
    pub fn tick(&mut self) -> bool {
        self.run_auto_lock_check()
    }

    /// Add a new entry. Returns the minted id.
    pub fn add(&mut self, record: NewEntry) -> Result<String> {
        self.ensure_unlocked()?;
        self.ensure_writable()?;

        let service_name = record.service_name.trim().to_string();
        if service_name.is_empty() {
            return Err(VaultError::Validation {
                field: "service_name",
                reason: "must not be empty".to_string(),
            });
        }
        if record.plaintext.is_empty() {
            return Err(VaultError::Validation {
                field: "plaintext",
                reason: "must not be empty".to_string(),
            });
        }

        let now = self.session.now_ms();
        if let Some(expires_at) = record.expires_at {
            if expires_at < now {
                return Err(VaultError::Validation {
                    field: "expires_at",
                    reason: "must not precede created_at".to_string(),
                });
            }
        }

        // Uniqueness of service names is advisory only.
        if self.find_by_service_name(&service_name).is_some() {
            warn!(service = %service_name, "duplicate service name");
        }

        let ciphertext = self.seal_secret(record.plaintext.as_bytes())?;
        let id = self.mint_id();

        let entry = Entry {
            id: id.clone(),
            service_name,
            ciphertext,
            environment: record.environment,
            tags: record.tags,
            domains: record
                .domains
                .iter()
                .map(|d| query::normalize_host(d))
                .filter(|d| !d.is_empty())
                .collect(),
            notes: record.notes,
            color: random_color()?,
            favorite: record.favorite,
            created_at: now,
            last_used_at: None,
            expires_at: record.expires_at,
            usage_count: 0,
            rate_limit: record.rate_limit,
            extra: serde_json::Map::new(),
        };
        self.root.entries.insert(id.clone(), entry);

        self.record_audit(action::ENTRY_ADDED);
        self.store.commit(&self.root)?;
        Ok(id)
    }

    /// Apply a partial update. An all-`None` patch is rejected; supplying
    /// a new `plaintext` re-seals the secret under a fresh nonce.
    pub fn update(&mut self, id: &str, patch: EntryPatch) -> Result<()> {
        self.ensure_unlocked()?;
        self.ensure_writable()?;

        let created_at = match self.root.entries.get(id) {
            Some(entry) => entry.created_at,
            None => return Err(VaultError::NotFound(id.to_string())),
        };

        if patch.is_empty() {
            return Err(VaultError::Validation {
                field: "patch",
                reason: "no fields to update".to_string(),
            });
        }
        if let Some(service_name) = &patch.service_name {
            if service_name.trim().is_empty() {
                return Err(VaultError::Validation {
                    field: "service_name",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if let Some(plaintext) = &patch.plaintext {
            if plaintext.is_empty() {
                return Err(VaultError::Validation {
                    field: "plaintext",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if let Some(expires_at) = patch.expires_at {
            if expires_at < created_at {
                return Err(VaultError::Validation {
                    field: "expires_at",
                    reason: "must not precede created_at".to_string(),
                });
            }
        }

        let ciphertext = match &patch.plaintext {
            Some(plaintext) => Some(self.seal_secret(plaintext.as_bytes())?),
            None => None,
        };

        let entry = self
            .root
            .entries
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;

        if let Some(service_name) = patch.service_name {
            entry.service_name = service_name.trim().to_string();
        }
        if let Some(ciphertext) = ciphertext {
            entry.ciphertext = ciphertext;
        }
        if let Some(environment) = patch.environment {
            entry.environment = environment;
        }
        if let Some(tags) = patch.tags {
            entry.tags = tags;
        }
        if let Some(domains) = patch.domains {
            entry.domains = domains
                .iter()
                .map(|d| query::normalize_host(d))
                .filter(|d| !d.is_empty())
                .collect();
        }
        if let Some(notes) = patch.notes {
            entry.notes = notes;
        }
        if let Some(favorite) = patch.favorite {
            entry.favorite = favorite;
        }
        if let Some(expires_at) = patch.expires_at {
            entry.expires_at = Some(expires_at);
        }
        if let Some(rate_limit) = patch.rate_limit {
            entry.rate_limit = rate_limit;
        }

        self.record_audit(action::ENTRY_UPDATED);
        self.store.commit(&self.root)?;
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        self.ensure_unlocked()?;
        self.ensure_writable()?;

        if self.root.entries.remove(id).is_none() {
            return Err(VaultError::NotFound(id.to_string()));
        }

        self.record_audit(action::ENTRY_DELETED);
        self.store.commit(&self.root)?;
        Ok(())
    }

    /// Decrypt one entry. An AEAD failure here is on an envelope this
    /// vault wrote, so it is corruption, never a bad password.
    pub fn get(&mut self, id: &str) -> Result<EntryWithPlaintext> {
        self.ensure_unlocked()?;

        let entry = self
            .root
            .entries
            .get(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;

        let plaintext = self.open_secret(&entry.ciphertext)?;
        Ok(EntryWithPlaintext {
            view: EntryView::from(entry),
            plaintext,
        })
    }

    /// Metadata-only listing; never decrypts.
    pub fn list(&mut self, filter: &EntryFilter) -> Result<Vec<EntryView>> {
        self.ensure_unlocked()?;

        let now = self.session.now_ms();
        let mut views: Vec<EntryView> = self
            .root
            .entries
            .values()
            .filter(|entry| filter.matches(entry, now))
            .map(EntryView::from)
            .collect();
        query::sort_views(&mut views);
        Ok(views)
    }

    /// Case-insensitive substring search over names, tags, environments,
    /// and notes; metadata only.
    pub fn search(&mut self, query_str: &str) -> Result<Vec<EntryView>> {
        self.ensure_unlocked()?;

        let mut views: Vec<EntryView> = self
            .root
            .entries
            .values()
            .filter(|entry| query::search_matches(entry, query_str))
            .map(EntryView::from)
            .collect();
        query::sort_views(&mut views);
        Ok(views)
    }

    /// Bump the usage counter, stamp `last_used_at`, and union the calling
    /// domain into the entry.
    pub fn record_usage(&mut self, id: &str, domain: Option<&str>) -> Result<()> {
        self.ensure_unlocked()?;
        self.ensure_writable()?;

        let now = self.session.now_ms();
        let entry = self
            .root
            .entries
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;

        entry.usage_count = entry.usage_count.saturating_add(1);
        entry.last_used_at = Some(now.max(entry.created_at));
        if let Some(domain) = domain {
            let host = query::normalize_host(domain);
            if !host.is_empty() {
                entry.domains.insert(host);
            }
        }

        self.record_audit(action::ENTRY_USED);
        self.store.commit(&self.root)?;
        Ok(())
    }

    /// Export a full snapshot sealed under `backup_password` (which may
    /// differ from the master password).
    pub fn export(&mut self, backup_password: &str) -> Result<Vec<u8>> {
        self.ensure_unlocked()?;

        if backup_password.is_empty() {
            return Err(VaultError::Validation {
                field: "password",
                reason: "must not be empty".to_string(),
            });
        }

        let mut entries = Vec::with_capacity(self.root.entries.len());
        let ids: Vec<String> = self.root.entries.keys().cloned().collect();
        for id in ids {
            let entry = &self.root.entries[&id];
            let plaintext = self.open_secret(&entry.ciphertext)?;
            entries.push(BackupEntry::from_entry(entry, plaintext));
        }

        let payload = BackupPayload {
            format_version: FORMAT_VERSION,
            exported_at: self.session.now_ms(),
            settings: self.root.settings.clone(),
            entries,
        };
        let sealed = backup::seal_payload(&payload, backup_password)?;

        self.record_audit(action::BACKUP_EXPORTED);
        self.store.commit(&self.root)?;
        Ok(sealed)
    }

    /// Import a backup blob, re-encrypting every accepted entry under the
    /// current master key in a single atomic commit.
    pub fn import(
        &mut self,
        bytes: &[u8],
        backup_password: &str,
        policy: MergePolicy,
    ) -> Result<ImportReport> {
        self.ensure_unlocked()?;
        self.ensure_writable()?;

        let payload = backup::open_payload(bytes, backup_password)?;
        let mut report = ImportReport::default();

        for incoming in &payload.entries {
            if incoming.service_name.trim().is_empty() || incoming.plaintext.is_empty() {
                report.skipped += 1;
                continue;
            }

            let existing_id = self.find_by_service_name(&incoming.service_name);
            match (existing_id, policy) {
                (Some(_), MergePolicy::SkipDuplicate) => {
                    report.skipped += 1;
                }
                (Some(id), MergePolicy::Overwrite) => {
                    let ciphertext = self.seal_secret(incoming.plaintext.as_bytes())?;
                    let entry = self
                        .root
                        .entries
                        .get_mut(&id)
                        .ok_or_else(|| VaultError::NotFound(id.clone()))?;
                    overwrite_entry(entry, incoming, ciphertext);
                    report.overwritten += 1;
                }
                (Some(_), MergePolicy::Rename) => {
                    let renamed = self.available_service_name(&incoming.service_name);
                    self.insert_imported(incoming, Some(renamed))?;
                    report.renamed += 1;
                }
                (None, _) => {
                    self.insert_imported(incoming, None)?;
                    report.inserted += 1;
                }
            }
        }

        self.record_audit(action::BACKUP_IMPORTED);
        self.store.commit(&self.root)?;
        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            overwritten = report.overwritten,
            renamed = report.renamed,
            "backup imported"
        );
        Ok(report)
    }

    /// The `n` most recent audit records, newest first.
    pub fn audit_tail(&self, n: usize) -> Vec<AuditRecord> {
        self.root.audit_log.tail(n)
    }

    /// Replace the vault settings. Requires *Unlocked*.
    pub fn update_settings(&mut self, settings: Settings) -> Result<()> {
        self.ensure_unlocked()?;
        self.ensure_writable()?;

        self.root.settings = settings;
        self.record_audit(action::SETTINGS_UPDATED);
        self.store.commit(&self.root)?;
        Ok(())
    }

    /// Change the master password, re-encrypting every entry atomically.
    pub fn change_password(&mut self, old_password: &str, new_password: &str) -> Result<()> {
        self.ensure_unlocked()?;
        self.ensure_writable()?;

        if new_password.is_empty() {
            return Err(VaultError::Validation {
                field: "password",
                reason: "must not be empty".to_string(),
            });
        }

        let verifier = self
            .root
            .verifier
            .as_ref()
            .ok_or_else(|| VaultError::Corrupt("missing verifier".to_string()))?;
        if !verifier.verify(old_password.as_bytes())? {
            return Err(VaultError::BadPassword);
        }

        // Decrypt everything under the old key before touching state.
        let ids: Vec<String> = self.root.entries.keys().cloned().collect();
        let mut plaintexts = Vec::with_capacity(ids.len());
        for id in &ids {
            let ciphertext = self.root.entries[id].ciphertext.clone();
            plaintexts.push(self.open_secret(&ciphertext)?);
        }

        let new_verifier = PasswordVerifier::install(new_password.as_bytes())?;
        let new_salt = *new_verifier.salt();
        let new_key = kdf::derive_key(new_password.as_bytes(), &KdfParams::with_salt(new_salt))?;

        for (id, plaintext) in ids.iter().zip(plaintexts.iter()) {
            let ciphertext = envelope::seal_with_key(&new_key, &new_salt, b"", plaintext.as_bytes())?;
            if let Some(entry) = self.root.entries.get_mut(id) {
                entry.ciphertext = ciphertext;
            }
        }
        for plaintext in plaintexts.iter_mut() {
            plaintext.zeroize();
        }

        self.root.verifier = Some(new_verifier);
        self.session.open(new_key, new_salt);

        self.record_audit(action::VAULT_REKEYED);
        self.store.commit(&self.root)?;
        info!("master password changed");
        Ok(())
    }

    // ---- internals -------------------------------------------------------

    /// Guard at the top of every authenticated operation: run the lazy
    /// auto-lock check, then require *Unlocked* and refresh activity.
    fn ensure_unlocked(&mut self) -> Result<()> {
        if !self.root.initialized {
            return Err(VaultError::NotInitialized);
        }

        self.run_auto_lock_check();

        if !self.session.is_unlocked() {
            return Err(VaultError::Locked);
        }
        self.session.touch();
        self.root.last_activity = self.session.last_activity_ms();
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(VaultError::Corrupt(
                "vault is in read-only mode; export and rebuild".to_string(),
            ));
        }
        Ok(())
    }

    fn run_auto_lock_check(&mut self) -> bool {
        if self
            .session
            .check_auto_lock(self.root.settings.auto_lock_minutes)
        {
            self.record_audit(action::VAULT_AUTO_LOCKED);
            if let Err(err) = self.store.commit(&self.root) {
                warn!(%err, "failed to persist auto-lock audit record");
            }
            return true;
        }
        false
    }

    fn record_audit(&mut self, action_tag: &str) {
        if !self.root.settings.enable_audit_log {
            return;
        }
        self.root
            .audit_log
            .record(action_tag, self.session.now_ms());
    }

    fn seal_secret(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let session_key = self.session.key().ok_or(VaultError::Locked)?;
        Ok(envelope::seal_with_key(
            &session_key.key,
            &session_key.salt,
            b"",
            plaintext,
        )?)
    }

    fn open_secret(&self, ciphertext: &[u8]) -> Result<String> {
        let session_key = self.session.key().ok_or(VaultError::Locked)?;
        let bytes = envelope::open_with_key(&session_key.key, b"", ciphertext).map_err(
            |err| match err {
                // The vault wrote this envelope itself; a failure is damage,
                // not a wrong password.
                CryptoError::AuthFailure => {
                    VaultError::Corrupt("entry failed authentication".to_string())
                }
                other => VaultError::from(other),
            },
        )?;
        String::from_utf8(bytes)
            .map_err(|_| VaultError::Corrupt("entry plaintext is not UTF-8".to_string()))
    }

    fn mint_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.root.entries.contains_key(&id) {
                return id;
            }
        }
    }

    fn find_by_service_name(&self, service_name: &str) -> Option<String> {
        let needle = service_name.trim().to_lowercase();
        self.root
            .entries
            .values()
            .find(|entry| entry.service_name.to_lowercase() == needle)
            .map(|entry| entry.id.clone())
    }

    /// First ` (2)`, ` (3)`, … suffix that clears the case-insensitive
    /// collision.
    fn available_service_name(&self, base: &str) -> String {
        let mut counter = 2u32;
        loop {
            let candidate = format!("{base} ({counter})");
            if self.find_by_service_name(&candidate).is_none() {
                return candidate;
            }
            counter += 1;
        }
    }

    fn insert_imported(
        &mut self,
        incoming: &BackupEntry,
        renamed: Option<String>,
    ) -> Result<()> {
        let ciphertext = self.seal_secret(incoming.plaintext.as_bytes())?;
        let now = self.session.now_ms();

        // Preserve the incoming id when it is free, otherwise mint.
        let id = if !incoming.id.is_empty() && !self.root.entries.contains_key(&incoming.id) {
            incoming.id.clone()
        } else {
            self.mint_id()
        };

        let created_at = if incoming.created_at > 0 {
            incoming.created_at
        } else {
            now
        };
        let color = if incoming.color.is_empty() {
            random_color()?
        } else {
            incoming.color.clone()
        };

        let entry = Entry {
            id: id.clone(),
            service_name: renamed.unwrap_or_else(|| incoming.service_name.clone()),
            ciphertext,
            environment: incoming.environment,
            tags: incoming.tags.clone(),
            domains: incoming.domains.clone(),
            notes: incoming.notes.clone(),
            color,
            favorite: incoming.favorite,
            created_at,
            last_used_at: incoming.last_used_at.map(|t| t.max(created_at)),
            expires_at: incoming.expires_at,
            usage_count: incoming.usage_count,
            rate_limit: incoming.rate_limit.clone(),
            extra: serde_json::Map::new(),
        };
        self.root.entries.insert(id, entry);
        Ok(())
    }
}

fn overwrite_entry(entry: &mut Entry, incoming: &BackupEntry, ciphertext: Vec<u8>) {
    entry.ciphertext = ciphertext;
    entry.environment = incoming.environment;
    entry.tags = incoming.tags.clone();
    entry.domains = incoming.domains.clone();
    entry.notes = incoming.notes.clone();
    entry.favorite = incoming.favorite;
    entry.expires_at = incoming.expires_at;
    entry.rate_limit = incoming.rate_limit.clone();
    // Usage history is monotone: keep whichever side has seen more use.
    entry.usage_count = entry.usage_count.max(incoming.usage_count);
    entry.last_used_at = match (entry.last_used_at, incoming.last_used_at) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
}
