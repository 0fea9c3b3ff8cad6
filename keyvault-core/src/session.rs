//! Session state machine: locked/unlocked, the cached wrapping key,
//! activity tracking, auto-lock, and unlock backoff.
//!
//! The derived key is the sole piece of sensitive in-memory state. It is
//! owned here for the duration of *Unlocked*; other components borrow it
//! for the length of a single call. Locking (manual or auto) drops it,
//! which zeroizes the bytes.

use crate::crypto::{DerivedKey, SALT_LEN};
use crate::model::b64;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Consecutive failed unlocks before the advisory backoff kicks in.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 8_000;

const SESSION_FILE: &str = "session.json";

/// Time source for the session manager.
///
/// Production uses [`SystemClock`]; tests drive a [`ManualClock`] so the
/// auto-lock boundary can be exercised without sleeping.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta: i64) {
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Advisory delay before responding to a failed unlock.
///
/// Exponential from the threshold up, capped: 500 ms, 1 s, 2 s, 4 s, 8 s.
/// The cryptographic check itself is already slow via PBKDF2; this only
/// blunts scripted guessing.
pub fn backoff_delay(consecutive_failures: u32) -> Option<Duration> {
    if consecutive_failures < DEFAULT_MAX_ATTEMPTS {
        return None;
    }
    let excess = consecutive_failures - DEFAULT_MAX_ATTEMPTS;
    let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << excess.min(4));
    Some(Duration::from_millis(ms.min(BACKOFF_CAP_MS)))
}

/// The cached wrapping key plus the salt it was derived from.
pub(crate) struct SessionKey {
    pub key: DerivedKey,
    pub salt: [u8; SALT_LEN],
}

/// Locked/unlocked state for one vault handle.
pub struct Session {
    key: Option<SessionKey>,
    last_activity_ms: i64,
    consecutive_failures: u32,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            key: None,
            last_activity_ms: now,
            consecutive_failures: 0,
            clock,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Transition to *Unlocked* with a freshly derived key.
    pub(crate) fn open(&mut self, key: DerivedKey, salt: [u8; SALT_LEN]) {
        self.key = Some(SessionKey { key, salt });
        self.consecutive_failures = 0;
        self.touch();
    }

    /// Transition to *Locked*; the cached key is zeroized on drop.
    pub fn close(&mut self) {
        self.key = None;
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    pub(crate) fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// Record activity, resetting the auto-lock countdown.
    pub fn touch(&mut self) {
        self.last_activity_ms = self.clock.now_ms();
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms
    }

    /// Lock if the idle window has elapsed. Returns true when this call
    /// performed the transition. `auto_lock_minutes == 0` disables.
    pub fn check_auto_lock(&mut self, auto_lock_minutes: u64) -> bool {
        if !self.is_unlocked() || auto_lock_minutes == 0 {
            return false;
        }

        let idle_ms = self.clock.now_ms().saturating_sub(self.last_activity_ms);
        if idle_ms > auto_lock_minutes as i64 * 60_000 {
            info!(idle_ms, "auto-locking idle session");
            self.close();
            return true;
        }
        false
    }

    /// Count a failed unlock; the returned delay is the advisory backoff
    /// the caller should sleep before responding.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        backoff_delay(self.consecutive_failures)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Short-lived file-backed session token (`session.json`) for hosts that
/// cannot hold process memory between invocations, e.g. the CLI.
///
/// Holds the raw derived key, so the file is owner-only and deleted on
/// lock or expiry. Never recorded in the audit log.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken {
    #[serde(with = "b64")]
    pub key: Vec<u8>,

    #[serde(with = "b64")]
    pub salt: Vec<u8>,

    /// Absolute expiry, milliseconds since the Unix epoch.
    #[zeroize(skip)]
    pub expires_at: i64,
}

impl SessionToken {
    /// Load a token from `dir`, returning `None` if it is missing,
    /// malformed, or expired. Expired and malformed tokens are removed.
    pub fn load(dir: &Path, now_ms: i64) -> Option<Self> {
        let path = dir.join(SESSION_FILE);
        let content = fs::read_to_string(&path).ok()?;

        let token: SessionToken = match serde_json::from_str(&content) {
            Ok(token) => token,
            Err(_) => {
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        if token.expires_at <= now_ms {
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(token)
    }

    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join(SESSION_FILE);
        let content = serde_json::to_string(self).map_err(std::io::Error::other)?;
        fs::write(&path, content)?;

        #[cfg(unix)]
        {
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&path, perms);
        }
        Ok(())
    }

    pub fn clear(dir: &Path) {
        let _ = fs::remove_file(dir.join(SESSION_FILE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlocked_session(clock: Arc<ManualClock>) -> Session {
        let mut session = Session::new(clock);
        session.open(DerivedKey::from_bytes([1u8; 32]), [2u8; SALT_LEN]);
        session
    }

    #[test]
    fn lock_discards_key() {
        let clock = Arc::new(ManualClock::new(0));
        let mut session = unlocked_session(clock);
        assert!(session.is_unlocked());

        session.close();
        assert!(!session.is_unlocked());
        assert!(session.key().is_none());
    }

    #[test]
    fn auto_lock_fires_after_idle_window() {
        let clock = Arc::new(ManualClock::new(0));
        let mut session = unlocked_session(clock.clone());

        // 59 seconds idle with a one-minute window: still unlocked.
        clock.advance_ms(59_000);
        assert!(!session.check_auto_lock(1));
        assert!(session.is_unlocked());

        // Activity resets the countdown.
        session.touch();
        clock.advance_ms(59_000);
        assert!(!session.check_auto_lock(1));

        // 61 seconds with no activity: locked.
        clock.advance_ms(2_000);
        assert!(session.check_auto_lock(1));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn zero_minutes_disables_auto_lock() {
        let clock = Arc::new(ManualClock::new(0));
        let mut session = unlocked_session(clock.clone());

        clock.advance_ms(i64::from(u32::MAX));
        assert!(!session.check_auto_lock(0));
        assert!(session.is_unlocked());
    }

    #[test]
    fn backoff_curve() {
        assert_eq!(backoff_delay(0), None);
        assert_eq!(backoff_delay(4), None);
        assert_eq!(backoff_delay(5), Some(Duration::from_millis(500)));
        assert_eq!(backoff_delay(6), Some(Duration::from_millis(1_000)));
        assert_eq!(backoff_delay(9), Some(Duration::from_millis(8_000)));
        assert_eq!(backoff_delay(50), Some(Duration::from_millis(8_000)));
    }

    #[test]
    fn failures_reset_on_open() {
        let clock = Arc::new(ManualClock::new(0));
        let mut session = Session::new(clock);

        for _ in 0..7 {
            session.record_failure();
        }
        assert_eq!(session.consecutive_failures(), 7);

        session.open(DerivedKey::from_bytes([0u8; 32]), [0u8; SALT_LEN]);
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[test]
    fn session_token_lifecycle() {
        let tmp = tempfile::TempDir::new().unwrap();

        let token = SessionToken {
            key: vec![9u8; 32],
            salt: vec![3u8; SALT_LEN],
            expires_at: 10_000,
        };
        token.save(tmp.path()).unwrap();

        let loaded = SessionToken::load(tmp.path(), 5_000).unwrap();
        assert_eq!(loaded.key, vec![9u8; 32]);

        // Expired tokens vanish.
        assert!(SessionToken::load(tmp.path(), 10_000).is_none());
        assert!(!tmp.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn session_token_clear() {
        let tmp = tempfile::TempDir::new().unwrap();
        let token = SessionToken {
            key: vec![1u8; 32],
            salt: vec![1u8; SALT_LEN],
            expires_at: i64::MAX,
        };
        token.save(tmp.path()).unwrap();

        SessionToken::clear(tmp.path());
        assert!(SessionToken::load(tmp.path(), 0).is_none());
    }
}
