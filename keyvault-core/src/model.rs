//! Data model: entries, metadata views, settings.

use crate::crypto::Result as CryptoResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Deployment environment an API credential belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
    Staging,
    Testing,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Testing => "testing",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "testing" | "test" => Ok(Environment::Testing),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Host display theme hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    Auto,
}

/// Fixed palette entries are colored from at creation.
pub const COLOR_PALETTE: &[&str] = &[
    "#e5484d", "#f76b15", "#ffc53d", "#46a758", "#12a594", "#0091ff", "#6e56cf", "#e93d82",
];

/// Pick a display color at random from the palette.
pub fn random_color() -> CryptoResult<String> {
    let byte: [u8; 1] = crate::crypto::random_array()?;
    Ok(COLOR_PALETTE[byte[0] as usize % COLOR_PALETTE.len()].to_string())
}

/// One stored secret.
///
/// The `ciphertext` field holds the opaque envelope bytes produced by the
/// entry codec and is never exposed to queries. All timestamps are
/// milliseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,

    pub service_name: String,

    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub domains: BTreeSet<String>,

    #[serde(default)]
    pub notes: String,

    pub color: String,

    #[serde(default)]
    pub favorite: bool,

    pub created_at: i64,

    #[serde(default)]
    pub last_used_at: Option<i64>,

    #[serde(default)]
    pub expires_at: Option<i64>,

    #[serde(default)]
    pub usage_count: u64,

    #[serde(default)]
    pub rate_limit: String,

    /// Fields written by newer versions, preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An [`Entry`] minus its ciphertext; safe to hand to any host UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryView {
    pub id: String,
    pub service_name: String,
    pub environment: Environment,
    pub tags: BTreeSet<String>,
    pub domains: BTreeSet<String>,
    pub notes: String,
    pub color: String,
    pub favorite: bool,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub usage_count: u64,
    pub rate_limit: String,
}

impl From<&Entry> for EntryView {
    fn from(entry: &Entry) -> Self {
        Self {
            id: entry.id.clone(),
            service_name: entry.service_name.clone(),
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

/// A decrypted entry as returned by `get`: metadata plus the plaintext
/// secret. The plaintext is the caller's responsibility once handed off.
#[derive(Debug, Clone, Serialize)]
pub struct EntryWithPlaintext {
    #[serde(flatten)]
    pub view: EntryView,
    pub plaintext: String,
}

/// Input record for `add`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewEntry {
    pub service_name: String,
    pub plaintext: String,
    pub environment: Environment,
    pub tags: BTreeSet<String>,
    pub domains: BTreeSet<String>,
    pub notes: String,
    pub favorite: bool,
    pub expires_at: Option<i64>,
    pub rate_limit: String,
}

/// Partial update for `update`. `None` fields are left untouched; a patch
/// with every field `None` is rejected as a validation error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntryPatch {
    pub service_name: Option<String>,
    pub plaintext: Option<String>,
    pub environment: Option<Environment>,
    pub tags: Option<BTreeSet<String>>,
    pub domains: Option<BTreeSet<String>>,
    pub notes: Option<String>,
    pub favorite: Option<bool>,
    pub expires_at: Option<i64>,
    pub rate_limit: Option<String>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.service_name.is_none()
            && self.plaintext.is_none()
            && self.environment.is_none()
            && self.tags.is_none()
            && self.domains.is_none()
            && self.notes.is_none()
            && self.favorite.is_none()
            && self.expires_at.is_none()
            && self.rate_limit.is_none()
    }
}

/// Vault-wide configuration stored in the root record.
///
/// Timeout fields are unsigned; zero means "disabled" for auto-lock and
/// clipboard clear. The core never touches the clipboard itself, it only
/// carries the timeout for hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub auto_lock_minutes: u64,
    pub clipboard_clear_seconds: u64,
    pub mask_keys: bool,
    pub enable_audit_log: bool,
    pub enable_auto_fill: bool,
    pub show_usage_stats: bool,
    pub show_expiration_warnings: bool,
    pub expiration_warning_days: u64,
    pub theme: Theme,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_lock_minutes: 5,
            clipboard_clear_seconds: 30,
            mask_keys: true,
            enable_audit_log: true,
            enable_auto_fill: true,
            show_usage_stats: true,
            show_expiration_warnings: true,
            expiration_warning_days: 7,
            theme: Theme::Auto,
            extra: serde_json::Map::new(),
        }
    }
}

/// Serde helper: binary fields as base64 strings in the JSON root.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
