//! Host-side preferences (`config.json`), distinct from the vault's own
//! settings record. Lives in the default store directory regardless of
//! any `--store` override so it can point at the override itself.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Store directory override; `--store` on the command line wins.
    pub store_dir: Option<PathBuf>,

    /// Milliseconds since the Unix epoch of the last CLI invocation.
    pub last_access: Option<i64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HostConfig {
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(dir.join(CONFIG_FILE), content)
    }
}
