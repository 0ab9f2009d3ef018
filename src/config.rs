//! Configuration loading and persistence.
//!
//! Handles reading and writing the formcast configuration file. Secrets
//! (the channel signing key and the D1 API token) are never written to disk;
//! they only ever come from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::Path, path::PathBuf};

use crate::constants::{DEFAULT_CLIENT_ROLE, DEFAULT_CREDENTIAL_TTL, NOTIFICATIONS_CHANNEL};

/// Default Cloudflare API base used for D1 persistence.
pub const DEFAULT_D1_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Connection parameters for the optional D1 submission store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct D1Settings {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// D1 database identifier.
    pub database_id: String,
    /// API base URL (overridable for tests and proxies).
    #[serde(default = "default_d1_api_base")]
    pub api_base: String,
    /// API token - NOT serialized to disk.
    #[serde(skip)]
    pub api_token: String,
}

fn default_d1_api_base() -> String {
    DEFAULT_D1_API_BASE.to_string()
}

impl D1Settings {
    /// All three identifiers are present.
    pub fn is_complete(&self) -> bool {
        !self.account_id.is_empty() && !self.database_id.is_empty() && !self.api_token.is_empty()
    }
}

/// Configuration for the formcast server and clients.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// URL clients use to reach the server.
    pub server_url: String,
    /// Address `formcast serve` binds to.
    pub bind_addr: String,
    /// Client role written into every credential.
    pub client_role: String,
    /// Credential lifetime in seconds.
    pub credential_ttl_secs: u64,
    /// Channel viewers subscribe to and submissions publish on.
    pub channel: String,
    /// Optional D1 persistence for accepted submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<D1Settings>,
    /// Master signing secret - NOT serialized to disk.
    #[serde(skip)]
    pub signing_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            client_role: DEFAULT_CLIENT_ROLE.to_string(),
            credential_ttl_secs: DEFAULT_CREDENTIAL_TTL.as_secs(),
            channel: NOTIFICATIONS_CHANNEL.to_string(),
            persistence: None,
            signing_key: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `FORMCAST_CONFIG_DIR` env var: explicit override
    /// 2. `FORMCAST_ENV=test`: `<temp dir>/formcast-test`
    /// 3. Default: platform config dir + `formcast`
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("FORMCAST_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            std::env::temp_dir().join("formcast-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("formcast")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from `config.json`, with environment variable overrides.
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads a config file without applying environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Applies overrides from a key lookup (the process environment in production).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("FORMCAST_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(bind_addr) = lookup("FORMCAST_BIND_ADDR") {
            self.bind_addr = bind_addr;
        }

        if let Some(role) = lookup("FORMCAST_CLIENT_ROLE") {
            self.client_role = role;
        }

        if let Some(ttl) = lookup("FORMCAST_CREDENTIAL_TTL") {
            if let Ok(secs) = ttl.parse::<u64>() {
                self.credential_ttl_secs = secs;
            } else {
                log::warn!("Ignoring non-numeric FORMCAST_CREDENTIAL_TTL={}", ttl);
            }
        }

        // An empty secret is treated the same as an unset one.
        if let Some(key) = lookup("FORMCAST_SIGNING_KEY").filter(|k| !k.is_empty()) {
            self.signing_key = Some(key);
        }

        let account = lookup("CLOUDFLARE_ACCOUNT_ID");
        let database = lookup("CLOUDFLARE_DATABASE_ID");
        let token = lookup("CLOUDFLARE_API_TOKEN");
        if account.is_some() || database.is_some() || token.is_some() {
            let settings = self.persistence.get_or_insert_with(|| D1Settings {
                api_base: default_d1_api_base(),
                ..D1Settings::default()
            });
            if let Some(account) = account {
                settings.account_id = account;
            }
            if let Some(database) = database {
                settings.database_id = database;
            }
            if let Some(token) = token {
                settings.api_token = token;
            }
        }
    }

    /// Persists the current configuration to disk.
    /// Secrets are skipped by serde and never reach the file.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Credential lifetime as a duration.
    pub fn credential_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.credential_ttl_secs)
    }

    /// D1 settings when every field needed to reach the API is present.
    pub fn complete_persistence(&self) -> Option<&D1Settings> {
        self.persistence.as_ref().filter(|s| s.is_complete())
    }
}
