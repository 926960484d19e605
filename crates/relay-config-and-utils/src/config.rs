//! Configuration management for the relay.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default database root the relay watches (can be overridden at compile time
/// via the RELAY_DATABASE_ROOT env var).
pub const DEFAULT_DATABASE_ROOT: &str = match option_env!("RELAY_DATABASE_ROOT") {
    Some(root) => root,
    None => "digits",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default `iss` claim for minted tokens.
pub const DEFAULT_TOKEN_ISSUER: &str = "login-relay";

/// Default lifetime of minted tokens, in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Main relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Root path in the record store; logins are watched under
    /// `<database_root>/logins`.
    #[serde(default = "default_database_root")]
    pub database_root: String,
    /// Secret used to sign minted tokens. Required at startup; there is no
    /// safe built-in default.
    #[serde(default)]
    pub token_secret: Option<String>,
    /// `iss` claim written into minted tokens.
    #[serde(default = "default_token_issuer")]
    pub token_issuer: String,
    /// Lifetime of minted tokens, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_database_root() -> String {
    DEFAULT_DATABASE_ROOT.to_string()
}

fn default_token_issuer() -> String {
    DEFAULT_TOKEN_ISSUER.to_string()
}

fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database_root: DEFAULT_DATABASE_ROOT.to_string(),
            token_secret: None,
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file under `paths`, falling back to
    /// defaults when the file does not exist. Environment variables override
    /// file values.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file under `paths`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("RELAY_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(root) = std::env::var("RELAY_DATABASE_ROOT") {
            self.database_root = root;
        }
        if let Ok(secret) = std::env::var("RELAY_TOKEN_SECRET") {
            if !secret.is_empty() {
                self.token_secret = Some(secret);
            }
        }
        if let Ok(issuer) = std::env::var("RELAY_TOKEN_ISSUER") {
            self.token_issuer = issuer;
        }
    }

    /// Reject configurations the relay cannot start with. An invalid watch
    /// root is the only fatal startup condition besides a missing signing
    /// secret, which is checked when the issuer is built.
    fn validate(&self) -> CoreResult<()> {
        if self.database_root.trim().is_empty() {
            return Err(CoreError::Config(
                "database_root must be a valid path string".to_string(),
            ));
        }
        Ok(())
    }
}
