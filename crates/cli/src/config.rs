//! Runtime configuration.
//!
//! Layered lowest to highest: built-in defaults, an optional TOML file
//! (`--config`), `CUSTOMS_SYNC_*` environment variables, then command-line
//! flags (applied by the caller).
//!
//! # Example
//!
//! ```toml
//! database_url = "sqlite://customs-sync.db"
//! sync_secret = "change-me"
//! port = 8080
//!
//! [rates]
//! backfill_years = 5
//! request_delay_ms = 100
//!
//! [documents]
//! base_url = "https://customs.example.com/api"
//!
//! [jobs]
//! chunk_days = 7
//! max_chunk_attempts = 3
//! retry_delay_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use customs_sync_engine::source::rates::DEFAULT_RATES_URL;
use customs_sync_engine::{JobConfig, RateSyncConfig};
use serde::Deserialize;

pub const ENV_DATABASE_URL: &str = "CUSTOMS_SYNC_DATABASE_URL";
pub const ENV_SECRET: &str = "CUSTOMS_SYNC_SECRET";
pub const ENV_PORT: &str = "CUSTOMS_SYNC_PORT";
pub const ENV_RATES_URL: &str = "CUSTOMS_SYNC_RATES_URL";
pub const ENV_DOCUMENTS_URL: &str = "CUSTOMS_SYNC_DOCUMENTS_URL";
pub const ENV_DOCUMENTS_TOKEN: &str = "CUSTOMS_SYNC_DOCUMENTS_TOKEN";

/// `database_url` value selecting the in-memory store.
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("{0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_url: String,
    /// Shared secret for the HTTP triggers. `None` disables auth.
    pub sync_secret: Option<String>,
    pub port: u16,
    pub rates: RatesSection,
    pub documents: DocumentsSection,
    pub jobs: JobsSection,
}

/// `[rates]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RatesSection {
    pub base_url: String,
    pub backfill_years: u32,
    pub gap_fill_days: u32,
    pub request_delay_ms: u64,
    pub lock_ttl_secs: u64,
}

/// `[documents]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentsSection {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

/// `[jobs]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsSection {
    pub chunk_days: u32,
    pub max_chunk_attempts: u32,
    pub fatal_chunk_errors: bool,
    pub retry_delay_ms: u64,
    pub lock_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://customs-sync.db".to_string(),
            sync_secret: None,
            port: 8080,
            rates: RatesSection::default(),
            documents: DocumentsSection::default(),
            jobs: JobsSection::default(),
        }
    }
}

impl Default for RatesSection {
    fn default() -> Self {
        let engine = RateSyncConfig::default();
        Self {
            base_url: DEFAULT_RATES_URL.to_string(),
            backfill_years: engine.backfill_years,
            gap_fill_days: engine.gap_fill_days,
            request_delay_ms: engine.request_delay.as_millis() as u64,
            lock_ttl_secs: engine.lock_ttl.as_secs(),
        }
    }
}

impl Default for JobsSection {
    fn default() -> Self {
        let engine = JobConfig::default();
        Self {
            chunk_days: engine.chunk_days,
            max_chunk_attempts: engine.max_chunk_attempts,
            fatal_chunk_errors: engine.fatal_chunk_errors,
            retry_delay_ms: engine.retry_delay.as_millis() as u64,
            lock_ttl_secs: engine.lock_ttl.as_secs(),
        }
    }
}

impl Config {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override from environment variables. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(secret) = get(ENV_SECRET) {
            self.sync_secret = Some(secret);
        }
        if let Some(port) = get(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_PORT,
                value: port.clone(),
            })?;
        }
        if let Some(url) = get(ENV_RATES_URL) {
            self.rates.base_url = url;
        }
        if let Some(url) = get(ENV_DOCUMENTS_URL) {
            self.documents.base_url = Some(url);
        }
        if let Some(token) = get(ENV_DOCUMENTS_TOKEN) {
            self.documents.auth_token = Some(token);
        }
        Ok(())
    }

    /// The configured secret, treating an empty string as unset.
    pub fn secret(&self) -> Option<&str> {
        self.sync_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn rate_sync(&self) -> RateSyncConfig {
        RateSyncConfig {
            backfill_years: self.rates.backfill_years,
            gap_fill_days: self.rates.gap_fill_days,
            request_delay: Duration::from_millis(self.rates.request_delay_ms),
            lock_ttl: Duration::from_secs(self.rates.lock_ttl_secs),
        }
    }

    pub fn jobs(&self) -> JobConfig {
        JobConfig {
            chunk_days: self.jobs.chunk_days,
            max_chunk_attempts: self.jobs.max_chunk_attempts,
            fatal_chunk_errors: self.jobs.fatal_chunk_errors,
            retry_delay: Duration::from_millis(self.jobs.retry_delay_ms),
            lock_ttl: Duration::from_secs(self.jobs.lock_ttl_secs),
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.rates.backfill_years, 5);
        assert_eq!(config.rates.gap_fill_days, 30);
        assert_eq!(config.rate_sync().request_delay, Duration::from_millis(100));
        assert_eq!(config.jobs().chunk_days, 7);
        assert_eq!(config.jobs().lock_ttl, Duration::from_secs(7200));
        assert_eq!(config.jobs().retry_delay, Duration::from_secs(1));
        assert!(config.secret().is_none());
    }

    #[test]
    fn file_then_env_layering() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_url = \"memory\"\nport = 9000\nsync_secret = \"from-file\"\n\n[rates]\nbackfill_years = 2\n\n[jobs]\nfatal_chunk_errors = true"
        )
        .unwrap();

        let mut config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.database_url, MEMORY_DATABASE);
        assert_eq!(config.rates.backfill_years, 2);
        assert_eq!(config.rates.gap_fill_days, 30);
        assert!(config.jobs.fatal_chunk_errors);

        config
            .apply_env(env(&[
                (ENV_SECRET, "from-env"),
                (ENV_PORT, "9100"),
                (ENV_DATABASE_URL, ""),
                (ENV_DOCUMENTS_URL, "http://docs.local/api"),
            ]))
            .unwrap();
        assert_eq!(config.secret(), Some("from-env"));
        assert_eq!(config.port, 9100);
        assert_eq!(config.database_url, MEMORY_DATABASE);
        assert_eq!(config.documents.base_url.as_deref(), Some("http://docs.local/api"));
    }

    #[test]
    fn bad_port_in_env_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[(ENV_PORT, "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: ENV_PORT, .. }));
    }

    #[test]
    fn unknown_keys_are_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "databse_url = \"memory\"").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn empty_secret_disables_auth() {
        let config = Config {
            sync_secret: Some(String::new()),
            ..Config::default()
        };
        assert!(config.secret().is_none());
    }
}
