use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DB_PATH_VAR: &str = "TRELLIS_DB_PATH";
pub const BUSY_TIMEOUT_VAR: &str = "TRELLIS_BUSY_TIMEOUT_MS";
pub const LOG_VAR: &str = "TRELLIS_LOG";

const DEFAULT_DB_PATH: &str = "trellis.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout: Duration,
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            log_filter: None,
        }
    }
}

impl Config {
    /// Reads the process environment, after loading a `.env` file if one is present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = lookup(DB_PATH_VAR).filter(|value| !value.trim().is_empty()) {
            config.db_path = PathBuf::from(path);
        }

        if let Some(raw) = lookup(BUSY_TIMEOUT_VAR) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                Error::invalid(format!("{BUSY_TIMEOUT_VAR} must be a whole number of milliseconds"))
            })?;
            config.busy_timeout = Duration::from_millis(millis);
        }

        config.log_filter = lookup(LOG_VAR).filter(|value| !value.trim().is_empty());
        Ok(config)
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            (DB_PATH_VAR, "/tmp/boards.db"),
            (BUSY_TIMEOUT_VAR, "250"),
            (LOG_VAR, "trellis=debug"),
        ]))
        .expect("config");
        assert_eq!(config.db_path, PathBuf::from("/tmp/boards.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.log_filter.as_deref(), Some("trellis=debug"));
    }

    #[test]
    fn rejects_bad_timeout() {
        let err = Config::from_lookup(lookup(&[(BUSY_TIMEOUT_VAR, "soon")])).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
