use std::path::PathBuf;

use anyhow::Context;

use crate::query::PageLimits;

pub const ENV_DB_PATH: &str = "CIVIC_PROFILE_DB";
pub const ENV_MAX_PAGE_SIZE: &str = "CIVIC_PROFILE_MAX_PAGE_SIZE";
pub const ENV_DEFAULT_PAGE_SIZE: &str = "CIVIC_PROFILE_DEFAULT_PAGE_SIZE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "CIVIC_PROFILE_BUSY_TIMEOUT_MS";

const DEFAULT_DB_FILE: &str = "civic_profile.sqlite3";

/// Runtime settings for the engine and its storage pool.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub page_limits: PageLimits,
    /// SQLite busy timeout; the only statement timeout the engine applies.
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            page_limits: PageLimits::default(),
            busy_timeout_ms: 5_000,
            max_connections: 8,
        }
    }
}

impl EngineConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.trim().is_empty()) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_MAX_PAGE_SIZE) {
            config.page_limits.max_page_size = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_MAX_PAGE_SIZE}"))?;
        }
        if let Some(raw) = lookup(ENV_DEFAULT_PAGE_SIZE) {
            config.page_limits.default_page_size = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_DEFAULT_PAGE_SIZE}"))?;
        }
        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_BUSY_TIMEOUT_MS}"))?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let limits = &self.page_limits;
        if limits.max_page_size < 1 {
            anyhow::bail!("max page size must be at least 1");
        }
        if !(1..=limits.max_page_size).contains(&limits.default_page_size) {
            anyhow::bail!(
                "default page size {} must be between 1 and {}",
                limits.default_page_size,
                limits.max_page_size
            );
        }
        if self.max_connections == 0 {
            anyhow::bail!("max connections must be at least 1");
        }
        Ok(())
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
    fn defaults_apply_without_env() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.page_limits.max_page_size, 100);
        assert_eq!(config.page_limits.default_page_size, 25);
    }

    #[test]
    fn env_overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_DB_PATH, "/tmp/register.sqlite3"),
            (ENV_MAX_PAGE_SIZE, "50"),
            (ENV_DEFAULT_PAGE_SIZE, " 10 "),
            (ENV_BUSY_TIMEOUT_MS, "250"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/register.sqlite3"));
        assert_eq!(config.page_limits.max_page_size, 50);
        assert_eq!(config.page_limits.default_page_size, 10);
        assert_eq!(config.busy_timeout_ms, 250);
    }

    #[test]
    fn inconsistent_limits_are_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[
            (ENV_MAX_PAGE_SIZE, "10"),
            (ENV_DEFAULT_PAGE_SIZE, "20"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("default page size"));

        assert!(EngineConfig::from_lookup(lookup(&[(ENV_MAX_PAGE_SIZE, "lots")])).is_err());
    }
}
