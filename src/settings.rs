use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on how long an exhausted-rate-limit cache entry may live
    #[serde(default = "default_exhausted_cache_max_ms")]
    pub exhausted_cache_max_ms: i64,
    /// Caller-side backpressure: how many queued items to feed one pass
    #[serde(default = "default_max_items_per_pass")]
    pub max_items_per_pass: usize,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_exhausted_cache_max_ms() -> i64 {
    60_000
}

fn default_max_items_per_pass() -> usize {
    1_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            exhausted_cache_max_ms: default_exhausted_cache_max_ms(),
            max_items_per_pass: default_max_items_per_pass(),
            log_format: LogFormat::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                toml::from_str(&data)?
            }
            None => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.exhausted_cache_max_ms <= 0 {
            return Err(ConfigError::Invalid(
                "exhausted_cache_max_ms must be positive".to_string(),
            ));
        }
        if self.max_items_per_pass == 0 {
            return Err(ConfigError::Invalid(
                "max_items_per_pass must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
