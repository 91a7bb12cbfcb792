//! Configuration loading from environment variables.
//!
//! All values come from `SPAMFLOW_*` environment variables with sensible
//! defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `SPAMFLOW_CHANNEL_CAPACITY` | 1 | Slots per inter-stage channel |
//! | `SPAMFLOW_BATCH_MAX_RECORDS` | 2 | Max records per message batch |
//! | `SPAMFLOW_CLASSIFY_QUOTA` | 3 | Max concurrent classifier calls |
//! | `SPAMFLOW_LOG_LEVEL` | info | Log filter directive |
//! | `SPAMFLOW_LOG_FORMAT` | json | `json` or `pretty` |

use serde::Serialize;

use crate::stages::{BatchConfig, QuotaConfig};
use crate::telemetry::{LogConfig, LogFormat};
use crate::SpamPipelineConfig;

/// Effective configuration summary.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub channel_capacity: usize,
    pub batch_max_records: usize,
    pub classify_quota: usize,
    pub log_level: String,
    pub log_format: &'static str,
}

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub pipeline: SpamPipelineConfig,
    pub log: LogConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn load_batch_config() -> BatchConfig {
    let max_batch_size = parse_usize("SPAMFLOW_BATCH_MAX_RECORDS", 2).max(1);
    BatchConfig { max_batch_size }
}

fn load_quota_config() -> QuotaConfig {
    let max_in_flight = parse_usize("SPAMFLOW_CLASSIFY_QUOTA", 3).max(1);
    QuotaConfig { max_in_flight }
}

fn load_log_config() -> LogConfig {
    let level = std::env::var("SPAMFLOW_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    let format = std::env::var("SPAMFLOW_LOG_FORMAT")
        .ok()
        .and_then(|v| LogFormat::parse(&v))
        .unwrap_or_default();
    LogConfig {
        format,
        level,
        output_path: None,
    }
}

/// Load all configuration from environment variables.
pub fn load() -> EnvConfig {
    let channel_capacity = parse_usize("SPAMFLOW_CHANNEL_CAPACITY", 1).max(1);
    EnvConfig {
        pipeline: SpamPipelineConfig {
            channel_capacity,
            batch: load_batch_config(),
            quota: load_quota_config(),
        },
        log: load_log_config(),
    }
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            channel_capacity: self.pipeline.channel_capacity,
            batch_max_records: self.pipeline.batch.max_batch_size,
            classify_quota: self.pipeline.quota.max_in_flight,
            log_level: self.log.level.clone(),
            log_format: match self.log.format {
                LogFormat::Json => "json",
                LogFormat::Pretty => "pretty",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "SPAMFLOW_CHANNEL_CAPACITY",
        "SPAMFLOW_BATCH_MAX_RECORDS",
        "SPAMFLOW_CLASSIFY_QUOTA",
        "SPAMFLOW_LOG_LEVEL",
        "SPAMFLOW_LOG_FORMAT",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.pipeline.channel_capacity, 1);
        assert_eq!(cfg.pipeline.batch.max_batch_size, 2);
        assert_eq!(cfg.pipeline.quota.max_in_flight, 3);
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("SPAMFLOW_CHANNEL_CAPACITY", "16");
        std::env::set_var("SPAMFLOW_BATCH_MAX_RECORDS", "10");
        std::env::set_var("SPAMFLOW_CLASSIFY_QUOTA", " 5 ");
        std::env::set_var("SPAMFLOW_LOG_LEVEL", "spamflow=debug");
        std::env::set_var("SPAMFLOW_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.pipeline.channel_capacity, 16);
        assert_eq!(cfg.pipeline.batch.max_batch_size, 10);
        assert_eq!(cfg.pipeline.quota.max_in_flight, 5);
        assert_eq!(cfg.log.level, "spamflow=debug");
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("SPAMFLOW_BATCH_MAX_RECORDS", "lots");
        std::env::set_var("SPAMFLOW_CLASSIFY_QUOTA", "-1");
        std::env::set_var("SPAMFLOW_LOG_FORMAT", "xml");
        let cfg = load();
        assert_eq!(cfg.pipeline.batch.max_batch_size, 2);
        assert_eq!(cfg.pipeline.quota.max_in_flight, 3);
        assert_eq!(cfg.log.format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_zero_values_raised_to_floor() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("SPAMFLOW_CHANNEL_CAPACITY", "0");
        std::env::set_var("SPAMFLOW_BATCH_MAX_RECORDS", "0");
        std::env::set_var("SPAMFLOW_CLASSIFY_QUOTA", "0");
        let cfg = load();
        assert_eq!(cfg.pipeline.channel_capacity, 1);
        assert_eq!(cfg.pipeline.batch.max_batch_size, 1);
        assert_eq!(cfg.pipeline.quota.max_in_flight, 1);
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_serializes() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let eff = load().effective_config();
        let json = serde_json::to_value(&eff).unwrap();
        assert_eq!(json["batch_max_records"], 2);
        assert_eq!(json["classify_quota"], 3);
        assert_eq!(json["log_format"], "json");
    }
}
