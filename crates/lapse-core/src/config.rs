use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 120;
pub const DEFAULT_RECURRING_INTERVAL_SECS: u64 = 120;
/// Upper bound for every `*_secs` setting (one year).
pub const MAX_DURATION_SECS: u64 = 366 * 24 * 60 * 60;

/// Top-level config (lapse.toml + LAPSE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LapseConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Polling loop, retry and lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two polling ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound on jobs claimed in a single tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Handler attempts per job per tick.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First delay between two attempts in the same tick; doubles each time.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// How long a claim stays valid before the reclamation sweep may release it.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Wall-clock budget for a single handler attempt.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// Lease extension after the first persisted failure; doubles per failure.
    #[serde(default = "default_failure_backoff_base_secs")]
    pub failure_backoff_base_secs: u64,
    #[serde(default = "default_failure_backoff_max_secs")]
    pub failure_backoff_max_secs: u64,
    /// Used when a recurring job completes without an explicit interval.
    #[serde(default = "default_recurring_interval_secs")]
    pub default_recurring_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            batch_size: default_batch_size(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            lease_secs: default_lease_secs(),
            handler_timeout_secs: default_handler_timeout_secs(),
            failure_backoff_base_secs: default_failure_backoff_base_secs(),
            failure_backoff_max_secs: default_failure_backoff_max_secs(),
            default_recurring_interval_secs: DEFAULT_RECURRING_INTERVAL_SECS,
        }
    }
}

impl SchedulerConfig {
    /// Never zero: `tokio::time::interval` panics on a zero period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(clamp_secs(self.tick_interval_secs))
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(clamp_secs(self.handler_timeout_secs))
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono_secs(self.lease_secs)
    }

    pub fn default_recurring_interval(&self) -> chrono::Duration {
        chrono_secs(self.default_recurring_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Time a booking may stay pending before it is auto-cancelled.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        }
    }
}

impl BookingConfig {
    pub fn grace_period(&self) -> chrono::Duration {
        chrono_secs(self.grace_period_secs)
    }
}

/// Persistent log files, next to the console output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write `combined.log` (every level) and `error.log` (errors only).
    #[serde(default = "default_log_to_file")]
    pub file: bool,
    /// Directory of the daily-rotated log files.
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_to_file(),
            dir: default_log_dir(),
        }
    }
}

fn clamp_secs(secs: u64) -> u64 {
    secs.clamp(1, MAX_DURATION_SECS)
}

fn chrono_secs(secs: u64) -> chrono::Duration {
    // clamped well below i64::MAX, the cast cannot wrap
    chrono::Duration::seconds(clamp_secs(secs) as i64)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lapse/lapse.db", home)
}
fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_batch_size() -> usize {
    32
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_retry_max_delay_ms() -> u64 {
    2_000
}
fn default_lease_secs() -> u64 {
    300
}
fn default_handler_timeout_secs() -> u64 {
    30
}
fn default_failure_backoff_base_secs() -> u64 {
    60
}
fn default_failure_backoff_max_secs() -> u64 {
    3_600
}
fn default_recurring_interval_secs() -> u64 {
    DEFAULT_RECURRING_INTERVAL_SECS
}
fn default_grace_period_secs() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}
fn default_log_to_file() -> bool {
    true
}
fn default_log_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lapse/logs", home)
}

impl LapseConfig {
    /// Load config from a TOML file with LAPSE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `LAPSE_SCHEDULER__TICK_INTERVAL_SECS=5`. A missing file is not an
    /// error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        let config: Self = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LAPSE_").split("__"))
            .extract()
            .map_err(|e| crate::error::LapseError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let s = &self.scheduler;
        let positive = [
            ("scheduler.tick_interval_secs", s.tick_interval_secs),
            ("scheduler.batch_size", s.batch_size as u64),
            ("scheduler.max_attempts", u64::from(s.max_attempts)),
            ("scheduler.lease_secs", s.lease_secs),
            ("scheduler.handler_timeout_secs", s.handler_timeout_secs),
            ("scheduler.default_recurring_interval_secs", s.default_recurring_interval_secs),
            ("booking.grace_period_secs", self.booking.grace_period_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(crate::error::LapseError::Config(format!("{key} must be positive")));
            }
        }

        let bounded = [
            ("scheduler.tick_interval_secs", s.tick_interval_secs),
            ("scheduler.lease_secs", s.lease_secs),
            ("scheduler.handler_timeout_secs", s.handler_timeout_secs),
            ("scheduler.failure_backoff_base_secs", s.failure_backoff_base_secs),
            ("scheduler.failure_backoff_max_secs", s.failure_backoff_max_secs),
            ("scheduler.default_recurring_interval_secs", s.default_recurring_interval_secs),
            ("booking.grace_period_secs", self.booking.grace_period_secs),
        ];
        for (key, value) in bounded {
            if value > MAX_DURATION_SECS {
                return Err(crate::error::LapseError::Config(format!(
                    "{key} must be at most {MAX_DURATION_SECS}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    if let Ok(path) = std::env::var("LAPSE_CONFIG") {
        return path;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lapse/lapse.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let cfg = LapseConfig::default();
        assert_eq!(cfg.scheduler.tick_interval(), Duration::from_secs(10));
        assert_eq!(cfg.scheduler.max_attempts, 3);
        assert_eq!(cfg.booking.grace_period_secs, 120);
        assert_eq!(cfg.scheduler.default_recurring_interval_secs, 120);
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("lapse-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lapse.toml");
        std::fs::write(
            &path,
            "[scheduler]\ntick_interval_secs = 3\n\n[booking]\ngrace_period_secs = 60\n",
        )
        .unwrap();

        let cfg = LapseConfig::load(path.to_str()).unwrap();
        assert_eq!(cfg.scheduler.tick_interval_secs, 3);
        assert_eq!(cfg.booking.grace_period_secs, 60);
        // untouched sections keep their defaults
        assert_eq!(cfg.scheduler.batch_size, 32);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = LapseConfig::load(Some("/nonexistent/lapse.toml")).unwrap();
        assert_eq!(cfg.scheduler.lease_secs, 300);
        assert!(cfg.logging.file);
        assert!(cfg.logging.dir.ends_with(".lapse/logs"));
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let dir = std::env::temp_dir().join(format!("lapse-config-zero-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lapse.toml");
        std::fs::write(&path, "[scheduler]\ntick_interval_secs = 0\n").unwrap();

        let err = LapseConfig::load(path.to_str()).unwrap_err();
        assert!(err.to_string().contains("tick_interval_secs"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let mut cfg = LapseConfig::default();
        cfg.booking.grace_period_secs = u64::MAX;
        assert!(matches!(
            cfg.validate(),
            Err(crate::error::LapseError::Config(msg)) if msg.contains("grace_period_secs")
        ));
    }

    #[test]
    fn duration_accessors_clamp_out_of_range_values() {
        let mut cfg = LapseConfig::default();
        cfg.scheduler.tick_interval_secs = 0;
        cfg.scheduler.lease_secs = u64::MAX;
        cfg.booking.grace_period_secs = u64::MAX;

        assert_eq!(cfg.scheduler.tick_interval(), Duration::from_secs(1));
        assert_eq!(
            cfg.scheduler.lease(),
            chrono::Duration::seconds(MAX_DURATION_SECS as i64)
        );
        assert!(cfg.booking.grace_period() > chrono::Duration::zero());
    }

    #[test]
    fn logging_section_overrides() {
        let dir = std::env::temp_dir().join(format!("lapse-config-log-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lapse.toml");
        std::fs::write(&path, "[logging]\nfile = false\ndir = \"/var/log/lapse\"\n").unwrap();

        let cfg = LapseConfig::load(path.to_str()).unwrap();
        assert!(!cfg.logging.file);
        assert_eq!(cfg.logging.dir, "/var/log/lapse");

        std::fs::remove_dir_all(&dir).ok();
    }
}
