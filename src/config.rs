// src/config.rs

//! Loads, resolves, and validates the controller's configuration: TOML
//! file first, then environment-variable overrides for the handful of
//! values that commonly vary between deployments (spec.md §6
//! "Environment").

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    8878
}

/// Key and TTL for the distributed lock the director contends for
/// (spec.md §4.A).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LockConfig {
    #[serde(default = "default_lock_key")]
    pub key: String,
    #[serde(default = "default_lock_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key: default_lock_key(),
            ttl: default_lock_ttl(),
        }
    }
}

fn default_lock_key() -> String {
    "rustpm-controller-director-lock".to_string()
}
fn default_lock_ttl() -> Duration {
    Duration::from_secs(15)
}

/// Overall deadlines and retry cadence the controller and ready-waiter
/// use (spec.md §5, §9 "Open question — pingUntilReady timeout").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RconTimeoutsConfig {
    #[serde(default = "default_start_deadline", with = "humantime_serde")]
    pub start_deadline: Duration,
    #[serde(default = "default_make_live_deadline", with = "humantime_serde")]
    pub make_live_deadline: Duration,
    #[serde(default = "default_stop_deadline", with = "humantime_serde")]
    pub stop_deadline: Duration,
    #[serde(default = "default_ready_retry_interval", with = "humantime_serde")]
    pub ready_retry_interval: Duration,
}

impl Default for RconTimeoutsConfig {
    fn default() -> Self {
        Self {
            start_deadline: default_start_deadline(),
            make_live_deadline: default_make_live_deadline(),
            stop_deadline: default_stop_deadline(),
            ready_retry_interval: default_ready_retry_interval(),
        }
    }
}

fn default_start_deadline() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_make_live_deadline() -> Duration {
    Duration::from_secs(15 * 60)
}
fn default_stop_deadline() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_ready_retry_interval() -> Duration {
    Duration::from_secs(5)
}

/// Billing event-stream consumer settings (spec.md §4.I).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_billing_stream_key")]
    pub stream_key: String,
    #[serde(default = "default_billing_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_billing_consumer_name")]
    pub consumer_name: String,
    #[serde(default = "default_claim_min_idle", with = "humantime_serde")]
    pub claim_min_idle: Duration,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stream_key: default_billing_stream_key(),
            consumer_group: default_billing_consumer_group(),
            consumer_name: default_billing_consumer_name(),
            claim_min_idle: default_claim_min_idle(),
        }
    }
}

fn default_billing_stream_key() -> String {
    "billing-events".to_string()
}
fn default_billing_consumer_group() -> String {
    "rustpm-controller".to_string()
}
fn default_billing_consumer_name() -> String {
    "rustpm-controller-0".to_string()
}
fn default_claim_min_idle() -> Duration {
    Duration::from_secs(60)
}

/// A raw representation of the config file before env overrides and
/// validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_kv_store_url")]
    kv_store_url: String,
    #[serde(default = "default_database_url")]
    database_url: String,
    #[serde(default = "default_enable_director")]
    enable_director: bool,
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    http_read_timeout: Duration,
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    http_write_timeout: Duration,
    #[serde(default)]
    lock: LockConfig,
    #[serde(default)]
    rcon: RconTimeoutsConfig,
    #[serde(default)]
    billing: BillingConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_kv_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_database_url() -> String {
    "postgres://localhost/rustpm".to_string()
}
fn default_enable_director() -> bool {
    true
}
fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

/// The final, validated, and resolved controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub kv_store_url: String,
    pub database_url: String,
    pub enable_director: bool,
    #[serde(with = "humantime_serde")]
    pub http_read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub http_write_timeout: Duration,
    pub lock: LockConfig,
    pub rcon: RconTimeoutsConfig,
    pub billing: BillingConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            kv_store_url: default_kv_store_url(),
            database_url: default_database_url(),
            enable_director: default_enable_director(),
            http_read_timeout: default_http_timeout(),
            http_write_timeout: default_http_timeout(),
            lock: LockConfig::default(),
            rcon: RconTimeoutsConfig::default(),
            billing: BillingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Reads and parses a TOML file, then applies environment-variable
    /// overrides (spec.md §6 "Environment").
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let mut config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            kv_store_url: raw.kv_store_url,
            database_url: raw.database_url,
            enable_director: raw.enable_director,
            http_read_timeout: raw.http_read_timeout,
            http_write_timeout: raw.http_write_timeout,
            lock: raw.lock,
            rcon: raw.rcon,
            billing: raw.billing,
            metrics: raw.metrics,
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RUSTPM_CONTROLLER_PORT") {
            match v.parse() {
                Ok(p) => self.port = p,
                Err(_) => warn!("ignoring invalid RUSTPM_CONTROLLER_PORT={v}"),
            }
        }
        if let Ok(v) = std::env::var("RUSTPM_CONTROLLER_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("RUSTPM_CONTROLLER_KV_STORE_URL") {
            self.kv_store_url = v;
        }
        if let Ok(v) = std::env::var("RUSTPM_CONTROLLER_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("RUSTPM_CONTROLLER_ENABLE_DIRECTOR") {
            match v.parse() {
                Ok(b) => self.enable_director = b,
                Err(_) => warn!("ignoring invalid RUSTPM_CONTROLLER_ENABLE_DIRECTOR={v}"),
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.kv_store_url.trim().is_empty() {
            return Err(anyhow!("kv_store_url cannot be empty"));
        }
        if self.lock.key.trim().is_empty() {
            return Err(anyhow!("lock.key cannot be empty"));
        }
        if self.lock.ttl.is_zero() {
            return Err(anyhow!("lock.ttl must be greater than 0"));
        }
        if self.rcon.start_deadline.is_zero() || self.rcon.stop_deadline.is_zero() {
            return Err(anyhow!("rcon deadlines must be greater than 0"));
        }
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn from_file_parses_minimal_toml_and_fills_defaults() {
        let mut file = tempfile_toml("host = \"127.0.0.1\"\nport = 9090\n");
        let config = Config::from_file(file.path_str()).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.lock.key, default_lock_key());
        file.cleanup();
    }

    #[test]
    fn metrics_port_colliding_with_main_port_fails_validation() {
        let mut config = Config::default();
        config.metrics.enabled = true;
        config.metrics.port = config.port;
        assert!(config.validate().is_err());
    }

    struct TempToml {
        path: std::path::PathBuf,
    }

    impl TempToml {
        fn path_str(&self) -> &str {
            self.path.to_str().unwrap()
        }
        fn cleanup(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn tempfile_toml(contents: &str) -> TempToml {
        let path = std::env::temp_dir().join(format!("rustpm-controller-test-{}.toml", uuid::Uuid::new_v4()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        TempToml { path }
    }
}
