//! Application configuration.
//!
//! One top-level struct, nested sub-configs each with
//! `#[serde(default = "fn")]` per field and an explicit `impl Default`,
//! loaded and validated by `infrastructure::config::loader::ConfigLoader`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    /// Directory holding the state-store file, semaphore lock files, and
    /// per-run output directories.
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub semaphore: SemaphoreConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pricing: PricingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            semaphore: SemaphoreConfig::default(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
            pricing: PricingConfig::default(),
        }
    }
}

/// State-store and filesystem-layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Path to the state-store JSON file.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Root directory for per-run pipeline output directories.
    #[serde(default = "default_output_root")]
    pub output_root: String,

    /// Directory for per-run log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_store_path() -> String {
    ".swarmctl/state.json".to_string()
}

fn default_output_root() -> String {
    "tmp/swarm/outputs".to_string()
}

fn default_log_dir() -> String {
    ".swarmctl/logs".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            output_root: default_output_root(),
            log_dir: default_log_dir(),
        }
    }
}

/// Cross-process semaphore configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SemaphoreConfig {
    /// Directory holding `{task_name}.{slot}.lock` files.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: String,

    /// Default per-task concurrency cap used when a task descriptor doesn't
    /// set its own `concurrency`. 0 means unbounded.
    #[serde(default = "default_task_concurrency")]
    pub default_concurrency: usize,

    /// Retry interval when every slot is held, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_lock_dir() -> String {
    "tmp/swarm/locks".to_string()
}

const fn default_task_concurrency() -> usize {
    1
}

const fn default_retry_interval_ms() -> u64 {
    100
}

impl Default for SemaphoreConfig {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            default_concurrency: default_task_concurrency(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// Iteration-loop and pipeline-executor timing defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Default per-iteration timeout, in seconds. 0 means no timeout.
    #[serde(default = "default_iteration_timeout_secs")]
    pub iteration_timeout_secs: u64,

    /// Default total-run timeout, in seconds. 0 means no timeout.
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,

    /// How often the iteration loop polls a paused record, in milliseconds.
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_interval_ms: u64,

    /// Stagger between launching successive ready tasks in one DAG wave, in
    /// milliseconds, to avoid a thundering herd against the wrapped CLI.
    #[serde(default = "default_launch_stagger_ms")]
    pub launch_stagger_ms: u64,

    /// Maximum `{{include: path}}` nesting depth during prompt composition.
    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: u32,

    /// Grace period between a graceful termination signal and a force-kill.
    #[serde(default = "default_kill_grace_period_ms")]
    pub kill_grace_period_ms: u64,
}

const fn default_iteration_timeout_secs() -> u64 {
    0
}

const fn default_total_timeout_secs() -> u64 {
    0
}

const fn default_pause_poll_ms() -> u64 {
    1000
}

const fn default_launch_stagger_ms() -> u64 {
    5000
}

const fn default_max_include_depth() -> u32 {
    10
}

const fn default_kill_grace_period_ms() -> u64 {
    5000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            iteration_timeout_secs: default_iteration_timeout_secs(),
            total_timeout_secs: default_total_timeout_secs(),
            pause_poll_interval_ms: default_pause_poll_ms(),
            launch_stagger_ms: default_launch_stagger_ms(),
            max_include_depth: default_max_include_depth(),
            kill_grace_period_ms: default_kill_grace_period_ms(),
        }
    }
}

/// Logging configuration. See `infrastructure::logging::config::LogConfig`
/// for the runtime shape this is converted into; kept separate so the
/// top-level `AppConfig` stays figment/YAML-friendly with plain strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_to_file: false,
            retention_days: default_retention_days(),
        }
    }
}

/// Per-model \$/token pricing, consulted when a runner's reported cost is
/// exactly zero (see `application::pricing` and DESIGN.md's decision on
/// the pricing fallback).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PricingConfig {
    #[serde(default)]
    pub models: HashMap<String, ModelPrice>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self { models: HashMap::new() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.store.path, ".swarmctl/state.json");
        assert_eq!(config.semaphore.default_concurrency, 1);
        assert_eq!(config.executor.pause_poll_interval_ms, 1000);
        assert_eq!(config.executor.launch_stagger_ms, 5000);
        assert!(config.pricing.models.is_empty());
    }
}
