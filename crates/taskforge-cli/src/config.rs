//! Configuration resolution for `taskforge`.
//!
//! Provides a TOML-based config file at `~/.config/taskforge/config.toml`
//! and a resolution chain for every key in the recognised set: env var
//! overrides file value overrides default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use taskforge_core::priority::PriorityWeights;
use taskforge_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub priority: PrioritySection,
    #[serde(default)]
    pub prune: PruneSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub path: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub max_concurrent_agents: Option<usize>,
    pub poll_interval_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
    pub health_check_interval_seconds: Option<u64>,
    pub stall_detection_interval_seconds: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_retries_default: Option<i32>,
    pub initial_backoff_seconds: Option<u64>,
    pub max_backoff_seconds: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter_bool: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PrioritySection {
    pub weight_base: Option<f64>,
    pub weight_depth: Option<f64>,
    pub weight_urgency: Option<f64>,
    pub weight_blocking: Option<f64>,
    pub weight_source: Option<f64>,
    pub depth_max: Option<f64>,
    pub blocking_max: Option<f64>,
    pub urgency_scale_seconds: Option<f64>,
    pub resolver_cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PruneSection {
    pub vacuum_conditional_threshold: Option<i64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the taskforge config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/taskforge` or
/// `~/.config/taskforge`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("taskforge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("taskforge")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file, if present. A missing file is not an
/// error -- every key falls back to its default.
pub fn load_config() -> Option<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&contents).ok()
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration: every recognised key, env var
/// overrides file value overrides built-in default.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub max_concurrent_agents: usize,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
    pub stall_detection_interval: Duration,
    pub max_retries_default: i32,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub retry_backoff_multiplier: f64,
    pub retry_jitter: bool,
    pub priority_weights: PriorityWeights,
    pub priority_resolver_cache_ttl: Duration,
    pub vacuum_conditional_threshold: i64,
}

/// Parse `std::env::var(key)` as `T`, falling back to `file_value`, falling
/// back to `default`. Env and file values that fail to parse are silently
/// skipped in favour of the next tier -- this mirrors `DbConfig::from_env`'s
/// forgiving style rather than hard-erroring on a malformed override.
fn resolve<T: FromStr>(key: &str, file_value: Option<T>, default: T) -> T {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(parsed) = raw.parse() {
            return parsed;
        }
    }
    file_value.unwrap_or(default)
}

impl AppConfig {
    /// Resolve every key using: CLI flag (where the caller passes one) >
    /// env var (`TASKFORGE_<KEY>`) > config file > built-in default.
    pub fn resolve(cli_database_path: Option<&str>) -> Self {
        let file = load_config();

        let database_path = cli_database_path
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let file_path = file.as_ref().and_then(|f| f.database.path.clone());
                resolve("TASKFORGE_DATABASE_PATH", file_path, DbConfig::default_path().display().to_string())
                    .into()
            });

        let scheduler = file.as_ref().map(|f| &f.scheduler);
        let retry = file.as_ref().map(|f| &f.retry);
        let priority = file.as_ref().map(|f| &f.priority);
        let prune = file.as_ref().map(|f| &f.prune);

        let max_concurrent_agents = resolve(
            "TASKFORGE_MAX_CONCURRENT_AGENTS",
            scheduler.and_then(|s| s.max_concurrent_agents),
            8,
        );
        let poll_interval_seconds = resolve(
            "TASKFORGE_POLL_INTERVAL_SECONDS",
            scheduler.and_then(|s| s.poll_interval_seconds),
            2,
        );
        let idle_timeout_seconds = resolve(
            "TASKFORGE_IDLE_TIMEOUT_SECONDS",
            scheduler.and_then(|s| s.idle_timeout_seconds),
            300,
        );
        let health_check_interval_seconds = resolve(
            "TASKFORGE_HEALTH_CHECK_INTERVAL_SECONDS",
            scheduler.and_then(|s| s.health_check_interval_seconds),
            30,
        );
        let stall_detection_interval_seconds = resolve(
            "TASKFORGE_STALL_DETECTION_INTERVAL_SECONDS",
            scheduler.and_then(|s| s.stall_detection_interval_seconds),
            60,
        );

        let max_retries_default = resolve(
            "TASKFORGE_MAX_RETRIES_DEFAULT",
            retry.and_then(|r| r.max_retries_default),
            3,
        );
        let retry_initial_backoff_seconds = resolve(
            "TASKFORGE_RETRY_INITIAL_BACKOFF_SECONDS",
            retry.and_then(|r| r.initial_backoff_seconds),
            1,
        );
        let retry_max_backoff_seconds = resolve(
            "TASKFORGE_RETRY_MAX_BACKOFF_SECONDS",
            retry.and_then(|r| r.max_backoff_seconds),
            300,
        );
        let retry_backoff_multiplier = resolve(
            "TASKFORGE_RETRY_BACKOFF_MULTIPLIER",
            retry.and_then(|r| r.backoff_multiplier),
            2.0,
        );
        let retry_jitter_bool = resolve(
            "TASKFORGE_RETRY_JITTER_BOOL",
            retry.and_then(|r| r.jitter_bool),
            true,
        );

        let defaults = PriorityWeights::default();
        let weight_base = resolve("TASKFORGE_PRIORITY_WEIGHT_BASE", priority.and_then(|p| p.weight_base), defaults.base);
        let weight_depth = resolve("TASKFORGE_PRIORITY_WEIGHT_DEPTH", priority.and_then(|p| p.weight_depth), defaults.depth);
        let weight_urgency = resolve("TASKFORGE_PRIORITY_WEIGHT_URGENCY", priority.and_then(|p| p.weight_urgency), defaults.urgency);
        let weight_blocking = resolve("TASKFORGE_PRIORITY_WEIGHT_BLOCKING", priority.and_then(|p| p.weight_blocking), defaults.blocking);
        let weight_source = resolve("TASKFORGE_PRIORITY_WEIGHT_SOURCE", priority.and_then(|p| p.weight_source), defaults.source);
        let priority_depth_max = resolve("TASKFORGE_PRIORITY_DEPTH_MAX", priority.and_then(|p| p.depth_max), defaults.depth_max);
        let priority_blocking_max = resolve("TASKFORGE_PRIORITY_BLOCKING_MAX", priority.and_then(|p| p.blocking_max), defaults.blocking_max);
        let priority_urgency_scale_seconds = resolve(
            "TASKFORGE_PRIORITY_URGENCY_SCALE_SECONDS",
            priority.and_then(|p| p.urgency_scale_seconds),
            defaults.urgency_scale_seconds,
        );
        let priority_resolver_cache_ttl_seconds = resolve(
            "TASKFORGE_PRIORITY_RESOLVER_CACHE_TTL_SECONDS",
            priority.and_then(|p| p.resolver_cache_ttl_seconds),
            60,
        );

        let vacuum_conditional_threshold = resolve(
            "TASKFORGE_VACUUM_CONDITIONAL_THRESHOLD",
            prune.and_then(|p| p.vacuum_conditional_threshold),
            100,
        );

        Self {
            database_path,
            max_concurrent_agents,
            poll_interval: Duration::from_secs(poll_interval_seconds),
            idle_timeout: Duration::from_secs(idle_timeout_seconds),
            health_check_interval: Duration::from_secs(health_check_interval_seconds),
            stall_detection_interval: Duration::from_secs(stall_detection_interval_seconds),
            max_retries_default,
            retry_initial_backoff: Duration::from_secs(retry_initial_backoff_seconds),
            retry_max_backoff: Duration::from_secs(retry_max_backoff_seconds),
            retry_backoff_multiplier,
            retry_jitter: retry_jitter_bool,
            priority_weights: PriorityWeights {
                base: weight_base,
                depth: weight_depth,
                urgency: weight_urgency,
                blocking: weight_blocking,
                source: weight_source,
                depth_max: priority_depth_max,
                blocking_max: priority_blocking_max,
                urgency_scale_seconds: priority_urgency_scale_seconds,
            },
            priority_resolver_cache_ttl: Duration::from_secs(priority_resolver_cache_ttl_seconds),
            vacuum_conditional_threshold,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    /// Serialises tests that mutate process-wide env vars.
    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("TASKFORGE_MAX_CONCURRENT_AGENTS") };
        let cfg = AppConfig::resolve(None);
        assert_eq!(cfg.max_concurrent_agents, 8);
        assert_eq!(cfg.max_retries_default, 3);
        assert!(cfg.priority_weights.weights_sum_to_one());
    }

    #[test]
    fn env_var_overrides_default() {
        let _lock = lock_env();
        unsafe { std::env::set_var("TASKFORGE_MAX_CONCURRENT_AGENTS", "16") };
        let cfg = AppConfig::resolve(None);
        assert_eq!(cfg.max_concurrent_agents, 16);
        unsafe { std::env::remove_var("TASKFORGE_MAX_CONCURRENT_AGENTS") };
    }

    #[test]
    fn cli_flag_overrides_everything_for_database_path() {
        let _lock = lock_env();
        unsafe { std::env::set_var("TASKFORGE_DATABASE_PATH", "/tmp/env.db") };
        let cfg = AppConfig::resolve(Some("/tmp/cli.db"));
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/cli.db"));
        unsafe { std::env::remove_var("TASKFORGE_DATABASE_PATH") };
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(path.ends_with("taskforge/config.toml"), "unexpected config path: {}", path.display());
    }
}
