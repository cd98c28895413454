/// Configuration management for the flowstate host
///
/// Handles server binding, storage locations, engine limits and the scheduler
/// clock. Every value can be overridden through a `FLOWSTATE_*` environment
/// variable.

use crate::runtime::engine::{EngineConfig, DEFAULT_MAX_STATE_VISITS};
use crate::runtime::scheduler::DEFAULT_TICK_SCHEDULE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub engine: EngineSettings,
    pub scheduler: SchedulerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `runs.db`
    pub data_dir: PathBuf,
    /// Directory of JSON workflow manifests loaded at startup
    pub workflows_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub max_state_visits: usize,
    /// Applied to tasks without their own timeout
    pub task_timeout_ms: Option<u64>,
    /// Reject workflows with unreachable states
    pub strict_reachability: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Six-field cron cadence of the tick clock
    pub tick_schedule: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl Config {
    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            server: ServerConfig {
                host: var("FLOWSTATE_HOST", "0.0.0.0"),
                port: var("FLOWSTATE_PORT", "3004").parse().unwrap_or(3004),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from(var("FLOWSTATE_DATA_DIR", "data")),
                workflows_dir: PathBuf::from(var("FLOWSTATE_WORKFLOWS_DIR", "workflows")),
            },
            engine: EngineSettings {
                max_state_visits: lookup("FLOWSTATE_MAX_STATE_VISITS")
                    .and_then(|v| v.parse().ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(DEFAULT_MAX_STATE_VISITS),
                task_timeout_ms: lookup("FLOWSTATE_TASK_TIMEOUT_MS").and_then(|v| v.parse().ok()),
                strict_reachability: parse_flag(lookup("FLOWSTATE_STRICT_REACHABILITY"), false),
            },
            scheduler: SchedulerConfig {
                enabled: parse_flag(lookup("FLOWSTATE_SCHEDULER_ENABLED"), true),
                tick_schedule: var("FLOWSTATE_TICK_SCHEDULE", DEFAULT_TICK_SCHEDULE),
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_state_visits: self.engine.max_state_visits,
            default_task_timeout: self.engine.task_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("TRUE") | Some("yes") => true,
        Some("0") | Some("false") | Some("FALSE") | Some("no") => false,
        _ => default,
    }
}
