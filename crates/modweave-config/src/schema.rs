//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Orchestrator limits and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum nesting depth of composed modules.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Whole-run budget applied when a call does not pass one.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Default budget for a dependency without its own `timeout_ms`.
    #[serde(default)]
    pub dependency_timeout_ms: Option<u64>,

    /// Cap on concurrent runner calls (0 = unbounded).
    #[serde(default)]
    pub max_concurrency: usize,

    /// Paths handed to the module loader.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

fn default_max_depth() -> usize {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            timeout_ms: None,
            dependency_timeout_ms: None,
            max_concurrency: 0,
            search_paths: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}
