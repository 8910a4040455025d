use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings for one script session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interpreter operations granted per host tick.
    pub steps_per_tick: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    /// Script log messages allowed per tick before further ones are dropped.
    pub max_logs_per_tick: u32,
    /// Stack size of the script worker thread, in bytes. Must fit `max_call_levels`
    /// nested calls in unoptimised builds.
    pub worker_stack_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            steps_per_tick: 10,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_string_size: 10_000,
            max_array_size: 10_000,
            max_map_size: 500,
            max_logs_per_tick: 100,
            worker_stack_size: 32 * 1024 * 1024,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse session config")
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&contents)
    }
}
