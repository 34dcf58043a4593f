//! Daemon configuration
//!
//! Defaults come from the library; every knob is overridable through
//! `FORGE_*` environment variables, with CLI flags taking final precedence.

use std::path::PathBuf;

use orchestration::{HealthConfig, MergeConfig};

/// Top-level daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Repository the stewards operate on
    pub repo_root: PathBuf,
    /// Cadence of merge-pipeline batch scans
    /// Populated from `FORGE_MERGE_SCAN_INTERVAL_MS` (default: 30s)
    pub merge_scan_interval_ms: u64,
    pub health: HealthConfig,
    pub merge: MergeConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let mut health = HealthConfig::default();
        if let Some(interval) = env_u64("FORGE_HEALTH_CHECK_INTERVAL_MS") {
            health.health_check_interval_ms = interval;
        }
        if let Some(threshold) = env_u64("FORGE_NO_OUTPUT_THRESHOLD_MS") {
            health.no_output_threshold_ms = threshold;
        }

        let mut merge = MergeConfig::default();
        if let Ok(command) = std::env::var("FORGE_TEST_COMMAND") {
            if !command.is_empty() {
                merge.test_command = command;
            }
        }
        if let Some(timeout) = env_u64("FORGE_TEST_TIMEOUT_MS") {
            merge.test_timeout_ms = timeout;
        }
        if let Ok(target) = std::env::var("FORGE_TARGET_BRANCH") {
            if !target.is_empty() {
                merge.target_branch = Some(target);
            }
        }

        Self {
            repo_root: std::env::var("FORGE_REPO_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            merge_scan_interval_ms: env_u64("FORGE_MERGE_SCAN_INTERVAL_MS").unwrap_or(30_000),
            health,
            merge,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        std::env::remove_var("FORGE_MERGE_SCAN_INTERVAL_MS");
        std::env::remove_var("FORGE_TEST_COMMAND");
        let config = DaemonConfig::default();
        assert_eq!(config.merge_scan_interval_ms, 30_000);
        assert_eq!(config.merge.test_command, "cargo test");
        assert_eq!(config.health.health_check_interval_ms, 60_000);
    }
}
