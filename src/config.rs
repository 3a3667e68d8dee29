//! Engine configuration, loaded from YAML with environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const ENV_MAX_STEPS: &str = "BPMN_FLOW_MAX_STEPS";
pub const ENV_RUN_AUTOMATED: &str = "BPMN_FLOW_RUN_AUTOMATED";
pub const ENV_LOG: &str = "BPMN_FLOW_LOG";

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Runtime knobs for a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Step dispatches allowed within one public operation before it fails
    /// with a graph definition error.
    pub max_steps_per_operation: usize,
    /// Run service, script and business-rule tasks as soon as they are
    /// entered. When off they wait until `run_automated_tasks`.
    pub run_automated_tasks_on_enter: bool,
    /// `tracing-subscriber` filter directive used by the CLI.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_operation: 500,
            run_automated_tasks_on_enter: true,
            log_filter: "bpmn_flow=info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).context("Parsing engine configuration")
    }

    /// Load from a YAML file. Missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    /// Apply `BPMN_FLOW_*` environment overrides. Unparseable values are
    /// logged and ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_MAX_STEPS) {
            match raw.trim().parse::<usize>() {
                Ok(value) if value > 0 => self.max_steps_per_operation = value,
                _ => warn!(variable = ENV_MAX_STEPS, value = %raw, "ignoring invalid override"),
            }
        }
        if let Some(raw) = lookup(ENV_RUN_AUTOMATED) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.run_automated_tasks_on_enter = true,
                "0" | "false" | "no" => self.run_automated_tasks_on_enter = false,
                _ => warn!(variable = ENV_RUN_AUTOMATED, value = %raw, "ignoring invalid override"),
            }
        }
        if let Some(raw) = lookup(ENV_LOG) {
            if !raw.trim().is_empty() {
                self.log_filter = raw;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_keys_use_defaults() {
        let config = EngineConfig::from_yaml("max_steps_per_operation: 40\n").unwrap();
        assert_eq!(config.max_steps_per_operation, 40);
        assert!(config.run_automated_tasks_on_enter);
        assert_eq!(config.log_filter, "bpmn_flow=info");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "run_automated_tasks_on_enter: false").unwrap();
        writeln!(file, "log_filter: bpmn_flow=debug").unwrap();
        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert!(!config.run_automated_tasks_on_enter);
        assert_eq!(config.log_filter, "bpmn_flow=debug");
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = EngineConfig::load_from_file(Path::new("/nonexistent/engine.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/engine.yaml"));
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            (ENV_MAX_STEPS, "not-a-number"),
            (ENV_RUN_AUTOMATED, "no"),
            (ENV_LOG, "debug"),
        ]
        .into();
        let config = EngineConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.max_steps_per_operation, 500);
        assert!(!config.run_automated_tasks_on_enter);
        assert_eq!(config.log_filter, "debug");
    }
}
