//! Tool configuration.
//!
//! Resolution order, lowest to highest: built-in defaults, `plugin-gate.toml`
//! in the working directory, `PLUGIN_GATE_*` environment variables, CLI flags.
//! A missing config file is not an error.

use crate::core::error::PluginGateError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "plugin-gate.toml";
pub const DEFAULT_CONTRACT_PATH: &str = "contracts/plugin_contract.md";
pub const DEFAULT_INTERPRETER: &str = "sh";
pub const DEFAULT_SMOKE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub const ENV_CONTRACT: &str = "PLUGIN_GATE_CONTRACT";
pub const ENV_SMOKE_TIMEOUT: &str = "PLUGIN_GATE_SMOKE_TIMEOUT_SECS";
pub const ENV_INTERPRETER: &str = "PLUGIN_GATE_INTERPRETER";
pub const ENV_LOG: &str = "PLUGIN_GATE_LOG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    contract: Option<PathBuf>,
    #[serde(default)]
    smoke_test: SmokeTestSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SmokeTestSection {
    interpreter: Option<String>,
    timeout_seconds: Option<u64>,
    max_output_bytes: Option<usize>,
}

/// Settings for the dynamic smoke test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeTestOptions {
    /// Program that runs the handler script (`<interpreter> <handler path>`).
    pub interpreter: String,
    pub timeout: Duration,
    /// Cap on captured stdout/stderr, each.
    pub max_output_bytes: usize,
}

impl Default for SmokeTestOptions {
    fn default() -> Self {
        SmokeTestOptions {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            timeout: Duration::from_secs(DEFAULT_SMOKE_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub contract_path: PathBuf,
    pub smoke_test: SmokeTestOptions,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            contract_path: PathBuf::from(DEFAULT_CONTRACT_PATH),
            smoke_test: SmokeTestOptions::default(),
        }
    }
}

impl GateConfig {
    /// Defaults, then `<dir>/plugin-gate.toml`, then the process environment.
    pub fn load(dir: &Path) -> Result<Self, PluginGateError> {
        let mut config = GateConfig::default();
        config.apply_file(&dir.join(CONFIG_FILE_NAME))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), PluginGateError> {
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content)
            .map_err(|e| PluginGateError::ConfigError(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "applying config file");

        if let Some(contract) = file.contract {
            // Relative contract paths are anchored at the config file's directory.
            self.contract_path = match path.parent() {
                Some(parent) if contract.is_relative() => parent.join(contract),
                _ => contract,
            };
        }
        if let Some(interpreter) = file.smoke_test.interpreter {
            self.smoke_test.interpreter = interpreter;
        }
        if let Some(secs) = file.smoke_test.timeout_seconds {
            self.smoke_test.timeout = checked_timeout(secs, CONFIG_FILE_NAME)?;
        }
        if let Some(max) = file.smoke_test.max_output_bytes {
            self.smoke_test.max_output_bytes = max;
        }
        Ok(())
    }

    /// Apply `PLUGIN_GATE_*` overrides using `lookup` (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), PluginGateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(contract) = lookup(ENV_CONTRACT).filter(|v| !v.trim().is_empty()) {
            self.contract_path = PathBuf::from(contract);
        }
        if let Some(interpreter) = lookup(ENV_INTERPRETER).filter(|v| !v.trim().is_empty()) {
            self.smoke_test.interpreter = interpreter;
        }
        if let Some(raw) = lookup(ENV_SMOKE_TIMEOUT) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                PluginGateError::ConfigError(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    ENV_SMOKE_TIMEOUT, raw
                ))
            })?;
            self.smoke_test.timeout = checked_timeout(secs, ENV_SMOKE_TIMEOUT)?;
        }
        Ok(())
    }

    /// CLI flag overrides.
    pub fn with_overrides(
        mut self,
        contract: Option<PathBuf>,
        timeout_secs: Option<u64>,
    ) -> Result<Self, PluginGateError> {
        if let Some(contract) = contract {
            self.contract_path = contract;
        }
        if let Some(secs) = timeout_secs {
            self.smoke_test.timeout = checked_timeout(secs, "--timeout-secs")?;
        }
        Ok(self)
    }
}

fn checked_timeout(secs: u64, source: &str) -> Result<Duration, PluginGateError> {
    if secs == 0 {
        return Err(PluginGateError::ConfigError(format!(
            "{} must be at least 1 second",
            source
        )));
    }
    Ok(Duration::from_secs(secs))
}
