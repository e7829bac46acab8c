//! Plugin directory layout and the JSON shapes of generated artifacts.

use crate::core::contract::Contract;
use crate::core::error::PluginGateError;
use crate::core::spec::PluginSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

pub const SPEC_FILE: &str = "plugin.spec.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const POLICY_SNAPSHOT_FILE: &str = "policy_snapshot.json";
pub const LEDGER_CONTRACT_FILE: &str = "ledger_contract.json";
pub const HANDLER_FILE: &str = "handler.sh";
pub const README_FILE: &str = "README_PLUGIN.md";
pub const HEALTHCHECK_FILE: &str = "healthcheck.md";

/// Every file a certified plugin directory must contain.
pub const REQUIRED_FILES: [&str; 7] = [
    SPEC_FILE,
    MANIFEST_FILE,
    POLICY_SNAPSHOT_FILE,
    LEDGER_CONTRACT_FILE,
    HANDLER_FILE,
    README_FILE,
    HEALTHCHECK_FILE,
];

/// Files derived from the spec by the generator (everything except the spec).
pub const GENERATED_FILES: [&str; 6] = [
    MANIFEST_FILE,
    POLICY_SNAPSHOT_FILE,
    LEDGER_CONTRACT_FILE,
    HANDLER_FILE,
    README_FILE,
    HEALTHCHECK_FILE,
];

/// Fields a runtime must log for every handler invocation.
pub const LEDGER_REQUIRED_FIELDS: [&str; 7] = [
    "ulid",
    "ts",
    "event",
    "policy_version",
    "inputs",
    "actions",
    "status",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub handles_event: String,
    pub generated_at: String,
    pub contract_version: String,
}

impl Manifest {
    pub fn build(spec: &PluginSpec, contract: &Contract, generated_at: String) -> Self {
        Manifest {
            name: spec.name.clone(),
            version: spec.version.clone(),
            handles_event: spec.handles_event.clone(),
            generated_at,
            contract_version: contract.contract_version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub policy: Map<String, Value>,
    pub contract_allowed_actions: Vec<String>,
    pub contract_allowed_events: Vec<String>,
}

impl PolicySnapshot {
    pub fn build(spec: &PluginSpec, contract: &Contract) -> Self {
        PolicySnapshot {
            policy: spec.policy.clone(),
            contract_allowed_actions: contract.action_names(),
            contract_allowed_events: contract.event_names(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerContract {
    pub required: Vec<String>,
}

impl Default for LedgerContract {
    fn default() -> Self {
        LedgerContract {
            required: LEDGER_REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Pretty JSON with a trailing newline; the on-disk form of every JSON artifact.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, PluginGateError> {
    let mut out = serde_json::to_string_pretty(value)?;
    out.push('\n');
    Ok(out)
}

pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, PluginGateError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
