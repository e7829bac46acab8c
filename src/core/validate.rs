//! Plugin directory certification.
//!
//! `validate_plugin` re-derives what should be true of a plugin directory from
//! its spec and the current contract and checks it against what is on disk.
//! Stages run in a fixed order and every failure is accumulated; a failure in
//! one stage never hides failures in another. The directory is never written.
//!
//! | Stage               | Failure kinds                                   |
//! |---------------------|-------------------------------------------------|
//! | structure           | `ArtifactMissingError`                          |
//! | spec                | `SpecFieldError`, `InvalidNameError`, ...       |
//! | consistency         | `ConsistencyError`                              |
//! | contract_membership | `UnknownLifecycleEventError`                    |
//! | static_scan         | `EditableRegionError`, `ForbiddenPatternError`  |
//! | smoke_test          | `HandlerExecutionError`, `HandlerTimeoutError`, `ProposalContractError` |
//!
//! Warnings (contract version drift, contract narrowing, skipped smoke test)
//! are reported but never change the verdict. A forbidden-pattern hit does not
//! skip the smoke test, so a flagged handler still gets its behavior reported.

use crate::core::artifacts::{
    HANDLER_FILE, LEDGER_CONTRACT_FILE, LEDGER_REQUIRED_FIELDS, MANIFEST_FILE,
    POLICY_SNAPSHOT_FILE, REQUIRED_FILES, SPEC_FILE,
};
use crate::core::config::SmokeTestOptions;
use crate::core::contract::Contract;
use crate::core::error::PluginGateError;
use crate::core::output;
use crate::core::sandbox;
use crate::core::scan;
use crate::core::spec::{self, PluginSpec};
use serde::Serialize;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Structure,
    Spec,
    Consistency,
    ContractMembership,
    StaticScan,
    SmokeTest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Structure => "structure",
            Stage::Spec => "spec",
            Stage::Consistency => "consistency",
            Stage::ContractMembership => "contract_membership",
            Stage::StaticScan => "static_scan",
            Stage::SmokeTest => "smoke_test",
        }
    }
}

#[derive(Debug)]
pub struct ValidationIssue {
    pub stage: Stage,
    pub error: PluginGateError,
}

impl ValidationIssue {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

#[derive(Debug)]
pub struct ValidationReport {
    pub plugin_dir: PathBuf,
    pub failures: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub passed_checks: u32,
    /// sha256 of the handler as scanned and executed, when present.
    pub handler_sha256: Option<String>,
}

impl ValidationReport {
    fn new(plugin_dir: &Path) -> Self {
        ValidationReport {
            plugin_dir: plugin_dir.to_path_buf(),
            failures: Vec::new(),
            warnings: Vec::new(),
            passed_checks: 0,
            handler_sha256: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_valid() { 0 } else { 1 }
    }

    /// Failures of one taxonomy kind, e.g. `"ConsistencyError"`.
    pub fn failures_of_kind(&self, kind: &str) -> Vec<&ValidationIssue> {
        self.failures.iter().filter(|f| f.kind() == kind).collect()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "plugin_dir": self.plugin_dir.display().to_string(),
            "valid": self.is_valid(),
            "passed_checks": self.passed_checks,
            "handler_sha256": self.handler_sha256,
            "failures": self.failures.iter().map(|f| json!({
                "stage": f.stage,
                "kind": f.kind(),
                "message": f.message(),
            })).collect::<Vec<_>>(),
            "warnings": self.warnings,
        })
    }

    fn pass(&mut self, check: &str) {
        self.passed_checks += 1;
        tracing::trace!(check, "pass");
    }

    fn fail(&mut self, stage: Stage, error: impl Into<PluginGateError>) {
        let error = error.into();
        tracing::debug!(stage = stage.as_str(), kind = error.kind(), "fail");
        self.failures.push(ValidationIssue { stage, error });
    }

    fn warn(&mut self, message: String) {
        tracing::debug!(%message, "warn");
        self.warnings.push(message);
    }
}

/// Validate the plugin at `plugin_dir` against `contract`.
///
/// Errors only when `plugin_dir` is not a directory; every defect inside it is
/// reported through the returned `ValidationReport`.
pub fn validate_plugin(
    plugin_dir: &Path,
    contract: &Contract,
    smoke: &SmokeTestOptions,
) -> Result<ValidationReport, PluginGateError> {
    if !plugin_dir.is_dir() {
        return Err(PluginGateError::PathError(format!(
            "plugin directory {} does not exist or is not a directory",
            plugin_dir.display()
        )));
    }
    let mut report = ValidationReport::new(plugin_dir);

    tracing::debug!(dir = %plugin_dir.display(), "stage: structure");
    check_structure(plugin_dir, &mut report);

    tracing::debug!("stage: spec");
    let plugin_spec = check_spec(plugin_dir, &mut report);

    tracing::debug!("stage: consistency");
    check_consistency(plugin_dir, plugin_spec.as_ref(), contract, &mut report);

    tracing::debug!("stage: contract_membership");
    if let Some(plugin_spec) = &plugin_spec {
        match spec::check_lifecycle_event(plugin_spec, contract) {
            Ok(()) => report.pass("handles_event is a contract lifecycle event"),
            Err(e) => report.fail(Stage::ContractMembership, e),
        }
    }

    tracing::debug!("stage: static_scan");
    check_static_scan(plugin_dir, &mut report);

    tracing::debug!("stage: smoke_test");
    let handler = plugin_dir.join(HANDLER_FILE);
    match (&plugin_spec, handler.is_file()) {
        (_, false) => {}
        (None, true) => {
            report.warn("smoke test skipped: plugin.spec.json is missing or unreadable".to_string())
        }
        (Some(plugin_spec), true) => {
            let opts = smoke_options(plugin_spec, smoke);
            let failures =
                sandbox::smoke_test(&handler, &plugin_spec.handles_event, contract, &opts);
            if failures.is_empty() {
                report.pass("handler smoke test");
            }
            for failure in failures {
                report.fail(Stage::SmokeTest, failure);
            }
        }
    }

    tracing::info!(
        dir = %plugin_dir.display(),
        valid = report.is_valid(),
        failures = report.failures.len(),
        warnings = report.warnings.len(),
        "validation finished"
    );
    Ok(report)
}

/// The plugin's own `timeout_seconds` wins over tool configuration when it is
/// in range; an out-of-range value has already failed the spec stage.
fn smoke_options(plugin_spec: &PluginSpec, base: &SmokeTestOptions) -> SmokeTestOptions {
    let mut opts = base.clone();
    if let Some(secs) = plugin_spec.timeout_seconds
        && (1..=spec::MAX_TIMEOUT_SECONDS).contains(&secs)
    {
        opts.timeout = Duration::from_secs(secs.unsigned_abs());
    }
    opts
}

fn check_structure(dir: &Path, report: &mut ValidationReport) {
    for name in REQUIRED_FILES {
        if dir.join(name).is_file() {
            report.pass(name);
        } else {
            report.fail(
                Stage::Structure,
                PluginGateError::ArtifactMissing {
                    name: name.to_string(),
                    dir: dir.display().to_string(),
                },
            );
        }
    }
}

/// Parse and field-check the on-disk spec. Returns the spec when its required
/// fields are all present, so later stages have something to compare against.
fn check_spec(dir: &Path, report: &mut ValidationReport) -> Option<PluginSpec> {
    let path = dir.join(SPEC_FILE);
    if !path.is_file() {
        return None;
    }
    let plugin_spec = match spec::load_spec(&path) {
        Ok(s) => s,
        Err(e) => {
            report.fail(Stage::Spec, e);
            return None;
        }
    };
    match spec::validate_spec_fields(&plugin_spec) {
        Ok(()) => report.pass("spec fields"),
        Err(e) => report.fail(Stage::Spec, e),
    }
    plugin_spec
        .missing_fields()
        .is_empty()
        .then_some(plugin_spec)
}

fn inconsistency(artifact: &str, field: &str, expected: String, found: String) -> PluginGateError {
    PluginGateError::Consistency {
        artifact: artifact.to_string(),
        field: field.to_string(),
        expected,
        found,
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "missing".to_string(),
        Some(Value::String(s)) => format!("'{}'", s),
        Some(other) => output::compact_line(&other.to_string(), 60),
    }
}

/// Read a JSON artifact that is present. Unreadable or non-object documents are
/// reported as consistency failures and yield `None`.
fn read_artifact(dir: &Path, name: &str, report: &mut ValidationReport) -> Option<Value> {
    let path = dir.join(name);
    if !path.is_file() {
        return None;
    }
    let parsed = fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(value) if value.is_object() => Some(value),
        Ok(value) => {
            report.fail(
                Stage::Consistency,
                inconsistency(
                    name,
                    "<document>",
                    "a JSON object".to_string(),
                    output::json_type_name(&value).to_string(),
                ),
            );
            None
        }
        Err(reason) => {
            report.fail(
                Stage::Consistency,
                inconsistency(
                    name,
                    "<document>",
                    "valid JSON".to_string(),
                    format!("unparseable ({})", output::compact_line(&reason, 80)),
                ),
            );
            None
        }
    }
}

fn string_array(value: Option<&Value>) -> Option<Vec<String>> {
    value?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn check_consistency(
    dir: &Path,
    plugin_spec: Option<&PluginSpec>,
    contract: &Contract,
    report: &mut ValidationReport,
) {
    if let Some(manifest) = read_artifact(dir, MANIFEST_FILE, report) {
        if let Some(plugin_spec) = plugin_spec {
            let expected = [
                ("name", &plugin_spec.name),
                ("version", &plugin_spec.version),
                ("handles_event", &plugin_spec.handles_event),
            ];
            for (field, want) in expected {
                let found = manifest.get(field);
                if found.and_then(Value::as_str) == Some(want.as_str()) {
                    report.pass(field);
                } else {
                    report.fail(
                        Stage::Consistency,
                        inconsistency(MANIFEST_FILE, field, format!("'{}'", want), describe(found)),
                    );
                }
            }
        }
        match manifest.get("contract_version").and_then(Value::as_str) {
            Some(v) if v == contract.contract_version => {}
            other => report.warn(format!(
                "{} was generated against contract version {} but the current contract is {}; regenerate the plugin",
                MANIFEST_FILE,
                other.unwrap_or("(none)"),
                contract.contract_version
            )),
        }
    }

    if let Some(ledger) = read_artifact(dir, LEDGER_CONTRACT_FILE, report) {
        match string_array(ledger.get("required")) {
            None => report.fail(
                Stage::Consistency,
                inconsistency(
                    LEDGER_CONTRACT_FILE,
                    "required",
                    "an array of field names".to_string(),
                    describe(ledger.get("required")),
                ),
            ),
            Some(listed) => {
                let missing: Vec<&str> = LEDGER_REQUIRED_FIELDS
                    .into_iter()
                    .filter(|f| !listed.iter().any(|l| l == f))
                    .collect();
                if missing.is_empty() {
                    report.pass("ledger contract fields");
                } else {
                    report.fail(
                        Stage::Consistency,
                        inconsistency(
                            LEDGER_CONTRACT_FILE,
                            "required",
                            format!("a list including {}", missing.join(", ")),
                            format!("[{}]", listed.join(", ")),
                        ),
                    );
                }
            }
        }
    }

    if let Some(snapshot) = read_artifact(dir, POLICY_SNAPSHOT_FILE, report) {
        let mut shape_ok = true;
        if !snapshot.get("policy").is_some_and(Value::is_object) {
            shape_ok = false;
            report.fail(
                Stage::Consistency,
                inconsistency(
                    POLICY_SNAPSHOT_FILE,
                    "policy",
                    "an object".to_string(),
                    describe(snapshot.get("policy")),
                ),
            );
        }
        for (field, current) in [
            ("contract_allowed_actions", contract.action_names()),
            ("contract_allowed_events", contract.event_names()),
        ] {
            match string_array(snapshot.get(field)) {
                Some(listed) => {
                    let dropped: Vec<&String> =
                        listed.iter().filter(|l| !current.contains(*l)).collect();
                    if !dropped.is_empty() {
                        report.warn(format!(
                            "{} {} lists {} which the current contract no longer allows",
                            POLICY_SNAPSHOT_FILE,
                            field,
                            dropped
                                .iter()
                                .map(|d| format!("'{}'", d))
                                .collect::<Vec<_>>()
                                .join(", ")
                        ));
                    }
                }
                None => {
                    shape_ok = false;
                    report.fail(
                        Stage::Consistency,
                        inconsistency(
                            POLICY_SNAPSHOT_FILE,
                            field,
                            "an array of strings".to_string(),
                            describe(snapshot.get(field)),
                        ),
                    );
                }
            }
        }
        if shape_ok {
            report.pass("policy snapshot shape");
        }
    }
}

fn check_static_scan(dir: &Path, report: &mut ValidationReport) {
    let path = dir.join(HANDLER_FILE);
    if !path.is_file() {
        return;
    }
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            report.fail(Stage::StaticScan, e);
            return;
        }
    };
    report.handler_sha256 = Some(sandbox::sha256_hex(&bytes));
    let source = String::from_utf8_lossy(&bytes);

    let marker_errors = scan::check_region_markers(HANDLER_FILE, &source);
    if marker_errors.is_empty() {
        report.pass("editable region markers");
    }
    for e in marker_errors {
        report.fail(Stage::StaticScan, e);
    }

    let hits = scan::scan_forbidden_patterns(HANDLER_FILE, &source);
    if hits.is_empty() {
        report.pass("forbidden pattern scan");
    }
    for hit in hits {
        report.fail(Stage::StaticScan, hit);
    }
}
