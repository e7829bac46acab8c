//! `plugin.spec.json`: the human-authored source of truth for one plugin.
//!
//! The tool only ever reads a spec. Validation is split in two so the plugin
//! validator can report field problems and contract membership as separate
//! stages; `validate_spec` runs both in order for the generator.

use crate::core::contract::Contract;
use crate::core::error::{PluginGateError, SpecFieldError};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

pub const REQUIRED_SPEC_FIELDS: [&str; 3] = ["name", "version", "handles_event"];
pub const MAX_TIMEOUT_SECONDS: i64 = 120;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid name regex"));
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid version regex"));

/// Parsed plugin spec. Required fields are kept as read (possibly empty) so
/// that `validate_spec_fields` can report them in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginSpec {
    pub name: String,
    pub version: String,
    pub handles_event: String,
    pub description: Option<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub policy: Map<String, Value>,
    pub timeout_seconds: Option<i64>,
    #[serde(skip)]
    missing: Vec<&'static str>,
}

impl PluginSpec {
    /// Required fields absent from the source document, in declaration order.
    pub fn missing_fields(&self) -> &[&'static str] {
        &self.missing
    }
}

pub fn load_spec(path: &Path) -> Result<PluginSpec, PluginGateError> {
    let content = fs::read_to_string(path).map_err(|e| {
        PluginGateError::PathError(format!("cannot read spec {}: {}", path.display(), e))
    })?;
    parse_spec(&content)
}

pub fn parse_spec(content: &str) -> Result<PluginSpec, PluginGateError> {
    let value: Value = serde_json::from_str(content)?;
    let obj = value.as_object().ok_or_else(|| SpecFieldError::WrongType {
        field: "<root>".to_string(),
        expected: "a JSON object",
    })?;

    let mut missing = Vec::new();
    let mut required = |field: &'static str| -> Result<String, SpecFieldError> {
        match obj.get(field) {
            None | Some(Value::Null) => {
                missing.push(field);
                Ok(String::new())
            }
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(wrong_type(field, "a string")),
        }
    };
    let name = required("name")?;
    let version = required("version")?;
    let handles_event = required("handles_event")?;

    let description = match obj.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(wrong_type("description", "a string").into()),
    };
    let policy = match obj.get("policy") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(wrong_type("policy", "an object").into()),
    };
    let timeout_seconds = match obj.get("timeout_seconds") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| wrong_type("timeout_seconds", "an integer"))?,
        ),
    };

    Ok(PluginSpec {
        name,
        version,
        handles_event,
        description,
        inputs: string_list(obj, "inputs")?,
        outputs: string_list(obj, "outputs")?,
        policy,
        timeout_seconds,
        missing,
    })
}

fn string_list(obj: &Map<String, Value>, field: &str) -> Result<Vec<String>, SpecFieldError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| wrong_type(field, "an array of strings"))
            })
            .collect(),
        Some(_) => Err(wrong_type(field, "an array of strings")),
    }
}

fn wrong_type(field: &str, expected: &'static str) -> SpecFieldError {
    SpecFieldError::WrongType {
        field: field.to_string(),
        expected,
    }
}

/// Field checks, in order, stopping at the first failure.
pub fn validate_spec_fields(spec: &PluginSpec) -> Result<(), SpecFieldError> {
    if let Some(field) = spec.missing.first() {
        return Err(SpecFieldError::MissingField((*field).to_string()));
    }
    if !NAME_RE.is_match(&spec.name) {
        return Err(SpecFieldError::InvalidName(spec.name.clone()));
    }
    if !VERSION_RE.is_match(&spec.version) {
        return Err(SpecFieldError::InvalidVersion(spec.version.clone()));
    }
    if let Some(timeout) = spec.timeout_seconds
        && !(1..=MAX_TIMEOUT_SECONDS).contains(&timeout)
    {
        return Err(SpecFieldError::InvalidTimeout(timeout));
    }
    Ok(())
}

pub fn check_lifecycle_event(spec: &PluginSpec, contract: &Contract) -> Result<(), SpecFieldError> {
    if contract.has_event(&spec.handles_event) {
        Ok(())
    } else {
        Err(SpecFieldError::UnknownLifecycleEvent {
            event: spec.handles_event.clone(),
            allowed: contract.event_names(),
        })
    }
}

pub fn validate_spec(spec: &PluginSpec, contract: &Contract) -> Result<(), SpecFieldError> {
    validate_spec_fields(spec)?;
    check_lifecycle_event(spec, contract)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contract::{ActionDefinition, LifecycleEvent};
    use std::path::PathBuf;

    fn contract() -> Contract {
        Contract {
            contract_version: "1.0.0".to_string(),
            source: PathBuf::from("contract.md"),
            lifecycle_events: vec![
                LifecycleEvent {
                    name: "FileDetected".to_string(),
                    description: String::new(),
                },
                LifecycleEvent {
                    name: "FileClassified".to_string(),
                    description: String::new(),
                },
            ],
            allowed_actions: vec![ActionDefinition {
                name: "propose_move".to_string(),
                metadata: serde_json::json!({}),
            }],
        }
    }

    fn spec_with(name: &str, version: &str, event: &str) -> PluginSpec {
        let text = serde_json::json!({
            "name": name,
            "version": version,
            "handles_event": event,
        })
        .to_string();
        parse_spec(&text).unwrap()
    }

    #[test]
    fn accepts_valid_spec() {
        let spec = spec_with("path-classifier", "0.1.0", "FileDetected");
        assert_eq!(validate_spec(&spec, &contract()), Ok(()));
        assert!(spec.policy.is_empty());
        assert!(spec.inputs.is_empty());
    }

    #[test]
    fn parses_optional_fields() {
        let spec = parse_spec(
            r#"{"name":"a","version":"1.0.0","handles_event":"FileDetected",
                "inputs":["path","sha256"],"outputs":["label"],
                "policy":{"max_moves":3},"description":"Sorts files.","timeout_seconds":30}"#,
        )
        .unwrap();
        assert_eq!(spec.inputs, vec!["path", "sha256"]);
        assert_eq!(spec.outputs, vec!["label"]);
        assert_eq!(spec.policy["max_moves"], 3);
        assert_eq!(spec.description.as_deref(), Some("Sorts files."));
        assert_eq!(spec.timeout_seconds, Some(30));
    }

    #[test]
    fn missing_fields_reported_in_order() {
        let spec = parse_spec(r#"{"version":"1.0.0"}"#).unwrap();
        assert_eq!(spec.missing_fields(), &["name", "handles_event"]);
        assert_eq!(
            validate_spec_fields(&spec),
            Err(SpecFieldError::MissingField("name".to_string()))
        );
    }

    #[test]
    fn rejects_uppercase_and_underscore_names() {
        for bad in ["PathClassifier", "path_classifier", "path classifier", ""] {
            let spec = spec_with(bad, "0.1.0", "FileDetected");
            assert_eq!(
                validate_spec_fields(&spec),
                Err(SpecFieldError::InvalidName(bad.to_string())),
                "name {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_non_triple_versions() {
        for bad in ["1.0", "v1.0.0", "1.0.0-beta", "1.0.0+build", "1.0.0.0", "x.y.z"] {
            let spec = spec_with("ok-name", bad, "FileDetected");
            assert_eq!(
                validate_spec_fields(&spec),
                Err(SpecFieldError::InvalidVersion(bad.to_string())),
                "version {bad:?}"
            );
        }
    }

    #[test]
    fn name_checked_before_version() {
        let spec = spec_with("Bad_Name", "nope", "FileDetected");
        assert!(matches!(
            validate_spec_fields(&spec),
            Err(SpecFieldError::InvalidName(_))
        ));
    }

    #[test]
    fn unknown_event_lists_allowed_values() {
        let spec = spec_with("ok-name", "1.0.0", "FileDeleted");
        let err = validate_spec(&spec, &contract()).unwrap_err();
        assert_eq!(
            err,
            SpecFieldError::UnknownLifecycleEvent {
                event: "FileDeleted".to_string(),
                allowed: vec!["FileDetected".to_string(), "FileClassified".to_string()],
            }
        );
        let msg = err.to_string();
        assert!(msg.starts_with("UnknownLifecycleEventError"));
        assert!(msg.contains("FileDeleted"));
        assert!(msg.contains("FileDetected, FileClassified"));
    }

    #[test]
    fn timeout_out_of_range_rejected() {
        let spec = parse_spec(
            r#"{"name":"a","version":"1.0.0","handles_event":"FileDetected","timeout_seconds":600}"#,
        )
        .unwrap();
        assert_eq!(
            validate_spec_fields(&spec),
            Err(SpecFieldError::InvalidTimeout(600))
        );
    }

    #[test]
    fn wrong_types_are_field_errors() {
        let err = parse_spec(r#"{"name":1,"version":"1.0.0","handles_event":"E"}"#).unwrap_err();
        assert!(matches!(
            err,
            PluginGateError::SpecField(SpecFieldError::WrongType { ref field, .. }) if field == "name"
        ));
        let err = parse_spec(r#"{"name":"a","version":"1.0.0","handles_event":"E","inputs":[1]}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            PluginGateError::SpecField(SpecFieldError::WrongType { ref field, .. }) if field == "inputs"
        ));
        assert!(matches!(
            parse_spec("not json").unwrap_err(),
            PluginGateError::JsonError(_)
        ));
    }
}
