//! Governance contract loading.
//!
//! A contract declares which lifecycle events a plugin may subscribe to and
//! which proposal actions a handler may emit. Two document shapes are read:
//!
//! - **Embedded** (`.md` and anything unrecognized): free-form prose with an
//!   optional `---` metadata block at the top (`contract_version: x.y.z`) and two
//!   fenced code blocks labeled `lifecycle_events` and `allowed_actions_contract`.
//! - **Structured** (`.json`, `.yaml`/`.yml`, `.toml`): a dedicated document with
//!   top-level `contract_version`, `lifecycle_events` and `allowed_actions`.
//!
//! Loading is a pure read; the contract file is never written.

use crate::core::error::{ContractParseError, PluginGateError};
use serde::Serialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const LIFECYCLE_EVENTS_LABEL: &str = "lifecycle_events";
pub const ALLOWED_ACTIONS_LABEL: &str = "allowed_actions_contract";
/// Top-level key for actions in structured contract documents.
pub const STRUCTURED_ACTIONS_KEY: &str = "allowed_actions";
pub const UNSPECIFIED_VERSION: &str = "unspecified";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionDefinition {
    pub name: String,
    /// Opaque definition body as written in the contract.
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    pub contract_version: String,
    pub source: PathBuf,
    pub lifecycle_events: Vec<LifecycleEvent>,
    pub allowed_actions: Vec<ActionDefinition>,
}

impl Contract {
    pub fn event_names(&self) -> Vec<String> {
        self.lifecycle_events.iter().map(|e| e.name.clone()).collect()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.allowed_actions.iter().map(|a| a.name.clone()).collect()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.lifecycle_events.iter().any(|e| e.name == name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.allowed_actions.iter().any(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContractFormat {
    Embedded,
    Json,
    Yaml,
    Toml,
}

fn detect_format(path: &Path) -> ContractFormat {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("json") => ContractFormat::Json,
        Some("yaml") | Some("yml") => ContractFormat::Yaml,
        Some("toml") => ContractFormat::Toml,
        _ => ContractFormat::Embedded,
    }
}

/// Load and parse the contract at `path`.
pub fn load_contract(path: &Path) -> Result<Contract, PluginGateError> {
    let content = fs::read_to_string(path).map_err(|e| {
        PluginGateError::PathError(format!("cannot read contract {}: {}", path.display(), e))
    })?;
    let format = detect_format(path);
    tracing::debug!(path = %path.display(), ?format, "loading contract");

    let contract = match format {
        ContractFormat::Embedded => parse_markdown_contract(&content, path)?,
        ContractFormat::Yaml => {
            let doc: YamlValue = serde_yaml::from_str(&content)
                .map_err(|e| malformed(path, "document", e.to_string()))?;
            parse_structured_contract(&doc, path)?
        }
        ContractFormat::Json => {
            let json: serde_json::Value = serde_json::from_str(&content)
                .map_err(|e| malformed(path, "document", e.to_string()))?;
            let doc = serde_yaml::to_value(json)
                .map_err(|e| malformed(path, "document", e.to_string()))?;
            parse_structured_contract(&doc, path)?
        }
        ContractFormat::Toml => {
            let table: toml::Table = toml::from_str(&content)
                .map_err(|e| malformed(path, "document", e.to_string()))?;
            let doc = serde_yaml::to_value(table)
                .map_err(|e| malformed(path, "document", e.to_string()))?;
            parse_structured_contract(&doc, path)?
        }
    };

    tracing::debug!(
        version = %contract.contract_version,
        events = contract.lifecycle_events.len(),
        actions = contract.allowed_actions.len(),
        "contract loaded"
    );
    Ok(contract)
}

/// Parse the embedded (markdown) contract form.
pub fn parse_markdown_contract(text: &str, source: &Path) -> Result<Contract, ContractParseError> {
    let text = text.replace("\r\n", "\n");
    let (metadata, body) = split_metadata(&text);

    let contract_version = match metadata {
        Some(block) => {
            let meta: YamlValue = serde_yaml::from_str(&block)
                .map_err(|e| malformed(source, "metadata", e.to_string()))?;
            meta.get("contract_version")
                .and_then(scalar_to_string)
                .unwrap_or_else(|| UNSPECIFIED_VERSION.to_string())
        }
        None => UNSPECIFIED_VERSION.to_string(),
    };

    let blocks = fenced_blocks(body);
    let events_value = labeled_block_value(&blocks, LIFECYCLE_EVENTS_LABEL, source)?;
    let actions_value = labeled_block_value(&blocks, ALLOWED_ACTIONS_LABEL, source)?;

    Ok(Contract {
        contract_version,
        source: source.to_path_buf(),
        lifecycle_events: parse_events(&events_value, source)?,
        allowed_actions: parse_actions(&actions_value, source)?,
    })
}

/// Parse a dedicated structured contract document.
pub fn parse_structured_contract(
    doc: &YamlValue,
    source: &Path,
) -> Result<Contract, ContractParseError> {
    if !doc.is_mapping() {
        return Err(invalid_shape(source, "contract document must be a mapping"));
    }
    let contract_version = doc
        .get("contract_version")
        .and_then(scalar_to_string)
        .unwrap_or_else(|| UNSPECIFIED_VERSION.to_string());
    let events = doc
        .get(LIFECYCLE_EVENTS_LABEL)
        .ok_or_else(|| missing_block(source, LIFECYCLE_EVENTS_LABEL))?;
    let actions = doc
        .get(STRUCTURED_ACTIONS_KEY)
        .or_else(|| doc.get(ALLOWED_ACTIONS_LABEL))
        .ok_or_else(|| missing_block(source, STRUCTURED_ACTIONS_KEY))?;

    Ok(Contract {
        contract_version,
        source: source.to_path_buf(),
        lifecycle_events: parse_events(events, source)?,
        allowed_actions: parse_actions(actions, source)?,
    })
}

/// Split a leading `---` fenced metadata block from the rest of the document.
/// An unterminated block is treated as prose.
fn split_metadata(text: &str) -> (Option<String>, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (None, text);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let block = rest[..offset].to_string();
            return (Some(block), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, text)
}

#[derive(Debug)]
struct FencedBlock {
    info: String,
    body: String,
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match open.as_mut() {
            Some((fence, _, lines)) => {
                let candidate = trimmed.trim_end();
                let fence_char = fence.chars().next();
                let closes = candidate.len() >= fence.len()
                    && candidate.chars().all(|c| Some(c) == fence_char);
                if !closes {
                    lines.push(line);
                    continue;
                }
            }
            None => {
                for fence_char in ['`', '~'] {
                    let run = trimmed.chars().take_while(|c| *c == fence_char).count();
                    if run >= 3 {
                        let fence = trimmed[..run].to_string();
                        let info = trimmed[run..].trim().to_string();
                        open = Some((fence, info, Vec::new()));
                        break;
                    }
                }
                continue;
            }
        }
        if let Some((_, info, lines)) = open.take() {
            blocks.push(FencedBlock {
                info,
                body: lines.join("\n"),
            });
        }
    }
    blocks
}

fn info_has_label(info: &str, label: &str) -> bool {
    info.split(|c: char| c.is_whitespace() || matches!(c, ',' | '{' | '}' | '=' | ':' | '"'))
        .any(|token| token == label)
}

fn body_starts_with_key(body: &str, label: &str) -> bool {
    body.lines()
        .find(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .is_some_and(|l| l.trim_end() == format!("{label}:") || l.starts_with(&format!("{label}: ")))
}

/// Locate the block for `label` and parse it after re-attaching the label as
/// the synthetic top-level key.
fn labeled_block_value(
    blocks: &[FencedBlock],
    label: &str,
    source: &Path,
) -> Result<YamlValue, ContractParseError> {
    let block = blocks
        .iter()
        .find(|b| info_has_label(&b.info, label))
        .or_else(|| blocks.iter().find(|b| body_starts_with_key(&b.body, label)))
        .ok_or_else(|| missing_block(source, label))?;

    let document = if body_starts_with_key(&block.body, label) {
        block.body.clone()
    } else {
        let mut doc = format!("{label}:\n");
        for line in block.body.lines() {
            doc.push_str("  ");
            doc.push_str(line);
            doc.push('\n');
        }
        doc
    };

    let parsed: YamlValue =
        serde_yaml::from_str(&document).map_err(|e| malformed(source, label, e.to_string()))?;
    match parsed.get(label) {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => Err(malformed(source, label, "block is empty".to_string())),
    }
}

fn parse_events(value: &YamlValue, source: &Path) -> Result<Vec<LifecycleEvent>, ContractParseError> {
    let items = value.as_sequence().ok_or_else(|| {
        invalid_shape(source, "lifecycle_events must be a sequence of {name, description}")
    })?;

    let mut seen = BTreeSet::new();
    let mut events = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let event = match item {
            YamlValue::String(name) => LifecycleEvent {
                name: name.clone(),
                description: String::new(),
            },
            YamlValue::Mapping(_) => {
                let name = item.get("name").and_then(scalar_to_string).ok_or_else(|| {
                    invalid_shape(source, &format!("lifecycle event #{index} has no name"))
                })?;
                let description = item
                    .get("description")
                    .and_then(scalar_to_string)
                    .unwrap_or_default();
                LifecycleEvent { name, description }
            }
            _ => {
                return Err(invalid_shape(
                    source,
                    &format!("lifecycle event #{index} must be a mapping"),
                ));
            }
        };
        if !seen.insert(event.name.clone()) {
            return Err(ContractParseError::DuplicateEvent {
                path: source.display().to_string(),
                name: event.name,
            });
        }
        events.push(event);
    }
    Ok(events)
}

fn parse_actions(
    value: &YamlValue,
    source: &Path,
) -> Result<Vec<ActionDefinition>, ContractParseError> {
    let mapping = value.as_mapping().ok_or_else(|| {
        invalid_shape(source, "allowed actions must be a mapping keyed by action name")
    })?;

    let mut actions = Vec::with_capacity(mapping.len());
    for (key, definition) in mapping {
        let name = scalar_to_string(key)
            .ok_or_else(|| invalid_shape(source, "action names must be strings"))?;
        let metadata = serde_json::to_value(definition)
            .map_err(|e| malformed(source, &name, e.to_string()))?;
        actions.push(ActionDefinition { name, metadata });
    }
    Ok(actions)
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn missing_block(source: &Path, label: &str) -> ContractParseError {
    ContractParseError::MissingBlock {
        path: source.display().to_string(),
        label: label.to_string(),
    }
}

fn malformed(source: &Path, label: &str, reason: String) -> ContractParseError {
    ContractParseError::Malformed {
        path: source.display().to_string(),
        label: label.to_string(),
        reason,
    }
}

fn invalid_shape(source: &Path, reason: &str) -> ContractParseError {
    ContractParseError::InvalidShape {
        path: source.display().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMBEDDED: &str = "---
contract_version: 1.2.0
owner: platform
---

# Plugin Governance Contract

Plugins subscribe to exactly one lifecycle event.

```yaml lifecycle_events
- name: FileDetected
  description: A new file landed in the inbox.
- name: FileClassified
  description: A classifier attached a label.
```

Handlers may only propose the following actions.

```yaml allowed_actions_contract
propose_move:
  description: Move a file to a new location.
propose_quarantine:
  description: Isolate a suspicious file.
```
";

    fn src() -> PathBuf {
        PathBuf::from("contract.md")
    }

    #[test]
    fn parses_embedded_contract() {
        let contract = parse_markdown_contract(EMBEDDED, &src()).unwrap();
        assert_eq!(contract.contract_version, "1.2.0");
        assert_eq!(contract.event_names(), vec!["FileDetected", "FileClassified"]);
        assert_eq!(
            contract.action_names(),
            vec!["propose_move", "propose_quarantine"]
        );
        assert_eq!(
            contract.lifecycle_events[0].description,
            "A new file landed in the inbox."
        );
        assert_eq!(
            contract.allowed_actions[1].metadata["description"],
            "Isolate a suspicious file."
        );
    }

    #[test]
    fn accepts_blocks_that_already_carry_their_key() {
        let text = "```yaml\nlifecycle_events:\n  - name: FileDetected\n```\n\n```yaml\nallowed_actions_contract:\n  propose_move: {}\n```\n";
        let contract = parse_markdown_contract(text, &src()).unwrap();
        assert_eq!(contract.contract_version, UNSPECIFIED_VERSION);
        assert!(contract.has_event("FileDetected"));
        assert!(contract.has_action("propose_move"));
        assert!(!contract.has_action("propose_delete"));
    }

    #[test]
    fn missing_actions_block_is_a_parse_error() {
        let text = "```yaml lifecycle_events\n- name: FileDetected\n```\n";
        let err = parse_markdown_contract(text, &src()).unwrap_err();
        assert_eq!(
            err,
            ContractParseError::MissingBlock {
                path: "contract.md".to_string(),
                label: ALLOWED_ACTIONS_LABEL.to_string(),
            }
        );
    }

    #[test]
    fn malformed_block_is_a_parse_error() {
        let text = "```yaml lifecycle_events\n- name: [unterminated\n```\n```yaml allowed_actions_contract\npropose_move: {}\n```\n";
        let err = parse_markdown_contract(text, &src()).unwrap_err();
        assert!(matches!(err, ContractParseError::Malformed { ref label, .. } if label == LIFECYCLE_EVENTS_LABEL));
    }

    #[test]
    fn duplicate_event_names_are_rejected() {
        let text = "```yaml lifecycle_events\n- name: FileDetected\n- name: FileDetected\n```\n```yaml allowed_actions_contract\npropose_move: {}\n```\n";
        let err = parse_markdown_contract(text, &src()).unwrap_err();
        assert!(matches!(err, ContractParseError::DuplicateEvent { ref name, .. } if name == "FileDetected"));
    }

    #[test]
    fn actions_must_be_a_mapping() {
        let text = "```yaml lifecycle_events\n- name: FileDetected\n```\n```yaml allowed_actions_contract\n- propose_move\n```\n";
        let err = parse_markdown_contract(text, &src()).unwrap_err();
        assert!(matches!(err, ContractParseError::InvalidShape { .. }));
    }

    #[test]
    fn unterminated_metadata_is_prose() {
        let (meta, body) = split_metadata("---\ncontract_version: 1\nno closing");
        assert!(meta.is_none());
        assert!(body.starts_with("---"));
    }

    #[test]
    fn parses_structured_json_contract() {
        let json = serde_json::json!({
            "contract_version": "2.0.0",
            "lifecycle_events": [{"name": "FileDetected", "description": "new file"}],
            "allowed_actions": {"propose_move": {"risk": "low"}}
        });
        let doc = serde_yaml::to_value(json).unwrap();
        let contract = parse_structured_contract(&doc, Path::new("c.json")).unwrap();
        assert_eq!(contract.contract_version, "2.0.0");
        assert_eq!(contract.event_names(), vec!["FileDetected"]);
        assert_eq!(contract.allowed_actions[0].metadata["risk"], "low");
    }

    #[test]
    fn structured_contract_requires_events() {
        let doc = serde_yaml::to_value(serde_json::json!({"allowed_actions": {}})).unwrap();
        let err = parse_structured_contract(&doc, Path::new("c.json")).unwrap_err();
        assert!(matches!(err, ContractParseError::MissingBlock { ref label, .. } if label == LIFECYCLE_EVENTS_LABEL));
    }

    #[test]
    fn load_contract_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("contract.toml");
        fs::write(
            &toml_path,
            "contract_version = \"3.1.0\"\n\n[[lifecycle_events]]\nname = \"FileDetected\"\ndescription = \"new file\"\n\n[allowed_actions.propose_move]\nrisk = \"low\"\n",
        )
        .unwrap();
        let contract = load_contract(&toml_path).unwrap();
        assert_eq!(contract.contract_version, "3.1.0");
        assert!(contract.has_action("propose_move"));

        let md_path = dir.path().join("contract.md");
        fs::write(&md_path, EMBEDDED).unwrap();
        assert_eq!(load_contract(&md_path).unwrap().lifecycle_events.len(), 2);
    }

    #[test]
    fn load_contract_reports_missing_file() {
        let err = load_contract(Path::new("/nonexistent/contract.md")).unwrap_err();
        assert!(matches!(err, PluginGateError::PathError(_)));
    }
}
