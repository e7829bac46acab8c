use std::io;
use thiserror::Error;

/// Crate-wide error type. Every `Display` renders as a single line that names
/// the offending value, so callers can print it verbatim after `ERROR: `.
#[derive(Error, Debug)]
pub enum PluginGateError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Path error: {0}")]
    PathError(String),
    #[error(transparent)]
    ContractParse(#[from] ContractParseError),
    #[error(transparent)]
    SpecField(#[from] SpecFieldError),
    #[error("ArtifactMissingError: required artifact '{name}' not found in {dir}")]
    ArtifactMissing { name: String, dir: String },
    #[error(
        "ConsistencyError: {artifact} field '{field}' is {found} but expected {expected}"
    )]
    Consistency {
        artifact: String,
        field: String,
        expected: String,
        found: String,
    },
    #[error(
        "ForbiddenPatternError: {file}:{line} matches forbidden pattern '{pattern}' ({category}): {excerpt}"
    )]
    ForbiddenPattern {
        file: String,
        line: usize,
        pattern: String,
        category: String,
        excerpt: String,
    },
    #[error("EditableRegionError: {file} is missing the marker line '{marker}'")]
    EditableRegion { file: String, marker: String },
    #[error(transparent)]
    HandlerExecution(#[from] HandlerExecutionError),
    #[error(transparent)]
    ProposalContract(#[from] ProposalContractError),
}

impl PluginGateError {
    /// Taxonomy name used in structured reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginGateError::IoError(_) => "IoError",
            PluginGateError::JsonError(_) => "JsonError",
            PluginGateError::ConfigError(_) => "ConfigError",
            PluginGateError::PathError(_) => "PathError",
            PluginGateError::ContractParse(_) => "ContractParseError",
            PluginGateError::SpecField(e) => e.kind(),
            PluginGateError::ArtifactMissing { .. } => "ArtifactMissingError",
            PluginGateError::Consistency { .. } => "ConsistencyError",
            PluginGateError::ForbiddenPattern { .. } => "ForbiddenPatternError",
            PluginGateError::EditableRegion { .. } => "EditableRegionError",
            PluginGateError::HandlerExecution(e) => e.kind(),
            PluginGateError::ProposalContract(_) => "ProposalContractError",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractParseError {
    #[error("ContractParseError: {path}: no fenced block labeled '{label}'")]
    MissingBlock { path: String, label: String },
    #[error("ContractParseError: {path}: block '{label}' is not valid structured data: {reason}")]
    Malformed {
        path: String,
        label: String,
        reason: String,
    },
    #[error("ContractParseError: {path}: {reason}")]
    InvalidShape { path: String, reason: String },
    #[error("ContractParseError: {path}: lifecycle event '{name}' is declared more than once")]
    DuplicateEvent { path: String, name: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecFieldError {
    #[error("SpecFieldError: spec is missing required field '{0}'")]
    MissingField(String),
    #[error("SpecFieldError: spec field '{field}' must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("InvalidNameError: plugin name '{0}' must match ^[a-z0-9-]+$")]
    InvalidName(String),
    #[error("InvalidVersionError: plugin version '{0}' must match ^\\d+\\.\\d+\\.\\d+$")]
    InvalidVersion(String),
    #[error(
        "UnknownLifecycleEventError: handles_event '{event}' is not a contract lifecycle event (allowed: {})",
        allowed.join(", ")
    )]
    UnknownLifecycleEvent { event: String, allowed: Vec<String> },
    #[error("InvalidTimeoutError: timeout_seconds {0} must be between 1 and 120")]
    InvalidTimeout(i64),
}

impl SpecFieldError {
    pub fn kind(&self) -> &'static str {
        match self {
            SpecFieldError::MissingField(_) | SpecFieldError::WrongType { .. } => {
                "SpecFieldError"
            }
            SpecFieldError::InvalidName(_) => "InvalidNameError",
            SpecFieldError::InvalidVersion(_) => "InvalidVersionError",
            SpecFieldError::UnknownLifecycleEvent { .. } => "UnknownLifecycleEventError",
            SpecFieldError::InvalidTimeout(_) => "InvalidTimeoutError",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerExecutionError {
    #[error("HandlerExecutionError: could not start '{interpreter}': {reason}")]
    Spawn { interpreter: String, reason: String },
    #[error("HandlerTimeoutError: handler did not finish within {seconds}s and was killed")]
    Timeout { seconds: u64 },
    #[error("HandlerExecutionError: handler exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("HandlerExecutionError: handler stdout is not JSON ({reason}): {stdout}")]
    InvalidOutput { reason: String, stdout: String },
}

impl HandlerExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerExecutionError::Timeout { .. } => "HandlerTimeoutError",
            _ => "HandlerExecutionError",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProposalContractError {
    #[error("ProposalContractError: handler must return a list of proposals, got {found}")]
    NotASequence { found: String },
    #[error("ProposalContractError: proposal #{index} must be an object, got {value}")]
    NotAMapping { index: usize, value: String },
    #[error("ProposalContractError: proposal #{index} has no string 'action'")]
    MissingAction { index: usize },
    #[error(
        "ProposalContractError: proposal #{index} uses action '{action}' which the contract does not allow (allowed: {})",
        allowed.join(", ")
    )]
    UnknownAction {
        index: usize,
        action: String,
        allowed: Vec<String>,
    },
    #[error("ProposalContractError: proposal #{index} ('{action}') has no 'payload'")]
    MissingPayload { index: usize, action: String },
    #[error("ProposalContractError: proposal #{index} ('{action}') payload must be an object, got {found}")]
    PayloadNotMapping {
        index: usize,
        action: String,
        found: String,
    },
}
