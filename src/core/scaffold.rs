//! Plugin scaffold generation.
//!
//! `generate_scaffold` turns one `plugin.spec.json` into the six derived
//! artifacts. Nothing touches the disk until the spec validates, and the final
//! write is staged in a temporary directory inside the output directory, then
//! renamed into place. If any rename fails, already-moved files are rolled back
//! from backups so the directory is left as it was.

use crate::core::artifacts::{
    self, HANDLER_FILE, HEALTHCHECK_FILE, LEDGER_CONTRACT_FILE, LEDGER_REQUIRED_FIELDS,
    LedgerContract, MANIFEST_FILE, Manifest, POLICY_SNAPSHOT_FILE, PolicySnapshot, README_FILE,
    SPEC_FILE,
};
use crate::core::assets;
use crate::core::contract::Contract;
use crate::core::error::PluginGateError;
use crate::core::scan;
use crate::core::spec::{self, PluginSpec};
use crate::core::time;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const NONE_SPECIFIED: &str = "(none specified)";

/// Generation request.
pub struct ScaffoldOptions {
    /// The canonical spec. Never modified.
    pub spec_path: PathBuf,
    /// Output directory; defaults to the spec's own directory.
    pub out_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldReport {
    pub plugin_name: String,
    pub out_dir: PathBuf,
    /// File names written, in write order.
    pub files: Vec<String>,
    /// An existing handler's editable region was carried over.
    pub preserved_editable_region: bool,
    /// Forbidden-pattern hits in the written handler. Generation still
    /// succeeds, but `validate` will fail until they are removed.
    pub warnings: Vec<String>,
}

fn spec_dir(spec_path: &Path) -> PathBuf {
    match spec_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

pub fn generate_scaffold(
    opts: &ScaffoldOptions,
    contract: &Contract,
) -> Result<ScaffoldReport, PluginGateError> {
    let spec_text = fs::read_to_string(&opts.spec_path).map_err(|e| {
        PluginGateError::PathError(format!(
            "cannot read spec {}: {}",
            opts.spec_path.display(),
            e
        ))
    })?;
    let plugin_spec = spec::parse_spec(&spec_text)?;
    spec::validate_spec(&plugin_spec, contract)?;
    tracing::debug!(plugin = %plugin_spec.name, "spec validated");

    let source_dir = spec_dir(&opts.spec_path);
    let out_dir = opts.out_dir.clone().unwrap_or_else(|| source_dir.clone());
    if out_dir.exists() && !out_dir.is_dir() {
        return Err(PluginGateError::PathError(format!(
            "output path {} is not a directory",
            out_dir.display()
        )));
    }

    let existing_handler = fs::read_to_string(out_dir.join(HANDLER_FILE)).ok();
    let handler = render_handler(&plugin_spec, contract, existing_handler.as_deref());
    let preserved_editable_region = handler.preserved;
    let warnings: Vec<String> = scan::scan_forbidden_patterns(HANDLER_FILE, &handler.text)
        .into_iter()
        .map(|hit| format!("{} will fail validation: {}", HANDLER_FILE, hit))
        .collect();
    if !warnings.is_empty() {
        tracing::debug!(plugin = %plugin_spec.name, hits = warnings.len(), "rendered handler trips the scan");
    }

    let mut files: Vec<(&'static str, String)> = Vec::with_capacity(7);
    fs::create_dir_all(&out_dir)?;
    if !same_dir(&source_dir, &out_dir) {
        files.push((SPEC_FILE, spec_text));
    }
    let generated_at = time::now_rfc3339();
    files.push((
        MANIFEST_FILE,
        artifacts::to_pretty_json(&Manifest::build(&plugin_spec, contract, generated_at))?,
    ));
    files.push((
        POLICY_SNAPSHOT_FILE,
        artifacts::to_pretty_json(&PolicySnapshot::build(&plugin_spec, contract))?,
    ));
    files.push((
        LEDGER_CONTRACT_FILE,
        artifacts::to_pretty_json(&LedgerContract::default())?,
    ));
    files.push((HANDLER_FILE, handler.text));
    files.push((README_FILE, render_readme(&plugin_spec, contract)));
    files.push((HEALTHCHECK_FILE, render_healthcheck(&plugin_spec, contract)));

    commit_files(&out_dir, &files)?;
    tracing::info!(
        plugin = %plugin_spec.name,
        out_dir = %out_dir.display(),
        preserved_editable_region,
        "scaffold generated"
    );

    Ok(ScaffoldReport {
        plugin_name: plugin_spec.name,
        out_dir,
        files: files.iter().map(|(name, _)| name.to_string()).collect(),
        preserved_editable_region,
        warnings,
    })
}

struct RenderedHandler {
    text: String,
    preserved: bool,
}

fn render_handler(spec: &PluginSpec, contract: &Contract, existing: Option<&str>) -> RenderedHandler {
    let fresh = assets::render(
        assets::TEMPLATE_HANDLER,
        &[
            ("name", spec.name.as_str()),
            ("version", spec.version.as_str()),
            ("contract_version", contract.contract_version.as_str()),
        ],
    );
    let carried = existing
        .and_then(scan::editable_region)
        .and_then(|region| scan::replace_editable_region(&fresh, &region));
    match carried {
        Some(text) => RenderedHandler {
            text,
            preserved: true,
        },
        None => RenderedHandler {
            text: fresh,
            preserved: false,
        },
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return NONE_SPECIFIED.to_string();
    }
    items
        .iter()
        .map(|item| format!("- `{}`", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_readme(spec: &PluginSpec, contract: &Contract) -> String {
    let description = spec
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(NONE_SPECIFIED);
    assets::render(
        assets::TEMPLATE_README,
        &[
            ("name", spec.name.as_str()),
            ("version", spec.version.as_str()),
            ("handles_event", spec.handles_event.as_str()),
            ("contract_version", contract.contract_version.as_str()),
            ("description", description),
            ("inputs", bullet_list(&spec.inputs).as_str()),
            ("outputs", bullet_list(&spec.outputs).as_str()),
            ("allowed_actions", bullet_list(&contract.action_names()).as_str()),
        ],
    )
}

fn render_healthcheck(spec: &PluginSpec, contract: &Contract) -> String {
    let ledger_fields = LEDGER_REQUIRED_FIELDS
        .iter()
        .map(|f| format!("`{}`", f))
        .collect::<Vec<_>>()
        .join(", ");
    assets::render(
        assets::TEMPLATE_HEALTHCHECK,
        &[
            ("name", spec.name.as_str()),
            ("version", spec.version.as_str()),
            ("handles_event", spec.handles_event.as_str()),
            ("ledger_fields", ledger_fields.as_str()),
            ("contract_version", contract.contract_version.as_str()),
            ("inputs", bullet_list(&spec.inputs).as_str()),
            ("outputs", bullet_list(&spec.outputs).as_str()),
        ],
    )
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), PluginGateError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), PluginGateError> {
    Ok(())
}

type Rename<'a> = &'a dyn Fn(&Path, &Path) -> io::Result<()>;

fn commit_files(out_dir: &Path, files: &[(&'static str, String)]) -> Result<(), PluginGateError> {
    commit_files_with(out_dir, files, &|from: &Path, to: &Path| fs::rename(from, to))
}

/// Stage every file, then move them into `out_dir` one by one.
fn commit_files_with(
    out_dir: &Path,
    files: &[(&'static str, String)],
    rename: Rename<'_>,
) -> Result<(), PluginGateError> {
    let staging = tempfile::Builder::new()
        .prefix(".plugin-gate-")
        .tempdir_in(out_dir)?;
    let backup_dir = staging.path().join("backup");
    fs::create_dir(&backup_dir)?;

    for (name, content) in files {
        let staged = staging.path().join(name);
        fs::write(&staged, content)?;
        if *name == HANDLER_FILE {
            make_executable(&staged)?;
        }
    }

    let mut moved: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(files.len());
    for (name, _) in files {
        let target = out_dir.join(name);
        match move_into_place(&staging.path().join(name), &target, &backup_dir.join(name), rename) {
            Ok(backup) => moved.push((target, backup)),
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "rename failed, rolling back");
                rollback(&moved, rename);
                return Err(e.into());
            }
        }
    }
    Ok(())
}

fn move_into_place(
    staged: &Path,
    target: &Path,
    backup: &Path,
    rename: Rename<'_>,
) -> io::Result<Option<PathBuf>> {
    let backed_up = if target.exists() {
        rename(target, backup)?;
        Some(backup.to_path_buf())
    } else {
        None
    };
    if let Err(e) = rename(staged, target) {
        if let Some(backup) = &backed_up {
            let _ = rename(backup, target);
        }
        return Err(e);
    }
    Ok(backed_up)
}

fn rollback(moved: &[(PathBuf, Option<PathBuf>)], rename: Rename<'_>) {
    for (target, backup) in moved.iter().rev() {
        let _ = fs::remove_file(target);
        if let Some(backup) = backup {
            let _ = rename(backup, target);
        }
    }
}
