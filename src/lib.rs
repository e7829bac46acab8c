//! plugin-gate: governance tooling for event-driven file-processing plugins.
//!
//! A plugin is a directory holding one human-authored `plugin.spec.json` and six
//! artifacts derived from it. Two tools operate on that directory, both driven
//! by a single governance contract that lists the lifecycle events a plugin may
//! subscribe to and the proposal actions its handler may emit:
//!
//! - **generate** renders the derived artifacts from the spec.
//! - **validate** certifies an existing directory: structure, spec rules,
//!   spec/manifest consistency, contract membership, a lexical scan of the
//!   handler, and a sandboxed smoke test of the handler itself.
//!
//! ```bash
//! plugin-gate generate --spec plugins/path-classifier/plugin.spec.json
//! plugin-gate validate --path plugins/path-classifier
//! plugin-gate contract --format json
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: contract loader, spec rules, generator, validator and helpers
//! - `cli`: clap definitions for the binary

pub mod core;
mod cli;

use crate::cli::{Cli, Command, ContractCli, GenerateCli, OutputFormat, ValidateCli};
use crate::core::config::GateConfig;
use crate::core::contract::{self, Contract};
use crate::core::error::PluginGateError;
use crate::core::scaffold::{self, ScaffoldOptions};
use crate::core::time;
use crate::core::validate;
use clap::Parser;
use colored::Colorize;
use std::io::IsTerminal;

/// Parse the command line, run one command and return its exit code.
///
/// Errors are returned for the caller to print as a single `ERROR:` line.
pub fn run() -> Result<i32, PluginGateError> {
    let cli = Cli::parse();
    if !std::io::stderr().is_terminal() {
        colored::control::set_override(false);
    }

    let current_dir = std::env::current_dir()?;
    let config = GateConfig::load(&current_dir)?;

    match cli.command {
        Command::Generate(args) => run_generate(args, config),
        Command::Validate(args) => run_validate(args, config),
        Command::Contract(args) => run_contract(args, config),
    }
}

fn load_configured_contract(config: &GateConfig) -> Result<Contract, PluginGateError> {
    tracing::debug!(path = %config.contract_path.display(), "loading contract");
    contract::load_contract(&config.contract_path)
}

fn run_generate(args: GenerateCli, config: GateConfig) -> Result<i32, PluginGateError> {
    let config = config.with_overrides(args.contract, None)?;
    let contract = load_configured_contract(&config)?;
    let report = scaffold::generate_scaffold(
        &ScaffoldOptions {
            spec_path: args.spec,
            out_dir: args.out,
        },
        &contract,
    )?;

    println!(
        "Generated plugin {} in {}",
        report.plugin_name,
        report.out_dir.display()
    );
    for file in &report.files {
        println!("  wrote: {}", file);
    }
    if report.preserved_editable_region {
        println!("  kept: editable region of handler.sh");
    }
    for warning in &report.warnings {
        eprintln!("{} {}", "WARN:".yellow().bold(), warning);
    }
    Ok(0)
}

fn run_validate(args: ValidateCli, config: GateConfig) -> Result<i32, PluginGateError> {
    let config = config.with_overrides(args.contract, args.timeout_secs)?;
    let contract = load_configured_contract(&config)?;
    let report = validate::validate_plugin(&args.path, &contract, &config.smoke_test)?;

    match args.format {
        OutputFormat::Json => {
            let status = if report.is_valid() { "ok" } else { "failed" };
            let envelope = time::command_envelope("validate", status, report.to_json());
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => {
            for warning in &report.warnings {
                eprintln!("{} {}", "WARN:".yellow().bold(), warning);
            }
            for failure in &report.failures {
                eprintln!("{} {}", "ERROR:".red().bold(), failure.message());
            }
            if report.is_valid() {
                println!("Validation passed for plugin at {}", args.path.display());
            }
        }
    }
    Ok(report.exit_code())
}

fn run_contract(args: ContractCli, config: GateConfig) -> Result<i32, PluginGateError> {
    let config = config.with_overrides(args.contract, None)?;
    let contract = load_configured_contract(&config)?;

    match args.format {
        OutputFormat::Json => {
            let envelope = time::command_envelope(
                "contract",
                "ok",
                serde_json::json!({ "contract": contract }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => {
            println!("contract: {}", contract.source.display());
            println!("contract_version: {}", contract.contract_version);
            println!("lifecycle_events:");
            for event in &contract.lifecycle_events {
                if event.description.is_empty() {
                    println!("  - {}", event.name);
                } else {
                    println!("  - {}: {}", event.name, event.description);
                }
            }
            println!("allowed_actions:");
            for action in &contract.allowed_actions {
                println!("  - {}", action.name);
            }
        }
    }
    Ok(0)
}
