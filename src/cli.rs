//! CLI struct definitions for the plugin-gate command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "plugin-gate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Generate plugin scaffolds from a plugin spec and certify plugin directories against the governance contract."
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args, Debug)]
pub(crate) struct GenerateCli {
    /// Path to plugin.spec.json.
    #[clap(long)]
    pub spec: PathBuf,
    /// Output directory (defaults to the spec's directory).
    #[clap(long)]
    pub out: Option<PathBuf>,
    /// Governance contract (Markdown, JSON, YAML or TOML).
    #[clap(long)]
    pub contract: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ValidateCli {
    /// Plugin directory to validate.
    #[clap(long)]
    pub path: PathBuf,
    /// Governance contract (Markdown, JSON, YAML or TOML).
    #[clap(long)]
    pub contract: Option<PathBuf>,
    /// Smoke-test timeout in seconds. A plugin's own timeout_seconds wins.
    #[clap(long)]
    pub timeout_secs: Option<u64>,
    #[clap(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ContractCli {
    /// Governance contract (Markdown, JSON, YAML or TOML).
    #[clap(long)]
    pub contract: Option<PathBuf>,
    #[clap(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Generate the derived artifacts for one plugin spec.
    Generate(GenerateCli),
    /// Certify a plugin directory.
    Validate(ValidateCli),
    /// Print the parsed governance contract.
    Contract(ContractCli),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn validate_flags_parse() {
        let cli = Cli::try_parse_from([
            "plugin-gate",
            "validate",
            "--path",
            "plugins/a",
            "--timeout-secs",
            "5",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Command::Validate(v) => {
                assert_eq!(v.path, PathBuf::from("plugins/a"));
                assert_eq!(v.timeout_secs, Some(5));
                assert_eq!(v.format, OutputFormat::Json);
                assert!(v.contract.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn generate_requires_spec() {
        assert!(Cli::try_parse_from(["plugin-gate", "generate"]).is_err());
    }
}
