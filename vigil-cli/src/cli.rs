use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use vigil::{Severity, Technology};

/// Audit a project for vulnerable dependencies, secrets, IaC
/// misconfigurations, and insecure code.
#[derive(Parser)]
#[command(name = "vigil", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub verbosity: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full audit over one or more directories
    Audit(AuditArgs),
    /// Run a package-manager command; on failure, check whether a curation
    /// policy block explains it
    Wrap(WrapArgs),
}

#[derive(Args)]
pub struct AuditArgs {
    /// Directories to audit
    #[arg(default_value = ".")]
    pub dirs: Vec<PathBuf>,

    /// Restrict the audit to these technologies (default: detect all)
    #[arg(long = "tech", value_delimiter = ',')]
    pub technologies: Vec<Technology>,

    /// Only scan the top level of each directory
    #[arg(long)]
    pub no_recursive: bool,

    /// Drop findings below this severity
    #[arg(long)]
    pub min_severity: Option<Severity>,

    /// Number of parallel scan workers
    #[arg(long, default_value_t = 3)]
    pub threads: usize,

    /// Server URL for graph scans and advanced security phases
    #[arg(long, env = "VIGIL_URL")]
    pub url: Option<String>,

    /// Access token for the server
    #[arg(long, env = "VIGIL_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Path to an installed analyzer binary
    #[arg(long, env = "VIGIL_ANALYZER_PATH")]
    pub analyzer_path: Option<PathBuf>,

    /// Also check applicability inside vendored third-party code, then stop
    #[arg(long)]
    pub third_party: bool,

    /// Write each completed scan's raw responses into this directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Abort on the first failure instead of reporting partial results
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Args)]
pub struct WrapArgs {
    /// Technology of the wrapped package manager
    #[arg(long)]
    pub tech: Technology,

    /// Server URL used for the entitlement check and the follow-up audit
    #[arg(long, env = "VIGIL_URL")]
    pub url: Option<String>,

    /// Access token for the server
    #[arg(long, env = "VIGIL_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// The package-manager command to run, e.g. `npm install`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}
