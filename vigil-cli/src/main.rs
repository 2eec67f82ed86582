mod builders;
mod cli;

use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use vigil::curation::{
    CurationAudit, CurationFailureContext, CurationGate, SUMMARY_OUTPUT_DIR_ENV,
};
use vigil::jas::analyzer::AnalyzerManager;
use vigil::scan::HttpEntitlementClient;
use vigil::{AuditParams, Auditor, ServerDetails, Technology};

use builders::{GoModBuilder, NpmLockBuilder};
use cli::{AuditArgs, Cli, Command, WrapArgs};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.verbosity.tracing_level_filter())
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    process::exit(exit_code);
}

async fn run(args: Cli) -> anyhow::Result<i32> {
    match args.command {
        Command::Audit(audit_args) => run_audit(audit_args).await,
        Command::Wrap(wrap_args) => run_wrap(wrap_args).await,
    }
}

fn server_details(url: Option<String>, access_token: Option<String>) -> Option<ServerDetails> {
    url.map(|url| ServerDetails::new(url, access_token))
}

fn register_builders(auditor: &mut Auditor) {
    auditor.register_builder(Technology::Npm, Arc::new(NpmLockBuilder));
    auditor.register_builder(Technology::Go, Arc::new(GoModBuilder));
}

async fn run_audit(args: AuditArgs) -> anyhow::Result<i32> {
    let params = AuditParams {
        working_dirs: args.dirs,
        technologies: args.technologies,
        recursive: !args.no_recursive,
        min_severity: args.min_severity,
        concurrency: args.threads,
        server: server_details(args.url, args.access_token),
        third_party_applicability: args.third_party,
        results_output_dir: args.output_dir,
        allow_partial_results: !args.fail_fast,
    };

    let mut auditor = Auditor::new(params);
    register_builders(&mut auditor);
    let auditor = match args.analyzer_path {
        Some(path) => auditor.with_analyzer(Arc::new(AnalyzerManager::from_binary(path))),
        None => auditor,
    };

    let report = auditor.audit().await?;

    let formatter = vigil::formatter(args.json);
    let stdout = std::io::stdout();
    formatter
        .write_results(&report, &mut stdout.lock())
        .context("failed to write report")?;

    Ok(if report.has_errors() { 1 } else { 0 })
}

async fn run_wrap(args: WrapArgs) -> anyhow::Result<i32> {
    let (program, rest) = args
        .command
        .split_first()
        .context("wrap requires a command to run")?;

    let output = tokio::process::Command::new(program)
        .args(rest)
        .output()
        .await
        .with_context(|| format!("failed to run '{program}'"))?;

    std::io::stdout().write_all(&output.stdout)?;
    std::io::stderr().write_all(&output.stderr)?;

    if output.status.success() {
        return Ok(0);
    }

    // The package-manager subcommand ("install", "add", ...) decides whether
    // the failure is worth a curation inspection.
    let command_name = rest
        .iter()
        .find(|arg| !arg.starts_with('-'))
        .cloned()
        .unwrap_or_else(|| program.to_string());
    let error_text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    match server_details(args.url, args.access_token) {
        Some(server) => {
            let audit = WrapCurationAudit {
                technology: args.tech,
                server: server.clone(),
                summary_dir: std::env::var(SUMMARY_OUTPUT_DIR_ENV).ok().map(PathBuf::from),
            };
            let gate = CurationGate::from_env(
                Arc::new(HttpEntitlementClient::new(server)),
                Arc::new(audit),
            );
            gate.inspect_after_failure(&CurationFailureContext {
                technology: args.tech,
                command_name,
                error_text,
            })
            .await;
        }
        None => debug!("no server configured, skipping curation inspection"),
    }

    Ok(output.status.code().unwrap_or(1))
}

/// The follow-up audit run when an install failure is classified as a
/// curation policy block. Its outcome is reported through the summary file
/// and logs only; the wrapped command's error stays untouched.
struct WrapCurationAudit {
    technology: Technology,
    server: ServerDetails,
    summary_dir: Option<PathBuf>,
}

#[async_trait::async_trait]
impl CurationAudit for WrapCurationAudit {
    async fn run(&self) -> anyhow::Result<()> {
        let params = AuditParams {
            technologies: vec![self.technology],
            server: Some(self.server.clone()),
            ..AuditParams::default()
        };
        let mut auditor = Auditor::new(params);
        register_builders(&mut auditor);
        let report = auditor.audit().await?;

        if let Some(dir) = &self.summary_dir {
            std::fs::create_dir_all(dir)?;
            let path = dir.join("curation_summary.json");
            std::fs::write(&path, serde_json::to_vec_pretty(&report)?)?;
            info!(path = %path.display(), "curation audit summary written");
        }
        Ok(())
    }
}
