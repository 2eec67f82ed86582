pub mod analyzer;
pub mod applicability;
pub mod config;
pub mod iac;
pub mod sarif;
pub mod sast;
pub mod secrets;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cve::CveSets;
use crate::error::AuditError;
use crate::scan::ServerDetails;
use crate::tech::Technology;

use analyzer::AnalyzerExecutor;
use applicability::ApplicabilityScanManager;
use config::{ScanConfiguration, ScansConfig};
use iac::IacScanManager;
use sarif::SarifRun;
use sast::SastScanManager;
use secrets::SecretScanManager;

/// Exclusion patterns applied to every phase unless a phase removes one.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/venv/**",
    "**/.venv/**",
    "**/dist/**",
];

pub const NODE_MODULES_PATTERN: &str = "**/node_modules/**";

/// Shared context for one audit's analyzer phases. The temp workspace holds
/// per-phase config and results files and is removed on every exit path when
/// the context drops.
pub struct JasContext {
    pub roots: Vec<PathBuf>,
    pub exclusions: Vec<String>,
    pub server: ServerDetails,
    pub cve_sets: CveSets,
    pub technologies: Vec<Technology>,
    pub third_party_scan: bool,
    workspace: TempDir,
    pub applicability: Vec<SarifRun>,
    pub secrets: Vec<SarifRun>,
    pub iac: Vec<SarifRun>,
    pub sast: Vec<SarifRun>,
}

impl JasContext {
    pub fn new(
        roots: Vec<PathBuf>,
        server: ServerDetails,
        cve_sets: CveSets,
        technologies: Vec<Technology>,
        third_party_scan: bool,
    ) -> Result<Self, AuditError> {
        Ok(Self {
            roots,
            exclusions: DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
            server,
            cve_sets,
            technologies,
            third_party_scan,
            workspace: TempDir::with_prefix("vigil-jas-")?,
            applicability: Vec::new(),
            secrets: Vec::new(),
            iac: Vec::new(),
            sast: Vec::new(),
        })
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn config_path(&self, phase: &str) -> PathBuf {
        self.workspace.path().join(format!("{phase}_config.yaml"))
    }

    pub fn results_path(&self, phase: &str) -> PathBuf {
        self.workspace.path().join(format!("{phase}_results.sarif"))
    }

    pub fn total_findings(&self) -> usize {
        sarif::location_count(&self.applicability)
            + sarif::location_count(&self.secrets)
            + sarif::location_count(&self.iac)
            + sarif::location_count(&self.sast)
    }
}

/// One analyzer phase. `enabled` is the per-stage predicate evaluated before
/// the stage runs; an ineligible phase is a successful no-op.
#[async_trait]
pub trait JasPhase: Send + Sync {
    fn name(&self) -> &'static str;

    fn enabled(&self, _ctx: &JasContext) -> bool {
        true
    }

    async fn run(
        &self,
        ctx: &mut JasContext,
        analyzer: &dyn AnalyzerExecutor,
    ) -> Result<(), AuditError>;
}

/// Run applicability → secrets → IaC → SAST in order.
///
/// A phase failure aborts the remaining phases but leaves already-collected
/// findings in the context. A third-party scan stops after applicability.
pub async fn run_jas_scans(
    ctx: &mut JasContext,
    analyzer: &dyn AnalyzerExecutor,
    cancel: &CancellationToken,
) -> Result<(), AuditError> {
    let phases: Vec<Box<dyn JasPhase>> = vec![
        Box::new(ApplicabilityScanManager::new()),
        Box::new(SecretScanManager::new()),
        Box::new(IacScanManager::new()),
        Box::new(SastScanManager::new()),
    ];

    for phase in phases {
        if cancel.is_cancelled() {
            return Err(AuditError::Cancelled);
        }
        if !phase.enabled(ctx) {
            debug!(phase = phase.name(), "phase not eligible, skipping");
            continue;
        }
        info!(phase = phase.name(), "running analyzer phase");
        phase.run(ctx, analyzer).await?;

        if ctx.third_party_scan && phase.name() == applicability::PHASE {
            debug!("third-party scan requested, stopping after applicability");
            break;
        }
    }
    Ok(())
}

/// The config → invoke → parse cycle every phase shares, applied to one
/// source module.
pub(crate) async fn run_module_scan(
    ctx: &JasContext,
    analyzer: &dyn AnalyzerExecutor,
    phase: &'static str,
    subcommand: &str,
    entry: ScanConfiguration,
    module_root: &Path,
) -> Result<Vec<SarifRun>, AuditError> {
    let config_path = ctx.config_path(phase);
    config::write_config(&config_path, &ScansConfig { scans: vec![entry] }, phase)?;
    analyzer
        .execute(&config_path, subcommand, module_root, &ctx.server)
        .await?;
    sarif::read_runs_from_file(&ctx.results_path(phase), module_root, phase)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Stands in for the analyzer binary: reads the generated config to find
    /// the output path and writes a canned results file there. Records every
    /// invocation for assertions.
    pub struct FakeAnalyzer {
        pub results_json: String,
        pub invocations: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl FakeAnalyzer {
        pub fn returning(results_json: &str) -> Self {
            Self {
                results_json: results_json.to_string(),
                invocations: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn empty() -> Self {
            Self::returning(r#"{"runs": []}"#)
        }

        pub fn failing() -> Self {
            Self {
                results_json: String::new(),
                invocations: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn invocation_count(&self) -> usize {
            self.invocations.lock().unwrap().len()
        }

        pub fn last_config(&self) -> String {
            self.invocations.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl AnalyzerExecutor for FakeAnalyzer {
        async fn execute(
            &self,
            config_file: &Path,
            subcommand: &str,
            _working_dir: &Path,
            _server: &ServerDetails,
        ) -> Result<(), AuditError> {
            let raw = std::fs::read_to_string(config_file).expect("config file must exist");
            self.invocations.lock().unwrap().push(raw.clone());

            if self.fail {
                return Err(AuditError::AnalyzerExec {
                    phase: subcommand.to_string(),
                    reason: "analyzer exited with exit status: 1".to_string(),
                });
            }

            let config: ScansConfig = serde_yaml::from_str(&raw).expect("config must be yaml");
            let output = &config.scans[0].output;
            std::fs::write(output, &self.results_json).expect("write results file");
            Ok(())
        }
    }

    pub fn test_server() -> ServerDetails {
        ServerDetails::new("https://xsec.example.com", Some("tok".to_string()))
    }

    pub fn context_with(
        roots: Vec<PathBuf>,
        cve_sets: CveSets,
        technologies: Vec<Technology>,
    ) -> JasContext {
        JasContext::new(roots, test_server(), cve_sets, technologies, false).unwrap()
    }
}
