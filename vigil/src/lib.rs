pub mod curation;
pub mod cve;
pub mod error;
pub mod graph;
pub mod jas;
pub mod output;
pub mod sca;
pub mod scan;
pub mod tech;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::{AuditError, ErrorCollector};
pub use output::{AuditReport, OutputFormatter, formatter};
pub use scan::{GraphScanClient, ServerDetails, Severity};
pub use tech::Technology;

use jas::JasContext;
use jas::analyzer::AnalyzerExecutor;
use sca::{AuditResults, ScaRunner, ScaTarget, TreeBuilderRegistry};
use scan::{HttpGraphScanClient, OfflineGraphScanClient};

/// Immutable-after-build audit configuration. Owned by the command
/// invocation; everything below only reads it.
#[derive(Debug, Clone)]
pub struct AuditParams {
    pub working_dirs: Vec<PathBuf>,
    /// Restrict the audit to these technologies; empty means detect all.
    pub technologies: Vec<Technology>,
    pub recursive: bool,
    pub min_severity: Option<Severity>,
    pub concurrency: usize,
    pub server: Option<ServerDetails>,
    pub third_party_applicability: bool,
    pub results_output_dir: Option<PathBuf>,
    /// When false, the first accumulated failure aborts the report instead
    /// of being carried alongside partial results.
    pub allow_partial_results: bool,
}

impl Default for AuditParams {
    fn default() -> Self {
        Self {
            working_dirs: vec![PathBuf::from(".")],
            technologies: vec![],
            recursive: true,
            min_severity: None,
            concurrency: 3,
            server: None,
            third_party_applicability: false,
            results_output_dir: None,
            allow_partial_results: true,
        }
    }
}

/// Drives one audit run: technology detection, parallel SCA scans, CVE
/// partitioning, and the sequential analyzer phases.
pub struct Auditor {
    params: AuditParams,
    registry: TreeBuilderRegistry,
    scan_client: Option<Arc<dyn GraphScanClient>>,
    analyzer: Option<Arc<dyn AnalyzerExecutor>>,
    cancel: CancellationToken,
}

impl Auditor {
    pub fn new(params: AuditParams) -> Self {
        Self {
            params,
            registry: TreeBuilderRegistry::new(),
            scan_client: None,
            analyzer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn register_builder(
        &mut self,
        technology: Technology,
        builder: Arc<dyn sca::TreeBuilder>,
    ) -> &mut Self {
        self.registry.register(technology, builder);
        self
    }

    /// Override the graph scan client (tests, alternative transports).
    pub fn with_scan_client(mut self, client: Arc<dyn GraphScanClient>) -> Self {
        self.scan_client = Some(client);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn AnalyzerExecutor>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Token observed by every long-running step; cancelling it stops task
    /// submission and fails in-flight work with a cancellation error.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the full audit and return the report plus accumulated failures.
    ///
    /// The report is produced even when targets failed, unless
    /// `allow_partial_results` is off, in which case the first accumulated
    /// error aborts.
    pub async fn audit(self) -> Result<AuditReport, AuditError> {
        let targets = self.collect_scan_targets();
        if targets.is_empty() {
            info!("couldn't determine a package manager or build tool in the audited directories");
        }

        let scan_client = match (&self.scan_client, &self.params.server) {
            (Some(client), _) => client.clone(),
            (None, Some(server)) => {
                Arc::new(HttpGraphScanClient::new(server.clone())) as Arc<dyn GraphScanClient>
            }
            (None, None) => {
                warn!("no server details configured, dependency graphs will not be scanned");
                Arc::new(OfflineGraphScanClient) as Arc<dyn GraphScanClient>
            }
        };

        let results = Arc::new(Mutex::new(AuditResults::new()));
        let runner = ScaRunner::new(
            Arc::new(self.registry),
            scan_client,
            self.params.concurrency,
            self.cancel.clone(),
        )
        .min_severity(self.params.min_severity)
        .third_party_applicability(self.params.third_party_applicability)
        .results_output_dir(self.params.results_output_dir.clone());

        let mut errors: Vec<String> = Vec::new();
        if let Err(e) = runner.run(targets, &results).await {
            if !self.params.allow_partial_results {
                return Err(e);
            }
            errors.extend(e.messages());
        }

        let (sca_results, candidates, technologies) = {
            let shared = results.lock().expect("audit results lock poisoned");
            (
                shared.sca.clone(),
                shared.applicability_candidates.clone(),
                shared.scanned_technologies(),
            )
        };

        let responses: Vec<scan::ScanResponse> = sca_results
            .iter()
            .flat_map(|r| r.responses.iter().cloned())
            .collect();
        let cve_sets = cve::partition_cves(&responses, &candidates);
        debug!(
            direct = cve_sets.direct.len(),
            indirect = cve_sets.indirect.len(),
            "partitioned CVEs"
        );

        let mut report = AuditReport {
            sca: sca_results,
            applicability: vec![],
            secrets: vec![],
            iac: vec![],
            sast: vec![],
            errors,
        };

        match (&self.params.server, &self.analyzer) {
            (None, _) => {
                warn!(
                    "advanced security scans require a configured server connection, skipping them"
                );
            }
            (Some(_), None) => {
                warn!("no analyzer is available, skipping advanced security scans");
            }
            (Some(server), Some(analyzer)) => {
                let mut ctx = JasContext::new(
                    self.params.working_dirs.clone(),
                    server.clone(),
                    cve_sets,
                    technologies,
                    self.params.third_party_applicability,
                )?;
                match jas::run_jas_scans(&mut ctx, analyzer.as_ref(), &self.cancel).await {
                    Ok(()) => {}
                    Err(e) if self.params.allow_partial_results => {
                        // Completed phases keep their findings.
                        report.errors.extend(e.messages());
                    }
                    Err(e) => return Err(e),
                }
                report.applicability = std::mem::take(&mut ctx.applicability);
                report.secrets = std::mem::take(&mut ctx.secrets);
                report.iac = std::mem::take(&mut ctx.iac);
                report.sast = std::mem::take(&mut ctx.sast);
            }
        }

        Ok(report)
    }

    /// Detection: technology → working dirs → descriptors, flattened into
    /// scan targets. Dotnet detections collapse into Nuget to avoid
    /// duplicate scans of the same directory.
    fn collect_scan_targets(&self) -> Vec<ScaTarget> {
        let mut targets = Vec::new();
        for working_dir in &self.params.working_dirs {
            if !working_dir.exists() {
                warn!(dir = %working_dir.display(), "working directory doesn't exist, skipping");
                continue;
            }
            let detected = tech::detect_technologies(
                working_dir,
                self.params.recursive,
                &self.params.technologies,
            );
            for (technology, dirs) in detected {
                if technology == Technology::Dotnet {
                    debug!("dotnet and nuget share descriptors, keeping the nuget scan only");
                    continue;
                }
                if dirs.is_empty() {
                    // Requested technology without descriptors: scan the
                    // requested directory itself.
                    targets.push(ScaTarget {
                        target: working_dir.clone(),
                        technology,
                        descriptors: vec![],
                    });
                }
                for (dir, descriptors) in dirs {
                    targets.push(ScaTarget {
                        target: dir,
                        technology,
                        descriptors,
                    });
                }
            }
        }
        targets
    }
}
