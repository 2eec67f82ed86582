use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::AuditError;
use crate::jas::analyzer::AnalyzerExecutor;
use crate::jas::config::ScanConfiguration;
use crate::jas::{JasContext, JasPhase, NODE_MODULES_PATTERN, run_module_scan};

pub const PHASE: &str = "applicability";
const SUBCOMMAND: &str = "ca";
const SCAN_TYPE: &str = "analyze-applicability";

/// Phase 1: checks whether the CVEs found by the SCA scans are actually
/// reachable from the scanned code. Only runs when there is something to
/// check and at least one scanned technology supports the analysis.
pub struct ApplicabilityScanManager;

impl ApplicabilityScanManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ApplicabilityScanManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JasPhase for ApplicabilityScanManager {
    fn name(&self) -> &'static str {
        PHASE
    }

    fn enabled(&self, ctx: &JasContext) -> bool {
        if ctx.cve_sets.is_empty() {
            debug!("no vulnerable dependencies found, skipping applicability scan");
            return false;
        }
        if !ctx.technologies.iter().any(|t| t.supports_applicability()) {
            debug!("no scanned technology supports applicability analysis");
            return false;
        }
        true
    }

    async fn run(
        &self,
        ctx: &mut JasContext,
        analyzer: &dyn AnalyzerExecutor,
    ) -> Result<(), AuditError> {
        for root in ctx.roots.clone() {
            let mut entry = ScanConfiguration::new(&root, &ctx.results_path(PHASE), SCAN_TYPE);
            entry.cve_whitelist = ctx.cve_sets.direct.clone();
            entry.indirect_cve_whitelist = ctx.cve_sets.indirect.clone();
            entry.skipped_dirs = ctx.exclusions.iter().cloned().collect::<BTreeSet<_>>();
            if ctx.third_party_scan {
                info!("including node_modules folder in applicability scan");
                entry.skipped_dirs.remove(NODE_MODULES_PATTERN);
            }

            let runs = run_module_scan(ctx, analyzer, PHASE, SUBCOMMAND, entry, &root).await?;
            ctx.applicability.extend(runs);
        }
        Ok(())
    }
}
