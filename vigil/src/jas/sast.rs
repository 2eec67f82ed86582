use async_trait::async_trait;

use crate::error::AuditError;
use crate::jas::analyzer::AnalyzerExecutor;
use crate::jas::config::ScanConfiguration;
use crate::jas::{JasContext, JasPhase, run_module_scan};

pub const PHASE: &str = "sast";
const SUBCOMMAND: &str = "sast";
const SCAN_TYPE: &str = "sast-scan";

/// Phase 4: static analysis of first-party source for insecure patterns.
pub struct SastScanManager;

impl SastScanManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SastScanManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JasPhase for SastScanManager {
    fn name(&self) -> &'static str {
        PHASE
    }

    async fn run(
        &self,
        ctx: &mut JasContext,
        analyzer: &dyn AnalyzerExecutor,
    ) -> Result<(), AuditError> {
        for root in ctx.roots.clone() {
            let mut entry = ScanConfiguration::new(&root, &ctx.results_path(PHASE), SCAN_TYPE);
            entry.skipped_dirs = ctx.exclusions.iter().cloned().collect();

            let runs = run_module_scan(ctx, analyzer, PHASE, SUBCOMMAND, entry, &root).await?;
            ctx.sast.extend(runs);
        }
        Ok(())
    }
}
