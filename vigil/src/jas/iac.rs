use async_trait::async_trait;

use crate::error::AuditError;
use crate::jas::analyzer::AnalyzerExecutor;
use crate::jas::config::ScanConfiguration;
use crate::jas::{JasContext, JasPhase, run_module_scan};

pub const PHASE: &str = "iac";
const SUBCOMMAND: &str = "iac";
const SCAN_TYPE: &str = "iac-scan-modules";

/// Phase 3: scans infrastructure-as-code files for misconfigurations.
pub struct IacScanManager;

impl IacScanManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IacScanManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JasPhase for IacScanManager {
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
            ctx.iac.extend(runs);
        }
        Ok(())
    }
}
