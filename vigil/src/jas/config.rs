use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuditError;

/// Configuration file handed to the analyzer binary: an ordered list of scan
/// entries, one per source module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScansConfig {
    pub scans: Vec<ScanConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfiguration {
    /// Source roots, order-significant.
    pub roots: Vec<PathBuf>,
    /// Where the analyzer writes its results file.
    pub output: PathBuf,
    #[serde(rename = "type")]
    pub scan_type: String,
    #[serde(
        rename = "cve-whitelist",
        default,
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub cve_whitelist: BTreeSet<String>,
    #[serde(
        rename = "indirect-cve-whitelist",
        default,
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub indirect_cve_whitelist: BTreeSet<String>,
    #[serde(rename = "skipped-folders", default)]
    pub skipped_dirs: BTreeSet<String>,
}

impl ScanConfiguration {
    pub fn new(root: &Path, output: &Path, scan_type: impl Into<String>) -> Self {
        Self {
            roots: vec![root.to_path_buf()],
            output: output.to_path_buf(),
            scan_type: scan_type.into(),
            cve_whitelist: BTreeSet::new(),
            indirect_cve_whitelist: BTreeSet::new(),
            skipped_dirs: BTreeSet::new(),
        }
    }
}

/// Serialize the configuration to YAML at `path`.
pub fn write_config(path: &Path, config: &ScansConfig, phase: &str) -> Result<(), AuditError> {
    let yaml = serde_yaml::to_string(config).map_err(|e| AuditError::ConfigWrite {
        phase: phase.to_string(),
        reason: e.to_string(),
    })?;
    std::fs::write(path, yaml).map_err(|e| AuditError::ConfigWrite {
        phase: phase.to_string(),
        reason: format!("cannot write '{}': {e}", path.display()),
    })?;
    debug!(phase, path = %path.display(), "scan configuration written");
    Ok(())
}
