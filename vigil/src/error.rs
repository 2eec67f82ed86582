use std::path::PathBuf;

/// Audit failure kinds. Per-target failures are accumulated into
/// [`AuditError::Joined`] instead of aborting the run; phase and install
/// failures are fatal to their own flow only.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The project under `target` has never been installed/built, so no
    /// dependency tree exists. Non-fatal: the target is skipped.
    #[error("project in '{target}' is not installed, skipping: {reason}")]
    TreeBuildNotInstalled { target: PathBuf, reason: String },

    #[error("dependency tree construction failed for '{target}': {reason}")]
    TreeBuild { target: PathBuf, reason: String },

    #[error("no dependencies were found in '{target}'; build the project and re-run the audit")]
    NoDependencies { target: PathBuf },

    #[error("no dependency tree builder is registered for {technology}")]
    UnsupportedTechnology { technology: String },

    #[error("graph scan for '{target}' ({technology}) failed: {reason}")]
    GraphScan {
        target: PathBuf,
        technology: String,
        reason: String,
    },

    #[error("analyzer execution failed in {phase} phase: {reason}")]
    AnalyzerExec { phase: String, reason: String },

    #[error("analyzer install failed: {0}")]
    AnalyzerInstall(String),

    #[error("failed to write {phase} scan configuration: {reason}")]
    ConfigWrite { phase: String, reason: String },

    #[error("failed to parse {phase} results file '{path}': {reason}")]
    ResultsParse {
        phase: String,
        path: PathBuf,
        reason: String,
    },

    #[error("entitlement query for '{feature}' failed: {reason}")]
    Entitlement { feature: String, reason: String },

    #[error("audit was cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}", join_messages(.0))]
    Joined(Vec<AuditError>),
}

impl AuditError {
    /// True for failures that skip a target without counting against the
    /// command's exit status.
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, AuditError::TreeBuildNotInstalled { .. })
    }

    /// One message per accumulated failure; a single message otherwise.
    pub fn messages(&self) -> Vec<String> {
        match self {
            AuditError::Joined(errors) => errors.iter().map(|e| e.to_string()).collect(),
            other => vec![other.to_string()],
        }
    }
}

fn join_messages(errors: &[AuditError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accumulates target-scoped failures so one bad target never cancels the
/// others. Drained into a single joined error once all tasks have finished.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<AuditError>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: AuditError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Collapse into a result: `Ok` when nothing was accumulated, the single
    /// error when exactly one was, a joined error otherwise.
    pub fn into_result(mut self) -> Result<(), AuditError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(AuditError::Joined(self.errors)),
        }
    }
}
