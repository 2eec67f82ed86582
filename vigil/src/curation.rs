use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::AuditError;
use crate::scan::{CURATION_FEATURE_ID, EntitlementClient};
use crate::tech::Technology;

pub const SKIP_CURATION_ENV: &str = "VIGIL_SKIP_CURATION_AFTER_FAILURE";
pub const SUMMARY_OUTPUT_DIR_ENV: &str = "VIGIL_SUMMARY_OUTPUT_DIR";

/// Package-manager commands whose failure can be explained by a curation
/// policy block.
const SUPPORTED_COMMANDS: &[&str] = &["install", "build", "i", "add", "ci", "get", "mod"];

pub fn is_supported_command(command: &str) -> bool {
    SUPPORTED_COMMANDS.contains(&command)
}

/// Captured at the moment an install command fails; consumed synchronously
/// by the handler and never persisted.
#[derive(Debug, Clone)]
pub struct CurationFailureContext {
    pub technology: Technology,
    pub command_name: String,
    pub error_text: String,
}

/// Outcome of the guard/classify steps, before any network is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurationDecision {
    UnsupportedCommand,
    Disabled,
    NoSummaryDir,
    NotBlockedByPolicy,
    Eligible,
}

/// Pure guard + classification: no environment, no network.
pub fn classify(
    ctx: &CurationFailureContext,
    skip_requested: bool,
    summary_dir: Option<&PathBuf>,
) -> CurationDecision {
    if !is_supported_command(&ctx.command_name) {
        return CurationDecision::UnsupportedCommand;
    }
    if skip_requested {
        return CurationDecision::Disabled;
    }
    if summary_dir.is_none() {
        return CurationDecision::NoSummaryDir;
    }
    if !is_blocked_by_policy(ctx.technology, &ctx.error_text) {
        return CurationDecision::NotBlockedByPolicy;
    }
    CurationDecision::Eligible
}

/// Whether the raw command output looks like a registry refusing a download
/// for policy reasons. Checked as a generic forbidden marker first, then a
/// per-package-manager phrasing.
fn is_blocked_by_policy(technology: Technology, error_text: &str) -> bool {
    if error_text.contains("403 Forbidden") {
        return true;
    }
    let signature = match technology {
        Technology::Npm | Technology::Pnpm | Technology::Yarn => "403 Forbidden - GET",
        Technology::Maven | Technology::Gradle => "status code: 403",
        Technology::Pip | Technology::Pipenv | Technology::Poetry => "403 Client Error",
        Technology::Go => "403 Forbidden",
        Technology::Nuget | Technology::Dotnet | Technology::Conan => "Response status code does not indicate success: 403",
    };
    error_text.contains(signature)
}

/// The full curation audit, supplied by the command layer.
#[async_trait]
pub trait CurationAudit: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Decides whether an install failure warrants a curation re-audit, and runs
/// it when it does. The original failure always belongs to the caller; this
/// gate only ever reports through logs.
pub struct CurationGate {
    entitlement: Arc<dyn EntitlementClient>,
    audit: Arc<dyn CurationAudit>,
    skip_requested: bool,
    summary_dir: Option<PathBuf>,
}

impl CurationGate {
    pub fn new(entitlement: Arc<dyn EntitlementClient>, audit: Arc<dyn CurationAudit>) -> Self {
        Self {
            entitlement,
            audit,
            skip_requested: false,
            summary_dir: None,
        }
    }

    /// Apply the `VIGIL_SKIP_CURATION_AFTER_FAILURE` and
    /// `VIGIL_SUMMARY_OUTPUT_DIR` environment overrides.
    pub fn from_env(entitlement: Arc<dyn EntitlementClient>, audit: Arc<dyn CurationAudit>) -> Self {
        Self::new(entitlement, audit)
            .skip_requested(std::env::var(SKIP_CURATION_ENV).as_deref() == Ok("true"))
            .summary_dir(std::env::var(SUMMARY_OUTPUT_DIR_ENV).ok().map(PathBuf::from))
    }

    pub fn skip_requested(mut self, skip: bool) -> Self {
        self.skip_requested = skip;
        self
    }

    pub fn summary_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.summary_dir = dir;
        self
    }

    /// Walk the state machine for one failure. Never returns an error: every
    /// terminal state is logged and swallowed so the caller's original error
    /// is the only one propagated.
    pub async fn inspect_after_failure(&self, ctx: &CurationFailureContext) {
        match classify(ctx, self.skip_requested, self.summary_dir.as_ref()) {
            CurationDecision::UnsupportedCommand => {
                debug!(command = %ctx.command_name, "command not eligible for curation inspection");
                return;
            }
            CurationDecision::Disabled => {
                debug!("curation inspection disabled by override");
                return;
            }
            CurationDecision::NoSummaryDir => {
                debug!("no summary output directory configured, skipping curation inspection");
                return;
            }
            CurationDecision::NotBlockedByPolicy => {
                debug!(technology = %ctx.technology, "failure does not look like a policy block");
                return;
            }
            CurationDecision::Eligible => {}
        }

        match self.entitlement.is_entitled(CURATION_FEATURE_ID).await {
            Ok(true) => {}
            Ok(false) => {
                info!("curation feature is not entitled, skipping curation audit");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to query curation entitlement");
                return;
            }
        }

        info!(technology = %ctx.technology, "running curation audit after failure");
        if let Err(e) = self.audit.run().await {
            warn!(error = %e, "curation audit after failure did not complete");
        }
    }
}

/// Wrap a command result: on failure, give the curation gate a chance to
/// explain it, then hand back the untouched original error.
pub async fn run_with_curation_inspect<T>(
    result: Result<T, AuditError>,
    gate: &CurationGate,
    technology: Technology,
    command_name: &str,
) -> Result<T, AuditError> {
    match result {
        Ok(value) => Ok(value),
        Err(original) => {
            let ctx = CurationFailureContext {
                technology,
                command_name: command_name.to_string(),
                error_text: original.to_string(),
            };
            gate.inspect_after_failure(&ctx).await;
            Err(original)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEntitlement {
        entitled: Result<bool, String>,
        queries: AtomicUsize,
    }

    impl FakeEntitlement {
        fn yes() -> Self {
            Self {
                entitled: Ok(true),
                queries: AtomicUsize::new(0),
            }
        }

        fn no() -> Self {
            Self {
                entitled: Ok(false),
                queries: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                entitled: Err("entitlement service unavailable".to_string()),
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EntitlementClient for FakeEntitlement {
        async fn is_entitled(&self, _feature_id: &str) -> anyhow::Result<bool> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.entitled.clone().map_err(|e| anyhow!(e))
        }
    }

    #[derive(Default)]
    struct RecordingAudit {
        runs: Mutex<usize>,
        fail: bool,
    }

    impl RecordingAudit {
        fn run_count(&self) -> usize {
            *self.runs.lock().unwrap()
        }
    }

    #[async_trait]
    impl CurationAudit for RecordingAudit {
        async fn run(&self) -> anyhow::Result<()> {
            *self.runs.lock().unwrap() += 1;
            if self.fail {
                return Err(anyhow!("curation audit failed"));
            }
            Ok(())
        }
    }

    fn npm_failure(error_text: &str) -> CurationFailureContext {
        CurationFailureContext {
            technology: Technology::Npm,
            command_name: "install".to_string(),
            error_text: error_text.to_string(),
        }
    }

    fn summary_dir() -> Option<PathBuf> {
        Some(PathBuf::from("/tmp/summaries"))
    }

    #[test]
    fn supported_command_set_is_fixed() {
        for cmd in ["install", "build", "i", "add", "ci", "get", "mod"] {
            assert!(is_supported_command(cmd));
        }
        assert!(!is_supported_command("publish"));
        assert!(!is_supported_command("run"));
    }

    #[test]
    fn unsupported_command_is_terminal() {
        let mut ctx = npm_failure("403 Forbidden");
        ctx.command_name = "publish".to_string();
        assert_eq!(
            classify(&ctx, false, summary_dir().as_ref()),
            CurationDecision::UnsupportedCommand
        );
    }

    #[test]
    fn skip_override_wins_over_eligibility() {
        let ctx = npm_failure("403 Forbidden");
        assert_eq!(
            classify(&ctx, true, summary_dir().as_ref()),
            CurationDecision::Disabled
        );
    }

    #[test]
    fn missing_summary_dir_is_terminal() {
        let ctx = npm_failure("403 Forbidden");
        assert_eq!(classify(&ctx, false, None), CurationDecision::NoSummaryDir);
    }

    #[test]
    fn ordinary_failure_is_not_policy_blocked() {
        let ctx = npm_failure("ENOTFOUND registry.example.com");
        assert_eq!(
            classify(&ctx, false, summary_dir().as_ref()),
            CurationDecision::NotBlockedByPolicy
        );
    }

    #[test]
    fn forbidden_failure_is_eligible() {
        let ctx = npm_failure("npm ERR! 403 Forbidden - GET https://registry/lodash");
        assert_eq!(
            classify(&ctx, false, summary_dir().as_ref()),
            CurationDecision::Eligible
        );
    }

    #[test]
    fn maven_signature_is_technology_specific() {
        let ctx = CurationFailureContext {
            technology: Technology::Maven,
            command_name: "install".to_string(),
            error_text: "Could not transfer artifact: status code: 403".to_string(),
        };
        assert_eq!(
            classify(&ctx, false, summary_dir().as_ref()),
            CurationDecision::Eligible
        );

        let pip_text_on_maven = CurationFailureContext {
            error_text: "403 Client Error".to_string(),
            ..ctx
        };
        assert_eq!(
            classify(&pip_text_on_maven, false, summary_dir().as_ref()),
            CurationDecision::NotBlockedByPolicy
        );
    }

    #[tokio::test]
    async fn entitled_failure_runs_the_audit() {
        let audit = Arc::new(RecordingAudit::default());
        let gate = CurationGate::new(Arc::new(FakeEntitlement::yes()), audit.clone())
            .summary_dir(summary_dir());

        gate.inspect_after_failure(&npm_failure("403 Forbidden")).await;

        assert_eq!(audit.run_count(), 1);
    }

    #[tokio::test]
    async fn not_entitled_skips_the_audit() {
        let audit = Arc::new(RecordingAudit::default());
        let gate = CurationGate::new(Arc::new(FakeEntitlement::no()), audit.clone())
            .summary_dir(summary_dir());

        gate.inspect_after_failure(&npm_failure("403 Forbidden")).await;

        assert_eq!(audit.run_count(), 0);
    }

    #[tokio::test]
    async fn entitlement_failure_is_terminal_and_logged_only() {
        let audit = Arc::new(RecordingAudit::default());
        let gate = CurationGate::new(Arc::new(FakeEntitlement::failing()), audit.clone())
            .summary_dir(summary_dir());

        gate.inspect_after_failure(&npm_failure("403 Forbidden")).await;

        assert_eq!(audit.run_count(), 0);
    }

    #[tokio::test]
    async fn no_entitlement_query_for_unsupported_command() {
        let entitlement = Arc::new(FakeEntitlement::yes());
        let audit = Arc::new(RecordingAudit::default());
        let gate =
            CurationGate::new(entitlement.clone(), audit.clone()).summary_dir(summary_dir());

        let mut ctx = npm_failure("403 Forbidden");
        ctx.command_name = "publish".to_string();
        gate.inspect_after_failure(&ctx).await;

        assert_eq!(entitlement.queries.load(Ordering::SeqCst), 0);
        assert_eq!(audit.run_count(), 0);
    }

    #[tokio::test]
    async fn wrapper_returns_original_error_unchanged() {
        let audit = Arc::new(RecordingAudit {
            fail: true,
            ..RecordingAudit::default()
        });
        let gate = CurationGate::new(Arc::new(FakeEntitlement::yes()), audit.clone())
            .summary_dir(summary_dir());

        let original: Result<(), AuditError> = Err(AuditError::TreeBuild {
            target: PathBuf::from("web"),
            reason: "npm ERR! 403 Forbidden - GET".to_string(),
        });

        let returned =
            run_with_curation_inspect(original, &gate, Technology::Npm, "install").await;

        // The audit ran (and failed), yet the caller still sees the original
        // tree-build failure.
        assert_eq!(audit.run_count(), 1);
        let err = returned.unwrap_err();
        assert!(matches!(err, AuditError::TreeBuild { .. }));
        assert!(err.to_string().contains("403 Forbidden"));
    }

    #[tokio::test]
    async fn wrapper_passes_success_through() {
        let audit = Arc::new(RecordingAudit::default());
        let gate = CurationGate::new(Arc::new(FakeEntitlement::yes()), audit.clone())
            .summary_dir(summary_dir());

        let result = run_with_curation_inspect(Ok(7), &gate, Technology::Npm, "install").await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(audit.run_count(), 0);
    }
}
