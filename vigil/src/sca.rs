use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuditError, ErrorCollector};
use crate::graph::{self, DependencyNode};
use crate::output;
use crate::scan::{GraphScanClient, ScanResponse, Severity, attach_impact_paths};
use crate::tech::Technology;

/// Outcome of one technology's dependency tree construction.
#[derive(Debug, Clone)]
pub struct DependencyTreeResult {
    pub flat_tree: DependencyNode,
    pub full_trees: Vec<DependencyNode>,
    pub download_urls: BTreeMap<String, String>,
}

/// Builds the dependency graph for one technology in one working directory.
///
/// Builders may rely on process-global state (e.g. the working directory),
/// so the orchestrator never runs two builds concurrently.
#[async_trait]
pub trait TreeBuilder: Send + Sync {
    async fn build_tree(&self, target: &Path) -> Result<DependencyTreeResult, AuditError>;
}

/// Technology-to-builder lookup. Adding a technology means registering a new
/// builder, not editing a dispatch site.
#[derive(Default)]
pub struct TreeBuilderRegistry {
    builders: BTreeMap<Technology, Arc<dyn TreeBuilder>>,
}

impl TreeBuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, technology: Technology, builder: Arc<dyn TreeBuilder>) {
        self.builders.insert(technology, builder);
    }

    pub fn get(&self, technology: Technology) -> Option<Arc<dyn TreeBuilder>> {
        self.builders.get(&technology).cloned()
    }

    pub fn supported(&self) -> Vec<Technology> {
        self.builders.keys().copied().collect()
    }
}

/// One (technology, working directory) pair selected for scanning.
#[derive(Debug, Clone)]
pub struct ScaTarget {
    pub target: PathBuf,
    pub technology: Technology,
    pub descriptors: Vec<PathBuf>,
}

/// Completed scan for one target, appended read-only to the shared results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScaScanResult {
    pub target: PathBuf,
    pub technology: Technology,
    pub descriptors: Vec<PathBuf>,
    pub responses: Vec<ScanResponse>,
    pub is_multiple_root: bool,
}

/// Shared aggregate for one audit run. Guarded as a whole by one mutex so a
/// task's append and candidate recording are a single critical section.
#[derive(Debug, Default)]
pub struct AuditResults {
    pub sca: Vec<ScaScanResult>,
    pub applicability_candidates: BTreeSet<String>,
    dump_counter: usize,
}

impl AuditResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scanned_technologies(&self) -> Vec<Technology> {
        let mut techs: Vec<Technology> = self.sca.iter().map(|r| r.technology).collect();
        techs.sort();
        techs.dedup();
        techs
    }

    pub fn all_responses(&self) -> Vec<ScanResponse> {
        self.sca
            .iter()
            .flat_map(|r| r.responses.iter().cloned())
            .collect()
    }
}

pub type SharedAuditResults = Arc<Mutex<AuditResults>>;

/// Schedules one scan task per target on a bounded pool. Tree construction
/// stays on the submitting task; only successful builds become scan tasks.
pub struct ScaRunner {
    registry: Arc<TreeBuilderRegistry>,
    client: Arc<dyn GraphScanClient>,
    concurrency: usize,
    min_severity: Option<Severity>,
    third_party_applicability: bool,
    results_output_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl ScaRunner {
    pub fn new(
        registry: Arc<TreeBuilderRegistry>,
        client: Arc<dyn GraphScanClient>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            client,
            concurrency: concurrency.max(1),
            min_severity: None,
            third_party_applicability: false,
            results_output_dir: None,
            cancel,
        }
    }

    pub fn min_severity(mut self, severity: Option<Severity>) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn third_party_applicability(mut self, enabled: bool) -> Self {
        self.third_party_applicability = enabled;
        self
    }

    pub fn results_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.results_output_dir = dir;
        self
    }

    /// Run all targets and block until every submitted task has finished.
    ///
    /// A single target's failure never cancels the others; all failures are
    /// joined into the returned error. Non-fatal "not installed" tree builds
    /// only log and skip.
    #[instrument(skip(self, targets, results), fields(targets = targets.len()))]
    pub async fn run(
        &self,
        targets: Vec<ScaTarget>,
        results: &SharedAuditResults,
    ) -> Result<(), AuditError> {
        let mut collector = ErrorCollector::new();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();

        info!(count = targets.len(), "performing SCA scans");

        for target in targets {
            if self.cancel.is_cancelled() {
                collector.push(AuditError::Cancelled);
                break;
            }

            let Some(builder) = self.registry.get(target.technology) else {
                collector.push(AuditError::UnsupportedTechnology {
                    technology: target.technology.to_string(),
                });
                continue;
            };

            // Serialized on purpose: builders may change the process working
            // directory.
            let tree = match builder.build_tree(&target.target).await {
                Ok(tree) => tree,
                Err(e) if e.is_non_fatal() => {
                    warn!(target = %target.target.display(), error = %e, "skipping target");
                    continue;
                }
                Err(e) => {
                    collector.push(e);
                    continue;
                }
            };
            if tree.flat_tree.nodes.is_empty() {
                collector.push(AuditError::NoDependencies {
                    target: target.target.clone(),
                });
                continue;
            }

            let task_target = target.target.clone();
            let task_tech = target.technology;
            let task = ScanTask {
                client: self.client.clone(),
                cancel: self.cancel.clone(),
                min_severity: self.min_severity,
                third_party_applicability: self.third_party_applicability,
                results_output_dir: self.results_output_dir.clone(),
                target,
                tree,
                semaphore: semaphore.clone(),
                results: results.clone(),
            };
            handles.push((task_target, task_tech, tokio::spawn(task.run())));
        }

        for (target, technology, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => collector.push(e),
                Err(e) => collector.push(AuditError::GraphScan {
                    target,
                    technology: technology.to_string(),
                    reason: format!("scan task aborted: {e}"),
                }),
            }
        }

        collector.into_result()
    }
}

/// Everything one spawned scan task owns.
struct ScanTask {
    client: Arc<dyn GraphScanClient>,
    cancel: CancellationToken,
    min_severity: Option<Severity>,
    third_party_applicability: bool,
    results_output_dir: Option<PathBuf>,
    target: ScaTarget,
    tree: DependencyTreeResult,
    semaphore: Arc<Semaphore>,
    results: SharedAuditResults,
}

impl ScanTask {
    async fn run(self) -> Result<(), AuditError> {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AuditError::Cancelled),
            permit = self.semaphore.acquire_owned() => {
                permit.map_err(|_| AuditError::Cancelled)?
            }
        };

        debug!(target = %self.target.target.display(), technology = %self.target.technology, "running SCA scan");

        let scan_result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AuditError::Cancelled),
            result = self.client.scan(&self.tree.flat_tree, self.min_severity) => result,
        };
        let mut responses = scan_result.map_err(|e| AuditError::GraphScan {
            target: self.target.target.clone(),
            technology: self.target.technology.to_string(),
            reason: format!("{e:#}"),
        })?;

        attach_impact_paths(&mut responses, &self.tree.full_trees);

        let candidates = if self
            .target
            .technology
            .uses_all_dependencies_for_applicability(self.third_party_applicability)
        {
            graph::first_level_ids(std::slice::from_ref(&self.tree.flat_tree))
        } else {
            graph::first_level_ids(&self.tree.full_trees)
        };

        let scan = ScaScanResult {
            target: self.target.target,
            technology: self.target.technology,
            descriptors: self.target.descriptors,
            responses,
            is_multiple_root: self.tree.full_trees.len() > 1,
        };

        // One critical section for the whole read-modify-write.
        let dump = {
            let mut shared = self.results.lock().expect("audit results lock poisoned");
            shared.applicability_candidates.extend(candidates);
            shared.sca.push(scan);
            shared.dump_counter += 1;
            self.results_output_dir.map(|dir| {
                (
                    dir,
                    shared.dump_counter,
                    shared.sca.last().expect("just pushed").responses.clone(),
                )
            })
        };

        if let Some((dir, index, responses)) = dump {
            output::dump_scan_results(&dir, "sca", index, &responses)?;
        }

        Ok(())
    }
}
