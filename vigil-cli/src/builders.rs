use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use vigil::AuditError;
use vigil::graph::{self, DependencyNode};
use vigil::sca::{DependencyTreeResult, TreeBuilder};

/// Builds npm dependency graphs from an existing `package-lock.json`.
///
/// The lockfile already holds the resolved dependency set, so no resolution
/// happens here; a project without a lockfile counts as not installed.
pub struct NpmLockBuilder;

#[derive(Deserialize)]
struct NpmLockFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    packages: BTreeMap<String, NpmPackageEntry>,
}

#[derive(Deserialize)]
struct NpmPackageEntry {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: Option<BTreeMap<String, String>>,
}

fn npm_id(name: &str, version: &str) -> String {
    format!("npm://{name}:{version}")
}

/// `node_modules/@scope/pkg` nesting keys reduce to the package name.
fn package_name_from_key(key: &str) -> &str {
    match key.rfind("node_modules/") {
        Some(idx) => &key[idx + "node_modules/".len()..],
        None => key,
    }
}

#[async_trait]
impl TreeBuilder for NpmLockBuilder {
    async fn build_tree(&self, target: &Path) -> Result<DependencyTreeResult, AuditError> {
        let lock_path = target.join("package-lock.json");
        if !lock_path.exists() {
            return Err(AuditError::TreeBuildNotInstalled {
                target: target.to_path_buf(),
                reason: "package-lock.json not found, run 'npm install' first".to_string(),
            });
        }

        let raw = std::fs::read_to_string(&lock_path)?;
        let lock: NpmLockFile = serde_json::from_str(&raw).map_err(|e| AuditError::TreeBuild {
            target: target.to_path_buf(),
            reason: format!("invalid package-lock.json: {e}"),
        })?;

        // name -> (id, declared dependency names)
        let mut installed: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
        let mut root_dependencies: Vec<String> = Vec::new();
        let mut root_name = lock.name.clone().unwrap_or_else(|| "root".to_string());

        for (key, entry) in &lock.packages {
            if key.is_empty() {
                if let Some(version) = &entry.version {
                    root_name = format!("{root_name}:{version}");
                }
                root_dependencies = entry
                    .dependencies
                    .as_ref()
                    .map(|deps| deps.keys().cloned().collect())
                    .unwrap_or_default();
                continue;
            }
            let Some(version) = &entry.version else {
                continue;
            };
            let name = package_name_from_key(key);
            let children = entry
                .dependencies
                .as_ref()
                .map(|deps| deps.keys().cloned().collect())
                .unwrap_or_default();
            installed.insert(name.to_string(), (npm_id(name, version), children));
        }

        let direct_nodes: Vec<DependencyNode> = root_dependencies
            .iter()
            .filter_map(|name| installed.get(name).map(|entry| (name, entry)))
            .map(|(_, (id, children))| {
                let child_nodes = children
                    .iter()
                    .filter_map(|child| installed.get(child))
                    .map(|(child_id, _)| DependencyNode::new(child_id.clone()))
                    .collect();
                DependencyNode::with_children(id.clone(), child_nodes)
            })
            .collect();

        let unique_ids: Vec<String> = installed.values().map(|(id, _)| id.clone()).collect();
        debug!(count = unique_ids.len(), "npm dependency tree built");

        Ok(DependencyTreeResult {
            flat_tree: graph::flat_tree(unique_ids),
            full_trees: vec![DependencyNode::with_children(root_name, direct_nodes)],
            download_urls: BTreeMap::new(),
        })
    }
}

/// Builds Go dependency graphs from `go.mod` + `go.sum`. Direct dependencies
/// come from the require block (excluding `// indirect`), the full set from
/// `go.sum`.
pub struct GoModBuilder;

fn go_id(module: &str, version: &str) -> String {
    format!("go://{module}:{version}")
}

fn parse_go_mod(content: &str) -> (String, Vec<(String, String)>) {
    let mut module_name = "root".to_string();
    let mut direct = Vec::new();
    let mut in_require_block = false;

    for line in content.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("module ") {
            module_name = name.trim().to_string();
        } else if line.starts_with("require (") {
            in_require_block = true;
        } else if in_require_block && line == ")" {
            in_require_block = false;
        } else {
            let requirement = if in_require_block {
                Some(line)
            } else {
                line.strip_prefix("require ")
            };
            if let Some(req) = requirement {
                if req.contains("// indirect") {
                    continue;
                }
                let mut parts = req.split_whitespace();
                if let (Some(module), Some(version)) = (parts.next(), parts.next()) {
                    direct.push((module.to_string(), version.to_string()));
                }
            }
        }
    }
    (module_name, direct)
}

fn parse_go_sum(content: &str) -> Vec<(String, String)> {
    let mut seen = BTreeMap::new();
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(module), Some(version)) = (parts.next(), parts.next()) else {
            continue;
        };
        // go.sum lists each module twice, once with a "/go.mod" suffix.
        let version = version.trim_end_matches("/go.mod");
        seen.insert(module.to_string(), version.to_string());
    }
    seen.into_iter().collect()
}

#[async_trait]
impl TreeBuilder for GoModBuilder {
    async fn build_tree(&self, target: &Path) -> Result<DependencyTreeResult, AuditError> {
        let mod_path = target.join("go.mod");
        let sum_path = target.join("go.sum");
        if !mod_path.exists() {
            return Err(AuditError::TreeBuild {
                target: target.to_path_buf(),
                reason: "go.mod not found".to_string(),
            });
        }
        if !sum_path.exists() {
            return Err(AuditError::TreeBuildNotInstalled {
                target: target.to_path_buf(),
                reason: "go.sum not found, run 'go mod download' first".to_string(),
            });
        }

        let (module_name, direct) = parse_go_mod(&std::fs::read_to_string(&mod_path)?);
        let all_modules = parse_go_sum(&std::fs::read_to_string(&sum_path)?);

        let direct_nodes: Vec<DependencyNode> = direct
            .iter()
            .map(|(module, version)| DependencyNode::new(go_id(module, version)))
            .collect();
        let unique_ids: Vec<String> = all_modules
            .iter()
            .map(|(module, version)| go_id(module, version))
            .collect();
        debug!(count = unique_ids.len(), "go dependency tree built");

        Ok(DependencyTreeResult {
            flat_tree: graph::flat_tree(unique_ids),
            full_trees: vec![DependencyNode::with_children(module_name, direct_nodes)],
            download_urls: BTreeMap::new(),
        })
    }
}
