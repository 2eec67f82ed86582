use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A node in a dependency graph. The flat tree is a single root whose
/// children are the project's unique dependencies; full trees preserve the
/// real nesting and are used for direct-dependency extraction and impact
/// paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<DependencyNode>,
}

impl DependencyNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            types: None,
            classifier: None,
            nodes: Vec::new(),
        }
    }

    pub fn with_children(id: impl Into<String>, nodes: Vec<DependencyNode>) -> Self {
        Self {
            nodes,
            ..Self::new(id)
        }
    }
}

/// Attributes attached to a unique dependency when the builder knows more
/// than its id.
#[derive(Debug, Clone, Default)]
pub struct NodeAttributes {
    pub types: Option<Vec<String>>,
    pub classifier: Option<String>,
}

pub const FLAT_TREE_ROOT: &str = "root";

/// Collapse a unique dependency id list into the single-level tree the graph
/// scan consumes.
pub fn flat_tree(unique_deps: impl IntoIterator<Item = String>) -> DependencyNode {
    let nodes = unique_deps.into_iter().map(DependencyNode::new).collect();
    DependencyNode::with_children(FLAT_TREE_ROOT, nodes)
}

/// Same as [`flat_tree`], carrying per-node type/classifier attributes.
pub fn flat_tree_with_attributes(
    unique_deps: BTreeMap<String, NodeAttributes>,
) -> DependencyNode {
    let nodes = unique_deps
        .into_iter()
        .map(|(id, attrs)| DependencyNode {
            id,
            types: attrs.types,
            classifier: attrs.classifier,
            nodes: Vec::new(),
        })
        .collect();
    DependencyNode::with_children(FLAT_TREE_ROOT, nodes)
}

/// Ids appearing at the first level of the given trees. Over full trees this
/// is the direct-dependency set; over a flat tree it is every dependency.
pub fn first_level_ids(trees: &[DependencyNode]) -> BTreeSet<String> {
    trees
        .iter()
        .flat_map(|tree| tree.nodes.iter().map(|n| n.id.clone()))
        .collect()
}

/// Every root-to-`target_id` chain across the given full trees, root first.
pub fn impact_paths(trees: &[DependencyNode], target_id: &str) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    let mut trail = Vec::new();
    for tree in trees {
        collect_paths(tree, target_id, &mut trail, &mut paths);
    }
    paths
}

fn collect_paths(
    node: &DependencyNode,
    target_id: &str,
    trail: &mut Vec<String>,
    paths: &mut Vec<Vec<String>>,
) {
    trail.push(node.id.clone());
    if node.id == target_id {
        paths.push(trail.clone());
    } else {
        for child in &node.nodes {
            collect_paths(child, target_id, trail, paths);
        }
    }
    trail.pop();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> DependencyNode {
        DependencyNode::with_children(
            "app:1.0.0",
            vec![
                DependencyNode::with_children(
                    "npm://express:4.18.0",
                    vec![DependencyNode::new("npm://qs:6.11.0")],
                ),
                DependencyNode::new("npm://lodash:4.17.21"),
            ],
        )
    }

    #[test]
    fn flat_tree_has_synthetic_root() {
        let tree = flat_tree(vec!["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(tree.id, FLAT_TREE_ROOT);
        assert_eq!(tree.nodes.len(), 2);
        assert!(tree.nodes.iter().all(|n| n.nodes.is_empty()));
    }

    #[test]
    fn flat_tree_with_attributes_keeps_types() {
        let mut deps = BTreeMap::new();
        deps.insert(
            "maven://junit:4.13".to_string(),
            NodeAttributes {
                types: Some(vec!["jar".to_string()]),
                classifier: Some("tests".to_string()),
            },
        );
        let tree = flat_tree_with_attributes(deps);
        assert_eq!(tree.nodes[0].types.as_deref(), Some(&["jar".to_string()][..]));
        assert_eq!(tree.nodes[0].classifier.as_deref(), Some("tests"));
    }

    #[test]
    fn first_level_ids_returns_direct_dependencies() {
        let direct = first_level_ids(&[sample_tree()]);
        assert!(direct.contains("npm://express:4.18.0"));
        assert!(direct.contains("npm://lodash:4.17.21"));
        assert!(!direct.contains("npm://qs:6.11.0"));
    }

    #[test]
    fn first_level_ids_merges_multiple_roots() {
        let other = DependencyNode::with_children(
            "other:1.0.0",
            vec![DependencyNode::new("npm://axios:1.6.0")],
        );
        let direct = first_level_ids(&[sample_tree(), other]);
        assert!(direct.contains("npm://axios:1.6.0"));
        assert!(direct.contains("npm://lodash:4.17.21"));
    }

    #[test]
    fn impact_path_reaches_transitive_dependency() {
        let paths = impact_paths(&[sample_tree()], "npm://qs:6.11.0");
        assert_eq!(
            paths,
            vec![vec![
                "app:1.0.0".to_string(),
                "npm://express:4.18.0".to_string(),
                "npm://qs:6.11.0".to_string(),
            ]]
        );
    }

    #[test]
    fn impact_paths_missing_component_is_empty() {
        let paths = impact_paths(&[sample_tree()], "npm://left-pad:1.3.0");
        assert!(paths.is_empty());
    }

    #[test]
    fn impact_paths_stop_at_first_match_per_branch() {
        // A match is terminal for its branch; nothing below it is searched.
        let tree = DependencyNode::with_children(
            "app:1.0.0",
            vec![DependencyNode::with_children(
                "npm://a:1.0.0",
                vec![DependencyNode::new("npm://a:1.0.0")],
            )],
        );
        let paths = impact_paths(&[tree], "npm://a:1.0.0");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 2);
    }
}
