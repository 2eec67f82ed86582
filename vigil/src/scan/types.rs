use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::graph::{self, DependencyNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cve {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_v3_score: Option<String>,
}

impl Cve {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cvss_v3_score: None,
        }
    }
}

/// A component affected by a finding, keyed by dependency id in the parent
/// finding's `components` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_versions: Vec<String>,
    /// Root-to-component dependency chains, attached by the orchestrator
    /// from the full trees after the scan returns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impact_paths: Vec<Vec<String>>,
}

/// A single vulnerability or policy violation from a graph scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub cves: Vec<Cve>,
    #[serde(default)]
    pub components: BTreeMap<String, Component>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    #[serde(default)]
    pub scan_id: String,
    #[serde(default)]
    pub vulnerabilities: Vec<Finding>,
    #[serde(default)]
    pub violations: Vec<Finding>,
}

impl ScanResponse {
    /// Vulnerabilities and violations, in that order.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.vulnerabilities.iter().chain(self.violations.iter())
    }
}

/// Attach impact paths from the full dependency trees to every affected
/// component of every finding.
pub fn attach_impact_paths(responses: &mut [ScanResponse], full_trees: &[DependencyNode]) {
    for response in responses {
        for finding in response
            .vulnerabilities
            .iter_mut()
            .chain(response.violations.iter_mut())
        {
            for (component_id, component) in &mut finding.components {
                component.impact_paths = graph::impact_paths(full_trees, component_id);
            }
        }
    }
}
