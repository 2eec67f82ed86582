use std::collections::BTreeSet;

use crate::scan::{Finding, ScanResponse};

/// Direct/indirect CVE partition over a full audit's scan responses.
///
/// Every CVE id from every finding lands in exactly one of the two sets: the
/// direct set when any affected component is a direct dependency, the
/// indirect set otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CveSets {
    pub direct: BTreeSet<String>,
    pub indirect: BTreeSet<String>,
}

impl CveSets {
    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.indirect.is_empty()
    }
}

/// Recomputed once per audit from the complete SCA result set; never
/// incremental, so list order is irrelevant.
pub fn partition_cves(
    responses: &[ScanResponse],
    direct_dependencies: &BTreeSet<String>,
) -> CveSets {
    let mut sets = CveSets::default();
    for response in responses {
        for finding in response.findings() {
            let target = if affects_direct_component(finding, direct_dependencies) {
                &mut sets.direct
            } else {
                &mut sets.indirect
            };
            for cve in &finding.cves {
                if !cve.id.is_empty() {
                    target.insert(cve.id.clone());
                }
            }
        }
    }
    sets
}

fn affects_direct_component(finding: &Finding, direct_dependencies: &BTreeSet<String>) -> bool {
    finding
        .components
        .keys()
        .any(|id| direct_dependencies.contains(id))
}
