use std::path::Path;

use serde::Serialize;

use crate::error::AuditError;
use crate::jas::sarif::{self, SarifRun};
use crate::sca::ScaScanResult;
use crate::scan::ScanResponse;

/// Everything one audit run produced, including the failures that were
/// accumulated along the way.
#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub sca: Vec<ScaScanResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applicability: Vec<SarifRun>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SarifRun>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub iac: Vec<SarifRun>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sast: Vec<SarifRun>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl AuditReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn total_vulnerability_count(&self) -> usize {
        self.sca
            .iter()
            .flat_map(|r| r.responses.iter())
            .map(|response| response.vulnerabilities.len() + response.violations.len())
            .sum()
    }
}

pub trait OutputFormatter {
    fn write_results(
        &self,
        report: &AuditReport,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()>;
}

pub struct TextOutput;

impl OutputFormatter for TextOutput {
    fn write_results(
        &self,
        report: &AuditReport,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()> {
        for scan in &report.sca {
            writeln!(writer, "{} [{}]", scan.target.display(), scan.technology)?;

            let mut any = false;
            for response in &scan.responses {
                for finding in response.findings() {
                    any = true;
                    let severity = finding
                        .severity
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    let cves: Vec<&str> = finding.cves.iter().map(|c| c.id.as_str()).collect();
                    writeln!(
                        writer,
                        "  [{severity}] {} ({})",
                        finding.summary,
                        cves.join(", ")
                    )?;
                    for component in finding.components.keys() {
                        writeln!(writer, "    affects: {component}")?;
                    }
                }
            }
            if !any {
                writeln!(writer, "  no vulnerabilities found")?;
            }
        }

        let phases = [
            ("applicability", &report.applicability),
            ("secrets", &report.secrets),
            ("iac", &report.iac),
            ("sast", &report.sast),
        ];
        for (name, runs) in phases {
            if !runs.is_empty() {
                writeln!(writer, "{name}: {} findings", sarif::location_count(runs))?;
            }
        }

        if !report.errors.is_empty() {
            writeln!(writer, "errors:")?;
            for error in &report.errors {
                writeln!(writer, "  {error}")?;
            }
        }
        Ok(())
    }
}

pub struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn write_results(
        &self,
        report: &AuditReport,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, report)?;
        writeln!(writer)?;
        Ok(())
    }
}

pub fn formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput)
    } else {
        Box::new(TextOutput)
    }
}

/// Write one completed scan's responses to
/// `<dir>/<scan_type>_results_<index>.json`, creating the directory on
/// first use.
pub fn dump_scan_results(
    dir: &Path,
    scan_type: &str,
    index: usize,
    responses: &[ScanResponse],
) -> Result<(), AuditError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{scan_type}_results_{index}.json"));
    let file_content = serde_json::to_vec_pretty(responses).map_err(std::io::Error::other)?;
    std::fs::write(&path, file_content)?;
    tracing::debug!(path = %path.display(), "scan results dumped");
    Ok(())
}
