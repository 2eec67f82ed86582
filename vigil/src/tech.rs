use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Technology {
    Npm,
    Pnpm,
    Yarn,
    Maven,
    Gradle,
    Go,
    Pip,
    Pipenv,
    Poetry,
    Nuget,
    Dotnet,
    Conan,
}

impl Technology {
    /// Descriptor files whose presence marks a directory as using this
    /// technology. Dotnet is intentionally absent: it shares Nuget's
    /// descriptors and is collapsed into Nuget to avoid duplicate scans.
    pub fn descriptors(&self) -> &'static [&'static str] {
        match self {
            Technology::Npm => &["package.json"],
            Technology::Pnpm => &["pnpm-lock.yaml"],
            Technology::Yarn => &["yarn.lock"],
            Technology::Maven => &["pom.xml"],
            Technology::Gradle => &["build.gradle", "build.gradle.kts"],
            Technology::Go => &["go.mod"],
            Technology::Pip => &["requirements.txt", "setup.py", "pyproject.toml"],
            Technology::Pipenv => &["Pipfile"],
            Technology::Poetry => &["poetry.lock"],
            Technology::Nuget | Technology::Dotnet => &["packages.config"],
            Technology::Conan => &["conanfile.txt", "conanfile.py"],
        }
    }

    /// Whether findings in this technology's dependencies can be checked for
    /// applicability by the analyzer.
    pub fn supports_applicability(&self) -> bool {
        matches!(
            self,
            Technology::Npm
                | Technology::Pnpm
                | Technology::Yarn
                | Technology::Maven
                | Technology::Gradle
                | Technology::Go
                | Technology::Pip
                | Technology::Pipenv
                | Technology::Poetry
        )
    }

    /// Pip dependency trees under-report direct dependencies, so every node
    /// becomes an applicability candidate. Npm gets the same treatment when
    /// scanning third-party code.
    pub fn uses_all_dependencies_for_applicability(&self, third_party_scan: bool) -> bool {
        *self == Technology::Pip || (third_party_scan && *self == Technology::Npm)
    }

    pub fn all() -> &'static [Technology] {
        &[
            Technology::Npm,
            Technology::Pnpm,
            Technology::Yarn,
            Technology::Maven,
            Technology::Gradle,
            Technology::Go,
            Technology::Pip,
            Technology::Pipenv,
            Technology::Poetry,
            Technology::Nuget,
            Technology::Dotnet,
            Technology::Conan,
        ]
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Technology::Npm => "npm",
            Technology::Pnpm => "pnpm",
            Technology::Yarn => "yarn",
            Technology::Maven => "maven",
            Technology::Gradle => "gradle",
            Technology::Go => "go",
            Technology::Pip => "pip",
            Technology::Pipenv => "pipenv",
            Technology::Poetry => "poetry",
            Technology::Nuget => "nuget",
            Technology::Dotnet => "dotnet",
            Technology::Conan => "conan",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Technology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "npm" => Ok(Technology::Npm),
            "pnpm" => Ok(Technology::Pnpm),
            "yarn" => Ok(Technology::Yarn),
            "maven" => Ok(Technology::Maven),
            "gradle" => Ok(Technology::Gradle),
            "go" => Ok(Technology::Go),
            "pip" => Ok(Technology::Pip),
            "pipenv" => Ok(Technology::Pipenv),
            "poetry" => Ok(Technology::Poetry),
            "nuget" => Ok(Technology::Nuget),
            "dotnet" => Ok(Technology::Dotnet),
            "conan" => Ok(Technology::Conan),
            other => Err(format!("unknown technology: {other}")),
        }
    }
}

/// Directories never descended into during detection.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "venv",
    ".venv",
    "__pycache__",
    "dist",
    "build",
];

pub type DetectedTechnologies = BTreeMap<Technology, BTreeMap<PathBuf, Vec<PathBuf>>>;

/// Walk `root` and map each detected technology to the working directories
/// containing its descriptor files.
///
/// A requested technology with no descriptors anywhere still yields an entry
/// with an empty working-dir map, so the caller can scan the root for it.
pub fn detect_technologies(
    root: &Path,
    recursive: bool,
    requested: &[Technology],
) -> DetectedTechnologies {
    let candidates: Vec<Technology> = if requested.is_empty() {
        Technology::all().to_vec()
    } else {
        requested.to_vec()
    };

    let mut detected: DetectedTechnologies = BTreeMap::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to read directory during detection");
                continue;
            }
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let skip = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name) || name.starts_with('.'));
                if recursive && !skip {
                    dirs.push(path);
                }
            } else {
                files.push(path);
            }
        }

        for tech in &candidates {
            let descriptors: Vec<PathBuf> = files
                .iter()
                .filter(|f| {
                    f.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|name| tech.descriptors().contains(&name))
                })
                .cloned()
                .collect();
            if !descriptors.is_empty() {
                debug!(technology = %tech, dir = %dir.display(), "detected technology");
                detected
                    .entry(*tech)
                    .or_default()
                    .insert(dir.clone(), descriptors);
            }
        }
    }

    // Explicitly requested technologies are kept even when nothing was found,
    // so the caller can still attempt the root directory.
    for tech in requested {
        detected.entry(*tech).or_default();
    }

    detected
}
