use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::error::AuditError;
use crate::scan::ServerDetails;

pub const ANALYZER_BINARY_NAME: &str = "vigil-analyzer";

const SERVER_URL_ENV: &str = "VIGIL_SERVER_URL";
const ACCESS_TOKEN_ENV: &str = "VIGIL_ACCESS_TOKEN";

/// Runs one analyzer phase to completion. The seam exists so phases are
/// testable without a real analyzer binary.
#[async_trait]
pub trait AnalyzerExecutor: Send + Sync {
    async fn execute(
        &self,
        config_file: &Path,
        subcommand: &str,
        working_dir: &Path,
        server: &ServerDetails,
    ) -> Result<(), AuditError>;
}

/// The external analyzer binary, installed once per version into a
/// version-tagged directory and verified by digest. An installed binary is
/// never modified in place; a bad digest is an error, not a repair.
#[derive(Debug)]
pub struct AnalyzerManager {
    binary: PathBuf,
}

impl AnalyzerManager {
    /// Use an analyzer binary that already exists at `binary`.
    pub fn from_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary
    }

    /// Verify-or-fetch the analyzer for `version` under `install_root`.
    ///
    /// The binary lands at `<install_root>/<version>/vigil-analyzer`. When it
    /// already exists with the expected SHA-256 nothing is downloaded;
    /// otherwise it is fetched into a temporary file, verified, and atomically
    /// moved into place.
    #[instrument(skip(expected_sha256, download_url))]
    pub async fn ensure_installed(
        install_root: &Path,
        version: &str,
        expected_sha256: &str,
        download_url: &str,
    ) -> Result<Self, AuditError> {
        let version_dir = install_root.join(version);
        let binary = version_dir.join(ANALYZER_BINARY_NAME);

        if binary.exists() {
            let digest = file_sha256(&binary).await?;
            if digest == expected_sha256 {
                debug!(path = %binary.display(), "analyzer already installed");
                return Ok(Self { binary });
            }
            return Err(AuditError::AnalyzerInstall(format!(
                "digest mismatch for installed analyzer '{}' (expected {expected_sha256}, found {digest}); refusing to overwrite",
                binary.display()
            )));
        }

        info!(version, url = download_url, "downloading analyzer");
        let bytes = reqwest::get(download_url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuditError::AnalyzerInstall(format!("download failed: {e}")))?
            .bytes()
            .await
            .map_err(|e| AuditError::AnalyzerInstall(format!("download failed: {e}")))?;

        let digest = hex::encode(Sha256::digest(&bytes));
        if digest != expected_sha256 {
            return Err(AuditError::AnalyzerInstall(format!(
                "downloaded analyzer digest mismatch (expected {expected_sha256}, got {digest})"
            )));
        }

        tokio::fs::create_dir_all(&version_dir).await?;
        let staged = tempfile::NamedTempFile::new_in(&version_dir)?;
        std::fs::write(staged.path(), &bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o755))?;
        }
        staged
            .persist(&binary)
            .map_err(|e| AuditError::AnalyzerInstall(format!("failed to install analyzer: {e}")))?;

        info!(path = %binary.display(), "analyzer installed");
        Ok(Self { binary })
    }
}

#[async_trait]
impl AnalyzerExecutor for AnalyzerManager {
    #[instrument(skip(self, server), fields(binary = %self.binary.display()))]
    async fn execute(
        &self,
        config_file: &Path,
        subcommand: &str,
        working_dir: &Path,
        server: &ServerDetails,
    ) -> Result<(), AuditError> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .arg(config_file)
            .arg(subcommand)
            .current_dir(working_dir)
            .env(SERVER_URL_ENV, &server.url);
        if let Some(token) = &server.access_token {
            command.env(ACCESS_TOKEN_ENV, token);
        }

        let status = command
            .status()
            .await
            .map_err(|e| AuditError::AnalyzerExec {
                phase: subcommand.to_string(),
                reason: format!("failed to spawn '{}': {e}", self.binary.display()),
            })?;

        if !status.success() {
            return Err(AuditError::AnalyzerExec {
                phase: subcommand.to_string(),
                reason: format!("analyzer exited with {status}"),
            });
        }
        Ok(())
    }
}

async fn file_sha256(path: &Path) -> Result<String, AuditError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SCRIPT_OK: &[u8] = b"#!/bin/sh\nexit 0\n";

    fn sha(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    #[tokio::test]
    async fn downloads_verifies_and_installs() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/analyzer"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(SCRIPT_OK))
            .expect(1)
            .mount(&mock_server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let url = format!("{}/analyzer", mock_server.uri());

        let manager =
            AnalyzerManager::ensure_installed(root.path(), "1.8.3", &sha(SCRIPT_OK), &url)
                .await
                .unwrap();

        assert!(manager.binary_path().exists());
        assert!(manager.binary_path().starts_with(root.path().join("1.8.3")));

        // Second call verifies the digest and never re-downloads (the mock
        // would fail on a second hit).
        AnalyzerManager::ensure_installed(root.path(), "1.8.3", &sha(SCRIPT_OK), &url)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn existing_binary_with_wrong_digest_is_never_overwritten() {
        let root = tempfile::tempdir().unwrap();
        let version_dir = root.path().join("1.8.3");
        std::fs::create_dir_all(&version_dir).unwrap();
        let binary = version_dir.join(ANALYZER_BINARY_NAME);
        std::fs::write(&binary, b"tampered").unwrap();

        let err = AnalyzerManager::ensure_installed(
            root.path(),
            "1.8.3",
            &sha(SCRIPT_OK),
            "http://127.0.0.1:9/never-contacted",
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("refusing to overwrite"));
        assert_eq!(std::fs::read(&binary).unwrap(), b"tampered");
    }

    #[tokio::test]
    async fn download_digest_mismatch_is_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"not the analyzer"[..]))
            .mount(&mock_server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let err = AnalyzerManager::ensure_installed(
            root.path(),
            "1.8.3",
            &sha(SCRIPT_OK),
            &mock_server.uri(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("digest mismatch"));
        assert!(!root.path().join("1.8.3").join(ANALYZER_BINARY_NAME).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_succeeds_on_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("analyzer.sh");
        std::fs::write(&script, SCRIPT_OK).unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let manager = AnalyzerManager::from_binary(&script);
        let server = ServerDetails::new("https://xsec.example.com", None);
        manager
            .execute(&dir.path().join("config.yaml"), "sec", dir.path(), &server)
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_reports_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("analyzer.sh");
        std::fs::write(&script, b"#!/bin/sh\nexit 3\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let manager = AnalyzerManager::from_binary(&script);
        let server = ServerDetails::new("https://xsec.example.com", None);
        let err = manager
            .execute(&dir.path().join("config.yaml"), "ca", dir.path(), &server)
            .await
            .unwrap_err();

        assert!(matches!(err, AuditError::AnalyzerExec { .. }));
    }

    #[tokio::test]
    async fn execute_reports_missing_binary() {
        let manager = AnalyzerManager::from_binary("/nonexistent/analyzer");
        let server = ServerDetails::new("https://xsec.example.com", None);
        let err = manager
            .execute(Path::new("config.yaml"), "iac", Path::new("."), &server)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::AnalyzerExec { .. }));
    }
}
