use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::graph::DependencyNode;
use crate::scan::types::{ScanResponse, Severity};

/// Connection details for the vulnerability/entitlement services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDetails {
    pub url: String,
    pub access_token: Option<String>,
}

impl ServerDetails {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            access_token,
        }
    }

    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Scans a flattened dependency graph against the vulnerability service.
#[async_trait]
pub trait GraphScanClient: Send + Sync {
    async fn scan(
        &self,
        flat_tree: &DependencyNode,
        min_severity: Option<Severity>,
    ) -> Result<Vec<ScanResponse>>;
}

#[derive(Serialize)]
struct GraphScanRequest<'a> {
    graph: &'a DependencyNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_severity: Option<Severity>,
}

pub struct HttpGraphScanClient {
    client: reqwest::Client,
    server: ServerDetails,
}

impl HttpGraphScanClient {
    pub fn new(server: ServerDetails) -> Self {
        Self {
            client: reqwest::Client::new(),
            server,
        }
    }
}

#[async_trait]
impl GraphScanClient for HttpGraphScanClient {
    #[instrument(skip(self, flat_tree), fields(nodes = flat_tree.nodes.len()))]
    async fn scan(
        &self,
        flat_tree: &DependencyNode,
        min_severity: Option<Severity>,
    ) -> Result<Vec<ScanResponse>> {
        let url = format!("{}/api/v1/scan/graph", self.server.base_url());
        let body = GraphScanRequest {
            graph: flat_tree,
            min_severity,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.server.access_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("graph scan request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("graph scan service returned HTTP {status}");
        }

        let responses: Vec<ScanResponse> = response
            .json()
            .await
            .context("failed to parse graph scan response")?;
        debug!(count = responses.len(), "graph scan responses received");
        Ok(responses)
    }
}

/// Used when no server is configured: dependency trees are still built and
/// reported, but nothing is scanned.
pub struct OfflineGraphScanClient;

#[async_trait]
impl GraphScanClient for OfflineGraphScanClient {
    async fn scan(
        &self,
        _flat_tree: &DependencyNode,
        _min_severity: Option<Severity>,
    ) -> Result<Vec<ScanResponse>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::flat_tree;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn base_url_strips_trailing_slash() {
        let server = ServerDetails::new("https://xsec.example.com/", None);
        assert_eq!(server.base_url(), "https://xsec.example.com");
    }

    #[tokio::test]
    async fn scan_posts_graph_and_parses_responses() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/scan/graph"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "scan_id": "scan-1",
                    "vulnerabilities": [
                        {
                            "summary": "prototype pollution",
                            "severity": "high",
                            "cves": [{"id": "CVE-2021-23337"}],
                            "components": {"npm://lodash:4.17.20": {}}
                        }
                    ]
                }
            ])))
            .mount(&mock_server)
            .await;

        let client = HttpGraphScanClient::new(ServerDetails::new(
            mock_server.uri(),
            Some("tok".to_string()),
        ));
        let tree = flat_tree(vec!["npm://lodash:4.17.20".to_string()]);

        let responses = client.scan(&tree, Some(Severity::Medium)).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].scan_id, "scan-1");
        assert_eq!(responses[0].vulnerabilities[0].cves[0].id, "CVE-2021-23337");
    }

    #[tokio::test]
    async fn scan_surfaces_http_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/scan/graph"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = HttpGraphScanClient::new(ServerDetails::new(mock_server.uri(), None));
        let tree = flat_tree(vec!["npm://lodash:4.17.20".to_string()]);

        let err = client.scan(&tree, None).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
