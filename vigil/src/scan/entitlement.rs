use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use crate::scan::client::ServerDetails;

pub const APPLICABILITY_FEATURE_ID: &str = "contextual_analysis";
pub const CURATION_FEATURE_ID: &str = "curation";

/// Queries whether the configured server grants a paid feature.
#[async_trait]
pub trait EntitlementClient: Send + Sync {
    async fn is_entitled(&self, feature_id: &str) -> Result<bool>;
}

#[derive(Deserialize)]
struct EntitlementResponse {
    #[serde(default)]
    entitled: bool,
}

pub struct HttpEntitlementClient {
    client: reqwest::Client,
    server: ServerDetails,
}

impl HttpEntitlementClient {
    pub fn new(server: ServerDetails) -> Self {
        Self {
            client: reqwest::Client::new(),
            server,
        }
    }
}

#[async_trait]
impl EntitlementClient for HttpEntitlementClient {
    #[instrument(skip(self))]
    async fn is_entitled(&self, feature_id: &str) -> Result<bool> {
        let url = format!(
            "{}/api/v1/entitlements/feature/{feature_id}",
            self.server.base_url()
        );

        let mut request = self.client.get(&url);
        if let Some(token) = &self.server.access_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("entitlement request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("entitlement service returned HTTP {status}");
        }

        let parsed: EntitlementResponse = response
            .json()
            .await
            .context("failed to parse entitlement response")?;
        Ok(parsed.entitled)
    }
}
