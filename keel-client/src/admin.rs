//! Network and admin endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use keel_core::dto::admin::ReloadResponse;
use keel_core::dto::network::NetworkInfo;

impl CoordinatorClient {
    /// Check that the coordinator is up
    pub async fn health(&self) -> Result<()> {
        let response = self.client.get(self.url("/health")).send().await?;

        self.handle_empty_response(response).await
    }

    /// Addresses the coordinator advertises to agents
    pub async fn network_info(&self) -> Result<NetworkInfo> {
        let response = self.client.get(self.url("/api/network")).send().await?;

        self.handle_response(response).await
    }

    /// Ask the coordinator to re-read its configuration file
    pub async fn reload_config(&self) -> Result<ReloadResponse> {
        let response = self.client.post(self.url("/api/admin/reload")).send().await?;

        self.handle_response(response).await
    }
}
