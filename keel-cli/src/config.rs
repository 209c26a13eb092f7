//! CLI configuration

use keel_client::CoordinatorClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the coordinator service
    pub coordinator_url: String,
}

impl Config {
    pub fn client(&self) -> CoordinatorClient {
        CoordinatorClient::new(self.coordinator_url.as_str())
    }
}
