//! Agent-related API endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use keel_core::dto::agent::{AgentSummary, HeartbeatResponse, RegisterAgent, Registration};
use keel_core::dto::job::{Assignment, ClaimResponse};
use uuid::Uuid;

impl CoordinatorClient {
    // =============================================================================
    // Agent Registration & Lifecycle
    // =============================================================================

    /// Register an agent with the coordinator
    ///
    /// Registering an identity again replaces the previous registration and
    /// returns a fresh token.
    ///
    /// # Arguments
    /// * `req` - Identity, capabilities, address and slot count
    ///
    /// # Returns
    /// The agent token and the heartbeat settings to use
    ///
    /// # Example
    /// ```no_run
    /// # use keel_client::CoordinatorClient;
    /// # use keel_core::dto::agent::RegisterAgent;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = CoordinatorClient::new("http://localhost:8080");
    /// let registration = client.register_agent(&RegisterAgent {
    ///     agent_id: "agent-001".to_string(),
    ///     capabilities: vec!["container".to_string()],
    ///     address: Default::default(),
    ///     max_concurrent_jobs: 2,
    /// }).await?;
    /// println!("token {}", registration.token);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn register_agent(&self, req: &RegisterAgent) -> Result<Registration> {
        let response = self
            .client
            .post(self.url("/api/agents/register"))
            .json(req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Send a heartbeat to the coordinator
    ///
    /// Returns the jobs held by this agent that have been asked to cancel.
    ///
    /// # Arguments
    /// * `token` - The agent token issued at registration
    pub async fn heartbeat(&self, token: Uuid) -> Result<HeartbeatResponse> {
        let request = self.authorized(self.client.post(self.url("/api/agents/heartbeat")), token);
        let response = request.send().await?;

        self.handle_response(response).await
    }

    /// Claim the next eligible job, if any
    ///
    /// # Arguments
    /// * `token` - The agent token issued at registration
    ///
    /// # Returns
    /// The assignment, or `None` when nothing is eligible
    pub async fn claim_job(&self, token: Uuid) -> Result<Option<Assignment>> {
        let request = self.authorized(self.client.post(self.url("/api/agents/claim")), token);
        let response = request.send().await?;

        let claim: ClaimResponse = self.handle_response(response).await?;
        Ok(claim.assignment)
    }

    // =============================================================================
    // Agent Query
    // =============================================================================

    /// List all registered agents
    pub async fn list_agents(&self) -> Result<Vec<AgentSummary>> {
        let response = self.client.get(self.url("/api/agents")).send().await?;

        self.handle_response(response).await
    }

    /// Get details for a specific agent
    ///
    /// # Arguments
    /// * `agent_id` - The agent identity
    pub async fn get_agent(&self, agent_id: &str) -> Result<AgentSummary> {
        let url = self.url(&format!("/api/agents/{}", agent_id));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    /// Delete an agent registration
    ///
    /// Jobs the agent still holds go back to the queue.
    ///
    /// # Arguments
    /// * `agent_id` - The agent identity
    pub async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/agents/{}", agent_id));
        let response = self.client.delete(url).send().await?;

        self.handle_empty_response(response).await
    }
}
