//! Network DTOs

use serde::{Deserialize, Serialize};

/// Addresses the coordinator advertises to agents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// URL agents use to reach the coordinator
    pub advertised_url: Option<String>,

    /// Base of the repository clone URLs handed out with assignments
    pub clone_base_url: Option<String>,
}
