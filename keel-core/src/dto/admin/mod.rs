//! Admin DTOs

use serde::{Deserialize, Serialize};

/// Result of a configuration reload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    /// Version now active
    pub version: u64,
    /// Version active before the reload
    pub previous_version: u64,
    /// Names of the settings whose value changed
    pub changed: Vec<String>,
}
