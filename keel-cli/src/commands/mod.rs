//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod admin;
mod agent;
mod job;
mod pipeline;

pub use admin::AdminCommands;
pub use agent::AgentCommands;
pub use job::JobCommands;
pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Job inspection
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Agent registry
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Coordinator administration
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Show the addresses the coordinator advertises to agents
    Network,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The parsed command
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Agent { command } => agent::handle_agent_command(command, config).await,
        Commands::Admin { command } => admin::handle_admin_command(command, config).await,
        Commands::Network => admin::show_network(config).await,
    }
}
