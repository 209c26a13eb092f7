//! Agent command handlers
//!
//! Handles inspecting the agent registry and removing agents from it.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use keel_client::CoordinatorClient;
use keel_core::dto::agent::AgentSummary;

use crate::config::Config;
use crate::output::{agent_status, timestamp};

/// Agent subcommands
#[derive(Subcommand)]
pub enum AgentCommands {
    /// List all registered agents
    List,
    /// Get agent details
    Get {
        /// Agent ID
        id: String,
    },
    /// Remove an agent; its claimed jobs go back to the queue
    Remove {
        /// Agent ID
        id: String,
    },
}

/// Routes agent subcommands to their respective handlers
pub async fn handle_agent_command(command: AgentCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        AgentCommands::List => list_agents(&client).await,
        AgentCommands::Get { id } => get_agent(&client, &id).await,
        AgentCommands::Remove { id } => remove_agent(&client, &id).await,
    }
}

async fn list_agents(client: &CoordinatorClient) -> Result<()> {
    let agents = client.list_agents().await?;

    if agents.is_empty() {
        println!("{}", "No agents registered.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} registered agent(s):", agents.len()).bold()
        );
        println!();
        for agent in agents {
            print_agent_summary(&agent);
        }
    }

    Ok(())
}

async fn get_agent(client: &CoordinatorClient, id: &str) -> Result<()> {
    let agent = client.get_agent(id).await?;

    println!("{}", "Agent Details:".bold());
    println!("  ID:           {}", agent.id.cyan());
    println!("  Status:       {}", agent_status(agent.status));
    println!(
        "  Jobs:         {}/{}",
        agent.active_jobs, agent.max_concurrent_jobs
    );
    if let Some(host) = &agent.address.host {
        println!("  Host:         {}", host);
    }
    if let Some(network) = &agent.address.network {
        println!("  Network:      {}", network);
    }
    println!("  Registered:   {}", timestamp(&agent.registered_at));
    println!("  Last Seen:    {}", timestamp(&agent.last_heartbeat_at));

    println!("\n{}", "Capabilities:".bold());
    if agent.capabilities.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for cap in &agent.capabilities {
        println!("  - {}", cap);
    }

    Ok(())
}

async fn remove_agent(client: &CoordinatorClient, id: &str) -> Result<()> {
    client.delete_agent(id).await?;

    println!(
        "{}",
        format!("✓ Agent {} removed successfully!", id).green().bold()
    );

    Ok(())
}

fn print_agent_summary(agent: &AgentSummary) {
    println!("  {} Agent {}", "▸".cyan(), agent.id.bold());
    println!("    Status:       {}", agent_status(agent.status));
    println!(
        "    Jobs:         {}",
        format!("{}/{}", agent.active_jobs, agent.max_concurrent_jobs).dimmed()
    );
    if !agent.capabilities.is_empty() {
        println!("    Capabilities: {}", agent.capabilities.join(", ").dimmed());
    }
    println!(
        "    Last Seen:    {}",
        timestamp(&agent.last_heartbeat_at).dimmed()
    );
    println!();
}
