//! Coordinator administration commands

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Admin subcommands
#[derive(Subcommand)]
pub enum AdminCommands {
    /// Re-read the coordinator configuration file
    Reload,
    /// Check that the coordinator is up
    Health,
}

pub async fn handle_admin_command(command: AdminCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        AdminCommands::Reload => {
            let reload = client.reload_config().await?;
            if reload.changed.is_empty() {
                println!(
                    "{}",
                    format!("Configuration unchanged (version {}).", reload.version).yellow()
                );
            } else {
                println!(
                    "{}",
                    format!(
                        "✓ Configuration reloaded: version {} -> {}",
                        reload.previous_version, reload.version
                    )
                    .green()
                    .bold()
                );
                for setting in &reload.changed {
                    println!("  - {}", setting.cyan());
                }
            }
        }
        AdminCommands::Health => {
            client.health().await?;
            println!(
                "{}",
                format!("✓ Coordinator at {} is healthy", config.coordinator_url).green()
            );
        }
    }

    Ok(())
}

/// Print the addresses handed to agents and their sandboxes
pub async fn show_network(config: &Config) -> Result<()> {
    let info = config.client().network_info().await?;
    let unset = || "not configured".dimmed().to_string();

    println!("{}", "Network:".bold());
    println!(
        "  Coordinator URL: {}",
        info.advertised_url.map(|u| u.cyan().to_string()).unwrap_or_else(unset)
    );
    println!(
        "  Clone base URL:  {}",
        info.clone_base_url.map(|u| u.cyan().to_string()).unwrap_or_else(unset)
    );

    Ok(())
}
