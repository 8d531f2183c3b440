// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hive main entry point - runs the hub or queries a running one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tracing::{info, warn};

use hive::config::{self, CliOptions};
use hive::hub::{shutdown_signal, Hub};
use hive::telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Hive version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hive - coordination hub for autonomous coding agents.
#[derive(Parser)]
#[command(name = "hive")]
#[command(author, version, about = "Coordination hub for autonomous coding agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub until Ctrl+C or SIGTERM
    Hub {
        /// Repository agents work on
        #[arg(long, env = "HIVE_REPO")]
        repo: Option<PathBuf>,

        /// HTTP port for the API
        #[arg(short, long, env = "HIVE_PORT")]
        port: Option<u16>,

        /// First port handed to agents
        #[arg(long, env = "HIVE_BASE_PORT")]
        base_port: Option<u16>,

        /// Directory holding agent worktrees
        #[arg(long, env = "HIVE_WORKTREES_DIR")]
        worktrees_dir: Option<PathBuf>,

        /// Launch agents without the sandbox wrapper
        #[arg(long)]
        no_sandbox: bool,

        /// Stop all agents when the hub exits
        #[arg(long)]
        stop_agents_on_exit: bool,

        /// Show debug output and log every request
        #[arg(long)]
        debug: bool,

        /// Log format: pretty, compact or json
        #[arg(long, env = "HIVE_LOG_FORMAT", default_value = "compact")]
        log_format: LogFormat,
    },

    /// Show the status of a running hub
    Status {
        /// Hub URL
        #[arg(long, env = "HIVE_HUB_URL", default_value = "http://localhost:8080")]
        url: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Hub {
            repo,
            port,
            base_port,
            worktrees_dir,
            no_sandbox,
            stop_agents_on_exit,
            debug,
            log_format,
        } => {
            let _guard = init_telemetry(&TelemetryConfig::for_hub(debug, log_format))?;

            let repo = match repo {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            let cli_options = CliOptions {
                port,
                base_port,
                worktrees_dir,
                sandbox: if no_sandbox { Some(false) } else { None },
                ..Default::default()
            };
            run_hub(repo, cli_options, stop_agents_on_exit).await
        }
        Commands::Status { url } => show_status(&url).await,
        Commands::Version => {
            println!("hive {}", VERSION);
            Ok(())
        }
    }
}

async fn run_hub(
    repo: PathBuf,
    cli_options: CliOptions,
    stop_agents_on_exit: bool,
) -> anyhow::Result<()> {
    let config = config::load_config(&repo, cli_options)?;
    let hub = Arc::new(Hub::new(config)?);

    match hub.restore_state().await {
        Ok(report) if !report.dead.is_empty() => {
            warn!("{} agents from the last run are dead", report.dead.len())
        }
        Ok(_) => {}
        Err(e) => warn!("Ignoring saved hub state: {}", e),
    }
    hub.spawn_liveness_sweeper();

    println!(
        "{} Hive hub {} on {}",
        "→".cyan(),
        VERSION,
        hub.config().hub_url().bright_white()
    );

    let on_signal = {
        let hub = Arc::clone(&hub);
        async move {
            shutdown_signal().await;
            if stop_agents_on_exit {
                hub.shutdown_agents().await;
            }
        }
    };
    hub.serve(on_signal).await?;
    info!("Hive hub exited");
    Ok(())
}

async fn show_status(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let endpoint = format!("{}/status", url.trim_end_matches('/'));
    let status: Value = client
        .get(&endpoint)
        .send()
        .await
        .with_context(|| format!("Failed to reach hub at {}", url))?
        .error_for_status()?
        .json()
        .await
        .context("Invalid status response")?;

    print_status(&status);
    Ok(())
}

fn count(value: &Value) -> u64 {
    value.as_u64().unwrap_or(0)
}

fn print_status(status: &Value) {
    let hub = &status["hub"];
    println!(
        "{} {} (up {}s)",
        "Hive hub".bright_blue().bold(),
        hub["version"].as_str().unwrap_or("?"),
        count(&hub["uptime_secs"])
    );
    if let Some(repo) = hub["repo_path"].as_str() {
        println!("Repo: {}", repo.bright_white());
    }

    let agents = &status["agents"];
    println!(
        "\n{} {} total, {} running",
        "## Agents".bright_cyan(),
        count(&agents["total"]),
        count(&agents["running"])
    );
    for agent in agents["agents"].as_array().into_iter().flatten() {
        let state = agent["status"].as_str().unwrap_or("?");
        let state = match state {
            "ready" => state.green(),
            "busy" | "spawning" => state.yellow(),
            "dead" | "error" => state.red(),
            _ => state.dimmed(),
        };
        println!(
            "  {} {} [{}] port {}",
            "•".cyan(),
            agent["name"].as_str().unwrap_or("?").bright_white(),
            state,
            count(&agent["port"])
        );
    }

    println!("\n{} {}", "## Tasks".bright_cyan(), count(&status["tasks"]["total"]));
    print_counts(&status["tasks"]["by_status"]);

    let pending = count(&status["solicitations"]["pending"]);
    let label = format!("{} pending", pending);
    println!(
        "\n{} {}",
        "## Solicitations".bright_cyan(),
        if pending > 0 { label.yellow() } else { label.normal() }
    );

    let leases = status["ports"]["leases"].as_array().cloned().unwrap_or_default();
    println!("\n{} {} leased", "## Ports".bright_cyan(), leases.len());
    for lease in &leases {
        println!(
            "  {} {} → {}",
            "•".cyan(),
            count(&lease["port"]),
            lease["agent_name"]
                .as_str()
                .filter(|n| !n.is_empty())
                .or_else(|| lease["agent_id"].as_str())
                .unwrap_or("?")
        );
    }
}

fn print_counts(counts: &Value) {
    if let Some(map) = counts.as_object() {
        for (name, n) in map {
            println!("  {}: {}", name, count(n));
        }
    }
}
