//! simctl - Command-line client for the SimRunner daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9530";

#[derive(Parser)]
#[command(name = "simctl")]
#[command(about = "SimRunner CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "SIMRUNNER_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a branch and start its simulation
    Spawn {
        /// Git URL of the simulation backend
        source_url: String,

        /// Branch to clone
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Simulation id (generated when omitted)
        #[arg(long)]
        sim_id: Option<String>,
    },

    /// Stop a simulation
    Kill {
        sim_id: String,

        /// Forget the simulation without stopping its worker
        #[arg(long)]
        remove_only: bool,
    },

    /// Check whether a simulation is active
    Status { sim_id: String },

    /// List registered simulations
    List,

    /// Send a JSON message to a simulation's worker
    Send {
        sim_id: String,

        /// Message as JSON string
        message: String,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct SpawnResult {
    sim_id: String,
    state: String,
}

#[derive(Deserialize, Tabled)]
struct SimulationRow {
    sim_id: String,
    state: String,
    registered_at: i64,
}

#[derive(Deserialize)]
struct ListResult {
    simulations: Vec<SimulationRow>,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Spawn {
            source_url,
            branch,
            sim_id,
        } => {
            let params = json!({
                "source_url": source_url,
                "branch": branch,
                "sim_id": sim_id,
            });

            let result = call_rpc(&cli.rpc_url, "sim.spawn.v1", params).await?;
            let spawn_result: SpawnResult = serde_json::from_value(result)?;

            println!("{}", "✓ Simulation reserved, cloning in background".green().bold());
            println!();
            println!("{}", Table::new(vec![spawn_result]));
        }

        Commands::Kill {
            sim_id,
            remove_only,
        } => {
            let params = json!({ "sim_id": sim_id, "remove_only": remove_only });
            let result = call_rpc(&cli.rpc_url, "sim.kill.v1", params).await?;

            if result["removed"].as_bool().unwrap_or(false) {
                println!("{}", format!("✓ Simulation {} stopped", sim_id).green().bold());
            } else {
                println!("{}", format!("○ Simulation {} was not running", sim_id).yellow());
            }
        }

        Commands::Status { sim_id } => {
            let params = json!({ "sim_id": sim_id });
            let result = call_rpc(&cli.rpc_url, "sim.status.v1", params).await?;

            let status = if result["running"].as_bool().unwrap_or(false) {
                "RUNNING".green()
            } else {
                "NOT RUNNING".red()
            };
            println!("  {} {}", "Simulation:".bold(), sim_id);
            println!("  {} {}", "Status:".bold(), status);
        }

        Commands::List => {
            let result = call_rpc(&cli.rpc_url, "sim.list.v1", json!([])).await?;
            let list: ListResult = serde_json::from_value(result)?;

            if list.simulations.is_empty() {
                println!("{}", "No simulations registered".yellow());
            } else {
                println!("{}", Table::new(list.simulations));
            }
        }

        Commands::Send { sim_id, message } => {
            let message: serde_json::Value =
                serde_json::from_str(&message).context("Invalid JSON message")?;

            call_rpc(
                &cli.rpc_url,
                "sim.send.v1",
                json!({ "sim_id": sim_id, "message": message }),
            )
            .await?;

            println!("{}", format!("✓ Message delivered to {}", sim_id).green().bold());
        }
    }

    Ok(())
}
