// =============================================================================
// CLI surface — start / stop / status
// =============================================================================
//
// `clap` derive CLI, same shape the retrieval pack's CLI crates use for a
// small fixed subcommand set. `start` (the default, run with no subcommand)
// boots the engine in-process; `status`/`stop` are thin HTTP clients against
// the already-running engine's own API, so operators never need a second
// binary.
// =============================================================================

use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "aurora-meme-nexus", about = "Autonomous meme-token paper-trading pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the engine (default).
    Start,
    /// Print the current portfolio/intake/provider health snapshot.
    Status,
    /// Ask a running engine to shut down gracefully.
    Stop,
}

fn admin_base_url() -> String {
    std::env::var("AURORA_BIND_ADDR")
        .ok()
        .map(|addr| format!("http://{addr}"))
        .unwrap_or_else(|| "http://127.0.0.1:3001".to_string())
}

fn admin_token() -> String {
    std::env::var("AURORA_ADMIN_TOKEN").unwrap_or_default()
}

/// Fetch `/api/v1/state/portfolio` from a running instance and pretty-print
/// it. Exits with code 2 on a network or decode failure.
pub async fn status() -> anyhow::Result<()> {
    let url = format!("{}/api/v1/state/portfolio", admin_base_url());
    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .bearer_auth(admin_token())
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            match resp.json::<serde_json::Value>().await {
                Ok(body) => {
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "failed to decode status response");
                    std::process::exit(2);
                }
            }
        }
        Ok(resp) => {
            error!(status = %resp.status(), "status request rejected");
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "could not reach a running engine");
            std::process::exit(2);
        }
    }
}

/// Hit the control-kill endpoint on a running instance, which triggers the
/// same graceful-shutdown sequence `Ctrl+C` runs in-process (cancel
/// ingestion, flush telemetry, snapshot the portfolio) rather than merely
/// pausing trading. Exits with code 2 if the engine could not be reached.
pub async fn stop() -> anyhow::Result<()> {
    let url = format!("{}/api/v1/control/kill", admin_base_url());
    let client = reqwest::Client::new();
    let response = client.post(&url).bearer_auth(admin_token()).send().await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            info!("shutdown requested — engine is stopping gracefully");
            Ok(())
        }
        Ok(resp) => {
            error!(status = %resp.status(), "pause request rejected");
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "could not reach a running engine");
            std::process::exit(2);
        }
    }
}
