use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cadence::config_source::{ConfigSource, FileConfigSource};
use cadence::scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(
    name = "cadence",
    about = "Multi-agent trading heartbeat - runs model-driven decision cycles for configured agents on their cadence"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/cadence.toml")]
    config: String,

    /// Run a single agent's cycle immediately and exit, instead of
    /// starting the heartbeat. Uses the same decision pipeline.
    #[arg(long, value_name = "CONFIG_ID")]
    once: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = FileConfigSource::new(&cli.config);
    let snapshot = source
        .load()
        .with_context(|| format!("Failed to load config: {}", cli.config))?;

    let cancel = CancellationToken::new();
    let (engine, store) = cadence::bootstrap(&snapshot.config, cancel.clone())?;

    if let Some(config_id) = &cli.once {
        let report = cadence::run_agent_once(&engine, &snapshot.config, config_id).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        cancel.cancel();
        return Ok(());
    }

    let scheduler = Scheduler::new(engine, Arc::new(source), store);
    let scheduler_cancel = scheduler.cancel_token();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received shutdown signal");
        cancel.cancel();
        scheduler_cancel.cancel();
    });

    scheduler.run().await;
    Ok(())
}
