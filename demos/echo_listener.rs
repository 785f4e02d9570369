//! # Echo listener
//!
//! Listens to the Echo contract through two redundant log sources and logs
//! every event exactly once, with a heartbeat every few seconds.
//!
//! Blocks are simulated in-process: each simulated block is delivered by
//! both sources, as two RPC endpoints would.
//!
//! Usage:
//!   cargo run --example echo_listener
//!   cargo run --example echo_listener -- --blocks 10 --heartbeat-secs 2 --verbose

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use clap::Parser;
use david::{Contract, David, Event, LocalLogSource, LogEntry, Occurrence, OnchainSpec, Task};
use tracing_subscriber::EnvFilter;

const ECHO_ADDRESS: &str = "0x7FF8982B3e3135f46DB12E17BaD5b8d9E1a08c54";

#[derive(Parser)]
#[command(name = "echo_listener", version, about = "📡 Listen to Echo contract events")]
struct Cli {
    /// Number of simulated blocks to produce
    #[arg(long, default_value = "5")]
    blocks: u64,

    /// Seconds between simulated blocks
    #[arg(long, default_value = "1")]
    block_secs: u64,

    /// Heartbeat period in seconds
    #[arg(long, default_value = "3")]
    heartbeat_secs: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn echo_log(block: u64) -> LogEntry {
    LogEntry {
        address: ECHO_ADDRESS.to_lowercase(),
        event_name: "EchoEvent".into(),
        block_number: block,
        transaction_hash: format!("0x{block:064x}"),
        log_index: 0,
        data: serde_json::json!([format!("hello from block {block}")]),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "david=debug,david_scheduler=debug,echo_listener=debug"
    } else {
        "david=info,david_scheduler=info,echo_listener=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let primary = LocalLogSource::shared("rpc-primary");
    let backup = LocalLogSource::shared("rpc-backup");

    let echo = Event::onchain(OnchainSpec::new(
        "goerli",
        Contract::new(ECHO_ADDRESS, serde_json::json!([])),
        "EchoEvent",
    ));
    let log_event = Task::from_fn("Log Event Data", |occurrence: Occurrence| {
        if let Some(entry) = occurrence.as_log() {
            tracing::info!("🔔 Event heard in block {}: {}", entry.block_number, entry.data);
        }
        Ok(())
    });

    let run_for = Duration::from_secs(cli.blocks * cli.block_secs + 1);
    let heartbeat = Event::interval(Duration::from_secs(cli.heartbeat_secs))
        .ending_at(Utc::now() + TimeDelta::from_std(run_for)?);
    let beat = Task::from_fn("heartbeat", |_| {
        tracing::info!("💓 Still listening");
        Ok(())
    });

    let mut dave = David::default();
    dave.register_provider("goerli", vec![primary.clone(), backup.clone()])
        .on(echo, log_event)
        .on(heartbeat, beat);
    dave.start().await?;

    let sources: Vec<Arc<LocalLogSource>> = vec![primary, backup];
    for block in 1..=cli.blocks {
        tokio::time::sleep(Duration::from_secs(cli.block_secs)).await;
        for source in &sources {
            source.emit(echo_log(block));
        }
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    dave.shutdown().await;
    Ok(())
}
