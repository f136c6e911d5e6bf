/// minibroker-cli: command-line client for minibroker
///
/// Commands:
/// - produce <payload>
/// - fetch <offset>
/// - bench --messages N --size B --connections C
///
/// All output is JSON for script-friendly parsing.
use clap::{Parser, Subcommand};
use minibroker::client::{BrokerClient, FetchOutcome};
use minibroker::clock::monotonic_nanos;
use minibroker::metrics::{LatencyRecord, MetricsAggregator};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "minibroker-cli", version, about = "Client for minibroker")]
struct Cli {
    /// Broker address.
    #[arg(long, default_value = "127.0.0.1:9092")]
    broker: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append one message.
    Produce { payload: String },
    /// Read the message at an offset.
    Fetch { offset: u64 },
    /// Produce load and report client-side latency.
    Bench {
        #[arg(long, default_value_t = 10_000)]
        messages: usize,
        #[arg(long, default_value_t = 100)]
        size: usize,
        #[arg(long, default_value_t = 4)]
        connections: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Produce { payload } => produce(&cli.broker, payload).await,
        Command::Fetch { offset } => fetch(&cli.broker, offset).await,
        Command::Bench {
            messages,
            size,
            connections,
        } => bench(&cli.broker, messages, size, connections).await,
    }
}

async fn produce(addr: &str, payload: String) -> anyhow::Result<()> {
    let mut client = BrokerClient::connect(addr).await?;

    match client.produce(payload.into_bytes()).await? {
        Ok(()) => {
            println!("{}", serde_json::to_string_pretty(&json!({ "status": "ack" }))?);
            Ok(())
        }
        Err(message) => {
            let output = json!({ "status": "error", "message": message });
            println!("{}", serde_json::to_string_pretty(&output)?);
            std::process::exit(1);
        }
    }
}

async fn fetch(addr: &str, offset: u64) -> anyhow::Result<()> {
    let mut client = BrokerClient::connect(addr).await?;

    match client.fetch(offset).await? {
        FetchOutcome::Payload(bytes) => {
            let output = json!({
                "status": "ok",
                "offset": offset,
                "payload": String::from_utf8_lossy(&bytes),
                "bytes": bytes.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        FetchOutcome::Error(message) => {
            let output = json!({ "status": "error", "offset": offset, "message": message });
            println!("{}", serde_json::to_string_pretty(&output)?);
            std::process::exit(1);
        }
    }
}

async fn bench(addr: &str, messages: usize, size: usize, connections: usize) -> anyhow::Result<()> {
    let connections = connections.max(1);
    let metrics = Arc::new(MetricsAggregator::with_capacity(messages.max(1)));
    let per_connection = messages / connections;
    let payload = vec![b'x'; size];

    let started = Instant::now();
    let mut tasks = tokio::task::JoinSet::new();

    for c in 0..connections {
        let count = per_connection + usize::from(c < messages % connections);
        let addr = addr.to_string();
        let metrics = Arc::clone(&metrics);
        let payload = payload.clone();

        tasks.spawn(async move {
            let mut client = BrokerClient::connect(addr).await?;
            let mut errors = 0usize;
            for _ in 0..count {
                let start = monotonic_nanos();
                if client.produce(payload.clone()).await?.is_err() {
                    errors += 1;
                }
                metrics.record(LatencyRecord::since(start));
            }
            anyhow::Ok(errors)
        });
    }

    let mut errors = 0;
    while let Some(result) = tasks.join_next().await {
        errors += result??;
    }

    let summary = metrics.summarize(started.elapsed().as_millis() as u64);
    let output = json!({
        "connections": connections,
        "payload_bytes": size,
        "errors": errors,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
