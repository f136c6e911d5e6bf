//! minibroker: single-log message broker.
//!
//! Usage:
//!   minibroker                                  # in-memory log on 127.0.0.1:9092
//!   minibroker --log-dir ./data --port 9092     # file-backed log
//!   minibroker --reactor single-threaded
//!   minibroker --config broker.toml --threads 8 # flags override the file

use clap::Parser;
use minibroker::broker::{Broker, BrokerServer};
use minibroker::config::{BrokerConfiguration, ReactorKind};
use minibroker::metrics::ReportWindow;
use minibroker::storage::MessageLog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minibroker", version, about = "Minimal single-log message broker")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host.
    #[arg(long)]
    host: Option<String>,

    /// Listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Event loops in the event-loop-group reactor.
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Reactor strategy.
    #[arg(long, value_enum)]
    reactor: Option<ReactorKind>,

    /// Directory for the file-backed log. In-memory when omitted.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Sync the log file on every append.
    #[arg(long)]
    sync: bool,

    /// Close connections idle this many seconds (0 disables).
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn configuration(&self) -> anyhow::Result<BrokerConfiguration> {
        let base = match &self.config {
            Some(path) => BrokerConfiguration::from_file(path)?,
            None => BrokerConfiguration::default(),
        };

        let mut builder = base.to_builder();
        if let Some(host) = &self.host {
            builder = builder.host(host.clone());
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(threads) = self.threads {
            builder = builder.num_threads(threads);
        }
        if let Some(reactor) = self.reactor {
            builder = builder.reactor(reactor);
        }
        if self.log_dir.is_some() {
            builder = builder.log_dir(self.log_dir.clone());
        }
        if self.sync {
            builder = builder.sync_on_append(true);
        }
        if let Some(secs) = self.idle_timeout_secs {
            builder = builder.idle_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }

        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.configuration()?;
    info!(
        bind = %config.bind_addr(),
        reactor = ?config.reactor(),
        threads = config.num_threads(),
        log_dir = ?config.log_dir(),
        "starting minibroker"
    );

    let interval = config.metrics_interval();
    let server = Arc::new(BrokerServer::from_config(config)?);
    server.start()?;

    // Periodic latency report; each report covers the previous interval.
    // On exit the task hands back the unreported window.
    let metrics = Arc::clone(server.metrics());
    let (stop_reporting, mut reporting_stopped) = oneshot::channel::<()>();
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let mut window = ReportWindow::open();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = window.roll(&metrics);
                    if summary.total_messages > 0 {
                        info!("{}", summary);
                    }
                }
                _ = &mut reporting_stopped => return window,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = stop_reporting.send(());
    let mut window = reporter.await?;

    // stop() joins the reactor threads; keep that off the async worker.
    let stopping = Arc::clone(&server);
    tokio::task::spawn_blocking(move || stopping.stop()).await??;

    let log_len = server.log().len();
    info!(entries = log_len, "final log size");
    let summary = window.roll(server.metrics());
    info!("final window: {}", summary);

    Ok(())
}
