use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{GatekeeperConfig, LogFormat, LoggingConfig};
use gatekeeper::ratelimit::{Admission, KeyStrategy, ManualClock, Reaper, Registry, RequestContext};

/// In-process token-bucket admission control.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log format, overriding the configuration file
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the limiter registry and run the idle bucket reaper until shutdown
    Run,
    /// Drive one limiter on simulated time and print each decision
    Probe {
        /// Limiter name (global, api, login, upload)
        #[arg(long, default_value = "login")]
        limiter: String,

        /// Key to check
        #[arg(long)]
        key: String,

        /// Number of checks
        #[arg(long, default_value_t = 11)]
        count: u32,

        /// Simulated milliseconds between checks
        #[arg(long, default_value_t = 0)]
        step_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GatekeeperConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging, cli.log_format.unwrap_or(config.logging.format));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Probe {
            limiter,
            key,
            count,
            step_ms,
        } => probe(&config, &limiter, key, count, Duration::from_millis(step_ms)),
    }
}

/// Initialize tracing. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: GatekeeperConfig) -> anyhow::Result<()> {
    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(
        Registry::new(&config.limits).with_retry_after(config.rejection.retry_after()),
    );

    let reaper = if config.reaper.enabled {
        Some(Reaper::from_config(Arc::clone(&registry), &config.reaper).spawn())
    } else {
        info!("Bucket reaper disabled");
        None
    };

    shutdown_signal().await;

    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }

    info!("Gatekeeper stopped");
    Ok(())
}

fn probe(
    config: &GatekeeperConfig,
    name: &str,
    key: String,
    count: u32,
    step: Duration,
) -> anyhow::Result<()> {
    let clock = ManualClock::new();
    let registry = Registry::with_clock(&config.limits, Arc::new(clock.clone()))
        .with_retry_after(config.rejection.retry_after());

    let limiter = registry
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("unknown limiter: {}", name))?;
    let guard = registry.guard(&limiter, KeyStrategy::custom(move |_| key.clone()));
    let ctx = RequestContext::default();

    for i in 1..=count {
        if i > 1 {
            clock.advance(step);
        }

        match guard.check(&ctx) {
            Admission::Admitted => println!("{:>4}  admitted", i),
            Admission::Rejected(rejection) => {
                let headers: Vec<String> = rejection
                    .headers()
                    .iter()
                    .map(|(name, value)| format!("{}: {}", name, value))
                    .collect();
                println!(
                    "{:>4}  rejected  {}  {}",
                    i,
                    headers.join(", "),
                    serde_json::to_string(&rejection.body())?
                );
            }
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
