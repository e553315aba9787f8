use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use keyrate::config::{KeyrateConfig, LogFormat, LoggingConfig, Policy};
use keyrate::ratelimit::RateLimiter;
use keyrate::simulation::Simulation;

/// Play synthetic per-user message traffic through a rate limiter.
#[derive(Debug, Parser)]
#[command(name = "keyrate", version, about)]
struct Cli {
    /// YAML configuration file; KEYRATE__* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Admission policy
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Sliding window length in seconds
    #[arg(long)]
    window_size: Option<f64>,

    /// Admissions per key within one sliding window
    #[arg(long)]
    max_requests: Option<u32>,

    /// Minimum gap between admissions in seconds
    #[arg(long)]
    min_interval: Option<f64>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    SlidingWindow,
    FixedInterval,
}

impl From<PolicyArg> for Policy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::SlidingWindow => Policy::SlidingWindow,
            PolicyArg::FixedInterval => Policy::FixedInterval,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    /// Apply command line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut KeyrateConfig) {
        if let Some(policy) = self.policy {
            config.limiter.policy = policy.into();
        }
        if let Some(window_size) = self.window_size {
            config.limiter.window_size_secs = window_size;
        }
        if let Some(max_requests) = self.max_requests {
            config.limiter.max_requests = max_requests;
        }
        if let Some(min_interval) = self.min_interval {
            config.limiter.min_interval_secs = min_interval;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format.into();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = KeyrateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    init_tracing(&config.logging);

    info!("Starting keyrate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(policy = ?config.limiter.policy, "Configuration loaded");

    let limiter: Arc<dyn RateLimiter> = Arc::from(config.limiter.build()?);
    info!("Rate limiter initialized");

    if let Some(period) = config.limiter.sweep_interval()? {
        tokio::spawn(sweep_loop(Arc::clone(&limiter), period));
    }

    let simulation = Simulation::new(config.simulation.clone(), limiter)?;

    // Run the simulation until it completes or a shutdown signal arrives
    tokio::select! {
        report = simulation.run() => {
            info!(
                admitted = report.admitted(),
                denied = report.denied(),
                "All phases completed"
            );
        }
        _ = shutdown_signal() => {}
    }

    info!("keyrate stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Periodically evict keys that no longer affect admission decisions.
async fn sweep_loop(limiter: Arc<dyn RateLimiter>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let removed = limiter.sweep();
        debug!(
            removed = removed,
            tracked = limiter.tracked_keys(),
            "Sweep completed"
        );
    }
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
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
