//! Perfmon Binary Entry Point
//!
//! Loads the source list, resolves run options and runs the collection engine
//! until every unit stops or the process is signalled.
//! Core functionality is provided by the `perfmon` library crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use perfmon::{
    AppConfig, Credentials, EmitBuilder, Engine, Providers, RunOptions,
    config::{effective_interval, local_host_name, parse_interval, split_hosts},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Perfmon - configuration-driven performance counter and query collector
#[derive(Parser)]
#[command(name = "perfmon", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/perfmon.yaml",
        env = "PERFMON_CONFIG"
    )]
    config: PathBuf,

    /// Polling interval: milliseconds, or a duration such as `30s` (minimum 10s)
    #[arg(short = 'i', long, env = "POLLINGINTERVAL", value_parser = parse_interval)]
    poll_interval: Option<Duration>,

    /// Comma-separated hosts to query (default: this machine)
    #[arg(short = 'n', long, env = "PERFMON_HOSTS")]
    hosts: Option<String>,

    /// Account name for remote queries
    #[arg(short, long, env = "PERFMON_USER", default_value = "")]
    user: String,

    /// Account domain for remote queries
    #[arg(short, long, env = "PERFMON_DOMAIN", default_value = "")]
    domain: String,

    /// Account password for remote queries
    #[arg(short, long, env = "PERFMON_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Run one cycle per unit and exit
    #[arg(short, long)]
    run_once: bool,

    /// Debug logging and pretty-printed output
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(long)]
    ignore_info_logs: bool,
}

impl Cli {
    /// Merge CLI/env values over the config file (CLI > ENV > config file).
    fn run_options(&self, config: &AppConfig) -> RunOptions {
        let hosts = self
            .hosts
            .as_deref()
            .map(split_hosts)
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| vec![local_host_name()]);

        RunOptions {
            config_file: self.config.clone(),
            poll_interval: effective_interval(self.poll_interval, config.interval, self.run_once),
            hosts,
            credentials: Credentials::from_parts(&self.user, &self.domain, &self.password),
            run_once: self.run_once,
            verbose: self.verbose,
            ignore_info_logs: self.ignore_info_logs,
        }
    }

    fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.ignore_info_logs {
            "warn"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the emitted envelopes
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.default_log_filter().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Perfmon collector starting");

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = AppConfig::load(&cli.config)?;
    let options = cli.run_options(&config);

    tracing::info!(
        hosts = ?options.hosts,
        poll_interval = ?options.poll_interval,
        run_once = options.run_once,
        user = %cli.user,
        domain = %cli.domain,
        password = if cli.password.is_empty() { "" } else { "REDACTED" },
        "Options resolved"
    );

    if options.credentials.is_some() {
        tracing::warn!(
            "Alternate identity is not available on this platform; credentials are only passed to query connections"
        );
    }
    tracing::warn!("No native counter or query binding on this platform; sources will be reported unavailable");

    let emit = EmitBuilder::stdout()
        .name(config.name.clone())
        .pretty(options.verbose)
        .build()?;

    let engine = Engine::builder(config.counterlist, Arc::new(emit.writer.clone()))
        .defaults(config.defaults)
        .options(&options)
        .providers(Providers::unsupported())
        .build()?;

    for unit in engine.units() {
        tracing::debug!(
            unit = %unit.name,
            counter_sources = unit.counter_sources,
            query_sources = unit.query_sources,
            interval = ?unit.interval,
            "Unit configured"
        );
    }

    let outcome = tokio::select! {
        result = engine.join() => Some(result),
        _ = shutdown_signal() => None,
    };

    tracing::info!("Flushing output...");
    if let Err(e) = emit.shutdown() {
        tracing::error!("Failed to shutdown emitter: {}", e);
    }

    match outcome {
        Some(Ok(reports)) => {
            for report in &reports {
                tracing::info!(
                    unit = %report.unit,
                    cycles = report.cycles,
                    batches = report.batches,
                    records = report.records,
                    removed_sources = report.removed_sources,
                    "Unit finished"
                );
            }
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Some(Err(e)) => {
            if e.is_identity() {
                tracing::error!("Could not run under the configured identity: {}", e);
            }
            Err(e.into())
        }
        None => {
            tracing::info!("Shutdown complete");
            // Unit workers only stop with the process.
            std::process::exit(0);
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
