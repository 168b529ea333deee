//! proxy-certs
//!
//! Keeps a reverse proxy serving HTTPS for a list of domains.
//!
//! # Architecture Overview
//!
//! ```text
//!     .env ──▶ config::loader ──▶ AppConfig
//!                                     │
//!            ┌────────────────────────┴───────────────────────┐
//!            ▼                                                ▼
//!   certs::provisioner                               config::watcher
//!   ┌──────────────────────────────┐         ┌──────────────────────────┐
//!   │ lock                         │         │ notify events            │
//!   │ pass 1: classify+placeholder │         │   → debounce             │
//!   │ proxy: render, start, ready  │         │   → renewal lock free?   │
//!   │ pass 2: delete, issue, reload│         │   → render, test, reload │
//!   └──────────────┬───────────────┘         └────────────┬─────────────┘
//!                  │                                      │
//!                  └──────────────▶ proxy::controller ◀───┘
//!                                   (start / test / reload commands)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use proxy_certs::config::load_config;
use proxy_certs::lifecycle::clean::{generated_state, remove_generated_state};
use proxy_certs::lifecycle::prompt::{confirm, DefaultAnswer, InteractiveGate};
use proxy_certs::lifecycle::startup::{self, RunOptions, Services};
use proxy_certs::observability::logging::{init_logging, LogFormat};
use proxy_certs::observability::metrics::init_metrics;

#[derive(Parser)]
#[command(name = "proxy-certs")]
#[command(about = "Provision and renew TLS certificates for a reverse proxy", long_about = None)]
struct Cli {
    /// Environment file with KEY=VALUE settings
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Issue against the CA's staging environment
    #[arg(long)]
    staging: bool,

    /// Staging plus a confirmation prompt before each mutating step
    #[arg(long)]
    test: bool,

    /// Remove generated certificates, rendered configs and stale locks after confirmation, then run
    #[arg(long)]
    clean: bool,

    /// Exit after provisioning instead of watching for changes
    #[arg(long)]
    once: bool,

    /// Log output format (defaults to LOG_FORMAT, then pretty)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format.unwrap_or_else(LogFormat::from_env));

    tracing::info!("proxy-certs v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match load_config(&cli.env_file) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    if cli.staging || cli.test {
        config.staging = true;
    }

    tracing::info!(
        domains = ?config.domains,
        staging = config.staging,
        cert_root = ?config.paths.cert_root,
        "Configuration loaded"
    );

    if cli.clean {
        if let Some(code) = clean(&config).await {
            return code;
        }
    }

    if let Some(addr) = config.observability.metrics_address {
        init_metrics(addr);
    }

    let services = match Services::from_config(&config) {
        Ok(services) => services,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build readiness probe");
            return ExitCode::FAILURE;
        }
    };

    let mut options = RunOptions {
        once: cli.once,
        ..RunOptions::default()
    };
    if cli.test {
        options.gate = Arc::new(InteractiveGate);
    }

    match startup::run(&config, services, options).await {
        Ok(report) if report.is_success() => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        _ => ExitCode::FAILURE,
    }
}

/// Remove generated state after confirmation. `Some` ends the process.
async fn clean(config: &proxy_certs::AppConfig) -> Option<ExitCode> {
    let paths = match generated_state(config) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list generated state");
            return Some(ExitCode::FAILURE);
        }
    };

    if paths.is_empty() {
        println!("Nothing to clean.");
        return None;
    }

    println!("The following generated files will be deleted:");
    for path in &paths {
        println!("  {}", path.display());
    }

    if !confirm("Delete them?".to_string(), DefaultAnswer::No).await {
        println!("Aborted.");
        return Some(ExitCode::SUCCESS);
    }

    match remove_generated_state(&paths) {
        Ok(()) => None,
        Err(e) => {
            tracing::error!(error = %e, "Clean failed");
            Some(ExitCode::FAILURE)
        }
    }
}
