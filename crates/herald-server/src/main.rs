//! # Herald Server
//!
//! Server-Sent Events broadcaster with channels and presence.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! herald
//!
//! # Run with custom config
//! herald --config /path/to/herald.toml
//!
//! # Run with environment variables
//! PORT=8080 HERALD_HOST=0.0.0.0 herald
//!
//! # Verbose logging
//! DEBUG_LOGS=true herald
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let default_filter = if std::env::var("DEBUG_LOGS").is_ok_and(|v| v == "true") {
        "herald=debug,herald_core=debug"
    } else {
        "herald=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path_arg()? {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Herald server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Read `--config <path>` from the command line.
fn config_path_arg() -> Result<Option<String>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => return Ok(Some(path)),
                None => bail!("--config requires a path"),
            },
            other => bail!("Unknown argument: {other}"),
        }
    }
    Ok(None)
}
