//! api-template server binary.
//!
//! ```text
//! parse CLI → .env → load config → init telemetry → bind → serve until signal
//!     → flush telemetry → exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_template::config::{load_config, load_env_file, load_from_env};
use api_template::lifecycle::signals::wait_for_signal;
use api_template::{HttpServer, Shutdown, Telemetry};

#[derive(Debug, Parser)]
#[command(name = "api-template", version, about = "HTTP service template")]
struct Cli {
    /// TOML configuration file; defaults and environment are used without it
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Dotenv file to export before loading config; defaults to `.env` if present
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    load_env_file(cli.env_file.as_deref())?;

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    let telemetry = Telemetry::init(&config.observability, &config.project_name)?;

    tracing::info!(
        project = %config.project_name,
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        rate_limit = config.rate_limit.enabled,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    let server = HttpServer::new(config, telemetry.context());
    let served = server.run(listener, receiver).await;

    tracing::info!("Shutdown complete");
    telemetry.shutdown()?;
    served?;
    Ok(())
}
