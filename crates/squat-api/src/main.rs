//! Squat analysis server.
//!
//! ```bash
//! RUST_LOG=info cargo run --bin squat-server -- --config squat.toml
//! SQUAT__HTTP__BIND_ADDR=127.0.0.1:9000 cargo run --bin squat-server
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use squat_api::{serve, ApiConfig};

#[derive(Parser, Debug)]
#[command(
    name = "squat-server",
    version = env!("CARGO_PKG_VERSION"),
    about = "Real-time squat form analysis over WebSocket"
)]
struct Args {
    /// Configuration file; environment variables prefixed SQUAT__ override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ApiConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ApiConfig::from_env().context("loading configuration from environment")?,
    };
    if let Some(bind) = args.bind {
        config.http.bind_addr = bind;
    }

    info!(
        bind = %config.http.bind_addr,
        mirror = config.session.mirror,
        "Starting squat-server"
    );
    serve(config, None).await.context("server failed")?;
    Ok(())
}
