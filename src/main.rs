//! vhost-engine binary.
//!
//! Loads the process defaults, scans the web root for domains and serves
//! them until Ctrl-C or SIGTERM.

use std::path::PathBuf;

use clap::Parser;

use vhost_engine::config::load_config;
use vhost_engine::observability::{logging, metrics};
use vhost_engine::Engine;

#[derive(Parser, Debug)]
#[command(name = "vhost-engine")]
#[command(about = "Multi-tenant virtual-host web server", long_about = None)]
struct Args {
    /// Process defaults file (TOML). Watched for changes.
    #[arg(short, long, default_value = "defaults.toml")]
    config: PathBuf,

    /// Override the web root directory.
    #[arg(long)]
    web_root: Option<PathBuf>,

    /// Override the HTTP port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Also serve HTTPS.
    #[arg(long)]
    https: bool,

    /// Override the log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut defaults = load_config(&args.config)?;
    if let Some(web_root) = args.web_root {
        defaults.web_root = web_root;
    }
    if let Some(port) = args.port {
        defaults.listener.port = port;
    }
    if args.https {
        defaults.listener.https = true;
    }
    if let Some(level) = args.log_level {
        defaults.observability.log_level = level;
    }

    logging::init(&defaults.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vhost-engine starting");
    tracing::info!(
        address = %defaults.listener.address,
        port = defaults.listener.port,
        https = defaults.listener.https,
        web_root = %defaults.web_root.display(),
        "Configuration loaded"
    );

    if defaults.observability.metrics_enabled {
        match defaults.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %defaults.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let engine = Engine::build(defaults).await?;
    engine.serve(Some(args.config)).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
