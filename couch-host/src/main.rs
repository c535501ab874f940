//! couch-host entry point.
//!
//! ```text
//! couch-host                       Run with couch-host.toml or defaults
//! couch-host --config <path>       Load a custom config TOML
//! couch-host --bind 192.168.1.10   Override the bind address
//! couch-host --fps 30              Override the stream frame rate
//! couch-host --max-clients 2       Limit concurrent players
//! couch-host --gen-config          Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use couch_host::config::HostConfig;
use couch_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "couch-host", about = "Share this screen and accept remote controllers")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "couch-host.toml")]
    config: PathBuf,

    /// Address to bind the control, input and video sockets to.
    #[arg(long)]
    bind: Option<String>,

    /// Target stream frame rate.
    #[arg(long)]
    fps: Option<u16>,

    /// Maximum concurrent clients (1-4).
    #[arg(long)]
    max_clients: Option<usize>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply command-line overrides.
    let mut config = HostConfig::load(&cli.config);
    if let Some(bind) = cli.bind {
        config.network.bind = bind;
    }
    if let Some(fps) = cli.fps {
        config.video.fps = fps;
    }
    if let Some(max_clients) = cli.max_clients {
        config.network.max_clients = max_clients;
    }
    if cli.debug {
        config.logging.level = "debug".into();
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("couch-host v{}", env!("CARGO_PKG_VERSION"));
    info!("bind address: {}", config.network.bind);
    info!(
        "ports: control {}, input {}, video {}",
        config.network.control_port, config.network.input_port, config.network.video_port
    );
    info!("max clients: {}", config.network.max_clients);
    info!(
        "video: {} {}x{} @ {} fps, {} kbps",
        config.video.codec,
        config.video.width,
        config.video.height,
        config.video.fps,
        config.video.bitrate_kbps
    );

    let service = HostService::new(config);

    // Ctrl-C handler.
    let stop = service.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    if let Err(e) = service.run().await {
        error!("host failed: {e}");
        return Err(e);
    }

    Ok(())
}
