//! couch-client entry point.
//!
//! ```text
//! couch-client                       Connect with couch-client.toml or defaults
//! couch-client --host 192.168.1.10   Connect to a specific host
//! couch-client --poll-rate 60        Send controller state at 60 Hz
//! couch-client --config <path>       Load a custom config TOML
//! couch-client --gen-config          Write default config to stdout
//! ```

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use crossterm::event::{
    KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::{execute, terminal};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use couch_core::{
    ClientExit, ClientSession, ClientTransport, ControllerState, CouchError, Slot, VideoConfig,
};

use couch_client::config::ClientConfig;
use couch_client::keyboard::{self, KeyboardMapper};
use couch_client::stats::{self, FrameStats};

/// Reassembled frames waiting for the consumer.
const FRAME_QUEUE: usize = 8;

/// Seconds between video statistics log lines.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "couch-client", about = "Play on a remote couch host with the keyboard")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "couch-client.toml")]
    config: PathBuf,

    /// Host IP address (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Controller states sent per second.
    #[arg(long)]
    poll_rate: Option<u32>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Terminal ─────────────────────────────────────────────────────

/// Raw mode for the lifetime of the value.
struct RawTerminal {
    enhanced: bool,
}

impl RawTerminal {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        // Release events, when the terminal can report them.
        let enhanced = terminal::supports_keyboard_enhancement().unwrap_or(false);
        if enhanced {
            execute!(
                io::stdout(),
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                        | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
                )
            )?;
        }
        Ok(Self { enhanced })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = execute!(io::stdout(), PopKeyboardEnhancementFlags);
        }
        let _ = terminal::disable_raw_mode();
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.network.host = host;
    }
    if let Some(rate) = cli.poll_rate {
        config.input.poll_rate_hz = rate;
    }
    if cli.debug {
        config.logging.level = "debug".into();
    }

    // Init tracing. Raw mode garbles terminal output, so logs go to a file.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);
    if config.logging.file.is_empty() {
        subscriber.with_writer(io::sink).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        subscriber.with_writer(Mutex::new(file)).init();
    }

    info!("couch-client v{}", env!("CARGO_PKG_VERSION"));

    let transport_config = config.to_transport_config()?;
    println!("Connecting to {}...", transport_config.host_control);

    let session = match ClientTransport::connect(transport_config).await {
        Ok(session) => session,
        Err(CouchError::ServerFull) => {
            println!("Server full: the host already has every player slot taken.");
            error!("server full");
            return Err(CouchError::ServerFull.into());
        }
        Err(e) => {
            println!("Could not connect: {e}");
            error!("connect failed: {e}");
            return Err(e.into());
        }
    };

    println!(
        "Connected as player {}. Press Esc to quit.",
        session.slot().get() + 1
    );

    let exit = play(session, &config).await;

    match &exit {
        Ok(reason) => {
            println!("Disconnected: {reason}");
            info!("session ended: {reason}");
        }
        Err(e) => {
            println!("Session failed: {e}");
            error!("session failed: {e}");
        }
    }
    exit.map(|_| ()).map_err(Into::into)
}

/// Run the session with the keyboard as input until it ends.
async fn play(session: ClientSession, config: &ClientConfig) -> Result<ClientExit, CouchError> {
    let (input_tx, input_rx) = watch::channel(ControllerState::NEUTRAL);
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
    let (stats_tx, stats_rx) = watch::channel(FrameStats::default());
    let quit = session.shutdown_token();

    let terminal = RawTerminal::enable()?;
    info!(
        release_events = terminal.enhanced,
        layout = ?config.input.layout,
        "keyboard captured"
    );

    let mapper = KeyboardMapper::new(config.input.layout, config.key_hold());
    let reader = keyboard::spawn_reader(mapper, input_tx, quit.clone(), config.input_interval());
    let consumer = tokio::spawn(stats::consume_frames(frames_rx, stats_tx, STATS_INTERVAL));
    let announcements = tokio::spawn(log_announcements(
        session.slot_watch(),
        session.video_config_watch(),
    ));
    let link = session.stats_watch();

    let exit = session.run(input_rx, frames_tx).await;

    // Stop the reader and give the terminal back before printing.
    quit.cancel();
    match reader.await {
        Ok(Err(e)) => error!("keyboard reader failed: {e}"),
        Err(e) => error!("keyboard reader panicked: {e}"),
        Ok(Ok(())) => {}
    }
    drop(terminal);
    announcements.abort();

    let totals = consumer.await.unwrap_or(*stats_rx.borrow());
    info!(
        "received {} frames ({} KiB)",
        totals.total_frames,
        totals.total_bytes / 1024
    );
    let link = *link.borrow();
    info!(
        fragments = link.fragments_received,
        fragments_lost = link.fragments_lost,
        frames_dropped = link.frames_dropped,
        abandoned = link.assembler.abandoned,
        stale = link.assembler.stale,
        invalid = link.assembler.invalid,
        "video link"
    );
    exit
}

/// Log slot reassignments and stream format announcements.
async fn log_announcements(
    mut slot: watch::Receiver<Slot>,
    mut video: watch::Receiver<Option<VideoConfig>>,
) {
    loop {
        tokio::select! {
            changed = slot.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *slot.borrow_and_update();
                info!("host assigned {current}");
            }
            changed = video.changed() => {
                if changed.is_err() {
                    break;
                }
                let announced = *video.borrow_and_update();
                if let Some(cfg) = announced {
                    info!(
                        "stream: {} {}x{} @ {} fps, {} kbps",
                        cfg.codec_name(),
                        cfg.width,
                        cfg.height,
                        cfg.fps,
                        cfg.bitrate_kbps
                    );
                }
            }
        }
    }
}
