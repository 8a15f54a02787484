//! pipehub relay binary.
//!
//! Bridges the relay to standard streams: every inbound pipeline message is
//! written to stdout as one JSON line, and every line read from stdin is
//! pushed as an outbound event. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Listen on all interfaces, port 9000
//! pipehub-server
//!
//! # Local only, verbose
//! pipehub-server --host 127.0.0.1 --port 9100 --log-level debug
//! ```

use std::{
    io::{self, BufRead},
    thread,
    time::Duration,
};

use clap::Parser;
use pipehub_server::{
    DEFAULT_EVENT_NAME, DEFAULT_HOST, DEFAULT_PORT, EventPusher, JsonLinesSink, RelayConfig,
    RelayHandle,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// pipehub relay server
#[derive(Parser, Debug)]
#[command(name = "pipehub-server")]
#[command(about = "Relay between pipeline clients and a notification bridge")]
#[command(version)]
struct Args {
    /// Interface to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Upper bound on one dispatch tick, in milliseconds
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Largest accepted frame payload, in bytes
    #[arg(long, default_value = "67108864")]
    max_frame_size: u64,

    /// Event name attached to forwarded messages
    #[arg(long, default_value = DEFAULT_EVENT_NAME)]
    event_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    tracing::info!("pipehub relay starting");

    let config = RelayConfig::new(&args.host, args.port)
        .with_tick_interval(Duration::from_millis(args.tick_ms))
        .with_max_frame_size(args.max_frame_size)
        .with_event_name(args.event_name);

    let relay = RelayHandle::start(config, JsonLinesSink::new(io::stdout()))?;

    tracing::info!("relay listening on {}", relay.local_addr());

    let pusher = relay.pusher();
    thread::Builder::new().name("pipehub-stdin".to_string()).spawn(move || forward_stdin(&pusher))?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");

    tokio::task::spawn_blocking(move || relay.stop()).await??;

    Ok(())
}

/// Push every non-empty stdin line as an outbound event until EOF.
fn forward_stdin(pusher: &EventPusher) {
    for line in io::stdin().lock().lines() {
        match line {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    pusher.push(line);
                }
            },
            Err(e) => {
                tracing::warn!("failed to read stdin: {e}");
                break;
            },
        }
    }

    tracing::info!("stdin closed, no further events will be pushed");
}
