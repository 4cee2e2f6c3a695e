//! Peerlink probe binary.
//!
//! Connects to one remote peer, optionally keeps the link alive with
//! auto-reconnect, sends a set of payloads after every connect, and prints
//! what comes back until the run duration expires.

use clap::Parser;
use peerlink_session::{Network, PeerHandler, PeerId};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::io::IsTerminal;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::ProbeConfig;
use logging::ProbeLogFormatter;

/// Peerlink connectivity probe
#[derive(Parser, Debug)]
#[command(name = "peerlink", version, about = "Connect to a peer and exchange framed packets")]
struct Args {
    /// Remote host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Remote port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Reconnect automatically when the link drops
    #[arg(long)]
    auto_reconnect: bool,

    /// First reconnect delay, e.g. 100ms
    #[arg(long, default_value = "1s")]
    initial_delay: humantime::Duration,

    /// Reconnect delay cap, e.g. 30s
    #[arg(long, default_value = "30s")]
    max_delay: humantime::Duration,

    /// Payload sent after each connect (repeatable)
    #[arg(long)]
    send: Vec<String>,

    /// How long to run before shutting down
    #[arg(long, default_value = "10s")]
    duration: humantime::Duration,

    /// Callback poll interval
    #[arg(long, default_value = "10ms")]
    poll_interval: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "peerlink.yaml")]
    config: PathBuf,
}

/// Records connects for the main loop and reports traffic
#[derive(Default)]
struct ProbeHandler {
    just_connected: Arc<Mutex<Vec<PeerId>>>,
    packets: u64,
    bytes: u64,
}

impl PeerHandler for ProbeHandler {
    fn on_connection_change(&mut self, peer: PeerId, connected: bool) {
        if connected {
            info!("Peer {} connected", peer);
            self.just_connected
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(peer);
        } else {
            warn!(
                "Peer {} disconnected after {} packets ({} bytes)",
                peer,
                self.packets,
                self.bytes
            );
        }
    }

    fn on_data(&mut self, peer: PeerId, payload: &[u8]) {
        self.packets += 1;
        self.bytes += payload.len() as u64;
        info!(
            "Peer {} sent {} bytes: {}",
            peer,
            payload.len(),
            String::from_utf8_lossy(payload)
        );
    }
}

fn millis(d: humantime::Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("peerlink={}", args.log_level).parse()?)
        .add_directive(format!("peerlink_session={}", args.log_level).parse()?)
        .add_directive(format!("peerlink_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(std::io::stdout().is_terminal())
        .event_format(ProbeLogFormatter::new("peerlink_"))
        .init();

    info!("Starting peerlink probe v{}", env!("CARGO_PKG_VERSION"));

    let mut probe_config = ProbeConfig::load_from_file(&args.config)?;
    if let Some(host) = args.host {
        probe_config.host = host;
    }
    if let Some(port) = args.port {
        probe_config.port = port;
    }
    probe_config.payloads.extend(args.send);

    let net = Network::with_config(probe_config.network.clone())?;

    let just_connected = Arc::new(Mutex::new(Vec::new()));
    net.set_handler(ProbeHandler {
        just_connected: just_connected.clone(),
        ..Default::default()
    });

    let peer = net.connect(&probe_config.host, probe_config.port)?;
    info!("Connecting peer {} to {}:{}", peer, probe_config.host, probe_config.port);

    if args.auto_reconnect {
        net.set_auto_reconnect(
            peer,
            true,
            millis(args.initial_delay),
            millis(args.max_delay),
        )?;
        debug!("Auto-reconnect enabled ({} to {})", args.initial_delay, args.max_delay);
    }

    let started = Instant::now();
    while started.elapsed() < *args.duration {
        net.run_callbacks()?;

        let connected: Vec<PeerId> = std::mem::take(
            &mut *just_connected.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for peer in connected {
            for payload in &probe_config.payloads {
                if let Err(e) = net.send(peer, payload.as_bytes()) {
                    error!("Failed to send to peer {}: {}", peer, e);
                }
            }
        }

        std::thread::sleep(*args.poll_interval);
    }

    match net.peer_info(peer) {
        Ok(peer_info) => info!(
            "Peer {} final state {}: {} connects, {} frames in, {} frames out",
            peer,
            peer_info.state,
            peer_info.stats.connects,
            peer_info.stats.frames_received,
            peer_info.stats.frames_sent
        ),
        Err(e) => warn!("Peer {} unavailable: {}", peer, e),
    }

    net.shutdown()?;
    info!("Probe finished");
    Ok(())
}
