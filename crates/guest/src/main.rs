use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use duet::{NetPeer, PeerConfig, Phase, SessionEvent};

#[derive(Parser)]
#[command(name = "duet-guest")]
#[command(about = "Headless session guest for the duet sync layer")]
struct Args {
    /// Host to join, host:port.
    #[arg(short = 's', long)]
    host: String,

    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: String,

    #[arg(short = 'n', long, default_value = "")]
    name: String,

    #[arg(long, default_value_t = 120.0, help = "Must match the host's bpm")]
    bpm: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    anyhow::ensure!(
        args.bpm.is_finite() && args.bpm > 0.0,
        "--bpm must be a positive number, got {}",
        args.bpm
    );
    let host_addr: SocketAddr = args
        .host
        .parse()
        .with_context(|| format!("invalid host address: {}", args.host))?;

    let config = PeerConfig {
        display_name: args.name,
        beats_per_minute: args.bpm,
        ..Default::default()
    };

    let mut peer = NetPeer::guest(args.bind.as_str(), host_addr, config)?;
    log::info!("bound {} -> {}", peer.local_addr(), host_addr);

    let mut readied = false;

    loop {
        peer.update();

        if !readied && peer.phase() == Phase::Connected {
            peer.request_ready();
            readied = true;
        }

        for event in peer.drain_events() {
            match event {
                SessionEvent::PeerConnected { id, display_name } => {
                    log::info!("joined session hosted by {} ({})", display_name, id);
                }
                SessionEvent::PeerDisconnected { id } => {
                    log::info!("{} disconnected", id);
                }
                SessionEvent::PeerReady { id } => {
                    log::info!("{} ready", id);
                }
                SessionEvent::SessionStarted => {
                    log::info!("session started, latency {:.1}ms", peer.latency_ms());
                    readied = false;
                }
                SessionEvent::SessionStopped => {
                    log::info!("session stopped, back in lobby");
                }
                SessionEvent::TimelineCorrected { start_time } => {
                    log::info!("timeline snapped to start {:.3}", start_time);
                }
                SessionEvent::NoteSpawned {
                    lane,
                    beat,
                    target_time,
                } => {
                    log::debug!(
                        "note: lane {} beat {} due at {:.3}",
                        lane,
                        beat,
                        target_time
                    );
                }
                SessionEvent::RemoteHit { peer, lane, grade } => {
                    log::info!("{} hit lane {}: {:?}", peer, lane, grade);
                }
                SessionEvent::RemoteMiss { peer, lane } => {
                    log::info!("{} missed lane {}", peer, lane);
                }
                SessionEvent::ScoreUpdated { peer, score, combo } => {
                    log::info!("{} score {} combo {}", peer, score, combo);
                }
                SessionEvent::RemoteInput { .. } => {}
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}
