use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use duet::{Chart, NetPeer, PeerConfig, SessionEvent};

#[derive(Parser)]
#[command(name = "duet-host")]
#[command(about = "Headless session host for the duet sync layer")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = duet::DEFAULT_PORT)]
    port: u16,

    #[arg(short = 'n', long, default_value = "")]
    name: String,

    #[arg(long, default_value_t = 120.0)]
    bpm: f32,

    #[arg(long, default_value_t = 64, help = "Beats in the built-in metronome chart")]
    beats: u32,

    #[arg(long, default_value_t = 50.0, help = "Timeline broadcast interval in ms")]
    timeline_interval: f32,
}

/// Rejects timing overrides that would panic `Duration` construction or
/// produce a nonsense beat grid.
fn validate_timing(bpm: f32, timeline_interval_ms: f32) -> Result<()> {
    anyhow::ensure!(
        bpm.is_finite() && bpm > 0.0,
        "--bpm must be a positive number, got {}",
        bpm
    );
    anyhow::ensure!(
        timeline_interval_ms.is_finite() && timeline_interval_ms > 0.0,
        "--timeline-interval must be a positive number of ms, got {}",
        timeline_interval_ms
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    validate_timing(args.bpm, args.timeline_interval)?;
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = PeerConfig {
        display_name: args.name,
        beats_per_minute: args.bpm,
        timeline_interval_secs: args.timeline_interval / 1000.0,
        ..Default::default()
    };

    let mut peer = NetPeer::host(bind_addr.as_str(), config)?;
    peer.set_chart(Chart::metronome(args.beats));
    log::info!("listening on {}", peer.local_addr());

    loop {
        peer.update();

        for event in peer.drain_events() {
            match event {
                SessionEvent::PeerConnected { id, display_name } => {
                    log::info!("{} connected as {}", display_name, id);
                    // Headless host is always willing; ready up as soon as
                    // someone is in the lobby.
                    peer.request_ready();
                }
                SessionEvent::PeerDisconnected { id } => {
                    log::info!("{} disconnected", id);
                }
                SessionEvent::PeerReady { id } => {
                    log::info!("{} ready", id);
                }
                SessionEvent::SessionStarted => {
                    log::info!("session started at {:.0} bpm", args.bpm);
                }
                SessionEvent::SessionStopped => {
                    log::info!("session stopped");
                }
                SessionEvent::NoteSpawned { lane, beat, .. } => {
                    log::debug!("note spawned: lane {} beat {}", lane, beat);
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
                SessionEvent::RemoteInput { .. } | SessionEvent::TimelineCorrected { .. } => {}
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_args_validated() {
        assert!(validate_timing(120.0, 50.0).is_ok());
        assert!(validate_timing(-1.0, 50.0).is_err());
        assert!(validate_timing(0.0, 50.0).is_err());
        assert!(validate_timing(120.0, -5.0).is_err());
        assert!(validate_timing(f32::NAN, 50.0).is_err());
        assert!(validate_timing(120.0, f32::INFINITY).is_err());
    }
}
