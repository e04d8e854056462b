use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use duet::{Chart, ChartNote, Grade, NetPeer, PeerConfig, Phase, SessionEvent};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

/// Short intervals so a whole session fits in a few hundred milliseconds.
fn test_config() -> PeerConfig {
    PeerConfig {
        ping_interval_secs: 0.05,
        sync_interval_secs: 0.05,
        timeline_interval_secs: 0.02,
        ready_resend_secs: 0.05,
        heartbeat_interval_secs: 0.05,
        start_broadcast_interval_secs: 0.02,
        ..Default::default()
    }
}

fn spawn_pair() -> (NetPeer, NetPeer) {
    let port = next_port();
    let host_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let guest_addr: SocketAddr = format!("127.0.0.1:{}", port + 1).parse().unwrap();

    let host = NetPeer::host(host_addr, test_config()).unwrap();
    let guest = NetPeer::guest(guest_addr, host_addr, test_config()).unwrap();
    (host, guest)
}

fn pump(
    host: &mut NetPeer,
    guest: &mut NetPeer,
    host_events: &mut Vec<SessionEvent>,
    guest_events: &mut Vec<SessionEvent>,
    ms: u64,
) {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(ms) {
        host.update();
        guest.update();
        host_events.extend(host.drain_events());
        guest_events.extend(guest.drain_events());
        thread::sleep(Duration::from_millis(1));
    }
}

fn pump_until<F: Fn(&NetPeer, &NetPeer) -> bool>(
    host: &mut NetPeer,
    guest: &mut NetPeer,
    host_events: &mut Vec<SessionEvent>,
    guest_events: &mut Vec<SessionEvent>,
    timeout_ms: u64,
    done: F,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        host.update();
        guest.update();
        host_events.extend(host.drain_events());
        guest_events.extend(guest.drain_events());
        if done(host, guest) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn count_started(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::SessionStarted))
        .count()
}

#[test]
fn test_connect_ready_and_single_start() {
    let (mut host, mut guest) = spawn_pair();
    let mut host_events = Vec::new();
    let mut guest_events = Vec::new();

    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |_, g| g.phase() == Phase::Connected,
    ));
    assert!(host
        .roster()
        .iter()
        .any(|p| p.id == guest.local_id()));

    // One ready peer is not enough to start.
    guest.request_ready();
    pump(&mut host, &mut guest, &mut host_events, &mut guest_events, 100);
    assert!(!host.is_started());
    assert!(!guest.is_started());

    host.request_ready();
    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |h, g| h.is_started() && g.is_started(),
    ));

    // Keep pumping past all redundant GameStart rounds; the guest must
    // still have started exactly once.
    pump(&mut host, &mut guest, &mut host_events, &mut guest_events, 300);
    assert_eq!(count_started(&guest_events), 1);
    assert_eq!(count_started(&host_events), 1);
    assert_eq!(guest.phase(), Phase::Started);
}

#[test]
fn test_spawn_replicates_with_mirrored_lanes() {
    let (mut host, mut guest) = spawn_pair();
    host.set_chart(Chart::new(vec![ChartNote { beat: 1.0, lane: 2 }], 2.0));

    let mut host_events = Vec::new();
    let mut guest_events = Vec::new();

    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |_, g| g.phase() == Phase::Connected,
    ));
    host.request_ready();
    guest.request_ready();
    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |h, g| h.is_started() && g.is_started(),
    ));

    // The note's emit instant precedes the session start, so it goes out
    // on the first started tick; give the datagram time to land.
    pump(&mut host, &mut guest, &mut host_events, &mut guest_events, 300);

    let spawned_lanes = |events: &[SessionEvent]| -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::NoteSpawned { lane, beat, .. } if *beat == 1.0 => Some(*lane),
                _ => None,
            })
            .collect()
    };

    assert_eq!(spawned_lanes(&host_events), vec![2, 6]);
    assert_eq!(spawned_lanes(&guest_events), vec![2, 6]);
}

#[test]
fn test_score_propagates_to_other_peer() {
    let (mut host, mut guest) = spawn_pair();
    let mut host_events = Vec::new();
    let mut guest_events = Vec::new();

    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |_, g| g.phase() == Phase::Connected,
    ));

    guest.send_score(3200, 12, Grade::Perfect);
    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |h, _| h
            .roster()
            .iter()
            .any(|p| p.score == 3200 && p.combo == 12),
    ));

    let updated = host_events.iter().any(|e| {
        matches!(
            e,
            SessionEvent::ScoreUpdated { score: 3200, combo: 12, .. }
        )
    });
    assert!(updated);
}

#[test]
fn test_guest_timeline_tracks_host() {
    let (mut host, mut guest) = spawn_pair();
    let mut host_events = Vec::new();
    let mut guest_events = Vec::new();

    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |_, g| g.phase() == Phase::Connected,
    ));
    host.request_ready();
    guest.request_ready();

    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |h, g| h.is_started() && g.timeline_position().is_some(),
    ));

    // Let a few snapshot rounds land, then compare positions. On loopback
    // the reconciled clock should sit within a few milliseconds; allow a
    // generous margin for scheduler noise.
    pump(&mut host, &mut guest, &mut host_events, &mut guest_events, 200);
    let host_pos = host.timeline_position().unwrap();
    let guest_pos = guest.timeline_position().unwrap();
    assert!(
        (host_pos - guest_pos).abs() < 0.1,
        "host at {host_pos}, guest at {guest_pos}"
    );
}

#[test]
fn test_stop_returns_both_peers_to_lobby() {
    let (mut host, mut guest) = spawn_pair();
    let mut host_events = Vec::new();
    let mut guest_events = Vec::new();

    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |_, g| g.phase() == Phase::Connected,
    ));
    host.request_ready();
    guest.request_ready();
    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |h, g| h.is_started() && g.is_started(),
    ));

    host.stop_game();
    assert!(pump_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |h, g| !h.is_started() && !g.is_started(),
    ));

    let stopped = guest_events
        .iter()
        .any(|e| matches!(e, SessionEvent::SessionStopped));
    assert!(stopped);
    assert_eq!(guest.phase(), Phase::Connected);
    assert_eq!(host.phase(), Phase::Connected);
}

#[test]
fn test_crashed_guest_times_out_and_reconnect_succeeds() {
    let port = next_port();
    let host_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let host_config = PeerConfig {
        guest_timeout_secs: 0.15,
        ..test_config()
    };
    let mut host = NetPeer::host(host_addr, host_config).unwrap();
    let mut host_events = Vec::new();

    {
        let mut first = NetPeer::guest(
            format!("127.0.0.1:{}", port + 1).as_str(),
            host_addr,
            test_config(),
        )
        .unwrap();

        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(2000)
            && first.phase() != Phase::Connected
        {
            host.update();
            first.update();
            host_events.extend(host.drain_events());
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(first.phase(), Phase::Connected);
        // Dropped here without a Disconnect, as a crash would.
    }

    // Pump the host alone past the silence window.
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(400) {
        host.update();
        host_events.extend(host.drain_events());
        thread::sleep(Duration::from_millis(1));
    }
    assert!(host_events
        .iter()
        .any(|e| matches!(e, SessionEvent::PeerDisconnected { .. })));
    assert_eq!(host.roster().len(), 1);

    // A restarted guest carries a fresh id; the freed slot must take it.
    let mut second = NetPeer::guest(
        format!("127.0.0.1:{}", port + 2).as_str(),
        host_addr,
        test_config(),
    )
    .unwrap();
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(2000)
        && second.phase() != Phase::Connected
    {
        host.update();
        second.update();
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(second.phase(), Phase::Connected);
}

#[test]
fn test_second_guest_is_refused() {
    let port = next_port();
    let host_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let mut host = NetPeer::host(host_addr, test_config()).unwrap();
    let mut first = NetPeer::guest(
        format!("127.0.0.1:{}", port + 1).as_str(),
        host_addr,
        test_config(),
    )
    .unwrap();

    let mut host_events = Vec::new();
    let mut first_events = Vec::new();
    assert!(pump_until(
        &mut host,
        &mut first,
        &mut host_events,
        &mut first_events,
        2000,
        |_, g| g.phase() == Phase::Connected,
    ));

    let mut second = NetPeer::guest(
        format!("127.0.0.1:{}", port + 2).as_str(),
        host_addr,
        test_config(),
    )
    .unwrap();

    // The second guest never gets a Connect ack.
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(300) {
        host.update();
        first.update();
        second.update();
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(second.phase(), Phase::Idle);
    assert_eq!(host.roster().len(), 2);
}
