use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::config::PeerConfig;
use crate::event::SessionEvent;
use crate::net::protocol::{Body, Grade, HitReport, Message, TimeProbe, wall_clock_ticks};
use crate::net::transport::Transport;
use crate::session::handshake::{HandshakeState, Phase};
use crate::session::relay::{EndpointTable, RepeatingBroadcast};
use crate::session::{PeerRecord, Role, Roster, generate_peer_id};
use crate::sync::clock::ClockSync;
use crate::sync::replicate::{Chart, mirror_lanes, spawn_payload};
use crate::sync::timeline::{Correction, GuestTimeline, HostTimeline};

/// One session participant, host or guest.
///
/// Everything is driven from `update()`: it drains the receive channel,
/// dispatches each message, then runs whichever interval timers are due.
/// Handlers never run on the receive thread. All collaborators are owned
/// here and wired up in the constructors; nothing reaches for globals.
pub struct NetPeer {
    role: Role,
    local_id: String,
    config: PeerConfig,
    transport: Transport,
    roster: Roster,
    /// Host only; guests have no relay duties.
    endpoints: Option<EndpointTable>,
    handshake: HandshakeState,
    clock: ClockSync,
    host_timeline: Option<HostTimeline>,
    guest_timeline: GuestTimeline,
    chart: Option<Chart>,
    start_broadcast: Option<RepeatingBroadcast>,
    pending_events: VecDeque<SessionEvent>,
    epoch: Instant,
    last_update: Instant,
    last_ping: Instant,
    last_sync: Instant,
    last_timeline: Instant,
    last_heartbeat: Instant,
    game_started: bool,
}

impl NetPeer {
    pub fn host<A: ToSocketAddrs>(bind: A, config: PeerConfig) -> io::Result<Self> {
        let transport = Transport::bind(bind)?;
        let mut peer = Self::build(Role::Host, transport, config);

        // The host is trivially connected to its own session.
        peer.handshake.on_connected();
        log::info!(
            "hosting session as {} on {}",
            peer.local_id,
            peer.transport.local_addr()
        );
        Ok(peer)
    }

    pub fn guest<A: ToSocketAddrs>(
        bind: A,
        host_addr: SocketAddr,
        config: PeerConfig,
    ) -> io::Result<Self> {
        let mut transport = Transport::bind(bind)?;
        transport.set_remote(host_addr);

        let mut peer = Self::build(Role::Guest, transport, config);
        log::info!(
            "joining session at {} as {}",
            host_addr,
            peer.local_id
        );
        peer.post(Body::Connect {
            display_name: peer.local_display_name(),
        });
        Ok(peer)
    }

    fn build(role: Role, transport: Transport, config: PeerConfig) -> Self {
        let local_id = generate_peer_id();
        let now = Instant::now();

        let mut roster = Roster::new();
        let display_name = if config.display_name.is_empty() {
            format!("Player_{}", &local_id[..4])
        } else {
            config.display_name.clone()
        };
        roster.insert(PeerRecord::new(&local_id, &display_name));

        let guest_timeline = GuestTimeline::new(
            config.beat_duration(),
            config.snap_threshold_secs as f64,
            config.smoothing_rate as f64,
        );

        Self {
            role,
            local_id,
            endpoints: match role {
                Role::Host => Some(EndpointTable::new(config.max_guests)),
                Role::Guest => None,
            },
            handshake: HandshakeState::new(Duration::from_secs_f32(config.ready_resend_secs)),
            clock: ClockSync::new(),
            host_timeline: None,
            guest_timeline,
            chart: None,
            start_broadcast: None,
            pending_events: VecDeque::new(),
            epoch: now,
            last_update: now,
            last_ping: now,
            last_sync: now,
            last_timeline: now,
            last_heartbeat: now,
            game_started: false,
            config,
            transport,
            roster,
        }
    }

    // --- accessors ---

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn phase(&self) -> Phase {
        self.handshake.phase()
    }

    pub fn is_started(&self) -> bool {
        self.game_started
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn latency_ms(&self) -> f64 {
        self.clock.latency_ms()
    }

    pub fn clock_offset(&self) -> f64 {
        self.clock.offset()
    }

    /// Seconds since this peer was created; the session-local clock every
    /// message is stamped with.
    pub fn local_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Current song position, authoritative on the host and reconciled on
    /// the guest. None before the session starts (or first sync).
    pub fn timeline_position(&self) -> Option<f64> {
        if !self.game_started {
            return None;
        }
        let now = self.local_time();
        match self.role {
            Role::Host => self.host_timeline.as_ref().map(|t| t.position(now)),
            Role::Guest => self.guest_timeline.position(now),
        }
    }

    /// Installs the spawn schedule the host emits after GameStart. Guests
    /// ignore it; their notes arrive over the wire.
    pub fn set_chart(&mut self, chart: Chart) {
        self.chart = Some(chart);
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.pending_events.drain(..).collect()
    }

    fn local_display_name(&self) -> String {
        self.roster
            .get(&self.local_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_default()
    }

    // --- outbound API ---

    /// Signals this peer is ready to start. Repeats automatically until the
    /// session starts.
    pub fn request_ready(&mut self) {
        if !self.handshake.request_ready() {
            return;
        }
        let local_id = self.local_id.clone();
        self.mark_peer_ready(&local_id);
        self.post(Body::PlayerReady);
        self.handshake.mark_ready_sent(Instant::now());
        if self.role == Role::Host {
            self.maybe_start();
        }
    }

    pub fn send_input(&mut self, lane: u8, input_time: f64) {
        self.post(Body::PlayerInput { lane, input_time });
    }

    pub fn send_hit(&mut self, lane: u8, grade: Grade, hit_time: f64) {
        self.post(Body::NoteHit(HitReport {
            lane,
            grade,
            hit_time,
        }));
    }

    pub fn send_miss(&mut self, lane: u8) {
        self.post(Body::NoteMiss { lane });
    }

    pub fn send_score(&mut self, score: u32, combo: u32, grade: Grade) {
        self.roster.set_score(&self.local_id, score, combo);
        self.post(Body::PlayerScore {
            score,
            combo,
            grade,
        });
    }

    /// Ends the running session on every peer and returns to the lobby.
    pub fn stop_game(&mut self) {
        if !self.game_started {
            return;
        }
        self.post(Body::GameStop);
        self.end_session();
    }

    /// Announces departure and stops the receive thread.
    pub fn disconnect(&mut self) {
        self.post(Body::Disconnect);
        self.transport.shutdown();
    }

    // --- tick ---

    pub fn update(&mut self) {
        let tick_start = Instant::now();
        let dt = tick_start.duration_since(self.last_update).as_secs_f64();
        self.last_update = tick_start;

        for (message, addr) in self.transport.drain() {
            self.dispatch(message, addr);
        }

        self.run_timers(tick_start);

        if self.role == Role::Guest && self.game_started {
            if let Some(Correction::Snapped { start_time }) = self.guest_timeline.tick(dt) {
                self.pending_events
                    .push_back(SessionEvent::TimelineCorrected { start_time });
            }
        }
    }

    fn run_timers(&mut self, now: Instant) {
        let local_now = self.local_time();

        if self.role == Role::Guest && self.handshake.phase() != Phase::Idle {
            if self.elapsed(self.last_ping, self.config.ping_interval_secs, now) {
                self.last_ping = now;
                self.post(Body::Ping);
            }
        }

        if self.handshake.phase() != Phase::Idle
            && self.elapsed(self.last_sync, self.config.sync_interval_secs, now)
            && self.has_someone_to_talk_to()
        {
            self.last_sync = now;
            let probe = self.make_probe(local_now);
            self.post(Body::SyncTime(probe));
        }

        if self.handshake.ready_resend_due(now) {
            self.handshake.mark_ready_sent(now);
            self.post(Body::PlayerReady);
        }

        if self.role == Role::Host {
            self.evict_silent_guests();

            if self.has_someone_to_talk_to()
                && self.elapsed(self.last_heartbeat, self.config.heartbeat_interval_secs, now)
            {
                self.last_heartbeat = now;
                self.post(Body::Ping);
            }

            let due_start = self.start_broadcast.as_mut().and_then(|rb| rb.poll(now));
            if let Some(body) = due_start {
                log::debug!("redundant start broadcast");
                self.post(body);
            }
            if self
                .start_broadcast
                .as_ref()
                .is_some_and(|rb| rb.is_finished())
            {
                self.start_broadcast = None;
            }

            if self.game_started {
                if self.elapsed(self.last_timeline, self.config.timeline_interval_secs, now) {
                    self.last_timeline = now;
                    if let Some(timeline) = self.host_timeline.as_ref() {
                        let snapshot = timeline.snapshot(local_now);
                        self.post(Body::SyncTimeline(snapshot));
                    }
                }
                self.emit_due_spawns(local_now);
            }
        }
    }

    fn elapsed(&self, since: Instant, interval_secs: f32, now: Instant) -> bool {
        now.duration_since(since) >= Duration::from_secs_f32(interval_secs)
    }

    fn has_someone_to_talk_to(&self) -> bool {
        match self.role {
            Role::Host => self.endpoints.as_ref().is_some_and(|t| !t.is_empty()),
            Role::Guest => true,
        }
    }

    /// A crashed guest never sends Disconnect; dropping it after a silence
    /// window frees its slot so a restarted guest (with a fresh id) can
    /// register.
    fn evict_silent_guests(&mut self) {
        let timeout = Duration::from_secs_f32(self.config.guest_timeout_secs);
        let stale = match self.endpoints.as_mut() {
            Some(table) => table.evict_stale(timeout),
            None => return,
        };
        for id in stale {
            log::info!("{} timed out", id);
            if self.roster.remove(&id).is_some() {
                self.pending_events
                    .push_back(SessionEvent::PeerDisconnected { id });
            }
        }
    }

    fn make_probe(&self, local_now: f64) -> TimeProbe {
        let (pos, beat) = match self.role {
            Role::Host => match self.host_timeline.as_ref() {
                Some(t) => (t.position(local_now), t.beat_index(local_now)),
                None => (0.0, 0),
            },
            Role::Guest => match self.guest_timeline.position(local_now) {
                Some(pos) => (
                    pos,
                    (pos.max(0.0) / self.guest_timeline.beat_duration()) as u32,
                ),
                None => (0.0, 0),
            },
        };
        TimeProbe {
            send_time: local_now,
            timeline_pos: pos,
            beat_index: beat,
        }
    }

    fn emit_due_spawns(&mut self, local_now: f64) {
        let (position, beat_duration, start_time) = match self.host_timeline.as_ref() {
            Some(t) => (t.position(local_now), t.beat_duration(), t.start_time()),
            None => return,
        };

        let due = match self.chart.as_mut() {
            Some(chart) => chart.due_spawns(position, beat_duration),
            None => return,
        };

        for note in due {
            let target_time = start_time + note.beat as f64 * beat_duration;
            self.post(Body::NoteSpawn(spawn_payload(note, local_now)));
            for lane in mirror_lanes(note.lane) {
                self.pending_events.push_back(SessionEvent::NoteSpawned {
                    lane,
                    beat: note.beat,
                    target_time,
                });
            }
        }
    }

    // --- inbound dispatch ---

    fn dispatch(&mut self, message: Message, addr: SocketAddr) {
        // Our own ping coming back is the round-trip measurement; anything
        // else from ourselves is a stray reflection.
        if message.sender_id == self.local_id {
            if message.body == Body::Ping {
                let rtt = self
                    .clock
                    .observe_round_trip(wall_clock_ticks(), message.wall_ticks);
                log::trace!("round trip {:.1}ms", rtt);
            }
            return;
        }

        if self.role == Role::Host {
            self.dispatch_as_host(message, addr);
        } else {
            self.dispatch_as_guest(message);
        }
    }

    fn dispatch_as_host(&mut self, message: Message, addr: SocketAddr) {
        let sender = message.sender_id.clone();
        let local_now = self.local_time();

        // Track the sender's address on every datagram, not just Connect,
        // so relaying survives a rebinding NAT.
        let registered = self
            .endpoints
            .as_mut()
            .is_some_and(|t| t.upsert(&sender, addr));

        match &message.body {
            Body::Connect { display_name } => {
                if !registered {
                    log::warn!("session full, refusing connect from {} ({})", sender, addr);
                    return;
                }
                if !self.roster.contains(&sender) {
                    self.roster.insert(PeerRecord::new(&sender, display_name));
                    self.pending_events.push_back(SessionEvent::PeerConnected {
                        id: sender.clone(),
                        display_name: display_name.clone(),
                    });
                    log::info!("{} ({}) joined from {}", display_name, sender, addr);
                }
                // Ack with our own identity so the guest learns who hosts,
                // then let everyone else know.
                let ack = self.make_message(Body::Connect {
                    display_name: self.local_display_name(),
                });
                self.send_one(&ack, addr);
                self.relay(&message);
            }
            Body::Disconnect => {
                if let Some(table) = self.endpoints.as_mut() {
                    table.remove(&sender);
                }
                if self.roster.remove(&sender).is_some() {
                    self.pending_events
                        .push_back(SessionEvent::PeerDisconnected { id: sender.clone() });
                    log::info!("{} left", sender);
                }
                self.relay(&message);
            }
            Body::Ping => {
                if !registered {
                    return;
                }
                // Echo unchanged; the sender measures its round trip from
                // the original wall-clock stamp.
                self.send_one(&message, addr);
            }
            Body::PlayerReady => {
                if !registered {
                    return;
                }
                self.mark_peer_ready(&sender);
                self.relay(&message);
                self.maybe_start();
            }
            Body::SyncTime(probe) => {
                if !registered {
                    return;
                }
                self.clock.observe(local_now, probe);
                let reply = self.make_message(Body::SyncTime(self.make_probe(local_now)));
                self.send_one(&reply, addr);
                self.relay(&message);
            }
            Body::GameStop => {
                self.relay(&message);
                self.end_session();
            }
            Body::NoteHit(report) => {
                self.pending_events.push_back(SessionEvent::RemoteHit {
                    peer: sender,
                    lane: report.lane,
                    grade: report.grade,
                });
                self.relay(&message);
            }
            Body::NoteMiss { lane } => {
                self.pending_events.push_back(SessionEvent::RemoteMiss {
                    peer: sender,
                    lane: *lane,
                });
                self.relay(&message);
            }
            Body::PlayerInput { lane, input_time } => {
                self.pending_events.push_back(SessionEvent::RemoteInput {
                    peer: sender,
                    lane: *lane,
                    input_time: *input_time,
                });
                self.relay(&message);
            }
            Body::PlayerScore { score, combo, .. } => {
                self.roster.set_score(&sender, *score, *combo);
                self.pending_events.push_back(SessionEvent::ScoreUpdated {
                    peer: sender,
                    score: *score,
                    combo: *combo,
                });
                self.relay(&message);
            }
            // Guests have no authority over these.
            Body::GameStart | Body::SyncTimeline(_) | Body::NoteSpawn(_) => {
                log::debug!("ignoring host-only message from {}", sender);
            }
        }
    }

    fn dispatch_as_guest(&mut self, message: Message) {
        let sender = message.sender_id.clone();
        let local_now = self.local_time();

        match &message.body {
            Body::Connect { display_name } => {
                self.handshake.on_connected();
                if !self.roster.contains(&sender) {
                    self.roster.insert(PeerRecord::new(&sender, display_name));
                    self.pending_events.push_back(SessionEvent::PeerConnected {
                        id: sender,
                        display_name: display_name.clone(),
                    });
                }
            }
            Body::Disconnect => {
                if self.roster.remove(&sender).is_some() {
                    self.pending_events
                        .push_back(SessionEvent::PeerDisconnected { id: sender });
                }
            }
            Body::Ping => {
                // Host heartbeat: bounce it back so the host's latency
                // figure stays fresh.
                self.post_message(&message);
            }
            Body::PlayerReady => {
                self.mark_peer_ready(&sender);
            }
            Body::GameStart => {
                if self.handshake.on_game_start() {
                    self.game_started = true;
                    self.guest_timeline.reset();
                    self.pending_events.push_back(SessionEvent::SessionStarted);
                    log::info!("session started");
                }
            }
            Body::GameStop => {
                self.end_session();
            }
            Body::SyncTime(probe) => {
                self.clock.observe(local_now, probe);
            }
            Body::SyncTimeline(snapshot) => {
                let offset = if self.config.apply_clock_offset {
                    self.clock.offset()
                } else {
                    0.0
                };
                if let Some(Correction::Snapped { start_time }) =
                    self.guest_timeline.on_snapshot(local_now, snapshot, offset)
                {
                    self.pending_events
                        .push_back(SessionEvent::TimelineCorrected { start_time });
                }
            }
            Body::NoteSpawn(spawn) => {
                let target_time = self
                    .guest_timeline
                    .beat_to_time(spawn.beat)
                    .unwrap_or(local_now);
                for lane in mirror_lanes(spawn.lane) {
                    self.pending_events.push_back(SessionEvent::NoteSpawned {
                        lane,
                        beat: spawn.beat,
                        target_time,
                    });
                }
            }
            Body::NoteHit(report) => {
                self.pending_events.push_back(SessionEvent::RemoteHit {
                    peer: sender,
                    lane: report.lane,
                    grade: report.grade,
                });
            }
            Body::NoteMiss { lane } => {
                self.pending_events.push_back(SessionEvent::RemoteMiss {
                    peer: sender,
                    lane: *lane,
                });
            }
            Body::PlayerInput { lane, input_time } => {
                self.pending_events.push_back(SessionEvent::RemoteInput {
                    peer: sender,
                    lane: *lane,
                    input_time: *input_time,
                });
            }
            Body::PlayerScore { score, combo, .. } => {
                self.roster.set_score(&sender, *score, *combo);
                self.pending_events.push_back(SessionEvent::ScoreUpdated {
                    peer: sender,
                    score: *score,
                    combo: *combo,
                });
            }
        }
    }

    fn mark_peer_ready(&mut self, id: &str) {
        let newly = self.roster.get(id).is_some_and(|p| !p.ready);
        if self.roster.mark_ready(id) && newly {
            self.pending_events
                .push_back(SessionEvent::PeerReady { id: id.to_owned() });
            log::info!("{} is ready", id);
        }
    }

    /// Host-side start gate: both peers present and all ready.
    fn maybe_start(&mut self) {
        if self.game_started || !self.roster.start_eligible() {
            return;
        }
        self.handshake.on_all_ready();
        self.handshake.on_game_start();

        self.game_started = true;
        let now = self.local_time();
        self.host_timeline = Some(HostTimeline::start(now, self.config.beat_duration()));
        if let Some(chart) = self.chart.as_mut() {
            chart.rewind();
        }
        self.start_broadcast = Some(RepeatingBroadcast::new(
            Body::GameStart,
            self.config.start_broadcast_rounds,
            Duration::from_secs_f32(self.config.start_broadcast_interval_secs),
        ));
        self.pending_events.push_back(SessionEvent::SessionStarted);
        log::info!("all peers ready, starting session");
    }

    fn end_session(&mut self) {
        if !self.game_started {
            return;
        }
        self.game_started = false;
        self.host_timeline = None;
        self.guest_timeline.reset();
        self.start_broadcast = None;
        self.handshake.on_game_stop();
        self.roster.reset_for_new_session();
        self.pending_events.push_back(SessionEvent::SessionStopped);
        log::info!("session stopped");
    }

    // --- send helpers ---

    fn make_message(&self, body: Body) -> Message {
        Message::new(&self.local_id, self.local_time(), body)
    }

    fn post(&mut self, body: Body) {
        let message = self.make_message(body);
        self.post_message(&message);
    }

    /// Role-aware send: hosts fan out to every registered guest, guests
    /// send to the host. Failures are logged, never fatal to the tick.
    fn post_message(&self, message: &Message) {
        match self.role {
            Role::Host => {
                let Some(table) = self.endpoints.as_ref() else {
                    return;
                };
                for addr in table.targets() {
                    self.send_one(message, addr);
                }
            }
            Role::Guest => {
                if let Err(e) = self.transport.send(message) {
                    log::warn!("send failed: {}", e);
                }
            }
        }
    }

    /// Forwards a guest's message to every other guest, preserving the
    /// original sender id. The echo never returns to its origin.
    fn relay(&self, message: &Message) {
        let Some(table) = self.endpoints.as_ref() else {
            return;
        };
        for addr in table.targets_except(&message.sender_id) {
            self.send_one(message, addr);
        }
    }

    fn send_one(&self, message: &Message, addr: SocketAddr) {
        if let Err(e) = self.transport.send_to(message, addr) {
            log::warn!("send to {} failed: {}", addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_table_is_host_only() {
        let host = NetPeer::host("127.0.0.1:0", PeerConfig::default()).unwrap();
        assert!(host.endpoints.is_some());

        let guest =
            NetPeer::guest("127.0.0.1:0", host.local_addr(), PeerConfig::default()).unwrap();
        assert!(guest.endpoints.is_none());
    }
}
