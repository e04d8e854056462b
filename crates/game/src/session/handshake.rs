use std::time::{Duration, Instant};

/// Lifecycle of the local peer's ready/start handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connected,
    ReadyPending,
    AllReady,
    Started,
}

/// Tracks the local side of the handshake. Readiness keeps being re-sent
/// until the session starts, because a single lost PlayerReady would
/// otherwise deadlock both peers in the lobby.
#[derive(Debug)]
pub struct HandshakeState {
    phase: Phase,
    resend_interval: Duration,
    last_ready_sent: Option<Instant>,
}

impl HandshakeState {
    pub fn new(resend_interval: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            resend_interval,
            last_ready_sent: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn on_connected(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::Connected;
        }
    }

    /// Returns true if the ready signal should be sent now (first request).
    pub fn request_ready(&mut self) -> bool {
        match self.phase {
            Phase::Connected => {
                self.phase = Phase::ReadyPending;
                true
            }
            _ => false,
        }
    }

    /// Due for a PlayerReady re-send? Only while the signal is pending.
    pub fn ready_resend_due(&self, now: Instant) -> bool {
        if self.phase != Phase::ReadyPending && self.phase != Phase::AllReady {
            return false;
        }
        match self.last_ready_sent {
            Some(at) => now.duration_since(at) >= self.resend_interval,
            None => true,
        }
    }

    pub fn mark_ready_sent(&mut self, now: Instant) {
        self.last_ready_sent = Some(now);
    }

    pub fn on_all_ready(&mut self) {
        if self.phase == Phase::ReadyPending || self.phase == Phase::Connected {
            self.phase = Phase::AllReady;
        }
    }

    /// First GameStart flips to Started and reports true; duplicates report
    /// false so start-of-session work runs exactly once.
    pub fn on_game_start(&mut self) -> bool {
        if self.phase == Phase::Started {
            return false;
        }
        self.phase = Phase::Started;
        self.last_ready_sent = None;
        true
    }

    /// GameStop returns to the lobby; the connection itself stays up.
    pub fn on_game_stop(&mut self) {
        if self.phase != Phase::Idle {
            self.phase = Phase::Connected;
            self.last_ready_sent = None;
        }
    }
}
