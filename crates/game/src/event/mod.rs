use crate::net::protocol::Grade;

/// Observable outcomes of a peer tick, drained by the embedding game loop.
/// The sync layer itself renders nothing and keeps no score; these events
/// are its entire outward surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PeerConnected {
        id: String,
        display_name: String,
    },
    PeerDisconnected {
        id: String,
    },
    /// A peer (possibly the local one) signalled ready.
    PeerReady {
        id: String,
    },
    /// Fired exactly once per session start on every peer.
    SessionStarted,
    SessionStopped,
    /// The reconciled timeline jumped rather than smoothed.
    TimelineCorrected {
        start_time: f64,
    },
    /// A note was realized locally, host- or guest-side.
    NoteSpawned {
        lane: u8,
        beat: f32,
        target_time: f64,
    },
    RemoteHit {
        peer: String,
        lane: u8,
        grade: Grade,
    },
    RemoteMiss {
        peer: String,
        lane: u8,
    },
    RemoteInput {
        peer: String,
        lane: u8,
        input_time: f64,
    },
    ScoreUpdated {
        peer: String,
        score: u32,
        combo: u32,
    },
}
