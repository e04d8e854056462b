pub mod handshake;
pub mod relay;

pub use handshake::{HandshakeState, Phase};
pub use relay::{EndpointTable, RepeatingBroadcast};

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

/// Everything a peer knows about one participant, itself included.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: String,
    pub display_name: String,
    pub score: u32,
    pub combo: u32,
    pub ready: bool,
}

impl PeerRecord {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_owned(),
            display_name: display_name.to_owned(),
            score: 0,
            combo: 0,
            ready: false,
        }
    }
}

/// All known participants keyed by peer id. Both roles keep one, and both
/// include themselves, so start eligibility reads the same on either side.
#[derive(Debug, Default)]
pub struct Roster {
    peers: HashMap<String, PeerRecord>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: PeerRecord) {
        self.peers.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<PeerRecord> {
        self.peers.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Readiness is set-only within a session; duplicates are harmless.
    /// Returns false for unknown peers.
    pub fn mark_ready(&mut self, id: &str) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.ready = true;
                true
            }
            None => false,
        }
    }

    pub fn set_score(&mut self, id: &str, score: u32, combo: u32) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.score = score;
            peer.combo = combo;
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// A session may start once at least two peers are present and every
    /// one of them has signalled ready.
    pub fn start_eligible(&self) -> bool {
        self.peers.len() >= 2 && self.peers.values().all(|p| p.ready)
    }

    pub fn reset_for_new_session(&mut self) {
        for peer in self.peers.values_mut() {
            peer.ready = false;
            peer.score = 0;
            peer.combo = 0;
        }
    }
}

/// Process-unique peer id, minted once at startup.
pub fn generate_peer_id() -> String {
    format!("{:016x}", rand_u64())
}

pub(crate) fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
    );
    hasher.finish()
}
