use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::net::protocol::Body;

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    addr: SocketAddr,
    last_seen: Instant,
}

/// Host-side map from peer id to last-seen datagram source address.
///
/// The address is refreshed on every message so relaying keeps working if a
/// guest's NAT rebinds mid-session. Registration is capped; extra peers get
/// their Connect ignored rather than a slot. Peers that go silent are
/// evicted via `evict_stale`, so a crashed guest cannot hold its slot
/// forever and block a reconnect under a fresh id.
#[derive(Debug)]
pub struct EndpointTable {
    endpoints: HashMap<String, Endpoint>,
    max_peers: usize,
}

impl EndpointTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            endpoints: HashMap::new(),
            max_peers,
        }
    }

    /// Records or refreshes a peer's address. Returns false when the table
    /// is full and the peer is unknown.
    pub fn upsert(&mut self, id: &str, addr: SocketAddr) -> bool {
        if let Some(entry) = self.endpoints.get_mut(id) {
            entry.addr = addr;
            entry.last_seen = Instant::now();
            return true;
        }
        if self.endpoints.len() >= self.max_peers {
            return false;
        }
        self.endpoints.insert(
            id.to_owned(),
            Endpoint {
                addr,
                last_seen: Instant::now(),
            },
        );
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<SocketAddr> {
        self.endpoints.remove(id).map(|e| e.addr)
    }

    pub fn get(&self, id: &str) -> Option<SocketAddr> {
        self.endpoints.get(id).map(|e| e.addr)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.endpoints.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn targets(&self) -> Vec<SocketAddr> {
        self.endpoints.values().map(|e| e.addr).collect()
    }

    /// Relay selection: everyone but the originating peer. The relayed echo
    /// never returns to its origin.
    pub fn targets_except(&self, origin: &str) -> Vec<SocketAddr> {
        self.endpoints
            .iter()
            .filter(|(id, _)| id.as_str() != origin)
            .map(|(_, e)| e.addr)
            .collect()
    }

    /// Drops every peer not heard from within `timeout`, returning the
    /// evicted ids so the caller can clean up its roster.
    pub fn evict_stale(&mut self, timeout: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .endpoints
            .iter()
            .filter(|(_, e)| e.last_seen.elapsed() > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.endpoints.remove(id);
        }

        stale
    }
}

/// Tick-driven redundant broadcast: the same body re-sent a fixed number of
/// rounds on a short interval. Used for GameStart, where a lost datagram
/// would strand the guest. Dropping the value cancels remaining rounds.
#[derive(Debug)]
pub struct RepeatingBroadcast {
    body: Body,
    rounds_left: u32,
    interval: Duration,
    next_at: Instant,
}

impl RepeatingBroadcast {
    pub fn new(body: Body, rounds: u32, interval: Duration) -> Self {
        Self {
            body,
            rounds_left: rounds,
            interval,
            // First round fires on the next tick.
            next_at: Instant::now(),
        }
    }

    /// Consumes one round if it is due, returning the body to send.
    pub fn poll(&mut self, now: Instant) -> Option<Body> {
        if self.rounds_left == 0 || now < self.next_at {
            return None;
        }
        self.rounds_left -= 1;
        self.next_at = now + self.interval;
        Some(self.body.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.rounds_left == 0
    }
}
