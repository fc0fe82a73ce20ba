//! Peer registry — tracks announced nodes and what they claim to be.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cairn_core::wire::NodeRole;
use dashmap::DashMap;

/// Tracked state for a node heard on the bus.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Role the peer declared in its announce. Advisory.
    pub role: NodeRole,

    /// Last time an announce arrived from this peer.
    pub last_seen: Instant,
}

impl PeerEntry {
    /// Time since the peer was last heard.
    pub fn idle(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// The peer registry — written by the inbound dispatcher, read by the
/// console. Keyed on node id. Discovery never gates transfer: an operator
/// may target any id whether or not it appears here.
pub type PeerRegistry = Arc<DashMap<String, PeerEntry>>;

/// Create a new empty peer registry.
pub fn new_registry() -> PeerRegistry {
    Arc::new(DashMap::new())
}

/// Record an announce. Announces from ourselves are ignored — a broadcast
/// bus echoes our own frames back. Returns whether the entry was recorded.
pub fn observe_announce(
    registry: &PeerRegistry,
    self_id: &str,
    peer_id: &str,
    role: NodeRole,
) -> bool {
    if peer_id == self_id {
        return false;
    }
    registry.insert(
        peer_id.to_string(),
        PeerEntry {
            role,
            last_seen: Instant::now(),
        },
    );
    true
}

/// Point-in-time view of a registry entry, for the console.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: String,
    pub role: NodeRole,
    pub idle: Duration,
}

/// Snapshot the registry, sorted by id.
pub fn snapshot(registry: &PeerRegistry) -> Vec<PeerInfo> {
    let mut peers: Vec<PeerInfo> = registry
        .iter()
        .map(|entry| PeerInfo {
            id: entry.key().clone(),
            role: entry.value().role,
            idle: entry.value().idle(),
        })
        .collect();
    peers.sort_by(|a, b| a.id.cmp(&b.id));
    peers
}
