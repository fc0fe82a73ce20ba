//! Presence — announce and discover on the shared bus.

use std::time::{SystemTime, UNIX_EPOCH};

use cairn_core::wire::{Frame, NodeRole};

use crate::transport::{Radio, TransportError};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn announce_frame(node_id: &str, role: NodeRole) -> Frame {
    Frame::Announce {
        id: node_id.to_string(),
        role,
        time: unix_now(),
    }
}

pub fn discover_frame(node_id: &str) -> Frame {
    Frame::Discover {
        id: node_id.to_string(),
        time: unix_now(),
    }
}

/// Tell the mesh who we are.
pub async fn announce(
    radio: &Radio,
    node_id: &str,
    role: NodeRole,
) -> Result<(), TransportError> {
    radio.send_text(&announce_frame(node_id, role).encode()).await?;
    tracing::info!(node_id, %role, "presence announced");
    Ok(())
}

/// Ask every listening node to announce itself. Replies land in the peer
/// registry as they arrive.
pub async fn discover(radio: &Radio, node_id: &str) -> Result<(), TransportError> {
    radio.send_text(&discover_frame(node_id).encode()).await?;
    tracing::info!(node_id, "discovery request sent");
    Ok(())
}
