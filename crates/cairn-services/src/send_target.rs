//! Send targeting — broadcast vs a single named node.

use serde::{Deserialize, Serialize};

/// Where an outgoing transfer is aimed.
///
/// Targeting is advisory on a shared broadcast bus: the frame still
/// reaches everyone, and non-targets self-filter on the `to` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SendTarget {
    /// Every listening node may take the transfer.
    #[default]
    Broadcast,

    /// Only the named node should take it.
    #[serde(rename = "node")]
    Node { id: String },
}

impl SendTarget {
    /// From the optional wire `to` field.
    pub fn from_wire(to: Option<String>) -> Self {
        match to {
            Some(id) => SendTarget::Node { id },
            None => SendTarget::Broadcast,
        }
    }

    /// As the optional wire `to` field.
    pub fn to_wire(&self) -> Option<String> {
        match self {
            SendTarget::Broadcast => None,
            SendTarget::Node { id } => Some(id.clone()),
        }
    }

    /// Should a node with this id act on the frame?
    pub fn is_match(&self, node_id: &str) -> bool {
        match self {
            SendTarget::Broadcast => true,
            SendTarget::Node { id } => id == node_id,
        }
    }
}
