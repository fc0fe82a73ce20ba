//! Cairn wire format — framed text messages on the shared radio bus.
//!
//! Every protocol message is one compact JSON object, small enough for the
//! radio's per-message text budget. Field names are one- or two-letter tags
//! on emission; the decoder also accepts the long spellings as synonyms so
//! frames from verbose peers stay readable. The `fc` tag is overloaded: a
//! frame carrying a `cs` field is a completion, one without is a data
//! chunk. That rule is load-bearing wire compatibility — keep it exact.
//!
//! Not everything on the bus is ours. Peers emit free-form chat text on the
//! same channel, so an undecodable payload is not an error condition.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Fixed chunk payload size in raw bytes, before base64 expansion.
/// The radio's text MTU leaves little headroom beyond this.
pub const CHUNK_SIZE: usize = 100;

/// Chunks per batch. The protocol was designed for multi-chunk batches;
/// the current setting is one chunk per batch, so `bn` always equals `cn`.
pub const BATCH_SIZE: u32 = 1;

// ── Node role ─────────────────────────────────────────────────────────────────

/// Declared role of a node, carried in announce frames.
///
/// Advisory only: either endpoint may announce, discover, send, or receive.
/// The role shapes operator presentation, nothing on the wire depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Sender,
    Receiver,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Sender => "sender",
            NodeRole::Receiver => "receiver",
        }
    }

    fn from_wire(s: &str) -> Result<Self, WireError> {
        match s {
            "sender" => Ok(NodeRole::Sender),
            "receiver" => Ok(NodeRole::Receiver),
            _ => Err(WireError::BadField("role")),
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// One protocol message.
///
/// `to` is advisory targeting on a shared broadcast bus: absent means
/// broadcast, present means every node except the named one must ignore
/// the frame. Receivers self-filter; the transport does not route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opens a transfer. Carries everything the receiver needs to size and
    /// verify the file. Never acknowledged.
    FileStart {
        filename: String,
        total_chunks: u32,
        file_size: u64,
        checksum: String,
        batch_size: u32,
        from: String,
        to: Option<String>,
    },

    /// One 100-byte slice of the file, base64 on the wire.
    FileChunk {
        filename: String,
        chunk_number: u32,
        batch_number: u32,
        data: Vec<u8>,
        from: String,
        to: Option<String>,
    },

    /// Closes a transfer. Shares the `fc` tag with FileChunk; the presence
    /// of `checksum` is the only discriminator.
    FileCompletion {
        filename: String,
        checksum: String,
        total_chunks: u32,
        from: String,
        to: Option<String>,
    },

    /// Acknowledges one batch (= one chunk).
    BatchAck {
        filename: String,
        batch_number: u32,
        from: String,
        to: Option<String>,
    },

    /// Receiver-reported failure, e.g. checksum mismatch at completion.
    TransferError {
        filename: String,
        message: String,
        from: String,
        to: Option<String>,
    },

    /// Presence broadcast: who this node is and what it claims to be.
    Announce {
        id: String,
        role: NodeRole,
        time: u64,
    },

    /// Asks every listening node to announce itself.
    Discover { id: String, time: u64 },
}

impl Frame {
    /// Encode as a compact JSON payload with short field names.
    pub fn encode(&self) -> String {
        let value = match self {
            Frame::FileStart {
                filename,
                total_chunks,
                file_size,
                checksum,
                batch_size,
                from,
                to,
            } => with_target(
                serde_json::json!({
                    "t": "fs",
                    "f": filename,
                    "tc": total_chunks,
                    "fs": file_size,
                    "cs": checksum,
                    "bs": batch_size,
                    "from": from,
                }),
                to,
            ),
            Frame::FileChunk {
                filename,
                chunk_number,
                batch_number,
                data,
                from,
                to,
            } => with_target(
                serde_json::json!({
                    "t": "fc",
                    "f": filename,
                    "cn": chunk_number,
                    "bn": batch_number,
                    "d": BASE64.encode(data),
                    "from": from,
                }),
                to,
            ),
            Frame::FileCompletion {
                filename,
                checksum,
                total_chunks,
                from,
                to,
            } => with_target(
                serde_json::json!({
                    "t": "fc",
                    "f": filename,
                    "cs": checksum,
                    "tc": total_chunks,
                    "from": from,
                }),
                to,
            ),
            Frame::BatchAck {
                filename,
                batch_number,
                from,
                to,
            } => with_target(
                serde_json::json!({
                    "t": "ba",
                    "f": filename,
                    "bn": batch_number,
                    "from": from,
                }),
                to,
            ),
            Frame::TransferError {
                filename,
                message,
                from,
                to,
            } => with_target(
                serde_json::json!({
                    "t": "te",
                    "f": filename,
                    "m": message,
                    "from": from,
                }),
                to,
            ),
            Frame::Announce { id, role, time } => serde_json::json!({
                "t": "announce",
                "id": id,
                "role": role.as_str(),
                "time": time,
            }),
            Frame::Discover { id, time } => serde_json::json!({
                "t": "discover",
                "id": id,
                "time": time,
            }),
        };
        value.to_string()
    }

    /// Decode a text payload.
    ///
    /// Returns `NotProtocol` for anything that is not a JSON object with a
    /// type tag — callers drop those silently, they are chat traffic.
    pub fn decode(text: &str) -> Result<Frame, WireError> {
        let value: Value =
            serde_json::from_str(text).map_err(|_| WireError::NotProtocol)?;
        let map = match value.as_object() {
            Some(m) => m,
            None => return Err(WireError::NotProtocol),
        };
        let tag = match field(map, "t", "type").and_then(Value::as_str) {
            Some(t) => t,
            None => return Err(WireError::NotProtocol),
        };

        match tag {
            "fs" | "file_start" => Ok(Frame::FileStart {
                filename: str_field(map, "f", "filename")?,
                total_chunks: u32_field(map, "tc", "total_chunks")?,
                file_size: u64_field(map, "fs", "file_size")?,
                checksum: str_field(map, "cs", "checksum")?,
                batch_size: u32_field(map, "bs", "batch_size")?,
                from: str_field(map, "from", "from")?,
                to: target_field(map)?,
            }),
            // `fc` carries two meanings; a checksum field marks the completion.
            "fc" if field(map, "cs", "checksum").is_some() => Ok(Frame::FileCompletion {
                filename: str_field(map, "f", "filename")?,
                checksum: str_field(map, "cs", "checksum")?,
                total_chunks: u32_field(map, "tc", "total_chunks")?,
                from: str_field(map, "from", "from")?,
                to: target_field(map)?,
            }),
            "file_completion" => Ok(Frame::FileCompletion {
                filename: str_field(map, "f", "filename")?,
                checksum: str_field(map, "cs", "checksum")?,
                total_chunks: u32_field(map, "tc", "total_chunks")?,
                from: str_field(map, "from", "from")?,
                to: target_field(map)?,
            }),
            "fc" | "file_chunk" => Ok(Frame::FileChunk {
                filename: str_field(map, "f", "filename")?,
                chunk_number: u32_field(map, "cn", "chunk_number")?,
                batch_number: u32_field(map, "bn", "batch_number")?,
                data: data_field(map)?,
                from: str_field(map, "from", "from")?,
                to: target_field(map)?,
            }),
            "ba" | "batch_ack" => Ok(Frame::BatchAck {
                filename: str_field(map, "f", "filename")?,
                batch_number: u32_field(map, "bn", "batch_number")?,
                from: str_field(map, "from", "from")?,
                to: target_field(map)?,
            }),
            "te" | "transfer_error" => Ok(Frame::TransferError {
                filename: str_field(map, "f", "filename")?,
                message: str_field(map, "m", "message")?,
                from: str_field(map, "from", "from")?,
                to: target_field(map)?,
            }),
            "announce" => Ok(Frame::Announce {
                id: str_field(map, "id", "id")?,
                role: NodeRole::from_wire(&str_field(map, "role", "role")?)?,
                time: u64_field(map, "time", "time")?,
            }),
            "discover" => Ok(Frame::Discover {
                id: str_field(map, "id", "id")?,
                time: u64_field(map, "time", "time")?,
            }),
            other => Err(WireError::UnknownTag(other.to_string())),
        }
    }

    /// The advisory target, when present.
    pub fn target(&self) -> Option<&str> {
        match self {
            Frame::FileStart { to, .. }
            | Frame::FileChunk { to, .. }
            | Frame::FileCompletion { to, .. }
            | Frame::BatchAck { to, .. }
            | Frame::TransferError { to, .. } => to.as_deref(),
            Frame::Announce { .. } | Frame::Discover { .. } => None,
        }
    }

    /// The claimed originator of the frame.
    pub fn origin(&self) -> &str {
        match self {
            Frame::FileStart { from, .. }
            | Frame::FileChunk { from, .. }
            | Frame::FileCompletion { from, .. }
            | Frame::BatchAck { from, .. }
            | Frame::TransferError { from, .. } => from,
            Frame::Announce { id, .. } | Frame::Discover { id, .. } => id,
        }
    }

    /// True for frames that belong to a file transfer. These reset the
    /// receiver's idle watchdog; presence frames do not.
    pub fn is_file_related(&self) -> bool {
        !matches!(self, Frame::Announce { .. } | Frame::Discover { .. })
    }
}

fn with_target(mut value: Value, to: &Option<String>) -> Value {
    if let (Value::Object(map), Some(to)) = (&mut value, to) {
        map.insert("to".to_string(), Value::String(to.clone()));
    }
    value
}

// ── Field access ──────────────────────────────────────────────────────────────

fn field<'a>(map: &'a Map<String, Value>, short: &str, long: &str) -> Option<&'a Value> {
    map.get(short).or_else(|| map.get(long))
}

fn str_field(
    map: &Map<String, Value>,
    short: &'static str,
    long: &'static str,
) -> Result<String, WireError> {
    field(map, short, long)
        .ok_or(WireError::MissingField(short))?
        .as_str()
        .map(str::to_string)
        .ok_or(WireError::BadField(short))
}

fn u64_field(
    map: &Map<String, Value>,
    short: &'static str,
    long: &'static str,
) -> Result<u64, WireError> {
    field(map, short, long)
        .ok_or(WireError::MissingField(short))?
        .as_u64()
        .ok_or(WireError::BadField(short))
}

fn u32_field(
    map: &Map<String, Value>,
    short: &'static str,
    long: &'static str,
) -> Result<u32, WireError> {
    u64_field(map, short, long)?
        .try_into()
        .map_err(|_| WireError::BadField(short))
}

fn data_field(map: &Map<String, Value>) -> Result<Vec<u8>, WireError> {
    let encoded = str_field(map, "d", "data")?;
    BASE64.decode(encoded).map_err(|_| WireError::BadField("d"))
}

/// `to` has no long synonym and is optional everywhere it appears.
fn target_field(map: &Map<String, Value>) -> Result<Option<String>, WireError> {
    match map.get("to") {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or(WireError::BadField("to")),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors from interpreting bus payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not JSON, or no type tag. Chat traffic, not a protocol failure.
    #[error("payload is not a protocol frame")]
    NotProtocol,

    #[error("unknown frame tag: {0:?}")]
    UnknownTag(String),

    #[error("frame is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("frame field `{0}` is malformed")]
    BadField(&'static str),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
