//! cairn-services — the state engines behind a Cairn node: peer registry,
//! receiver-side reassembly, and the outbound transfer plan. The daemon
//! crate wires these to the radio.

pub mod outbound;
pub mod peer;
pub mod receiver;
pub mod send_target;

pub use outbound::{AckLatch, OutgoingFile};
pub use peer::{new_registry, observe_announce, snapshot, PeerEntry, PeerInfo, PeerRegistry};
pub use receiver::{ChunkOutcome, CompletionOutcome, FileReceiver, TransferStart};
pub use send_target::SendTarget;
