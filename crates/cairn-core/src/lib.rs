//! cairn-core — wire format, digest, and configuration.
//! All other Cairn crates depend on this one.

pub mod config;
pub mod digest;
pub mod wire;

pub use wire::{Frame, NodeRole, WireError, BATCH_SIZE, CHUNK_SIZE};
