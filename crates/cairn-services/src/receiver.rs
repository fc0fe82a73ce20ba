//! Receiver engine — reassembly, checkpointing, and verification.
//!
//! The engine is pure state: the inbound dispatcher feeds it decoded
//! frames and acts on the returned outcomes (ack, error report). It never
//! touches the radio itself. Disk writes run inline with integration;
//! radio inter-frame gaps dwarf disk latency at these sizes.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use cairn_core::digest::file_digest;
use cairn_core::wire::CHUNK_SIZE;

/// Everything a file_start frame declares about an inbound transfer.
#[derive(Debug, Clone)]
pub struct TransferStart {
    pub filename: String,
    pub total_chunks: u32,
    pub file_size: u64,
    pub checksum: String,
    pub sender_id: Option<String>,
}

/// In-progress reassembly state for one file.
struct IncomingTransfer {
    total_chunks: u32,
    file_size: u64,
    checksum: String,
    sender_id: Option<String>,
    started_at: Instant,
    /// Sparse buffer addressed by absolute byte offset. Chunks may arrive
    /// out of order; gaps are NUL-filled until the real bytes land.
    data: Vec<u8>,
    received: HashSet<u32>,
    /// Reserved for a NACK-driven reissue path that is not wired up.
    #[allow(dead_code)]
    retransmission_attempts: u8,
}

impl IncomingTransfer {
    fn new(start: &TransferStart) -> Self {
        Self {
            total_chunks: start.total_chunks,
            file_size: start.file_size,
            checksum: start.checksum.clone(),
            sender_id: start.sender_id.clone(),
            started_at: Instant::now(),
            data: Vec::new(),
            received: HashSet::new(),
            retransmission_attempts: 0,
        }
    }

    /// Splice chunk bytes in at their absolute offset, growing the buffer
    /// with NULs when the chunk lands beyond the current end.
    fn splice(&mut self, chunk_number: u32, bytes: &[u8]) {
        let offset = chunk_number as usize * CHUNK_SIZE;
        let end = offset + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.received.insert(chunk_number);
    }

    /// Chunk indices never integrated: {0..total_chunks} \ received.
    fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }
}

/// What happened to a chunk frame.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// New bytes integrated. `checkpointed` reports whether this chunk
    /// tripped the periodic partial-file write.
    Integrated { checkpointed: bool },
    /// Already had this index. The caller still acks — the sender's copy
    /// of our previous ack was evidently lost.
    Duplicate,
    /// No file_start on record for this filename. Ignored; recovery is
    /// operator-initiated.
    UnknownTransfer,
}

/// What happened at completion.
#[derive(Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Digest matched; the verified file is on disk.
    Verified { path: PathBuf, elapsed: Duration },
    /// Digest mismatch. The record is dropped; the caller reports the
    /// failure to the sender. The missing set is for the local log only,
    /// there is no retransmission request on the wire.
    ChecksumMismatch { missing: Vec<u32> },
    UnknownTransfer,
}

/// Tracks files being reassembled from inbound chunks.
pub struct FileReceiver {
    active: Arc<Mutex<HashMap<String, IncomingTransfer>>>,
    output_dir: PathBuf,
    checkpoint_every: u32,
}

impl FileReceiver {
    pub fn new(output_dir: PathBuf, checkpoint_every: u32) -> Self {
        std::fs::create_dir_all(&output_dir).ok();
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            output_dir,
            checkpoint_every: checkpoint_every.max(1),
        }
    }

    /// Start (or restart) tracking a transfer. A second file_start for the
    /// same filename replaces the old state wholesale.
    pub async fn begin(&self, start: TransferStart) {
        let mut active = self.active.lock().await;
        tracing::info!(
            filename = %start.filename,
            total_chunks = start.total_chunks,
            file_size = start.file_size,
            sender = start.sender_id.as_deref().unwrap_or("unknown"),
            "transfer started"
        );
        active.insert(start.filename.clone(), IncomingTransfer::new(&start));
    }

    /// Integrate one chunk. Duplicates are reported, not re-spliced.
    pub async fn accept_chunk(
        &self,
        filename: &str,
        chunk_number: u32,
        bytes: &[u8],
    ) -> Result<ChunkOutcome> {
        let mut active = self.active.lock().await;
        let transfer = match active.get_mut(filename) {
            Some(t) => t,
            None => return Ok(ChunkOutcome::UnknownTransfer),
        };

        if transfer.received.contains(&chunk_number) {
            return Ok(ChunkOutcome::Duplicate);
        }

        transfer.splice(chunk_number, bytes);
        tracing::debug!(
            filename,
            chunk = chunk_number + 1,
            total = transfer.total_chunks,
            "chunk integrated"
        );

        let checkpointed = transfer.received.len() % self.checkpoint_every as usize == 0;
        if checkpointed {
            let path = self.write_partial(filename, &transfer.data)?;
            tracing::info!(path = %path.display(), "checkpoint written");
        }

        Ok(ChunkOutcome::Integrated { checkpointed })
    }

    /// Verify and finalize a transfer. The record is dropped either way:
    /// a mismatch is not recoverable without a new file_start.
    pub async fn finalize(&self, filename: &str) -> Result<CompletionOutcome> {
        let mut active = self.active.lock().await;
        let transfer = match active.remove(filename) {
            Some(t) => t,
            None => return Ok(CompletionOutcome::UnknownTransfer),
        };

        let computed = file_digest(&transfer.data);
        if computed != transfer.checksum {
            let missing = transfer.missing();
            tracing::warn!(
                filename,
                expected = %transfer.checksum,
                computed = %computed,
                missing = ?missing,
                "checksum mismatch, transfer dropped"
            );
            return Ok(CompletionOutcome::ChecksumMismatch { missing });
        }

        let path = self.output_dir.join(format!("received_{filename}"));
        std::fs::write(&path, &transfer.data)
            .with_context(|| format!("failed to write {}", path.display()))?;

        let elapsed = transfer.started_at.elapsed();
        tracing::info!(
            filename,
            bytes = transfer.data.len(),
            chunks = transfer.received.len(),
            elapsed_secs = elapsed.as_secs(),
            path = %path.display(),
            "file verified and saved"
        );
        Ok(CompletionOutcome::Verified { path, elapsed })
    }

    /// Flush every in-progress transfer as a partial file. State stays in
    /// memory so reception can continue if the link comes back.
    pub async fn checkpoint_all(&self) -> Vec<PathBuf> {
        let active = self.active.lock().await;
        let mut written = Vec::new();
        for (filename, transfer) in active.iter() {
            match self.write_partial(filename, &transfer.data) {
                Ok(path) => {
                    tracing::info!(path = %path.display(), "partial file saved");
                    written.push(path);
                }
                Err(e) => {
                    tracing::warn!(filename, error = %e, "failed to save partial file");
                }
            }
        }
        written
    }

    /// Whether any transfer is in progress. Drives the idle watchdog.
    pub async fn has_active(&self) -> bool {
        !self.active.lock().await.is_empty()
    }

    /// Filenames currently being received.
    pub async fn in_progress(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    fn write_partial(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("partial_{filename}"));
        std::fs::write(&path, data)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
