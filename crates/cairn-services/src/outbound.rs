//! Outbound transfer plan and the ack latch.
//!
//! `OutgoingFile` is the immutable slicing plan for one send: the whole
//! file in memory, its digest, and the chunk arithmetic. `AckLatch` is the
//! wake primitive the sender loop parks on between emitting a chunk and
//! hearing its acknowledgment.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::Notify;

use cairn_core::digest::file_digest;
use cairn_core::wire::CHUNK_SIZE;

/// A file loaded and sliced for sending.
///
/// The design assumes files fit in memory; the radio moves 100 bytes per
/// round trip, so anything that does not fit would take weeks anyway.
pub struct OutgoingFile {
    pub filename: String,
    pub data: Bytes,
    pub checksum: String,
    pub total_chunks: u32,
}

impl OutgoingFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read file: {}", path.display()))?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let total_chunks = data.len().div_ceil(CHUNK_SIZE) as u32;
        let checksum = file_digest(&data);

        Ok(Self {
            filename,
            data: Bytes::from(data),
            checksum,
            total_chunks,
        })
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The i-th chunk slice. The last chunk may be short.
    pub fn chunk(&self, index: u32) -> &[u8] {
        let start = index as usize * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(self.data.len());
        &self.data[start..end]
    }
}

/// One-shot wake primitive plus monotonic ack counter.
///
/// The inbound dispatcher calls `observe` for every batch_ack heard on the
/// bus; the sender loop parks in `wait_for`. Wakes are level-triggered on
/// "there is a new ack to inspect": waiters re-check after every wake, so
/// duplicate and stale acks from earlier chunks are harmless.
pub struct AckLatch {
    last_acked: AtomicI64,
    notify: Notify,
}

impl AckLatch {
    pub fn new() -> Self {
        Self {
            last_acked: AtomicI64::new(-1),
            notify: Notify::new(),
        }
    }

    /// Rewind to the no-acks-yet state. Called at the start of each
    /// transfer; batch numbers restart at zero per file.
    pub fn reset(&self) {
        self.last_acked.store(-1, Ordering::Release);
    }

    /// Record an ack and wake any waiter. Monotonic: an old batch number
    /// never lowers the counter.
    pub fn observe(&self, batch: u32) {
        self.last_acked.fetch_max(batch as i64, Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    pub fn last_acked(&self) -> i64 {
        self.last_acked.load(Ordering::Acquire)
    }

    /// Park until `last_acked >= batch` or the timeout passes.
    pub async fn wait_for(&self, batch: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking, or an observe between the check and
            // the await is lost.
            notified.as_mut().enable();

            if self.last_acked() >= batch as i64 {
                return true;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return false;
            }
        }
    }
}

impl Default for AckLatch {
    fn default() -> Self {
        Self::new()
    }
}
