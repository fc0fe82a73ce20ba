//! Sender engine — the stop-and-wait transfer loop.
//!
//! One chunk in flight, ever. Each chunk is emitted, paced, and then the
//! loop parks on the ack latch; a timeout or a dead link costs one of the
//! chunk's attempts and forces a reconnect before the retry. The pacing
//! sleeps are protocol, not politeness: the radio drops back-to-back
//! emissions.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use cairn_core::config::TransferTuning;
use cairn_core::wire::{Frame, BATCH_SIZE};
use cairn_services::{AckLatch, OutgoingFile, SendTarget};

use crate::transport::Radio;

pub struct Sender {
    node_id: String,
    radio: Arc<Radio>,
    latch: Arc<AckLatch>,
    tuning: TransferTuning,
}

impl Sender {
    pub fn new(
        node_id: String,
        radio: Arc<Radio>,
        latch: Arc<AckLatch>,
        tuning: TransferTuning,
    ) -> Self {
        Self {
            node_id,
            radio,
            latch,
            tuning,
        }
    }

    /// Transfer one file. Returns when the final chunk is acknowledged and
    /// the completion frame is out, or fails once a chunk exhausts its
    /// attempts. A failed transfer never takes the process down.
    pub async fn send_file(&self, path: &Path, target: SendTarget) -> Result<()> {
        let file = OutgoingFile::load(path)?;
        let to = target.to_wire();

        tracing::info!(
            filename = %file.filename,
            bytes = file.len(),
            chunks = file.total_chunks,
            checksum = %file.checksum,
            to = to.as_deref().unwrap_or("broadcast"),
            "transfer starting"
        );

        // Batch numbers restart at zero for every file.
        self.latch.reset();

        self.emit(&Frame::FileStart {
            filename: file.filename.clone(),
            total_chunks: file.total_chunks,
            file_size: file.len(),
            checksum: file.checksum.clone(),
            batch_size: BATCH_SIZE,
            from: self.node_id.clone(),
            to: to.clone(),
        })
        .await
        .context("file_start emission")?;

        // Give the receiver time to set up before the first chunk.
        tokio::time::sleep(self.tuning.start_delay()).await;

        for index in 0..file.total_chunks {
            self.deliver_chunk(&file, index, &to).await?;
            tracing::info!(
                chunk = index + 1,
                total = file.total_chunks,
                "chunk acknowledged"
            );
            tokio::time::sleep(self.tuning.batch_delay()).await;
        }

        self.emit(&Frame::FileCompletion {
            filename: file.filename.clone(),
            checksum: file.checksum.clone(),
            total_chunks: file.total_chunks,
            from: self.node_id.clone(),
            to,
        })
        .await
        .context("file_completion emission")?;

        tracing::info!(filename = %file.filename, "transfer complete");
        Ok(())
    }

    /// One chunk through the send/ack cycle, with its attempt budget.
    async fn deliver_chunk(
        &self,
        file: &OutgoingFile,
        index: u32,
        to: &Option<String>,
    ) -> Result<()> {
        let payload = Frame::FileChunk {
            filename: file.filename.clone(),
            chunk_number: index,
            batch_number: index,
            data: file.chunk(index).to_vec(),
            from: self.node_id.clone(),
            to: to.clone(),
        }
        .encode();

        let attempts = self.tuning.max_chunk_attempts.max(1);
        for attempt in 1..=attempts {
            match self.chunk_cycle(&payload, index, file.total_chunks).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        chunk = index + 1,
                        attempt,
                        max = attempts,
                        error = %e,
                        "chunk cycle failed"
                    );
                    if attempt == attempts {
                        break;
                    }
                    // The link is suspect after any failed cycle. A gated
                    // or failed reconnect still leaves the retry to run.
                    if let Err(re) = self.radio.reconnect().await {
                        tracing::warn!(error = %re, "reconnect before retry failed");
                    }
                }
            }
        }
        anyhow::bail!(
            "chunk {}/{} unacknowledged after {} attempts",
            index + 1,
            file.total_chunks,
            attempts
        )
    }

    async fn chunk_cycle(&self, payload: &str, index: u32, total: u32) -> Result<()> {
        tracing::debug!(chunk = index + 1, total, "sending chunk");
        self.radio.send_text(payload).await.context("chunk emission")?;
        tokio::time::sleep(self.tuning.chunk_delay()).await;

        if self.latch.wait_for(index, self.tuning.ack_timeout()).await {
            Ok(())
        } else {
            anyhow::bail!(
                "no acknowledgment for batch {index} within {:?}",
                self.tuning.ack_timeout()
            )
        }
    }

    /// Emit a control frame (start/completion) with the same attempt
    /// budget and reconnect-between-tries as a chunk.
    async fn emit(&self, frame: &Frame) -> Result<()> {
        let payload = frame.encode();
        let attempts = self.tuning.max_chunk_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.radio.send_text(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    tracing::warn!(attempt, error = %e, "frame emission failed, retrying");
                    if let Err(re) = self.radio.reconnect().await {
                        tracing::warn!(error = %re, "reconnect before retry failed");
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
