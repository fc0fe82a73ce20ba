//! Inbound dispatch — routes decoded frames to the engines.
//!
//! One task owns the inbound channel. Frames addressed elsewhere are
//! dropped here, once, for every frame kind; the engines never see them.
//! A single bad frame never takes the loop down: undecodable payloads are
//! chat traffic, engine errors are logged, and send failures that
//! implicate the radio trigger a reconnect attempt.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use cairn_core::config::TransferTuning;
use cairn_core::wire::{Frame, NodeRole, WireError};
use cairn_services::{
    observe_announce, AckLatch, ChunkOutcome, CompletionOutcome, FileReceiver, PeerRegistry,
    TransferStart,
};

use crate::presence;
use crate::supervisor::ActivityTracker;
use crate::transport::{is_radio_fault, Inbound, Radio};

pub struct Dispatcher {
    node_id: String,
    role: NodeRole,
    radio: Arc<Radio>,
    receiver: Arc<FileReceiver>,
    peers: PeerRegistry,
    latch: Arc<AckLatch>,
    activity: Arc<ActivityTracker>,
    tuning: TransferTuning,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: String,
        role: NodeRole,
        radio: Arc<Radio>,
        receiver: Arc<FileReceiver>,
        peers: PeerRegistry,
        latch: Arc<AckLatch>,
        activity: Arc<ActivityTracker>,
        tuning: TransferTuning,
    ) -> Self {
        Self {
            node_id,
            role,
            radio,
            receiver,
            peers,
            latch,
            activity,
            tuning,
        }
    }

    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("dispatcher shutting down");
                    return Ok(());
                }
                msg = inbound.recv() => match msg {
                    Some(m) => self.handle(m).await,
                    // The transport side dropped its channel: nothing can
                    // arrive again. Fatal.
                    None => anyhow::bail!("transport inbound channel closed"),
                }
            }
        }
    }

    async fn handle(&self, inbound: Inbound) {
        let frame = match Frame::decode(&inbound.payload) {
            Ok(f) => f,
            Err(WireError::NotProtocol) => {
                tracing::info!(from = %inbound.sender_id, text = %inbound.payload, "chat");
                return;
            }
            Err(e) => {
                tracing::debug!(from = %inbound.sender_id, error = %e, "bad frame ignored");
                return;
            }
        };

        if frame.is_file_related() {
            self.activity.mark();
        }

        if let Some(to) = frame.target() {
            if to != self.node_id {
                tracing::debug!(to, "frame addressed elsewhere, ignoring");
                return;
            }
        }

        match frame {
            Frame::Announce { id, role, .. } => {
                if observe_announce(&self.peers, &self.node_id, &id, role) {
                    tracing::info!(node = %id, role = %role, "node announced");
                }
            }

            Frame::Discover { id, .. } => {
                if id != self.node_id {
                    tracing::info!(node = %id, "discover heard, announcing ourselves");
                    self.transmit(&presence::announce_frame(&self.node_id, self.role))
                        .await;
                }
            }

            Frame::FileStart {
                filename,
                total_chunks,
                file_size,
                checksum,
                from,
                ..
            } => {
                self.receiver
                    .begin(TransferStart {
                        filename,
                        total_chunks,
                        file_size,
                        checksum,
                        sender_id: Some(from),
                    })
                    .await;
            }

            Frame::FileChunk {
                filename,
                chunk_number,
                data,
                from,
                ..
            } => self.handle_chunk(filename, chunk_number, data, from).await,

            Frame::FileCompletion { filename, from, .. } => {
                self.handle_completion(filename, from).await
            }

            Frame::BatchAck {
                batch_number, from, ..
            } => {
                tracing::debug!(batch = batch_number, from = %from, "ack heard");
                self.latch.observe(batch_number);
            }

            Frame::TransferError {
                filename,
                message,
                from,
                ..
            } => {
                tracing::warn!(filename = %filename, from = %from, reason = %message,
                    "peer reported a transfer error");
            }
        }
    }

    async fn handle_chunk(&self, filename: String, chunk_number: u32, data: Vec<u8>, from: String) {
        let outcome = match self
            .receiver
            .accept_chunk(&filename, chunk_number, &data)
            .await
        {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(filename = %filename, chunk = chunk_number, error = %e,
                    "chunk integration failed");
                return;
            }
        };

        match outcome {
            ChunkOutcome::UnknownTransfer => {
                // The file_start was missed; recovery is operator-initiated.
                tracing::debug!(filename = %filename, "chunk without a known transfer, ignoring");
            }
            ChunkOutcome::Integrated { .. } | ChunkOutcome::Duplicate => {
                // The radio needs air between receiving and transmitting.
                tokio::time::sleep(self.tuning.ack_delay()).await;
                self.transmit(&Frame::BatchAck {
                    filename,
                    batch_number: chunk_number,
                    from: self.node_id.clone(),
                    to: Some(from),
                })
                .await;
            }
        }
    }

    async fn handle_completion(&self, filename: String, from: String) {
        match self.receiver.finalize(&filename).await {
            Ok(CompletionOutcome::Verified { .. }) => {}
            Ok(CompletionOutcome::ChecksumMismatch { missing }) => {
                tracing::warn!(filename = %filename, missing = ?missing,
                    "verification failed, notifying sender");
                self.transmit(&Frame::TransferError {
                    filename,
                    message: "Checksum verification failed".to_string(),
                    from: self.node_id.clone(),
                    to: Some(from),
                })
                .await;
            }
            Ok(CompletionOutcome::UnknownTransfer) => {
                tracing::debug!(filename = %filename, "completion for unknown transfer, ignoring");
            }
            Err(e) => {
                tracing::warn!(filename = %filename, error = %e, "finalize failed");
            }
        }
    }

    /// Send one frame, classifying failures: radio faults get a reconnect
    /// attempt, everything else is logged and swallowed.
    async fn transmit(&self, frame: &Frame) {
        if let Err(e) = self.radio.send_text(&frame.encode()).await {
            let text = e.to_string();
            if is_radio_fault(&text) {
                tracing::warn!(error = %text, "send hit the radio, reconnecting");
                if let Err(re) = self.radio.reconnect().await {
                    tracing::warn!(error = %re, "reconnect failed");
                }
            } else {
                tracing::warn!(error = %text, "send failed");
            }
        }
    }
}
