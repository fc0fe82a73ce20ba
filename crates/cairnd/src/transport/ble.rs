//! BLE bridge link — newline-delimited text over a local TCP socket.
//!
//! The radio hangs off the host over Bluetooth; a small bridge process
//! owns the BLE session and exposes it as a line protocol. Outbound lines
//! are raw payloads (the bridge knows who we are). Inbound lines are JSON
//! envelopes `{"from": <node id>, "text": <payload>}` so the mesh sender
//! id survives the hop. Anything unparseable is logged and skipped.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use super::{Inbound, LinkFactory, RadioLink, TransportError};

/// Connects to the host Bluetooth bridge.
pub struct BleBridge {
    pub address: String,
}

#[derive(Deserialize)]
struct Envelope {
    from: String,
    text: String,
}

#[async_trait]
impl LinkFactory for BleBridge {
    async fn open(
        &self,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<Arc<dyn RadioLink>, TransportError> {
        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            TransportError::OpenFailed(format!(
                "bluetooth bridge at {}: {e}",
                self.address
            ))
        })?;
        let (read_half, write_half) = stream.into_split();

        tokio::spawn(read_loop(read_half, inbound));

        Ok(Arc::new(BleLink {
            writer: Mutex::new(write_half),
        }))
    }
}

/// Forward bridge lines into the inbound channel until the socket or the
/// consumer goes away.
async fn read_loop(read_half: OwnedReadHalf, inbound: mpsc::Sender<Inbound>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let envelope: Envelope = match serde_json::from_str(&line) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::debug!(error = %e, "unparseable bridge line, skipping");
                        continue;
                    }
                };
                if inbound
                    .send(Inbound {
                        payload: envelope.text,
                        sender_id: envelope.from,
                    })
                    .await
                    .is_err()
                {
                    tracing::info!("inbound consumer gone, bridge read loop exiting");
                    return;
                }
            }
            Ok(None) => {
                tracing::warn!("bluetooth bridge closed the connection");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "bluetooth bridge read failed");
                return;
            }
        }
    }
}

struct BleLink {
    writer: Mutex<OwnedWriteHalf>,
}

#[async_trait]
impl RadioLink for BleLink {
    async fn send_text(&self, payload: &str) -> Result<(), TransportError> {
        let mut line = payload.to_string();
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::SendFailed(format!("bluetooth bridge write: {e}")))
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
