//! Transport adapter — the seam between the protocol and the radio driver.
//!
//! The driver itself is out of scope: all the protocol sees is "send a
//! short text payload" and "text payloads arrive with an opaque sender
//! id". `Radio` manages the one process-wide link behind that seam:
//! open, close, and reconnect are serialized by a mutex, while sends on a
//! live link run concurrently. The transport may drop and duplicate
//! frames; everything above tolerates both.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use cairn_core::config::{CairnConfig, RadioConfig, TransferTuning};

pub mod ble;
pub mod memory;

/// A text payload delivered by the radio, with whoever the radio says
/// sent it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub payload: String,
    pub sender_id: String,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("radio link is not open")]
    NotConnected,

    #[error("radio send failed: {0}")]
    SendFailed(String),

    #[error("radio open failed: {0}")]
    OpenFailed(String),

    /// Reconnect was requested within the cooldown window. The link state
    /// is unchanged; retry later.
    #[error("reconnect suppressed, cooldown active")]
    CooldownActive,

    /// Every open attempt failed. The link is closed; per-transfer state
    /// upstream is preserved, not discarded.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Does this error text implicate the radio subsystem? Such failures get a
/// reconnect; anything else is logged and swallowed by the caller.
pub fn is_radio_fault(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("ble") || m.contains("bluetooth") || m.contains("radio")
}

// ── Link traits ───────────────────────────────────────────────────────────────

/// An open link to the radio.
#[async_trait]
pub trait RadioLink: Send + Sync {
    async fn send_text(&self, payload: &str) -> Result<(), TransportError>;

    /// Best-effort teardown. Close failures are never interesting.
    async fn close(&self);
}

impl std::fmt::Debug for dyn RadioLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn RadioLink")
    }
}

/// Opens links. Received payloads flow into the `inbound` channel handed
/// to `open`; the subscription survives for the life of the link.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn open(
        &self,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<Arc<dyn RadioLink>, TransportError>;
}

// ── Radio manager ─────────────────────────────────────────────────────────────

struct LinkState {
    link: Option<Arc<dyn RadioLink>>,
    last_reconnect: Option<Instant>,
}

/// The process-singleton radio handle.
pub struct Radio {
    factory: Arc<dyn LinkFactory>,
    inbound_tx: mpsc::Sender<Inbound>,
    state: Mutex<LinkState>,
    cooldown: Duration,
    settle: Duration,
    attempts: u32,
    /// Host command run once per reconnect to kick the Bluetooth stack.
    reset_command: Option<String>,
}

impl Radio {
    pub fn new(
        factory: Arc<dyn LinkFactory>,
        inbound_tx: mpsc::Sender<Inbound>,
        radio_config: &RadioConfig,
        tuning: &TransferTuning,
    ) -> Self {
        let reset_command = if radio_config.reset_command.is_empty() {
            None
        } else {
            Some(radio_config.reset_command.clone())
        };
        Self {
            factory,
            inbound_tx,
            state: Mutex::new(LinkState {
                link: None,
                last_reconnect: None,
            }),
            cooldown: tuning.reconnect_cooldown(),
            settle: tuning.reconnect_settle(),
            attempts: tuning.reconnect_attempts.max(1),
            reset_command,
        }
    }

    /// Convenience for the common construction from a full config.
    pub fn from_config(
        factory: Arc<dyn LinkFactory>,
        inbound_tx: mpsc::Sender<Inbound>,
        config: &CairnConfig,
    ) -> Self {
        Self::new(factory, inbound_tx, &config.radio, &config.transfer)
    }

    /// Initial open. Replaces any existing link.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if let Some(link) = state.link.take() {
            link.close().await;
        }
        let link = self.factory.open(self.inbound_tx.clone()).await?;
        state.link = Some(link);
        tracing::info!("radio link open");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.link.is_some()
    }

    /// Send one text payload on the current link.
    ///
    /// The link handle is cloned out of the lock so concurrent sends never
    /// serialize on the state mutex; only open/close/reconnect do.
    pub async fn send_text(&self, payload: &str) -> Result<(), TransportError> {
        let link = {
            let state = self.state.lock().await;
            state.link.clone()
        };
        match link {
            Some(link) => link.send_text(payload).await,
            None => Err(TransportError::NotConnected),
        }
    }

    /// Tear the link down and bring it back up.
    ///
    /// Fails fast inside the cooldown window so an error storm cannot
    /// thrash the radio. Otherwise: close (errors ignored), settle pause
    /// for the radio stack, optional host reset hook, then bounded open
    /// attempts. On success the link is immediately usable; on exhaustion
    /// the radio stays closed.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_reconnect {
            if last.elapsed() < self.cooldown {
                return Err(TransportError::CooldownActive);
            }
        }
        state.last_reconnect = Some(Instant::now());

        if let Some(link) = state.link.take() {
            link.close().await;
        }

        tokio::time::sleep(self.settle).await;
        self.run_reset_hook().await;

        for attempt in 1..=self.attempts {
            tracing::info!(attempt, max = self.attempts, "reconnecting radio link");
            match self.factory.open(self.inbound_tx.clone()).await {
                Ok(link) => {
                    state.link = Some(link);
                    tracing::info!("radio link reestablished");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    if attempt < self.attempts {
                        tokio::time::sleep(self.settle).await;
                    }
                }
            }
        }

        tracing::error!(attempts = self.attempts, "radio reconnect exhausted");
        Err(TransportError::ReconnectExhausted {
            attempts: self.attempts,
        })
    }

    async fn run_reset_hook(&self) {
        let Some(cmd) = &self.reset_command else {
            return;
        };
        tracing::info!(command = %cmd, "running radio reset hook");
        let run = tokio::process::Command::new("sh").arg("-c").arg(cmd).output();
        match tokio::time::timeout(Duration::from_secs(5), run).await {
            Ok(Ok(out)) if out.status.success() => {}
            Ok(Ok(out)) => {
                tracing::warn!(status = %out.status, "radio reset hook exited nonzero");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "radio reset hook failed to run"),
            Err(_) => tracing::warn!("radio reset hook timed out"),
        }
    }
}
