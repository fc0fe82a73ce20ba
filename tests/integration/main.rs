//! Cairn integration test harness.
//!
//! Scenarios run whole node stacks (dispatcher, sender engine, watchdog)
//! against each other over the in-memory radio bus, with the pacing
//! delays collapsed and tokio's paused clock driving every timer. The
//! bus records all traffic, so tests assert on the exact frame sequence
//! a radio would have carried.

mod reliability;
mod transfer;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use cairn_core::config::{RadioConfig, TransferTuning};
use cairn_core::wire::{Frame, NodeRole};
use cairn_services::{new_registry, AckLatch, FileReceiver, PeerRegistry};
use cairnd::dispatch::Dispatcher;
use cairnd::sender::Sender;
use cairnd::supervisor::{self, ActivityTracker};
use cairnd::transport::memory::{MemoryBus, MemoryEndpoint};
use cairnd::transport::{Inbound, LinkFactory, Radio, RadioLink};

// ── Node stack ────────────────────────────────────────────────────────────────

/// One full node attached to the bus: radio, dispatcher, sender engine,
/// receiver engine, watchdog.
pub struct Node {
    pub node_id: String,
    pub radio: Arc<Radio>,
    pub receiver: Arc<FileReceiver>,
    pub sender: Arc<Sender>,
    pub latch: Arc<AckLatch>,
    pub peers: PeerRegistry,
    pub endpoint: MemoryEndpoint,
    pub output_dir: PathBuf,
    pub shutdown: broadcast::Sender<()>,
}

pub async fn spawn_node(bus: &MemoryBus, node_id: &str, role: NodeRole, tag: &str) -> Node {
    let output_dir = std::env::temp_dir().join(format!(
        "cairn-it-{tag}-{node_id}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&output_dir);

    let tuning = TransferTuning::immediate();
    let endpoint = bus.endpoint(node_id);
    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let radio = Arc::new(Radio::new(
        Arc::new(endpoint.clone()),
        inbound_tx,
        &RadioConfig::default(),
        &tuning,
    ));
    radio.connect().await.unwrap();

    let receiver = Arc::new(FileReceiver::new(
        output_dir.clone(),
        tuning.checkpoint_every,
    ));
    let latch = Arc::new(AckLatch::new());
    let peers = new_registry();
    let activity = Arc::new(ActivityTracker::new());
    let (shutdown, _) = broadcast::channel(1);

    let dispatcher = Dispatcher::new(
        node_id.to_string(),
        role,
        radio.clone(),
        receiver.clone(),
        peers.clone(),
        latch.clone(),
        activity.clone(),
        tuning.clone(),
    );
    tokio::spawn(dispatcher.run(inbound_rx, shutdown.subscribe()));

    tokio::spawn(supervisor::watchdog_loop(
        receiver.clone(),
        radio.clone(),
        activity,
        tuning.idle_timeout(),
        shutdown.subscribe(),
    ));

    let sender = Arc::new(Sender::new(
        node_id.to_string(),
        radio.clone(),
        latch.clone(),
        tuning,
    ));

    Node {
        node_id: node_id.to_string(),
        radio,
        receiver,
        sender,
        latch,
        peers,
        endpoint,
        output_dir,
        shutdown,
    }
}

impl Node {
    pub fn cleanup(&self) {
        let _ = self.shutdown.send(());
        let _ = std::fs::remove_dir_all(&self.output_dir);
    }
}

/// A bare bus attachment for scripted peers: no engines, just a link and
/// an inbound channel. Used to inject hand-crafted frame sequences.
pub async fn scripted_peer(
    bus: &MemoryBus,
    node_id: &str,
) -> (Arc<dyn RadioLink>, mpsc::Receiver<Inbound>) {
    let (tx, rx) = mpsc::channel(256);
    let link = bus.endpoint(node_id).open(tx).await.unwrap();
    (link, rx)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub fn source_file(tag: &str, name: &str, data: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cairn-it-src-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// All protocol frames a node put on the air, in emission order.
pub fn frames_from(bus: &MemoryBus, node_id: &str) -> Vec<Frame> {
    bus.trace()
        .into_iter()
        .filter(|r| r.sender_id == node_id)
        .filter_map(|r| Frame::decode(&r.payload).ok())
        .collect()
}

/// Poll until a path exists. Paused-clock friendly: the sleeps auto-advance.
pub async fn wait_for_path(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", path.display());
}

/// Poll until the node has no in-progress transfer.
pub async fn wait_until_idle(receiver: &FileReceiver) {
    for _ in 0..200 {
        if !receiver.has_active().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("receiver still has active transfers");
}
