//! In-memory radio bus — a broadcast transport for tests and bench runs.
//!
//! Every endpoint hears every other endpoint, like radios sharing a
//! channel. The bus records all traffic and can be told to drop payloads,
//! which is how the fault scenarios simulate a lossy link. No echo: a
//! node does not hear its own frames.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{Inbound, LinkFactory, RadioLink, TransportError};

/// One payload observed on the bus, for test assertions.
#[derive(Debug, Clone)]
pub struct BusRecord {
    pub sender_id: String,
    pub payload: String,
}

struct DropRule {
    needle: String,
    remaining: u32,
}

#[derive(Default)]
struct BusInner {
    /// node id → inbound channel of that node's open link.
    endpoints: Mutex<HashMap<String, mpsc::Sender<Inbound>>>,
    drop_rules: Mutex<Vec<DropRule>>,
    trace: Mutex<Vec<BusRecord>>,
}

/// The shared channel all in-memory radios transmit on.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link factory for a node with the given id.
    pub fn endpoint(&self, node_id: &str) -> MemoryEndpoint {
        MemoryEndpoint {
            node_id: node_id.to_string(),
            bus: self.inner.clone(),
            fail_opens: Arc::new(Mutex::new(0)),
        }
    }

    /// Drop the next `count` payloads containing `needle`. Dropped frames
    /// still appear in the trace; they left the sender, the air ate them.
    pub fn drop_matching(&self, needle: &str, count: u32) {
        self.inner.drop_rules.lock().unwrap().push(DropRule {
            needle: needle.to_string(),
            remaining: count,
        });
    }

    /// Everything transmitted so far, in order.
    pub fn trace(&self) -> Vec<BusRecord> {
        self.inner.trace.lock().unwrap().clone()
    }
}

impl BusInner {
    fn deliver(&self, from: &str, payload: &str) {
        self.trace.lock().unwrap().push(BusRecord {
            sender_id: from.to_string(),
            payload: payload.to_string(),
        });

        {
            let mut rules = self.drop_rules.lock().unwrap();
            for rule in rules.iter_mut() {
                if rule.remaining > 0 && payload.contains(&rule.needle) {
                    rule.remaining -= 1;
                    return;
                }
            }
            rules.retain(|r| r.remaining > 0);
        }

        let endpoints = self.endpoints.lock().unwrap();
        for (node_id, tx) in endpoints.iter() {
            if node_id == from {
                continue;
            }
            // A full or closed inbox is a dropped frame, which the
            // protocol must survive anyway.
            let _ = tx.try_send(Inbound {
                payload: payload.to_string(),
                sender_id: from.to_string(),
            });
        }
    }
}

/// Factory side of one node's attachment to the bus.
#[derive(Clone)]
pub struct MemoryEndpoint {
    node_id: String,
    bus: Arc<BusInner>,
    /// Opens to fail before the next success, for reconnect scenarios.
    fail_opens: Arc<Mutex<u32>>,
}

impl MemoryEndpoint {
    pub fn fail_next_opens(&self, count: u32) {
        *self.fail_opens.lock().unwrap() = count;
    }
}

#[async_trait]
impl LinkFactory for MemoryEndpoint {
    async fn open(
        &self,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<Arc<dyn RadioLink>, TransportError> {
        {
            let mut fail = self.fail_opens.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(TransportError::OpenFailed(
                    "simulated BLE open failure".into(),
                ));
            }
        }
        self.bus
            .endpoints
            .lock()
            .unwrap()
            .insert(self.node_id.clone(), inbound);
        Ok(Arc::new(MemoryLink {
            node_id: self.node_id.clone(),
            bus: self.bus.clone(),
        }))
    }
}

struct MemoryLink {
    node_id: String,
    bus: Arc<BusInner>,
}

#[async_trait]
impl RadioLink for MemoryLink {
    async fn send_text(&self, payload: &str) -> Result<(), TransportError> {
        self.bus.deliver(&self.node_id, payload);
        Ok(())
    }

    async fn close(&self) {
        self.bus.endpoints.lock().unwrap().remove(&self.node_id);
    }
}
