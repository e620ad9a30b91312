//! Broadcast hub fanning events out to connected WebSocket clients.
//!
//! The hub runs as a single tokio task that owns the live client set.
//! Everything else talks to it through a [`HubHandle`], whose unbounded
//! command channel is safe to use from any thread, including the
//! blocking event-bridge thread outside the runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::Event;

/// Commands accepted by the hub task.
#[derive(Debug)]
enum HubCommand {
    Register {
        id: u64,
        sender: mpsc::UnboundedSender<String>,
    },
    Unregister {
        id: u64,
    },
    Broadcast(Event),
}

/// Cheaply cloneable handle to the hub task.
///
/// All methods are fire-and-forget: once the hub task has exited (only
/// during shutdown) commands are silently dropped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Registers a client outbound channel and returns its id.
    pub fn register(&self, sender: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(HubCommand::Register { id, sender });
        id
    }

    /// Removes a client from the live set.
    pub fn unregister(&self, id: u64) {
        let _ = self.tx.send(HubCommand::Unregister { id });
    }

    /// Queues an event for delivery to every connected client.
    pub fn broadcast(&self, event: Event) {
        let _ = self.tx.send(HubCommand::Broadcast(event));
    }
}

/// Hub state, owned exclusively by the hub task.
struct BroadcastHub {
    clients: HashMap<u64, mpsc::UnboundedSender<String>>,
}

impl BroadcastHub {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    fn register(&mut self, id: u64, sender: mpsc::UnboundedSender<String>) {
        self.clients.insert(id, sender);
        info!(client_id = id, clients = self.clients.len(), "client registered");
    }

    fn unregister(&mut self, id: u64) {
        if self.clients.remove(&id).is_some() {
            info!(client_id = id, clients = self.clients.len(), "client unregistered");
        }
    }

    /// Sends the event to every live client, pruning any whose channel
    /// is closed. Returns the number of clients that received it.
    fn broadcast(&mut self, event: &Event) -> usize {
        if self.clients.is_empty() {
            debug!("broadcast skipped, no clients connected");
            return 0;
        }

        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to serialize event, dropping");
                return 0;
            }
        };

        let mut stale = Vec::new();
        for (&id, sender) in &self.clients {
            if sender.send(frame.clone()).is_err() {
                stale.push(id);
            }
        }

        let delivered = self.clients.len() - stale.len();
        for id in stale {
            self.clients.remove(&id);
            debug!(client_id = id, "pruned dead client during broadcast");
        }

        debug!(delivered, "event broadcast");
        delivered
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                HubCommand::Register { id, sender } => self.register(id, sender),
                HubCommand::Unregister { id } => self.unregister(id),
                HubCommand::Broadcast(event) => {
                    self.broadcast(&event);
                }
            }
        }
        debug!("hub task exiting, all handles dropped");
    }
}

/// Spawns the hub task and returns a handle plus its join handle.
pub fn spawn() -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = HubHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
    };
    let task = tokio::spawn(BroadcastHub::new().run(rx));
    (handle, task)
}
