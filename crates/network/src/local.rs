//! In-process packet router.
//!
//! Maps node IDs to listener channels and delivers packets over bounded
//! queues, dropping on congestion so a slow node degrades like a lossy
//! network instead of stalling its peers. Nodes can be silenced to model
//! faulty participants that never transmit.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use handel_core::{Identity, Packet};

use crate::Network;

/// Hub connecting every in-process node.
#[derive(Clone, Default)]
pub struct LocalRouter {
    inner: Arc<Mutex<RouterInner>>,
}

#[derive(Default)]
struct RouterInner {
    listeners: HashMap<u32, mpsc::Sender<Packet>>,
    silenced: HashSet<u32>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the per-node transport handle for `id`.
    pub fn network(&self, id: u32) -> LocalNetwork {
        LocalNetwork {
            id,
            router: self.clone(),
        }
    }

    /// Drop every future outbound packet of `id`.
    pub fn silence(&self, id: u32) {
        self.inner
            .lock()
            .expect("router lock poisoned")
            .silenced
            .insert(id);
    }

    fn register(&self, id: u32, listener: mpsc::Sender<Packet>) {
        self.inner
            .lock()
            .expect("router lock poisoned")
            .listeners
            .insert(id, listener);
    }

    fn deliver(&self, from: u32, targets: &[Identity], packet: Packet) {
        let inner = self.inner.lock().expect("router lock poisoned");
        if inner.silenced.contains(&from) {
            trace!(from, "outbound packet from silenced node dropped");
            return;
        }
        for target in targets {
            match inner.listeners.get(&target.id()) {
                Some(tx) => {
                    if tx.try_send(packet.clone()).is_err() {
                        debug!(from, to = target.id(), "listener queue full, packet dropped");
                    }
                }
                None => {
                    debug!(from, to = target.id(), "no listener registered, packet dropped");
                }
            }
        }
    }
}

/// A single node's view of the router.
pub struct LocalNetwork {
    id: u32,
    router: LocalRouter,
}

impl Network for LocalNetwork {
    fn send(&self, targets: &[Identity], packet: Packet) {
        self.router.deliver(self.id, targets, packet);
    }

    fn register_listener(&self, listener: mpsc::Sender<Packet>) {
        self.router.register(self.id, listener);
    }
}
