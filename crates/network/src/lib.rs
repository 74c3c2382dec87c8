//! Handel Network
//!
//! The transport seam consumed by the aggregation engine. Delivery is
//! best-effort, unordered, and at-most-once; the engine's periodic updates
//! substitute for retries. Ships with an in-process router so a full cluster
//! can run inside one process for tests and simulations.

pub mod local;

pub use local::{LocalNetwork, LocalRouter};

use handel_core::{Identity, Packet};
use tokio::sync::mpsc;

/// A transport able to ship packets to participants and hand received
/// packets to a registered listener channel.
///
/// `send` must not block the caller: implementations enqueue and deliver in
/// the background, dropping on congestion.
pub trait Network: Send + Sync + 'static {
    /// Ship `packet` to each target, best-effort.
    fn send(&self, targets: &[Identity], packet: Packet);

    /// Install the channel receiving packets addressed to this node.
    fn register_listener(&self, listener: mpsc::Sender<Packet>);
}
