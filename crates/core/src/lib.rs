//! Handel Core
//!
//! Types shared by every crate in the workspace: the contributor `BitSet`,
//! the `MultiSignature` aggregate, participant identities and their registry,
//! the packet wire codec, and the traits that connect the aggregation engine
//! to a concrete signature scheme.

pub mod bitset;
pub mod identity;
pub mod multisig;
pub mod packet;
pub mod traits;

pub use bitset::BitSet;
pub use identity::{Identity, Registry};
pub use multisig::MultiSignature;
pub use packet::Packet;
pub use traits::{Constructor, PublicKey, SigOf, Signature};

use thiserror::Error;

/// Errors produced by the core types.
#[derive(Error, Debug)]
pub enum HandelError {
    #[error("bit index {index} out of range for capacity {capacity}")]
    BitOutOfRange { index: usize, capacity: usize },
    #[error("bitset capacity mismatch: {0} vs {1}")]
    CapacityMismatch(usize, usize),
    #[error("overlapping contributions in merge")]
    OverlappingContributions,
    #[error("malformed bitset: {0}")]
    MalformedBitSet(String),
    #[error("malformed multi-signature: {0}")]
    MalformedMultiSignature(String),
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("invalid signature bytes: {0}")]
    InvalidSignatureBytes(String),
    #[error("no public key registered for participant {0}")]
    UnknownSigner(usize),
    #[error("cannot aggregate an empty contributor set")]
    EmptyAggregation,
    #[error("registry ids must be dense in [0, n): {0}")]
    InvalidRegistry(String),
}
