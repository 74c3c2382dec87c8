//! The seam between the aggregation engine and a concrete signature scheme.
//!
//! The engine never touches curve arithmetic. It needs three things from a
//! scheme: deserializing a signature off the wire, combining two aggregates,
//! and deriving the verification key for an arbitrary contributor set.

use std::fmt;

use crate::{BitSet, HandelError};

/// An aggregatable signature over the protocol's common message.
pub trait Signature: Clone + fmt::Debug + Send + Sync + 'static {
    /// Scheme-specific serialized form, appended to the bitset on the wire.
    fn to_bytes(&self) -> Vec<u8>;

    /// Aggregate with another signature over the same message.
    fn combine(&self, other: &Self) -> Self;
}

/// A verification key, aggregatable alongside its signatures.
pub trait PublicKey: Clone + fmt::Debug + Send + Sync + 'static {
    type Sig: Signature;

    fn verify(&self, msg: &[u8], sig: &Self::Sig) -> bool;

    fn combine(&self, other: &Self) -> Self;
}

/// Scheme entry point consumed by the aggregation engine.
///
/// A constructor owns the public keys of every participant, indexed by the
/// registry's dense IDs, so it can derive the aggregate verification key for
/// any contributor bitset.
pub trait Constructor: Send + Sync + 'static {
    type Pub: PublicKey;

    /// Deserialize a signature received off the wire.
    fn signature_from_bytes(&self, bytes: &[u8]) -> Result<SigOf<Self>, HandelError>;

    /// Derive the verification key aggregating the keys of every set bit.
    fn aggregate_public_key(&self, bits: &BitSet) -> Result<Self::Pub, HandelError>;
}

/// Shorthand for the signature type of a constructor.
pub type SigOf<C> = <<C as Constructor>::Pub as PublicKey>::Sig;
