//! The aggregate exchanged by the protocol: a contributor bitset paired with
//! the signature aggregating exactly those contributions.
//!
//! Wire form: `[bitset_len: u32 BE][bitset bytes][signature bytes]`.

use std::fmt;

use crate::{BitSet, Constructor, HandelError, PublicKey, Signature};

/// A multi-signature: every bit set in `bits` corresponds to a participant
/// whose contribution is incorporated in `sig`.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiSignature<S: Signature> {
    pub bits: BitSet,
    pub sig: S,
}

impl<S: Signature> MultiSignature<S> {
    pub fn new(bits: BitSet, sig: S) -> Self {
        Self { bits, sig }
    }

    /// Number of incorporated contributions.
    pub fn cardinality(&self) -> usize {
        self.bits.cardinality()
    }

    /// Merge two aggregates. Their contributor sets must be disjoint; the
    /// merged cardinality is the sum of both cardinalities.
    pub fn merge(&self, other: &Self) -> Result<Self, HandelError> {
        if !self.bits.is_disjoint(&other.bits) {
            return Err(HandelError::OverlappingContributions);
        }
        let bits = self.bits.union(&other.bits)?;
        let sig = self.sig.combine(&other.sig);
        Ok(Self { bits, sig })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let bitset = self.bits.to_bytes();
        let sig = self.sig.to_bytes();
        let mut out = Vec::with_capacity(4 + bitset.len() + sig.len());
        out.extend_from_slice(&(bitset.len() as u32).to_be_bytes());
        out.extend_from_slice(&bitset);
        out.extend_from_slice(&sig);
        out
    }

    /// Parse the wire form, deserializing the signature via the constructor.
    pub fn from_bytes<C>(bytes: &[u8], constructor: &C) -> Result<Self, HandelError>
    where
        C: Constructor + ?Sized,
        C::Pub: PublicKey<Sig = S>,
    {
        if bytes.len() < 4 {
            return Err(HandelError::MalformedMultiSignature(format!(
                "{} bytes is shorter than the length header",
                bytes.len()
            )));
        }
        let bitset_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let rest = &bytes[4..];
        if rest.len() < bitset_len {
            return Err(HandelError::MalformedMultiSignature(format!(
                "declared bitset length {} exceeds remaining {} bytes",
                bitset_len,
                rest.len()
            )));
        }
        let bits = BitSet::from_bytes(&rest[..bitset_len])?;
        let sig = constructor.signature_from_bytes(&rest[bitset_len..])?;
        Ok(Self { bits, sig })
    }
}

impl<S: Signature> fmt::Display for MultiSignature<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aggregate of {} {}", self.cardinality(), self.bits)
    }
}
