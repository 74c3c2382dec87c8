//! Best-aggregate-per-level store.
//!
//! Level 0 holds this node's own contribution, set at construction and never
//! replaced. Levels `1..=L` hold the best (highest-cardinality) aggregate
//! seen so far; a stored aggregate is only ever replaced by a strictly
//! larger one. `combined(k)` merges every present aggregate in `0..=k` —
//! levels with nothing stored yet (including structurally empty ones) are
//! skipped, so a faulty branch of the tree cannot block dissemination of
//! what this node does know.

use handel_core::{MultiSignature, Signature};

use crate::AggregatorError;

pub struct ReplaceStore<S: Signature> {
    own: MultiSignature<S>,
    best: Vec<Option<MultiSignature<S>>>,
}

impl<S: Signature> ReplaceStore<S> {
    /// `own` is the single-contributor aggregate for this node (level 0).
    pub fn new(max_level: u8, own: MultiSignature<S>) -> Self {
        Self {
            own,
            best: (0..max_level).map(|_| None).collect(),
        }
    }

    pub fn max_level(&self) -> u8 {
        self.best.len() as u8
    }

    /// Replace the aggregate at `level` iff `ms` has strictly higher
    /// cardinality. Returns whether a replacement happened.
    pub fn store(&mut self, level: u8, ms: MultiSignature<S>) -> Result<bool, AggregatorError> {
        if level == 0 {
            return Err(AggregatorError::Level0Immutable);
        }
        let slot = self
            .best
            .get_mut((level - 1) as usize)
            .ok_or(AggregatorError::StoreLevelOutOfRange(level))?;
        match slot {
            Some(current) if current.cardinality() >= ms.cardinality() => Ok(false),
            _ => {
                *slot = Some(ms);
                Ok(true)
            }
        }
    }

    pub fn best(&self, level: u8) -> Option<&MultiSignature<S>> {
        if level == 0 {
            return Some(&self.own);
        }
        self.best.get((level - 1) as usize)?.as_ref()
    }

    /// Merge of every present aggregate at levels `0..=level`. Fails only if
    /// two levels overlap, which violates the partition invariant.
    pub fn combined(&self, level: u8) -> Result<MultiSignature<S>, AggregatorError> {
        let mut acc = self.own.clone();
        for l in 0..level.min(self.max_level()) as usize {
            if let Some(ms) = &self.best[l] {
                acc = acc.merge(ms)?;
            }
        }
        Ok(acc)
    }

    /// Everything this node knows: `combined(L)`.
    pub fn full_signature(&self) -> Result<MultiSignature<S>, AggregatorError> {
        self.combined(self.max_level())
    }
}
