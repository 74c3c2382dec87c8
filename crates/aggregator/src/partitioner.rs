//! Binomial-tree partitioning of peers into levels.
//!
//! For a node with ID `i` and level `k`, the candidate set contains the IDs
//! agreeing with `i` on every bit above `k-1` and differing at bit `k-1`:
//! up to `2^(k-1)` peers, clamped to `[0, n)` when `n` is not a power of
//! two. The level sets partition every other participant, which is what
//! makes best-per-level aggregates merge into a non-overlapping union.

use std::sync::Arc;

use handel_core::{Identity, Registry};

use crate::AggregatorError;

pub struct BinomialPartitioner {
    id: u32,
    registry: Arc<Registry>,
    max_level: u8,
}

impl BinomialPartitioner {
    pub fn new(id: u32, registry: Arc<Registry>) -> Result<Self, AggregatorError> {
        if id as usize >= registry.size() {
            return Err(AggregatorError::IdOutOfRange(id, registry.size()));
        }
        let max_level = ceil_log2(registry.size());
        Ok(Self {
            id,
            registry,
            max_level,
        })
    }

    /// Number of levels, `ceil(log2 n)`. Zero for a single participant.
    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    /// The deterministic candidate list for `level`, truncated to `count`.
    /// `None` when `level` is outside `[1, max_level]`; the list itself may
    /// be empty for undersized upper levels.
    pub fn pick_next_at(&self, level: u8, count: usize) -> Option<Vec<Identity>> {
        let (start, end) = self.range_at(level)?;
        Some(
            (start..end)
                .take(count)
                .filter_map(|i| self.registry.identity(i).cloned())
                .collect(),
        )
    }

    /// Candidate ID range for `level`: flip bit `level-1` of our ID, clear
    /// the bits below it, clamp to the registry size.
    fn range_at(&self, level: u8) -> Option<(u32, u32)> {
        if level == 0 || level > self.max_level {
            return None;
        }
        let block = 1u32 << (level - 1);
        let start = (self.id ^ block) & !(block - 1);
        let end = (start + block).min(self.registry.size() as u32);
        Some((start, end.max(start)))
    }
}

fn ceil_log2(n: usize) -> u8 {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as u8
    }
}
