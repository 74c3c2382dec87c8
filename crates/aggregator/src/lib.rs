//! Handel Aggregator
//!
//! The aggregation engine. Peers are partitioned into binomial-tree levels;
//! a per-level state machine decides whom to contact and when a level is
//! complete; a replace store keeps the best aggregate seen per level; a FIFO
//! pipeline verifies incoming aggregates off the hot path; and the `Handel`
//! service ties it all together with a periodic dissemination ticker and a
//! channel of monotonically improving final aggregates.

pub mod config;
pub mod handel;
pub mod level;
pub mod partitioner;
pub mod processing;
pub mod store;
#[cfg(test)]
mod tests;

pub use config::Config;
pub use handel::Handel;
pub use level::Level;
pub use partitioner::BinomialPartitioner;
pub use processing::Contribution;
pub use store::ReplaceStore;

use handel_core::HandelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error(transparent)]
    Core(#[from] HandelError),
    #[error("node id {0} out of range for {1} participants")]
    IdOutOfRange(u32, usize),
    #[error("packet origin {0} out of range")]
    OriginOutOfRange(u32),
    #[error("packet level {got} outside [1, {max}]")]
    LevelOutOfRange { got: u8, max: u8 },
    #[error("aggregate from {origin} at level {level} failed verification")]
    InvalidAggregate { origin: u32, level: u8 },
    #[error("level {level} has {size} candidates but holds {got} contributions")]
    TooManyContributions { level: u8, got: usize, size: usize },
    #[error("no non-empty level above {0}")]
    NoHigherLevel(u8),
    #[error("store level {0} out of range")]
    StoreLevelOutOfRange(u8),
    #[error("own contribution at level 0 cannot be replaced")]
    Level0Immutable,
    #[error("no aggregate stored at level {0}")]
    MissingAggregate(u8),
}
