//! Per-level dissemination state.
//!
//! Each level tracks a rotating cursor over its candidate peers, how many
//! have been contacted since the stored aggregate last improved, and whether
//! the level holds a full aggregate. `finished` means there is no outgoing
//! work until the next improvement; `completed` means the aggregate can no
//! longer grow.

use handel_core::Identity;

use crate::AggregatorError;

pub struct Level {
    id: u8,
    nodes: Vec<Identity>,
    started: bool,
    completed: bool,
    finished: bool,
    pos: usize,
    sent: usize,
    current_best_size: usize,
}

impl Level {
    pub fn new(id: u8, nodes: Vec<Identity>) -> Self {
        Self {
            id,
            nodes,
            started: false,
            completed: false,
            finished: false,
            pos: 0,
            sent: 0,
            current_best_size: 0,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True once the engine has decided to transmit at this level.
    pub fn started(&self) -> bool {
        self.started
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn start(&mut self) {
        self.started = true;
    }

    /// Return the next `min(count, size)` candidates, advancing the cursor
    /// modulo the candidate count. Once every candidate has been contacted
    /// since the last improvement the level is marked finished.
    pub fn pick_next(&mut self, count: usize) -> Vec<Identity> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let size = count.min(self.nodes.len());
        let mut picked = Vec::with_capacity(size);
        for _ in 0..size {
            picked.push(self.nodes[self.pos].clone());
            self.pos += 1;
            if self.pos >= self.nodes.len() {
                self.pos = 0;
            }
        }
        self.sent += size;
        if self.sent >= self.nodes.len() {
            self.finished = true;
        }
        picked
    }

    /// Record the cardinality of the stored aggregate for this level.
    ///
    /// A strict improvement resets the dissemination counters; equal
    /// cardinality is not an improvement. Returns `true` when the level just
    /// became complete. A cardinality above the candidate count violates the
    /// partition invariant.
    pub fn update_best(&mut self, cardinality: usize) -> Result<bool, AggregatorError> {
        if cardinality > self.nodes.len() {
            return Err(AggregatorError::TooManyContributions {
                level: self.id,
                got: cardinality,
                size: self.nodes.len(),
            });
        }
        if self.current_best_size >= cardinality {
            return Ok(false);
        }
        self.current_best_size = cardinality;
        self.finished = false;
        self.sent = 0;
        if self.current_best_size == self.nodes.len() {
            self.completed = true;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(id: u8, n: u32) -> Level {
        let nodes = (0..n).map(|i| Identity::new(i, format!("local-{i}"))).collect();
        Level::new(id, nodes)
    }

    fn picked_ids(level: &mut Level, count: usize) -> Vec<u32> {
        level.pick_next(count).iter().map(Identity::id).collect()
    }

    #[test]
    fn round_robin_cursor() {
        let mut lvl = level(1, 3);
        assert_eq!(picked_ids(&mut lvl, 1), vec![0]);
        assert_eq!(picked_ids(&mut lvl, 1), vec![1]);
        assert_eq!(picked_ids(&mut lvl, 1), vec![2]);
        // wraps around
        assert_eq!(picked_ids(&mut lvl, 1), vec![0]);
    }

    #[test]
    fn pick_clamps_to_size_and_wraps() {
        let mut lvl = level(1, 3);
        assert_eq!(picked_ids(&mut lvl, 2), vec![0, 1]);
        assert_eq!(picked_ids(&mut lvl, 5), vec![2, 0, 1]);
    }

    #[test]
    fn finished_after_full_sweep() {
        let mut lvl = level(1, 2);
        assert!(!lvl.finished());
        lvl.pick_next(1);
        assert!(!lvl.finished());
        lvl.pick_next(1);
        assert!(lvl.finished());
    }

    #[test]
    fn improvement_resets_dissemination() {
        let mut lvl = level(1, 2);
        lvl.pick_next(2);
        assert!(lvl.finished());
        assert!(!lvl.update_best(1).unwrap());
        assert!(!lvl.finished());
        // the sweep counter restarted
        lvl.pick_next(1);
        assert!(!lvl.finished());
    }

    #[test]
    fn equal_cardinality_is_not_an_improvement() {
        let mut lvl = level(1, 4);
        assert!(!lvl.update_best(2).unwrap());
        lvl.pick_next(4);
        assert!(lvl.finished());
        assert!(!lvl.update_best(2).unwrap());
        // no reset happened
        assert!(lvl.finished());
    }

    #[test]
    fn completes_at_full_cardinality() {
        let mut lvl = level(2, 2);
        assert!(!lvl.update_best(1).unwrap());
        assert!(!lvl.completed());
        assert!(lvl.update_best(2).unwrap());
        assert!(lvl.completed());
    }

    #[test]
    fn over_capacity_is_an_invariant_violation() {
        let mut lvl = level(1, 2);
        assert!(matches!(
            lvl.update_best(3),
            Err(AggregatorError::TooManyContributions { level: 1, got: 3, size: 2 })
        ));
    }

    #[test]
    fn empty_level_picks_nothing() {
        let mut lvl = Level::new(2, Vec::new());
        assert!(lvl.pick_next(4).is_empty());
        assert!(lvl.is_empty());
    }
}
