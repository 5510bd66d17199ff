use std::collections::BTreeMap;

use crate::types::PositionRange;

/// Last persisted offset of each partition.
///
/// Only moves forward, and only once the batch covering the new offsets has been written to
/// the sink. It lives in memory: after a restart the source resumes from the last offsets it
/// committed, which may be behind this state, so some records can be delivered twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    committed: BTreeMap<i32, i64>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last persisted offset for the partition, if anything was persisted yet.
    pub fn position(&self, partition: i32) -> Option<i64> {
        self.committed.get(&partition).copied()
    }

    /// Move each partition covered by `range` to the end of its span. Partitions that are
    /// already at or past that point are left alone.
    ///
    /// Returns the partitions that moved, with their new offsets.
    pub fn advance(&mut self, range: &PositionRange) -> BTreeMap<i32, i64> {
        let mut moved = BTreeMap::new();
        for (partition, span) in range.iter() {
            match self.committed.get(&partition) {
                Some(current) if *current >= span.last => continue,
                _ => {
                    self.committed.insert(partition, span.last);
                    moved.insert(partition, span.last);
                }
            }
        }
        moved
    }

    pub fn snapshot(&self) -> BTreeMap<i32, i64> {
        self.committed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn range(positions: &[(i32, i64)]) -> PositionRange {
        let positions: Vec<Position> = positions
            .iter()
            .map(|(partition, offset)| Position::new(*partition, *offset))
            .collect();
        PositionRange::from_positions(&positions)
    }

    #[test]
    fn test_advance_moves_to_end_of_span() {
        let mut progress = ProgressState::new();
        assert_eq!(progress.position(0), None);

        let moved = progress.advance(&range(&[(0, 3), (0, 7), (2, 1)]));

        assert_eq!(moved, BTreeMap::from([(0, 7), (2, 1)]));
        assert_eq!(progress.position(0), Some(7));
        assert_eq!(progress.position(1), None);
        assert_eq!(progress.position(2), Some(1));
    }

    #[test]
    fn test_advance_never_goes_backwards() {
        let mut progress = ProgressState::new();
        progress.advance(&range(&[(0, 10), (1, 5)]));

        let moved = progress.advance(&range(&[(0, 4), (1, 6)]));

        assert_eq!(moved, BTreeMap::from([(1, 6)]));
        assert_eq!(progress.position(0), Some(10));
        assert_eq!(progress.position(1), Some(6));
    }

    #[test]
    fn test_empty_range_is_a_no_op() {
        let mut progress = ProgressState::new();
        progress.advance(&range(&[(0, 1)]));

        assert!(progress.advance(&PositionRange::default()).is_empty());
        assert_eq!(progress.snapshot(), BTreeMap::from([(0, 1)]));
    }
}
