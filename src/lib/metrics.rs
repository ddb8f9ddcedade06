//! Metrics for collapse operations.
//!
//! Counters are accumulated per worker and merged explicitly; there is no
//! shared mutable state between workers.

use serde::{Deserialize, Serialize};

/// Counters describing one worker's collapse results.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CollapseMetrics {
    /// UMI groups attempted
    pub groups: u64,

    /// Raw reads seen across all groups
    pub input_reads: u64,

    /// Groups successfully collapsed into one record
    pub collapsed_groups: u64,

    /// Raw reads merged into collapsed records
    pub collapsed_reads: u64,

    /// Groups rejected by the splice-topology checks
    pub ambiguous_groups: u64,

    /// Raw reads belonging to rejected groups (passed through uncollapsed)
    pub lost_reads: u64,

    /// Raw reads flagged as duplicates by the aligner
    pub duplicate_reads: u64,
}

impl CollapseMetrics {
    /// Creates a metrics struct with all counts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds another worker's counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.groups += other.groups;
        self.input_reads += other.input_reads;
        self.collapsed_groups += other.collapsed_groups;
        self.collapsed_reads += other.collapsed_reads;
        self.ambiguous_groups += other.ambiguous_groups;
        self.lost_reads += other.lost_reads;
        self.duplicate_reads += other.duplicate_reads;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_all_fields() {
        let mut a = CollapseMetrics {
            groups: 1,
            input_reads: 10,
            collapsed_groups: 1,
            collapsed_reads: 8,
            ambiguous_groups: 0,
            lost_reads: 2,
            duplicate_reads: 3,
        };
        let b = CollapseMetrics {
            groups: 2,
            input_reads: 5,
            collapsed_groups: 1,
            collapsed_reads: 3,
            ambiguous_groups: 1,
            lost_reads: 2,
            duplicate_reads: 0,
        };
        a.merge(&b);
        assert_eq!(a.groups, 3);
        assert_eq!(a.input_reads, 15);
        assert_eq!(a.collapsed_groups, 2);
        assert_eq!(a.collapsed_reads, 11);
        assert_eq!(a.ambiguous_groups, 1);
        assert_eq!(a.lost_reads, 4);
        assert_eq!(a.duplicate_reads, 3);
    }
}
