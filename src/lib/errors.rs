//! Custom error types for collapse operations.

use thiserror::Error;

/// Result type alias for collapse operations
pub type Result<T> = std::result::Result<T, CollapseError>;

/// Error type for collapse operations
#[derive(Error, Debug)]
pub enum CollapseError {
    /// Per-base counts exceed the 16-bit packed field range
    #[error("coverage counts out of range: support {support}, total {total} (max {max})")]
    CoverageOverflow {
        /// Number of reads supporting the consensus symbol
        support: u32,
        /// Total reads contributing to the column
        total: u32,
        /// Maximum value either count may take
        max: u32,
    },

    /// Support count is larger than the total it is drawn from
    #[error("coverage support {support} exceeds total {total}")]
    SupportExceedsTotal {
        /// Number of reads supporting the consensus symbol
        support: u32,
        /// Total reads contributing to the column
        total: u32,
    },

    /// The serialized coverage tag does not follow the wire format
    #[error("malformed coverage tag: {reason}")]
    MalformedCoverageTag {
        /// Explanation of the problem
        reason: String,
    },

    /// The emitted record's computed dimensions disagree with its buffers.
    /// This is an internal consistency violation, not a recoverable condition.
    #[error(
        "collapsed record size mismatch for gene {gene_id} barcode {barcode} umi {umi}: \
         expected {expected} {what}, got {actual}"
    )]
    RecordSizeMismatch {
        /// Gene id of the offending group
        gene_id: u32,
        /// Barcode of the offending group
        barcode: u32,
        /// UMI of the offending group
        umi: u32,
        /// What was being counted (e.g. "query bases", "coverage columns")
        what: &'static str,
        /// Expected count
        expected: usize,
        /// Actual count
        actual: usize,
    },
}
