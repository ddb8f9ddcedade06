//! The alignment-record contract consumed by the collapsing core.
//!
//! Reading and writing the alignment container itself is the caller's job;
//! the core only sees [`CollapseRead`], a plain view of one aligned read with
//! its grouping identity (gene, barcode, UMI) already resolved to integers.
//! CIGARs are carried as simplified `(Kind, usize)` op lists.

use noodles::sam::alignment::record::cigar::op::Kind;

/// A simplified CIGAR operation: kind plus length.
pub type CigarOp = (Kind, usize);

/// Returns true if the operation consumes reference positions.
#[must_use]
pub fn consumes_reference(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Match | Kind::Deletion | Kind::Skip | Kind::SequenceMatch | Kind::SequenceMismatch
    )
}

/// Returns true if the operation consumes query bases.
#[must_use]
pub fn consumes_query(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Match
            | Kind::Insertion
            | Kind::SoftClip
            | Kind::SequenceMatch
            | Kind::SequenceMismatch
    )
}

/// Returns true for aligned (match-like) operations, including `=` and `X`.
#[must_use]
pub fn is_match(kind: Kind) -> bool {
    matches!(kind, Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch)
}

/// Single-character SAM code for an operation kind.
#[must_use]
pub fn op_char(kind: Kind) -> char {
    match kind {
        Kind::Match => 'M',
        Kind::Insertion => 'I',
        Kind::Deletion => 'D',
        Kind::Skip => 'N',
        Kind::SoftClip => 'S',
        Kind::HardClip => 'H',
        Kind::Pad => 'P',
        Kind::SequenceMatch => '=',
        Kind::SequenceMismatch => 'X',
    }
}

/// Formats an op list as a SAM CIGAR string (e.g. `"30M2D18M"`).
#[must_use]
pub fn cigar_string(ops: &[CigarOp]) -> String {
    let mut out = String::with_capacity(ops.len() * 3);
    for &(kind, len) in ops {
        out.push_str(&len.to_string());
        out.push(op_char(kind));
    }
    out
}

/// Parses a SAM CIGAR string into an op list. Unknown characters are skipped.
#[must_use]
pub fn parse_cigar_string(cigar: &str) -> Vec<CigarOp> {
    let mut ops = Vec::new();
    let mut len: usize = 0;
    for c in cigar.chars() {
        if let Some(d) = c.to_digit(10) {
            len = len * 10 + d as usize;
            continue;
        }
        let kind = match c {
            'M' => Some(Kind::Match),
            'I' => Some(Kind::Insertion),
            'D' => Some(Kind::Deletion),
            'N' => Some(Kind::Skip),
            'S' => Some(Kind::SoftClip),
            'H' => Some(Kind::HardClip),
            'P' => Some(Kind::Pad),
            '=' => Some(Kind::SequenceMatch),
            'X' => Some(Kind::SequenceMismatch),
            _ => None,
        };
        if let Some(kind) = kind {
            ops.push((kind, len));
        }
        len = 0;
    }
    ops
}

/// Number of reference positions spanned by an op list.
#[must_use]
pub fn cigar_reference_length(ops: &[CigarOp]) -> usize {
    ops.iter().filter(|(kind, _)| consumes_reference(*kind)).map(|(_, len)| len).sum()
}

/// Number of query bases consumed by an op list, soft clips excluded.
#[must_use]
pub fn cigar_aligned_query_length(ops: &[CigarOp]) -> usize {
    ops.iter()
        .filter(|(kind, _)| consumes_query(*kind) && *kind != Kind::SoftClip)
        .map(|(_, len)| len)
        .sum()
}

/// One aligned read as seen by the collapsing core.
///
/// Grouping identity (gene id, barcode, UMI) has already been decoded to
/// integers by the caller; `bases` are ASCII nucleotides and `quals` raw
/// phred scores, both full query length including soft-clipped bases.
#[derive(Debug, Clone)]
pub struct CollapseRead {
    /// 0-based inclusive leftmost aligned reference position
    pub start: usize,
    /// 0-based inclusive rightmost aligned reference position
    pub end: usize,
    /// True if aligned to the reverse strand
    pub reverse: bool,
    /// Simplified CIGAR operations
    pub cigar: Vec<CigarOp>,
    /// ASCII base calls, query orientation
    pub bases: Vec<u8>,
    /// Raw phred quality scores, parallel to `bases`
    pub quals: Vec<u8>,
    /// Grouping key: gene id
    pub gene_id: u32,
    /// Grouping key: cell barcode
    pub barcode: u32,
    /// Grouping key: unique molecular identifier
    pub umi: u32,
    /// Originating input file, carried through for provenance
    pub file_number: u32,
    /// Downsample round this read was assigned to
    pub round: u32,
    /// True if the aligner marked this read as a duplicate
    pub duplicate: bool,
    /// Set once the read has been reported in a provenance entry. Owned by
    /// the worker, which clears it at the start of every pass.
    pub processed: bool,
}

impl CollapseRead {
    /// Creates a read at `start` with bounds derived from its CIGAR.
    #[must_use]
    pub fn new(start: usize, cigar: Vec<CigarOp>, bases: Vec<u8>, quals: Vec<u8>) -> Self {
        let end = start + cigar_reference_length(&cigar).saturating_sub(1);
        Self {
            start,
            end,
            reverse: false,
            cigar,
            bases,
            quals,
            gene_id: 0,
            barcode: 0,
            umi: 0,
            file_number: 0,
            round: 0,
            duplicate: false,
            processed: false,
        }
    }

    /// Sets the grouping identity, consuming and returning the read.
    #[must_use]
    pub fn with_group(mut self, gene_id: u32, barcode: u32, umi: u32) -> Self {
        self.gene_id = gene_id;
        self.barcode = barcode;
        self.umi = umi;
        self
    }

    /// Sort key used to make UMI groups contiguous within a range.
    #[must_use]
    pub fn group_key(&self) -> (u32, u32, u32) {
        (self.gene_id, self.barcode, self.umi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cigar_string_round_trip() {
        let ops = vec![(Kind::SoftClip, 5), (Kind::Match, 30), (Kind::Skip, 200), (Kind::Match, 20)];
        let s = cigar_string(&ops);
        assert_eq!(s, "5S30M200N20M");
        assert_eq!(parse_cigar_string(&s), ops);
    }

    #[test]
    fn test_reference_length() {
        let ops = parse_cigar_string("5S30M2D200N20M3I10M");
        assert_eq!(cigar_reference_length(&ops), 30 + 2 + 200 + 20 + 10);
        assert_eq!(cigar_aligned_query_length(&ops), 30 + 20 + 3 + 10);
    }

    #[test]
    fn test_read_bounds_from_cigar() {
        let read = CollapseRead::new(
            100,
            parse_cigar_string("50M"),
            vec![b'A'; 50],
            vec![30; 50],
        );
        assert_eq!(read.start, 100);
        assert_eq!(read.end, 149);
    }

    #[test]
    fn test_group_key_ordering() {
        let a = CollapseRead::new(0, parse_cigar_string("1M"), vec![b'A'], vec![30])
            .with_group(1, 2, 3);
        let b = CollapseRead::new(0, parse_cigar_string("1M"), vec![b'A'], vec![30])
            .with_group(1, 2, 4);
        assert!(a.group_key() < b.group_key());
    }
}
