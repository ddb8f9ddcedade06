//! Lazy decoding of collapsed records for pileup traversal.
//!
//! A pileup walks each collapsed record's CIGAR to enumerate aligned
//! reference/query position pairs, and looks up the packed per-base coverage
//! for a query offset by walking the record's RLE coverage tag. Neither side
//! materializes the full per-base array; forward walks are linear in the
//! number of ops/runs and arbitrary offsets remain correct via restart.

use noodles::sam::alignment::record::cigar::op::Kind;

use crate::coverage::{decode_at, decode_coverage_tag, CoverageCursor, PackedCoverage};
use crate::errors::Result;
use crate::record::{is_match, CigarOp};

/// Restartable cursor over the aligned `(reference, query)` position pairs of
/// one record's CIGAR.
///
/// Match-like columns yield one pair each; insertions and soft clips advance
/// only the query, deletions and reference skips only the reference.
#[derive(Debug, Clone)]
pub struct PositionCursor<'a> {
    start: usize,
    cigar: &'a [CigarOp],
    op: usize,
    offset: usize,
    refpos: usize,
    qpos: usize,
}

impl<'a> PositionCursor<'a> {
    /// Creates a cursor at the first aligned column.
    #[must_use]
    pub fn new(start: usize, cigar: &'a [CigarOp]) -> Self {
        Self { start, cigar, op: 0, offset: 0, refpos: start, qpos: 0 }
    }

    /// Rewinds to the first aligned column.
    pub fn reset(&mut self) {
        self.op = 0;
        self.offset = 0;
        self.refpos = self.start;
        self.qpos = 0;
    }
}

impl Iterator for PositionCursor<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        while let Some(&(kind, len)) = self.cigar.get(self.op) {
            if is_match(kind) {
                if self.offset < len {
                    let pair = (self.refpos, self.qpos);
                    self.refpos += 1;
                    self.qpos += 1;
                    self.offset += 1;
                    return Some(pair);
                }
            } else {
                match kind {
                    Kind::Deletion | Kind::Skip => self.refpos += len,
                    Kind::Insertion | Kind::SoftClip => self.qpos += len,
                    _ => {}
                }
            }
            self.op += 1;
            self.offset = 0;
        }
        None
    }
}

/// One collapsed record prepared for pileup queries.
///
/// The coverage tag is decoded to its run pairs once; per-position lookups
/// never expand the runs.
#[derive(Debug, Clone)]
pub struct PileupRead {
    start: usize,
    cigar: Vec<CigarOp>,
    pairs: Vec<(PackedCoverage, u32)>,
}

impl PileupRead {
    /// Builds a pileup view from a record's position, CIGAR, and coverage tag
    /// bytes. Fails on a malformed tag.
    pub fn new(start: usize, cigar: Vec<CigarOp>, coverage_tag: &[u8]) -> Result<Self> {
        Ok(Self { start, cigar, pairs: decode_coverage_tag(coverage_tag)? })
    }

    /// Cursor over this record's aligned position pairs.
    #[must_use]
    pub fn positions(&self) -> PositionCursor<'_> {
        PositionCursor::new(self.start, &self.cigar)
    }

    /// Cached-walk cursor over this record's coverage runs; the efficient
    /// path for queries at increasing query offsets.
    #[must_use]
    pub fn coverage_cursor(&self) -> CoverageCursor<'_> {
        CoverageCursor::new(&self.pairs)
    }

    /// Single isolated coverage lookup at a query offset.
    #[must_use]
    pub fn coverage_at(&self, qpos: usize) -> Option<PackedCoverage> {
        decode_at(&self.pairs, qpos as u32)
    }
}
