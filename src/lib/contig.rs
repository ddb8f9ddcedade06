//! Decomposition of aligned reads into gapped segments ("contigs").
//!
//! A contig is a maximal run of match/deletion/insertion operations with no
//! intervening reference skip. A spliced read yields one contig per exon,
//! linked through `prev`/`next` so the island assembler can validate splice
//! connectivity. Contigs are drawn from a grow-only arena that one worker
//! reuses across UMI groups, so inner op and insertion buffers keep their
//! capacity between groups.

use noodles::sam::alignment::record::cigar::op::Kind;

use crate::record::{is_match, CigarOp, CollapseRead};

/// One inserted run of bases relative to the reference.
///
/// `left` is the genomic position of the base that follows the insertion.
/// Identity is `(left, bases)` only: two reads reporting the same inserted
/// sequence at the same anchor describe the same event even if their quality
/// strings differ.
#[derive(Debug, Clone, Default)]
pub struct Insertion {
    /// Genomic anchor: position of the base immediately after the insertion
    pub left: usize,
    /// Inserted bases, query orientation
    pub bases: Vec<u8>,
    /// Quality scores parallel to `bases`
    pub quals: Vec<u8>,
}

impl Insertion {
    /// Number of inserted bases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Returns true if the insertion carries no bases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

impl PartialEq for Insertion {
    fn eq(&self, other: &Self) -> bool {
        self.left == other.left && self.bases == other.bases
    }
}

impl Eq for Insertion {}

impl PartialOrd for Insertion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Insertion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.left.cmp(&other.left).then_with(|| self.bases.cmp(&other.bases))
    }
}

/// One splice-free segment of a read's alignment.
///
/// Genomic and query bounds are inclusive once building completes. `prev` and
/// `next` are arena indices linking contigs across a reference skip in the
/// same originating read; `island` is assigned during clustering.
#[derive(Debug, Clone, Default)]
pub struct Contig {
    /// Inclusive genomic left bound
    pub start: usize,
    /// Inclusive genomic right bound
    pub end: usize,
    /// Inclusive query left bound
    pub qstart: usize,
    /// Inclusive query right bound
    pub qend: usize,
    /// Index of the originating read in the worker's record slice
    pub read_index: usize,
    /// Match/deletion/insertion ops making up this segment
    pub cigar: Vec<CigarOp>,
    /// Insertions anchored within this segment
    pub insertions: Vec<Insertion>,
    /// Arena index of the contig before the splice gap, if any
    pub prev: Option<usize>,
    /// Arena index of the contig after the splice gap, if any
    pub next: Option<usize>,
    /// Island this contig was clustered into
    pub island: usize,
}

impl Contig {
    fn reset(&mut self, read_index: usize, start: usize, qstart: usize) {
        self.start = start;
        self.end = start;
        self.qstart = qstart;
        self.qend = qstart;
        self.read_index = read_index;
        self.cigar.clear();
        self.insertions.clear();
        self.prev = None;
        self.next = None;
        self.island = 0;
    }
}

/// Grow-only pool of contigs reused across UMI groups by a single worker.
#[derive(Debug, Default)]
pub struct ContigArena {
    slots: Vec<Contig>,
    len: usize,
}

impl ContigArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live contigs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no contigs are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Marks all contigs dead without releasing their buffers.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Borrows a live contig.
    #[must_use]
    pub fn get(&self, index: usize) -> &Contig {
        debug_assert!(index < self.len);
        &self.slots[index]
    }

    /// Mutably borrows a live contig.
    pub fn get_mut(&mut self, index: usize) -> &mut Contig {
        debug_assert!(index < self.len);
        &mut self.slots[index]
    }

    fn alloc(&mut self, read_index: usize, start: usize, qstart: usize) -> usize {
        if self.len == self.slots.len() {
            self.slots.push(Contig::default());
        }
        let index = self.len;
        self.slots[index].reset(read_index, start, qstart);
        self.len += 1;
        index
    }

    /// Rebuilds the arena from one UMI group's reads.
    ///
    /// `group` holds indices into `reads`. Walks each read's CIGAR left to
    /// right: a leading soft clip advances only the query cursor, match-like
    /// ops extend both bounds, deletions extend only the genomic bound,
    /// insertions capture their bases/quals at the current anchor, and a
    /// reference skip terminates the contig and links a new one past the gap.
    /// Bounds accumulate exclusively and are corrected to inclusive at the
    /// end. Returns arena indices sorted by genomic start.
    pub fn build(&mut self, reads: &[CollapseRead], group: &[usize]) -> Vec<usize> {
        self.clear();
        for &read_index in group {
            let read = &reads[read_index];
            let mut ops = read.cigar.as_slice();
            let mut qstart = 0;
            if let Some(&(kind, len)) = ops.first() {
                if kind == Kind::SoftClip {
                    qstart = len;
                    ops = &ops[1..];
                }
            }
            let mut cur = self.alloc(read_index, read.start, qstart);
            for &(kind, len) in ops {
                if kind == Kind::Skip {
                    let (gap_start, qend) = {
                        let prev = &self.slots[cur];
                        (prev.end + len, prev.qend)
                    };
                    let next = self.alloc(read_index, gap_start, qend);
                    self.slots[next].prev = Some(cur);
                    self.slots[cur].next = Some(next);
                    cur = next;
                } else if is_match(kind) {
                    let c = &mut self.slots[cur];
                    c.end += len;
                    c.qend += len;
                    c.cigar.push((Kind::Match, len));
                } else if kind == Kind::Deletion {
                    let c = &mut self.slots[cur];
                    c.end += len;
                    c.cigar.push((Kind::Deletion, len));
                } else if kind == Kind::Insertion {
                    let c = &mut self.slots[cur];
                    let q = c.qend;
                    c.insertions.push(Insertion {
                        left: c.end,
                        bases: read.bases[q..q + len].to_vec(),
                        quals: read.quals[q..q + len].to_vec(),
                    });
                    c.qend += len;
                    c.cigar.push((Kind::Insertion, len));
                }
                // Hard clips, pads, and non-leading soft clips touch no contig.
            }
        }

        // Running bounds were exclusive; make them inclusive.
        for contig in &mut self.slots[..self.len] {
            contig.end = contig.end.saturating_sub(1);
            contig.qend = contig.qend.saturating_sub(1);
        }

        let mut order: Vec<usize> = (0..self.len).collect();
        order.sort_by_key(|&i| self.slots[i].start);
        order
    }
}
