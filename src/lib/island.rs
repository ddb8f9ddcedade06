//! Clustering of contigs into genomic islands and per-island consensus.
//!
//! All contigs from a UMI group are scanned in genomic order and clustered
//! into maximal overlapping intervals. Splice links between contigs become
//! directed connections between islands; a group is only collapsible when the
//! islands form a simple linear chain and every splice boundary sits within a
//! small slack of its island's edge. Each island then majority-votes a
//! consensus base, quality, and packed coverage per column, and reconciles
//! duplicate insertions.

use noodles::sam::alignment::record::cigar::op::Kind;

use crate::contig::{ContigArena, Insertion};
use crate::coverage::PackedCoverage;
use crate::errors::Result;
use crate::record::{CigarOp, CollapseRead};

/// Maximum distance a splice boundary may sit from its island's edge.
pub const MAX_BOUNDARY_SLACK: usize = 5;

/// Minimum fraction of contributing reads that must agree for a consensus
/// symbol or insertion to be emitted.
pub const CONSENSUS_FRACTION: f64 = 0.6;

/// Matrix marker for a deleted (gap) position.
const GAP: u8 = b'_';
/// Matrix marker for a position not covered by a contig.
const BLANK: u8 = b' ';
/// Consensus symbol per tally class: A, C, G, T, other, gap.
const CLASS_SYMBOLS: &[u8; 6] = b"ACGTN_";
/// Number of tally classes per column.
const CLASSES: usize = 6;

/// Tally class for a matrix symbol: four bases, "other", and gap.
fn base_class(symbol: u8) -> usize {
    match symbol {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        GAP => 5,
        _ => 4,
    }
}

/// Appends an op to a CIGAR, extending the final op when the kind matches.
fn push_op(cigar: &mut Vec<CigarOp>, kind: Kind, len: usize) {
    match cigar.last_mut() {
        Some((last, count)) if *last == kind => *count += len,
        _ => cigar.push((kind, len)),
    }
}

/// Group-level output buffers shared by all islands of one UMI group.
///
/// Islands append in genomic order; the collapse worker inserts reference
/// skips between islands and serializes the buffers into the final record.
#[derive(Debug, Default)]
pub struct ConsensusBuffers {
    /// Merged consensus bases
    pub bases: Vec<u8>,
    /// Merged consensus qualities, parallel to `bases`
    pub quals: Vec<u8>,
    /// Merged CIGAR with M/D runs coalesced
    pub cigar: Vec<CigarOp>,
    /// Splice junction pairs `(last base before gap, first base after gap)`
    pub splices: Vec<(usize, usize)>,
    /// Per-column packed coverage, one entry per match, deletion, or inserted base
    pub coverage: Vec<PackedCoverage>,
}

impl ConsensusBuffers {
    /// Clears all buffers while keeping their capacity.
    pub fn clear(&mut self) {
        self.bases.clear();
        self.quals.clear();
        self.cigar.clear();
        self.splices.clear();
        self.coverage.clear();
    }
}

/// A maximal cluster of overlapping or splice-connected contigs.
#[derive(Debug, Clone, Default)]
pub struct Island {
    /// Inclusive genomic left bound
    pub start: usize,
    /// Inclusive genomic right bound
    pub end: usize,
    /// Arena indices of contributing contigs
    pub contigs: Vec<usize>,
    /// Indices of islands reached by a splice from this one
    conns: Vec<usize>,
    /// Genomic positions where a splice enters this island
    starts: Vec<usize>,
    /// Genomic positions where a splice leaves this island
    ends: Vec<usize>,
    // Consensus scratch, rebuilt by `merge`.
    matrix_bases: Vec<u8>,
    matrix_quals: Vec<u8>,
    base_counts: Vec<u32>,
    max_quals: Vec<u8>,
    cons_bases: Vec<u8>,
    cons_quals: Vec<u8>,
    insertions: Vec<Insertion>,
}

impl Island {
    fn reset(&mut self, start: usize, end: usize) {
        self.start = start;
        self.end = end;
        self.contigs.clear();
        self.conns.clear();
        self.starts.clear();
        self.ends.clear();
    }

    /// Island length in reference bases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Returns true for an island with no contigs (never produced by clustering).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    fn dedup_boundaries(&mut self) {
        self.conns.sort_unstable();
        self.conns.dedup();
        self.starts.sort_unstable();
        self.starts.dedup();
        self.ends.sort_unstable();
        self.ends.dedup();
    }

    /// Checks the linear-chain and boundary-slack rules for island `index`.
    fn is_valid(&self, index: usize) -> bool {
        if self.conns.iter().any(|&conn| conn != index + 1) {
            return false;
        }
        let start_slack = self.starts.iter().map(|&s| s - self.start).max().unwrap_or(0);
        let end_slack = self.ends.iter().map(|&e| self.end - e).max().unwrap_or(0);
        start_slack <= MAX_BOUNDARY_SLACK && end_slack <= MAX_BOUNDARY_SLACK
    }

    /// Builds this island's consensus and appends it to the group buffers.
    ///
    /// Lays contributing contigs out in an N x L matrix (insertions tracked
    /// separately), majority-votes each column, reconciles insertions, and
    /// emits bases, qualities, coalesced CIGAR runs, splice pairs, and packed
    /// coverage. Insertions are emitted immediately before the base at their
    /// anchor column.
    pub fn merge(
        &mut self,
        reads: &[CollapseRead],
        contigs: &ContigArena,
        out: &mut ConsensusBuffers,
    ) -> Result<()> {
        self.merge_insertions(contigs);

        for &ci in &self.contigs {
            if let Some(next) = contigs.get(ci).next {
                out.splices.push((contigs.get(ci).end, contigs.get(next).start));
            }
        }

        self.merge_bases(reads, contigs);

        let length = self.len();
        let mut ins_idx = 0;
        for column in 0..length {
            while ins_idx < self.insertions.len() && self.insertions[ins_idx].left == column {
                let ins = &self.insertions[ins_idx];
                out.bases.extend_from_slice(&ins.bases);
                out.quals.extend_from_slice(&ins.quals);
                // Islands begin exactly where every contributing read gaps
                // relative to the reference, so inserted bases carry zero
                // supporting and zero total raw reads.
                out.coverage.extend(std::iter::repeat(PackedCoverage::default()).take(ins.len()));
                push_op(&mut out.cigar, Kind::Insertion, ins.len());
                ins_idx += 1;
            }

            let counts = &self.base_counts[column * CLASSES..(column + 1) * CLASSES];
            let total: u32 = counts.iter().sum();
            let symbol = self.cons_bases[column];
            if symbol == GAP {
                push_op(&mut out.cigar, Kind::Deletion, 1);
                // A column resolved as a gap still reports how many reads
                // gapped versus covered it.
                out.coverage.push(PackedCoverage::pack(counts[5], total)?);
            } else {
                out.bases.push(symbol);
                out.quals.push(self.cons_quals[column]);
                out.coverage.push(PackedCoverage::pack(counts[base_class(symbol)], total)?);
                push_op(&mut out.cigar, Kind::Match, 1);
            }
        }

        Ok(())
    }

    /// Fills the N x L matrix and majority-votes each column.
    fn merge_bases(&mut self, reads: &[CollapseRead], contigs: &ContigArena) {
        let n = self.contigs.len();
        let l = self.len();

        self.matrix_bases.clear();
        self.matrix_bases.resize(n * l, BLANK);
        self.matrix_quals.clear();
        self.matrix_quals.resize(n * l, 0);
        self.base_counts.clear();
        self.base_counts.resize(l * CLASSES, 0);
        self.max_quals.clear();
        self.max_quals.resize(l * CLASSES, 0);
        self.cons_bases.clear();
        self.cons_bases.resize(l, 0);
        self.cons_quals.clear();
        self.cons_quals.resize(l, 0);

        for (row, &ci) in self.contigs.iter().enumerate() {
            let contig = contigs.get(ci);
            let read = &reads[contig.read_index];
            let mut q = contig.qstart;
            let mut cell = row * l + (contig.start - self.start);
            for &(kind, len) in &contig.cigar {
                match kind {
                    Kind::Match => {
                        for _ in 0..len {
                            self.matrix_bases[cell] = read.bases[q];
                            self.matrix_quals[cell] = read.quals[q];
                            q += 1;
                            cell += 1;
                        }
                    }
                    Kind::Deletion => {
                        for _ in 0..len {
                            self.matrix_bases[cell] = GAP;
                            cell += 1;
                        }
                    }
                    Kind::Insertion => q += len,
                    _ => {}
                }
            }
        }

        for row in 0..n {
            for column in 0..l {
                let symbol = self.matrix_bases[row * l + column];
                if symbol == BLANK {
                    continue;
                }
                let class = base_class(symbol);
                self.base_counts[column * CLASSES + class] += 1;
                let qual = self.matrix_quals[row * l + column];
                let slot = &mut self.max_quals[column * CLASSES + class];
                *slot = (*slot).max(qual);
            }
        }

        for column in 0..l {
            let counts = &self.base_counts[column * CLASSES..(column + 1) * CLASSES];
            let mut modal = 0;
            let mut modal_count = 0;
            let mut total = 0;
            for (class, &count) in counts.iter().enumerate() {
                if count > modal_count {
                    modal = class;
                    modal_count = count;
                }
                total += count;
            }
            if f64::from(modal_count) >= CONSENSUS_FRACTION * f64::from(total) && total > 0 {
                self.cons_bases[column] = CLASS_SYMBOLS[modal];
                self.cons_quals[column] = self.max_quals[column * CLASSES + modal];
            } else {
                self.cons_bases[column] = b'N';
                self.cons_quals[column] = 0;
            }
        }
    }

    /// Gathers, deduplicates, and threshold-filters insertions.
    ///
    /// Identical events merge with an elementwise quality max. Support is the
    /// number of occurrences across contributing contigs; the denominator is
    /// the number of contigs whose genomic span covers the anchor. Survivors
    /// are re-anchored to island-relative columns.
    fn merge_insertions(&mut self, contigs: &ContigArena) {
        self.insertions.clear();
        for &ci in &self.contigs {
            self.insertions.extend(contigs.get(ci).insertions.iter().cloned());
        }
        if self.insertions.is_empty() {
            return;
        }
        self.insertions.sort();

        let mut merged: Vec<Insertion> = Vec::with_capacity(self.insertions.len());
        for ins in self.insertions.drain(..) {
            match merged.last_mut() {
                Some(last) if *last == ins => {
                    for (a, b) in last.quals.iter_mut().zip(ins.quals.iter()) {
                        *a = (*a).max(*b);
                    }
                }
                _ => merged.push(ins),
            }
        }

        for ins in merged {
            let mut support: u32 = 0;
            let mut eligible: u32 = 0;
            for &ci in &self.contigs {
                let contig = contigs.get(ci);
                support += contig.insertions.iter().filter(|other| **other == ins).count() as u32;
                if contig.start <= ins.left && ins.left <= contig.end {
                    eligible += 1;
                }
            }
            if f64::from(support) >= CONSENSUS_FRACTION * f64::from(eligible) {
                let mut kept = ins;
                kept.left -= self.start;
                self.insertions.push(kept);
            }
        }
    }
}

/// Grow-only pool of islands reused across UMI groups by a single worker.
#[derive(Debug, Default)]
pub struct IslandArena {
    slots: Vec<Island>,
    len: usize,
}

impl IslandArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live islands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no islands are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Marks all islands dead without releasing their buffers.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Borrows a live island.
    #[must_use]
    pub fn get(&self, index: usize) -> &Island {
        debug_assert!(index < self.len);
        &self.slots[index]
    }

    /// Mutably borrows a live island.
    pub fn get_mut(&mut self, index: usize) -> &mut Island {
        debug_assert!(index < self.len);
        &mut self.slots[index]
    }

    fn alloc(&mut self, start: usize, end: usize) -> usize {
        if self.len == self.slots.len() {
            self.slots.push(Island::default());
        }
        let index = self.len;
        self.slots[index].reset(start, end);
        self.len += 1;
        index
    }
}

/// Clusters a group's contigs into islands and validates splice connectivity.
///
/// `order` is the genomically sorted contig index list from
/// [`ContigArena::build`], and must not be empty. Returns true when the group
/// is collapsible: every island's connections point at exactly the next
/// island and no splice boundary sits more than [`MAX_BOUNDARY_SLACK`] bases
/// from its island's edge. A false verdict marks the whole group ambiguous;
/// it is a defined outcome, not an error.
pub fn build_islands(
    contigs: &mut ContigArena,
    order: &[usize],
    islands: &mut IslandArena,
) -> bool {
    islands.clear();
    let first = contigs.get(order[0]);
    let mut cur = islands.alloc(first.start, first.end);

    for &ci in order {
        let (cstart, cend, cprev) = {
            let contig = contigs.get(ci);
            (contig.start, contig.end, contig.prev)
        };

        let island = islands.get_mut(cur);
        if island.start <= cend && cstart <= island.end {
            island.end = island.end.max(cend);
            island.contigs.push(ci);
            contigs.get_mut(ci).island = cur;
        } else {
            let next = islands.alloc(cstart, cend);
            // Adjacent islands are always chained; only splice edges can
            // point anywhere else.
            islands.get_mut(cur).conns.push(next);
            islands.get_mut(next).contigs.push(ci);
            contigs.get_mut(ci).island = next;
            cur = next;
        }

        if let Some(pi) = cprev {
            let source = contigs.get(pi).island;
            let source_end = contigs.get(pi).end;
            let target = contigs.get(ci).island;
            islands.get_mut(source).conns.push(target);
            islands.get_mut(source).ends.push(source_end);
            islands.get_mut(target).starts.push(cstart);
        }
    }

    let mut collapsible = true;
    for index in 0..islands.len() {
        let island = islands.get_mut(index);
        island.dedup_boundaries();
        collapsible &= island.is_valid(index);
    }
    collapsible
}
