//! Per-range collapse driver and collapsed-record emitter.
//!
//! A [`CollapseWorker`] owns the contig/island arenas and consensus buffers
//! for one worker thread and processes contiguous ranges of records that the
//! caller has pre-sorted so that gene/barcode/UMI groups are contiguous. Each
//! UMI group either collapses into one [`CollapsedRead`] or is counted as
//! ambiguous and left for the caller to pass through unmodified.

use noodles::sam::alignment::record::cigar::op::Kind;

use crate::contig::ContigArena;
use crate::coverage::encode_coverage_tag;
use crate::errors::{CollapseError, Result};
use crate::island::{build_islands, ConsensusBuffers, IslandArena};
use crate::metrics::CollapseMetrics;
use crate::record::{cigar_string, CigarOp, CollapseRead};

/// One collapsed alignment, ready for the caller to serialize.
///
/// Tag payloads use the conventional names from the output format: `NM`
/// (mismatches), `ND` (duplicates), `NR` (total reads), `XC` (gap validity),
/// `XR` (provenance), `CC` (packed coverage).
#[derive(Debug, Clone)]
pub struct CollapsedRead {
    /// 0-based leftmost reference position
    pub start: usize,
    /// Strand of the collapsed molecule
    pub reverse: bool,
    /// Merged CIGAR
    pub cigar: Vec<CigarOp>,
    /// Consensus bases
    pub bases: Vec<u8>,
    /// Consensus qualities, parallel to `bases`
    pub quals: Vec<u8>,
    /// Mismatches versus the reference, recomputed from the merged CIGAR
    pub mismatches: u32,
    /// Raw reads the aligner had flagged as duplicates
    pub duplicates: u32,
    /// Raw reads merged into this record
    pub total_reads: u32,
    /// Deduplicated splice junctions observed in the group
    pub splices: Vec<(usize, usize)>,
    /// One character per reference skip: '0' if it matches an observed
    /// junction, '1' otherwise
    pub gap_flags: String,
    /// Semicolon-separated `start,end,cigar` entries, one per contributing read
    pub provenance: String,
    /// RLE-encoded packed coverage tag bytes
    pub coverage_tag: Vec<u8>,
    /// Gene id carried from the group
    pub gene_id: u32,
    /// Barcode carried from the group
    pub barcode: u32,
    /// UMI carried from the group
    pub umi: u32,
    /// File provenance carried from the group's first read
    pub file_number: u32,
}

/// Collapses UMI groups within pre-sorted record ranges.
///
/// Contig and island pools are grow-only and reused across groups; a worker
/// is purely sequential and never shares mutable state with another.
#[derive(Debug, Default)]
pub struct CollapseWorker {
    contigs: ContigArena,
    islands: IslandArena,
    buffers: ConsensusBuffers,
    metrics: CollapseMetrics,
}

impl CollapseWorker {
    /// Creates a worker with empty pools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows the accumulated counters.
    #[must_use]
    pub fn metrics(&self) -> &CollapseMetrics {
        &self.metrics
    }

    /// Takes ownership of the counters, resetting them to zero.
    pub fn take_metrics(&mut self) -> CollapseMetrics {
        std::mem::take(&mut self.metrics)
    }

    /// Processes one range of records, appending collapsed records to `out`.
    ///
    /// Records are grouped by `(gene_id, barcode, umi)`; `reference` is the
    /// full sequence of the reference the range is aligned to, indexed by
    /// absolute position. Reads in groups that fail the splice-topology
    /// checks are counted in the metrics and left untouched apart from their
    /// `processed` flags.
    pub fn process_range(
        &mut self,
        reads: &mut [CollapseRead],
        reference: &[u8],
        out: &mut Vec<CollapsedRead>,
    ) -> Result<()> {
        self.process_if(reads, reference, out, |_| true)
    }

    /// Processes only the reads originating from input file `file_number`;
    /// the rest of the slice is skipped before grouping and left untouched.
    pub fn process_file_range(
        &mut self,
        reads: &mut [CollapseRead],
        reference: &[u8],
        file_number: u32,
        out: &mut Vec<CollapsedRead>,
    ) -> Result<()> {
        self.process_if(reads, reference, out, |read| read.file_number == file_number)
    }

    /// Processes only the reads assigned to downsample round `round`.
    pub fn process_round_range(
        &mut self,
        reads: &mut [CollapseRead],
        reference: &[u8],
        round: u32,
        out: &mut Vec<CollapsedRead>,
    ) -> Result<()> {
        self.process_if(reads, reference, out, |read| read.round == round)
    }

    fn process_if(
        &mut self,
        reads: &mut [CollapseRead],
        reference: &[u8],
        out: &mut Vec<CollapsedRead>,
        keep: impl Fn(&CollapseRead) -> bool,
    ) -> Result<()> {
        // A previous pass over the same slice may have left flags set.
        for read in reads.iter_mut() {
            read.processed = false;
        }

        let mut order: Vec<usize> = (0..reads.len()).filter(|&i| keep(&reads[i])).collect();
        if order.is_empty() {
            return Ok(());
        }
        order.sort_by_key(|&i| (reads[i].group_key(), reads[i].start));

        let mut group_start = 0;
        for i in 1..=order.len() {
            if i < order.len()
                && reads[order[i]].group_key() == reads[order[group_start]].group_key()
            {
                continue;
            }
            if let Some(record) = self.collapse_group(reads, &order[group_start..i], reference)? {
                out.push(record);
            }
            group_start = i;
        }
        Ok(())
    }

    /// Collapses one UMI group, or returns `None` for a non-collapsible one.
    pub fn collapse_group(
        &mut self,
        reads: &mut [CollapseRead],
        group: &[usize],
        reference: &[u8],
    ) -> Result<Option<CollapsedRead>> {
        self.metrics.groups += 1;
        self.metrics.input_reads += group.len() as u64;

        let duplicates = group.iter().filter(|&&i| reads[i].duplicate).count() as u32;
        self.metrics.duplicate_reads += u64::from(duplicates);

        let order = self.contigs.build(reads, group);
        if !build_islands(&mut self.contigs, &order, &mut self.islands) {
            let first = &reads[group[0]];
            log::debug!(
                "group gene={} barcode={} umi={} not collapsible ({} reads)",
                first.gene_id,
                first.barcode,
                first.umi,
                group.len()
            );
            self.metrics.ambiguous_groups += 1;
            self.metrics.lost_reads += group.len() as u64;
            return Ok(None);
        }

        self.buffers.clear();
        for i in 0..self.islands.len() {
            if i > 0 {
                let gap = self.islands.get(i).start - self.islands.get(i - 1).end - 1;
                if gap > 0 {
                    self.buffers.cigar.push((Kind::Skip, gap));
                }
            }
            let (islands, contigs, buffers) =
                (&mut self.islands, &self.contigs, &mut self.buffers);
            islands.get_mut(i).merge(reads, contigs, buffers)?;
        }

        self.buffers.splices.sort_unstable();
        self.buffers.splices.dedup();

        let anchor = &reads[self.first_contributing_read()];
        let group_id = (anchor.gene_id, anchor.barcode, anchor.umi);
        let (reverse, file_number) = (anchor.reverse, anchor.file_number);

        self.check_dimensions(group_id)?;

        let start = self.islands.get(0).start;
        let (mismatches, gap_flags) = self.walk_final_cigar(start, reference);
        let provenance = self.build_provenance(reads);

        self.metrics.collapsed_groups += 1;
        self.metrics.collapsed_reads += group.len() as u64;

        Ok(Some(CollapsedRead {
            start,
            reverse,
            cigar: self.buffers.cigar.clone(),
            bases: self.buffers.bases.clone(),
            quals: self.buffers.quals.clone(),
            mismatches,
            duplicates,
            total_reads: group.len() as u32,
            splices: self.buffers.splices.clone(),
            gap_flags,
            provenance,
            coverage_tag: encode_coverage_tag(&self.buffers.coverage),
            gene_id: group_id.0,
            barcode: group_id.1,
            umi: group_id.2,
            file_number,
        }))
    }

    /// Read index behind the first contig of the first island.
    fn first_contributing_read(&self) -> usize {
        let first_contig = self.islands.get(0).contigs[0];
        self.contigs.get(first_contig).read_index
    }

    /// Verifies the merged buffers agree with the merged CIGAR.
    ///
    /// A mismatch means a corrupted record would be written; it is a
    /// programming error and aborts the unit of work.
    fn check_dimensions(&self, (gene_id, barcode, umi): (u32, u32, u32)) -> Result<()> {
        let mut query_len = 0;
        let mut deletion_len = 0;
        for &(kind, len) in &self.buffers.cigar {
            match kind {
                Kind::Match | Kind::Insertion => query_len += len,
                Kind::Deletion => deletion_len += len,
                _ => {}
            }
        }

        let mismatch = |what, expected, actual| CollapseError::RecordSizeMismatch {
            gene_id,
            barcode,
            umi,
            what,
            expected,
            actual,
        };

        if self.buffers.bases.len() != query_len {
            return Err(mismatch("query bases", query_len, self.buffers.bases.len()));
        }
        if self.buffers.quals.len() != self.buffers.bases.len() {
            return Err(mismatch("quality scores", self.buffers.bases.len(), self.buffers.quals.len()));
        }
        let coverage_cols = query_len + deletion_len;
        if self.buffers.coverage.len() != coverage_cols {
            return Err(mismatch("coverage columns", coverage_cols, self.buffers.coverage.len()));
        }
        Ok(())
    }

    /// Recomputes mismatches against the reference and classifies each skip.
    ///
    /// Match columns compare consensus bases to the reference; deletion and
    /// insertion lengths count as mismatches outright. Each reference skip is
    /// flagged '0' when `(pos - 1, pos + len)` matches an observed splice
    /// junction and '1' otherwise.
    fn walk_final_cigar(&self, start: usize, reference: &[u8]) -> (u32, String) {
        let mut refpos = start;
        let mut query = 0;
        let mut mismatches: u32 = 0;
        let mut gap_flags = String::new();
        for &(kind, len) in &self.buffers.cigar {
            match kind {
                Kind::Match => {
                    for _ in 0..len {
                        if reference.get(refpos).copied() != Some(self.buffers.bases[query]) {
                            mismatches += 1;
                        }
                        refpos += 1;
                        query += 1;
                    }
                }
                Kind::Deletion => {
                    mismatches += len as u32;
                    refpos += len;
                }
                Kind::Insertion => {
                    mismatches += len as u32;
                    query += len;
                }
                Kind::Skip => {
                    let junction = (refpos - 1, refpos + len);
                    let observed = self.buffers.splices.binary_search(&junction).is_ok();
                    gap_flags.push(if observed { '0' } else { '1' });
                    refpos += len;
                }
                _ => {}
            }
        }
        (mismatches, gap_flags)
    }

    /// Emits one `start,end,cigar` provenance entry per contributing read.
    ///
    /// A read whose contigs span several islands is reported once, at its
    /// first contig, and then flagged processed.
    fn build_provenance(&self, reads: &mut [CollapseRead]) -> String {
        let mut provenance = String::new();
        for i in 0..self.islands.len() {
            for &ci in &self.islands.get(i).contigs {
                let contig = self.contigs.get(ci);
                let read = &mut reads[contig.read_index];
                if read.processed {
                    continue;
                }
                if !provenance.is_empty() {
                    provenance.push(';');
                }
                provenance.push_str(&format!(
                    "{},{},{}",
                    read.start,
                    read.end,
                    cigar_string(&contig.cigar)
                ));
                read.processed = true;
            }
        }
        provenance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{decode_at, decode_coverage_tag};
    use crate::record::parse_cigar_string;

    fn read(start: usize, cigar: &str, bases: &[u8]) -> CollapseRead {
        let quals = vec![30u8; bases.len()];
        CollapseRead::new(start, parse_cigar_string(cigar), bases.to_vec(), quals)
    }

    fn reference(len: usize) -> Vec<u8> {
        // Deterministic non-trivial reference sequence.
        (0..len).map(|i| b"ACGT"[i % 4]).collect()
    }

    fn collapse(reads: &mut [CollapseRead], reference: &[u8]) -> Vec<CollapsedRead> {
        let mut worker = CollapseWorker::new();
        let mut out = Vec::new();
        worker.process_range(reads, reference, &mut out).unwrap();
        out
    }

    #[test]
    fn test_identical_reads_collapse_to_reference_match() {
        let genome = reference(400);
        let bases: Vec<u8> = genome[100..150].to_vec();
        let mut reads =
            vec![read(100, "50M", &bases), read(100, "50M", &bases)];
        let out = collapse(&mut reads, &genome);
        assert_eq!(out.len(), 1);
        let rec = &out[0];
        assert_eq!(rec.start, 100);
        assert_eq!(rec.cigar, parse_cigar_string("50M"));
        assert_eq!(rec.bases, bases);
        assert_eq!(rec.mismatches, 0);
        assert_eq!(rec.total_reads, 2);
        let pairs = decode_coverage_tag(&rec.coverage_tag).unwrap();
        for i in 0..50 {
            assert_eq!(decode_at(&pairs, i).unwrap().unpack(), (2, 2));
        }
    }

    #[test]
    fn test_minority_mismatch_keeps_majority_base() {
        let genome = reference(400);
        let bases: Vec<u8> = genome[100..150].to_vec();
        let mut variant = bases.clone();
        variant[20] = if variant[20] == b'A' { b'C' } else { b'A' };
        // Two of three reads agree with the reference at position 120.
        let mut reads = vec![
            read(100, "50M", &bases),
            read(100, "50M", &bases),
            read(100, "50M", &variant),
        ];
        let out = collapse(&mut reads, &genome);
        let rec = &out[0];
        assert_eq!(rec.bases, bases);
        assert_eq!(rec.mismatches, 0);
        let pairs = decode_coverage_tag(&rec.coverage_tag).unwrap();
        assert_eq!(decode_at(&pairs, 20).unwrap().unpack(), (2, 3));
        assert_eq!(decode_at(&pairs, 0).unwrap().unpack(), (3, 3));
    }

    #[test]
    fn test_even_split_column_is_ambiguous() {
        let genome = reference(400);
        let bases: Vec<u8> = genome[100..150].to_vec();
        let mut variant = bases.clone();
        variant[20] = if variant[20] == b'A' { b'C' } else { b'A' };
        let mut reads = vec![read(100, "50M", &bases), read(100, "50M", &variant)];
        let out = collapse(&mut reads, &genome);
        let rec = &out[0];
        // 1-vs-1 has no 60% majority: the column is called N with quality 0.
        assert_eq!(rec.bases[20], b'N');
        assert_eq!(rec.quals[20], 0);
        assert_eq!(rec.mismatches, 1);
        let pairs = decode_coverage_tag(&rec.coverage_tag).unwrap();
        assert_eq!(decode_at(&pairs, 20).unwrap().unpack(), (0, 2));
    }

    #[test]
    fn test_spliced_group_emits_skip_and_gap_flags() {
        let genome = reference(600);
        let exon1: Vec<u8> = genome[100..130].to_vec();
        let exon2: Vec<u8> = genome[330..350].to_vec();
        let mut bases = exon1;
        bases.extend_from_slice(&exon2);
        let mut reads = vec![
            read(100, "30M200N20M", &bases),
            read(100, "30M200N20M", &bases),
        ];
        let out = collapse(&mut reads, &genome);
        let rec = &out[0];
        assert_eq!(rec.cigar, parse_cigar_string("30M200N20M"));
        assert_eq!(rec.splices, vec![(129, 330)]);
        // The skip matches an observed junction.
        assert_eq!(rec.gap_flags, "0");
        assert_eq!(rec.mismatches, 0);
        // Coverage has one column per aligned base, none for the skip.
        let pairs = decode_coverage_tag(&rec.coverage_tag).unwrap();
        assert_eq!(decode_at(&pairs, 49).unwrap().unpack(), (2, 2));
        assert_eq!(decode_at(&pairs, 50), None);
    }

    #[test]
    fn test_unspliced_islands_produce_novel_gap_flag() {
        let genome = reference(600);
        // Two unspliced reads on separate islands: the stitched skip matches
        // no observed junction.
        let mut reads = vec![
            read(100, "20M", &genome[100..120].to_vec()),
            read(100, "20M", &genome[100..120].to_vec()),
            read(200, "20M", &genome[200..220].to_vec()),
            read(200, "20M", &genome[200..220].to_vec()),
        ];
        let out = collapse(&mut reads, &genome);
        let rec = &out[0];
        assert_eq!(rec.cigar, parse_cigar_string("20M80N20M"));
        assert_eq!(rec.gap_flags, "1");
        assert!(rec.splices.is_empty());
    }

    #[test]
    fn test_non_collapsible_group_is_counted_not_errored() {
        let genome = reference(600);
        let mut reads = vec![
            read(100, "20M300N20M", &genome[100..140].to_vec()),
            read(200, "20M", &genome[200..220].to_vec()),
        ];
        let mut worker = CollapseWorker::new();
        let mut out = Vec::new();
        worker.process_range(&mut reads, &genome, &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(worker.metrics().ambiguous_groups, 1);
        assert_eq!(worker.metrics().lost_reads, 2);
        assert_eq!(worker.metrics().collapsed_groups, 0);
    }

    #[test]
    fn test_provenance_one_entry_per_read() {
        let genome = reference(600);
        let exon1: Vec<u8> = genome[100..130].to_vec();
        let exon2: Vec<u8> = genome[330..350].to_vec();
        let mut spliced = exon1.clone();
        spliced.extend_from_slice(&exon2);
        // The spliced read lands contigs in both islands but is reported once.
        let mut reads = vec![
            read(100, "30M200N20M", &spliced),
            read(100, "30M200N20M", &spliced),
            read(330, "20M", &exon2),
        ];
        let out = collapse(&mut reads, &genome);
        let rec = &out[0];
        let entries: Vec<&str> = rec.provenance.split(';').collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().filter(|e| e.starts_with("100,349,")).count(), 2);
        assert_eq!(entries.iter().filter(|e| e.starts_with("330,349,")).count(), 1);
        assert_eq!(rec.total_reads, 3);
    }

    #[test]
    fn test_deletions_and_insertions_count_as_mismatches() {
        let genome = reference(400);
        let mut bases: Vec<u8> = genome[100..110].to_vec();
        bases.extend_from_slice(b"GG");
        bases.extend_from_slice(&genome[110..120]);
        bases.extend_from_slice(&genome[123..133]);
        // 10M 2I 10M 3D 10M
        let mut reads = vec![
            read(100, "10M2I10M3D10M", &bases),
            read(100, "10M2I10M3D10M", &bases),
        ];
        let out = collapse(&mut reads, &genome);
        let rec = &out[0];
        assert_eq!(rec.cigar, parse_cigar_string("10M2I10M3D10M"));
        assert_eq!(rec.mismatches, 2 + 3);
        // Coverage columns: 30 matches + 2 inserted + 3 deleted.
        let pairs = decode_coverage_tag(&rec.coverage_tag).unwrap();
        assert_eq!(decode_at(&pairs, 34).unwrap().unpack(), (2, 2));
        assert_eq!(decode_at(&pairs, 35), None);
    }

    #[test]
    fn test_groups_split_by_umi() {
        let genome = reference(400);
        let bases: Vec<u8> = genome[100..120].to_vec();
        let mut reads = vec![
            read(100, "20M", &bases).with_group(1, 1, 7),
            read(100, "20M", &bases).with_group(1, 1, 7),
            read(100, "20M", &bases).with_group(1, 1, 9),
        ];
        let out = collapse(&mut reads, &genome);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].umi, 7);
        assert_eq!(out[0].total_reads, 2);
        assert_eq!(out[1].umi, 9);
        assert_eq!(out[1].total_reads, 1);
    }

    #[test]
    fn test_duplicate_flag_counted() {
        let genome = reference(400);
        let bases: Vec<u8> = genome[100..120].to_vec();
        let mut dup = read(100, "20M", &bases);
        dup.duplicate = true;
        let mut reads = vec![read(100, "20M", &bases), dup];
        let out = collapse(&mut reads, &genome);
        assert_eq!(out[0].duplicates, 1);
        assert_eq!(out[0].total_reads, 2);
    }

    #[test]
    fn test_file_filtered_range_skips_other_files() {
        let genome = reference(400);
        let bases: Vec<u8> = genome[100..120].to_vec();
        let mut reads = vec![read(100, "20M", &bases); 3];
        reads[2].file_number = 1;

        let mut worker = CollapseWorker::new();
        let mut out = Vec::new();
        worker.process_file_range(&mut reads, &genome, 0, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total_reads, 2);
        assert_eq!(out[0].file_number, 0);
        assert_eq!(worker.metrics().input_reads, 2);
        // The skipped read is untouched and still available to a later pass.
        assert!(!reads[2].processed);

        worker.process_file_range(&mut reads, &genome, 1, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].total_reads, 1);
        assert_eq!(out[1].file_number, 1);
    }

    #[test]
    fn test_round_filtered_range_selects_one_round() {
        let genome = reference(400);
        let bases: Vec<u8> = genome[100..120].to_vec();
        let mut reads = vec![read(100, "20M", &bases); 4];
        reads[0].round = 2;
        reads[1].round = 2;
        reads[2].round = 2;
        reads[3].round = 5;

        let mut worker = CollapseWorker::new();
        let mut out = Vec::new();
        worker.process_round_range(&mut reads, &genome, 2, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total_reads, 3);
        assert_eq!(worker.metrics().groups, 1);
        assert_eq!(worker.metrics().input_reads, 3);

        // A round nobody was assigned to produces nothing.
        worker.process_round_range(&mut reads, &genome, 9, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(worker.metrics().groups, 1);
    }

    #[test]
    fn test_repeated_pass_rebuilds_provenance() {
        let genome = reference(400);
        let bases: Vec<u8> = genome[100..150].to_vec();
        let mut reads = vec![read(100, "50M", &bases), read(100, "50M", &bases)];

        let mut worker = CollapseWorker::new();
        let mut out = Vec::new();
        worker.process_range(&mut reads, &genome, &mut out).unwrap();
        worker.process_range(&mut reads, &genome, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        // Flags set by the first pass are cleared, not carried over.
        assert_eq!(out[0].provenance, out[1].provenance);
        assert_eq!(out[1].provenance.split(';').count(), 2);
        assert_eq!(out[1].total_reads, 2);
    }
}
