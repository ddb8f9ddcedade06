//! Packed per-base coverage counts and their run-length-encoded wire format.
//!
//! Each collapsed base carries two bounded counts: how many raw reads support
//! the consensus symbol at that column, and how many raw reads covered the
//! column at all. Both fit comfortably in 16 bits for any realistic UMI group,
//! so the pair is packed into one `u32` and the per-base array is run-length
//! encoded before being written to the output record's coverage tag.
//!
//! The decode side never materializes the full per-base array: lookups walk
//! the run list, and [`CoverageCursor`] caches the walk position so that a
//! forward scan over many positions stays linear in the number of runs.

use crate::errors::{CollapseError, Result};

/// Maximum value either packed count may take.
pub const MAX_COUNT: u32 = u16::MAX as u32;

/// Two bounded per-base counts packed into one 32-bit word.
///
/// Layout convention, fixed between encoder and decoder: the *support* count
/// occupies the upper 16 bits and the *total* count the lower 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PackedCoverage(u32);

impl PackedCoverage {
    /// Packs a support/total pair, rejecting counts outside the 16-bit range
    /// or a support count exceeding its total.
    pub fn pack(support: u32, total: u32) -> Result<Self> {
        if support > total {
            return Err(CollapseError::SupportExceedsTotal { support, total });
        }
        if total > MAX_COUNT {
            return Err(CollapseError::CoverageOverflow { support, total, max: MAX_COUNT });
        }
        Ok(Self((support << 16) | total))
    }

    /// Reinterprets a raw word (e.g. read back from a tag) as packed coverage.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw packed word.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Number of reads supporting the consensus symbol.
    #[must_use]
    pub const fn support(self) -> u32 {
        self.0 >> 16
    }

    /// Total number of reads covering the column.
    #[must_use]
    pub const fn total(self) -> u32 {
        self.0 & 0xFFFF
    }

    /// Unpacks into `(support, total)`.
    #[must_use]
    pub const fn unpack(self) -> (u32, u32) {
        (self.support(), self.total())
    }
}

/// Run-length encodes a sequence of packed coverage values.
///
/// Adjacent emitted pairs never share a value and the repeat counts sum to the
/// input length. Empty input yields empty output.
#[must_use]
pub fn encode_rle(values: &[PackedCoverage]) -> Vec<(PackedCoverage, u32)> {
    let mut pairs: Vec<(PackedCoverage, u32)> = Vec::new();
    for &value in values {
        match pairs.last_mut() {
            Some((prev, count)) if *prev == value => *count += 1,
            _ => pairs.push((value, 1)),
        }
    }
    pairs
}

/// Decodes the value covering `index` from a run list.
///
/// Walks pairs accumulating repeat counts until the running total strictly
/// exceeds `index`; returns `None` if the stream ends first. O(runs up to the
/// target), never materializes the full array.
#[must_use]
pub fn decode_at(pairs: &[(PackedCoverage, u32)], index: u32) -> Option<PackedCoverage> {
    let mut covered: u32 = 0;
    for &(value, count) in pairs {
        covered += count;
        if covered > index {
            return Some(value);
        }
    }
    None
}

/// Incremental decoder over a run list.
///
/// Repeated lookups at non-decreasing indices resume from the cached walk
/// position; a backward query restarts from the front, so arbitrary access
/// stays correct, just slower.
#[derive(Debug)]
pub struct CoverageCursor<'a> {
    pairs: &'a [(PackedCoverage, u32)],
    /// Index of the run the cursor is parked on
    run: usize,
    /// Sum of repeat counts of all runs before `run`
    covered: u32,
}

impl<'a> CoverageCursor<'a> {
    /// Creates a cursor parked at the start of the stream.
    #[must_use]
    pub fn new(pairs: &'a [(PackedCoverage, u32)]) -> Self {
        Self { pairs, run: 0, covered: 0 }
    }

    /// Returns the value covering `index`, or `None` past the end.
    pub fn at(&mut self, index: u32) -> Option<PackedCoverage> {
        if index < self.covered {
            self.run = 0;
            self.covered = 0;
        }
        while let Some(&(_, count)) = self.pairs.get(self.run) {
            if self.covered + count > index {
                return Some(self.pairs[self.run].0);
            }
            self.covered += count;
            self.run += 1;
        }
        None
    }
}

/// BAM aux array subtype for unsigned 32-bit integers.
const SUBTYPE_U32: u8 = b'I';

/// Serializes per-base coverage into the coverage tag's value bytes.
///
/// Wire format: `[b'I'][u32 LE word count][count x u32 LE]` where the words
/// are the flattened `(value, repeat)` run pairs, so the word count is always
/// even.
#[must_use]
pub fn encode_coverage_tag(values: &[PackedCoverage]) -> Vec<u8> {
    let pairs = encode_rle(values);
    let words = pairs.len() * 2;
    let mut bytes = Vec::with_capacity(5 + words * 4);
    bytes.push(SUBTYPE_U32);
    bytes.extend_from_slice(&(words as u32).to_le_bytes());
    for (value, count) in pairs {
        bytes.extend_from_slice(&value.raw().to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
    }
    bytes
}

/// Deserializes a coverage tag back into its run pairs.
///
/// An odd word count means the upstream record is corrupt and is a hard
/// error, as are a wrong array subtype or truncated payload.
pub fn decode_coverage_tag(bytes: &[u8]) -> Result<Vec<(PackedCoverage, u32)>> {
    if bytes.len() < 5 {
        return Err(CollapseError::MalformedCoverageTag {
            reason: format!("tag too short: {} bytes", bytes.len()),
        });
    }
    if bytes[0] != SUBTYPE_U32 {
        return Err(CollapseError::MalformedCoverageTag {
            reason: format!("expected array subtype 'I', found '{}'", bytes[0] as char),
        });
    }
    let words = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if words % 2 != 0 {
        return Err(CollapseError::MalformedCoverageTag {
            reason: format!("odd number of words: {words}"),
        });
    }
    let payload = &bytes[5..];
    if payload.len() != words * 4 {
        return Err(CollapseError::MalformedCoverageTag {
            reason: format!("expected {} payload bytes, found {}", words * 4, payload.len()),
        });
    }

    let mut pairs = Vec::with_capacity(words / 2);
    for chunk in payload.chunks_exact(8) {
        let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let count = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        pairs.push((PackedCoverage::from_raw(value), count));
    }
    Ok(pairs)
}
