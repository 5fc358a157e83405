// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Aligned reads as consumed by the calling core.

use std::convert::TryFrom;
use std::ops::Range;

use anyhow::Result;
pub use rust_htslib::bam::record::{Cigar, CigarString, CigarStringView};

use crate::errors::Error;

pub mod downsampling;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum Strand {
    #[strum(serialize = "+")]
    #[serde(rename = "+")]
    Forward,
    #[strum(serialize = "-")]
    #[serde(rename = "-")]
    Reverse,
}

/// Orientation of the read pair a read stems from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum PairOrientation {
    F1R2,
    F2R1,
    #[strum(serialize = "unpaired")]
    #[serde(rename = "unpaired")]
    Unpaired,
}

impl Default for PairOrientation {
    fn default() -> Self {
        PairOrientation::Unpaired
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
pub enum SampleRole {
    Tumor,
    Normal,
}

/// Parse a SAM style CIGAR string like `50M1I49M`.
pub fn parse_cigar(cigar: &str) -> Result<CigarString> {
    Ok(
        CigarString::try_from(cigar).map_err(|_| Error::InvalidCigarOperation {
            op: cigar.to_owned(),
        })?,
    )
}

fn consumes_ref(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Del(_) | Cigar::RefSkip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

fn consumes_read(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Ins(_) | Cigar::SoftClip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

mod cigar_serde {
    use std::convert::TryFrom;

    use super::CigarString;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(cigar: &CigarString, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(cigar)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<CigarString, D::Error> {
        let raw = String::deserialize(d)?;
        CigarString::try_from(raw.as_str()).map_err(serde::de::Error::custom)
    }
}

/// An aligned read. Positions are 0-based, `start` is the first reference position
/// consumed by the alignment (soft clips excluded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, CopyGetters, new)]
pub struct AlignedRead {
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    sample: String,
    #[getset(get = "pub")]
    contig: String,
    #[getset(get_copy = "pub")]
    start: u64,
    #[serde(with = "crate::utils::seq_serde")]
    #[getset(get = "pub")]
    seq: Vec<u8>,
    #[getset(get = "pub")]
    qual: Vec<u8>,
    #[serde(with = "cigar_serde")]
    #[getset(get = "pub")]
    cigar: CigarString,
    #[getset(get_copy = "pub")]
    mapq: u8,
    #[getset(get_copy = "pub")]
    strand: Strand,
    #[serde(default)]
    #[getset(get_copy = "pub")]
    orientation: PairOrientation,
    /// Contig of the original alignment if the read was moved from another contig.
    #[serde(default)]
    #[new(default)]
    #[getset(get = "pub")]
    original_contig: Option<String>,
}

/// One step of walking an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignedPair {
    /// Read base aligned against a reference base.
    Aligned { offset: usize, ref_pos: u64 },
    /// Read base inserted after the given reference position (None before the first aligned base).
    Inserted {
        offset: usize,
        after: Option<u64>,
    },
    /// Reference base deleted (or skipped) in the read.
    Deleted { ref_pos: u64 },
    SoftClipped { offset: usize },
}

impl AlignedRead {
    pub fn with_original_contig(mut self, contig: Option<String>) -> Self {
        self.original_contig = contig;
        self
    }

    /// Number of reference bases consumed by the alignment.
    pub fn ref_len(&self) -> u64 {
        self.cigar
            .iter()
            .filter(|op| consumes_ref(op))
            .map(|op| op.len() as u64)
            .sum()
    }

    /// Exclusive end of the alignment on the reference.
    pub fn end(&self) -> u64 {
        self.start + self.ref_len()
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn overlaps(&self, contig: &str, range: &Range<u64>) -> bool {
        self.contig == contig && self.start < range.end && self.end() > range.start
    }

    /// Walk the alignment.
    pub fn aligned_pairs(&self) -> Vec<AlignedPair> {
        let mut pairs = Vec::with_capacity(self.seq.len());
        let mut offset = 0;
        let mut ref_pos = self.start;
        let mut last_ref = None;
        for op in self.cigar.iter() {
            let l = op.len();
            match op {
                Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) => {
                    for _ in 0..l {
                        pairs.push(AlignedPair::Aligned { offset, ref_pos });
                        last_ref = Some(ref_pos);
                        offset += 1;
                        ref_pos += 1;
                    }
                }
                Cigar::Ins(_) => {
                    for _ in 0..l {
                        pairs.push(AlignedPair::Inserted {
                            offset,
                            after: last_ref,
                        });
                        offset += 1;
                    }
                }
                Cigar::Del(_) | Cigar::RefSkip(_) => {
                    for _ in 0..l {
                        pairs.push(AlignedPair::Deleted { ref_pos });
                        last_ref = Some(ref_pos);
                        ref_pos += 1;
                    }
                }
                Cigar::SoftClip(_) => {
                    for _ in 0..l {
                        pairs.push(AlignedPair::SoftClipped { offset });
                        offset += 1;
                    }
                }
                Cigar::HardClip(_) | Cigar::Pad(_) => (),
            }
        }
        pairs
    }

    /// The CIGAR anchored at the alignment start.
    pub fn cigar_view(&self) -> CigarStringView {
        CigarStringView::new(self.cigar.clone(), self.start as i64)
    }

    /// Read offset of the base aligned to the given reference position, if any.
    /// Offsets count soft clipped bases.
    pub fn read_offset_at(&self, pos: u64) -> Option<usize> {
        if pos < self.start || pos >= self.end() {
            return None;
        }
        self.cigar_view()
            .read_pos(pos as u32, true, false)
            .ok()
            .flatten()
            .map(|offset| offset as usize)
    }

    /// Base and quality aligned to the given reference position.
    pub fn base_at(&self, pos: u64) -> Option<(u8, u8)> {
        self.read_offset_at(pos)
            .map(|offset| (self.seq[offset].to_ascii_uppercase(), self.qual[offset]))
    }

    /// Range of read offsets whose alignment falls into the given reference window.
    /// Soft clipped bases are excluded, inserted bases are kept if anchored inside the window.
    pub fn clipped_range(&self, window: &Range<u64>) -> Option<Range<usize>> {
        let mut first = None;
        let mut last = None;
        for pair in self.aligned_pairs() {
            let keep = match pair {
                AlignedPair::Aligned { offset, ref_pos } if window.contains(&ref_pos) => {
                    Some(offset)
                }
                AlignedPair::Inserted {
                    offset,
                    after: Some(after),
                } if window.contains(&after) && after + 1 < window.end => Some(offset),
                _ => None,
            };
            if let Some(offset) = keep {
                if first.is_none() {
                    first = Some(offset);
                }
                last = Some(offset);
            }
        }
        match (first, last) {
            (Some(first), Some(last)) => Some(first..last + 1),
            _ => None,
        }
    }

    /// Distance of the given read offset from the closest read end.
    pub fn distance_from_end(&self, offset: usize) -> usize {
        offset.min(self.seq.len().saturating_sub(offset + 1))
    }

    pub(crate) fn has_original_contig_mismatch(&self) -> bool {
        self.original_contig
            .as_ref()
            .map_or(false, |contig| *contig != self.contig)
    }

    /// Soft clip the part of the alignment that extends past the end of a contig of the given
    /// length, as happens for reads wrapping around the origin of a circular contig.
    /// Returns `None` if nothing of the alignment is left.
    pub fn clamp_to_contig(mut self, len: u64) -> Option<AlignedRead> {
        if self.end() <= len {
            return Some(self);
        }
        if self.start >= len {
            return None;
        }
        let mut ops = Vec::with_capacity(self.cigar.len() + 1);
        let mut clipped = 0;
        let mut hard_clip = None;
        let mut ref_pos = self.start;
        for op in self.cigar.iter() {
            let l = op.len();
            let remaining = len.saturating_sub(ref_pos) as u32;
            match op {
                Cigar::HardClip(_) if !ops.is_empty() => hard_clip = Some(*op),
                Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) => {
                    if remaining > 0 {
                        let kept = l.min(remaining);
                        ops.push(match op {
                            Cigar::Equal(_) => Cigar::Equal(kept),
                            Cigar::Diff(_) => Cigar::Diff(kept),
                            _ => Cigar::Match(kept),
                        });
                    }
                    clipped += l - l.min(remaining);
                    ref_pos += l as u64;
                }
                Cigar::Del(_) | Cigar::RefSkip(_) => {
                    if remaining > 0 {
                        ops.push(*op);
                    }
                    ref_pos += l as u64;
                }
                Cigar::Ins(_) | Cigar::SoftClip(_) if remaining == 0 => clipped += l,
                _ => ops.push(*op),
            }
        }
        // the clipped alignment has to end with an aligned base
        while let Some(last) = ops.last() {
            match last {
                Cigar::Del(_) | Cigar::RefSkip(_) => {
                    ops.pop();
                }
                Cigar::Ins(l) | Cigar::SoftClip(l) => {
                    clipped += l;
                    ops.pop();
                }
                _ => break,
            }
        }
        if !ops.iter().any(|op| consumes_ref(op)) {
            return None;
        }
        if clipped > 0 {
            ops.push(Cigar::SoftClip(clipped));
        }
        ops.extend(hard_clip);
        self.cigar = CigarString(ops);
        Some(self)
    }

    /// Consistency checks that have to hold before a read enters the core.
    pub fn validate(&self) -> Result<()> {
        let read_len: u64 = self
            .cigar
            .iter()
            .filter(|op| consumes_read(op))
            .map(|op| op.len() as u64)
            .sum();
        if read_len != self.seq.len() as u64 {
            return Err(Error::InvalidRead {
                name: self.name.clone(),
                msg: format!(
                    "CIGAR covers {} bases but the sequence has {}",
                    read_len,
                    self.seq.len()
                ),
            }
            .into());
        }
        if self.qual.len() != self.seq.len() {
            return Err(Error::InvalidRead {
                name: self.name.clone(),
                msg: "quality and sequence lengths differ".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// Filter for reads that cannot contribute to calling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, new)]
pub struct ReadFilter {
    min_mapq: u8,
}

impl Default for ReadFilter {
    fn default() -> Self {
        ReadFilter { min_mapq: 20 }
    }
}

impl ReadFilter {
    pub fn is_usable(&self, read: &AlignedRead) -> bool {
        !read.is_empty() && read.mapq >= self.min_mapq && read.ref_len() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn read(start: u64, seq: &[u8], cigar: &str) -> AlignedRead {
        AlignedRead::new(
            "r1".to_owned(),
            "tumor".to_owned(),
            "chr1".to_owned(),
            start,
            seq.to_vec(),
            vec![30; seq.len()],
            parse_cigar(cigar).unwrap(),
            60,
            Strand::Forward,
            PairOrientation::F1R2,
        )
    }

    #[test]
    fn test_parse_cigar() {
        let cigar = parse_cigar("2S10M1I3D5M").unwrap();
        assert_eq!(
            cigar,
            CigarString(vec![
                Cigar::SoftClip(2),
                Cigar::Match(10),
                Cigar::Ins(1),
                Cigar::Del(3),
                Cigar::Match(5)
            ])
        );
        assert_eq!(cigar.to_string(), "2S10M1I3D5M");
        assert!(parse_cigar("10Q").is_err());
    }

    #[test]
    fn test_end_and_offsets() {
        let r = read(100, b"AACCCGGTTTA", "2S3M1I2D5M");
        assert_eq!(r.end(), 110);
        assert_eq!(r.read_offset_at(100), Some(2));
        assert_eq!(r.read_offset_at(102), Some(4));
        assert_eq!(r.read_offset_at(103), None);
        assert_eq!(r.read_offset_at(105), Some(6));
        assert_eq!(r.read_offset_at(110), None);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_clamp_to_contig() {
        // chrM read wrapping around the origin
        let r = read(16560, b"ACGTACGTACGTACGT", "2S10M4S");
        let clamped = r.clamp_to_contig(16569).unwrap();
        assert_eq!(clamped.cigar().to_string(), "2S9M5S");
        assert_eq!(clamped.end(), 16569);
        assert!(clamped.validate().is_ok());

        let r = read(16560, b"ACGTACGTACGT", "5M1I2D6M");
        let clamped = r.clamp_to_contig(16566).unwrap();
        assert_eq!(clamped.cigar().to_string(), "5M7S");
        assert_eq!(clamped.end(), 16565);
        assert!(clamped.validate().is_ok());

        let inside = read(100, b"ACGT", "4M");
        assert_eq!(inside.clone().clamp_to_contig(16569), Some(inside));
        assert_eq!(read(16569, b"ACGT", "4M").clamp_to_contig(16569), None);
    }

    #[test]
    fn test_clipped_range() {
        let r = read(100, b"AACCCGGTTTA", "2S3M1I2D5M");
        assert_eq!(r.clipped_range(&(100..103)), Some(2..5));
        assert_eq!(r.clipped_range(&(100..104)), Some(2..6));
        assert_eq!(r.clipped_range(&(0..50)), None);
    }

    #[test]
    fn test_read_filter() {
        let filter = ReadFilter::default();
        assert!(filter.is_usable(&read(0, b"ACGT", "4M")));
        // consumes no reference bases
        assert!(!filter.is_usable(&read(0, b"ACGT", "4I")));
        assert!(!filter.is_usable(&read(0, b"ACGT", "2S2I")));
    }

    #[test]
    fn test_serde_roundtrip() {
        let r = read(5, b"ACGT", "1S3M");
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"cigar\":\"1S3M\""));
        assert!(json.contains("\"seq\":\"ACGT\""));
        let back: AlignedRead = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
