// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Synthetic references, donor genomes and reads.

use std::collections::HashMap;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use oncocaller::calling::{CallSet, Caller, CallerConfig};
use oncocaller::reads::{AlignedRead, Cigar, CigarString, PairOrientation, SampleRole, Strand};
use oncocaller::reference::Reference;
use oncocaller::variants::{AlleleCall, CallRecord, ForcedAllele};

pub(crate) const READ_LEN: usize = 100;
pub(crate) const QUAL: u8 = 35;

pub(crate) fn random_sequence(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| *b"ACGT".choose(&mut rng).unwrap())
        .collect()
}

pub(crate) fn reference(contig: &str, seq: &[u8]) -> Reference {
    let mut reference = Reference::default();
    reference.insert(contig, seq.to_vec());
    reference
}

/// A base different from the given one.
pub(crate) fn other_base(base: u8, shift: usize) -> u8 {
    let bases = b"ACGT";
    let i = bases.iter().position(|b| *b == base).unwrap();
    bases[(i + shift) % 4]
}

/// A genome derived from the reference by applying non-overlapping variants.
pub(crate) struct Donor {
    seq: Vec<u8>,
    /// Reference position of every donor base, `None` for inserted bases.
    ref_pos: Vec<Option<u64>>,
}

impl Donor {
    /// Variants are given as (0-based position, ref, alt), sorted by position.
    pub(crate) fn new(reference: &[u8], variants: &[(u64, Vec<u8>, Vec<u8>)]) -> Self {
        let mut seq = Vec::new();
        let mut ref_pos = Vec::new();
        let mut cursor = 0;
        for (pos, ref_allele, alt_allele) in variants {
            let pos = *pos as usize;
            assert_eq!(&reference[pos..pos + ref_allele.len()], &ref_allele[..]);
            for p in cursor..pos {
                seq.push(reference[p]);
                ref_pos.push(Some(p as u64));
            }
            let shared = ref_allele.len().min(alt_allele.len());
            for (i, base) in alt_allele.iter().enumerate() {
                seq.push(*base);
                ref_pos.push(if i < shared {
                    Some((pos + i) as u64)
                } else {
                    None
                });
            }
            cursor = pos + ref_allele.len();
        }
        for p in cursor..reference.len() {
            seq.push(reference[p]);
            ref_pos.push(Some(p as u64));
        }
        Donor { seq, ref_pos }
    }

    fn read(&self, name: String, sample: &str, contig: &str, start: usize, i: usize) -> Option<AlignedRead> {
        let end = start + READ_LEN;
        if end > self.seq.len() {
            return None;
        }
        let positions = &self.ref_pos[start..end];
        let first = positions[0]?;
        positions[READ_LEN - 1]?;

        let mut cigar: Vec<Cigar> = Vec::new();
        let mut push = |op: Cigar| match (cigar.last_mut(), op) {
            (Some(Cigar::Match(l)), Cigar::Match(n)) => *l += n,
            (Some(Cigar::Ins(l)), Cigar::Ins(n)) => *l += n,
            _ => cigar.push(op),
        };
        let mut last: Option<u64> = None;
        for pos in positions {
            match pos {
                Some(pos) => {
                    if let Some(last) = last {
                        if *pos > last + 1 {
                            push(Cigar::Del((*pos - last - 1) as u32));
                        }
                    }
                    push(Cigar::Match(1));
                    last = Some(*pos);
                }
                None => push(Cigar::Ins(1)),
            }
        }

        let strand = if i % 2 == 0 {
            Strand::Forward
        } else {
            Strand::Reverse
        };
        let orientation = if (i / 2) % 2 == 0 {
            PairOrientation::F1R2
        } else {
            PairOrientation::F2R1
        };
        Some(AlignedRead::new(
            name,
            sample.to_owned(),
            contig.to_owned(),
            first,
            self.seq[start..end].to_vec(),
            vec![QUAL; READ_LEN],
            CigarString(cigar),
            60,
            strand,
            orientation,
        ))
    }

    /// Reads tiling the donor every `step` bases, beginning at `offset`.
    pub(crate) fn reads(
        &self,
        contig: &str,
        sample: &str,
        prefix: &str,
        step: usize,
        offset: usize,
    ) -> Vec<AlignedRead> {
        (offset..self.seq.len())
            .step_by(step)
            .enumerate()
            .filter_map(|(i, start)| {
                self.read(format!("{}{}", prefix, i), sample, contig, start, i)
            })
            .collect()
    }
}

pub(crate) fn tumor_only() -> HashMap<String, SampleRole> {
    vec![("tumor".to_owned(), SampleRole::Tumor)]
        .into_iter()
        .collect()
}

pub(crate) fn tumor_normal() -> HashMap<String, SampleRole> {
    vec![
        ("tumor".to_owned(), SampleRole::Tumor),
        ("normal".to_owned(), SampleRole::Normal),
    ]
    .into_iter()
    .collect()
}

pub(crate) fn call(
    config: CallerConfig,
    reference: &Reference,
    reads: Vec<AlignedRead>,
    forced: Vec<ForcedAllele>,
) -> Result<CallSet> {
    Caller::new(config, reference, tumor_only())?
        .with_forced_alleles(forced)?
        .call(reads, &[])
}

pub(crate) fn variants(callset: &CallSet) -> Vec<&AlleleCall> {
    callset
        .records()
        .iter()
        .filter_map(CallRecord::as_variant)
        .collect()
}

/// Tumor reads of a mixture of donors, each present at roughly `1 / step` of the coverage.
pub(crate) fn mixture(contig: &str, donors: &[(&Donor, usize, usize)]) -> Vec<AlignedRead> {
    donors
        .iter()
        .enumerate()
        .flat_map(|(d, (donor, step, offset))| {
            donor.reads(contig, "tumor", &format!("d{}r", d), *step, *offset)
        })
        .collect()
}
