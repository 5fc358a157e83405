// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use crate::reads::{AlignedPair, AlignedRead};
use crate::utils::{ln_to_log10, prob_error};

/// Reference and alternative observations at a single reference position.
/// Each observation is represented by its error probability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionEvidence {
    pub ref_errors: Vec<f64>,
    pub alt_errors: Vec<f64>,
}

impl PositionEvidence {
    pub fn depth(&self) -> u32 {
        (self.ref_errors.len() + self.alt_errors.len()) as u32
    }

    pub fn alt_count(&self) -> u32 {
        self.alt_errors.len() as u32
    }

    /// Log10 likelihood ratio of the maximum likelihood allele fraction versus fraction zero.
    pub fn log_odds(&self) -> f64 {
        if self.alt_errors.is_empty() {
            return 0.0;
        }
        let f = self.alt_errors.len() as f64 / self.depth() as f64;
        ln_to_log10(self.ln_likelihood(f) - self.ln_likelihood(0.0))
    }

    /// Log likelihood of the observations given that a non-reference allele is present at
    /// fraction `f`. Substitution errors are spread over the three other bases.
    pub fn ln_likelihood(&self, f: f64) -> f64 {
        let alt: f64 = self
            .alt_errors
            .iter()
            .map(|e| (f * (1.0 - e) + (1.0 - f) * e / 3.0).ln())
            .sum();
        let reference: f64 = self
            .ref_errors
            .iter()
            .map(|e| ((1.0 - f) * (1.0 - e) + f * e / 3.0).ln())
            .sum();
        alt + reference
    }
}

/// Parameters of evidence collection.
#[derive(Debug, Clone, Copy, new)]
pub struct PileupParams {
    pub min_base_quality: u8,
    /// Quality assigned to indel and soft clip observations.
    pub indel_quality: u8,
    pub min_soft_clip_len: u32,
}

/// Collect per position evidence over the given window.
///
/// A read contributes at most one observation per position. Indel starts are attributed
/// to the anchoring reference base before the event, soft clips to the adjacent aligned base.
pub fn pileup(
    reads: &[Arc<AlignedRead>],
    reference: &[u8],
    window: &Range<u64>,
    params: &PileupParams,
) -> Vec<PositionEvidence> {
    let len = (window.end - window.start) as usize;
    let mut evidence = vec![PositionEvidence::default(); len];
    let event_error = prob_error(params.indel_quality);

    for read in reads {
        if read.end() <= window.start || read.start() >= window.end {
            continue;
        }
        // None marks a reference observation
        let mut observations: BTreeMap<u64, Option<f64>> = BTreeMap::new();
        let pairs = read.aligned_pairs();
        let mut prev: Option<AlignedPair> = None;
        for pair in &pairs {
            match *pair {
                AlignedPair::Aligned { offset, ref_pos } => {
                    if window.contains(&ref_pos) {
                        let qual = read.qual()[offset];
                        if qual >= params.min_base_quality {
                            let base = read.seq()[offset].to_ascii_uppercase();
                            let ref_base = reference[(ref_pos - window.start) as usize];
                            let obs = if base == ref_base {
                                None
                            } else {
                                Some(prob_error(qual))
                            };
                            observations.entry(ref_pos).or_insert(obs);
                        }
                    }
                }
                AlignedPair::Inserted {
                    after: Some(after), ..
                } => {
                    if !matches!(prev, Some(AlignedPair::Inserted { .. })) {
                        observations.insert(after, Some(event_error));
                    }
                }
                AlignedPair::Deleted { ref_pos } => {
                    if !matches!(prev, Some(AlignedPair::Deleted { .. })) && ref_pos > 0 {
                        observations.insert(ref_pos - 1, Some(event_error));
                    }
                }
                _ => (),
            }
            prev = Some(*pair);
        }
        for (pos, clip_len) in soft_clip_boundaries(read) {
            if clip_len >= params.min_soft_clip_len {
                observations.insert(pos, Some(event_error));
            }
        }

        for (pos, obs) in observations {
            if !window.contains(&pos) {
                continue;
            }
            let e = &mut evidence[(pos - window.start) as usize];
            match obs {
                Some(error) => e.alt_errors.push(error),
                None => e
                    .ref_errors
                    .push(prob_error(read.base_at(pos).map_or(0, |(_, q)| q))),
            }
        }
    }
    evidence
}

/// Reference positions adjacent to leading and trailing soft clips, with the clip lengths.
fn soft_clip_boundaries(read: &AlignedRead) -> Vec<(u64, u32)> {
    use crate::reads::Cigar;
    let mut boundaries = Vec::new();
    if let Some(Cigar::SoftClip(l)) = read.cigar().first() {
        boundaries.push((read.start(), *l));
    }
    if read.cigar().len() > 1 {
        if let Some(Cigar::SoftClip(l)) = read.cigar().last() {
            boundaries.push((read.end().saturating_sub(1), *l));
        }
    }
    boundaries
}
