// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Evidence for an unobserved alternate allele at positions without a call, and the
//! aggregation of such positions into reference blocks.

use std::ops::Range;

use statrs::function::gamma::{digamma, ln_gamma};

use crate::active_regions::PositionEvidence;
use crate::utils::ln_to_log10;
use crate::variants::ReferenceBlock;

/// Log10 odds of some alternate allele being present versus none.
///
/// Without a minimum allele fraction, the allele fraction is integrated out under a uniform
/// prior, using the variational Beta-Bernoulli bound. Otherwise the likelihood ratio is
/// evaluated at the observed fraction, but at least at `min_af`.
pub fn non_ref_log_odds(evidence: &PositionEvidence, min_af: f64) -> f64 {
    if min_af > 0.0 {
        let depth = evidence.depth();
        let observed = if depth > 0 {
            evidence.alt_count() as f64 / depth as f64
        } else {
            0.0
        };
        let f = observed.max(min_af);
        ln_to_log10(evidence.ln_likelihood(f) - evidence.ln_likelihood(0.0))
    } else {
        ln_to_log10(beta_evidence_ratio(
            evidence.ref_errors.len(),
            &evidence.alt_errors,
        ))
    }
}

fn bernoulli_entropy(p: f64) -> f64 {
    let mut h = 0.0;
    if p > 0.0 {
        h -= p * p.ln();
    }
    if p < 1.0 {
        h -= (1.0 - p) * (1.0 - p).ln();
    }
    h
}

/// Natural log evidence ratio of a present alternate allele at a Beta(1, 1) distributed
/// fraction versus its absence.
fn beta_evidence_ratio(n_ref: usize, alt_errors: &[f64]) -> f64 {
    let n_alt = alt_errors.len();
    let n = n_ref + n_alt;
    let f_ratio = (digamma(n_ref as f64 + 1.0) - digamma(n_alt as f64 + 1.0)).exp();
    let reads: f64 = alt_errors
        .iter()
        .map(|e| {
            let z = (1.0 - e) / (1.0 - e + e * f_ratio);
            z * ((1.0 - e).ln() - e.ln()) + bernoulli_entropy(z)
        })
        .sum();
    let beta_entropy =
        ln_gamma(n_alt as f64 + 1.0) + ln_gamma(n_ref as f64 + 1.0) - ln_gamma(n as f64 + 2.0);
    beta_entropy + reads
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefConfidenceState {
    NoCall,
    RefBlock,
    VariantCall,
}

/// Builds reference blocks over the positions of a region, positions covered by a variant
/// call are skipped.
#[derive(Debug, Clone)]
pub struct RefBlockBuilder<'a> {
    contig: &'a str,
    bands: &'a [f64],
    min_af: f64,
    state: RefConfidenceState,
    current: Option<ReferenceBlock>,
    blocks: Vec<ReferenceBlock>,
}

impl<'a> RefBlockBuilder<'a> {
    pub fn new(contig: &'a str, bands: &'a [f64], min_af: f64) -> Self {
        RefBlockBuilder {
            contig,
            bands,
            min_af,
            state: RefConfidenceState::NoCall,
            current: None,
            blocks: Vec::new(),
        }
    }

    /// Band of a log odds value. Bounds are exclusive upper limits.
    pub fn band(&self, log_odds: f64) -> usize {
        self.bands
            .iter()
            .position(|bound| log_odds < *bound)
            .unwrap_or_else(|| self.bands.len())
    }

    pub fn state(&self) -> RefConfidenceState {
        self.state
    }

    fn close(&mut self) {
        if let Some(block) = self.current.take() {
            self.blocks.push(block);
        }
    }

    /// Account for a position without a variant call.
    pub fn reference_position(&mut self, pos: u64, ref_base: u8, evidence: &PositionEvidence) {
        let log_odds = non_ref_log_odds(evidence, self.min_af);
        let depth = evidence.depth();
        let block = ReferenceBlock::new(
            self.contig.to_owned(),
            pos,
            pos + 1,
            ref_base,
            self.band(log_odds),
            log_odds,
            depth,
        );
        let next_state = if depth == 0 {
            RefConfidenceState::NoCall
        } else {
            RefConfidenceState::RefBlock
        };
        let continues = self.current.as_ref().map_or(false, |current| {
            next_state == self.state && current.is_continued_by(&block)
        });
        if continues {
            if let Some(current) = self.current.as_mut() {
                current.extend(&block);
            }
        } else {
            self.close();
            self.current = Some(block);
        }
        self.state = next_state;
    }

    /// Account for a position covered by a variant call.
    pub fn variant_position(&mut self) {
        self.close();
        self.state = RefConfidenceState::VariantCall;
    }

    pub fn finish(mut self) -> Vec<ReferenceBlock> {
        self.close();
        self.blocks
    }
}

/// Reference blocks over `span`, skipping the given variant spans. `ref_bases` and `evidence`
/// start at `span.start`.
pub fn reference_blocks(
    contig: &str,
    span: &Range<u64>,
    ref_bases: &[u8],
    evidence: &[PositionEvidence],
    variant_spans: &[Range<u64>],
    bands: &[f64],
    min_af: f64,
) -> Vec<ReferenceBlock> {
    let mut builder = RefBlockBuilder::new(contig, bands, min_af);
    for pos in span.clone() {
        let i = (pos - span.start) as usize;
        if variant_spans.iter().any(|v| v.contains(&pos)) {
            builder.variant_position();
        } else {
            builder.reference_position(pos, ref_bases[i], &evidence[i]);
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(n_ref: usize, n_alt: usize) -> PositionEvidence {
        PositionEvidence {
            ref_errors: vec![0.001; n_ref],
            alt_errors: vec![0.001; n_alt],
        }
    }

    #[test]
    fn test_non_ref_log_odds() {
        // no alt reads: -log10(n + 1)
        assert_relative_eq!(
            non_ref_log_odds(&evidence(9, 0), 0.0),
            -1.0,
            epsilon = 1e-9
        );
        assert!(non_ref_log_odds(&evidence(20, 10), 0.0) > 5.0);
        assert!(non_ref_log_odds(&evidence(20, 10), 0.01) > 5.0);
        let with_min_af = non_ref_log_odds(&evidence(50, 0), 0.01);
        assert!(with_min_af < 0.0);
        assert!((with_min_af - non_ref_log_odds(&evidence(50, 0), 0.0)).abs() > 0.05);
        assert_relative_eq!(non_ref_log_odds(&evidence(0, 0), 0.0), 0.0);
    }

    #[test]
    fn test_blocks() {
        let bands = vec![-2.5, -0.5, 1.0];
        let mut ev: Vec<PositionEvidence> = (0..10).map(|_| evidence(9, 0)).collect();
        ev[6] = evidence(0, 0);
        ev[7] = evidence(0, 0);
        let blocks = reference_blocks(
            "chrM",
            &(100..110),
            b"ACGTACGTAC",
            &ev,
            &[103..104],
            &bands,
            0.0,
        );
        let spans: Vec<_> = blocks.iter().map(|b| (b.start(), b.end())).collect();
        assert_eq!(spans, vec![(100, 103), (104, 106), (106, 108), (108, 110)]);
        assert_eq!(blocks[0].band(), 1);
        assert_eq!(blocks[0].min_depth(), 9);
        assert_eq!(blocks[2].min_depth(), 0);
        assert_eq!(blocks[0].ref_base(), b'A');
    }

    #[test]
    fn test_band() {
        let bands = vec![-2.5, -0.5, 1.0];
        let builder = RefBlockBuilder::new("chr1", &bands, 0.0);
        assert_eq!(builder.band(-3.0), 0);
        assert_eq!(builder.band(-2.5), 1);
        assert_eq!(builder.band(0.0), 2);
        assert_eq!(builder.band(1.0), 3);
    }
}
