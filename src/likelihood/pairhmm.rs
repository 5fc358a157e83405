// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Parameters of the read (y) versus haplotype (x) pair HMM. The read has to be consumed
//! completely, while the alignment may start and end anywhere on the haplotype.

use bio::stats::pairhmm::{self, XYEmission};
use bio::stats::{LogProb, Prob};

use crate::utils::prob_error;

lazy_static! {
    static ref PROB_CONFUSION: LogProb = LogProb::from(Prob(1.0 / 3.0));
}

/// Gap parameters for the pair HMM.
#[derive(Debug, Clone, Copy)]
pub struct GapParams {
    prob_gap: LogProb,
    prob_gap_extend: LogProb,
}

impl GapParams {
    pub fn new(prob_gap_open: Prob, prob_gap_extend: Prob) -> Self {
        GapParams {
            prob_gap: LogProb::from(prob_gap_open),
            prob_gap_extend: LogProb::from(prob_gap_extend),
        }
    }
}

impl pairhmm::GapParameters for GapParams {
    #[inline]
    fn prob_gap_x(&self) -> LogProb {
        self.prob_gap
    }

    #[inline]
    fn prob_gap_y(&self) -> LogProb {
        self.prob_gap
    }

    #[inline]
    fn prob_gap_x_extend(&self) -> LogProb {
        self.prob_gap_extend
    }

    #[inline]
    fn prob_gap_y_extend(&self) -> LogProb {
        self.prob_gap_extend
    }
}

impl pairhmm::StartEndGapParameters for GapParams {
    /// Semiglobal alignment: return true.
    #[inline]
    fn free_start_gap_x(&self) -> bool {
        true
    }

    /// Semiglobal alignment: return true.
    #[inline]
    fn free_end_gap_x(&self) -> bool {
        true
    }

    #[inline]
    fn prob_start_gap_x(&self, _: usize) -> LogProb {
        LogProb::ln_one()
    }
}

/// Base call error probabilities of a read.
#[derive(Debug)]
pub struct ReadEmission<'a> {
    seq: &'a [u8],
    any_miscall: Vec<LogProb>,
    no_miscall: Vec<LogProb>,
}

impl<'a> ReadEmission<'a> {
    pub fn new(seq: &'a [u8], qual: &[u8]) -> Self {
        let any_miscall: Vec<LogProb> = qual
            .iter()
            .map(|q| LogProb::from(Prob(prob_error(*q))))
            .collect();
        let no_miscall = any_miscall.iter().map(|p| p.ln_one_minus_exp()).collect();
        ReadEmission {
            seq,
            any_miscall,
            no_miscall,
        }
    }

    #[inline]
    fn prob_match_mismatch(&self, j: usize, hap_base: u8) -> XYEmission {
        if self.seq[j] == hap_base.to_ascii_uppercase() {
            XYEmission::Match(self.no_miscall[j])
        } else {
            XYEmission::Mismatch(self.any_miscall[j] + *PROB_CONFUSION)
        }
    }

    /// Probability that none of the bases is miscalled.
    pub fn certainty_est(&self) -> LogProb {
        self.no_miscall.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

/// Emission parameters of a read against a haplotype.
#[derive(Debug, new)]
pub struct ReadVsHaplotypeEmission<'a> {
    read: &'a ReadEmission<'a>,
    haplotype: &'a [u8],
}

impl<'a> ReadVsHaplotypeEmission<'a> {
    /// Whether the read occurs verbatim in the haplotype.
    pub fn is_exact_match(&self) -> bool {
        !self.read.is_empty()
            && self.haplotype.len() >= self.read.len()
            && self
                .haplotype
                .windows(self.read.len())
                .any(|w| w.eq_ignore_ascii_case(self.read.seq))
    }
}

impl<'a> pairhmm::EmissionParameters for ReadVsHaplotypeEmission<'a> {
    #[inline]
    fn prob_emit_xy(&self, i: usize, j: usize) -> XYEmission {
        self.read.prob_match_mismatch(j, self.haplotype[i])
    }

    #[inline]
    fn prob_emit_x(&self, _: usize) -> LogProb {
        LogProb::ln_one()
    }

    #[inline]
    fn prob_emit_y(&self, j: usize) -> LogProb {
        self.read.any_miscall[j]
    }

    #[inline]
    fn len_x(&self) -> usize {
        self.haplotype.len()
    }

    #[inline]
    fn len_y(&self) -> usize {
        self.read.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bio::stats::pairhmm::PairHMM;

    use crate::constants::{PROB_GAP_EXTEND, PROB_GAP_OPEN};

    fn prob(hap: &[u8], read: &[u8]) -> LogProb {
        let gap_params = GapParams::new(PROB_GAP_OPEN, PROB_GAP_EXTEND);
        let qual = vec![30; read.len()];
        let read = ReadEmission::new(read, &qual);
        PairHMM::new(&gap_params).prob_related(
            &ReadVsHaplotypeEmission::new(&read, hap),
            &gap_params,
            None,
        )
    }

    #[test]
    fn test_same() {
        assert!(*prob(b"AGCTCGATCGATCGATC", b"AGCTCGATCGATCGATC") > -0.1);
    }

    #[test]
    fn test_read_within_haplotype() {
        assert!(*prob(b"TTTTAGCTCGATCGATCGATCTTTT", b"AGCTCGATCGATCGATC") > -0.1);
    }

    #[test]
    fn test_insertion() {
        assert!(*prob(b"AGCTCGATCGATCGATC", b"AGCTCGATCTGATCGATC") < -10.0);
    }

    #[test]
    fn test_deletion() {
        assert!(*prob(b"AGCTCGATCTGATCGATC", b"AGCTCGATCGATCGATC") < -10.0);
    }

    #[test]
    fn test_mismatch_monotonicity() {
        let hap = b"AGCTCGATCGATCGATCAGGCTTACG";
        let mut read = hap.to_vec();
        let mut last = prob(hap, &read);
        for pos in &[3, 9, 15, 21] {
            read[*pos] = if read[*pos] == b'A' { b'C' } else { b'A' };
            let p = prob(hap, &read);
            assert!(*p < *last);
            last = p;
        }
    }

    #[test]
    fn test_repeats_stay_finite() {
        for (hap, read) in vec![
            (vec![b'A'; 300], vec![b'A'; 100]),
            (vec![b'A'; 30], vec![b'A'; 10]),
            (b"CA".repeat(150), b"CA".repeat(50)),
        ] {
            let p = prob(&hap, &read);
            assert!(p.is_finite());
            assert!(*p <= 0.0);
        }
    }

    #[test]
    fn test_exact_match() {
        let qual = [30; 4];
        let read = ReadEmission::new(b"GATC", &qual);
        assert!(ReadVsHaplotypeEmission::new(&read, b"AGATCA").is_exact_match());
        assert!(!ReadVsHaplotypeEmission::new(&read, b"AGTTCA").is_exact_match());
    }
}
