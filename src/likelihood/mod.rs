// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Read versus haplotype likelihoods.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use bio::stats::pairhmm::PairHMM;
use bio::stats::{LogProb, Prob};
use ndarray::Array2;

use crate::active_regions::ActiveRegion;
use crate::assembly::Haplotype;
use crate::constants::{LN_10, PROB_GAP_EXTEND, PROB_GAP_OPEN};
use crate::reads::downsampling::Downsampler;
use crate::reads::AlignedRead;

pub mod pairhmm;

pub use pairhmm::{GapParams, ReadEmission, ReadVsHaplotypeEmission};

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct LikelihoodConfig {
    pub max_reads_per_region: usize,
    pub prob_gap_open: f64,
    pub prob_gap_extend: f64,
    /// Natural log penalty below the best haplotype at which read likelihoods are capped.
    pub max_read_mismatch_log_penalty: f64,
    /// Base qualities are raised to at least this value.
    pub min_base_quality: u8,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        LikelihoodConfig {
            max_reads_per_region: 1000,
            prob_gap_open: *PROB_GAP_OPEN,
            prob_gap_extend: *PROB_GAP_EXTEND,
            max_read_mismatch_log_penalty: 4.5 * LN_10,
            min_base_quality: 6,
        }
    }
}

/// A read clipped to the padded span of its region.
#[derive(Debug, Clone, Getters, new)]
#[getset(get = "pub")]
pub struct ClippedRead {
    read: Arc<AlignedRead>,
    /// Offsets of the read that were kept.
    range: Range<usize>,
}

/// Likelihoods of the reads of one sample (rows) given each haplotype (columns).
#[derive(Debug, Clone, Getters, new)]
#[getset(get = "pub")]
pub struct LikelihoodMatrix {
    sample: String,
    reads: Vec<ClippedRead>,
    values: Array2<LogProb>,
}

impl LikelihoodMatrix {
    pub fn n_reads(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_haplotypes(&self) -> usize {
        self.values.ncols()
    }

    /// Normalize a row into a distribution over haplotypes.
    pub fn posterior_row(&self, read: usize) -> Vec<LogProb> {
        let row = self.values.row(read).to_vec();
        let total = LogProb::ln_sum_exp(&row);
        row.into_iter().map(|p| p - total).collect()
    }
}

#[derive(Debug)]
pub struct LikelihoodEngine {
    config: LikelihoodConfig,
    downsampler: Downsampler,
    gap_params: GapParams,
}

impl LikelihoodEngine {
    pub fn new(config: LikelihoodConfig, seed: u64) -> Self {
        let downsampler = Downsampler::new(seed, config.max_reads_per_region);
        let gap_params = GapParams::new(Prob(config.prob_gap_open), Prob(config.prob_gap_extend));
        LikelihoodEngine {
            config,
            downsampler,
            gap_params,
        }
    }

    /// Compute one matrix per sample of the region.
    pub fn compute(
        &self,
        region: &ActiveRegion,
        haplotypes: &[Haplotype],
    ) -> BTreeMap<String, LikelihoodMatrix> {
        let window = region.padded_span();
        let mut hmm = PairHMM::new(&self.gap_params);
        region
            .reads()
            .iter()
            .map(|(sample, reads)| {
                let clipped: Vec<ClippedRead> = reads
                    .iter()
                    .filter_map(|read| {
                        read.clipped_range(window)
                            .map(|range| ClippedRead::new(Arc::clone(read), range))
                    })
                    .collect();
                let clipped =
                    self.downsampler
                        .downsample(region.contig(), region.span().start, &clipped);
                let values = self.matrix(&mut hmm, &clipped, haplotypes);
                (
                    sample.clone(),
                    LikelihoodMatrix::new(sample.clone(), clipped, values),
                )
            })
            .collect()
    }

    fn matrix(
        &self,
        hmm: &mut PairHMM,
        reads: &[ClippedRead],
        haplotypes: &[Haplotype],
    ) -> Array2<LogProb> {
        let mut values = Array2::from_elem((reads.len(), haplotypes.len()), LogProb::ln_zero());
        for (r, clipped) in reads.iter().enumerate() {
            let range = clipped.range.clone();
            let bases = clipped.read.seq()[range.clone()].to_ascii_uppercase();
            let quals: Vec<u8> = clipped.read.qual()[range]
                .iter()
                .map(|q| (*q).max(self.config.min_base_quality))
                .collect();
            let read = ReadEmission::new(&bases, &quals);
            for (h, haplotype) in haplotypes.iter().enumerate() {
                let emission = ReadVsHaplotypeEmission::new(&read, haplotype.bases());
                values[[r, h]] = if emission.is_exact_match() {
                    // all other alignments are much worse
                    read.certainty_est()
                } else {
                    hmm.prob_related(&emission, &self.gap_params, None)
                };
            }
        }
        cap_likelihoods(&mut values, self.config.max_read_mismatch_log_penalty);
        values
    }
}

/// Raise every likelihood to at least the best one of its row minus `penalty`.
/// Rows without any finite value become uniform.
pub fn cap_likelihoods(values: &mut Array2<LogProb>, penalty: f64) {
    for mut row in values.rows_mut() {
        let best = row.iter().cloned().fold(f64::NEG_INFINITY, |a, b| a.max(*b));
        if best == f64::NEG_INFINITY {
            row.fill(LogProb::ln_one());
            continue;
        }
        let floor = LogProb(best - penalty);
        for v in row.iter_mut() {
            if *v < floor {
                *v = floor;
            }
        }
    }
}
