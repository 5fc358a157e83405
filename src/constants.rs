// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::stats::Prob;

// Gap open and continuation probabilities of the read-vs-haplotype pair HMM.
// PHRED 45 gap open, PHRED 10 gap continuation.
pub static PROB_GAP_OPEN: Prob = Prob(3.1622776601683795e-5);
pub static PROB_GAP_EXTEND: Prob = Prob(0.1);

/// Smith-Waterman parameters for aligning haplotypes against the reference window.
pub const SW_MATCH: i32 = 200;
pub const SW_MISMATCH: i32 = -150;
pub const SW_GAP_OPEN: i32 = -260;
pub const SW_GAP_EXTEND: i32 = -11;

/// Symbolic allele representing any allele other than the ones listed.
pub const NON_REF_ALLELE: &str = "<NON_REF>";

/// Maximum base quality taken into account, higher values are capped.
pub const MAX_BASE_QUAL: u8 = 60;

pub const LN_10: f64 = std::f64::consts::LN_10;
