// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::stats::{PHREDProb, Prob};
use statrs::function::factorial::ln_binomial;

use crate::constants::{LN_10, MAX_BASE_QUAL};

pub(crate) mod worker_pool;

/// Serialize byte sequences as strings.
pub(crate) mod seq_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(seq: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&String::from_utf8_lossy(seq))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(d)?.into_bytes())
    }
}

lazy_static! {
    static ref ERROR_PROBS: Vec<f64> = (0..=MAX_BASE_QUAL)
        .map(|q| *Prob::from(PHREDProb(q as f64)))
        .collect();
}

/// Error probability of a base with the given PHRED quality.
pub(crate) fn prob_error(qual: u8) -> f64 {
    ERROR_PROBS[qual.min(MAX_BASE_QUAL) as usize]
}

pub(crate) fn ln_to_log10(value: f64) -> f64 {
    value / LN_10
}

pub(crate) fn log10_to_ln(value: f64) -> f64 {
    value * LN_10
}

/// Natural log of the binomial probability mass of `k` successes in `n` trials.
pub(crate) fn ln_binomial_pmf(k: u64, n: u64, p: f64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    if p <= 0.0 {
        return if k == 0 { 0.0 } else { f64::NEG_INFINITY };
    }
    if p >= 1.0 {
        return if k == n { 0.0 } else { f64::NEG_INFINITY };
    }
    ln_binomial(n, k) + k as f64 * p.ln() + (n - k) as f64 * (1.0 - p).ln()
}

/// Median of the given values (upper median for even counts).
pub(crate) fn median<T: Copy + Ord>(values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Some(sorted[sorted.len() / 2])
}

/// Derive a deterministic sub-seed for a genomic position from a global seed.
/// The mixing is splitmix64, so that nearby positions yield unrelated streams.
pub fn derive_seed(global_seed: u64, contig: &str, pos: u64) -> u64 {
    let mut state = global_seed;
    for b in contig.bytes() {
        state = splitmix64(state ^ b as u64);
    }
    splitmix64(state ^ pos)
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prob_error() {
        assert_relative_eq!(prob_error(10), 0.1, epsilon = 1e-12);
        assert_relative_eq!(prob_error(30), 0.001, epsilon = 1e-12);
        assert_relative_eq!(prob_error(200), prob_error(MAX_BASE_QUAL));
    }

    #[test]
    fn test_ln_binomial_pmf() {
        assert_relative_eq!(ln_binomial_pmf(1, 2, 0.5).exp(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(ln_binomial_pmf(0, 10, 0.0), 0.0);
        assert_eq!(ln_binomial_pmf(3, 10, 0.0), f64::NEG_INFINITY);
        assert_eq!(ln_binomial_pmf(11, 10, 0.3), f64::NEG_INFINITY);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3u8, 1, 2]), Some(2));
        assert_eq!(median(&[4u8, 1, 2, 3]), Some(3));
        assert_eq!(median::<u8>(&[]), None);
    }

    #[test]
    fn test_derive_seed() {
        assert_eq!(derive_seed(42, "chr1", 100), derive_seed(42, "chr1", 100));
        assert_ne!(derive_seed(42, "chr1", 100), derive_seed(42, "chr1", 101));
        assert_ne!(derive_seed(42, "chr1", 100), derive_seed(43, "chr1", 100));
        assert_ne!(derive_seed(42, "chr1", 100), derive_seed(42, "chr2", 100));
    }
}
