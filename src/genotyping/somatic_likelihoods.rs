// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Variational Bayes for the allele fractions of a sample with an unknown number of
//! subclones. Allele fractions are Dirichlet distributed, every read stems from one allele.

use bio::stats::LogProb;
use itertools::Itertools;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::utils::ln_to_log10;

const MAX_ITERATIONS: usize = 50;
const CONVERGENCE: f64 = 1e-3;

/// Log likelihoods of reads (outer) given each allele (inner), natural log.
pub type AlleleLikelihoods = Vec<Vec<f64>>;

/// Log normalizing constant of a Dirichlet distribution.
fn ln_dirichlet_normalization(alpha: &[f64]) -> f64 {
    ln_gamma(alpha.iter().sum()) - alpha.iter().map(|a| ln_gamma(*a)).sum::<f64>()
}

fn expected_ln_fractions(alpha: &[f64]) -> Vec<f64> {
    let total = digamma(alpha.iter().sum());
    alpha.iter().map(|a| digamma(*a) - total).collect()
}

/// Responsibilities of each allele for one read.
fn responsibilities(likelihoods: &[f64], expected_ln_f: &[f64]) -> Vec<f64> {
    let unnormalized: Vec<LogProb> = likelihoods
        .iter()
        .zip(expected_ln_f)
        .map(|(l, f)| LogProb(l + f))
        .collect();
    let total = LogProb::ln_sum_exp(&unnormalized);
    unnormalized.iter().map(|p| (**p - *total).exp()).collect()
}

/// Fit of the posterior Dirichlet, returning the posterior pseudocounts.
pub fn posterior_alpha(likelihoods: &[Vec<f64>], prior: &[f64]) -> Vec<f64> {
    let mut alpha = prior.to_vec();
    for _ in 0..MAX_ITERATIONS {
        let expected_ln_f = expected_ln_fractions(&alpha);
        let mut updated = prior.to_vec();
        for read in likelihoods {
            for (a, r) in updated.iter_mut().zip(responsibilities(read, &expected_ln_f)) {
                *a += r;
            }
        }
        let change = updated
            .iter()
            .zip(&alpha)
            .map(|(u, a)| (u - a).abs())
            .fold(0.0, f64::max);
        alpha = updated;
        if change < CONVERGENCE {
            break;
        }
    }
    alpha
}

/// Variational lower bound of the log evidence of the reads.
pub fn ln_evidence(likelihoods: &[Vec<f64>], prior: &[f64]) -> f64 {
    if likelihoods.is_empty() {
        return 0.0;
    }
    let alpha = posterior_alpha(likelihoods, prior);
    let expected_ln_f = expected_ln_fractions(&alpha);

    let read_terms: f64 = likelihoods
        .iter()
        .map(|read| {
            responsibilities(read, &expected_ln_f)
                .into_iter()
                .zip(read.iter().zip(&expected_ln_f))
                .filter(|(r, _)| *r > 0.0)
                .map(|(r, (l, f))| r * (l + f - r.ln()))
                .sum::<f64>()
        })
        .sum();
    let prior_terms: f64 = prior
        .iter()
        .zip(&alpha)
        .zip(&expected_ln_f)
        .map(|((a0, a), f)| (a0 - a) * f)
        .sum();

    ln_dirichlet_normalization(prior) - ln_dirichlet_normalization(&alpha) + read_terms + prior_terms
}

/// Log10 odds of each alternate allele (index 1..) being present, comparing the evidence
/// of the full model against the model without that allele.
pub fn log_odds(likelihoods: &[Vec<f64>], n_alleles: usize) -> Vec<f64> {
    let prior = vec![1.0; n_alleles];
    let full = ln_evidence(likelihoods, &prior);
    (1..n_alleles)
        .map(|alt| {
            let reduced: AlleleLikelihoods = likelihoods
                .iter()
                .map(|read| {
                    read.iter()
                        .enumerate()
                        .filter(|(i, _)| *i != alt)
                        .map(|(_, l)| *l)
                        .collect()
                })
                .collect();
            let without = ln_evidence(&reduced, &vec![1.0; n_alleles - 1]);
            ln_to_log10(full - without)
        })
        .collect()
}

/// Log10 odds of the normal being homozygous reference rather than heterozygous for each
/// alternate allele.
pub fn normal_log_odds(likelihoods: &[Vec<f64>], n_alleles: usize) -> Vec<f64> {
    let ln_half = 0.5f64.ln();
    (1..n_alleles)
        .map(|alt| {
            ln_to_log10(
                likelihoods
                    .iter()
                    .map(|read| {
                        let het = LogProb(read[0] + ln_half).ln_add_exp(LogProb(read[alt] + ln_half));
                        read[0] - *het
                    })
                    .sum(),
            )
        })
        .collect()
}

/// Posterior mean allele fractions of the alternate alleles.
pub fn allele_fractions(likelihoods: &[Vec<f64>], n_alleles: usize) -> Vec<f64> {
    let alpha = posterior_alpha(likelihoods, &vec![1.0; n_alleles]);
    let total: f64 = alpha.iter().sum();
    alpha[1..].iter().map(|a| a / total).collect()
}

/// The best and second best allele of a read with the difference of their log likelihoods.
pub fn best_allele(likelihoods: &[f64]) -> Option<(usize, f64)> {
    let sorted = likelihoods
        .iter()
        .enumerate()
        .sorted_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal))
        .collect_vec();
    match sorted.as_slice() {
        [] => None,
        [(best, _)] => Some((*best, f64::INFINITY)),
        [(best, l1), (_, l2), ..] => Some((*best, *l1 - *l2)),
    }
}
