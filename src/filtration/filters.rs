// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The battery of variant filters. Each filter is a pure function of a call and the shared
//! filter context.

use bio::stats::LogProb;
use statrs::distribution::{Discrete, Poisson};
use statrs::function::beta::ln_beta;
use statrs::function::factorial::ln_binomial;

use crate::constants::LN_10;
use crate::filtration::tables::{ContaminationTable, SegmentationTable};
use crate::filtration::FilterConfig;
use crate::orientation::OrientationBiasModel;
use crate::utils::ln_binomial_pmf;
use crate::variants::{AlleleCall, SampleGenotype, VariantType};

/// Alternate fraction of a homozygous germline variant.
const HOM_ALT_FRACTION: f64 = 0.99;
/// Rate of alternate reads on the strand without an artifact.
const STRAND_ERROR_RATE: f64 = 1e-3;

/// Filters in the order of their evaluation. The string representation is the tag written
/// to filtered calls.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Contamination,
    Orientation,
    ChimericOriginalAlignment,
    LowAlleleFrac,
    BaseQual,
    MapQual,
    Position,
    Germline,
    Numt,
    ClusteredEvents,
    StrandBias,
    WeakEvidence,
    PanelOfNormals,
    NormalArtifact,
}

/// Inputs shared by all filters.
#[derive(Debug, Clone, Copy, new)]
pub struct FilterContext<'a> {
    pub config: &'a FilterConfig,
    pub contamination: Option<&'a ContaminationTable>,
    pub segments: Option<&'a SegmentationTable>,
    pub orientation: Option<&'a OrientationBiasModel>,
    /// Alternate depth below which mitochondrial calls are attributed to NuMTs.
    pub numt_threshold: Option<u64>,
}

impl Filter {
    /// Description of the input a filter cannot do without.
    pub fn required_input(self) -> Option<&'static str> {
        match self {
            Filter::Contamination => Some("contamination table"),
            Filter::Orientation => Some("orientation bias model"),
            Filter::Numt => Some("autosomal coverage in mitochondria mode"),
            Filter::ChimericOriginalAlignment => Some("mitochondria mode"),
            _ => None,
        }
    }

    /// Whether the filter runs with the given context.
    pub fn is_applicable(self, ctx: &FilterContext) -> bool {
        let mitochondria = ctx.config.mitochondria;
        match self {
            Filter::Contamination => ctx.contamination.is_some(),
            Filter::Orientation => ctx.orientation.is_some(),
            Filter::ChimericOriginalAlignment => mitochondria,
            Filter::Germline => !mitochondria,
            Filter::Numt => mitochondria && ctx.numt_threshold.is_some(),
            _ => true,
        }
    }

    /// Whether the call fails this filter.
    pub fn evaluate(self, call: &AlleleCall, ctx: &FilterContext) -> bool {
        let config = ctx.config;
        let alt = match call.best_alt() {
            Some(alt) => alt,
            None => return false,
        };
        match self {
            Filter::Contamination => {
                contamination_probability(call, alt, ctx) > config.max_contamination_probability
            }
            Filter::Orientation => {
                orientation_probability(call, alt, ctx) > config.max_orientation_probability
            }
            Filter::ChimericOriginalAlignment => {
                let depths = call.tumor_allele_depths();
                let alt_depth = depths[alt + 1];
                let mismatches: u32 = call
                    .tumor_genotypes()
                    .filter_map(|g| g.original_contig_mismatch().get(alt + 1))
                    .sum();
                alt_depth > 0
                    && mismatches as f64 / alt_depth as f64
                        >= config.max_alt_original_contig_fraction
            }
            Filter::LowAlleleFrac => {
                let max_af = call
                    .alt_alleles()
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| !a.is_non_ref())
                    .map(|(i, _)| call.tumor_allele_fraction(i))
                    .fold(0.0, f64::max);
                max_af < config.min_allele_fraction
            }
            Filter::BaseQual => alt_median(call, alt, |g| g.median_base_quality())
                .map_or(false, |bq| bq < config.min_median_base_quality as u32),
            Filter::MapQual => alt_median(call, alt, |g| g.median_mapping_quality())
                .map_or(false, |mq| mq < config.min_median_mapping_quality as u32),
            Filter::Position => alt_median(call, alt, |g| g.median_read_position())
                .map_or(false, |pos| pos < config.min_median_read_position),
            Filter::Germline => {
                germline_probability(call, alt, ctx) > config.max_germline_probability
            }
            Filter::Numt => ctx
                .numt_threshold
                .map_or(false, |threshold| {
                    (call.tumor_allele_depths()[alt + 1] as u64) < threshold
                }),
            Filter::ClusteredEvents => call.event_count() > config.max_events_in_region,
            Filter::StrandBias => {
                strand_artifact_probability(call, alt, config.strand_artifact_prior)
                    > config.max_strand_artifact_probability
            }
            Filter::WeakEvidence => {
                let max_lod = call
                    .alt_alleles()
                    .iter()
                    .zip(call.tumor_log_odds())
                    .filter(|(a, _)| !a.is_non_ref())
                    .map(|(_, lod)| *lod)
                    .fold(f64::NEG_INFINITY, f64::max);
                max_lod < config.tumor_log_odds
            }
            Filter::PanelOfNormals => call.in_panel_of_normals(),
            Filter::NormalArtifact => call
                .normal_artifact_log_odds()
                .as_ref()
                .and_then(|nalod| nalod.get(alt))
                .map_or(false, |nalod| *nalod >= config.normal_artifact_log_odds),
        }
    }
}

/// Median annotation of the tumor sample with most reads supporting the allele.
fn alt_median<T, F>(call: &AlleleCall, alt: usize, values: F) -> Option<u32>
where
    T: Copy + Into<u32>,
    F: Fn(&SampleGenotype) -> &Vec<T>,
{
    call.tumor_genotypes()
        .filter(|g| g.allele_depths().get(alt + 1).map_or(false, |d| *d > 0))
        .max_by_key(|g| g.allele_depths()[alt + 1])
        .and_then(|g| values(g).get(alt + 1).map(|v| (*v).into()))
}

fn population_af(call: &AlleleCall, alt: usize) -> f64 {
    call.population_af()
        .get(alt)
        .map_or(0.0, |popaf| 10f64.powf(-popaf).min(1.0))
}

/// Log likelihood of `k` of `n` reads at the most favourable fraction not above `max_p`.
fn sup_ln_binomial(k: u64, n: u64, max_p: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    ln_binomial_pmf(k, n, (k as f64 / n as f64).min(max_p))
}

/// Probability that the alternate reads stem from a contaminating individual.
/// The maximum over the tumor samples is taken.
pub(crate) fn contamination_probability(call: &AlleleCall, alt: usize, ctx: &FilterContext) -> f64 {
    let table = match ctx.contamination {
        Some(table) => table,
        None => return 0.0,
    };
    let af = population_af(call, alt);
    let prior_somatic = 10f64.powf(ctx.config.log10_prior_somatic);

    call.tumor_genotypes()
        .map(|g| {
            let c = table.fraction(g.sample());
            let k = g.allele_depths()[alt + 1] as u64;
            let n = g.depth() as u64;
            if c <= 0.0 || k == 0 {
                return 0.0;
            }
            let single = LogProb((2.0 * af * (1.0 - af)).ln() + sup_ln_binomial(k, n, c / 2.0))
                .ln_add_exp(LogProb(2.0 * af.ln() + sup_ln_binomial(k, n, c)));
            let many = LogProb(sup_ln_binomial(k, n, c * af));
            let contaminant = LogProb((1.0 - prior_somatic).ln() + (*single).max(*many));
            let somatic = LogProb(prior_somatic.ln() - ((n + 1) as f64).ln());
            (*contaminant - *contaminant.ln_add_exp(somatic)).exp()
        })
        .fold(0.0, f64::max)
}

fn orientation_probability(call: &AlleleCall, alt: usize, ctx: &FilterContext) -> f64 {
    let model = match ctx.orientation {
        Some(model) => model,
        None => return 0.0,
    };
    if call.variant_type(alt) != Some(VariantType::SNV) {
        return 0.0;
    }
    let alt_base = match call.alt_alleles()[alt].bases() {
        Some(bases) => bases[0] as char,
        None => return 0.0,
    };
    call.tumor_genotypes()
        .map(|g| {
            model.artifact_probability(
                call.reference_context(),
                alt_base,
                g.allele_depths()[alt + 1],
                g.depth(),
                g.f1r2().get(alt + 1).cloned().unwrap_or(0),
            )
        })
        .fold(0.0, f64::max)
}

/// Posterior probability of the allele being a germline variant, comparing heterozygous
/// and homozygous germline states against a somatic variant at unknown fraction.
pub(crate) fn germline_probability(call: &AlleleCall, alt: usize, ctx: &FilterContext) -> f64 {
    let af = population_af(call, alt);
    let depths = call.tumor_allele_depths();
    let k = depths[alt + 1] as u64;
    let n = depths.iter().sum::<u32>() as u64;

    let maf = ctx
        .segments
        .and_then(|segments| {
            call.tumor_genotypes().find_map(|g| {
                segments.minor_allele_fraction(g.sample(), call.contig(), call.pos())
            })
        })
        .unwrap_or(0.5);
    let ln_het = ln_binomial_pmf(k, n, maf).max(ln_binomial_pmf(k, n, 1.0 - maf));
    let ln_hom = ln_binomial_pmf(k, n, HOM_ALT_FRACTION);
    // log likelihood ratio of a germline versus a hom-ref normal
    let ln_normal = call
        .normal_log_odds()
        .as_ref()
        .and_then(|nlod| nlod.get(alt))
        .map_or(0.0, |nlod| -nlod * LN_10);

    let germline = LogProb((2.0 * af * (1.0 - af)).ln() + ln_het)
        .ln_add_exp(LogProb(2.0 * af.ln() + ln_hom));
    let germline = LogProb(*germline + ln_normal);
    let somatic = LogProb(ctx.config.log10_prior_somatic * LN_10 - ((n + 1) as f64).ln());
    let total = germline.ln_add_exp(somatic);
    if *total == f64::NEG_INFINITY {
        return 0.0;
    }
    (*germline - *total).exp()
}

/// Posterior probability that the alternate reads are confined to one strand.
pub(crate) fn strand_artifact_probability(call: &AlleleCall, alt: usize, prior: f64) -> f64 {
    let (mut kf, mut kr, mut nf, mut nr) = (0u64, 0u64, 0u64, 0u64);
    for g in call.tumor_genotypes() {
        kf += g.forward_strand().get(alt + 1).cloned().unwrap_or(0) as u64;
        kr += g.reverse_strand().get(alt + 1).cloned().unwrap_or(0) as u64;
        nf += g.forward_strand().iter().sum::<u32>() as u64;
        nr += g.reverse_strand().iter().sum::<u32>() as u64;
    }
    if kf + kr == 0 {
        return 0.0;
    }
    let k = kf + kr;
    let n = nf + nr;
    let ln_none = ln_binomial(nf, kf)
        + ln_binomial(nr, kr)
        + ln_beta((k + 1) as f64, (n - k + 1) as f64);
    let ln_forward = -((nf + 1) as f64).ln() + ln_binomial_pmf(kr, nr, STRAND_ERROR_RATE);
    let ln_reverse = -((nr + 1) as f64).ln() + ln_binomial_pmf(kf, nf, STRAND_ERROR_RATE);

    let artifact =
        LogProb(prior.ln() + ln_forward).ln_add_exp(LogProb(prior.ln() + ln_reverse));
    let none = LogProb((1.0 - 2.0 * prior).ln() + ln_none);
    (*artifact - *artifact.ln_add_exp(none)).exp()
}

/// Smallest depth whose Poisson cumulative probability reaches `quantile`.
pub(crate) fn poisson_quantile(mean: f64, quantile: f64) -> Option<u64> {
    let poisson = Poisson::new(mean).ok()?;
    let limit = (mean * 10.0) as u64 + 100;
    let mut cdf = 0.0;
    for k in 0..=limit {
        cdf += poisson.pmf(k);
        if cdf >= quantile {
            return Some(k);
        }
    }
    Some(limit)
}
