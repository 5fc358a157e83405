// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Filtering of raw calls with a fixed battery of filters.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use rayon::prelude::*;
use strum::IntoEnumIterator;

use crate::errors::Error;
use crate::orientation::OrientationBiasModel;
use crate::reference::ContigInfo;
use crate::variants::{AlleleCall, FilteredCall, VariantKey};

pub mod filters;
pub mod tables;

pub use filters::{Filter, FilterContext};
pub use tables::{ContaminationTable, SegmentationTable};

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct FilterConfig {
    pub mitochondria: bool,
    /// Minimum tumor log10 odds of the best allele.
    pub tumor_log_odds: f64,
    pub normal_artifact_log_odds: f64,
    pub max_contamination_probability: f64,
    pub max_germline_probability: f64,
    pub max_orientation_probability: f64,
    pub max_strand_artifact_probability: f64,
    /// Prior probability of an artifact on each of the two strands.
    pub strand_artifact_prior: f64,
    pub log10_prior_somatic: f64,
    pub min_allele_fraction: f64,
    pub min_median_base_quality: u8,
    pub min_median_mapping_quality: u8,
    pub min_median_read_position: u32,
    pub max_events_in_region: usize,
    pub max_alt_original_contig_fraction: f64,
    /// Median coverage of the autosomes, used to assess NuMT contamination.
    pub autosomal_coverage: f64,
    pub numt_coverage_factor: f64,
    pub numt_quantile: f64,
    pub validate_dictionary: bool,
    /// Filters whose inputs have to be present.
    pub required_filters: Vec<Filter>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            mitochondria: false,
            tumor_log_odds: 5.3,
            normal_artifact_log_odds: 2.0,
            max_contamination_probability: 0.1,
            max_germline_probability: 0.1,
            max_orientation_probability: 0.5,
            max_strand_artifact_probability: 0.99,
            strand_artifact_prior: 1e-3,
            log10_prior_somatic: -6.0,
            min_allele_fraction: 0.0,
            min_median_base_quality: 20,
            min_median_mapping_quality: 30,
            min_median_read_position: 1,
            max_events_in_region: 2,
            max_alt_original_contig_fraction: 0.3,
            autosomal_coverage: 0.0,
            numt_coverage_factor: 4.0,
            numt_quantile: 0.99,
            validate_dictionary: true,
            required_filters: Vec::new(),
        }
    }
}

impl FilterConfig {
    /// Defaults for calling on the mitochondrial genome.
    pub fn mitochondria() -> Self {
        FilterConfig {
            mitochondria: true,
            min_allele_fraction: 0.03,
            min_median_mapping_quality: 20,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let probabilities = [
            ("max_contamination_probability", self.max_contamination_probability),
            ("max_germline_probability", self.max_germline_probability),
            ("max_orientation_probability", self.max_orientation_probability),
            (
                "max_strand_artifact_probability",
                self.max_strand_artifact_probability,
            ),
            ("min_allele_fraction", self.min_allele_fraction),
            ("numt_quantile", self.numt_quantile),
        ];
        for (name, value) in probabilities.iter() {
            if !(0.0..=1.0).contains(value) {
                return Err(Error::InvalidConfiguration {
                    msg: format!("{} has to be within [0, 1], found {}", name, value),
                }
                .into());
            }
        }
        if !(0.0..0.5).contains(&self.strand_artifact_prior) {
            return Err(Error::InvalidConfiguration {
                msg: "strand_artifact_prior has to be within [0, 0.5)".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// Optional auxiliary inputs of the filters.
#[derive(Debug, Clone, Default)]
pub struct FilterInputs {
    pub contamination: Option<ContaminationTable>,
    pub segments: Option<SegmentationTable>,
    pub orientation: Option<OrientationBiasModel>,
    pub dictionary: Option<Vec<ContigInfo>>,
}

/// Failing filters of a variant. An empty set means that the variant passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters, new)]
#[getset(get = "pub")]
pub struct FilterResult {
    key: VariantKey,
    filters: BTreeSet<Filter>,
}

impl FilterResult {
    pub fn is_pass(&self) -> bool {
        self.filters.is_empty()
    }
}

#[derive(Debug)]
pub struct FilterEngine {
    config: FilterConfig,
    inputs: FilterInputs,
    numt_threshold: Option<u64>,
}

impl FilterEngine {
    /// Set up the engine. Fails if a required filter lacks its input.
    pub fn new(config: FilterConfig, inputs: FilterInputs) -> Result<Self> {
        config.validate()?;
        for filter in &config.required_filters {
            let available = match filter {
                Filter::Contamination => inputs.contamination.is_some(),
                Filter::Orientation => inputs.orientation.is_some(),
                Filter::Numt => config.mitochondria && config.autosomal_coverage > 0.0,
                Filter::ChimericOriginalAlignment => config.mitochondria,
                _ => true,
            };
            if !available {
                return Err(Error::MissingFilterInput {
                    filter: filter.to_string(),
                    input: filter.required_input().unwrap_or("input").to_owned(),
                }
                .into());
            }
        }
        let numt_threshold = if config.mitochondria && config.autosomal_coverage > 0.0 {
            filters::poisson_quantile(
                config.numt_coverage_factor * config.autosomal_coverage,
                config.numt_quantile,
            )
        } else {
            None
        };
        if let Some(threshold) = numt_threshold {
            debug!("calls with fewer than {} alt reads are NuMT candidates", threshold);
        }

        Ok(FilterEngine {
            config,
            inputs,
            numt_threshold,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    fn context(&self) -> FilterContext {
        FilterContext::new(
            &self.config,
            self.inputs.contamination.as_ref(),
            self.inputs.segments.as_ref(),
            self.inputs.orientation.as_ref(),
            self.numt_threshold,
        )
    }

    /// Check the contigs of the calls against the reference dictionary.
    pub fn validate_contigs(&self, calls: &[AlleleCall]) -> Result<()> {
        if self.config.mitochondria || !self.config.validate_dictionary {
            return Ok(());
        }
        let dictionary = match self.inputs.dictionary.as_ref() {
            Some(dictionary) => dictionary,
            None => return Ok(()),
        };
        let lengths: BTreeMap<&str, u64> = dictionary
            .iter()
            .map(|contig| (contig.name.as_str(), contig.len))
            .collect();
        for call in calls {
            match lengths.get(call.contig().as_str()) {
                None => {
                    return Err(Error::SequenceDictionaryMismatch {
                        contig: call.contig().clone(),
                        msg: "is missing from the reference".to_owned(),
                    }
                    .into())
                }
                Some(len) if call.end() > *len => {
                    return Err(Error::SequenceDictionaryMismatch {
                        contig: call.contig().clone(),
                        msg: format!("has length {} but a call ends at {}", len, call.end()),
                    }
                    .into())
                }
                _ => (),
            }
        }
        Ok(())
    }

    /// Failing filters of a single call, in evaluation order.
    pub fn evaluate(&self, call: &AlleleCall) -> BTreeSet<Filter> {
        let ctx = self.context();
        Filter::iter()
            .filter(|filter| filter.is_applicable(&ctx) && filter.evaluate(call, &ctx))
            .collect()
    }

    pub fn filter_result(&self, call: &AlleleCall) -> FilterResult {
        FilterResult::new(call.key(), self.evaluate(call))
    }

    /// Filter all calls, keeping their order.
    pub fn filter(&self, calls: Vec<AlleleCall>) -> Result<Vec<FilteredCall>> {
        self.validate_contigs(&calls)?;
        for (row, call) in calls.iter().enumerate() {
            call.validate(row)?;
        }
        let filtered: Vec<FilteredCall> = calls
            .into_par_iter()
            .map(|call| {
                let filters = self.evaluate(&call);
                FilteredCall::new(call, filters)
            })
            .collect();

        let mut counts: BTreeMap<Filter, usize> = BTreeMap::new();
        for call in &filtered {
            for filter in call.filters() {
                *counts.entry(*filter).or_insert(0) += 1;
            }
        }
        for (filter, count) in counts {
            debug!("{}: {} calls", filter, count);
        }
        info!(
            "{} of {} calls pass all filters",
            filtered.iter().filter(|call| call.is_pass()).count(),
            filtered.len()
        );
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reads::SampleRole;
    use crate::variants::{Allele, AlleleCallBuilder, SampleGenotypeBuilder};

    fn call(contig: &str, alt_depth: u32, tlod: f64) -> AlleleCall {
        let genotype = SampleGenotypeBuilder::default()
            .sample("tumor")
            .role(SampleRole::Tumor)
            .genotype(vec![0, 1])
            .allele_depths(vec![100 - alt_depth, alt_depth])
            .allele_fractions(vec![alt_depth as f64 / 100.0])
            .forward_strand(vec![50 - alt_depth / 2, alt_depth / 2])
            .reverse_strand(vec![50 - (alt_depth - alt_depth / 2), alt_depth - alt_depth / 2])
            .median_base_quality(vec![30, 30])
            .median_mapping_quality(vec![60, 60])
            .median_read_position(vec![20, 20])
            .original_contig_mismatch(vec![0, 0])
            .build()
            .unwrap();
        AlleleCallBuilder::default()
            .contig(contig)
            .pos(100)
            .ref_allele(b"A".to_vec())
            .alt_alleles(vec![Allele::Bases(b"T".to_vec())])
            .tumor_log_odds(vec![tlod])
            .population_af(vec![6.0])
            .forced(vec![false])
            .genotypes(vec![genotype])
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_required_input() {
        let config = FilterConfigBuilder::default()
            .required_filters(vec![Filter::Contamination])
            .build()
            .unwrap();
        let err = FilterEngine::new(config, FilterInputs::default()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::MissingFilterInput {
                filter: "contamination".to_owned(),
                input: "contamination table".to_owned(),
            })
        );
    }

    #[test]
    fn test_invalid_config() {
        let config = FilterConfigBuilder::default()
            .max_germline_probability(1.5)
            .build()
            .unwrap();
        assert!(FilterEngine::new(config, FilterInputs::default()).is_err());
    }

    #[test]
    fn test_dictionary_validation() {
        let inputs = FilterInputs {
            dictionary: Some(vec![ContigInfo::new("chr1".to_owned(), 1000)]),
            ..Default::default()
        };
        let engine = FilterEngine::new(FilterConfig::default(), inputs.clone()).unwrap();
        assert!(engine.filter(vec![call("chr1", 30, 20.0)]).is_ok());
        assert!(engine.filter(vec![call("chr2", 30, 20.0)]).is_err());

        let engine = FilterEngine::new(FilterConfig::mitochondria(), inputs).unwrap();
        assert!(engine.filter(vec![call("chr2", 30, 20.0)]).is_ok());
    }

    #[test]
    fn test_short_allele_depths_are_rejected() {
        let engine = FilterEngine::new(FilterConfig::default(), FilterInputs::default()).unwrap();
        let mut truncated = call("chr1", 30, 20.0);
        truncated.genotypes[0].allele_depths = vec![70];
        let err = engine
            .filter(vec![call("chr1", 30, 20.0), truncated])
            .unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::InvalidTableRow { row, .. }) => assert_eq!(*row, 1),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_filter_keeps_order_and_tags() {
        let engine = FilterEngine::new(FilterConfig::default(), FilterInputs::default()).unwrap();
        let calls = vec![
            call("chr1", 30, 20.0),
            call("chr2", 30, 2.0),
            call("chr3", 30, 30.0),
        ];
        let filtered = engine.filter(calls).unwrap();
        let contigs: Vec<_> = filtered.iter().map(|c| c.call().contig().clone()).collect();
        assert_eq!(contigs, vec!["chr1", "chr2", "chr3"]);
        assert!(filtered[0].is_pass());
        assert_eq!(
            filtered[1].filters().iter().cloned().collect::<Vec<_>>(),
            vec![Filter::WeakEvidence]
        );
    }

    #[test]
    fn test_contamination_monotone_counts() {
        // common population allele
        let calls: Vec<AlleleCall> = (1..40)
            .map(|alt| {
                let mut c = call("chr1", alt, 20.0);
                c.population_af = vec![1.0];
                c
            })
            .collect();
        let count = |fraction: f64| {
            let mut table = ContaminationTable::default();
            table.insert("tumor", fraction);
            let inputs = FilterInputs {
                contamination: Some(table),
                ..Default::default()
            };
            let engine = FilterEngine::new(FilterConfig::default(), inputs).unwrap();
            engine
                .filter(calls.clone())
                .unwrap()
                .iter()
                .filter(|c| c.filters().contains(&Filter::Contamination))
                .count()
        };
        let counts: Vec<usize> = [0.0, 0.01, 0.05, 0.1, 0.3].iter().map(|f| count(*f)).collect();
        assert_eq!(counts[0], 0);
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
        assert!(counts[4] > 0);
    }

    #[test]
    fn test_mitochondria_numt() {
        let config = FilterConfig {
            autosomal_coverage: 5.0,
            ..FilterConfig::mitochondria()
        };
        let engine = FilterEngine::new(config, FilterInputs::default()).unwrap();
        // Poisson(20) 0.99 quantile is 31
        let tags = engine.evaluate(&call("chrM", 10, 20.0));
        assert!(tags.contains(&Filter::Numt));
        assert!(!tags.contains(&Filter::Germline));
        assert!(!engine.evaluate(&call("chrM", 40, 20.0)).contains(&Filter::Numt));
    }
}
