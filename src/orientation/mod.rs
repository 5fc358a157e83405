// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Learning of read orientation artifacts, i.e. substitutions that predominantly occur on
//! one orientation of the read pair, as caused by e.g. oxidative damage during library prep.
//!
//! For every reference context, a site is either free of artifacts or carries an artifact
//! with a given alternate base in F1R2 or F2R1 orientation. Prior probabilities of these
//! states and the artifact allele fraction are fitted with expectation maximization.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use bio::stats::LogProb;

use crate::utils::ln_binomial_pmf;

pub mod table;

pub use table::{AltSiteRecord, F1R2Table};

/// Probability of an artifact read appearing in the non-artifact orientation.
const ORIENTATION_ERROR: f64 = 0.01;
const SEQUENCING_ERROR: f64 = 1e-3;
const HET_FRACTION: f64 = 0.5;
/// Weight of the heterozygous component of the non-artifact allele fraction mixture.
const HET_WEIGHT: f64 = 0.1;
const PSEUDOCOUNT: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct LearnerConfig {
    pub max_iterations: usize,
    pub convergence_threshold: f64,
    /// Contexts with fewer alt sites are not learned.
    pub min_alt_sites: usize,
    pub initial_artifact_af: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig {
            max_iterations: 20,
            convergence_threshold: 1e-4,
            min_alt_sites: 10,
            initial_artifact_af: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
pub enum ArtifactState {
    #[strum(serialize = "none")]
    None,
    F1R2,
    F2R1,
}

/// Fitted parameters of one reference context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, CopyGetters)]
pub struct ContextModel {
    #[getset(get_copy = "pub")]
    prior_none: f64,
    /// Prior of an F1R2 artifact per alternate base.
    #[getset(get = "pub")]
    prior_f1r2: BTreeMap<char, f64>,
    #[getset(get = "pub")]
    prior_f2r1: BTreeMap<char, f64>,
    #[getset(get_copy = "pub")]
    artifact_af: f64,
    #[getset(get_copy = "pub")]
    informative: bool,
    #[getset(get_copy = "pub")]
    n_examples: u64,
}

impl ContextModel {
    fn uninformative(alt_bases: &[char], n_examples: u64) -> Self {
        ContextModel {
            prior_none: 1.0,
            prior_f1r2: alt_bases.iter().map(|b| (*b, 0.0)).collect(),
            prior_f2r1: alt_bases.iter().map(|b| (*b, 0.0)).collect(),
            artifact_af: 0.0,
            informative: false,
            n_examples,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct OrientationBiasModel {
    contexts: BTreeMap<String, ContextModel>,
}

impl OrientationBiasModel {
    pub fn from_path<P: AsRef<Path> + Debug>(path: P) -> Result<Self> {
        let content =
            fs::read_to_string(&path).with_context(|| format!("unable to read {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid orientation bias model in {:?}", path))
    }

    pub fn to_path<P: AsRef<Path> + Debug>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).with_context(|| format!("unable to write {:?}", path))
    }

    /// Posterior probability that the alternate reads at a site are an orientation artifact.
    /// `alt_f1r2` counts the alternate reads from F1R2 pairs, all others count as F2R1 as
    /// during learning. Unknown and uninformative contexts yield 0.
    pub fn artifact_probability(
        &self,
        context: &str,
        alt: char,
        alt_count: u32,
        depth: u32,
        alt_f1r2: u32,
    ) -> f64 {
        let model = match self.contexts.get(context) {
            Some(model) if model.informative => model,
            _ => return 0.0,
        };
        let observation = Observation::alt_site(alt, depth, alt_count, alt_f1r2);
        let none = LogProb(model.prior_none.ln() + observation.ln_likelihood_none());
        let f1r2 = LogProb(
            model.prior_f1r2.get(&alt).cloned().unwrap_or(0.0).ln()
                + observation.ln_likelihood_artifact(ArtifactState::F1R2, alt, model.artifact_af),
        );
        let f2r1 = LogProb(
            model.prior_f2r1.get(&alt).cloned().unwrap_or(0.0).ln()
                + observation.ln_likelihood_artifact(ArtifactState::F2R1, alt, model.artifact_af),
        );
        let artifact = f1r2.ln_add_exp(f2r1);
        let total = artifact.ln_add_exp(none);
        if *total == f64::NEG_INFINITY {
            return 0.0;
        }
        (*artifact - *total).exp()
    }
}

/// Counts of one site, or of a group of identical reference sites.
#[derive(Debug, Clone, Copy)]
struct Observation {
    alt: Option<char>,
    depth: u32,
    alt_count: u32,
    alt_f1r2: u32,
}

impl Observation {
    fn alt_site(alt: char, depth: u32, alt_count: u32, alt_f1r2: u32) -> Self {
        Observation {
            alt: Some(alt),
            depth: depth.max(alt_count),
            alt_count,
            alt_f1r2: alt_f1r2.min(alt_count),
        }
    }

    fn ref_site(depth: u32) -> Self {
        Observation {
            alt: None,
            depth,
            alt_count: 0,
            alt_f1r2: 0,
        }
    }

    fn ln_likelihood_none(&self) -> f64 {
        let (m, n) = (self.alt_count as u64, self.depth as u64);
        let fraction = LogProb(ln_binomial_pmf(m, n, SEQUENCING_ERROR) + (1.0 - HET_WEIGHT).ln())
            .ln_add_exp(LogProb(ln_binomial_pmf(m, n, HET_FRACTION) + HET_WEIGHT.ln()));
        let base = if self.alt.is_some() { (1.0f64 / 3.0).ln() } else { 0.0 };
        *fraction
            + base
            + ln_binomial_pmf(self.alt_f1r2 as u64, self.alt_count as u64, 0.5)
    }

    fn ln_likelihood_artifact(&self, state: ArtifactState, base: char, artifact_af: f64) -> f64 {
        if let Some(alt) = self.alt {
            if alt != base {
                return f64::NEG_INFINITY;
            }
        }
        let p_f1r2 = match state {
            ArtifactState::F1R2 => 1.0 - ORIENTATION_ERROR,
            _ => ORIENTATION_ERROR,
        };
        ln_binomial_pmf(self.alt_count as u64, self.depth as u64, artifact_af)
            + ln_binomial_pmf(self.alt_f1r2 as u64, self.alt_count as u64, p_f1r2)
    }
}

/// Expectation maximization over the F1R2 counts of all contexts.
#[derive(Debug, new)]
pub struct OrientationLearner {
    config: LearnerConfig,
}

impl OrientationLearner {
    pub fn learn(&self, table: &F1R2Table) -> OrientationBiasModel {
        let mut alt_sites: BTreeMap<&str, Vec<&AltSiteRecord>> = BTreeMap::new();
        for record in table.alt_sites() {
            alt_sites.entry(&record.context).or_default().push(record);
        }
        let mut contexts: Vec<&str> = alt_sites.keys().cloned().collect();
        contexts.extend(table.ref_histograms().keys().map(|c| c.as_str()));
        contexts.sort_unstable();
        contexts.dedup();

        let mut model = OrientationBiasModel::default();
        for context in contexts {
            let sites = alt_sites.get(context).cloned().unwrap_or_default();
            let histogram = table.ref_histograms().get(context);
            model
                .contexts
                .insert(context.to_owned(), self.learn_context(context, &sites, histogram));
        }
        model
    }

    fn learn_context(
        &self,
        context: &str,
        sites: &[&AltSiteRecord],
        histogram: Option<&BTreeMap<u32, u64>>,
    ) -> ContextModel {
        let ref_base = context.chars().nth(1).unwrap_or('N');
        let alt_bases: Vec<char> = ['A', 'C', 'G', 'T']
            .iter()
            .cloned()
            .filter(|b| *b != ref_base)
            .collect();
        let n_ref_sites: u64 = histogram.map_or(0, |h| h.values().sum());
        let n_examples = sites.len() as u64 + n_ref_sites;

        if sites.len() < self.config.min_alt_sites {
            info!(
                "context {} has only {} alt sites, using an uninformative prior",
                context,
                sites.len()
            );
            return ContextModel::uninformative(&alt_bases, n_examples);
        }

        // (observation, weight)
        let mut observations: Vec<(Observation, f64)> = sites
            .iter()
            .map(|s| (Observation::alt_site(s.alt, s.depth(), s.alt_count, s.alt_f1r2), 1.0))
            .collect();
        if let Some(histogram) = histogram {
            observations.extend(
                histogram
                    .iter()
                    .map(|(depth, count)| (Observation::ref_site(*depth), *count as f64)),
            );
        }
        let total_weight: f64 = observations.iter().map(|(_, w)| w).sum();

        // states: none, then F1R2 per alt base, then F2R1 per alt base
        let mut states = vec![(ArtifactState::None, ' ')];
        for state in &[ArtifactState::F1R2, ArtifactState::F2R1] {
            states.extend(alt_bases.iter().map(|b| (*state, *b)));
        }
        let n_states = states.len();
        let mut priors = vec![0.9];
        priors.extend(vec![0.1 / (n_states - 1) as f64; n_states - 1]);
        let mut artifact_af = self.config.initial_artifact_af;

        for iteration in 0..self.config.max_iterations {
            let mut state_weights = vec![0.0; n_states];
            let mut artifact_alt = 0.0;
            let mut artifact_depth = 0.0;
            for (observation, weight) in &observations {
                let ln_joint: Vec<LogProb> = states
                    .iter()
                    .zip(&priors)
                    .map(|((state, base), prior)| {
                        let lik = match state {
                            ArtifactState::None => observation.ln_likelihood_none(),
                            _ => observation.ln_likelihood_artifact(*state, *base, artifact_af),
                        };
                        LogProb(prior.ln() + lik)
                    })
                    .collect();
                let total = LogProb::ln_sum_exp(&ln_joint);
                if *total == f64::NEG_INFINITY {
                    continue;
                }
                for (s, p) in ln_joint.iter().enumerate() {
                    let r = (**p - *total).exp() * weight;
                    state_weights[s] += r;
                    if s > 0 {
                        artifact_alt += r * observation.alt_count as f64;
                        artifact_depth += r * observation.depth as f64;
                    }
                }
            }

            let updated: Vec<f64> = state_weights
                .iter()
                .map(|w| (w + PSEUDOCOUNT) / (total_weight + PSEUDOCOUNT * n_states as f64))
                .collect();
            let change = updated
                .iter()
                .zip(&priors)
                .map(|(u, p)| (u - p).abs())
                .fold(0.0, f64::max);
            priors = updated;
            if artifact_depth > 0.0 {
                artifact_af = (artifact_alt / artifact_depth).max(0.01).min(0.99);
            }
            if change < self.config.convergence_threshold {
                debug!("context {} converged after {} iterations", context, iteration + 1);
                break;
            }
        }

        let k = alt_bases.len();
        ContextModel {
            prior_none: priors[0],
            prior_f1r2: alt_bases.iter().cloned().zip(priors[1..=k].iter().cloned()).collect(),
            prior_f2r1: alt_bases
                .iter()
                .cloned()
                .zip(priors[k + 1..].iter().cloned())
                .collect(),
            artifact_af,
            informative: true,
            n_examples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_artifacts(n_artifacts: usize, n_ref: u64) -> F1R2Table {
        let mut table = F1R2Table::default();
        for _ in 0..n_artifacts {
            // all alt reads in F1R2 orientation
            table.add_alt_site(AltSiteRecord::new("ACG".to_owned(), 'T', 40, 10, 10));
        }
        for _ in 0..n_ref {
            table.add_ref_site("ACG", 50);
        }
        table
    }

    #[test]
    fn test_learn_artifacts() {
        let model = OrientationLearner::new(LearnerConfig::default())
            .learn(&table_with_artifacts(50, 1000));
        let context = &model.contexts()["ACG"];
        assert!(context.informative());
        assert!(context.prior_f1r2()[&'T'] > context.prior_f2r1()[&'T']);
        assert_relative_eq!(context.artifact_af(), 0.2, epsilon = 0.05);

        let p = model.artifact_probability("ACG", 'T', 10, 50, 10);
        assert!(p > 0.5);
        // balanced orientation
        let p = model.artifact_probability("ACG", 'T', 10, 50, 5);
        assert!(p < 0.5);
    }

    #[test]
    fn test_unpaired_alt_reads_count_against_f1r2() {
        let model = OrientationLearner::new(LearnerConfig::default())
            .learn(&table_with_artifacts(50, 1000));
        // 6 F1R2 reads and 4 unpaired ones look like 6 of 10 during learning as well
        let mixed = model.artifact_probability("ACG", 'T', 10, 50, 6);
        let all = model.artifact_probability("ACG", 'T', 6, 50, 6);
        assert!(mixed < 0.5);
        assert!(all > mixed);
    }

    #[test]
    fn test_too_few_sites() {
        let model = OrientationLearner::new(LearnerConfig::default())
            .learn(&table_with_artifacts(3, 100));
        let context = &model.contexts()["ACG"];
        assert!(!context.informative());
        assert_relative_eq!(context.prior_f1r2()[&'T'], 0.0);
        assert_relative_eq!(model.artifact_probability("ACG", 'T', 10, 50, 10), 0.0);
    }

    #[test]
    fn test_model_file() {
        let model = OrientationLearner::new(LearnerConfig::default())
            .learn(&table_with_artifacts(20, 100));
        let file = tempfile::NamedTempFile::new().unwrap();
        model.to_path(file.path()).unwrap();
        let back = OrientationBiasModel::from_path(file.path()).unwrap();
        let (a, b) = (&model.contexts()["ACG"], &back.contexts()["ACG"]);
        assert_eq!(a.informative(), b.informative());
        assert_eq!(a.n_examples(), b.n_examples());
        assert_relative_eq!(a.prior_f1r2()[&'T'], b.prior_f1r2()[&'T'], epsilon = 1e-12);
        assert_relative_eq!(a.artifact_af(), b.artifact_af(), epsilon = 1e-12);
    }
}
