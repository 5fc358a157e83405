// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Comparison of a call set against a truth set.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use bio_types::genome::{AbstractInterval, Interval};
use rayon::prelude::*;
use strum::IntoEnumIterator;

use crate::variants::{minimal_representation, FilteredCall, VariantKey, VariantType};

/// A single alternate allele in minimal representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteAllele {
    pub contig: String,
    pub pos: u64,
    pub ref_allele: String,
    pub alt_allele: String,
}

impl SiteAllele {
    pub fn variant_type(&self) -> VariantType {
        VariantType::of(self.ref_allele.as_bytes(), self.alt_allele.as_bytes())
    }

    fn end(&self) -> u64 {
        self.pos + self.ref_allele.len() as u64
    }
}

/// Split a site into its alleles, skipping symbolic ones.
pub fn split_alleles(key: &VariantKey) -> Vec<SiteAllele> {
    key.alt_alleles
        .iter()
        .filter(|alt| !alt.starts_with('<'))
        .map(|alt| {
            let (pos, ref_allele, alt_allele) =
                minimal_representation(key.pos, key.ref_allele.as_bytes(), alt.as_bytes());
            SiteAllele {
                contig: key.contig.clone(),
                pos,
                ref_allele: String::from_utf8_lossy(&ref_allele).into_owned(),
                alt_allele: String::from_utf8_lossy(&alt_allele).into_owned(),
            }
        })
        .collect()
}

/// A site of the evaluated call set. Sites that failed filtering do not count as calls.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct EvalSite {
    pub key: VariantKey,
    pub is_pass: bool,
}

impl From<&FilteredCall> for EvalSite {
    fn from(call: &FilteredCall) -> Self {
        EvalSite::new(call.call().key(), call.is_pass())
    }
}

impl From<VariantKey> for EvalSite {
    fn from(key: VariantKey) -> Self {
        EvalSite::new(key, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum ConcordanceState {
    #[strum(serialize = "TP")]
    TruePositive,
    #[strum(serialize = "FP")]
    FalsePositive,
    #[strum(serialize = "FN")]
    FalseNegative,
}

#[derive(Debug, Clone, PartialEq, CopyGetters, new)]
pub struct ConcordanceSummaryRecord {
    #[getset(get_copy = "pub")]
    variant_type: VariantType,
    #[getset(get_copy = "pub")]
    true_positives: usize,
    #[getset(get_copy = "pub")]
    false_positives: usize,
    #[getset(get_copy = "pub")]
    false_negatives: usize,
}

impl ConcordanceSummaryRecord {
    pub fn sensitivity(&self) -> Option<f64> {
        let denominator = self.true_positives + self.false_negatives;
        if denominator == 0 {
            None
        } else {
            Some(self.true_positives as f64 / denominator as f64)
        }
    }

    pub fn precision(&self) -> Option<f64> {
        let denominator = self.true_positives + self.false_positives;
        if denominator == 0 {
            None
        } else {
            Some(self.true_positives as f64 / denominator as f64)
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    #[serde(rename = "type")]
    variant_type: String,
    #[serde(rename = "true-positive")]
    true_positives: usize,
    #[serde(rename = "false-positive")]
    false_positives: usize,
    #[serde(rename = "false-negative")]
    false_negatives: usize,
    sensitivity: Option<f64>,
    precision: Option<f64>,
}

/// Write summaries as TSV. Undefined ratios are left empty.
pub fn write_summary<W: io::Write>(writer: W, records: &[ConcordanceSummaryRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    for record in records {
        writer.serialize(SummaryRow {
            variant_type: record.variant_type.to_string(),
            true_positives: record.true_positives,
            false_positives: record.false_positives,
            false_negatives: record.false_negatives,
            sensitivity: record.sensitivity(),
            precision: record.precision(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary_to_path<P: AsRef<Path> + Debug>(
    path: P,
    records: &[ConcordanceSummaryRecord],
) -> Result<()> {
    let file = std::fs::File::create(&path)
        .with_context(|| format!("unable to create concordance summary {:?}", path))?;
    write_summary(file, records)
}

#[derive(Debug, Clone, Default)]
pub struct ConcordanceEvaluator {
    intervals: Vec<Interval>,
    mask: Vec<Interval>,
}

impl ConcordanceEvaluator {
    /// Empty `intervals` include everything.
    pub fn new(intervals: Vec<Interval>, mask: Vec<Interval>) -> Self {
        ConcordanceEvaluator { intervals, mask }
    }

    fn overlaps(intervals: &[Interval], allele: &SiteAllele) -> bool {
        intervals.iter().any(|interval| {
            interval.contig() == allele.contig
                && interval.range().start < allele.end().max(allele.pos + 1)
                && interval.range().end > allele.pos
        })
    }

    fn is_evaluated(&self, allele: &SiteAllele) -> bool {
        (self.intervals.is_empty() || Self::overlaps(&self.intervals, allele))
            && !Self::overlaps(&self.mask, allele)
    }

    fn alleles<'a, I>(&self, sites: I) -> HashSet<SiteAllele>
    where
        I: IntoParallelIterator<Item = &'a VariantKey>,
    {
        sites
            .into_par_iter()
            .flat_map(|key| split_alleles(key))
            .filter(|allele| self.is_evaluated(allele))
            .collect()
    }

    /// Classify every allele of both sets.
    pub fn classify(
        &self,
        truth: &[VariantKey],
        eval: &[EvalSite],
    ) -> Vec<(SiteAllele, ConcordanceState)> {
        let truth = self.alleles(truth.par_iter());
        let calls: Vec<&VariantKey> = eval
            .iter()
            .filter(|site| site.is_pass)
            .map(|site| &site.key)
            .collect();
        let calls = self.alleles(calls.into_par_iter());

        let mut states: Vec<(SiteAllele, ConcordanceState)> = truth
            .iter()
            .map(|allele| {
                let state = if calls.contains(allele) {
                    ConcordanceState::TruePositive
                } else {
                    ConcordanceState::FalseNegative
                };
                (allele.clone(), state)
            })
            .chain(
                calls
                    .iter()
                    .filter(|allele| !truth.contains(allele))
                    .map(|allele| (allele.clone(), ConcordanceState::FalsePositive)),
            )
            .collect();
        states.sort();
        states
    }

    /// Tally the classification per variant type.
    pub fn evaluate(&self, truth: &[VariantKey], eval: &[EvalSite]) -> Vec<ConcordanceSummaryRecord> {
        let mut counts: BTreeMap<VariantType, [usize; 3]> = BTreeMap::new();
        for (allele, state) in self.classify(truth, eval) {
            let entry = counts.entry(allele.variant_type()).or_default();
            match state {
                ConcordanceState::TruePositive => entry[0] += 1,
                ConcordanceState::FalsePositive => entry[1] += 1,
                ConcordanceState::FalseNegative => entry[2] += 1,
            }
        }
        VariantType::iter()
            .map(|variant_type| {
                let [tp, fp, fn_] = counts.get(&variant_type).cloned().unwrap_or_default();
                ConcordanceSummaryRecord::new(variant_type, tp, fp, fn_)
            })
            .collect()
    }
}
