// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Call records produced by genotyping and consumed by filtering and concordance.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::constants::NON_REF_ALLELE;
use crate::errors::Error;
use crate::filtration::Filter;
use crate::reads::SampleRole;

/// An alternate allele.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Allele {
    Bases(Vec<u8>),
    /// Symbolic allele standing for any allele not explicitly listed.
    NonRef,
}

impl Allele {
    pub fn bases(&self) -> Option<&[u8]> {
        match self {
            Allele::Bases(bases) => Some(bases),
            Allele::NonRef => None,
        }
    }

    pub fn is_non_ref(&self) -> bool {
        matches!(self, Allele::NonRef)
    }
}

impl From<String> for Allele {
    fn from(value: String) -> Self {
        if value == NON_REF_ALLELE {
            Allele::NonRef
        } else {
            Allele::Bases(value.into_bytes())
        }
    }
}

impl From<Allele> for String {
    fn from(allele: Allele) -> Self {
        allele.to_string()
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Allele::Bases(bases) => write!(f, "{}", String::from_utf8_lossy(bases)),
            Allele::NonRef => write!(f, "{}", NON_REF_ALLELE),
        }
    }
}

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
pub enum VariantType {
    #[strum(serialize = "SNV")]
    SNV,
    #[strum(serialize = "MNV")]
    MNV,
    #[strum(serialize = "INDEL")]
    Indel,
}

impl VariantType {
    pub fn of(ref_allele: &[u8], alt_allele: &[u8]) -> Self {
        if ref_allele.len() != alt_allele.len() {
            VariantType::Indel
        } else if ref_allele.len() == 1 {
            VariantType::SNV
        } else {
            VariantType::MNV
        }
    }
}

/// Per-sample evidence at a site. Per-allele arrays include the reference allele
/// at index 0, per-alt arrays do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, Builder)]
#[builder(pattern = "owned")]
#[getset(get = "pub")]
pub struct SampleGenotype {
    #[builder(setter(into))]
    pub(crate) sample: String,
    pub(crate) role: SampleRole,
    #[builder(default)]
    pub(crate) genotype: Vec<usize>,
    #[builder(default)]
    pub(crate) allele_depths: Vec<u32>,
    #[builder(default)]
    pub(crate) allele_fractions: Vec<f64>,
    #[builder(default)]
    pub(crate) f1r2: Vec<u32>,
    #[builder(default)]
    pub(crate) f2r1: Vec<u32>,
    #[builder(default)]
    pub(crate) forward_strand: Vec<u32>,
    #[builder(default)]
    pub(crate) reverse_strand: Vec<u32>,
    #[builder(default)]
    pub(crate) median_base_quality: Vec<u8>,
    #[builder(default)]
    pub(crate) median_mapping_quality: Vec<u8>,
    #[builder(default)]
    pub(crate) median_read_position: Vec<u32>,
    #[builder(default)]
    pub(crate) original_contig_mismatch: Vec<u32>,
}

impl SampleGenotype {
    pub fn depth(&self) -> u32 {
        self.allele_depths.iter().sum()
    }

    pub fn is_tumor(&self) -> bool {
        self.role == SampleRole::Tumor
    }

    /// Add an allele without any supporting reads.
    pub(crate) fn push_empty_allele(&mut self) {
        self.allele_depths.push(0);
        self.allele_fractions.push(0.0);
        self.f1r2.push(0);
        self.f2r1.push(0);
        self.forward_strand.push(0);
        self.reverse_strand.push(0);
        self.median_base_quality.push(0);
        self.median_mapping_quality.push(0);
        self.median_read_position.push(0);
        self.original_contig_mismatch.push(0);
    }

    /// Remove the alleles with the given indices (0 being the reference) from every array.
    pub(crate) fn retain_alleles(&mut self, keep: &[bool]) {
        fn retain<T: Clone>(values: &mut Vec<T>, keep: &[bool]) {
            if values.len() == keep.len() {
                *values = values
                    .iter()
                    .zip(keep)
                    .filter(|(_, k)| **k)
                    .map(|(v, _)| v.clone())
                    .collect();
            }
        }
        retain(&mut self.allele_depths, keep);
        retain(&mut self.f1r2, keep);
        retain(&mut self.f2r1, keep);
        retain(&mut self.forward_strand, keep);
        retain(&mut self.reverse_strand, keep);
        retain(&mut self.median_base_quality, keep);
        retain(&mut self.median_mapping_quality, keep);
        retain(&mut self.median_read_position, keep);
        retain(&mut self.original_contig_mismatch, keep);
        retain(&mut self.allele_fractions, &keep[1..]);

        let mut new_index = Vec::with_capacity(keep.len());
        let mut next = 0;
        for k in keep {
            new_index.push(if *k {
                next += 1;
                Some(next - 1)
            } else {
                None
            });
        }
        self.genotype = self
            .genotype
            .iter()
            .filter_map(|i| new_index.get(*i).cloned().flatten())
            .collect();
    }
}

/// A called site. Positions are 0-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, CopyGetters, Builder)]
#[builder(pattern = "owned")]
pub struct AlleleCall {
    #[builder(setter(into))]
    #[getset(get = "pub")]
    pub(crate) contig: String,
    #[getset(get_copy = "pub")]
    pub(crate) pos: u64,
    #[serde(with = "crate::utils::seq_serde")]
    #[getset(get = "pub")]
    pub(crate) ref_allele: Vec<u8>,
    #[getset(get = "pub")]
    pub(crate) alt_alleles: Vec<Allele>,
    /// Tumor log10 odds per alternate allele.
    #[builder(default)]
    #[getset(get = "pub")]
    pub(crate) tumor_log_odds: Vec<f64>,
    /// Log10 odds of the normal being homozygous reference versus heterozygous.
    #[builder(default)]
    #[getset(get = "pub")]
    pub(crate) normal_log_odds: Option<Vec<f64>>,
    /// Log10 odds of the allele being present in the normal at any fraction.
    #[builder(default)]
    #[getset(get = "pub")]
    pub(crate) normal_artifact_log_odds: Option<Vec<f64>>,
    /// Negative log10 population allele frequency per alternate allele.
    #[builder(default)]
    #[getset(get = "pub")]
    pub(crate) population_af: Vec<f64>,
    #[builder(default)]
    #[getset(get = "pub")]
    pub(crate) forced: Vec<bool>,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    pub(crate) in_panel_of_normals: bool,
    /// Number of events called in the same active region.
    #[builder(default = "1")]
    #[getset(get_copy = "pub")]
    pub(crate) event_count: usize,
    /// Reference bases before, at and after the position.
    #[builder(default, setter(into))]
    #[serde(default)]
    #[getset(get = "pub")]
    pub(crate) reference_context: String,
    #[builder(default)]
    #[getset(get = "pub")]
    pub(crate) genotypes: Vec<SampleGenotype>,
}

impl AlleleCall {
    pub fn n_alleles(&self) -> usize {
        self.alt_alleles.len() + 1
    }

    /// Exclusive end on the reference.
    pub fn end(&self) -> u64 {
        self.pos + self.ref_allele.len() as u64
    }

    pub fn key(&self) -> VariantKey {
        VariantKey {
            contig: self.contig.clone(),
            pos: self.pos,
            ref_allele: String::from_utf8_lossy(&self.ref_allele).into_owned(),
            alt_alleles: self.alt_alleles.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// 1-based key with inclusive end and sorted alternate alleles,
    /// e.g. `chrM:152-152 T*, [C]`.
    pub fn display_key(&self) -> String {
        format!(
            "{}:{}-{} {}*, [{}]",
            self.contig,
            self.pos + 1,
            self.end(),
            String::from_utf8_lossy(&self.ref_allele),
            self.alt_alleles
                .iter()
                .map(|a| a.to_string())
                .sorted()
                .join(", ")
        )
    }

    pub fn tumor_genotypes(&self) -> impl Iterator<Item = &SampleGenotype> {
        self.genotypes.iter().filter(|g| g.is_tumor())
    }

    pub fn normal_genotypes(&self) -> impl Iterator<Item = &SampleGenotype> {
        self.genotypes.iter().filter(|g| !g.is_tumor())
    }

    /// Index of the non-symbolic alternate allele with the highest tumor log odds.
    pub fn best_alt(&self) -> Option<usize> {
        self.alt_alleles
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_non_ref())
            .map(|(i, _)| i)
            .max_by_key(|i| OrderedFloat(self.tumor_log_odds.get(*i).cloned().unwrap_or(f64::MIN)))
    }

    pub fn variant_type(&self, alt: usize) -> Option<VariantType> {
        self.alt_alleles[alt]
            .bases()
            .map(|bases| VariantType::of(&self.ref_allele, bases))
    }

    /// Allele depths summed over all tumor samples.
    pub fn tumor_allele_depths(&self) -> Vec<u32> {
        let mut depths = vec![0; self.n_alleles()];
        for g in self.tumor_genotypes() {
            for (d, ad) in depths.iter_mut().zip(g.allele_depths.iter()) {
                *d += ad;
            }
        }
        depths
    }

    /// Check that every per-allele array matches the number of alleles. `row` is the
    /// position of the call in its input, used for error reporting.
    /// Allele depths are mandatory, all other annotations may be missing.
    pub fn validate(&self, row: usize) -> Result<()> {
        let n_alts = self.alt_alleles.len();
        let invalid = |msg: String| -> Result<()> {
            Err(Error::InvalidTableRow {
                table: "calls".to_owned(),
                row,
                msg: format!("{}: {}", self.display_key(), msg),
            }
            .into())
        };
        let check = |name: &str, len: usize, expected: usize, optional: bool| -> Result<()> {
            if len == expected || (optional && len == 0) {
                Ok(())
            } else {
                invalid(format!("{} has {} values, expected {}", name, len, expected))
            }
        };

        check("TLOD", self.tumor_log_odds.len(), n_alts, true)?;
        check("POPAF", self.population_af.len(), n_alts, true)?;
        check("forced", self.forced.len(), n_alts, true)?;
        if let Some(nlod) = &self.normal_log_odds {
            check("NLOD", nlod.len(), n_alts, true)?;
        }
        if let Some(nalod) = &self.normal_artifact_log_odds {
            check("NALOD", nalod.len(), n_alts, true)?;
        }
        let n = self.n_alleles();
        for g in &self.genotypes {
            let name = |field: &str| format!("{} of sample {}", field, g.sample);
            check(&name("AD"), g.allele_depths.len(), n, false)?;
            check(&name("AF"), g.allele_fractions.len(), n_alts, true)?;
            check(&name("F1R2"), g.f1r2.len(), n, true)?;
            check(&name("F2R1"), g.f2r1.len(), n, true)?;
            check(&name("SB forward"), g.forward_strand.len(), n, true)?;
            check(&name("SB reverse"), g.reverse_strand.len(), n, true)?;
            check(&name("MBQ"), g.median_base_quality.len(), n, true)?;
            check(&name("MMQ"), g.median_mapping_quality.len(), n, true)?;
            check(&name("MPOS"), g.median_read_position.len(), n, true)?;
            check(
                &name("original contig mismatches"),
                g.original_contig_mismatch.len(),
                n,
                true,
            )?;
            if let Some(i) = g.genotype.iter().find(|i| **i >= n) {
                invalid(format!(
                    "genotype of sample {} refers to allele {} of {}",
                    g.sample, i, n
                ))?;
            }
        }
        Ok(())
    }

    /// Maximum tumor allele fraction of the given alternate allele over all tumor samples.
    pub fn tumor_allele_fraction(&self, alt: usize) -> f64 {
        self.tumor_genotypes()
            .filter_map(|g| g.allele_fractions.get(alt).cloned())
            .fold(0.0, f64::max)
    }
}

/// A run of positions without evidence for a variant, emitted in reference confidence mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, CopyGetters, new)]
pub struct ReferenceBlock {
    #[getset(get = "pub")]
    pub(crate) contig: String,
    #[getset(get_copy = "pub")]
    pub(crate) start: u64,
    /// Exclusive end.
    #[getset(get_copy = "pub")]
    pub(crate) end: u64,
    #[getset(get_copy = "pub")]
    pub(crate) ref_base: u8,
    #[getset(get_copy = "pub")]
    pub(crate) band: usize,
    /// Highest log10 odds for the symbolic alternate allele within the block.
    #[getset(get_copy = "pub")]
    pub(crate) tumor_log_odds: f64,
    #[getset(get_copy = "pub")]
    pub(crate) min_depth: u32,
}

impl ReferenceBlock {
    pub fn display_key(&self) -> String {
        format!(
            "{}:{}-{} {}*, [{}]",
            self.contig,
            self.start + 1,
            self.end,
            self.ref_base as char,
            NON_REF_ALLELE
        )
    }

    /// Whether the given block directly continues this one in the same band and coverage state.
    pub(crate) fn is_continued_by(&self, other: &ReferenceBlock) -> bool {
        self.contig == other.contig
            && self.end == other.start
            && self.band == other.band
            && (self.min_depth == 0) == (other.min_depth == 0)
    }

    pub(crate) fn extend(&mut self, other: &ReferenceBlock) {
        self.end = other.end;
        self.tumor_log_odds = self.tumor_log_odds.max(other.tumor_log_odds);
        self.min_depth = self.min_depth.min(other.min_depth);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum CallRecord {
    Variant(AlleleCall),
    ReferenceBlock(ReferenceBlock),
}

impl CallRecord {
    pub fn contig(&self) -> &str {
        match self {
            CallRecord::Variant(call) => &call.contig,
            CallRecord::ReferenceBlock(block) => &block.contig,
        }
    }

    pub fn pos(&self) -> u64 {
        match self {
            CallRecord::Variant(call) => call.pos,
            CallRecord::ReferenceBlock(block) => block.start,
        }
    }

    pub fn display_key(&self) -> String {
        match self {
            CallRecord::Variant(call) => call.display_key(),
            CallRecord::ReferenceBlock(block) => block.display_key(),
        }
    }

    pub fn as_variant(&self) -> Option<&AlleleCall> {
        match self {
            CallRecord::Variant(call) => Some(call),
            CallRecord::ReferenceBlock(_) => None,
        }
    }

    pub fn into_variant(self) -> Option<AlleleCall> {
        match self {
            CallRecord::Variant(call) => Some(call),
            CallRecord::ReferenceBlock(_) => None,
        }
    }
}

/// A call with the filters it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, new)]
#[getset(get = "pub")]
pub struct FilteredCall {
    call: AlleleCall,
    filters: BTreeSet<Filter>,
}

impl FilteredCall {
    pub fn is_pass(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter tags joined by `;`, or `PASS`.
    pub fn filter_field(&self) -> String {
        if self.is_pass() {
            "PASS".to_owned()
        } else {
            self.filters.iter().join(";")
        }
    }
}

/// An allele that has to be genotyped and reported regardless of assembly evidence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, new)]
pub struct ForcedAllele {
    pub contig: String,
    pub pos: u64,
    #[serde(with = "crate::utils::seq_serde")]
    pub ref_allele: Vec<u8>,
    #[serde(with = "crate::utils::seq_serde")]
    pub alt_allele: Vec<u8>,
}

impl ForcedAllele {
    /// Exclusive end on the reference.
    pub fn end(&self) -> u64 {
        self.pos + self.ref_allele.len() as u64
    }
}

/// Reduce a biallelic variant to its minimal representation by trimming the common suffix,
/// then the common prefix, keeping at least one base per allele. The position shifts with
/// every removed leading base.
pub fn minimal_representation(pos: u64, ref_allele: &[u8], alt_allele: &[u8]) -> (u64, Vec<u8>, Vec<u8>) {
    let mut pos = pos;
    let mut r = ref_allele;
    let mut a = alt_allele;
    while r.len() > 1 && a.len() > 1 && r[r.len() - 1] == a[a.len() - 1] {
        r = &r[..r.len() - 1];
        a = &a[..a.len() - 1];
    }
    while r.len() > 1 && a.len() > 1 && r[0] == a[0] {
        r = &r[1..];
        a = &a[1..];
        pos += 1;
    }
    (pos, r.to_vec(), a.to_vec())
}

/// Identity of a called site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    pub contig: String,
    pub pos: u64,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{} {}>{}",
            self.contig,
            self.pos + 1,
            self.ref_allele,
            self.alt_alleles.join(",")
        )
    }
}
