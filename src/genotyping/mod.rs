// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Somatic genotyping of the events of an active region.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::sync::Arc;

use anyhow::Result;

use crate::active_regions::pileup::pileup;
use crate::active_regions::{ActiveRegion, PileupParams, PositionEvidence};
use crate::assembly::{forced_haplotype_bases, AssemblyResult};
use crate::likelihood::LikelihoodMatrix;
use crate::orientation::F1R2Table;
use crate::reads::{AlignedRead, PairOrientation, SampleRole, Strand};
use crate::utils::{log10_to_ln, median};
use crate::variants::{
    Allele, AlleleCall, AlleleCallBuilder, CallRecord, ForcedAllele, SampleGenotype,
    SampleGenotypeBuilder,
};

pub(crate) mod f1r2;
pub mod ref_confidence;
pub mod resources;
pub mod somatic_likelihoods;
pub mod trimming;

use resources::{GermlineResource, PanelOfNormals};
use somatic_likelihoods::AlleleLikelihoods;

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct GenotyperConfig {
    /// Minimum tumor log10 odds for an allele to be emitted.
    pub emission_log_odds: f64,
    /// Log10 likelihood margin of the best allele for a read to count as informative.
    pub informative_read_log10_difference: f64,
    pub af_of_alleles_not_in_resource: f64,
    pub reference_confidence: bool,
    /// Exclusive upper bounds of the reference confidence bands.
    pub gq_bands: Vec<f64>,
    pub minimum_allele_fraction: f64,
    /// Minimum base quality for orientation counts.
    pub min_base_quality: u8,
}

impl Default for GenotyperConfig {
    fn default() -> Self {
        GenotyperConfig {
            emission_log_odds: 3.0,
            informative_read_log10_difference: 0.2,
            af_of_alleles_not_in_resource: 1e-6,
            reference_confidence: false,
            gq_bands: vec![-2.5, -0.5, 1.0],
            minimum_allele_fraction: 0.0,
            min_base_quality: 10,
        }
    }
}

/// Everything produced for one active region.
#[derive(Debug, Clone, Default, Getters, CopyGetters)]
pub struct RegionCalls {
    #[getset(get = "pub")]
    records: Vec<CallRecord>,
    #[getset(get = "pub")]
    f1r2: F1R2Table,
    #[getset(get_copy = "pub")]
    degraded: bool,
}

impl RegionCalls {
    pub fn into_parts(self) -> (Vec<CallRecord>, F1R2Table, bool) {
        (self.records, self.f1r2, self.degraded)
    }
}

/// A genotyped position with unified alleles.
#[derive(Debug, Clone, PartialEq)]
struct Site {
    pos: u64,
    ref_allele: Vec<u8>,
    alts: Vec<Vec<u8>>,
    forced: Vec<bool>,
    /// Allele carried by each haplotype, 0 being the reference.
    haplotype_alleles: Vec<usize>,
    /// Haplotypes with an event covering the site without starting at it, e.g. a deletion.
    /// They carry none of the site's alleles.
    spanning: Vec<bool>,
}

impl Site {
    fn new(pos: u64, ref_allele: Vec<u8>, n_haplotypes: usize) -> Self {
        Site {
            pos,
            ref_allele,
            alts: Vec::new(),
            forced: Vec::new(),
            haplotype_alleles: vec![0; n_haplotypes],
            spanning: vec![false; n_haplotypes],
        }
    }

    fn n_alleles(&self) -> usize {
        self.alts.len() + 1
    }

    fn end(&self) -> u64 {
        self.pos + self.ref_allele.len() as u64
    }

    /// Index of the given allele, adding it if unknown.
    fn allele_index(&mut self, alt: Vec<u8>, forced: bool) -> usize {
        if alt == self.ref_allele {
            return 0;
        }
        let i = match self.alts.iter().position(|a| *a == alt) {
            Some(i) => i,
            None => {
                self.alts.push(alt);
                self.forced.push(false);
                self.alts.len() - 1
            }
        };
        self.forced[i] |= forced;
        i + 1
    }

    fn add_forced(
        &mut self,
        allele: &ForcedAllele,
        assembly: &AssemblyResult,
    ) {
        let index = self.allele_index(allele.alt_allele.clone(), true);
        if let Some(bases) =
            forced_haplotype_bases(assembly.ref_window(), assembly.window_start(), allele)
        {
            for (h, haplotype) in assembly.haplotypes().iter().enumerate() {
                if *haplotype.bases() == bases {
                    self.haplotype_alleles[h] = index;
                    self.spanning[h] = false;
                }
            }
        }
    }
}

/// Reads of one sample overlapping a site with their per-allele log likelihoods.
type SiteReads = Vec<(Arc<AlignedRead>, Vec<f64>)>;

pub struct SomaticGenotyper {
    config: GenotyperConfig,
    pileup_params: PileupParams,
    roles: HashMap<String, SampleRole>,
    germline_resource: Option<Arc<GermlineResource>>,
    panel_of_normals: Option<Arc<PanelOfNormals>>,
}

impl SomaticGenotyper {
    pub fn new(
        config: GenotyperConfig,
        pileup_params: PileupParams,
        roles: HashMap<String, SampleRole>,
    ) -> Self {
        SomaticGenotyper {
            config,
            pileup_params,
            roles,
            germline_resource: None,
            panel_of_normals: None,
        }
    }

    pub fn with_germline_resource(mut self, resource: Option<Arc<GermlineResource>>) -> Self {
        self.germline_resource = resource;
        self
    }

    pub fn with_panel_of_normals(mut self, panel: Option<Arc<PanelOfNormals>>) -> Self {
        self.panel_of_normals = panel;
        self
    }

    pub fn config(&self) -> &GenotyperConfig {
        &self.config
    }

    fn role(&self, sample: &str) -> SampleRole {
        self.roles
            .get(sample)
            .cloned()
            .unwrap_or(SampleRole::Tumor)
    }

    /// Genotype all sites of a region.
    pub fn genotype(
        &self,
        region: &ActiveRegion,
        assembly: &AssemblyResult,
        matrices: &BTreeMap<String, LikelihoodMatrix>,
    ) -> Result<RegionCalls> {
        let mut calls = Vec::new();
        for site in find_sites(region, assembly) {
            if let Some(mut call) = self.call_site(region.contig(), &site, matrices)? {
                call.reference_context = reference_context(assembly, call.pos);
                calls.push(call);
            }
        }
        let n_events = calls.len();
        for call in calls.iter_mut() {
            call.event_count = n_events;
        }

        let tumor_reads: Vec<Arc<AlignedRead>> = region
            .reads()
            .iter()
            .filter(|(sample, _)| self.role(sample) == SampleRole::Tumor)
            .flat_map(|(_, reads)| reads.iter().cloned())
            .collect();

        let f1r2 = if region.is_active() {
            f1r2::collect_f1r2(
                &tumor_reads,
                region.span(),
                assembly.ref_window(),
                region.padded_span(),
                self.config.min_base_quality,
            )
        } else {
            F1R2Table::default()
        };

        let records = if self.config.reference_confidence {
            self.with_reference_confidence(region, assembly, &tumor_reads, calls)
        } else {
            calls.into_iter().map(CallRecord::Variant).collect()
        };

        Ok(RegionCalls {
            records,
            f1r2,
            degraded: assembly.degraded(),
        })
    }

    fn call_site(
        &self,
        contig: &str,
        site: &Site,
        matrices: &BTreeMap<String, LikelihoodMatrix>,
    ) -> Result<Option<AlleleCall>> {
        let n_alleles = site.n_alleles();
        let mut tumor_likelihoods: AlleleLikelihoods = Vec::new();
        let mut normal_likelihoods: AlleleLikelihoods = Vec::new();
        let mut has_normal = false;
        let mut genotypes = Vec::with_capacity(matrices.len());

        for (sample, matrix) in matrices {
            let role = self.role(sample);
            let reads = site_reads(matrix, site);
            let likelihoods: AlleleLikelihoods = reads.iter().map(|(_, l)| l.clone()).collect();
            genotypes.push(self.sample_genotype(sample, role, &reads, &likelihoods, site)?);
            match role {
                SampleRole::Tumor => tumor_likelihoods.extend(likelihoods),
                SampleRole::Normal => {
                    has_normal = true;
                    normal_likelihoods.extend(likelihoods)
                }
            }
        }

        let tumor_log_odds = somatic_likelihoods::log_odds(&tumor_likelihoods, n_alleles);
        let (normal_log_odds, normal_artifact_log_odds) = if has_normal {
            (
                Some(somatic_likelihoods::normal_log_odds(
                    &normal_likelihoods,
                    n_alleles,
                )),
                Some(somatic_likelihoods::log_odds(&normal_likelihoods, n_alleles)),
            )
        } else {
            (None, None)
        };

        let mut keep = vec![true];
        keep.extend(
            tumor_log_odds
                .iter()
                .zip(&site.forced)
                .map(|(lod, forced)| *forced || *lod >= self.config.emission_log_odds),
        );
        if !keep[1..].iter().any(|k| *k) {
            return Ok(None);
        }

        let mut call = AlleleCallBuilder::default()
            .contig(contig)
            .pos(site.pos)
            .ref_allele(site.ref_allele.clone())
            .alt_alleles(site.alts.iter().cloned().map(Allele::Bases).collect())
            .tumor_log_odds(tumor_log_odds)
            .normal_log_odds(normal_log_odds)
            .normal_artifact_log_odds(normal_artifact_log_odds)
            .population_af(vec![0.0; site.alts.len()])
            .forced(site.forced.clone())
            .genotypes(genotypes)
            .build()?;
        trimming::drop_alleles(&mut call, &keep);
        self.annotate_resources(&mut call);
        debug!("called {}", call.display_key());

        Ok(Some(call))
    }

    fn sample_genotype(
        &self,
        sample: &str,
        role: SampleRole,
        reads: &SiteReads,
        likelihoods: &[Vec<f64>],
        site: &Site,
    ) -> Result<SampleGenotype> {
        let n = site.n_alleles();
        let min_difference = log10_to_ln(self.config.informative_read_log10_difference);

        let mut depths = vec![0; n];
        let mut f1r2 = vec![0; n];
        let mut f2r1 = vec![0; n];
        let mut forward = vec![0; n];
        let mut reverse = vec![0; n];
        let mut mismatches = vec![0; n];
        let mut base_quals = vec![Vec::new(); n];
        let mut map_quals = vec![Vec::new(); n];
        let mut read_positions = vec![Vec::new(); n];

        for (read, read_likelihoods) in reads {
            let best = match somatic_likelihoods::best_allele(read_likelihoods) {
                Some((best, difference)) if difference >= min_difference => best,
                _ => continue,
            };
            depths[best] += 1;
            match read.orientation() {
                PairOrientation::F1R2 => f1r2[best] += 1,
                PairOrientation::F2R1 => f2r1[best] += 1,
                PairOrientation::Unpaired => (),
            }
            match read.strand() {
                Strand::Forward => forward[best] += 1,
                Strand::Reverse => reverse[best] += 1,
            }
            if read.has_original_contig_mismatch() {
                mismatches[best] += 1;
            }
            map_quals[best].push(read.mapq());
            if let Some(offset) = read.read_offset_at(site.pos) {
                base_quals[best].push(read.qual()[offset]);
                read_positions[best].push(read.distance_from_end(offset) as u32);
            }
        }

        let genotype = match role {
            SampleRole::Tumor => (0..n).collect(),
            SampleRole::Normal => vec![0, 0],
        };
        let medians = |values: &[Vec<u8>]| -> Vec<u8> {
            values.iter().map(|v| median(v).unwrap_or(0)).collect()
        };

        Ok(SampleGenotypeBuilder::default()
            .sample(sample)
            .role(role)
            .genotype(genotype)
            .allele_depths(depths)
            .allele_fractions(somatic_likelihoods::allele_fractions(likelihoods, n))
            .f1r2(f1r2)
            .f2r1(f2r1)
            .forward_strand(forward)
            .reverse_strand(reverse)
            .median_base_quality(medians(&base_quals))
            .median_mapping_quality(medians(&map_quals))
            .median_read_position(
                read_positions
                    .iter()
                    .map(|v| median(v).unwrap_or(0))
                    .collect(),
            )
            .original_contig_mismatch(mismatches)
            .build()?)
    }

    fn annotate_resources(&self, call: &mut AlleleCall) {
        let default_af = self.config.af_of_alleles_not_in_resource;
        let mut popaf = Vec::with_capacity(call.alt_alleles.len());
        let mut in_panel = false;
        for alt in &call.alt_alleles {
            let af = match alt.bases() {
                Some(bases) => {
                    if let Some(panel) = self.panel_of_normals.as_ref() {
                        in_panel |= panel.contains(&call.contig, call.pos, &call.ref_allele, bases);
                    }
                    self.germline_resource.as_ref().map_or(default_af, |resource| {
                        resource.allele_frequency(
                            &call.contig,
                            call.pos,
                            &call.ref_allele,
                            bases,
                            default_af,
                        )
                    })
                }
                None => default_af,
            };
            popaf.push(-af.log10());
        }
        call.population_af = popaf;
        call.in_panel_of_normals = in_panel;
    }

    /// Append the symbolic allele to the calls and fill the rest of the span with
    /// reference blocks.
    fn with_reference_confidence(
        &self,
        region: &ActiveRegion,
        assembly: &AssemblyResult,
        tumor_reads: &[Arc<AlignedRead>],
        calls: Vec<AlleleCall>,
    ) -> Vec<CallRecord> {
        let window = region.padded_span();
        let span = region.span();
        let evidence = pileup(tumor_reads, assembly.ref_window(), window, &self.pileup_params);
        let min_af = self.config.minimum_allele_fraction;

        let mut records: Vec<CallRecord> = Vec::with_capacity(calls.len());
        let mut variant_spans: Vec<Range<u64>> = Vec::with_capacity(calls.len());
        for mut call in calls {
            let non_ref_lod = if window.contains(&call.pos) {
                let site_evidence = &evidence[(call.pos - window.start) as usize];
                let explained: u32 = call.tumor_allele_depths()[1..].iter().sum();
                ref_confidence::non_ref_log_odds(
                    &residual_evidence(site_evidence, explained as usize),
                    min_af,
                )
            } else {
                0.0
            };
            append_non_ref(&mut call, non_ref_lod, self.config.af_of_alleles_not_in_resource);
            variant_spans.push(call.pos..call.end());
            records.push(CallRecord::Variant(call));
        }

        let offset = (span.start - window.start) as usize;
        let len = (span.end - span.start) as usize;
        let blocks = ref_confidence::reference_blocks(
            region.contig(),
            span,
            &assembly.ref_window()[offset..offset + len],
            &evidence[offset..offset + len],
            &variant_spans,
            &self.config.gq_bands,
            min_af,
        );
        records.extend(blocks.into_iter().map(CallRecord::ReferenceBlock));
        records.sort_by_key(|record| {
            (
                record.pos(),
                matches!(record, CallRecord::Variant(_)),
            )
        });
        records
    }
}

/// Bases before, at and after the given position, `N` outside of the reference window.
fn reference_context(assembly: &AssemblyResult, pos: u64) -> String {
    let start = assembly.window_start();
    let window = assembly.ref_window();
    (pos as i64 - 1..=pos as i64 + 1)
        .map(|p| {
            if p >= start as i64 && p < (start + window.len() as u64) as i64 {
                window[(p as u64 - start) as usize] as char
            } else {
                'N'
            }
        })
        .collect()
}

/// Evidence left after removing the alternate observations already explained by called alleles.
fn residual_evidence(evidence: &PositionEvidence, explained: usize) -> PositionEvidence {
    let mut residual = evidence.clone();
    let keep = residual.alt_errors.len().saturating_sub(explained);
    residual.alt_errors.truncate(keep);
    residual
}

fn append_non_ref(call: &mut AlleleCall, log_odds: f64, default_af: f64) {
    call.alt_alleles.push(Allele::NonRef);
    call.tumor_log_odds.push(log_odds);
    if let Some(nlod) = call.normal_log_odds.as_mut() {
        nlod.push(0.0);
    }
    if let Some(nalod) = call.normal_artifact_log_odds.as_mut() {
        nalod.push(0.0);
    }
    call.population_af.push(-default_af.log10());
    call.forced.push(false);
    for genotype in call.genotypes.iter_mut() {
        genotype.push_empty_allele();
    }
}

/// Reads of a matrix overlapping the site with their likelihood given each allele, the
/// maximum over the haplotypes carrying it. Alleles carried by no haplotype get the worst
/// likelihood of the read. Reads best explained by a haplotype spanning the site are
/// uninformative and left out.
fn site_reads(matrix: &LikelihoodMatrix, site: &Site) -> SiteReads {
    let n_alleles = site.n_alleles();
    matrix
        .reads()
        .iter()
        .enumerate()
        .filter(|(_, clipped)| {
            let read = clipped.read();
            read.start() < site.end() && read.end() > site.pos
        })
        .filter_map(|(r, clipped)| {
            let row = matrix.values().row(r);
            let floor = row.iter().map(|p| **p).fold(f64::INFINITY, f64::min);
            let mut likelihoods = vec![f64::NEG_INFINITY; n_alleles];
            let mut spanning = f64::NEG_INFINITY;
            for (h, allele) in site.haplotype_alleles.iter().enumerate() {
                if site.spanning[h] {
                    spanning = spanning.max(*row[h]);
                } else {
                    likelihoods[*allele] = likelihoods[*allele].max(*row[h]);
                }
            }
            let best = likelihoods.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if spanning > best {
                return None;
            }
            for l in likelihoods.iter_mut() {
                if *l == f64::NEG_INFINITY {
                    *l = floor;
                }
            }
            Some((Arc::clone(clipped.read()), likelihoods))
        })
        .collect()
}

/// Unify the events of the assembled haplotypes and the forced alleles into sites.
fn find_sites(region: &ActiveRegion, assembly: &AssemblyResult) -> Vec<Site> {
    let haplotypes = assembly.haplotypes();
    let window_end = assembly.window_start() + assembly.ref_window().len() as u64;
    // forced haplotypes only contribute their allele at its own site
    let discovered: Vec<bool> = haplotypes.iter().map(|h| !h.is_forced()).collect();

    let mut events = BTreeMap::new();
    for (h, haplotype_events) in assembly.events().iter().enumerate() {
        if !discovered[h] {
            continue;
        }
        for event in haplotype_events {
            if region.span().contains(&event.pos) {
                events
                    .entry(event.pos)
                    .or_insert_with(BTreeSet::new)
                    .insert(event.clone());
            }
        }
    }
    let mut forced: BTreeMap<u64, Vec<&ForcedAllele>> = BTreeMap::new();
    for allele in region.forced_alleles() {
        if allele.pos >= assembly.window_start() && allele.end() <= window_end {
            forced.entry(allele.pos).or_default().push(allele);
        }
    }
    let positions: BTreeSet<u64> = events.keys().chain(forced.keys()).cloned().collect();

    let mut sites = Vec::new();
    for pos in positions {
        let site_events: Vec<_> = events
            .get(&pos)
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default();
        let site_forced = forced.get(&pos).cloned().unwrap_or_default();

        let unified_ref = match site_events.iter().map(|e| &e.ref_allele).max_by_key(|r| r.len()) {
            Some(r) => r.clone(),
            None => site_forced[0].ref_allele.clone(),
        };
        let extend = |ref_allele: &[u8], alt: &[u8]| {
            let mut extended = alt.to_vec();
            extended.extend_from_slice(&unified_ref[ref_allele.len()..]);
            extended
        };

        let mut site = Site::new(pos, unified_ref.clone(), haplotypes.len());
        for (h, haplotype_events) in assembly.events().iter().enumerate() {
            if !discovered[h] {
                continue;
            }
            if let Some(event) = haplotype_events.iter().find(|e| e.pos == pos) {
                let index = site.allele_index(extend(&event.ref_allele, &event.alt_allele), false);
                site.haplotype_alleles[h] = index;
            } else if haplotype_events
                .iter()
                .any(|e| e.pos < pos && e.pos + e.ref_allele.len() as u64 > pos)
            {
                site.spanning[h] = true;
            }
        }

        let mut separate = Vec::new();
        for allele in site_forced {
            if allele.ref_allele == unified_ref {
                site.add_forced(allele, assembly);
            } else {
                let mut own = Site::new(pos, allele.ref_allele.clone(), haplotypes.len());
                own.add_forced(allele, assembly);
                separate.push(own);
            }
        }
        if !site.alts.is_empty() {
            sites.push(site);
        }
        sites.extend(separate.into_iter().filter(|s| !s.alts.is_empty()));
    }
    sites
}
