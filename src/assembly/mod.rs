// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Local reassembly of candidate haplotypes.

use std::collections::HashMap;

use bio_types::genome::{AbstractInterval, Interval};

use crate::active_regions::ActiveRegion;
use crate::variants::ForcedAllele;

pub mod events;
pub(crate) mod graph;

pub use events::{extract_events, Event};

use graph::KmerGraph;

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct AssemblerConfig {
    pub kmer_sizes: Vec<usize>,
    /// Do not retry with larger k-mers if all configured sizes fail.
    pub dont_increase_kmer_sizes: bool,
    pub max_kmer_attempts: usize,
    pub min_pruning: u32,
    pub min_base_quality: u8,
    pub max_haplotypes: usize,
    /// Upper bound of branching partial paths expanded per graph.
    pub max_explored_paths: usize,
    pub max_mnp_distance: u64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig {
            kmer_sizes: vec![10, 25],
            dont_increase_kmer_sizes: false,
            max_kmer_attempts: 6,
            min_pruning: 2,
            min_base_quality: 10,
            max_haplotypes: 128,
            max_explored_paths: 10_000,
            max_mnp_distance: 1,
        }
    }
}

/// A candidate local sequence.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters, new)]
pub struct Haplotype {
    #[getset(get = "pub")]
    bases: Vec<u8>,
    #[getset(get = "pub")]
    interval: Interval,
    #[getset(get_copy = "pub")]
    is_ref: bool,
    #[getset(get_copy = "pub")]
    is_forced: bool,
    #[getset(get_copy = "pub")]
    score: f64,
}

/// Haplotypes of an active region, the reference haplotype first, with the events
/// each of them carries.
#[derive(Debug, Clone, Getters, CopyGetters, new)]
pub struct AssemblyResult {
    #[getset(get = "pub")]
    haplotypes: Vec<Haplotype>,
    #[getset(get = "pub")]
    events: Vec<Vec<Event>>,
    #[getset(get = "pub")]
    ref_window: Vec<u8>,
    /// Whether assembly failed for every k-mer size and only the reference was used.
    #[getset(get_copy = "pub")]
    degraded: bool,
}

impl AssemblyResult {
    pub fn window_start(&self) -> u64 {
        self.haplotypes[0].interval.range().start
    }

    /// All distinct events, ordered by position.
    pub fn distinct_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.iter().flatten().cloned().collect();
        events.sort();
        events.dedup();
        events
    }
}

#[derive(Debug, new)]
pub struct HaplotypeAssembler {
    config: AssemblerConfig,
}

impl HaplotypeAssembler {
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Assemble the region against the reference bases of its padded span.
    pub fn assemble(&self, region: &ActiveRegion, ref_window: Vec<u8>) -> AssemblyResult {
        let interval = region.padded_interval();
        let window = region.padded_span().clone();

        let mut haplotypes = vec![Haplotype::new(
            ref_window.clone(),
            interval.clone(),
            true,
            false,
            0.0,
        )];
        let mut degraded = false;

        if region.is_active() && region.n_reads() > 0 {
            let segments: Vec<(Vec<u8>, Vec<u8>)> = region
                .all_reads()
                .filter_map(|read| {
                    read.clipped_range(&window).map(|range| {
                        (
                            read.seq()[range.clone()].to_ascii_uppercase(),
                            read.qual()[range].to_vec(),
                        )
                    })
                })
                .collect();

            let mut assembled = false;
            for &k in &self.config.kmer_sizes {
                if let Some(paths) = self.assemble_with_k(k, &ref_window, &segments) {
                    assembled = true;
                    haplotypes.extend(
                        paths
                            .into_iter()
                            .map(|p| Haplotype::new(p.bases, interval.clone(), false, false, p.score)),
                    );
                }
            }
            if !assembled && !self.config.dont_increase_kmer_sizes {
                let mut k = self.config.kmer_sizes.iter().max().cloned().unwrap_or(10);
                for _ in 0..self.config.max_kmer_attempts {
                    k += 10;
                    if let Some(paths) = self.assemble_with_k(k, &ref_window, &segments) {
                        assembled = true;
                        haplotypes.extend(paths.into_iter().map(|p| {
                            Haplotype::new(p.bases, interval.clone(), false, false, p.score)
                        }));
                        break;
                    }
                }
            }
            degraded = !assembled;
        }

        for allele in region.forced_alleles() {
            if let Some(bases) = forced_haplotype_bases(&ref_window, window.start, allele) {
                haplotypes.push(Haplotype::new(bases, interval.clone(), false, true, 0.0));
            }
        }

        let haplotypes = collapse(haplotypes, self.config.max_haplotypes);
        let events = haplotypes
            .iter()
            .map(|h| {
                extract_events(
                    &h.bases,
                    &ref_window,
                    window.start,
                    self.config.max_mnp_distance,
                )
            })
            .collect();

        AssemblyResult {
            haplotypes,
            events,
            ref_window,
            degraded,
        }
    }

    fn assemble_with_k(
        &self,
        k: usize,
        ref_window: &[u8],
        segments: &[(Vec<u8>, Vec<u8>)],
    ) -> Option<Vec<graph::ScoredPath>> {
        let mut graph = KmerGraph::from_reference(ref_window, k)?;
        for (seq, qual) in segments {
            graph.add_sequence(seq, qual, self.config.min_base_quality);
        }
        graph.prune(self.config.min_pruning);
        if graph.is_cyclic() {
            debug!("k-mer graph with k={} is cyclic", k);
            return None;
        }
        Some(graph.best_paths(self.config.max_haplotypes, self.config.max_explored_paths))
    }
}

/// The reference window with the given allele substituted, if the allele lies inside the window.
pub(crate) fn forced_haplotype_bases(
    ref_window: &[u8],
    window_start: u64,
    allele: &ForcedAllele,
) -> Option<Vec<u8>> {
    if allele.pos < window_start || allele.end() > window_start + ref_window.len() as u64 {
        return None;
    }
    let offset = (allele.pos - window_start) as usize;
    let mut bases = ref_window[..offset].to_vec();
    bases.extend_from_slice(&allele.alt_allele);
    bases.extend_from_slice(&ref_window[offset + allele.ref_allele.len()..]);
    Some(bases)
}

/// Remove duplicate sequences, keeping the reference first. Flags of collapsed
/// duplicates are combined, the best score is kept. Forced haplotypes are never
/// cut by the limit.
fn collapse(haplotypes: Vec<Haplotype>, max_haplotypes: usize) -> Vec<Haplotype> {
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut collapsed: Vec<Haplotype> = Vec::with_capacity(haplotypes.len());
    for hap in haplotypes {
        match index.get(&hap.bases) {
            Some(&i) => {
                let existing = &mut collapsed[i];
                existing.is_ref |= hap.is_ref;
                existing.is_forced |= hap.is_forced;
                existing.score = existing.score.max(hap.score);
            }
            None => {
                index.insert(hap.bases.clone(), collapsed.len());
                collapsed.push(hap);
            }
        }
    }
    let mut kept = 0;
    collapsed.retain(|h| {
        let keep = h.is_ref || h.is_forced || kept < max_haplotypes;
        if !(h.is_ref || h.is_forced) && keep {
            kept += 1;
        }
        keep
    });
    collapsed
}
