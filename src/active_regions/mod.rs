// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Detection of genomic regions that show evidence of variation.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;

use anyhow::Result;
use bio_types::genome::{AbstractInterval, Interval};

use crate::reads::AlignedRead;
use crate::reference::Reference;
use crate::variants::ForcedAllele;

pub mod pileup;

pub use pileup::{PileupParams, PositionEvidence};

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct DetectorConfig {
    /// Bases below this quality are not counted as evidence.
    pub min_base_quality: u8,
    /// Quality assigned to indel and soft clip evidence.
    pub indel_quality: u8,
    pub min_soft_clip_len: u32,
    /// Log10 odds above which a position is active.
    pub active_log_odds: f64,
    /// Active positions closer than this are clustered into the same region.
    pub merge_distance: u64,
    pub extension: u64,
    pub max_region_size: u64,
    pub padding: u64,
    /// Tile the whole interval, emitting inactive regions between the active ones.
    pub reference_confidence: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            min_base_quality: 10,
            indel_quality: 30,
            min_soft_clip_len: 5,
            active_log_odds: 2.0,
            merge_distance: 50,
            extension: 25,
            max_region_size: 300,
            padding: 100,
            reference_confidence: false,
        }
    }
}

impl DetectorConfig {
    pub(crate) fn pileup_params(&self) -> PileupParams {
        PileupParams::new(
            self.min_base_quality,
            self.indel_quality,
            self.min_soft_clip_len,
        )
    }
}

/// A region selected for local reassembly.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct ActiveRegion {
    #[getset(get = "pub")]
    contig: String,
    #[getset(get = "pub")]
    span: Range<u64>,
    #[getset(get = "pub")]
    padded_span: Range<u64>,
    /// Reads overlapping the padded span, per sample.
    #[getset(get = "pub")]
    reads: BTreeMap<String, Vec<Arc<AlignedRead>>>,
    #[getset(get_copy = "pub")]
    is_active: bool,
    #[getset(get_copy = "pub")]
    force_active: bool,
    #[getset(get = "pub")]
    forced_alleles: Vec<ForcedAllele>,
}

impl ActiveRegion {
    pub fn padded_interval(&self) -> Interval {
        Interval::new(self.contig.clone(), self.padded_span.clone())
    }

    pub fn n_reads(&self) -> usize {
        self.reads.values().map(|r| r.len()).sum()
    }

    pub fn all_reads(&self) -> impl Iterator<Item = &Arc<AlignedRead>> {
        self.reads.values().flatten()
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        contig: &str,
        span: Range<u64>,
        padded_span: Range<u64>,
        reads: Vec<Arc<AlignedRead>>,
        forced_alleles: Vec<ForcedAllele>,
    ) -> Self {
        let mut by_sample: BTreeMap<String, Vec<Arc<AlignedRead>>> = BTreeMap::new();
        for read in reads {
            by_sample
                .entry(read.sample().clone())
                .or_default()
                .push(read);
        }
        ActiveRegion {
            contig: contig.to_owned(),
            span,
            padded_span,
            reads: by_sample,
            is_active: true,
            force_active: !forced_alleles.is_empty(),
            forced_alleles,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RegionSpan {
    span: Range<u64>,
    is_active: bool,
    force_active: bool,
}

/// Scans an interval for activity and hands out regions in coordinate order.
#[derive(Debug, new)]
pub struct ActiveRegionDetector<'a> {
    config: DetectorConfig,
    reference: &'a Reference,
}

impl<'a> ActiveRegionDetector<'a> {
    /// Detect active regions in the given interval.
    ///
    /// `reads` are all usable reads of the contig sorted by start. Only reads of the
    /// `activity_samples` (the tumors) contribute to the activity profile.
    pub fn detect(
        &self,
        interval: &Interval,
        reads: Arc<Vec<Arc<AlignedRead>>>,
        is_activity_sample: impl Fn(&str) -> bool,
        forced_alleles: &[ForcedAllele],
    ) -> Result<ActiveRegions> {
        let contig = interval.contig().to_owned();
        let contig_len = self.reference.contig_len(&contig)?;
        let window = interval.range().start.min(contig_len)..interval.range().end.min(contig_len);
        let ref_window = self.reference.fetch(&contig, &window)?;

        let tumor_reads: Vec<Arc<AlignedRead>> = reads
            .iter()
            .filter(|r| is_activity_sample(r.sample()))
            .cloned()
            .collect();
        let profile = pileup::pileup(
            &tumor_reads,
            &ref_window,
            &window,
            &self.config.pileup_params(),
        );
        let active_positions: Vec<u64> = profile
            .iter()
            .enumerate()
            .filter(|(_, e)| e.log_odds() >= self.config.active_log_odds)
            .map(|(i, _)| window.start + i as u64)
            .collect();
        let forced: Vec<ForcedAllele> = forced_alleles
            .iter()
            .filter(|a| a.contig == contig && window.contains(&a.pos))
            .cloned()
            .collect();

        let spans = self.build_spans(&window, &active_positions, &forced);
        debug!(
            "{}:{}-{}: {} active positions, {} regions",
            contig,
            window.start,
            window.end,
            active_positions.len(),
            spans.iter().filter(|s| s.is_active).count()
        );

        let max_ref_len = reads.iter().map(|r| r.ref_len()).max().unwrap_or(0);
        Ok(ActiveRegions {
            contig,
            contig_len,
            padding: self.config.padding,
            spans: spans.into(),
            reads,
            max_ref_len,
            forced,
        })
    }

    fn build_spans(
        &self,
        window: &Range<u64>,
        active_positions: &[u64],
        forced: &[ForcedAllele],
    ) -> Vec<RegionSpan> {
        let clamp = |start: u64, end: u64| start.max(window.start)..end.min(window.end);
        let ext = self.config.extension;

        // (start, end, force) seeds, clustered by distance
        let mut seeds: Vec<(u64, u64, bool)> = Vec::new();
        for &pos in active_positions {
            match seeds.last_mut() {
                Some(last) if pos < last.1 + self.config.merge_distance => last.1 = pos + 1,
                _ => seeds.push((pos, pos + 1, false)),
            }
        }
        for allele in forced {
            seeds.push((allele.pos, allele.end().max(allele.pos + 1), true));
        }
        seeds.sort_by_key(|s| s.0);

        let mut merged: Vec<(u64, u64, bool)> = Vec::new();
        for (start, end, force) in seeds {
            let start = start.saturating_sub(ext);
            let end = end + ext;
            match merged.last_mut() {
                Some(last) if start <= last.1 => {
                    last.1 = last.1.max(end);
                    last.2 |= force;
                }
                _ => merged.push((start, end, force)),
            }
        }

        let mut spans = Vec::new();
        for (start, end, force) in merged {
            let span = clamp(start, end);
            if span.start >= span.end {
                continue;
            }
            for chunk in split(&span, self.config.max_region_size) {
                spans.push(RegionSpan {
                    force_active: force && forced.iter().any(|a| chunk.contains(&a.pos)),
                    span: chunk,
                    is_active: true,
                });
            }
        }

        if self.config.reference_confidence {
            let mut tiled = Vec::with_capacity(spans.len() * 2 + 1);
            let mut cursor = window.start;
            for span in spans {
                if span.span.start > cursor {
                    tiled.extend(split(&(cursor..span.span.start), self.config.max_region_size).map(
                        |chunk| RegionSpan {
                            span: chunk,
                            is_active: false,
                            force_active: false,
                        },
                    ));
                }
                cursor = span.span.end;
                tiled.push(span);
            }
            if cursor < window.end {
                tiled.extend(
                    split(&(cursor..window.end), self.config.max_region_size).map(|chunk| {
                        RegionSpan {
                            span: chunk,
                            is_active: false,
                            force_active: false,
                        }
                    }),
                );
            }
            spans = tiled;
        }
        spans
    }
}

/// Split a range into chunks of at most `max_len`, of balanced size.
fn split(range: &Range<u64>, max_len: u64) -> impl Iterator<Item = Range<u64>> {
    let len = range.end - range.start;
    let max_len = max_len.max(1);
    let n = (len + max_len - 1) / max_len;
    let start = range.start;
    let end = range.end;
    (0..n).map(move |i| {
        let s = start + i * len / n;
        let e = if i + 1 == n {
            end
        } else {
            start + (i + 1) * len / n
        };
        s..e
    })
}

/// Lazy sequence of regions. Reads are only collected when a region is requested.
#[derive(Debug)]
pub struct ActiveRegions {
    contig: String,
    contig_len: u64,
    padding: u64,
    spans: VecDeque<RegionSpan>,
    reads: Arc<Vec<Arc<AlignedRead>>>,
    max_ref_len: u64,
    forced: Vec<ForcedAllele>,
}

impl ActiveRegions {
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl Iterator for ActiveRegions {
    type Item = ActiveRegion;

    fn next(&mut self) -> Option<ActiveRegion> {
        let RegionSpan {
            span,
            is_active,
            force_active,
        } = self.spans.pop_front()?;
        let padded_span =
            span.start.saturating_sub(self.padding)..(span.end + self.padding).min(self.contig_len);

        let lower = padded_span.start.saturating_sub(self.max_ref_len);
        let first = self.reads.partition_point(|r| r.start() < lower);
        let mut reads: BTreeMap<String, Vec<Arc<AlignedRead>>> = BTreeMap::new();
        for read in self.reads[first..]
            .iter()
            .take_while(|r| r.start() < padded_span.end)
            .filter(|r| r.end() > padded_span.start)
        {
            reads
                .entry(read.sample().clone())
                .or_default()
                .push(Arc::clone(read));
        }

        let forced_alleles = self
            .forced
            .iter()
            .filter(|a| span.contains(&a.pos))
            .cloned()
            .collect();

        Some(ActiveRegion {
            contig: self.contig.clone(),
            span,
            padded_span,
            reads,
            is_active,
            force_active,
            forced_alleles,
        })
    }
}
