// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The calling pipeline: detection, assembly, likelihoods and genotyping of all regions.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use anyhow::{Context, Result};
use bio_types::genome::{AbstractInterval, Interval};
use crossbeam::channel::{Receiver, Sender};
use progress_logger::ProgressLogger;

use crate::active_regions::{ActiveRegion, ActiveRegionDetector, DetectorConfig};
use crate::assembly::{AssemblerConfig, HaplotypeAssembler};
use crate::errors::Error;
use crate::genotyping::resources::{GermlineResource, PanelOfNormals};
use crate::genotyping::{GenotyperConfig, RegionCalls, SomaticGenotyper};
use crate::likelihood::{LikelihoodConfig, LikelihoodEngine};
use crate::orientation::F1R2Table;
use crate::reads::{AlignedRead, ReadFilter, SampleRole};
use crate::reference::Reference;
use crate::utils::worker_pool::{worker_pool, Orderable};
use crate::variants::{CallRecord, ForcedAllele};

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct CallerConfig {
    pub detector: DetectorConfig,
    pub assembler: AssemblerConfig,
    pub likelihood: LikelihoodConfig,
    pub genotyper: GenotyperConfig,
    pub read_filter: ReadFilter,
    pub threads: usize,
    /// Global seed from which every region derives its own.
    pub seed: u64,
}

impl Default for CallerConfig {
    fn default() -> Self {
        CallerConfig {
            detector: DetectorConfig::default(),
            assembler: AssemblerConfig::default(),
            likelihood: LikelihoodConfig::default(),
            genotyper: GenotyperConfig::default(),
            read_filter: ReadFilter::default(),
            threads: 1,
            seed: 42,
        }
    }
}

impl CallerConfig {
    /// Switch reference confidence mode in the detector and the genotyper at once.
    pub fn with_reference_confidence(mut self, enabled: bool) -> Self {
        self.detector.reference_confidence = enabled;
        self.genotyper.reference_confidence = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.detector.reference_confidence != self.genotyper.reference_confidence {
            return Err(Error::InvalidConfiguration {
                msg: "reference confidence has to be enabled for detection and genotyping alike"
                    .to_owned(),
            }
            .into());
        }
        if self.assembler.kmer_sizes.is_empty() {
            return Err(Error::InvalidConfiguration {
                msg: "at least one k-mer size is needed".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// Result of a calling run.
#[derive(Debug, Clone, Default, Getters, CopyGetters)]
pub struct CallSet {
    /// Records in coordinate order of the processed intervals.
    #[getset(get = "pub")]
    records: Vec<CallRecord>,
    #[getset(get = "pub")]
    f1r2: F1R2Table,
    #[getset(get_copy = "pub")]
    n_regions: usize,
    /// Regions that fell back to the reference haplotype.
    #[getset(get_copy = "pub")]
    n_degraded: usize,
}

impl CallSet {
    pub fn into_parts(self) -> (Vec<CallRecord>, F1R2Table) {
        (self.records, self.f1r2)
    }

    fn push(&mut self, record: CallRecord) {
        if let (Some(CallRecord::ReferenceBlock(last)), CallRecord::ReferenceBlock(block)) =
            (self.records.last_mut(), &record)
        {
            if last.is_continued_by(block) {
                last.extend(block);
                return;
            }
        }
        self.records.push(record);
    }

    fn add_region(&mut self, calls: RegionCalls) {
        let (records, f1r2, degraded) = calls.into_parts();
        for record in records {
            self.push(record);
        }
        self.f1r2.merge(f1r2);
        self.n_regions += 1;
        if degraded {
            self.n_degraded += 1;
        }
    }
}

struct RegionWork {
    index: usize,
    region: ActiveRegion,
}

struct RegionResult {
    index: usize,
    calls: RegionCalls,
}

impl Orderable for RegionResult {
    fn index(&self) -> usize {
        self.index
    }
}

pub struct Caller<'a> {
    config: CallerConfig,
    reference: &'a Reference,
    roles: HashMap<String, SampleRole>,
    germline_resource: Option<Arc<GermlineResource>>,
    panel_of_normals: Option<Arc<PanelOfNormals>>,
    forced_alleles: Vec<ForcedAllele>,
    mask: Vec<Interval>,
}

impl<'a> Caller<'a> {
    pub fn new(
        config: CallerConfig,
        reference: &'a Reference,
        roles: HashMap<String, SampleRole>,
    ) -> Result<Self> {
        config.validate()?;
        if !roles.values().any(|role| *role == SampleRole::Tumor) {
            return Err(Error::NoTumorSample.into());
        }
        Ok(Caller {
            config,
            reference,
            roles,
            germline_resource: None,
            panel_of_normals: None,
            forced_alleles: Vec::new(),
            mask: Vec::new(),
        })
    }

    pub fn with_germline_resource(mut self, resource: Option<Arc<GermlineResource>>) -> Self {
        self.germline_resource = resource;
        self
    }

    pub fn with_panel_of_normals(mut self, panel: Option<Arc<PanelOfNormals>>) -> Self {
        self.panel_of_normals = panel;
        self
    }

    /// Alleles that are genotyped regardless of evidence. Their reference bases have to match
    /// the genome.
    pub fn with_forced_alleles(mut self, mut alleles: Vec<ForcedAllele>) -> Result<Self> {
        for allele in alleles.iter_mut() {
            allele.ref_allele.make_ascii_uppercase();
            allele.alt_allele.make_ascii_uppercase();
            let expected = self
                .reference
                .fetch(&allele.contig, &(allele.pos..allele.end()))
                .with_context(|| {
                    format!(
                        "force-call allele at {}:{} is outside of the reference",
                        allele.contig,
                        allele.pos + 1
                    )
                })?;
            if expected != allele.ref_allele {
                return Err(Error::ForcedAlleleReferenceMismatch {
                    contig: allele.contig.clone(),
                    pos: allele.pos + 1,
                    given: String::from_utf8_lossy(&allele.ref_allele).into_owned(),
                    expected: String::from_utf8_lossy(&expected).into_owned(),
                }
                .into());
            }
        }
        alleles.sort_by(|a, b| {
            (&a.contig, a.pos, &a.ref_allele, &a.alt_allele).cmp(&(
                &b.contig,
                b.pos,
                &b.ref_allele,
                &b.alt_allele,
            ))
        });
        alleles.dedup();
        self.forced_alleles = alleles;
        Ok(self)
    }

    /// Intervals excluded from calling.
    pub fn with_exclusion_mask(mut self, mask: Vec<Interval>) -> Self {
        self.mask = mask;
        self
    }

    fn is_tumor(&self, sample: &str) -> bool {
        self.roles.get(sample) == Some(&SampleRole::Tumor)
    }

    /// Usable reads per contig, sorted by start.
    fn prepare_reads(
        &self,
        reads: Vec<AlignedRead>,
    ) -> Result<HashMap<String, Arc<Vec<Arc<AlignedRead>>>>> {
        let total = reads.len();
        let mut clamped = 0;
        let mut by_contig: HashMap<String, Vec<Arc<AlignedRead>>> = HashMap::new();
        for read in reads {
            if !self.roles.contains_key(read.sample()) {
                return Err(Error::SampleWithoutRole {
                    name: read.sample().clone(),
                }
                .into());
            }
            read.validate()?;
            let read = match self.reference.contig_len(read.contig()) {
                Ok(len) if read.end() > len => {
                    clamped += 1;
                    match read.clamp_to_contig(len) {
                        Some(read) => read,
                        None => continue,
                    }
                }
                _ => read,
            };
            if self.config.read_filter.is_usable(&read) {
                by_contig
                    .entry(read.contig().clone())
                    .or_default()
                    .push(Arc::new(read));
            }
        }
        if clamped > 0 {
            info!("{} reads extend past the end of their contig and were clipped", clamped);
        }
        let usable: usize = by_contig.values().map(|reads| reads.len()).sum();
        if usable < total {
            info!("{} of {} reads are unusable and were skipped", total - usable, total);
        }
        Ok(by_contig
            .into_iter()
            .map(|(contig, mut reads)| {
                reads.sort_by_key(|read| (read.start(), read.end()));
                (contig, Arc::new(reads))
            })
            .collect())
    }

    /// Parts of the given intervals that are not masked.
    fn unmasked(&self, intervals: &[Interval]) -> Vec<Interval> {
        intervals
            .iter()
            .flat_map(|interval| {
                let mask: Vec<Range<u64>> = self
                    .mask
                    .iter()
                    .filter(|m| m.contig() == interval.contig())
                    .map(|m| m.range())
                    .collect();
                subtract(interval.range(), mask)
                    .into_iter()
                    .map(move |range| Interval::new(interval.contig().to_owned(), range))
            })
            .collect()
    }

    /// Call all given intervals. Without intervals, every contig of the reference is called.
    pub fn call(&self, reads: Vec<AlignedRead>, intervals: &[Interval]) -> Result<CallSet> {
        let intervals = if intervals.is_empty() {
            self.reference.intervals(&[])?
        } else {
            self.reference.normalize_intervals(intervals.to_vec())?
        };
        let intervals = self.unmasked(&intervals);
        let reads = self.prepare_reads(reads)?;

        let genotyper = SomaticGenotyper::new(
            self.config.genotyper.clone(),
            self.config.detector.pileup_params(),
            self.roles.clone(),
        )
        .with_germline_resource(self.germline_resource.clone())
        .with_panel_of_normals(self.panel_of_normals.clone());
        let detector = ActiveRegionDetector::new(self.config.detector.clone(), self.reference);
        let threads = self.config.threads.max(1);

        let mut callset = CallSet::default();
        let mut progress_logger = ProgressLogger::builder()
            .with_items_name("regions")
            .with_frequency(std::time::Duration::from_secs(20))
            .start();

        {
            let callset = &mut callset;
            let progress_logger = &mut progress_logger;
            let genotyper = &genotyper;
            let detector = &detector;
            let reads = &reads;

            let preprocessor = move |sender: Sender<RegionWork>| -> Result<()> {
                let mut index = 0;
                for interval in &intervals {
                    let contig_reads = reads
                        .get(interval.contig())
                        .cloned()
                        .unwrap_or_else(|| Arc::new(Vec::new()));
                    let regions = detector.detect(
                        interval,
                        contig_reads,
                        |sample| self.is_tumor(sample),
                        &self.forced_alleles,
                    )?;
                    for region in regions {
                        sender.send(RegionWork { index, region })?;
                        index += 1;
                    }
                }
                Ok(())
            };

            let workers = (0..threads).map(move |_| {
                move |receiver: Receiver<RegionWork>, sender: Sender<RegionResult>| -> Result<()> {
                    let assembler = HaplotypeAssembler::new(self.config.assembler.clone());
                    let engine = LikelihoodEngine::new(self.config.likelihood.clone(), self.config.seed);
                    for RegionWork { index, region } in receiver {
                        let ref_window = self
                            .reference
                            .fetch(region.contig(), region.padded_span())?;
                        let assembly = assembler.assemble(&region, ref_window);
                        if assembly.degraded() {
                            warn!(
                                "assembly of {}:{}-{} failed for all k-mer sizes, \
                                 using the reference haplotype only",
                                region.contig(),
                                region.span().start + 1,
                                region.span().end
                            );
                        }
                        let matrices = engine.compute(&region, assembly.haplotypes());
                        let calls = genotyper.genotype(&region, &assembly, &matrices)?;
                        sender.send(RegionResult { index, calls })?;
                    }
                    Ok(())
                }
            });

            let postprocessor = move |result: RegionResult| -> Result<()> {
                callset.add_region(result.calls);
                progress_logger.update(1u64);
                Ok(())
            };

            worker_pool(
                preprocessor,
                workers,
                postprocessor,
                threads * 2,
                threads * 2,
            )?;
        }
        progress_logger.stop();

        info!(
            "processed {} regions ({} with degraded assembly), {} records",
            callset.n_regions,
            callset.n_degraded,
            callset.records.len()
        );
        Ok(callset)
    }
}

/// Remove the given ranges from `range`.
fn subtract(range: Range<u64>, mut mask: Vec<Range<u64>>) -> Vec<Range<u64>> {
    mask.sort_by_key(|m| m.start);
    let mut remaining = Vec::new();
    let mut cursor = range.start;
    for m in mask {
        if m.end <= cursor || m.start >= range.end {
            continue;
        }
        if m.start > cursor {
            remaining.push(cursor..m.start);
        }
        cursor = cursor.max(m.end);
    }
    if cursor < range.end {
        remaining.push(cursor..range.end);
    }
    remaining
}
