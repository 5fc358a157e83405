// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bio_types::genome::Interval;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::Serialize;
use structopt::StructOpt;

use crate::calling::{Caller, CallerConfig};
use crate::concordance::{self, ConcordanceEvaluator, EvalSite};
use crate::errors::Error;
use crate::filtration::{
    ContaminationTable, Filter, FilterConfig, FilterEngine, FilterInputs, SegmentationTable,
};
use crate::genotyping::resources::{GermlineResource, PanelOfNormals};
use crate::orientation::{F1R2Table, LearnerConfig, OrientationBiasModel, OrientationLearner};
use crate::reads::{AlignedRead, SampleRole};
use crate::reference::{parse_interval, Reference};
use crate::variants::{CallRecord, FilteredCall, ForcedAllele, VariantKey};

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "oncocaller",
    about = "Local-assembly based calling and filtering of somatic variants in tumor/normal samples.",
    setting = structopt::clap::AppSettings::ColoredHelp
)]
pub struct Oncocaller {
    #[structopt(long, short, global = true, help = "Print debug messages.")]
    pub verbose: bool,
    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt, Clone)]
pub enum Command {
    #[structopt(
        name = "call",
        about = "Call somatic variants from aligned reads of tumor and (optionally) normal samples.",
        setting = structopt::clap::AppSettings::ColoredHelp
    )]
    Call {
        #[structopt(parse(from_os_str), help = "FASTA file with the reference genome.")]
        reference: PathBuf,
        #[structopt(
            long,
            parse(from_os_str),
            required = true,
            help = "JSON lines files with aligned reads."
        )]
        reads: Vec<PathBuf>,
        #[structopt(long = "tumor-sample", required = true, help = "Name of a tumor sample.")]
        tumor_samples: Vec<String>,
        #[structopt(long = "normal-sample", help = "Name of a matched normal sample.")]
        normal_samples: Vec<String>,
        #[structopt(
            long = "interval",
            short = "L",
            help = "Interval to call, as CONTIG or CONTIG:START-END (1-based, inclusive). \
                    If omitted, all contigs are called."
        )]
        intervals: Vec<String>,
        #[structopt(long = "exclude", help = "Interval to exclude from calling.")]
        exclude: Vec<String>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "TSV file with population allele frequencies (contig, pos, ref, alt, af)."
        )]
        germline_resource: Option<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "TSV file with sites of the panel of normals (contig, pos, ref, alt)."
        )]
        panel_of_normals: Option<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "JSON lines file with alleles that have to be genotyped regardless of evidence."
        )]
        force_calls: Option<PathBuf>,
        #[structopt(
            long,
            help = "Emit reference blocks and a symbolic <NON_REF> allele at every site."
        )]
        reference_confidence: bool,
        #[structopt(long, help = "Minimum allele fraction assumed for the <NON_REF> allele.")]
        min_allele_fraction: Option<f64>,
        #[structopt(
            long,
            help = "Substitutions at most this far apart on the same haplotype are joined (0 disables)."
        )]
        max_mnp_distance: Option<u64>,
        #[structopt(long, help = "Number of threads.")]
        threads: Option<usize>,
        #[structopt(long, help = "Seed for the downsampling of reads.")]
        seed: Option<u64>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "JSON file with the calling configuration. Command line options take precedence."
        )]
        config: Option<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "Output file with JSON lines call records (if omitted, write to STDOUT)."
        )]
        output: Option<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            requires = "f1r2-histogram",
            help = "TSV file that shall contain the alt sites of the F1R2 counts."
        )]
        f1r2_alt: Option<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            requires = "f1r2-alt",
            help = "TSV file that shall contain the reference site histograms of the F1R2 counts."
        )]
        f1r2_histogram: Option<PathBuf>,
    },
    #[structopt(
        name = "learn-orientation-model",
        about = "Learn the prior probabilities of orientation bias artifacts from F1R2 counts.",
        setting = structopt::clap::AppSettings::ColoredHelp
    )]
    LearnOrientationModel {
        #[structopt(long, parse(from_os_str), required = true, help = "F1R2 alt site tables.")]
        alt_tables: Vec<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            required = true,
            help = "F1R2 reference histograms, one per alt site table."
        )]
        histograms: Vec<PathBuf>,
        #[structopt(long, help = "Maximum number of EM iterations.")]
        max_iterations: Option<usize>,
        #[structopt(long, help = "Contexts with fewer alt sites are not learned.")]
        min_alt_sites: Option<usize>,
        #[structopt(long, parse(from_os_str), help = "JSON file for the model.")]
        output: PathBuf,
    },
    #[structopt(
        name = "filter-calls",
        about = "Apply the filters to a call set. Reference blocks are dropped.",
        setting = structopt::clap::AppSettings::ColoredHelp
    )]
    FilterCalls {
        #[structopt(
            parse(from_os_str),
            help = "JSON lines file with call records (if omitted, read from STDIN)."
        )]
        calls: Option<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "FASTA file with the reference genome, used to validate contigs."
        )]
        reference: Option<PathBuf>,
        #[structopt(long, parse(from_os_str), help = "TSV file with contamination per sample.")]
        contamination_table: Option<PathBuf>,
        #[structopt(long, parse(from_os_str), help = "TSV file with tumor segments.")]
        segmentation_table: Option<PathBuf>,
        #[structopt(long, parse(from_os_str), help = "JSON file with the orientation bias model.")]
        orientation_model: Option<PathBuf>,
        #[structopt(long, help = "Use the thresholds for the mitochondrial genome.")]
        mitochondria: bool,
        #[structopt(long, help = "Median autosomal coverage, enables the NuMT filter.")]
        autosomal_coverage: Option<f64>,
        #[structopt(long, help = "Minimum allele fraction.")]
        min_allele_fraction: Option<f64>,
        #[structopt(long, help = "Minimum tumor log10 odds.")]
        tumor_log_odds: Option<f64>,
        #[structopt(long, help = "Do not check contigs against the reference.")]
        skip_dictionary_validation: bool,
        #[structopt(
            long = "require-filter",
            parse(try_from_str = parse_filter),
            help = "Filter whose input has to be present."
        )]
        required_filters: Vec<Filter>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "JSON file with the filter configuration. Command line options take precedence."
        )]
        config: Option<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "Output file with JSON lines filtered calls (if omitted, write to STDOUT)."
        )]
        output: Option<PathBuf>,
    },
    #[structopt(
        name = "concordance",
        about = "Compare a call set against a truth set.",
        setting = structopt::clap::AppSettings::ColoredHelp
    )]
    Concordance {
        #[structopt(long, parse(from_os_str), help = "JSON lines file with truth sites.")]
        truth: PathBuf,
        #[structopt(
            long,
            parse(from_os_str),
            help = "JSON lines file with filtered calls or plain sites."
        )]
        eval: PathBuf,
        #[structopt(
            long,
            parse(from_os_str),
            help = "FASTA file with the reference genome, needed for intervals without coordinates."
        )]
        reference: Option<PathBuf>,
        #[structopt(long = "interval", short = "L", help = "Interval to evaluate.")]
        intervals: Vec<String>,
        #[structopt(long = "mask", help = "Interval to exclude from evaluation.")]
        mask: Vec<String>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "TSV file for the summary (if omitted, write to STDOUT)."
        )]
        summary: Option<PathBuf>,
    },
}

fn parse_filter(name: &str) -> Result<Filter, Error> {
    name.parse().map_err(|_| Error::UnknownFilter {
        name: name.to_owned(),
    })
}

pub fn run(opt: Oncocaller) -> Result<()> {
    match opt.command {
        Command::Call {
            ref reference,
            ref reads,
            ref tumor_samples,
            ref normal_samples,
            ref intervals,
            ref exclude,
            ref germline_resource,
            ref panel_of_normals,
            ref force_calls,
            reference_confidence,
            min_allele_fraction,
            max_mnp_distance,
            threads,
            seed,
            ref config,
            ref output,
            ref f1r2_alt,
            ref f1r2_histogram,
        } => {
            let mut caller_config: CallerConfig = match config {
                Some(path) => load_json(path)?,
                None => CallerConfig::default(),
            };
            if reference_confidence {
                caller_config = caller_config.with_reference_confidence(true);
            }
            if let Some(min_allele_fraction) = min_allele_fraction {
                caller_config.genotyper.minimum_allele_fraction = min_allele_fraction;
            }
            if let Some(max_mnp_distance) = max_mnp_distance {
                caller_config.assembler.max_mnp_distance = max_mnp_distance;
            }
            if let Some(threads) = threads {
                caller_config.threads = threads;
            }
            if let Some(seed) = seed {
                caller_config.seed = seed;
            }

            let roles = sample_roles(tumor_samples, normal_samples)?;
            let reference = Reference::from_path(reference)?;
            let intervals = reference.intervals(intervals)?;
            let exclude = if exclude.is_empty() {
                Vec::new()
            } else {
                reference.intervals(exclude)?
            };

            let germline_resource = germline_resource
                .as_ref()
                .map(GermlineResource::from_path)
                .transpose()?
                .map(Arc::new);
            let panel_of_normals = panel_of_normals
                .as_ref()
                .map(PanelOfNormals::from_path)
                .transpose()?
                .map(Arc::new);
            let forced_alleles: Vec<ForcedAllele> = match force_calls {
                Some(path) => read_json_lines(Some(path))?,
                None => Vec::new(),
            };

            let mut all_reads: Vec<AlignedRead> = Vec::new();
            for path in reads {
                all_reads.extend(read_json_lines::<AlignedRead, _>(Some(path))?);
            }
            info!("loaded {} reads", all_reads.len());

            let caller = Caller::new(caller_config, &reference, roles)?
                .with_germline_resource(germline_resource)
                .with_panel_of_normals(panel_of_normals)
                .with_forced_alleles(forced_alleles)?
                .with_exclusion_mask(exclude);
            let callset = caller.call(all_reads, &intervals)?;
            let (records, f1r2) = callset.into_parts();

            write_json_lines(output.as_ref(), &records)?;
            if let (Some(alt_path), Some(histogram_path)) = (f1r2_alt, f1r2_histogram) {
                f1r2.write(alt_path, histogram_path)?;
            }
            Ok(())
        }
        Command::LearnOrientationModel {
            ref alt_tables,
            ref histograms,
            max_iterations,
            min_alt_sites,
            ref output,
        } => {
            if alt_tables.len() != histograms.len() {
                bail!(Error::InvalidConfiguration {
                    msg: "each F1R2 alt site table needs its reference histogram".to_owned()
                });
            }
            let mut table = F1R2Table::default();
            for (alt_path, histogram_path) in alt_tables.iter().zip(histograms) {
                table.merge(F1R2Table::from_paths(alt_path, histogram_path)?);
            }

            let mut config = LearnerConfig::default();
            if let Some(max_iterations) = max_iterations {
                config.max_iterations = max_iterations;
            }
            if let Some(min_alt_sites) = min_alt_sites {
                config.min_alt_sites = min_alt_sites;
            }
            let model = OrientationLearner::new(config).learn(&table);
            model.to_path(output)
        }
        Command::FilterCalls {
            ref calls,
            ref reference,
            ref contamination_table,
            ref segmentation_table,
            ref orientation_model,
            mitochondria,
            autosomal_coverage,
            min_allele_fraction,
            tumor_log_odds,
            skip_dictionary_validation,
            ref required_filters,
            ref config,
            ref output,
        } => {
            let mut filter_config: FilterConfig = match config {
                Some(path) => load_json(path)?,
                None if mitochondria => FilterConfig::mitochondria(),
                None => FilterConfig::default(),
            };
            filter_config.mitochondria |= mitochondria;
            if let Some(autosomal_coverage) = autosomal_coverage {
                filter_config.autosomal_coverage = autosomal_coverage;
            }
            if let Some(min_allele_fraction) = min_allele_fraction {
                filter_config.min_allele_fraction = min_allele_fraction;
            }
            if let Some(tumor_log_odds) = tumor_log_odds {
                filter_config.tumor_log_odds = tumor_log_odds;
            }
            if skip_dictionary_validation {
                filter_config.validate_dictionary = false;
            }
            filter_config
                .required_filters
                .extend(required_filters.iter().cloned());

            let inputs = FilterInputs {
                contamination: contamination_table
                    .as_ref()
                    .map(ContaminationTable::from_path)
                    .transpose()?,
                segments: segmentation_table
                    .as_ref()
                    .map(SegmentationTable::from_path)
                    .transpose()?,
                orientation: orientation_model
                    .as_ref()
                    .map(OrientationBiasModel::from_path)
                    .transpose()?,
                dictionary: reference
                    .as_ref()
                    .map(|path| Reference::from_path(path).map(|r| r.dictionary().to_vec()))
                    .transpose()?,
            };
            let engine = FilterEngine::new(filter_config, inputs)?;

            let records: Vec<CallRecord> = read_json_lines(calls.as_ref())?;
            let n_records = records.len();
            let calls: Vec<_> = records
                .into_iter()
                .filter_map(CallRecord::into_variant)
                .collect();
            debug!("dropped {} reference blocks", n_records - calls.len());

            let filtered = engine.filter(calls)?;
            write_json_lines(output.as_ref(), &filtered)
        }
        Command::Concordance {
            ref truth,
            ref eval,
            ref reference,
            ref intervals,
            ref mask,
            ref summary,
        } => {
            let reference = reference.as_ref().map(Reference::from_path).transpose()?;
            let intervals = resolve_intervals(intervals, reference.as_ref())?;
            let mask = resolve_intervals(mask, reference.as_ref())?;

            let truth: Vec<VariantKey> = read_json_lines(Some(truth))?;
            let eval: Vec<EvalSite> = read_json_lines::<EvalRecord, _>(Some(eval))?
                .into_iter()
                .map(EvalRecord::into_site)
                .collect();

            let records = ConcordanceEvaluator::new(intervals, mask).evaluate(&truth, &eval);
            for record in &records {
                info!(
                    "{}: TP={} FP={} FN={}",
                    record.variant_type(),
                    record.true_positives(),
                    record.false_positives(),
                    record.false_negatives()
                );
            }
            match summary {
                Some(path) => concordance::write_summary_to_path(path, &records),
                None => concordance::write_summary(io::stdout(), &records),
            }
        }
    }
}

/// A record of an evaluated call set, either filtered or a plain site.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EvalRecord {
    Filtered(FilteredCall),
    Site(VariantKey),
}

impl EvalRecord {
    fn into_site(self) -> EvalSite {
        match self {
            EvalRecord::Filtered(call) => EvalSite::from(&call),
            EvalRecord::Site(key) => EvalSite::from(key),
        }
    }
}

fn sample_roles(tumors: &[String], normals: &[String]) -> Result<HashMap<String, SampleRole>> {
    if tumors.is_empty() {
        return Err(Error::NoTumorSample.into());
    }
    let duplicates = tumors.iter().filter(|name| normals.contains(name)).join(", ");
    if !duplicates.is_empty() {
        bail!(Error::InvalidConfiguration {
            msg: format!("samples {} are given as tumor and normal", duplicates)
        });
    }
    Ok(tumors
        .iter()
        .map(|name| (name.clone(), SampleRole::Tumor))
        .chain(normals.iter().map(|name| (name.clone(), SampleRole::Normal)))
        .collect())
}

/// Intervals without a reference have to carry coordinates.
fn resolve_intervals(specs: &[String], reference: Option<&Reference>) -> Result<Vec<Interval>> {
    if specs.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(reference) = reference {
        return reference.intervals(specs);
    }
    specs
        .iter()
        .map(|spec| match parse_interval(spec)? {
            (contig, Some(range)) => Ok(Interval::new(contig, range)),
            (_, None) => Err(Error::InvalidInterval { spec: spec.clone() }.into()),
        })
        .collect()
}

fn load_json<T: DeserializeOwned, P: AsRef<Path> + Debug>(path: P) -> Result<T> {
    let file = File::open(&path).with_context(|| format!("unable to open {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid JSON in {:?}", path))
}

/// Read newline separated JSON records from the given file or STDIN.
pub fn read_json_lines<T: DeserializeOwned, P: AsRef<Path> + Debug>(
    path: Option<P>,
) -> Result<Vec<T>> {
    let reader: Box<dyn BufRead> = match &path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("unable to open {:?}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let source = path
        .as_ref()
        .map_or_else(|| "STDIN".to_owned(), |path| format!("{:?}", path));
    serde_json::Deserializer::from_reader(reader)
        .into_iter::<T>()
        .enumerate()
        .map(|(i, record)| {
            record.with_context(|| format!("invalid record {} in {}", i + 1, source))
        })
        .collect()
}

/// Write records as newline separated JSON to the given file or STDOUT.
pub fn write_json_lines<T: Serialize, P: AsRef<Path> + Debug>(
    path: Option<P>,
    records: &[T],
) -> Result<()> {
    let writer: Box<dyn Write> = match &path {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("unable to create {:?}", path))?,
        ),
        None => Box::new(io::stdout()),
    };
    let mut writer = BufWriter::new(writer);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bio_types::genome::AbstractInterval;

    #[test]
    fn test_parse_call_command() {
        let opt = Oncocaller::from_iter(vec![
            "oncocaller",
            "call",
            "ref.fa",
            "--reads",
            "tumor.jsonl",
            "--tumor-sample",
            "tumor",
            "-L",
            "chrM:1-100",
            "--reference-confidence",
        ]);
        match opt.command {
            Command::Call {
                tumor_samples,
                intervals,
                reference_confidence,
                ..
            } => {
                assert_eq!(tumor_samples, vec!["tumor".to_owned()]);
                assert_eq!(intervals, vec!["chrM:1-100".to_owned()]);
                assert!(reference_confidence);
            }
            _ => panic!("expected call command"),
        }
    }

    #[test]
    fn test_parse_required_filters() {
        let opt = Oncocaller::from_iter(vec![
            "oncocaller",
            "filter-calls",
            "--require-filter",
            "contamination",
            "--require-filter",
            "orientation",
        ]);
        match opt.command {
            Command::FilterCalls {
                required_filters, ..
            } => assert_eq!(
                required_filters,
                vec![Filter::Contamination, Filter::Orientation]
            ),
            _ => panic!("expected filter-calls command"),
        }
        assert!(parse_filter("no_such_filter").is_err());
    }

    #[test]
    fn test_sample_roles() {
        let roles = sample_roles(&["t".to_owned()], &["n".to_owned()]).unwrap();
        assert_eq!(roles["t"], SampleRole::Tumor);
        assert_eq!(roles["n"], SampleRole::Normal);
        assert!(sample_roles(&[], &["n".to_owned()]).is_err());
        assert!(sample_roles(&["x".to_owned()], &["x".to_owned()]).is_err());
    }

    #[test]
    fn test_resolve_intervals_without_reference() {
        let intervals = resolve_intervals(&["chr1:11-20".to_owned()], None).unwrap();
        assert_eq!(intervals[0].range(), 10..20);
        assert!(resolve_intervals(&["chr1".to_owned()], None).is_err());
    }

    #[test]
    fn test_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.jsonl");
        let keys = vec![
            VariantKey {
                contig: "chr1".to_owned(),
                pos: 10,
                ref_allele: "A".to_owned(),
                alt_alleles: vec!["T".to_owned()],
            },
            VariantKey {
                contig: "chr1".to_owned(),
                pos: 20,
                ref_allele: "AC".to_owned(),
                alt_alleles: vec!["A".to_owned(), "GC".to_owned()],
            },
        ];
        write_json_lines(Some(&path), &keys).unwrap();
        let read: Vec<VariantKey> = read_json_lines(Some(&path)).unwrap();
        assert_eq!(read, keys);

        let eval: Vec<EvalRecord> = read_json_lines(Some(&path)).unwrap();
        assert!(eval.into_iter().all(|record| record.into_site().is_pass));
    }
}
