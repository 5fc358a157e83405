// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

#[macro_use]
extern crate approx;

use std::fs;
use std::sync::Arc;

use itertools::Itertools;
use structopt::StructOpt;

use oncocaller::calling::{Caller, CallerConfig};
use oncocaller::cli::{run, write_json_lines, Oncocaller};
use oncocaller::filtration::{ContaminationTable, Filter, FilterConfig, FilterEngine, FilterInputs};
use oncocaller::genotyping::resources::PanelOfNormals;
use oncocaller::orientation::{LearnerConfig, OrientationBiasModel, OrientationLearner};
use oncocaller::reads::{parse_cigar, AlignedRead, PairOrientation, Strand};
use oncocaller::variants::{Allele, AlleleCall, CallRecord, ForcedAllele, VariantKey};

mod common;

use common::{
    call, mixture, other_base, random_sequence, tumor_normal, tumor_only, variants, Donor, QUAL,
    READ_LEN,
};

fn snv(seq: &[u8], pos: u64, shift: usize) -> (u64, Vec<u8>, Vec<u8>) {
    let base = seq[pos as usize];
    (pos, vec![base], vec![other_base(base, shift)])
}

fn positions_and_lengths(calls: &[&AlleleCall]) -> Vec<(u64, usize, usize)> {
    calls
        .iter()
        .map(|call| {
            let alt_len = call.alt_alleles()[0].bases().map_or(0, |bases| bases.len());
            (call.pos(), call.ref_allele().len(), alt_len)
        })
        .collect()
}

/// Log odds agree within 1% or 0.05.
fn log_odds_agree(a: f64, b: f64) -> bool {
    let diff = (a - b).abs();
    diff <= 0.05 || diff <= 0.01 * a.abs().max(b.abs())
}

#[test]
fn test_mnp_distance() {
    let seq = random_sequence(1500, 1);
    let reference = common::reference("chr1", &seq);
    let alt = Donor::new(&seq, &[snv(&seq, 700, 1), snv(&seq, 702, 2)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture("chr1", &[(&alt, 4, 0), (&ref_donor, 4, 2)]);

    for (distance, expected) in vec![
        (0, vec![(700, 1, 1), (702, 1, 1)]),
        (1, vec![(700, 1, 1), (702, 1, 1)]),
        (2, vec![(700, 3, 3)]),
        (5, vec![(700, 3, 3)]),
    ] {
        let mut config = CallerConfig::default();
        config.assembler.max_mnp_distance = distance;
        let callset = call(config, &reference, reads.clone(), vec![]).unwrap();
        assert_eq!(
            positions_and_lengths(&variants(&callset)),
            expected,
            "max MNP distance {}",
            distance
        );
    }
}

#[test]
fn test_mnp_spacings() {
    let seq = random_sequence(1500, 2);
    let reference = common::reference("chr1", &seq);
    // gaps of 2, 3 and 4 between the substitutions
    let alt = Donor::new(
        &seq,
        &[
            snv(&seq, 700, 1),
            snv(&seq, 702, 1),
            snv(&seq, 705, 1),
            snv(&seq, 709, 1),
        ],
    );
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture("chr1", &[(&alt, 4, 0), (&ref_donor, 4, 2)]);

    for (distance, expected) in vec![
        (2, vec![(700, 3, 3), (705, 1, 1), (709, 1, 1)]),
        (3, vec![(700, 6, 6), (709, 1, 1)]),
        (4, vec![(700, 10, 10)]),
    ] {
        let mut config = CallerConfig::default();
        config.assembler.max_mnp_distance = distance;
        let callset = call(config, &reference, reads.clone(), vec![]).unwrap();
        assert_eq!(
            positions_and_lengths(&variants(&callset)),
            expected,
            "max MNP distance {}",
            distance
        );
    }
}

#[test]
fn test_force_calling() {
    let seq = random_sequence(1500, 3);
    let reference = common::reference("chr1", &seq);
    let ref_donor = Donor::new(&seq, &[]);
    // no coverage beyond position 1100
    let reads: Vec<AlignedRead> = ref_donor
        .reads("chr1", "tumor", "r", 3, 0)
        .into_iter()
        .filter(|read| read.start() < 1000)
        .collect();

    let covered = ForcedAllele::new(
        "chr1".to_owned(),
        400,
        vec![seq[400]],
        vec![other_base(seq[400], 1)],
    );
    let uncovered = ForcedAllele::new(
        "chr1".to_owned(),
        1300,
        vec![seq[1300]],
        vec![other_base(seq[1300], 1)],
    );
    let callset = call(
        CallerConfig::default(),
        &reference,
        reads,
        vec![covered.clone(), uncovered.clone()],
    )
    .unwrap();
    let calls = variants(&callset);

    for forced in &[covered, uncovered] {
        let call = calls
            .iter()
            .find(|call| call.pos() == forced.pos)
            .unwrap_or_else(|| panic!("no call for forced allele at {}", forced.pos));
        assert!(call
            .alt_alleles()
            .contains(&Allele::Bases(forced.alt_allele.clone())));
        assert!(call.forced().iter().any(|f| *f));
    }

    let uncovered_call = calls.iter().find(|call| call.pos() == 1300).unwrap();
    assert_relative_eq!(uncovered_call.tumor_log_odds()[0], 0.0);
    assert_eq!(uncovered_call.tumor_allele_depths().iter().sum::<u32>(), 0);
}

#[test]
fn test_forced_allele_must_match_reference() {
    let seq = random_sequence(500, 4);
    let reference = common::reference("chr1", &seq);
    let wrong = ForcedAllele::new(
        "chr1".to_owned(),
        100,
        vec![other_base(seq[100], 1)],
        vec![other_base(seq[100], 2)],
    );
    assert!(call(CallerConfig::default(), &reference, vec![], vec![wrong]).is_err());
}

#[test]
fn test_mitochondria() {
    let seq = random_sequence(2000, 5);
    let reference = common::reference("chrM", &seq);
    let tri = 151;
    let bi = 1000;
    let donor1 = Donor::new(&seq, &[snv(&seq, tri, 1), snv(&seq, bi, 2)]);
    let donor2 = Donor::new(&seq, &[snv(&seq, tri, 2)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture(
        "chrM",
        &[(&ref_donor, 5, 0), (&donor1, 5, 1), (&donor2, 5, 2)],
    );

    let base = |pos: u64| seq[pos as usize] as char;
    let alt = |pos: u64, shift: usize| other_base(seq[pos as usize], shift) as char;
    let mut tri_alts = vec![alt(tri, 1), alt(tri, 2)];
    tri_alts.sort_unstable();
    let expected_keys = vec![
        format!(
            "chrM:152-152 {}*, [{}, {}]",
            base(tri),
            tri_alts[0],
            tri_alts[1]
        ),
        format!("chrM:1001-1001 {}*, [{}]", base(bi), alt(bi, 2)),
    ];

    let callset = call(CallerConfig::default(), &reference, reads.clone(), vec![]).unwrap();
    let calls = variants(&callset);
    assert_eq!(
        calls.iter().map(|call| call.display_key()).collect_vec(),
        expected_keys
    );

    let ref_conf = |min_af: f64| {
        let mut config = CallerConfig::default().with_reference_confidence(true);
        config.genotyper.minimum_allele_fraction = min_af;
        call(config, &reference, reads.clone(), vec![]).unwrap()
    };
    let with_min_af = ref_conf(0.01);
    let without_min_af = ref_conf(0.0);

    for callset in &[&with_min_af, &without_min_af] {
        match callset.records().first() {
            Some(CallRecord::ReferenceBlock(block)) => assert_eq!(block.start(), 0),
            _ => panic!("first record has to be a reference block"),
        }
        let positions = callset.records().iter().map(|r| r.pos()).collect_vec();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));

        let ref_conf_calls = variants(callset);
        assert_eq!(ref_conf_calls.len(), calls.len());
        for (ref_conf_call, call) in ref_conf_calls.iter().zip(&calls) {
            let (non_ref, alts) = ref_conf_call.alt_alleles().split_last().unwrap();
            assert_eq!(*non_ref, Allele::NonRef);
            assert_eq!(alts, &call.alt_alleles()[..]);
            assert_eq!(ref_conf_call.pos(), call.pos());
        }
    }

    let mut non_ref_changed = false;
    for (a, b) in variants(&with_min_af).iter().zip(variants(&without_min_af)) {
        let n = a.tumor_log_odds().len();
        for (lod_a, lod_b) in a.tumor_log_odds()[..n - 1]
            .iter()
            .zip(&b.tumor_log_odds()[..n - 1])
        {
            assert!(log_odds_agree(*lod_a, *lod_b), "{} vs {}", lod_a, lod_b);
        }
        if (a.tumor_log_odds()[n - 1] - b.tumor_log_odds()[n - 1]).abs() > 0.05 {
            non_ref_changed = true;
        }
    }
    assert!(non_ref_changed);

    // reference blocks carry no alternate alleles and are never filtered
    let filtered = FilterEngine::new(FilterConfig::mitochondria(), FilterInputs::default())
        .unwrap()
        .filter(calls.into_iter().cloned().collect())
        .unwrap();
    assert_eq!(filtered.len(), 2);
    assert!(filtered
        .iter()
        .all(|call| !call.filters().contains(&Filter::Germline)));
}

#[test]
fn test_contamination_monotonicity() {
    let seq = random_sequence(1500, 6);
    let reference = common::reference("chr1", &seq);
    let high = Donor::new(&seq, &[snv(&seq, 300, 1)]);
    let low = Donor::new(&seq, &[snv(&seq, 700, 1)]);
    let mid = Donor::new(&seq, &[snv(&seq, 1100, 1)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture(
        "chr1",
        &[
            (&ref_donor, 4, 0),
            (&high, 8, 1),
            (&low, 20, 2),
            (&mid, 12, 3),
        ],
    );
    let callset = call(CallerConfig::default(), &reference, reads, vec![]).unwrap();
    let calls: Vec<AlleleCall> = variants(&callset).into_iter().cloned().collect();
    assert!(calls.iter().any(|call| call.pos() == 300));

    let contaminated = |fraction: f64| {
        let mut table = ContaminationTable::default();
        table.insert("tumor", fraction);
        let inputs = FilterInputs {
            contamination: Some(table),
            ..Default::default()
        };
        FilterEngine::new(FilterConfig::default(), inputs)
            .unwrap()
            .filter(calls.clone())
            .unwrap()
    };

    let mut last = 0;
    for fraction in &[0.0, 0.02, 0.05, 0.1, 0.3] {
        let filtered = contaminated(*fraction);
        let tagged = filtered
            .iter()
            .filter(|call| call.filters().contains(&Filter::Contamination))
            .count();
        if *fraction == 0.0 {
            assert_eq!(tagged, 0);
        }
        if *fraction == 0.05 {
            let high_af = filtered
                .iter()
                .find(|call| call.call().pos() == 300)
                .unwrap();
            assert!(!high_af.filters().contains(&Filter::Contamination));
        }
        assert!(tagged >= last, "contamination {}", fraction);
        last = tagged;
    }
}

#[test]
fn test_same_seed_same_calls_across_threads() {
    let seq = random_sequence(1500, 7);
    let reference = common::reference("chr1", &seq);
    let alt = Donor::new(&seq, &[snv(&seq, 500, 1), snv(&seq, 1000, 3)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture("chr1", &[(&alt, 2, 0), (&ref_donor, 1, 0)]);

    let run_with = |threads: usize| {
        let mut config = CallerConfig::default();
        config.threads = threads;
        config.seed = 1234;
        config.likelihood.max_reads_per_region = 40;
        call(config, &reference, reads.clone(), vec![]).unwrap()
    };
    let single = run_with(1);
    let multi = run_with(4);
    assert!(!variants(&single).is_empty());
    assert_eq!(single.records(), multi.records());
    assert_eq!(single.f1r2(), multi.f1r2());
}

#[test]
fn test_unusual_reads() {
    let seq = random_sequence(600, 8);
    let reference = common::reference("chr1", &seq);
    let ref_donor = Donor::new(&seq, &[]);
    let mut reads = ref_donor.reads("chr1", "tumor", "r", 5, 0);
    // repeated reads
    reads.extend(reads.clone());
    // no reference bases consumed
    reads.push(AlignedRead::new(
        "ins".to_owned(),
        "tumor".to_owned(),
        "chr1".to_owned(),
        100,
        b"ACGT".to_vec(),
        vec![30; 4],
        parse_cigar("4I").unwrap(),
        60,
        Strand::Forward,
        PairOrientation::Unpaired,
    ));
    // unpaired
    reads.push(AlignedRead::new(
        "unpaired".to_owned(),
        "tumor".to_owned(),
        "chr1".to_owned(),
        200,
        seq[200..250].to_vec(),
        vec![30; 50],
        parse_cigar("50M").unwrap(),
        60,
        Strand::Reverse,
        PairOrientation::Unpaired,
    ));
    let callset = call(CallerConfig::default(), &reference, reads, vec![]).unwrap();
    assert!(variants(&callset).is_empty());
}

#[test]
fn test_orientation_model_from_calls() {
    let seq = random_sequence(1500, 9);
    let reference = common::reference("chr1", &seq);
    let alt = Donor::new(&seq, &[snv(&seq, 600, 1)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture("chr1", &[(&alt, 4, 0), (&ref_donor, 4, 2)]);
    let callset = call(CallerConfig::default(), &reference, reads, vec![]).unwrap();
    assert!(!callset.f1r2().is_empty());

    let dir = tempfile::tempdir().unwrap();
    let (alt_path, histogram_path) = (dir.path().join("alt.tsv"), dir.path().join("hist.tsv"));
    callset.f1r2().write(&alt_path, &histogram_path).unwrap();

    // far too few sites to learn anything
    let model = OrientationLearner::new(LearnerConfig::default()).learn(callset.f1r2());
    assert!(model.contexts().values().all(|context| !context.informative()));

    let model_path = dir.path().join("model.json");
    model.to_path(&model_path).unwrap();
    assert_eq!(OrientationBiasModel::from_path(&model_path).unwrap(), model);

    let opt = Oncocaller::from_iter(vec![
        "oncocaller".to_owned(),
        "learn-orientation-model".to_owned(),
        "--alt-tables".to_owned(),
        alt_path.to_string_lossy().into_owned(),
        "--histograms".to_owned(),
        histogram_path.to_string_lossy().into_owned(),
        "--output".to_owned(),
        model_path.to_string_lossy().into_owned(),
    ]);
    run(opt).unwrap();
    assert!(OrientationBiasModel::from_path(&model_path).is_ok());
}

#[test]
fn test_concordance_command() {
    let key = |pos: u64, ref_allele: &str, alt: &str| VariantKey {
        contig: "chr1".to_owned(),
        pos,
        ref_allele: ref_allele.to_owned(),
        alt_alleles: vec![alt.to_owned()],
    };
    let truth = (0..10).map(|i| key(100 * i, "A", "T")).collect_vec();
    let mut eval = (0..7).map(|i| key(100 * i, "A", "T")).collect_vec();
    eval.push(key(5000, "C", "G"));
    eval.push(key(6000, "C", "G"));

    let dir = tempfile::tempdir().unwrap();
    let truth_path = dir.path().join("truth.jsonl");
    let eval_path = dir.path().join("eval.jsonl");
    let summary_path = dir.path().join("summary.tsv");
    write_json_lines(Some(&truth_path), &truth).unwrap();
    write_json_lines(Some(&eval_path), &eval).unwrap();

    let opt = Oncocaller::from_iter(vec![
        "oncocaller".to_owned(),
        "concordance".to_owned(),
        "--truth".to_owned(),
        truth_path.to_string_lossy().into_owned(),
        "--eval".to_owned(),
        eval_path.to_string_lossy().into_owned(),
        "--summary".to_owned(),
        summary_path.to_string_lossy().into_owned(),
    ]);
    run(opt).unwrap();

    let summary = fs::read_to_string(&summary_path).unwrap();
    let snv = summary.lines().nth(1).unwrap().split('\t').collect_vec();
    assert_eq!(&snv[..4], &["SNV", "7", "2", "3"]);
    assert_relative_eq!(snv[4].parse::<f64>().unwrap(), 0.7);
    assert_relative_eq!(snv[5].parse::<f64>().unwrap(), 0.778, epsilon = 0.001);
}

/// Tumor with SNVs at 400 and 1000, normal carrying the first one at low fraction.
fn tumor_normal_reads(seq: &[u8]) -> Vec<AlignedRead> {
    let alt = Donor::new(seq, &[snv(seq, 400, 1), snv(seq, 1000, 1)]);
    let ref_donor = Donor::new(seq, &[]);
    let artifact = Donor::new(seq, &[snv(seq, 400, 1)]);
    let mut reads = mixture("chr1", &[(&alt, 4, 0), (&ref_donor, 4, 2)]);
    reads.extend(ref_donor.reads("chr1", "normal", "n", 3, 0));
    reads.extend(artifact.reads("chr1", "normal", "a", 12, 1));
    reads
}

#[test]
fn test_tumor_normal() {
    let seq = random_sequence(1500, 10);
    let reference = common::reference("chr1", &seq);
    let callset = Caller::new(CallerConfig::default(), &reference, tumor_normal())
        .unwrap()
        .call(tumor_normal_reads(&seq), &[])
        .unwrap();
    let calls: Vec<AlleleCall> = variants(&callset).into_iter().cloned().collect();
    assert_eq!(calls.iter().map(|call| call.pos()).collect_vec(), vec![400, 1000]);
    for call in &calls {
        assert_eq!(call.normal_log_odds().as_ref().map(|nlod| nlod.len()), Some(1));
        assert_eq!(call.normal_artifact_log_odds().as_ref().map(|nalod| nalod.len()), Some(1));
        assert_eq!(call.normal_genotypes().count(), 1);
    }
    assert!(calls[0].normal_artifact_log_odds().as_ref().unwrap()[0] > 2.0);
    assert!(calls[1].normal_artifact_log_odds().as_ref().unwrap()[0] < 2.0);
    assert!(calls[1].normal_log_odds().as_ref().unwrap()[0] > 0.0);

    let filtered = FilterEngine::new(FilterConfig::default(), FilterInputs::default())
        .unwrap()
        .filter(calls)
        .unwrap();
    assert!(filtered[0].filters().contains(&Filter::NormalArtifact));
    assert!(!filtered[1].filters().contains(&Filter::NormalArtifact));
}

#[test]
fn test_panel_of_normals() {
    let seq = random_sequence(1500, 11);
    let reference = common::reference("chr1", &seq);
    let alt = Donor::new(&seq, &[snv(&seq, 400, 1), snv(&seq, 1000, 1)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture("chr1", &[(&alt, 4, 0), (&ref_donor, 4, 2)]);

    let mut panel = PanelOfNormals::default();
    panel.insert("chr1", 400, &[seq[400]], &[other_base(seq[400], 1)]);
    // same position, other allele
    panel.insert("chr1", 1000, &[seq[1000]], &[other_base(seq[1000], 2)]);
    let callset = Caller::new(CallerConfig::default(), &reference, tumor_only())
        .unwrap()
        .with_panel_of_normals(Some(Arc::new(panel)))
        .call(reads, &[])
        .unwrap();
    let calls: Vec<AlleleCall> = variants(&callset).into_iter().cloned().collect();
    assert_eq!(
        calls.iter().map(|call| (call.pos(), call.in_panel_of_normals())).collect_vec(),
        vec![(400, true), (1000, false)]
    );

    let filtered = FilterEngine::new(FilterConfig::default(), FilterInputs::default())
        .unwrap()
        .filter(calls)
        .unwrap();
    assert!(filtered[0].filters().contains(&Filter::PanelOfNormals));
    assert!(!filtered[1].filters().contains(&Filter::PanelOfNormals));
}

#[test]
fn test_allele_fraction_at_high_depth() {
    let seq = random_sequence(1500, 12);
    let reference = common::reference("chr1", &seq);
    let alt = Donor::new(&seq, &[snv(&seq, 700, 1)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture("chr1", &[(&alt, 2, 0), (&ref_donor, 1, 0)]);
    let callset = call(CallerConfig::default(), &reference, reads, vec![]).unwrap();
    let calls = variants(&callset);
    assert_eq!(calls.len(), 1);
    let tumor = calls[0].tumor_genotypes().next().unwrap();
    let depths = tumor.allele_depths();
    assert!(tumor.depth() > 100);
    let expected = depths[1] as f64 / (depths[0] + depths[1]) as f64;
    assert_relative_eq!(tumor.allele_fractions()[0], expected, epsilon = 0.03);
    assert_relative_eq!(tumor.allele_fractions()[0], 1.0 / 3.0, epsilon = 0.05);
}

#[test]
fn test_chimeric_original_alignment() {
    let seq = random_sequence(1500, 13);
    let reference = common::reference("chrM", &seq);
    let alt = Donor::new(&seq, &[snv(&seq, 300, 1), snv(&seq, 900, 1)]);
    let ref_donor = Donor::new(&seq, &[]);
    // alt reads at the first site were originally aligned to chr1
    let reads = mixture("chrM", &[(&alt, 4, 0), (&ref_donor, 4, 2)])
        .into_iter()
        .map(|read| {
            let moved = read.name().starts_with("d0r") && read.start() < 600;
            read.with_original_contig(Some(if moved { "chr1" } else { "chrM" }.to_owned()))
        })
        .collect_vec();
    let callset = call(CallerConfig::default(), &reference, reads, vec![]).unwrap();
    let calls: Vec<AlleleCall> = variants(&callset).into_iter().cloned().collect();
    assert_eq!(calls.iter().map(|call| call.pos()).collect_vec(), vec![300, 900]);
    let mismatches = |call: &AlleleCall| call.tumor_genotypes().next().unwrap().original_contig_mismatch()[1];
    assert!(mismatches(&calls[0]) > 0);
    assert_eq!(mismatches(&calls[1]), 0);

    let filtered = FilterEngine::new(FilterConfig::mitochondria(), FilterInputs::default())
        .unwrap()
        .filter(calls)
        .unwrap();
    assert!(filtered[0].filters().contains(&Filter::ChimericOriginalAlignment));
    assert!(!filtered[1].filters().contains(&Filter::ChimericOriginalAlignment));
}

#[test]
fn test_failed_assembly_falls_back_to_reference() {
    let seq = random_sequence(1500, 14);
    let reference = common::reference("chr1", &seq);
    let alt = Donor::new(&seq, &[snv(&seq, 700, 1)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture("chr1", &[(&alt, 4, 0), (&ref_donor, 4, 2)]);

    let mut config = CallerConfig::default();
    // every 1-mer repeats in the reference
    config.assembler.kmer_sizes = vec![1];
    config.assembler.dont_increase_kmer_sizes = true;
    let callset = call(config, &reference, reads.clone(), vec![]).unwrap();
    assert!(callset.n_degraded() > 0);
    assert!(callset.n_degraded() <= callset.n_regions());
    assert!(variants(&callset).is_empty());

    let forced = ForcedAllele::new(
        "chr1".to_owned(),
        700,
        vec![seq[700]],
        vec![other_base(seq[700], 1)],
    );
    let mut config = CallerConfig::default();
    config.assembler.kmer_sizes = vec![1];
    config.assembler.dont_increase_kmer_sizes = true;
    let callset = call(config, &reference, reads, vec![forced]).unwrap();
    let calls = variants(&callset);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].tumor_log_odds()[0] > 3.0);
}

#[test]
fn test_overlapping_intervals_are_merged() {
    let seq = random_sequence(1500, 15);
    let reference = common::reference("chr1", &seq);
    let alt = Donor::new(&seq, &[snv(&seq, 75, 1), snv(&seq, 550, 1)]);
    let ref_donor = Donor::new(&seq, &[]);
    let reads = mixture("chr1", &[(&alt, 4, 0), (&ref_donor, 4, 2)]);
    let intervals = reference
        .intervals(&[
            "chr1:500-600".to_owned(),
            "chr1:1-100".to_owned(),
            "chr1:50-150".to_owned(),
        ])
        .unwrap();
    let callset = Caller::new(CallerConfig::default(), &reference, tumor_only())
        .unwrap()
        .call(reads, &intervals)
        .unwrap();
    assert_eq!(
        variants(&callset).iter().map(|call| call.pos()).collect_vec(),
        vec![75, 550]
    );
}

#[test]
fn test_reads_wrapping_around_circular_contig() {
    let len = 1000;
    let seq = random_sequence(len, 16);
    let reference = common::reference("chrM", &seq);
    let variants_at = [snv(&seq, 20, 1), snv(&seq, 980, 1)];
    let alt = Donor::new(&seq, &variants_at);
    let mut reads = alt.reads("chrM", "tumor", "r", 2, 0);

    let mut alt_seq = seq.clone();
    for (pos, _, alt_allele) in &variants_at {
        alt_seq[*pos as usize] = alt_allele[0];
    }
    // aligned past the end of the contig, continuing at its origin
    for (i, start) in (len - 80..len - 10).step_by(2).enumerate() {
        let mut bases = alt_seq[start..].to_vec();
        bases.extend_from_slice(&alt_seq[..READ_LEN - (len - start)]);
        reads.push(AlignedRead::new(
            format!("w{}", i),
            "tumor".to_owned(),
            "chrM".to_owned(),
            start as u64,
            bases,
            vec![QUAL; READ_LEN],
            parse_cigar(&format!("{}M", READ_LEN)).unwrap(),
            60,
            if i % 2 == 0 { Strand::Forward } else { Strand::Reverse },
            PairOrientation::F1R2,
        ));
    }

    let callset = call(CallerConfig::default(), &reference, reads, vec![]).unwrap();
    let calls = variants(&callset);
    assert_eq!(calls.iter().map(|call| call.pos()).collect_vec(), vec![20, 980]);
    assert!(calls.iter().all(|call| call.end() <= len as u64));
}
