// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Auxiliary tables consumed by the filters.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};

use crate::errors::Error;
use crate::genotyping::resources::tsv_reader;

#[derive(Debug, Deserialize)]
struct ContaminationRow {
    sample: String,
    contamination: f64,
}

#[derive(Debug, Deserialize)]
struct SegmentRow {
    sample: String,
    contig: String,
    start: u64,
    end: u64,
    minor_allele_fraction: f64,
}

fn invalid_row(table: &str, row: usize, msg: &str) -> anyhow::Error {
    Error::InvalidTableRow {
        table: table.to_owned(),
        row,
        msg: msg.to_owned(),
    }
    .into()
}

/// Estimated fraction of reads stemming from other individuals, per sample.
#[derive(Debug, Clone, Default)]
pub struct ContaminationTable {
    fractions: HashMap<String, f64>,
}

impl ContaminationTable {
    pub fn from_path<P: AsRef<Path> + Debug>(path: P) -> Result<Self> {
        let mut table = ContaminationTable::default();
        for (i, row) in tsv_reader(&path)?.deserialize().enumerate() {
            let row: ContaminationRow = row
                .with_context(|| format!("invalid row {} in contamination table {:?}", i + 1, path))?;
            if !(0.0..=1.0).contains(&row.contamination) {
                return Err(invalid_row(
                    "contamination",
                    i + 1,
                    "contamination has to be within [0, 1]",
                ));
            }
            table.insert(&row.sample, row.contamination);
        }
        Ok(table)
    }

    pub fn insert(&mut self, sample: &str, fraction: f64) {
        self.fractions.insert(sample.to_owned(), fraction);
    }

    /// Contamination of the given sample, 0 if unknown.
    pub fn fraction(&self, sample: &str) -> f64 {
        self.fractions.get(sample).cloned().unwrap_or(0.0)
    }
}

/// Copy number segments of the tumor samples with their minor allele fraction.
#[derive(Debug, Clone, Default)]
pub struct SegmentationTable {
    segments: HashMap<(String, String), BTreeMap<u64, (Range<u64>, f64)>>,
}

impl SegmentationTable {
    pub fn from_path<P: AsRef<Path> + Debug>(path: P) -> Result<Self> {
        let mut table = SegmentationTable::default();
        for (i, row) in tsv_reader(&path)?.deserialize().enumerate() {
            let row: SegmentRow = row
                .with_context(|| format!("invalid row {} in segmentation table {:?}", i + 1, path))?;
            if row.start >= row.end {
                return Err(invalid_row("segmentation", i + 1, "empty segment"));
            }
            if !(0.0..=0.5).contains(&row.minor_allele_fraction) {
                return Err(invalid_row(
                    "segmentation",
                    i + 1,
                    "minor allele fraction has to be within [0, 0.5]",
                ));
            }
            table.insert(
                &row.sample,
                &row.contig,
                row.start..row.end,
                row.minor_allele_fraction,
            );
        }
        Ok(table)
    }

    pub fn insert(&mut self, sample: &str, contig: &str, span: Range<u64>, maf: f64) {
        self.segments
            .entry((sample.to_owned(), contig.to_owned()))
            .or_default()
            .insert(span.start, (span, maf));
    }

    /// Minor allele fraction of the segment containing the given position.
    pub fn minor_allele_fraction(&self, sample: &str, contig: &str, pos: u64) -> Option<f64> {
        let segments = self
            .segments
            .get(&(sample.to_owned(), contig.to_owned()))?;
        segments
            .range(..=pos)
            .next_back()
            .filter(|(_, (span, _))| span.contains(&pos))
            .map(|(_, (_, maf))| *maf)
    }
}
