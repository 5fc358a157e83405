// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Read orientation counts collected during calling.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use anyhow::{Context, Result};

/// Reference depths are binned up to this value.
pub const MAX_HISTOGRAM_DEPTH: u32 = 200;

/// Counts of a site with at least one alternate read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct AltSiteRecord {
    /// Reference bases before, at and after the site.
    pub context: String,
    pub alt: char,
    pub ref_count: u32,
    pub alt_count: u32,
    /// Alternate reads from F1R2 pairs.
    pub alt_f1r2: u32,
}

impl AltSiteRecord {
    pub fn depth(&self) -> u32 {
        self.ref_count + self.alt_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HistogramRow {
    context: String,
    depth: u32,
    count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct F1R2Table {
    alt_sites: Vec<AltSiteRecord>,
    /// Per context, number of reference sites by (capped) depth.
    ref_histograms: BTreeMap<String, BTreeMap<u32, u64>>,
}

impl F1R2Table {
    pub fn add_alt_site(&mut self, record: AltSiteRecord) {
        self.alt_sites.push(record);
    }

    pub fn add_ref_site(&mut self, context: &str, depth: u32) {
        *self
            .ref_histograms
            .entry(context.to_owned())
            .or_default()
            .entry(depth.min(MAX_HISTOGRAM_DEPTH))
            .or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: F1R2Table) {
        self.alt_sites.extend(other.alt_sites);
        for (context, histogram) in other.ref_histograms {
            let target = self.ref_histograms.entry(context).or_default();
            for (depth, count) in histogram {
                *target.entry(depth).or_insert(0) += count;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.alt_sites.is_empty() && self.ref_histograms.is_empty()
    }

    /// Write the alt site table and the reference histograms as TSV.
    pub fn write<P: AsRef<Path> + Debug>(&self, alt_path: P, histogram_path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&alt_path)
            .with_context(|| format!("unable to write {:?}", alt_path))?;
        for record in &self.alt_sites {
            writer.serialize(record)?;
        }
        writer.flush()?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&histogram_path)
            .with_context(|| format!("unable to write {:?}", histogram_path))?;
        for (context, histogram) in &self.ref_histograms {
            for (depth, count) in histogram {
                writer.serialize(HistogramRow {
                    context: context.clone(),
                    depth: *depth,
                    count: *count,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub fn from_paths<P: AsRef<Path> + Debug>(alt_path: P, histogram_path: P) -> Result<Self> {
        let mut table = F1R2Table::default();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(&alt_path)
            .with_context(|| format!("unable to read {:?}", alt_path))?;
        for record in reader.deserialize() {
            table.add_alt_site(record.with_context(|| format!("invalid row in {:?}", alt_path))?);
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(&histogram_path)
            .with_context(|| format!("unable to read {:?}", histogram_path))?;
        for row in reader.deserialize() {
            let row: HistogramRow =
                row.with_context(|| format!("invalid row in {:?}", histogram_path))?;
            *table
                .ref_histograms
                .entry(row.context)
                .or_default()
                .entry(row.depth)
                .or_insert(0) += row.count;
        }
        Ok(table)
    }
}
