// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Germline population resource and panel of normals. Both are tab separated tables with
//! 0-based positions.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::path::Path;

use anyhow::{Context, Result};

use crate::variants::minimal_representation;

type SiteKey = (String, u64, Vec<u8>, Vec<u8>);

fn site_key(contig: &str, pos: u64, ref_allele: &[u8], alt_allele: &[u8]) -> SiteKey {
    let (pos, r, a) = minimal_representation(
        pos,
        &ref_allele.to_ascii_uppercase(),
        &alt_allele.to_ascii_uppercase(),
    );
    (contig.to_owned(), pos, r, a)
}

#[derive(Debug, Deserialize)]
struct ResourceRow {
    contig: String,
    pos: u64,
    #[serde(rename = "ref")]
    ref_allele: String,
    alt: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    af: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PanelRow {
    contig: String,
    pos: u64,
    #[serde(rename = "ref")]
    ref_allele: String,
    alt: String,
}

pub(crate) fn tsv_reader<P: AsRef<Path> + Debug>(path: P) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_path(&path)
        .with_context(|| format!("unable to open {:?}", path))
}

/// Population allele frequencies of known germline variants.
#[derive(Debug, Clone, Default)]
pub struct GermlineResource {
    frequencies: HashMap<SiteKey, Option<f64>>,
}

impl GermlineResource {
    pub fn from_path<P: AsRef<Path> + Debug>(path: P) -> Result<Self> {
        let mut resource = GermlineResource::default();
        for (i, row) in tsv_reader(&path)?.deserialize().enumerate() {
            let row: ResourceRow = row.with_context(|| {
                format!("invalid row {} in germline resource {:?}", i + 1, path)
            })?;
            resource.insert(
                &row.contig,
                row.pos,
                row.ref_allele.as_bytes(),
                row.alt.as_bytes(),
                row.af,
            );
        }
        info!(
            "loaded {} germline resource entries from {:?}",
            resource.frequencies.len(),
            path
        );
        Ok(resource)
    }

    pub fn insert(
        &mut self,
        contig: &str,
        pos: u64,
        ref_allele: &[u8],
        alt_allele: &[u8],
        af: Option<f64>,
    ) {
        self.frequencies
            .insert(site_key(contig, pos, ref_allele, alt_allele), af);
    }

    /// Population allele frequency of the given allele. Alleles absent from the resource, and
    /// entries without a frequency, get `default_af`.
    pub fn allele_frequency(
        &self,
        contig: &str,
        pos: u64,
        ref_allele: &[u8],
        alt_allele: &[u8],
        default_af: f64,
    ) -> f64 {
        self.frequencies
            .get(&site_key(contig, pos, ref_allele, alt_allele))
            .cloned()
            .flatten()
            .unwrap_or(default_af)
    }
}

/// Sites recurrently observed in normal samples.
#[derive(Debug, Clone, Default)]
pub struct PanelOfNormals {
    sites: HashSet<SiteKey>,
}

impl PanelOfNormals {
    pub fn from_path<P: AsRef<Path> + Debug>(path: P) -> Result<Self> {
        let mut panel = PanelOfNormals::default();
        for (i, row) in tsv_reader(&path)?.deserialize().enumerate() {
            let row: PanelRow = row
                .with_context(|| format!("invalid row {} in panel of normals {:?}", i + 1, path))?;
            panel.insert(&row.contig, row.pos, row.ref_allele.as_bytes(), row.alt.as_bytes());
        }
        info!("loaded {} panel of normals sites from {:?}", panel.sites.len(), path);
        Ok(panel)
    }

    pub fn insert(&mut self, contig: &str, pos: u64, ref_allele: &[u8], alt_allele: &[u8]) {
        self.sites
            .insert(site_key(contig, pos, ref_allele, alt_allele));
    }

    pub fn contains(&self, contig: &str, pos: u64, ref_allele: &[u8], alt_allele: &[u8]) -> bool {
        self.sites
            .contains(&site_key(contig, pos, ref_allele, alt_allele))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_germline_resource() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "contig\tpos\tref\talt\taf").unwrap();
        writeln!(file, "chr1\t100\tA\tG\t0.2").unwrap();
        writeln!(file, "chr1\t200\tC\tT\t.").unwrap();
        writeln!(file, "chr1\t300\tCT\tC\t").unwrap();
        let resource = GermlineResource::from_path(file.path()).unwrap();
        assert_relative_eq!(resource.allele_frequency("chr1", 100, b"A", b"G", 1e-6), 0.2);
        // missing frequency
        assert_relative_eq!(resource.allele_frequency("chr1", 200, b"C", b"T", 1e-6), 1e-6);
        assert_relative_eq!(resource.allele_frequency("chr1", 300, b"CT", b"C", 1e-6), 1e-6);
        assert_relative_eq!(resource.allele_frequency("chr1", 100, b"A", b"T", 1e-6), 1e-6);
        // non-minimal representation is matched
        assert_relative_eq!(
            resource.allele_frequency("chr1", 100, b"AC", b"GC", 1e-6),
            0.2
        );
    }

    #[test]
    fn test_panel_of_normals() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "contig\tpos\tref\talt").unwrap();
        writeln!(file, "chrM\t301\tA\tAC").unwrap();
        let panel = PanelOfNormals::from_path(file.path()).unwrap();
        assert!(panel.contains("chrM", 301, b"A", b"AC"));
        assert!(!panel.contains("chrM", 301, b"A", b"ACC"));
    }
}
