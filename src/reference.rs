// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fmt::Debug;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bio::io::fasta;
use bio_types::genome::{AbstractInterval, Interval};

use crate::errors::Error;

/// Name and length of a reference contig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ContigInfo {
    pub name: String,
    pub len: u64,
}

/// Reference sequences held in memory, together with their sequence dictionary.
#[derive(Debug, Clone, Default)]
pub struct Reference {
    dictionary: Vec<ContigInfo>,
    sequences: HashMap<String, Arc<Vec<u8>>>,
}

impl Reference {
    pub fn from_path<P: AsRef<Path> + Debug>(path: P) -> Result<Self> {
        let reader = fasta::Reader::from_file(&path)
            .with_context(|| format!("unable to open reference {:?}", path))?;
        let mut reference = Reference::default();
        for record in reader.records() {
            let record = record.with_context(|| format!("invalid FASTA record in {:?}", path))?;
            reference.insert(record.id(), record.seq().to_vec());
        }
        info!(
            "loaded {} reference contigs from {:?}",
            reference.dictionary.len(),
            path
        );
        Ok(reference)
    }

    /// Add a contig. Bases are stored upper case.
    pub fn insert(&mut self, name: &str, mut seq: Vec<u8>) {
        seq.make_ascii_uppercase();
        if !self.sequences.contains_key(name) {
            self.dictionary
                .push(ContigInfo::new(name.to_owned(), seq.len() as u64));
        }
        self.sequences.insert(name.to_owned(), Arc::new(seq));
    }

    pub fn dictionary(&self) -> &[ContigInfo] {
        &self.dictionary
    }

    pub fn contig_len(&self, contig: &str) -> Result<u64> {
        Ok(self.seq(contig)?.len() as u64)
    }

    /// Sequence of the given contig. This is O(1).
    pub fn seq(&self, contig: &str) -> Result<Arc<Vec<u8>>> {
        self.sequences.get(contig).cloned().ok_or_else(|| {
            Error::UnknownContig {
                contig: contig.to_owned(),
            }
            .into()
        })
    }

    /// Bases of the given window.
    pub fn fetch(&self, contig: &str, range: &Range<u64>) -> Result<Vec<u8>> {
        let seq = self.seq(contig)?;
        if range.start > range.end || range.end > seq.len() as u64 {
            return Err(Error::IntervalOutOfBounds {
                contig: contig.to_owned(),
                start: range.start,
                end: range.end,
                len: seq.len() as u64,
            }
            .into());
        }
        Ok(seq[range.start as usize..range.end as usize].to_vec())
    }
}

/// Parse `CONTIG:START-END` (1-based, inclusive) or `CONTIG` into a 0-based half open interval.
/// Without coordinates, the range is `None` and stands for the whole contig.
pub fn parse_interval(spec: &str) -> Result<(String, Option<Range<u64>>)> {
    let invalid = || -> anyhow::Error {
        Error::InvalidInterval {
            spec: spec.to_owned(),
        }
        .into()
    };
    match spec.rsplit_once(':') {
        None if !spec.is_empty() => Ok((spec.to_owned(), None)),
        None => Err(invalid()),
        Some((contig, coords)) => {
            let (start, end) = coords.split_once('-').ok_or_else(invalid)?;
            let start: u64 = start.replace(',', "").parse().map_err(|_| invalid())?;
            let end: u64 = end.replace(',', "").parse().map_err(|_| invalid())?;
            if start == 0 || start > end || contig.is_empty() {
                return Err(invalid());
            }
            Ok((contig.to_owned(), Some(start - 1..end)))
        }
    }
}

impl Reference {
    /// Resolve interval specifications against the dictionary. Without any, all contigs are used.
    pub fn intervals(&self, specs: &[String]) -> Result<Vec<Interval>> {
        if specs.is_empty() {
            return Ok(self
                .dictionary
                .iter()
                .map(|contig| Interval::new(contig.name.clone(), 0..contig.len))
                .collect());
        }
        specs
            .iter()
            .map(|spec| {
                let (contig, range) = parse_interval(spec)?;
                let len = self.contig_len(&contig)?;
                let range = range.unwrap_or(0..len);
                if range.end > len {
                    return Err(Error::IntervalOutOfBounds {
                        contig,
                        start: range.start,
                        end: range.end,
                        len,
                    }
                    .into());
                }
                Ok(Interval::new(contig, range))
            })
            .collect()
    }
}

impl Reference {
    /// Sort intervals in dictionary order and merge overlapping or adjacent ones.
    /// Intervals reaching past the end of their contig are rejected.
    pub fn normalize_intervals(&self, intervals: Vec<Interval>) -> Result<Vec<Interval>> {
        let index: HashMap<&str, usize> = self
            .dictionary
            .iter()
            .enumerate()
            .map(|(i, contig)| (contig.name.as_str(), i))
            .collect();
        let mut keyed = Vec::with_capacity(intervals.len());
        for interval in intervals {
            let i = *index
                .get(interval.contig())
                .ok_or_else(|| Error::UnknownContig {
                    contig: interval.contig().to_owned(),
                })?;
            let len = self.dictionary[i].len;
            let range = interval.range();
            if range.end > len {
                return Err(Error::IntervalOutOfBounds {
                    contig: interval.contig().to_owned(),
                    start: range.start,
                    end: range.end,
                    len,
                }
                .into());
            }
            if range.start < range.end {
                keyed.push((i, range));
            }
        }
        keyed.sort_by_key(|(i, range)| (*i, range.start, range.end));

        let mut merged: Vec<(usize, Range<u64>)> = Vec::with_capacity(keyed.len());
        for (i, range) in keyed {
            match merged.last_mut() {
                Some((last_i, last)) if *last_i == i && range.start <= last.end => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push((i, range)),
            }
        }
        Ok(merged
            .into_iter()
            .map(|(i, range)| Interval::new(self.dictionary[i].name.clone(), range))
            .collect())
    }
}
