// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::ops::Range;
use std::sync::Arc;

use crate::orientation::{AltSiteRecord, F1R2Table};
use crate::reads::{AlignedPair, AlignedRead, PairOrientation};

fn base_index(base: u8) -> Option<usize> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

const BASES: [char; 4] = ['A', 'C', 'G', 'T'];

#[derive(Debug, Clone, Copy, Default)]
struct SiteCounts {
    ref_count: u32,
    alt_counts: [u32; 4],
    alt_f1r2: [u32; 4],
}

/// Tally orientation counts of the given reads over `span`. `reference` holds the bases of
/// `window`, which has to contain `span`.
pub(crate) fn collect_f1r2(
    reads: &[Arc<AlignedRead>],
    span: &Range<u64>,
    reference: &[u8],
    window: &Range<u64>,
    min_base_quality: u8,
) -> F1R2Table {
    let mut counts = vec![SiteCounts::default(); (span.end - span.start) as usize];
    for read in reads {
        for pair in read.aligned_pairs() {
            if let AlignedPair::Aligned { offset, ref_pos } = pair {
                if !span.contains(&ref_pos) || read.qual()[offset] < min_base_quality {
                    continue;
                }
                let ref_base = reference[(ref_pos - window.start) as usize];
                let base = read.seq()[offset].to_ascii_uppercase();
                let site = &mut counts[(ref_pos - span.start) as usize];
                if base == ref_base {
                    site.ref_count += 1;
                } else if let Some(i) = base_index(base) {
                    site.alt_counts[i] += 1;
                    if read.orientation() == PairOrientation::F1R2 {
                        site.alt_f1r2[i] += 1;
                    }
                }
            }
        }
    }

    let mut table = F1R2Table::default();
    for (i, site) in counts.iter().enumerate() {
        let pos = span.start + i as u64;
        if pos == 0 || pos <= window.start || pos + 1 >= window.end {
            continue;
        }
        let offset = (pos - window.start) as usize;
        let context = &reference[offset - 1..=offset + 1];
        if !context.iter().all(|b| base_index(*b).is_some()) {
            continue;
        }
        let context = String::from_utf8_lossy(context).into_owned();
        let alt_depth: u32 = site.alt_counts.iter().sum();
        if site.ref_count + alt_depth == 0 {
            continue;
        }
        if alt_depth == 0 {
            table.add_ref_site(&context, site.ref_count);
        } else {
            // the most frequent alternate base, ties resolved by base order
            let (alt, alt_count) = site
                .alt_counts
                .iter()
                .enumerate()
                .fold((0, 0), |best, (i, c)| if *c > best.1 { (i, *c) } else { best });
            table.add_alt_site(AltSiteRecord::new(
                context,
                BASES[alt],
                site.ref_count,
                alt_count,
                site.alt_f1r2[alt],
            ));
        }
    }
    table
}
