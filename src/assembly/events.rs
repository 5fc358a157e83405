// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::alignment::pairwise::Aligner;
use bio::alignment::AlignmentOperation;

use crate::constants::{SW_GAP_EXTEND, SW_GAP_OPEN, SW_MATCH, SW_MISMATCH};

/// A difference between a haplotype and the reference. Positions are 0-based on the contig,
/// indels carry the preceding reference base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, new)]
pub struct Event {
    pub pos: u64,
    #[serde(with = "crate::utils::seq_serde")]
    pub ref_allele: Vec<u8>,
    #[serde(with = "crate::utils::seq_serde")]
    pub alt_allele: Vec<u8>,
}

impl Event {
    pub fn end(&self) -> u64 {
        self.pos + self.ref_allele.len() as u64
    }

    pub fn is_snv(&self) -> bool {
        self.ref_allele.len() == 1 && self.alt_allele.len() == 1
    }

    pub fn is_indel(&self) -> bool {
        self.ref_allele.len() != self.alt_allele.len()
    }
}

/// Align the haplotype globally against the reference window and report the differences.
///
/// Substitutions closer than or equal to `max_mnp_distance` are joined into a single
/// multi-base substitution, a distance of 0 disables joining.
pub fn extract_events(
    haplotype: &[u8],
    reference: &[u8],
    window_start: u64,
    max_mnp_distance: u64,
) -> Vec<Event> {
    if haplotype == reference {
        return Vec::new();
    }
    let mut aligner = Aligner::with_capacity(
        haplotype.len(),
        reference.len(),
        SW_GAP_OPEN,
        SW_GAP_EXTEND,
        |a: u8, b: u8| if a == b { SW_MATCH } else { SW_MISMATCH },
    );
    let alignment = aligner.global(haplotype, reference);

    let mut events: Vec<Event> = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    let ops = &alignment.operations;
    let mut k = 0;
    while k < ops.len() {
        match ops[k] {
            AlignmentOperation::Match => {
                i += 1;
                j += 1;
                k += 1;
            }
            AlignmentOperation::Subst => {
                events.push(Event::new(
                    j as u64,
                    vec![reference[j]],
                    vec![haplotype[i]],
                ));
                i += 1;
                j += 1;
                k += 1;
            }
            AlignmentOperation::Ins => {
                let run = ops[k..]
                    .iter()
                    .take_while(|op| **op == AlignmentOperation::Ins)
                    .count();
                if j > 0 {
                    let mut alt = vec![reference[j - 1]];
                    alt.extend_from_slice(&haplotype[i..i + run]);
                    push_indel(&mut events, Event::new((j - 1) as u64, vec![reference[j - 1]], alt));
                } else {
                    debug!(
                        "skipping insertion of {} bases without anchor base at {}",
                        run, window_start
                    );
                }
                i += run;
                k += run;
            }
            AlignmentOperation::Del => {
                let run = ops[k..]
                    .iter()
                    .take_while(|op| **op == AlignmentOperation::Del)
                    .count();
                if j > 0 {
                    push_indel(
                        &mut events,
                        Event::new(
                            (j - 1) as u64,
                            reference[j - 1..j + run].to_vec(),
                            vec![reference[j - 1]],
                        ),
                    );
                } else {
                    debug!(
                        "skipping deletion of {} bases without anchor base at {}",
                        run, window_start
                    );
                }
                j += run;
                k += run;
            }
            AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_) => k += 1,
        }
    }

    let events = merge_mnps(events, reference, max_mnp_distance);
    events
        .into_iter()
        .map(|mut e| {
            e.pos += window_start;
            e
        })
        .collect()
}

/// Add an indel, folding it into a substitution of its anchor base if there is one.
fn push_indel(events: &mut Vec<Event>, mut indel: Event) {
    if let Some(last) = events.last() {
        if last.pos == indel.pos && last.is_snv() {
            indel.alt_allele[0] = last.alt_allele[0];
            events.pop();
        }
    }
    events.push(indel);
}

fn merge_mnps(events: Vec<Event>, reference: &[u8], max_distance: u64) -> Vec<Event> {
    if max_distance == 0 {
        return events;
    }
    let mut merged: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        if let Some(last) = merged.last_mut() {
            let joinable = !last.is_indel()
                && event.is_snv()
                && event.pos > last.end() - 1
                && event.pos - (last.end() - 1) <= max_distance;
            if joinable {
                let start = last.pos as usize;
                let end = event.pos as usize;
                let mut alt = last.alt_allele.clone();
                alt.extend_from_slice(&reference[last.end() as usize..end]);
                alt.push(event.alt_allele[0]);
                last.ref_allele = reference[start..=end].to_vec();
                last.alt_allele = alt;
                continue;
            }
        }
        merged.push(event);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: &[u8] = b"GATTACAGATTACACCGGTTAACCGGTTAA";

    fn substitute(positions: &[usize]) -> Vec<u8> {
        let mut hap = REF.to_vec();
        for &p in positions {
            hap[p] = if hap[p] == b'A' { b'C' } else { b'A' };
        }
        hap
    }

    #[test]
    fn test_snv() {
        let hap = substitute(&[10]);
        let events = extract_events(&hap, REF, 100, 1);
        assert_eq!(events, vec![Event::new(110, b"T".to_vec(), b"A".to_vec())]);
    }

    #[test]
    fn test_reference() {
        assert!(extract_events(REF, REF, 0, 1).is_empty());
    }

    #[test]
    fn test_insertion_and_deletion() {
        let mut ins = REF[..12].to_vec();
        ins.extend_from_slice(b"GG");
        ins.extend_from_slice(&REF[12..]);
        let events = extract_events(&ins, REF, 0, 1);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_indel());
        assert_eq!(events[0].alt_allele.len(), 3);
        assert_eq!(events[0].ref_allele.len(), 1);

        let mut del = REF[..15].to_vec();
        del.extend_from_slice(&REF[18..]);
        let events = extract_events(&del, REF, 0, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ref_allele.len(), 4);
        assert_eq!(events[0].alt_allele.len(), 1);
    }

    #[test]
    fn test_indel_without_anchor_base() {
        assert!(extract_events(&REF[3..], REF, 0, 1).is_empty());
        let mut ins = b"CC".to_vec();
        ins.extend_from_slice(REF);
        assert!(extract_events(&ins, REF, 0, 1).iter().all(|e| !e.is_indel()));
    }

    #[test]
    fn test_mnp_distance() {
        // two substitutions two bases apart
        let hap = substitute(&[10, 12]);
        for d in 0..2 {
            let events = extract_events(&hap, REF, 0, d);
            assert_eq!(events.len(), 2);
            assert!(events.iter().all(|e| e.is_snv()));
        }
        for d in 2..5 {
            let events = extract_events(&hap, REF, 0, d);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].pos, 10);
            assert_eq!(events[0].ref_allele, REF[10..13].to_vec());
            assert_eq!(events[0].alt_allele, hap[10..13].to_vec());
        }
    }

    #[test]
    fn test_mnp_chain() {
        // spacings 2, 3 and 4
        let hap = substitute(&[10, 12, 15, 19]);
        let lengths = |d| {
            extract_events(&hap, REF, 0, d)
                .iter()
                .map(|e| e.ref_allele.len())
                .collect::<Vec<_>>()
        };
        assert_eq!(lengths(1), vec![1, 1, 1, 1]);
        assert_eq!(lengths(2), vec![3, 1, 1]);
        assert_eq!(lengths(3), vec![6, 1]);
        assert_eq!(lengths(4), vec![10]);
    }

    #[test]
    fn test_adjacent_substitutions() {
        let hap = substitute(&[10, 11]);
        assert_eq!(extract_events(&hap, REF, 0, 0).len(), 2);
        let events = extract_events(&hap, REF, 0, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ref_allele.len(), 2);
    }
}
