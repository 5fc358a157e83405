// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use crate::variants::{Allele, AlleleCall};

fn retain<T: Clone>(values: &mut Vec<T>, keep: &[bool]) {
    if values.len() == keep.len() {
        *values = values
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(v, _)| v.clone())
            .collect();
    }
}

/// Drop alleles from a call. `keep` has one entry per allele, the reference first.
/// The reference is always kept. Afterwards, the representation is trimmed.
pub fn drop_alleles(call: &mut AlleleCall, keep: &[bool]) {
    let mut keep = keep.to_vec();
    keep[0] = true;
    let keep_alts = &keep[1..];
    retain(&mut call.alt_alleles, keep_alts);
    retain(&mut call.tumor_log_odds, keep_alts);
    if let Some(nlod) = call.normal_log_odds.as_mut() {
        retain(nlod, keep_alts);
    }
    if let Some(nalod) = call.normal_artifact_log_odds.as_mut() {
        retain(nalod, keep_alts);
    }
    retain(&mut call.population_af, keep_alts);
    retain(&mut call.forced, keep_alts);
    for genotype in call.genotypes.iter_mut() {
        genotype.retain_alleles(&keep);
    }
    trim_representation(call);
}

/// Remove reference bases shared by all alleles. The common suffix is removed first, then the
/// common prefix, as long as every allele keeps at least one base.
pub fn trim_representation(call: &mut AlleleCall) {
    if call.alt_alleles.iter().any(|a| a.is_non_ref()) && call.alt_alleles.len() == 1 {
        return;
    }
    loop {
        let alleles = bases_alleles(call);
        if !trimmable(&alleles, |a| a[a.len() - 1]) {
            break;
        }
        call.ref_allele.pop();
        for alt in call.alt_alleles.iter_mut() {
            if let Allele::Bases(bases) = alt {
                bases.pop();
            }
        }
    }
    loop {
        let alleles = bases_alleles(call);
        if !trimmable(&alleles, |a| a[0]) {
            break;
        }
        call.ref_allele.remove(0);
        call.pos += 1;
        for alt in call.alt_alleles.iter_mut() {
            if let Allele::Bases(bases) = alt {
                bases.remove(0);
            }
        }
    }
}

fn bases_alleles(call: &AlleleCall) -> Vec<Vec<u8>> {
    let mut alleles = vec![call.ref_allele.clone()];
    alleles.extend(
        call.alt_alleles
            .iter()
            .filter_map(|a| a.bases().map(|b| b.to_vec())),
    );
    alleles
}

fn trimmable<F: Fn(&[u8]) -> u8>(alleles: &[Vec<u8>], base: F) -> bool {
    alleles.len() > 1
        && alleles.iter().all(|a| a.len() > 1)
        && alleles.iter().all(|a| base(a) == base(&alleles[0]))
}
