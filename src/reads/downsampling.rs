// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::utils::derive_seed;

/// Reproducible downsampling of the reads of one region.
///
/// Every region draws from its own RNG, seeded from the global seed and the region
/// coordinates, so that results do not depend on which thread handles a region.
#[derive(Debug, Clone, Copy, new)]
pub struct Downsampler {
    global_seed: u64,
    max_reads: usize,
}

impl Downsampler {
    /// Choose at most `max_reads` items, keeping their original order.
    pub fn downsample<T: Clone>(&self, contig: &str, start: u64, items: &[T]) -> Vec<T> {
        if items.len() <= self.max_reads {
            return items.to_vec();
        }
        let mut rng = StdRng::seed_from_u64(derive_seed(self.global_seed, contig, start));
        let mut selected = sample(&mut rng, items.len(), self.max_reads).into_vec();
        selected.sort_unstable();
        selected.into_iter().map(|i| items[i].clone()).collect()
    }
}
