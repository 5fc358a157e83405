// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Calling and filtering of somatic variants in tumor samples with optional matched normals.
//!
//! Regions with evidence of variation are reassembled into local haplotypes, reads are
//! scored against every haplotype with a pair HMM, and each candidate allele receives a
//! tumor log odds score. The resulting calls are then subjected to a battery of filters.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate getset;
#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate strum_macros;
#[cfg(test)]
#[macro_use]
extern crate approx;

pub mod active_regions;
pub mod assembly;
pub mod calling;
pub mod cli;
pub mod concordance;
pub mod constants;
pub mod errors;
pub mod filtration;
pub mod genotyping;
pub mod likelihood;
pub mod orientation;
pub mod reads;
pub mod reference;
pub mod utils;
pub mod variants;
