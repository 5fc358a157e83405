// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("contig {contig} is not contained in the reference")]
    UnknownContig { contig: String },
    #[error("interval {contig}:{start}-{end} exceeds contig length {len}")]
    IntervalOutOfBounds {
        contig: String,
        start: u64,
        end: u64,
        len: u64,
    },
    #[error("invalid interval specification '{spec}', use CONTIG:START-END or CONTIG")]
    InvalidInterval { spec: String },
    #[error("sequence dictionary of the call set does not match the reference: contig {contig} {msg}")]
    SequenceDictionaryMismatch { contig: String, msg: String },
    #[error("filter {filter} was requested but its required input ({input}) was not provided")]
    MissingFilterInput { filter: String, input: String },
    #[error("invalid row {row} in {table} table: {msg}")]
    InvalidTableRow {
        table: String,
        row: usize,
        msg: String,
    },
    #[error("invalid configuration: {msg}")]
    InvalidConfiguration { msg: String },
    #[error("force-call allele at {contig}:{pos} has reference allele {given} but the genome has {expected}")]
    ForcedAlleleReferenceMismatch {
        contig: String,
        pos: u64,
        given: String,
        expected: String,
    },
    #[error("reads are given for sample {name}, which has no assigned role (tumor or normal)")]
    SampleWithoutRole { name: String },
    #[error("at least one tumor sample has to be given")]
    NoTumorSample,
    #[error("invalid CIGAR operation '{op}'")]
    InvalidCigarOperation { op: String },
    #[error("read {name} is malformed: {msg}")]
    InvalidRead { name: String, msg: String },
    #[error("unknown filter name '{name}'")]
    UnknownFilter { name: String },
}
