// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types of the aligner.
//!
//! Only conditions that prevent the process from aligning at all are errors:
//! a missing or corrupted index, or I/O failures while reading it. Per-read
//! conditions (no alignment above the score threshold, no concordant pair)
//! degrade to unmapped or independent records and never surface here.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("required index file {path} not found")]
    IndexNotFound { path: PathBuf },
    #[error("index corrupted: {reason}")]
    IndexCorrupted { reason: String },
    #[error("unparseable record: {msg}")]
    InputFormat { msg: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
