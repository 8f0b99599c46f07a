// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! A pure-Rust implementation of the core of the BWA-MEM short-read alignment
//! algorithm. Given a reference genome indexed as an FM-index over the forward
//! genome and its reverse complement, reads are aligned by enumerating
//! super-maximal exact matches, chaining collinear seeds, extending the best
//! chains with banded Smith-Waterman and resolving paired-end constraints.
//!
//! # Example
//!
//! ```
//! use bwamem::index::ReferenceIndex;
//! use bwamem::aligner::{MemAligner, Read};
//! use bwamem::opts::MemOpts;
//! use std::sync::Arc;
//!
//! let index = ReferenceIndex::from_sequences(
//!     &[("chr1", &b"ACGTACGTACGTACGTACGTACGTACGTACGT"[..])],
//!     &[],
//! );
//! let mut opts = MemOpts::default();
//! opts.min_seed_len = 8;
//! opts.min_output_score = 8;
//! let aligner = MemAligner::new(Arc::new(index), opts);
//! let records = aligner.align_single(&Read::new("r1", b"ACGTACGTACGTACGT"));
//! assert!(records[0].is_mapped());
//! ```

pub mod alignment;
pub mod aligner;
pub mod alphabets;
pub mod data_structures;
pub mod errors;
pub mod index;
pub mod opts;
pub mod pairing;
pub mod utils;

pub use crate::errors::{Error, Result};
