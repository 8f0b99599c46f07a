// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Naive in-memory index construction for small references and tests.
//!
//! Production indexes are built by the external indexer; this builder sorts
//! suffixes directly and is quadratic in the worst case, which is perfectly
//! fine for the kilobase-scale references it is meant for.

use crate::alphabets::dna;
use crate::data_structures::bwt::CheckpointedBwt;
use crate::data_structures::fmindex::FmdIndex;
use crate::data_structures::suffix_array::CompressedSuffixArray;
use crate::index::annotations::{AmbiguityRun, Annotations, SequenceRecord};
use crate::index::pac::PackedSequence;
use crate::index::ReferenceIndex;

/// Seed of the deterministic ambiguous-base substitution; recorded in the
/// annotations so index contents are reproducible.
const AMB_SEED: u64 = 11;

#[inline]
fn next_base(state: &mut u64) -> u8 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    (*state & 3) as u8
}

impl ReferenceIndex {
    /// Build an index over the given named sequences. Sequences whose names
    /// appear in `alt_names` are marked as ALT contigs. Ambiguous input
    /// bases are recorded as ambiguity runs and substituted with a
    /// deterministic pseudo-random base.
    pub fn from_sequences(seqs: &[(&str, &[u8])], alt_names: &[&str]) -> ReferenceIndex {
        let mut genome: Vec<u8> = Vec::new();
        let mut records = Vec::new();
        let mut holes: Vec<AmbiguityRun> = Vec::new();
        let mut rng = AMB_SEED;
        for (name, seq) in seqs {
            let offset = genome.len() as i64;
            let mut n_amb = 0;
            for (i, &s) in seq.iter().enumerate() {
                let c = dna::encode(s);
                if c > 3 {
                    n_amb += 1;
                    let pos = offset + i as i64;
                    match holes.last_mut() {
                        Some(h) if h.offset + h.len == pos && h.amb == s => h.len += 1,
                        _ => holes.push(AmbiguityRun {
                            offset: pos,
                            len: 1,
                            amb: s,
                        }),
                    }
                    genome.push(next_base(&mut rng));
                } else {
                    genome.push(c);
                }
            }
            records.push(SequenceRecord {
                name: (*name).to_owned(),
                anno: None,
                offset,
                len: seq.len() as i64,
                n_amb,
                gi: 0,
                is_alt: false,
            });
        }

        let mut ann = Annotations {
            l_pac: genome.len() as i64,
            seed: AMB_SEED as i64,
            records,
            holes,
        };
        ann.mark_alts(alt_names.iter().copied());

        // text = forward + reverse complement; the sentinel is implicit at
        // the end and sorts before everything, which slice comparison of
        // suffixes gives us for free.
        let mut text = genome.clone();
        text.extend(dna::revcomp(&genome));
        let l2 = text.len();
        let mut sa: Vec<i64> = Vec::with_capacity(l2 + 1);
        sa.push(l2 as i64);
        let mut rest: Vec<i64> = (0..l2 as i64).collect();
        rest.sort_by(|&a, &b| text[a as usize..].cmp(&text[b as usize..]));
        sa.extend(rest);

        let mut bwt = vec![0u8; l2 + 1];
        let mut sentinel_row = 0i64;
        for (r, &p) in sa.iter().enumerate() {
            if p == 0 {
                sentinel_row = r as i64;
            } else {
                bwt[r] = text[(p - 1) as usize];
            }
        }

        let mut base_counts = [0i64; 4];
        for &c in &text {
            base_counts[c as usize] += 1;
        }
        let mut counts = [0i64; 5];
        counts[0] = 1;
        for c in 0..4 {
            counts[c + 1] = counts[c] + base_counts[c];
        }

        let fmd = FmdIndex::new(
            counts,
            CheckpointedBwt::from_codes(&bwt, sentinel_row),
            CompressedSuffixArray::from_full(&sa),
        );
        ReferenceIndex::new(fmd, PackedSequence::from_codes(&genome), ann)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_counts() {
        let idx = ReferenceIndex::from_sequences(&[("chr1", &b"ACGT"[..])], &[]);
        // 2 of each base in the 8-base combined text
        assert_eq!(*idx.fmd().counts(), [1, 3, 5, 7, 9]);
        assert_eq!(idx.fmd().len(), 9);
        assert_eq!(idx.l_pac(), 4);
    }

    #[test]
    fn test_build_records_holes() {
        let idx = ReferenceIndex::from_sequences(&[("chr1", &b"ACGNNNACG"[..])], &[]);
        let ann = idx.ann();
        assert_eq!(ann.records[0].n_amb, 3);
        assert_eq!(ann.holes.len(), 1);
        assert_eq!(ann.holes[0].offset, 3);
        assert_eq!(ann.holes[0].len, 3);
        assert_eq!(ann.holes[0].amb, b'N');
    }

    #[test]
    fn test_build_deterministic() {
        let a = ReferenceIndex::from_sequences(&[("chr1", &b"ACGNNNACG"[..])], &[]);
        let b = ReferenceIndex::from_sequences(&[("chr1", &b"ACGNNNACG"[..])], &[]);
        assert_eq!(a.pac().packed_bytes(), b.pac().packed_bytes());
    }

    #[test]
    fn test_alt_marking() {
        let idx = ReferenceIndex::from_sequences(
            &[("chr1", &b"ACGTACGT"[..]), ("chr1_alt", &b"ACGTACGT"[..])],
            &["chr1_alt"],
        );
        assert!(!idx.ann().records[0].is_alt);
        assert!(idx.ann().records[1].is_alt);
        assert!(idx.has_alts());
    }
}
