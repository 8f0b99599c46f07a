// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The immutable reference index: FM-index, packed reference and
//! annotations, loaded once and shared read-only by every alignment worker.

use crate::data_structures::fmindex::FmdIndex;

pub mod annotations;
pub mod build;
pub mod load;
pub mod pac;

pub use self::annotations::{AmbiguityRun, Annotations, SequenceRecord};
pub use self::pac::PackedSequence;

/// A loaded reference index. Gigabyte-scale in production; built in memory
/// for small references and tests via [`ReferenceIndex::from_sequences`].
#[derive(Clone, Debug)]
pub struct ReferenceIndex {
    fmd: FmdIndex,
    pac: PackedSequence,
    ann: Annotations,
}

impl ReferenceIndex {
    pub fn new(fmd: FmdIndex, pac: PackedSequence, ann: Annotations) -> Self {
        debug_assert_eq!(fmd.len(), (pac.len() << 1) + 1);
        ReferenceIndex { fmd, pac, ann }
    }

    #[inline]
    pub fn fmd(&self) -> &FmdIndex {
        &self.fmd
    }

    #[inline]
    pub fn pac(&self) -> &PackedSequence {
        &self.pac
    }

    #[inline]
    pub fn ann(&self) -> &Annotations {
        &self.ann
    }

    /// Forward genome length.
    #[inline]
    pub fn l_pac(&self) -> i64 {
        self.pac.len()
    }

    /// Whether any sequence is marked as an ALT contig.
    pub fn has_alts(&self) -> bool {
        self.ann.records.iter().any(|r| r.is_alt)
    }

    /// Fetch `[beg, end)` from the combined-space reference, additionally
    /// clamped to the (strand-projected) bounds of the sequence containing
    /// `mid`. Returns the codes, the clamped bounds and the sequence id.
    pub fn fetch_seq(&self, beg: i64, mid: i64, end: i64) -> Option<(Vec<u8>, i64, i64, i32)> {
        let (mut beg, mut end) = if end < beg { (end, beg) } else { (beg, end) };
        debug_assert!(beg <= mid && mid < end);
        let (pos_f, is_rev) = self.ann.depos(mid);
        let rid = self.ann.pos_to_rid(pos_f)?;
        let rec = &self.ann.records[rid as usize];
        let (far_beg, far_end) = if is_rev {
            (
                (self.l_pac() << 1) - (rec.offset + rec.len),
                (self.l_pac() << 1) - rec.offset,
            )
        } else {
            (rec.offset, rec.offset + rec.len)
        };
        beg = beg.max(far_beg);
        end = end.min(far_end);
        let (seq, beg, end) = self.pac.fetch(beg, end);
        Some((seq, beg, end, rid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabets::dna;

    #[test]
    fn test_fetch_seq_clamps_to_sequence() {
        let idx = ReferenceIndex::from_sequences(
            &[("a", &b"ACGTACGT"[..]), ("b", &b"TTTTGGGG"[..])],
            &[],
        );
        // window around position 2 of "a" must not leak into "b"
        let (seq, beg, end, rid) = idx.fetch_seq(0, 2, 12).unwrap();
        assert_eq!(rid, 0);
        assert_eq!((beg, end), (0, 8));
        assert_eq!(seq, dna::encode_seq(b"ACGTACGT"));
        // reverse strand of "b": combined positions [16, 24)
        let (seq, beg, end, rid) = idx.fetch_seq(10, 17, 30).unwrap();
        assert_eq!(rid, 1);
        assert_eq!((beg, end), (16, 24));
        assert_eq!(seq, dna::encode_seq(b"CCCCAAAA"));
    }
}
