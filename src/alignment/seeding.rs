// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Seed collection: three passes of exact-match discovery over a read.
//!
//! 1. Super-maximal exact matches at full sensitivity.
//! 2. Re-seeding inside long, low-occurrence SMEMs with a raised interval
//!    floor, harvesting shorter but more specific matches in repeats.
//! 3. An optional forward-only pass emitting one seed per position as soon
//!    as the interval becomes specific enough.

use crate::data_structures::fmindex::{FmdIndex, Smem};
use crate::opts::MemOpts;

/// Reusable candidate stacks of the SMEM search.
#[derive(Default)]
pub struct SeedingScratch {
    matches: Vec<Smem>,
    prev: Vec<Smem>,
    curr: Vec<Smem>,
}

/// Collect the exact matches of `query` (code space) into `out`, sorted by
/// query begin ascending and length descending.
pub fn collect_smems(
    fmd: &FmdIndex,
    opts: &MemOpts,
    query: &[u8],
    out: &mut Vec<Smem>,
    scratch: &mut SeedingScratch,
) {
    out.clear();
    let len = query.len();

    // first pass: all SMEMs
    let mut x = 0;
    while x < len {
        if query[x] < 4 {
            x = fmd.smems_at(
                query,
                x,
                1,
                &mut scratch.matches,
                &mut scratch.prev,
                &mut scratch.curr,
            );
            out.extend(
                scratch
                    .matches
                    .iter()
                    .copied()
                    .filter(|m| m.len() >= opts.min_seed_len),
            );
        } else {
            x += 1;
        }
    }

    // second pass: matches hidden inside long low-occurrence SMEMs
    let first_pass = out.len();
    for k in 0..first_pass {
        let p = out[k];
        if p.len() < opts.reseed_len || p.intv.s > opts.split_width {
            continue;
        }
        let mid = ((p.qb + p.qe) >> 1) as usize;
        fmd.smems_at(
            query,
            mid,
            p.intv.s + 1,
            &mut scratch.matches,
            &mut scratch.prev,
            &mut scratch.curr,
        );
        out.extend(
            scratch
                .matches
                .iter()
                .copied()
                .filter(|m| m.len() >= opts.min_seed_len),
        );
    }

    // third pass: forward-only seeds for reads still short of seeds
    if opts.max_mem_intv > 0 {
        let mut x = 0;
        while x < len {
            if query[x] < 4 {
                let (seed, next) =
                    fmd.forward_seed_at(query, x, opts.min_seed_len, opts.max_mem_intv);
                if let Some(m) = seed {
                    out.push(m);
                }
                x = next;
            } else {
                x += 1;
            }
        }
    }

    out.sort_by(|a, b| a.qb.cmp(&b.qb).then(b.len().cmp(&a.len())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabets::dna;
    use crate::index::ReferenceIndex;

    fn opts(min_seed: i32) -> MemOpts {
        let mut o = MemOpts::default();
        o.min_seed_len = min_seed;
        o.reseed_len = (min_seed as f32 * 1.5 + 0.499) as i32;
        o
    }

    #[test]
    fn test_collect_sorted() {
        let idx = ReferenceIndex::from_sequences(&[("chr1", &b"ACGTACGTACGTACGT"[..])], &[]);
        let query = dna::encode_seq(b"ACGTACGT");
        let mut out = Vec::new();
        let mut scratch = SeedingScratch::default();
        collect_smems(idx.fmd(), &opts(4), &query, &mut out, &mut scratch);
        assert!(!out.is_empty());
        for w in out.windows(2) {
            assert!(
                w[0].qb < w[1].qb || (w[0].qb == w[1].qb && w[0].len() >= w[1].len()),
                "smems must be sorted by (qb asc, len desc)"
            );
        }
        for m in &out {
            assert!(m.len() >= 4);
            assert!(m.intv.s > 0);
        }
    }

    #[test]
    fn test_reseeding_adds_specific_seeds() {
        // a repeat long enough to trigger the second pass
        let repeat = b"ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT".to_vec();
        let mut refseq = repeat.clone();
        refseq.extend_from_slice(b"TTCCGGAATTCCGGAA");
        let idx = ReferenceIndex::from_sequences(&[("chr1", &refseq[..])], &[]);
        let query = dna::encode_seq(&repeat[0..24]);
        let mut out = Vec::new();
        let mut scratch = SeedingScratch::default();
        let mut o = opts(8);
        o.reseed_len = 12;
        collect_smems(idx.fmd(), &o, &query, &mut out, &mut scratch);
        // the long full-length SMEM is reported together with re-seeded
        // higher-occurrence matches
        let max_len = out.iter().map(|m| m.len()).max().unwrap();
        assert_eq!(max_len, 24);
        assert!(out.len() > 1);
    }

    #[test]
    fn test_n_only_read_has_no_seeds() {
        let idx = ReferenceIndex::from_sequences(&[("chr1", &b"ACGTACGTACGTACGT"[..])], &[]);
        let query = dna::encode_seq(b"NNNNNNNN");
        let mut out = Vec::new();
        let mut scratch = SeedingScratch::default();
        collect_smems(idx.fmd(), &opts(4), &query, &mut out, &mut scratch);
        assert!(out.is_empty());
    }
}
