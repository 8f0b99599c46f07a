// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Chain extension: Smith-Waterman extension of each chain's seeds into
//! alignment regions.

use crate::alignment::banded::BandedAligner;
use crate::alignment::chain::Chain;
use crate::alignment::AlnReg;
use crate::index::ReferenceIndex;
use crate::opts::MemOpts;

/// Band-growth attempts per extension direction.
const MAX_BAND_TRY: i32 = 2;

/// Longest gap a positive-scoring alignment over `qlen` query bases can
/// contain, bounded by twice the band width.
fn cal_max_gap(opts: &MemOpts, qlen: i32) -> i64 {
    let l_del = (f64::from(qlen * opts.match_score - opts.gap_open_del)
        / f64::from(opts.gap_extend_del)
        + 1.0) as i64;
    let l_ins = (f64::from(qlen * opts.match_score - opts.gap_open)
        / f64::from(opts.gap_extend)
        + 1.0) as i64;
    l_del.max(l_ins).max(1).min((opts.band_width as i64) << 1)
}

/// Extend one chain into regions, appended to `regions`. Seeds already
/// inside an earlier region of the same chain only contribute their score
/// estimate to that region's sub-optimal accounting.
pub fn extend_chain(
    idx: &ReferenceIndex,
    opts: &MemOpts,
    chain: &Chain,
    query: &[u8],
    sw: &mut BandedAligner,
    regions: &mut Vec<AlnReg>,
) {
    let l_query = query.len() as i32;
    let l_pac = idx.l_pac();
    let first_region = regions.len();

    // the reference window covering every seed plus the largest useful gap
    let mut rmax0 = l_pac << 1;
    let mut rmax1 = 0i64;
    for s in &chain.seeds {
        let b = s.rbeg - (s.qbeg as i64 + cal_max_gap(opts, s.qbeg));
        let e = s.rend() + ((l_query - s.qend()) as i64 + cal_max_gap(opts, l_query - s.qend()));
        rmax0 = rmax0.min(b);
        rmax1 = rmax1.max(e);
    }
    rmax0 = rmax0.max(0);
    rmax1 = rmax1.min(l_pac << 1);
    if rmax0 < l_pac && l_pac < rmax1 {
        // crop the window to the strand holding the first seed
        if chain.seeds[0].rbeg < l_pac {
            rmax1 = l_pac;
        } else {
            rmax0 = l_pac;
        }
    }
    let (rseq, rmax0, _rmax1, _rid) = match idx.fetch_seq(rmax0, chain.seeds[0].rbeg, rmax1) {
        Some(f) => f,
        None => return,
    };

    // longest seeds first
    let mut order: Vec<usize> = (0..chain.seeds.len()).collect();
    order.sort_by(|&a, &b| {
        chain.seeds[b]
            .len
            .cmp(&chain.seeds[a].len)
            .then(a.cmp(&b))
    });

    for &k in &order {
        let s = chain.seeds[k];
        if let Some(covering) = regions[first_region..].iter_mut().find(|r| {
            s.rbeg >= r.rb && s.rend() <= r.re && s.qbeg >= r.qb && s.qend() <= r.qe
        }) {
            // seed already explained by an earlier extension of this chain
            let est = opts.seed_score(s.len);
            if est > covering.sub {
                covering.sub = est;
            }
            if covering.score - est <= opts.suboptimal_margin() {
                covering.sub_n += 1;
            }
            continue;
        }

        let mut reg = AlnReg::new(chain.rid, chain.is_alt);
        reg.frac_rep = chain.frac_rep;
        let h0 = opts.seed_score(s.len);
        let mut score = h0;
        let mut true_score = h0;
        let mut aw0 = opts.band_width;
        let mut aw1 = opts.band_width;

        reg.qb = s.qbeg;
        reg.rb = s.rbeg;
        if s.qbeg > 0 {
            // left extension on the reversed prefix
            let qs: Vec<u8> = query[..s.qbeg as usize].iter().rev().copied().collect();
            let ts: Vec<u8> = rseq[..(s.rbeg - rmax0) as usize]
                .iter()
                .rev()
                .copied()
                .collect();
            let mut res = Default::default();
            for i in 0..MAX_BAND_TRY {
                let prev = score;
                aw0 = opts.band_width << i;
                res = sw.extend(&qs, &ts, opts, aw0, opts.pen_clip5, h0);
                score = res.score;
                if score == prev || res.max_off < (aw0 >> 1) + (aw0 >> 2) {
                    break;
                }
            }
            if res.global_score <= 0 || res.global_score <= score - opts.pen_clip5 {
                // local end beats extending to the read start
                reg.qb = s.qbeg - res.query_end;
                reg.rb = s.rbeg - res.target_end as i64;
                true_score = score;
            } else {
                reg.qb = 0;
                reg.rb = s.rbeg - res.global_target_end as i64;
                true_score = res.global_score;
            }
        }

        reg.qe = s.qend();
        reg.re = s.rend();
        if s.qend() < l_query {
            let sc0 = score;
            let qs = &query[s.qend() as usize..];
            let ts = &rseq[(s.rend() - rmax0) as usize..];
            let mut res = Default::default();
            for i in 0..MAX_BAND_TRY {
                let prev = score;
                aw1 = opts.band_width << i;
                res = sw.extend(qs, ts, opts, aw1, opts.pen_clip3, sc0);
                score = res.score;
                if score == prev || res.max_off < (aw1 >> 1) + (aw1 >> 2) {
                    break;
                }
            }
            if res.global_score <= 0 || res.global_score <= score - opts.pen_clip3 {
                reg.qe = s.qend() + res.query_end;
                reg.re = s.rend() + res.target_end as i64;
                true_score += score - sc0;
            } else {
                reg.qe = l_query;
                reg.re = s.rend() + res.global_target_end as i64;
                true_score += res.global_score - sc0;
            }
        }

        reg.score = score;
        reg.true_score = true_score;
        reg.w = aw0.max(aw1);
        reg.seed_cov = chain
            .seeds
            .iter()
            .filter(|t| {
                t.qbeg >= reg.qb && t.qend() <= reg.qe && t.rbeg >= reg.rb && t.rend() <= reg.re
            })
            .map(|t| t.len)
            .sum();
        regions.push(reg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::chain::{chain_seeds, filter_chains};
    use crate::alignment::seeding::{collect_smems, SeedingScratch};
    use crate::alphabets::dna;
    use crate::index::ReferenceIndex;

    fn align_regions(refseq: &[u8], read: &[u8], min_seed: i32) -> Vec<AlnReg> {
        let idx = ReferenceIndex::from_sequences(&[("chr1", refseq)], &[]);
        let mut opts = MemOpts::default();
        opts.min_seed_len = min_seed;
        let query = dna::encode_seq(read);
        let mut smems = Vec::new();
        let mut scratch = SeedingScratch::default();
        collect_smems(idx.fmd(), &opts, &query, &mut smems, &mut scratch);
        let (mut chains, _) = chain_seeds(&idx, &opts, query.len(), &smems);
        filter_chains(&opts, &mut chains);
        let mut sw = BandedAligner::new();
        let mut regions = Vec::new();
        for chain in &chains {
            extend_chain(&idx, &opts, chain, &query, &mut sw, &mut regions);
        }
        regions
    }

    #[test]
    fn test_perfect_read_full_span() {
        let refseq = b"GATTACAGGCCTTAACCGGTTAACCTTGGAACCGGTTAA";
        let read = b"CCTTAACCGGTTAACC";
        let regions = align_regions(refseq, read, 8);
        assert!(!regions.is_empty());
        let best = regions.iter().max_by_key(|r| r.score).unwrap();
        assert_eq!(best.score, 16);
        assert_eq!(best.true_score, 16);
        assert_eq!((best.qb, best.qe), (0, 16));
        assert_eq!(best.ref_len(), 16);
        assert!(best.seed_cov >= 16);
    }

    #[test]
    fn test_mismatch_extension() {
        // read matches with a single central mismatch; the region must span
        // the whole read anyway
        let refseq = b"TTGGCCAAGGTTCCAAGGTTGGCCTTAAGGCCTTGGAACC";
        let read =   b"AAGGTTCCAAGATTGGCCTTAAGG";
        let regions = align_regions(refseq, read, 8);
        let best = regions.iter().max_by_key(|r| r.score).unwrap();
        assert_eq!((best.qb, best.qe), (0, 24));
        assert_eq!(best.score, 23 - 4);
        assert_eq!(best.true_score, best.score);
    }

    #[test]
    fn test_invariants() {
        let refseq = b"GATTACAGGCCTTAACCGGTTAACCTTGGAACCGGTTAA";
        let regions = align_regions(refseq, b"CCTTAACCGGTTAACC", 8);
        for r in &regions {
            assert!(r.qb < r.qe);
            assert!(r.rb < r.re);
            assert!(r.score >= 0);
        }
    }
}
