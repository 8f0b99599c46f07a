// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Region post-processing: subsumption removal and colinear patching,
//! ALT-aware primary/secondary marking, and mapping quality.

use crate::alignment::global::GlobalAligner;
use crate::alignment::AlnReg;
use crate::index::ReferenceIndex;
use crate::opts::MemOpts;
use crate::utils::hash64;

const PATCH_MAX_R_BW: f64 = 0.25;
const MAPQ_COEF_LEN: i32 = 50;
/// Integer-truncated natural log of `MAPQ_COEF_LEN`; downstream MAPQ values
/// depend on this exact integer.
const MAPQ_COEF_FAC: i32 = 3;

/// Test whether two colinear adjacent regions (`a` before `b` on the
/// reference) can be replaced by one alignment across their joint span.
/// Returns the joint score and band width when the merged alignment is at
/// least as good as the length-weighted prediction from the parts.
fn patch(
    idx: &ReferenceIndex,
    opts: &MemOpts,
    query: &[u8],
    ga: &mut GlobalAligner,
    a: &AlnReg,
    b: &AlnReg,
) -> Option<(i32, i32)> {
    let l_pac = idx.l_pac();
    debug_assert!(a.rid == b.rid && a.rb <= b.rb);
    if a.rb < l_pac && b.rb >= l_pac {
        return None; // different strands
    }
    if a.qb >= b.qb || a.qe >= b.qe || a.re >= b.re {
        return None; // not colinear
    }
    let w_gap = ((a.re - b.rb) - (a.qe - b.qb) as i64).abs() as i32;
    let r = ((a.re - b.rb) as f64 / (b.re - a.rb) as f64
        - f64::from(a.qe - b.qb) / f64::from(b.qe - a.qb))
    .abs();
    if a.re < b.rb || a.qe < b.qb {
        // gapped on at least one sequence
        if w_gap > opts.band_width << 1 || r >= PATCH_MAX_R_BW {
            return None;
        }
    } else if w_gap > opts.band_width << 2 || r >= PATCH_MAX_R_BW * 2.0 {
        return None;
    }
    let mut w = w_gap + a.w + b.w;
    w = w.min(opts.band_width << 2);
    let (rseq, rb, re) = idx.pac().fetch(a.rb, b.re);
    if re - rb != b.re - a.rb {
        return None;
    }
    let (score, _) = ga.global(&query[a.qb as usize..b.qe as usize], &rseq, opts, w);
    let q_s = (f64::from(b.qe - a.qb) / f64::from((b.qe - b.qb) + (a.qe - a.qb))
        * f64::from(b.score + a.score)
        + 0.499) as i32;
    let r_s = ((b.re - a.rb) as f64 / ((b.re - b.rb) + (a.re - a.rb)) as f64
        * f64::from(b.score + a.score)
        + 0.499) as i32;
    if score < q_s.max(r_s) {
        return None;
    }
    Some((score, w))
}

/// Remove subsumed and duplicate regions and merge colinear adjacent ones.
/// Output is sorted by score descending.
pub fn dedup_patch(
    idx: &ReferenceIndex,
    opts: &MemOpts,
    query: &[u8],
    ga: &mut GlobalAligner,
    regions: &mut Vec<AlnReg>,
) {
    if regions.len() > 1 {
        regions.sort_by(|a, b| a.re.cmp(&b.re).then(a.rb.cmp(&b.rb)));
        for i in 1..regions.len() {
            if regions[i].rid != regions[i - 1].rid
                || regions[i].rb >= regions[i - 1].re + opts.max_chain_gap as i64
            {
                continue;
            }
            let mut j = i as isize - 1;
            while j >= 0 {
                let ju = j as usize;
                if regions[ju].rid != regions[i].rid
                    || regions[i].rb >= regions[ju].re + opts.max_chain_gap as i64
                {
                    break;
                }
                if regions[ju].is_dropped() {
                    j -= 1;
                    continue;
                }
                let ov_r = regions[ju].re - regions[i].rb;
                let ov_q = if regions[ju].qb < regions[i].qb {
                    regions[ju].qe - regions[i].qb
                } else {
                    regions[i].qe - regions[ju].qb
                };
                let min_r = regions[ju].ref_len().min(regions[i].ref_len());
                let min_q = regions[ju].query_len().min(regions[i].query_len());
                if ov_r as f64 > f64::from(opts.mask_level_redun) * min_r as f64
                    && f64::from(ov_q) > f64::from(opts.mask_level_redun) * f64::from(min_q)
                {
                    // one of the two is redundant
                    if regions[i].score < regions[ju].score {
                        regions[i].qe = regions[i].qb;
                        break;
                    }
                    regions[ju].qe = regions[ju].qb;
                } else if regions[ju].rb < regions[i].rb {
                    if let Some((score, w)) =
                        patch(idx, opts, query, ga, &regions[ju], &regions[i])
                    {
                        let (q_rb, q_qb, q_re, q_qe) = (
                            regions[ju].rb,
                            regions[ju].qb,
                            regions[ju].re,
                            regions[ju].qe,
                        );
                        regions[ju].qe = regions[ju].qb; // merged away
                        let p = &mut regions[i];
                        p.rb = q_rb;
                        p.qb = q_qb;
                        p.re = p.re.max(q_re);
                        p.qe = p.qe.max(q_qe);
                        p.score = score;
                        p.true_score = score;
                        p.w = w;
                    }
                }
                j -= 1;
            }
        }
        regions.retain(|r| !r.is_dropped());
    }
    regions.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.rb.cmp(&b.rb))
            .then(a.qb.cmp(&b.qb))
    });
    let mut prev: Option<(i32, i64, i32)> = None;
    regions.retain(|r| {
        let key = (r.score, r.rb, r.qb);
        let dup = prev == Some(key);
        prev = Some(key);
        !dup
    });
}

/// Raw Phred scale of a score difference.
pub fn raw_mapq(diff: i32, a: i32) -> i32 {
    (6.02 * f64::from(diff) / f64::from(a) + 0.499) as i32
}

/// The non-ALT marking pass over a (sorted) region slice: every region
/// significantly overlapping an earlier primary becomes its secondary;
/// primaries record the first shadowing score in `sub` and count close
/// competitors in `sub_n`.
fn mark_core(opts: &MemOpts, regions: &mut [AlnReg]) {
    if regions.is_empty() {
        return;
    }
    let margin = opts.suboptimal_margin();
    let mut primaries: Vec<usize> = vec![0];
    for i in 1..regions.len() {
        let mut shadowed_by = None;
        for &j in &primaries {
            let b_max = regions[j].qb.max(regions[i].qb);
            let e_min = regions[j].qe.min(regions[i].qe);
            if e_min > b_max {
                let min_l = regions[i].query_len().min(regions[j].query_len());
                if f64::from(e_min - b_max) >= f64::from(min_l) * f64::from(opts.mask_level) {
                    if regions[j].sub == 0 {
                        regions[j].sub = regions[i].score;
                    }
                    // a primary shadowing an ALT hit does not count it as a
                    // competitor unless it is ALT itself
                    if regions[j].score - regions[i].score <= margin
                        && (regions[j].is_alt || !regions[i].is_alt)
                    {
                        regions[j].sub_n += 1;
                    }
                    shadowed_by = Some(j);
                    break;
                }
            }
        }
        match shadowed_by {
            Some(j) => regions[i].secondary = j as i32,
            None => primaries.push(i),
        }
    }
}

/// ALT-aware primary/secondary classification. Returns the number of
/// primary-assembly (non-ALT) regions, which are sorted to the front in
/// mixed lists. Re-running on the same list changes nothing.
pub fn mark_primary(opts: &MemOpts, regions: &mut Vec<AlnReg>, id: u64) -> usize {
    let n = regions.len();
    if n == 0 {
        return 0;
    }
    let mut n_pri = 0;
    for r in regions.iter_mut() {
        r.secondary = -1;
        r.secondary_all = -1;
        r.alt_sc = 0;
        r.sub_n = 0;
        // keyed on the read id and the region coordinates so that re-running
        // the marker cannot reshuffle ties
        r.hash = hash64(id ^ hash64(r.rb as u64 ^ ((r.qb as u64) << 40)));
        if !r.is_alt {
            n_pri += 1;
        }
    }
    regions.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.is_alt.cmp(&b.is_alt))
            .then(a.hash.cmp(&b.hash))
    });
    mark_core(opts, regions);
    for i in 0..n {
        regions[i].secondary_all = i as i32; // rank in the all-regions round
        let sec = regions[i].secondary;
        if !regions[i].is_alt && sec >= 0 && regions[sec as usize].is_alt {
            regions[i].alt_sc = regions[sec as usize].score;
        }
    }
    if n_pri < n {
        // mixed ALT/primary: redo the marking over the primaries alone
        if n_pri > 0 {
            regions.sort_by(|a, b| {
                a.is_alt
                    .cmp(&b.is_alt)
                    .then(b.score.cmp(&a.score))
                    .then(a.hash.cmp(&b.hash))
            });
        }
        let mut remap = vec![0i32; n];
        for (i, r) in regions.iter().enumerate() {
            remap[r.secondary_all as usize] = i as i32;
        }
        for r in regions.iter_mut() {
            if r.secondary >= 0 {
                r.secondary_all = remap[r.secondary as usize];
                if r.is_alt {
                    // shadowed ALT hits are secondary of nothing
                    r.secondary = i32::MAX;
                }
            } else {
                r.secondary_all = -1;
            }
        }
        if n_pri > 0 {
            for r in regions[..n_pri].iter_mut() {
                r.sub = 0;
                r.secondary = -1;
            }
            mark_core(opts, &mut regions[..n_pri]);
        }
    } else {
        for r in regions.iter_mut() {
            r.secondary_all = r.secondary;
        }
    }
    n_pri
}

/// Move the alignment covering the 5'-most query bases to the front of the
/// region list, fixing up secondary indices.
pub fn reorder_primary5(min_score: i32, regions: &mut Vec<AlnReg>) {
    let n_pri = regions
        .iter()
        .filter(|r| r.secondary < 0 && !r.is_alt && r.score >= min_score)
        .count();
    if n_pri <= 1 {
        return;
    }
    let mut left_k = None;
    let mut left_st = i32::MAX;
    for (k, r) in regions.iter().enumerate() {
        if r.secondary >= 0 || r.is_alt || r.score < min_score {
            continue;
        }
        if r.qb < left_st {
            left_st = r.qb;
            left_k = Some(k);
        }
    }
    let left_k = match left_k {
        Some(k) if k > 0 => k,
        _ => return,
    };
    let chosen = regions.remove(left_k);
    regions.insert(0, chosen);
    for r in regions.iter_mut() {
        for field in [&mut r.secondary, &mut r.secondary_all] {
            if *field >= 0 && *field != i32::MAX {
                if (*field as usize) < left_k {
                    *field += 1;
                } else if *field as usize == left_k {
                    *field = 0;
                }
            }
        }
    }
}

/// Phred-scaled mapping quality of a region, clamped to [0, 60].
pub fn mapq(opts: &MemOpts, reg: &AlnReg) -> i32 {
    let mut sub = if reg.sub > 0 {
        reg.sub
    } else {
        opts.min_seed_len * opts.match_score
    };
    sub = sub.max(reg.csub);
    if sub >= reg.score {
        return 0;
    }
    let l = reg.query_len().max(reg.ref_len() as i32);
    let a = opts.match_score;
    let identity =
        1.0 - f64::from(l * a - reg.score) / f64::from(a + opts.mismatch_penalty) / f64::from(l);
    let mut q = if reg.score == 0 {
        0
    } else {
        let mut tmp = if l < MAPQ_COEF_LEN {
            1.0
        } else {
            f64::from(MAPQ_COEF_FAC) / f64::from(l).ln()
        };
        tmp *= identity * identity;
        (6.02 * f64::from(reg.score - sub) / f64::from(a) * tmp * tmp + 0.499) as i32
    };
    if reg.sub_n > 0 {
        q -= (4.343 * f64::from(reg.sub_n + 1).ln() + 0.499) as i32;
    }
    q = q.max(0).min(60);
    (f64::from(q) * (1.0 - f64::from(reg.frac_rep)) + 0.499) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(score: i32, qb: i32, qe: i32, rb: i64, re: i64, is_alt: bool) -> AlnReg {
        let mut r = AlnReg::new(0, is_alt);
        r.score = score;
        r.true_score = score;
        r.qb = qb;
        r.qe = qe;
        r.rb = rb;
        r.re = re;
        r
    }

    #[test]
    fn test_mark_primary_two_equal_hits() {
        let opts = MemOpts::default();
        let mut regions = vec![reg(40, 0, 40, 100, 140, false), reg(40, 0, 40, 1100, 1140, false)];
        let n_pri = mark_primary(&opts, &mut regions, 7);
        assert_eq!(n_pri, 2);
        assert_eq!(regions[0].secondary, -1);
        assert_eq!(regions[1].secondary, 0);
        assert_eq!(regions[0].sub, 40);
        assert_eq!(regions[0].sub_n, 1);
        // equal best and sub-optimal scores give MAPQ 0
        assert_eq!(mapq(&opts, &regions[0]), 0);
    }

    #[test]
    fn test_mark_primary_idempotent() {
        let opts = MemOpts::default();
        let mut regions = vec![
            reg(45, 0, 45, 100, 145, false),
            reg(40, 0, 40, 1100, 1140, false),
            reg(38, 5, 45, 2100, 2140, false),
        ];
        mark_primary(&opts, &mut regions, 99);
        let snapshot: Vec<(i32, i32, i32, i32, u64)> = regions
            .iter()
            .map(|r| (r.secondary, r.secondary_all, r.sub, r.sub_n, r.hash))
            .collect();
        mark_primary(&opts, &mut regions, 99);
        let again: Vec<(i32, i32, i32, i32, u64)> = regions
            .iter()
            .map(|r| (r.secondary, r.secondary_all, r.sub, r.sub_n, r.hash))
            .collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn test_alt_aware_marking() {
        let opts = MemOpts::default();
        // overlapping hits: ALT scores 120, primary-assembly scores 80
        let mut regions = vec![reg(120, 0, 100, 5000, 5100, true), reg(80, 0, 100, 100, 200, false)];
        let n_pri = mark_primary(&opts, &mut regions, 3);
        assert_eq!(n_pri, 1);
        // the non-ALT hit is the primary despite the lower score
        let pri = regions.iter().find(|r| !r.is_alt).unwrap();
        assert_eq!(pri.secondary, -1);
        assert_eq!(pri.alt_sc, 120);
        // the ALT hit was shadowed in the all-regions round and carries the
        // sentinel pointer
        let alt = regions.iter().find(|r| r.is_alt).unwrap();
        assert!(alt.secondary == -1 || alt.secondary == i32::MAX);
    }

    #[test]
    fn test_alt_never_secondary_of_primary() {
        let opts = MemOpts::default();
        let mut regions = vec![
            reg(100, 0, 100, 100, 200, false),
            reg(90, 0, 100, 5000, 5100, true),
        ];
        mark_primary(&opts, &mut regions, 5);
        let alt = regions.iter().find(|r| r.is_alt).unwrap();
        assert_eq!(alt.secondary, i32::MAX);
    }

    #[test]
    fn test_mapq_perfect_unique() {
        let opts = MemOpts::default();
        let mut r = reg(100, 0, 100, 0, 100, false);
        r.seed_cov = 100;
        assert_eq!(mapq(&opts, &r), 60);
    }

    #[test]
    fn test_mapq_scales_with_margin() {
        let opts = MemOpts::default();
        let mut strong = reg(100, 0, 100, 0, 100, false);
        strong.sub = 30;
        let mut weak = reg(100, 0, 100, 0, 100, false);
        weak.sub = 95;
        assert!(mapq(&opts, &strong) > mapq(&opts, &weak));
        assert!(mapq(&opts, &weak) > 0 || weak.sub >= weak.score);
        let mut frac = strong.clone();
        frac.frac_rep = 0.5;
        assert!(mapq(&opts, &frac) < mapq(&opts, &strong));
    }

    #[test]
    fn test_reorder_primary5() {
        let opts = MemOpts::default();
        let mut regions = vec![
            reg(90, 50, 100, 100, 150, false),
            reg(80, 0, 45, 1000, 1045, false),
        ];
        mark_primary(&opts, &mut regions, 1);
        // disjoint query spans: both primary
        assert!(regions.iter().all(|r| r.secondary < 0));
        reorder_primary5(opts.min_output_score, &mut regions);
        assert_eq!(regions[0].qb, 0);
    }
}
