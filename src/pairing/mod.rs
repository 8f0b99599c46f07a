// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Paired-end machinery: insert-size estimation, rescue of mates missing
//! from the expected window, and selection of the best concordant pair.

use crate::alignment::banded::BandedAligner;
use crate::alignment::region::raw_mapq;
use crate::alignment::AlnReg;
use crate::alphabets::dna;
use crate::index::ReferenceIndex;
use crate::opts::{flag, MemOpts};

pub mod insert_size;

pub use self::insert_size::{infer_orientation, InsertSizeStats, OrientationStats};

/// Try to place the mate of `anchor` by local alignment inside the window
/// where each usable orientation predicts it. Accepted placements are
/// appended to `mate_regions` (duplicates by reference span are not).
/// Returns the number of rescued regions.
pub fn mate_rescue(
    idx: &ReferenceIndex,
    opts: &MemOpts,
    stats: &InsertSizeStats,
    anchor: &AlnReg,
    mate_query: &[u8],
    mate_regions: &mut Vec<AlnReg>,
    sw: &mut BandedAligner,
) -> usize {
    let l_pac = idx.l_pac();
    let l_ms = mate_query.len() as i64;
    let mut skip = [false; 4];
    for (r, s) in skip.iter_mut().enumerate() {
        *s = stats.0[r].failed;
    }
    for reg in mate_regions.iter() {
        // an orientation already satisfied needs no rescue
        let (dir, dist) = infer_orientation(l_pac, anchor.rb, reg.rb);
        if stats.0[dir].contains(dist) {
            skip[dir] = true;
        }
    }
    if skip.iter().all(|&s| s) {
        return 0;
    }

    let mut n = 0;
    for r in 0..4 {
        if skip[r] {
            continue;
        }
        let os = &stats.0[r];
        let is_rev = (r >> 1) != (r & 1); // mate sits on the opposite strand
        let is_larger = (r >> 1) == 0; // mate is downstream of the anchor
        let seq: Vec<u8> = if is_rev {
            dna::revcomp(mate_query)
        } else {
            mate_query.to_vec()
        };
        // nearest and farthest positions the window may start at, relative
        // to the anchor
        let near = if is_larger {
            anchor.rb + os.low as i64
        } else {
            anchor.rb - os.high as i64
        };
        let far = if is_larger {
            anchor.rb + os.high as i64
        } else {
            anchor.rb - os.low as i64
        };
        // widen the window by the mate length on the side it must fit into
        let (mut rb, mut re) = if is_rev {
            (near - l_ms, far)
        } else {
            (near, far + l_ms)
        };
        rb = rb.max(0);
        re = re.min(l_pac << 1);
        if rb >= re {
            continue;
        }
        let mid = (rb + re) >> 1;
        let (rseq, rb, _re, rid) = match idx.fetch_seq(rb, mid, re) {
            Some(f) => f,
            None => continue,
        };
        if rseq.is_empty() {
            continue;
        }
        if let Some(aln) = sw.local(&seq, &rseq, opts) {
            if aln.score >= opts.seed_score(opts.min_seed_len) {
                let is_alt = !opts.has_flag(flag::NO_ALT)
                    && idx.ann().records[rid as usize].is_alt;
                let mut b = AlnReg::new(rid, is_alt);
                b.qb = if is_rev { l_ms as i32 - aln.qe } else { aln.qb };
                b.qe = if is_rev { l_ms as i32 - aln.qb } else { aln.qe };
                b.rb = if is_rev {
                    (l_pac << 1) - (rb + aln.te as i64)
                } else {
                    rb + aln.tb as i64
                };
                b.re = if is_rev {
                    (l_pac << 1) - (rb + aln.tb as i64)
                } else {
                    rb + aln.te as i64
                };
                b.score = aln.score;
                b.true_score = aln.score;
                b.csub = aln.score2;
                b.w = opts.band_width;
                b.seed_cov = ((b.ref_len().min(b.query_len() as i64)) >> 1) as i32;
                if !mate_regions
                    .iter()
                    .any(|p| p.rb == b.rb && p.re == b.re)
                {
                    mate_regions.push(b);
                    n += 1;
                }
            }
        }
    }
    n
}

/// The best concordant pair of a read pair.
#[derive(Clone, Copy, Debug)]
pub struct PairResolution {
    /// Chosen region index per mate.
    pub idx: [usize; 2],
    pub score: i32,
    /// Second-best pair score, 0 when unique.
    pub sub: i32,
    /// Competing pairs within one event of the best.
    pub n_sub: i32,
}

/// Enumerate region pairs passing the proper-pair window and pick the best
/// by `score1 + score2` minus the discordance penalty for orientations
/// other than the primary one. Only the leading `n_pri` (primary-assembly)
/// regions of each side are considered.
pub fn resolve_pair(
    opts: &MemOpts,
    l_pac: i64,
    stats: &InsertSizeStats,
    regs: [&[AlnReg]; 2],
    n_pri: [usize; 2],
) -> Option<PairResolution> {
    let primary_dir = stats.primary_orientation()?;
    let mut candidates: Vec<(i32, usize, usize)> = Vec::new();
    for i in 0..n_pri[0].min(regs[0].len()) {
        let a = &regs[0][i];
        for j in 0..n_pri[1].min(regs[1].len()) {
            let b = &regs[1][j];
            if a.rid != b.rid {
                continue;
            }
            let (dir, dist) = infer_orientation(l_pac, a.rb, b.rb);
            if !stats.0[dir].contains(dist) {
                continue;
            }
            let penalty = if dir != primary_dir {
                opts.pen_unpaired
            } else {
                0
            };
            candidates.push((a.score + b.score - penalty, i, j));
        }
    }
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|x, y| y.0.cmp(&x.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));
    let (score, i, j) = candidates[0];
    let sub = if candidates.len() > 1 {
        candidates[1].0
    } else {
        0
    };
    let margin = opts.suboptimal_margin();
    let n_sub = candidates[1..]
        .iter()
        .filter(|c| score - c.0 <= margin)
        .count() as i32;
    Some(PairResolution {
        idx: [i, j],
        score,
        sub,
        n_sub,
    })
}

/// MAPQ boost of a resolved proper pair: the pair-level quality derived
/// from the margin over the best alternative (paired or unpaired) lifts
/// each mate's single-end MAPQ by at most 40.
pub fn pair_mapq(
    opts: &MemOpts,
    pr: &PairResolution,
    score_unpaired: i32,
    frac_rep: (f32, f32),
    q_se: (i32, i32),
) -> (i32, i32) {
    let subo = pr.sub.max(score_unpaired);
    let mut q_pe = raw_mapq(pr.score - subo, opts.match_score);
    if pr.n_sub > 0 {
        q_pe -= (4.343 * f64::from(pr.n_sub + 1).ln() + 0.499) as i32;
    }
    q_pe = q_pe.max(0).min(60);
    q_pe = (f64::from(q_pe) * (1.0 - 0.5 * f64::from(frac_rep.0 + frac_rep.1)) + 0.499) as i32;
    let boost = |q: i32| if q > q_pe { q } else { q_pe.min(q + 40) };
    (boost(q_se.0), boost(q_se.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{RngCore, SeedableRng};

    fn random_seq(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..len)
            .map(|_| crate::alphabets::dna::decode((rng.next_u32() & 3) as u8))
            .collect()
    }

    fn region(rb: i64, re: i64, qlen: i32, score: i32) -> AlnReg {
        let mut r = AlnReg::new(0, false);
        r.rb = rb;
        r.re = re;
        r.qb = 0;
        r.qe = qlen;
        r.score = score;
        r.true_score = score;
        r
    }

    #[test]
    fn test_mate_rescue_fr() {
        let refseq = random_seq(600, 42);
        let idx = ReferenceIndex::from_sequences(&[("chr1", &refseq[..])], &[]);
        let opts = MemOpts::default();
        let stats = InsertSizeStats::with_override(380.0, 30.0, None, None);
        // anchor maps forward at [100, 200); its mate is the reverse
        // complement of [380, 480) and has no regions yet
        let anchor = region(100, 200, 100, 100);
        let mate_codes: Vec<u8> = crate::alphabets::dna::revcomp(
            &crate::alphabets::dna::encode_seq(&refseq[380..480]),
        );
        let mut mate_regions = Vec::new();
        let mut sw = BandedAligner::new();
        let n = mate_rescue(
            &idx,
            &opts,
            &stats,
            &anchor,
            &mate_codes,
            &mut mate_regions,
            &mut sw,
        );
        assert_eq!(n, 1);
        let b = &mate_regions[0];
        let l2 = idx.l_pac() << 1;
        assert_eq!((b.rb, b.re), (l2 - 480, l2 - 380));
        assert_eq!((b.qb, b.qe), (0, 100));
        assert_eq!(b.score, 100);
        // the rescued pair really is a proper FR pair
        let (dir, dist) = infer_orientation(idx.l_pac(), anchor.rb, b.rb);
        assert_eq!(dir, 1);
        assert!(stats.0[1].contains(dist));
    }

    #[test]
    fn test_mate_rescue_skips_satisfied_orientation() {
        let refseq = random_seq(600, 42);
        let idx = ReferenceIndex::from_sequences(&[("chr1", &refseq[..])], &[]);
        let opts = MemOpts::default();
        let stats = InsertSizeStats::with_override(380.0, 30.0, None, None);
        let anchor = region(100, 200, 100, 100);
        let l2 = idx.l_pac() << 1;
        // mate already has a concordant region
        let mut mate_regions = vec![region(l2 - 480, l2 - 380, 100, 100)];
        let mut sw = BandedAligner::new();
        let n = mate_rescue(
            &idx,
            &opts,
            &stats,
            &anchor,
            &crate::alphabets::dna::encode_seq(b"ACGT"),
            &mut mate_regions,
            &mut sw,
        );
        assert_eq!(n, 0);
        assert_eq!(mate_regions.len(), 1);
    }

    #[test]
    fn test_resolve_pair_prefers_concordant() {
        let opts = MemOpts::default();
        let l_pac = 10_000;
        let stats = InsertSizeStats::with_override(300.0, 30.0, None, None);
        // read1 forward at 1000; read2 candidates: concordant reverse hit
        // with insert 300, and a higher-scoring hit far away
        let r1 = vec![region(1000, 1100, 100, 100)];
        let fr_mate_rb = (l_pac << 1) - 1 - 1299; // reflects to 1299
        let r2 = vec![
            region(5000, 5100, 100, 110),
            region(fr_mate_rb, fr_mate_rb + 100, 100, 90),
        ];
        let pr = resolve_pair(&opts, l_pac, &stats, [&r1, &r2], [1, 2]).unwrap();
        assert_eq!(pr.idx, [0, 1]);
        assert_eq!(pr.score, 190);
        assert_eq!(pr.sub, 0);
    }

    #[test]
    fn test_resolve_pair_none_when_discordant() {
        let opts = MemOpts::default();
        let stats = InsertSizeStats::with_override(300.0, 30.0, None, None);
        let r1 = vec![region(1000, 1100, 100, 100)];
        let r2 = vec![region(500_000, 500_100, 100, 100)];
        assert!(resolve_pair(&opts, 1_000_000, &stats, [&r1, &r2], [1, 1]).is_none());
    }

    #[test]
    fn test_pair_mapq_boost() {
        let opts = MemOpts::default();
        let pr = PairResolution {
            idx: [0, 0],
            score: 200,
            sub: 0,
            n_sub: 0,
        };
        // unique pair, weak single-end quality: boosted but capped at +40
        let (q1, q2) = pair_mapq(&opts, &pr, 183, (0.0, 0.0), (3, 50));
        assert_eq!(q1, 43);
        assert!(q2 >= 50);
    }
}
