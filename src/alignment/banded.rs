// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Banded Smith-Waterman kernels.
//!
//! The extension kernel grows an alignment outward from a seed with initial
//! score `h0`, tracking both the best local end and the score of the
//! alignment consuming the entire query (the "global" end). It exists in two
//! cell widths with an identical recurrence: the byte kernel works in the
//! biased unsigned 8-bit value domain and aborts with an overflow signal as
//! soon as any cell exceeds 250, upon which the caller falls back to the
//! word kernel, which has no overflow signal. Lane-striped SIMD backends of
//! either width must reproduce these scores and end positions exactly; this
//! portable kernel is the canonical CPU path.
//!
//! A full local aligner used by mate rescue lives here as well.

use crate::opts::MemOpts;

/// Overflow signal of the byte kernel. Not an error: the caller retries in
/// the word kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwOverflow;

/// Cell-width policy of the extension kernel.
pub trait CellWidth {
    /// Largest representable cell value, if bounded.
    const LIMIT: Option<i32>;
}

/// Unsigned 8-bit cells with bias; overflows above 250.
pub enum Byte {}

impl CellWidth for Byte {
    const LIMIT: Option<i32> = Some(250);
}

/// Signed 16-bit-and-wider cells; never overflows.
pub enum Word {}

impl CellWidth for Word {
    const LIMIT: Option<i32> = None;
}

/// Result of one extension call. End positions are one past the last
/// consumed base.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtendResult {
    /// Best local score.
    pub score: i32,
    /// Query end of the best local alignment.
    pub query_end: i32,
    /// Target end of the best local alignment.
    pub target_end: i32,
    /// Best score among alignments consuming the entire query, -1 if the
    /// band never reached the last query column.
    pub global_score: i32,
    /// Target end of the best whole-query alignment.
    pub global_target_end: i32,
    /// Largest distance of the best cell from the diagonal.
    pub max_off: i32,
}

/// Result of a full local alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalResult {
    pub score: i32,
    /// Best score ending far (at least half a query length) from the best
    /// end; 0 if none.
    pub score2: i32,
    pub qb: i32,
    pub qe: i32,
    pub tb: i32,
    pub te: i32,
}

/// Reusable DP workspace; all buffers are bounded by the query length and
/// reset between calls.
#[derive(Default)]
pub struct BandedAligner {
    h: Vec<i32>,
    e: Vec<i32>,
    origin_h: Vec<(i32, i32)>,
    origin_e: Vec<(i32, i32)>,
    row_best: Vec<i32>,
}

impl BandedAligner {
    pub fn new() -> Self {
        BandedAligner::default()
    }

    /// Extend with the byte kernel, falling back to the word kernel on
    /// overflow. The retry is invisible to callers.
    pub fn extend(
        &mut self,
        query: &[u8],
        target: &[u8],
        opts: &MemOpts,
        w: i32,
        end_bonus: i32,
        h0: i32,
    ) -> ExtendResult {
        match self.extend_typed::<Byte>(query, target, opts, w, end_bonus, h0) {
            Ok(res) => res,
            Err(SwOverflow) => self
                .extend_typed::<Word>(query, target, opts, w, end_bonus, h0)
                .expect("word kernel cannot overflow"),
        }
    }

    /// One banded extension in the given cell width.
    pub fn extend_typed<W: CellWidth>(
        &mut self,
        query: &[u8],
        target: &[u8],
        opts: &MemOpts,
        w: i32,
        end_bonus: i32,
        h0: i32,
    ) -> Result<ExtendResult, SwOverflow> {
        let qlen = query.len() as i32;
        let tlen = target.len() as i32;
        debug_assert!(h0 > 0);
        if qlen == 0 || tlen == 0 {
            return Ok(ExtendResult {
                score: h0,
                query_end: 0,
                target_end: 0,
                global_score: -1,
                global_target_end: 0,
                max_off: 0,
            });
        }
        let oe_del = opts.gap_open_del + opts.gap_extend_del;
        let oe_ins = opts.gap_open + opts.gap_extend;
        let e_del = opts.gap_extend_del;
        let e_ins = opts.gap_extend;

        let n = qlen as usize + 1;
        self.h.clear();
        self.h.resize(n, 0);
        self.e.clear();
        self.e.resize(n, 0);

        // first row: h0 decaying by the insertion penalty
        self.h[0] = h0;
        self.h[1] = if h0 > oe_ins { h0 - oe_ins } else { 0 };
        let mut j = 2usize;
        while j <= qlen as usize && self.h[j - 1] > e_ins {
            self.h[j] = self.h[j - 1] - e_ins;
            j += 1;
        }

        // clamp the band by the largest gap any positive-score alignment
        // could contain
        let max_sc = opts.match_score;
        let max_ins = ((f64::from(qlen * max_sc + end_bonus - opts.gap_open)) / f64::from(e_ins)
            + 1.0) as i32;
        let max_del = ((f64::from(qlen * max_sc + end_bonus - opts.gap_open_del))
            / f64::from(e_del)
            + 1.0) as i32;
        let w = w.min(max_ins.max(1)).min(max_del.max(1));

        let mut max = h0;
        let mut max_i = -1i32;
        let mut max_j = -1i32;
        let mut max_ie = -1i32;
        let mut gscore = -1i32;
        let mut max_off = 0i32;
        let mut beg = 0i32;
        let mut end = qlen;
        let mut i = 0i32;
        while i < tlen {
            let tc = target[i as usize];
            let mut f = 0i32;
            let mut row_max = 0i32;
            let mut row_max_j = -1i32;
            if beg < i - w {
                beg = i - w;
            }
            if end > i + w + 1 {
                end = i + w + 1;
            }
            if end > qlen {
                end = qlen;
            }
            let mut h1 = if beg == 0 {
                let v = h0 - (opts.gap_open_del + e_del * (i + 1));
                if v < 0 {
                    0
                } else {
                    v
                }
            } else {
                0
            };
            for j in beg..end {
                // invariant entering the column: h[j] = H(i-1,j-1),
                // e[j] = E(i,j), f = F(i,j), h1 = H(i,j-1)
                let ju = j as usize;
                let mut m = self.h[ju];
                let mut e = self.e[ju];
                self.h[ju] = h1;
                // a zero diagonal cell is unreachable from the seed and must
                // not restart the alignment
                m = if m != 0 {
                    m + opts.score(query[ju], tc)
                } else {
                    0
                };
                let mut h = if m > e { m } else { e };
                if f > h {
                    h = f;
                }
                h1 = h;
                if let Some(limit) = W::LIMIT {
                    if h > limit {
                        return Err(SwOverflow);
                    }
                }
                if h >= row_max {
                    row_max = h;
                    row_max_j = j;
                }
                let mut t = m - oe_del;
                if t < 0 {
                    t = 0;
                }
                e -= e_del;
                if e < t {
                    e = t;
                }
                self.e[ju] = e;
                let mut t = m - oe_ins;
                if t < 0 {
                    t = 0;
                }
                f -= e_ins;
                if f < t {
                    f = t;
                }
            }
            self.h[end as usize] = h1;
            self.e[end as usize] = 0;
            if end == qlen && gscore <= h1 {
                max_ie = i;
                gscore = h1;
            }
            if row_max == 0 {
                break;
            }
            if row_max > max {
                max = row_max;
                max_i = i;
                max_j = row_max_j;
                let off = (row_max_j - i).abs();
                if off > max_off {
                    max_off = off;
                }
            } else if opts.zdrop > 0 && max - row_max > opts.zdrop && i - max_i > w {
                break;
            }
            // shrink the band to the non-zero cells
            let mut jj = beg;
            while jj < end && self.h[jj as usize] == 0 && self.e[jj as usize] == 0 {
                jj += 1;
            }
            beg = jj;
            let mut jj = end;
            while jj >= beg && self.h[jj as usize] == 0 && self.e[jj as usize] == 0 {
                jj -= 1;
            }
            end = if jj + 2 < qlen { jj + 2 } else { qlen };
            i += 1;
        }
        Ok(ExtendResult {
            score: max,
            query_end: max_j + 1,
            target_end: max_i + 1,
            global_score: gscore,
            global_target_end: max_ie + 1,
            max_off,
        })
    }

    /// Full local alignment of `query` against `target`, used by mate
    /// rescue. Returns `None` when no positive-scoring alignment exists.
    pub fn local(&mut self, query: &[u8], target: &[u8], opts: &MemOpts) -> Option<LocalResult> {
        let qlen = query.len();
        let tlen = target.len();
        if qlen == 0 || tlen == 0 {
            return None;
        }
        let oe_del = opts.gap_open_del + opts.gap_extend_del;
        let oe_ins = opts.gap_open + opts.gap_extend;
        let e_del = opts.gap_extend_del;
        let e_ins = opts.gap_extend;

        self.h.clear();
        self.h.resize(qlen, 0);
        self.e.clear();
        self.e.resize(qlen, 0);
        self.origin_h.clear();
        self.origin_h.resize(qlen, (0, 0));
        self.origin_e.clear();
        self.origin_e.resize(qlen, (0, 0));
        self.row_best.clear();
        self.row_best.resize(tlen, 0);

        let mut best = 0i32;
        let mut best_end = (-1i32, -1i32);
        let mut best_orig = (0i32, 0i32);
        for i in 0..tlen {
            let ii = i as i32;
            let mut diag = 0i32;
            let mut diag_o = (ii, 0i32);
            let mut f = 0i32;
            let mut f_o = (ii, 0i32);
            let mut row_max = 0i32;
            for j in 0..qlen {
                let jj = j as i32;
                let up = self.h[j];
                let up_o = self.origin_h[j];
                let sc = opts.score(query[j], target[i]);
                let (m, m_o) = if diag > 0 {
                    (diag + sc, diag_o)
                } else {
                    (sc, (ii, jj))
                };
                let mut h = 0i32;
                let mut h_o = (ii, jj);
                if m > h {
                    h = m;
                    h_o = m_o;
                }
                if self.e[j] > h {
                    h = self.e[j];
                    h_o = self.origin_e[j];
                }
                if f > h {
                    h = f;
                    h_o = f_o;
                }
                diag = up;
                diag_o = up_o;
                self.h[j] = h;
                self.origin_h[j] = h_o;
                if h > row_max {
                    row_max = h;
                }
                if h > best {
                    best = h;
                    best_end = (ii, jj);
                    best_orig = h_o;
                }
                let open = h - oe_del;
                let ext = self.e[j] - e_del;
                if ext > open && ext > 0 {
                    self.e[j] = ext;
                } else {
                    self.e[j] = if open > 0 { open } else { 0 };
                    self.origin_e[j] = h_o;
                }
                let open = h - oe_ins;
                let ext = f - e_ins;
                if ext > open && ext > 0 {
                    f = ext;
                } else {
                    f = if open > 0 { open } else { 0 };
                    f_o = h_o;
                }
            }
            self.row_best[i] = row_max;
        }
        if best <= 0 {
            return None;
        }
        // second best: the strongest end at least half a query away
        let half = (qlen / 2).max(1) as i32;
        let mut score2 = 0;
        for (i, &m) in self.row_best.iter().enumerate() {
            if (i as i32 - best_end.0).abs() >= half && m > score2 {
                score2 = m;
            }
        }
        Some(LocalResult {
            score: best,
            score2,
            qb: best_orig.1,
            qe: best_end.1 + 1,
            tb: best_orig.0,
            te: best_end.0 + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabets::dna;

    fn opts() -> MemOpts {
        MemOpts::default()
    }

    #[test]
    fn test_extend_perfect() {
        // extending a seed over a perfectly matching tail
        let mut sw = BandedAligner::new();
        let query = dna::encode_seq(b"ACGTACGTAC");
        let target = dna::encode_seq(b"ACGTACGTAC");
        let res = sw.extend(&query, &target, &opts(), 100, 5, 20);
        assert_eq!(res.score, 30);
        assert_eq!(res.query_end, 10);
        assert_eq!(res.target_end, 10);
        assert_eq!(res.global_score, 30);
        assert_eq!(res.global_target_end, 10);
        assert_eq!(res.max_off, 0);
    }

    #[test]
    fn test_extend_stops_at_mismatch_tail() {
        // mismatching tail: the local end stays before it, the global score
        // pays for the mismatches
        let mut sw = BandedAligner::new();
        let query = dna::encode_seq(b"ACGTACGTTT");
        let target = dna::encode_seq(b"ACGTACGCCC");
        let res = sw.extend(&query, &target, &opts(), 100, 5, 20);
        assert_eq!(res.score, 27); // 20 + 7 matches
        assert_eq!(res.query_end, 7);
        // cheapest way to consume the whole query is inserting the TTT tail
        assert_eq!(res.global_score, 27 - 6 - 3);
        assert_eq!(res.global_target_end, 7);
        assert!(res.global_score < res.score);
    }

    #[test]
    fn test_extend_with_deletion() {
        let mut sw = BandedAligner::new();
        let query = dna::encode_seq(b"ACGTACGT");
        let target = dna::encode_seq(b"ACGTGACGT"); // one extra ref base
        let res = sw.extend(&query, &target, &opts(), 100, 5, 20);
        // 8 matches + h0 - (gap open 6 + extend 1)
        assert_eq!(res.global_score, 20 + 8 - 7);
        assert_eq!(res.global_target_end, 9);
    }

    #[test]
    fn test_byte_kernel_overflows() {
        let mut sw = BandedAligner::new();
        let query = vec![0u8; 300];
        let target = vec![0u8; 300];
        let res = sw.extend_typed::<Byte>(&query, &target, &opts(), 100, 5, 20);
        assert_eq!(res, Err(SwOverflow));
        // the dispatching wrapper falls back and gets the right answer
        let res = sw.extend(&query, &target, &opts(), 100, 5, 20);
        assert_eq!(res.score, 320);
    }

    #[test]
    fn test_zdrop_terminates() {
        // long garbage tail after a good prefix: z-drop must stop the loop
        // before the end of the target
        let mut sw = BandedAligner::new();
        let mut query = dna::encode_seq(b"ACGTACGTACGTACGTACGT");
        let mut target = query.clone();
        query.extend(vec![0u8; 150]); // poly-A
        target.extend(vec![1u8; 150]); // poly-C
        let mut o = opts();
        o.zdrop = 10;
        let res = sw.extend(&query, &target, &o, 5, 5, 20);
        assert_eq!(res.score, 40);
        assert_eq!(res.query_end, 20);
    }

    #[test]
    fn test_local_exact() {
        let mut sw = BandedAligner::new();
        let query = dna::encode_seq(b"TTTT");
        let target = dna::encode_seq(b"ACGTTTTACG");
        let res = sw.local(&query, &target, &opts()).unwrap();
        assert_eq!(res.score, 4);
        assert_eq!((res.qb, res.qe), (0, 4));
        assert_eq!((res.tb, res.te), (3, 7));
    }

    #[test]
    fn test_local_with_mismatch() {
        let mut sw = BandedAligner::new();
        let query = dna::encode_seq(b"AAAATAAAA");
        let target = dna::encode_seq(b"GGGAAAAGAAAAGGG");
        let res = sw.local(&query, &target, &opts()).unwrap();
        // 8 matches, one mismatch
        assert_eq!(res.score, 5);
        assert_eq!((res.qb, res.qe), (0, 9));
        assert_eq!((res.tb, res.te), (3, 12));
    }

    #[test]
    fn test_local_none_for_disjoint() {
        let mut sw = BandedAligner::new();
        let query = dna::encode_seq(b"AAAA");
        let target = dna::encode_seq(b"CCCC");
        // every cell scores negative except fresh single-base starts, which
        // are mismatches too
        assert!(sw.local(&query, &target, &opts()).is_none());
    }
}
