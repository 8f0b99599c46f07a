// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Banded global alignment with traceback, and CIGAR/NM/MD generation for an
//! alignment region.

use crate::alignment::{CigarOp, Op};
use crate::index::pac::PackedSequence;
use crate::opts::MemOpts;

const NEG_INF: i32 = -0x4000_0000;

/// Append an operation, merging with a trailing run of the same kind.
pub fn push_op(cigar: &mut Vec<CigarOp>, op: Op, len: u32) {
    if len == 0 {
        return;
    }
    if let Some(last) = cigar.last_mut() {
        if last.op() == op {
            *last = last.with_len(last.len() + len);
            return;
        }
    }
    cigar.push(CigarOp::new(op, len));
}

/// CIGAR, score and tag material produced for one region.
#[derive(Clone, Debug)]
pub struct CigarResult {
    pub cigar: Vec<CigarOp>,
    pub score: i32,
    pub nm: i32,
    pub md: String,
}

/// Reusable workspace of the global aligner. The backtrack matrix is the
/// only allocation proportional to the banded area.
#[derive(Default)]
pub struct GlobalAligner {
    h: Vec<i32>,
    e: Vec<i32>,
    z: Vec<u8>,
}

impl GlobalAligner {
    pub fn new() -> Self {
        GlobalAligner::default()
    }

    /// Global alignment of `query` against `target` within band `w`,
    /// with affine gap penalties kept separate per gap direction. Returns
    /// the score and the CIGAR (M/I/D only).
    pub fn global(
        &mut self,
        query: &[u8],
        target: &[u8],
        opts: &MemOpts,
        w: i32,
    ) -> (i32, Vec<CigarOp>) {
        let qlen = query.len() as i32;
        let tlen = target.len() as i32;
        let mut cigar = Vec::new();
        if qlen == 0 && tlen == 0 {
            return (0, cigar);
        }
        if qlen == 0 {
            push_op(&mut cigar, Op::Del, tlen as u32);
            return (-(opts.gap_open_del + opts.gap_extend_del * tlen), cigar);
        }
        if tlen == 0 {
            push_op(&mut cigar, Op::Ins, qlen as u32);
            return (-(opts.gap_open + opts.gap_extend * qlen), cigar);
        }
        let oe_del = opts.gap_open_del + opts.gap_extend_del;
        let oe_ins = opts.gap_open + opts.gap_extend;
        let e_del = opts.gap_extend_del;
        let e_ins = opts.gap_extend;

        let n_col = qlen.min(2 * w + 1) as usize;
        self.z.clear();
        self.z.resize(n_col * tlen as usize, 0);
        self.h.clear();
        self.h.resize(qlen as usize + 1, NEG_INF);
        self.e.clear();
        self.e.resize(qlen as usize + 1, NEG_INF);

        self.h[0] = 0;
        for j in 1..=qlen {
            if j > w {
                break;
            }
            self.h[j as usize] = -(opts.gap_open + e_ins * j);
        }

        for i in 0..tlen {
            let tc = target[i as usize];
            let beg = if i > w { i - w } else { 0 };
            let end = if i + w + 1 < qlen { i + w + 1 } else { qlen };
            let mut f = NEG_INF;
            let mut h1 = if beg == 0 {
                -(opts.gap_open_del + e_del * (i + 1))
            } else {
                NEG_INF
            };
            let row = &mut self.z[i as usize * n_col..(i as usize + 1) * n_col];
            for j in beg..end {
                // invariant entering the column: h[j] = H(i-1,j-1),
                // e[j] = E(i,j), f = F(i,j), h1 = H(i,j-1)
                let ju = j as usize;
                let mut m = self.h[ju];
                let mut e = self.e[ju];
                self.h[ju] = h1;
                m += opts.score(query[ju], tc);
                let mut d: u8 = if m >= e { 0 } else { 1 };
                let mut h = if m >= e { m } else { e };
                if f > h {
                    d = 2;
                    h = f;
                }
                h1 = h;
                let t = m - oe_del;
                e -= e_del;
                if e > t {
                    d |= 1 << 2;
                } else {
                    e = t;
                }
                self.e[ju] = e;
                let t = m - oe_ins;
                f -= e_ins;
                if f > t {
                    d |= 2 << 4;
                } else {
                    f = t;
                }
                row[(j - beg) as usize] = d;
            }
            self.h[end as usize] = h1;
            self.e[end as usize] = NEG_INF;
        }
        let score = self.h[qlen as usize];

        // backtrack from the last cell, switching state machines between
        // the H, E and F layers
        let mut i = tlen - 1;
        let mut k = (if i + w + 1 < qlen { i + w + 1 } else { qlen }) - 1;
        let mut which: u8 = 0;
        let mut rev = Vec::new();
        while i >= 0 && k >= 0 {
            let beg = if i > w { i - w } else { 0 };
            let d = self.z[i as usize * n_col + (k - beg) as usize];
            which = (d >> (which << 1)) & 3;
            match which {
                0 => {
                    push_op(&mut rev, Op::Match, 1);
                    i -= 1;
                    k -= 1;
                }
                1 => {
                    push_op(&mut rev, Op::Del, 1);
                    i -= 1;
                }
                _ => {
                    push_op(&mut rev, Op::Ins, 1);
                    k -= 1;
                }
            }
        }
        if i >= 0 {
            push_op(&mut rev, Op::Del, i as u32 + 1);
        }
        if k >= 0 {
            push_op(&mut rev, Op::Ins, k as u32 + 1);
        }
        rev.reverse();
        for op in rev {
            push_op(&mut cigar, op.op(), op.len());
        }
        (score, cigar)
    }
}

/// Infer the bandwidth needed for a global alignment of lengths `l1`/`l2`
/// to reach `score`.
pub fn infer_bw(l1: i32, l2: i32, score: i32, a: i32, q: i32, r: i32) -> i32 {
    if l1 == l2 && l1 * a - score < (q + r - a) << 1 {
        return 0; // an equal-length alignment this good contains no gaps
    }
    let mut w = ((f64::from(l1.min(l2) * a - score - q)) / f64::from(r) + 2.0) as i32;
    if w < (l1 - l2).abs() {
        w = (l1 - l2).abs();
    }
    w
}

/// Build the CIGAR of an alignment of `query_seg` (read codes in read
/// orientation) against the combined-space reference interval `[rb, re)`,
/// together with the global score, NM and the MD string. Reverse-strand
/// intervals align the reversed sequences so gaps land at the leftmost
/// reference position. `None` when the interval is empty or bridges the
/// strand boundary.
pub fn gen_cigar(
    ga: &mut GlobalAligner,
    pac: &PackedSequence,
    opts: &MemOpts,
    query_seg: &[u8],
    rb: i64,
    re: i64,
    w: i32,
) -> Option<CigarResult> {
    if query_seg.is_empty() || rb >= re || (rb < pac.len() && re > pac.len()) {
        return None;
    }
    let (mut rseq, fetched_b, fetched_e) = pac.fetch(rb, re);
    if fetched_e - fetched_b != re - rb {
        return None;
    }
    let is_rev = rb >= pac.len();
    let mut query: Vec<u8> = query_seg.to_vec();
    if is_rev {
        query.reverse();
        rseq.reverse();
    }
    let (score, cigar) = ga.global(&query, &rseq, opts, w);

    // walk the alignment for NM and MD; on the reverse strand the walked
    // sequences are reversed complements, so the emitted reference bases are
    // complemented back to the forward strand
    let mut nm = 0i32;
    let mut md = String::new();
    let mut x = 0usize; // query cursor
    let mut y = 0usize; // reference cursor
    let mut run = 0u32; // current match run
    for (k, opl) in cigar.iter().enumerate() {
        let len = opl.len() as usize;
        match opl.op() {
            Op::Match => {
                for l in 0..len {
                    if query[x + l] != rseq[y + l] {
                        md.push_str(&run.to_string());
                        let code = if is_rev { 3 - rseq[y + l] } else { rseq[y + l] };
                        md.push(crate::alphabets::dna::decode(code) as char);
                        nm += 1;
                        run = 0;
                    } else {
                        run += 1;
                    }
                }
                x += len;
                y += len;
            }
            Op::Del => {
                if k > 0 && k < cigar.len() - 1 {
                    md.push_str(&run.to_string());
                    md.push('^');
                    for l in 0..len {
                        let code = if is_rev { 3 - rseq[y + l] } else { rseq[y + l] };
                        md.push(crate::alphabets::dna::decode(code) as char);
                    }
                    run = 0;
                    nm += len as i32;
                }
                y += len;
            }
            Op::Ins => {
                x += len;
                nm += len as i32;
            }
            _ => unreachable!("global alignment emits M/I/D only"),
        }
    }
    md.push_str(&run.to_string());
    Some(CigarResult {
        cigar,
        score,
        nm,
        md,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::cigar_string;
    use crate::alphabets::dna;

    fn opts() -> MemOpts {
        MemOpts::default()
    }

    #[test]
    fn test_global_exact() {
        let mut ga = GlobalAligner::new();
        let q = dna::encode_seq(b"ACGTACGT");
        let (score, cigar) = ga.global(&q, &q, &opts(), 10);
        assert_eq!(score, 8);
        assert_eq!(cigar_string(&cigar), "8M");
    }

    #[test]
    fn test_global_mismatch() {
        let mut ga = GlobalAligner::new();
        let q = dna::encode_seq(b"ACGTAGGTACGT");
        let t = dna::encode_seq(b"ACGTACGTACGT");
        let (score, cigar) = ga.global(&q, &t, &opts(), 10);
        assert_eq!(score, 11 - 4);
        assert_eq!(cigar_string(&cigar), "12M");
    }

    #[test]
    fn test_global_deletion() {
        let mut ga = GlobalAligner::new();
        let q = dna::encode_seq(b"ACGTACGT");
        let t = dna::encode_seq(b"ACGTGGACGT");
        let (score, cigar) = ga.global(&q, &t, &opts(), 10);
        assert_eq!(score, 8 - (6 + 2));
        assert_eq!(cigar_string(&cigar), "4M2D4M");
    }

    #[test]
    fn test_global_insertion() {
        let mut ga = GlobalAligner::new();
        let q = dna::encode_seq(b"ACGTTTACGT");
        let t = dna::encode_seq(b"ACGTACGT");
        let (score, cigar) = ga.global(&q, &t, &opts(), 10);
        assert_eq!(score, 8 - (6 + 2));
        assert_eq!(cigar_string(&cigar), "4M2I4M");
    }

    #[test]
    fn test_gen_cigar_md() {
        let pac = PackedSequence::from_codes(&dna::encode_seq(b"ACGTACGTACGT"));
        let mut ga = GlobalAligner::new();
        let query = dna::encode_seq(b"ACGTAGGTACGT");
        let res = gen_cigar(&mut ga, &pac, &opts(), &query, 0, 12, 10).unwrap();
        assert_eq!(cigar_string(&res.cigar), "12M");
        assert_eq!(res.nm, 1);
        assert_eq!(res.md, "5C6");
    }

    #[test]
    fn test_gen_cigar_md_deletion() {
        let pac = PackedSequence::from_codes(&dna::encode_seq(b"ACGTGGACGT"));
        let mut ga = GlobalAligner::new();
        let query = dna::encode_seq(b"ACGTACGT");
        let res = gen_cigar(&mut ga, &pac, &opts(), &query, 0, 10, 10).unwrap();
        assert_eq!(cigar_string(&res.cigar), "4M2D4M");
        assert_eq!(res.nm, 2);
        assert_eq!(res.md, "4^GG4");
    }

    #[test]
    fn test_gen_cigar_reverse_strand() {
        // query equals the reverse complement of the reference: aligning in
        // [L, 2L) must give a perfect match with forward-strand MD letters
        let seq = b"ACGTACCTACGT";
        let pac = PackedSequence::from_codes(&dna::encode_seq(seq));
        let mut ga = GlobalAligner::new();
        let query = dna::revcomp(&dna::encode_seq(seq));
        let res = gen_cigar(&mut ga, &pac, &opts(), &query, 12, 24, 10).unwrap();
        assert_eq!(cigar_string(&res.cigar), "12M");
        assert_eq!(res.nm, 0);
        assert_eq!(res.md, "12");
    }

    #[test]
    fn test_gen_cigar_rejects_bridging() {
        let pac = PackedSequence::from_codes(&dna::encode_seq(b"ACGTACGT"));
        let mut ga = GlobalAligner::new();
        let query = dna::encode_seq(b"ACGT");
        assert!(gen_cigar(&mut ga, &pac, &opts(), &query, 6, 10, 10).is_none());
    }

    #[test]
    fn test_infer_bw() {
        // a perfect-score equal-length alignment needs no band
        assert_eq!(infer_bw(100, 100, 100, 1, 6, 1), 0);
        // a length difference forces at least that band
        assert!(infer_bw(100, 110, 80, 1, 6, 1) >= 10);
    }
}
