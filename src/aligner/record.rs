// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Assembly of alignment records from marked regions: final coordinates and
//! CIGAR per hit, primary/supplementary/secondary flags, SA/XA/pa tags,
//! mate fields and template length. Serialization to SAM text is left to
//! the caller; the record struct is the interface.

use std::collections::HashMap;

use itertools::Itertools;

use crate::alignment::global::{gen_cigar, infer_bw, push_op, GlobalAligner};
use crate::alignment::region::mapq;
use crate::alignment::{cigar_ref_len, cigar_string, AlnReg, CigarOp, Op};
use crate::alphabets::dna;
use crate::index::ReferenceIndex;
use crate::opts::{flag, MemOpts};

/// Secondary hits scoring below this fraction of their primary are neither
/// emitted nor listed in XA.
const SECONDARY_RATIO: f64 = 0.5;

/// One output record. Field semantics follow the SAM record they will be
/// serialized into; `rid < 0` means unmapped.
#[derive(Clone, Debug)]
pub struct AlignmentRecord {
    pub name: String,
    pub flag: u16,
    pub rid: i32,
    /// 0-based position within the sequence `rid`.
    pub pos: i64,
    pub mapq: u8,
    pub cigar: Vec<CigarOp>,
    pub mate_rid: i32,
    pub mate_pos: i64,
    pub tlen: i64,
    /// Read bases as emitted (reverse-complemented on reverse hits,
    /// trimmed under hard clips, empty for secondary records).
    pub seq: Vec<u8>,
    pub nm: i32,
    pub md: Option<String>,
    /// AS tag.
    pub score: i32,
    /// XS tag; negative = not reported.
    pub sub: i32,
    pub sa: Option<String>,
    pub xa: Option<String>,
    pub pa: Option<f32>,
    pub rg: Option<String>,
}

impl AlignmentRecord {
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.flag & 0x4 == 0
    }

    #[inline]
    pub fn is_reverse(&self) -> bool {
        self.flag & 0x10 != 0
    }

    #[inline]
    pub fn is_secondary(&self) -> bool {
        self.flag & 0x100 != 0
    }

    #[inline]
    pub fn is_supplementary(&self) -> bool {
        self.flag & 0x800 != 0
    }

    pub fn cigar_string(&self) -> String {
        cigar_string(&self.cigar)
    }
}

/// One converted hit, prior to record assembly.
#[derive(Clone, Debug)]
pub(crate) struct MemAln {
    pub pos: i64,
    pub rid: i32,
    pub is_rev: bool,
    pub mapq: i32,
    pub flag: u32,
    pub cigar: Vec<CigarOp>,
    pub nm: i32,
    pub md: String,
    pub score: i32,
    pub sub: i32,
    pub alt_sc: i32,
    pub is_alt: bool,
    pub xa: Option<String>,
}

impl MemAln {
    pub fn unmapped() -> Self {
        MemAln {
            pos: -1,
            rid: -1,
            is_rev: false,
            mapq: 0,
            flag: 0x4,
            cigar: Vec::new(),
            nm: -1,
            md: String::new(),
            score: 0,
            sub: -1,
            alt_sc: 0,
            is_alt: false,
            xa: None,
        }
    }
}

/// Mate summary used for the mate fields and TLEN of the other end.
#[derive(Clone, Copy, Debug)]
pub struct MateInfo {
    pub rid: i32,
    pub pos: i64,
    pub is_rev: bool,
    pub ref_len: i64,
}

/// Convert a region into placed coordinates and a CIGAR, retrying the
/// global alignment with a doubled band while it scores short of the
/// region's `trueScore`.
pub(crate) fn reg2aln(
    idx: &ReferenceIndex,
    opts: &MemOpts,
    ga: &mut GlobalAligner,
    query: &[u8],
    reg: &AlnReg,
) -> MemAln {
    let l_query = query.len() as i32;
    if reg.rb < 0 || reg.re < 0 || reg.score < 0 {
        return MemAln::unmapped();
    }
    let mut a = MemAln::unmapped();
    a.flag = 0;
    a.is_alt = reg.is_alt;
    a.alt_sc = reg.alt_sc;
    a.score = reg.score;
    a.sub = reg.sub.max(reg.csub);
    a.mapq = if reg.secondary < 0 { mapq(opts, reg) } else { 0 };
    if reg.secondary >= 0 {
        a.flag |= 0x100;
    }

    let (qb, qe) = (reg.qb, reg.qe);
    let seg = &query[qb as usize..qe as usize];
    let mut w2 = infer_bw(
        qe - qb,
        (reg.re - reg.rb) as i32,
        reg.true_score,
        opts.match_score,
        opts.gap_open_del,
        opts.gap_extend_del,
    )
    .max(infer_bw(
        qe - qb,
        (reg.re - reg.rb) as i32,
        reg.true_score,
        opts.match_score,
        opts.gap_open,
        opts.gap_extend,
    ));
    if w2 > opts.band_width {
        w2 = w2.min(reg.w);
    }
    let mut last_score = i32::MIN;
    let mut result = None;
    let mut i = 0;
    loop {
        w2 = w2.min(opts.band_width << 2);
        let res = gen_cigar(ga, idx.pac(), opts, seg, reg.rb, reg.re, w2);
        let res = match res {
            Some(r) => r,
            None => return MemAln::unmapped(),
        };
        let score = res.score;
        let at_cap = w2 == opts.band_width << 2;
        result = Some(res);
        if score == last_score || at_cap {
            break;
        }
        last_score = score;
        i += 1;
        if i >= 3 || score >= reg.true_score - opts.match_score {
            break;
        }
        w2 <<= 1;
    }
    let res = result.expect("at least one alignment attempt");
    a.cigar = res.cigar;
    a.nm = res.nm;
    a.md = res.md;

    let (mut pos, is_rev) = idx.ann().depos(if reg.rb < idx.l_pac() {
        reg.rb
    } else {
        reg.re - 1
    });
    a.is_rev = is_rev;
    // squeeze a leading or trailing deletion into the position/clip
    if !a.cigar.is_empty() {
        if a.cigar[0].op() == Op::Del {
            pos += a.cigar[0].len() as i64;
            a.cigar.remove(0);
        } else if a.cigar.last().unwrap().op() == Op::Del {
            a.cigar.pop();
        }
    }
    if qb != 0 || qe != l_query {
        let clip5 = if is_rev { l_query - qe } else { qb };
        let clip3 = if is_rev { qb } else { l_query - qe };
        if clip5 > 0 {
            a.cigar.insert(0, CigarOp::new(Op::SoftClip, clip5 as u32));
        }
        if clip3 > 0 {
            a.cigar.push(CigarOp::new(Op::SoftClip, clip3 as u32));
        }
    }
    let rid = match idx.ann().pos_to_rid(pos) {
        Some(r) => r,
        None => return MemAln::unmapped(),
    };
    debug_assert_eq!(rid, reg.rid);
    a.rid = rid;
    a.pos = pos - idx.ann().records[rid as usize].offset;
    a
}

/// Index of the primary a qualifying secondary attaches to, if any.
fn xa_primary_of(regions: &[AlnReg], i: usize) -> Option<usize> {
    let k = regions[i].secondary_all;
    if k >= 0
        && (k as usize) < regions.len()
        && f64::from(regions[i].score) >= f64::from(regions[k as usize].score) * SECONDARY_RATIO
    {
        Some(k as usize)
    } else {
        None
    }
}

/// Build the XA strings, keyed by primary region index. A primary whose
/// qualifying secondaries exceed the cap gets no XA at all.
fn gen_xa(
    idx: &ReferenceIndex,
    opts: &MemOpts,
    ga: &mut GlobalAligner,
    query: &[u8],
    regions: &[AlnReg],
) -> HashMap<usize, String> {
    let mut count: HashMap<usize, usize> = HashMap::new();
    let mut has_alt: HashMap<usize, bool> = HashMap::new();
    for i in 0..regions.len() {
        if let Some(r) = xa_primary_of(regions, i) {
            *count.entry(r).or_insert(0) += 1;
            if regions[i].is_alt {
                has_alt.insert(r, true);
            }
        }
    }
    let mut xa: HashMap<usize, String> = HashMap::new();
    for i in 0..regions.len() {
        let r = match xa_primary_of(regions, i) {
            Some(r) => r,
            None => continue,
        };
        let cap = if has_alt.get(&r).copied().unwrap_or(false) {
            opts.max_xa_hits_alt
        } else {
            opts.max_xa_hits
        };
        if count[&r] > cap as usize {
            continue;
        }
        let a = reg2aln(idx, opts, ga, query, &regions[i]);
        if a.rid < 0 {
            continue;
        }
        xa.entry(r).or_default().push_str(&format!(
            "{},{}{},{},{};",
            idx.ann().records[a.rid as usize].name,
            if a.is_rev { '-' } else { '+' },
            a.pos + 1,
            cigar_string(&a.cigar),
            a.nm
        ));
    }
    xa
}

fn hard_clip(cigar: &[CigarOp]) -> Vec<CigarOp> {
    let mut out = Vec::with_capacity(cigar.len());
    for op in cigar {
        if op.op() == Op::SoftClip {
            push_op(&mut out, Op::HardClip, op.len());
        } else {
            push_op(&mut out, op.op(), op.len());
        }
    }
    out
}

/// Emit the records of one read from its marked regions. The region at
/// `primary_idx` is emitted first; remaining non-secondary hits become
/// supplementaries, qualifying secondaries become `0x100` records when
/// `outputAll` is set and XA entries otherwise. `extra_flag` carries the
/// pairing bits, `mapq_override` the pair-boosted quality of the primary.
#[allow(clippy::too_many_arguments)]
pub(crate) fn regions_to_records(
    idx: &ReferenceIndex,
    opts: &MemOpts,
    ga: &mut GlobalAligner,
    name: &str,
    seq: &[u8],
    query: &[u8],
    regions: &[AlnReg],
    primary_idx: usize,
    extra_flag: u32,
    mapq_override: Option<i32>,
    rg: &Option<String>,
    mate: Option<&MateInfo>,
) -> Vec<AlignmentRecord> {
    let output_all = opts.has_flag(flag::OUTPUT_ALL);
    let xa = if output_all {
        HashMap::new()
    } else {
        gen_xa(idx, opts, ga, query, regions)
    };

    let mut alns: Vec<MemAln> = Vec::new();
    let order = std::iter::once(primary_idx)
        .chain((0..regions.len()).filter(|&k| k != primary_idx));
    for k in order {
        if k >= regions.len() {
            continue;
        }
        let p = &regions[k];
        if p.score < opts.min_output_score {
            continue;
        }
        if p.secondary >= 0 && (p.is_alt || !output_all) {
            continue;
        }
        if p.secondary >= 0
            && p.secondary != i32::MAX
            && f64::from(p.score)
                < f64::from(regions[p.secondary as usize].score) * SECONDARY_RATIO
        {
            continue;
        }
        let mut a = reg2aln(idx, opts, ga, query, p);
        if a.rid < 0 {
            continue;
        }
        a.flag |= extra_flag;
        if p.secondary >= 0 {
            a.sub = -1; // no sub-optimal score on secondary records
        }
        if !alns.is_empty() && p.secondary < 0 {
            // split hit
            a.flag |= if opts.has_flag(flag::NO_MULTI) {
                0x100
            } else {
                0x800
            };
            if !opts.has_flag(flag::KEEP_SUPP_MAPQ) && !p.is_alt && a.mapq > alns[0].mapq {
                a.mapq = alns[0].mapq; // cap at the primary's quality
            }
        } else if alns.is_empty() {
            if let Some(q) = mapq_override {
                a.mapq = q;
            }
        }
        a.xa = xa.get(&k).cloned();
        alns.push(a);
    }
    if alns.is_empty() {
        let mut a = MemAln::unmapped();
        a.flag |= extra_flag;
        alns.push(a);
    }
    if alns.len() > 2 {
        // canonical order: primary, supplementaries, then secondaries
        alns[1..].sort_by_key(|a| a.flag & 0x100 != 0);
    }

    // SA strings across the non-secondary segments
    let sa_strings: Vec<Option<String>> = (0..alns.len())
        .map(|which| {
            if alns[which].flag & 0x100 != 0 || alns[which].rid < 0 {
                return None;
            }
            let entries = alns
                .iter()
                .enumerate()
                .filter(|&(i, r)| i != which && r.flag & 0x100 == 0 && r.rid >= 0)
                .map(|(_, r)| {
                    format!(
                        "{},{},{},{},{},{}",
                        idx.ann().records[r.rid as usize].name,
                        r.pos + 1,
                        if r.is_rev { '-' } else { '+' },
                        cigar_string(&r.cigar),
                        r.mapq,
                        r.nm
                    )
                })
                .join(";");
            if entries.is_empty() {
                None
            } else {
                Some(format!("{};", entries))
            }
        })
        .collect();

    let mut records = Vec::with_capacity(alns.len());
    for (which, a) in alns.iter().enumerate() {
        records.push(assemble(opts, name, seq, a, sa_strings[which].clone(), rg, mate));
    }
    records
}

fn assemble(
    opts: &MemOpts,
    name: &str,
    seq: &[u8],
    a: &MemAln,
    sa: Option<String>,
    rg: &Option<String>,
    mate: Option<&MateInfo>,
) -> AlignmentRecord {
    let mut flags = a.flag;
    let mut rid = a.rid;
    let mut pos = a.pos;
    let mut is_rev = a.is_rev;
    let mut cigar = a.cigar.clone();
    if mate.is_some() {
        flags |= 0x1;
    }
    if rid < 0 {
        flags |= 0x4;
    }
    let mate = mate.copied();
    if let Some(m) = mate {
        if m.rid < 0 {
            flags |= 0x8;
        } else if rid < 0 {
            // place the unmapped read at its mate
            rid = m.rid;
            pos = m.pos;
            is_rev = m.is_rev;
            cigar.clear();
        }
        if m.is_rev {
            flags |= 0x20;
        }
    }
    if is_rev {
        flags |= 0x10;
    }

    let (mate_rid, mate_pos, tlen) = match mate {
        Some(m) if m.rid >= 0 => {
            let tlen = if m.rid == rid && !cigar.is_empty() {
                let p0 = pos + if is_rev { cigar_ref_len(&cigar) - 1 } else { 0 };
                let p1 = m.pos + if m.is_rev { m.ref_len - 1 } else { 0 };
                if p0 == p1 {
                    0
                } else {
                    -(p0 - p1 + if p0 > p1 { 1 } else { -1 })
                }
            } else {
                0
            };
            (m.rid, m.pos, tlen)
        }
        Some(_) => (rid, pos, 0), // unmapped mate placed here
        None => (-1, -1, 0),
    };

    let secondary = flags & 0x100 != 0;
    let supplementary = flags & 0x800 != 0;
    let hard = supplementary && !opts.has_flag(flag::SOFTCLIP);
    let out_cigar = if hard { hard_clip(&cigar) } else { cigar };

    let out_seq = if secondary {
        Vec::new()
    } else {
        let mut s: Vec<u8> = if is_rev {
            seq.iter()
                .rev()
                .map(|&b| dna::decode(dna::complement(dna::encode(b))))
                .collect()
        } else {
            seq.to_vec()
        };
        if hard && !out_cigar.is_empty() {
            let front = if out_cigar[0].op() == Op::HardClip {
                out_cigar[0].len() as usize
            } else {
                0
            };
            let back = if out_cigar.last().unwrap().op() == Op::HardClip {
                out_cigar.last().unwrap().len() as usize
            } else {
                0
            };
            s = s[front..s.len() - back].to_vec();
        }
        s
    };

    AlignmentRecord {
        name: name.to_owned(),
        flag: (flags & 0xffff) as u16,
        rid,
        pos,
        mapq: a.mapq.max(0).min(255) as u8,
        cigar: out_cigar,
        mate_rid,
        mate_pos,
        tlen,
        seq: out_seq,
        nm: a.nm,
        md: if a.rid >= 0 { Some(a.md.clone()) } else { None },
        score: a.score,
        sub: a.sub,
        sa,
        xa: a.xa.clone(),
        pa: if a.alt_sc > 0 {
            Some(a.score as f32 / a.alt_sc as f32)
        } else {
            None
        },
        rg: rg.clone(),
    }
}
