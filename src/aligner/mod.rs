// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The aligner orchestrator: the straight-line per-read pipeline (seeding,
//! chaining, extension, region post-processing, record assembly) and the
//! batch entry points dispatching reads or pairs over a work pool.
//!
//! The index is shared read-only across workers; every worker owns a
//! scratch holding the DP workspaces and candidate buffers, reset between
//! reads.

use std::sync::Arc;

use rayon::prelude::*;

use crate::alignment::banded::BandedAligner;
use crate::alignment::chain::{chain_seeds, filter_chains};
use crate::alignment::extend::extend_chain;
use crate::alignment::global::GlobalAligner;
use crate::alignment::region::{dedup_patch, mapq, mark_primary, reorder_primary5};
use crate::alignment::seeding::{collect_smems, SeedingScratch};
use crate::alignment::AlnReg;
use crate::alphabets::dna;
use crate::data_structures::fmindex::Smem;
use crate::index::ReferenceIndex;
use crate::opts::{flag, MemOpts};
use crate::pairing::{mate_rescue, pair_mapq, resolve_pair, InsertSizeStats};

pub mod record;

pub use self::record::{AlignmentRecord, MateInfo};

/// A named read. Bases are ASCII; anything outside `ACGTacgt` is treated as
/// ambiguous.
#[derive(Clone, Debug)]
pub struct Read {
    pub name: String,
    pub seq: Vec<u8>,
}

impl Read {
    pub fn new(name: &str, seq: &[u8]) -> Self {
        Read {
            name: name.to_owned(),
            seq: seq.to_vec(),
        }
    }
}

/// Per-worker scratch: all buffers reused across reads.
#[derive(Default)]
pub struct AlignScratch {
    seeding: SeedingScratch,
    smems: Vec<Smem>,
    sw: BandedAligner,
    ga: GlobalAligner,
}

/// The aligner: an immutable index plus configuration.
pub struct MemAligner {
    index: Arc<ReferenceIndex>,
    opts: MemOpts,
    read_group: Option<String>,
    insert_override: Option<InsertSizeStats>,
}

impl MemAligner {
    pub fn new(index: Arc<ReferenceIndex>, opts: MemOpts) -> Self {
        MemAligner {
            index,
            opts,
            read_group: None,
            insert_override: None,
        }
    }

    /// Attach a read-group id, emitted as the RG tag on every record.
    pub fn with_read_group(mut self, rg: &str) -> Self {
        self.read_group = Some(rg.to_owned());
        self
    }

    /// Bypass insert-size estimation with externally known statistics.
    pub fn with_insert_stats(mut self, stats: InsertSizeStats) -> Self {
        self.insert_override = Some(stats);
        self
    }

    pub fn opts(&self) -> &MemOpts {
        &self.opts
    }

    pub fn index(&self) -> &ReferenceIndex {
        &self.index
    }

    /// The region pipeline for one read: seed, chain, filter, extend,
    /// dedup. Regions come back unmarked, sorted by score descending.
    fn compute_regions(&self, query: &[u8], scratch: &mut AlignScratch) -> Vec<AlnReg> {
        let opts = &self.opts;
        collect_smems(
            self.index.fmd(),
            opts,
            query,
            &mut scratch.smems,
            &mut scratch.seeding,
        );
        let (mut chains, _frac_rep) = chain_seeds(&self.index, opts, query.len(), &scratch.smems);
        filter_chains(opts, &mut chains);
        let mut regions = Vec::new();
        for chain in &chains {
            extend_chain(&self.index, opts, chain, query, &mut scratch.sw, &mut regions);
        }
        let floor = opts.seed_score(opts.min_seed_len);
        for r in regions.iter_mut() {
            if r.sub < floor {
                r.sub = 0;
            }
        }
        regions.retain(|r| r.qb < r.qe && r.rb < r.re);
        dedup_patch(&self.index, opts, query, &mut scratch.ga, &mut regions);
        regions
    }

    fn marked_regions(&self, query: &[u8], id: u64, scratch: &mut AlignScratch) -> (Vec<AlnReg>, usize) {
        let mut regions = self.compute_regions(query, scratch);
        let n_pri = mark_primary(&self.opts, &mut regions, id);
        if self.opts.has_flag(flag::PRIMARY5) {
            reorder_primary5(self.opts.min_output_score, &mut regions);
        }
        (regions, n_pri)
    }

    /// Align one single-end read.
    pub fn align_single(&self, read: &Read) -> Vec<AlignmentRecord> {
        let mut scratch = AlignScratch::default();
        self.align_single_with(read, 0, &mut scratch)
    }

    fn align_single_with(
        &self,
        read: &Read,
        id: u64,
        scratch: &mut AlignScratch,
    ) -> Vec<AlignmentRecord> {
        let query = dna::encode_seq(&read.seq);
        let (regions, _) = self.marked_regions(&query, id, scratch);
        record::regions_to_records(
            &self.index,
            &self.opts,
            &mut scratch.ga,
            &read.name,
            &read.seq,
            &query,
            &regions,
            0,
            0,
            None,
            &self.read_group,
            None,
        )
    }

    /// Align a batch of single-end reads on the work pool. Results come
    /// back in input order.
    pub fn align_batch(&self, reads: &[Read]) -> Vec<Vec<AlignmentRecord>> {
        reads
            .par_iter()
            .enumerate()
            .map_init(AlignScratch::default, |scratch, (i, read)| {
                self.align_single_with(read, i as u64, scratch)
            })
            .collect()
    }

    /// Align a batch of read pairs: first-pass regions for every end, one
    /// insert-size estimation across the batch, then rescue and pair
    /// resolution per pair. Results preserve input order.
    pub fn align_pairs(&self, pairs: &[(Read, Read)]) -> Vec<(Vec<AlignmentRecord>, Vec<AlignmentRecord>)> {
        let opts = &self.opts;
        let mut first_pass: Vec<([Vec<AlnReg>; 2], [Vec<u8>; 2], [usize; 2])> = pairs
            .par_iter()
            .enumerate()
            .map_init(AlignScratch::default, |scratch, (i, (r1, r2))| {
                let q1 = dna::encode_seq(&r1.seq);
                let q2 = dna::encode_seq(&r2.seq);
                let (regs1, n1) = self.marked_regions(&q1, (i as u64) << 1, scratch);
                let (regs2, n2) = self.marked_regions(&q2, (i as u64) << 1 | 1, scratch);
                ([regs1, regs2], [q1, q2], [n1, n2])
            })
            .collect();

        let stats = match self.insert_override {
            Some(s) => s,
            None => {
                let observations: Vec<(usize, i64)> = first_pass
                    .iter()
                    .filter_map(|(regs, _, _)| {
                        let a = regs[0].first();
                        let b = regs[1].first();
                        crate::pairing::insert_size::observe_pair(
                            opts,
                            self.index.l_pac(),
                            a,
                            a.map_or(0, |r| mapq(opts, r)),
                            b,
                            b.map_or(0, |r| mapq(opts, r)),
                        )
                    })
                    .collect();
                InsertSizeStats::estimate(&observations)
            }
        };

        pairs
            .par_iter()
            .zip(first_pass.par_iter_mut())
            .enumerate()
            .map_init(AlignScratch::default, |scratch, (i, (pair, state))| {
                self.finish_pair(pair, i as u64, state, &stats, scratch)
            })
            .collect()
    }

    fn finish_pair(
        &self,
        pair: &(Read, Read),
        id: u64,
        state: &mut ([Vec<AlnReg>; 2], [Vec<u8>; 2], [usize; 2]),
        stats: &InsertSizeStats,
        scratch: &mut AlignScratch,
    ) -> (Vec<AlignmentRecord>, Vec<AlignmentRecord>) {
        let opts = &self.opts;
        let (regs, queries, n_pri) = state;
        let l_pac = self.index.l_pac();

        if !opts.has_flag(flag::NO_RESCUE) && stats.is_usable() {
            for side in 0..2 {
                if regs[side].is_empty() {
                    continue;
                }
                let best = regs[side][0].score;
                let anchors: Vec<AlnReg> = regs[side]
                    .iter()
                    .filter(|r| r.score >= best - opts.pen_unpaired)
                    .take(opts.max_matesw as usize)
                    .cloned()
                    .collect();
                let mate = 1 - side;
                for anchor in &anchors {
                    mate_rescue(
                        &self.index,
                        opts,
                        stats,
                        anchor,
                        &queries[mate],
                        &mut regs[mate],
                        &mut scratch.sw,
                    );
                }
            }
            // rescued regions need classification too
            n_pri[0] = mark_primary(opts, &mut regs[0], id << 1);
            n_pri[1] = mark_primary(opts, &mut regs[1], id << 1 | 1);
        }

        let mut chosen = [0usize; 2];
        let mut proper = false;
        let mut boost: Option<(i32, i32)> = None;
        if !opts.has_flag(flag::NO_PAIRING)
            && !regs[0].is_empty()
            && !regs[1].is_empty()
            && stats.is_usable()
        {
            if let Some(pr) = resolve_pair(
                opts,
                l_pac,
                stats,
                [&regs[0], &regs[1]],
                [n_pri[0], n_pri[1]],
            ) {
                let score_un = regs[0][0].score + regs[1][0].score - opts.pen_unpaired;
                if pr.score > score_un {
                    proper = true;
                    chosen = pr.idx;
                    for side in 0..2 {
                        let zi = pr.idx[side];
                        let sec = regs[side][zi].secondary;
                        if sec >= 0 {
                            // promote the chosen hit, demoting the hit that
                            // shadowed it so only one primary remains
                            if sec != i32::MAX {
                                let shadow_score = regs[side][sec as usize].score;
                                regs[side][zi].sub = shadow_score;
                                regs[side][sec as usize].secondary = zi as i32;
                            }
                            regs[side][zi].secondary = -1;
                        }
                    }
                    let q0 = mapq(opts, &regs[0][pr.idx[0]]);
                    let q1 = mapq(opts, &regs[1][pr.idx[1]]);
                    let frac = (
                        regs[0][pr.idx[0]].frac_rep,
                        regs[1][pr.idx[1]].frac_rep,
                    );
                    boost = Some(pair_mapq(opts, &pr, score_un, frac, (q0, q1)));
                }
            }
        }

        // per-side primary summaries feed the other side's mate fields
        let mut mates = [MateInfo {
            rid: -1,
            pos: -1,
            is_rev: false,
            ref_len: 0,
        }; 2];
        for side in 0..2 {
            if let Some(reg) = regs[side].get(chosen[side]) {
                if reg.score >= opts.min_output_score {
                    let a = record::reg2aln(&self.index, opts, &mut scratch.ga, &queries[side], reg);
                    if a.rid >= 0 {
                        mates[side] = MateInfo {
                            rid: a.rid,
                            pos: a.pos,
                            is_rev: a.is_rev,
                            ref_len: crate::alignment::cigar_ref_len(&a.cigar),
                        };
                    }
                }
            }
        }

        let proper_bit = if proper { 0x2 } else { 0 };
        let (name1, name2) = (&pair.0.name, &pair.1.name);
        let recs1 = record::regions_to_records(
            &self.index,
            opts,
            &mut scratch.ga,
            name1,
            &pair.0.seq,
            &queries[0],
            &regs[0],
            chosen[0],
            0x40 | proper_bit,
            boost.map(|b| b.0),
            &self.read_group,
            Some(&mates[1]),
        );
        let recs2 = record::regions_to_records(
            &self.index,
            opts,
            &mut scratch.ga,
            name2,
            &pair.1.seq,
            &queries[1],
            &regs[1],
            chosen[1],
            0x80 | proper_bit,
            boost.map(|b| b.1),
            &self.read_group,
            Some(&mates[0]),
        );
        (recs1, recs2)
    }
}
