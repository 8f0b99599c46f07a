// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Scoring and behavior configuration of the aligner.

use serde::{Deserialize, Serialize};

/// Behavior flags, combined into [`MemOpts::flags`].
pub mod flag {
    /// Skip the paired-end resolver; treat mates as two single-end reads.
    pub const NO_PAIRING: u32 = 0x4;
    /// Emit qualifying secondary hits as separate `0x100` records instead of
    /// folding them into the primary's XA tag.
    pub const OUTPUT_ALL: u32 = 0x8;
    /// Mark supplementary hits as secondary (`0x100`) instead of `0x800`.
    pub const NO_MULTI: u32 = 0x10;
    /// Skip mate rescue.
    pub const NO_RESCUE: u32 = 0x20;
    /// Use soft clipping on supplementary hits instead of hard clipping.
    pub const SOFTCLIP: u32 = 0x200;
    /// Pick the alignment covering the 5'-most query bases as primary
    /// instead of the highest-scoring one.
    pub const PRIMARY5: u32 = 0x800;
    /// Do not cap supplementary MAPQ at the primary's MAPQ.
    pub const KEEP_SUPP_MAPQ: u32 = 0x1000;
    /// Ignore ALT annotations; treat every sequence as primary assembly.
    pub const NO_ALT: u32 = 0x4000;
}

/// All recognized scoring and behavior options with BWA-MEM defaults.
///
/// When a non-unit match score is wanted, construct via
/// [`MemOpts::with_match_score`] so that the dependent penalties scale along
/// with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemOpts {
    /// Additive score per matched base.
    pub match_score: i32,
    /// Deducted per mismatched base.
    pub mismatch_penalty: i32,
    /// Insertion open penalty.
    pub gap_open: i32,
    /// Insertion extend penalty.
    pub gap_extend: i32,
    /// Deletion open penalty.
    pub gap_open_del: i32,
    /// Deletion extend penalty.
    pub gap_extend_del: i32,
    /// Initial Smith-Waterman band half-width; doubled on retry.
    pub band_width: i32,
    /// Terminate extension when the score drops this far below the maximum.
    pub zdrop: i32,
    /// Shortest reported exact match; also gates the seed filter.
    pub min_seed_len: i32,
    /// Maximum suffix-array occurrences materialized per exact match.
    pub max_occurrences: i64,
    /// Interval-size bound of the re-seeding pass.
    pub split_width: i64,
    /// Match length above which the re-seeding pass runs.
    pub reseed_len: i32,
    /// Interval-size bound of the forward-only third seeding pass
    /// (0 disables the pass).
    pub max_mem_intv: i64,
    /// Maximum gap between chained seeds, on either sequence.
    pub max_chain_gap: i32,
    /// Minimum chain weight; chains below `max(min_chain_weight,
    /// min_seed_len)` are dropped outright.
    pub min_chain_weight: i32,
    /// Weight-ratio threshold for suppressing an overlapped chain.
    pub chain_drop_ratio: f32,
    /// Query-overlap fraction above which two hits compete for primary.
    pub mask_level: f32,
    /// Mutual-overlap fraction above which a region is subsumed.
    pub mask_level_redun: f32,
    /// Drop any alignment scoring below this.
    pub min_output_score: i32,
    /// 5'-end clipping penalty in the clip-vs-extend decision.
    pub pen_clip5: i32,
    /// 3'-end clipping penalty in the clip-vs-extend decision.
    pub pen_clip3: i32,
    /// Pair-score penalty for a discordant orientation.
    pub pen_unpaired: i32,
    /// Maximum template regions per side considered for mate rescue.
    pub max_matesw: i32,
    /// Largest insert size accepted by the estimator.
    pub max_insert_size: i32,
    /// XA-tag cap when no ALT secondaries exist.
    pub max_xa_hits: i32,
    /// XA-tag cap when ALT secondaries exist.
    pub max_xa_hits_alt: i32,
    /// Bit mask of the `flag` constants.
    pub flags: u32,
}

impl Default for MemOpts {
    fn default() -> Self {
        MemOpts {
            match_score: 1,
            mismatch_penalty: 4,
            gap_open: 6,
            gap_extend: 1,
            gap_open_del: 6,
            gap_extend_del: 1,
            band_width: 100,
            zdrop: 100,
            min_seed_len: 19,
            max_occurrences: 500,
            split_width: 10,
            reseed_len: 28,
            max_mem_intv: 20,
            max_chain_gap: 10000,
            min_chain_weight: 0,
            chain_drop_ratio: 0.5,
            mask_level: 0.5,
            mask_level_redun: 0.95,
            min_output_score: 30,
            pen_clip5: 5,
            pen_clip3: 5,
            pen_unpaired: 17,
            max_matesw: 50,
            max_insert_size: 10000,
            max_xa_hits: 5,
            max_xa_hits_alt: 200,
            flags: 0,
        }
    }
}

impl MemOpts {
    /// Defaults with every score-dependent penalty scaled by `a`, matching
    /// the convention that a non-unit match score rescales the whole scoring
    /// system.
    pub fn with_match_score(a: i32) -> Self {
        let mut opts = MemOpts::default();
        opts.match_score = a;
        if a != 1 {
            opts.mismatch_penalty *= a;
            opts.gap_open *= a;
            opts.gap_extend *= a;
            opts.gap_open_del *= a;
            opts.gap_extend_del *= a;
            opts.zdrop *= a;
            opts.pen_clip5 *= a;
            opts.pen_clip3 *= a;
            opts.pen_unpaired *= a;
            opts.min_output_score *= a;
        }
        opts
    }

    /// Substitution score of two base codes. Any comparison involving an
    /// ambiguous base scores -1.
    #[inline]
    pub fn score(&self, a: u8, b: u8) -> i32 {
        if a > 3 || b > 3 {
            -1
        } else if a == b {
            self.match_score
        } else {
            -self.mismatch_penalty
        }
    }

    /// Score of a fully matching stretch of the given length.
    #[inline]
    pub fn seed_score(&self, len: i32) -> i32 {
        len * self.match_score
    }

    #[inline]
    pub fn has_flag(&self, f: u32) -> bool {
        self.flags & f != 0
    }

    /// The largest single-event penalty; scores closer than this are
    /// considered competing sub-optimal hits.
    #[inline]
    pub fn suboptimal_margin(&self) -> i32 {
        (self.match_score + self.mismatch_penalty)
            .max(self.gap_open + self.gap_extend)
            .max(self.gap_open_del + self.gap_extend_del)
    }
}
