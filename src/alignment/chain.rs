// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Seed chaining and chain filtering.
//!
//! Exact matches are materialized into concrete seeds through the compressed
//! suffix array and clustered into chains of collinear seeds under a
//! gap-bounded model. Weak and overlap-dominated chains are then suppressed,
//! keeping one shadowed chain per kept chain alive so that mapping quality
//! still sees the competing score.

use std::collections::BTreeMap;

use crate::data_structures::fmindex::Smem;
use crate::index::ReferenceIndex;
use crate::opts::{flag, MemOpts};

/// A concrete seed: an exact match placed at one reference occurrence.
#[derive(Clone, Copy, Debug)]
pub struct Seed {
    /// Begin in combined forward/reverse space.
    pub rbeg: i64,
    pub qbeg: i32,
    pub len: i32,
}

impl Seed {
    #[inline]
    pub fn rend(&self) -> i64 {
        self.rbeg + self.len as i64
    }

    #[inline]
    pub fn qend(&self) -> i32 {
        self.qbeg + self.len
    }
}

/// A cluster of collinear seeds.
#[derive(Clone, Debug)]
pub struct Chain {
    pub seeds: Vec<Seed>,
    pub rid: i32,
    pub is_alt: bool,
    pub weight: i32,
    /// 0 = dropped, 1 = recovered for sub-optimal accounting only,
    /// 2 = kept despite a large overlap, 3 = kept clean.
    pub kept: u8,
    /// Index of the first chain this kept chain shadowed, -1 if none.
    pub first_shadowed: i32,
    pub frac_rep: f32,
}

impl Chain {
    #[inline]
    pub fn qbeg(&self) -> i32 {
        self.seeds[0].qbeg
    }

    #[inline]
    pub fn qend(&self) -> i32 {
        self.seeds[self.seeds.len() - 1].qend()
    }

    fn weight(&self) -> i32 {
        let mut w_query = 0i64;
        let mut end = 0i64;
        for s in &self.seeds {
            let (b, e) = (s.qbeg as i64, s.qend() as i64);
            if b >= end {
                w_query += e - b;
            } else if e > end {
                w_query += e - end;
            }
            end = end.max(e);
        }
        let mut w_ref = 0i64;
        let mut end = 0i64;
        for s in &self.seeds {
            let (b, e) = (s.rbeg, s.rend());
            if b >= end {
                w_ref += e - b;
            } else if e > end {
                w_ref += e - end;
            }
            end = end.max(e);
        }
        w_query.min(w_ref).min((1 << 30) - 1) as i32
    }

    /// Whether the seed can grow this chain; contained seeds are absorbed.
    fn try_merge(&mut self, opts: &MemOpts, l_pac: i64, seed: Seed, seed_rid: i32) -> bool {
        let first = self.seeds[0];
        let last = *self.seeds.last().unwrap();
        if seed_rid != self.rid {
            return false;
        }
        if seed.qbeg >= first.qbeg
            && seed.qend() <= last.qend()
            && seed.rbeg >= first.rbeg
            && seed.rend() <= last.rend()
        {
            return true; // contained: absorbed without growing
        }
        if (first.rbeg < l_pac || last.rbeg < l_pac) && seed.rbeg >= l_pac {
            return false; // different strands
        }
        let x = (seed.qbeg - last.qbeg) as i64;
        let y = seed.rbeg - last.rbeg;
        if y >= 0
            && x - y <= opts.band_width as i64
            && y - x <= opts.band_width as i64
            && x - (last.len as i64) < opts.max_chain_gap as i64
            && y - (last.len as i64) < opts.max_chain_gap as i64
        {
            self.seeds.push(seed);
            return true;
        }
        false
    }
}

/// Materialize SMEM occurrences into seeds and cluster them into chains.
/// Also computes the fraction of the read covered by repetitive matches
/// (interval size above `max_occurrences`), which later scales MAPQ.
pub fn chain_seeds(
    idx: &ReferenceIndex,
    opts: &MemOpts,
    query_len: usize,
    smems: &[Smem],
) -> (Vec<Chain>, f32) {
    let l_pac = idx.l_pac();
    let fmd = idx.fmd();
    let mut chains: Vec<Chain> = Vec::new();
    // anchor = (first-seed position, chain index); lookups find the closest
    // chain at or below a new seed
    let mut anchors: BTreeMap<(i64, usize), usize> = BTreeMap::new();

    // repetitive coverage of the read
    let (mut l_rep, mut b, mut e) = (0i64, 0i64, 0i64);
    for p in smems {
        if p.intv.s <= opts.max_occurrences {
            continue;
        }
        if (p.qb as i64) > e {
            l_rep += e - b;
            b = p.qb as i64;
            e = p.qe as i64;
        } else {
            e = e.max(p.qe as i64);
        }
    }
    l_rep += e - b;
    let frac_rep = if query_len > 0 {
        l_rep as f32 / query_len as f32
    } else {
        0.0
    };

    for smem in smems {
        if smem.len() < opts.min_seed_len {
            continue;
        }
        let step = if smem.intv.s > opts.max_occurrences {
            smem.intv.s / opts.max_occurrences
        } else {
            1
        };
        let mut k = 0i64;
        let mut count = 0i64;
        while k < smem.intv.s && count < opts.max_occurrences {
            let rbeg = fmd.sa_entry(smem.intv.k + k);
            let seed = Seed {
                rbeg,
                qbeg: smem.qb,
                len: smem.len(),
            };
            if let Some(rid) = idx.ann().interval_to_rid(rbeg, seed.rend()) {
                let lower = anchors
                    .range(..=(rbeg, usize::MAX))
                    .next_back()
                    .map(|(_, &ci)| ci);
                let merged = match lower {
                    Some(ci) => chains[ci].try_merge(opts, l_pac, seed, rid),
                    None => false,
                };
                if !merged {
                    let chain = Chain {
                        seeds: vec![seed],
                        rid,
                        is_alt: !opts.has_flag(flag::NO_ALT)
                            && idx.ann().records[rid as usize].is_alt,
                        weight: 0,
                        kept: 0,
                        first_shadowed: -1,
                        frac_rep,
                    };
                    anchors.insert((rbeg, chains.len()), chains.len());
                    chains.push(chain);
                }
            }
            k += step;
            count += 1;
        }
    }
    (chains, frac_rep)
}

/// Drop weak chains, suppress overlap-dominated ones and re-mark one
/// shadowed chain per kept chain for sub-optimal accounting. Surviving
/// chains come out sorted by weight descending.
pub fn filter_chains(opts: &MemOpts, chains: &mut Vec<Chain>) {
    let min_weight = opts.min_chain_weight.max(opts.min_seed_len);
    for c in chains.iter_mut() {
        c.weight = c.weight();
        c.kept = 0;
        c.first_shadowed = -1;
    }
    chains.retain(|c| c.weight >= min_weight);
    if chains.is_empty() {
        return;
    }
    chains.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then(a.seeds[0].rbeg.cmp(&b.seeds[0].rbeg))
            .then(a.seeds[0].qbeg.cmp(&b.seeds[0].qbeg))
    });

    chains[0].kept = 3;
    let mut kept_idx = vec![0usize];
    for i in 1..chains.len() {
        let mut large_ovlp = false;
        let mut suppressed = false;
        for &j in &kept_idx {
            let b_max = chains[j].qbeg().max(chains[i].qbeg());
            let e_min = chains[j].qend().min(chains[i].qend());
            // an ALT kept chain must never suppress a primary-assembly
            // candidate
            if e_min > b_max && (!chains[j].is_alt || chains[i].is_alt) {
                let li = chains[i].qend() - chains[i].qbeg();
                let lj = chains[j].qend() - chains[j].qbeg();
                let min_l = li.min(lj);
                if (e_min - b_max) as f32 >= min_l as f32 * opts.mask_level
                    && min_l < opts.max_chain_gap
                {
                    large_ovlp = true;
                    if chains[j].first_shadowed < 0 {
                        chains[j].first_shadowed = i as i32;
                    }
                    if (chains[i].weight as f32) < chains[j].weight as f32 * opts.chain_drop_ratio
                        && chains[j].weight - chains[i].weight >= opts.min_seed_len << 1
                    {
                        suppressed = true;
                        break;
                    }
                }
            }
        }
        if !suppressed {
            chains[i].kept = if large_ovlp { 2 } else { 3 };
            kept_idx.push(i);
        }
    }
    // recover one shadowed chain per kept chain so MAPQ sees its score
    for &j in &kept_idx {
        let first = chains[j].first_shadowed;
        if first >= 0 && chains[first as usize].kept == 0 {
            chains[first as usize].kept = 1;
        }
    }
    chains.retain(|c| c.kept > 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::seeding::{collect_smems, SeedingScratch};
    use crate::alphabets::dna;
    use crate::index::ReferenceIndex;

    fn seeds_to_chains(refseq: &[u8], read: &[u8], min_seed: i32) -> Vec<Chain> {
        let idx = ReferenceIndex::from_sequences(&[("chr1", refseq)], &[]);
        let mut opts = MemOpts::default();
        opts.min_seed_len = min_seed;
        let query = dna::encode_seq(read);
        let mut smems = Vec::new();
        let mut scratch = SeedingScratch::default();
        collect_smems(idx.fmd(), &opts, &query, &mut smems, &mut scratch);
        let (mut chains, _) = chain_seeds(&idx, &opts, query.len(), &smems);
        filter_chains(&opts, &mut chains);
        chains
    }

    #[test]
    fn test_chain_invariants() {
        let refseq = b"GATTACAGATTACACCCGGGTTTAAACCCGGGGATTACA";
        let chains = seeds_to_chains(refseq, b"GATTACACCCGGGTTTAAA", 5);
        assert!(!chains.is_empty());
        for c in &chains {
            assert!(c.weight >= 5);
            assert!(c.kept > 0);
            for w in c.seeds.windows(2) {
                assert!(w[0].rbeg <= w[1].rbeg, "seeds sorted by reference position");
                assert!(w[0].qbeg <= w[1].qbeg, "query positions non-decreasing");
            }
            for s in &c.seeds {
                assert!(s.qbeg >= c.qbeg() && s.qend() <= c.qend());
            }
        }
    }

    #[test]
    fn test_chain_weight_overlapping_seeds() {
        let mut chain = Chain {
            seeds: vec![
                Seed {
                    rbeg: 100,
                    qbeg: 0,
                    len: 20,
                },
                Seed {
                    rbeg: 110,
                    qbeg: 10,
                    len: 20,
                },
            ],
            rid: 0,
            is_alt: false,
            weight: 0,
            kept: 0,
            first_shadowed: -1,
            frac_rep: 0.0,
        };
        chain.weight = chain.weight();
        // 30 covered bases on both query and reference
        assert_eq!(chain.weight, 30);
    }

    #[test]
    fn test_filter_drops_weak_overlapping_chain() {
        let mk = |w: i32, qb: i32, len: i32| Chain {
            seeds: vec![Seed {
                rbeg: qb as i64 * 1000,
                qbeg: qb,
                len,
            }],
            rid: 0,
            is_alt: false,
            weight: w,
            kept: 0,
            first_shadowed: -1,
            frac_rep: 0.0,
        };
        let opts = MemOpts::default();
        // same query span, second far weaker: suppressed but recovered with
        // kept == 1
        let mut chains = vec![mk(0, 0, 100), mk(0, 0, 25)];
        filter_chains(&opts, &mut chains);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].kept, 3);
        assert_eq!(chains[0].first_shadowed, 1);
        assert_eq!(chains[1].kept, 1);
    }

    #[test]
    fn test_alt_chain_never_suppresses_primary() {
        let mk = |len: i32, is_alt: bool| Chain {
            seeds: vec![Seed {
                rbeg: if is_alt { 5000 } else { 100 },
                qbeg: 0,
                len,
            }],
            rid: if is_alt { 1 } else { 0 },
            is_alt,
            weight: 0,
            kept: 0,
            first_shadowed: -1,
            frac_rep: 0.0,
        };
        let opts = MemOpts::default();
        // strong ALT chain, weak primary chain on the same query span
        let mut chains = vec![mk(100, true), mk(25, false)];
        filter_chains(&opts, &mut chains);
        // the primary chain survives as a full citizen, not a recovery
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().any(|c| !c.is_alt && c.kept == 3));
    }
}
