// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Insert-size inference over a batch of read pairs, per pair orientation.

use log::debug;

/// Pair orientations, encoded FF=0, FR=1, RF=2, RR=3.
pub const ORIENTATIONS: usize = 4;

const MIN_DIR_COUNT: usize = 10;
const MIN_DIR_RATIO: f64 = 0.05;
const OUTLIER_BOUND: f64 = 2.0;
const MAPPING_BOUND: f64 = 3.0;
const MAX_STDDEV: f64 = 4.0;
/// Primary hits below this MAPQ do not enter the sample.
const MIN_MAPQ: i32 = 20;

/// Infer the orientation and unsigned insert size of two combined-space
/// positions: the reverse-strand one is reflected onto the other strand
/// before comparing.
#[inline]
pub fn infer_orientation(l_pac: i64, b1: i64, b2: i64) -> (usize, i64) {
    let r1 = b1 >= l_pac;
    let r2 = b2 >= l_pac;
    let p2 = if r1 == r2 { b2 } else { (l_pac << 1) - 1 - b2 };
    let dist = (p2 - b1).abs();
    let dir = usize::from(r1 != r2) ^ if p2 > b1 { 0 } else { 3 };
    (dir, dist)
}

/// Statistics of one orientation.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrientationStats {
    pub failed: bool,
    /// Proper-pair window.
    pub low: i32,
    pub high: i32,
    pub mean: f64,
    pub std: f64,
    /// Samples surviving the quartile filter.
    pub count: usize,
}

impl OrientationStats {
    #[inline]
    pub fn contains(&self, insert: i64) -> bool {
        !self.failed && insert >= self.low as i64 && insert <= self.high as i64
    }
}

/// Per-orientation insert-size statistics of a batch.
#[derive(Clone, Copy, Debug)]
pub struct InsertSizeStats(pub [OrientationStats; ORIENTATIONS]);

impl InsertSizeStats {
    pub fn all_failed() -> Self {
        let mut s = OrientationStats::default();
        s.failed = true;
        InsertSizeStats([s; ORIENTATIONS])
    }

    /// The most populated usable orientation.
    pub fn primary_orientation(&self) -> Option<usize> {
        (0..ORIENTATIONS)
            .filter(|&d| !self.0[d].failed)
            .max_by_key(|&d| self.0[d].count)
    }

    pub fn is_usable(&self) -> bool {
        self.0.iter().any(|s| !s.failed)
    }

    /// Bypass estimation with externally provided FR statistics.
    pub fn with_override(mean: f64, std: f64, low: Option<i32>, high: Option<i32>) -> Self {
        let mut stats = InsertSizeStats::all_failed();
        let fr = &mut stats.0[1];
        fr.failed = false;
        fr.mean = mean;
        fr.std = std;
        fr.low = low.unwrap_or_else(|| ((mean - MAX_STDDEV * std) + 0.499).max(1.0) as i32);
        fr.high = high.unwrap_or_else(|| ((mean + MAX_STDDEV * std) + 0.499) as i32);
        fr.count = MIN_DIR_COUNT;
        debug!(
            "insert size override: FR mean {:.1} std {:.1} window [{}, {}]",
            mean, std, fr.low, fr.high
        );
        stats
    }

    /// Estimate the distribution from `(orientation, insert)` observations
    /// of pairs whose two primaries were confidently and consistently
    /// mapped (see [`collect_observations`]).
    pub fn estimate(observations: &[(usize, i64)]) -> Self {
        let mut stats = InsertSizeStats::all_failed();
        let mut samples: [Vec<i64>; ORIENTATIONS] = Default::default();
        for &(dir, insert) in observations {
            samples[dir].push(insert);
        }
        for d in 0..ORIENTATIONS {
            let q = &mut samples[d];
            let r = &mut stats.0[d];
            if q.len() < MIN_DIR_COUNT {
                debug!(
                    "skipping orientation {} with only {} pairs",
                    ["FF", "FR", "RF", "RR"][d],
                    q.len()
                );
                r.failed = true;
                continue;
            }
            debug!(
                "analyzing insert size distribution for orientation {}",
                ["FF", "FR", "RF", "RR"][d]
            );
            q.sort_unstable();
            let n = q.len() as f64;
            let p25 = q[(0.25 * n + 0.499) as usize] as f64;
            let p75 = q[(0.75 * n + 0.499) as usize] as f64;
            let iqr = p75 - p25;
            let mut low = (p25 - OUTLIER_BOUND * iqr + 0.499) as i32;
            if low < 1 {
                low = 1;
            }
            let high = (p75 + OUTLIER_BOUND * iqr + 0.499) as i32;
            let mut sum = 0.0;
            let mut count = 0usize;
            for &x in q.iter() {
                if x >= low as i64 && x <= high as i64 {
                    sum += x as f64;
                    count += 1;
                }
            }
            r.mean = sum / count as f64;
            let mut var = 0.0;
            for &x in q.iter() {
                if x >= low as i64 && x <= high as i64 {
                    var += (x as f64 - r.mean) * (x as f64 - r.mean);
                }
            }
            r.std = (var / count as f64).sqrt();
            r.count = count;
            // proper-pair window
            r.low = (p25 - MAPPING_BOUND * iqr + 0.499) as i32;
            r.high = (p75 + MAPPING_BOUND * iqr + 0.499) as i32;
            if f64::from(r.low) > r.mean - MAX_STDDEV * r.std {
                r.low = (r.mean - MAX_STDDEV * r.std + 0.499) as i32;
            }
            if f64::from(r.high) < r.mean + MAX_STDDEV * r.std {
                r.high = (r.mean + MAX_STDDEV * r.std + 0.499) as i32;
            }
            if r.low < 1 {
                r.low = 1;
            }
            r.failed = false;
            debug!(
                "orientation {}: mean {:.2} std {:.2} window [{}, {}]",
                ["FF", "FR", "RF", "RR"][d],
                r.mean,
                r.std,
                r.low,
                r.high
            );
        }
        let max = stats.0.iter().map(|s| s.count).max().unwrap_or(0);
        for (d, r) in stats.0.iter_mut().enumerate() {
            if !r.failed && (r.count as f64) < max as f64 * MIN_DIR_RATIO {
                debug!(
                    "skipping marginal orientation {}",
                    ["FF", "FR", "RF", "RR"][d]
                );
                r.failed = true;
            }
        }
        stats
    }
}

/// Extract one `(orientation, insert)` observation from the primary regions
/// of a pair, if both map to the same sequence with MAPQ at or above the
/// confidence floor and the insert is plausible.
pub fn observe_pair(
    opts: &crate::opts::MemOpts,
    l_pac: i64,
    r1: Option<&crate::alignment::AlnReg>,
    mapq1: i32,
    r2: Option<&crate::alignment::AlnReg>,
    mapq2: i32,
) -> Option<(usize, i64)> {
    let (a, b) = (r1?, r2?);
    if a.rid != b.rid || mapq1 < MIN_MAPQ || mapq2 < MIN_MAPQ {
        return None;
    }
    let (dir, insert) = infer_orientation(l_pac, a.rb, b.rb);
    if insert == 0 || insert > opts.max_insert_size as i64 {
        return None;
    }
    Some((dir, insert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_orientation_encoding() {
        let l_pac = 1000;
        // both forward, read2 after read1: FF
        assert_eq!(infer_orientation(l_pac, 100, 400).0, 0);
        // read1 forward, read2 reverse and downstream: FR
        let (dir, dist) = infer_orientation(l_pac, 100, 2 * l_pac - 1 - 400);
        assert_eq!(dir, 1);
        assert_eq!(dist, 300);
        // read1 reverse, reflected read2 upstream of it: RF
        let (dir, _) = infer_orientation(l_pac, 2 * l_pac - 1 - 100, 400);
        assert_eq!(dir, 2);
        // both reverse, reflected read2 at or before read1: RR
        let (dir, _) = infer_orientation(l_pac, 2 * l_pac - 1 - 100, 2 * l_pac - 1 - 400);
        assert_eq!(dir, 3);
    }

    #[test]
    fn test_estimate_fr_distribution() {
        // 100 FR pairs with inserts around 300
        let mut obs = Vec::new();
        for i in 0..100 {
            obs.push((1usize, 280 + (i % 41) as i64));
        }
        let stats = InsertSizeStats::estimate(&obs);
        let fr = &stats.0[1];
        assert!(!fr.failed);
        assert!(fr.mean >= 290.0 && fr.mean <= 310.0);
        assert!(fr.std < 20.0);
        assert_eq!(stats.primary_orientation(), Some(1));
        for d in [0usize, 2, 3] {
            assert!(stats.0[d].failed);
        }
        assert!(fr.contains(300));
        assert!(!fr.contains(3000));
    }

    #[test]
    fn test_estimate_is_stable_within_window() {
        // a distribution already inside its own filter window re-estimates
        // to the same moments
        let obs: Vec<(usize, i64)> = (0..200).map(|i| (1usize, 295 + (i % 11) as i64)).collect();
        let first = InsertSizeStats::estimate(&obs);
        let filtered: Vec<(usize, i64)> = obs
            .iter()
            .copied()
            .filter(|&(_, x)| first.0[1].contains(x))
            .collect();
        let second = InsertSizeStats::estimate(&filtered);
        assert_relative_eq!(first.0[1].mean, second.0[1].mean, epsilon = 1e-6);
        assert_relative_eq!(first.0[1].std, second.0[1].std, epsilon = 1e-6);
    }

    #[test]
    fn test_too_few_samples_fail() {
        let obs: Vec<(usize, i64)> = (0..5).map(|_| (1usize, 300)).collect();
        let stats = InsertSizeStats::estimate(&obs);
        assert!(!stats.is_usable());
    }

    #[test]
    fn test_override() {
        let stats = InsertSizeStats::with_override(400.0, 50.0, None, None);
        assert!(!stats.0[1].failed);
        assert_eq!(stats.primary_orientation(), Some(1));
        assert!(stats.0[1].contains(400));
        assert!(stats.0[0].failed);
    }
}
