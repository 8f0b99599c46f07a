// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Reference annotations: the ordered list of sequences making up the
//! concatenated reference, the ambiguity (N) runs, and ALT contig marking.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// One reference sequence within the concatenated genome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub name: String,
    pub anno: Option<String>,
    /// Offset in the concatenated forward genome.
    pub offset: i64,
    pub len: i64,
    /// Number of ambiguous bases within this sequence.
    pub n_amb: i32,
    pub gi: i64,
    /// Whether this sequence is an ALT contig.
    pub is_alt: bool,
}

/// A run of ambiguous input bases that was substituted during packing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AmbiguityRun {
    pub offset: i64,
    pub len: i64,
    /// The ambiguity character seen in the input (usually `N`).
    pub amb: u8,
}

/// Annotations of a concatenated reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Annotations {
    pub l_pac: i64,
    pub seed: i64,
    pub records: Vec<SequenceRecord>,
    pub holes: Vec<AmbiguityRun>,
}

impl Annotations {
    /// Sequence id containing forward position `pos`, by binary search on
    /// offsets. `None` if `pos` is outside the forward genome.
    pub fn pos_to_rid(&self, pos: i64) -> Option<i32> {
        if pos < 0 || pos >= self.l_pac {
            return None;
        }
        let mut left = 0usize;
        let mut right = self.records.len();
        while left + 1 < right {
            let mid = (left + right) / 2;
            if self.records[mid].offset <= pos {
                left = mid;
            } else {
                right = mid;
            }
        }
        Some(left as i32)
    }

    /// Project a combined-space position onto the forward strand. Returns
    /// `(forward_pos, is_rev)`.
    #[inline]
    pub fn depos(&self, pos: i64) -> (i64, bool) {
        let is_rev = pos >= self.l_pac;
        if is_rev {
            ((self.l_pac << 1) - 1 - pos, true)
        } else {
            (pos, false)
        }
    }

    /// Sequence id of the combined-space interval `[rb, re)`, or `None` when
    /// the interval bridges the strand boundary or spans two sequences.
    pub fn interval_to_rid(&self, rb: i64, re: i64) -> Option<i32> {
        if rb < self.l_pac && re > self.l_pac {
            return None;
        }
        debug_assert!(rb <= re);
        let rid_b = self.pos_to_rid(self.depos(rb).0)?;
        let rid_e = if rb < re {
            self.pos_to_rid(self.depos(re - 1).0)?
        } else {
            rid_b
        };
        if rid_b == rid_e {
            Some(rid_b)
        } else {
            None
        }
    }

    /// Mark every record whose name appears in `names` as an ALT contig.
    pub fn mark_alts<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            for rec in &mut self.records {
                if rec.name == name {
                    rec.is_alt = true;
                }
            }
        }
    }

    /// Parse the `.ann` text format: a `l_pac n_seqs seed` header, then per
    /// sequence a `gi name [anno]` line and an `offset length nAmb` line.
    pub fn parse_ann(text: &str) -> Result<Annotations> {
        let bad = |msg: &str| Error::InputFormat {
            msg: format!("invalid .ann: {}", msg),
        };
        let mut lines = text.lines();
        let header = lines.next().ok_or_else(|| bad("missing header"))?;
        let mut fields = header.split_whitespace();
        let l_pac: i64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("header l_pac"))?;
        let n_seqs: usize = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("header n_seqs"))?;
        let seed: i64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("header seed"))?;
        let mut records = Vec::with_capacity(n_seqs);
        for _ in 0..n_seqs {
            let name_line = lines.next().ok_or_else(|| bad("truncated"))?;
            let mut parts = name_line.splitn(3, char::is_whitespace);
            let gi: i64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad("gi"))?;
            let name = parts.next().ok_or_else(|| bad("name"))?.to_owned();
            let anno = parts.next().map(|s| s.to_owned()).filter(|s| !s.is_empty());
            let len_line = lines.next().ok_or_else(|| bad("truncated"))?;
            let mut parts = len_line.split_whitespace();
            let offset: i64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad("offset"))?;
            let len: i64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad("length"))?;
            let n_amb: i32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad("nAmb"))?;
            records.push(SequenceRecord {
                name,
                anno,
                offset,
                len,
                n_amb,
                gi,
                is_alt: false,
            });
        }
        Ok(Annotations {
            l_pac,
            seed,
            records,
            holes: Vec::new(),
        })
    }

    /// Parse the `.amb` text format: a `l_pac n_seqs n_holes` header, then
    /// one `offset length ambChar` line per hole.
    pub fn parse_amb(&mut self, text: &str) -> Result<()> {
        let bad = |msg: &str| Error::InputFormat {
            msg: format!("invalid .amb: {}", msg),
        };
        let mut lines = text.lines();
        let header = lines.next().ok_or_else(|| bad("missing header"))?;
        let mut fields = header.split_whitespace();
        let l_pac: i64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("header l_pac"))?;
        if l_pac != self.l_pac {
            return Err(Error::IndexCorrupted {
                reason: format!(".amb genome length {} does not match .ann {}", l_pac, self.l_pac),
            });
        }
        let _n_seqs = fields.next();
        let n_holes: usize = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("header n_holes"))?;
        self.holes.clear();
        for _ in 0..n_holes {
            let line = lines.next().ok_or_else(|| bad("truncated"))?;
            let mut parts = line.split_whitespace();
            let offset: i64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad("offset"))?;
            let len: i64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad("length"))?;
            let amb = parts
                .next()
                .and_then(|s| s.bytes().next())
                .ok_or_else(|| bad("ambChar"))?;
            self.holes.push(AmbiguityRun { offset, len, amb });
        }
        Ok(())
    }

    /// Parse the `.alt` text format: `@`-prefixed header lines are skipped,
    /// the first tab-delimited field of any other line names an ALT contig.
    pub fn parse_alt(&mut self, text: &str) {
        let names: Vec<&str> = text
            .lines()
            .filter(|l| !l.starts_with('@') && !l.is_empty())
            .filter_map(|l| l.split('\t').next())
            .collect();
        self.mark_alts(names);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_seq() -> Annotations {
        Annotations {
            l_pac: 30,
            seed: 11,
            records: vec![
                SequenceRecord {
                    name: "chr1".into(),
                    anno: None,
                    offset: 0,
                    len: 20,
                    n_amb: 0,
                    gi: 0,
                    is_alt: false,
                },
                SequenceRecord {
                    name: "chr1_alt".into(),
                    anno: None,
                    offset: 20,
                    len: 10,
                    n_amb: 0,
                    gi: 0,
                    is_alt: false,
                },
            ],
            holes: Vec::new(),
        }
    }

    #[test]
    fn test_pos_to_rid() {
        let ann = two_seq();
        assert_eq!(ann.pos_to_rid(0), Some(0));
        assert_eq!(ann.pos_to_rid(19), Some(0));
        assert_eq!(ann.pos_to_rid(20), Some(1));
        assert_eq!(ann.pos_to_rid(29), Some(1));
        assert_eq!(ann.pos_to_rid(30), None);
    }

    #[test]
    fn test_depos() {
        let ann = two_seq();
        assert_eq!(ann.depos(5), (5, false));
        assert_eq!(ann.depos(30), (29, true));
        assert_eq!(ann.depos(59), (0, true));
    }

    #[test]
    fn test_interval_to_rid() {
        let ann = two_seq();
        assert_eq!(ann.interval_to_rid(0, 10), Some(0));
        assert_eq!(ann.interval_to_rid(18, 22), None); // spans two sequences
        assert_eq!(ann.interval_to_rid(25, 35), None); // bridges the strands
        assert_eq!(ann.interval_to_rid(35, 40), Some(1)); // reverse of chr1_alt
        assert_eq!(ann.interval_to_rid(45, 59), Some(0));
    }

    #[test]
    fn test_parse_ann_roundtrip() {
        let text = "30 2 11\n0 chr1\n0 20 0\n0 chr1_alt alternate locus\n20 10 0\n";
        let ann = Annotations::parse_ann(text).unwrap();
        assert_eq!(ann.l_pac, 30);
        assert_eq!(ann.records.len(), 2);
        assert_eq!(ann.records[1].name, "chr1_alt");
        assert_eq!(ann.records[1].anno.as_deref(), Some("alternate locus"));
        assert_eq!(ann.records[1].offset, 20);
    }

    #[test]
    fn test_parse_amb() {
        let mut ann = two_seq();
        ann.parse_amb("30 2 1\n5 3 N\n").unwrap();
        assert_eq!(ann.holes.len(), 1);
        assert_eq!(ann.holes[0].offset, 5);
        assert_eq!(ann.holes[0].amb, b'N');
        assert!(ann.parse_amb("31 2 0\n").is_err());
    }

    #[test]
    fn test_parse_alt() {
        let mut ann = two_seq();
        ann.parse_alt("@HD\tVN:1.6\nchr1_alt\t0\tchr1\n");
        assert!(!ann.records[0].is_alt);
        assert!(ann.records[1].is_alt);
    }
}
