// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Loading and writing of the on-disk index file set.
//!
//! `<prefix>.bwt.2bit.64` holds the checkpointed BWT and compressed suffix
//! array; `<prefix>.pac` the two-bit packed forward genome; `<prefix>.ann`,
//! `<prefix>.amb` and the optional `<prefix>.alt` the annotations. All
//! multi-byte integers are little-endian. The writer exists so the layout is
//! exercised end-to-end by round-trip tests; production index construction
//! is external.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::data_structures::bwt::{Checkpoint, CheckpointedBwt};
use crate::data_structures::fmindex::FmdIndex;
use crate::data_structures::suffix_array::CompressedSuffixArray;
use crate::errors::{Error, Result};
use crate::index::annotations::Annotations;
use crate::index::pac::PackedSequence;
use crate::index::ReferenceIndex;

fn index_file(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    prefix.with_file_name(name)
}

fn open_required(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(Error::IndexNotFound {
            path: path.to_owned(),
        });
    }
    Ok(File::open(path)?)
}

fn corrupted(reason: impl Into<String>) -> Error {
    Error::IndexCorrupted {
        reason: reason.into(),
    }
}

impl ReferenceIndex {
    /// Load the index file set rooted at `prefix`.
    pub fn load(prefix: &Path) -> Result<ReferenceIndex> {
        let ann_text = fs::read_to_string(open_path(prefix, ".ann")?)?;
        let mut ann = Annotations::parse_ann(&ann_text)?;
        let amb_text = fs::read_to_string(open_path(prefix, ".amb")?)?;
        ann.parse_amb(&amb_text)?;
        let alt_path = index_file(prefix, ".alt");
        if alt_path.exists() {
            ann.parse_alt(&fs::read_to_string(alt_path)?);
        }

        let pac = load_pac(&index_file(prefix, ".pac"), ann.l_pac)?;
        let fmd = load_bwt(&index_file(prefix, ".bwt.2bit.64"))?;
        if fmd.len() != (ann.l_pac << 1) + 1 {
            return Err(corrupted(format!(
                "BWT length {} does not match genome length {}",
                fmd.len(),
                ann.l_pac
            )));
        }
        Ok(ReferenceIndex::new(fmd, pac, ann))
    }

    /// Write the index file set rooted at `prefix` in the canonical layout.
    pub fn write(&self, prefix: &Path) -> Result<()> {
        write_bwt(self.fmd(), &index_file(prefix, ".bwt.2bit.64"))?;
        write_pac(self.pac(), &index_file(prefix, ".pac"))?;
        write_ann(self.ann(), &index_file(prefix, ".ann"))?;
        write_amb(self.ann(), &index_file(prefix, ".amb"))?;
        if self.has_alts() {
            let mut w = BufWriter::new(File::create(index_file(prefix, ".alt"))?);
            for rec in self.ann().records.iter().filter(|r| r.is_alt) {
                writeln!(w, "{}\t*", rec.name)?;
            }
        }
        Ok(())
    }
}

fn open_path(prefix: &Path, suffix: &str) -> Result<PathBuf> {
    let path = index_file(prefix, suffix);
    if !path.exists() {
        return Err(Error::IndexNotFound { path });
    }
    Ok(path)
}

fn load_bwt(path: &Path) -> Result<FmdIndex> {
    let file = open_required(path)?;
    let file_len = file.metadata()?.len();
    let mut r = BufReader::new(file);

    let ref_seq_len = r.read_i64::<LittleEndian>()?;
    if ref_seq_len <= 0 {
        return Err(corrupted(format!("negative reference length {}", ref_seq_len)));
    }
    let mut counts = [0i64; 5];
    for c in counts.iter_mut() {
        *c = r.read_i64::<LittleEndian>()? + 1;
    }
    if counts[0] != 1 || counts[4] != ref_seq_len {
        return Err(corrupted("cumulative counts do not match reference length"));
    }
    for w in counts.windows(2) {
        if w[1] < w[0] {
            return Err(corrupted("cumulative counts are not monotone"));
        }
    }

    let n_cp = (((ref_seq_len + 63) >> 6) + 1) as usize;
    let n_sa = (((ref_seq_len + 7) >> 3) + 1) as usize;
    let expect = 8 + 40 + n_cp as u64 * 64 + n_sa as u64 + n_sa as u64 * 4 + 8;
    if file_len != expect {
        return Err(corrupted(format!(
            "index size {} does not match header ({} expected)",
            file_len, expect
        )));
    }

    let mut checkpoints = Vec::with_capacity(n_cp);
    for _ in 0..n_cp {
        let mut cp = Checkpoint::default();
        for c in cp.counts.iter_mut() {
            *c = r.read_i64::<LittleEndian>()?;
        }
        for b in cp.bits.iter_mut() {
            *b = r.read_u64::<LittleEndian>()?;
        }
        checkpoints.push(cp);
    }

    let mut raw = vec![0u8; n_sa];
    r.read_exact(&mut raw)?;
    let high: Vec<i8> = raw.into_iter().map(|b| b as i8).collect();
    let mut low = Vec::with_capacity(n_sa);
    for _ in 0..n_sa {
        low.push(r.read_u32::<LittleEndian>()?);
    }
    let sentinel = r.read_i64::<LittleEndian>()?;
    if sentinel < 0 || sentinel >= ref_seq_len {
        return Err(corrupted(format!("sentinel {} out of range", sentinel)));
    }

    Ok(FmdIndex::new(
        counts,
        CheckpointedBwt::new(checkpoints, ref_seq_len, sentinel),
        CompressedSuffixArray::new(high, low),
    ))
}

fn write_bwt(fmd: &FmdIndex, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_i64::<LittleEndian>(fmd.len())?;
    for &c in fmd.counts() {
        w.write_i64::<LittleEndian>(c - 1)?;
    }
    for cp in fmd.bwt().checkpoints() {
        for &c in &cp.counts {
            w.write_i64::<LittleEndian>(c)?;
        }
        for &b in &cp.bits {
            w.write_u64::<LittleEndian>(b)?;
        }
    }
    let sa = fmd.suffix_array();
    for &h in sa.high_bytes() {
        w.write_i8(h)?;
    }
    for &l in sa.low_words() {
        w.write_u32::<LittleEndian>(l)?;
    }
    w.write_i64::<LittleEndian>(fmd.bwt().sentinel())?;
    Ok(())
}

fn load_pac(path: &Path, l_pac: i64) -> Result<PackedSequence> {
    let mut file = open_required(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let n_packed = ((l_pac + 3) / 4) as usize;
    let expect = n_packed + 1 + if l_pac % 4 == 0 { 1 } else { 0 };
    if bytes.len() != expect {
        return Err(corrupted(format!(
            ".pac size {} does not match genome length {}",
            bytes.len(),
            l_pac
        )));
    }
    if i64::from(bytes[bytes.len() - 1]) != l_pac % 4 {
        return Err(corrupted(".pac trailing length byte mismatch"));
    }
    bytes.truncate(n_packed);
    Ok(PackedSequence::new(bytes, l_pac))
}

fn write_pac(pac: &PackedSequence, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(pac.packed_bytes())?;
    if pac.len() % 4 == 0 {
        w.write_u8(0)?;
    }
    w.write_u8((pac.len() % 4) as u8)?;
    Ok(())
}

fn write_ann(ann: &Annotations, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "{} {} {}", ann.l_pac, ann.records.len(), ann.seed)?;
    for rec in &ann.records {
        match &rec.anno {
            Some(anno) => writeln!(w, "{} {} {}", rec.gi, rec.name, anno)?,
            None => writeln!(w, "{} {}", rec.gi, rec.name)?,
        }
        writeln!(w, "{} {} {}", rec.offset, rec.len, rec.n_amb)?;
    }
    Ok(())
}

fn write_amb(ann: &Annotations, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(
        w,
        "{} {} {}",
        ann.l_pac,
        ann.records.len(),
        ann.holes.len()
    )?;
    for hole in &ann.holes {
        writeln!(w, "{} {} {}", hole.offset, hole.len, hole.amb as char)?;
    }
    Ok(())
}
