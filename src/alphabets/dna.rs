// Copyright 2018-2020 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The two-bit DNA code space: `A=0, C=1, G=2, T=3`. Any other input symbol
//! encodes as `4`, which never matches in exact-match search and is penalized
//! like a mismatch against every base during alignment.

/// Code of an ambiguous base.
pub const AMB: u8 = 4;

/// Encode an ASCII nucleotide into its two-bit code. Case-insensitive;
/// everything outside `ACGTacgt` maps to [`AMB`].
#[inline]
pub fn encode(symbol: u8) -> u8 {
    match symbol {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => AMB,
    }
}

/// Decode a two-bit code back into its ASCII nucleotide (`4` becomes `N`).
#[inline]
pub fn decode(code: u8) -> u8 {
    b"ACGTN"[code as usize]
}

/// Complement of a two-bit code; ambiguous stays ambiguous.
#[inline]
pub fn complement(code: u8) -> u8 {
    if code < 4 {
        3 - code
    } else {
        AMB
    }
}

/// Encode an ASCII sequence into code space.
pub fn encode_seq(text: &[u8]) -> Vec<u8> {
    text.iter().map(|&s| encode(s)).collect()
}

/// Reverse complement in code space.
pub fn revcomp(codes: &[u8]) -> Vec<u8> {
    codes.iter().rev().map(|&c| complement(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        for (i, &s) in b"ACGT".iter().enumerate() {
            assert_eq!(encode(s) as usize, i);
            assert_eq!(decode(i as u8), s);
        }
        assert_eq!(encode(b'N'), AMB);
        assert_eq!(encode(b'n'), AMB);
        assert_eq!(decode(AMB), b'N');
    }

    #[test]
    fn test_revcomp() {
        let codes = encode_seq(b"ACGTN");
        assert_eq!(revcomp(&codes), encode_seq(b"NACGT"));
    }
}
