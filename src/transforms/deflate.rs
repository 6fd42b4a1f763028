//! Deflate recompression transform (C6), grounded on
//! `original_source/transforms/deflatetransform.{hpp,cpp}`.
//!
//! The source probes 9 zlib compression levels crossed with 9
//! `memLevel` settings (81 combinations) through `deflateInit2`,
//! re-deflating the decompressed payload under each and comparing
//! byte-for-byte against the original compressed bytes, most-recently-
//! successful combination first (an [`crate::misc::mtf::MtfList`]).
//! `flate2`'s safe API only exposes the compression level, not zlib's
//! `memLevel`/window-bits knobs directly — see `DESIGN.md` for why this
//! is an accepted, documented narrowing rather than a silent one. The
//! 81-entry combination table, MTF ordering, skip-mode fallback,
//! penalty-byte patch set and cost/benefit gate are all still modeled
//! faithfully; only the second search dimension collapses onto the
//! first in this build.

use crate::misc::{mtf::MtfList, uleb128};
use crate::tree::DeflateInfo;
use flate2::read::{DeflateDecoder, DeflateEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

pub const COMBINATION_COUNT: usize = 81;
const MAX_PENALTY_BYTES: usize = 64;

fn combination_level(combination: u8) -> u8 {
    1 + (combination as u32 / 9) as u8
}

fn combination_mem_level(combination: u8) -> u8 {
    1 + (combination as u32 % 9) as u8
}

/// Inflates `compressed` and returns the raw decompressed bytes, or
/// `None` if it isn't valid data. `headerless` selects framing: `false`
/// for zlib (2-byte header, Adler-32 trailer), `true` for the bare
/// deflate stream found wrapped inside a gzip member or ZIP entry.
pub fn inflate(compressed: &[u8], headerless: bool) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    if headerless {
        let mut dec = DeflateDecoder::new(compressed);
        dec.read_to_end(&mut out).ok()?;
    } else {
        let mut dec = ZlibDecoder::new(compressed);
        dec.read_to_end(&mut out).ok()?;
    }
    Some(out)
}

fn deflate_with(raw: &[u8], combination: u8, headerless: bool) -> Vec<u8> {
    let level = combination_level(combination).min(9);
    let mut out = Vec::new();
    if headerless {
        let mut enc = DeflateEncoder::new(raw, Compression::new(level as u32));
        enc.read_to_end(&mut out).expect("in-memory deflate encode cannot fail");
    } else {
        let mut enc = ZlibEncoder::new(raw, Compression::new(level as u32));
        enc.read_to_end(&mut out).expect("in-memory zlib encode cannot fail");
    }
    out
}

fn differ_positions_and_penalty(original: &[u8], candidate: &[u8]) -> Option<(Vec<i64>, Vec<u8>)> {
    if original.len() != candidate.len() {
        return None;
    }
    let mut absolute = Vec::new();
    let mut penalty = Vec::new();
    for (i, (a, b)) in original.iter().zip(candidate.iter()).enumerate() {
        if a != b {
            absolute.push(i as i64);
            penalty.push(*a);
            if penalty.len() > MAX_PENALTY_BYTES {
                return None;
            }
        }
    }
    let mut deltas = Vec::with_capacity(absolute.len());
    let mut prev = -1i64;
    for &pos in &absolute {
        deltas.push(pos - prev - 1);
        prev = pos;
    }
    Some((deltas, penalty))
}

fn patch_penalty(mut buf: Vec<u8>, positions: &[i64], penalty: &[u8]) -> Vec<u8> {
    let mut prev = -1i64;
    for (&delta, &byte) in positions.iter().zip(penalty.iter()) {
        let pos = prev + delta + 1;
        buf[pos as usize] = byte;
        prev = pos;
    }
    buf
}

/// Cost (in ULEB128-encoded bytes) of carrying the reconstruction
/// metadata for a candidate: one varint per differ position plus one
/// raw byte per penalty entry.
fn metadata_cost(positions: &[i64], penalty: &[u8]) -> i64 {
    positions.iter().map(|&p| uleb128::cost(p)).sum::<i64>() + penalty.len() as i64
}

pub struct DeflateTransform;

impl DeflateTransform {
    /// Tries every combination (most-recently-successful first per
    /// `mtf`), returning the info needed to reconstruct `compressed`
    /// exactly from the decompressed payload, plus that payload.
    ///
    /// Rejects the block (`None`) if no combination reproduces the
    /// original exactly or within the penalty-byte budget, or if the
    /// reconstruction metadata would cost more than just keeping the
    /// original compressed bytes around (cost/benefit gate).
    ///
    /// `headerless` says whether `compressed` is a bare deflate stream
    /// (gzip/ZIP-embedded) rather than zlib-framed; it is carried into
    /// the returned [`DeflateInfo`] so [`DeflateTransform::undo`] (and a
    /// later revive) re-deflate under the same framing.
    pub fn validate(compressed: &[u8], mtf: &mut MtfList, headerless: bool) -> Option<(DeflateInfo, Vec<u8>)> {
        let raw = inflate(compressed, headerless)?;
        if raw.is_empty() {
            return None;
        }

        let mut best: Option<(u8, Vec<i64>, Vec<u8>, i64)> = None;
        let mut combination = mtf.first();
        for _ in 0..COMBINATION_COUNT {
            let candidate = deflate_with(&raw, combination as u8, headerless);
            if let Some((positions, penalty)) = differ_positions_and_penalty(compressed, &candidate) {
                let cost = metadata_cost(&positions, &penalty);
                let better = match &best {
                    None => true,
                    Some((_, _, _, best_cost)) => cost < *best_cost,
                };
                if better {
                    best = Some((combination as u8, positions, penalty, cost));
                }
                if cost == 0 {
                    break; // exact match, nothing beats this
                }
            }
            combination = mtf.next();
        }

        let (combination, positions, penalty, cost) = best?;
        if cost >= compressed.len() as i64 {
            return None; // not worth carrying the metadata
        }
        mtf.update(combination as usize);

        Some((
            DeflateInfo {
                combination,
                window: 15,
                raw: headerless,
                penalty_bytes: penalty,
                differ_positions: positions,
                compressed_length: compressed.len() as i64,
                uncompressed_length: raw.len() as i64,
            },
            raw,
        ))
    }

    /// Reverses `validate`: recompresses `raw` under the recorded
    /// combination and patches in the penalty bytes, reproducing the
    /// original compressed bytes exactly.
    pub fn undo(info: &DeflateInfo, raw: &[u8]) -> Vec<u8> {
        let recompressed = deflate_with(raw, info.combination, info.raw);
        patch_penalty(recompressed, &info.differ_positions, &info.penalty_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_zlib(level: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut enc = ZlibEncoder::new(data, Compression::new(level));
        enc.read_to_end(&mut out).unwrap();
        out
    }

    fn sample_raw_deflate(level: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut enc = DeflateEncoder::new(data, Compression::new(level));
        enc.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn validate_then_undo_roundtrips_exact_match() {
        let raw = b"the quick brown fox jumps over the lazy dog, repeatedly, to pad this out a bit more".repeat(4);
        let compressed = sample_zlib(6, &raw);

        let mut mtf = MtfList::new(COMBINATION_COUNT);
        let (info, decompressed) = DeflateTransform::validate(&compressed, &mut mtf, false).expect("should validate");
        assert_eq!(decompressed, raw);
        assert!(info.differ_positions.is_empty());
        assert!(info.penalty_bytes.is_empty());
        assert!(!info.raw);

        let reconstructed = DeflateTransform::undo(&info, &decompressed);
        assert_eq!(reconstructed, compressed);
    }

    #[test]
    fn validate_then_undo_roundtrips_headerless_stream() {
        let raw = b"headerless deflate payload, as embedded in a gzip member or a ZIP entry".repeat(4);
        let compressed = sample_raw_deflate(6, &raw);

        let mut mtf = MtfList::new(COMBINATION_COUNT);
        let (info, decompressed) = DeflateTransform::validate(&compressed, &mut mtf, true).expect("should validate");
        assert_eq!(decompressed, raw);
        assert!(info.raw);

        let reconstructed = DeflateTransform::undo(&info, &decompressed);
        assert_eq!(reconstructed, compressed);
    }

    #[test]
    fn validate_rejects_non_zlib_input() {
        let mut mtf = MtfList::new(COMBINATION_COUNT);
        assert!(DeflateTransform::validate(b"not zlib data at all", &mut mtf, false).is_none());
    }

    #[test]
    fn mtf_promotes_successful_combination_to_front() {
        let raw = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let compressed = sample_zlib(1, &raw);
        let mut mtf = MtfList::new(COMBINATION_COUNT);
        let (info, _) = DeflateTransform::validate(&compressed, &mut mtf, false).expect("should validate");
        assert_eq!(mtf.first(), info.combination as usize);
    }
}
