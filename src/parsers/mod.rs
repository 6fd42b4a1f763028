//! Format detectors (C5), grounded on `original_source/parsers/*`.
//!
//! Each parser scans a block's byte range for its signature and, on a
//! match, returns a [`crate::tree::Segmentation`] describing the
//! sub-block to carve out. The driver (`crate::analyzer`) runs Strict
//! parsers before Fuzzy ones, descending priority within a class.
//! Priority table: JPEG=9, Bitmap=8, Mod=7, Deflate=0 —
//! Deflate is cheapest to rule out per byte so it runs last within the
//! Strict pass, letting the higher-confidence structured formats claim
//! a region first.

pub mod bitmap_parser;
pub mod deflate_parser;
pub mod jpeg_parser;
pub mod mod_parser;

use crate::tree::{BlockData, Io, Segmentation};

/// Only `Strict` parsers exist in the ported source; `Fuzzy` is kept
/// as a type so the analyzer's two-class driver loop stays general,
/// but no parser registers into it (see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserClass {
    Strict,
    Fuzzy,
}

#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    pub use_brute_mode: bool,
    pub parse_zip_streams: bool,
    pub parse_gzip_streams: bool,
    pub allow_progressive_jpeg: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            use_brute_mode: true,
            parse_zip_streams: true,
            parse_gzip_streams: true,
            allow_progressive_jpeg: false,
        }
    }
}

/// A format detector. `scan` is called with the cursor positioned at
/// `offset` within `data` and must look for the earliest match at or
/// after `offset`, returning the segmentation for that match (its own
/// `offset` may be greater than the one passed in).
pub trait Parser {
    fn name(&self) -> &'static str;
    fn priority(&self) -> i32;
    fn class(&self) -> ParserClass {
        ParserClass::Strict
    }
    fn scan(&self, io: &mut Io, data: BlockData, offset: i64, end: i64, opts: &ParserOptions) -> Option<Segmentation>;
}

/// Builds the Strict-class parser set, descending by priority, as the
/// analyzer expects (matching `original_source/analyser.cpp`'s
/// constructor sort).
pub fn strict_parsers() -> Vec<Box<dyn Parser>> {
    let mut parsers: Vec<Box<dyn Parser>> = vec![
        Box::new(jpeg_parser::JpegParser),
        Box::new(bitmap_parser::BitmapParser),
        Box::new(mod_parser::ModParser),
        Box::new(deflate_parser::DeflateParser::new()),
    ];
    parsers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
    parsers
}

/// Always empty — see `class()` doc above.
pub fn fuzzy_parsers() -> Vec<Box<dyn Parser>> {
    Vec::new()
}
