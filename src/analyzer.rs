//! Multi-pass, multi-level driver (C8), grounded on
//! `original_source/analyser.{hpp,cpp}`.
//!
//! One pass over a level tries every Strict parser (by descending
//! priority) then every Fuzzy one, each walking the level's blocks via
//! [`crate::tree::Tree::next`]. A match is handed to
//! [`crate::tree::Tree::segment`], the fresh siblings are run through
//! the [`crate::deduper::Deduper`], and scanning resumes from the
//! segmentation's continuation point. Recursion descends into child
//! streams (level + 1) as long as *something* changed at the previous
//! level, bounded by [`crate::tree::MAX_RECURSION_LEVEL`].

use crate::deduper::Deduper;
use crate::parsers::{self, Parser, ParserOptions};
use crate::tree::{Io, Tree, MAX_RECURSION_LEVEL};

#[derive(Default)]
pub struct AnalyzerOptions {
    pub parser_options: ParserOptions,
}

pub struct Analyzer {
    strict: Vec<Box<dyn Parser>>,
    fuzzy: Vec<Box<dyn Parser>>,
    options: AnalyzerOptions,
}

impl Analyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        Analyzer {
            strict: parsers::strict_parsers(),
            fuzzy: parsers::fuzzy_parsers(),
            options,
        }
    }

    /// Runs every pass to completion, returning whether any block was
    /// segmented anywhere in the tree.
    pub fn process(&self, tree: &mut Tree, io: &mut Io) -> bool {
        let mut deduper = Deduper::new();
        let mut level = 0u32;
        let mut global_changed = false;

        loop {
            let mut level_changed = false;
            for class_parsers in [&self.strict, &self.fuzzy] {
                for parser in class_parsers.iter() {
                    if self.run_parser(parser.as_ref(), tree, io, &mut deduper, level) {
                        level_changed = true;
                    }
                }
            }
            global_changed |= level_changed;
            level += 1;
            if !level_changed || level >= MAX_RECURSION_LEVEL {
                break;
            }
        }
        global_changed
    }

    fn run_parser(&self, parser: &dyn Parser, tree: &mut Tree, io: &mut Io, deduper: &mut Deduper, level: u32) -> bool {
        let mut changed = false;
        let mut cur = tree.first(level, true);
        while let Some(ix) = cur {
            if !tree.revive(ix, io) {
                cur = tree.next(ix, level, true);
                continue;
            }
            let (data, offset, length) = {
                let n = tree.get(ix);
                (n.data, n.offset, n.length)
            };
            match parser.scan(io, data, offset, offset + length, &self.options.parser_options) {
                Some(seg) => {
                    let continuation = tree.segment(ix, seg, io);
                    deduper.process(tree, io, ix, continuation);
                    changed = true;
                    cur = continuation;
                }
                None => cur = tree.next(ix, level, true),
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Manager;
    use crate::streams::FileStream;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn scratch(bytes: &[u8]) -> (tempfile::NamedTempFile, FileStream) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), bytes).unwrap();
        let fs = FileStream::open(tmp.path(), false).unwrap();
        (tmp, fs)
    }

    #[test]
    fn process_finds_embedded_deflate_stream() {
        let raw = b"some payload worth compressing, repeated a few times for margin. ".repeat(8);
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(6));
        enc.write_all(&raw).unwrap();
        let compressed = enc.finish().unwrap();

        let mut container = b"PREFIX--".to_vec();
        container.extend_from_slice(&compressed);
        container.extend_from_slice(b"--SUFFIX");

        let (_tmp, mut fs) = scratch(&container);
        let mut manager = Manager::new(1 << 20, 0).unwrap();
        let mut io = Io { file: &mut fs, manager: &mut manager };
        let mut tree = Tree::new(container.len() as i64);

        let analyzer = Analyzer::new(AnalyzerOptions::default());
        let changed = analyzer.process(&mut tree, &mut io);
        assert!(changed);

        let mut found_deflate = false;
        let mut cur = Some(tree.root());
        while let Some(ix) = cur {
            if tree.get(ix).kind == crate::tree::BlockType::Deflate {
                found_deflate = true;
            }
            cur = tree.get(ix).next;
        }
        assert!(found_deflate);
    }
}
