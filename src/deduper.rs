//! Content-addressed dedup pass (C7), grounded on
//! `original_source/deduper.{hpp,cpp}`.
//!
//! Walks a freshly-segmented sibling range once per analyzer pass,
//! bucketing blocks by their CRC32 hash. A block whose bytes exactly
//! match an earlier block of the same type and length is converted in
//! place to `BlockType::Dedup`, its children freed, and its `info` set
//! to point at the earlier occurrence — the representative is left
//! untouched so later blocks can still dedup against it.
//!
//! The bucket is a `Vec<BlockIx>` per hash rather than a single slot,
//! so hash collisions between otherwise-distinct blocks don't corrupt
//! dedup decisions; insertion order within a bucket is preserved
//! (each `push` appends), which is what lets a block always compare
//! against the *first* matching occurrence rather than the most
//! recent one (resolved Open Question, see `DESIGN.md`).

use crate::tree::{BlockData, BlockInfo, BlockType, BlockIx, Io, Tree};
use std::collections::HashMap;

const COMPARE_CHUNK: usize = 4096;

pub struct Deduper {
    buckets: HashMap<u32, Vec<BlockIx>>,
}

impl Deduper {
    pub fn new() -> Self {
        Deduper { buckets: HashMap::new() }
    }

    /// Scans the sibling chain from `start` up to (but not including)
    /// `stop`, deduping as it goes.
    pub fn process(&mut self, tree: &mut Tree, io: &mut Io, start: BlockIx, stop: Option<BlockIx>) {
        let mut cur = Some(start);
        while let Some(ix) = cur {
            if Some(ix) == stop {
                break;
            }
            let next = tree.get(ix).next;
            self.visit(tree, io, ix);
            cur = next;
        }
    }

    fn visit(&mut self, tree: &mut Tree, io: &mut Io, ix: BlockIx) {
        let (kind, hash, hashed, done) = {
            let n = tree.get(ix);
            (n.kind, n.hash, n.hashed, n.done)
        };
        if !hashed || !done || kind == BlockType::Default || kind == BlockType::Dedup {
            return;
        }
        let length = tree.get(ix).length;

        if let Some(bucket) = self.buckets.get(&hash) {
            for &candidate in bucket {
                if candidate == ix {
                    continue;
                }
                let same_shape = tree.get(candidate).kind == kind && tree.get(candidate).length == length;
                if same_shape && Self::bytes_equal(tree, io, candidate, ix) {
                    tree.delete_childs(ix, io.manager);
                    let node = tree.get_mut(ix);
                    node.kind = BlockType::Dedup;
                    node.info = BlockInfo::Dedup(candidate);
                    node.done = true;
                    return;
                }
            }
        }
        self.buckets.entry(hash).or_default().push(ix);
    }

    fn bytes_equal(tree: &mut Tree, io: &mut Io, a: BlockIx, b: BlockIx) -> bool {
        let (a_data, a_offset, a_len) = {
            let n = tree.get(a);
            (n.data, n.offset, n.length)
        };
        let (b_data, b_offset, b_len) = {
            let n = tree.get(b);
            (n.data, n.offset, n.length)
        };
        if a_len != b_len {
            return false;
        }
        if !tree.revive(a, io) || !tree.revive(b, io) {
            return false;
        }
        Self::read_all(io, a_data, a_offset, a_len) == Self::read_all(io, b_data, b_offset, b_len)
    }

    fn read_all(io: &mut Io, data: BlockData, offset: i64, length: i64) -> Vec<u8> {
        if !io.seek(data, offset) {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(length as usize);
        let mut remaining = length;
        let mut chunk = [0u8; COMPARE_CHUNK];
        while remaining > 0 {
            let want = remaining.min(COMPARE_CHUNK as i64) as usize;
            let n = io.read(data, &mut chunk[..want]);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            remaining -= n as i64;
        }
        out
    }
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Manager;
    use crate::streams::FileStream;
    use crate::tree::Segmentation;

    fn scratch(bytes: &[u8]) -> (tempfile::NamedTempFile, FileStream) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), bytes).unwrap();
        let fs = FileStream::open(tmp.path(), false).unwrap();
        (tmp, fs)
    }

    #[test]
    fn identical_sibling_blocks_collapse_to_dedup() {
        let (_tmp, mut fs) = scratch(b"ABCDABCD");
        let mut manager = Manager::new(4096, 0).unwrap();
        let mut io = Io { file: &mut fs, manager: &mut manager };
        let mut tree = Tree::new(8);
        let root = tree.root();

        let seg1 = Segmentation { offset: 0, length: 4, kind: BlockType::Image, info: BlockInfo::None, child_stream: None };
        let tail = tree.segment(root, seg1, &mut io).unwrap();
        let seg2 = Segmentation { offset: 4, length: 4, kind: BlockType::Image, info: BlockInfo::None, child_stream: None };
        tree.segment(tail, seg2, &mut io);

        let mut deduper = Deduper::new();
        deduper.process(&mut tree, &mut io, root, None);

        let second = tree.get(root).next.unwrap();
        assert_eq!(tree.get(second).kind, BlockType::Dedup);
        assert_eq!(tree.get(second).info, BlockInfo::Dedup(root));
    }
}
