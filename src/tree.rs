//! The block tree (C4): a typed, singly-linked parent/child/next graph
//! over an input file's decomposition, grounded on
//! `original_source/block.{hpp,cpp}`.
//!
//! The cyclic parent/child/sibling graph is represented as an arena of
//! nodes with stable indices rather than raw pointers; `BlockIx` is
//! that index. One consequence worth
//! recording (see `DESIGN.md`): where the source keeps a node's
//! pointer identity for whichever of the three split pieces happens to
//! be addressed by `this`, an arena has no such constraint — `segment`
//! instead keeps `self`'s index for whichever piece occupies the
//! *earliest* offset, so that any predecessor link already pointing at
//! this index keeps working without needing a fix-up pass.

use crate::storage::Manager;
use crate::streams::{BlockData, FileStream, Stream};

pub const MAX_RECURSION_LEVEL: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Default = 0,
    Dedup   = 1,
    Deflate = 2,
    Jpeg    = 3,
    Image   = 4,
    Audio   = 5,
}

impl BlockType {
    /// Inverse of the `as u8` cast, used when a byte-sized tag round-trips
    /// through the archive container's block header.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(BlockType::Default),
            1 => Some(BlockType::Dedup),
            2 => Some(BlockType::Deflate),
            3 => Some(BlockType::Jpeg),
            4 => Some(BlockType::Image),
            5 => Some(BlockType::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeflateInfo {
    pub combination: u8,
    pub window: i8,
    /// `true` for a headerless (raw) deflate stream, as found wrapped
    /// inside a gzip member or a ZIP local file entry; `false` for a
    /// zlib-framed stream (2-byte header, Adler-32 trailer).
    pub raw: bool,
    pub penalty_bytes: Vec<u8>,
    /// Delta-encoded: `positions[i] = absolute[i] -
    /// absolute[i-1] - 1`, with a trailing entry `compressed_length -
    /// absolute[last]`.
    pub differ_positions: Vec<i64>,
    pub compressed_length: i64,
    pub uncompressed_length: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    ProTracker,
    FastTracker,
    Octalyser,
    StarTrekker,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bpp: u8,
    pub grayscale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub channels: u8,
    pub bits_per_sample: u8,
    pub mode: AudioMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockInfo {
    None,
    Deflate(DeflateInfo),
    Image(ImageInfo),
    Audio(AudioInfo),
    Dedup(BlockIx),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockIx(pub u32);

pub struct BlockNode {
    pub kind: BlockType,
    pub data: BlockData,
    pub offset: i64,
    pub length: i64,
    pub parent: Option<BlockIx>,
    pub next: Option<BlockIx>,
    pub child: Option<BlockIx>,
    pub level: u32,
    pub info: BlockInfo,
    pub hash: u32,
    pub hashed: bool,
    pub done: bool,
}

impl BlockNode {
    fn leaf(kind: BlockType, data: BlockData, offset: i64, length: i64, level: u32, parent: Option<BlockIx>) -> Self {
        BlockNode {
            kind,
            data,
            offset,
            length,
            parent,
            next: None,
            child: None,
            level,
            info: BlockInfo::None,
            hash: 0,
            hashed: false,
            done: false,
        }
    }
}

/// Threads the two I/O surfaces every block operation may need: the
/// single root file stream, and the manager owning every hybrid
/// stream. Bundled so tree/parser/transform code doesn't have to pass
/// both separately through every call.
pub struct Io<'a> {
    pub file: &'a mut FileStream,
    pub manager: &'a mut Manager,
}

impl Io<'_> {
    pub fn seek(&mut self, data: BlockData, offset: i64) -> bool {
        match data {
            BlockData::File => self.file.seek(offset),
            BlockData::Hybrid(ix) => self.manager.seek(ix, offset) == offset,
        }
    }

    pub fn read(&mut self, data: BlockData, buf: &mut [u8]) -> usize {
        match data {
            BlockData::File => self.file.read(buf),
            BlockData::Hybrid(ix) => self.manager.read(ix, buf).unwrap_or(0),
        }
    }

    pub fn size(&mut self, data: BlockData) -> i64 {
        match data {
            BlockData::File => self.file.size(),
            BlockData::Hybrid(ix) => self.manager.size(ix),
        }
    }
}

/// Describes a parser's (or the dedup pass's) split of a block,
/// passed to [`Tree::segment`].
pub struct Segmentation {
    pub offset: i64,
    pub length: i64,
    pub kind: BlockType,
    pub info: BlockInfo,
    /// Present if the parser produced a decompressed child stream; the
    /// new child block is given this whole stream as its data.
    pub child_stream: Option<crate::streams::StreamIx>,
}

pub struct Tree {
    nodes: Vec<BlockNode>,
}

impl Tree {
    pub fn new(root_length: i64) -> Self {
        let root = BlockNode::leaf(BlockType::Default, BlockData::File, 0, root_length, 0, None);
        Tree { nodes: vec![root] }
    }

    pub fn root(&self) -> BlockIx {
        BlockIx(0)
    }

    pub fn get(&self, ix: BlockIx) -> &BlockNode {
        &self.nodes[ix.0 as usize]
    }

    pub fn get_mut(&mut self, ix: BlockIx) -> &mut BlockNode {
        &mut self.nodes[ix.0 as usize]
    }

    fn push(&mut self, node: BlockNode) -> BlockIx {
        self.nodes.push(node);
        BlockIx(self.nodes.len() as u32 - 1)
    }

    fn increment_refcount(&mut self, data: BlockData, manager: &mut Manager) {
        if let BlockData::Hybrid(ix) = data {
            manager.get_mut(ix).reference_count += 1;
        }
    }

    /// Three-way split. Returns the block to continue
    /// scanning from (the new tail, or the original `self.next`).
    pub fn segment(&mut self, ix: BlockIx, seg: Segmentation, io: &mut Io) -> Option<BlockIx> {
        let (original_offset, original_length, original_kind, original_data, original_level, original_parent, original_next) = {
            let n = self.get(ix);
            (n.offset, n.length, n.kind, n.data, n.level, n.parent, n.next)
        };
        let original_end = original_offset + original_length;

        if seg.offset > original_offset {
            // `ix` keeps the earliest piece (the left prefix); the
            // matched segment gets a freshly allocated index.
            let left = BlockNode::leaf(original_kind, original_data, original_offset, seg.offset - original_offset, original_level, original_parent);
            self.increment_refcount(original_data, io.manager);
            let matched_ix = self.push(BlockNode::leaf(seg.kind, original_data, seg.offset, seg.length, original_level, original_parent));
            *self.get_mut(ix) = left;
            self.get_mut(ix).next = Some(matched_ix);
            self.finish_segment(matched_ix, seg, original_end, original_kind, original_data, original_level, original_parent, original_next, io)
        } else {
            let node = self.get_mut(ix);
            node.offset = seg.offset;
            node.length = seg.length;
            node.kind = seg.kind;
            self.finish_segment(ix, seg, original_end, original_kind, original_data, original_level, original_parent, original_next, io)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_segment(
        &mut self,
        matched_ix: BlockIx,
        seg: Segmentation,
        original_end: i64,
        original_kind: BlockType,
        original_data: BlockData,
        original_level: u32,
        original_parent: Option<BlockIx>,
        original_next: Option<BlockIx>,
        io: &mut Io,
    ) -> Option<BlockIx> {
        self.get_mut(matched_ix).info = seg.info;
        self.hash(matched_ix, io);
        self.get_mut(matched_ix).done = true;

        let tail_end = seg.offset + seg.length;
        let continuation = if tail_end < original_end {
            let tail = BlockNode::leaf(original_kind, original_data, tail_end, original_end - tail_end, original_level, original_parent);
            let tail_ix = self.push(BlockNode { next: original_next, ..tail });
            self.increment_refcount(original_data, io.manager);
            self.get_mut(matched_ix).next = Some(tail_ix);
            Some(tail_ix)
        } else {
            self.get_mut(matched_ix).next = original_next;
            original_next
        };

        if let Some(child_stream) = seg.child_stream {
            let child_size = io.manager.size(child_stream);
            let child_ix = self.push(BlockNode::leaf(
                BlockType::Default,
                BlockData::Hybrid(child_stream),
                0,
                child_size,
                original_level + 1,
                Some(matched_ix),
            ));
            self.get_mut(matched_ix).child = Some(child_ix);
        }

        continuation
    }

    /// Next node in preorder DFS (child, else sibling, else nearest
    /// ancestor's sibling), with no level filtering.
    fn raw_next(&self, ix: BlockIx) -> Option<BlockIx> {
        let node = self.get(ix);
        if let Some(c) = node.child {
            return Some(c);
        }
        if let Some(n) = node.next {
            return Some(n);
        }
        let mut p = node.parent;
        while let Some(pix) = p {
            let pnode = self.get(pix);
            if let Some(pn) = pnode.next {
                return Some(pn);
            }
            p = pnode.parent;
        }
        None
    }

    /// Like [`Tree::next`] but includes `start` itself in the check —
    /// used to begin a level-scan from the root.
    pub fn first_from(&self, start: BlockIx, level: u32, skip_done: bool) -> Option<BlockIx> {
        let node = self.get(start);
        if node.level == level && node.kind != BlockType::Dedup && !(skip_done && node.done) {
            return Some(start);
        }
        self.next(start, level, skip_done)
    }

    /// First block at `level` anywhere in the tree.
    pub fn first(&self, level: u32, skip_done: bool) -> Option<BlockIx> {
        self.first_from(self.root(), level, skip_done)
    }

    /// Next block at `level`, skipping Dedup blocks and (by default)
    /// finalized (`done`) blocks.
    pub fn next(&self, start: BlockIx, level: u32, skip_done: bool) -> Option<BlockIx> {
        let mut cur = self.raw_next(start);
        while let Some(ix) = cur {
            let node = self.get(ix);
            if node.level == level && node.kind != BlockType::Dedup && !(skip_done && node.done) {
                return Some(ix);
            }
            cur = self.raw_next(ix);
        }
        None
    }

    /// CRC32 of the block's current byte range: polynomial
    /// 0xEDB88320, reflected, seed/final-XOR 0xFFFFFFFF — exactly the
    /// IEEE CRC-32 that `crc32fast` implements.
    pub fn hash(&mut self, ix: BlockIx, io: &mut Io) {
        let (data, offset, length) = {
            let n = self.get(ix);
            (n.data, n.offset, n.length)
        };
        if !io.seek(data, offset) {
            return;
        }
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = [0u8; 4096];
        let mut remaining = length;
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as i64) as usize;
            let n = io.read(data, &mut buf[..chunk]);
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            remaining -= n as i64;
        }
        let node = self.get_mut(ix);
        node.hash = hasher.finalize();
        node.hashed = true;
    }

    pub fn delete_info(&mut self, ix: BlockIx) {
        self.get_mut(ix).info = BlockInfo::None;
    }

    /// Frees a block's child subtree, releasing each child's hybrid
    /// stream reference (deleting the stream outright if nothing else
    /// references it).
    pub fn delete_childs(&mut self, ix: BlockIx, manager: &mut Manager) {
        let Some(mut cur) = self.get(ix).child else { return };
        loop {
            let (next, child, data, offset, length) = {
                let n = self.get(cur);
                (n.next, n.child, n.data, n.offset, n.length)
            };
            if let Some(c) = child {
                self.delete_childs_from(c, manager);
            }
            if let BlockData::Hybrid(stream_ix) = data {
                let whole = offset == 0 && length == manager.size(stream_ix);
                let stream = manager.get_mut(stream_ix);
                if whole {
                    manager.delete(stream_ix);
                } else if stream.reference_count > 0 {
                    stream.reference_count -= 1;
                }
            }
            match next {
                Some(n) => cur = n,
                None => break,
            }
        }
        self.get_mut(ix).child = None;
    }

    fn delete_childs_from(&mut self, ix: BlockIx, manager: &mut Manager) {
        self.delete_childs(ix, manager);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Regenerates a closed hybrid stream by replaying its parent's
    /// transform, reviving the parent first if needed. A no-op
    /// returning `true` for the root and for already-active streams.
    pub fn revive(&mut self, ix: BlockIx, io: &mut Io) -> bool {
        let node = self.get(ix);
        if node.level == 0 {
            return true;
        }
        let BlockData::Hybrid(stream_ix) = node.data else { return true };
        if io.manager.get(stream_ix).active() {
            return true;
        }
        let parent_ix = node.parent.expect("non-root block must have a parent");
        let parent_level = self.get(parent_ix).level;
        let parent_active = if parent_level > 0 { self.revive(parent_ix, io) } else { io.file.wake_up() };
        if !parent_active {
            return false;
        }

        let (parent_data, parent_offset, parent_length, parent_kind, parent_info) = {
            let p = self.get(parent_ix);
            (p.data, p.offset, p.length, p.kind, p.info.clone())
        };

        if !io.manager.reallocate(stream_ix) {
            return false;
        }
        if !io.seek(parent_data, parent_offset) {
            return false;
        }
        let mut compressed = vec![0u8; parent_length as usize];
        let n = io.read(parent_data, &mut compressed);
        compressed.truncate(n);

        let raw = match (parent_kind, &parent_info) {
            (BlockType::Deflate, BlockInfo::Deflate(info)) => {
                // The parent bytes were already proven to inflate once, during
                // `DeflateParser::scan`'s original `DeflateTransform::validate` call.
                // Failing here means the bytes changed out from under us or the
                // earlier validation was unsound — not a recoverable condition.
                Some(crate::transforms::deflate::inflate(&compressed, info.raw).expect(
                    "revive: previously-validated deflate block failed to re-inflate",
                ))
            }
            _ => None,
        };
        let Some(raw) = raw else { return false };
        io.manager.seek(stream_ix, 0);
        io.manager.write(stream_ix, &raw).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::FileStream;

    fn scratch_file(bytes: &[u8]) -> (tempfile::NamedTempFile, FileStream) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), bytes).unwrap();
        let fs = FileStream::open(tmp.path(), false).unwrap();
        (tmp, fs)
    }

    #[test]
    fn segment_splits_into_left_matched_tail() {
        let (_tmp, mut fs) = scratch_file(b"0123456789");
        let mut manager = Manager::new(4096, 0).unwrap();
        let mut io = Io { file: &mut fs, manager: &mut manager };
        let mut tree = Tree::new(10);
        let root = tree.root();
        let seg = Segmentation {
            offset: 3,
            length: 4, // covers "3456"
            kind: BlockType::Deflate,
            info: BlockInfo::None,
            child_stream: None,
        };
        let continuation = tree.segment(root, seg, &mut io);
        assert!(continuation.is_some());
        let left = tree.get(root);
        assert_eq!((left.offset, left.length), (0, 3));
        let matched_ix = left.next.unwrap();
        let matched = tree.get(matched_ix);
        assert_eq!((matched.offset, matched.length), (3, 4));
        assert!(matched.done);
        assert!(matched.hashed);
        let tail_ix = matched.next.unwrap();
        let tail = tree.get(tail_ix);
        assert_eq!((tail.offset, tail.length), (7, 3));
        assert_eq!(continuation, Some(tail_ix));
    }

    #[test]
    fn next_skips_done_blocks_at_level() {
        let (_tmp, mut fs) = scratch_file(b"01234567");
        let mut manager = Manager::new(4096, 0).unwrap();
        let mut io = Io { file: &mut fs, manager: &mut manager };
        let mut tree = Tree::new(8);
        let root = tree.root();
        let seg = Segmentation { offset: 0, length: 4, kind: BlockType::Deflate, info: BlockInfo::None, child_stream: None };
        let cont = tree.segment(root, seg, &mut io).unwrap();
        assert_eq!(tree.next(root, 0, true), Some(cont));
    }
}
