//! Memory-backed container: one contiguous heap buffer divided into
//! [`BLOCK_SIZE`] blocks, grounded on
//! `original_source/storage/memorycontainer.{hpp,cpp}`.

use super::{exhausted, BLOCK_SIZE};
use crate::storage::Result;
use std::collections::HashSet;

pub struct MemoryContainer {
    buffer: Vec<u8>,
    total_blocks: i64,
    free: HashSet<i64>,
}

impl MemoryContainer {
    pub fn new(capacity_bytes: i64) -> Self {
        let total_blocks = (capacity_bytes + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let buffer = vec![0u8; (total_blocks * BLOCK_SIZE) as usize];
        let free = (0..total_blocks).collect();
        MemoryContainer { buffer, total_blocks, free }
    }

    pub fn capacity(&self) -> i64 {
        self.total_blocks * BLOCK_SIZE
    }

    pub fn available(&self) -> i64 {
        self.free.len() as i64 * BLOCK_SIZE
    }

    /// Claim up to `count` free blocks (fewer if exhausted); returns the
    /// block indices actually allocated.
    pub fn allocate(&mut self, count: i64) -> Vec<i64> {
        let mut out = Vec::with_capacity(count as usize);
        let take: Vec<i64> = self.free.iter().take(count as usize).copied().collect();
        for idx in take {
            self.free.remove(&idx);
            out.push(idx);
        }
        out
    }

    pub fn deallocate(&mut self, blocks: &[i64]) {
        for &idx in blocks {
            self.free.insert(idx);
        }
    }

    pub fn read_block(&self, block_index: i64, intra_offset: i64, buf: &mut [u8]) -> Result<usize> {
        let base = (block_index * BLOCK_SIZE + intra_offset) as usize;
        if base >= self.buffer.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.buffer.len() - base);
        buf[..n].copy_from_slice(&self.buffer[base..base + n]);
        Ok(n)
    }

    pub fn write_block(&mut self, block_index: i64, intra_offset: i64, data: &[u8]) -> Result<usize> {
        let base = (block_index * BLOCK_SIZE + intra_offset) as usize;
        if base >= self.buffer.len() {
            return Err(exhausted(data.len() as i64, 0));
        }
        let n = data.len().min(self.buffer.len() - base);
        self.buffer[base..base + n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_deallocate_tracks_availability() {
        let mut c = MemoryContainer::new(BLOCK_SIZE * 4);
        assert_eq!(c.available(), BLOCK_SIZE * 4);
        let blocks = c.allocate(2);
        assert_eq!(blocks.len(), 2);
        assert_eq!(c.available(), BLOCK_SIZE * 2);
        c.deallocate(&blocks);
        assert_eq!(c.available(), BLOCK_SIZE * 4);
    }

    #[test]
    fn read_write_roundtrip() {
        let mut c = MemoryContainer::new(BLOCK_SIZE);
        let blocks = c.allocate(1);
        let data = b"hello world";
        c.write_block(blocks[0], 0, data).unwrap();
        let mut buf = vec![0u8; data.len()];
        c.read_block(blocks[0], 0, &mut buf).unwrap();
        assert_eq!(&buf, data);
    }
}
