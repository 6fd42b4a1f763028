//! Disk-backed container: a temporary file pre-sized to the disk-tier
//! budget on creation, grounded on
//! `original_source/storage/diskcontainer.{hpp,cpp}`. Free/used blocks
//! are tracked in a `BTreeSet` (not a hash set) so that allocation
//! prefers the lowest free index, keeping the active set dense at low
//! offsets — the source's rationale for using an ordered `std::map`
//! here instead of the unordered map `MemoryContainer` uses.

use super::{exhausted, BLOCK_SIZE};
use crate::storage::Result;
use std::collections::BTreeSet;
use std::io::{Read, Seek, SeekFrom, Write};

pub struct DiskContainer {
    file: tempfile::NamedTempFile,
    total_blocks: i64,
    free: BTreeSet<i64>,
}

impl DiskContainer {
    pub fn new(capacity_bytes: i64) -> Result<Self> {
        let total_blocks = (capacity_bytes + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let file = tempfile::NamedTempFile::new()?;
        let size = total_blocks * BLOCK_SIZE;
        // Pre-allocate: try the fast sparse path (set_len), falling back
        // to an explicit zero-fill if the filesystem doesn't support it.
        if file.as_file().set_len(size as u64).is_err() {
            let mut f = file.as_file();
            f.seek(SeekFrom::Start(0))?;
            let zeros = vec![0u8; BLOCK_SIZE as usize];
            let mut remaining = size;
            while remaining > 0 {
                let chunk = remaining.min(BLOCK_SIZE) as usize;
                f.write_all(&zeros[..chunk])?;
                remaining -= chunk as i64;
            }
        }
        let free = (0..total_blocks).collect();
        Ok(DiskContainer { file, total_blocks, free })
    }

    pub fn capacity(&self) -> i64 {
        self.total_blocks * BLOCK_SIZE
    }

    pub fn available(&self) -> i64 {
        self.free.len() as i64 * BLOCK_SIZE
    }

    pub fn allocate(&mut self, count: i64) -> Vec<i64> {
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if let Some(&idx) = self.free.iter().next() {
                self.free.remove(&idx);
                out.push(idx);
            } else {
                break;
            }
        }
        out
    }

    pub fn deallocate(&mut self, blocks: &[i64]) {
        for &idx in blocks {
            self.free.insert(idx);
        }
    }

    pub fn read_block(&mut self, block_index: i64, intra_offset: i64, buf: &mut [u8]) -> Result<usize> {
        let offset = block_index * BLOCK_SIZE + intra_offset;
        let f = self.file.as_file_mut();
        f.seek(SeekFrom::Start(offset as u64))?;
        let n = f.read(buf)?;
        Ok(n)
    }

    pub fn write_block(&mut self, block_index: i64, intra_offset: i64, data: &[u8]) -> Result<usize> {
        let offset = block_index * BLOCK_SIZE + intra_offset;
        if offset + data.len() as i64 > self.total_blocks * BLOCK_SIZE {
            return Err(exhausted(data.len() as i64, 0));
        }
        let f = self.file.as_file_mut();
        f.seek(SeekFrom::Start(offset as u64))?;
        f.write_all(data)?;
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_prefers_lowest_index() {
        let mut c = DiskContainer::new(BLOCK_SIZE * 4).unwrap();
        let a = c.allocate(1);
        let b = c.allocate(1);
        assert!(a[0] < b[0]);
        c.deallocate(&a);
        let c2 = c.allocate(1);
        assert_eq!(c2[0], a[0]);
    }

    #[test]
    fn read_write_roundtrip() {
        let mut c = DiskContainer::new(BLOCK_SIZE).unwrap();
        let blocks = c.allocate(1);
        let data = b"some disk-backed bytes";
        c.write_block(blocks[0], 0, data).unwrap();
        let mut buf = vec![0u8; data.len()];
        c.read_block(blocks[0], 0, &mut buf).unwrap();
        assert_eq!(&buf, data);
    }
}
