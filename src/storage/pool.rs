//! The block-granular allocator (C2) tying [`super::memory::MemoryContainer`]
//! and [`super::disk::DiskContainer`] together behind one `Arena`-based
//! API, grounded on `original_source/storage/pool.{hpp,cpp}`.

use super::disk::DiskContainer;
use super::memory::MemoryContainer;
use super::{exhausted, Arena, AllocationStrategy, ContainerKind, StorageBlock, BLOCK_SIZE};
use crate::storage::Result;

pub struct Pool {
    memory: MemoryContainer,
    disk: Option<DiskContainer>,
}

impl Pool {
    pub fn new(memory_budget: i64, disk_budget: i64) -> Result<Self> {
        let memory = MemoryContainer::new(memory_budget);
        let disk = if disk_budget > 0 {
            Some(DiskContainer::new(disk_budget)?)
        } else {
            None
        };
        Ok(Pool { memory, disk })
    }

    pub fn available(&self) -> i64 {
        self.memory.available() + self.disk.as_ref().map_or(0, |d| d.available())
    }

    pub fn capacity(&self) -> i64 {
        self.memory.capacity() + self.disk.as_ref().map_or(0, |d| d.capacity())
    }

    /// Allocate `size` bytes, rounding up to block granularity.
    /// `strategy` picks the preferred tier; the other tier is used as
    /// spillover if the primary is exhausted. `None` and `Hot` both
    /// mean memory-first.
    pub fn allocate(&mut self, size: i64, strategy: AllocationStrategy) -> Result<Arena> {
        let needed_blocks = (size + BLOCK_SIZE - 1) / BLOCK_SIZE;
        if needed_blocks == 0 {
            return Ok(Arena::default());
        }
        let memory_first = !matches!(strategy, AllocationStrategy::Cold);
        let mut blocks = Vec::with_capacity(needed_blocks as usize);

        let mut remaining = needed_blocks;
        if memory_first {
            remaining = self.take_from_memory(remaining, &mut blocks);
            if remaining > 0 {
                remaining = self.take_from_disk(remaining, &mut blocks)?;
            }
        } else {
            remaining = self.take_from_disk(remaining, &mut blocks)?;
            if remaining > 0 {
                remaining = self.take_from_memory(remaining, &mut blocks);
            }
        }

        if remaining > 0 {
            // Roll back whatever we managed to claim.
            self.deallocate(&Arena { blocks, position: 0 });
            return Err(exhausted(size, self.available()));
        }

        Ok(Arena { blocks, position: 0 })
    }

    fn take_from_memory(&mut self, count: i64, out: &mut Vec<StorageBlock>) -> i64 {
        let got = self.memory.allocate(count);
        let taken = got.len() as i64;
        out.extend(got.into_iter().map(|index| StorageBlock { kind: ContainerKind::Memory, index }));
        count - taken
    }

    fn take_from_disk(&mut self, count: i64, out: &mut Vec<StorageBlock>) -> Result<i64> {
        let Some(disk) = self.disk.as_mut() else {
            return Ok(count);
        };
        let got = disk.allocate(count);
        let taken = got.len() as i64;
        out.extend(got.into_iter().map(|index| StorageBlock { kind: ContainerKind::Disk, index }));
        Ok(count - taken)
    }

    /// Grow (or shrink) `arena` to `new_size` bytes, used to revive a
    /// previously-closed hybrid stream.
    pub fn reallocate(&mut self, arena: &mut Arena, new_size: i64, strategy: AllocationStrategy) -> Result<()> {
        let needed_blocks = (new_size + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let have = arena.blocks.len() as i64;
        if needed_blocks < have {
            let drop: Vec<StorageBlock> = arena.blocks.split_off(needed_blocks as usize);
            self.free_blocks(&drop);
        } else if needed_blocks > have {
            let extra = self.allocate(new_size - have * BLOCK_SIZE, strategy)?;
            arena.blocks.extend(extra.blocks);
        }
        arena.position = arena.position.min(arena.blocks.len() as i64 * BLOCK_SIZE);
        Ok(())
    }

    pub fn deallocate(&mut self, arena: &Arena) {
        self.free_blocks(&arena.blocks);
    }

    fn free_blocks(&mut self, blocks: &[StorageBlock]) {
        let memory: Vec<i64> = blocks.iter().filter(|b| b.kind == ContainerKind::Memory).map(|b| b.index).collect();
        let disk: Vec<i64> = blocks.iter().filter(|b| b.kind == ContainerKind::Disk).map(|b| b.index).collect();
        self.memory.deallocate(&memory);
        if let Some(d) = self.disk.as_mut() {
            d.deallocate(&disk);
        }
    }

    pub fn seek(&self, arena: &mut Arena, offset: i64) -> i64 {
        let clamped = offset.clamp(0, arena.capacity());
        arena.position = clamped;
        clamped
    }

    pub fn read(&mut self, buf: &mut [u8], arena: &mut Arena) -> Result<usize> {
        let mut written = 0usize;
        let mut remaining = buf.len();
        while remaining > 0 && arena.position < arena.capacity() {
            let block_idx = (arena.position / BLOCK_SIZE) as usize;
            let intra = arena.position % BLOCK_SIZE;
            let chunk = remaining.min((BLOCK_SIZE - intra) as usize);
            let block = arena.blocks[block_idx];
            let n = match block.kind {
                ContainerKind::Memory => self.memory.read_block(block.index, intra, &mut buf[written..written + chunk])?,
                ContainerKind::Disk => self
                    .disk
                    .as_mut()
                    .expect("disk block referenced without a disk container")
                    .read_block(block.index, intra, &mut buf[written..written + chunk])?,
            };
            if n == 0 {
                break;
            }
            arena.position += n as i64;
            written += n;
            remaining -= n;
        }
        Ok(written)
    }

    pub fn write(&mut self, buf: &[u8], arena: &mut Arena) -> Result<usize> {
        let mut written = 0usize;
        let mut remaining = buf.len();
        while remaining > 0 && arena.position < arena.capacity() {
            let block_idx = (arena.position / BLOCK_SIZE) as usize;
            let intra = arena.position % BLOCK_SIZE;
            let chunk = remaining.min((BLOCK_SIZE - intra) as usize);
            let block = arena.blocks[block_idx];
            let n = match block.kind {
                ContainerKind::Memory => self.memory.write_block(block.index, intra, &buf[written..written + chunk])?,
                ContainerKind::Disk => self
                    .disk
                    .as_mut()
                    .expect("disk block referenced without a disk container")
                    .write_block(block.index, intra, &buf[written..written + chunk])?,
            };
            arena.position += n as i64;
            written += n;
            remaining -= n;
            if n < chunk {
                break;
            }
        }
        Ok(written)
    }

    /// Atomically migrate every memory-backed block of `arena` to
    /// freshly-reserved disk blocks. On partial failure the arena is
    /// left untouched and `Ok(false)` is returned.
    pub fn move_to_cold_storage(&mut self, arena: &mut Arena) -> Result<bool> {
        let Some(_disk) = self.disk.as_ref() else {
            return Ok(false);
        };
        let memory_positions: Vec<usize> = arena
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.kind == ContainerKind::Memory)
            .map(|(i, _)| i)
            .collect();
        if memory_positions.is_empty() {
            return Ok(true);
        }
        let new_disk_blocks = self.disk.as_mut().unwrap().allocate(memory_positions.len() as i64);
        if new_disk_blocks.len() != memory_positions.len() {
            // Roll back the partial disk claim.
            self.disk.as_mut().unwrap().deallocate(&new_disk_blocks);
            return Ok(false);
        }
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        let mut old_memory_blocks = Vec::with_capacity(memory_positions.len());
        for (&pos, &disk_index) in memory_positions.iter().zip(new_disk_blocks.iter()) {
            let old = arena.blocks[pos];
            self.memory.read_block(old.index, 0, &mut buf)?;
            self.disk.as_mut().unwrap().write_block(disk_index, 0, &buf)?;
            old_memory_blocks.push(old.index);
            arena.blocks[pos] = StorageBlock { kind: ContainerKind::Disk, index: disk_index };
        }
        self.memory.deallocate(&old_memory_blocks);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_spills_to_disk_when_memory_exhausted() {
        let mut pool = Pool::new(BLOCK_SIZE, BLOCK_SIZE * 4).unwrap();
        let arena = pool.allocate(BLOCK_SIZE * 2, AllocationStrategy::None).unwrap();
        assert_eq!(arena.blocks.len(), 2);
        assert!(arena.blocks.iter().any(|b| b.kind == ContainerKind::Memory));
        assert!(arena.blocks.iter().any(|b| b.kind == ContainerKind::Disk));
    }

    #[test]
    fn allocate_fails_cleanly_when_totally_exhausted() {
        let mut pool = Pool::new(BLOCK_SIZE, 0).unwrap();
        let err = pool.allocate(BLOCK_SIZE * 2, AllocationStrategy::None);
        assert!(err.is_err());
        // Memory should be fully available again after the rollback.
        assert_eq!(pool.available(), BLOCK_SIZE);
    }

    #[test]
    fn write_then_read_roundtrip_across_block_boundary() {
        let mut pool = Pool::new(BLOCK_SIZE * 4, 0).unwrap();
        let mut arena = pool.allocate(BLOCK_SIZE * 2, AllocationStrategy::None).unwrap();
        let data: Vec<u8> = (0..(BLOCK_SIZE + 100) as usize).map(|i| (i % 256) as u8).collect();
        pool.write(&data, &mut arena).unwrap();
        pool.seek(&mut arena, 0);
        let mut readback = vec![0u8; data.len()];
        pool.read(&mut readback, &mut arena).unwrap();
        assert_eq!(readback, data);
    }

    #[test]
    fn move_to_cold_storage_preserves_contents() {
        let mut pool = Pool::new(BLOCK_SIZE * 2, BLOCK_SIZE * 2).unwrap();
        let mut arena = pool.allocate(BLOCK_SIZE, AllocationStrategy::None).unwrap();
        let data = vec![7u8; BLOCK_SIZE as usize];
        pool.write(&data, &mut arena).unwrap();
        assert!(pool.move_to_cold_storage(&mut arena).unwrap());
        assert!(arena.blocks.iter().all(|b| b.kind == ContainerKind::Disk));
        pool.seek(&mut arena, 0);
        let mut readback = vec![0u8; BLOCK_SIZE as usize];
        pool.read(&mut readback, &mut arena).unwrap();
        assert_eq!(readback, data);
    }
}
