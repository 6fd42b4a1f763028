//! Two-tier (memory + temporary disk) block storage (C2), grounded on
//! `original_source/storage/storage.hpp`, `container.hpp`,
//! `memorycontainer.*`, `diskcontainer.*`.
//!
//! Everything here is allocated in fixed [`BLOCK_SIZE`] units; a
//! [`Pool`] hands out [`Arena`]s (ordered lists of blocks plus a
//! cursor) and a [`manager::Manager`] owns the set of live
//! [`crate::streams::HybridStream`]s backed by those arenas.

pub mod disk;
pub mod manager;
pub mod memory;
pub mod pool;

pub use manager::Manager;
pub use pool::Pool;

use crate::error::{StorageError, StorageResult};

/// Fixed block granularity for both containers.
pub const BLOCK_SIZE: i64 = 4096;

/// Which container a [`StorageBlock`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Memory,
    Disk,
}

/// One 4 KiB unit of backing storage: which container, and which
/// block index within it (byte offset = `index * BLOCK_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBlock {
    pub kind: ContainerKind,
    pub index: i64,
}

/// Controls which container an allocation prefers.
///
/// `None` and `Hot` both mean memory-first (`Hot` is wired through from
/// the caller — see `Manager::allocate_with_strategy` — rather than
/// left unreachable); `Cold` means disk-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStrategy {
    #[default]
    None,
    Hot,
    Cold,
}

/// Ordered address space backing one logical hybrid stream: a list of
/// storage blocks (insertion order == logical byte order) plus a
/// read/write cursor.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    pub blocks: Vec<StorageBlock>,
    pub position: i64,
}

impl Arena {
    pub fn capacity(&self) -> i64 {
        self.blocks.len() as i64 * BLOCK_SIZE
    }
}

/// Common capacity/availability bookkeeping shared by every hybrid
/// stream, mirroring the source's `Storage::Holder` base.
#[derive(Debug, Clone, Copy, Default)]
pub struct Holder {
    pub capacity: i64,
    pub available: i64,
}

pub(crate) fn exhausted(requested: i64, available: i64) -> StorageError {
    StorageError::Exhausted { requested, available }
}

pub(crate) fn corrupted(msg: impl Into<String>) -> StorageError {
    StorageError::Corrupted(msg.into())
}

pub(crate) type Result<T> = StorageResult<T>;
