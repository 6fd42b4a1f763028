//! Uniform byte-addressable stream abstraction (C1), grounded on
//! `original_source/streams/stream.hpp`, `filestream.*`,
//! `hybridstream.*`.
//!
//! Two concrete variants exist: [`file_stream::FileStream`] (wraps a
//! platform file, with sleep/wake to bound open descriptors during
//! deep recursion) and [`hybrid_stream::HybridStream`] (backed by a
//! [`crate::storage::Pool`] arena, owned by a
//! [`crate::storage::Manager`]).
//!
//! `HybridStream` reads/writes always go through the owning manager
//! (single owner, many borrowers), so it does not implement [`Stream`]
//! directly — callers
//! holding a [`BlockData::Hybrid`] handle route operations through
//! `Manager::{read,write,seek,...}_stream`. `FileStream` is
//! self-contained and implements [`Stream`] directly.

pub mod file_stream;
pub mod hybrid_stream;

pub use file_stream::FileStream;
pub use hybrid_stream::{HybridStream, StreamIx};

/// Eviction/retention hint carried by every hybrid stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// Weight used by the Manager's purge cost function:
    /// `cost = (capacity / max(1, reference_count)) * priority_weight`.
    pub fn weight(self) -> i64 {
        self as i64
    }
}

/// Uniform stream capability set. Only `FileStream` implements this
/// directly; hybrid streams are operated on through the `Manager`
/// (see module docs).
pub trait Stream {
    fn seek(&mut self, offset: i64) -> bool;
    fn position(&mut self) -> i64;
    fn size(&mut self) -> i64;
    fn get_byte(&mut self) -> i32;
    fn put_byte(&mut self, b: u8) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, buf: &[u8]) -> usize;
}

/// A handle to either stream variant, used as a `BlockNode`'s `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockData {
    /// The root block's backing file.
    File,
    /// A child block's backing hybrid stream.
    Hybrid(StreamIx),
}
