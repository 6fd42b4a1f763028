//! Pool-backed stream, grounded on
//! `original_source/streams/hybridstream.{hpp,cpp}`.
//!
//! Unlike the source's `HybridStream*`, which directly called through
//! to a shared `Pool`, this is plain data owned by the
//! [`crate::storage::Manager`]; I/O goes through manager methods that
//! take a [`StreamIx`] (see module docs on `streams::mod`).

use crate::storage::{Arena, Holder};
use crate::streams::Priority;

/// Stable handle to a hybrid stream inside a `Manager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamIx(pub u32);

pub struct HybridStream {
    pub arena: Arena,
    pub holder: Holder,
    pub reference_count: u32,
    pub priority: Priority,
    /// Scoped pin: set for the duration of an operation that reads the
    /// stream; the purger excludes pinned streams from eviction. Use
    /// [`crate::streams::hybrid_stream::KeepAliveGuard`] to manage this
    /// safely across early returns.
    pub keep_alive: bool,
}

impl HybridStream {
    pub fn new(arena: Arena) -> Self {
        let capacity = arena.capacity();
        HybridStream {
            arena,
            holder: Holder { capacity, available: capacity },
            reference_count: 0,
            priority: Priority::Normal,
            keep_alive: false,
        }
    }

    /// `Active`: the arena currently holds blocks (not Closed/Dormant).
    pub fn active(&self) -> bool {
        !self.arena.blocks.is_empty()
    }

    pub fn capacity(&self) -> i64 {
        self.holder.capacity
    }

    pub fn size(&self) -> i64 {
        self.holder.capacity - self.holder.available
    }
}

/// RAII guard for the `keep_alive` pin: set on construction, cleared
/// on drop — including on panicking unwinds — so every exit path
/// releases the pin.
pub struct KeepAliveGuard<'a> {
    stream: &'a mut HybridStream,
}

impl<'a> KeepAliveGuard<'a> {
    pub fn new(stream: &'a mut HybridStream) -> Self {
        stream.keep_alive = true;
        KeepAliveGuard { stream }
    }
}

impl Drop for KeepAliveGuard<'_> {
    fn drop(&mut self) {
        self.stream.keep_alive = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_guard_clears_on_drop() {
        let mut hs = HybridStream::new(Arena::default());
        {
            let _guard = KeepAliveGuard::new(&mut hs);
            assert!(hs.keep_alive);
        }
        assert!(!hs.keep_alive);
    }
}
