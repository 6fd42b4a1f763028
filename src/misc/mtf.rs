//! Move-to-front list over a fixed-size index space, ported from
//! `original_source/misc/mtflist.hpp`. Used by the deflate transform
//! to keep the 81 zlib parameter candidates ordered by recency of
//! success, halving steady-state search on uniform inputs.

const NIL: usize = usize::MAX;

pub struct MtfList {
    prev: Vec<usize>,
    next: Vec<usize>,
    root: usize,
    cursor: usize,
}

impl MtfList {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "MTF list size must be positive");
        let mut prev = Vec::with_capacity(size);
        let mut next = Vec::with_capacity(size);
        for i in 0..size {
            prev.push(i.wrapping_sub(1));
            next.push(i + 1);
        }
        if let Some(last) = next.last_mut() {
            *last = NIL;
        }
        MtfList {
            prev,
            next,
            root: 0,
            cursor: 0,
        }
    }

    /// Reset the cursor to the front of the list and return it.
    pub fn first(&mut self) -> usize {
        self.cursor = self.root;
        self.cursor
    }

    /// Advance the cursor, returning `usize::MAX` past the end.
    pub fn next(&mut self) -> usize {
        if self.cursor != NIL {
            self.cursor = self.next[self.cursor];
        }
        self.cursor
    }

    /// Promote index `i` to the front of the list.
    pub fn update(&mut self, i: usize) {
        self.cursor = i;
        if i == self.root {
            return;
        }
        let previous = self.prev[i];
        let nxt = self.next[i];
        if previous != NIL {
            self.next[previous] = nxt;
        }
        if nxt != NIL {
            self.prev[nxt] = previous;
        }
        self.prev[self.root] = i;
        self.next[i] = self.root;
        self.root = i;
        self.prev[self.root] = NIL;
    }
}

pub const NIL_INDEX: usize = NIL;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_insertion_order() {
        let mut list = MtfList::new(4);
        let mut order = Vec::new();
        let mut i = list.first();
        while i != NIL_INDEX {
            order.push(i);
            i = list.next();
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn update_promotes_to_front() {
        let mut list = MtfList::new(4);
        list.update(2);
        let mut order = Vec::new();
        let mut i = list.first();
        while i != NIL_INDEX {
            order.push(i);
            i = list.next();
        }
        assert_eq!(order[0], 2);
        assert_eq!(order.len(), 4);
    }
}
