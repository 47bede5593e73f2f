//! Chunked pool allocator with an in-place free list.
//!
//! Storage grows by appending chunks and never moves existing elements, so a
//! [`PoolSlot`] stays valid until it is released. Released slots are threaded
//! into a LIFO free list and handed out again before new capacity is touched.
//!
//! Two growth policies are supported:
//!
//! - [`PoolGrowth::Doubling`]: chunk `k` holds `2^k` elements, so slot `i`
//!   lives in chunk `floor(log2(i + 1))` at offset `i + 1 - 2^k`.
//! - [`PoolGrowth::Fixed`]: every chunk holds `block` elements, so slot `i`
//!   lives in chunk `i / block` at offset `i % block`.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PoolGrowth
// ---------------------------------------------------------------------------

/// How a [`PoolAllocator`] sizes the chunks it appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolGrowth {
    /// Each new chunk is one larger than the current total capacity.
    #[default]
    Doubling,
    /// Each new chunk holds exactly `block` elements.
    Fixed { block: NonZeroUsize },
}

// ---------------------------------------------------------------------------
// PoolSlot
// ---------------------------------------------------------------------------

/// Stable position of an element inside a [`PoolAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolSlot(usize);

impl PoolSlot {
    /// Flat index across all chunks.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

// ---------------------------------------------------------------------------
// PoolAllocator
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Slot<T> {
    Occupied(T),
    Free { next: Option<usize> },
}

/// Pool of `T` values addressed by [`PoolSlot`].
#[derive(Debug)]
pub struct PoolAllocator<T> {
    chunks: Vec<Vec<Slot<T>>>,
    growth: PoolGrowth,
    /// Total slots across all chunks (constructed or not).
    capacity: usize,
    /// Slots that have been written at least once.
    constructed: usize,
    /// Live elements.
    len: usize,
    free_head: Option<usize>,
}

impl<T> PoolAllocator<T> {
    /// Create an empty pool using doubling growth.
    pub fn new() -> Self {
        Self::with_growth(PoolGrowth::Doubling)
    }

    /// Create an empty pool with an explicit growth policy.
    pub fn with_growth(growth: PoolGrowth) -> Self {
        Self {
            chunks: Vec::new(),
            growth,
            capacity: 0,
            constructed: 0,
            len: 0,
            free_head: None,
        }
    }

    /// Number of live elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots reserved across all chunks.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of backing chunks allocated so far.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// The growth policy chosen at construction.
    pub fn growth(&self) -> PoolGrowth {
        self.growth
    }

    /// Map a flat index to `(chunk, offset)`. `None` if the index cannot be
    /// addressed at all.
    fn locate(&self, index: usize) -> Option<(usize, usize)> {
        match self.growth {
            PoolGrowth::Doubling => {
                let n = index.checked_add(1)?;
                let chunk = (usize::BITS - 1 - n.leading_zeros()) as usize;
                Some((chunk, n - (1usize << chunk)))
            }
            PoolGrowth::Fixed { block } => Some((index / block.get(), index % block.get())),
        }
    }

    fn next_block_size(&self) -> usize {
        match self.growth {
            PoolGrowth::Doubling => self.capacity + 1,
            PoolGrowth::Fixed { block } => block.get(),
        }
    }

    /// Append chunks until at least `needed` slots exist.
    fn reserve(&mut self, needed: usize) {
        while self.capacity < needed {
            let block = self.next_block_size();
            self.chunks.push(Vec::with_capacity(block));
            self.capacity += block;
            tracing::trace!(
                block,
                capacity = self.capacity,
                chunks = self.chunks.len(),
                "pool grew"
            );
        }
    }

    fn slot(&self, index: usize) -> Option<&Slot<T>> {
        let (chunk, offset) = self.locate(index)?;
        self.chunks.get(chunk)?.get(offset)
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Slot<T>> {
        let (chunk, offset) = self.locate(index)?;
        self.chunks.get_mut(chunk)?.get_mut(offset)
    }

    /// Store `value`, reusing the most recently released slot if any.
    pub fn allocate(&mut self, value: T) -> PoolSlot {
        if let Some(index) = self.free_head {
            if let Some(slot) = self.slot_mut(index) {
                let previous = std::mem::replace(slot, Slot::Occupied(value));
                self.free_head = match previous {
                    Slot::Free { next } => next,
                    Slot::Occupied(_) => {
                        tracing::error!(index, "pool free list pointed at a live slot");
                        None
                    }
                };
                self.len += 1;
                return PoolSlot(index);
            }
            tracing::error!(index, "pool free list pointed outside the pool");
            self.free_head = None;
            return self.allocate(value);
        }

        // Chunks fill in order, so the next unconstructed slot is always at
        // the end of the last chunk.
        let index = self.constructed;
        self.reserve(index + 1);
        debug_assert_eq!(
            self.locate(index).map(|(chunk, _)| chunk),
            Some(self.chunks.len() - 1)
        );
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.push(Slot::Occupied(value));
        }
        self.constructed += 1;
        self.len += 1;
        PoolSlot(index)
    }

    /// Return the element at `slot` to the free list, handing back the value.
    ///
    /// Releasing a slot that is already free is a no-op returning `None`.
    pub fn release(&mut self, slot: PoolSlot) -> Option<T> {
        let next = self.free_head;
        let entry = self.slot_mut(slot.0)?;
        if matches!(entry, Slot::Free { .. }) {
            tracing::warn!(index = slot.0, "double release of pool slot");
            return None;
        }
        let previous = std::mem::replace(entry, Slot::Free { next });
        self.free_head = Some(slot.0);
        self.len -= 1;
        match previous {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    /// The live value at `slot`, or `None` once it has been released.
    pub fn get(&self, slot: PoolSlot) -> Option<&T> {
        self.get_element(slot.0)
    }

    /// Mutable access to the live value at `slot`.
    pub fn get_mut(&mut self, slot: PoolSlot) -> Option<&mut T> {
        match self.slot_mut(slot.0)? {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    /// Look up an element by flat index. Indices past the constructed range
    /// (or not addressable at all) yield `None`.
    pub fn get_element(&self, index: usize) -> Option<&T> {
        match self.slot(index)? {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }
}

impl<T> Default for PoolAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_chunks_follow_powers_of_two() {
        let mut pool = PoolAllocator::new();
        for i in 0..7 {
            pool.allocate(i);
        }
        // Chunks of 1, 2 and 4 elements.
        assert_eq!(pool.chunk_count(), 3);
        assert_eq!(pool.capacity(), 7);
        pool.allocate(7);
        assert_eq!(pool.chunk_count(), 4);
        assert_eq!(pool.capacity(), 15);
    }

    #[test]
    fn doubling_index_math() {
        let pool: PoolAllocator<u8> = PoolAllocator::new();
        assert_eq!(pool.locate(0), Some((0, 0)));
        assert_eq!(pool.locate(1), Some((1, 0)));
        assert_eq!(pool.locate(2), Some((1, 1)));
        assert_eq!(pool.locate(3), Some((2, 0)));
        assert_eq!(pool.locate(6), Some((2, 3)));
        assert_eq!(pool.locate(7), Some((3, 0)));
    }

    #[test]
    fn fixed_index_math() {
        let block = NonZeroUsize::new(4).unwrap();
        let mut pool = PoolAllocator::with_growth(PoolGrowth::Fixed { block });
        assert_eq!(pool.locate(5), Some((1, 1)));
        for i in 0..9 {
            pool.allocate(i);
        }
        assert_eq!(pool.chunk_count(), 3);
        assert_eq!(pool.capacity(), 12);
        assert_eq!(pool.get_element(5), Some(&5));
    }

    #[test]
    fn out_of_range_index_yields_none() {
        let mut pool = PoolAllocator::new();
        pool.allocate(1u32);
        assert_eq!(pool.locate(usize::MAX), None);
        assert_eq!(pool.get_element(usize::MAX), None);
        assert_eq!(pool.get_element(1), None);
        assert_eq!(pool.get_mut(PoolSlot(usize::MAX)), None);
        assert_eq!(pool.release(PoolSlot(usize::MAX)), None);
        assert_eq!(pool.len(), 1);

        let block = NonZeroUsize::new(3).unwrap();
        let mut fixed = PoolAllocator::with_growth(PoolGrowth::Fixed { block });
        fixed.allocate(1u32);
        assert_eq!(fixed.get_element(usize::MAX), None);
    }

    #[test]
    fn released_slot_is_reused_first() {
        let mut pool = PoolAllocator::new();
        let a = pool.allocate("a");
        let b = pool.allocate("b");
        let _c = pool.allocate("c");
        assert_eq!(pool.release(a), Some("a"));
        assert_eq!(pool.release(b), Some("b"));
        assert_eq!(pool.len(), 1);

        // LIFO: b first, then a.
        assert_eq!(pool.allocate("d"), b);
        assert_eq!(pool.allocate("e"), a);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(a), Some(&"e"));
    }

    #[test]
    fn double_release_is_rejected() {
        let mut pool = PoolAllocator::new();
        let a = pool.allocate(1u32);
        assert_eq!(pool.release(a), Some(1));
        assert_eq!(pool.release(a), None);
        assert_eq!(pool.len(), 0);
        assert!(pool.get(a).is_none());
    }

    #[test]
    fn elements_do_not_move_on_growth() {
        let mut pool = PoolAllocator::new();
        let first = pool.allocate(String::from("stable"));
        for i in 0..100 {
            pool.allocate(i.to_string());
        }
        assert_eq!(pool.get(first).map(String::as_str), Some("stable"));
        if let Some(value) = pool.get_mut(first) {
            value.push('!');
        }
        assert_eq!(pool.get(first).map(String::as_str), Some("stable!"));
    }
}
