//! Sparse set of 64-bit ids with O(1) add, remove and membership.
//!
//! `dense` holds the live ids packed from slot 1; slot 0 is reserved as the
//! "not present" sentinel, so the logical size starts at 1. `sparse` maps an
//! id back to its dense slot. Both arrays start with room for two entries and
//! double when they run out.
//!
//! Invariant: for every `i` in `1..size`, `sparse[dense[i]] == i`, and
//! `has(id)` holds iff `sparse[id] < size && dense[sparse[id]] == id`.

const INITIAL_CAPACITY: usize = 2;

#[derive(Debug, Clone)]
pub struct SparseSet {
    dense: Vec<u64>,
    sparse: Vec<usize>,
    size: usize,
}

impl SparseSet {
    /// Create an empty set with room for two entries.
    pub fn new() -> Self {
        Self {
            dense: vec![0; INITIAL_CAPACITY],
            sparse: vec![0; INITIAL_CAPACITY],
            size: 1,
        }
    }

    /// Number of ids in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.size - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 1
    }

    /// Logical size including the reserved slot 0.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Physical length of the dense array. Never shrinks.
    pub fn dense_capacity(&self) -> usize {
        self.dense.len()
    }

    /// Physical length of the sparse array, i.e. one past the largest id it
    /// can index without growing.
    pub fn sparse_capacity(&self) -> usize {
        self.sparse.len()
    }

    fn sparse_index(id: u64) -> Option<usize> {
        usize::try_from(id).ok()
    }

    /// Whether `id` is in the set. Always `false` for the reserved id `0`.
    pub fn has(&self, id: u64) -> bool {
        if id == 0 {
            return false;
        }
        let Some(index) = Self::sparse_index(id) else {
            return false;
        };
        match self.sparse.get(index) {
            Some(&slot) => slot < self.size && self.dense[slot] == id,
            None => false,
        }
    }

    /// Dense slot of `id`, or `0` when absent.
    pub fn find(&self, id: u64) -> usize {
        if !self.has(id) {
            return 0;
        }
        Self::sparse_index(id)
            .and_then(|index| self.sparse.get(index).copied())
            .unwrap_or(0)
    }

    /// Id stored at dense `slot`, or `0` when the slot is out of range.
    pub fn at(&self, slot: usize) -> u64 {
        if slot >= self.size {
            return 0;
        }
        self.dense[slot]
    }

    /// Append `id`, returning its dense slot.
    ///
    /// Ids below 1, and ids too large to index, are rejected with an error
    /// log and `0` is returned. Adding an id that is already present returns
    /// its existing slot.
    pub fn add(&mut self, id: u64) -> usize {
        if id < 1 {
            tracing::error!(id, "sparse set rejected reserved id");
            return 0;
        }
        let Some(index) = Self::sparse_index(id) else {
            tracing::error!(id, "sparse set id does not fit in memory");
            return 0;
        };
        if self.has(id) {
            return self.sparse[index];
        }

        let slot = self.size;
        if index >= self.sparse.len() && !Self::grow(&mut self.sparse, index) {
            tracing::error!(id, "sparse set cannot grow to hold id");
            return 0;
        }
        if slot >= self.dense.len() && !Self::grow(&mut self.dense, slot) {
            tracing::error!(id, "sparse set dense array cannot grow");
            return 0;
        }
        self.dense[slot] = id;
        self.sparse[index] = slot;
        self.size += 1;
        slot
    }

    /// Remove `id`, moving the last dense entry into the freed slot.
    ///
    /// Returns the slot that was vacated, or `0` if `id` was invalid or
    /// absent.
    pub fn remove(&mut self, id: u64) -> usize {
        if id < 1 {
            tracing::error!(id, "sparse set rejected reserved id");
            return 0;
        }
        if !self.has(id) {
            return 0;
        }
        let slot = self.find(id);
        let last = self.size - 1;
        let moved = self.dense[last];
        self.dense[slot] = moved;
        if let Some(moved_index) = Self::sparse_index(moved) {
            self.sparse[moved_index] = slot;
        }
        self.dense[last] = 0;
        self.size -= 1;
        slot
    }

    /// Drop every id without shrinking the arrays.
    pub fn clear(&mut self) {
        self.size = 1;
    }

    /// Live ids in dense order.
    pub fn ids(&self) -> &[u64] {
        &self.dense[1..self.size]
    }

    /// Live ids by value, in dense order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids().iter().copied()
    }

    /// Double `values` until `needed` is a valid index. Returns `false`,
    /// leaving `values` untouched, if that size cannot be represented or
    /// allocated.
    fn grow<V: Copy + Default>(values: &mut Vec<V>, needed: usize) -> bool {
        let mut target = values.len().max(INITIAL_CAPACITY);
        while target <= needed {
            match target.checked_mul(2) {
                Some(next) => target = next,
                None => return false,
            }
        }
        if values.try_reserve_exact(target - values.len()).is_err() {
            return false;
        }
        tracing::trace!(from = values.len(), to = target, "sparse set grew");
        values.resize(target, V::default());
        true
    }
}

impl Default for SparseSet {
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
    fn new_set_has_reserved_slot() {
        let set = SparseSet::new();
        assert_eq!(set.size(), 1);
        assert_eq!(set.len(), 0);
        assert!(!set.has(0));
        assert_eq!(set.at(0), 0);
        assert_eq!(set.dense_capacity(), 2);
    }

    #[test]
    fn add_then_has() {
        let mut set = SparseSet::new();
        assert_eq!(set.add(7), 1);
        assert_eq!(set.add(3), 2);
        assert!(set.has(7));
        assert!(set.has(3));
        assert!(!set.has(4));
        assert_eq!(set.find(3), 2);
        assert_eq!(set.at(1), 7);
        assert_eq!(set.ids(), &[7, 3]);
    }

    #[test]
    fn add_rejects_zero() {
        let mut set = SparseSet::new();
        assert_eq!(set.add(0), 0);
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn add_rejects_ids_too_large_to_index() {
        let mut set = SparseSet::new();
        set.add(4);
        let sparse_before = set.sparse_capacity();
        for id in [u64::MAX, 1 << 63, 1 << 62] {
            assert_eq!(set.add(id), 0);
            assert!(!set.has(id));
        }
        assert_eq!(set.len(), 1);
        assert_eq!(set.sparse_capacity(), sparse_before);
        assert_eq!(set.add(5), 2);
    }

    #[test]
    fn duplicate_add_returns_existing_slot() {
        let mut set = SparseSet::new();
        set.add(5);
        set.add(9);
        assert_eq!(set.add(5), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_swaps_last_into_hole() {
        let mut set = SparseSet::new();
        for id in [10, 20, 30] {
            set.add(id);
        }
        assert_eq!(set.remove(10), 1);
        assert_eq!(set.size(), 3);
        assert!(!set.has(10));
        assert_eq!(set.at(1), 30);
        assert_eq!(set.find(30), 1);
        assert_eq!(set.find(20), 2);
    }

    #[test]
    fn remove_last_element() {
        let mut set = SparseSet::new();
        set.add(4);
        set.add(8);
        assert_eq!(set.remove(8), 2);
        assert!(!set.has(8));
        assert!(set.has(4));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_absent_or_invalid_is_noop() {
        let mut set = SparseSet::new();
        set.add(4);
        assert_eq!(set.remove(0), 0);
        assert_eq!(set.remove(99), 0);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn arrays_double_on_growth() {
        let mut set = SparseSet::new();
        set.add(1);
        set.add(2);
        assert_eq!(set.dense_capacity(), 4);
        set.add(100);
        assert!(set.sparse_capacity() > 100);
        assert!(set.sparse_capacity().is_power_of_two());
    }

    #[test]
    fn clear_resets_membership() {
        let mut set = SparseSet::new();
        set.add(3);
        set.add(5);
        set.clear();
        assert!(set.is_empty());
        assert!(!set.has(3));
        assert_eq!(set.add(5), 1);
    }
}
