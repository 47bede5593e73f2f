//! Monotonic 64-bit id generation.
//!
//! Ids start at [`FIRST_ID`]; the values below it are reserved (`0` means
//! "no entity", and the low values stay free for sentinels). Ids are never
//! recycled. Once the counter wraps back to zero every further request fails
//! with [`EcsError::IdSpaceExhausted`].
//!
//! Two generators share the same arithmetic:
//!
//! - [`IdGenerator`] is the plain single-owner variant used for tags and
//!   subscriber keys, which are only minted during `&mut World` setup.
//! - [`SyncIdGenerator`] guards its counter with a `parking_lot::Mutex` so
//!   entity ids can be minted from many threads during the execute phase.

use parking_lot::Mutex;

use crate::EcsError;

/// The first id handed out by a fresh generator.
pub const FIRST_ID: u64 = 3;

// ---------------------------------------------------------------------------
// IdRange
// ---------------------------------------------------------------------------

/// A contiguous block of ids reserved in a single call.
///
/// `start` is inclusive, `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

impl IdRange {
    /// Number of ids in the block.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Iterate the ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> {
        self.start..self.end
    }
}

// ---------------------------------------------------------------------------
// Shared counter arithmetic
// ---------------------------------------------------------------------------

fn take_one(current: &mut u64) -> Result<u64, EcsError> {
    let id = *current;
    if id == 0 {
        tracing::error!("id space exhausted");
        return Err(EcsError::IdSpaceExhausted);
    }
    *current = id.wrapping_add(1);
    Ok(id)
}

fn take_range(current: &mut u64, count: u64) -> Result<IdRange, EcsError> {
    let start = *current;
    if start == 0 {
        tracing::error!(count, "id space exhausted");
        return Err(EcsError::IdSpaceExhausted);
    }
    // The final id (u64::MAX) is reachable through `take_one` but a range
    // ending on it would need an exclusive bound of 2^64.
    let end = start.checked_add(count).ok_or_else(|| {
        tracing::error!(start, count, "id range would overflow");
        EcsError::IdSpaceExhausted
    })?;
    *current = end;
    Ok(IdRange { start, end })
}

// ---------------------------------------------------------------------------
// IdGenerator
// ---------------------------------------------------------------------------

/// Single-owner id generator.
#[derive(Debug)]
pub struct IdGenerator {
    current: u64,
}

impl IdGenerator {
    /// Generator whose first id is 3.
    pub fn new() -> Self {
        Self { current: FIRST_ID }
    }

    /// Start counting from an arbitrary value. `0` yields an already
    /// exhausted generator.
    pub fn starting_at(next: u64) -> Self {
        Self { current: next }
    }

    /// Hand out the next id.
    pub fn next_id(&mut self) -> Result<u64, EcsError> {
        take_one(&mut self.current)
    }

    /// Reserve `count` consecutive ids.
    pub fn next_range(&mut self, count: u64) -> Result<IdRange, EcsError> {
        take_range(&mut self.current, count)
    }

    /// The id the next call to [`next_id`](Self::next_id) would return.
    pub fn peek(&self) -> u64 {
        self.current
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// SyncIdGenerator
// ---------------------------------------------------------------------------

/// Thread-safe id generator. Every call takes the lock exactly once, so two
/// concurrent callers can never observe the same id.
#[derive(Debug)]
pub struct SyncIdGenerator {
    current: Mutex<u64>,
}

impl SyncIdGenerator {
    /// Thread-safe generator whose first id is 3.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(FIRST_ID),
        }
    }

    /// Thread-safe generator whose first id is `next`.
    pub fn starting_at(next: u64) -> Self {
        Self {
            current: Mutex::new(next),
        }
    }

    /// Mint the next id under the lock.
    pub fn next_id(&self) -> Result<u64, EcsError> {
        take_one(&mut self.current.lock())
    }

    /// Reserve `count` consecutive ids under the lock.
    pub fn next_range(&self, count: u64) -> Result<IdRange, EcsError> {
        take_range(&mut self.current.lock(), count)
    }

    /// The id the next call would return.
    pub fn peek(&self) -> u64 {
        *self.current.lock()
    }
}

impl Default for SyncIdGenerator {
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
    use std::collections::HashSet;

    #[test]
    fn starts_at_three_and_increments() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next_id().unwrap(), 3);
        assert_eq!(ids.next_id().unwrap(), 4);
        assert_eq!(ids.peek(), 5);
    }

    #[test]
    fn range_is_contiguous_and_advances_counter() {
        let mut ids = IdGenerator::new();
        let range = ids.next_range(4).unwrap();
        assert_eq!(range, IdRange { start: 3, end: 7 });
        assert_eq!(range.len(), 4);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
        assert_eq!(ids.next_id().unwrap(), 7);
    }

    #[test]
    fn empty_range_does_not_advance() {
        let mut ids = IdGenerator::new();
        let range = ids.next_range(0).unwrap();
        assert!(range.is_empty());
        assert_eq!(ids.next_id().unwrap(), 3);
    }

    #[test]
    fn wraparound_is_an_error() {
        let mut ids = IdGenerator::starting_at(u64::MAX);
        assert_eq!(ids.next_id().unwrap(), u64::MAX);
        assert!(matches!(ids.next_id(), Err(EcsError::IdSpaceExhausted)));
        // Stays exhausted.
        assert!(matches!(ids.next_id(), Err(EcsError::IdSpaceExhausted)));
    }

    #[test]
    fn range_overflow_is_an_error() {
        let mut ids = IdGenerator::starting_at(u64::MAX - 1);
        assert!(matches!(ids.next_range(5), Err(EcsError::IdSpaceExhausted)));
        // A failed range leaves the counter untouched.
        assert_eq!(ids.next_id().unwrap(), u64::MAX - 1);
    }

    #[test]
    fn sync_generator_is_unique_across_threads() {
        let ids = SyncIdGenerator::new();
        let per_thread = 500;
        let collected: Vec<Vec<u64>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..per_thread).map(|_| ids.next_id().unwrap()).collect()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let unique: HashSet<u64> = collected.into_iter().flatten().collect();
        assert_eq!(unique.len(), 4 * per_thread);
        assert!(unique.iter().all(|&id| id >= FIRST_ID));
    }
}
