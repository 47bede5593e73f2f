//! Entity identifiers, world-bound handles and the per-entity record.
//!
//! An [`EntityId`] is a plain 64-bit number handed out by the world's
//! generator. Ids are never recycled, so a stale id simply stops resolving
//! once its entity is deleted. `0` is reserved and never names an entity.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::registry::Tag;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// The reserved "no entity" id.
    pub const NONE: EntityId = EntityId(0);

    /// Wrap a raw id. `0` is the reserved "no entity" value.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// True for the reserved id `0`.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// WorldId
// ---------------------------------------------------------------------------

static NEXT_WORLD: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`World`](crate::world::World) instance.
///
/// Every handle carries the id of the world that issued it; passing a handle
/// to a different world is reported as [`EcsError::ForeignHandle`](crate::EcsError::ForeignHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorldId(u64);

impl WorldId {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_WORLD.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityHandle
// ---------------------------------------------------------------------------

/// An entity id bound to the world that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    id: EntityId,
    world: WorldId,
}

impl EntityHandle {
    /// Handle to `id` minted by `world`.
    pub(crate) fn new(id: EntityId, world: WorldId) -> Self {
        Self { id, world }
    }

    /// The entity this handle names.
    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The world that minted the handle.
    #[inline]
    pub fn world(&self) -> WorldId {
        self.world
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.world)
    }
}

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// A live entity: its id plus the tags of every component it holds.
///
/// Groups test membership against `held`, so it is kept in lock-step with the
/// component stores by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    id: EntityId,
    pub(crate) held: BTreeSet<Tag>,
}

impl EntityRecord {
    /// A freshly created entity holding nothing.
    pub(crate) fn new(id: EntityId) -> Self {
        Self {
            id,
            held: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Tags of every component the entity currently holds.
    pub fn held_tags(&self) -> &BTreeSet<Tag> {
        &self.held
    }

    /// Whether the entity holds the component tagged `tag`.
    pub fn holds(&self, tag: Tag) -> bool {
        self.held.contains(&tag)
    }

    /// True when every tag in `required` is held.
    pub fn holds_all(&self, required: &BTreeSet<Tag>) -> bool {
        self.held.is_superset(required)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_zero() {
        assert!(EntityId::NONE.is_none());
        assert!(!EntityId::from_raw(3).is_none());
        assert_eq!(EntityId::from_raw(42).to_raw(), 42);
    }

    #[test]
    fn display_and_debug() {
        let id = EntityId::from_raw(12);
        assert_eq!(format!("{id}"), "12");
        assert_eq!(format!("{id:?}"), "EntityId(12)");
    }

    #[test]
    fn world_ids_are_distinct() {
        let a = WorldId::fresh();
        let b = WorldId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn record_tracks_held_tags() {
        let mut record = EntityRecord::new(EntityId::from_raw(5));
        record.held.insert(Tag::from_raw(3));
        record.held.insert(Tag::from_raw(4));

        let required: BTreeSet<Tag> = [Tag::from_raw(3)].into_iter().collect();
        assert!(record.holds_all(&required));
        assert!(record.holds(Tag::from_raw(4)));

        let wider: BTreeSet<Tag> = [3, 4, 5].into_iter().map(Tag::from_raw).collect();
        assert!(!record.holds_all(&wider));
    }

    #[test]
    fn entity_id_serializes_as_number() {
        let json = serde_json::to_string(&EntityId::from_raw(9)).unwrap();
        assert_eq!(json, "9");
    }
}
