//! Groups: incrementally maintained sets of entities holding every component
//! in a signature.
//!
//! A group is registered once for a tuple type such as `(Position, Velocity)`
//! and from then on the registry admits and evicts members as components are
//! attached and detached, so viewing a group never scans the world.
//!
//! The typed side is the [`ComponentSet`] trait, implemented for tuples of
//! one to four component types. A view resolves each component store once
//! and then fetches per member, yielding `(EntityId, (&A, &B, ...))`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;

use crate::entity::{EntityId, EntityRecord, WorldId};
use crate::pool::PoolGrowth;
use crate::registry::{Registry, SubscriberId, Tag};
use crate::storage::{Component, ComponentStore};
use crate::EcsError;

type GroupCallback = Box<dyn Fn(EntityId) + Send + Sync>;

// ---------------------------------------------------------------------------
// GroupState
// ---------------------------------------------------------------------------

/// Cached element of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMember {
    entity: EntityId,
}

impl GroupMember {
    /// The member entity.
    pub fn entity(&self) -> EntityId {
        self.entity
    }
}

/// Untyped membership bookkeeping for one group signature.
pub struct GroupState {
    tag: Tag,
    name: &'static str,
    required: BTreeSet<Tag>,
    members: ComponentStore<GroupMember>,
    on_enter: BTreeMap<SubscriberId, GroupCallback>,
    on_leave: BTreeMap<SubscriberId, GroupCallback>,
}

impl fmt::Debug for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupState")
            .field("tag", &self.tag)
            .field("name", &self.name)
            .field("required", &self.required)
            .field("members", &self.members.len())
            .field("on_enter", &self.on_enter.len())
            .field("on_leave", &self.on_leave.len())
            .finish()
    }
}

impl GroupState {
    pub(crate) fn new(
        tag: Tag,
        name: &'static str,
        required: BTreeSet<Tag>,
        growth: PoolGrowth,
    ) -> Self {
        Self {
            tag,
            name,
            required,
            members: ComponentStore::with_growth(growth),
            on_enter: BTreeMap::new(),
            on_leave: BTreeMap::new(),
        }
    }

    /// Tag of the group's signature type.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Rust type name of the signature, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Component tags an entity must hold to be a member.
    pub fn required(&self) -> &BTreeSet<Tag> {
        &self.required
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `entity` is currently a member.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.members.contains(entity)
    }

    /// Member entities in dense order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.members.view().map(|(_, member)| member.entity)
    }

    /// Admit `record` if it now holds every required tag and is not already
    /// a member. Fires enter listeners on admission.
    pub(crate) fn admit(&mut self, record: &EntityRecord) -> bool {
        let entity = record.id();
        if !record.holds_all(&self.required) || self.members.contains(entity) {
            return false;
        }
        self.members.add_component(entity, GroupMember { entity });
        tracing::trace!(group = self.name, entity = %entity, "entered group");
        for callback in self.on_enter.values() {
            callback(entity);
        }
        true
    }

    /// Evict `entity` if its held tags before the pending removal satisfied
    /// the signature. Fires leave listeners before the member is dropped.
    pub(crate) fn evict(&mut self, entity: EntityId, held_before: &BTreeSet<Tag>) -> bool {
        if !held_before.is_superset(&self.required) || !self.members.contains(entity) {
            return false;
        }
        for callback in self.on_leave.values() {
            callback(entity);
        }
        self.members.remove_component(entity);
        tracing::trace!(group = self.name, entity = %entity, "left group");
        true
    }

    /// Register an enter listener. It is invoked immediately for every
    /// current member.
    pub(crate) fn add_enter_listener(&mut self, subscriber: SubscriberId, callback: GroupCallback) {
        for entity in self.entities() {
            callback(entity);
        }
        self.on_enter.insert(subscriber, callback);
    }

    pub(crate) fn add_leave_listener(&mut self, subscriber: SubscriberId, callback: GroupCallback) {
        self.on_leave.insert(subscriber, callback);
    }

    pub(crate) fn remove_enter_listener(&mut self, subscriber: SubscriberId) -> bool {
        self.on_enter.remove(&subscriber).is_some()
    }

    pub(crate) fn remove_leave_listener(&mut self, subscriber: SubscriberId) -> bool {
        self.on_leave.remove(&subscriber).is_some()
    }
}

// ---------------------------------------------------------------------------
// ComponentSet trait -- typed group signatures
// ---------------------------------------------------------------------------

/// A tuple of component types that together form a group signature.
pub trait ComponentSet: 'static {
    /// Resolved store references for one view.
    type Stores<'w>
    where
        Self: 'w;
    /// What a view yields per member.
    type Item<'w>
    where
        Self: 'w;

    /// Tags of every component in the tuple, assigning them if needed.
    fn required_tags(registry: &mut Registry) -> Result<BTreeSet<Tag>, EcsError>;

    /// Resolve every store. `None` if any component has no storage.
    fn stores(registry: &Registry) -> Option<Self::Stores<'_>>;

    fn fetch<'w>(stores: &Self::Stores<'w>, entity: EntityId) -> Option<Self::Item<'w>>;
}

fn store_of<T: Component>(registry: &Registry) -> Option<&ComponentStore<T>> {
    registry.typed_store::<T>(registry.lookup_tag::<T>()?)
}

// -- ComponentSet impls for tuples of 1..4 ----------------------------------

impl<A: Component> ComponentSet for (A,) {
    type Stores<'w> = (&'w ComponentStore<A>,);
    type Item<'w> = (&'w A,);

    fn required_tags(registry: &mut Registry) -> Result<BTreeSet<Tag>, EcsError> {
        Ok([registry.tag_of::<A>()?].into_iter().collect())
    }

    fn stores(registry: &Registry) -> Option<Self::Stores<'_>> {
        Some((store_of::<A>(registry)?,))
    }

    fn fetch<'w>(stores: &Self::Stores<'w>, entity: EntityId) -> Option<Self::Item<'w>> {
        let (a,) = *stores;
        Some((a.get(entity)?,))
    }
}

impl<A: Component, B: Component> ComponentSet for (A, B) {
    type Stores<'w> = (&'w ComponentStore<A>, &'w ComponentStore<B>);
    type Item<'w> = (&'w A, &'w B);

    fn required_tags(registry: &mut Registry) -> Result<BTreeSet<Tag>, EcsError> {
        Ok([registry.tag_of::<A>()?, registry.tag_of::<B>()?]
            .into_iter()
            .collect())
    }

    fn stores(registry: &Registry) -> Option<Self::Stores<'_>> {
        Some((store_of::<A>(registry)?, store_of::<B>(registry)?))
    }

    fn fetch<'w>(stores: &Self::Stores<'w>, entity: EntityId) -> Option<Self::Item<'w>> {
        let (a, b) = *stores;
        Some((a.get(entity)?, b.get(entity)?))
    }
}

impl<A: Component, B: Component, C: Component> ComponentSet for (A, B, C) {
    type Stores<'w> = (
        &'w ComponentStore<A>,
        &'w ComponentStore<B>,
        &'w ComponentStore<C>,
    );
    type Item<'w> = (&'w A, &'w B, &'w C);

    fn required_tags(registry: &mut Registry) -> Result<BTreeSet<Tag>, EcsError> {
        Ok([
            registry.tag_of::<A>()?,
            registry.tag_of::<B>()?,
            registry.tag_of::<C>()?,
        ]
        .into_iter()
        .collect())
    }

    fn stores(registry: &Registry) -> Option<Self::Stores<'_>> {
        Some((
            store_of::<A>(registry)?,
            store_of::<B>(registry)?,
            store_of::<C>(registry)?,
        ))
    }

    fn fetch<'w>(stores: &Self::Stores<'w>, entity: EntityId) -> Option<Self::Item<'w>> {
        let (a, b, c) = *stores;
        Some((a.get(entity)?, b.get(entity)?, c.get(entity)?))
    }
}

impl<A: Component, B: Component, C: Component, D: Component> ComponentSet for (A, B, C, D) {
    type Stores<'w> = (
        &'w ComponentStore<A>,
        &'w ComponentStore<B>,
        &'w ComponentStore<C>,
        &'w ComponentStore<D>,
    );
    type Item<'w> = (&'w A, &'w B, &'w C, &'w D);

    fn required_tags(registry: &mut Registry) -> Result<BTreeSet<Tag>, EcsError> {
        Ok([
            registry.tag_of::<A>()?,
            registry.tag_of::<B>()?,
            registry.tag_of::<C>()?,
            registry.tag_of::<D>()?,
        ]
        .into_iter()
        .collect())
    }

    fn stores(registry: &Registry) -> Option<Self::Stores<'_>> {
        Some((
            store_of::<A>(registry)?,
            store_of::<B>(registry)?,
            store_of::<C>(registry)?,
            store_of::<D>(registry)?,
        ))
    }

    fn fetch<'w>(stores: &Self::Stores<'w>, entity: EntityId) -> Option<Self::Item<'w>> {
        let (a, b, c, d) = *stores;
        Some((a.get(entity)?, b.get(entity)?, c.get(entity)?, d.get(entity)?))
    }
}

// ---------------------------------------------------------------------------
// GroupHandle
// ---------------------------------------------------------------------------

/// Typed handle to a registered group.
pub struct GroupHandle<Q: ComponentSet> {
    tag: Tag,
    world: WorldId,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: ComponentSet> GroupHandle<Q> {
    pub(crate) fn new(tag: Tag, world: WorldId) -> Self {
        Self {
            tag,
            world,
            _marker: PhantomData,
        }
    }

    /// Tag of the group this handle names.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The world that registered the group.
    pub fn world(&self) -> WorldId {
        self.world
    }
}

impl<Q: ComponentSet> Clone for GroupHandle<Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Q: ComponentSet> Copy for GroupHandle<Q> {}

impl<Q: ComponentSet> fmt::Debug for GroupHandle<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("tag", &self.tag)
            .field("world", &self.world)
            .field("signature", &std::any::type_name::<Q>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// GroupIter
// ---------------------------------------------------------------------------

/// Iterator over a group's members and their components.
pub struct GroupIter<'w, Q: ComponentSet> {
    members: std::slice::Iter<'w, u64>,
    stores: Option<Q::Stores<'w>>,
}

impl<'w, Q: ComponentSet> GroupIter<'w, Q> {
    pub(crate) fn new(group: &'w GroupState, registry: &'w Registry) -> Self {
        Self {
            members: group.members.sparse_set().ids().iter(),
            stores: Q::stores(registry),
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            members: (&[]).iter(),
            stores: None,
        }
    }
}

impl<'w, Q: ComponentSet> Iterator for GroupIter<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        let stores = self.stores.as_ref()?;
        for &raw in self.members.by_ref() {
            let entity = EntityId::from_raw(raw);
            if let Some(item) = Q::fetch(stores, entity) {
                return Some((entity, item));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.stores {
            Some(_) => (0, Some(self.members.len())),
            None => (0, Some(0)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn tags(raw: &[u64]) -> BTreeSet<Tag> {
        raw.iter().copied().map(Tag::from_raw).collect()
    }

    fn record(id: u64, held: &[u64]) -> EntityRecord {
        let mut record = EntityRecord::new(EntityId::from_raw(id));
        record.held = tags(held);
        record
    }

    fn group(required: &[u64]) -> GroupState {
        GroupState::new(Tag::from_raw(99), "test", tags(required), PoolGrowth::Doubling)
    }

    #[test]
    fn admit_requires_every_tag() {
        let mut g = group(&[3, 4]);
        assert!(!g.admit(&record(10, &[3])));
        assert!(g.admit(&record(11, &[3, 4, 5])));
        assert!(!g.admit(&record(11, &[3, 4, 5])));
        assert_eq!(g.len(), 1);
        assert!(g.contains(EntityId::from_raw(11)));
    }

    #[test]
    fn evict_uses_pre_removal_set() {
        let mut g = group(&[3, 4]);
        g.admit(&record(11, &[3, 4]));
        // Removing an unrelated tag leaves membership alone.
        assert!(!g.evict(EntityId::from_raw(11), &tags(&[3])));
        assert!(g.evict(EntityId::from_raw(11), &tags(&[3, 4])));
        assert!(g.is_empty());
    }

    #[test]
    fn enter_listener_fires_for_existing_members() {
        let mut g = group(&[3]);
        g.admit(&record(10, &[3]));
        g.admit(&record(11, &[3]));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        g.add_enter_listener(
            SubscriberId::from_raw(1),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        g.admit(&record(12, &[3]));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(g.remove_enter_listener(SubscriberId::from_raw(1)));
        g.admit(&record(13, &[3]));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn leave_listener_fires_on_eviction() {
        let mut g = group(&[3]);
        g.admit(&record(10, &[3]));
        let left = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&left);
        g.add_leave_listener(
            SubscriberId::from_raw(1),
            Box::new(move |entity| sink.lock().push(entity)),
        );
        g.evict(EntityId::from_raw(10), &tags(&[3]));
        assert_eq!(*left.lock(), vec![EntityId::from_raw(10)]);
    }
}
