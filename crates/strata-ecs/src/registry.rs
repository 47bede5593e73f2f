//! Type registry: tags, component ownership, groups and event listeners.
//!
//! Every Rust type the world sees (component, group signature, event) is
//! given a [`Tag`] the first time it is asked about. Tags come from a
//! per-registry [`IdGenerator`], so they are unique within one world and
//! never reused.
//!
//! The registry also owns the type-erased component stores and keeps each
//! [`EntityRecord`]'s `held` set and every group's membership in step with
//! them. All mutation goes through `&mut Registry`; the world only hands out
//! `&mut` during setup and `process()`.

use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{BuildMode, EcsConfig};
use crate::entity::{EntityId, EntityRecord, WorldId};
use crate::group::{ComponentSet, GroupState};
use crate::handle::{Owner, Reference};
use crate::id::IdGenerator;
use crate::pool::PoolGrowth;
use crate::storage::{Component, ComponentStore, ErasedStore, Hooks, OwnedStore};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Tag / SubscriberId
// ---------------------------------------------------------------------------

/// Per-world identifier for a registered type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag(u64);

impl Tag {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key under which a listener is registered. Registering again under the
/// same key replaces the previous callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }
}

type EventCallback = Box<dyn Fn(&dyn Any) + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct Registry {
    world: WorldId,
    mode: BuildMode,
    growth: PoolGrowth,
    ids: IdGenerator,
    tags: HashMap<TypeId, Tag>,
    names: HashMap<Tag, &'static str>,
    owners: HashMap<Tag, Box<dyn ErasedStore>>,
    groups: HashMap<Tag, GroupState>,
    /// Component tag -> tags of every group that requires it.
    groups_by_component: HashMap<Tag, Vec<Tag>>,
    listeners: HashMap<Tag, BTreeMap<SubscriberId, EventCallback>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("world", &self.world)
            .field("mode", &self.mode)
            .field("tags", &self.tags.len())
            .field("owners", &self.owners.len())
            .field("groups", &self.groups.len())
            .field("event_types", &self.listeners.len())
            .finish()
    }
}

impl Registry {
    pub(crate) fn new(world: WorldId, config: &EcsConfig) -> Self {
        Self {
            world,
            mode: config.mode,
            growth: config.pool_growth,
            ids: IdGenerator::new(),
            tags: HashMap::new(),
            names: HashMap::new(),
            owners: HashMap::new(),
            groups: HashMap::new(),
            groups_by_component: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    /// How unregistered owners and groups are treated.
    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    /// Apply the build-mode policy to a failed lookup: Production returns the
    /// error, Development logs it and lets the caller fall back.
    fn strict(&self, error: EcsError) -> Result<(), EcsError> {
        match self.mode {
            BuildMode::Production => {
                tracing::error!(error = %error, "registry lookup failed");
                Err(error)
            }
            BuildMode::Development => {
                tracing::warn!(error = %error, "registry lookup failed, using fallback");
                Ok(())
            }
        }
    }

    // -- tags ---------------------------------------------------------------

    /// Tag of `T`, assigning one on first use.
    pub fn tag_of<T: 'static>(&mut self) -> Result<Tag, EcsError> {
        if let Some(&tag) = self.tags.get(&TypeId::of::<T>()) {
            return Ok(tag);
        }
        let tag = Tag(self.ids.next_id()?);
        self.tags.insert(TypeId::of::<T>(), tag);
        self.names.insert(tag, type_name::<T>());
        tracing::trace!(tag = %tag, ty = type_name::<T>(), "assigned tag");
        Ok(tag)
    }

    /// Tag of `T` if one has been assigned.
    pub fn lookup_tag<T: 'static>(&self) -> Option<Tag> {
        self.tag_by_type_id(TypeId::of::<T>())
    }

    pub(crate) fn tag_by_type_id(&self, type_id: TypeId) -> Option<Tag> {
        self.tags.get(&type_id).copied()
    }

    /// Rust type name recorded when `tag` was assigned.
    pub fn type_name_of(&self, tag: Tag) -> Option<&'static str> {
        self.names.get(&tag).copied()
    }

    /// Number of types that have been given a tag.
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Mint a key for listener registration.
    pub fn new_subscriber(&mut self) -> Result<SubscriberId, EcsError> {
        Ok(SubscriberId(self.ids.next_id()?))
    }

    // -- ownership ----------------------------------------------------------

    pub(crate) fn register_owner<T: Component>(
        &mut self,
        hooks: Hooks<T>,
    ) -> Result<Owner<T>, EcsError> {
        let tag = self.tag_of::<T>()?;
        if self.owners.contains_key(&tag) {
            tracing::error!(component = type_name::<T>(), "component already has an owner");
            return Err(EcsError::AlreadyOwned {
                name: type_name::<T>().to_owned(),
            });
        }
        self.owners
            .insert(tag, Box::new(OwnedStore::<T>::new(self.growth, hooks)));
        tracing::debug!(tag = %tag, component = type_name::<T>(), "registered owner");
        Ok(Owner::new(tag, self.world))
    }

    pub(crate) fn resolve_reference<T: Component>(&mut self) -> Result<Reference<T>, EcsError> {
        let tag = self.tag_of::<T>()?;
        if !self.owners.contains_key(&tag) {
            self.strict(EcsError::UnregisteredComponent {
                name: type_name::<T>().to_owned(),
            })?;
        }
        Ok(Reference::new(tag, self.world))
    }

    /// Drop the store for `tag`. The caller must already have detached the
    /// component from every entity.
    pub(crate) fn remove_owner(&mut self, tag: Tag) -> bool {
        let removed = self.owners.remove(&tag).is_some();
        if removed {
            tracing::debug!(tag = %tag, "unregistered owner");
        }
        removed
    }

    /// Whether `T` currently has storage.
    pub fn is_owned<T: 'static>(&self) -> bool {
        self.lookup_tag::<T>()
            .is_some_and(|tag| self.owners.contains_key(&tag))
    }

    /// Number of component types with storage.
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Live pool elements behind the store for `tag`.
    pub fn pool_len(&self, tag: Tag) -> Option<usize> {
        self.owners.get(&tag).map(|store| store.pool_len())
    }

    pub(crate) fn typed_store<T: Component>(&self, tag: Tag) -> Option<&ComponentStore<T>> {
        self.owners
            .get(&tag)?
            .as_any()
            .downcast_ref::<OwnedStore<T>>()
            .map(|owned| &owned.components)
    }

    pub(crate) fn typed_store_mut<T: Component>(
        &mut self,
        tag: Tag,
    ) -> Option<&mut ComponentStore<T>> {
        self.owners
            .get_mut(&tag)?
            .as_any_mut()
            .downcast_mut::<OwnedStore<T>>()
            .map(|owned| &mut owned.components)
    }

    /// Store for `T`, subject to the build-mode policy when `T` is unowned.
    pub fn store<T: Component>(&self) -> Result<Option<&ComponentStore<T>>, EcsError> {
        match self.lookup_tag::<T>().and_then(|tag| self.typed_store::<T>(tag)) {
            Some(store) => Ok(Some(store)),
            None => {
                self.strict(EcsError::UnregisteredComponent {
                    name: type_name::<T>().to_owned(),
                })?;
                Ok(None)
            }
        }
    }

    /// Build-mode gate for operations that name `T` by type: an error in
    /// Production, a logged warning in Development when `T` has no owner.
    pub(crate) fn check_owned<T: Component>(&self) -> Result<(), EcsError> {
        if self.is_owned::<T>() {
            return Ok(());
        }
        self.strict(EcsError::UnregisteredComponent {
            name: type_name::<T>().to_owned(),
        })
    }

    // -- component membership -----------------------------------------------

    /// Store `value` for `record`, update its held tags and admit it to any
    /// group it now satisfies.
    ///
    /// In Development mode an unowned `T` gets implicit storage.
    pub(crate) fn insert_component<T: Component>(
        &mut self,
        record: &mut EntityRecord,
        value: T,
    ) -> Result<(), EcsError> {
        let tag = self.tag_of::<T>()?;
        if !self.owners.contains_key(&tag) {
            self.strict(EcsError::UnregisteredComponent {
                name: type_name::<T>().to_owned(),
            })?;
            self.owners
                .insert(tag, Box::new(OwnedStore::<T>::new(self.growth, Hooks::none())));
        }

        let entity = record.id();
        let Some(owned) = self
            .owners
            .get_mut(&tag)
            .and_then(|store| store.as_any_mut().downcast_mut::<OwnedStore<T>>())
        else {
            tracing::error!(tag = %tag, component = type_name::<T>(), "store type mismatch");
            return Ok(());
        };

        let fresh = !owned.components.contains(entity);
        if !owned.insert(entity, value) {
            return Err(EcsError::StaleEntity { entity });
        }
        record.held.insert(tag);
        if fresh {
            self.notify_created(tag, record);
        }
        tracing::trace!(entity = %entity, component = type_name::<T>(), fresh, "component attached");
        Ok(())
    }

    /// Detach the component tagged `tag` from `record`.
    ///
    /// Groups are notified against the held set as it was *before* the
    /// removal. Returns `false` if the entity did not hold the tag.
    pub(crate) fn remove_component(&mut self, record: &mut EntityRecord, tag: Tag) -> bool {
        if !record.holds(tag) {
            return false;
        }
        let entity = record.id();
        if let Some(group_tags) = self.groups_by_component.get(&tag) {
            for group_tag in group_tags {
                if let Some(group) = self.groups.get_mut(group_tag) {
                    group.evict(entity, &record.held);
                }
            }
        }
        let detached = self
            .owners
            .get_mut(&tag)
            .is_some_and(|store| store.detach(entity));
        if !detached {
            tracing::warn!(entity = %entity, tag = %tag, "held tag had no stored component");
        }
        record.held.remove(&tag);
        tracing::trace!(entity = %entity, tag = %tag, "component detached");
        true
    }

    /// Detach every component `record` holds. Returns how many were removed.
    pub(crate) fn detach_all(&mut self, record: &mut EntityRecord) -> usize {
        let held: Vec<Tag> = record.held.iter().copied().collect();
        held.into_iter()
            .filter(|&tag| self.remove_component(record, tag))
            .count()
    }

    fn notify_created(&mut self, tag: Tag, record: &EntityRecord) {
        let Some(group_tags) = self.groups_by_component.get(&tag) else {
            return;
        };
        for group_tag in group_tags {
            if let Some(group) = self.groups.get_mut(group_tag) {
                group.admit(record);
            }
        }
    }

    // -- groups -------------------------------------------------------------

    /// Register the group for `Q`, populating it from the live entities.
    /// Registering the same signature twice returns the existing tag.
    pub(crate) fn register_group<Q: ComponentSet>(
        &mut self,
        entities: &ComponentStore<EntityRecord>,
    ) -> Result<Tag, EcsError> {
        let tag = self.tag_of::<Q>()?;
        if self.groups.contains_key(&tag) {
            return Ok(tag);
        }
        let required = Q::required_tags(self)?;
        let mut all_owned = true;
        for component in &required {
            if !self.owners.contains_key(component) {
                all_owned = false;
                let name = self.type_name_of(*component).unwrap_or("<unknown>");
                self.strict(EcsError::UnregisteredComponent {
                    name: name.to_owned(),
                })?;
            }
        }

        let mut group = GroupState::new(tag, type_name::<Q>(), required.clone(), self.growth);

        // Any member must hold every required component, so scanning the
        // smallest store finds them all.
        if all_owned {
            let smallest = required
                .iter()
                .filter_map(|component| self.owners.get(component))
                .min_by_key(|store| store.len());
            if let Some(store) = smallest {
                for &raw in store.ids() {
                    if let Some(record) = entities.get(EntityId::from_raw(raw)) {
                        group.admit(record);
                    }
                }
            }
        }

        for component in &required {
            self.groups_by_component
                .entry(*component)
                .or_default()
                .push(tag);
        }
        tracing::debug!(
            tag = %tag,
            group = type_name::<Q>(),
            members = group.len(),
            "registered group"
        );
        self.groups.insert(tag, group);
        Ok(tag)
    }

    /// Group state registered under `tag`.
    pub fn group(&self, tag: Tag) -> Option<&GroupState> {
        self.groups.get(&tag)
    }

    pub(crate) fn group_mut(&mut self, tag: Tag) -> Option<&mut GroupState> {
        self.groups.get_mut(&tag)
    }

    /// Group state for `Q`, subject to the build-mode policy when the group
    /// was never registered.
    pub(crate) fn group_for<Q: ComponentSet>(&self) -> Result<Option<&GroupState>, EcsError> {
        match self.lookup_tag::<Q>().and_then(|tag| self.groups.get(&tag)) {
            Some(group) => Ok(Some(group)),
            None => {
                self.strict(EcsError::UnregisteredGroup {
                    name: type_name::<Q>().to_owned(),
                })?;
                Ok(None)
            }
        }
    }

    /// Number of registered groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    // -- events -------------------------------------------------------------

    /// Register `callback` for events of type `E` under `subscriber`.
    pub fn add_event_listener<E: Any>(
        &mut self,
        subscriber: SubscriberId,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> Result<(), EcsError> {
        let tag = self.tag_of::<E>()?;
        let erased: EventCallback = Box::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                callback(event);
            }
        });
        let replaced = self
            .listeners
            .entry(tag)
            .or_default()
            .insert(subscriber, erased)
            .is_some();
        tracing::debug!(event = type_name::<E>(), ?subscriber, replaced, "added event listener");
        Ok(())
    }

    /// Unsubscribe `subscriber` from events of type `E`. Returns whether a
    /// listener was removed.
    pub fn remove_event_listener<E: Any>(&mut self, subscriber: SubscriberId) -> bool {
        let Some(tag) = self.lookup_tag::<E>() else {
            return false;
        };
        self.listeners
            .get_mut(&tag)
            .is_some_and(|listeners| listeners.remove(&subscriber).is_some())
    }

    /// Number of listeners registered for `E`.
    pub fn event_listener_count<E: Any>(&self) -> usize {
        self.lookup_tag::<E>()
            .and_then(|tag| self.listeners.get(&tag))
            .map_or(0, BTreeMap::len)
    }

    /// Invoke every listener for `E` synchronously, in subscriber order.
    /// Returns the number of listeners invoked.
    pub fn dispatch_event<E: Any>(&self, event: &E) -> usize {
        let Some(listeners) = self
            .lookup_tag::<E>()
            .and_then(|tag| self.listeners.get(&tag))
        else {
            tracing::trace!(event = type_name::<E>(), "event had no listeners");
            return 0;
        };
        for callback in listeners.values() {
            callback(event);
        }
        listeners.len()
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

    #[derive(Debug, Clone, PartialEq)]
    struct Pos {
        x: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Vel {
        dx: f32,
    }

    struct Ping(u32);

    fn registry(mode: BuildMode) -> Registry {
        let config = EcsConfig {
            mode,
            ..Default::default()
        };
        Registry::new(WorldId::fresh(), &config)
    }

    #[test]
    fn tags_are_lazy_stable_and_start_at_three() {
        let mut reg = registry(BuildMode::Development);
        assert!(reg.lookup_tag::<Pos>().is_none());
        let pos = reg.tag_of::<Pos>().unwrap();
        let vel = reg.tag_of::<Vel>().unwrap();
        assert_eq!(pos.to_raw(), 3);
        assert_eq!(vel.to_raw(), 4);
        assert_eq!(reg.tag_of::<Pos>().unwrap(), pos);
        assert_eq!(reg.lookup_tag::<Pos>(), Some(pos));
        assert!(reg.type_name_of(pos).unwrap().ends_with("Pos"));
    }

    #[test]
    fn second_owner_is_rejected() {
        let mut reg = registry(BuildMode::Development);
        reg.register_owner::<Pos>(Hooks::none()).unwrap();
        let err = reg.register_owner::<Pos>(Hooks::none()).unwrap_err();
        assert!(matches!(err, EcsError::AlreadyOwned { .. }));
    }

    #[test]
    fn production_reference_requires_owner() {
        let mut reg = registry(BuildMode::Production);
        let err = reg.resolve_reference::<Pos>().unwrap_err();
        assert!(matches!(err, EcsError::UnregisteredComponent { .. }));

        reg.register_owner::<Pos>(Hooks::none()).unwrap();
        assert!(reg.resolve_reference::<Pos>().is_ok());
    }

    #[test]
    fn development_store_lookup_falls_back() {
        let reg = registry(BuildMode::Development);
        assert!(reg.store::<Pos>().unwrap().is_none());

        let reg = registry(BuildMode::Production);
        assert!(reg.store::<Pos>().is_err());
    }

    #[test]
    fn check_owned_follows_build_mode() {
        let mut reg = registry(BuildMode::Production);
        assert!(matches!(
            reg.check_owned::<Pos>(),
            Err(EcsError::UnregisteredComponent { .. })
        ));
        reg.register_owner::<Pos>(Hooks::none()).unwrap();
        assert!(reg.check_owned::<Pos>().is_ok());

        let reg = registry(BuildMode::Development);
        assert!(reg.check_owned::<Vel>().is_ok());
    }

    #[test]
    fn insert_updates_held_tags() {
        let mut reg = registry(BuildMode::Production);
        reg.register_owner::<Pos>(Hooks::none()).unwrap();
        let mut record = EntityRecord::new(EntityId::from_raw(10));

        reg.insert_component(&mut record, Pos { x: 1.0 }).unwrap();
        let tag = reg.lookup_tag::<Pos>().unwrap();
        assert!(record.holds(tag));
        assert_eq!(
            reg.store::<Pos>().unwrap().unwrap().get(record.id()),
            Some(&Pos { x: 1.0 })
        );

        assert!(reg.remove_component(&mut record, tag));
        assert!(!record.holds(tag));
        assert!(!reg.remove_component(&mut record, tag));
        assert_eq!(reg.pool_len(tag), Some(0));
    }

    #[test]
    fn production_insert_of_unowned_fails() {
        let mut reg = registry(BuildMode::Production);
        let mut record = EntityRecord::new(EntityId::from_raw(10));
        assert!(reg.insert_component(&mut record, Pos { x: 1.0 }).is_err());
        assert!(record.held_tags().is_empty());
    }

    #[test]
    fn development_insert_creates_implicit_storage() {
        let mut reg = registry(BuildMode::Development);
        let mut record = EntityRecord::new(EntityId::from_raw(10));
        reg.insert_component(&mut record, Pos { x: 2.0 }).unwrap();
        assert!(reg.is_owned::<Pos>());
        // Implicit storage blocks a later explicit owner.
        assert!(reg.register_owner::<Pos>(Hooks::none()).is_err());
    }

    #[test]
    fn detach_all_clears_record() {
        let mut reg = registry(BuildMode::Production);
        reg.register_owner::<Pos>(Hooks::none()).unwrap();
        reg.register_owner::<Vel>(Hooks::none()).unwrap();
        let mut record = EntityRecord::new(EntityId::from_raw(10));
        reg.insert_component(&mut record, Pos { x: 0.0 }).unwrap();
        reg.insert_component(&mut record, Vel { dx: 0.0 }).unwrap();
        assert_eq!(reg.detach_all(&mut record), 2);
        assert!(record.held_tags().is_empty());
    }

    #[test]
    fn events_reach_listeners_in_subscriber_order() {
        let mut reg = registry(BuildMode::Development);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for key in [7u64, 5] {
            let seen = Arc::clone(&seen);
            reg.add_event_listener(SubscriberId::from_raw(key), move |ping: &Ping| {
                seen.lock().push((key, ping.0));
            })
            .unwrap();
        }
        assert_eq!(reg.dispatch_event(&Ping(9)), 2);
        assert_eq!(*seen.lock(), vec![(5, 9), (7, 9)]);
    }

    #[test]
    fn same_subscriber_replaces_listener() {
        let mut reg = registry(BuildMode::Development);
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = reg.new_subscriber().unwrap();
        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            reg.add_event_listener(sub, move |_: &Ping| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(reg.event_listener_count::<Ping>(), 1);
        reg.dispatch_event(&Ping(0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(reg.remove_event_listener::<Ping>(sub));
        assert_eq!(reg.dispatch_event(&Ping(0)), 0);
    }
}
