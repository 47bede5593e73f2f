//! Typed component storage: a sparse set of entity ids plus a parallel array
//! of pool slots.
//!
//! The sparse set decides *which* entities have a component and in what dense
//! order; the pool owns the values so they never move while alive. Slot `k`
//! of the sparse set (for `k >= 1`) pairs with `slots[k - 1]`.

use std::any::{type_name, Any};

use crate::entity::EntityId;
use crate::pool::{PoolAllocator, PoolGrowth, PoolSlot};
use crate::sparse_set::SparseSet;

/// Anything storable as a component.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ComponentStore<T> {
    set: SparseSet,
    slots: Vec<PoolSlot>,
    pool: PoolAllocator<T>,
}

impl<T> ComponentStore<T> {
    /// Empty store with a doubling pool.
    pub fn new() -> Self {
        Self::with_growth(PoolGrowth::Doubling)
    }

    /// Empty store with the given pool growth policy.
    pub fn with_growth(growth: PoolGrowth) -> Self {
        Self {
            set: SparseSet::new(),
            slots: Vec::new(),
            pool: PoolAllocator::with_growth(growth),
        }
    }

    /// Number of entities holding a component.
    #[inline]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Whether `entity` has a component in this store.
    #[inline]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.set.has(entity.to_raw())
    }

    /// The backing pool, exposed for leak checks.
    pub fn pool(&self) -> &PoolAllocator<T> {
        &self.pool
    }

    /// The id set, in the same dense order as [`view`](Self::view).
    pub fn sparse_set(&self) -> &SparseSet {
        &self.set
    }

    /// Attach `value` to `entity`.
    ///
    /// If the entity already has one, the old value is released and the new
    /// one takes its dense slot. Returns `None` only for the reserved id `0`.
    pub fn add_component(&mut self, entity: EntityId, value: T) -> Option<&mut T> {
        let existing = self.set.find(entity.to_raw());
        if existing != 0 {
            tracing::debug!(
                entity = %entity,
                component = type_name::<T>(),
                "replacing existing component"
            );
            let old = self.slots[existing - 1];
            drop(self.pool.release(old));
            let slot = self.pool.allocate(value);
            self.slots[existing - 1] = slot;
            return self.pool.get_mut(slot);
        }

        let index = self.set.add(entity.to_raw());
        if index == 0 {
            return None;
        }
        let slot = self.pool.allocate(value);
        debug_assert_eq!(index - 1, self.slots.len());
        self.slots.push(slot);
        self.pool.get_mut(slot)
    }

    /// Detach and return the component of `entity`, if any.
    pub fn remove_component(&mut self, entity: EntityId) -> Option<T> {
        if !self.contains(entity) {
            return None;
        }
        let index = self.set.remove(entity.to_raw());
        if index == 0 {
            return None;
        }
        // Mirrors the sparse set: last entry moves into the hole.
        let slot = self.slots.swap_remove(index - 1);
        self.pool.release(slot)
    }

    /// Component of `entity`, if any.
    pub fn get(&self, entity: EntityId) -> Option<&T> {
        let index = self.set.find(entity.to_raw());
        if index == 0 {
            return None;
        }
        self.pool.get(*self.slots.get(index - 1)?)
    }

    /// Mutable component of `entity`, if any.
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        let index = self.set.find(entity.to_raw());
        if index == 0 {
            return None;
        }
        let slot = *self.slots.get(index - 1)?;
        self.pool.get_mut(slot)
    }

    /// Iterate `(entity, component)` pairs in dense order.
    pub fn view(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.set
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(id, &slot)| Some((EntityId::from_raw(id), self.pool.get(slot)?)))
    }

    /// Visit every component mutably in dense order.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(EntityId, &mut T)) {
        for (&id, &slot) in self.set.ids().iter().zip(self.slots.iter()) {
            if let Some(value) = self.pool.get_mut(slot) {
                f(EntityId::from_raw(id), value);
            }
        }
    }

    /// Entities holding a component, in dense order.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.set.iter().map(EntityId::from_raw)
    }

    /// Release every component.
    pub fn clear(&mut self) {
        for slot in self.slots.drain(..) {
            drop(self.pool.release(slot));
        }
        self.set.clear();
    }
}

impl<T> Default for ComponentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Type-erased owned store
// ---------------------------------------------------------------------------

/// Lifecycle callbacks a component type can opt into when its owner is
/// registered with [`World::register_owner_with_hooks`](crate::world::World::register_owner_with_hooks).
///
/// `on_creation` runs right after the value is stored; `on_deletion` runs
/// right before it is released.
pub trait ComponentHooks: Component + Sized {
    fn on_creation(&mut self, _entity: EntityId) {}
    fn on_deletion(&mut self, _entity: EntityId) {}
}

pub(crate) struct Hooks<T> {
    pub(crate) on_creation: Option<fn(&mut T, EntityId)>,
    pub(crate) on_deletion: Option<fn(&mut T, EntityId)>,
}

impl<T> Hooks<T> {
    pub(crate) fn none() -> Self {
        Self {
            on_creation: None,
            on_deletion: None,
        }
    }
}

impl<T: ComponentHooks> Hooks<T> {
    pub(crate) fn from_trait() -> Self {
        Self {
            on_creation: Some(T::on_creation),
            on_deletion: Some(T::on_deletion),
        }
    }
}

/// A component store together with its owner's hooks.
pub(crate) struct OwnedStore<T> {
    pub(crate) components: ComponentStore<T>,
    hooks: Hooks<T>,
}

impl<T: Component> OwnedStore<T> {
    pub(crate) fn new(growth: PoolGrowth, hooks: Hooks<T>) -> Self {
        Self {
            components: ComponentStore::with_growth(growth),
            hooks,
        }
    }

    pub(crate) fn insert(&mut self, entity: EntityId, value: T) -> bool {
        let on_creation = self.hooks.on_creation;
        match self.components.add_component(entity, value) {
            Some(stored) => {
                if let Some(hook) = on_creation {
                    hook(stored, entity);
                }
                true
            }
            None => false,
        }
    }
}

/// Operations the registry needs on a store without knowing `T`.
pub(crate) trait ErasedStore: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn contains(&self, entity: EntityId) -> bool;
    fn ids(&self) -> &[u64];
    /// Run the deletion hook and release the component. Returns whether one
    /// was present.
    fn detach(&mut self, entity: EntityId) -> bool;
    fn pool_len(&self) -> usize;
}

impl<T: Component> ErasedStore for OwnedStore<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn len(&self) -> usize {
        self.components.len()
    }

    fn contains(&self, entity: EntityId) -> bool {
        self.components.contains(entity)
    }

    fn ids(&self) -> &[u64] {
        self.components.sparse_set().ids()
    }

    fn detach(&mut self, entity: EntityId) -> bool {
        if let Some(hook) = self.hooks.on_deletion {
            if let Some(value) = self.components.get_mut(entity) {
                hook(value, entity);
            }
        }
        self.components.remove_component(entity).is_some()
    }

    fn pool_len(&self) -> usize {
        self.components.pool().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
