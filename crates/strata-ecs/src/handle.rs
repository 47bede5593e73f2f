//! Typed access handles for component stores.
//!
//! - [`Owner<T>`] is unique per component type per world. It is the only
//!   handle that can mutate stored values in place, and it is consumed by
//!   [`World::unregister_owner`](crate::world::World::unregister_owner).
//! - [`Reference<T>`] is a copyable read-only handle resolved against an
//!   existing owner.
//! - [`ComponentHandle<T>`] names one entity's `T` and is returned by
//!   [`World::attach`](crate::world::World::attach).
//!
//! Every handle remembers the world that issued it and refuses to resolve
//! against any other.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::entity::{EntityHandle, EntityId, WorldId};
use crate::registry::Tag;
use crate::storage::{Component, ComponentStore};
use crate::world::World;
use crate::EcsError;

/// Refuse a handle minted by a different world.
pub(crate) fn check_world(expected: WorldId, found: WorldId) -> Result<(), EcsError> {
    if expected != found {
        tracing::error!(%expected, %found, "handle used with a foreign world");
        return Err(EcsError::ForeignHandle { expected, found });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Owner
// ---------------------------------------------------------------------------

pub struct Owner<T> {
    tag: Tag,
    world: WorldId,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> Owner<T> {
    pub(crate) fn new(tag: Tag, world: WorldId) -> Self {
        Self {
            tag,
            world,
            _marker: PhantomData,
        }
    }

    /// Tag of the owned component type.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn world(&self) -> WorldId {
        self.world
    }

    /// A read-only handle to the same store.
    pub fn reference(&self) -> Reference<T> {
        Reference::new(self.tag, self.world)
    }

    /// The owned store. Fails if `world` is not the issuing world or the
    /// owner has since been unregistered.
    pub fn store<'w>(&self, world: &'w World) -> Result<&'w ComponentStore<T>, EcsError> {
        check_world(world.id(), self.world)?;
        world
            .registry()
            .typed_store::<T>(self.tag)
            .ok_or_else(|| EcsError::UnregisteredComponent {
                name: type_name::<T>().to_owned(),
            })
    }

    /// Committed `T` of `entity`, if any.
    pub fn get<'w>(&self, world: &'w World, entity: EntityId) -> Result<Option<&'w T>, EcsError> {
        Ok(self.store(world)?.get(entity))
    }

    /// Mutate one entity's component in place.
    pub fn get_mut<'w>(
        &self,
        world: &'w mut World,
        entity: EntityId,
    ) -> Result<Option<&'w mut T>, EcsError> {
        check_world(world.id(), self.world)?;
        let store = world
            .registry_mut()
            .typed_store_mut::<T>(self.tag)
            .ok_or_else(|| EcsError::UnregisteredComponent {
                name: type_name::<T>().to_owned(),
            })?;
        Ok(store.get_mut(entity))
    }

    /// Visit every stored `T` mutably.
    pub fn for_each_mut(
        &self,
        world: &mut World,
        f: impl FnMut(EntityId, &mut T),
    ) -> Result<(), EcsError> {
        check_world(world.id(), self.world)?;
        let store = world
            .registry_mut()
            .typed_store_mut::<T>(self.tag)
            .ok_or_else(|| EcsError::UnregisteredComponent {
                name: type_name::<T>().to_owned(),
            })?;
        store.for_each_mut(f);
        Ok(())
    }
}

impl<T> fmt::Debug for Owner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("component", &type_name::<T>())
            .field("tag", &self.tag)
            .field("world", &self.world)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Reference
// ---------------------------------------------------------------------------

pub struct Reference<T> {
    tag: Tag,
    world: WorldId,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> Reference<T> {
    pub(crate) fn new(tag: Tag, world: WorldId) -> Self {
        Self {
            tag,
            world,
            _marker: PhantomData,
        }
    }

    /// Tag of the referenced component type.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The referenced store. `None` (Development) or an error (Production)
    /// when the owner is gone.
    pub fn store<'w>(&self, world: &'w World) -> Result<Option<&'w ComponentStore<T>>, EcsError> {
        check_world(world.id(), self.world)?;
        match world.registry().typed_store::<T>(self.tag) {
            Some(store) => Ok(Some(store)),
            None => world.registry().store::<T>(),
        }
    }

    /// Committed `T` of `entity`, if any.
    pub fn get<'w>(&self, world: &'w World, entity: EntityId) -> Result<Option<&'w T>, EcsError> {
        Ok(self.store(world)?.and_then(|store| store.get(entity)))
    }

    /// Iterate every committed `T` with its entity.
    pub fn view<'w>(
        &self,
        world: &'w World,
    ) -> Result<impl Iterator<Item = (EntityId, &'w T)> + 'w, EcsError> {
        Ok(self.store(world)?.into_iter().flat_map(|store| store.view()))
    }
}

impl<T> Clone for Reference<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Reference<T> {}

impl<T> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("component", &type_name::<T>())
            .field("tag", &self.tag)
            .field("world", &self.world)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentHandle
// ---------------------------------------------------------------------------

/// One entity's component of type `T`.
///
/// The component only exists once the attach that produced the handle has
/// been committed by [`World::process`](crate::world::World::process).
pub struct ComponentHandle<T> {
    entity: EntityHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentHandle<T> {
    pub(crate) fn new(entity: EntityHandle) -> Self {
        Self {
            entity,
            _marker: PhantomData,
        }
    }

    /// The entity the component belongs to.
    pub fn entity(&self) -> EntityHandle {
        self.entity
    }

    /// The committed component, or `None` until the attach is processed.
    pub fn get<'w>(&self, world: &'w World) -> Result<Option<&'w T>, EcsError> {
        check_world(world.id(), self.entity.world())?;
        world.get::<T>(self.entity.id())
    }
}

impl<T> Clone for ComponentHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ComponentHandle<T> {}

impl<T> fmt::Debug for ComponentHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("component", &type_name::<T>())
            .field("entity", &self.entity)
            .finish()
    }
}
