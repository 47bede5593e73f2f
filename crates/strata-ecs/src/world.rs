//! The [`World`] is the top-level container for the ECS. It owns the entity
//! id generator, the live entity records, the type registry and the command
//! queues.
//!
//! Its API is split by receiver:
//!
//! - `&self` methods are the execute phase. They are safe to call from many
//!   threads at once, read only committed state, and push structural changes
//!   onto the command queues.
//! - `&mut self` methods are setup and commit: registering owners, groups and
//!   listeners, the immediate-mode mutations, and [`World::process`].

use std::any::{type_name, Any};

use crate::command::{Command, CommandQueue, ProcessReport};
use crate::config::EcsConfig;
use crate::entity::{EntityHandle, EntityId, EntityRecord, WorldId};
use crate::group::{ComponentSet, GroupHandle, GroupIter};
use crate::handle::{check_world, ComponentHandle, Owner, Reference};
use crate::id::SyncIdGenerator;
use crate::registry::{Registry, SubscriberId, Tag};
use crate::storage::{Component, ComponentHooks, ComponentStore, Hooks};
use crate::EcsError;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct World {
    id: WorldId,
    config: EcsConfig,
    entity_ids: SyncIdGenerator,
    entities: ComponentStore<EntityRecord>,
    registry: Registry,
    commands: CommandQueue,
}

impl World {
    /// Create a world with the default configuration.
    pub fn new() -> Self {
        Self::build(EcsConfig::default())
    }

    /// Create a world from an explicit configuration.
    pub fn with_config(config: EcsConfig) -> Result<Self, EcsError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EcsConfig) -> Self {
        let id = WorldId::fresh();
        tracing::debug!(world = %id, mode = ?config.mode, "world created");
        Self {
            id,
            entity_ids: SyncIdGenerator::new(),
            entities: ComponentStore::with_growth(config.pool_growth),
            registry: Registry::new(id, &config),
            commands: CommandQueue::new(config.queue_capacity),
            config,
        }
    }

    /// Identifier stamped into every handle this world issues.
    pub fn id(&self) -> WorldId {
        self.id
    }

    /// The configuration the world was built with.
    pub fn config(&self) -> &EcsConfig {
        &self.config
    }

    /// Read access to tags, stores, groups and listeners.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// The command queues, for enqueueing prebuilt [`Command`]s.
    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    fn handle(&self, id: EntityId) -> EntityHandle {
        EntityHandle::new(id, self.id)
    }

    // -- ownership ----------------------------------------------------------

    /// Claim storage for `T`. Each component type has at most one owner.
    pub fn register_owner<T: Component>(&mut self) -> Result<Owner<T>, EcsError> {
        self.registry.register_owner(Hooks::none())
    }

    /// Claim storage for `T` and run its [`ComponentHooks`] on every
    /// committed creation and before every release.
    pub fn register_owner_with_hooks<T: ComponentHooks>(&mut self) -> Result<Owner<T>, EcsError> {
        self.registry.register_owner(Hooks::from_trait())
    }

    /// Read-only access to the store owned elsewhere.
    pub fn resolve_reference<T: Component>(&mut self) -> Result<Reference<T>, EcsError> {
        self.registry.resolve_reference()
    }

    /// Release the storage for `T`, detaching it from every entity first so
    /// groups and held tags stay consistent.
    pub fn unregister_owner<T: Component>(&mut self, owner: Owner<T>) -> Result<(), EcsError> {
        check_world(self.id, owner.world())?;
        let tag = owner.tag();
        let holders: Vec<EntityId> = match self.registry.typed_store::<T>(tag) {
            Some(store) => store.entity_ids().collect(),
            None => Vec::new(),
        };
        for entity in holders {
            if let Some(record) = self.entities.get_mut(entity) {
                self.registry.remove_component(record, tag);
            }
        }
        self.registry.remove_owner(tag);
        Ok(())
    }

    // -- execute phase: deferred structural changes -------------------------

    /// Mint an entity id and queue its creation. The handle is usable for
    /// further commands right away; the entity goes live at the next
    /// [`process`](Self::process).
    pub fn create_entity(&self) -> Result<EntityHandle, EcsError> {
        let id = EntityId::from_raw(self.entity_ids.next_id()?);
        self.commands.enqueue(Command::CreateEntity(id));
        Ok(self.handle(id))
    }

    /// Queue the creation of `count` entities with consecutive ids.
    pub fn create_entities(&self, count: usize) -> Result<Vec<EntityHandle>, EcsError> {
        let range = self.entity_ids.next_range(count as u64)?;
        Ok(range
            .iter()
            .map(|raw| {
                let id = EntityId::from_raw(raw);
                self.commands.enqueue(Command::CreateEntity(id));
                self.handle(id)
            })
            .collect())
    }

    /// Queue deletion of `entity`. Its components are detached first at
    /// commit; deleting an entity created in the same tick means it never
    /// goes live.
    pub fn delete_entity(&self, entity: EntityHandle) -> Result<(), EcsError> {
        check_world(self.id, entity.world())?;
        self.commands.enqueue(Command::DeleteEntity(entity.id()));
        Ok(())
    }

    /// Queue attaching `value` to `entity`. Attaching over an existing `T`
    /// replaces it.
    ///
    /// In Production mode `T` must already have an owner.
    pub fn attach<T: Component>(
        &self,
        entity: EntityHandle,
        value: T,
    ) -> Result<ComponentHandle<T>, EcsError> {
        check_world(self.id, entity.world())?;
        self.registry.check_owned::<T>()?;
        self.commands
            .enqueue(Command::create_component(entity.id(), value));
        Ok(ComponentHandle::new(entity))
    }

    /// Queue detaching `T` from `entity`. Detaching a component the entity
    /// does not hold is skipped at commit.
    ///
    /// In Production mode `T` must already have an owner.
    pub fn detach<T: Component>(&self, entity: EntityHandle) -> Result<(), EcsError> {
        check_world(self.id, entity.world())?;
        self.registry.check_owned::<T>()?;
        self.commands
            .enqueue(Command::delete_component::<T>(entity.id()));
        Ok(())
    }

    /// Queue an event for delivery at the start of the next commit.
    pub fn post_event<E: Any + Send>(&self, event: E) -> bool {
        self.commands
            .post(Box::new(move |registry: &Registry| registry.dispatch_event(&event)))
    }

    /// Deliver an event to every listener now. Returns how many ran.
    pub fn send_event<E: Any>(&self, event: &E) -> usize {
        self.registry.dispatch_event(event)
    }

    // -- execute phase: reads -----------------------------------------------

    /// Committed `T` of `entity`.
    ///
    /// In Production mode an unowned `T` is an error; in Development it reads
    /// as `None`.
    pub fn get<T: Component>(&self, entity: EntityId) -> Result<Option<&T>, EcsError> {
        Ok(self
            .registry
            .store::<T>()?
            .and_then(|store| store.get(entity)))
    }

    /// Whether the live `entity` holds a committed `T`.
    ///
    /// In Production mode `T` must have an owner; in Development an unowned
    /// `T` is logged and reads as absent.
    pub fn has<T: Component>(&self, entity: EntityId) -> Result<bool, EcsError> {
        self.registry.check_owned::<T>()?;
        Ok(
            match (self.registry.lookup_tag::<T>(), self.entities.get(entity)) {
                (Some(tag), Some(record)) => record.holds(tag),
                _ => false,
            },
        )
    }

    /// Whether `entity` was live as of the last commit.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.contains(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Held-tag record of a live entity.
    pub fn entity(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.entities.get(entity)
    }

    /// Every live entity in dense order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> + '_ {
        self.entities.view().map(|(_, record)| record)
    }

    /// Iterate every stored `T`.
    pub fn view_store<T: Component>(
        &self,
    ) -> Result<impl Iterator<Item = (EntityId, &T)> + '_, EcsError> {
        Ok(self
            .registry
            .store::<T>()?
            .into_iter()
            .flat_map(|store| store.view()))
    }

    // -- groups -------------------------------------------------------------

    /// Register (or look up) the group for signature `Q`.
    pub fn register_view<Q: ComponentSet>(&mut self) -> Result<GroupHandle<Q>, EcsError> {
        let tag = self.registry.register_group::<Q>(&self.entities)?;
        Ok(GroupHandle::new(tag, self.id))
    }

    /// Iterate the members of the group for `Q`.
    pub fn view<Q: ComponentSet>(&self) -> Result<GroupIter<'_, Q>, EcsError> {
        Ok(match self.registry.group_for::<Q>()? {
            Some(group) => GroupIter::new(group, &self.registry),
            None => GroupIter::empty(),
        })
    }

    /// Iterate the members of the group `group` names.
    pub fn view_group<Q: ComponentSet>(
        &self,
        group: &GroupHandle<Q>,
    ) -> Result<GroupIter<'_, Q>, EcsError> {
        check_world(self.id, group.world())?;
        match self.registry.group(group.tag()) {
            Some(state) => Ok(GroupIter::new(state, &self.registry)),
            None => Err(EcsError::UnregisteredGroup {
                name: type_name::<Q>().to_owned(),
            }),
        }
    }

    /// Member ids of a group, as of the last commit.
    pub fn group_entities<Q: ComponentSet>(
        &self,
        group: &GroupHandle<Q>,
    ) -> Result<Vec<EntityId>, EcsError> {
        check_world(self.id, group.world())?;
        Ok(self
            .registry
            .group(group.tag())
            .map(|state| state.entities().collect())
            .unwrap_or_default())
    }

    fn group_tag<Q: ComponentSet>(&self, group: &GroupHandle<Q>) -> Result<Tag, EcsError> {
        check_world(self.id, group.world())?;
        Ok(group.tag())
    }

    /// Call `callback` whenever an entity joins the group, and once now for
    /// every current member.
    pub fn on_group_enter<Q: ComponentSet>(
        &mut self,
        group: &GroupHandle<Q>,
        subscriber: SubscriberId,
        callback: impl Fn(EntityId) + Send + Sync + 'static,
    ) -> Result<(), EcsError> {
        let tag = self.group_tag(group)?;
        if let Some(state) = self.registry.group_mut(tag) {
            state.add_enter_listener(subscriber, Box::new(callback));
        }
        Ok(())
    }

    /// Call `callback` whenever an entity leaves the group.
    pub fn on_group_leave<Q: ComponentSet>(
        &mut self,
        group: &GroupHandle<Q>,
        subscriber: SubscriberId,
        callback: impl Fn(EntityId) + Send + Sync + 'static,
    ) -> Result<(), EcsError> {
        let tag = self.group_tag(group)?;
        if let Some(state) = self.registry.group_mut(tag) {
            state.add_leave_listener(subscriber, Box::new(callback));
        }
        Ok(())
    }

    /// Remove an enter listener. Returns whether one was registered.
    pub fn remove_group_enter<Q: ComponentSet>(
        &mut self,
        group: &GroupHandle<Q>,
        subscriber: SubscriberId,
    ) -> Result<bool, EcsError> {
        let tag = self.group_tag(group)?;
        Ok(self
            .registry
            .group_mut(tag)
            .is_some_and(|state| state.remove_enter_listener(subscriber)))
    }

    /// Remove a leave listener. Returns whether one was registered.
    pub fn remove_group_leave<Q: ComponentSet>(
        &mut self,
        group: &GroupHandle<Q>,
        subscriber: SubscriberId,
    ) -> Result<bool, EcsError> {
        let tag = self.group_tag(group)?;
        Ok(self
            .registry
            .group_mut(tag)
            .is_some_and(|state| state.remove_leave_listener(subscriber)))
    }

    // -- events -------------------------------------------------------------

    /// Mint a key for listener registration.
    pub fn new_subscriber(&mut self) -> Result<SubscriberId, EcsError> {
        self.registry.new_subscriber()
    }

    /// Register `callback` for events of type `E`, replacing any listener
    /// already registered under `subscriber`.
    pub fn on_event<E: Any>(
        &mut self,
        subscriber: SubscriberId,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> Result<(), EcsError> {
        self.registry.add_event_listener(subscriber, callback)
    }

    /// Unsubscribe `subscriber` from events of type `E`.
    pub fn remove_event_listener<E: Any>(&mut self, subscriber: SubscriberId) -> bool {
        self.registry.remove_event_listener::<E>(subscriber)
    }

    // -- commit -------------------------------------------------------------

    /// Apply every queued command. Call exactly once between execute phases.
    pub fn process(&mut self) -> ProcessReport {
        self.commands.commit(&mut self.registry, &mut self.entities)
    }

    // -- immediate mode -----------------------------------------------------

    /// Create a live entity right away.
    pub fn spawn(&mut self) -> Result<EntityHandle, EcsError> {
        let id = EntityId::from_raw(self.entity_ids.next_id()?);
        self.entities.add_component(id, EntityRecord::new(id));
        tracing::trace!(entity = %id, "spawned");
        Ok(self.handle(id))
    }

    /// Attach `value` to a live entity right away.
    pub fn insert<T: Component>(&mut self, entity: EntityHandle, value: T) -> Result<(), EcsError> {
        check_world(self.id, entity.world())?;
        let record = self
            .entities
            .get_mut(entity.id())
            .ok_or(EcsError::StaleEntity { entity: entity.id() })?;
        self.registry.insert_component(record, value)
    }

    /// Detach `T` from a live entity right away, returning whether it had
    /// one.
    pub fn remove<T: Component>(&mut self, entity: EntityHandle) -> Result<bool, EcsError> {
        check_world(self.id, entity.world())?;
        let record = self
            .entities
            .get_mut(entity.id())
            .ok_or(EcsError::StaleEntity { entity: entity.id() })?;
        Ok(match self.registry.lookup_tag::<T>() {
            Some(tag) => self.registry.remove_component(record, tag),
            None => false,
        })
    }

    /// Detach everything from a live entity and delete it right away.
    pub fn despawn(&mut self, entity: EntityHandle) -> Result<(), EcsError> {
        check_world(self.id, entity.world())?;
        let record = self
            .entities
            .get_mut(entity.id())
            .ok_or(EcsError::StaleEntity { entity: entity.id() })?;
        self.registry.detach_all(record);
        self.entities.remove_component(entity.id());
        tracing::trace!(entity = %entity.id(), "despawned");
        Ok(())
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
