//! Deferred structural mutations and the commit step that applies them.
//!
//! During the execute phase systems only hold `&World`, so every structural
//! change (entity creation and deletion, component attach and detach) is
//! pushed onto one of four lock-free queues. [`World::process`] drains them
//! on a single thread in a fixed order:
//!
//! 0. posted events are delivered to their listeners
//! 1. component deletions, collapsed by `(entity, tag)`
//! 2. entity deletions, collapsed by entity; every held component is detached
//!    first
//! 3. entity creations
//! 4. component creations, skipping entities that are no longer live
//!
//! Running deletions before creations is what lets a detach-then-reattach in
//! the same tick replace the component instead of leaking the old one, and
//! running creations last keeps new entities invisible until the commit.
//!
//! # Example
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! struct Health(u32);
//!
//! let mut world = World::new();
//! let _health = world.register_owner::<Health>().unwrap();
//!
//! let entity = world.create_entity().unwrap();
//! world.attach(entity, Health(100)).unwrap();
//! assert!(!world.is_alive(entity.id()));
//!
//! let report = world.process();
//! assert_eq!(report.entities_created, 1);
//! assert_eq!(report.components_created, 1);
//! assert_eq!(world.get::<Health>(entity.id()).unwrap().map(|h| h.0), Some(100));
//! ```
//!
//! [`World::process`]: crate::world::World::process

use std::any::{type_name, TypeId};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::entity::{EntityId, EntityRecord};
use crate::registry::{Registry, Tag};
use crate::storage::{Component, ComponentStore};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// The four kinds of structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateEntity,
    DeleteEntity,
    CreateComponent,
    DeleteComponent,
}

/// A component value waiting to be attached at commit time.
pub(crate) trait PendingComponent: Send {
    fn type_name(&self) -> &'static str;
    fn apply(self: Box<Self>, registry: &mut Registry, record: &mut EntityRecord)
        -> Result<(), EcsError>;
}

struct Pending<T>(T);

impl<T: Component> PendingComponent for Pending<T> {
    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn apply(
        self: Box<Self>,
        registry: &mut Registry,
        record: &mut EntityRecord,
    ) -> Result<(), EcsError> {
        registry.insert_component(record, self.0)
    }
}

pub struct ComponentCreate {
    entity: EntityId,
    component: Box<dyn PendingComponent>,
}

impl fmt::Debug for ComponentCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCreate")
            .field("entity", &self.entity)
            .field("component", &self.component.type_name())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ComponentDelete {
    entity: EntityId,
    type_id: TypeId,
    type_name: &'static str,
}

/// One structural change, routed to its queue by [`CommandQueue::enqueue`].
#[derive(Debug)]
pub enum Command {
    CreateEntity(EntityId),
    DeleteEntity(EntityId),
    CreateComponent(ComponentCreate),
    DeleteComponent(ComponentDelete),
}

impl Command {
    /// Queue-ready attach of `value` to `entity`.
    pub fn create_component<T: Component>(entity: EntityId, value: T) -> Self {
        Command::CreateComponent(ComponentCreate {
            entity,
            component: Box::new(Pending(value)),
        })
    }

    /// Queue-ready detach of `T` from `entity`.
    pub fn delete_component<T: Component>(entity: EntityId) -> Self {
        Command::DeleteComponent(ComponentDelete {
            entity,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        })
    }

    /// Which queue the command is routed to.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::CreateEntity(_) => CommandKind::CreateEntity,
            Command::DeleteEntity(_) => CommandKind::DeleteEntity,
            Command::CreateComponent(_) => CommandKind::CreateComponent,
            Command::DeleteComponent(_) => CommandKind::DeleteComponent,
        }
    }

    /// The entity the command targets.
    pub fn entity(&self) -> EntityId {
        match self {
            Command::CreateEntity(id) | Command::DeleteEntity(id) => *id,
            Command::CreateComponent(create) => create.entity,
            Command::DeleteComponent(delete) => delete.entity,
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessReport
// ---------------------------------------------------------------------------

/// What one [`World::process`](crate::world::World::process) call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Listener invocations for posted events.
    pub events_delivered: usize,
    pub components_deleted: usize,
    /// Deletion requests collapsed into an earlier identical request.
    pub duplicate_deletions: usize,
    pub entities_deleted: usize,
    pub entities_created: usize,
    pub components_created: usize,
    /// Commands whose target was gone (or never existed) at commit time.
    pub stale_skipped: usize,
    /// Commands that reached the registry and were refused.
    pub failed: usize,
    /// Enqueues rejected by a full queue since the previous commit.
    pub dropped_enqueues: usize,
}

impl ProcessReport {
    /// True when the commit changed nothing.
    pub fn is_empty(&self) -> bool {
        self.events_delivered == 0
            && self.components_deleted == 0
            && self.entities_deleted == 0
            && self.entities_created == 0
            && self.components_created == 0
    }
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

pub(crate) type PostedEvent = Box<dyn FnOnce(&Registry) -> usize + Send>;

struct Lane<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Lane<T> {
    fn new(name: &'static str, capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(bound) => crossbeam_channel::bounded(bound),
            None => crossbeam_channel::unbounded(),
        };
        Self { name, tx, rx }
    }
}

/// The four structural queues plus the posted-event queue.
///
/// Every method takes `&self` and never blocks; a full bounded queue drops
/// the command and counts it.
pub struct CommandQueue {
    entity_create: Lane<EntityId>,
    entity_delete: Lane<EntityId>,
    component_create: Lane<ComponentCreate>,
    component_delete: Lane<ComponentDelete>,
    events: Lane<PostedEvent>,
    dropped: AtomicUsize,
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.pending())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl CommandQueue {
    /// Create the queues. `capacity` bounds each one separately; `None`
    /// leaves them unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entity_create: Lane::new("entity_create", capacity),
            entity_delete: Lane::new("entity_delete", capacity),
            component_create: Lane::new("component_create", capacity),
            component_delete: Lane::new("component_delete", capacity),
            events: Lane::new("events", capacity),
            dropped: AtomicUsize::new(0),
        }
    }

    fn offer<T>(&self, lane: &Lane<T>, item: T) -> bool {
        match lane.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    queue = lane.name,
                    capacity = ?lane.tx.capacity(),
                    "command queue full, dropping command"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(queue = lane.name, "command queue disconnected, dropping command");
                false
            }
        }
    }

    /// Push `command` onto its queue. Returns `false` if it was dropped.
    pub fn enqueue(&self, command: Command) -> bool {
        tracing::trace!(kind = ?command.kind(), entity = %command.entity(), "enqueue");
        match command {
            Command::CreateEntity(id) => self.offer(&self.entity_create, id),
            Command::DeleteEntity(id) => self.offer(&self.entity_delete, id),
            Command::CreateComponent(create) => self.offer(&self.component_create, create),
            Command::DeleteComponent(delete) => self.offer(&self.component_delete, delete),
        }
    }

    /// Push a type-erased event delivery for step 0 of the next commit.
    pub(crate) fn post(&self, event: PostedEvent) -> bool {
        self.offer(&self.events, event)
    }

    /// Commands and events currently waiting for the next commit.
    pub fn pending(&self) -> usize {
        self.entity_create.rx.len()
            + self.entity_delete.rx.len()
            + self.component_create.rx.len()
            + self.component_delete.rx.len()
            + self.events.rx.len()
    }

    /// Pending commands on one queue.
    pub fn pending_of(&self, kind: CommandKind) -> usize {
        match kind {
            CommandKind::CreateEntity => self.entity_create.rx.len(),
            CommandKind::DeleteEntity => self.entity_delete.rx.len(),
            CommandKind::CreateComponent => self.component_create.rx.len(),
            CommandKind::DeleteComponent => self.component_delete.rx.len(),
        }
    }

    /// Enqueues dropped since the last commit.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain every queue in commit order and apply the result.
    pub(crate) fn commit(
        &self,
        registry: &mut Registry,
        entities: &mut ComponentStore<EntityRecord>,
    ) -> ProcessReport {
        let mut report = ProcessReport::default();

        // --- 0. Posted events ---
        for deliver in self.events.rx.try_iter() {
            report.events_delivered += deliver(registry);
        }

        // --- 1. Component deletions ---
        let mut deletions: BTreeSet<(EntityId, Tag)> = BTreeSet::new();
        for request in self.component_delete.rx.try_iter() {
            let Some(tag) = registry.tag_by_type_id(request.type_id) else {
                tracing::trace!(
                    entity = %request.entity,
                    component = request.type_name,
                    "detach of a type that was never attached"
                );
                report.stale_skipped += 1;
                continue;
            };
            if !deletions.insert((request.entity, tag)) {
                report.duplicate_deletions += 1;
            }
        }
        for (entity, tag) in deletions {
            let removed = match entities.get_mut(entity) {
                Some(record) => registry.remove_component(record, tag),
                None => false,
            };
            if removed {
                report.components_deleted += 1;
            } else {
                tracing::trace!(entity = %entity, tag = %tag, "stale component deletion skipped");
                report.stale_skipped += 1;
            }
        }

        // --- 2. Entity deletions ---
        let mut doomed: BTreeSet<EntityId> = BTreeSet::new();
        for entity in self.entity_delete.rx.try_iter() {
            if !doomed.insert(entity) {
                report.duplicate_deletions += 1;
            }
        }
        let mut unborn: BTreeSet<EntityId> = BTreeSet::new();
        for entity in doomed {
            match entities.get_mut(entity) {
                Some(record) => {
                    registry.detach_all(record);
                    entities.remove_component(entity);
                    report.entities_deleted += 1;
                }
                // Not live yet: either created this tick or already gone.
                None => {
                    unborn.insert(entity);
                }
            }
        }

        // --- 3. Entity creations ---
        for entity in self.entity_create.rx.try_iter() {
            if unborn.remove(&entity) {
                tracing::trace!(entity = %entity, "entity deleted before it was committed");
                report.stale_skipped += 1;
                continue;
            }
            if entities.contains(entity) {
                tracing::warn!(entity = %entity, "creation of an already live entity skipped");
                report.stale_skipped += 1;
                continue;
            }
            if entities.add_component(entity, EntityRecord::new(entity)).is_some() {
                report.entities_created += 1;
            }
        }
        report.stale_skipped += unborn.len();

        // --- 4. Component creations ---
        for create in self.component_create.rx.try_iter() {
            let Some(record) = entities.get_mut(create.entity) else {
                tracing::trace!(
                    entity = %create.entity,
                    component = create.component.type_name(),
                    "component creation for dead entity skipped"
                );
                report.stale_skipped += 1;
                continue;
            };
            let component = create.component.type_name();
            match create.component.apply(registry, record) {
                Ok(()) => report.components_created += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        entity = %create.entity,
                        component,
                        error = %e,
                        "component creation failed"
                    );
                }
            }
        }

        report.dropped_enqueues = self.dropped.swap(0, Ordering::Relaxed);
        tracing::debug!(
            events = report.events_delivered,
            components_deleted = report.components_deleted,
            entities_deleted = report.entities_deleted,
            entities_created = report.entities_created,
            components_created = report.components_created,
            stale = report.stale_skipped,
            failed = report.failed,
            dropped = report.dropped_enqueues,
            "commit processed"
        );
        report
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EcsConfig;
    use crate::world::World;

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Health(u32);

    fn setup_world() -> World {
        let mut world = World::with_config(EcsConfig::production()).unwrap();
        world.register_owner::<Position>().unwrap();
        world.register_owner::<Velocity>().unwrap();
        world.register_owner::<Health>().unwrap();
        world
    }

    // -- 1. Command routing -------------------------------------------------

    #[test]
    fn enqueue_routes_by_kind() {
        let queue = CommandQueue::new(None);
        let e = EntityId::from_raw(3);
        assert!(queue.enqueue(Command::CreateEntity(e)));
        assert!(queue.enqueue(Command::create_component(e, Health(1))));
        assert!(queue.enqueue(Command::delete_component::<Health>(e)));
        assert!(queue.enqueue(Command::DeleteEntity(e)));

        assert_eq!(queue.pending(), 4);
        for kind in [
            CommandKind::CreateEntity,
            CommandKind::DeleteEntity,
            CommandKind::CreateComponent,
            CommandKind::DeleteComponent,
        ] {
            assert_eq!(queue.pending_of(kind), 1);
        }
    }

    #[test]
    fn command_reports_kind_and_target() {
        let e = EntityId::from_raw(9);
        let cmd = Command::create_component(e, Health(5));
        assert_eq!(cmd.kind(), CommandKind::CreateComponent);
        assert_eq!(cmd.entity(), e);
        assert!(format!("{cmd:?}").contains("Health"));
    }

    // -- 2. Bounded queues --------------------------------------------------

    #[test]
    fn full_queue_drops_and_counts() {
        let queue = CommandQueue::new(Some(2));
        let e = EntityId::from_raw(3);
        assert!(queue.enqueue(Command::CreateEntity(e)));
        assert!(queue.enqueue(Command::CreateEntity(e)));
        assert!(!queue.enqueue(Command::CreateEntity(e)));
        // Other queues have their own bound.
        assert!(queue.enqueue(Command::DeleteEntity(e)));
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn dropped_count_is_reported_and_reset() {
        let mut world = World::with_config(EcsConfig {
            queue_capacity: Some(1),
            ..EcsConfig::production()
        })
        .unwrap();
        world.create_entity().unwrap();
        world.create_entity().unwrap();
        world.create_entity().unwrap();

        let report = world.process();
        assert_eq!(report.entities_created, 1);
        assert_eq!(report.dropped_enqueues, 2);
        assert_eq!(world.process().dropped_enqueues, 0);
    }

    // -- 3. Drain order -----------------------------------------------------

    #[test]
    fn creation_is_invisible_until_process() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.attach(e, Position { x: 1.0, y: 2.0 }).unwrap();

        assert!(!world.is_alive(e.id()));
        assert_eq!(world.get::<Position>(e.id()).unwrap(), None);

        world.process();
        assert!(world.is_alive(e.id()));
        assert_eq!(
            world.get::<Position>(e.id()).unwrap(),
            Some(&Position { x: 1.0, y: 2.0 })
        );
    }

    #[test]
    fn detach_then_attach_same_tick_replaces() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.attach(e, Health(100)).unwrap();
        world.process();

        // Enqueue order is irrelevant: deletions drain first.
        world.attach(e, Health(50)).unwrap();
        world.detach::<Health>(e).unwrap();
        let report = world.process();

        assert_eq!(report.components_deleted, 1);
        assert_eq!(report.components_created, 1);
        assert_eq!(world.get::<Health>(e.id()).unwrap(), Some(&Health(50)));
        let store = world.registry().store::<Health>().unwrap().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.pool().len(), 1);
    }

    #[test]
    fn duplicate_deletions_collapse() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.attach(e, Health(1)).unwrap();
        world.process();

        world.detach::<Health>(e).unwrap();
        world.detach::<Health>(e).unwrap();
        world.delete_entity(e).unwrap();
        world.delete_entity(e).unwrap();
        let report = world.process();

        assert_eq!(report.components_deleted, 1);
        assert_eq!(report.entities_deleted, 1);
        assert_eq!(report.duplicate_deletions, 2);
        assert!(!world.is_alive(e.id()));
    }

    #[test]
    fn entity_deletion_detaches_everything() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.attach(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.attach(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
        world.process();

        world.delete_entity(e).unwrap();
        world.process();

        let registry = world.registry();
        assert_eq!(registry.store::<Position>().unwrap().unwrap().pool().len(), 0);
        assert_eq!(registry.store::<Velocity>().unwrap().unwrap().pool().len(), 0);
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn create_and_delete_same_tick_never_goes_live() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.attach(e, Health(3)).unwrap();
        world.delete_entity(e).unwrap();
        let report = world.process();

        assert_eq!(report.entities_created, 0);
        assert_eq!(report.components_created, 0);
        assert_eq!(report.stale_skipped, 2);
        assert!(!world.is_alive(e.id()));
    }

    #[test]
    fn attach_to_deleted_entity_is_skipped() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.process();

        world.delete_entity(e).unwrap();
        world.attach(e, Health(9)).unwrap();
        let report = world.process();

        assert_eq!(report.entities_deleted, 1);
        assert_eq!(report.stale_skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            world.registry().store::<Health>().unwrap().unwrap().len(),
            0
        );
    }

    #[test]
    fn detach_of_absent_component_is_stale() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.process();

        world.detach::<Health>(e).unwrap();
        let report = world.process();
        assert_eq!(report.components_deleted, 0);
        assert_eq!(report.stale_skipped, 1);
    }

    #[test]
    fn recreating_a_live_entity_keeps_its_components() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.attach(e, Health(4)).unwrap();
        world.process();

        world.commands().enqueue(Command::CreateEntity(e.id()));
        let report = world.process();
        assert_eq!(report.entities_created, 0);
        assert_eq!(report.stale_skipped, 1);
        assert!(world.has::<Health>(e.id()).unwrap());
    }

    #[test]
    fn empty_process_is_noop() {
        let mut world = setup_world();
        let report = world.process();
        assert!(report.is_empty());
        assert_eq!(report, ProcessReport::default());
    }
}
