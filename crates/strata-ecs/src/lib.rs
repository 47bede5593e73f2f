//! Strata ECS -- Sparse-set Entity Component System with deferred commits.
//!
//! Each component type lives in its own sparse-set store backed by a chunked
//! pool, so attach, detach and membership are O(1) and values never move
//! while alive. Groups ("joins" over several component types) are maintained
//! incrementally as components come and go, so iterating one never scans the
//! world.
//!
//! Structural changes made through `&World` during a parallel execute phase
//! are queued and applied in a fixed order by [`World::process`], the single
//! commit point between phases.
//!
//! # Quick Start
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::with_config(EcsConfig::production()).unwrap();
//! world.register_owner::<Position>().unwrap();
//! world.register_owner::<Velocity>().unwrap();
//! world.register_view::<(Position, Velocity)>().unwrap();
//!
//! let entity = world.create_entity().unwrap();
//! world.attach(entity, Position { x: 0.0, y: 0.0 }).unwrap();
//! world.attach(entity, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//! world.process();
//!
//! let moving: Vec<_> = world.view::<(Position, Velocity)>().unwrap().collect();
//! assert_eq!(moving.len(), 1);
//! assert_eq!(world.get::<Position>(entity.id()).unwrap(), Some(&Position { x: 0.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod command;
pub mod config;
pub mod entity;
pub mod group;
pub mod handle;
pub mod id;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod sparse_set;
pub mod storage;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The 64-bit id counter wrapped around.
    #[error("id space exhausted")]
    IdSpaceExhausted,

    /// A component type was used that has no registered owner.
    #[error("component type '{name}' has no registered owner")]
    UnregisteredComponent { name: String },

    /// A group was viewed that was never registered.
    #[error("group '{name}' is not registered")]
    UnregisteredGroup { name: String },

    /// A second owner was registered for the same component type.
    #[error("component type '{name}' already has an owner")]
    AlreadyOwned { name: String },

    /// A handle issued by one world was used with another.
    #[error("handle belongs to {found}, not {expected}")]
    ForeignHandle {
        expected: entity::WorldId,
        found: entity::WorldId,
    },

    /// The entity is not live.
    #[error("entity {entity:?} is not live")]
    StaleEntity { entity: entity::EntityId },

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {details}")]
    InvalidConfig { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::command::{Command, CommandKind, CommandQueue, ProcessReport};
    pub use crate::config::{BuildMode, EcsConfig};
    pub use crate::entity::{EntityHandle, EntityId, EntityRecord, WorldId};
    pub use crate::group::{ComponentSet, GroupHandle, GroupIter};
    pub use crate::handle::{ComponentHandle, Owner, Reference};
    pub use crate::pool::PoolGrowth;
    pub use crate::registry::{Registry, SubscriberId, Tag};
    pub use crate::storage::{Component, ComponentHooks, ComponentStore};
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
