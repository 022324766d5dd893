//! Tessera ECS -- archetype storage with a deferred-mutation staging buffer.
//!
//! Entities are grouped into archetypes by their exact set of component types.
//! The [`Registry`](registry::Registry) owns every archetype and keeps an
//! entity index, a type index and the parent/child hierarchy. Systems that run
//! concurrently read through [`View`](view::View)s and queue structural changes
//! into a [`StagingBuffer`](staging::StagingBuffer), which applies them at a
//! single synchronization point.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! impl Component for Position {}
//! impl Component for Velocity {}
//!
//! let mut registry = Registry::new();
//! let staging = StagingBuffer::new(&registry);
//!
//! let entity = staging.stage_new_entity(
//!     ComponentMap::new()
//!         .with(Position { x: 0.0, y: 0.0 })
//!         .with(Velocity { dx: 1.0, dy: 0.0 }),
//! );
//! staging.apply(&mut registry);
//!
//! assert_eq!(registry.get::<Position>(entity), Some(&Position { x: 0.0, y: 0.0 }));
//! assert_eq!(registry.view::<(&Position, &Velocity)>().size(), 1);
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod component;
pub mod entity;
pub mod hierarchy;
pub mod pool;
pub mod registry;
pub mod scene;
pub mod staging;
pub mod view;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Protocol violations reported by registry and pool operations.
///
/// None of these are fatal: the offending sub-operation is skipped and the
/// store is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// The entity is not live (never allocated, or already destroyed).
    #[error("entity {entity} does not exist")]
    NoSuchEntity { entity: entity::Entity },

    /// `create` was called on an entity that already has components.
    #[error("entity {entity} is already populated")]
    AlreadyPopulated { entity: entity::Entity },

    /// The entity already carries a component of this type.
    #[error("entity {entity} already has component {component}")]
    DuplicateComponent {
        entity: entity::Entity,
        component: &'static str,
    },

    /// The entity carries no component of this type.
    #[error("entity {entity} has no component {component}")]
    MissingComponent {
        entity: entity::Entity,
        component: &'static str,
    },

    #[error("entity {entity} cannot be its own parent")]
    SelfParent { entity: entity::Entity },

    #[error("entity {child} already has parent {parent}")]
    AlreadyParented {
        child: entity::Entity,
        parent: entity::Entity,
    },

    #[error("entity {child} has no parent")]
    NotAChild { child: entity::Entity },

    #[error("parenting {child} under {parent} would create a cycle")]
    HierarchyCycle {
        child: entity::Entity,
        parent: entity::Entity,
    },

    /// A type-erased value reached storage of a different type.
    #[error("expected {expected}, found a value of type {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::component::{
        BoxedComponent, Component, ComponentMap, ComponentType, Inactive, Persistent,
    };
    pub use crate::entity::{Entity, EntityAllocator};
    pub use crate::registry::Registry;
    pub use crate::scene::{reset_scene, SceneInit};
    pub use crate::staging::{ApplyReport, StagingBuffer};
    pub use crate::view::{Fetch, View, ViewFilter, ViewIter};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
