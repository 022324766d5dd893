//! Scene reset with persistent entities.
//!
//! A scene reset tears the registry down with [`Registry::reset`] and then
//! rebuilds it. Entities carrying the [`Persistent`] marker survive: their
//! full component sets are captured beforehand, recreated under fresh ids, and
//! any parent/child links among them are relinked through the old-to-new id
//! map. Links to non-persistent entities are dropped. Finally the caller's
//! scene-initialization callback populates the new scene.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::component::{ComponentMap, ComponentType, Persistent};
use crate::entity::Entity;
use crate::registry::Registry;

/// Populates a freshly reset registry.
pub type SceneInit = fn(&mut Registry);

/// Component sets and intra-group hierarchy of every persistent entity.
#[derive(Debug, Default)]
pub struct PersistentSnapshot {
    entities: Vec<(Entity, ComponentMap)>,
    /// `(child, parent)` links where both ends are persistent.
    links: Vec<(Entity, Entity)>,
}

impl PersistentSnapshot {
    /// Capture every entity carrying [`Persistent`].
    pub fn capture(registry: &Registry) -> Self {
        let marker = ComponentType::of::<Persistent>();
        let mut entities: Vec<(Entity, ComponentMap)> = registry
            .query(&[marker], &[])
            .into_iter()
            .filter_map(|id| registry.archetype(id))
            .flat_map(|archetype| archetype.entities())
            .filter_map(|entity| {
                registry
                    .clone_components(entity)
                    .map(|components| (entity, components))
            })
            .collect();
        entities.sort_by_key(|(entity, _)| *entity);

        let links = entities
            .iter()
            .filter_map(|(child, _)| {
                registry
                    .parent_of(*child)
                    .filter(|parent| registry.has::<Persistent>(*parent))
                    .map(|parent| (*child, parent))
            })
            .collect();

        Self { entities, links }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Recreate the captured entities in `registry` and relink their hierarchy.
    ///
    /// Returns the old-to-new id map.
    pub fn restore(self, registry: &mut Registry) -> HashMap<Entity, Entity> {
        let mut remap = HashMap::with_capacity(self.entities.len());
        for (old, components) in self.entities {
            let new = registry.allocate_entity();
            if let Err(e) = registry.create(new, components) {
                debug!(entity = ?old, error = %e, "failed to restore persistent entity");
                continue;
            }
            remap.insert(old, new);
        }
        for (child, parent) in self.links {
            let (Some(&child), Some(&parent)) = (remap.get(&child), remap.get(&parent)) else {
                continue;
            };
            if let Err(e) = registry.set_parent(child, parent) {
                debug!(child = ?child, parent = ?parent, error = %e, "failed to relink persistent entity");
            }
        }
        remap
    }
}

/// Reset `registry`, keeping persistent entities, then run `init`.
///
/// Returns the old-to-new id map of the surviving entities.
pub fn reset_scene(registry: &mut Registry, init: SceneInit) -> HashMap<Entity, Entity> {
    let snapshot = PersistentSnapshot::capture(registry);
    let discarded = registry.entity_count() - snapshot.len();
    registry.reset();
    let remap = snapshot.restore(registry);
    init(registry);
    info!(
        persistent = remap.len(),
        discarded,
        entities = registry.entity_count(),
        "scene reset"
    );
    remap
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
