//! Deferred structural mutation ("late upgrade").
//!
//! Views borrow into archetype pools, so the registry's structure must not
//! change while systems run. Systems instead record their requests in a
//! [`StagingBuffer`], which is shared across worker threads behind a single
//! mutex, and the scheduler applies everything at one synchronization point.
//!
//! [`StagingBuffer::apply`] runs in a fixed order:
//!
//! 0. a requested scene reset (discarding every other pending request),
//! 1. pending adds and value writes on live entities,
//! 2. pending removals,
//! 3. materialization of staged-new entities,
//! 4. destructions, cascading through the hierarchy,
//!
//! and leaves the buffer empty. Failures are logged and counted in the
//! returned [`ApplyReport`]; they never abort the rest of the batch.
//!
//! # Example
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Health(u32);
//!
//! impl Component for Health {}
//!
//! let mut registry = Registry::new();
//! let staging = StagingBuffer::new(&registry);
//!
//! let entity = staging.stage_new_entity(ComponentMap::new());
//! staging.stage_add(entity, Health(3));
//! assert!(!staging.stage_add(entity, Health(4)));
//!
//! let report = staging.apply(&mut registry);
//! assert_eq!(report.created, 1);
//! assert_eq!(report.rejected, 1);
//! assert_eq!(registry.get::<Health>(entity), Some(&Health(3)));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::component::{BoxedComponent, Component, ComponentMap, ComponentType};
use crate::entity::{Entity, EntityAllocator};
use crate::registry::Registry;
use crate::scene::{self, SceneInit};

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

/// Summary of one [`StagingBuffer::apply`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Components attached to live entities.
    pub added: usize,
    /// Component values overwritten (or attached) by `stage_set`.
    pub set: usize,
    /// Components detached from live entities.
    pub removed: usize,
    /// Staged-new entities materialized.
    pub created: usize,
    /// Entities destroyed, cascaded descendants included.
    pub destroyed: usize,
    /// Requests that reached the registry and were refused by it.
    pub failed: usize,
    /// Requests dropped at staging time since the last apply.
    pub rejected: usize,
    /// Whether a scene reset ran.
    pub scene_reset: bool,
}

// ---------------------------------------------------------------------------
// Pending state
// ---------------------------------------------------------------------------

/// Counts of requests waiting for the next apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSummary {
    pub new_entities: usize,
    pub adds: usize,
    pub sets: usize,
    pub removes: usize,
    pub destroys: usize,
    pub scene_reset: bool,
}

impl PendingSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything recorded since the last apply. Keyed by entity in ordered maps
/// so that application order does not depend on hashing.
#[derive(Default)]
struct Pending {
    new_entities: BTreeMap<Entity, ComponentMap>,
    adds: BTreeMap<Entity, ComponentMap>,
    sets: BTreeMap<Entity, ComponentMap>,
    removes: BTreeMap<Entity, BTreeSet<ComponentType>>,
    destroys: BTreeSet<Entity>,
    /// Removes that replaced a staged set. The set may have been an insert,
    /// so the type can be absent at apply time; such a remove is a no-op.
    removes_after_set: BTreeSet<(Entity, ComponentType)>,
    scene_reset: Option<SceneInit>,
    rejected: usize,
}

impl Pending {
    fn summary(&self) -> PendingSummary {
        PendingSummary {
            new_entities: self.new_entities.len(),
            adds: self.adds.values().map(ComponentMap::len).sum(),
            sets: self.sets.values().map(ComponentMap::len).sum(),
            removes: self.removes.values().map(BTreeSet::len).sum(),
            destroys: self.destroys.len(),
            scene_reset: self.scene_reset.is_some(),
        }
    }

    fn cancel_remove(&mut self, entity: Entity, ty: ComponentType) -> bool {
        let Some(types) = self.removes.get_mut(&entity) else {
            return false;
        };
        let cancelled = types.remove(&ty);
        if types.is_empty() {
            self.removes.remove(&entity);
        }
        cancelled
    }

    fn take_value(
        map: &mut BTreeMap<Entity, ComponentMap>,
        entity: Entity,
        ty: ComponentType,
    ) -> Option<BoxedComponent> {
        let components = map.get_mut(&entity)?;
        let value = components.remove(ty);
        if components.is_empty() {
            map.remove(&entity);
        }
        value
    }
}

// ---------------------------------------------------------------------------
// StagingBuffer
// ---------------------------------------------------------------------------

/// Thread-safe recorder of structural requests against a [`Registry`].
///
/// All `stage_*` methods take `&self` and may be called from any thread while
/// other threads hold views into the registry.
pub struct StagingBuffer {
    allocator: Arc<EntityAllocator>,
    pending: Mutex<Pending>,
    last_report: Mutex<ApplyReport>,
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("pending", &self.pending())
            .finish()
    }
}

impl StagingBuffer {
    /// Create a buffer that reserves entity tokens from `registry`'s allocator.
    pub fn new(registry: &Registry) -> Self {
        Self {
            allocator: Arc::clone(registry.allocator()),
            pending: Mutex::new(Pending::default()),
            last_report: Mutex::new(ApplyReport::default()),
        }
    }

    /// Reserve an entity token now and record its initial components.
    ///
    /// The token is valid for staging calls immediately; the entity becomes
    /// visible in the registry at the next apply.
    pub fn stage_new_entity(&self, components: ComponentMap) -> Entity {
        let entity = self.allocator.reserve();
        self.pending.lock().new_entities.insert(entity, components);
        entity
    }

    /// Stage attaching `value` to `entity`.
    ///
    /// Returns `false` if the request was dropped: the entity is staged for
    /// destruction, or a value of the same type is already staged for it.
    pub fn stage_add<T: Component>(&self, entity: Entity, value: T) -> bool {
        self.stage_add_boxed(entity, Box::new(value))
    }

    /// Type-erased form of [`stage_add`](Self::stage_add).
    pub fn stage_add_boxed(&self, entity: Entity, value: BoxedComponent) -> bool {
        let ty = (*value).component_type();
        let mut guard = self.pending.lock();
        let pending = &mut *guard;
        if pending.destroys.contains(&entity) {
            debug!(entity = ?entity, component = ty.name(), "add dropped, entity staged for destroy");
            return false;
        }
        if let Some(components) = pending.new_entities.get_mut(&entity) {
            if components.contains(ty) {
                pending.rejected += 1;
                warn!(entity = ?entity, component = ty.name(), "duplicate add rejected");
                return false;
            }
            components.insert_boxed(value);
            return true;
        }
        let already_staged = pending.adds.get(&entity).is_some_and(|c| c.contains(ty))
            || pending.sets.get(&entity).is_some_and(|c| c.contains(ty));
        if already_staged {
            pending.rejected += 1;
            warn!(entity = ?entity, component = ty.name(), "duplicate add rejected");
            return false;
        }
        // Remove followed by add of the same type nets out to a value write.
        if pending.cancel_remove(entity, ty) {
            pending.sets.entry(entity).or_default().insert_boxed(value);
        } else {
            pending.adds.entry(entity).or_default().insert_boxed(value);
        }
        true
    }

    /// Stage writing `value` to `entity`, overwriting any current or staged
    /// value of the same type.
    pub fn stage_set<T: Component>(&self, entity: Entity, value: T) -> bool {
        self.stage_set_boxed(entity, Box::new(value))
    }

    /// Type-erased form of [`stage_set`](Self::stage_set).
    pub fn stage_set_boxed(&self, entity: Entity, value: BoxedComponent) -> bool {
        let ty = (*value).component_type();
        let mut guard = self.pending.lock();
        let pending = &mut *guard;
        if pending.destroys.contains(&entity) {
            return false;
        }
        if let Some(components) = pending.new_entities.get_mut(&entity) {
            components.insert_boxed(value);
            return true;
        }
        pending.cancel_remove(entity, ty);
        match pending.adds.get_mut(&entity) {
            Some(components) if components.contains(ty) => {
                components.insert_boxed(value);
            }
            _ => {
                pending.sets.entry(entity).or_default().insert_boxed(value);
            }
        }
        true
    }

    /// Stage detaching component `T` from `entity`.
    pub fn stage_remove<T: Component>(&self, entity: Entity) -> bool {
        self.stage_remove_type(entity, ComponentType::of::<T>())
    }

    /// Type-erased form of [`stage_remove`](Self::stage_remove).
    ///
    /// A pending add of the same type is cancelled instead of emitting a
    /// removal. A no-op if the entity is staged for destruction.
    pub fn stage_remove_type(&self, entity: Entity, ty: ComponentType) -> bool {
        let mut guard = self.pending.lock();
        let pending = &mut *guard;
        if pending.destroys.contains(&entity) {
            return false;
        }
        if let Some(components) = pending.new_entities.get_mut(&entity) {
            if components.remove(ty).is_some() {
                return true;
            }
            pending.rejected += 1;
            warn!(entity = ?entity, component = ty.name(), "remove of absent component rejected");
            return false;
        }
        if Pending::take_value(&mut pending.adds, entity, ty).is_some() {
            return true;
        }
        // A staged write may target a value that already exists, so the
        // removal still has to be recorded.
        if Pending::take_value(&mut pending.sets, entity, ty).is_some() {
            pending.removes_after_set.insert((entity, ty));
        }
        pending.removes.entry(entity).or_default().insert(ty);
        true
    }

    /// Stage destroying `entity` and every descendant currently linked under
    /// it in `registry`. Other pending requests for those entities are
    /// cleared.
    pub fn stage_destroy(&self, registry: &Registry, entity: Entity) {
        let mut doomed = vec![entity];
        doomed.extend(registry.descendants_of(entity));
        let mut pending = self.pending.lock();
        for e in doomed {
            pending.adds.remove(&e);
            pending.sets.remove(&e);
            pending.removes.remove(&e);
            pending.destroys.insert(e);
        }
    }

    /// Request a scene reset at the next apply.
    ///
    /// The reset runs before any other pending request, which are then
    /// discarded as belonging to the old scene.
    pub fn stage_scene_reset(&self, init: SceneInit) {
        self.pending.lock().scene_reset = Some(init);
    }

    /// Counts of requests waiting for the next apply.
    pub fn pending(&self) -> PendingSummary {
        self.pending.lock().summary()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// The report of the most recent apply.
    pub fn last_report(&self) -> ApplyReport {
        self.last_report.lock().clone()
    }

    /// Apply every pending request to `registry` and clear the buffer.
    pub fn apply(&self, registry: &mut Registry) -> ApplyReport {
        let pending = std::mem::take(&mut *self.pending.lock());
        let report = Self::apply_pending(pending, registry);
        *self.last_report.lock() = report.clone();
        report
    }

    fn apply_pending(pending: Pending, registry: &mut Registry) -> ApplyReport {
        let mut report = ApplyReport {
            rejected: pending.rejected,
            ..ApplyReport::default()
        };

        if let Some(init) = pending.scene_reset {
            let summary = pending.summary();
            scene::reset_scene(registry, init);
            report.scene_reset = true;
            debug!(discarded = ?summary, "pending requests of previous scene discarded");
            return report;
        }

        // 1. adds and value writes
        for (entity, components) in pending.adds {
            for value in components.into_values() {
                let ty = (*value).component_type();
                match registry.add_boxed(entity, value) {
                    Ok(()) => report.added += 1,
                    Err(e) => {
                        report.failed += 1;
                        debug!(entity = ?entity, component = ty.name(), error = %e, "staged add failed");
                    }
                }
            }
        }
        for (entity, components) in pending.sets {
            for value in components.into_values() {
                let ty = (*value).component_type();
                match registry.set_boxed(entity, value) {
                    Ok(()) => report.set += 1,
                    Err(e) => {
                        report.failed += 1;
                        debug!(entity = ?entity, component = ty.name(), error = %e, "staged set failed");
                    }
                }
            }
        }

        // 2. removes
        for (entity, types) in pending.removes {
            for ty in types {
                let after_set = pending.removes_after_set.contains(&(entity, ty));
                if after_set && !registry.has_type(entity, ty) {
                    debug!(entity = ?entity, component = ty.name(), "remove cancelled a staged insert");
                    continue;
                }
                match registry.remove_type(entity, ty) {
                    Ok(()) => report.removed += 1,
                    Err(e) => {
                        report.failed += 1;
                        debug!(entity = ?entity, component = ty.name(), error = %e, "staged remove failed");
                    }
                }
            }
        }

        // 3. new entities
        for (entity, components) in pending.new_entities {
            match registry.create(entity, components) {
                Ok(()) => report.created += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(entity = ?entity, error = %e, "staged entity creation failed");
                }
            }
        }

        // 4. destroys
        for entity in pending.destroys {
            if registry.contains(entity) {
                match registry.destroy_recursive(entity) {
                    Ok(destroyed) => report.destroyed += destroyed.len(),
                    Err(e) => {
                        report.failed += 1;
                        debug!(entity = ?entity, error = %e, "staged destroy failed");
                    }
                }
            } else if !registry.release_token(entity) {
                // Already removed by an earlier cascade in this batch, or stale.
                debug!(entity = ?entity, "staged destroy skipped, entity not live");
            }
        }

        debug!(
            added = report.added,
            set = report.set,
            removed = report.removed,
            created = report.created,
            destroyed = report.destroyed,
            failed = report.failed,
            rejected = report.rejected,
            "staging buffer applied"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Persistent;
    use crate::test_support::count_warnings;

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Health(u32);

    #[derive(Debug, Clone, PartialEq)]
    struct Tag;

    impl Component for Position {}
    impl Component for Health {}
    impl Component for Tag {}

    fn setup() -> (Registry, StagingBuffer) {
        let registry = Registry::new();
        let staging = StagingBuffer::new(&registry);
        (registry, staging)
    }

    fn spawn(registry: &mut Registry, components: ComponentMap) -> Entity {
        let e = registry.allocate_entity();
        registry.create(e, components).unwrap();
        e
    }

    // -- 1. New entities ----------------------------------------------------

    #[test]
    fn new_entity_token_is_reserved_immediately() {
        let (mut registry, staging) = setup();
        let a = staging.stage_new_entity(ComponentMap::new().with(Health(5)));
        let b = staging.stage_new_entity(ComponentMap::new());
        assert_ne!(a, b);
        assert!(registry.allocator().is_reserved(a));
        assert!(!registry.contains(a));

        let report = staging.apply(&mut registry);
        assert_eq!(report.created, 2);
        assert_eq!(registry.get::<Health>(a), Some(&Health(5)));
        assert!(registry.contains(b));
        assert!(registry.is_consistent());
    }

    #[test]
    fn add_to_staged_new_entity_merges() {
        let (mut registry, staging) = setup();
        let e = staging.stage_new_entity(ComponentMap::new().with(Health(1)));
        assert!(staging.stage_add(e, Position { x: 1.0, y: 1.0 }));
        assert_eq!(staging.pending().new_entities, 1);
        assert_eq!(staging.pending().adds, 0);

        let report = staging.apply(&mut registry);
        assert_eq!(report.added, 0);
        assert_eq!(registry.signature_of(e).map(<[_]>::len), Some(2));
    }

    // -- 2. Adds, sets and removes ------------------------------------------

    #[test]
    fn duplicate_add_applies_once_and_reports_once() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Tag));
        assert!(staging.stage_add(e, Health(1)));
        assert!(!staging.stage_add(e, Health(2)));

        let report = staging.apply(&mut registry);
        assert_eq!(report.added, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(registry.get::<Health>(e), Some(&Health(1)));
    }

    #[test]
    fn add_of_present_type_fails_at_apply() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Health(1)));
        staging.stage_add(e, Health(2));
        let report = staging.apply(&mut registry);
        assert_eq!(report.failed, 1);
        assert_eq!(registry.get::<Health>(e), Some(&Health(1)));
    }

    #[test]
    fn remove_cancels_pending_add() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Tag));
        staging.stage_add(e, Health(1));
        assert!(staging.stage_remove::<Health>(e));
        assert!(staging.is_empty());

        let report = staging.apply(&mut registry);
        assert_eq!(report, ApplyReport::default());
        assert!(!registry.has::<Health>(e));
    }

    #[test]
    fn remove_then_add_becomes_a_write() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Health(1)));
        staging.stage_remove::<Health>(e);
        staging.stage_add(e, Health(7));
        assert_eq!(staging.pending().removes, 0);

        let report = staging.apply(&mut registry);
        assert_eq!(report.set, 1);
        assert_eq!(registry.get::<Health>(e), Some(&Health(7)));
    }

    #[test]
    fn set_overwrites_and_inserts() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Health(1)));
        staging.stage_set(e, Health(2));
        staging.stage_set(e, Health(3));
        staging.stage_set(e, Position { x: 0.0, y: 1.0 });

        let report = staging.apply(&mut registry);
        assert_eq!(report.set, 2);
        assert_eq!(registry.get::<Health>(e), Some(&Health(3)));
        assert_eq!(registry.get::<Position>(e), Some(&Position { x: 0.0, y: 1.0 }));
    }

    #[test]
    fn remove_from_live_entity() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Health(1)).with(Tag));
        staging.stage_remove::<Tag>(e);
        let report = staging.apply(&mut registry);
        assert_eq!(report.removed, 1);
        assert!(!registry.has::<Tag>(e));
        assert!(registry.is_consistent());
    }

    #[test]
    fn adds_apply_before_removes_and_creates() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Tag));
        staging.stage_add(e, Health(1));
        staging.stage_remove::<Tag>(e);
        let n = staging.stage_new_entity(ComponentMap::new().with(Tag));

        let report = staging.apply(&mut registry);
        assert_eq!((report.added, report.removed, report.created), (1, 1, 1));
        assert!(registry.has::<Health>(e));
        assert!(!registry.has::<Tag>(e));
        assert!(registry.has::<Tag>(n));
    }

    #[test]
    fn set_on_staged_new_entity_merges() {
        let (mut registry, staging) = setup();
        let e = staging.stage_new_entity(ComponentMap::new().with(Health(1)));
        assert!(staging.stage_set(e, Health(4)));
        assert!(staging.stage_set(e, Tag));
        assert_eq!(staging.pending().sets, 0);

        let report = staging.apply(&mut registry);
        assert_eq!((report.created, report.set), (1, 0));
        assert_eq!(registry.get::<Health>(e), Some(&Health(4)));
        assert!(registry.has::<Tag>(e));
    }

    #[test]
    fn remove_on_staged_new_entity_drops_type() {
        let (mut registry, staging) = setup();
        let e = staging.stage_new_entity(ComponentMap::new().with(Health(1)).with(Tag));
        assert!(staging.stage_remove::<Tag>(e));

        let report = staging.apply(&mut registry);
        assert_eq!(report.removed, 0);
        assert_eq!(report.rejected, 0);
        assert!(!registry.has::<Tag>(e));
        assert_eq!(registry.get::<Health>(e), Some(&Health(1)));
    }

    #[test]
    fn remove_of_absent_type_on_staged_new_entity_is_rejected() {
        let (mut registry, staging) = setup();
        let e = staging.stage_new_entity(ComponentMap::new().with(Health(1)).with(Tag));
        assert!(staging.stage_remove::<Tag>(e));
        let (accepted, warnings) = count_warnings(|| staging.stage_remove::<Tag>(e));
        assert!(!accepted);
        assert_eq!(warnings, 1);

        let report = staging.apply(&mut registry);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(registry.get::<Health>(e), Some(&Health(1)));
    }

    #[test]
    fn remove_after_inserting_set_cancels_it() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Tag));
        assert!(staging.stage_set(e, Health(2)));
        assert!(staging.stage_remove::<Health>(e));
        assert_eq!(staging.pending().sets, 0);

        let (report, warnings) = count_warnings(|| staging.apply(&mut registry));
        assert_eq!(warnings, 0);
        assert_eq!(report.failed, 0);
        assert_eq!((report.set, report.removed), (0, 0));
        assert!(!registry.has::<Health>(e));
        assert!(registry.has::<Tag>(e));
    }

    #[test]
    fn remove_after_overwriting_set_removes_value() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Health(1)).with(Tag));
        staging.stage_set(e, Health(2));
        staging.stage_remove::<Health>(e);

        let report = staging.apply(&mut registry);
        assert_eq!((report.set, report.removed, report.failed), (0, 1, 0));
        assert!(!registry.has::<Health>(e));
        assert!(registry.is_consistent());
    }

    // -- 3. Destruction -------------------------------------------------------

    #[test]
    fn destroy_dominates_other_requests() {
        let (mut registry, staging) = setup();
        let e = spawn(&mut registry, ComponentMap::new().with(Health(1)));
        staging.stage_add(e, Tag);
        staging.stage_destroy(&registry, e);
        assert!(!staging.stage_add(e, Position { x: 0.0, y: 0.0 }));
        assert!(!staging.stage_remove::<Health>(e));
        assert_eq!(staging.pending().adds, 0);

        let report = staging.apply(&mut registry);
        assert_eq!(report.destroyed, 1);
        assert_eq!(report.failed, 0);
        assert!(!registry.contains(e));
    }

    #[test]
    fn destroy_cascades_through_descendants() {
        let (mut registry, staging) = setup();
        let root = spawn(&mut registry, ComponentMap::new().with(Tag));
        let mid = spawn(&mut registry, ComponentMap::new().with(Tag));
        let leaf = spawn(&mut registry, ComponentMap::new().with(Health(1)));
        let other = spawn(&mut registry, ComponentMap::new().with(Health(2)));
        registry.set_parent(mid, root).unwrap();
        registry.set_parent(leaf, mid).unwrap();

        staging.stage_destroy(&registry, root);
        assert_eq!(staging.pending().destroys, 3);

        let report = staging.apply(&mut registry);
        assert_eq!(report.destroyed, 3);
        assert_eq!(registry.entity_count(), 1);
        assert!(registry.contains(other));
        assert_eq!(registry.hierarchy().edge_count(), 0);
        assert!(registry.is_consistent());
    }

    #[test]
    fn create_then_destroy_in_same_frame() {
        let (mut registry, staging) = setup();
        let e = staging.stage_new_entity(ComponentMap::new().with(Health(1)));
        staging.stage_destroy(&registry, e);

        let report = staging.apply(&mut registry);
        assert_eq!(report.created, 1);
        assert_eq!(report.destroyed, 1);
        assert!(!registry.contains(e));
        assert!(!registry.allocator().is_reserved(e));
        assert_eq!(registry.archetype_count(), 1);
    }

    // -- 4. Scene reset -------------------------------------------------------

    #[test]
    fn scene_reset_discards_old_requests() {
        let (mut registry, staging) = setup();
        let keep = spawn(
            &mut registry,
            ComponentMap::new().with(Persistent).with(Health(9)),
        );
        let _drop = spawn(&mut registry, ComponentMap::new().with(Tag));
        staging.stage_add(keep, Tag);
        staging.stage_new_entity(ComponentMap::new().with(Health(1)));
        staging.stage_scene_reset(|registry| {
            let e = registry.allocate_entity();
            let _ = registry.create(e, ComponentMap::new().with(Position { x: 0.0, y: 0.0 }));
        });
        assert!(staging.pending().scene_reset);

        let report = staging.apply(&mut registry);
        assert!(report.scene_reset);
        assert_eq!(report.added, 0);
        assert_eq!(report.created, 0);
        assert_eq!(registry.entity_count(), 2);
        assert_eq!(registry.view::<(&Health,)>().size(), 1);
        assert_eq!(registry.view::<(&Tag,)>().size(), 0);
        assert!(staging.is_empty());
        assert!(registry.is_consistent());
    }

    // -- 5. Concurrency and bookkeeping ---------------------------------------

    #[test]
    fn staging_from_many_threads() {
        let (mut registry, staging) = setup();
        std::thread::scope(|scope| {
            for t in 0..4u32 {
                let staging = &staging;
                scope.spawn(move || {
                    for i in 0..25 {
                        staging.stage_new_entity(ComponentMap::new().with(Health(t * 100 + i)));
                    }
                });
            }
        });
        let report = staging.apply(&mut registry);
        assert_eq!(report.created, 100);
        assert_eq!(registry.entity_count(), 100);
        assert!(registry.is_consistent());
    }

    #[test]
    fn apply_clears_buffer_and_records_report() {
        let (mut registry, staging) = setup();
        staging.stage_new_entity(ComponentMap::new().with(Tag));
        assert!(!staging.is_empty());
        let report = staging.apply(&mut registry);
        assert!(staging.is_empty());
        assert_eq!(staging.last_report(), report);

        let second = staging.apply(&mut registry);
        assert_eq!(second, ApplyReport::default());
    }

    #[test]
    fn failures_do_not_abort_the_batch() {
        let (mut registry, staging) = setup();
        let ghost = Entity::from_raw(500);
        let e = spawn(&mut registry, ComponentMap::new().with(Tag));
        staging.stage_add(ghost, Health(1));
        staging.stage_add(e, Health(2));
        let report = staging.apply(&mut registry);
        assert_eq!(report.failed, 1);
        assert_eq!(report.added, 1);
        assert_eq!(registry.get::<Health>(e), Some(&Health(2)));
    }
}
