//! The registry: owner of all archetypes, indices and the entity hierarchy.
//!
//! The [`Registry`] keeps three indices in lock step:
//!
//! - `entity -> archetype`: exactly one entry per live entity.
//! - `type -> set<archetype>`: every live archetype containing that type. Used to
//!   intersect candidate sets for queries and to find migration targets without
//!   scanning every archetype.
//! - the parent/child [`Hierarchy`].
//!
//! Structural operations (`create`, `add_component`, `remove_component`,
//! `destroy`) are single-threaded. During a frame, systems reach the registry
//! only through shared borrows and queue their structural requests in the
//! [`StagingBuffer`](crate::staging::StagingBuffer), which applies them here at
//! the synchronization point.
//!
//! Archetype slot 0 is a permanent archetype with an empty signature. It is the
//! home of freshly allocated entities and is never reclaimed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{BoxedComponent, Component, ComponentMap, ComponentType};
use crate::entity::{Entity, EntityAllocator};
use crate::hierarchy::Hierarchy;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Archetype store with entity, type and hierarchy indices.
pub struct Registry {
    /// Token allocator, shared with staging buffers.
    allocator: Arc<EntityAllocator>,
    /// Archetype slots, indexed by `ArchetypeId.0`. `None` marks a reclaimed slot.
    archetypes: Vec<Option<Archetype>>,
    /// Reclaimed slots available for reuse.
    free_slots: Vec<u32>,
    /// Live entity -> the archetype it resides in.
    entity_index: HashMap<Entity, ArchetypeId>,
    /// Component type -> every live archetype storing it.
    type_index: HashMap<ComponentType, HashSet<ArchetypeId>>,
    hierarchy: Hierarchy,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entity_count", &self.entity_index.len())
            .field("archetype_count", &self.archetype_count())
            .field("hierarchy_edges", &self.hierarchy.edge_count())
            .finish()
    }
}

impl Registry {
    /// Create an empty registry holding only the permanent empty archetype.
    pub fn new() -> Self {
        Self {
            allocator: Arc::new(EntityAllocator::new()),
            archetypes: vec![Some(Archetype::empty(ArchetypeId::EMPTY))],
            free_slots: Vec::new(),
            entity_index: HashMap::new(),
            type_index: HashMap::new(),
            hierarchy: Hierarchy::new(),
        }
    }

    /// The token allocator shared with staging buffers.
    pub fn allocator(&self) -> &Arc<EntityAllocator> {
        &self.allocator
    }

    // -- archetype management -----------------------------------------------

    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index()).and_then(Option::as_ref)
    }

    fn archetype_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Every live archetype, including the permanent empty one.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter().flatten()
    }

    /// Number of live archetypes, including the permanent empty one.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len() - self.free_slots.len()
    }

    /// The id the next inserted archetype will receive.
    fn vacant_archetype_id(&self) -> ArchetypeId {
        match self.free_slots.last() {
            Some(&slot) => ArchetypeId(slot),
            None => ArchetypeId(self.archetypes.len() as u32),
        }
    }

    /// Store `archetype` in the slot named by its id and index its types.
    fn insert_archetype(&mut self, archetype: Archetype) {
        let id = archetype.id();
        debug_assert_eq!(id, self.vacant_archetype_id());
        for ty in archetype.signature() {
            self.type_index.entry(*ty).or_default().insert(id);
        }
        debug!(archetype = ?id, signature = ?archetype.signature(), "archetype created");
        if self.free_slots.last() == Some(&id.0) {
            self.free_slots.pop();
            self.archetypes[id.index()] = Some(archetype);
        } else {
            self.archetypes.push(Some(archetype));
        }
    }

    /// Delete `id` if it is empty and not the permanent empty archetype.
    fn reclaim_if_empty(&mut self, id: ArchetypeId) {
        if id == ArchetypeId::EMPTY {
            return;
        }
        let Some(archetype) = self.archetype(id) else {
            return;
        };
        if !archetype.is_empty() {
            return;
        }
        let signature = archetype.signature().to_vec();
        for ty in &signature {
            if let Some(bucket) = self.type_index.get_mut(ty) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.type_index.remove(ty);
                }
            }
        }
        self.archetypes[id.index()] = None;
        self.free_slots.push(id.0);
        debug!(archetype = ?id, signature = ?signature, "archetype reclaimed");
    }

    /// Intersection of the type-index buckets of every type in `types`.
    ///
    /// Starts from the smallest bucket; any missing bucket yields an empty set.
    fn candidates(&self, types: &[ComponentType]) -> HashSet<ArchetypeId> {
        let mut buckets = Vec::with_capacity(types.len());
        for ty in types {
            match self.type_index.get(ty) {
                Some(bucket) => buckets.push(bucket),
                None => return HashSet::new(),
            }
        }
        buckets.sort_by_key(|bucket| bucket.len());
        let Some((first, rest)) = buckets.split_first() else {
            return HashSet::new();
        };
        first
            .iter()
            .copied()
            .filter(|id| rest.iter().all(|bucket| bucket.contains(id)))
            .collect()
    }

    /// The archetype whose signature is exactly `types`, if any.
    fn find_exact(&self, types: &[ComponentType]) -> Option<ArchetypeId> {
        if types.is_empty() {
            return Some(ArchetypeId::EMPTY);
        }
        self.candidates(types)
            .into_iter()
            .find(|id| self.archetype(*id).is_some_and(|a| a.is_exactly(types)))
    }

    /// The archetype whose signature is `old` plus `added`, if any.
    fn find_plus_one(&self, old: &Archetype, added: ComponentType) -> Option<ArchetypeId> {
        let mut types = old.signature().to_vec();
        types.push(added);
        self.candidates(&types).into_iter().find(|id| {
            self.archetype(*id)
                .is_some_and(|a| a.is_exactly_plus_one(old, added))
        })
    }

    /// The archetype whose signature is `old` minus `removed`, if any.
    fn find_minus_one(&self, old: &Archetype, removed: ComponentType) -> Option<ArchetypeId> {
        let types: Vec<ComponentType> = old
            .signature()
            .iter()
            .copied()
            .filter(|ty| *ty != removed)
            .collect();
        if types.is_empty() {
            return Some(ArchetypeId::EMPTY);
        }
        self.candidates(&types).into_iter().find(|id| {
            self.archetype(*id)
                .is_some_and(|a| a.is_exactly_minus_one(old, removed))
        })
    }

    /// Borrow two distinct archetypes: `source` shared, `target` exclusive.
    fn split_pair(
        &mut self,
        source: ArchetypeId,
        target: ArchetypeId,
    ) -> Option<(&Archetype, &mut Archetype)> {
        let (s, t) = (source.index(), target.index());
        if s == t || s >= self.archetypes.len() || t >= self.archetypes.len() {
            return None;
        }
        if s < t {
            let (low, high) = self.archetypes.split_at_mut(t);
            Some((low[s].as_ref()?, high[0].as_mut()?))
        } else {
            let (low, high) = self.archetypes.split_at_mut(s);
            Some((high[0].as_ref()?, low[t].as_mut()?))
        }
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Reserve an entity id and park it in the permanent empty archetype.
    pub fn allocate_entity(&mut self) -> Entity {
        let entity = self.allocator.reserve();
        self.park(entity);
        entity
    }

    fn park(&mut self, entity: Entity) {
        if let Some(empty) = self.archetype_mut(ArchetypeId::EMPTY) {
            let _ = empty.insert_new(entity, ComponentMap::new());
        }
        self.entity_index.insert(entity, ArchetypeId::EMPTY);
    }

    /// Populate an allocated entity with its initial component set.
    ///
    /// `entity` must be a reserved token that is not yet in any archetype other
    /// than the permanent empty one. A failure is logged and leaves the
    /// registry unchanged.
    pub fn create(&mut self, entity: Entity, components: ComponentMap) -> Result<(), EcsError> {
        self.populate(entity, components)
            .inspect_err(|e| warn!(entity = ?entity, error = %e, "create rejected"))
    }

    fn populate(&mut self, entity: Entity, components: ComponentMap) -> Result<(), EcsError> {
        let parked = match self.entity_index.get(&entity) {
            Some(&id) if id != ArchetypeId::EMPTY => {
                return Err(EcsError::AlreadyPopulated { entity });
            }
            Some(_) => true,
            None if self.allocator.is_reserved(entity) => false,
            None => return Err(EcsError::NoSuchEntity { entity }),
        };

        if components.is_empty() {
            if !parked {
                self.park(entity);
            }
            return Ok(());
        }

        let types = components.types();
        let target = match self.find_exact(&types) {
            Some(id) => {
                let archetype = self
                    .archetype_mut(id)
                    .ok_or(EcsError::NoSuchEntity { entity })?;
                archetype.insert_new(entity, components)?;
                id
            }
            None => {
                let id = self.vacant_archetype_id();
                let archetype = Archetype::fresh(id, entity, components)?;
                self.insert_archetype(archetype);
                id
            }
        };

        if parked {
            if let Some(empty) = self.archetype_mut(ArchetypeId::EMPTY) {
                empty.evict(entity);
            }
        }
        self.entity_index.insert(entity, target);
        Ok(())
    }

    /// Attach a new component, migrating the entity to the matching archetype.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        self.add_boxed(entity, Box::new(value))
    }

    /// Type-erased form of [`add_component`](Self::add_component).
    pub fn add_boxed(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError> {
        let ty = (*value).component_type();
        self.attach(entity, value).inspect_err(
            |e| warn!(entity = ?entity, component = ty.name(), error = %e, "add rejected"),
        )
    }

    fn attach(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError> {
        let old_id = *self
            .entity_index
            .get(&entity)
            .ok_or(EcsError::NoSuchEntity { entity })?;
        let ty = (*value).component_type();
        let old = self
            .archetype(old_id)
            .ok_or(EcsError::NoSuchEntity { entity })?;
        if old.has_type(ty) {
            return Err(EcsError::DuplicateComponent {
                entity,
                component: ty.name(),
            });
        }

        let target = match self.find_plus_one(old, ty) {
            Some(target_id) => {
                let (source, target) = self
                    .split_pair(old_id, target_id)
                    .ok_or(EcsError::NoSuchEntity { entity })?;
                target.migrate_with(entity, source, value)?;
                target_id
            }
            None => {
                let id = self.vacant_archetype_id();
                let archetype = Archetype::grow(id, old, entity, value)?;
                self.insert_archetype(archetype);
                id
            }
        };

        self.finish_migration(entity, old_id, target);
        Ok(())
    }

    /// Detach component `T`, migrating the entity to the matching archetype.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.remove_type(entity, ComponentType::of::<T>())
    }

    /// Type-erased form of [`remove_component`](Self::remove_component).
    pub fn remove_type(&mut self, entity: Entity, ty: ComponentType) -> Result<(), EcsError> {
        self.detach(entity, ty).inspect_err(
            |e| warn!(entity = ?entity, component = ty.name(), error = %e, "remove rejected"),
        )
    }

    fn detach(&mut self, entity: Entity, ty: ComponentType) -> Result<(), EcsError> {
        let old_id = *self
            .entity_index
            .get(&entity)
            .ok_or(EcsError::NoSuchEntity { entity })?;
        let old = self
            .archetype(old_id)
            .ok_or(EcsError::NoSuchEntity { entity })?;
        if !old.has_type(ty) {
            return Err(EcsError::MissingComponent {
                entity,
                component: ty.name(),
            });
        }

        let target = match self.find_minus_one(old, ty) {
            Some(target_id) => {
                let (source, target) = self
                    .split_pair(old_id, target_id)
                    .ok_or(EcsError::NoSuchEntity { entity })?;
                target.migrate_without(entity, source, ty)?;
                target_id
            }
            None => {
                let id = self.vacant_archetype_id();
                let archetype = Archetype::shrink(id, old, entity, ty)?;
                self.insert_archetype(archetype);
                id
            }
        };

        self.finish_migration(entity, old_id, target);
        Ok(())
    }

    fn finish_migration(&mut self, entity: Entity, old_id: ArchetypeId, target: ArchetypeId) {
        if let Some(old) = self.archetype_mut(old_id) {
            old.evict(entity);
        }
        self.entity_index.insert(entity, target);
        self.reclaim_if_empty(old_id);
    }

    /// Overwrite component `T` if present, otherwise attach it.
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        self.set_boxed(entity, Box::new(value))
    }

    /// Type-erased form of [`set_component`](Self::set_component).
    pub fn set_boxed(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError> {
        let ty = (*value).component_type();
        self.overwrite(entity, value).inspect_err(
            |e| warn!(entity = ?entity, component = ty.name(), error = %e, "set rejected"),
        )
    }

    fn overwrite(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError> {
        let id = *self
            .entity_index
            .get(&entity)
            .ok_or(EcsError::NoSuchEntity { entity })?;
        let ty = (*value).component_type();
        if !self.archetype(id).is_some_and(|a| a.has_type(ty)) {
            return self.attach(entity, value);
        }
        self.archetype_mut(id)
            .ok_or(EcsError::NoSuchEntity { entity })?
            .replace(entity, value)
    }

    /// Remove `entity` from storage, free its id and sever its hierarchy edges.
    ///
    /// Every structural operation logs a `warn!` when it rejects a request, so
    /// callers outside the staging buffer need not log the returned error.
    ///
    /// Children are unlinked, not destroyed; see
    /// [`destroy_recursive`](Self::destroy_recursive).
    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        let Some(id) = self.entity_index.remove(&entity) else {
            warn!(entity = ?entity, "destroy of unknown entity rejected");
            return Err(EcsError::NoSuchEntity { entity });
        };
        if let Some(archetype) = self.archetype_mut(id) {
            archetype.evict(entity);
        }
        self.reclaim_if_empty(id);
        self.allocator.release(entity);
        self.hierarchy.sever(entity);
        Ok(())
    }

    /// Destroy `entity` and every transitive descendant.
    ///
    /// Returns the destroyed entities, `entity` first.
    pub fn destroy_recursive(&mut self, entity: Entity) -> Result<Vec<Entity>, EcsError> {
        if !self.contains(entity) {
            warn!(entity = ?entity, "destroy of unknown entity rejected");
            return Err(EcsError::NoSuchEntity { entity });
        }
        let mut doomed = vec![entity];
        doomed.extend(self.hierarchy.descendants_of(entity));
        for e in &doomed {
            if self.contains(*e) {
                self.destroy(*e)?;
            }
        }
        Ok(doomed)
    }

    /// Return a reserved token that never reached storage to the free list.
    pub fn release_token(&mut self, entity: Entity) -> bool {
        !self.entity_index.contains_key(&entity) && self.allocator.release(entity)
    }

    /// Destroy everything: all archetypes but a fresh empty one, every index,
    /// the hierarchy and the id counter.
    pub fn reset(&mut self) {
        let entity_count = self.entity_index.len();
        self.archetypes = vec![Some(Archetype::empty(ArchetypeId::EMPTY))];
        self.free_slots.clear();
        self.entity_index.clear();
        self.type_index.clear();
        self.hierarchy.clear();
        self.allocator.reset();
        info!(entities = entity_count, "registry reset");
    }

    // -- component access ---------------------------------------------------

    /// `true` if `entity` is live (allocated into storage and not destroyed).
    pub fn contains(&self, entity: Entity) -> bool {
        self.entity_index.contains_key(&entity)
    }

    /// Number of live entities, including unpopulated ones.
    pub fn entity_count(&self) -> usize {
        self.entity_index.len()
    }

    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeId> {
        self.entity_index.get(&entity).copied()
    }

    /// Component types currently attached to `entity`.
    pub fn signature_of(&self, entity: Entity) -> Option<&[ComponentType]> {
        self.archetype_of(entity)
            .and_then(|id| self.archetype(id))
            .map(Archetype::signature)
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.archetype_of(entity)
            .and_then(|id| self.archetype(id))
            .and_then(|archetype| archetype.get::<T>(entity))
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.archetype_of(entity)?;
        self.archetype_mut(id)?.get_mut::<T>(entity)
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.has_type(entity, ComponentType::of::<T>())
    }

    pub fn has_type(&self, entity: Entity, ty: ComponentType) -> bool {
        self.archetype_of(entity)
            .and_then(|id| self.archetype(id))
            .is_some_and(|archetype| archetype.has_type(ty))
    }

    /// Deep copy of every component of `entity`.
    pub fn clone_components(&self, entity: Entity) -> Option<ComponentMap> {
        self.archetype_of(entity)
            .and_then(|id| self.archetype(id))
            .and_then(|archetype| archetype.clone_components(entity))
    }

    /// Exclusive iteration over every value of component `T`.
    ///
    /// Intended for setup code holding the registry directly; systems write
    /// values through the staging buffer instead.
    pub fn view_mut<T: Component>(&mut self) -> impl Iterator<Item = (Entity, &mut T)> + '_ {
        self.archetypes
            .iter_mut()
            .flatten()
            .filter_map(|archetype| archetype.pool_mut::<T>())
            .flat_map(|pool| pool.iter_mut())
    }

    // -- queries ------------------------------------------------------------

    /// Archetypes whose signature contains every `required` type and none of
    /// the `excluded` types.
    ///
    /// With no required types every live archetype is a candidate. A required
    /// type with no archetypes yields an empty result.
    pub fn query(
        &self,
        required: &[ComponentType],
        excluded: &[ComponentType],
    ) -> HashSet<ArchetypeId> {
        let mut result = match required.split_first() {
            None => self.archetypes().map(Archetype::id).collect(),
            Some((first, rest)) => {
                let Some(bucket) = self.type_index.get(first) else {
                    return HashSet::new();
                };
                let mut set = bucket.clone();
                for ty in rest {
                    match self.type_index.get(ty) {
                        Some(bucket) => set.retain(|id| bucket.contains(id)),
                        None => return HashSet::new(),
                    }
                }
                set
            }
        };
        for ty in excluded {
            if let Some(bucket) = self.type_index.get(ty) {
                result.retain(|id| !bucket.contains(id));
            }
        }
        result
    }

    // -- hierarchy ----------------------------------------------------------

    /// Link `child` under `parent`. Both must be live.
    pub fn set_parent(&mut self, child: Entity, parent: Entity) -> Result<(), EcsError> {
        let result = match [child, parent].into_iter().find(|e| !self.contains(*e)) {
            Some(entity) => Err(EcsError::NoSuchEntity { entity }),
            None => self.hierarchy.set_parent(child, parent),
        };
        result.inspect_err(|e| {
            warn!(child = ?child, parent = ?parent, error = %e, "set_parent rejected");
        })
    }

    /// Unlink `child` from its parent, returning the former parent.
    pub fn remove_parent_edge(&mut self, child: Entity) -> Result<Entity, EcsError> {
        self.hierarchy.remove_parent_edge(child)
    }

    /// Unlink every child of `parent`, returning the former children.
    pub fn detach_children(&mut self, parent: Entity) -> Vec<Entity> {
        self.hierarchy.detach_children(parent)
    }

    pub fn parent_of(&self, child: Entity) -> Option<Entity> {
        self.hierarchy.parent_of(child)
    }

    pub fn children_of(&self, parent: Entity) -> impl Iterator<Item = Entity> + '_ {
        self.hierarchy.children_of(parent)
    }

    pub fn descendants_of(&self, entity: Entity) -> Vec<Entity> {
        self.hierarchy.descendants_of(entity)
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    // -- diagnostics --------------------------------------------------------

    /// Checks every structural invariant. Intended for tests and debugging.
    ///
    /// - each live entity is indexed to an archetype containing it, and vice versa
    /// - every pool holds exactly its archetype's entities
    /// - no two live archetypes share a signature
    /// - the type index lists exactly the archetypes storing each type
    /// - no archetype but the permanent one is empty
    /// - hierarchy maps agree and reference only live entities
    pub fn is_consistent(&self) -> bool {
        let index_ok = self.entity_index.iter().all(|(entity, id)| {
            self.archetype(*id)
                .is_some_and(|archetype| archetype.contains(*entity))
        });
        let membership_ok = self.archetypes().all(|archetype| {
            archetype
                .entities()
                .all(|e| self.entity_index.get(&e) == Some(&archetype.id()))
        });
        let pools_ok = self.archetypes().all(Archetype::is_consistent);
        let mut signatures = HashSet::new();
        let unique_ok = self
            .archetypes()
            .all(|archetype| signatures.insert(archetype.signature().to_vec()));
        let type_index_ok = self.archetypes().all(|archetype| {
            archetype.signature().iter().all(|ty| {
                self.type_index
                    .get(ty)
                    .is_some_and(|bucket| bucket.contains(&archetype.id()))
            })
        }) && self.type_index.iter().all(|(ty, bucket)| {
            bucket
                .iter()
                .all(|id| self.archetype(*id).is_some_and(|a| a.has_type(*ty)))
        });
        let reclaimed_ok = self
            .archetypes()
            .all(|archetype| archetype.id() == ArchetypeId::EMPTY || !archetype.is_empty());
        let hierarchy_ok = self.hierarchy.is_consistent();

        index_ok
            && membership_ok
            && pools_ok
            && unique_ok
            && type_index_ok
            && reclaimed_ok
            && hierarchy_ok
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
