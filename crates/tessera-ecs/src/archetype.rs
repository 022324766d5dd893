//! Archetype storage: one node per distinct component-type signature.
//!
//! An [`Archetype`] owns the set of entities currently sharing its exact
//! signature and one [`ErasedPool`] per component type in that signature.
//! Storage is keyed by entity rather than by dense row, so structural churn is
//! O(1) per pool and eviction never shuffles other entities.
//!
//! Archetypes are only ever built and mutated by the
//! [`Registry`](crate::registry::Registry). Four construction paths exist:
//!
//! - [`fresh`](Archetype::fresh): from an explicit component map for one entity.
//! - [`grow`](Archetype::grow): copy a source archetype's pools for one entity and
//!   add one new typed pool.
//! - [`shrink`](Archetype::shrink): copy a source archetype's pools for one entity,
//!   minus one excluded type.
//! - Steady state on an archetype that already matches the target signature:
//!   [`insert_new`](Archetype::insert_new), [`migrate_with`](Archetype::migrate_with)
//!   and [`migrate_without`](Archetype::migrate_without).

use std::collections::{hash_set, HashMap, HashSet};
use std::fmt;

use crate::component::{BoxedComponent, Component, ComponentMap, ComponentType};
use crate::entity::Entity;
use crate::pool::{ComponentPool, ErasedPool};
use crate::EcsError;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Slot identifier of an archetype inside the registry.
///
/// Slots are reused after an archetype is reclaimed, so an id is only
/// meaningful while the archetype it names is live.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// The permanent, always-valid archetype with an empty signature.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// All entities sharing one exact component-type signature.
pub struct Archetype {
    id: ArchetypeId,
    /// Sorted component types; always equal to the key set of `pools`.
    signature: Vec<ComponentType>,
    entities: HashSet<Entity>,
    pools: HashMap<ComponentType, Box<dyn ErasedPool>>,
}

impl Archetype {
    // -- construction -------------------------------------------------------

    /// An archetype with no component types and no entities.
    pub(crate) fn empty(id: ArchetypeId) -> Self {
        Self {
            id,
            signature: Vec::new(),
            entities: HashSet::new(),
            pools: HashMap::new(),
        }
    }

    /// Build a new archetype holding one entity with exactly `components`.
    pub(crate) fn fresh(
        id: ArchetypeId,
        entity: Entity,
        components: ComponentMap,
    ) -> Result<Self, EcsError> {
        let mut archetype = Self::empty(id);
        for value in components.into_values() {
            let mut pool = (*value).new_pool();
            pool.emplace_boxed(entity, value)?;
            archetype.pools.insert(pool.component_type(), pool);
        }
        archetype.refresh_signature();
        archetype.entities.insert(entity);
        Ok(archetype)
    }

    /// Build a new archetype whose signature is `source` plus the type of
    /// `value`, holding `entity` with its data copied from `source`.
    pub(crate) fn grow(
        id: ArchetypeId,
        source: &Archetype,
        entity: Entity,
        value: BoxedComponent,
    ) -> Result<Self, EcsError> {
        let mut archetype = Self::copy_pools(id, source, entity, None)?;
        let mut pool = (*value).new_pool();
        pool.emplace_boxed(entity, value)?;
        archetype.pools.insert(pool.component_type(), pool);
        archetype.refresh_signature();
        Ok(archetype)
    }

    /// Build a new archetype whose signature is `source` minus `excluded`,
    /// holding `entity` with its remaining data copied from `source`.
    pub(crate) fn shrink(
        id: ArchetypeId,
        source: &Archetype,
        entity: Entity,
        excluded: ComponentType,
    ) -> Result<Self, EcsError> {
        let mut archetype = Self::copy_pools(id, source, entity, Some(excluded))?;
        archetype.refresh_signature();
        Ok(archetype)
    }

    fn copy_pools(
        id: ArchetypeId,
        source: &Archetype,
        entity: Entity,
        excluded: Option<ComponentType>,
    ) -> Result<Self, EcsError> {
        let mut archetype = Self::empty(id);
        for (ty, src_pool) in &source.pools {
            if Some(*ty) == excluded {
                continue;
            }
            let mut pool = src_pool.empty_like();
            pool.copy_from(entity, src_pool.as_ref())?;
            archetype.pools.insert(*ty, pool);
        }
        archetype.entities.insert(entity);
        Ok(archetype)
    }

    fn refresh_signature(&mut self) {
        self.signature = self.pools.keys().copied().collect();
        self.signature.sort();
    }

    // -- steady-state membership --------------------------------------------

    /// Insert a brand-new entity whose component set matches this signature.
    pub(crate) fn insert_new(
        &mut self,
        entity: Entity,
        components: ComponentMap,
    ) -> Result<(), EcsError> {
        debug_assert!(self.is_exactly(&components.types()));
        for value in components.into_values() {
            let ty = (*value).component_type();
            let pool = self.pools.get_mut(&ty).ok_or(EcsError::TypeMismatch {
                expected: "a type in the archetype signature",
                found: ty.name(),
            })?;
            pool.emplace_boxed(entity, value)?;
        }
        self.entities.insert(entity);
        Ok(())
    }

    /// Copy `entity`'s data in from `source` and add `value`.
    ///
    /// This archetype's signature must be exactly `source` plus one type.
    /// The caller evicts the entity from `source` afterwards.
    pub(crate) fn migrate_with(
        &mut self,
        entity: Entity,
        source: &Archetype,
        value: BoxedComponent,
    ) -> Result<(), EcsError> {
        let added = (*value).component_type();
        debug_assert!(self.is_exactly_plus_one(source, added));
        self.copy_entity_from(entity, source, None)?;
        let pool = self.pools.get_mut(&added).ok_or(EcsError::TypeMismatch {
            expected: "a type in the archetype signature",
            found: added.name(),
        })?;
        pool.emplace_boxed(entity, value)?;
        self.entities.insert(entity);
        Ok(())
    }

    /// Copy `entity`'s data in from `source`, skipping `excluded`.
    ///
    /// This archetype's signature must be exactly `source` minus one type.
    pub(crate) fn migrate_without(
        &mut self,
        entity: Entity,
        source: &Archetype,
        excluded: ComponentType,
    ) -> Result<(), EcsError> {
        debug_assert!(self.is_exactly_minus_one(source, excluded));
        self.copy_entity_from(entity, source, Some(excluded))?;
        self.entities.insert(entity);
        Ok(())
    }

    fn copy_entity_from(
        &mut self,
        entity: Entity,
        source: &Archetype,
        excluded: Option<ComponentType>,
    ) -> Result<(), EcsError> {
        for (ty, src_pool) in &source.pools {
            if Some(*ty) == excluded {
                continue;
            }
            let pool = self.pools.get_mut(ty).ok_or(EcsError::TypeMismatch {
                expected: "a type in the archetype signature",
                found: ty.name(),
            })?;
            pool.copy_from(entity, src_pool.as_ref())?;
        }
        Ok(())
    }

    /// Erase `entity` from the entity set and from every pool.
    ///
    /// Returns `false` if the entity was not a member.
    pub(crate) fn evict(&mut self, entity: Entity) -> bool {
        if !self.entities.remove(&entity) {
            return false;
        }
        for pool in self.pools.values_mut() {
            pool.remove(entity);
        }
        true
    }

    /// Overwrite the value of a component the entity already has.
    pub(crate) fn replace(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError> {
        let ty = (*value).component_type();
        match self.pools.get_mut(&ty) {
            Some(pool) => pool.replace_boxed(entity, value),
            None => Err(EcsError::MissingComponent {
                entity,
                component: ty.name(),
            }),
        }
    }

    // -- compatibility predicates -------------------------------------------

    /// `true` if the signature equals `types` as a set.
    pub fn is_exactly(&self, types: &[ComponentType]) -> bool {
        let mut wanted: Vec<ComponentType> = types.to_vec();
        wanted.sort();
        wanted.dedup();
        wanted == self.signature
    }

    /// `true` if the signature equals `old`'s signature plus `new_type`.
    pub fn is_exactly_plus_one(&self, old: &Archetype, new_type: ComponentType) -> bool {
        self.signature.len() == old.signature.len() + 1
            && !old.has_type(new_type)
            && self.has_type(new_type)
            && old.signature.iter().all(|ty| self.has_type(*ty))
    }

    /// `true` if the signature equals `old`'s signature minus `removed`.
    pub fn is_exactly_minus_one(&self, old: &Archetype, removed: ComponentType) -> bool {
        old.has_type(removed)
            && !self.has_type(removed)
            && self.signature.len() + 1 == old.signature.len()
            && self.signature.iter().all(|ty| old.has_type(*ty))
    }

    // -- accessors ----------------------------------------------------------

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The sorted component types stored here.
    pub fn signature(&self) -> &[ComponentType] {
        &self.signature
    }

    pub fn has_type(&self, ty: ComponentType) -> bool {
        self.pools.contains_key(&ty)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(&entity)
    }

    /// Number of resident entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Resident entities, in unspecified order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter().copied()
    }

    pub(crate) fn entity_set_iter(&self) -> hash_set::Iter<'_, Entity> {
        self.entities.iter()
    }

    /// Typed pool for `T`, if `T` is in the signature.
    pub fn pool<T: Component>(&self) -> Option<&ComponentPool<T>> {
        self.pools
            .get(&ComponentType::of::<T>())
            .and_then(|pool| (**pool).as_any().downcast_ref::<ComponentPool<T>>())
    }

    pub fn pool_mut<T: Component>(&mut self) -> Option<&mut ComponentPool<T>> {
        self.pools
            .get_mut(&ComponentType::of::<T>())
            .and_then(|pool| (**pool).as_any_mut().downcast_mut::<ComponentPool<T>>())
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.pool::<T>().and_then(|pool| pool.get(entity))
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.pool_mut::<T>().and_then(|pool| pool.get_mut(entity))
    }

    /// Deep copy of every component value of `entity`.
    pub fn clone_components(&self, entity: Entity) -> Option<ComponentMap> {
        if !self.contains(entity) {
            return None;
        }
        self.pools
            .values()
            .map(|pool| pool.clone_value(entity))
            .collect::<Option<Vec<_>>>()
            .map(|values| values.into_iter().collect())
    }

    /// `true` if every pool holds exactly the resident entities.
    pub fn is_consistent(&self) -> bool {
        self.pools.values().all(|pool| {
            pool.len() == self.entities.len() && self.entities.iter().all(|e| pool.contains(*e))
        })
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("entities", &self.entities.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
