//! Component pools: per-(archetype, type) storage keyed by entity.
//!
//! A [`ComponentPool<T>`] maps each entity resident in the owning archetype to
//! exactly one `T`. Archetypes hold their pools as `Box<dyn ErasedPool>` and
//! downcast to the concrete pool for typed access.

use std::any::Any;
use std::collections::HashMap;

use crate::component::{BoxedComponent, Component, ComponentType};
use crate::entity::Entity;
use crate::EcsError;

// ---------------------------------------------------------------------------
// ComponentPool
// ---------------------------------------------------------------------------

/// Typed storage for one component type within one archetype.
#[derive(Debug, Clone)]
pub struct ComponentPool<T> {
    values: HashMap<Entity, T>,
}

impl<T: Component> ComponentPool<T> {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Insert a value. The entity must not already be present.
    pub fn emplace(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        if self.values.contains_key(&entity) {
            return Err(EcsError::DuplicateComponent {
                entity,
                component: std::any::type_name::<T>(),
            });
        }
        self.values.insert(entity, value);
        Ok(())
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.values.get(&entity)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.values.get_mut(&entity)
    }

    /// Duplicate `other`'s value for `entity` into this pool.
    pub fn copy(&mut self, entity: Entity, other: &ComponentPool<T>) -> Result<(), EcsError> {
        let value = other.get(entity).ok_or(EcsError::MissingComponent {
            entity,
            component: std::any::type_name::<T>(),
        })?;
        self.emplace(entity, value.clone())
    }

    /// Delete the entry for `entity`, returning its value.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        self.values.remove(&entity)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.values.iter().map(|(e, v)| (*e, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.values.iter_mut().map(|(e, v)| (*e, v))
    }

    fn unbox(value: BoxedComponent) -> Result<T, EcsError> {
        let found = value.component_type().name();
        value
            .into_any()
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| EcsError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found,
            })
    }
}

impl<T: Component> Default for ComponentPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ErasedPool
// ---------------------------------------------------------------------------

/// Object-safe interface over [`ComponentPool<T>`] for heterogeneous storage.
pub trait ErasedPool: Send + Sync {
    fn component_type(&self) -> ComponentType;
    fn len(&self) -> usize;
    fn contains(&self, entity: Entity) -> bool;
    /// Insert a boxed value. Fails on a duplicate entity or a foreign type.
    fn emplace_boxed(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError>;
    /// Overwrite the value of an entity already present.
    fn replace_boxed(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError>;
    /// Duplicate `other`'s value for `entity` into this pool.
    fn copy_from(&mut self, entity: Entity, other: &dyn ErasedPool) -> Result<(), EcsError>;
    fn remove(&mut self, entity: Entity) -> bool;
    fn clone_value(&self, entity: Entity) -> Option<BoxedComponent>;
    /// A new, empty pool of the same component type.
    fn empty_like(&self) -> Box<dyn ErasedPool>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedPool for ComponentPool<T> {
    fn component_type(&self) -> ComponentType {
        ComponentType::of::<T>()
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn contains(&self, entity: Entity) -> bool {
        self.values.contains_key(&entity)
    }

    fn emplace_boxed(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError> {
        let value = Self::unbox(value)?;
        self.emplace(entity, value)
    }

    fn replace_boxed(&mut self, entity: Entity, value: BoxedComponent) -> Result<(), EcsError> {
        let value = Self::unbox(value)?;
        match self.values.get_mut(&entity) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EcsError::MissingComponent {
                entity,
                component: std::any::type_name::<T>(),
            }),
        }
    }

    fn copy_from(&mut self, entity: Entity, other: &dyn ErasedPool) -> Result<(), EcsError> {
        let other = other
            .as_any()
            .downcast_ref::<ComponentPool<T>>()
            .ok_or(EcsError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found: other.component_type().name(),
            })?;
        self.copy(entity, other)
    }

    fn remove(&mut self, entity: Entity) -> bool {
        self.values.remove(&entity).is_some()
    }

    fn clone_value(&self, entity: Entity) -> Option<BoxedComponent> {
        self.values
            .get(&entity)
            .map(|v| Box::new(v.clone()) as BoxedComponent)
    }

    fn empty_like(&self) -> Box<dyn ErasedPool> {
        Box::new(ComponentPool::<T>::new())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Health(u32);

    #[derive(Debug, Clone, PartialEq)]
    struct Mana(u32);

    impl Component for Health {}
    impl Component for Mana {}

    fn e(raw: u32) -> Entity {
        Entity::from_raw(raw)
    }

    // -- 1. Typed operations ------------------------------------------------

    #[test]
    fn emplace_and_get() {
        let mut pool = ComponentPool::new();
        pool.emplace(e(1), Health(10)).unwrap();
        assert_eq!(pool.get(e(1)), Some(&Health(10)));
        assert_eq!(pool.get(e(2)), None);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn emplace_twice_is_rejected() {
        let mut pool = ComponentPool::new();
        pool.emplace(e(1), Health(10)).unwrap();
        let err = pool.emplace(e(1), Health(20)).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponent { .. }));
        assert_eq!(pool.get(e(1)), Some(&Health(10)));
    }

    #[test]
    fn copy_duplicates_value() {
        let mut src = ComponentPool::new();
        src.emplace(e(3), Health(7)).unwrap();
        let mut dst = ComponentPool::new();
        dst.copy(e(3), &src).unwrap();
        assert_eq!(dst.get(e(3)), Some(&Health(7)));
        assert_eq!(src.get(e(3)), Some(&Health(7)));
    }

    #[test]
    fn copy_of_absent_entity_fails() {
        let src: ComponentPool<Health> = ComponentPool::new();
        let mut dst = ComponentPool::new();
        assert!(matches!(
            dst.copy(e(3), &src),
            Err(EcsError::MissingComponent { .. })
        ));
    }

    #[test]
    fn remove_deletes_entry() {
        let mut pool = ComponentPool::new();
        pool.emplace(e(1), Health(1)).unwrap();
        assert_eq!(pool.remove(e(1)), Some(Health(1)));
        assert!(pool.is_empty());
        assert_eq!(pool.remove(e(1)), None);
    }

    // -- 2. Erased operations -----------------------------------------------

    #[test]
    fn erased_emplace_checks_type() {
        let mut pool: Box<dyn ErasedPool> = Box::new(ComponentPool::<Health>::new());
        pool.emplace_boxed(e(1), Box::new(Health(5))).unwrap();
        let err = pool.emplace_boxed(e(2), Box::new(Mana(5))).unwrap_err();
        assert!(matches!(err, EcsError::TypeMismatch { .. }));
        assert!(pool.contains(e(1)));
        assert!(!pool.contains(e(2)));
    }

    #[test]
    fn erased_copy_between_pools() {
        let mut src: Box<dyn ErasedPool> = Box::new(ComponentPool::<Health>::new());
        src.emplace_boxed(e(4), Box::new(Health(44))).unwrap();
        let mut dst = src.empty_like();
        dst.copy_from(e(4), src.as_ref()).unwrap();

        let typed = dst.as_any().downcast_ref::<ComponentPool<Health>>().unwrap();
        assert_eq!(typed.get(e(4)), Some(&Health(44)));
    }

    #[test]
    fn erased_copy_from_foreign_pool_fails() {
        let mut src: Box<dyn ErasedPool> = Box::new(ComponentPool::<Mana>::new());
        src.emplace_boxed(e(4), Box::new(Mana(1))).unwrap();
        let mut dst: Box<dyn ErasedPool> = Box::new(ComponentPool::<Health>::new());
        assert!(matches!(
            dst.copy_from(e(4), src.as_ref()),
            Err(EcsError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn replace_requires_existing_entry() {
        let mut pool: Box<dyn ErasedPool> = Box::new(ComponentPool::<Health>::new());
        assert!(pool.replace_boxed(e(1), Box::new(Health(1))).is_err());
        pool.emplace_boxed(e(1), Box::new(Health(1))).unwrap();
        pool.replace_boxed(e(1), Box::new(Health(2))).unwrap();
        let value = pool.clone_value(e(1)).unwrap();
        assert_eq!((*value).as_any().downcast_ref::<Health>(), Some(&Health(2)));
    }
}
