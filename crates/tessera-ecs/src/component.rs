//! Component identity and type-erased component values.
//!
//! Plain-data types opt in by implementing [`Component`]. At runtime a
//! component type is identified by its [`ComponentType`], a stable key derived
//! from the Rust `TypeId`; no registration step is needed.
//!
//! Heterogeneous component sets travel as a [`ComponentMap`] of boxed
//! [`ErasedComponent`] values. Each erased value knows how to clone itself and
//! how to build an empty [`ComponentPool`](crate::pool::ComponentPool) of its
//! own type, which is what archetypes use when a new signature is observed.

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::pool::{ComponentPool, ErasedPool};

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Marker trait for plain-data component values.
///
/// ```
/// use tessera_ecs::component::Component;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Velocity { dx: f32, dy: f32 }
///
/// impl Component for Velocity {}
/// ```
pub trait Component: Clone + Send + Sync + 'static {}

// ---------------------------------------------------------------------------
// ComponentType
// ---------------------------------------------------------------------------

/// Runtime key identifying a component type.
///
/// Equality, ordering and hashing consider only the `TypeId`; the name is
/// carried for log messages and error reports.
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    /// The key for component type `T`.
    #[inline]
    pub fn of<T: Component>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying Rust `TypeId`.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ComponentType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentType({})", self.name)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// ErasedComponent
// ---------------------------------------------------------------------------

/// Object-safe view of a component value.
pub trait ErasedComponent: Send + Sync {
    /// The runtime key of the concrete type.
    fn component_type(&self) -> ComponentType;
    /// Clone into a new box.
    fn clone_boxed(&self) -> BoxedComponent;
    /// Build an empty pool able to hold values of this type.
    fn new_pool(&self) -> Box<dyn ErasedPool>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// An owned, type-erased component value.
pub type BoxedComponent = Box<dyn ErasedComponent>;

impl<T: Component> ErasedComponent for T {
    fn component_type(&self) -> ComponentType {
        ComponentType::of::<T>()
    }

    fn clone_boxed(&self) -> BoxedComponent {
        Box::new(self.clone())
    }

    fn new_pool(&self) -> Box<dyn ErasedPool> {
        Box::new(ComponentPool::<T>::new())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl fmt::Debug for dyn ErasedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.component_type().name())
    }
}

// ---------------------------------------------------------------------------
// ComponentMap
// ---------------------------------------------------------------------------

/// A set of component values keyed by type, at most one per type.
///
/// ```
/// use tessera_ecs::component::{Component, ComponentMap, Inactive};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Health(u32);
///
/// impl Component for Health {}
///
/// let map = ComponentMap::new().with(Health(10)).with(Inactive);
/// assert_eq!(map.len(), 2);
/// assert_eq!(map.get::<Health>(), Some(&Health(10)));
/// ```
#[derive(Default)]
pub struct ComponentMap {
    values: HashMap<ComponentType, BoxedComponent>,
}

impl ComponentMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Insert a value, returning the previous value of the same type if any.
    pub fn insert<T: Component>(&mut self, value: T) -> Option<BoxedComponent> {
        self.insert_boxed(Box::new(value))
    }

    /// Insert an already boxed value.
    pub fn insert_boxed(&mut self, value: BoxedComponent) -> Option<BoxedComponent> {
        self.values.insert(value.component_type(), value)
    }

    /// Remove the value of the given type.
    pub fn remove(&mut self, ty: ComponentType) -> Option<BoxedComponent> {
        self.values.remove(&ty)
    }

    pub fn contains(&self, ty: ComponentType) -> bool {
        self.values.contains_key(&ty)
    }

    /// Typed access to a value in the map.
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.values
            .get(&ComponentType::of::<T>())
            .and_then(|v| (**v).as_any().downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The types present, sorted.
    pub fn types(&self) -> Vec<ComponentType> {
        let mut types: Vec<ComponentType> = self.values.keys().copied().collect();
        types.sort();
        types
    }

    /// Deep copy of every value.
    pub fn clone_map(&self) -> Self {
        Self {
            values: self
                .values
                .iter()
                .map(|(ty, value)| (*ty, (**value).clone_boxed()))
                .collect(),
        }
    }

    pub(crate) fn into_values(self) -> impl Iterator<Item = BoxedComponent> {
        self.values.into_values()
    }
}

impl fmt::Debug for ComponentMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.types().iter().map(|ty| ty.name()))
            .finish()
    }
}

impl FromIterator<BoxedComponent> for ComponentMap {
    fn from_iter<I: IntoIterator<Item = BoxedComponent>>(iter: I) -> Self {
        let mut map = Self::new();
        for value in iter {
            map.insert_boxed(value);
        }
        map
    }
}

// ---------------------------------------------------------------------------
// Built-in markers
// ---------------------------------------------------------------------------

/// Views skip entities carrying this marker unless they opt in with
/// [`ViewFilter::include_inactive`](crate::view::ViewFilter::include_inactive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inactive;

impl Component for Inactive {}

/// Entities carrying this marker survive a scene reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persistent;

impl Component for Persistent {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
