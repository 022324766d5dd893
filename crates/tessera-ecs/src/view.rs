//! Read-only views over the archetypes matching a component signature.
//!
//! A [`View`] resolves its signature once, at construction, through
//! [`Registry::query`], then iterates lazily over `(Entity, (&A, &B, ...))`
//! tuples. The signature has four parts:
//!
//! - fetched types: the component references yielded per entity (`Q`)
//! - filter-only types: required but not fetched ([`ViewFilter::with`])
//! - excluded types ([`ViewFilter::without`])
//! - the include-inactive flag: by default archetypes carrying
//!   [`Inactive`] are skipped
//!
//! Views never mutate structure and never block. Structural changes requested
//! while a view is alive go through the staging buffer and land at the next
//! synchronization point, so a view stays valid for the whole stage that
//! created it.
//!
//! Archetype order is sorted by id for reproducibility; entity order within an
//! archetype is unspecified.
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position(f32);
//! #[derive(Debug, Clone, PartialEq)]
//! struct Frozen;
//!
//! impl Component for Position {}
//! impl Component for Frozen {}
//!
//! let mut registry = Registry::new();
//! let a = registry.allocate_entity();
//! registry.create(a, ComponentMap::new().with(Position(1.0))).unwrap();
//! let b = registry.allocate_entity();
//! registry.create(b, ComponentMap::new().with(Position(2.0)).with(Frozen)).unwrap();
//!
//! let view = registry.view_filtered::<(&Position,)>(&ViewFilter::new().without::<Frozen>());
//! assert_eq!(view.size(), 1);
//! let (entity, (position,)) = view.iter().next().unwrap();
//! assert_eq!((entity, position), (a, &Position(1.0)));
//! ```

use std::collections::hash_set;
use std::marker::PhantomData;

use tracing::error;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{Component, ComponentType, Inactive};
use crate::entity::Entity;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// ViewItem -- one fetched element
// ---------------------------------------------------------------------------

/// A single fetched element of a view: `&T`.
pub trait ViewItem {
    type Item<'r>;
    fn component_type() -> ComponentType;
    fn fetch(archetype: &Archetype, entity: Entity) -> Option<Self::Item<'_>>;
}

impl<T: Component> ViewItem for &T {
    type Item<'r> = &'r T;

    fn component_type() -> ComponentType {
        ComponentType::of::<T>()
    }

    fn fetch(archetype: &Archetype, entity: Entity) -> Option<Self::Item<'_>> {
        archetype.get::<T>(entity)
    }
}

// ---------------------------------------------------------------------------
// Fetch -- a tuple of view items
// ---------------------------------------------------------------------------

/// The fetched part of a view signature: `()`, `(&A,)`, `(&A, &B)`, up to four.
pub trait Fetch {
    type Item<'r>;
    fn component_types() -> Vec<ComponentType>;
    fn fetch(archetype: &Archetype, entity: Entity) -> Option<Self::Item<'_>>;
}

impl Fetch for () {
    type Item<'r> = ();

    fn component_types() -> Vec<ComponentType> {
        Vec::new()
    }

    fn fetch(_archetype: &Archetype, _entity: Entity) -> Option<Self::Item<'_>> {
        Some(())
    }
}

macro_rules! impl_fetch_tuple {
    ($($name:ident),+) => {
        impl<$($name: ViewItem),+> Fetch for ($($name,)+) {
            type Item<'r> = ($($name::Item<'r>,)+);

            fn component_types() -> Vec<ComponentType> {
                vec![$($name::component_type()),+]
            }

            fn fetch(archetype: &Archetype, entity: Entity) -> Option<Self::Item<'_>> {
                Some(($($name::fetch(archetype, entity)?,)+))
            }
        }
    };
}

impl_fetch_tuple!(A);
impl_fetch_tuple!(A, B);
impl_fetch_tuple!(A, B, C);
impl_fetch_tuple!(A, B, C, D);

// ---------------------------------------------------------------------------
// ViewFilter
// ---------------------------------------------------------------------------

/// Filter-only, excluded and include-inactive parts of a view signature.
#[derive(Debug, Clone, Default)]
pub struct ViewFilter {
    required: Vec<ComponentType>,
    excluded: Vec<ComponentType>,
    include_inactive: bool,
}

impl ViewFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `T` without fetching it.
    pub fn with<T: Component>(self) -> Self {
        self.with_type(ComponentType::of::<T>())
    }

    pub fn with_type(mut self, ty: ComponentType) -> Self {
        self.required.push(ty);
        self
    }

    /// Skip archetypes containing `T`.
    pub fn without<T: Component>(self) -> Self {
        self.without_type(ComponentType::of::<T>())
    }

    pub fn without_type(mut self, ty: ComponentType) -> Self {
        self.excluded.push(ty);
        self
    }

    /// Also visit entities carrying [`Inactive`].
    pub fn include_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// Archetypes matching a signature, resolved once at construction.
pub struct View<'r, Q: Fetch> {
    registry: &'r Registry,
    archetypes: Vec<ArchetypeId>,
    _marker: PhantomData<fn() -> Q>,
}

impl<'r, Q: Fetch> View<'r, Q> {
    pub fn new(registry: &'r Registry, filter: &ViewFilter) -> Self {
        let mut required = Q::component_types();
        required.extend(filter.required.iter().copied());
        required.sort();
        required.dedup();

        let inactive = ComponentType::of::<Inactive>();
        let mut excluded = filter.excluded.clone();
        if !filter.include_inactive && !required.contains(&inactive) {
            excluded.push(inactive);
        }

        let mut archetypes: Vec<ArchetypeId> =
            registry.query(&required, &excluded).into_iter().collect();
        archetypes.sort();

        Self {
            registry,
            archetypes,
            _marker: PhantomData,
        }
    }

    /// Total number of matching entities.
    pub fn size(&self) -> usize {
        self.matched().map(Archetype::len).sum()
    }

    /// `true` if no matching archetype holds an entity.
    pub fn is_empty(&self) -> bool {
        self.matched().all(Archetype::is_empty)
    }

    /// Number of matching archetypes.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// The matching archetype ids, sorted.
    pub fn archetype_ids(&self) -> &[ArchetypeId] {
        &self.archetypes
    }

    /// Matching entities without fetching components.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + 'r {
        let registry = self.registry;
        self.archetypes
            .clone()
            .into_iter()
            .filter_map(move |id| registry.archetype(id))
            .flat_map(Archetype::entities)
    }

    pub fn iter(&self) -> ViewIter<'r, Q> {
        ViewIter {
            registry: self.registry,
            archetypes: self.archetypes.clone().into_iter(),
            archetype: None,
            entities: None,
            _marker: PhantomData,
        }
    }

    fn matched(&self) -> impl Iterator<Item = &'r Archetype> + '_ {
        self.archetypes
            .iter()
            .filter_map(|id| self.registry.archetype(*id))
    }
}

impl<'a, 'r, Q: Fetch> IntoIterator for &'a View<'r, Q> {
    type Item = (Entity, Q::Item<'r>);
    type IntoIter = ViewIter<'r, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// ViewIter
// ---------------------------------------------------------------------------

/// Lazy iterator over `(Entity, Q::Item)` for every matching entity.
pub struct ViewIter<'r, Q: Fetch> {
    registry: &'r Registry,
    archetypes: std::vec::IntoIter<ArchetypeId>,
    archetype: Option<&'r Archetype>,
    entities: Option<hash_set::Iter<'r, Entity>>,
    _marker: PhantomData<fn() -> Q>,
}

impl<'r, Q: Fetch> Iterator for ViewIter<'r, Q> {
    type Item = (Entity, Q::Item<'r>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let (Some(archetype), Some(entities)) = (self.archetype, self.entities.as_mut()) {
                for &entity in entities.by_ref() {
                    match Q::fetch(archetype, entity) {
                        Some(item) => return Some((entity, item)),
                        None => {
                            if cfg!(debug_assertions) {
                                panic!(
                                    "entity {entity} in {:?} is missing a signature component",
                                    archetype.id()
                                );
                            }
                            error!(
                                entity = ?entity,
                                archetype = ?archetype.id(),
                                "view fetch missed a signature component"
                            );
                        }
                    }
                }
            }
            let id = self.archetypes.next()?;
            self.archetype = self.registry.archetype(id);
            self.entities = self.archetype.map(Archetype::entity_set_iter);
        }
    }
}

// ---------------------------------------------------------------------------
// Registry entry points
// ---------------------------------------------------------------------------

impl Registry {
    /// A view fetching `Q`, skipping inactive entities.
    pub fn view<Q: Fetch>(&self) -> View<'_, Q> {
        View::new(self, &ViewFilter::default())
    }

    /// A view fetching `Q` with extra filter, exclusion and inactive options.
    pub fn view_filtered<Q: Fetch>(&self, filter: &ViewFilter) -> View<'_, Q> {
        View::new(self, filter)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentMap;

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

    impl Component for Position {}
    impl Component for Velocity {}
    impl Component for Health {}

    fn spawn(registry: &mut Registry, components: ComponentMap) -> Entity {
        let e = registry.allocate_entity();
        registry.create(e, components).unwrap();
        e
    }

    /// A:{Pos}, B:{Pos, Vel}, C:{Vel}
    fn setup() -> (Registry, Entity, Entity, Entity) {
        let mut registry = Registry::new();
        let a = spawn(
            &mut registry,
            ComponentMap::new().with(Position { x: 1.0, y: 0.0 }),
        );
        let b = spawn(
            &mut registry,
            ComponentMap::new()
                .with(Position { x: 2.0, y: 0.0 })
                .with(Velocity { dx: 1.0, dy: 1.0 }),
        );
        let c = spawn(
            &mut registry,
            ComponentMap::new().with(Velocity { dx: 3.0, dy: 3.0 }),
        );
        (registry, a, b, c)
    }

    // -- 1. Signature resolution ----------------------------------------------

    #[test]
    fn required_and_excluded() {
        let (registry, a, _, _) = setup();
        let view = registry.view_filtered::<(&Position,)>(&ViewFilter::new().without::<Velocity>());
        let entities: Vec<Entity> = view.entities().collect();
        assert_eq!(entities, vec![a]);
    }

    #[test]
    fn multiple_fetched_types() {
        let (registry, _, b, _) = setup();
        let view = registry.view::<(&Position, &Velocity)>();
        let rows: Vec<_> = view.iter().collect();
        assert_eq!(rows.len(), 1);
        let (entity, (pos, vel)) = rows[0];
        assert_eq!(entity, b);
        assert_eq!(pos, &Position { x: 2.0, y: 0.0 });
        assert_eq!(vel, &Velocity { dx: 1.0, dy: 1.0 });
    }

    #[test]
    fn filter_only_types_are_required_but_not_fetched() {
        let (registry, _, b, _) = setup();
        let view = registry.view_filtered::<(&Position,)>(&ViewFilter::new().with::<Velocity>());
        let entities: Vec<Entity> = view.iter().map(|(e, _)| e).collect();
        assert_eq!(entities, vec![b]);
    }

    #[test]
    fn unknown_required_type_yields_nothing() {
        let (registry, _, _, _) = setup();
        let view = registry.view::<(&Health,)>();
        assert_eq!(view.archetype_count(), 0);
        assert!(view.is_empty());
        assert_eq!(view.iter().count(), 0);
    }

    #[test]
    fn unit_fetch_counts_everything_filtered() {
        let (registry, _, _, _) = setup();
        let view = registry.view_filtered::<()>(&ViewFilter::new().with::<Velocity>());
        assert_eq!(view.size(), 2);
    }

    // -- 2. Inactive entities -------------------------------------------------

    #[test]
    fn inactive_entities_skipped_by_default() {
        let (mut registry, a, b, _) = setup();
        registry.add_component(a, Inactive).unwrap();

        let view = registry.view::<(&Position,)>();
        let entities: Vec<Entity> = view.entities().collect();
        assert_eq!(entities, vec![b]);

        let all = registry.view_filtered::<(&Position,)>(&ViewFilter::new().include_inactive());
        assert_eq!(all.size(), 2);
    }

    #[test]
    fn fetching_inactive_marker_implies_inclusion() {
        let (mut registry, a, _, _) = setup();
        registry.add_component(a, Inactive).unwrap();
        let view = registry.view::<(&Inactive,)>();
        assert_eq!(view.size(), 1);
    }

    // -- 3. Size, emptiness and iteration ----------------------------------

    #[test]
    fn size_sums_across_archetypes() {
        let (registry, _, _, _) = setup();
        assert_eq!(registry.view::<(&Position,)>().size(), 2);
        assert_eq!(registry.view::<(&Velocity,)>().size(), 2);
        assert!(!registry.view::<(&Velocity,)>().is_empty());
    }

    #[test]
    fn view_counts_match_iteration() {
        let (registry, _, _, _) = setup();
        let view = registry.view::<(&Position,)>();
        assert_eq!(view.iter().count(), view.size());
        assert_eq!((&view).into_iter().count(), view.size());
    }

    #[test]
    fn iteration_is_lazy_and_restartable() {
        let (registry, _, _, _) = setup();
        let view = registry.view::<(&Velocity,)>();
        let mut iter = view.iter();
        assert!(iter.next().is_some());
        assert_eq!(view.iter().count(), 2);
    }

    #[test]
    fn views_from_many_threads() {
        let (registry, _, _, _) = setup();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let view = registry.view::<(&Position,)>();
                    let sum: f32 = view.iter().map(|(_, (p,))| p.x).sum();
                    assert_eq!(sum, 3.0);
                });
            }
        });
    }
}
