//! Parent/child links between entities.
//!
//! The hierarchy lives beside component storage: it keeps a `child -> parent`
//! map and a `parent -> children` map and updates both in every operation.
//! An entity has at most one parent, never itself, and never one of its own
//! descendants.

use std::collections::{HashMap, HashSet};

use crate::entity::Entity;
use crate::EcsError;

/// Bidirectional parent/child index.
#[derive(Debug, Default, Clone)]
pub struct Hierarchy {
    parents: HashMap<Entity, Entity>,
    children: HashMap<Entity, HashSet<Entity>>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `child` under `parent`.
    ///
    /// Rejects self-parenting, re-parenting a child that already has a parent,
    /// and links that would close a cycle.
    pub fn set_parent(&mut self, child: Entity, parent: Entity) -> Result<(), EcsError> {
        if child == parent {
            return Err(EcsError::SelfParent { entity: child });
        }
        if let Some(&existing) = self.parents.get(&child) {
            return Err(EcsError::AlreadyParented {
                child,
                parent: existing,
            });
        }
        if self.ancestors(parent).any(|ancestor| ancestor == child) {
            return Err(EcsError::HierarchyCycle { child, parent });
        }
        self.parents.insert(child, parent);
        self.children.entry(parent).or_default().insert(child);
        Ok(())
    }

    /// Remove the edge between `child` and its parent, returning the parent.
    pub fn remove_parent_edge(&mut self, child: Entity) -> Result<Entity, EcsError> {
        let parent = self
            .parents
            .remove(&child)
            .ok_or(EcsError::NotAChild { child })?;
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.remove(&child);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
        Ok(parent)
    }

    /// Remove every edge from `parent` to its children, returning them.
    pub fn detach_children(&mut self, parent: Entity) -> Vec<Entity> {
        let children: Vec<Entity> = self
            .children
            .remove(&parent)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for child in &children {
            self.parents.remove(child);
        }
        children
    }

    /// Drop every edge touching `entity`, as a child and as a parent.
    pub fn sever(&mut self, entity: Entity) {
        let _ = self.remove_parent_edge(entity);
        self.detach_children(entity);
    }

    pub fn parent_of(&self, child: Entity) -> Option<Entity> {
        self.parents.get(&child).copied()
    }

    /// Direct children, in unspecified order.
    pub fn children_of(&self, parent: Entity) -> impl Iterator<Item = Entity> + '_ {
        self.children
            .get(&parent)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Every transitive descendant of `entity`, excluding `entity` itself.
    pub fn descendants_of(&self, entity: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack: Vec<Entity> = self.children_of(entity).collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children_of(next));
        }
        out
    }

    fn ancestors(&self, entity: Entity) -> impl Iterator<Item = Entity> + '_ {
        std::iter::successors(self.parent_of(entity), move |e| self.parent_of(*e))
    }

    /// Number of parent/child edges.
    pub fn edge_count(&self) -> usize {
        self.parents.len()
    }

    /// `true` if `entity` appears anywhere in either map.
    pub fn references(&self, entity: Entity) -> bool {
        self.parents.contains_key(&entity)
            || self.children.contains_key(&entity)
            || self.parents.values().any(|p| *p == entity)
            || self.children.values().any(|set| set.contains(&entity))
    }

    /// `true` if both maps describe the same set of edges.
    pub fn is_consistent(&self) -> bool {
        let forward = self
            .parents
            .iter()
            .all(|(child, parent)| self.children.get(parent).is_some_and(|s| s.contains(child)));
        let backward = self.children.iter().all(|(parent, set)| {
            !set.is_empty() && set.iter().all(|child| self.parents.get(child) == Some(parent))
        });
        forward && backward
    }

    pub fn clear(&mut self) {
        self.parents.clear();
        self.children.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
