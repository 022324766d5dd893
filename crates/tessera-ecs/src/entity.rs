//! Entity handles and token allocation.
//!
//! An [`Entity`] is an opaque 32-bit handle with no payload of its own. Ids
//! come from a monotonically increasing counter or are recycled from a free
//! list of destroyed ids.
//!
//! The [`EntityAllocator`] is shared between the [`Registry`](crate::registry::Registry)
//! and the [`StagingBuffer`](crate::staging::StagingBuffer): systems running on
//! worker threads reserve tokens for staged-new entities while the registry is
//! borrowed read-only, so the allocator guards its state with its own mutex.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An opaque entity handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entity(u32);

impl Entity {
    /// Reconstruct a handle from its raw id.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw `u32` representation.
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct AllocatorState {
    /// Next never-used id.
    next: u32,
    /// Whether each id below `next` is currently handed out.
    reserved: Vec<bool>,
    /// Recyclable ids (FIFO queue).
    free: VecDeque<u32>,
}

/// Hands out [`Entity`] tokens and takes them back on destruction.
///
/// Freed ids are reused in FIFO order so that a just-destroyed id is not
/// immediately handed to the next caller.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    state: Mutex<AllocatorState>,
}

impl EntityAllocator {
    /// Create a new, empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a token, reusing a freed id when one is available.
    ///
    /// # Panics
    ///
    /// Panics when the 32-bit id space is exhausted.
    pub fn reserve(&self) -> Entity {
        let mut state = self.state.lock();
        if let Some(id) = state.free.pop_front() {
            state.reserved[id as usize] = true;
            return Entity(id);
        }
        let id = state.next;
        state.next = id.checked_add(1).unwrap_or_else(|| panic!("entity id space exhausted"));
        state.reserved.push(true);
        Entity(id)
    }

    /// Return a token to the free list.
    ///
    /// Returns `false` if the token was not currently reserved.
    pub fn release(&self, entity: Entity) -> bool {
        let mut state = self.state.lock();
        let idx = entity.0 as usize;
        match state.reserved.get_mut(idx) {
            Some(slot) if *slot => {
                *slot = false;
                state.free.push_back(entity.0);
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if `entity` is currently handed out.
    pub fn is_reserved(&self, entity: Entity) -> bool {
        let state = self.state.lock();
        state.reserved.get(entity.0 as usize).copied().unwrap_or(false)
    }

    /// Number of tokens currently handed out.
    pub fn reserved_count(&self) -> usize {
        let state = self.state.lock();
        state.reserved.len() - state.free.len()
    }

    /// Forget every token and restart the counter at zero.
    pub fn reset(&self) {
        *self.state.lock() = AllocatorState::default();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
