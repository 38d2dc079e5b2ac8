//! Entity identifiers and allocation.
//!
//! An [`EntityId`] is a plain 32-bit handle with no generation bits. Retired
//! ids go onto a free-list and are handed out again by later allocations, so
//! an id is only meaningful while the owning [`Scene`](crate::scene::Scene)
//! reports it alive.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// An opaque entity handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// Construct an `EntityId` from its raw index.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw `u32` representation.
    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EntityId> for u32 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// RecyclePolicy
// ---------------------------------------------------------------------------

/// Order in which retired ids are handed out again.
///
/// `Lifo` reuses the most recently retired id first, so a destroy followed by
/// a create yields the same id. `Fifo` reuses the oldest retired id first,
/// which maximises the time before an id is seen again by observers that
/// cache ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecyclePolicy {
    /// Stack order (most recently retired first).
    #[default]
    Lifo,
    /// Queue order (least recently retired first).
    Fifo,
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles [`EntityId`]s.
///
/// The allocator does not track liveness; the scene owns the liveness set and
/// only retires ids it previously marked alive.
#[derive(Debug)]
pub struct EntityAllocator {
    /// Next never-issued id.
    high_water: u32,
    /// Retired ids available for reuse.
    free: VecDeque<EntityId>,
    policy: RecyclePolicy,
}

impl EntityAllocator {
    /// Create a new, empty allocator with the default (LIFO) policy.
    pub fn new() -> Self {
        Self::with_policy(RecyclePolicy::default())
    }

    /// Create a new, empty allocator with an explicit recycle policy.
    pub fn with_policy(policy: RecyclePolicy) -> Self {
        Self {
            high_water: 0,
            free: VecDeque::new(),
            policy,
        }
    }

    /// The recycle policy this allocator was built with.
    pub fn policy(&self) -> RecyclePolicy {
        self.policy
    }

    /// Allocate an id, preferring a retired one.
    ///
    /// # Panics
    ///
    /// Panics if the `u32` id space is exhausted. Wrapping would hand out ids
    /// that may still be alive.
    pub fn allocate(&mut self) -> EntityId {
        let recycled = match self.policy {
            RecyclePolicy::Lifo => self.free.pop_back(),
            RecyclePolicy::Fifo => self.free.pop_front(),
        };
        if let Some(id) = recycled {
            return id;
        }
        let id = EntityId(self.high_water);
        self.high_water = self
            .high_water
            .checked_add(1)
            .expect("entity id space exhausted");
        id
    }

    /// Return an id to the free-list.
    ///
    /// The caller guarantees `id` was allocated here and is no longer alive.
    pub fn retire(&mut self, id: EntityId) {
        debug_assert!(id.0 < self.high_water, "retiring an id never issued: {id:?}");
        // Linear in the free-list, so only checked in unit tests.
        #[cfg(test)]
        assert!(!self.free.contains(&id), "id retired twice: {id:?}");
        self.free.push_back(id);
    }

    /// The number of ids ever issued (the high-water mark).
    pub fn issued(&self) -> u32 {
        self.high_water
    }

    /// Number of retired ids waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
