//! Component managers and global components.
//!
//! A component in this ECS is not a per-entity value but a per-type manager:
//! one [`ComponentManager`] instance per concrete type, owning a sparse
//! mapping from [`EntityId`] to that component's private data. The scene
//! asks managers whether an entity is present (for queries) and tells them
//! when an entity is destroyed so they can drop its state.
//!
//! A [`GlobalComponent`] is a per-scene singleton with no per-entity data.

use crate::entity::EntityId;
use crate::registry::AsAny;

// ---------------------------------------------------------------------------
// StateError
// ---------------------------------------------------------------------------

/// Errors produced while exporting or importing externalized state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The type does not support externalized state.
    #[error("'{type_name}' does not support externalized state")]
    Unsupported { type_name: &'static str },

    /// The entity has no state in this manager.
    #[error("entity {entity} has no state in '{type_name}'")]
    NotPresent {
        type_name: &'static str,
        entity: EntityId,
    },

    /// The state string could not be encoded or decoded.
    #[error("state encoding failed for '{type_name}': {source}")]
    Encoding {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// ComponentManager
// ---------------------------------------------------------------------------

/// The single per-scene manager of one component type.
///
/// Implementors own their per-entity data. The only contract the scene relies
/// on is that [`is_present_on`](Self::is_present_on) answers correctly for
/// any id, live or dead, and that [`reset_entity`](Self::reset_entity) drops
/// every trace of the entity.
pub trait ComponentManager: AsAny {
    /// Whether this manager holds state for `entity`.
    fn is_present_on(&self, entity: EntityId) -> bool;

    /// Drop all state held for `entity`. Called when the entity is destroyed.
    fn reset_entity(&mut self, entity: EntityId);

    /// Entities this manager holds state for, in ascending order.
    fn present_entities(&self) -> Vec<EntityId>;

    /// Export the state held for `entity` as an opaque string.
    fn save_entity_state(&self, _entity: EntityId) -> Result<String, StateError> {
        Err(StateError::Unsupported {
            type_name: std::any::type_name::<Self>(),
        })
    }

    /// Import state for `entity` from a string produced by
    /// [`save_entity_state`](Self::save_entity_state).
    fn load_entity_state(&mut self, _entity: EntityId, _state: &str) -> Result<(), StateError> {
        Err(StateError::Unsupported {
            type_name: std::any::type_name::<Self>(),
        })
    }
}

// ---------------------------------------------------------------------------
// GlobalComponent
// ---------------------------------------------------------------------------

/// Scene-wide state with one instance per concrete type.
pub trait GlobalComponent: AsAny {
    /// Export the whole state as an opaque string.
    fn serialize_state(&self) -> Result<String, StateError>;

    /// Replace the state from a string produced by
    /// [`serialize_state`](Self::serialize_state).
    fn deserialize_state(&mut self, state: &str) -> Result<(), StateError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
