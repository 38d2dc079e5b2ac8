//! A ready-made sparse component manager.
//!
//! [`SparseStore<T>`] is the common case: an `EntityId -> T` map that
//! implements [`ComponentManager`] and persists each entity's value as JSON.
//! Distinct `T`s are distinct concrete types, so `SparseStore<Position>` and
//! `SparseStore<Velocity>` register as separate managers.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::component::{ComponentManager, StateError};
use crate::entity::EntityId;

/// Sparse `EntityId -> T` storage.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseStore<T> {
    values: BTreeMap<EntityId, T>,
}

impl<T> SparseStore<T> {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Attach `value` to `entity`, returning the previous value.
    pub fn insert(&mut self, entity: EntityId, value: T) -> Option<T> {
        self.values.insert(entity, value)
    }

    pub fn get(&self, entity: EntityId) -> Option<&T> {
        self.values.get(&entity)
    }

    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        self.values.get_mut(&entity)
    }

    /// Detach and return the value for `entity`.
    pub fn remove(&mut self, entity: EntityId) -> Option<T> {
        self.values.remove(&entity)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.values.contains_key(&entity)
    }

    /// `(entity, value)` pairs in ascending entity order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.values.iter().map(|(e, v)| (*e, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.values.iter_mut().map(|(e, v)| (*e, v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T> Default for SparseStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<(EntityId, T)> for SparseStore<T> {
    fn from_iter<I: IntoIterator<Item = (EntityId, T)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<T> ComponentManager for SparseStore<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn is_present_on(&self, entity: EntityId) -> bool {
        self.values.contains_key(&entity)
    }

    fn reset_entity(&mut self, entity: EntityId) {
        self.values.remove(&entity);
    }

    fn present_entities(&self) -> Vec<EntityId> {
        self.values.keys().copied().collect()
    }

    fn save_entity_state(&self, entity: EntityId) -> Result<String, StateError> {
        let type_name = std::any::type_name::<Self>();
        let value = self
            .values
            .get(&entity)
            .ok_or(StateError::NotPresent { type_name, entity })?;
        serde_json::to_string(value).map_err(|source| StateError::Encoding { type_name, source })
    }

    fn load_entity_state(&mut self, entity: EntityId, state: &str) -> Result<(), StateError> {
        let value: T = serde_json::from_str(state).map_err(|source| StateError::Encoding {
            type_name: std::any::type_name::<Self>(),
            source,
        })?;
        self.values.insert(entity, value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    fn e(raw: u32) -> EntityId {
        EntityId::new(raw)
    }

    #[test]
    fn insert_get_remove() {
        let mut store = SparseStore::new();
        assert_eq!(store.insert(e(4), Position { x: 1.0, y: 2.0 }), None);
        assert_eq!(store.get(e(4)), Some(&Position { x: 1.0, y: 2.0 }));
        if let Some(p) = store.get_mut(e(4)) {
            p.x = 9.0;
        }
        assert_eq!(store.remove(e(4)), Some(Position { x: 9.0, y: 2.0 }));
        assert!(store.is_empty());
    }

    #[test]
    fn presence_follows_reset() {
        let mut store: SparseStore<Position> =
            [(e(0), Position { x: 0.0, y: 0.0 }), (e(2), Position { x: 2.0, y: 0.0 })]
                .into_iter()
                .collect();
        assert!(store.is_present_on(e(0)));
        assert!(!store.is_present_on(e(1)));
        store.reset_entity(e(0));
        assert!(!store.is_present_on(e(0)));
        assert_eq!(store.present_entities(), vec![e(2)]);
    }

    #[test]
    fn state_roundtrips_through_json() {
        let mut store = SparseStore::new();
        store.insert(e(1), Position { x: 3.5, y: -1.0 });
        let state = store.save_entity_state(e(1)).unwrap();

        let mut restored: SparseStore<Position> = SparseStore::new();
        restored.load_entity_state(e(7), &state).unwrap();
        assert_eq!(restored.get(e(7)), Some(&Position { x: 3.5, y: -1.0 }));
    }

    #[test]
    fn save_absent_entity_is_not_present() {
        let store: SparseStore<Position> = SparseStore::new();
        assert!(matches!(
            store.save_entity_state(e(0)),
            Err(StateError::NotPresent { .. })
        ));
    }

    #[test]
    fn load_malformed_state_fails() {
        let mut store: SparseStore<Position> = SparseStore::new();
        let err = store.load_entity_state(e(0), "not json").unwrap_err();
        assert!(matches!(err, StateError::Encoding { .. }));
        assert!(!store.contains(e(0)));
    }
}
