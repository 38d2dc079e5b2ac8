//! Multi-component queries.
//!
//! A query asks every requested component manager whether an entity is
//! present and keeps the live entities for which all of them say yes. Keys
//! naming unregistered types are dropped rather than rejected, and a query
//! that resolves no manager at all matches nothing.
//!
//! Cost is O(live entities x resolved managers) per call; there is no
//! archetype index or cache. The `scene_benchmarks` bench tracks how this
//! scales.

use crate::component::ComponentManager;
use crate::entity::EntityId;
use crate::registry::TypeKey;
use crate::scene::Scene;

// ---------------------------------------------------------------------------
// ComponentSet
// ---------------------------------------------------------------------------

/// A tuple of component manager types usable with [`Scene::entities_with`].
pub trait ComponentSet {
    fn keys() -> Vec<TypeKey>;
}

impl<A: ComponentManager> ComponentSet for (A,) {
    fn keys() -> Vec<TypeKey> {
        vec![TypeKey::of::<A>()]
    }
}

impl<A: ComponentManager, B: ComponentManager> ComponentSet for (A, B) {
    fn keys() -> Vec<TypeKey> {
        vec![TypeKey::of::<A>(), TypeKey::of::<B>()]
    }
}

impl<A: ComponentManager, B: ComponentManager, C: ComponentManager> ComponentSet for (A, B, C) {
    fn keys() -> Vec<TypeKey> {
        vec![TypeKey::of::<A>(), TypeKey::of::<B>(), TypeKey::of::<C>()]
    }
}

impl<A, B, C, D> ComponentSet for (A, B, C, D)
where
    A: ComponentManager,
    B: ComponentManager,
    C: ComponentManager,
    D: ComponentManager,
{
    fn keys() -> Vec<TypeKey> {
        vec![
            TypeKey::of::<A>(),
            TypeKey::of::<B>(),
            TypeKey::of::<C>(),
            TypeKey::of::<D>(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Scene queries
// ---------------------------------------------------------------------------

impl Scene {
    /// Live entities present in every registered manager named by `keys`,
    /// in ascending id order.
    pub fn entities_by_components(&self, keys: &[TypeKey]) -> Vec<EntityId> {
        let managers: Vec<&dyn ComponentManager> = keys
            .iter()
            .filter_map(|key| self.components.get(*key))
            .map(|manager| &**manager)
            .collect();
        if managers.is_empty() {
            return Vec::new();
        }
        self.alive
            .iter()
            .copied()
            .filter(|entity| managers.iter().all(|m| m.is_present_on(*entity)))
            .collect()
    }

    /// Typed form of [`entities_by_components`](Self::entities_by_components).
    ///
    /// ```
    /// use lumen_ecs::prelude::*;
    ///
    /// #[derive(serde::Serialize, serde::Deserialize)]
    /// struct Position(f32, f32);
    /// #[derive(serde::Serialize, serde::Deserialize)]
    /// struct Mass(f32);
    ///
    /// let mut scene = Scene::new();
    /// let a = scene.create_entity();
    /// let b = scene.create_entity();
    ///
    /// let mut positions = SparseStore::new();
    /// positions.insert(a, Position(0.0, 0.0));
    /// positions.insert(b, Position(1.0, 0.0));
    /// let mut masses = SparseStore::new();
    /// masses.insert(b, Mass(2.0));
    /// scene.register_component(positions);
    /// scene.register_component(masses);
    ///
    /// let both = scene.entities_with::<(SparseStore<Position>, SparseStore<Mass>)>();
    /// assert_eq!(both, vec![b]);
    /// ```
    pub fn entities_with<Q: ComponentSet>(&self) -> Vec<EntityId> {
        self.entities_by_components(&Q::keys())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
