//! Lumen ECS -- a scene-centred Entity Component System with an event bus.
//!
//! A [`Scene`](scene::Scene) owns everything: recycled integer entity ids,
//! one manager per component type, scene-wide global components, systems and
//! a named-event bus. Components are not per-entity values but per-type
//! managers that answer "is this entity present?", which is all the
//! multi-component query needs. Systems declare their event handlers up front
//! and are subscribed only while the scene runs.
//!
//! # Quick Start
//!
//! ```
//! use lumen_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut scene = Scene::new();
//! let a = scene.create_entity();
//! let b = scene.create_entity();
//!
//! let mut positions = SparseStore::new();
//! positions.insert(b, Position { x: 1.0, y: 2.0 });
//! scene.register_component(positions);
//!
//! assert_eq!(scene.entities_with::<(SparseStore<Position>,)>(), vec![b]);
//! assert!(scene.destroy_entity(a));
//! assert_eq!(scene.create_entity(), a); // ids are recycled
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod event;
pub mod query;
pub mod registry;
pub mod scene;
pub mod sparse;
pub mod system;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by scene operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The type was never registered (or was already removed).
    #[error("{category} '{type_name}' is not registered. Registered: [{registered}]")]
    NotRegistered {
        category: registry::RegistryCategory,
        type_name: &'static str,
        registered: String,
    },

    /// A system lifecycle step ran out of order.
    #[error("system '{system}' cannot leave phase {found:?}: expected {expected:?}")]
    LifecycleOrder {
        system: &'static str,
        expected: system::SystemPhase,
        found: system::SystemPhase,
    },

    /// The system is mutably borrowed by one of its own running handlers.
    #[error("system '{system}' is busy handling an event")]
    SystemBusy { system: &'static str },

    /// Misuse of the event bus.
    #[error(transparent)]
    Event(#[from] event::EventError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{ComponentManager, GlobalComponent, StateError};
    pub use crate::entity::{EntityAllocator, EntityId, RecyclePolicy};
    pub use crate::event::{
        names, DispatchReport, EventArgs, EventBus, EventError, Handler, HandlerError,
    };
    pub use crate::query::ComponentSet;
    pub use crate::registry::{AsAny, RegistryCategory, TypeKey, TypeRegistry};
    pub use crate::scene::{RunState, Scene, SceneConfig};
    pub use crate::sparse::SparseStore;
    pub use crate::system::{Binding, Subscription, System, SystemHandler, SystemPhase};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    // -- test types ---------------------------------------------------------

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    type Positions = SparseStore<Position>;
    type Velocities = SparseStore<Velocity>;

    /// Integrates velocity into position on every update.
    #[derive(Default)]
    struct Movement {
        steps: u32,
    }

    impl Movement {
        fn on_update(&mut self, scene: &mut Scene, args: &EventArgs) -> Result<(), HandlerError> {
            let dt = *args.get::<f64>(0)? as f32;
            let movers = scene.entities_with::<(Positions, Velocities)>();
            let deltas: Vec<(EntityId, Velocity)> = {
                let vel = scene
                    .component::<Velocities>()
                    .ok_or_else(|| HandlerError::failed("velocities missing"))?;
                movers
                    .iter()
                    .filter_map(|e| vel.get(*e).map(|v| (*e, v.clone())))
                    .collect()
            };
            let pos = scene
                .component_mut::<Positions>()
                .ok_or_else(|| HandlerError::failed("positions missing"))?;
            for (entity, v) in deltas {
                if let Some(p) = pos.get_mut(entity) {
                    p.x += v.dx * dt;
                    p.y += v.dy * dt;
                }
            }
            self.steps += 1;
            Ok(())
        }
    }

    impl System for Movement {
        fn subscriptions() -> Vec<Subscription<Self>> {
            vec![Subscription::new(names::UPDATE, Self::on_update)]
        }
    }

    fn position_scene(policy: RecyclePolicy) -> (Scene, [EntityId; 3]) {
        let mut scene = Scene::with_config(SceneConfig {
            recycle_policy: policy,
            ..SceneConfig::default()
        });
        let ids = [
            scene.create_entity(),
            scene.create_entity(),
            scene.create_entity(),
        ];
        let mut positions = Positions::new();
        positions.insert(ids[0], Position { x: 0.0, y: 0.0 });
        positions.insert(ids[2], Position { x: 2.0, y: 0.0 });
        scene.register_component(positions);
        (scene, ids)
    }

    // -- end to end ---------------------------------------------------------

    #[test]
    fn create_query_destroy_recycle_lifo() {
        let (mut scene, ids) = position_scene(RecyclePolicy::Lifo);
        assert_eq!(ids.map(EntityId::to_raw), [0, 1, 2]);
        assert_eq!(scene.entities_with::<(Positions,)>(), vec![ids[0], ids[2]]);

        assert!(scene.destroy_entity(ids[0]));
        assert_eq!(scene.entities_with::<(Positions,)>(), vec![ids[2]]);

        let reborn = scene.create_entity();
        assert_eq!(reborn, EntityId::new(0));
        assert!(!scene
            .component::<Positions>()
            .unwrap()
            .is_present_on(reborn));
        assert_eq!(scene.entities_with::<(Positions,)>(), vec![ids[2]]);
    }

    #[test]
    fn create_query_destroy_recycle_fifo() {
        let (mut scene, ids) = position_scene(RecyclePolicy::Fifo);
        assert!(scene.destroy_entity(ids[0]));

        // FIFO reuses the oldest retired id, so destroy 1 too and check order.
        assert!(scene.destroy_entity(ids[1]));
        assert_eq!(scene.create_entity(), EntityId::new(0));
        assert_eq!(scene.create_entity(), EntityId::new(1));
        assert_eq!(scene.create_entity(), EntityId::new(3));
        assert_eq!(scene.entities_with::<(Positions,)>(), vec![ids[2]]);
    }

    #[test]
    fn lifo_reuses_most_recent_first() {
        let (mut scene, ids) = position_scene(RecyclePolicy::Lifo);
        scene.destroy_entity(ids[0]);
        scene.destroy_entity(ids[1]);
        assert_eq!(scene.create_entity(), ids[1]);
        assert_eq!(scene.create_entity(), ids[0]);
        assert_eq!(scene.create_entity(), EntityId::new(3));
    }

    #[test]
    fn reset_is_complete_across_managers() {
        let (mut scene, ids) = position_scene(RecyclePolicy::Lifo);
        let mut velocities = Velocities::new();
        velocities.insert(ids[2], Velocity { dx: 1.0, dy: 0.0 });
        scene.register_component(velocities);

        scene.destroy_entity(ids[2]);
        for key in scene.component_keys() {
            let manager = scene.component_by_key(key).unwrap();
            assert!(!manager.is_present_on(ids[2]), "{key} kept state");
        }
    }

    #[test]
    fn registry_overwrite_discards_entity_state() {
        let (mut scene, ids) = position_scene(RecyclePolicy::Lifo);
        let old = scene.register_component(Positions::new()).unwrap();
        assert_eq!(old.len(), 2);
        assert!(scene.entities_with::<(Positions,)>().is_empty());
        assert!(scene.is_alive(ids[0]));
    }

    #[test]
    fn system_moves_entities_while_running() {
        let (mut scene, ids) = position_scene(RecyclePolicy::Lifo);
        let mut velocities = Velocities::new();
        velocities.insert(ids[2], Velocity { dx: 2.0, dy: -1.0 });
        scene.register_component(velocities);
        scene.add_system(Movement::default()).unwrap();

        // Not running yet: nothing subscribed.
        let report = scene.invoke(names::UPDATE, EventArgs::one(0.5f64)).unwrap();
        assert_eq!(report.invoked, 0);

        scene.start().unwrap();
        let report = scene.invoke(names::UPDATE, EventArgs::one(0.5f64)).unwrap();
        assert_eq!(report, DispatchReport { invoked: 1, failed: 0 });

        let positions = scene.component::<Positions>().unwrap();
        assert_eq!(positions.get(ids[2]), Some(&Position { x: 3.0, y: -0.5 }));
        assert_eq!(positions.get(ids[0]), Some(&Position { x: 0.0, y: 0.0 }));
        assert_eq!(scene.system::<Movement>().unwrap().steps, 1);
    }

    #[test]
    fn event_isolation_with_three_subscribers() {
        let mut scene = Scene::new();
        scene.register_event("ping", false).unwrap();
        let hits = Rc::new(RefCell::new(Vec::new()));

        for (tag, fails) in [("first", false), ("second", true), ("third", false)] {
            let sink = Rc::clone(&hits);
            scene
                .subscribe(
                    "ping",
                    Handler::named(tag, move |_scene: &mut Scene, _args: &EventArgs| {
                        if fails {
                            return Err(HandlerError::failed("second always fails"));
                        }
                        sink.borrow_mut().push(tag);
                        Ok(())
                    }),
                )
                .unwrap();
        }

        let report = scene.invoke("ping", EventArgs::new()).unwrap();
        assert_eq!(report, DispatchReport { invoked: 3, failed: 1 });
        let mut seen = hits.borrow().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec!["first", "third"]);
    }

    #[test]
    fn handler_panic_does_not_reach_caller() {
        let mut scene = Scene::new();
        scene
            .subscribe(
                names::POST_UPDATE,
                Handler::new(|_scene: &mut Scene, _args: &EventArgs| panic!("bad subscriber")),
            )
            .unwrap();
        let report = scene
            .invoke(names::POST_UPDATE, EventArgs::one(0.0f64))
            .unwrap();
        assert_eq!(report.failed, 1);
        // The scene is still usable.
        assert_eq!(scene.create_entity(), EntityId::new(0));
    }

    #[test]
    fn binding_outliving_system_reports_dropped() {
        let mut scene = Scene::new();
        scene.add_system(Movement::default()).unwrap();
        let handler = scene.system_bindings::<Movement>().unwrap()[0]
            .handler
            .clone();
        scene.remove_system::<Movement>().unwrap();

        scene.subscribe(names::UPDATE, handler).unwrap();
        let report = scene.invoke(names::UPDATE, EventArgs::one(0.1f64)).unwrap();
        assert_eq!(report, DispatchReport { invoked: 1, failed: 1 });
    }

    #[test]
    fn error_messages_name_the_type() {
        let mut scene = Scene::new();
        let err = scene.remove_component::<Positions>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("component '"), "{msg}");
        assert!(msg.contains("Position"), "{msg}");
    }
}
