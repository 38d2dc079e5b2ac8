//! Frame driver tests: phase ordering, timing and systems driven per frame.

use std::cell::RefCell;
use std::rc::Rc;

use lumen_engine::prelude::*;

// ---------------------------------------------------------------------------
// Test components and systems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Velocity {
    dx: f64,
}

/// Integrates velocity on `update`.
#[derive(Default)]
struct Integrate;

impl Integrate {
    fn on_update(&mut self, scene: &mut Scene, args: &EventArgs) -> Result<(), HandlerError> {
        let dt = *args.get::<f64>(0)?;
        let velocities: Vec<(EntityId, f64)> = scene
            .component::<SparseStore<Velocity>>()
            .map(|store| store.iter().map(|(e, v)| (e, v.dx)).collect())
            .unwrap_or_default();
        if let Some(positions) = scene.component_mut::<SparseStore<Position>>() {
            for (entity, dx) in velocities {
                if let Some(p) = positions.get_mut(entity) {
                    p.x += dx * dt;
                }
            }
        }
        Ok(())
    }
}

impl System for Integrate {
    fn subscriptions() -> Vec<Subscription<Self>> {
        vec![Subscription::new(names::UPDATE, Self::on_update)]
    }
}

/// Destroys entities that moved past `x = 1.0`, after integration.
#[derive(Default)]
struct Cull {
    culled: Vec<EntityId>,
}

impl Cull {
    fn on_post_update(&mut self, scene: &mut Scene, _args: &EventArgs) -> Result<(), HandlerError> {
        let past: Vec<EntityId> = scene
            .component::<SparseStore<Position>>()
            .map(|store| {
                store
                    .iter()
                    .filter(|(_, p)| p.x > 1.0)
                    .map(|(e, _)| e)
                    .collect()
            })
            .unwrap_or_default();
        for entity in past {
            scene.destroy_entity(entity);
            self.culled.push(entity);
        }
        Ok(())
    }
}

impl System for Cull {
    fn subscriptions() -> Vec<Subscription<Self>> {
        vec![Subscription::new(names::POST_UPDATE, Self::on_post_update)]
    }
}

fn moving_scene() -> (Scene, EntityId, EntityId) {
    let mut scene = Scene::new();
    let fast = scene.create_entity();
    let slow = scene.create_entity();

    let mut positions = SparseStore::new();
    positions.insert(fast, Position { x: 0.0 });
    positions.insert(slow, Position { x: 0.0 });
    let mut velocities = SparseStore::new();
    velocities.insert(fast, Velocity { dx: 3.0 });
    velocities.insert(slow, Velocity { dx: 0.5 });
    scene.register_component(positions);
    scene.register_component(velocities);

    scene.add_system(Integrate).unwrap();
    scene.add_system(Cull::default()).unwrap();
    (scene, fast, slow)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn update_runs_before_post_update_every_frame() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut scene = Scene::new();
    for event in [names::POST_UPDATE, names::UPDATE] {
        let sink = Rc::clone(&order);
        scene
            .subscribe(
                event,
                Handler::named(event, move |_scene: &mut Scene, args: &EventArgs| {
                    let dt = *args.get::<f64>(0)?;
                    sink.borrow_mut().push((event, dt));
                    Ok(())
                }),
            )
            .unwrap();
    }

    let config = FrameConfig {
        fixed_dt: 0.25,
        ..Default::default()
    };
    let mut frames = FrameLoop::new(scene, config).unwrap();
    frames.run_frames(2);

    assert_eq!(
        *order.borrow(),
        vec![
            (names::UPDATE, 0.25),
            (names::POST_UPDATE, 0.25),
            (names::UPDATE, 0.25),
            (names::POST_UPDATE, 0.25),
        ]
    );
}

#[test]
fn sim_time_is_frames_times_dt() {
    let config = FrameConfig {
        fixed_dt: 0.1,
        ..Default::default()
    };
    let mut frames = FrameLoop::new(Scene::new(), config).unwrap();
    assert_eq!(frames.run_frames(1_000), 1_000);
    assert_eq!(frames.sim_time(), 1_000.0 * 0.1);
    assert_eq!(frames.fixed_dt(), 0.1);
}

#[test]
fn systems_move_and_cull_entities() {
    let (scene, fast, slow) = moving_scene();
    let config = FrameConfig {
        fixed_dt: 0.5,
        ..Default::default()
    };
    let mut frames = FrameLoop::new(scene, config).unwrap();

    // Frame 1: fast at 1.5 (culled), slow at 0.25.
    let diag = frames.frame();
    assert_eq!(diag.report.failed, 0);
    assert!(!frames.scene().is_alive(fast));
    assert!(frames.scene().is_alive(slow));
    assert_eq!(frames.scene().system::<Cull>().unwrap().culled, vec![fast]);

    // The culled entity's component state is gone and its id is reusable.
    let scene = frames.scene_mut();
    assert!(!scene
        .component::<SparseStore<Velocity>>()
        .unwrap()
        .contains(fast));
    assert_eq!(scene.create_entity(), fast);

    // Slow advances 0.25 per frame: 1.0 after frame 4, culled after frame 5.
    frames.run_frames(3);
    assert!(frames.scene().is_alive(slow));
    frames.run_frames(1);
    assert!(!frames.scene().is_alive(slow));
    assert_eq!(frames.frame_count(), 5);
}

#[test]
fn stopped_scene_frames_reach_no_systems() {
    let (scene, fast, _slow) = moving_scene();
    let config = FrameConfig {
        start_scene: false,
        ..Default::default()
    };
    let mut frames = FrameLoop::new(scene, config).unwrap();
    let diag = frames.frame();
    assert_eq!(diag.report.invoked, 0);
    assert_eq!(
        frames
            .scene()
            .component::<SparseStore<Position>>()
            .unwrap()
            .get(fast),
        Some(&Position { x: 0.0 })
    );
}

#[test]
fn into_scene_keeps_state_and_stops() {
    let (scene, _fast, slow) = moving_scene();
    let mut frames = FrameLoop::new(scene, FrameConfig::default()).unwrap();
    frames.run_frames(6);
    let scene = frames.into_scene().unwrap();
    assert!(!scene.is_running());
    assert_eq!(scene.system_phase::<Integrate>(), Some(SystemPhase::Attached));
    assert!(scene.is_alive(slow));
}
