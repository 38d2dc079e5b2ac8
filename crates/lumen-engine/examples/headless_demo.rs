//! Headless demo -- a particle scene is captured to JSON, reloaded, and run
//! for five simulated seconds while particles drift past the edge and expire.
//!
//! Run with:
//!   cargo run --example headless_demo -p lumen-engine
//!
//! Set `RUST_LOG=lumen_ecs=debug` to watch entities come and go.

use lumen_engine::prelude::*;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Particle {
    x: f64,
    speed: f64,
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
struct Bounds {
    max_x: f64,
}

impl GlobalComponent for Bounds {
    fn serialize_state(&self) -> Result<String, StateError> {
        serde_json::to_string(self).map_err(|source| StateError::Encoding {
            type_name: "Bounds",
            source,
        })
    }

    fn deserialize_state(&mut self, state: &str) -> Result<(), StateError> {
        *self = serde_json::from_str(state).map_err(|source| StateError::Encoding {
            type_name: "Bounds",
            source,
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Drift;

impl Drift {
    fn on_update(&mut self, scene: &mut Scene, args: &EventArgs) -> Result<(), HandlerError> {
        let dt = *args.get::<f64>(0)?;
        if let Some(particles) = scene.component_mut::<SparseStore<Particle>>() {
            for (_, p) in particles.iter_mut() {
                p.x += p.speed * dt;
            }
        }
        Ok(())
    }
}

impl System for Drift {
    fn subscriptions() -> Vec<Subscription<Self>> {
        vec![Subscription::new(names::UPDATE, Self::on_update)]
    }
}

#[derive(Default)]
struct Expire {
    expired: usize,
}

impl Expire {
    fn on_post_update(&mut self, scene: &mut Scene, _args: &EventArgs) -> Result<(), HandlerError> {
        let max_x = scene.global::<Bounds>().map_or(f64::INFINITY, |b| b.max_x);
        let gone: Vec<EntityId> = scene
            .component::<SparseStore<Particle>>()
            .map(|store| {
                store
                    .iter()
                    .filter(|(_, p)| p.x > max_x)
                    .map(|(e, _)| e)
                    .collect()
            })
            .unwrap_or_default();
        for entity in gone {
            scene.destroy_entity(entity);
            self.expired += 1;
        }
        Ok(())
    }
}

impl System for Expire {
    fn subscriptions() -> Vec<Subscription<Self>> {
        vec![Subscription::new(names::POST_UPDATE, Self::on_post_update)]
    }
}

fn main() -> Result<(), anyhow::Error> {
    init_logging("warn")?;

    let mut catalog = TypeCatalog::new();
    catalog
        .register_component::<SparseStore<Particle>>("particle")
        .register_global::<Bounds>("bounds")
        .register_system::<Drift>("drift")
        .register_system::<Expire>("expire");

    // Build the record from a freshly spawned scene so ids are contiguous.
    let mut seed = Scene::new();
    let mut particles = SparseStore::new();
    for i in 0..20 {
        let e = seed.create_entity();
        particles.insert(
            e,
            Particle {
                x: 0.0,
                speed: 0.5 + f64::from(i) * 0.25,
            },
        );
    }
    seed.register_component(particles);
    seed.add_global(Bounds { max_x: 10.0 });
    seed.add_system(Drift)?;
    seed.add_system(Expire::default())?;
    let record = capture_scene(&catalog, &seed)?;
    println!("record hash: {}", record.hash);

    let scene = load_scene(&catalog, &SceneRecord::from_json(&record.to_json()?)?)?;
    let mut frames = FrameLoop::new(scene, FrameConfig::default())?;

    for second in 1..=5 {
        frames.run_frames(60);
        let scene = frames.scene();
        let expired = scene.system::<Expire>().map_or(0, |s| s.expired);
        println!(
            "t={:.1}s alive={} expired={} last frame {:?}",
            frames.sim_time(),
            scene.entity_count(),
            expired,
            frames.last_diagnostics().total_time,
        );
        if second == 5 {
            let remaining = scene.entities_with::<(SparseStore<Particle>,)>();
            println!("remaining particles: {remaining:?}");
        }
    }

    let scene = frames.into_scene()?;
    println!("stopped with {} systems attached", scene.system_keys().len());
    Ok(())
}
