//! System lifecycle ordering as seen from outside the crate.

use std::cell::RefCell;
use std::rc::Rc;

use lumen_ecs::prelude::*;

/// Shared journal the systems and handlers write into.
type Journal = Rc<RefCell<Vec<String>>>;

fn journal_handler(journal: &Journal, tag: &'static str) -> Handler<Scene> {
    let journal = Rc::clone(journal);
    Handler::named(tag, move |_scene: &mut Scene, args: &EventArgs| {
        let key = args.get::<TypeKey>(0)?;
        journal
            .borrow_mut()
            .push(format!("{tag}:{}", key.short_name()));
        Ok(())
    })
}

// ----- systems -----

#[derive(Default)]
struct Spawner {
    journal: Option<Journal>,
    spawned: Vec<EntityId>,
}

impl Spawner {
    fn note(&self, what: &str) {
        if let Some(journal) = &self.journal {
            journal.borrow_mut().push(format!("Spawner.{what}"));
        }
    }

    fn on_update(&mut self, scene: &mut Scene, _args: &EventArgs) -> Result<(), HandlerError> {
        self.spawned.push(scene.create_entity());
        Ok(())
    }

    fn on_despawn(&mut self, scene: &mut Scene, _args: &EventArgs) -> Result<(), HandlerError> {
        if let Some(e) = self.spawned.pop() {
            scene.destroy_entity(e);
        }
        Ok(())
    }
}

impl System for Spawner {
    fn subscriptions() -> Vec<Subscription<Self>> {
        vec![
            Subscription::new(names::UPDATE, Self::on_update),
            Subscription::new("spawner.despawn", Self::on_despawn),
        ]
    }

    fn on_added(&mut self, _scene: &mut Scene) {
        self.note("added");
    }

    fn on_start(&mut self, _scene: &mut Scene) {
        self.note("start");
    }

    fn on_stop(&mut self, _scene: &mut Scene) {
        self.note("stop");
    }

    fn on_removed(&mut self, _scene: &mut Scene) {
        self.note("removed");
    }
}

/// Registers a `Spawner` the first time it starts.
#[derive(Default)]
struct Bootstrap;

impl System for Bootstrap {
    fn on_start(&mut self, scene: &mut Scene) {
        if !scene.has_system::<Spawner>() {
            scene
                .add_system(Spawner::default())
                .expect("spawner registers");
        }
    }
}

/// Tries to remove itself from inside its own handler.
#[derive(Default)]
struct Quitter;

impl Quitter {
    fn on_update(&mut self, scene: &mut Scene, _args: &EventArgs) -> Result<(), HandlerError> {
        scene
            .remove_system::<Quitter>()
            .map(drop)
            .map_err(|err| HandlerError::failed(err.to_string()))
    }
}

impl System for Quitter {
    fn subscriptions() -> Vec<Subscription<Self>> {
        vec![Subscription::new(names::UPDATE, Self::on_update)]
    }
}

/// Registers a `Spawner` while it is being stopped.
#[derive(Default)]
struct Handoff;

impl System for Handoff {
    fn on_stop(&mut self, scene: &mut Scene) {
        if !scene.has_system::<Spawner>() {
            scene
                .add_system(Spawner::default())
                .expect("spawner registers");
        }
    }
}

fn scene_with_despawn_event() -> Scene {
    let mut scene = Scene::new();
    scene.register_event("spawner.despawn", false).unwrap();
    scene
}

// ----- tests -----

#[test]
fn callbacks_and_events_interleave_in_driver_order() {
    let journal: Journal = Rc::default();
    let mut scene = scene_with_despawn_event();
    scene
        .subscribe(names::SYSTEM_ADDED, journal_handler(&journal, "event.added"))
        .unwrap();
    scene
        .subscribe(
            names::SYSTEM_REMOVED,
            journal_handler(&journal, "event.removed"),
        )
        .unwrap();

    scene
        .add_system(Spawner {
            journal: Some(Rc::clone(&journal)),
            ..Spawner::default()
        })
        .unwrap();
    scene.start().unwrap();
    scene.stop().unwrap();
    scene.remove_system::<Spawner>().unwrap();

    assert_eq!(
        *journal.borrow(),
        vec![
            "Spawner.added",
            "event.added:Spawner",
            "Spawner.start",
            "Spawner.stop",
            "Spawner.removed",
            "event.removed:Spawner",
        ]
    );
}

#[test]
fn system_handlers_only_fire_while_running() {
    let mut scene = scene_with_despawn_event();
    scene.add_system(Spawner::default()).unwrap();

    scene.invoke(names::UPDATE, EventArgs::one(0.1f64)).unwrap();
    assert_eq!(scene.entity_count(), 0);

    scene.start().unwrap();
    scene.invoke(names::UPDATE, EventArgs::one(0.1f64)).unwrap();
    scene.invoke(names::UPDATE, EventArgs::one(0.1f64)).unwrap();
    assert_eq!(scene.entity_count(), 2);
    scene.invoke("spawner.despawn", EventArgs::new()).unwrap();
    assert_eq!(scene.entity_count(), 1);

    scene.stop().unwrap();
    scene.invoke(names::UPDATE, EventArgs::one(0.1f64)).unwrap();
    assert_eq!(scene.entity_count(), 1);
    assert_eq!(scene.system::<Spawner>().unwrap().spawned.len(), 1);
}

#[test]
fn subscriptions_exist_iff_running_and_registered() {
    let mut scene = scene_with_despawn_event();
    let count = |scene: &Scene| scene.events().subscriber_count("spawner.despawn");

    scene.add_system(Spawner::default()).unwrap();
    assert_eq!(count(&scene), Some(0));
    scene.start().unwrap();
    assert_eq!(count(&scene), Some(1));
    scene.remove_system::<Spawner>().unwrap();
    assert_eq!(count(&scene), Some(0));
    scene.add_system(Spawner::default()).unwrap();
    assert_eq!(count(&scene), Some(1));
    scene.stop().unwrap();
    assert_eq!(count(&scene), Some(0));
}

#[test]
fn systems_added_during_start_are_started() {
    let mut scene = scene_with_despawn_event();
    scene.add_system(Bootstrap).unwrap();
    scene.start().unwrap();

    assert_eq!(scene.system_phase::<Spawner>(), Some(SystemPhase::Started));
    scene.invoke(names::UPDATE, EventArgs::one(0.1f64)).unwrap();
    assert_eq!(scene.entity_count(), 1);
}

#[test]
fn system_cannot_remove_itself_from_its_own_handler() {
    let mut scene = Scene::new();
    scene.add_system(Quitter).unwrap();
    scene.start().unwrap();

    let report = scene.invoke(names::UPDATE, EventArgs::one(0.1f64)).unwrap();
    assert_eq!(report, DispatchReport { invoked: 1, failed: 1 });
    assert_eq!(scene.system_phase::<Quitter>(), Some(SystemPhase::Started));

    // Outside dispatch the same removal succeeds.
    scene.remove_system::<Quitter>().unwrap();
    assert!(!scene.has_system::<Quitter>());
}

#[test]
fn bindings_are_labelled_by_system_and_event() {
    let mut scene = scene_with_despawn_event();
    scene.add_system(Spawner::default()).unwrap();
    let labels: Vec<String> = scene
        .system_bindings::<Spawner>()
        .unwrap()
        .iter()
        .map(|b| b.handler.label().to_owned())
        .collect();
    assert_eq!(labels, vec!["Spawner::update", "Spawner::spawner.despawn"]);
}

#[test]
fn dropping_a_scene_runs_removal_hooks() {
    let journal: Journal = Rc::default();
    {
        let mut scene = scene_with_despawn_event();
        scene
            .add_system(Spawner {
                journal: Some(Rc::clone(&journal)),
                ..Spawner::default()
            })
            .unwrap();
        scene.start().unwrap();
    }
    assert_eq!(
        *journal.borrow(),
        vec!["Spawner.added", "Spawner.start", "Spawner.stop", "Spawner.removed"]
    );
}

#[test]
fn systems_added_during_stop_are_stopped() {
    let mut scene = scene_with_despawn_event();
    scene.add_system(Handoff).unwrap();
    scene.start().unwrap();
    scene.stop().unwrap();

    assert!(!scene.is_running());
    assert_eq!(scene.system_phase::<Spawner>(), Some(SystemPhase::Attached));
    assert_eq!(scene.events().subscriber_count(names::UPDATE), Some(0));
    scene.invoke(names::UPDATE, EventArgs::one(0.1f64)).unwrap();
    assert_eq!(scene.entity_count(), 0);

    // A later start picks the handed-off system up like any other.
    scene.start().unwrap();
    assert_eq!(scene.system_phase::<Spawner>(), Some(SystemPhase::Started));
}
