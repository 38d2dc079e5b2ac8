//! Systems and their lifecycle driver.
//!
//! A [`System`] declares the events it reacts to through
//! [`System::subscriptions`], a plain list of `(event, fn)` pairs. When the
//! system is registered the driver binds each pair to the instance; when the
//! scene runs, the bindings are subscribed to the scene's event bus.
//!
//! The driver owns the four lifecycle steps and the order they run in:
//!
//! | step | driver | then/before |
//! |---|---|---|
//! | added | `Detached -> Attached` | then [`System::on_added`] |
//! | start | subscribe bindings, `Attached -> Started` | then [`System::on_start`] |
//! | stop | [`System::on_stop`] first | then unsubscribe, `Started -> Attached` |
//! | removed | [`System::on_removed`] first | then `Attached -> Detached` |
//!
//! The `on_*` callbacks are optional and cannot skip or reorder the driver's
//! own work.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::event::{EventArgs, EventError, Handler, HandlerError};
use crate::registry::{AsAny, RegistryCategory, TypeKey};
use crate::scene::Scene;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Signature of a system event handler.
pub type SystemHandler<S> = fn(&mut S, &mut Scene, &EventArgs) -> Result<(), HandlerError>;

/// One declared `(event, handler)` pair of a system type.
pub struct Subscription<S> {
    pub event: &'static str,
    pub handler: SystemHandler<S>,
}

impl<S> Subscription<S> {
    pub fn new(event: &'static str, handler: SystemHandler<S>) -> Self {
        Self { event, handler }
    }
}

impl<S> Clone for Subscription<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Subscription<S> {}

impl<S> fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A per-scene behaviour unit.
///
/// ```
/// use lumen_ecs::prelude::*;
///
/// #[derive(Default)]
/// struct Clock {
///     elapsed: f64,
/// }
///
/// impl Clock {
///     fn on_update(&mut self, _scene: &mut Scene, args: &EventArgs) -> Result<(), HandlerError> {
///         self.elapsed += *args.get::<f64>(0)?;
///         Ok(())
///     }
/// }
///
/// impl System for Clock {
///     fn subscriptions() -> Vec<Subscription<Self>> {
///         vec![Subscription::new(names::UPDATE, Self::on_update)]
///     }
/// }
///
/// let mut scene = Scene::new();
/// scene.add_system(Clock::default()).unwrap();
/// scene.start().unwrap();
/// scene.invoke(names::UPDATE, EventArgs::one(0.5f64)).unwrap();
/// assert_eq!(scene.system::<Clock>().unwrap().elapsed, 0.5);
/// ```
pub trait System: AsAny {
    /// The events this system type handles.
    fn subscriptions() -> Vec<Subscription<Self>>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Runs after the system is attached to `scene`.
    fn on_added(&mut self, _scene: &mut Scene) {}

    /// Runs after the system's handlers are subscribed.
    fn on_start(&mut self, _scene: &mut Scene) {}

    /// Runs before the system's handlers are unsubscribed.
    fn on_stop(&mut self, _scene: &mut Scene) {}

    /// Runs before the system is detached from `scene`.
    fn on_removed(&mut self, _scene: &mut Scene) {}
}

// ---------------------------------------------------------------------------
// SystemPhase
// ---------------------------------------------------------------------------

/// Where a registered system is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemPhase {
    /// Not attached to any scene.
    Detached,
    /// Registered in a scene, handlers not subscribed.
    Attached,
    /// Registered and subscribed.
    Started,
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// A declared subscription bound to one system instance.
#[derive(Debug, Clone)]
pub struct Binding {
    pub event: &'static str,
    pub handler: Handler<Scene>,
}

fn bind<S: System>(key: TypeKey, cell: &Rc<RefCell<S>>, sub: Subscription<S>) -> Binding {
    let weak = Rc::downgrade(cell);
    let handler = sub.handler;
    let label = format!("{}::{}", key.short_name(), sub.event);
    Binding {
        event: sub.event,
        handler: Handler::named(label, move |scene: &mut Scene, args: &EventArgs| {
            let system = weak
                .upgrade()
                .ok_or(HandlerError::SystemDropped { system: key.name() })?;
            let mut guard = system
                .try_borrow_mut()
                .map_err(|_| HandlerError::SystemBusy { system: key.name() })?;
            handler(&mut *guard, scene, args)
        }),
    }
}

// ---------------------------------------------------------------------------
// SystemSlot -- the lifecycle driver
// ---------------------------------------------------------------------------

/// A registered system: the instance, its bindings and its phase.
///
/// Cloning a slot shares all of it. The scene clones a slot out of its
/// registry before driving it, so the driver can hand `&mut Scene` to the
/// system's callbacks.
#[derive(Clone)]
pub(crate) struct SystemSlot {
    key: TypeKey,
    instance: Rc<RefCell<dyn System>>,
    erased: Rc<dyn Any>,
    bindings: Rc<[Binding]>,
    phase: Rc<Cell<SystemPhase>>,
}

impl SystemSlot {
    pub(crate) fn new<S: System>(system: S) -> Self {
        let key = TypeKey::of::<S>();
        let cell = Rc::new(RefCell::new(system));
        let bindings: Rc<[Binding]> = S::subscriptions()
            .into_iter()
            .map(|sub| bind(key, &cell, sub))
            .collect();
        Self {
            key,
            instance: cell.clone(),
            erased: cell,
            bindings,
            phase: Rc::new(Cell::new(SystemPhase::Detached)),
        }
    }

    pub(crate) fn key(&self) -> TypeKey {
        self.key
    }

    pub(crate) fn phase(&self) -> SystemPhase {
        self.phase.get()
    }

    pub(crate) fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// The concrete instance, if it is an `S`.
    pub(crate) fn downcast<S: System>(&self) -> Option<&RefCell<S>> {
        self.erased.downcast_ref::<RefCell<S>>()
    }

    /// Fails if a handler of this system is currently running.
    pub(crate) fn ensure_idle(&self) -> Result<(), EcsError> {
        self.instance
            .try_borrow_mut()
            .map(drop)
            .map_err(|_| EcsError::SystemBusy {
                system: self.key.name(),
            })
    }

    pub(crate) fn attach(&self, scene: &mut Scene) -> Result<(), EcsError> {
        self.transition(SystemPhase::Detached, SystemPhase::Attached)?;
        debug!(system = self.key.name(), "system attached");
        self.with_instance(|system| system.on_added(scene))
    }

    pub(crate) fn start(&self, scene: &mut Scene) -> Result<(), EcsError> {
        self.expect_phase(SystemPhase::Attached)?;
        // Validate every event before subscribing any, so a failed start
        // leaves nothing subscribed.
        let events = scene.events();
        if let Some(missing) = self.bindings.iter().find(|b| !events.is_registered(b.event)) {
            return Err(EventError::UnknownEvent {
                name: missing.event.to_owned(),
                registered: events.event_names().join(", "),
            }
            .into());
        }
        for binding in self.bindings.iter() {
            scene.subscribe(binding.event, binding.handler.clone())?;
        }
        self.phase.set(SystemPhase::Started);
        debug!(
            system = self.key.name(),
            subscriptions = self.bindings.len(),
            "system started"
        );
        self.with_instance(|system| system.on_start(scene))
    }

    pub(crate) fn stop(&self, scene: &mut Scene) -> Result<(), EcsError> {
        self.expect_phase(SystemPhase::Started)?;
        self.with_instance(|system| system.on_stop(scene))?;
        for binding in self.bindings.iter() {
            scene.unsubscribe(binding.event, &binding.handler)?;
        }
        self.phase.set(SystemPhase::Attached);
        debug!(system = self.key.name(), "system stopped");
        Ok(())
    }

    pub(crate) fn detach(&self, scene: &mut Scene) -> Result<(), EcsError> {
        self.expect_phase(SystemPhase::Attached)?;
        self.with_instance(|system| system.on_removed(scene))?;
        self.phase.set(SystemPhase::Detached);
        debug!(system = self.key.name(), "system detached");
        Ok(())
    }

    /// Recover the owned instance. The slot must be the last strong owner.
    pub(crate) fn into_inner<S: System>(self) -> Result<S, EcsError> {
        let SystemSlot {
            key,
            instance,
            erased,
            ..
        } = self;
        drop(instance);
        let busy = EcsError::SystemBusy { system: key.name() };
        let typed = erased.downcast::<RefCell<S>>().map_err(|_| EcsError::NotRegistered {
            category: RegistryCategory::System,
            type_name: std::any::type_name::<S>(),
            registered: key.name().to_owned(),
        })?;
        Rc::try_unwrap(typed)
            .map(RefCell::into_inner)
            .map_err(|_| busy)
    }

    fn expect_phase(&self, expected: SystemPhase) -> Result<(), EcsError> {
        let found = self.phase.get();
        if found != expected {
            return Err(EcsError::LifecycleOrder {
                system: self.key.name(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn transition(&self, from: SystemPhase, to: SystemPhase) -> Result<(), EcsError> {
        self.expect_phase(from)?;
        self.phase.set(to);
        Ok(())
    }

    fn with_instance(&self, f: impl FnOnce(&mut dyn System)) -> Result<(), EcsError> {
        let mut guard = self
            .instance
            .try_borrow_mut()
            .map_err(|_| EcsError::SystemBusy {
                system: self.key.name(),
            })?;
        f(&mut *guard);
        Ok(())
    }
}

impl fmt::Debug for SystemSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemSlot")
            .field("system", &self.key.name())
            .field("phase", &self.phase.get())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}
