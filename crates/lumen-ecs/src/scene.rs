//! The scene: the aggregate root that owns entities, registries and events.
//!
//! A [`Scene`] starts empty and stopped. Every structural change (entity
//! creation/destruction, registry add/remove) raises the matching core event
//! from [`names`] on the scene's own bus, so systems and ad-hoc handlers can
//! observe the scene without polling it.

use std::cell::{Ref, RefMut};
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::component::{ComponentManager, GlobalComponent};
use crate::entity::{EntityAllocator, EntityId, RecyclePolicy};
use crate::event::{names, DispatchReport, EventArgs, EventBus, Handler};
use crate::registry::{RegistryCategory, TypeKey, TypeRegistry};
use crate::system::{Binding, System, SystemPhase, SystemSlot};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction-time options for a [`Scene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Order in which retired entity ids are reused.
    pub recycle_policy: RecyclePolicy,
    /// Log every invocation of the entity and registry lifecycle events.
    pub log_core_events: bool,
    /// Log every invocation of `update` and `post_update`.
    pub log_frame_events: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            recycle_policy: RecyclePolicy::Lifo,
            log_core_events: false,
            log_frame_events: false,
        }
    }
}

/// Whether the scene's systems are subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Stopped,
    Running,
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// Entities, component managers, global components, systems and their bus.
pub struct Scene {
    config: SceneConfig,
    allocator: EntityAllocator,
    pub(crate) alive: BTreeSet<EntityId>,
    /// Ids between `before_destroy` and retirement.
    destroying: BTreeSet<EntityId>,
    pub(crate) components: TypeRegistry<Box<dyn ComponentManager>>,
    globals: TypeRegistry<Box<dyn GlobalComponent>>,
    systems: TypeRegistry<SystemSlot>,
    events: EventBus<Scene>,
    state: RunState,
}

impl Scene {
    /// Create an empty, stopped scene with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SceneConfig::default())
    }

    /// Create an empty, stopped scene and register the core events.
    pub fn with_config(config: SceneConfig) -> Self {
        let mut events = EventBus::new();
        let channels = names::LIFECYCLE
            .iter()
            .map(|name| (*name, config.log_core_events))
            .chain(names::FRAME.iter().map(|name| (*name, config.log_frame_events)));
        for (name, logging) in channels {
            if let Err(err) = events.register_event(name, logging) {
                // Core names are distinct constants on a fresh bus.
                unreachable!("core event registration failed: {err}");
            }
        }

        Self {
            config,
            allocator: EntityAllocator::with_policy(config.recycle_policy),
            alive: BTreeSet::new(),
            destroying: BTreeSet::new(),
            components: TypeRegistry::new(RegistryCategory::Component),
            globals: TypeRegistry::new(RegistryCategory::Global),
            systems: TypeRegistry::new(RegistryCategory::System),
            events,
            state: RunState::Stopped,
        }
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    // ----- entities -----

    /// Allocate an id and mark it live, raising the create events around it.
    pub fn create_entity(&mut self) -> EntityId {
        let entity = self.allocator.allocate();
        self.raise(names::ENTITY_BEFORE_CREATE, EventArgs::one(entity));
        self.alive.insert(entity);
        debug!(entity = %entity, "entity created");
        self.raise(names::ENTITY_AFTER_CREATE, EventArgs::one(entity));
        entity
    }

    /// Destroy a live entity. Returns `false` (and does nothing) otherwise.
    ///
    /// Every component manager drops the entity's state before
    /// `entity.before_destroy` is raised; the id is retired before
    /// `entity.after_destroy`. A destroy of the same id issued from a
    /// `before_destroy` handler returns `false`.
    pub fn destroy_entity(&mut self, entity: EntityId) -> bool {
        if !self.alive.contains(&entity) || self.destroying.contains(&entity) {
            trace!(entity = %entity, "destroy of non-live entity ignored");
            return false;
        }
        self.destroying.insert(entity);
        for manager in self.components.values_mut() {
            manager.reset_entity(entity);
        }
        self.raise(names::ENTITY_BEFORE_DESTROY, EventArgs::one(entity));
        self.destroying.remove(&entity);
        self.alive.remove(&entity);
        self.allocator.retire(entity);
        debug!(entity = %entity, "entity destroyed");
        self.raise(names::ENTITY_AFTER_DESTROY, EventArgs::one(entity));
        true
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.alive.contains(&entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.alive.len()
    }

    /// Live entities in ascending id order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter().copied()
    }

    /// Ids retired and waiting to be reused.
    pub fn recycled_count(&self) -> usize {
        self.allocator.free_count()
    }

    // ----- component managers -----

    /// Register `manager` as the manager of `T`, raising `component.added`.
    ///
    /// An existing `T` manager is replaced without migrating its per-entity
    /// state; it is returned (after `component.removed` is raised for it).
    pub fn register_component<T: ComponentManager>(&mut self, manager: T) -> Option<T> {
        let key = TypeKey::of::<T>();
        let previous = self.components.add(key, Box::new(manager));
        let replaced = previous.is_some();
        debug!(component = key.name(), replaced, "component registered");
        if replaced {
            self.raise(names::COMPONENT_REMOVED, EventArgs::one(key));
        }
        self.raise(names::COMPONENT_ADDED, EventArgs::one(key));
        previous
            .and_then(|old| old.into_any().downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Unregister and return the manager of `T`, raising `component.removed`.
    pub fn remove_component<T: ComponentManager>(&mut self) -> Result<T, EcsError> {
        let key = TypeKey::of::<T>();
        let manager = self.remove_component_by_key(key)?;
        manager
            .into_any()
            .downcast::<T>()
            .map(|manager| *manager)
            .map_err(|_| self.not_registered(RegistryCategory::Component, key))
    }

    /// Unregister the manager stored under `key`.
    pub fn remove_component_by_key(
        &mut self,
        key: TypeKey,
    ) -> Result<Box<dyn ComponentManager>, EcsError> {
        let manager = self
            .components
            .remove(key)
            .ok_or_else(|| self.not_registered(RegistryCategory::Component, key))?;
        debug!(component = key.name(), "component removed");
        self.raise(names::COMPONENT_REMOVED, EventArgs::one(key));
        Ok(manager)
    }

    pub fn has_component<T: ComponentManager>(&self) -> bool {
        self.components.has(TypeKey::of::<T>())
    }

    /// The registered manager of `T`.
    pub fn component<T: ComponentManager>(&self) -> Option<&T> {
        self.components
            .get(TypeKey::of::<T>())
            .and_then(|manager| (**manager).as_any().downcast_ref::<T>())
    }

    pub fn component_mut<T: ComponentManager>(&mut self) -> Option<&mut T> {
        self.components
            .get_mut(TypeKey::of::<T>())
            .and_then(|manager| (**manager).as_any_mut().downcast_mut::<T>())
    }

    /// The manager registered under `key`, as a trait object.
    pub fn component_by_key(&self, key: TypeKey) -> Option<&dyn ComponentManager> {
        self.components.get(key).map(|manager| &**manager)
    }

    pub fn component_by_key_mut(&mut self, key: TypeKey) -> Option<&mut dyn ComponentManager> {
        match self.components.get_mut(key) {
            Some(manager) => Some(&mut **manager),
            None => None,
        }
    }

    /// Registered component types, sorted by name.
    pub fn component_keys(&self) -> Vec<TypeKey> {
        sorted_keys(&self.components)
    }

    // ----- global components -----

    /// Register the scene-wide `T`, raising `global.added`.
    ///
    /// Replaces and returns an existing `T`, raising `global.removed` for it.
    pub fn add_global<T: GlobalComponent>(&mut self, global: T) -> Option<T> {
        let key = TypeKey::of::<T>();
        let previous = self.globals.add(key, Box::new(global));
        let replaced = previous.is_some();
        debug!(global = key.name(), replaced, "global component registered");
        if replaced {
            self.raise(names::GLOBAL_REMOVED, EventArgs::one(key));
        }
        self.raise(names::GLOBAL_ADDED, EventArgs::one(key));
        previous
            .and_then(|old| old.into_any().downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Unregister and return the scene-wide `T`, raising `global.removed`.
    pub fn remove_global<T: GlobalComponent>(&mut self) -> Result<T, EcsError> {
        let key = TypeKey::of::<T>();
        let global = self.remove_global_by_key(key)?;
        global
            .into_any()
            .downcast::<T>()
            .map(|global| *global)
            .map_err(|_| self.not_registered(RegistryCategory::Global, key))
    }

    pub fn remove_global_by_key(
        &mut self,
        key: TypeKey,
    ) -> Result<Box<dyn GlobalComponent>, EcsError> {
        let global = self
            .globals
            .remove(key)
            .ok_or_else(|| self.not_registered(RegistryCategory::Global, key))?;
        debug!(global = key.name(), "global component removed");
        self.raise(names::GLOBAL_REMOVED, EventArgs::one(key));
        Ok(global)
    }

    pub fn has_global<T: GlobalComponent>(&self) -> bool {
        self.globals.has(TypeKey::of::<T>())
    }

    pub fn global<T: GlobalComponent>(&self) -> Option<&T> {
        self.globals
            .get(TypeKey::of::<T>())
            .and_then(|global| (**global).as_any().downcast_ref::<T>())
    }

    pub fn global_mut<T: GlobalComponent>(&mut self) -> Option<&mut T> {
        self.globals
            .get_mut(TypeKey::of::<T>())
            .and_then(|global| (**global).as_any_mut().downcast_mut::<T>())
    }

    pub fn global_by_key(&self, key: TypeKey) -> Option<&dyn GlobalComponent> {
        self.globals.get(key).map(|global| &**global)
    }

    pub fn global_by_key_mut(&mut self, key: TypeKey) -> Option<&mut dyn GlobalComponent> {
        match self.globals.get_mut(key) {
            Some(global) => Some(&mut **global),
            None => None,
        }
    }

    pub fn global_keys(&self) -> Vec<TypeKey> {
        sorted_keys(&self.globals)
    }

    // ----- systems -----

    /// Register `system`, attach it, and start it if the scene is running.
    ///
    /// An existing `S` goes through its full removal lifecycle first. Raises
    /// `system.added` once the new instance is in place.
    ///
    /// # Errors
    ///
    /// Fails if the existing `S` is busy, or if the scene is running and one
    /// of the new system's subscriptions names an unregistered event. In the
    /// latter case the new system is detached again and not kept.
    pub fn add_system<S: System>(&mut self, system: S) -> Result<(), EcsError> {
        let key = TypeKey::of::<S>();
        if self.systems.has(key) {
            debug!(system = key.name(), "replacing registered system");
            self.remove_system_by_key(key)?;
        }

        let slot = SystemSlot::new(system);
        self.systems.add(key, slot.clone());
        slot.attach(self)?;
        if self.is_running() && slot.phase() == SystemPhase::Attached {
            if let Err(err) = slot.start(self) {
                self.systems.remove(key);
                if let Err(detach_err) = slot.detach(self) {
                    warn!(system = key.name(), error = %detach_err, "rollback detach failed");
                }
                return Err(err);
            }
        }
        debug!(system = key.name(), "system registered");
        self.raise(names::SYSTEM_ADDED, EventArgs::one(key));
        Ok(())
    }

    /// Stop (if running), detach and return the registered `S`.
    pub fn remove_system<S: System>(&mut self) -> Result<S, EcsError> {
        let key = TypeKey::of::<S>();
        self.take_system(key)?.into_inner::<S>()
    }

    /// Stop (if running) and detach the system registered under `key`.
    pub fn remove_system_by_key(&mut self, key: TypeKey) -> Result<(), EcsError> {
        self.take_system(key).map(drop)
    }

    fn take_system(&mut self, key: TypeKey) -> Result<SystemSlot, EcsError> {
        let slot = self
            .systems
            .get(key)
            .cloned()
            .ok_or_else(|| self.not_registered(RegistryCategory::System, key))?;
        slot.ensure_idle()?;
        if slot.phase() == SystemPhase::Started {
            slot.stop(self)?;
        }
        if slot.phase() == SystemPhase::Attached {
            slot.detach(self)?;
        }
        // on_removed may itself have removed or replaced the entry.
        if self
            .systems
            .get(key)
            .is_some_and(|current| current.phase() == SystemPhase::Detached)
        {
            self.systems.remove(key);
        }
        debug!(system = key.name(), "system removed");
        self.raise(names::SYSTEM_REMOVED, EventArgs::one(key));
        Ok(slot)
    }

    pub fn has_system<S: System>(&self) -> bool {
        self.systems.has(TypeKey::of::<S>())
    }

    /// Shared access to the registered `S`.
    ///
    /// # Panics
    ///
    /// If `S` is mutably borrowed, i.e. when called from inside one of `S`'s
    /// own handlers.
    pub fn system<S: System>(&self) -> Option<Ref<'_, S>> {
        self.systems
            .get(TypeKey::of::<S>())
            .and_then(SystemSlot::downcast::<S>)
            .map(|cell| cell.borrow())
    }

    /// Exclusive access to the registered `S`.
    ///
    /// # Panics
    ///
    /// If `S` is already borrowed.
    pub fn system_mut<S: System>(&self) -> Option<RefMut<'_, S>> {
        self.systems
            .get(TypeKey::of::<S>())
            .and_then(SystemSlot::downcast::<S>)
            .map(|cell| cell.borrow_mut())
    }

    /// Lifecycle phase of the registered `S`.
    pub fn system_phase<S: System>(&self) -> Option<SystemPhase> {
        self.systems.get(TypeKey::of::<S>()).map(SystemSlot::phase)
    }

    /// Event bindings of the registered `S`.
    pub fn system_bindings<S: System>(&self) -> Option<&[Binding]> {
        self.systems.get(TypeKey::of::<S>()).map(SystemSlot::bindings)
    }

    pub fn system_keys(&self) -> Vec<TypeKey> {
        sorted_keys(&self.systems)
    }

    // ----- events -----

    /// The scene's event bus, for inspection.
    pub fn events(&self) -> &EventBus<Scene> {
        &self.events
    }

    /// Declare an application event on the scene bus.
    pub fn register_event(
        &mut self,
        name: impl Into<String>,
        enable_logging: bool,
    ) -> Result<(), EcsError> {
        Ok(self.events.register_event(name, enable_logging)?)
    }

    pub fn subscribe(&mut self, name: &str, handler: Handler<Scene>) -> Result<bool, EcsError> {
        Ok(self.events.subscribe(name, handler)?)
    }

    pub fn unsubscribe(&mut self, name: &str, handler: &Handler<Scene>) -> Result<bool, EcsError> {
        Ok(self.events.unsubscribe(name, handler)?)
    }

    /// Dispatch `name` to its subscribers with this scene as context.
    ///
    /// Subscriber failures are logged and counted in the report; only an
    /// unknown event name is an error.
    pub fn invoke(&mut self, name: &str, args: EventArgs) -> Result<DispatchReport, EcsError> {
        let dispatch = self.events.prepare(name)?;
        Ok(dispatch.run(self, &args))
    }

    /// Dispatch a core event. Core channels are registered at construction
    /// and can never be removed.
    fn raise(&mut self, name: &'static str, args: EventArgs) -> DispatchReport {
        match self.events.prepare(name) {
            Ok(dispatch) => dispatch.run(self, &args),
            Err(err) => panic!("core event missing from scene bus: {err}"),
        }
    }

    // ----- run state -----

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Start every registered system, then enter [`RunState::Running`].
    ///
    /// Does nothing if already running. Systems registered by another
    /// system's `on_start` are started in the same call. If a system fails to
    /// start, the ones already started are stopped again and the scene stays
    /// stopped.
    pub fn start(&mut self) -> Result<(), EcsError> {
        if self.is_running() {
            trace!("scene already running");
            return Ok(());
        }
        loop {
            let pending = self.slots_in(SystemPhase::Attached);
            if pending.is_empty() {
                break;
            }
            for slot in pending {
                if slot.phase() != SystemPhase::Attached {
                    continue;
                }
                if let Err(err) = slot.start(self) {
                    warn!(system = slot.key().name(), error = %err, "system failed to start");
                    self.stop_started();
                    return Err(err);
                }
            }
        }
        self.state = RunState::Running;
        info!(systems = self.systems.len(), "scene started");
        Ok(())
    }

    /// Stop every started system, then enter [`RunState::Stopped`].
    ///
    /// Does nothing if already stopped. Systems registered by another
    /// system's `on_stop` are stopped in the same call.
    pub fn stop(&mut self) -> Result<(), EcsError> {
        if !self.is_running() {
            trace!("scene already stopped");
            return Ok(());
        }
        // An on_stop callback may register a system, which starts at once
        // while the scene is still running.
        loop {
            let started = self.slots_in(SystemPhase::Started);
            if started.is_empty() {
                break;
            }
            for slot in started {
                if slot.phase() == SystemPhase::Started {
                    slot.stop(self)?;
                }
            }
        }
        self.state = RunState::Stopped;
        info!(systems = self.systems.len(), "scene stopped");
        Ok(())
    }

    /// Stop the scene and remove every system through its full lifecycle.
    ///
    /// Component managers, globals and entities are left in place.
    pub fn shutdown(&mut self) -> Result<(), EcsError> {
        self.stop()?;
        for key in self.system_keys() {
            if self.systems.has(key) {
                self.remove_system_by_key(key)?;
            }
        }
        Ok(())
    }

    fn slots_in(&self, phase: SystemPhase) -> Vec<SystemSlot> {
        let mut slots: Vec<SystemSlot> = self
            .systems
            .values()
            .filter(|slot| slot.phase() == phase)
            .cloned()
            .collect();
        slots.sort_by_key(|slot| slot.key().name());
        slots
    }

    fn stop_started(&mut self) {
        for slot in self.slots_in(SystemPhase::Started) {
            if let Err(err) = slot.stop(self) {
                warn!(system = slot.key().name(), error = %err, "system failed to stop");
            }
        }
    }

    fn not_registered(&self, category: RegistryCategory, key: TypeKey) -> EcsError {
        let registered = match category {
            RegistryCategory::Component => self.components.registered_names(),
            RegistryCategory::Global => self.globals.registered_names(),
            RegistryCategory::System => self.systems.registered_names(),
        };
        EcsError::NotRegistered {
            category,
            type_name: key.name(),
            registered: registered.join(", "),
        }
    }
}

fn sorted_keys<V>(registry: &TypeRegistry<V>) -> Vec<TypeKey> {
    let mut keys: Vec<TypeKey> = registry.keys().collect();
    keys.sort_by_key(|key| key.name());
    keys
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        if self.systems.is_empty() || std::thread::panicking() {
            return;
        }
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "scene shutdown on drop failed");
        }
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("state", &self.state)
            .field("entities", &self.alive.len())
            .field("components", &self.components)
            .field("globals", &self.globals)
            .field("systems", &self.systems)
            .field("events", &self.events)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
