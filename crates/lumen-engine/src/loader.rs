//! Scene records: persisted scenes and the loader that rebuilds them.
//!
//! A [`SceneRecord`] stores how many entities a scene has, each component
//! manager's per-entity state strings, each global component's state string
//! and the names of the registered systems. Types are referred to by the
//! stable names given to a [`TypeCatalog`], never by Rust type paths.
//!
//! Loading follows a fixed order: create every entity, then for each
//! component record register a fresh manager and feed it per-entity state,
//! then the globals, then the systems. Entity ids in a record are
//! record-relative indices `0..entity_count`.
//!
//! # Usage
//!
//! ```
//! use lumen_engine::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut catalog = TypeCatalog::new();
//! catalog.register_component::<SparseStore<Position>>("position");
//!
//! let mut scene = Scene::new();
//! let e = scene.create_entity();
//! let mut positions = SparseStore::new();
//! positions.insert(e, Position { x: 1.0, y: 2.0 });
//! scene.register_component(positions);
//!
//! let record = capture_scene(&catalog, &scene).unwrap();
//! assert_eq!(record.hash.len(), 64); // BLAKE3 hex digest
//!
//! let restored = load_scene(&catalog, &record).unwrap();
//! assert_eq!(
//!     restored.component::<SparseStore<Position>>().unwrap().get(e),
//!     Some(&Position { x: 1.0, y: 2.0 })
//! );
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::Context;
use lumen_ecs::component::{ComponentManager, GlobalComponent};
use lumen_ecs::entity::EntityId;
use lumen_ecs::registry::TypeKey;
use lumen_ecs::scene::{Scene, SceneConfig};
use lumen_ecs::system::System;
use lumen_ecs::EcsError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// SceneRecord
// ---------------------------------------------------------------------------

/// Persisted state of one component manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Catalog name of the manager type.
    pub type_name: String,
    /// Opaque state per record-relative entity index.
    pub states: BTreeMap<u32, String>,
}

/// Persisted state of one global component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRecord {
    pub type_name: String,
    pub state: String,
}

/// A serializable scene with a BLAKE3 content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRecord {
    /// Entities to create; ids in `components` index into `0..entity_count`.
    pub entity_count: u32,
    pub components: Vec<ComponentRecord>,
    pub globals: Vec<GlobalRecord>,
    /// Catalog names of the systems to add, in order.
    pub systems: Vec<String>,
    /// BLAKE3 hex digest (64 lowercase hex chars) of everything above.
    pub hash: String,
}

impl SceneRecord {
    /// Build a record and stamp its hash.
    pub fn new(
        entity_count: u32,
        components: Vec<ComponentRecord>,
        globals: Vec<GlobalRecord>,
        systems: Vec<String>,
    ) -> Self {
        let mut record = Self {
            entity_count,
            components,
            globals,
            systems,
            hash: String::new(),
        };
        record.hash = record.compute_hash();
        record
    }

    /// Recompute the content hash. The `hash` field itself is not covered.
    pub fn compute_hash(&self) -> String {
        #[derive(Serialize)]
        struct HashableRecord<'a> {
            entity_count: u32,
            components: &'a [ComponentRecord],
            globals: &'a [GlobalRecord],
            systems: &'a [String],
        }

        let hashable = HashableRecord {
            entity_count: self.entity_count,
            components: &self.components,
            globals: &self.globals,
            systems: &self.systems,
        };
        let json_bytes = serde_json::to_vec(&hashable)
            .expect("SceneRecord content should always be JSON-serializable");
        blake3::hash(&json_bytes).to_hex().to_string()
    }

    /// Fail if the stored hash does not match the content.
    pub fn verify(&self) -> Result<(), anyhow::Error> {
        let expected = self.compute_hash();
        if expected != self.hash {
            return Err(anyhow::anyhow!(
                "scene record hash mismatch: recorded {} but recomputed {}. \
                 The record may be corrupted or tampered with.",
                self.hash,
                expected
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, anyhow::Error> {
        serde_json::to_string_pretty(self).context("failed to serialize scene record")
    }

    pub fn from_json(json: &str) -> Result<Self, anyhow::Error> {
        serde_json::from_str(json).context("failed to parse scene record")
    }
}

// ---------------------------------------------------------------------------
// TypeCatalog
// ---------------------------------------------------------------------------

type Install = Box<dyn Fn(&mut Scene) -> Result<(), EcsError>>;

struct CatalogEntry {
    key: TypeKey,
    install: Install,
}

/// Stable names for the component, global and system types a record may
/// mention, each with a factory that registers a fresh default instance.
#[derive(Default)]
pub struct TypeCatalog {
    components: BTreeMap<String, CatalogEntry>,
    globals: BTreeMap<String, CatalogEntry>,
    systems: BTreeMap<String, CatalogEntry>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the component manager type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already used for a component type.
    pub fn register_component<T: ComponentManager + Default>(&mut self, name: &str) -> &mut Self {
        let install: Install = Box::new(|scene: &mut Scene| {
            scene.register_component(T::default());
            Ok(())
        });
        insert_entry(&mut self.components, "component", name, TypeKey::of::<T>(), install);
        self
    }

    /// Name the global component type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already used for a global type.
    pub fn register_global<T: GlobalComponent + Default>(&mut self, name: &str) -> &mut Self {
        let install: Install = Box::new(|scene: &mut Scene| {
            scene.add_global(T::default());
            Ok(())
        });
        insert_entry(&mut self.globals, "global", name, TypeKey::of::<T>(), install);
        self
    }

    /// Name the system type `S`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already used for a system type.
    pub fn register_system<S: System + Default>(&mut self, name: &str) -> &mut Self {
        let install: Install = Box::new(|scene: &mut Scene| scene.add_system(S::default()));
        insert_entry(&mut self.systems, "system", name, TypeKey::of::<S>(), install);
        self
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.components.keys().map(String::as_str).collect()
    }

    pub fn global_names(&self) -> Vec<&str> {
        self.globals.keys().map(String::as_str).collect()
    }

    pub fn system_names(&self) -> Vec<&str> {
        self.systems.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for TypeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCatalog")
            .field("components", &self.component_names())
            .field("globals", &self.global_names())
            .field("systems", &self.system_names())
            .finish()
    }
}

fn insert_entry(
    table: &mut BTreeMap<String, CatalogEntry>,
    category: &str,
    name: &str,
    key: TypeKey,
    install: Install,
) {
    assert!(
        !table.contains_key(name),
        "{category} name '{name}' is already registered in the catalog"
    );
    table.insert(name.to_owned(), CatalogEntry { key, install });
}

fn lookup<'a>(
    table: &'a BTreeMap<String, CatalogEntry>,
    category: &str,
    name: &str,
) -> Result<&'a CatalogEntry, anyhow::Error> {
    table.get(name).ok_or_else(|| {
        let known: Vec<&str> = table.keys().map(String::as_str).collect();
        anyhow::anyhow!(
            "unknown {category} type '{name}' in scene record. Known: [{}]",
            known.join(", ")
        )
    })
}

fn name_of(
    table: &BTreeMap<String, CatalogEntry>,
    category: &str,
    key: TypeKey,
) -> Result<String, anyhow::Error> {
    table
        .iter()
        .find(|(_, entry)| entry.key == key)
        .map(|(name, _)| name.clone())
        .ok_or_else(|| anyhow::anyhow!("{category} type '{key}' has no name in the catalog"))
}

fn ensure_unique<'a>(
    category: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), anyhow::Error> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(anyhow::anyhow!(
                "{category} type '{name}' appears more than once in scene record"
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Build a new scene (default configuration) from `record`.
pub fn load_scene(catalog: &TypeCatalog, record: &SceneRecord) -> Result<Scene, anyhow::Error> {
    load_scene_with(catalog, record, SceneConfig::default())
}

/// Build a new scene with `config` from `record`.
pub fn load_scene_with(
    catalog: &TypeCatalog,
    record: &SceneRecord,
    config: SceneConfig,
) -> Result<Scene, anyhow::Error> {
    let mut scene = Scene::with_config(config);
    load_into(catalog, record, &mut scene)?;
    Ok(scene)
}

/// Add the contents of `record` to an existing scene.
///
/// The record is fully validated (hash, type names, entity indices) before
/// the scene is touched. Returns the created entities, indexed like the
/// record.
///
/// # Errors
///
/// Fails on a hash mismatch, an unknown type name, an out-of-range entity
/// index, state that a manager rejects, or a system that fails to register.
pub fn load_into(
    catalog: &TypeCatalog,
    record: &SceneRecord,
    scene: &mut Scene,
) -> Result<Vec<EntityId>, anyhow::Error> {
    record.verify()?;

    let components = record
        .components
        .iter()
        .map(|c| lookup(&catalog.components, "component", &c.type_name).map(|e| (c, e)))
        .collect::<Result<Vec<_>, _>>()?;
    let globals = record
        .globals
        .iter()
        .map(|g| lookup(&catalog.globals, "global", &g.type_name).map(|e| (g, e)))
        .collect::<Result<Vec<_>, _>>()?;
    let systems = record
        .systems
        .iter()
        .map(|name| lookup(&catalog.systems, "system", name).map(|e| (name, e)))
        .collect::<Result<Vec<_>, _>>()?;
    ensure_unique("component", record.components.iter().map(|c| c.type_name.as_str()))?;
    ensure_unique("global", record.globals.iter().map(|g| g.type_name.as_str()))?;
    ensure_unique("system", record.systems.iter().map(String::as_str))?;
    for (component, _) in &components {
        if let Some(index) = component.states.keys().find(|i| **i >= record.entity_count) {
            return Err(anyhow::anyhow!(
                "component '{}' has state for entity index {index}, but the record only has {} entities",
                component.type_name,
                record.entity_count
            ));
        }
    }

    let entities: Vec<EntityId> = (0..record.entity_count)
        .map(|_| scene.create_entity())
        .collect();

    for (component, entry) in components {
        (entry.install)(scene)
            .with_context(|| format!("failed to register component '{}'", component.type_name))?;
        let manager = scene.component_by_key_mut(entry.key).ok_or_else(|| {
            anyhow::anyhow!("component '{}' vanished during load", component.type_name)
        })?;
        for (index, state) in &component.states {
            manager
                .load_entity_state(entities[*index as usize], state)
                .with_context(|| {
                    format!(
                        "failed to load state of component '{}' for entity index {index}",
                        component.type_name
                    )
                })?;
        }
        debug!(
            component = %component.type_name,
            entities = component.states.len(),
            "component loaded"
        );
    }

    for (global, entry) in globals {
        (entry.install)(scene)
            .with_context(|| format!("failed to register global '{}'", global.type_name))?;
        scene
            .global_by_key_mut(entry.key)
            .ok_or_else(|| anyhow::anyhow!("global '{}' vanished during load", global.type_name))?
            .deserialize_state(&global.state)
            .with_context(|| format!("failed to load state of global '{}'", global.type_name))?;
    }

    for (name, entry) in systems {
        (entry.install)(scene).with_context(|| format!("failed to add system '{name}'"))?;
    }

    info!(
        entities = entities.len(),
        components = record.components.len(),
        globals = record.globals.len(),
        systems = record.systems.len(),
        "scene record loaded"
    );
    Ok(entities)
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Capture `scene` as a record, naming types through `catalog`.
///
/// # Errors
///
/// Fails if the live entity ids are not exactly `0..n` (destroyed ids would
/// otherwise be renumbered), if a registered type has no catalog name, or if
/// a manager cannot export its state.
pub fn capture_scene(catalog: &TypeCatalog, scene: &Scene) -> Result<SceneRecord, anyhow::Error> {
    if let Some((index, entity)) = scene
        .entities()
        .enumerate()
        .find(|(index, entity)| entity.to_raw() as usize != *index)
    {
        return Err(anyhow::anyhow!(
            "cannot capture scene with non-contiguous entity ids: expected id {index}, found {entity}"
        ));
    }
    let entity_count = u32::try_from(scene.entity_count()).context("entity count exceeds u32")?;

    let mut components = Vec::new();
    for key in scene.component_keys() {
        let type_name = name_of(&catalog.components, "component", key)?;
        let Some(manager) = scene.component_by_key(key) else {
            continue;
        };
        let mut states = BTreeMap::new();
        for entity in manager.present_entities() {
            if !scene.is_alive(entity) {
                continue;
            }
            let state = manager.save_entity_state(entity).with_context(|| {
                format!("failed to save state of component '{type_name}' for entity {entity}")
            })?;
            states.insert(entity.to_raw(), state);
        }
        components.push(ComponentRecord { type_name, states });
    }
    components.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    let mut globals = Vec::new();
    for key in scene.global_keys() {
        let type_name = name_of(&catalog.globals, "global", key)?;
        let Some(global) = scene.global_by_key(key) else {
            continue;
        };
        let state = global
            .serialize_state()
            .with_context(|| format!("failed to save state of global '{type_name}'"))?;
        globals.push(GlobalRecord { type_name, state });
    }
    globals.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    let mut systems = scene
        .system_keys()
        .into_iter()
        .map(|key| name_of(&catalog.systems, "system", key))
        .collect::<Result<Vec<_>, _>>()?;
    systems.sort();

    Ok(SceneRecord::new(entity_count, components, globals, systems))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
