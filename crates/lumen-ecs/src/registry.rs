//! Type-keyed registries.
//!
//! A [`TypeRegistry`] maps a [`TypeKey`] to exactly one stored value. The
//! scene keeps three of them (component managers, global components and
//! systems); because the key is derived from the concrete Rust type, each
//! scene holds at most one live instance per type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

// ---------------------------------------------------------------------------
// TypeKey
// ---------------------------------------------------------------------------

/// Identity of a registered type: its `TypeId` plus its name for diagnostics.
///
/// Equality and hashing only consider the `TypeId`.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// The key for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The Rust `TypeId`.
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Full type path, e.g. `my_game::Position`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, generics included.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// AsAny
// ---------------------------------------------------------------------------

/// Downcasting hooks for registry trait objects.
///
/// Implemented for every `'static` type; the registry traits use it as a
/// supertrait so stored `Box<dyn Trait>` values can be recovered as their
/// concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

// ---------------------------------------------------------------------------
// RegistryCategory
// ---------------------------------------------------------------------------

/// Which of the scene's three registries an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryCategory {
    Component,
    Global,
    System,
}

impl fmt::Display for RegistryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegistryCategory::Component => "component",
            RegistryCategory::Global => "global component",
            RegistryCategory::System => "system",
        })
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// One value per [`TypeKey`], with overwrite-on-add semantics.
pub struct TypeRegistry<V> {
    category: RegistryCategory,
    entries: HashMap<TypeKey, V>,
}

impl<V> TypeRegistry<V> {
    /// Create an empty registry for `category`.
    pub fn new(category: RegistryCategory) -> Self {
        Self {
            category,
            entries: HashMap::new(),
        }
    }

    pub fn category(&self) -> RegistryCategory {
        self.category
    }

    /// Store `value` under `key`, returning the value it replaced.
    pub fn add(&mut self, key: TypeKey, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Remove and return the value stored under `key`.
    pub fn remove(&mut self, key: TypeKey) -> Option<V> {
        self.entries.remove(&key)
    }

    pub fn has(&self, key: TypeKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn get(&self, key: TypeKey) -> Option<&V> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: TypeKey) -> Option<&mut V> {
        self.entries.get_mut(&key)
    }

    /// All registered keys, in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.entries.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeKey, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered type names, sorted. Used in diagnostics.
    pub fn registered_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().map(|k| k.name()).collect();
        names.sort_unstable();
        names
    }
}

impl<V> fmt::Debug for TypeRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("category", &self.category)
            .field("types", &self.registered_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
