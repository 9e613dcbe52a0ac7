//! The resolution container.
//!
//! Singletons are created lazily and cached; prototypes are created fresh
//! on every `new_*` call. The whole graph is validated up front by
//! [`ScopeBuilder::build`](crate::ScopeBuilder::build).
//!
//! Designed for use from a single thread. The internal locks exist so the
//! handle is `Send + Sync`; they are never held while user constructors or
//! factories run.

use crate::error::{Result, ScopeError};
use crate::registration::{Arg, Args, Descriptor, Erased, Instance, Param, Registration};
use crate::Factory;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tickwork_core::{Kind, TypeKey};
use tracing::debug;

pub(crate) struct Def {
    pub descriptor: Descriptor,
    /// Index into `descriptor.constructors`, `None` for prebuilt instances
    pub constructor: Option<usize>,
    pub factory: OnceLock<Option<FactoryBinding>>,
    pub instance: Mutex<Option<Instance>>,
}

impl Def {
    pub fn new(descriptor: Descriptor, constructor: Option<usize>) -> Self {
        Self {
            descriptor,
            constructor,
            factory: OnceLock::new(),
            instance: Mutex::new(None),
        }
    }

    fn factory(&self) -> Option<&FactoryBinding> {
        self.factory.get().and_then(|f| f.as_ref())
    }
}

#[derive(Clone)]
pub(crate) struct FactoryBinding {
    pub key: TypeKey,
    pub factory: Arc<dyn Factory>,
}

pub(crate) struct Inner {
    pub singletons: BTreeMap<TypeKey, Def>,
    pub prototypes: BTreeMap<TypeKey, Def>,
    pub factories: OnceLock<Vec<FactoryBinding>>,
}

impl Inner {
    /// Number of singletons assignable to `key`.
    pub fn singleton_matches(&self, key: TypeKey) -> usize {
        self.singletons
            .values()
            .filter(|d| d.descriptor.is_assignable_to(key))
            .count()
    }

    /// Prototypes assignable to `key`.
    pub fn prototype_matches(&self, key: TypeKey) -> Vec<TypeKey> {
        self.prototypes
            .values()
            .filter(|d| d.descriptor.is_assignable_to(key))
            .map(|d| d.descriptor.key)
            .collect()
    }

    pub fn satisfies(&self, param: &Param) -> bool {
        match param {
            Param::All(_) | Param::Scope => true,
            Param::One(key) => self.singleton_matches(*key) == 1,
        }
    }

    /// Greedy most-parameters-first, declaration order breaking ties.
    pub fn constructor_order(descriptor: &Descriptor) -> Vec<usize> {
        let mut order: Vec<usize> = (0..descriptor.constructors.len()).collect();
        order.sort_by(|&a, &b| {
            descriptor.constructors[b]
                .params
                .len()
                .cmp(&descriptor.constructors[a].params.len())
        });
        order
    }

    pub fn select_constructor(&self, descriptor: &Descriptor) -> Option<usize> {
        Self::constructor_order(descriptor).into_iter().find(|&i| {
            descriptor.constructors[i]
                .params
                .iter()
                .all(|p| self.satisfies(p))
        })
    }
}

/// Handle to the resolution container. Cheap to clone.
#[derive(Clone)]
pub struct Scope {
    pub(crate) inner: Arc<Inner>,
}

impl Scope {
    /// Start a new manifest.
    pub fn builder() -> crate::ScopeBuilder {
        crate::ScopeBuilder::new()
    }

    // === Singleton API ===

    /// Resolve the unique singleton assignable to `key`.
    pub fn resolve_key(&self, key: TypeKey) -> Result<Instance> {
        if self.inner.prototypes.contains_key(&key) {
            return Err(ScopeError::PrototypeViaResolve(key.to_string()));
        }

        let target = self.single_singleton(key)?;
        self.ensure_singleton(target)
    }

    /// Resolve the unique singleton assignable to `T`, viewed as `T`.
    pub fn resolve<T: ?Sized + 'static>(&self) -> Result<Arc<T>> {
        self.resolve_key(TypeKey::of::<T>())?.view::<T>()
    }

    /// Every singleton assignable to `key`, by priority then name.
    pub fn resolve_all_keys(&self, key: TypeKey) -> Result<Vec<Instance>> {
        self.singleton_types_of(key)
            .into_iter()
            .map(|k| self.ensure_singleton(k))
            .collect()
    }

    /// Every singleton assignable to `T`, viewed as `T`.
    pub fn resolve_all<T: ?Sized + 'static>(&self) -> Result<Vec<Arc<T>>> {
        self.resolve_all_keys(TypeKey::of::<T>())?
            .iter()
            .map(|i| i.view::<T>())
            .collect()
    }

    /// Whether at least one singleton is assignable to `key`.
    pub fn can_resolve(&self, key: TypeKey) -> bool {
        self.inner
            .singletons
            .values()
            .any(|d| d.descriptor.is_assignable_to(key))
    }

    // === Prototype API ===

    /// Create a new instance of the prototype registered as `key`.
    pub fn new_key(&self, key: TypeKey) -> Result<Instance> {
        if self.inner.singletons.contains_key(&key) {
            return Err(ScopeError::SingletonViaNew(key.to_string()));
        }

        let def = self
            .inner
            .prototypes
            .get(&key)
            .ok_or_else(|| ScopeError::NoPrototype(key.to_string()))?;
        self.create(def)
    }

    /// Create a new instance of the prototype `T`.
    pub fn new_instance<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.new_key(TypeKey::of::<T>())?.view::<T>()
    }

    /// Build a one-off instance of a type that is not registered.
    ///
    /// Registered prototypes go through [`Scope::new_key`], registered
    /// singletons are rejected. Otherwise the first satisfiable constructor
    /// of `registration` is used, with the scope itself handed to
    /// [`Param::Scope`] parameters.
    pub fn construct<T: Any + Send + Sync>(&self, registration: Registration<T>) -> Result<Arc<T>> {
        let key = registration.key();
        if self.inner.singletons.contains_key(&key) {
            return Err(ScopeError::SingletonViaNew(key.to_string()));
        }
        if self.inner.prototypes.contains_key(&key) {
            return self.new_key(key)?.view::<T>();
        }

        let descriptor = registration.into_descriptor();
        let index = self
            .inner
            .select_constructor(&descriptor)
            .ok_or_else(|| ScopeError::NoConstructor(key.to_string()))?;

        let def = Def::new(descriptor, Some(index));
        self.create(&def)?.view::<T>()
    }

    /// Whether `key` can be created through the prototype path.
    pub fn can_new(&self, key: TypeKey) -> bool {
        self.inner.prototypes.contains_key(&key)
    }

    /// Whether `registration` could be built by [`Scope::construct`].
    pub fn can_construct<T: Any + Send + Sync>(&self, registration: &Registration<T>) -> bool {
        let key = registration.key();
        if self.inner.singletons.contains_key(&key) {
            return false;
        }
        if self.inner.prototypes.contains_key(&key) {
            return true;
        }
        registration
            .constructors()
            .any(|params| params.iter().all(|p| self.inner.satisfies(p)))
    }

    // === Type queries ===

    /// All registered singleton types, by priority then name.
    pub fn singleton_types(&self) -> Vec<TypeKey> {
        order_by_priority(self.inner.singletons.values())
    }

    /// Singleton types assignable to `key`, by priority then name.
    pub fn singleton_types_of(&self, key: TypeKey) -> Vec<TypeKey> {
        order_by_priority(
            self.inner
                .singletons
                .values()
                .filter(|d| d.descriptor.is_assignable_to(key)),
        )
    }

    /// The single singleton type assignable to `key`.
    pub fn singleton_type_of(&self, key: TypeKey) -> Result<TypeKey> {
        self.single_singleton(key)
    }

    /// All registered prototype types, by priority then name.
    pub fn prototype_types(&self) -> Vec<TypeKey> {
        order_by_priority(self.inner.prototypes.values())
    }

    /// Prototype types assignable to `key`, by priority then name.
    pub fn prototype_types_of(&self, key: TypeKey) -> Vec<TypeKey> {
        order_by_priority(
            self.inner
                .prototypes
                .values()
                .filter(|d| d.descriptor.is_assignable_to(key)),
        )
    }

    /// The single prototype type assignable to `key`.
    pub fn prototype_type_of(&self, key: TypeKey) -> Result<TypeKey> {
        let matches = self.prototype_types_of(key);
        match matches.as_slice() {
            [] => Err(ScopeError::NoPrototype(key.to_string())),
            [single] => Ok(*single),
            _ => Err(ScopeError::AmbiguousPrototype {
                ty: key.to_string(),
                matches: matches.iter().map(|k| k.to_string()).collect(),
            }),
        }
    }

    /// Kind `key` is registered as, if registered.
    pub fn kind_of(&self, key: TypeKey) -> Option<Kind> {
        self.def(key).map(|d| d.descriptor.kind)
    }

    /// Whether registered type `concrete` can be viewed as `target`.
    pub fn is_assignable(&self, concrete: TypeKey, target: TypeKey) -> bool {
        self.def(concrete)
            .is_some_and(|d| d.descriptor.is_assignable_to(target))
    }

    /// Display name of a registered type, falling back to its short name.
    pub fn display_name(&self, key: TypeKey) -> Option<String> {
        self.def(key).map(|d| {
            d.descriptor
                .display_name
                .clone()
                .unwrap_or_else(|| key.to_string())
        })
    }

    /// Factory serving `key`, if one was assigned during build.
    pub fn factory_of(&self, key: TypeKey) -> Option<TypeKey> {
        self.def(key).and_then(|d| d.factory()).map(|f| f.key)
    }

    /// Factories instantiated during build.
    pub fn factories(&self) -> Vec<TypeKey> {
        self.inner
            .factories
            .get()
            .map(|all| all.iter().map(|f| f.key).collect())
            .unwrap_or_default()
    }

    // === Internals ===

    fn def(&self, key: TypeKey) -> Option<&Def> {
        self.inner
            .singletons
            .get(&key)
            .or_else(|| self.inner.prototypes.get(&key))
    }

    fn single_singleton(&self, key: TypeKey) -> Result<TypeKey> {
        let matches = self.singleton_types_of(key);
        match matches.as_slice() {
            [] => Err(ScopeError::NotRegistered(key.to_string())),
            [single] => Ok(*single),
            _ => Err(ScopeError::Ambiguous {
                ty: key.to_string(),
                matches: matches.iter().map(|k| k.to_string()).collect(),
            }),
        }
    }

    pub(crate) fn ensure_singleton(&self, key: TypeKey) -> Result<Instance> {
        let def = self
            .inner
            .singletons
            .get(&key)
            .ok_or_else(|| ScopeError::NotRegistered(key.to_string()))?;

        if let Some(instance) = def.instance.lock().as_ref() {
            return Ok(instance.clone());
        }

        let created = self.create(def)?;
        debug!("Created singleton {}", key);

        let mut slot = def.instance.lock();
        Ok(slot.get_or_insert(created).clone())
    }

    fn create(&self, def: &Def) -> Result<Instance> {
        let descriptor = &def.descriptor;
        let key = descriptor.key;

        let value: Erased = if let Some(prebuilt) = &descriptor.prebuilt {
            prebuilt.clone()
        } else if let Some(binding) = def.factory() {
            debug!("Creating {} via factory {}", key, binding.key);
            binding
                .factory
                .create(self, key)
                .map_err(|source| ScopeError::Construction {
                    ty: key.to_string(),
                    source,
                })?
        } else {
            let index = def
                .constructor
                .ok_or_else(|| ScopeError::NoConstructor(key.to_string()))?;
            let constructor = &descriptor.constructors[index];
            let mut args = Args::new(key, self.resolve_params(&constructor.params)?);
            constructor
                .invoke(&mut args)
                .map_err(|source| ScopeError::Construction {
                    ty: key.to_string(),
                    source,
                })?
        };

        descriptor.instantiate(value)
    }

    fn resolve_params(&self, params: &[Param]) -> Result<Vec<Arg>> {
        params
            .iter()
            .map(|param| match param {
                Param::One(key) => self.resolve_key(*key).map(Arg::One),
                Param::All(key) => self.resolve_all_keys(*key).map(Arg::All),
                Param::Scope => Ok(Arg::Scope(self.clone())),
            })
            .collect()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("singletons", &self.inner.singletons.len())
            .field("prototypes", &self.inner.prototypes.len())
            .field("factories", &self.factories().len())
            .finish()
    }
}

/// Order by ascending priority, then case-insensitive name.
fn order_by_priority<'a>(defs: impl Iterator<Item = &'a Def>) -> Vec<TypeKey> {
    let mut defs: Vec<&Def> = defs.collect();
    defs.sort_by(|a, b| {
        a.descriptor
            .priority
            .cmp(&b.descriptor.priority)
            .then_with(|| {
                a.descriptor
                    .key
                    .name()
                    .to_lowercase()
                    .cmp(&b.descriptor.key.name().to_lowercase())
            })
    });
    defs.into_iter().map(|d| d.descriptor.key).collect()
}
