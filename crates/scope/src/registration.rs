//! Registration manifest entries.
//!
//! A [`Registration`] replaces runtime reflection: it names the concrete
//! type, its kind and priority, the views it can be resolved as (the
//! capability table) and the constructors the scope may call.

use crate::error::{Result, ScopeError};
use crate::Scope;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tickwork_core::{Kind, TypeKey};

/// A type-erased component instance as produced by constructors and factories.
pub type Erased = Arc<dyn Any + Send + Sync>;

type Upcast = Arc<dyn Fn(&Erased) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;
type BuildFn = Arc<dyn Fn(&mut Args) -> anyhow::Result<Erased> + Send + Sync>;

/// How a view relates to the concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The concrete type itself
    Concrete,
    /// A base type, `n` hops up the chain (nearest is 1)
    Base(u32),
    /// A trait object, reached through `n` super-trait links (direct is 0)
    Interface(u32),
}

/// A type the component can be resolved as.
#[derive(Clone)]
pub(crate) struct View {
    pub key: TypeKey,
    pub relation: Relation,
    upcast: Upcast,
}

/// A constructor parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Exactly one singleton assignable to the key
    One(TypeKey),
    /// Every singleton assignable to the key, in priority order
    All(TypeKey),
    /// The scope itself
    Scope,
}

impl Param {
    /// Single dependency on `T`.
    pub fn one<T: ?Sized + 'static>() -> Self {
        Param::One(TypeKey::of::<T>())
    }

    /// Collection dependency on every `T`.
    pub fn all<T: ?Sized + 'static>() -> Self {
        Param::All(TypeKey::of::<T>())
    }

    /// Key this parameter depends on, if any.
    pub fn element(&self) -> Option<TypeKey> {
        match self {
            Param::One(key) | Param::All(key) => Some(*key),
            Param::Scope => None,
        }
    }
}

impl std::fmt::Display for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Param::One(key) => write!(f, "{key}"),
            Param::All(key) => write!(f, "Vec<{key}>"),
            Param::Scope => f.write_str("Scope"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Constructor {
    pub params: Vec<Param>,
    build: BuildFn,
}

impl Constructor {
    pub fn invoke(&self, args: &mut Args) -> anyhow::Result<Erased> {
        (self.build)(args)
    }

    pub fn signature(&self) -> String {
        let params: Vec<_> = self.params.iter().map(|p| p.to_string()).collect();
        format!("new({})", params.join(", "))
    }
}

/// Type-erased registration as stored by the scope.
#[derive(Clone)]
pub(crate) struct Descriptor {
    pub key: TypeKey,
    pub kind: Kind,
    pub priority: i32,
    pub enabled: bool,
    pub display_name: Option<String>,
    pub views: Vec<View>,
    pub constructors: Vec<Constructor>,
    pub prebuilt: Option<Erased>,
}

impl Descriptor {
    pub fn view(&self, key: TypeKey) -> Option<&View> {
        self.views.iter().find(|v| v.key == key)
    }

    pub fn is_assignable_to(&self, key: TypeKey) -> bool {
        self.view(key).is_some()
    }

    /// Wrap a freshly built value with every view of the capability table.
    pub fn instantiate(&self, value: Erased) -> Result<Instance> {
        let mut views = HashMap::with_capacity(self.views.len());
        for view in &self.views {
            let cast = (view.upcast)(&value).ok_or_else(|| ScopeError::MissingView {
                ty: self.key.to_string(),
                view: view.key.to_string(),
            })?;
            views.insert(view.key, cast);
        }

        Ok(Instance {
            key: self.key,
            views: Arc::new(views),
        })
    }
}

/// A registration entry for concrete type `T`.
///
/// ```ignore
/// let reg = Registration::<Walker>::singleton()
///     .priority(10)
///     .implements::<dyn Mover, _>(|w: Arc<Walker>| -> Arc<dyn Mover> { w })
///     .constructor(vec![Param::one::<Map>()], |args| Ok(Walker::new(args.one::<Map>()?)));
/// ```
pub struct Registration<T> {
    descriptor: Descriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Registration<T> {
    fn with_kind(kind: Kind) -> Self {
        let concrete: Upcast = Arc::new(|value: &Erased| {
            let typed = value.clone().downcast::<T>().ok()?;
            Some(Box::new(typed) as Box<dyn Any + Send + Sync>)
        });

        Self {
            descriptor: Descriptor {
                key: TypeKey::of::<T>(),
                kind,
                priority: 0,
                enabled: true,
                display_name: None,
                views: vec![View {
                    key: TypeKey::of::<T>(),
                    relation: Relation::Concrete,
                    upcast: concrete,
                }],
                constructors: Vec::new(),
                prebuilt: None,
            },
            _marker: PhantomData,
        }
    }

    /// Register `T` as a singleton.
    pub fn singleton() -> Self {
        Self::with_kind(Kind::Singleton)
    }

    /// Register `T` as a prototype.
    pub fn prototype() -> Self {
        Self::with_kind(Kind::Prototype)
    }

    /// Register an already built value as a singleton.
    pub fn instance(value: T) -> Self {
        let mut reg = Self::with_kind(Kind::Singleton);
        reg.descriptor.prebuilt = Some(Arc::new(value));
        reg
    }

    /// Set priority. Lower values are preferred.
    pub fn priority(mut self, priority: i32) -> Self {
        self.descriptor.priority = priority;
        self
    }

    /// Enable or disable. Disabled registrations are dropped before build.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.descriptor.enabled = enabled;
        self
    }

    /// Set a human readable name used in diagnostics.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.display_name = Some(name.into());
        self
    }

    /// Declare a base type. Call in order, nearest base first.
    pub fn base<B, F>(self, cast: F) -> Self
    where
        B: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<B> + Send + Sync + 'static,
    {
        let hops = 1 + self
            .descriptor
            .views
            .iter()
            .filter(|v| matches!(v.relation, Relation::Base(_)))
            .count() as u32;
        self.view(Relation::Base(hops), cast)
    }

    /// Declare a directly implemented trait.
    pub fn implements<I, F>(self, cast: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        self.view(Relation::Interface(0), cast)
    }

    /// Declare a trait reached through `depth` super-trait links.
    pub fn implements_via<I, F>(self, depth: u32, cast: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        self.view(Relation::Interface(depth), cast)
    }

    fn view<I, F>(mut self, relation: Relation, cast: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        let key = TypeKey::of::<I>();
        let upcast: Upcast = Arc::new(move |value: &Erased| {
            let typed = value.clone().downcast::<T>().ok()?;
            Some(Box::new(cast(typed)) as Box<dyn Any + Send + Sync>)
        });

        self.descriptor.views.retain(|v| v.key != key);
        self.descriptor.views.push(View {
            key,
            relation,
            upcast,
        });
        self
    }

    /// Add a constructor taking `params`.
    pub fn constructor<F>(mut self, params: Vec<Param>, build: F) -> Self
    where
        F: Fn(&mut Args) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let build: BuildFn = Arc::new(move |args: &mut Args| Ok(Arc::new(build(args)?) as Erased));
        self.descriptor.constructors.push(Constructor { params, build });
        self
    }

    /// Add a parameterless constructor using [`Default`].
    pub fn with_default(self) -> Self
    where
        T: Default,
    {
        self.constructor(Vec::new(), |_| Ok(T::default()))
    }

    /// Key of `T`.
    pub fn key(&self) -> TypeKey {
        self.descriptor.key
    }

    /// Kind this registration was declared with.
    pub fn kind(&self) -> Kind {
        self.descriptor.kind
    }

    pub(crate) fn constructors(&self) -> impl Iterator<Item = &[Param]> {
        self.descriptor.constructors.iter().map(|c| c.params.as_slice())
    }

    pub(crate) fn into_descriptor(self) -> Descriptor {
        self.descriptor
    }
}

impl<T> std::fmt::Debug for Registration<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.descriptor.key)
            .field("kind", &self.descriptor.kind)
            .field("priority", &self.descriptor.priority)
            .field("enabled", &self.descriptor.enabled)
            .finish()
    }
}

/// A resolved component: the concrete value and every view it declared.
#[derive(Clone)]
pub struct Instance {
    key: TypeKey,
    views: Arc<HashMap<TypeKey, Box<dyn Any + Send + Sync>>>,
}

impl Instance {
    /// Concrete type of this instance.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// View this instance as `T`, if it declared that view.
    pub fn get<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.views
            .get(&TypeKey::of::<T>())?
            .downcast_ref::<Arc<T>>()
            .cloned()
    }

    /// View this instance as `T` or fail with [`ScopeError::MissingView`].
    pub fn view<T: ?Sized + 'static>(&self) -> Result<Arc<T>> {
        self.get::<T>().ok_or_else(|| ScopeError::MissingView {
            ty: self.key.to_string(),
            view: TypeKey::of::<T>().to_string(),
        })
    }

    /// Whether both handles point at the same underlying instance.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.views, &other.views)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").field("key", &self.key).finish()
    }
}

pub(crate) enum Arg {
    One(Instance),
    All(Vec<Instance>),
    Scope(Scope),
}

/// Arguments handed to a constructor, read in declaration order.
pub struct Args {
    owner: TypeKey,
    position: usize,
    values: std::vec::IntoIter<Arg>,
}

impl Args {
    pub(crate) fn new(owner: TypeKey, values: Vec<Arg>) -> Self {
        Self {
            owner,
            position: 0,
            values: values.into_iter(),
        }
    }

    fn next(&mut self, expected: impl FnOnce() -> String) -> Result<(usize, Arg)> {
        let position = self.position;
        self.position += 1;
        self.values
            .next()
            .map(|arg| (position, arg))
            .ok_or_else(|| self.mismatch(position, expected()))
    }

    fn mismatch(&self, position: usize, expected: String) -> ScopeError {
        ScopeError::ArgumentMismatch {
            owner: self.owner.to_string(),
            position,
            expected,
        }
    }

    /// Next argument, a single dependency viewed as `T`.
    pub fn one<T: ?Sized + 'static>(&mut self) -> Result<Arc<T>> {
        let expected = || TypeKey::of::<T>().to_string();
        match self.next(expected)? {
            (_, Arg::One(instance)) => instance.view::<T>(),
            (position, _) => Err(self.mismatch(position, expected())),
        }
    }

    /// Next argument, a collection viewed as `T`.
    pub fn all<T: ?Sized + 'static>(&mut self) -> Result<Vec<Arc<T>>> {
        let expected = || format!("Vec<{}>", TypeKey::of::<T>());
        match self.next(expected)? {
            (_, Arg::All(instances)) => instances.iter().map(|i| i.view::<T>()).collect(),
            (position, _) => Err(self.mismatch(position, expected())),
        }
    }

    /// Next argument, the scope handle.
    pub fn scope(&mut self) -> Result<Scope> {
        let expected = || "Scope".to_string();
        match self.next(expected)? {
            (_, Arg::Scope(scope)) => Ok(scope),
            (position, _) => Err(self.mismatch(position, expected())),
        }
    }
}
