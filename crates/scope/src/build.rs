//! Build phase: registration and validation.
//!
//! Every check happens here, once, so resolution never meets an
//! unsatisfiable constructor, a cycle or an ambiguous factory.

use crate::distance::distance;
use crate::error::{Result, ScopeError};
use crate::registration::{Descriptor, Param, Registration};
use crate::scope::{Def, FactoryBinding, Inner};
use crate::{Factory, Scope};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::sync::{Arc, OnceLock};
use tickwork_core::{Kind, TypeKey};
use tracing::{debug, info};

/// Collects registrations and builds a validated [`Scope`].
#[derive(Default)]
pub struct ScopeBuilder {
    descriptors: Vec<Descriptor>,
}

impl ScopeBuilder {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration. Order is kept for diagnostics only.
    pub fn register<T: Any + Send + Sync>(mut self, registration: Registration<T>) -> Self {
        self.descriptors.push(registration.into_descriptor());
        self
    }

    /// Add an already built singleton, viewable as its concrete type only.
    pub fn instance<T: Any + Send + Sync>(self, value: T) -> Self {
        self.register(Registration::instance(value))
    }

    /// Add a registration through a mutable reference.
    pub fn add<T: Any + Send + Sync>(&mut self, registration: Registration<T>) -> &mut Self {
        self.descriptors.push(registration.into_descriptor());
        self
    }

    /// Validate the manifest and build the scope.
    pub fn build(self) -> Result<Scope> {
        let mut inner = register_all(self.descriptors)?;
        select_all_constructors(&mut inner)?;
        validate_prototype_usage(&inner)?;
        verify_no_cycles(&inner)?;

        let scope = Scope {
            inner: Arc::new(inner),
        };

        let factories = instantiate_singleton_factories(&scope)?;
        assign_factories_to_types(&scope, &factories)?;
        let _ = scope.inner.factories.set(factories);

        info!(
            "Scope built: {} singletons, {} prototypes, {} factories",
            scope.inner.singletons.len(),
            scope.inner.prototypes.len(),
            scope.factories().len()
        );

        Ok(scope)
    }
}

fn register_all(descriptors: Vec<Descriptor>) -> Result<Inner> {
    let mut singletons = BTreeMap::new();
    let mut prototypes = BTreeMap::new();

    for descriptor in descriptors {
        let key = descriptor.key;
        if !descriptor.enabled {
            debug!("Skipping disabled {}", key);
            continue;
        }
        if singletons.contains_key(&key) || prototypes.contains_key(&key) {
            return Err(ScopeError::DuplicateRegistration(key.to_string()));
        }

        debug!("Registering {} {} (priority {})", descriptor.kind, key, descriptor.priority);

        let mut def = Def::new(descriptor, None);
        match def.descriptor.kind {
            Kind::Singleton => {
                if let Some(prebuilt) = def.descriptor.prebuilt.clone() {
                    let instance = def.descriptor.instantiate(prebuilt)?;
                    *def.instance.get_mut() = Some(instance);
                }
                singletons.insert(key, def);
            }
            Kind::Prototype => {
                prototypes.insert(key, def);
            }
        }
    }

    Ok(Inner {
        singletons,
        prototypes,
        factories: OnceLock::new(),
    })
}

fn select_all_constructors(inner: &mut Inner) -> Result<()> {
    let mut selected = Vec::new();

    for def in inner.singletons.values().chain(inner.prototypes.values()) {
        if def.descriptor.prebuilt.is_some() {
            continue;
        }
        match inner.select_constructor(&def.descriptor) {
            Some(index) => selected.push((def.descriptor.key, index)),
            None => return Err(unsatisfiable(inner, &def.descriptor)),
        }
    }

    for (key, index) in selected {
        if let Some(def) = inner.singletons.get_mut(&key) {
            def.constructor = Some(index);
        } else if let Some(def) = inner.prototypes.get_mut(&key) {
            def.constructor = Some(index);
        }
    }

    Ok(())
}

/// Describe every constructor considered and mark each parameter.
fn unsatisfiable(inner: &Inner, descriptor: &Descriptor) -> ScopeError {
    let mut report = String::new();
    let _ = writeln!(report, "No satisfiable constructor for {}", descriptor.key.name());
    let _ = writeln!(report, "Found {} constructor(s):", descriptor.constructors.len());

    for index in Inner::constructor_order(descriptor) {
        let constructor = &descriptor.constructors[index];
        let _ = writeln!(report, "  {}", constructor.signature());

        for param in &constructor.params {
            let Param::One(key) = param else {
                let _ = writeln!(report, "    [OK] {param}");
                continue;
            };

            let _ = match inner.singleton_matches(*key) {
                1 => writeln!(report, "    [OK] {param}"),
                0 if !inner.prototype_matches(*key).is_empty() => writeln!(
                    report,
                    "    [PROTOTYPE] {param} - cannot depend on prototype, use Scope::new_instance()"
                ),
                0 => writeln!(report, "    [MISSING] {param}"),
                n => writeln!(report, "    [AMBIGUOUS] {param} - {n} singletons match"),
            };
        }
    }

    ScopeError::UnsatisfiableConstructor {
        ty: descriptor.key.to_string(),
        report: report.trim_end().to_string(),
    }
}

// === Prototype validation ===

fn validate_prototype_usage(inner: &Inner) -> Result<()> {
    for def in inner.singletons.values().chain(inner.prototypes.values()) {
        let Some(index) = def.constructor else {
            continue;
        };

        for param in &def.descriptor.constructors[index].params {
            let Param::All(element) = param else {
                continue;
            };

            if let Some(prototype) = inner.prototype_matches(*element).first() {
                return Err(ScopeError::PrototypeInCollection {
                    prototype: prototype.to_string(),
                    collection: param.to_string(),
                    owner: def.descriptor.key.to_string(),
                });
            }
        }
    }

    Ok(())
}

// === Cycle detection ===

fn dependency_graph(inner: &Inner) -> BTreeMap<TypeKey, Vec<TypeKey>> {
    let mut graph = BTreeMap::new();

    for def in inner.singletons.values().chain(inner.prototypes.values()) {
        let mut deps = Vec::new();
        if let Some(index) = def.constructor {
            for element in def.descriptor.constructors[index]
                .params
                .iter()
                .filter_map(Param::element)
            {
                deps.extend(
                    inner
                        .singletons
                        .values()
                        .filter(|d| d.descriptor.is_assignable_to(element))
                        .map(|d| d.descriptor.key),
                );
            }
        }
        graph.insert(def.descriptor.key, deps);
    }

    graph
}

fn verify_no_cycles(inner: &Inner) -> Result<()> {
    let graph = dependency_graph(inner);
    let mut visited = HashSet::new();

    for &start in graph.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = find_cycle(start, &graph, &mut path, &mut visited) {
            return Err(ScopeError::CircularDependency {
                path: cycle.iter().map(|k| k.to_string()).collect(),
            });
        }
    }

    Ok(())
}

/// Depth-first search. Returns the cycle only, starting and ending at the
/// repeated node.
fn find_cycle(
    node: TypeKey,
    graph: &BTreeMap<TypeKey, Vec<TypeKey>>,
    path: &mut Vec<TypeKey>,
    visited: &mut HashSet<TypeKey>,
) -> Option<Vec<TypeKey>> {
    if let Some(pos) = path.iter().position(|k| *k == node) {
        let mut cycle = path[pos..].to_vec();
        cycle.push(node);
        return Some(cycle);
    }
    if visited.contains(&node) {
        return None;
    }

    path.push(node);
    for &dep in graph.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
        if let Some(cycle) = find_cycle(dep, graph, path, visited) {
            return Some(cycle);
        }
    }
    path.pop();
    visited.insert(node);

    None
}

// === Factories ===

fn instantiate_singleton_factories(scope: &Scope) -> Result<Vec<FactoryBinding>> {
    let mut bindings = Vec::new();

    for key in scope.singleton_types_of(TypeKey::of::<dyn Factory>()) {
        let factory = scope
            .ensure_singleton(key)
            .and_then(|instance| instance.view::<dyn Factory>())
            .map_err(|e| ScopeError::FactoryConstruction {
                ty: key.to_string(),
                source: Box::new(e),
            })?;

        debug!("Instantiated factory {} for {}", key, factory.target());
        bindings.push(FactoryBinding { key, factory });
    }

    Ok(bindings)
}

fn assign_factories_to_types(scope: &Scope, factories: &[FactoryBinding]) -> Result<()> {
    for def in scope.inner.singletons.values() {
        let binding = if def.instance.lock().is_some() {
            None
        } else {
            find_factory_for(&def.descriptor, factories)?
        };
        let _ = def.factory.set(binding);
    }

    for def in scope.inner.prototypes.values() {
        let _ = def.factory.set(find_factory_for(&def.descriptor, factories)?);
    }

    Ok(())
}

fn find_factory_for(
    descriptor: &Descriptor,
    factories: &[FactoryBinding],
) -> Result<Option<FactoryBinding>> {
    let candidates: Vec<(u32, &FactoryBinding)> = factories
        .iter()
        .filter_map(|b| distance(descriptor, b.factory.target()).map(|d| (d, b)))
        .collect();

    let Some(min) = candidates.iter().map(|(d, _)| *d).min() else {
        return Ok(None);
    };

    let best: Vec<&FactoryBinding> = candidates
        .into_iter()
        .filter(|(d, _)| *d == min)
        .map(|(_, b)| b)
        .collect();

    if best.len() > 1 {
        return Err(ScopeError::AmbiguousFactory {
            ty: descriptor.key.to_string(),
            factories: best.iter().map(|b| b.key.to_string()).collect(),
        });
    }

    debug!("Assigned factory {} to {} (distance {})", best[0].key, descriptor.key, min);
    Ok(Some(best[0].clone()))
}
