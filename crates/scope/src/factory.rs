//! Factory override for component construction.

use crate::registration::Erased;
use crate::Scope;
use tickwork_core::TypeKey;

/// Creates instances for every registration assignable to [`Factory::target`].
///
/// A factory is itself registered as a singleton that implements
/// `dyn Factory`. The scope instantiates it during build, then hands it
/// every singleton and prototype it is the closest match for.
pub trait Factory: Send + Sync {
    /// Types assignable to this key are served by the factory.
    fn target(&self) -> TypeKey;

    /// Build an instance of `concrete`. The returned value must be of that
    /// concrete type.
    fn create(&self, scope: &Scope, concrete: TypeKey) -> anyhow::Result<Erased>;
}
