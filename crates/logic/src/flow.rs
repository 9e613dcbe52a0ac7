//! Flows: long-running, resumable routines driven by the engine.

use crate::{Branch, FlowContext, RootBranch};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tickwork_core::{Kind, TypeKey};
use tickwork_scope::{Instance, Registration, Scope};

/// A stateful routine run to completion across ticks.
///
/// `run` is polled once per tick. Every await on a [`FlowContext`]
/// primitive that is not yet ready hands control back to the engine.
#[async_trait]
pub trait Flow: Send + Sync {
    /// Body of the routine.
    async fn run(&self, ctx: &FlowContext) -> anyhow::Result<()>;

    /// Called once when an unfinished execution is stopped.
    fn on_cancel(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Why a suspension primitive gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// The context was cancelled while waiting
    #[error("Flow cancelled")]
    Cancelled,

    /// The condition did not hold within the timeout
    #[error("Condition not met within {0:?}")]
    Timeout(Duration),
}

/// Declares logic capabilities on a [`Registration`].
pub trait LogicRegistration<T> {
    /// Make `T` resolvable as `dyn Branch`.
    fn branch(self) -> Self
    where
        T: Branch + 'static;

    /// Make `T` resolvable as `dyn RootBranch` and `dyn Branch`.
    fn root_branch(self) -> Self
    where
        T: RootBranch + 'static;

    /// Make `T` resolvable as `dyn Flow`.
    fn flow(self) -> Self
    where
        T: Flow + 'static;
}

impl<T: Any + Send + Sync> LogicRegistration<T> for Registration<T> {
    fn branch(self) -> Self
    where
        T: Branch + 'static,
    {
        self.implements::<dyn Branch, _>(|b: Arc<T>| -> Arc<dyn Branch> { b })
    }

    fn root_branch(self) -> Self
    where
        T: RootBranch + 'static,
    {
        self.implements::<dyn RootBranch, _>(|b: Arc<T>| -> Arc<dyn RootBranch> { b })
            .implements_via::<dyn Branch, _>(1, |b: Arc<T>| -> Arc<dyn Branch> { b })
    }

    fn flow(self) -> Self
    where
        T: Flow + 'static,
    {
        self.implements::<dyn Flow, _>(|f: Arc<T>| -> Arc<dyn Flow> { f })
    }
}

/// Obtain `key` from the scope: a fresh instance for prototypes, the
/// cached one for singletons.
pub(crate) fn acquire(scope: &Scope, key: TypeKey) -> tickwork_scope::Result<Instance> {
    match scope.kind_of(key) {
        Some(Kind::Prototype) => scope.new_key(key),
        _ => scope.resolve_key(key),
    }
}
