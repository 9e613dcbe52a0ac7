//! Branches: the stateless, synchronous nodes of the selection tree.

use crate::Flow;
use std::collections::{BTreeSet, VecDeque};
use tickwork_core::TypeKey;
use tickwork_scope::Scope;
use tracing::debug;

/// A selection node. Evaluated every tick, declares which nested branches
/// and flows should be active right now.
pub trait Branch: Send + Sync {
    /// Declare active children through `ctx`. An error discards everything
    /// this branch declared during the call.
    fn tick(&self, ctx: &mut BranchContext<'_>) -> anyhow::Result<()>;
}

/// Marks the single branch the engine starts every tree walk from.
pub trait RootBranch: Branch {}

/// Accumulates declarations during one tree walk.
pub struct BranchContext<'a> {
    scope: &'a Scope,
    flows: BTreeSet<TypeKey>,
    nested: VecDeque<TypeKey>,
}

/// Saved [`BranchContext`] state, restored by [`BranchContext::rollback`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    flows: BTreeSet<TypeKey>,
    nested: VecDeque<TypeKey>,
}

impl<'a> BranchContext<'a> {
    /// Create an empty context reading capabilities from `scope`.
    pub fn new(scope: &'a Scope) -> Self {
        Self {
            scope,
            flows: BTreeSet::new(),
            nested: VecDeque::new(),
        }
    }

    /// Declare `T` active for this tick.
    pub fn activate<T: ?Sized + 'static>(&mut self) {
        self.activate_key(TypeKey::of::<T>());
    }

    /// Declare a registered type active for this tick.
    ///
    /// Branches are queued for evaluation after the current branch returns,
    /// flows join the active set. Anything else is ignored.
    pub fn activate_key(&mut self, key: TypeKey) {
        if self.scope.is_assignable(key, TypeKey::of::<dyn Branch>()) {
            self.nested.push_back(key);
        } else if self.scope.is_assignable(key, TypeKey::of::<dyn Flow>()) {
            self.flows.insert(key);
        } else {
            debug!("Ignoring {}: neither a branch nor a flow", key);
        }
    }

    /// The scope this walk resolves from.
    pub fn scope(&self) -> &Scope {
        self.scope
    }

    /// Flow types declared so far.
    pub fn flows(&self) -> &BTreeSet<TypeKey> {
        &self.flows
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            flows: self.flows.clone(),
            nested: self.nested.clone(),
        }
    }

    /// Restore a previous snapshot, discarding later declarations.
    pub fn rollback(&mut self, snapshot: Snapshot) {
        self.flows = snapshot.flows;
        self.nested = snapshot.nested;
    }

    /// Drain every queued nested branch, in declaration order.
    pub fn take_nested(&mut self) -> Vec<TypeKey> {
        self.nested.drain(..).collect()
    }

    pub(crate) fn into_flows(self) -> BTreeSet<TypeKey> {
        self.flows
    }
}
