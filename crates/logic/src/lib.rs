//! Behavior tree scheduler.
//!
//! A [`TreeEngine`] walks the branch tree from the single [`RootBranch`]
//! every tick, collects the flows that should be active and reconciles
//! them with the previous tick: new flows start, continuing flows are
//! resumed, dropped flows are cancelled and finished flows that are still
//! declared run again.

#![warn(missing_docs)]

mod branch;
mod context;
mod engine;
mod entry;
mod flow;
mod guard;

pub use branch::{Branch, BranchContext, RootBranch, Snapshot};
pub use context::FlowContext;
pub use engine::{EngineConfig, EngineError, TickReport, TreeEngine, MIN_TICK_INTERVAL};
pub use entry::{FlowEntry, FlowStatus};
pub use flow::{Flow, FlowError, LogicRegistration};
