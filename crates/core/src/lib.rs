//! Tickwork core types.
//!
//! Shared vocabulary for the resolution container and the tree engine:
//! type identity, run identifiers, component kinds and duration helpers.

#![warn(missing_docs)]

mod id;
mod kind;
mod time;

pub use id::{RunId, TypeKey};
pub use kind::Kind;
pub use time::DurationExt;
