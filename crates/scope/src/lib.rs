//! Resolution container for tickwork components.
//!
//! Components are declared up front with a [`Registration`], validated
//! once by [`ScopeBuilder::build`] and then resolved from the [`Scope`]:
//! singletons are created lazily and cached, prototypes are created fresh
//! each time. A registered [`Factory`] can take over construction for
//! every type it is the closest match for.

#![warn(missing_docs)]

mod build;
mod distance;
mod error;
mod factory;
mod registration;
mod scope;

pub use build::ScopeBuilder;
pub use distance::INTERFACE_PENALTY;
pub use error::{Result, ScopeError};
pub use factory::Factory;
pub use registration::{Args, Erased, Instance, Param, Registration, Relation};
pub use scope::Scope;
