//! Type distance between a registration and a target type.
//!
//! Used to pick the closest factory. A match through the base chain always
//! beats a match through a trait.

use crate::registration::{Descriptor, Relation};
use tickwork_core::TypeKey;

/// Added to every trait match so base-chain matches are preferred.
pub const INTERFACE_PENALTY: u32 = 1000;

/// Distance from `descriptor` to `target`, or `None` if not assignable.
pub(crate) fn distance(descriptor: &Descriptor, target: TypeKey) -> Option<u32> {
    let view = descriptor.view(target)?;
    Some(match view.relation {
        Relation::Concrete => 0,
        Relation::Base(hops) => hops,
        Relation::Interface(depth) => INTERFACE_PENALTY + depth,
    })
}
