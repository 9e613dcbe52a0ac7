//! Component kinds.

use serde::{Deserialize, Serialize};

/// How a registered component is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// One cached instance for the lifetime of the scope.
    Singleton,
    /// A new instance on every explicit creation call, never cached.
    Prototype,
}

impl Kind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Singleton => "singleton",
            Kind::Prototype => "prototype",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
