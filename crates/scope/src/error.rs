//! Errors raised while building a scope or resolving from it.

use thiserror::Error;

/// Result alias for scope operations.
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Errors that can occur while building or using a [`Scope`](crate::Scope).
#[derive(Debug, Error)]
pub enum ScopeError {
    /// No constructor of a registration could be satisfied.
    #[error("{report}")]
    UnsatisfiableConstructor {
        /// Type being registered
        ty: String,
        /// Every constructor considered, with each parameter marked
        report: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Circular dependency: {}", .path.join(" → "))]
    CircularDependency {
        /// Cycle path, first and last element are the same type
        path: Vec<String>,
    },

    /// More than one factory is equally close to a registered type.
    #[error("Multiple factories with same distance for {ty}: {}", .factories.join(", "))]
    AmbiguousFactory {
        /// Type that needs a factory
        ty: String,
        /// Equally close factories
        factories: Vec<String>,
    },

    /// A collection parameter would include a prototype.
    #[error(
        "Prototype '{prototype}' cannot be resolved via collection '{collection}' in '{owner}'. \
         Take the Scope and call new_instance() to create prototypes on demand."
    )]
    PrototypeInCollection {
        /// Offending prototype
        prototype: String,
        /// Collection element type
        collection: String,
        /// Registration owning the constructor
        owner: String,
    },

    /// The same type was registered twice.
    #[error("Type {0} registered more than once")]
    DuplicateRegistration(String),

    /// A factory singleton could not be created during build.
    #[error("Failed to create factory {ty}: {source}")]
    FactoryConstruction {
        /// Factory type
        ty: String,
        /// Underlying failure
        #[source]
        source: Box<ScopeError>,
    },

    /// No singleton matches the requested type.
    #[error("No singleton registered for {0}")]
    NotRegistered(String),

    /// No prototype matches the requested type.
    #[error("No prototype registered for {0}")]
    NoPrototype(String),

    /// Several singletons match and the caller asked for exactly one.
    #[error("Multiple singletons for {ty}, use resolve_all: {}", .matches.join(", "))]
    Ambiguous {
        /// Requested type
        ty: String,
        /// Matching registrations
        matches: Vec<String>,
    },

    /// Several prototypes match and the caller asked for exactly one.
    #[error("Multiple prototypes for {ty}: {}", .matches.join(", "))]
    AmbiguousPrototype {
        /// Requested type
        ty: String,
        /// Matching registrations
        matches: Vec<String>,
    },

    /// A prototype was requested through the singleton path.
    #[error("Cannot resolve prototype '{0}' via resolve(). Use new_instance() instead.")]
    PrototypeViaResolve(String),

    /// A singleton was requested through the prototype path.
    #[error("Cannot create singleton '{0}' via new_instance(). Use resolve() instead.")]
    SingletonViaNew(String),

    /// An unregistered type has no satisfiable constructor.
    #[error("No satisfiable constructor found for {0}")]
    NoConstructor(String),

    /// A constructor or factory returned an error.
    #[error("Failed to construct {ty}: {source}")]
    Construction {
        /// Type being constructed
        ty: String,
        /// Error returned by user code
        #[source]
        source: anyhow::Error,
    },

    /// An instance does not expose the requested view.
    #[error("{ty} does not provide {view}")]
    MissingView {
        /// Concrete type
        ty: String,
        /// Requested view
        view: String,
    },

    /// A constructor read its arguments in a different shape than declared.
    #[error("Argument {position} of {owner} is not {expected}")]
    ArgumentMismatch {
        /// Registration owning the constructor
        owner: String,
        /// Zero-based parameter position
        position: usize,
        /// What the constructor asked for
        expected: String,
    },
}
