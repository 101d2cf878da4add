//! Error-handling module for the crate

use std::path::PathBuf;

use thiserror::Error;

use crate::functors::MAX_FUNCTOR_ARITY;

/// Error-Collection for all the possible Errors occurring in this crate
///
/// These are environment and deployment failures that the embedder reports
/// to the user before exiting with a nonzero status. Defects in the compiled
/// program itself (unknown relation ids, unbound tuple positions, arity
/// mismatches) are invariant violations and panic instead, since continuing
/// would operate on undefined state.
#[derive(Error, Debug)]
pub enum Error {
    /// The configured functor library could not be opened.
    #[error("Failed to load functor library \"{path}\": {source}.")]
    FunctorLibrary {
        /// Path of the library that was requested
        path: PathBuf,
        /// Contains the wrapped loader error
        source: libloading::Error,
    },
    /// A functor name could not be resolved to a symbol in the loaded library.
    #[error("Failed to resolve functor \"{name}\": {source}.")]
    FunctorSymbol {
        /// Name of the functor that was requested
        name: String,
        /// Contains the wrapped loader error
        source: libloading::Error,
    },
    /// A functor is not known to the configured resolver.
    #[error("Functor \"{name}\" is not defined.")]
    FunctorUnknown {
        /// Name of the functor that was requested
        name: String,
    },
    /// A functor was declared with more arguments than the ABI dispatches on.
    #[error("Functor \"{name}\" uses arity {arity}, the maximum supported is {}.", MAX_FUNCTOR_ARITY)]
    FunctorArity {
        /// Name of the functor that was requested
        name: String,
        /// Arity the program declared for it
        arity: usize,
    },
    /// The program calls a functor but no resolver was configured.
    #[error("The program calls functor \"{name}\" but no functor resolver is configured.")]
    NoFunctorResolver {
        /// Name of the functor that was requested
        name: String,
    },
    /// The worker pool for parallel operators could not be constructed.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
