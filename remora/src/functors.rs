//! Resolution of externally defined functors.
//!
//! The evaluator depends only on the [FunctorResolver] capability; the
//! dynamic-library loader is one implementation of it, so embedders and
//! tests can inject an in-process [RegistryResolver] instead.

use std::{
    fmt::{self, Debug},
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use hashbrown::HashMap;
use libloading::Library;

use crate::{datavalues::StorageValue, error::Error};

/// Highest positional arity the C functor ABI dispatches on.
pub const MAX_FUNCTOR_ARITY: usize = 8;

/// A resolved functor, ready to be called with evaluated arguments.
pub type ResolvedFunctor = Arc<dyn Fn(&[StorageValue]) -> StorageValue + Send + Sync>;

/// Capability for resolving functor names to callable implementations.
///
/// Resolution failures are deployment errors, unrecoverable within one
/// execution; the engine surfaces them to the embedder as [Error] values.
pub trait FunctorResolver: Debug + Send + Sync {
    /// Resolve `name` for the given argument count.
    fn resolve(&self, name: &str, arity: usize) -> Result<ResolvedFunctor, Error>;
}

/// Resolves functors from a dynamically loaded shared library that exposes
/// C-linkage functions named after the functors, each taking and returning
/// plain [StorageValue]s.
///
/// The library is opened on the first resolution and stays loaded for the
/// lifetime of the resolver. Resolved functors hold raw function pointers
/// into the library, so the resolver must outlive every [ResolvedFunctor]
/// it hands out; the engine guarantees that by owning both.
#[derive(Debug)]
pub struct LibraryResolver {
    path: PathBuf,
    library: OnceLock<Library>,
}

impl LibraryResolver {
    /// Create a resolver for the library at `path` without opening it yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            library: OnceLock::new(),
        }
    }

    fn library(&self) -> Result<&Library, Error> {
        if self.library.get().is_none() {
            let library =
                unsafe { Library::new(&self.path) }.map_err(|source| Error::FunctorLibrary {
                    path: self.path.clone(),
                    source,
                })?;
            log::info!("loaded functor library {}", self.path.display());

            // A concurrent initialization may win the race; dropping the
            // duplicate handle is harmless, the loader reference-counts.
            let _ = self.library.set(library);
        }

        Ok(self.library.get().expect("library was just initialized"))
    }

    fn symbol<T>(&self, name: &str) -> Result<libloading::Symbol<'_, T>, Error> {
        let library = self.library()?;
        unsafe { library.get(name.as_bytes()) }.map_err(|source| Error::FunctorSymbol {
            name: name.to_string(),
            source,
        })
    }
}

impl FunctorResolver for LibraryResolver {
    fn resolve(&self, name: &str, arity: usize) -> Result<ResolvedFunctor, Error> {
        type V = StorageValue;

        let functor: ResolvedFunctor = match arity {
            0 => {
                let f = *self.symbol::<unsafe extern "C" fn() -> V>(name)?;
                Arc::new(move |_| unsafe { f() })
            }
            1 => {
                let f = *self.symbol::<unsafe extern "C" fn(V) -> V>(name)?;
                Arc::new(move |a| unsafe { f(a[0]) })
            }
            2 => {
                let f = *self.symbol::<unsafe extern "C" fn(V, V) -> V>(name)?;
                Arc::new(move |a| unsafe { f(a[0], a[1]) })
            }
            3 => {
                let f = *self.symbol::<unsafe extern "C" fn(V, V, V) -> V>(name)?;
                Arc::new(move |a| unsafe { f(a[0], a[1], a[2]) })
            }
            4 => {
                let f = *self.symbol::<unsafe extern "C" fn(V, V, V, V) -> V>(name)?;
                Arc::new(move |a| unsafe { f(a[0], a[1], a[2], a[3]) })
            }
            5 => {
                let f = *self.symbol::<unsafe extern "C" fn(V, V, V, V, V) -> V>(name)?;
                Arc::new(move |a| unsafe { f(a[0], a[1], a[2], a[3], a[4]) })
            }
            6 => {
                let f = *self.symbol::<unsafe extern "C" fn(V, V, V, V, V, V) -> V>(name)?;
                Arc::new(move |a| unsafe { f(a[0], a[1], a[2], a[3], a[4], a[5]) })
            }
            7 => {
                let f = *self.symbol::<unsafe extern "C" fn(V, V, V, V, V, V, V) -> V>(name)?;
                Arc::new(move |a| unsafe { f(a[0], a[1], a[2], a[3], a[4], a[5], a[6]) })
            }
            8 => {
                let f = *self.symbol::<unsafe extern "C" fn(V, V, V, V, V, V, V, V) -> V>(name)?;
                Arc::new(move |a| unsafe { f(a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]) })
            }
            _ => {
                return Err(Error::FunctorArity {
                    name: name.to_string(),
                    arity,
                })
            }
        };

        Ok(functor)
    }
}

/// In-process functor table for tests and embedders that link their
/// functors directly instead of loading a shared library.
#[derive(Default)]
pub struct RegistryResolver {
    functors: HashMap<String, ResolvedFunctor>,
}

impl RegistryResolver {
    /// Create an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Register `functor` under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        functor: impl Fn(&[StorageValue]) -> StorageValue + Send + Sync + 'static,
    ) {
        self.functors.insert(name.into(), Arc::new(functor));
    }
}

impl Debug for RegistryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryResolver")
            .field("functors", &self.functors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctorResolver for RegistryResolver {
    fn resolve(&self, name: &str, _arity: usize) -> Result<ResolvedFunctor, Error> {
        self.functors
            .get(name)
            .cloned()
            .ok_or_else(|| Error::FunctorUnknown {
                name: name.to_string(),
            })
    }
}
