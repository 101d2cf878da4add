//! This module defines [ExecutionParameters].

use std::path::PathBuf;

use crate::functors::FunctorResolver;

/// External parameters affecting one execution.
#[derive(Debug, Default)]
pub struct ExecutionParameters {
    /// Whether per-rule frequency and relation-read counters are recorded
    pub(crate) profiling: bool,
    /// Worker count for parallel operator variants; 0 selects the default
    pub(crate) num_threads: usize,
    /// Shared library with the user-defined functors
    pub(crate) functor_library: Option<PathBuf>,
    /// Alternative functor resolution capability, taking precedence over
    /// the library path
    pub(crate) functor_resolver: Option<Box<dyn FunctorResolver>>,
}

impl ExecutionParameters {
    /// Enable or disable profiling.
    pub fn set_profiling(&mut self, enabled: bool) {
        self.profiling = enabled;
    }

    /// Set the worker count used inside parallel operator variants;
    /// 0 selects the default thread count.
    pub fn set_num_threads(&mut self, threads: usize) {
        self.num_threads = threads;
    }

    /// Resolve functors from the shared library at `path`. The library is
    /// loaded lazily on the first functor call of the execution.
    pub fn set_functor_library(&mut self, path: impl Into<PathBuf>) {
        self.functor_library = Some(path.into());
    }

    /// Resolve functors through a custom capability instead of a shared
    /// library.
    pub fn set_functor_resolver(&mut self, resolver: Box<dyn FunctorResolver>) {
        self.functor_resolver = Some(resolver);
    }
}
