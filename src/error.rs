//! Error types and the fatal exit path
//!
//! Recoverable failures are returned as these errors. Broken invariants
//! (double frees, unbalanced frame pops, decrementing a dead count) panic at
//! the failing check instead.

use rust_alloc::{alloc::LayoutError, string::String};

use crate::{alloc::HeapKind, collectors::GcKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("arena size must be non-zero")]
    ZeroArenaSize,
    #[error("invalid arena layout")]
    Layout(#[from] LayoutError),
    #[error("{0} heaps are not supported")]
    Unsupported(HeapKind),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GcError {
    #[error("object {0:#x} is not live on the current heap")]
    NotLive(usize),
    #[error("reference count of object {0:#x} is already zero")]
    ZeroRefCount(usize),
    #[error("{0} collector cannot run on a {1} heap")]
    WrongHeap(GcKind, HeapKind),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown collector kind `{0}`")]
    UnknownGcKind(String),
    #[error("unknown heap kind `{0}`")]
    UnknownHeapKind(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Gc(#[from] GcError),
    #[error("out of memory: cannot allocate {size} bytes after {collections} collection(s)")]
    OutOfMemory { size: usize, collections: usize },
    #[error("array of {len} elements of {elem_size} bytes is too large")]
    ArrayTooLarge { elem_size: usize, len: usize },
}

/// Reports an unrecoverable runtime failure and terminates.
///
/// With `std` the process exits with status 1, the way a systems allocator
/// gives up under true memory exhaustion. Without `std` this panics.
#[track_caller]
#[cold]
pub fn fatal(error: &RuntimeError) -> ! {
    let location = core::panic::Location::caller();
    tracing::error!(%location, "fatal runtime error: {error}");

    #[cfg(feature = "std")]
    {
        std::eprintln!("fatal runtime error at {location}: {error}");
        std::process::exit(1)
    }

    #[cfg(not(feature = "std"))]
    panic!("fatal runtime error: {error}")
}
