//! Memory management for a small compiled language.
//!
//! Heaps hand out objects with a fixed header in front of the payload, a
//! shadow stack of frames gives the collectors their roots, and one of
//! several collectors reclaims what is no longer reachable: reference
//! counting, mark and sweep, semi-space copying or two generation promotion.
//! Roots are found conservatively, any word that lands exactly on a live
//! payload is a reference.
//!
//! The [`Runtime`] ties a heap and a collector together for a compiled
//! program.

#![no_std]

extern crate alloc as rust_alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod alloc;
pub mod collectors;
pub mod config;
pub mod error;
pub mod list;
pub mod object;
pub mod runtime;
pub mod stack;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::alloc::{ChunkHeap, Heap, HeapKind, HostHeap, ObjectHeap};
pub use crate::collectors::{CollectStats, Collector, Gc, GcKind};
pub use crate::config::Config;
pub use crate::error::{ConfigError, GcError, HeapError, RuntimeError};
pub use crate::object::{ObjectRef, ObjectSpace};
pub use crate::runtime::Runtime;
pub use crate::stack::{FrameLayout, ShadowStack};
