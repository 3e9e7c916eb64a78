//! Garbage collectors
//!
//! Every collector implements [`Collector`]. The runtime holds exactly one of
//! them, as a [`Gc`], next to the current [`Heap`].

use core::{fmt, ptr::NonNull, str::FromStr};

use rust_alloc::string::ToString;

use crate::{
    alloc::{ChunkHeap, Heap, ObjectHeap},
    config::Config,
    error::{ConfigError, HeapError},
    object::ObjectRef,
};

pub mod copying;
pub mod generational;
pub mod mark_sweep;
pub mod refcount;

pub use copying::CopyingGc;
pub use generational::GenerationalGc;
pub use mark_sweep::MarkSweepGc;
pub use refcount::RefCountGc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GcKind {
    /// Never reclaims anything.
    None,
    RefCount,
    #[default]
    MarkSweep,
    Copying,
    Generational,
}

impl GcKind {
    /// Whether the collector moves objects and so needs a chunk heap.
    pub fn needs_chunk_heap(self) -> bool {
        matches!(self, Self::Copying | Self::Generational)
    }
}

impl fmt::Display for GcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::RefCount => "refcount",
            Self::MarkSweep => "marksweep",
            Self::Copying => "copying",
            Self::Generational => "generational",
        })
    }
}

impl FromStr for GcKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "refcount" => Ok(Self::RefCount),
            "marksweep" => Ok(Self::MarkSweep),
            "copying" => Ok(Self::Copying),
            "generational" => Ok(Self::Generational),
            _ => Err(ConfigError::UnknownGcKind(s.to_string())),
        }
    }
}

/// What one collection did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Objects reclaimed.
    pub freed: usize,
    /// Bytes reclaimed, headers included.
    pub freed_bytes: usize,
    /// Objects copied to another heap.
    pub moved: usize,
    /// A generational collection could not promote and swept in place.
    pub promotion_failed: bool,
}

pub trait Collector {
    fn kind(&self) -> GcKind;

    // runs a full cycle to completion, `heap` is the current heap
    fn collect(&mut self, heap: &mut Heap) -> CollectStats;

    // SAFETY: `frame` must stay valid for the frame extent of `size` until popped
    unsafe fn push_frame(&mut self, _frame: NonNull<u8>, _size: usize) {}

    fn pop_frame(&mut self) {}

    fn ref_incr(&mut self, _heap: &Heap, _object: ObjectRef) {}

    fn ref_decr(&mut self, _heap: &mut Heap, _object: ObjectRef) {}

    // how many collect-and-retry rounds a failed allocation gets
    fn retry_budget(&self) -> usize {
        1
    }

    // long-lived objects the collector keeps outside the current heap
    fn retained_heap(&self) -> Option<&ChunkHeap> {
        None
    }
}

/// The collector that does nothing.
#[derive(Debug, Default)]
pub struct NoGc;

impl Collector for NoGc {
    fn kind(&self) -> GcKind {
        GcKind::None
    }

    fn collect(&mut self, _heap: &mut Heap) -> CollectStats {
        tracing::debug!("collection requested without a collector");
        CollectStats::default()
    }
}

/// The collectors the runtime can run with.
#[derive(Debug)]
pub enum Gc {
    None(NoGc),
    RefCount(RefCountGc),
    MarkSweep(MarkSweepGc),
    Copying(CopyingGc),
    Generational(GenerationalGc),
}

impl Gc {
    /// Creates the collector selected by `config`.
    ///
    /// Copying and generational collectors allocate their private heap here.
    pub fn new(kind: GcKind, config: &Config) -> Result<Self, HeapError> {
        let layout = config.frame_layout();
        let gc = match kind {
            GcKind::None => Self::None(NoGc),
            GcKind::RefCount => Self::RefCount(RefCountGc::new()),
            GcKind::MarkSweep => Self::MarkSweep(MarkSweepGc::new(layout)),
            GcKind::Copying => Self::Copying(CopyingGc::new(
                layout,
                ChunkHeap::new(config.heap_size())?.with_coalescing(config.coalescing()),
            )),
            GcKind::Generational => Self::Generational(GenerationalGc::new(
                layout,
                ChunkHeap::new(config.heap_size())?.with_coalescing(config.coalescing()),
            )),
        };
        tracing::info!(%kind, "collector created");
        Ok(gc)
    }

    pub fn as_ref_count(&self) -> Option<&RefCountGc> {
        match self {
            Self::RefCount(gc) => Some(gc),
            _ => None,
        }
    }

    pub fn as_mark_sweep(&self) -> Option<&MarkSweepGc> {
        match self {
            Self::MarkSweep(gc) => Some(gc),
            _ => None,
        }
    }

    pub fn as_copying(&self) -> Option<&CopyingGc> {
        match self {
            Self::Copying(gc) => Some(gc),
            _ => None,
        }
    }

    pub fn as_generational(&self) -> Option<&GenerationalGc> {
        match self {
            Self::Generational(gc) => Some(gc),
            _ => None,
        }
    }

    /// Releases the collector and any heap it owns.
    pub fn destroy(self) {
        tracing::debug!(kind = %self.kind(), "destroying collector");
        drop(self);
    }

    fn as_collector(&self) -> &dyn Collector {
        match self {
            Self::None(gc) => gc,
            Self::RefCount(gc) => gc,
            Self::MarkSweep(gc) => gc,
            Self::Copying(gc) => gc,
            Self::Generational(gc) => gc,
        }
    }

    fn as_collector_mut(&mut self) -> &mut dyn Collector {
        match self {
            Self::None(gc) => gc,
            Self::RefCount(gc) => gc,
            Self::MarkSweep(gc) => gc,
            Self::Copying(gc) => gc,
            Self::Generational(gc) => gc,
        }
    }
}

impl Collector for Gc {
    fn kind(&self) -> GcKind {
        self.as_collector().kind()
    }

    fn collect(&mut self, heap: &mut Heap) -> CollectStats {
        let kind = self.kind();
        tracing::debug!(%kind, live = heap.len(), "collection start");
        let stats = self.as_collector_mut().collect(heap);
        tracing::debug!(
            %kind,
            freed = stats.freed,
            freed_bytes = stats.freed_bytes,
            moved = stats.moved,
            promotion_failed = stats.promotion_failed,
            "collection end"
        );
        stats
    }

    unsafe fn push_frame(&mut self, frame: NonNull<u8>, size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { self.as_collector_mut().push_frame(frame, size) }
    }

    fn pop_frame(&mut self) {
        self.as_collector_mut().pop_frame()
    }

    fn ref_incr(&mut self, heap: &Heap, object: ObjectRef) {
        self.as_collector_mut().ref_incr(heap, object)
    }

    fn ref_decr(&mut self, heap: &mut Heap, object: ObjectRef) {
        self.as_collector_mut().ref_decr(heap, object)
    }

    fn retry_budget(&self) -> usize {
        self.as_collector().retry_budget()
    }

    fn retained_heap(&self) -> Option<&ChunkHeap> {
        self.as_collector().retained_heap()
    }
}
