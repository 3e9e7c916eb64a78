//! Runtime configuration

use crate::{
    alloc::{DEFAULT_HEAP_SIZE, HeapKind},
    collectors::GcKind,
    stack::FrameLayout,
};

/// Selects the heap and collector the runtime starts with.
///
/// Read once when the runtime is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    gc_kind: GcKind,
    heap_kind: HeapKind,
    heap_size: usize,
    coalesce: bool,
    frame_layout: FrameLayout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gc_kind: GcKind::default(),
            heap_kind: HeapKind::default(),
            heap_size: DEFAULT_HEAP_SIZE,
            coalesce: true,
            frame_layout: FrameLayout::default(),
        }
    }
}

impl Config {
    pub fn with_gc_kind(mut self, gc_kind: GcKind) -> Self {
        self.gc_kind = gc_kind;
        self
    }

    pub fn with_heap_kind(mut self, heap_kind: HeapKind) -> Self {
        self.heap_kind = heap_kind;
        self
    }

    /// Arena size of chunk heaps, including the private heaps of collectors.
    pub fn with_heap_size(mut self, heap_size: usize) -> Self {
        self.heap_size = heap_size;
        self
    }

    /// Whether freed chunk blocks merge with free neighbours.
    pub fn with_coalescing(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn with_frame_layout(mut self, frame_layout: FrameLayout) -> Self {
        self.frame_layout = frame_layout;
        self
    }

    pub fn gc_kind(&self) -> GcKind {
        self.gc_kind
    }

    pub fn heap_kind(&self) -> HeapKind {
        self.heap_kind
    }

    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub fn coalescing(&self) -> bool {
        self.coalesce
    }

    pub fn frame_layout(&self) -> FrameLayout {
        self.frame_layout
    }
}
