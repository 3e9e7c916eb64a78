//! Semi-space copying
//!
//! The collector owns a private to-space arena the size of the current heap.
//! A cycle marks through the shadow stack, copies every marked object into
//! the emptied to-space, rewrites the roots and swaps the two arenas.
//! Whatever stayed behind is unreachable and is dropped wholesale, and the
//! survivors end up packed in allocation order.

use core::ptr::NonNull;

use super::{CollectStats, Collector, GcKind, MarkSweepGc};
use crate::{
    alloc::{ChunkHeap, Heap, ObjectHeap},
    error::GcError,
    stack::{FrameLayout, ShadowStack},
};

#[derive(Debug)]
pub struct CopyingGc {
    stack: ShadowStack,
    to_space: ChunkHeap,
}

impl CopyingGc {
    pub fn new(layout: FrameLayout, to_space: ChunkHeap) -> Self {
        Self {
            stack: ShadowStack::new(layout),
            to_space,
        }
    }

    pub fn stack(&self) -> &ShadowStack {
        &self.stack
    }

    pub fn to_space(&self) -> &ChunkHeap {
        &self.to_space
    }
}

impl Collector for CopyingGc {
    fn kind(&self) -> GcKind {
        GcKind::Copying
    }

    fn collect(&mut self, heap: &mut Heap) -> CollectStats {
        let heap_kind = heap.kind();
        let Some(from_space) = heap.as_chunk_mut() else {
            panic!("{}", GcError::WrongHeap(GcKind::Copying, heap_kind));
        };

        MarkSweepGc::run_mark_phase(&self.stack, &*from_space);

        let live_before = from_space.len();
        let bytes_before = from_space.live_bytes();
        self.to_space.reset();
        if !from_space.purify(&mut self.to_space, &self.stack) {
            // only reachable when the to-space is smaller than the current heap
            tracing::warn!(
                to_space = self.to_space.capacity(),
                from_space = from_space.capacity(),
                "to-space too small, sweeping in place"
            );
            return MarkSweepGc::run_sweep_phase(from_space);
        }

        core::mem::swap(from_space, &mut self.to_space);
        let moved = from_space.len();
        let stats = CollectStats {
            freed: live_before - moved,
            freed_bytes: bytes_before - from_space.live_bytes(),
            moved,
            promotion_failed: false,
        };
        // everything left in the old space is garbage
        self.to_space.reset();
        stats
    }

    unsafe fn push_frame(&mut self, frame: NonNull<u8>, size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { self.stack.push(frame, size) }
    }

    fn pop_frame(&mut self) {
        self.stack.pop();
    }
}
