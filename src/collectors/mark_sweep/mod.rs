//! Mark and sweep over the shadow stack
//!
//! The mark phase drives the conservative scanner and sets the mark bit of
//! every object reachable from a pushed frame. The sweep phase walks the live
//! list in order, frees every unmarked object and clears the mark of the
//! survivors for the next cycle. Objects never move.

use core::ptr::NonNull;

use rust_alloc::vec::Vec;

use super::{CollectStats, Collector, GcKind};
use crate::{
    alloc::{Heap, ObjectHeap},
    object::{HEADER_SIZE, ObjectRef, ObjectSpace, Slot},
    stack::{FrameLayout, ShadowStack, SlotVisitor},
};


// marks each object the first time it is found, and only then descends into it
#[derive(Debug, Default)]
struct Marker {
    marked: usize,
}

impl SlotVisitor for Marker {
    fn visit(&mut self, object: ObjectRef, _slot: Slot) -> Option<ObjectRef> {
        if object.is_marked() {
            return None;
        }
        object.set_marked(true);
        self.marked += 1;
        tracing::trace!(object = ?object, "mark");
        Some(object)
    }
}

#[derive(Debug, Default)]
pub struct MarkSweepGc {
    stack: ShadowStack,
}

impl MarkSweepGc {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            stack: ShadowStack::new(layout),
        }
    }

    pub fn stack(&self) -> &ShadowStack {
        &self.stack
    }

    /// Marks everything reachable from `stack` within `space` and returns
    /// how many objects were newly marked.
    pub fn run_mark_phase<S>(stack: &ShadowStack, space: &S) -> usize
    where
        S: ObjectSpace + ?Sized,
    {
        let mut marker = Marker::default();
        stack.traverse(space, &mut marker);
        tracing::debug!(marked = marker.marked, "mark phase done");
        marker.marked
    }

    /// Frees the unmarked objects of `heap` and unmarks the rest.
    pub fn run_sweep_phase<H>(heap: &mut H) -> CollectStats
    where
        H: ObjectHeap + ?Sized,
    {
        let mut stats = CollectStats::default();
        let objects: Vec<ObjectRef> = heap.objects().iter().collect();
        for object in objects {
            if object.is_marked() {
                object.set_marked(false);
                continue;
            }
            stats.freed += 1;
            stats.freed_bytes += object.size() + HEADER_SIZE;
            tracing::trace!(object = ?object, "sweep");
            heap.free(object);
        }
        tracing::debug!(freed = stats.freed, survivors = heap.len(), "sweep phase done");
        stats
    }
}

impl Collector for MarkSweepGc {
    fn kind(&self) -> GcKind {
        GcKind::MarkSweep
    }

    fn collect(&mut self, heap: &mut Heap) -> CollectStats {
        Self::run_mark_phase(&self.stack, &*heap);
        Self::run_sweep_phase(heap)
    }

    unsafe fn push_frame(&mut self, frame: NonNull<u8>, size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { self.stack.push(frame, size) }
    }

    fn pop_frame(&mut self) {
        self.stack.pop();
    }
}
