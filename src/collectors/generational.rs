//! Two generation collection with promotion
//!
//! New objects are born in the current heap, generation zero. A cycle marks
//! through both generations, then promotes every marked young object into
//! the long-lived generation one arena. When promotion succeeds generation
//! zero is discarded wholesale. When generation one is too full to take the
//! survivors, nothing is promoted and generation one is swept in place
//! instead, leaving the caller to collect again.

use core::ptr::NonNull;

use super::{CollectStats, Collector, GcKind, MarkSweepGc};
use crate::{
    alloc::{ChunkHeap, Heap, ObjectHeap},
    error::GcError,
    object::HEADER_SIZE,
    stack::{FrameLayout, ShadowStack},
};

/// Allocation retries granted before giving up, one per generation slot.
pub const GENERATIONS: usize = 4;

#[derive(Debug)]
pub struct GenerationalGc {
    stack: ShadowStack,
    gen_one: ChunkHeap,
}

impl GenerationalGc {
    pub fn new(layout: FrameLayout, gen_one: ChunkHeap) -> Self {
        Self {
            stack: ShadowStack::new(layout),
            gen_one,
        }
    }

    pub fn stack(&self) -> &ShadowStack {
        &self.stack
    }

    /// The long-lived generation.
    pub fn gen_one(&self) -> &ChunkHeap {
        &self.gen_one
    }
}

impl Collector for GenerationalGc {
    fn kind(&self) -> GcKind {
        GcKind::Generational
    }

    fn collect(&mut self, heap: &mut Heap) -> CollectStats {
        let heap_kind = heap.kind();
        let Some(young) = heap.as_chunk_mut() else {
            panic!("{}", GcError::WrongHeap(GcKind::Generational, heap_kind));
        };

        // old objects may hold the only reference to a young one and the other way round
        MarkSweepGc::run_mark_phase(&self.stack, &(&*young, &self.gen_one));

        let live_before = young.len();
        let bytes_before = young.live_bytes();
        let (promoted, promoted_bytes) = young
            .objects()
            .iter()
            .filter(|object| object.is_marked())
            .fold((0, 0), |(count, bytes), object| {
                (count + 1, bytes + object.size() + HEADER_SIZE)
            });

        if young.purify(&mut self.gen_one, &self.stack) {
            young.reset();
            for object in self.gen_one.objects().iter() {
                object.set_marked(false);
            }
            tracing::debug!(promoted, "generation zero promoted");
            return CollectStats {
                freed: live_before - promoted,
                freed_bytes: bytes_before - promoted_bytes,
                moved: promoted,
                promotion_failed: false,
            };
        }

        tracing::warn!(
            promoted,
            free = self.gen_one.free_bytes(),
            "generation one is full, sweeping it in place"
        );
        for object in young.objects().iter() {
            object.set_marked(false);
        }
        let stats = MarkSweepGc::run_sweep_phase(&mut self.gen_one);
        CollectStats {
            promotion_failed: true,
            ..stats
        }
    }

    unsafe fn push_frame(&mut self, frame: NonNull<u8>, size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { self.stack.push(frame, size) }
    }

    fn pop_frame(&mut self) {
        self.stack.pop();
    }

    fn retry_budget(&self) -> usize {
        GENERATIONS
    }

    fn retained_heap(&self) -> Option<&ChunkHeap> {
        Some(&self.gen_one)
    }
}
