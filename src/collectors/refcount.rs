//! Reference counting
//!
//! Counts are adjusted by the compiled program through `ref_incr` and
//! `ref_decr`. When a count reaches zero the object's payload is scanned word
//! by word, every live object it refers to is decremented in turn, and the
//! object is freed. Cycles are never reclaimed.

use rust_alloc::vec::Vec;

use super::{CollectStats, Collector, GcKind};
use crate::{
    alloc::{Heap, ObjectHeap},
    error::GcError,
    object::{ObjectRef, ObjectSpace},
};

#[derive(Debug, Default)]
pub struct RefCountGc {
    freed: usize,
}

impl RefCountGc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects reclaimed since creation.
    pub fn freed(&self) -> usize {
        self.freed
    }

    /// Decrements `object`, reclaiming it and cascading into its referents
    /// when its count reaches zero.
    ///
    /// Fails without touching anything if `object` is not live on `heap` or
    /// its count is already zero. A live referent reached by the cascade with
    /// a zero count fails the same way, leaving the objects freed before it
    /// freed.
    pub fn try_ref_decr(&mut self, heap: &mut Heap, object: ObjectRef) -> Result<(), GcError> {
        if !heap.contains(object) {
            return Err(GcError::NotLive(object.addr()));
        }
        if object.ref_count() == 0 {
            return Err(GcError::ZeroRefCount(object.addr()));
        }

        let mut pending = Vec::from([object]);
        while let Some(object) = pending.pop() {
            // a self reference or a second slot may name an object freed earlier in this cascade
            if !heap.contains(object) {
                continue;
            }
            let Some(count) = object.header().dec_ref() else {
                tracing::error!(object = ?object, "referent already has a zero count");
                return Err(GcError::ZeroRefCount(object.addr()));
            };
            tracing::trace!(object = ?object, count, "decrement");
            if count > 0 {
                continue;
            }

            pending.extend(object.slots().filter_map(|slot| heap.resolve(slot.get())));
            tracing::trace!(object = ?object, "free");
            heap.free(object);
            self.freed += 1;
        }
        Ok(())
    }
}

impl Collector for RefCountGc {
    fn kind(&self) -> GcKind {
        GcKind::RefCount
    }

    fn collect(&mut self, _heap: &mut Heap) -> CollectStats {
        // garbage is reclaimed eagerly on decrement
        tracing::debug!("reference counting has no collection cycle");
        CollectStats::default()
    }

    fn ref_incr(&mut self, heap: &Heap, object: ObjectRef) {
        assert!(heap.contains(object), "{}", GcError::NotLive(object.addr()));
        let count = object.header().inc_ref();
        tracing::trace!(object = ?object, count, "increment");
    }

    fn ref_decr(&mut self, heap: &mut Heap, object: ObjectRef) {
        if let Err(error) = self.try_ref_decr(heap, object) {
            panic!("invalid reference count decrement: {error}");
        }
    }
}
