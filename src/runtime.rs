//! The runtime context a compiled program runs against
//!
//! A [`Runtime`] owns the current heap and the collector. Compiled code goes
//! through it for every allocation, every frame push and pop and every
//! reference count change. There is no global state, several runtimes can
//! coexist as long as each stays on one thread.

use core::ptr::NonNull;

use crate::{
    alloc::{Heap, HeapKind, ObjectHeap},
    collectors::{CollectStats, Collector, Gc},
    config::Config,
    error::{GcError, RuntimeError, fatal},
    object::{ObjectRef, ObjectSpace, WORD_SIZE},
};

#[derive(Debug)]
pub struct Runtime {
    config: Config,
    heap: Heap,
    gc: Gc,
}

impl Runtime {
    /// Creates the heap and collector selected by `config`.
    ///
    /// Moving collectors need a chunk heap, a host heap request is switched
    /// to one.
    pub fn new(config: Config) -> Result<Self, RuntimeError> {
        let mut config = config;
        if config.gc_kind().needs_chunk_heap() && config.heap_kind() == HeapKind::Host {
            tracing::warn!(
                gc = %config.gc_kind(),
                "collector moves objects, using a chunk heap instead of a host heap"
            );
            config = config.with_heap_kind(HeapKind::Chunk);
        }

        let heap = Heap::new(config.heap_kind(), config.heap_size(), config.coalescing())?;
        let gc = Gc::new(config.gc_kind(), &config)?;
        tracing::info!(
            heap = %config.heap_kind(),
            gc = %config.gc_kind(),
            heap_size = config.heap_size(),
            "runtime started"
        );
        Ok(Self { config, heap, gc })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn gc(&self) -> &Gc {
        &self.gc
    }

    /// Allocates a zeroed object of `size` payload bytes, collecting and
    /// retrying as often as the collector allows when the heap is exhausted.
    pub fn try_allocate(&mut self, size: usize) -> Result<ObjectRef, RuntimeError> {
        if let Some(object) = self.heap.allocate(size) {
            return Ok(object);
        }

        let budget = self.gc.retry_budget();
        for attempt in 1..=budget {
            tracing::debug!(size, attempt, "heap exhausted, collecting");
            self.gc.collect(&mut self.heap);
            if let Some(object) = self.heap.allocate(size) {
                return Ok(object);
            }
        }
        Err(RuntimeError::OutOfMemory {
            size,
            collections: budget,
        })
    }

    /// Like [`Runtime::try_allocate`], but exhaustion terminates the process.
    #[track_caller]
    pub fn allocate(&mut self, size: usize) -> ObjectRef {
        match self.try_allocate(size) {
            Ok(object) => object,
            Err(error) => fatal(&error),
        }
    }

    /// Allocates an array of `len` elements of `elem_size` bytes.
    ///
    /// The first payload word holds the length, the elements follow it.
    pub fn try_allocate_array(
        &mut self,
        elem_size: usize,
        len: usize,
    ) -> Result<ObjectRef, RuntimeError> {
        let size = elem_size
            .checked_mul(len)
            .and_then(|bytes| bytes.checked_add(WORD_SIZE))
            .filter(|&size| u32::try_from(size).is_ok())
            .ok_or(RuntimeError::ArrayTooLarge { elem_size, len })?;
        let array = self.try_allocate(size)?;
        array.write_word(0, len);
        Ok(array)
    }

    #[track_caller]
    pub fn allocate_array(&mut self, elem_size: usize, len: usize) -> ObjectRef {
        match self.try_allocate_array(elem_size, len) {
            Ok(array) => array,
            Err(error) => fatal(&error),
        }
    }

    pub fn collect(&mut self) -> CollectStats {
        self.gc.collect(&mut self.heap)
    }

    /// Registers the frame of a function being entered. A null frame is ignored.
    ///
    /// # Safety
    ///
    /// A non-null `frame` must stay valid for reads and writes of the frame
    /// layout's extent for `size` until it is popped.
    pub unsafe fn push_frame(&mut self, frame: *mut u8, size: usize) {
        let Some(frame) = NonNull::new(frame) else {
            tracing::trace!("null stack frame ignored");
            return;
        };
        // SAFETY: forwarded from the caller.
        unsafe { self.gc.push_frame(frame, size) }
    }

    pub fn pop_frame(&mut self) {
        self.gc.pop_frame()
    }

    /// The live object whose payload starts at `payload`, in the current heap
    /// or in a heap the collector keeps.
    pub fn object_of(&self, payload: usize) -> Option<ObjectRef> {
        self.heap
            .resolve(payload)
            .or_else(|| self.gc.retained_heap()?.resolve(payload))
    }

    /// Increments the count of the object at `payload`. Null is ignored.
    pub fn ref_incr(&mut self, payload: *const u8) {
        if let Some(object) = self.checked_object(payload) {
            self.gc.ref_incr(&self.heap, object);
        }
    }

    /// Decrements the count of the object at `payload`. Null is ignored.
    pub fn ref_decr(&mut self, payload: *const u8) {
        if let Some(object) = self.checked_object(payload) {
            self.gc.ref_decr(&mut self.heap, object);
        }
    }

    /// Logs the contents of every heap.
    pub fn dump(&self) {
        self.heap.dump();
        if let Some(retained) = self.gc.retained_heap() {
            tracing::info!("{retained}");
        }
    }

    /// Tears the runtime down, freeing every object.
    pub fn shutdown(self) {
        let Self { heap, gc, .. } = self;
        tracing::info!(live = heap.len(), "runtime shutdown");
        gc.destroy();
        heap.destroy();
    }

    fn checked_object(&self, payload: *const u8) -> Option<ObjectRef> {
        if payload.is_null() {
            return None;
        }
        let addr = payload as usize;
        match self.object_of(addr) {
            Some(object) => Some(object),
            None => panic!("{}", GcError::NotLive(addr)),
        }
    }
}

#[cfg(test)]
mod tests;
