//! A heap backed directly by the global allocator

use core::{fmt, ptr::NonNull};

use rust_alloc::alloc::{Layout, alloc_zeroed, dealloc};

use super::{HeapKind, ObjectHeap, ObjectList};
use crate::object::{ObjectRef, ObjectSpace};

// headers hold a u32, payload words are read unaligned, so word alignment is plenty
const BLOCK_ALIGN: usize = align_of::<usize>();

/// One host allocation per object.
///
/// Exhaustion is only reported when the global allocator itself refuses a
/// request, so collectors rarely get a chance to run on this heap.
#[derive(Debug, Default)]
pub struct HostHeap {
    objects: ObjectList,
}

impl HostHeap {
    pub fn new() -> Self {
        Self::default()
    }

    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size, BLOCK_ALIGN).ok()
    }
}

impl ObjectSpace for HostHeap {
    fn find_object(&self, addr: usize) -> Option<ObjectRef> {
        self.objects.find(addr)
    }
}

impl ObjectHeap for HostHeap {
    fn kind(&self) -> HeapKind {
        HeapKind::Host
    }

    fn allocate_block(&mut self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(size)?;
        // SAFETY: `size` always covers at least a header, so the layout is non-zero.
        NonNull::new(unsafe { alloc_zeroed(layout) })
    }

    unsafe fn release_block(&mut self, block: NonNull<u8>, size: usize) {
        let Some(layout) = Self::layout(size) else {
            unreachable!("block of {size} bytes was never handed out")
        };
        // SAFETY: the caller guarantees `block` came from `allocate_block(size)`.
        unsafe { dealloc(block.as_ptr(), layout) }
    }

    fn objects(&self) -> &ObjectList {
        &self.objects
    }

    fn objects_mut(&mut self) -> &mut ObjectList {
        &mut self.objects
    }
}

impl fmt::Display for HostHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "host heap: {} live objects", self.objects.len())?;
        for object in self.objects.iter() {
            writeln!(f, "  {object}")?;
        }
        Ok(())
    }
}

impl Drop for HostHeap {
    fn drop(&mut self) {
        if !self.objects.is_empty() {
            tracing::debug!(objects = self.objects.len(), "releasing leftover host objects");
        }
        self.clear();
    }
}
