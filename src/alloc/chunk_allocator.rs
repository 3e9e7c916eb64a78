// `ChunkAllocator<'heap>` lets collections like `Vec` take their buffers
// straight out of a chunk heap arena, next to the garbage collected objects.
//
// limitations:
// - raw blocks are invisible to the collectors, they are never scanned,
//   moved or swept, and `ChunkHeap::reset` forgets them
// - alignment caps at 16 bytes, the alignment of the arena itself
// - growing an allocation always copies, blocks are never extended in place

use core::cell::RefCell;
use core::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator, Layout};
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::{ChunkHeap, ObjectHeap};
use crate::object::{OBJECT_ALIGN, align_up};

const MAX_ARENA_ALIGN: usize = 16;

/// [`Allocator`] handle over a shared [`ChunkHeap`].
///
/// Each allocation takes one best fit block, padded so the returned pointer
/// can be aligned inside it.
pub struct ChunkAllocator<'heap> {
    heap: &'heap RefCell<ChunkHeap>,
    // aligned address handed out -> start of the block backing it
    records: RefCell<HashMap<usize, NonNull<u8>, FxBuildHasher>>,
}

impl<'heap> ChunkAllocator<'heap> {
    pub fn new(heap: &'heap RefCell<ChunkHeap>) -> Self {
        Self {
            heap,
            records: RefCell::new(HashMap::default()),
        }
    }

    /// Allocations currently handed out.
    pub fn outstanding(&self) -> usize {
        self.records.borrow().len()
    }
}

// SAFETY: returned pointers are aligned and point into blocks that stay
// reserved until `deallocate`, the `RefCell`s keep the bookkeeping unaliased
unsafe impl Allocator for ChunkAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            // SAFETY: alignment is never zero
            let dangling = unsafe { NonNull::new_unchecked(layout.align() as *mut u8) };
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }
        if layout.align() > MAX_ARENA_ALIGN {
            return Err(AllocError);
        }

        // keep every block a multiple of the object alignment so headers of
        // later objects stay aligned
        let padded = layout
            .size()
            .checked_add(layout.align() - 1)
            .map(|size| align_up(size, OBJECT_ALIGN))
            .ok_or(AllocError)?;
        let block = self
            .heap
            .borrow_mut()
            .allocate_block(padded)
            .ok_or(AllocError)?;

        let offset = block.as_ptr().align_offset(layout.align());
        // SAFETY: `offset < align`, the block was padded by `align - 1`
        let ptr = unsafe { block.add(offset) };
        self.records.borrow_mut().insert(ptr.as_ptr() as usize, block);

        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        let block = self.records.borrow_mut().remove(&(ptr.as_ptr() as usize));
        let Some(block) = block else {
            panic!("deallocate of {ptr:p} which this allocator never handed out")
        };
        self.heap.borrow_mut().free_block(block);
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use allocator_api2::vec::Vec;

    use crate::alloc::{ChunkHeap, ObjectHeap};

    use super::ChunkAllocator;

    #[test]
    fn vec_lives_in_the_arena() {
        let heap = RefCell::new(ChunkHeap::new(1024).unwrap());
        let allocator = ChunkAllocator::new(&heap);

        let mut numbers: Vec<u64, _> = Vec::new_in(&allocator);
        numbers.extend(0..16u64);
        assert_eq!(numbers.iter().sum::<u64>(), 120);
        assert_eq!(numbers.as_ptr() as usize % align_of::<u64>(), 0);
        assert!(heap.borrow().owns(numbers.as_ptr() as usize));
        assert_eq!(allocator.outstanding(), 1);

        drop(numbers);
        assert_eq!(allocator.outstanding(), 0);
        let heap = heap.borrow();
        assert_eq!(heap.free_bytes(), 1024);
        assert!(heap.is_tiled());
    }

    #[test]
    fn objects_and_raw_blocks_share_the_arena() {
        let heap = RefCell::new(ChunkHeap::new(256).unwrap());
        let allocator = ChunkAllocator::new(&heap);

        let object = heap.borrow_mut().allocate(8).unwrap();
        let mut bytes: Vec<u8, _> = Vec::with_capacity_in(13, &allocator);
        bytes.extend_from_slice(b"hello, arena!");

        let after = heap.borrow_mut().allocate(8).unwrap();
        assert_eq!(after.addr() % align_of::<u32>(), 0, "headers stay aligned");
        assert!(heap.borrow().contains(object));
        assert_eq!(&bytes[..], b"hello, arena!");
    }

    #[test]
    fn exhaustion_is_an_alloc_error() {
        let heap = RefCell::new(ChunkHeap::new(64).unwrap());
        let allocator = ChunkAllocator::new(&heap);

        let mut bytes: Vec<u8, _> = Vec::new_in(&allocator);
        assert!(bytes.try_reserve(1024).is_err());
    }
}
