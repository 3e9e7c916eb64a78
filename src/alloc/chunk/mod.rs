//! A fixed size arena carved into best fit blocks
//!
//! The arena is one buffer obtained at creation. It is partitioned into an
//! address ordered list of [`ChunkBlock`]s that always tiles the whole buffer:
//! allocation splits the smallest free block that fits, freeing flips a block
//! back to free and, unless disabled, merges it with free neighbours.

use core::{fmt, ptr::NonNull};

use rust_alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};

use super::{HeapKind, ObjectHeap, ObjectList};
use crate::{
    error::HeapError,
    list::{LinkList, NodeId},
    object::{ObjectRef, ObjectSpace},
};

mod purify;

#[cfg(test)]
mod tests;

const ARENA_ALIGN: usize = 16;

/// A partition record of a chunk heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBlock {
    offset: usize,
    size: usize,
    in_use: bool,
}

impl ChunkBlock {
    const fn free(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            in_use: false,
        }
    }

    /// Offset of the block from the start of the arena.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    /// One past the last byte of the block.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    fn contains(&self, offset: usize) -> bool {
        (self.offset..self.end()).contains(&offset)
    }
}

pub struct ChunkHeap {
    buffer: NonNull<u8>,
    layout: Layout,
    blocks: LinkList<ChunkBlock>,
    objects: ObjectList,
    coalesce: bool,
}

impl ChunkHeap {
    /// Obtains a zeroed arena of `size` bytes holding a single free block.
    pub fn new(size: usize) -> Result<Self, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroArenaSize);
        }
        let layout = Layout::from_size_align(size, ARENA_ALIGN)?;
        // SAFETY: the layout has a non-zero size.
        let buffer = unsafe {
            let Some(buffer) = NonNull::new(alloc_zeroed(layout)) else {
                handle_alloc_error(layout)
            };
            buffer
        };

        let mut blocks = LinkList::new();
        blocks.push_back(ChunkBlock::free(0, size));

        tracing::debug!(size, "chunk arena initialized");
        Ok(Self {
            buffer,
            layout,
            blocks,
            objects: ObjectList::new(),
            coalesce: true,
        })
    }

    /// Whether freed blocks are merged with free neighbours.
    pub fn with_coalescing(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn coalescing(&self) -> bool {
        self.coalesce
    }

    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// The blocks in address order.
    pub fn blocks(&self) -> impl DoubleEndedIterator<Item = ChunkBlock> + '_ {
        self.blocks.iter().copied()
    }

    pub fn free_bytes(&self) -> usize {
        self.blocks().filter(|b| !b.in_use).map(|b| b.size).sum()
    }

    pub fn largest_free_block(&self) -> usize {
        self.blocks()
            .filter(|b| !b.in_use)
            .map(|b| b.size)
            .max()
            .unwrap_or(0)
    }

    /// Whether `addr` lies inside the arena.
    pub fn owns(&self, addr: usize) -> bool {
        let start = self.buffer.as_ptr() as usize;
        (start..start + self.capacity()).contains(&addr)
    }

    /// Whether the blocks cover the arena exactly, without gaps or overlaps.
    pub fn is_tiled(&self) -> bool {
        let mut expected = 0;
        for block in self.blocks() {
            if block.offset != expected || block.size == 0 {
                return false;
            }
            expected = block.end();
        }
        expected == self.capacity()
    }

    /// Forgets every object and returns the arena to one free block.
    ///
    /// References into the arena become dangling.
    pub fn reset(&mut self) {
        tracing::debug!(objects = self.objects.len(), "chunk arena reset");
        self.objects.clear();
        self.blocks.clear();
        self.blocks.push_back(ChunkBlock::free(0, self.capacity()));
    }

    /// Marks the in-use block containing `ptr` as free.
    ///
    /// Panics if `ptr` is outside the arena or its block is already free.
    pub fn free_block(&mut self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        assert!(self.owns(addr), "free of {addr:#x} outside the chunk arena");
        let offset = addr - self.buffer.as_ptr() as usize;

        let id = self
            .blocks
            .ids()
            .find(|&id| self.blocks[id].contains(offset))
            .expect("blocks tile the arena");
        let block = &mut self.blocks[id];
        assert!(block.in_use, "block at offset {offset:#x} is already free; double free?");
        block.in_use = false;

        if self.coalesce {
            self.merge_neighbours(id);
        }
        debug_assert!(self.is_tiled());
    }

    /// Smallest free block of at least `size` bytes. The first one wins a tie.
    fn best_fit(&self, size: usize) -> Option<NodeId> {
        let mut best: Option<(NodeId, usize)> = None;
        for id in self.blocks.ids() {
            let block = self.blocks[id];
            if block.in_use || block.size < size {
                continue;
            }
            if best.is_none_or(|(_, best_size)| block.size < best_size) {
                best = Some((id, block.size));
            }
        }
        best.map(|(id, _)| id)
    }

    fn merge_neighbours(&mut self, id: NodeId) {
        if let Some(next) = self.blocks.next(id)
            && !self.blocks[next].in_use
        {
            let absorbed = self.blocks.remove(next).map_or(0, |b| b.size);
            self.blocks[id].size += absorbed;
        }

        if let Some(prev) = self.blocks.prev(id)
            && !self.blocks[prev].in_use
        {
            let absorbed = self.blocks.remove(id).map_or(0, |b| b.size);
            self.blocks[prev].size += absorbed;
        }
    }

    fn object_at(&self, block: &ChunkBlock) -> Option<ObjectRef> {
        self.objects.find(self.buffer.as_ptr() as usize + block.offset)
    }
}

impl ObjectSpace for ChunkHeap {
    fn find_object(&self, addr: usize) -> Option<ObjectRef> {
        self.objects.find(addr)
    }
}

impl ObjectHeap for ChunkHeap {
    fn kind(&self) -> HeapKind {
        HeapKind::Chunk
    }

    fn allocate_block(&mut self, size: usize) -> Option<NonNull<u8>> {
        let Some(id) = self.best_fit(size) else {
            tracing::debug!(
                size,
                largest_free = self.largest_free_block(),
                "no free block large enough"
            );
            return None;
        };

        let block = &mut self.blocks[id];
        let offset = block.offset;
        let remainder = block.size - size;
        block.size = size;
        block.in_use = true;
        if remainder > 0 {
            self.blocks
                .insert_after(id, ChunkBlock::free(offset + size, remainder));
        }
        debug_assert!(self.is_tiled());

        // SAFETY: the block lies inside the buffer.
        Some(unsafe { self.buffer.add(offset) })
    }

    unsafe fn release_block(&mut self, block: NonNull<u8>, _size: usize) {
        self.free_block(block);
    }

    fn objects(&self) -> &ObjectList {
        &self.objects
    }

    fn objects_mut(&mut self) -> &mut ObjectList {
        &mut self.objects
    }
}

impl fmt::Debug for ChunkHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkHeap")
            .field("buffer", &self.buffer)
            .field("capacity", &self.capacity())
            .field("blocks", &self.blocks.len())
            .field("objects", &self.objects.len())
            .field("coalesce", &self.coalesce)
            .finish()
    }
}

impl fmt::Display for ChunkHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "chunk heap at {:p}: {} bytes, {} free, {} blocks, {} live objects",
            self.buffer,
            self.capacity(),
            self.free_bytes(),
            self.blocks.len(),
            self.objects.len()
        )?;
        for block in self.blocks() {
            let state = if block.in_use { "used" } else { "free" };
            write!(f, "  [{:#07x} +{:<6}] {state}", block.offset, block.size)?;
            match self.object_at(&block) {
                Some(object) => writeln!(f, " {object}")?,
                None => writeln!(f)?,
            }
        }
        Ok(())
    }
}

impl Drop for ChunkHeap {
    fn drop(&mut self) {
        // objects own no host memory of their own, forgetting them is enough
        self.objects.clear();
        // SAFETY: the buffer was allocated with this layout in `new`.
        unsafe { dealloc(self.buffer.as_ptr(), self.layout) };
    }
}
