//! Heaps that hand out garbage collectible objects
//!
//! Two backends implement the [`ObjectHeap`] contract: [`HostHeap`] passes
//! every allocation through to the global allocator and [`ChunkHeap`] carves
//! objects out of one fixed arena. [`Heap`] is the closed set of backends the
//! runtime can select at startup.

use core::{fmt, ptr::NonNull, str::FromStr};

use hashbrown::HashMap;
use rust_alloc::string::ToString;
use rustc_hash::FxBuildHasher;

use crate::{
    error::{ConfigError, HeapError},
    list::{LinkList, NodeId},
    object::{HEADER_SIZE, OBJECT_ALIGN, ObjectHeader, ObjectRef, ObjectSpace},
};

pub mod chunk;
pub mod host;

#[cfg(feature = "allocator_api")]
pub mod chunk_allocator;

pub use chunk::{ChunkBlock, ChunkHeap};
pub use host::HostHeap;

/// Default arena size, 64 KiB.
pub const DEFAULT_HEAP_SIZE: usize = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapKind {
    /// One host allocation per object.
    #[default]
    Host,
    /// One contiguous arena with best fit blocks.
    Chunk,
    /// Power-of-two free lists. Reserved, creating one is an error.
    Buddy,
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Chunk => "chunk",
            Self::Buddy => "buddy",
        })
    }
}

impl FromStr for HeapKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "stl" => Ok(Self::Host),
            "chunk" => Ok(Self::Chunk),
            "buddy" => Ok(Self::Buddy),
            _ => Err(ConfigError::UnknownHeapKind(s.to_string())),
        }
    }
}

/// The live objects of a heap, in allocation order, indexed by header address.
#[derive(Debug, Default)]
pub struct ObjectList {
    order: LinkList<ObjectRef>,
    index: HashMap<usize, NodeId, FxBuildHasher>,
}

impl ObjectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn insert(&mut self, object: ObjectRef) {
        let id = self.order.push_back(object);
        let previous = self.index.insert(object.addr(), id);
        assert!(previous.is_none(), "object {object:?} tracked twice");
    }

    /// Returns `false` when the object was not tracked.
    pub fn remove(&mut self, object: ObjectRef) -> bool {
        match self.index.remove(&object.addr()) {
            Some(id) => {
                self.order.remove(id);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, addr: usize) -> Option<ObjectRef> {
        self.index.get(&addr).map(|&id| self.order[id])
    }

    pub fn contains(&self, object: ObjectRef) -> bool {
        self.index.contains_key(&object.addr())
    }

    /// Live objects in allocation order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = ObjectRef> + '_ {
        self.order.iter().copied()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::HostHeap {}
    impl Sealed for super::ChunkHeap {}
    impl Sealed for super::Heap {}
}

/// The heap contract shared by every backend.
///
/// Backends supply raw blocks and a live list, the provided methods lay
/// objects out on top of them.
pub trait ObjectHeap: ObjectSpace + sealed::Sealed {
    fn kind(&self) -> HeapKind;

    /// Hands out a block of exactly `size` bytes, or `None` when exhausted.
    fn allocate_block(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `block` must have come from `allocate_block(size)` on this heap and
    /// must not be used afterwards.
    unsafe fn release_block(&mut self, block: NonNull<u8>, size: usize);

    fn objects(&self) -> &ObjectList;

    fn objects_mut(&mut self) -> &mut ObjectList;

    /// Allocates a zeroed object with at least `size` payload bytes.
    ///
    /// Returns `None` on exhaustion, the caller is expected to collect and
    /// try again.
    fn allocate(&mut self, size: usize) -> Option<ObjectRef> {
        assert!(size > 0, "zero sized allocation");
        // requests too large for a header can never be satisfied
        let size = size.checked_next_multiple_of(OBJECT_ALIGN)?;
        let header_size = u32::try_from(size).ok()?;
        let full_size = size.checked_add(HEADER_SIZE)?;

        tracing::trace!(full_size, "try alloc");
        let block = self.allocate_block(full_size)?;

        let header = block.cast::<ObjectHeader>();
        // SAFETY: the block is `full_size` writable bytes owned by this heap.
        let object = unsafe {
            header.write(ObjectHeader::new(header_size));
            core::ptr::write_bytes(block.add(HEADER_SIZE).as_ptr(), 0, size);
            ObjectRef::from_raw(header)
        };

        tracing::trace!(object = ?object, payload = object.payload_addr(), "alloc success");
        self.objects_mut().insert(object);
        Some(object)
    }

    /// Returns `object` to the heap.
    ///
    /// Panics if `object` is not live on this heap.
    fn free(&mut self, object: ObjectRef) {
        assert!(
            self.objects_mut().remove(object),
            "free of {object:?} which is not live on this {} heap; double free?",
            self.kind()
        );
        let full_size = object.size() + HEADER_SIZE;
        tracing::trace!(object = ?object, full_size, "free");
        // SAFETY: the object was live, so its block came from this heap.
        unsafe { self.release_block(object.as_ptr().cast(), full_size) };
    }

    /// Frees every live object.
    fn clear(&mut self) {
        loop {
            let last = self.objects().iter().next_back();
            let Some(object) = last else { break };
            self.free(object);
        }
    }

    fn contains(&self, object: ObjectRef) -> bool {
        self.objects().contains(object)
    }

    fn len(&self) -> usize {
        self.objects().len()
    }

    fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    /// Bytes held by live objects, headers included.
    fn live_bytes(&self) -> usize {
        self.objects().iter().map(|o| o.size() + HEADER_SIZE).sum()
    }
}

/// The heap backends the runtime can run on.
#[derive(Debug)]
pub enum Heap {
    Host(HostHeap),
    Chunk(ChunkHeap),
}

impl Heap {
    /// Creates a heap of the given kind. `size` is the arena size of chunk heaps.
    pub fn new(kind: HeapKind, size: usize, coalesce: bool) -> Result<Self, HeapError> {
        let heap = match kind {
            HeapKind::Host => Self::Host(HostHeap::new()),
            HeapKind::Chunk => Self::Chunk(ChunkHeap::new(size)?.with_coalescing(coalesce)),
            HeapKind::Buddy => return Err(HeapError::Unsupported(kind)),
        };
        tracing::info!(%kind, size, "heap created");
        Ok(heap)
    }

    pub fn as_host(&self) -> Option<&HostHeap> {
        match self {
            Self::Host(heap) => Some(heap),
            Self::Chunk(_) => None,
        }
    }

    pub fn as_chunk(&self) -> Option<&ChunkHeap> {
        match self {
            Self::Chunk(heap) => Some(heap),
            Self::Host(_) => None,
        }
    }

    pub fn as_chunk_mut(&mut self) -> Option<&mut ChunkHeap> {
        match self {
            Self::Chunk(heap) => Some(heap),
            Self::Host(_) => None,
        }
    }

    /// Logs the heap contents.
    pub fn dump(&self) {
        tracing::info!("{self}");
    }

    /// Frees every object, then releases the backend.
    pub fn destroy(mut self) {
        tracing::debug!(kind = %self.kind(), objects = self.len(), "destroying heap");
        self.clear();
    }
}

impl From<HostHeap> for Heap {
    fn from(heap: HostHeap) -> Self {
        Self::Host(heap)
    }
}

impl From<ChunkHeap> for Heap {
    fn from(heap: ChunkHeap) -> Self {
        Self::Chunk(heap)
    }
}

impl ObjectSpace for Heap {
    fn find_object(&self, addr: usize) -> Option<ObjectRef> {
        self.objects().find(addr)
    }
}

impl ObjectHeap for Heap {
    fn kind(&self) -> HeapKind {
        match self {
            Self::Host(heap) => heap.kind(),
            Self::Chunk(heap) => heap.kind(),
        }
    }

    fn allocate_block(&mut self, size: usize) -> Option<NonNull<u8>> {
        match self {
            Self::Host(heap) => heap.allocate_block(size),
            Self::Chunk(heap) => heap.allocate_block(size),
        }
    }

    unsafe fn release_block(&mut self, block: NonNull<u8>, size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe {
            match self {
                Self::Host(heap) => heap.release_block(block, size),
                Self::Chunk(heap) => heap.release_block(block, size),
            }
        }
    }

    fn objects(&self) -> &ObjectList {
        match self {
            Self::Host(heap) => heap.objects(),
            Self::Chunk(heap) => heap.objects(),
        }
    }

    fn objects_mut(&mut self) -> &mut ObjectList {
        match self {
            Self::Host(heap) => heap.objects_mut(),
            Self::Chunk(heap) => heap.objects_mut(),
        }
    }
}

impl fmt::Display for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(heap) => fmt::Display::fmt(heap, f),
            Self::Chunk(heap) => fmt::Display::fmt(heap, f),
        }
    }
}
