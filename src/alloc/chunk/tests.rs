use core::ptr::NonNull;

use rust_alloc::vec::Vec;

use crate::{
    alloc::ObjectHeap,
    error::HeapError,
    object::{HEADER_SIZE, ObjectSpace, WORD_SIZE},
    stack::{FrameLayout, ShadowStack},
    testing::FakeFrame,
};

use super::{ChunkBlock, ChunkHeap};

fn layout(heap: &ChunkHeap) -> Vec<(usize, usize, bool)> {
    heap.blocks()
        .map(|b| (b.offset(), b.size(), b.in_use()))
        .collect()
}

fn release(heap: &mut ChunkHeap, block: NonNull<u8>) {
    unsafe { heap.release_block(block, 0) };
}

#[test]
fn zero_sized_arena_is_rejected() {
    assert!(matches!(ChunkHeap::new(0), Err(HeapError::ZeroArenaSize)));
}

#[test]
fn fresh_arena_is_one_free_block() {
    let heap = ChunkHeap::new(512).unwrap();
    assert_eq!(layout(&heap), [(0, 512, false)]);
    assert_eq!(heap.capacity(), 512);
    assert_eq!(heap.largest_free_block(), 512);
    assert!(heap.is_tiled());
}

#[test]
fn best_fit_picks_the_smallest_block() {
    // free blocks of 40, 12 and 64 bytes kept apart by used separators
    let mut heap = ChunkHeap::new(40 + 8 + 12 + 8 + 64).unwrap();
    let forty = heap.allocate_block(40).unwrap();
    heap.allocate_block(8).unwrap();
    let twelve = heap.allocate_block(12).unwrap();
    heap.allocate_block(8).unwrap();
    let sixty_four = heap.allocate_block(64).unwrap();
    assert!(heap.allocate_block(1).is_none());

    release(&mut heap, forty);
    release(&mut heap, twelve);
    release(&mut heap, sixty_four);

    let chosen = heap.allocate_block(10).unwrap();
    assert_eq!(chosen, twelve);
    assert_eq!(
        layout(&heap),
        [
            (0, 40, false),
            (40, 8, true),
            (48, 10, true),
            (58, 2, false),
            (60, 8, true),
            (68, 64, false),
        ]
    );
}

#[test]
fn exact_fit_is_marked_in_use() {
    let mut heap = ChunkHeap::new(64).unwrap();
    let block = heap.allocate_block(64).unwrap();
    assert_eq!(layout(&heap), [(0, 64, true)]);
    assert!(heap.allocate_block(4).is_none());

    release(&mut heap, block);
    assert_eq!(layout(&heap), [(0, 64, false)]);
}

#[test]
fn blocks_tile_the_arena_through_churn() {
    for coalesce in [true, false] {
        let mut heap = ChunkHeap::new(2048).unwrap().with_coalescing(coalesce);
        let mut live = Vec::new();
        for round in 0..200usize {
            let size = 4 + (round * 7) % 60;
            if let Some(object) = heap.allocate(size) {
                live.push(object);
            }
            if round % 3 == 0 && !live.is_empty() {
                let victim = live.swap_remove((round / 3) % live.len());
                heap.free(victim);
            }
            assert!(heap.is_tiled(), "tiling broken at round {round}");
            let total: usize = heap.blocks().map(|b| b.size()).sum();
            assert_eq!(total, heap.capacity());
        }
    }
}

#[test]
fn freed_neighbours_merge() {
    let mut heap = ChunkHeap::new(96).unwrap();
    let a = heap.allocate_block(32).unwrap();
    let b = heap.allocate_block(32).unwrap();
    let c = heap.allocate_block(32).unwrap();

    release(&mut heap, a);
    release(&mut heap, c);
    assert_eq!(layout(&heap), [(0, 32, false), (32, 32, true), (64, 32, false)]);

    release(&mut heap, b);
    assert_eq!(layout(&heap), [(0, 96, false)]);
    assert!(heap.allocate_block(96).is_some());
}

#[test]
fn without_coalescing_fragments_stay_apart() {
    let mut heap = ChunkHeap::new(96).unwrap().with_coalescing(false);
    let blocks: Vec<_> = (0..3).map(|_| heap.allocate_block(32).unwrap()).collect();
    for block in blocks {
        release(&mut heap, block);
    }

    assert_eq!(
        layout(&heap),
        [(0, 32, false), (32, 32, false), (64, 32, false)]
    );
    assert_eq!(heap.free_bytes(), 96);
    assert_eq!(heap.largest_free_block(), 32);
    assert!(heap.allocate_block(64).is_none());
}

#[test]
#[should_panic(expected = "double free")]
fn freeing_a_free_block_panics() {
    let mut heap = ChunkHeap::new(64).unwrap().with_coalescing(false);
    let block = heap.allocate_block(16).unwrap();
    heap.free_block(block);
    heap.free_block(block);
}

#[test]
#[should_panic(expected = "outside the chunk arena")]
fn freeing_outside_the_arena_panics() {
    let mut heap = ChunkHeap::new(64).unwrap();
    let mut other = ChunkHeap::new(64).unwrap();
    let foreign = other.allocate_block(16).unwrap();
    heap.free_block(foreign);
}

#[test]
fn reset_forgets_objects() {
    let mut heap = ChunkHeap::new(128).unwrap();
    let object = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();

    heap.reset();
    assert!(heap.is_empty());
    assert_eq!(heap.resolve(object.payload_addr()), None);
    assert_eq!(layout(&heap), [(0, 128, false)]);
}

#[test]
fn owns_covers_exactly_the_arena() {
    let mut heap = ChunkHeap::new(64).unwrap();
    let first = heap.allocate(8).unwrap();
    let start = first.addr();
    assert!(heap.owns(start));
    assert!(heap.owns(start + 63));
    assert!(!heap.owns(start + 64));
    assert!(!heap.owns(start.wrapping_sub(1)));
}

#[test]
fn chunk_block_accessors() {
    let block = ChunkBlock::free(16, 8);
    assert_eq!(block.offset(), 16);
    assert_eq!(block.end(), 24);
    assert!(!block.in_use());
    assert!(block.contains(23));
    assert!(!block.contains(24));
}

fn rooted(stack: &mut ShadowStack, frame: &FakeFrame) {
    unsafe { stack.push(frame.base(), frame.size_bytes()) };
}

#[test]
fn purify_moves_marked_objects_and_fixes_references() {
    let mut src = ChunkHeap::new(256).unwrap();
    let mut dst = ChunkHeap::new(256).unwrap();

    let dead = src.allocate(WORD_SIZE).unwrap();
    let a = src.allocate(2 * WORD_SIZE).unwrap();
    let b = src.allocate(WORD_SIZE).unwrap();
    a.write_word(0, b.payload_addr());
    a.write_word(1, 77);
    b.write_word(0, a.payload_addr());
    b.header().set_ref_count(3);
    a.set_marked(true);
    b.set_marked(true);

    let frame = FakeFrame::new(2);
    frame.set(0, a.payload_addr());
    frame.set(1, 12345);
    let mut stack = ShadowStack::new(FrameLayout::locals_only());
    rooted(&mut stack, &frame);

    assert!(src.purify(&mut dst, &stack));
    assert_eq!(dst.len(), 2);
    assert!(src.contains(dead), "purify leaves the source to the caller");

    let new_a = dst.resolve(frame.get(0)).unwrap();
    let new_b = dst.resolve(new_a.read_word(0)).unwrap();
    assert_eq!(new_a.read_word(1), 77);
    assert_eq!(dst.resolve(new_b.read_word(0)), Some(new_a), "cycle fixed up");
    assert_eq!(frame.get(1), 12345, "non references are left alone");

    assert_eq!(new_b.ref_count(), 3);
    assert_eq!(new_a.age(), 1);
    assert!(!new_a.is_marked() && !new_b.is_marked());

    // copies are packed in address order
    assert_eq!(dst.objects().iter().collect::<Vec<_>>(), [new_a, new_b]);
    assert_eq!(
        layout(&dst)[..2],
        [
            (0, 2 * WORD_SIZE + HEADER_SIZE, true),
            (2 * WORD_SIZE + HEADER_SIZE, WORD_SIZE + HEADER_SIZE, true),
        ]
    );
}

#[test]
fn failed_purify_leaves_both_heaps_untouched() {
    for coalesce in [true, false] {
        let mut src = ChunkHeap::new(256).unwrap();
        // room for exactly one copy
        let mut dst = ChunkHeap::new(16 + HEADER_SIZE)
            .unwrap()
            .with_coalescing(coalesce);

        let a = src.allocate(16).unwrap();
        let b = src.allocate(16).unwrap();
        a.write_word(0, b.payload_addr());
        a.set_marked(true);
        b.set_marked(true);

        let frame = FakeFrame::new(1);
        frame.set(0, a.payload_addr());
        let mut stack = ShadowStack::new(FrameLayout::locals_only());
        rooted(&mut stack, &frame);

        assert!(!src.purify(&mut dst, &stack));
        assert!(dst.is_empty());
        assert_eq!(layout(&dst), [(0, 16 + HEADER_SIZE, false)]);
        assert_eq!(frame.get(0), a.payload_addr());
        assert_eq!(a.read_word(0), b.payload_addr());
        assert!(a.is_marked() && b.is_marked(), "marks survive for the fallback sweep");
    }
}

#[test]
fn failed_purify_does_not_fragment_the_destination() {
    let mut src = ChunkHeap::new(256).unwrap();
    let mut dst = ChunkHeap::new(3 * (8 + HEADER_SIZE))
        .unwrap()
        .with_coalescing(false);
    for _ in 0..4 {
        src.allocate(8).unwrap().set_marked(true);
    }
    let before = layout(&dst);

    let stack = ShadowStack::new(FrameLayout::locals_only());
    assert!(!src.purify(&mut dst, &stack));
    assert_eq!(layout(&dst), before);
    assert_eq!(dst.largest_free_block(), dst.capacity());
    assert!(dst.allocate(24).is_some());
}

#[test]
fn purify_skips_unmarked_and_non_object_blocks() {
    let mut src = ChunkHeap::new(256).unwrap();
    let mut dst = ChunkHeap::new(256).unwrap();
    src.allocate_block(24).unwrap();
    let kept = src.allocate(8).unwrap();
    src.allocate(8).unwrap();
    kept.set_marked(true);

    let stack = ShadowStack::new(FrameLayout::locals_only());
    assert!(src.purify(&mut dst, &stack));
    assert_eq!(dst.len(), 1);
}
