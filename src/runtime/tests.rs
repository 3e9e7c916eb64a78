use rust_alloc::vec::Vec;

use crate::{
    alloc::{HeapKind, ObjectHeap},
    collectors::{Collector, GcKind, generational::GENERATIONS},
    config::Config,
    error::{HeapError, RuntimeError},
    object::{HEADER_SIZE, OBJECT_ALIGN, WORD_SIZE, address_of_object, align_up},
    stack::FrameLayout,
    testing::FakeFrame,
};

use super::Runtime;

fn config(gc: GcKind, heap: HeapKind, size: usize) -> Config {
    Config::default()
        .with_gc_kind(gc)
        .with_heap_kind(heap)
        .with_heap_size(size)
        .with_frame_layout(FrameLayout::locals_only())
}

#[test]
fn header_sits_in_front_of_every_payload() {
    for heap in [HeapKind::Host, HeapKind::Chunk] {
        let mut runtime = Runtime::new(config(GcKind::MarkSweep, heap, 4096)).unwrap();
        for size in [1, 3, 4, 5, 17, 64] {
            let object = runtime.allocate(size);
            let payload = object.payload_addr();
            assert_eq!(address_of_object(payload) + HEADER_SIZE, payload);
            assert_eq!(address_of_object(payload), object.addr());
            assert_eq!(object.size(), align_up(size, OBJECT_ALIGN));
            assert_eq!(runtime.object_of(payload), Some(object));
        }
        runtime.shutdown();
    }
}

#[test]
fn exhaustion_collects_and_retries() {
    let mut runtime = Runtime::new(config(GcKind::MarkSweep, HeapKind::Chunk, 128)).unwrap();
    // nothing is rooted, so every collection empties the arena
    for _ in 0..64 {
        runtime.allocate(24);
    }
    assert!(runtime.heap().len() <= 4);
}

#[test]
fn exhaustion_without_a_collector_is_an_error() {
    let mut runtime = Runtime::new(config(GcKind::None, HeapKind::Chunk, 64)).unwrap();
    for _ in 0..4 {
        runtime.try_allocate(8).unwrap();
    }
    assert_eq!(
        runtime.try_allocate(8),
        Err(RuntimeError::OutOfMemory {
            size: 8,
            collections: 1
        })
    );
}

#[test]
fn generational_retries_once_per_generation() {
    let mut runtime = Runtime::new(config(GcKind::Generational, HeapKind::Chunk, 64)).unwrap();
    let frame = FakeFrame::new(8);
    unsafe { runtime.push_frame(frame.base().as_ptr(), frame.size_bytes()) };

    // four rooted objects fill the young heap, the fifth promotes them
    for i in 0..5 {
        let object = runtime.try_allocate(8).unwrap();
        frame.set(i, object.payload_addr());
    }
    let gen_one = runtime.gc().as_generational().unwrap().gen_one();
    assert_eq!(gen_one.len(), 4);

    for i in 5..8 {
        let object = runtime.try_allocate(8).unwrap();
        frame.set(i, object.payload_addr());
    }
    assert_eq!(
        runtime.try_allocate(8),
        Err(RuntimeError::OutOfMemory {
            size: 8,
            collections: GENERATIONS
        })
    );

    // every root still resolves
    for i in 0..8 {
        assert!(runtime.object_of(frame.get(i)).is_some());
    }
}

#[test]
fn moving_collectors_get_a_chunk_heap() {
    let runtime = Runtime::new(config(GcKind::Copying, HeapKind::Host, 1024)).unwrap();
    assert_eq!(runtime.heap().kind(), HeapKind::Chunk);
    assert_eq!(runtime.config().heap_kind(), HeapKind::Chunk);
    assert_eq!(runtime.gc().kind(), GcKind::Copying);
}

#[test]
fn unsupported_configurations_are_errors() {
    assert_eq!(
        Runtime::new(config(GcKind::MarkSweep, HeapKind::Buddy, 1024)).unwrap_err(),
        RuntimeError::Heap(HeapError::Unsupported(HeapKind::Buddy))
    );
    assert_eq!(
        Runtime::new(config(GcKind::MarkSweep, HeapKind::Chunk, 0)).unwrap_err(),
        RuntimeError::Heap(HeapError::ZeroArenaSize)
    );
}

#[test]
fn arrays_carry_their_length() {
    let mut runtime = Runtime::new(config(GcKind::MarkSweep, HeapKind::Host, 0)).unwrap();
    let array = runtime.allocate_array(4, 5);
    assert_eq!(array.read_word(0), 5);
    assert_eq!(array.size(), align_up(WORD_SIZE + 20, OBJECT_ALIGN));
    assert!(array.payload_bytes()[WORD_SIZE..].iter().all(|&b| b == 0));

    assert_eq!(
        runtime.try_allocate_array(usize::MAX, 2),
        Err(RuntimeError::ArrayTooLarge {
            elem_size: usize::MAX,
            len: 2
        })
    );
}

#[test]
fn reference_counts_through_payload_pointers() {
    let mut runtime = Runtime::new(config(GcKind::RefCount, HeapKind::Chunk, 1024)).unwrap();
    let list: Vec<_> = (0..3).map(|_| runtime.allocate(WORD_SIZE)).collect();
    // list[0] -> list[1] -> list[2]
    list[0].write_word(0, list[1].payload_addr());
    list[1].write_word(0, list[2].payload_addr());
    for object in &list {
        runtime.ref_incr(object.payload().as_ptr());
    }

    runtime.ref_incr(core::ptr::null());
    runtime.ref_decr(core::ptr::null());
    assert_eq!(runtime.heap().len(), 3);

    runtime.ref_decr(list[0].payload().as_ptr());
    assert!(runtime.heap().is_empty());
    assert_eq!(runtime.heap().as_chunk().unwrap().free_bytes(), 1024);
}

#[test]
#[should_panic(expected = "is not live")]
fn reference_to_a_non_object_panics() {
    let mut runtime = Runtime::new(config(GcKind::RefCount, HeapKind::Host, 0)).unwrap();
    let object = runtime.allocate(16);
    runtime.ref_incr(object.payload().as_ptr().wrapping_add(4));
}

#[test]
fn null_frames_are_ignored() {
    let mut runtime = Runtime::new(config(GcKind::MarkSweep, HeapKind::Host, 0)).unwrap();
    unsafe { runtime.push_frame(core::ptr::null_mut(), 64) };
    assert!(runtime.gc().as_mark_sweep().unwrap().stack().is_empty());
}

#[test]
fn copying_runtime_keeps_rooted_data() {
    let mut runtime = Runtime::new(config(GcKind::Copying, HeapKind::Chunk, 256)).unwrap();
    let frame = FakeFrame::new(1);
    unsafe { runtime.push_frame(frame.base().as_ptr(), frame.size_bytes()) };

    let kept = runtime.allocate(16);
    kept.write_word(0, 1234);
    frame.set(0, kept.payload_addr());

    // churn through several arena's worth of garbage
    for _ in 0..40 {
        runtime.allocate(40);
    }

    let kept = runtime.object_of(frame.get(0)).unwrap();
    assert_eq!(kept.read_word(0), 1234);
    runtime.pop_frame();
    runtime.collect();
    assert!(runtime.heap().is_empty());
}
