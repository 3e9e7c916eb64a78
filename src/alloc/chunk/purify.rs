use hashbrown::{HashMap, HashSet};
use rust_alloc::vec::Vec;
use rustc_hash::FxBuildHasher;

use super::ChunkHeap;
use crate::{
    alloc::ObjectHeap,
    object::{ObjectRef, Slot},
    stack::ShadowStack,
};

impl ChunkHeap {
    /// Moves every marked object of this heap into `dst` and rewrites the
    /// references reachable from `stack` to point at the copies.
    ///
    /// Copies are laid out in address order, keep their reference count and
    /// are one generation older. Returns `false` if `dst` runs out of room,
    /// in which case the copies made so far are freed again, `dst` gets back
    /// its original block list, no reference is rewritten and this heap is
    /// left as it was.
    pub fn purify(&mut self, dst: &mut ChunkHeap, stack: &ShadowStack) -> bool {
        let live: Vec<ObjectRef> = self
            .blocks()
            .filter(|block| block.in_use())
            .filter_map(|block| self.object_at(&block))
            .filter(ObjectRef::is_marked)
            .collect();

        // freeing the copies alone would leave split blocks behind when `dst`
        // does not coalesce
        let saved_blocks = dst.blocks.clone();
        let mut moved: HashMap<usize, ObjectRef, FxBuildHasher> =
            HashMap::with_capacity_and_hasher(live.len(), FxBuildHasher);
        for from in live {
            let Some(to) = dst.allocate(from.size()) else {
                tracing::debug!(
                    copied = moved.len(),
                    size = from.size(),
                    "purify destination exhausted, undoing copies"
                );
                for &to in moved.values() {
                    dst.free(to);
                }
                dst.blocks = saved_blocks;
                debug_assert!(dst.is_tiled());
                return false;
            };

            // SAFETY: both payloads are `from.size()` bytes in distinct blocks.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    from.payload().as_ptr(),
                    to.payload().as_ptr(),
                    from.size(),
                );
            }
            to.header().set_ref_count(from.ref_count());
            to.header().set_age(from.age().saturating_add(1));
            tracing::trace!(from = ?from, to = ?to, "moved");
            moved.insert(from.addr(), to);
        }

        // payloads of the copies still hold old addresses, so the fix-up pass
        // descends through the copies and fixes them as well
        let mut visited: HashSet<usize, FxBuildHasher> = HashSet::default();
        let space = (&*self, &*dst);
        stack.traverse(&space, &mut |object: ObjectRef, slot: Slot| {
            let target = match moved.get(&object.addr()) {
                Some(&to) => {
                    slot.set(to.payload_addr());
                    to
                }
                None => object,
            };
            visited.insert(target.addr()).then_some(target)
        });

        tracing::debug!(moved = moved.len(), "purify complete");
        true
    }
}
