//! The shadow stack and conservative root scanning
//!
//! Compiled code pushes a descriptor for every frame it enters and pops it on
//! exit. A collection walks the frames newest to oldest and treats every word
//! of each frame's register window and local area as a possible reference.
//! A word is a reference only if backtracking by `HEADER_SIZE` lands exactly
//! on a live object, so integers that happen to look like addresses are
//! filtered out. Found objects are scanned the same way, word by word,
//! transitively.
//!
//! This module is the only place that interprets raw frame bytes. The byte
//! layout the code generator uses is described by [`FrameLayout`].

use core::ptr::NonNull;

use rust_alloc::vec::Vec;

use crate::{
    list::LinkList,
    object::{ObjectRef, ObjectSpace, Slot, WORD_SIZE, align_up},
};


/// The frame layout contract between the code generator and the scanner.
///
/// A frame starts with `register_words` scanned words. Local variables are
/// addressed from the far end of the frame: with
/// `n = (size - locals_offset) / WORD_SIZE` locals, they occupy the `n` words
/// ending at `align_up(size, frame_align)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    register_words: usize,
    locals_offset: usize,
    frame_align: usize,
}

impl FrameLayout {
    /// A register window save area.
    ///
    /// 8 local registers and 8 in registers, of which the frame pointer and
    /// return address are skipped, then one aggregate return slot and six
    /// argument slots that are not scanned, then the locals.
    pub const fn register_window() -> Self {
        Self {
            register_words: 8 + 6,
            locals_offset: (8 + 8 + 1 + 6) * WORD_SIZE,
            frame_align: 8,
        }
    }

    /// Every word of the frame is a local.
    pub const fn locals_only() -> Self {
        Self {
            register_words: 0,
            locals_offset: 0,
            frame_align: WORD_SIZE,
        }
    }

    pub const fn register_words(&self) -> usize {
        self.register_words
    }

    /// Byte offset of the local area, the smallest valid frame size.
    pub const fn locals_offset(&self) -> usize {
        self.locals_offset
    }

    pub const fn frame_align(&self) -> usize {
        self.frame_align
    }

    /// Number of local words in a frame of `size` bytes.
    pub const fn local_count(&self, size: usize) -> usize {
        (size - self.locals_offset) / WORD_SIZE
    }

    /// Byte range of the local words in a frame of `size` bytes.
    pub const fn locals(&self, size: usize) -> core::ops::Range<usize> {
        let end = align_up(size, self.frame_align);
        end - self.local_count(size) * WORD_SIZE..end
    }

    /// Bytes the frame memory has to span for a frame of `size` bytes.
    pub const fn frame_extent(&self, size: usize) -> usize {
        align_up(size, self.frame_align)
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::register_window()
    }
}

/// A pushed frame descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    base: NonNull<u8>,
    size: usize,
}

impl StackFrame {
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Frame size before alignment.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Receives every reference the scanner finds.
pub trait SlotVisitor {
    /// Called with a live object and the slot that refers to it.
    ///
    /// The visitor may rewrite the slot. It returns the object whose payload
    /// should be scanned next, or `None` to stop descending here.
    fn visit(&mut self, object: ObjectRef, slot: Slot) -> Option<ObjectRef>;
}

impl<F> SlotVisitor for F
where
    F: FnMut(ObjectRef, Slot) -> Option<ObjectRef>,
{
    fn visit(&mut self, object: ObjectRef, slot: Slot) -> Option<ObjectRef> {
        self(object, slot)
    }
}

#[derive(Debug, Default)]
pub struct ShadowStack {
    frames: LinkList<StackFrame>,
    layout: FrameLayout,
}

impl ShadowStack {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            frames: LinkList::new(),
            layout,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames from oldest to newest. Reverse with `.rev()`.
    pub fn frames(&self) -> impl DoubleEndedIterator<Item = &StackFrame> + '_ {
        self.frames.iter()
    }

    /// Pushes the frame of a function being entered.
    ///
    /// Panics if `size` is smaller than the layout's locals offset.
    ///
    /// # Safety
    ///
    /// `frame` must be valid for reads and writes of
    /// `layout.frame_extent(size)` bytes until the frame is popped.
    pub unsafe fn push(&mut self, frame: NonNull<u8>, size: usize) {
        assert!(
            size >= self.layout.locals_offset,
            "stack frame of {size} bytes is smaller than its {} byte register area",
            self.layout.locals_offset
        );
        tracing::trace!(frame = ?frame, size, "stack frame push");
        self.frames.push_back(StackFrame { base: frame, size });
    }

    /// Pops the newest frame.
    ///
    /// Panics if no frame is pushed.
    pub fn pop(&mut self) -> StackFrame {
        let Some(frame) = self.frames.pop_back() else {
            panic!("pop of an empty shadow stack")
        };
        tracing::trace!(frame = ?frame.base, "stack frame pop");
        frame
    }

    /// Walks every reference reachable from the pushed frames.
    ///
    /// Frames are visited newest to oldest. Each candidate word is resolved
    /// against `space`, and `visitor` decides which found objects get their
    /// payloads scanned in turn.
    pub fn traverse<S, V>(&self, space: &S, visitor: &mut V)
    where
        S: ObjectSpace + ?Sized,
        V: SlotVisitor + ?Sized,
    {
        let mut pending = Vec::new();
        for frame in self.frames.iter().rev() {
            tracing::trace!(frame = ?frame.base, size = frame.size, "scanning stack frame");
            for slot in self.root_slots(frame) {
                scan_slot(space, visitor, slot, &mut pending);
                while let Some(object) = pending.pop() {
                    for slot in object.slots() {
                        scan_slot(space, visitor, slot, &mut pending);
                    }
                }
            }
        }
    }

    fn root_slots<'a>(&self, frame: &'a StackFrame) -> impl Iterator<Item = Slot> + 'a {
        let registers = (0..self.layout.register_words).map(|i| i * WORD_SIZE);
        let locals = self.layout.locals(frame.size).step_by(WORD_SIZE);
        // SAFETY: `push` requires the whole frame extent to stay valid.
        registers
            .chain(locals)
            .map(move |offset| unsafe { Slot::new(frame.base.add(offset)) })
    }
}

fn scan_slot<S, V>(space: &S, visitor: &mut V, slot: Slot, pending: &mut Vec<ObjectRef>)
where
    S: ObjectSpace + ?Sized,
    V: SlotVisitor + ?Sized,
{
    let Some(object) = space.resolve(slot.get()) else {
        return;
    };
    tracing::trace!(object = ?object, slot = slot.addr(), "found reference");
    if let Some(next) = visitor.visit(object, slot) {
        pending.push(next);
    }
}
