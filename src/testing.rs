//! Helpers shared by the unit tests

use core::ptr::NonNull;

use rust_alloc::{boxed::Box, vec};

use crate::object::WORD_SIZE;

/// Word addressable memory standing in for a compiled function's frame.
pub(crate) struct FakeFrame {
    words: NonNull<[usize]>,
}

impl FakeFrame {
    pub(crate) fn new(words: usize) -> Self {
        let boxed = vec![0usize; words].into_boxed_slice();
        Self {
            words: NonNull::from(Box::leak(boxed)),
        }
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        self.words.cast()
    }

    pub(crate) fn size_bytes(&self) -> usize {
        self.words.len() * WORD_SIZE
    }

    pub(crate) fn get(&self, index: usize) -> usize {
        assert!(index < self.words.len());
        unsafe { self.words.cast::<usize>().add(index).read() }
    }

    pub(crate) fn set(&self, index: usize, word: usize) {
        assert!(index < self.words.len());
        unsafe { self.words.cast::<usize>().add(index).write(word) }
    }
}

impl Drop for FakeFrame {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.words.as_ptr()) });
    }
}
