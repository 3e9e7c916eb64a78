//! Object headers and references
//!
//! Every allocation is laid out as `[ ObjectHeader ][ payload ]`. The header
//! sits exactly `HEADER_SIZE` bytes before the payload on every heap kind, so
//! going from a payload pointer back to its header is plain address
//! arithmetic. The payload is what the compiled program sees.

use core::{cell::Cell, fmt, ptr::NonNull};

/// Payload sizes are rounded up to this many bytes.
pub const OBJECT_ALIGN: usize = 4;

/// Size of a machine word, the unit of conservative scanning.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Distance between an object's header and its payload.
pub const HEADER_SIZE: usize = size_of::<ObjectHeader>();

/// Largest value the 29 bit reference count can hold.
pub const MAX_REF_COUNT: u32 = (1 << 29) - 1;

/// Largest value the 2 bit age counter can hold.
pub const MAX_AGE: u8 = 0b11;

// bit 0: mark, bits 1-2: age, bits 3-31: reference count
const MARK_BIT: u32 = 0b0000_0001;
const AGE_SHIFT: u32 = 1;
const AGE_MASK: u32 = 0b0000_0110;
const REF_SHIFT: u32 = 3;

pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Backtracks from a payload address to the address its header would have.
///
/// This never dereferences anything, arbitrary words are valid input.
pub const fn address_of_object(payload: usize) -> usize {
    payload.wrapping_sub(HEADER_SIZE)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HeaderBits(u32);

impl HeaderBits {
    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn is_marked(self) -> bool {
        self.0 & MARK_BIT == MARK_BIT
    }

    pub const fn with_mark(self, marked: bool) -> Self {
        if marked {
            Self(self.0 | MARK_BIT)
        } else {
            Self(self.0 & !MARK_BIT)
        }
    }

    pub const fn age(self) -> u8 {
        ((self.0 & AGE_MASK) >> AGE_SHIFT) as u8
    }

    pub const fn with_age(self, age: u8) -> Self {
        // clear the age bits before OR-ing so the mark and count survive
        let age = if age > MAX_AGE { MAX_AGE } else { age };
        let age = (age as u32) << AGE_SHIFT;
        Self((self.0 & !AGE_MASK) | age)
    }

    pub const fn ref_count(self) -> u32 {
        self.0 >> REF_SHIFT
    }

    pub const fn with_ref_count(self, count: u32) -> Self {
        Self((self.0 & (MARK_BIT | AGE_MASK)) | (count << REF_SHIFT))
    }
}

impl fmt::Debug for HeaderBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeaderBits({:032b})", self.0)
    }
}

/// The allocation header in front of every payload.
#[repr(C)]
pub struct ObjectHeader {
    size: u32,
    bits: Cell<HeaderBits>,
}

const _: () = assert!(HEADER_SIZE == 8);

impl ObjectHeader {
    pub const fn new(size: u32) -> Self {
        Self {
            size,
            bits: Cell::new(HeaderBits::new()),
        }
    }

    pub const fn size(&self) -> u32 {
        self.size
    }

    pub fn bits(&self) -> HeaderBits {
        self.bits.get()
    }

    pub fn is_marked(&self) -> bool {
        self.bits.get().is_marked()
    }

    pub fn set_marked(&self, marked: bool) {
        self.bits.set(self.bits.get().with_mark(marked));
    }

    pub fn age(&self) -> u8 {
        self.bits.get().age()
    }

    pub fn set_age(&self, age: u8) {
        self.bits.set(self.bits.get().with_age(age));
    }

    pub fn ref_count(&self) -> u32 {
        self.bits.get().ref_count()
    }

    pub fn set_ref_count(&self, count: u32) {
        assert!(count <= MAX_REF_COUNT, "reference count overflow");
        self.bits.set(self.bits.get().with_ref_count(count));
    }

    pub fn inc_ref(&self) -> u32 {
        let count = self.ref_count() + 1;
        // crash on overflow, a wrapped count would free live objects
        self.set_ref_count(count);
        count
    }

    /// Returns the new count, or `None` when the count is already zero.
    pub fn dec_ref(&self) -> Option<u32> {
        let count = self.ref_count().checked_sub(1)?;
        self.set_ref_count(count);
        Some(count)
    }
}

impl fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectHeader {{ size: {}, marked: {}, age: {}, ref: {} }}",
            self.size,
            self.is_marked(),
            self.age(),
            self.ref_count()
        )
    }
}

/// A reference to a live object header.
///
/// `ObjectRef`s are handed out by heaps. One stays valid until the object is
/// freed or its heap is dropped; dereferencing it after that is undefined.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectRef(NonNull<ObjectHeader>);

impl ObjectRef {
    /// # Safety
    ///
    /// `header` must point to an initialized `ObjectHeader` followed by
    /// `size` payload bytes that stay valid for as long as the reference is used.
    pub(crate) unsafe fn from_raw(header: NonNull<ObjectHeader>) -> Self {
        Self(header)
    }

    pub fn header(&self) -> &ObjectHeader {
        // SAFETY: heaps only create `ObjectRef`s for initialized headers.
        unsafe { self.0.as_ref() }
    }

    pub fn as_ptr(&self) -> NonNull<ObjectHeader> {
        self.0
    }

    /// Address of the header.
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn payload(&self) -> NonNull<u8> {
        // SAFETY: the payload directly follows the header in the same allocation.
        unsafe { self.0.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Address of the payload, the value the program stores as a reference.
    pub fn payload_addr(&self) -> usize {
        self.payload().as_ptr() as usize
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.header().size() as usize
    }

    pub fn is_marked(&self) -> bool {
        self.header().is_marked()
    }

    pub fn set_marked(&self, marked: bool) {
        self.header().set_marked(marked)
    }

    pub fn age(&self) -> u8 {
        self.header().age()
    }

    pub fn ref_count(&self) -> u32 {
        self.header().ref_count()
    }

    /// Number of whole machine words in the payload.
    pub fn word_count(&self) -> usize {
        self.size() / WORD_SIZE
    }

    /// Every whole word of the payload as a mutable slot.
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        let payload = self.payload();
        // SAFETY: each slot lies inside the payload.
        (0..self.word_count()).map(move |i| unsafe { Slot::new(payload.add(i * WORD_SIZE)) })
    }

    pub fn read_word(&self, index: usize) -> usize {
        self.slot(index).get()
    }

    pub fn write_word(&self, index: usize, word: usize) {
        self.slot(index).set(word)
    }

    pub fn payload_bytes(&self) -> &[u8] {
        // SAFETY: the payload is `size` initialized (zero filled) bytes.
        unsafe { core::slice::from_raw_parts(self.payload().as_ptr(), self.size()) }
    }

    fn slot(&self, index: usize) -> Slot {
        assert!(
            index < self.word_count(),
            "word {index} out of bounds for a {} byte payload",
            self.size()
        );
        // SAFETY: bounds checked above.
        unsafe { Slot::new(self.payload().add(index * WORD_SIZE)) }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.addr())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        write!(
            f,
            "addr:{:#x} size:{} marked:{} age:{} ref:{}",
            self.addr(),
            header.size(),
            header.is_marked(),
            header.age(),
            header.ref_count()
        )
    }
}

/// A machine word in memory that may hold an object reference.
///
/// Slots live in stack frames or object payloads and need not be word
/// aligned, all accesses are unaligned.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Slot(NonNull<u8>);

impl Slot {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `WORD_SIZE` bytes for as
    /// long as the slot is used.
    pub(crate) unsafe fn new(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn get(&self) -> usize {
        // SAFETY: guaranteed by the constructor.
        unsafe { self.0.cast::<usize>().as_ptr().read_unaligned() }
    }

    pub fn set(&self, word: usize) {
        // SAFETY: guaranteed by the constructor.
        unsafe { self.0.cast::<usize>().as_ptr().write_unaligned(word) }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({:#x} = {:#x})", self.addr(), self.get())
    }
}

/// Anything that can answer "is there a live object at this header address".
pub trait ObjectSpace {
    fn find_object(&self, addr: usize) -> Option<ObjectRef>;

    /// Resolves a candidate payload word to its object, if it is one.
    fn resolve(&self, word: usize) -> Option<ObjectRef> {
        if word == 0 {
            return None;
        }
        self.find_object(address_of_object(word))
    }
}

impl<S: ObjectSpace + ?Sized> ObjectSpace for &S {
    fn find_object(&self, addr: usize) -> Option<ObjectRef> {
        (**self).find_object(addr)
    }
}

impl<A: ObjectSpace, B: ObjectSpace> ObjectSpace for (A, B) {
    fn find_object(&self, addr: usize) -> Option<ObjectRef> {
        self.0.find_object(addr).or_else(|| self.1.find_object(addr))
    }
}
