//! Shared Region Backends
//!
//! All access is word granular at 4-byte aligned byte offsets. An offset
//! outside the region or off alignment is a caller bug and panics, the same
//! contract as slice indexing; every offset used by this crate comes from
//! the const layout, which is checked against `size()` once at boot.

use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Arc;

/// Word-addressed memory shared with the firmware core
pub trait SharedMemory: Send + Sync {
    /// Region size in bytes
    fn size(&self) -> usize;

    /// Read one word
    fn read_word(&self, offset: usize) -> u32;

    /// Write one word
    fn write_word(&self, offset: usize, value: u32);

    /// Full barrier: every earlier write is visible before any later one
    fn fence(&self);

    /// Read consecutive words
    fn read_words(&self, offset: usize, out: &mut [u32]) {
        for (i, w) in out.iter_mut().enumerate() {
            *w = self.read_word(offset + i * 4);
        }
    }

    /// Write consecutive words
    fn write_words(&self, offset: usize, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            self.write_word(offset + i * 4, *w);
        }
    }

    /// Set `words` consecutive words to `value`
    fn fill(&self, offset: usize, words: usize, value: u32) {
        for i in 0..words {
            self.write_word(offset + i * 4, value);
        }
    }
}

impl<T: SharedMemory + ?Sized> SharedMemory for &T {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn read_word(&self, offset: usize) -> u32 {
        (**self).read_word(offset)
    }

    fn write_word(&self, offset: usize, value: u32) {
        (**self).write_word(offset, value)
    }

    fn fence(&self) {
        (**self).fence()
    }
}

impl<T: SharedMemory + ?Sized> SharedMemory for Arc<T> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn read_word(&self, offset: usize) -> u32 {
        (**self).read_word(offset)
    }

    fn write_word(&self, offset: usize, value: u32) {
        (**self).write_word(offset, value)
    }

    fn fence(&self) {
        (**self).fence()
    }

    fn read_words(&self, offset: usize, out: &mut [u32]) {
        (**self).read_words(offset, out)
    }

    fn write_words(&self, offset: usize, words: &[u32]) {
        (**self).write_words(offset, words)
    }

    fn fill(&self, offset: usize, words: usize, value: u32) {
        (**self).fill(offset, words, value)
    }
}

#[inline(always)]
fn word_index(offset: usize) -> usize {
    assert!(offset % 4 == 0, "unaligned shared-memory offset {offset:#x}");
    offset / 4
}

/// In-process region backed by atomic words
pub struct HeapRegion {
    words: Box<[AtomicU32]>,
}

impl HeapRegion {
    /// Zeroed region of at least `size` bytes
    pub fn new(size: usize) -> Self {
        let words = (0..size.div_ceil(4)).map(|_| AtomicU32::new(0)).collect();
        Self { words }
    }
}

impl SharedMemory for HeapRegion {
    fn size(&self) -> usize {
        self.words.len() * 4
    }

    #[inline]
    fn read_word(&self, offset: usize) -> u32 {
        self.words[word_index(offset)].load(Ordering::Acquire)
    }

    #[inline]
    fn write_word(&self, offset: usize, value: u32) {
        self.words[word_index(offset)].store(value, Ordering::Release)
    }

    #[inline]
    fn fence(&self) {
        fence(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapRegion").field("size", &self.size()).finish()
    }
}

/// Device mapping accessed with volatile loads and stores
#[derive(Debug)]
pub struct MmioRegion {
    base: *mut u32,
    size: usize,
}

// SAFETY: the mapping is plain device memory; word accesses are volatile
// and never form references, so concurrent use from several threads is
// the same as concurrent use by host and firmware.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Wrap an existing mapping.
    ///
    /// # Safety
    ///
    /// `base` must be 4-byte aligned and valid for volatile reads and
    /// writes of `size` bytes for the lifetime of the returned value.
    pub unsafe fn new(base: *mut u8, size: usize) -> Self {
        Self {
            base: base.cast::<u32>(),
            size: size & !3,
        }
    }

    #[inline(always)]
    fn slot(&self, offset: usize) -> *mut u32 {
        let idx = word_index(offset);
        assert!(offset + 4 <= self.size, "offset {offset:#x} outside mapping");
        // SAFETY: bounds checked above against the mapping handed to `new`
        unsafe { self.base.add(idx) }
    }
}

impl SharedMemory for MmioRegion {
    fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn read_word(&self, offset: usize) -> u32 {
        // SAFETY: `slot` is in bounds and aligned
        unsafe { self.slot(offset).read_volatile() }
    }

    #[inline]
    fn write_word(&self, offset: usize, value: u32) {
        // SAFETY: `slot` is in bounds and aligned
        unsafe { self.slot(offset).write_volatile(value) }
    }

    #[inline]
    fn fence(&self) {
        fence(Ordering::SeqCst)
    }
}

/// One observed access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Word write
    Write {
        /// Byte offset
        offset: usize,
        /// Value written
        value: u32,
    },
    /// Barrier
    Fence,
}

/// Instrumented region: forwards to an inner region and logs every write
/// and barrier in program order
pub struct RecordingRegion<M> {
    inner: M,
    log: Mutex<Vec<Access>>,
}

impl<M: SharedMemory> RecordingRegion<M> {
    /// Wrap `inner`
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the log
    pub fn accesses(&self) -> Vec<Access> {
        self.log.lock().clone()
    }

    /// Drop everything logged so far
    pub fn clear(&self) {
        self.log.lock().clear();
    }

    /// Log positions of writes landing in `range` (byte offsets)
    pub fn writes_in(&self, range: Range<usize>) -> Vec<usize> {
        self.log
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(i, a)| match a {
                Access::Write { offset, .. } if range.contains(offset) => Some(i),
                _ => None,
            })
            .collect()
    }

    /// Inner region
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M: SharedMemory> SharedMemory for RecordingRegion<M> {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn read_word(&self, offset: usize) -> u32 {
        self.inner.read_word(offset)
    }

    fn write_word(&self, offset: usize, value: u32) {
        // Log under the lock so the order matches the order of effect
        let mut log = self.log.lock();
        self.inner.write_word(offset, value);
        log.push(Access::Write { offset, value });
    }

    fn fence(&self) {
        let mut log = self.log.lock();
        self.inner.fence();
        log.push(Access::Fence);
    }
}
