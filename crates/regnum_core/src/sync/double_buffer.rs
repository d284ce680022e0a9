//! # Double-Buffered Record Storage
//!
//! Lock-free concurrent access for the simulation thread and any number of
//! observer threads.
//!
//! ## Safety Note
//!
//! This module requires unsafe code for lock-free double buffering.
//! Every unsafe block states which half of the protocol makes it sound.

#![allow(unsafe_code)]
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────────┐
//!                │         DoubleBuffer<T>          │
//!                │                                  │
//!                │   ┌──────────┐    ┌──────────┐   │
//!                │   │ Buffer 0 │    │ Buffer 1 │   │
//!                │   └────┬─────┘    └────┬─────┘   │
//!                │        └───────┬───────┘         │
//!                │  ┌─────────────┴──────────────┐  │
//!                │  │ state: readers|SWAP|index  │  │
//!                │  └────────────────────────────┘  │
//!                └──────────────────────────────────┘
//!                          │              │
//!               ┌──────────┘              └──────────┐
//!               ▼                                    ▼
//!      ┌─────────────────┐                ┌─────────────────────┐
//!      │ owner (1 thread)│                │ BufferReadGuard (N) │
//!      │ writes + swap   │                │ read buffer only    │
//!      └─────────────────┘                └─────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! One atomic word holds the write index (bit 0), a swap-in-progress flag
//! (bit 1) and the number of registered readers (bits 2..). Readers register
//! with a compare-exchange that fails while a swap is in progress. A swap
//! only starts when the reader count is zero, and readers cannot register
//! until it finishes, so no reader ever observes a half-applied swap and no
//! swap ever retargets a buffer that is being read.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytemuck::Pod;

const WRITE_INDEX: usize = 0b01;
const SWAPPING: usize = 0b10;
const READER_ONE: usize = 0b100;
const READER_SHIFT: u32 = 2;

/// Two equally sized record buffers with an atomically switched role.
///
/// The owner writes the write buffer through the crate-private methods; any
/// thread may read the read buffer through [`DoubleBuffer::try_read`] or
/// [`DoubleBuffer::read`].
pub struct DoubleBuffer<T: Pod> {
    /// The two buffers. Using UnsafeCell because access is arbitrated by `state`.
    buffers: [UnsafeCell<Box<[T]>>; 2],
    /// Write index, swap flag and reader count.
    state: AtomicUsize,
    /// Completed swaps.
    swap_count: AtomicU64,
    /// Records per buffer.
    len: usize,
}

// SAFETY: every cross-thread access to `buffers` goes through the `state` protocol
unsafe impl<T: Pod + Send + Sync> Send for DoubleBuffer<T> {}
// SAFETY: every cross-thread access to `buffers` goes through the `state` protocol
unsafe impl<T: Pod + Send + Sync> Sync for DoubleBuffer<T> {}

impl<T: Pod> DoubleBuffer<T> {
    /// Creates two zeroed buffers of `len` records. Buffer 0 starts as the write buffer.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            buffers: [
                UnsafeCell::new(vec![T::zeroed(); len].into_boxed_slice()),
                UnsafeCell::new(vec![T::zeroed(); len].into_boxed_slice()),
            ],
            state: AtomicUsize::new(0),
            swap_count: AtomicU64::new(0),
            len,
        }
    }

    /// Records per buffer.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffers hold no records.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index (0 or 1) of the current write buffer.
    #[inline]
    #[must_use]
    pub fn write_index(&self) -> usize {
        self.state.load(Ordering::Acquire) & WRITE_INDEX
    }

    /// Number of registered readers.
    #[inline]
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.state.load(Ordering::Acquire) >> READER_SHIFT
    }

    /// Number of completed swaps.
    #[inline]
    #[must_use]
    pub fn swap_count(&self) -> u64 {
        self.swap_count.load(Ordering::Relaxed)
    }

    /// Registers a reader unless a swap is in progress.
    #[must_use]
    pub fn try_read(&self) -> Option<BufferReadGuard<'_, T>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & SWAPPING != 0 {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                current + READER_ONE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(BufferReadGuard {
                        owner: self,
                        index: (current & WRITE_INDEX) ^ 1,
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Registers a reader, spinning while a swap is in progress.
    ///
    /// A swap copies only the dirty records, so the wait is short.
    #[must_use]
    pub fn read(&self) -> BufferReadGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            std::hint::spin_loop();
        }
    }

    /// Value at `index` in the write buffer. Owner only.
    #[inline]
    pub(crate) fn write_value(&self, index: usize) -> T {
        let write = self.write_index();
        // SAFETY: only the owner touches the write buffer and it is not writing now
        unsafe { (*self.buffers[write].get())[index] }
    }

    /// Stores `value` at `index` in the write buffer. Owner only.
    #[inline]
    pub(crate) fn set_write(&self, index: usize, value: T) {
        let write = self.write_index();
        // SAFETY: readers never target the write buffer; the owner holds no
        // other reference into it while calling this
        unsafe { (*self.buffers[write].get())[index] = value }
    }

    /// Value at `index` in the read buffer. Owner only.
    #[inline]
    pub(crate) fn read_value(&self, index: usize) -> T {
        let read = self.write_index() ^ 1;
        // SAFETY: the read buffer only changes during swap/sync, which the
        // owner itself performs, so shared access here cannot race
        unsafe { (*self.buffers[read].get())[index] }
    }

    /// The whole write buffer. Owner only, must not outlive the next write.
    #[inline]
    pub(crate) fn write_slice(&self) -> &[T] {
        let write = self.write_index();
        // SAFETY: see `write_value`; the store ties this borrow to `&self`
        unsafe { &*self.buffers[write].get() }
    }

    /// The whole read buffer. Owner only.
    #[inline]
    pub(crate) fn read_slice(&self) -> &[T] {
        let read = self.write_index() ^ 1;
        // SAFETY: see `read_value`
        unsafe { &*self.buffers[read].get() }
    }

    /// Flips buffer roles and brings the new write buffer up to date by
    /// copying only the `dirty` indices from the buffer that was just written.
    ///
    /// `publish` runs inside the exclusive section, before any reader can
    /// register against the new read buffer. Whatever it publishes is
    /// therefore seen by exactly the readers of this buffer generation.
    ///
    /// # Errors
    ///
    /// Returns the reader count if readers hold the read buffer. Nothing
    /// changes in that case (`publish` does not run) and the swap can be
    /// retried.
    pub(crate) fn swap(&self, dirty: &[u32], publish: impl FnOnce()) -> Result<(), usize> {
        let old_write = self.begin_exclusive()?;
        let new_write = old_write ^ 1;

        // SAFETY: SWAPPING is set with zero readers, so no reader holds or can
        // acquire either buffer, and the owner is the only caller
        unsafe {
            let fresh = &*self.buffers[old_write].get();
            let stale = &mut *self.buffers[new_write].get();
            for &index in dirty {
                let index = index as usize;
                stale[index] = fresh[index];
            }
        }
        publish();

        self.state.store(new_write, Ordering::Release);
        self.swap_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Copies the whole write buffer into the read buffer without flipping roles.
    ///
    /// Used once after bulk loading. `publish` runs as in [`Self::swap`].
    ///
    /// # Errors
    ///
    /// Returns the reader count if readers hold the read buffer.
    pub(crate) fn sync_full(&self, publish: impl FnOnce()) -> Result<(), usize> {
        let write = self.begin_exclusive()?;

        // SAFETY: same exclusivity argument as `swap`
        unsafe {
            let source = &*self.buffers[write].get();
            let target = &mut *self.buffers[write ^ 1].get();
            target.copy_from_slice(source);
        }
        publish();

        self.state.store(write, Ordering::Release);
        Ok(())
    }

    /// Resizes both buffers to `len`, zero-filling new records.
    pub(crate) fn grow(&mut self, len: usize) {
        if len <= self.len {
            return;
        }
        for buffer in &mut self.buffers {
            let mut records = std::mem::take(buffer.get_mut()).into_vec();
            records.resize(len, T::zeroed());
            *buffer.get_mut() = records.into_boxed_slice();
        }
        self.len = len;
    }

    /// Sets SWAPPING if there are no readers. Returns the write index.
    fn begin_exclusive(&self) -> Result<usize, usize> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let readers = current >> READER_SHIFT;
            if readers > 0 {
                return Err(readers);
            }
            debug_assert!(current & SWAPPING == 0, "nested exclusive section");
            match self.state.compare_exchange_weak(
                current,
                current | SWAPPING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current & WRITE_INDEX),
                Err(observed) => current = observed,
            }
        }
    }
}

impl<T: Pod> std::fmt::Debug for DoubleBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleBuffer")
            .field("len", &self.len)
            .field("write_index", &self.write_index())
            .field("readers", &self.reader_count())
            .field("swaps", &self.swap_count())
            .finish()
    }
}

/// Registered shared access to the read buffer.
///
/// While any guard is alive the buffers cannot swap.
pub struct BufferReadGuard<'a, T: Pod> {
    owner: &'a DoubleBuffer<T>,
    index: usize,
}

impl<T: Pod> BufferReadGuard<'_, T> {
    /// Index of the buffer being read (for debugging).
    #[inline]
    #[must_use]
    pub fn buffer_index(&self) -> usize {
        self.index
    }
}

impl<T: Pod> Deref for BufferReadGuard<'_, T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        // SAFETY: the registered reader count blocks swap and sync, and the
        // owner never writes the read buffer outside of those
        unsafe { &*self.owner.buffers[self.index].get() }
    }
}

impl<T: Pod> Drop for BufferReadGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.state.fetch_sub(READER_ONE, Ordering::Release);
    }
}
