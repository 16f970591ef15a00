//! Buffers that cross the transport boundary.
//!
//! Every buffer produced by a transport is allocated from a [`Heap`] and has
//! exactly one owner at a time. A [`ForeignBuffer`] frees itself on drop;
//! [`ForeignBuffer::into_vec`] hands the bytes to the host and releases the
//! heap record at the same moment. The heap keeps counters so that leaks and
//! double frees show up in tests.
//!
//! A reply stores buffers in [`Slot`]s. A slot is `Empty`, `Owned` or
//! `Transferred`; only an `Owned` slot holds a buffer, and taking from it
//! leaves `Transferred` behind, so no path can free the same buffer twice.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Allocation accounting for buffers handed across the transport boundary.
#[derive(Clone, Default)]
pub struct Heap {
    stats: Arc<HeapStats>,
}

#[derive(Default)]
struct HeapStats {
    allocations: AtomicU64,
    frees: AtomicU64,
    live_bytes: AtomicU64,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `bytes` into a fresh buffer.
    pub fn alloc(&self, bytes: &[u8]) -> ForeignBuffer {
        self.adopt(bytes.to_vec())
    }

    /// Take ownership of `bytes` as a fresh buffer.
    pub fn adopt(&self, bytes: Vec<u8>) -> ForeignBuffer {
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        self.stats
            .live_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        ForeignBuffer {
            bytes,
            heap: self.clone(),
            live: true,
        }
    }

    fn release(&self, len: usize) {
        self.stats.frees.fetch_add(1, Ordering::Relaxed);
        self.stats
            .live_bytes
            .fetch_sub(len as u64, Ordering::Relaxed);
    }

    /// Number of buffers allocated so far.
    pub fn allocations(&self) -> u64 {
        self.stats.allocations.load(Ordering::Relaxed)
    }

    /// Number of buffers freed or handed to the host so far.
    pub fn frees(&self) -> u64 {
        self.stats.frees.load(Ordering::Relaxed)
    }

    /// Buffers allocated and not yet released.
    pub fn outstanding(&self) -> u64 {
        self.allocations() - self.frees()
    }

    /// Bytes held by outstanding buffers.
    pub fn live_bytes(&self) -> u64 {
        self.stats.live_bytes.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("allocations", &self.allocations())
            .field("frees", &self.frees())
            .field("live_bytes", &self.live_bytes())
            .finish()
    }
}

/// A heap-allocated byte buffer with a single owner.
pub struct ForeignBuffer {
    bytes: Vec<u8>,
    heap: Heap,
    live: bool,
}

impl ForeignBuffer {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Allocate an independent copy from the same heap.
    pub fn duplicate(&self) -> ForeignBuffer {
        self.heap.alloc(&self.bytes)
    }

    /// Hand the bytes to the host, releasing the heap record without a copy.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.live = false;
        self.heap.release(self.bytes.len());
        std::mem::take(&mut self.bytes)
    }
}

impl Drop for ForeignBuffer {
    fn drop(&mut self) {
        if self.live {
            self.live = false;
            self.heap.release(self.bytes.len());
        }
    }
}

impl fmt::Debug for ForeignBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignBuffer")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Ownership state of one buffer descriptor.
#[derive(Debug, Default)]
pub enum Slot {
    /// Nothing was ever stored.
    #[default]
    Empty,
    /// The slot owns a buffer and frees it when dropped.
    Owned(ForeignBuffer),
    /// The buffer was handed to a caller; nothing is left to free.
    Transferred,
}

impl Slot {
    /// Store a buffer, freeing any buffer already owned.
    pub fn store(&mut self, buffer: ForeignBuffer) {
        *self = Slot::Owned(buffer);
    }

    /// Bytes of an owned buffer; empty for the other states.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Slot::Owned(buffer) => buffer.as_slice(),
            Slot::Empty | Slot::Transferred => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Slot::Owned(_))
    }

    /// Move the buffer out. Only an owned slot yields a buffer, and it
    /// becomes `Transferred`; other states are left untouched.
    pub fn take(&mut self) -> Option<ForeignBuffer> {
        match std::mem::take(self) {
            Slot::Owned(buffer) => {
                *self = Slot::Transferred;
                Some(buffer)
            }
            other => {
                *self = other;
                None
            }
        }
    }

    /// Free an owned buffer now. `Empty` and `Transferred` are no-ops.
    pub fn clear(&mut self) {
        if self.is_owned() {
            *self = Slot::Empty;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_frees_once() {
        let heap = Heap::new();
        {
            let buf = heap.alloc(b"abcd");
            assert_eq!(buf.len(), 4);
            assert_eq!(heap.outstanding(), 1);
            assert_eq!(heap.live_bytes(), 4);
        }
        assert_eq!(heap.allocations(), 1);
        assert_eq!(heap.frees(), 1);
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn into_vec_releases_without_copy() {
        let heap = Heap::new();
        let buf = heap.adopt(vec![1, 2, 3]);
        let bytes = buf.into_vec();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(heap.outstanding(), 0);
        assert_eq!(heap.frees(), 1);
    }

    #[test]
    fn slot_transitions() {
        let heap = Heap::new();
        let mut slot = Slot::default();
        assert!(slot.take().is_none());
        assert!(matches!(slot, Slot::Empty));

        slot.store(heap.alloc(b"xy"));
        assert_eq!(slot.bytes(), b"xy");
        let taken = slot.take().expect("owned slot yields its buffer");
        assert!(matches!(slot, Slot::Transferred));
        assert!(slot.take().is_none());
        assert_eq!(slot.bytes(), b"");
        slot.clear();
        assert!(matches!(slot, Slot::Transferred));

        drop(taken);
        drop(slot);
        assert_eq!(heap.outstanding(), 0);
    }

    #[test]
    fn store_over_owned_frees_previous() {
        let heap = Heap::new();
        let mut slot = Slot::default();
        slot.store(heap.alloc(b"one"));
        slot.store(heap.alloc(b"two"));
        assert_eq!(heap.allocations(), 2);
        assert_eq!(heap.frees(), 1);
        slot.clear();
        assert_eq!(heap.outstanding(), 0);
    }
}
