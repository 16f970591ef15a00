//! Call-scoped buffers handed to callbacks.

use std::borrow::Cow;

use xpa_core::data::{self, Element};
use xpa_core::{Heap, Slot};

/// Where a send callback publishes its result.
///
/// Every `store_*` call frees the previously stored result, then records a
/// fresh copy allocated from the transport heap. The transport frees that
/// copy once it has been sent.
pub struct SendBuffer<'a> {
    slot: &'a mut Slot,
    heap: &'a Heap,
}

impl<'a> SendBuffer<'a> {
    pub(crate) fn new(slot: &'a mut Slot, heap: &'a Heap) -> Self {
        Self { slot, heap }
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) {
        self.slot.clear();
        self.slot.store(self.heap.alloc(bytes));
    }

    pub fn store_text(&mut self, text: &str) {
        self.store_bytes(text.as_bytes());
    }

    /// Store values in native byte order.
    pub fn store_values<T: Element>(&mut self, values: &[T]) {
        self.slot.clear();
        self.slot.store(self.heap.adopt(data::encode(values)));
    }

    pub fn store_value<T: Element>(&mut self, value: T) {
        self.store_values(std::slice::from_ref(&value));
    }

    /// Drop the stored result; the answer carries no data.
    pub fn clear(&mut self) {
        self.slot.clear();
    }

    /// Length of the stored result.
    pub fn len(&self) -> usize {
        self.slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.len() == 0
    }
}

/// The payload a client sent, borrowed for one callback invocation.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveBuffer<'a> {
    payload: &'a [u8],
}

impl<'a> ReceiveBuffer<'a> {
    pub(crate) fn new(payload: &'a [u8]) -> Self {
        Self { payload }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.payload)
    }

    /// Payload as native-order values. Trailing bytes are ignored.
    pub fn values<T: Element>(&self) -> Vec<T> {
        data::decode(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_replaces_and_frees_previous_result() {
        let heap = Heap::new();
        let mut slot = Slot::default();
        {
            let mut buf = SendBuffer::new(&mut slot, &heap);
            buf.store_text("first");
            buf.store_value(42i32);
            assert_eq!(buf.len(), 4);
        }
        assert_eq!(heap.allocations(), 2);
        assert_eq!(heap.outstanding(), 1);
        assert_eq!(data::decode::<i32>(slot.bytes()), vec![42]);
        slot.clear();
        assert_eq!(heap.outstanding(), 0);
    }

    #[test]
    fn clear_leaves_no_result() {
        let heap = Heap::new();
        let mut slot = Slot::default();
        let mut buf = SendBuffer::new(&mut slot, &heap);
        buf.store_bytes(b"abc");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(heap.outstanding(), 0);
    }

    #[test]
    fn receive_views() {
        let bytes = data::encode(&[1u16, 2, 3]);
        let buf = ReceiveBuffer::new(&bytes);
        assert_eq!(buf.values::<u16>(), vec![1, 2, 3]);
        assert_eq!(ReceiveBuffer::new(b"quit").text(), "quit");
    }
}
