//! Aggregated answers of one `get` or `set` call.
//!
//! A [`Reply`] is created with room for `capacity` answers, filled by the
//! transport, then sealed with the answer count it reported. Each answer has
//! three buffer slots: server id, message and data. The reply owns every
//! buffer until a `Take` extraction moves a data buffer out; dropping the
//! reply frees whatever it still owns.

use std::borrow::Cow;

use crate::buffer::Slot;
use crate::data::{self, Data, Element, Extraction, Shape};
use crate::error::{Error, Result};
use crate::wire::{self, MessageKind};

/// Buffer slots of one answer, as written by a transport.
#[derive(Debug, Default)]
pub struct AnswerSlots {
    pub server: Slot,
    pub message: Slot,
    pub data: Slot,
}

/// Which call produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Get,
    Set,
}

/// Answers of one fan-out request.
#[derive(Debug)]
pub struct Reply {
    kind: ReplyKind,
    count: usize,
    slots: Vec<AnswerSlots>,
}

impl Reply {
    /// Allocate an empty reply with room for `capacity` answers.
    pub fn new(kind: ReplyKind, capacity: usize) -> Self {
        Self {
            kind,
            count: 0,
            slots: (0..capacity).map(|_| AnswerSlots::default()).collect(),
        }
    }

    pub fn kind(&self) -> ReplyKind {
        self.kind
    }

    /// Maximum number of answers requested.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of answers received.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Slots for the transport to fill. Only valid before [`Reply::seal`].
    pub fn slots_mut(&mut self) -> &mut [AnswerSlots] {
        &mut self.slots
    }

    /// Record the answer count reported by the transport.
    ///
    /// A negative count or one above capacity breaks the transport contract.
    /// Buffers outside the accepted answers are freed, as are data buffers of
    /// a `set` reply.
    pub fn seal(&mut self, reported: i32) -> Result<()> {
        let count = usize::try_from(reported)
            .ok()
            .filter(|&n| n <= self.capacity());
        let Some(count) = count else {
            for slot in &mut self.slots {
                *slot = AnswerSlots::default();
            }
            self.count = 0;
            return Err(Error::protocol(format!(
                "transport reported {reported} answers for a request of at most {}",
                self.capacity()
            )));
        };
        for slot in &mut self.slots[count..] {
            *slot = AnswerSlots::default();
        }
        if self.kind == ReplyKind::Set {
            for slot in &mut self.slots[..count] {
                slot.data.clear();
            }
        }
        self.count = count;
        Ok(())
    }

    fn answer(&self, i: usize) -> Result<&AnswerSlots> {
        if i < self.count {
            Ok(&self.slots[i])
        } else {
            Err(Error::Index {
                index: i,
                count: self.count,
            })
        }
    }

    /// The `i`-th answer (0-based).
    pub fn entry(&mut self, i: usize) -> Result<Entry<'_>> {
        self.answer(i)?;
        Ok(Entry {
            reply: self,
            index: i,
        })
    }

    /// Server id of answer `i`.
    pub fn server(&self, i: usize) -> Result<Cow<'_, str>> {
        Ok(String::from_utf8_lossy(self.answer(i)?.server.bytes()))
    }

    /// Message of answer `i`, empty if none.
    pub fn message(&self, i: usize) -> Result<Cow<'_, str>> {
        Ok(String::from_utf8_lossy(self.answer(i)?.message.bytes()))
    }

    /// True if answer `i` carries an error message.
    pub fn has_error(&self, i: usize) -> Result<bool> {
        Ok(wire::is_error(self.answer(i)?.message.bytes()))
    }

    /// True if answer `i` carries an informational message.
    pub fn has_message(&self, i: usize) -> Result<bool> {
        Ok(wire::is_message(self.answer(i)?.message.bytes()))
    }

    /// True if any answer carries an error message.
    pub fn has_errors(&self) -> bool {
        self.slots[..self.count]
            .iter()
            .any(|a| wire::is_error(a.message.bytes()))
    }

    /// Fail with the first application error, if any.
    pub fn verify(&self) -> Result<()> {
        for answer in &self.slots[..self.count] {
            if wire::is_error(answer.message.bytes()) {
                return Err(Error::application(
                    String::from_utf8_lossy(answer.server.bytes()),
                    &String::from_utf8_lossy(answer.message.bytes()),
                ));
            }
        }
        Ok(())
    }

    /// `(server, message)` pairs in transport order.
    pub fn iter(&self) -> impl Iterator<Item = (Cow<'_, str>, Cow<'_, str>)> {
        self.slots[..self.count].iter().map(|a| {
            (
                String::from_utf8_lossy(a.server.bytes()),
                String::from_utf8_lossy(a.message.bytes()),
            )
        })
    }
}

/// A bounds-checked view of one answer.
#[derive(Debug)]
pub struct Entry<'a> {
    reply: &'a mut Reply,
    index: usize,
}

impl Entry<'_> {
    fn slots(&self) -> &AnswerSlots {
        &self.reply.slots[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// `CLASS:name address` of the answering server.
    pub fn server(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.slots().server.bytes())
    }

    pub fn message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.slots().message.bytes())
    }

    pub fn message_kind(&self) -> MessageKind {
        MessageKind::of(self.slots().message.bytes())
    }

    pub fn has_error(&self) -> bool {
        self.message_kind() == MessageKind::Error
    }

    pub fn has_message(&self) -> bool {
        self.message_kind() == MessageKind::Info
    }

    /// Error text with the prefix stripped, if this answer is an error.
    pub fn error_text(&self) -> Option<String> {
        self.has_error()
            .then(|| wire::strip_error_prefix(&self.message()).to_string())
    }

    /// Size of the data buffer still held by the reply.
    pub fn data_len(&self) -> usize {
        self.slots().data.len()
    }

    /// Extract the payload in the requested shape.
    ///
    /// `Take` moves the buffer out of the reply; a second extraction then
    /// sees an empty payload. `Copy` leaves it in place. A shape that needs
    /// more bytes than available fails before anything is moved.
    pub fn data<T: Element>(&mut self, shape: &Shape, extraction: Extraction) -> Result<Data<T>> {
        let slot = &mut self.reply.slots[self.index].data;
        data::check_size::<T>(shape, slot.len())?;
        let bytes = match extraction {
            Extraction::Copy => slot.bytes().to_vec(),
            Extraction::Take => slot.take().map(|buf| buf.into_vec()).unwrap_or_default(),
        };
        Ok(data::convert(shape, bytes))
    }

    /// Raw payload bytes.
    pub fn bytes(&mut self, extraction: Extraction) -> Vec<u8> {
        let slot = &mut self.reply.slots[self.index].data;
        match extraction {
            Extraction::Copy => slot.bytes().to_vec(),
            Extraction::Take => slot.take().map(|buf| buf.into_vec()).unwrap_or_default(),
        }
    }

    /// Payload decoded as text, keeping the buffer.
    pub fn text(&mut self) -> String {
        match data::convert::<u8>(&Shape::Text, self.bytes(Extraction::Copy)) {
            Data::Text(text) => text,
            _ => String::new(),
        }
    }

    /// The largest vector of `T` the payload holds.
    pub fn vector<T: Element>(&mut self, extraction: Extraction) -> Vec<T> {
        data::decode(&self.bytes(extraction))
    }
}
