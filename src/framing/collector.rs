//! Message reassembly from raw read buffers.
//!
//! A [`Collector`] holds the byte buffers received on one pipe and a
//! cursor into the head buffer marking the start of the next unparsed
//! message header. Messages, and even headers, may freely span buffer
//! boundaries.
//!
//! Invariants:
//! - a message header always begins in the head buffer at the cursor;
//! - after a message is extracted, every fully consumed buffer is removed
//!   and the cursor adjusted;
//! - the cursor never points past the end of the head buffer (reaching the
//!   end drops the buffer and resets the cursor to zero).

use std::collections::VecDeque;

use bytes::Bytes;

use super::wire::{length_hash, u32_unpack, HEADER_SIZE};

/// What the Collector currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStatus {
    /// Not enough data for a complete message.
    NoMessage,
    /// At least one complete message is available.
    HasMessage,
    /// The stream is desynced or corrupt; the pipe should be dropped.
    Corrupt,
}

/// Result of peeking the current message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLength {
    /// Fewer than `HEADER_SIZE` bytes are buffered.
    MoreData,
    /// The header's check-hash did not match.
    Corrupt,
    /// Payload length of the current message.
    Length(usize),
}

/// Accumulates read buffers and extracts length-prefixed messages.
#[derive(Debug, Default)]
pub struct Collector {
    buffers: VecDeque<Bytes>,
    pos: usize,
}

impl Collector {
    /// Create an empty Collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer to the tail, taking ownership.
    ///
    /// Zero-length buffers must never be appended; the read path skips
    /// them before calling this.
    pub fn append(&mut self, buffer: Bytes) {
        debug_assert!(!buffer.is_empty(), "empty buffers must not be appended");
        self.buffers.push_back(buffer);
    }

    /// True iff at least `count` bytes follow the cursor.
    pub fn contains(&self, mut count: usize) -> bool {
        let mut pos = self.pos;
        for buffer in &self.buffers {
            if count == 0 {
                return true;
            }
            let remainder = buffer.len() - pos;
            if count <= remainder {
                return true;
            }
            count -= remainder;
            pos = 0;
        }
        count == 0
    }

    /// Peek the current message header.
    ///
    /// With `advance` set and a complete header available, the cursor
    /// moves past the 8 header bytes and drained buffers are dropped. An
    /// incomplete header leaves the cursor untouched; a corrupt header
    /// makes `advance` irrelevant since the pipe is about to be torn down.
    pub fn message_length(&mut self, advance: bool) -> MessageLength {
        let mut header = [0u8; HEADER_SIZE];
        if !self.peek(&mut header) {
            return MessageLength::MoreData;
        }

        let length = u32_unpack(&header[..4]);
        let check = u32_unpack(&header[4..]);
        if length_hash(length) != check {
            return MessageLength::Corrupt;
        }

        if advance {
            self.advance(HEADER_SIZE);
        }
        MessageLength::Length(length as usize)
    }

    /// Current status: complete message available, more data needed, or
    /// corrupt stream.
    pub fn status(&self) -> CollectorStatus {
        let mut header = [0u8; HEADER_SIZE];
        if !self.peek(&mut header) {
            return CollectorStatus::NoMessage;
        }

        let length = u32_unpack(&header[..4]);
        let check = u32_unpack(&header[4..]);
        if length_hash(length) != check {
            return CollectorStatus::Corrupt;
        }

        if self.contains(HEADER_SIZE + length as usize) {
            CollectorStatus::HasMessage
        } else {
            CollectorStatus::NoMessage
        }
    }

    /// Extract the current message into `dest`, appending exactly its
    /// payload bytes and advancing past header and payload.
    ///
    /// Returns `HasMessage` on success; `NoMessage`/`Corrupt` leave the
    /// Collector untouched.
    pub fn extract_message_to(&mut self, dest: &mut Vec<u8>) -> CollectorStatus {
        match self.status() {
            CollectorStatus::HasMessage => {}
            other => return other,
        }

        let length = match self.message_length(true) {
            MessageLength::Length(length) => length,
            // status() just said HasMessage; anything else means the
            // header got corrupted in between, which cannot happen on the
            // single-owner I/O thread.
            _ => return CollectorStatus::Corrupt,
        };

        if self.copy_to(dest, length, true) {
            CollectorStatus::HasMessage
        } else {
            CollectorStatus::Corrupt
        }
    }

    /// Extract the current message, if any, as an owned byte vector.
    pub fn take_message(&mut self) -> (CollectorStatus, Vec<u8>) {
        match self.status() {
            CollectorStatus::HasMessage => {
                let mut message = Vec::new();
                let status = self.extract_message_to(&mut message);
                (status, message)
            }
            other => (other, Vec::new()),
        }
    }

    /// Copy `count` bytes following the cursor into `dest`; with `advance`
    /// the cursor moves past them and drained buffers are dropped.
    ///
    /// Returns false when fewer than `count` bytes are buffered; the
    /// available bytes are still copied but the cursor never moves.
    pub fn copy_to(&mut self, dest: &mut Vec<u8>, mut count: usize, advance: bool) -> bool {
        dest.reserve(count);

        let mut index = 0;
        let mut pos = self.pos;
        while count > 0 {
            let Some(buffer) = self.buffers.get(index) else {
                return false;
            };
            let remainder = buffer.len() - pos;
            let to_copy = count.min(remainder);
            dest.extend_from_slice(&buffer[pos..pos + to_copy]);
            count -= to_copy;
            if to_copy < remainder {
                pos += to_copy;
            } else {
                pos = 0;
                index += 1;
            }
        }

        if advance {
            self.buffers.drain(..index);
            self.pos = pos;
        }
        true
    }

    /// Copy up to `HEADER_SIZE` bytes at the cursor without advancing.
    fn peek(&self, dest: &mut [u8; HEADER_SIZE]) -> bool {
        let mut filled = 0;
        let mut pos = self.pos;
        for buffer in &self.buffers {
            let take = (HEADER_SIZE - filled).min(buffer.len() - pos);
            dest[filled..filled + take].copy_from_slice(&buffer[pos..pos + take]);
            filled += take;
            if filled == HEADER_SIZE {
                return true;
            }
            pos = 0;
        }
        false
    }

    /// Move the cursor forward by `count` bytes, dropping drained buffers.
    ///
    /// The caller must have verified availability via [`contains`].
    ///
    /// [`contains`]: Collector::contains
    fn advance(&mut self, mut count: usize) {
        while count > 0 {
            let head_len = match self.buffers.front() {
                Some(buffer) => buffer.len(),
                None => {
                    debug_assert!(false, "advance past the end of buffered data");
                    return;
                }
            };
            let remainder = head_len - self.pos;
            if count < remainder {
                self.pos += count;
                return;
            }
            count -= remainder;
            self.pos = 0;
            self.buffers.pop_front();
        }
    }
}
