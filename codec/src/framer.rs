//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use super::{CodecError, CodecResult};
use bytes::{Bytes, BytesMut};

/// Message terminator sequence (`\r\n`).
pub const TERMINATOR: &[u8; 2] = b"\r\n";

/// Accumulates raw byte chunks and splits them into `\r\n` terminated messages.
///
/// `MessageFramer` performs no I/O. Chunks are appended with [`MessageFramer::feed`]
/// and complete messages are removed with [`MessageFramer::take_message`]. Messages
/// are returned **including** their terminator, so `"hello\r\n"` is yielded as
/// `"hello\r\n"`.
///
/// Completeness is always evaluated against the accumulator rather than the most
/// recent chunk, so a terminator split across two chunks (`"X\r"` followed by
/// `"\n"`) is detected.
///
/// # Example
/// ```
/// use lineserve_codec::MessageFramer;
///
/// let mut framer = MessageFramer::new();
/// framer.feed(b"hel").unwrap();
/// assert!(!framer.is_complete());
/// framer.feed(b"lo\r\nwor").unwrap();
/// assert_eq!(framer.take_message().unwrap(), "hello\r\n");
/// assert_eq!(framer.pending_len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: BytesMut,
    /// Bytes of `buffer` already searched without finding a terminator
    scanned: usize,
    /// End offset (exclusive) of the first complete message
    complete_at: Option<usize>,
    /// Zero disables the limit
    max_length: usize,
}

impl MessageFramer {
    /// Creates a framer with no message length limit.
    pub fn new() -> MessageFramer {
        MessageFramer::default()
    }

    /// Creates a framer that rejects more than `max_length` unterminated bytes.
    ///
    /// A `max_length` of zero disables the limit.
    pub fn with_max_length(max_length: usize) -> MessageFramer {
        MessageFramer {
            max_length,
            ..MessageFramer::default()
        }
    }

    /// Configured maximum message length (zero if unlimited).
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Appends a chunk to the accumulator.
    ///
    /// # Errors
    /// Returns [`CodecError::MessageTooLong`] when the unterminated tail grows past
    /// the configured limit. The accumulator is cleared in that case.
    pub fn feed(&mut self, chunk: &[u8]) -> CodecResult<()> {
        self.buffer.extend_from_slice(chunk);
        self.scan();
        if self.complete_at.is_none() && self.max_length > 0 && self.buffer.len() > self.max_length
        {
            let length = self.discard();
            return Err(CodecError::MessageTooLong {
                length,
                limit: self.max_length,
            });
        }
        Ok(())
    }

    /// Returns true when at least one complete message is buffered.
    pub fn is_complete(&self) -> bool {
        self.complete_at.is_some()
    }

    /// Removes and returns the oldest complete message, terminator included.
    ///
    /// The framer is ready to accumulate the next message when this returns;
    /// bytes following the terminator stay buffered.
    pub fn take_message(&mut self) -> Option<Bytes> {
        let end = self.complete_at.take()?;
        let message = self.buffer.split_to(end).freeze();
        self.scanned = 0;
        self.scan();
        Some(message)
    }

    /// Feeds a chunk and drains every message it completes.
    pub fn push(&mut self, chunk: &[u8]) -> CodecResult<Vec<Bytes>> {
        self.feed(chunk)?;
        let mut messages = Vec::new();
        while let Some(message) = self.take_message() {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Number of buffered bytes, complete or not.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops all buffered bytes and returns how many were discarded.
    ///
    /// Used at end of stream: a partial message is never delivered.
    pub fn discard(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        self.complete_at = None;
        discarded
    }

    fn scan(&mut self) {
        if self.complete_at.is_some() {
            return;
        }
        // The terminator may straddle the previous scan boundary.
        let start = self.scanned.saturating_sub(1);
        match self.buffer[start..]
            .windows(TERMINATOR.len())
            .position(|window| window == TERMINATOR)
        {
            Some(offset) => self.complete_at = Some(start + offset + TERMINATOR.len()),
            None => self.scanned = self.buffer.len(),
        }
    }
}
