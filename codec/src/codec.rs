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

use super::{CodecError, MessageFramer};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// A codec that splits an inbound byte stream into `\r\n` terminated messages.
///
/// `LineCodec` wraps a [`MessageFramer`] so it can be driven by tokio-util's
/// `FramedRead`/`FramedWrite`. Decoded items are the raw message bytes with the
/// terminator included. Encoding writes bytes verbatim; adding a terminator is the
/// caller's decision.
///
/// At end of stream any partial message is discarded instead of being delivered
/// or reported as an error.
#[derive(Debug, Default)]
pub struct LineCodec {
    framer: MessageFramer,
}

impl LineCodec {
    /// Creates a new `LineCodec` with no message length limit.
    ///
    /// # Example
    /// ```
    /// use lineserve_codec::LineCodec;
    ///
    /// let codec = LineCodec::new();
    /// assert_eq!(codec.max_length(), 0);
    /// ```
    pub fn new() -> LineCodec {
        LineCodec::default()
    }

    /// Creates a `LineCodec` rejecting unterminated input longer than `max_length`.
    pub fn with_max_length(max_length: usize) -> LineCodec {
        LineCodec {
            framer: MessageFramer::with_max_length(max_length),
        }
    }

    /// Configured maximum message length (zero if unlimited).
    pub fn max_length(&self) -> usize {
        self.framer.max_length()
    }

    /// Number of bytes buffered toward the next message.
    pub fn pending_len(&self) -> usize {
        self.framer.pending_len()
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = CodecError;

    /// Moves newly read bytes into the framer and returns the oldest complete
    /// message, if any. Returns `Ok(None)` when more data is required.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split();
            self.framer.feed(&chunk)?;
        }
        Ok(self.framer.take_message())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        let discarded = self.framer.discard();
        if discarded > 0 {
            debug!(discarded, "Discarding partial message at end of stream");
        }
        Ok(None)
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Encoder<&[u8]> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item);
        Ok(())
    }
}

impl Encoder<&str> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
