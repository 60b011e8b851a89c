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

//! Framed inbound message

use crate::payload::{PayloadCodec, PayloadFormat};
use crate::Result;
use bytes::Bytes;
use lineserve_codec::TERMINATOR;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt;

/// A complete message received from a peer, terminator included
///
/// Equality compares bytes only.
#[derive(Clone)]
pub struct Message {
    bytes: Bytes,
    format: PayloadFormat,
}

impl Message {
    /// Wrap raw framed bytes, decoding as JSON
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self::with_format(bytes, PayloadFormat::default())
    }

    /// Wrap raw framed bytes, decoding with the given format
    pub fn with_format(bytes: impl Into<Bytes>, format: PayloadFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    /// Format used by [`Message::decode`]
    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// The raw bytes as received, including the `\r\n` terminator
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Consume the message and return its raw bytes
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Message length in bytes, including the terminator
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the message holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The message content with the terminator stripped
    pub fn payload(&self) -> &[u8] {
        self.bytes
            .strip_suffix(TERMINATOR.as_slice())
            .unwrap_or(&self.bytes[..])
    }

    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.payload())
    }

    /// Decode the payload with the message's format
    ///
    /// Messages received on a connection carry that connection's configured
    /// format; JSON otherwise.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.format.decode(self.payload())
    }

    /// Decode the payload with an explicit codec
    pub fn decode_with<C: PayloadCodec, T: DeserializeOwned>(&self) -> Result<T> {
        C::decode(self.payload())
    }

    /// Render the payload as text with an explicit codec
    pub fn to_text_with<C: PayloadCodec>(&self) -> Result<String> {
        C::to_text(self.payload())
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Message {}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Message").field(&self.text()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn payload_strips_terminator() {
        let message = Message::new("hello\r\n");
        assert_eq!(message.as_bytes(), "hello\r\n");
        assert_eq!(message.payload(), b"hello");
        assert_eq!(message.text(), "hello");
        assert_eq!(message.len(), 7);
    }

    #[test]
    fn payload_without_terminator_is_untouched() {
        let message = Message::new("bare");
        assert_eq!(message.payload(), b"bare");
    }

    #[test]
    fn decode_json_payload() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Move {
            x: i32,
            y: i32,
        }

        let message = Message::new("{\"x\":1,\"y\":-2}\r\n");
        let value: Move = message.decode().unwrap();
        assert_eq!(value, Move { x: 1, y: -2 });
    }

    #[test]
    fn decode_uses_message_format() {
        struct Reversed;

        impl PayloadCodec for Reversed {
            fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Bytes> {
                let mut json = serde_json::to_vec(value)?;
                json.reverse();
                Ok(Bytes::from(json))
            }

            fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
                let mut json = payload.to_vec();
                json.reverse();
                Ok(serde_json::from_slice(&json)?)
            }
        }

        let message = Message::with_format("]3,2,1[\r\n", PayloadFormat::of::<Reversed>());
        assert_eq!(message.decode::<Vec<u8>>().unwrap(), vec![1, 2, 3]);
        assert!(Message::new("]3,2,1[\r\n").decode::<Vec<u8>>().is_err());
        assert_eq!(message, Message::new("]3,2,1[\r\n"));
    }
}
