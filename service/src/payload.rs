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

//! Payload codecs used by `write_value` and `Message::decode`
//!
//! Codecs are marker types with static methods, selected at compile time with a
//! type parameter rather than passed around as trait objects.

use crate::{Result, ServiceError};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// Converts typed values to message payloads and back
///
/// Encoded payloads must not contain a `\r\n` sequence, since the connection
/// appends one to delimit the message.
pub trait PayloadCodec {
    /// Encode a value into payload bytes (without terminator)
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes>;

    /// Decode payload bytes (without terminator) into a value
    fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T>;

    /// Render payload bytes as text
    fn to_text(payload: &[u8]) -> Result<String> {
        String::from_utf8(payload.to_vec()).map_err(|e| ServiceError::Payload(e.to_string()))
    }
}

/// Compact single-line JSON (the default payload codec)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    #[inline]
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    #[inline]
    fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// A payload codec captured as a value
///
/// Lets a connection carry its default codec in its configuration. Values
/// pass through [`serde_json::Value`] on the way, so the underlying format must
/// be self-describing.
#[derive(Clone, Copy)]
pub struct PayloadFormat {
    name: &'static str,
    encode: fn(&Value) -> Result<Bytes>,
    decode: fn(&[u8]) -> Result<Value>,
}

impl PayloadFormat {
    /// Capture the codec `C`
    pub fn of<C: PayloadCodec>() -> Self {
        Self {
            name: std::any::type_name::<C>(),
            encode: encode_value::<C>,
            decode: decode_value::<C>,
        }
    }

    /// Type name of the captured codec
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Encode a value into payload bytes (without terminator)
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        (self.encode)(&serde_json::to_value(value)?)
    }

    /// Decode payload bytes (without terminator) into a value
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        Ok(serde_json::from_value((self.decode)(payload)?)?)
    }
}

impl Default for PayloadFormat {
    fn default() -> Self {
        Self::of::<JsonCodec>()
    }
}

impl fmt::Debug for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PayloadFormat").field(&self.name).finish()
    }
}

fn encode_value<C: PayloadCodec>(value: &Value) -> Result<Bytes> {
    C::encode(value)
}

fn decode_value<C: PayloadCodec>(payload: &[u8]) -> Result<Value> {
    C::decode(payload)
}
