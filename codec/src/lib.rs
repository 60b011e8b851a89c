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

//! CRLF message framing for line-oriented TCP protocols.
//!
//! [`MessageFramer`] is the I/O-free accumulator; [`LineCodec`] adapts it to
//! tokio-util's `Decoder`/`Encoder` traits.

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod codec;
mod framer;
mod result;

pub use self::codec::LineCodec;
pub use self::framer::{MessageFramer, TERMINATOR};
pub use self::result::{CodecError, CodecResult};
