// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal file I/O shim.
//!
//! The engine never names `std::fs::File` directly: the sender side wants
//! read + seek, the receiver side wants write. Blanket impls let an
//! embedder hand in a real file, a `Cursor`, a pipe, or a mock in tests,
//! the same trick both ZMODEM crates in the retrieval pack use for their
//! `Reader`/`Writer` traits.

use std::io::{Read, Seek};

/// A handle the sender can seek within and read sequentially from.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}
