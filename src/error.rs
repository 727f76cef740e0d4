// SPDX-License-Identifier: MIT OR Apache-2.0
//! Internal error type for fallible engine operations.

use thiserror::Error;

/// Errors the engine can encounter outside of ordinary protocol resync.
///
/// Protocol-level hiccups that the spec treats as "silently drop and
/// resync" (bad CRC, framing garbage, position mismatch) never reach this
/// type — they are handled inline by the decoder/controller. `EngineError`
/// covers the cases an embedder's `on_error` callback actually needs a
/// message for: a file handle misbehaving, or a ZFILE options string the
/// engine cannot make sense of.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Decode(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
