// SPDX-License-Identifier: MIT OR Apache-2.0
//! A transport-agnostic ZMODEM file-transfer engine.
//!
//! This crate implements the ZMODEM framing, escaping, checksum, and
//! transfer state machine needed to send and receive files over an opaque
//! asynchronous byte channel. It does not open sockets, spawn PTYs, or
//! touch a terminal: the embedder feeds inbound bytes to
//! [`Engine::receive_byte`] one at a time and implements [`Handler`] to
//! receive outbound bytes and file-transfer events.
//!
//! ```no_run
//! use zmodem::{Engine, EngineConfig, FileInfo, Handler};
//!
//! struct Stdout;
//!
//! impl Handler for Stdout {
//!     fn on_data(&mut self, bytes: &[u8]) {
//!         use std::io::Write;
//!         std::io::stdout().write_all(bytes).ok();
//!     }
//!     fn on_accept_file(&mut self, info: &FileInfo) {
//!         eprintln!("offered {} ({} bytes)", info.name, info.size);
//!     }
//! }
//!
//! let mut engine = Engine::with_config(Stdout, EngineConfig::default());
//! engine.start_receiving();
//! ```

mod consts;
mod crc;
mod decoder;
mod engine;
mod error;
mod frame;
mod io;
mod subpacket;

pub use decoder::{DecodedFrame, Decoder};
pub use engine::{Engine, EngineConfig, FileInfo, Handler};
pub use error::EngineError;
pub use frame::{Encoding, FrameKind, Header, PeerCapabilities};
pub use io::ReadSeek;
pub use subpacket::{encode as encode_subpacket, Packet};
