// SPDX-License-Identifier: MIT OR Apache-2.0
//! CRC16-XMODEM and the ZMODEM CRC32 variant, table-driven via the `crc`
//! crate, with a small incremental wrapper so the decoder can feed bytes to
//! a running checksum as they arrive rather than re-hashing a complete
//! buffer every time.

use crc::{Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The checksum variant selected for a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrcKind {
    /// 16-bit XMODEM CRC, trailer emitted big-endian.
    Crc16,
    /// ZMODEM's bit-reversed CRC32, trailer emitted little-endian.
    Crc32,
}

impl CrcKind {
    /// Number of trailing CRC bytes on the wire for this variant.
    pub const fn trailer_len(self) -> usize {
        match self {
            CrcKind::Crc16 => 2,
            CrcKind::Crc32 => 4,
        }
    }
}

/// An in-progress checksum that bytes can be fed to incrementally.
pub enum CrcEngine {
    Crc16(crc::Digest<'static, u16>),
    Crc32(crc::Digest<'static, u32>),
}

impl CrcEngine {
    /// Starts a fresh digest for `kind`.
    pub fn new(kind: CrcKind) -> Self {
        match kind {
            CrcKind::Crc16 => CrcEngine::Crc16(CRC16.digest()),
            CrcKind::Crc32 => CrcEngine::Crc32(CRC32.digest()),
        }
    }

    /// Feeds additional bytes into the running digest.
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            CrcEngine::Crc16(d) => d.update(bytes),
            CrcEngine::Crc32(d) => d.update(bytes),
        }
    }

    /// Consumes the engine, returning the trailer bytes in wire order
    /// (big-endian for CRC16, little-endian for CRC32).
    pub fn finalize(self) -> Vec<u8> {
        match self {
            CrcEngine::Crc16(d) => d.finalize().to_be_bytes().to_vec(),
            CrcEngine::Crc32(d) => d.finalize().to_le_bytes().to_vec(),
        }
    }
}

/// Computes the wire-order trailer for `data` in one shot.
pub fn compute(kind: CrcKind, data: &[u8]) -> Vec<u8> {
    let mut engine = CrcEngine::new(kind);
    engine.update(data);
    engine.finalize()
}

/// Checks `trailer` (as read off the wire) against the checksum of `data`.
pub fn verify(kind: CrcKind, data: &[u8], trailer: &[u8]) -> bool {
    trailer.len() == kind.trailer_len() && compute(kind, data) == trailer
}
