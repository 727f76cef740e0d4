// SPDX-License-Identifier: MIT OR Apache-2.0
//! Header types and the HEX/BIN/BIN32 frame encoder.

use core::convert::TryFrom;
use std::fmt::{self, Display};

use crate::consts::*;
use crate::crc::{self, CrcKind};

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The three wire encodings a header (and its following subpacket, if any)
/// can use. The receiver always emits `ZHEX`; the sender picks `ZBIN` or
/// `ZBIN32` depending on whether the peer advertised `CANFC32`.
pub enum Encoding {
    ZBIN = 0x41,
    ZHEX = 0x42,
    ZBIN32 = 0x43,
}

const ENCODINGS: &[Encoding] = &[Encoding::ZBIN, Encoding::ZHEX, Encoding::ZBIN32];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidEncoding;

impl TryFrom<u8> for Encoding {
    type Error = InvalidEncoding;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ENCODINGS
            .iter()
            .find(|e| value == **e as u8)
            .copied()
            .ok_or(InvalidEncoding)
    }
}

impl Encoding {
    /// The CRC variant this encoding carries (`ZHEX` and `ZBIN` both use
    /// CRC16; `ZBIN32` uses the ZMODEM CRC32 variant).
    pub const fn crc_kind(self) -> CrcKind {
        match self {
            Encoding::ZBIN32 => CrcKind::Crc32,
            Encoding::ZBIN | Encoding::ZHEX => CrcKind::Crc16,
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The 5-bit header type tag.
pub enum FrameKind {
    /// Request receive init
    ZRQINIT = 0,
    /// Receiver capabilities and packet size
    ZRINIT = 1,
    /// Send init sequence (optional)
    ZSINIT = 2,
    /// ACK to above
    ZACK = 3,
    /// File name from sender
    ZFILE = 4,
    /// To sender: skip this file
    ZSKIP = 5,
    /// Last packet was garbled
    ZNAK = 6,
    /// Abort batch transfers
    ZABORT = 7,
    /// Finish session
    ZFIN = 8,
    /// Resume data trans at this position
    ZRPOS = 9,
    /// Data packet(s) follow
    ZDATA = 10,
    /// End of file
    ZEOF = 11,
    /// Fatal Read or Write error detected
    ZFERR = 12,
    /// Request for file CRC and response
    ZCRC = 13,
    /// Receiver's challenge
    ZCHALLENGE = 14,
    /// Request is complete
    ZCOMPL = 15,
    /// Other end canned session with CAN*5
    ZCAN = 16,
    /// Request for free bytes on filesystem
    ZFREECNT = 17,
    /// Command from sending program
    ZCOMMAND = 18,
    /// Output to standard error, data follows
    ZSTDERR = 19,
}

const FRAME_KINDS: &[FrameKind] = &[
    FrameKind::ZRQINIT,
    FrameKind::ZRINIT,
    FrameKind::ZSINIT,
    FrameKind::ZACK,
    FrameKind::ZFILE,
    FrameKind::ZSKIP,
    FrameKind::ZNAK,
    FrameKind::ZABORT,
    FrameKind::ZFIN,
    FrameKind::ZRPOS,
    FrameKind::ZDATA,
    FrameKind::ZEOF,
    FrameKind::ZFERR,
    FrameKind::ZCRC,
    FrameKind::ZCHALLENGE,
    FrameKind::ZCOMPL,
    FrameKind::ZCAN,
    FrameKind::ZFREECNT,
    FrameKind::ZCOMMAND,
    FrameKind::ZSTDERR,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidFrameKind;

impl TryFrom<u8> for FrameKind {
    type Error = InvalidFrameKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        FRAME_KINDS
            .iter()
            .find(|t| value == **t as u8)
            .copied()
            .ok_or(InvalidFrameKind)
    }
}

impl Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

/// A decoded or to-be-sent ZMODEM header: five bytes (type + 4 parameter
/// bytes) plus the encoding it travels in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub encoding: Encoding,
    pub kind: FrameKind,
    pub flags: [u8; 4],
}

impl Header {
    pub const fn new(encoding: Encoding, kind: FrameKind) -> Header {
        Header {
            encoding,
            kind,
            flags: [0; 4],
        }
    }

    pub const fn with_flags(encoding: Encoding, kind: FrameKind, flags: [u8; 4]) -> Header {
        Header {
            encoding,
            kind,
            flags,
        }
    }

    /// Builds a position-carrying header (ZRPOS/ZACK/ZDATA/ZEOF/ZFERR/ZCRC):
    /// the parameter bytes are the position, little-endian.
    pub const fn with_position(encoding: Encoding, kind: FrameKind, position: u32) -> Header {
        Header::with_flags(encoding, kind, position.to_le_bytes())
    }

    /// Reads the parameter bytes as a little-endian 32-bit position.
    pub const fn position(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    /// The 5 raw header bytes (`[kind, ZP0, ZP1, ZP2, ZP3]`), before
    /// encoding/escaping.
    fn raw_bytes(&self) -> [u8; 5] {
        [
            self.kind as u8,
            self.flags[0],
            self.flags[1],
            self.flags[2],
            self.flags[3],
        ]
    }

    /// Encodes the full on-wire representation of this header (prefix,
    /// body, CRC trailer, and — for HEX — the CRLF/XON suffix).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.push(ZPAD);
        if self.encoding == Encoding::ZHEX {
            out.push(ZPAD);
        }
        out.push(ZDLE);
        out.push(self.encoding as u8);

        let raw = self.raw_bytes();
        let trailer = crc::compute(self.encoding.crc_kind(), &raw);

        if self.encoding == Encoding::ZHEX {
            let mut hex_body = String::with_capacity(14);
            hex_body.push_str(&hex::encode(raw));
            hex_body.push_str(&hex::encode(&trailer));
            out.extend_from_slice(hex_body.as_bytes());
            out.extend_from_slice(&[CR, LF]);
            if self.kind != FrameKind::ZACK && self.kind != FrameKind::ZFIN {
                out.push(XON);
            }
        } else {
            let mut body = Vec::with_capacity(raw.len() + trailer.len());
            body.extend_from_slice(&raw);
            body.extend_from_slice(&trailer);
            escape_into(&body, &mut out);
        }
        out
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:8} {}", self.encoding, self.kind)
    }
}

bitflags::bitflags! {
    /// `ZRINIT` capability flags, carried in ZP3. Only `CANFC32` changes
    /// engine behavior (it enables CRC32 framing for outbound data); the
    /// rest are parsed and kept around for logging/introspection.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PeerCapabilities: u8 {
        /// Can send and receive in full-duplex
        const CANFDX = 0x01;
        /// Can receive data in parallel with disk I/O
        const CANOVIO = 0x02;
        /// Can send a break signal
        const CANBRK = 0x04;
        /// Can decrypt
        const CANCRY = 0x08;
        /// Can uncompress
        const CANLZW = 0x10;
        /// Can use 32-bit frame check
        const CANFC32 = 0x20;
        /// Expects control characters to be escaped
        const ESCCTL = 0x40;
        /// Expects the 8th bit to be escaped
        const ESC8 = 0x80;
    }
}
