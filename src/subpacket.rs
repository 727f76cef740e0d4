// SPDX-License-Identifier: MIT OR Apache-2.0
//! Data subpacket terminators and the subpacket encoder.

use core::convert::TryFrom;
use std::fmt::{self, Display};

use crate::consts::*;
use crate::crc::{self, CrcKind};
use crate::frame::Encoding;

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Terminates a data subpacket and dictates whether the stream continues
/// and whether an ACK is expected before the sender proceeds.
pub enum Packet {
    /// End of frame, no ACK expected, next frame is a header.
    ZCRCE = 0x68,
    /// Continue stream, no ACK.
    ZCRCG = 0x69,
    /// Continue stream, ACK expected.
    ZCRCQ = 0x6a,
    /// End of frame, ACK expected (stop-and-wait).
    ZCRCW = 0x6b,
}

const PACKETS: &[Packet] = &[Packet::ZCRCE, Packet::ZCRCG, Packet::ZCRCQ, Packet::ZCRCW];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidPacket;

impl TryFrom<u8> for Packet {
    type Error = InvalidPacket;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PACKETS
            .iter()
            .find(|e| value == **e as u8)
            .copied()
            .ok_or(InvalidPacket)
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

/// Encodes a data subpacket: escaped payload, `ZDLE` + terminator, escaped
/// CRC trailer over `payload || terminator`.
pub fn encode(encoding: Encoding, terminator: Packet, payload: &[u8]) -> Vec<u8> {
    let kind: CrcKind = encoding.crc_kind();
    let mut out = Vec::with_capacity(payload.len() + 8);
    escape_into(payload, &mut out);
    out.push(ZDLE);
    out.push(terminator as u8);

    let mut digest_input = Vec::with_capacity(payload.len() + 1);
    digest_input.extend_from_slice(payload);
    digest_input.push(terminator as u8);
    let trailer = crc::compute(kind, &digest_input);
    escape_into(&trailer, &mut out);
    out
}
