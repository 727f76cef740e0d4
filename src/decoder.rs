// SPDX-License-Identifier: MIT OR Apache-2.0
//! Byte-driven frame decoder.
//!
//! [`Decoder::receive_byte`] is fed one inbound byte at a time. It hunts
//! for a frame prefix, decodes whichever of the three header encodings the
//! peer used, validates the CRC, and — once armed by the caller via
//! [`Decoder::arm_subpacket`] — decodes data subpackets the same way.
//!
//! The states below are a tagged enum rather than numeric state tags: each
//! variant carries exactly the buffer it needs, so there's no separate
//! byte-counting bookkeeping to keep in sync with what's actually been
//! collected so far.

use core::convert::TryFrom;
use log::{debug, trace, warn};

use crate::consts::*;
use crate::crc::{self, CrcKind};
use crate::frame::{Encoding, FrameKind, Header};
use crate::subpacket::Packet;

/// A fully decoded, CRC-validated unit handed back to the transfer
/// controller.
#[derive(Debug, PartialEq)]
pub enum DecodedFrame {
    /// A complete header (HEX, BIN, or BIN32).
    Header(Header),
    /// A complete, CRC-valid data subpacket.
    Packet { payload: Vec<u8>, terminator: Packet },
    /// A data subpacket whose CRC did not match. The payload is discarded;
    /// the controller is responsible for issuing the ZRPOS resync.
    PacketCrcError,
}

#[derive(Debug)]
enum State {
    /// State 0: hunting for the next `ZPAD`.
    Hunt,
    /// State 1: saw one `ZPAD`.
    SeenPad,
    /// State 2: saw `ZPAD ZPAD`.
    SeenPadPad,
    /// State 4: saw `ZPAD ZDLE`, waiting for the BIN/BIN32 selector byte.
    SeenPadZdle,
    /// States 20/21: collecting the hex-encoded header body.
    HexHeader { buf: Vec<u8>, high: Option<u8> },
    /// State 30: collecting the escaped binary header body.
    BinHeader {
        encoding: Encoding,
        buf: Vec<u8>,
        want: usize,
        escape: bool,
    },
    /// State 31: collecting an escaped data subpacket payload.
    Subpacket {
        encoding: Encoding,
        buf: Vec<u8>,
        escape: bool,
    },
    /// State 32: collecting the subpacket's trailing CRC bytes.
    SubpacketTrailer {
        encoding: Encoding,
        payload: Vec<u8>,
        terminator: Packet,
        trailer: Vec<u8>,
        want: usize,
        escape: bool,
    },
}

/// The byte-level ZMODEM frame decoder.
pub struct Decoder {
    state: State,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder { state: State::Hunt }
    }

    /// Resets the decoder to the hunt state, discarding any partial frame.
    pub fn reset(&mut self) {
        self.state = State::Hunt;
    }

    /// Arms the decoder to collect a data subpacket in `encoding` once the
    /// transfer controller has processed a ZFILE/ZDATA header. Any state
    /// already collected for the next header is discarded.
    pub fn arm_subpacket(&mut self, encoding: Encoding) {
        self.state = State::Subpacket {
            encoding,
            buf: Vec::new(),
            escape: false,
        };
    }

    /// Feeds one inbound byte to the decoder.
    pub fn receive_byte(&mut self, byte: u8) -> Option<DecodedFrame> {
        match core::mem::replace(&mut self.state, State::Hunt) {
            State::Hunt => self.on_hunt(byte),
            State::SeenPad => self.on_seen_pad(byte),
            State::SeenPadPad => self.on_seen_pad_pad(byte),
            State::SeenPadZdle => self.on_seen_pad_zdle(byte),
            State::HexHeader { buf, high } => self.on_hex_header(buf, high, byte),
            State::BinHeader {
                encoding,
                buf,
                want,
                escape,
            } => self.on_bin_header(encoding, buf, want, escape, byte),
            State::Subpacket {
                encoding,
                buf,
                escape,
            } => self.on_subpacket(encoding, buf, escape, byte),
            State::SubpacketTrailer {
                encoding,
                payload,
                terminator,
                trailer,
                want,
                escape,
            } => self.on_subpacket_trailer(encoding, payload, terminator, trailer, want, escape, byte),
        }
    }

    fn on_hunt(&mut self, byte: u8) -> Option<DecodedFrame> {
        if byte == ZPAD {
            self.state = State::SeenPad;
        } else {
            self.state = State::Hunt;
        }
        None
    }

    fn on_seen_pad(&mut self, byte: u8) -> Option<DecodedFrame> {
        self.state = match byte {
            ZPAD => State::SeenPadPad,
            ZDLE => State::SeenPadZdle,
            _ => State::Hunt,
        };
        None
    }

    fn on_seen_pad_pad(&mut self, byte: u8) -> Option<DecodedFrame> {
        self.state = if byte == ZDLE {
            State::SeenPadZdle
        } else {
            State::Hunt
        };
        None
    }

    fn on_seen_pad_zdle(&mut self, byte: u8) -> Option<DecodedFrame> {
        self.state = match byte {
            ZHEX => State::HexHeader {
                buf: Vec::with_capacity(7),
                high: None,
            },
            b'A' => State::BinHeader {
                encoding: Encoding::ZBIN,
                buf: Vec::with_capacity(7),
                want: 5 + CrcKind::Crc16.trailer_len(),
                escape: false,
            },
            b'C' => State::BinHeader {
                encoding: Encoding::ZBIN32,
                buf: Vec::with_capacity(9),
                want: 5 + CrcKind::Crc32.trailer_len(),
                escape: false,
            },
            _ => State::Hunt,
        };
        None
    }

    fn on_hex_header(&mut self, mut buf: Vec<u8>, high: Option<u8>, byte: u8) -> Option<DecodedFrame> {
        let nibble = match hex_nibble(byte) {
            Some(n) => n,
            None => {
                trace!("framing error: non-hex byte 0x{byte:02x} in hex header");
                self.state = State::Hunt;
                return None;
            }
        };
        match high {
            None => {
                self.state = State::HexHeader {
                    buf,
                    high: Some(nibble),
                };
                None
            }
            Some(h) => {
                buf.push((h << 4) | nibble);
                if buf.len() == 7 {
                    self.state = State::Hunt;
                    return self.finish_header(Encoding::ZHEX, buf);
                }
                self.state = State::HexHeader { buf, high: None };
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_bin_header(
        &mut self,
        encoding: Encoding,
        mut buf: Vec<u8>,
        want: usize,
        escape: bool,
        byte: u8,
    ) -> Option<DecodedFrame> {
        if escape {
            buf.push(byte ^ 0x40);
            if buf.len() == want {
                self.state = State::Hunt;
                return self.finish_header(encoding, buf);
            }
            self.state = State::BinHeader {
                encoding,
                buf,
                want,
                escape: false,
            };
            return None;
        }
        if byte == ZDLE {
            self.state = State::BinHeader {
                encoding,
                buf,
                want,
                escape: true,
            };
            return None;
        }
        buf.push(byte);
        if buf.len() == want {
            self.state = State::Hunt;
            return self.finish_header(encoding, buf);
        }
        self.state = State::BinHeader {
            encoding,
            buf,
            want,
            escape: false,
        };
        None
    }

    fn finish_header(&mut self, encoding: Encoding, raw: Vec<u8>) -> Option<DecodedFrame> {
        let crc_len = encoding.crc_kind().trailer_len();
        let (body, trailer) = raw.split_at(5);
        debug_assert_eq!(trailer.len(), crc_len);
        if !crc::verify(encoding.crc_kind(), body, trailer) {
            warn!("header CRC mismatch, dropping frame");
            return None;
        }
        let kind = match FrameKind::try_from(body[0]) {
            Ok(kind) => kind,
            Err(_) => {
                warn!("unknown frame kind 0x{:02x}", body[0]);
                return None;
            }
        };
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&body[1..5]);
        let header = Header::with_flags(encoding, kind, flags);
        debug!("decoded header {header}");
        Some(DecodedFrame::Header(header))
    }

    fn on_subpacket(&mut self, encoding: Encoding, mut buf: Vec<u8>, escape: bool, byte: u8) -> Option<DecodedFrame> {
        if escape {
            if (0x68..=0x6f).contains(&byte) {
                let terminator = match Packet::try_from(byte) {
                    Ok(t) => t,
                    Err(_) => {
                        warn!("framing error: unknown subpacket terminator 0x{byte:02x}");
                        self.state = State::Hunt;
                        return None;
                    }
                };
                let crc_len = encoding.crc_kind().trailer_len();
                self.state = State::SubpacketTrailer {
                    encoding,
                    payload: buf,
                    terminator,
                    trailer: Vec::with_capacity(crc_len),
                    want: crc_len,
                    escape: false,
                };
                return None;
            }
            buf.push(byte ^ 0x40);
            self.state = State::Subpacket {
                encoding,
                buf,
                escape: false,
            };
            return None;
        }
        if byte == ZDLE {
            self.state = State::Subpacket {
                encoding,
                buf,
                escape: true,
            };
            return None;
        }
        buf.push(byte);
        self.state = State::Subpacket {
            encoding,
            buf,
            escape: false,
        };
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn on_subpacket_trailer(
        &mut self,
        encoding: Encoding,
        payload: Vec<u8>,
        terminator: Packet,
        mut trailer: Vec<u8>,
        want: usize,
        escape: bool,
        byte: u8,
    ) -> Option<DecodedFrame> {
        if escape {
            trailer.push(byte ^ 0x40);
        } else if byte == ZDLE {
            self.state = State::SubpacketTrailer {
                encoding,
                payload,
                terminator,
                trailer,
                want,
                escape: true,
            };
            return None;
        } else {
            trailer.push(byte);
        }

        if trailer.len() < want {
            self.state = State::SubpacketTrailer {
                encoding,
                payload,
                terminator,
                trailer,
                want,
                escape: false,
            };
            return None;
        }

        self.state = State::Hunt;
        let mut digest_input = payload.clone();
        digest_input.push(terminator as u8);
        if !crc::verify(encoding.crc_kind(), &digest_input, &trailer) {
            warn!("subpacket CRC mismatch ({terminator:?})");
            return Some(DecodedFrame::PacketCrcError);
        }
        debug!("decoded subpacket, {} bytes, terminator {terminator:?}", payload.len());
        Some(DecodedFrame::Packet { payload, terminator })
    }
}

/// Decodes a single ASCII hex digit, tolerant of both cases: the encoder
/// only ever emits lowercase digits, but a peer that sends uppercase is
/// still accepted on input.
fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Header;

    fn feed(decoder: &mut Decoder, bytes: &[u8]) -> Vec<DecodedFrame> {
        bytes.iter().filter_map(|&b| decoder.receive_byte(b)).collect()
    }

    #[rstest::rstest]
    #[case(Encoding::ZHEX, FrameKind::ZRINIT)]
    #[case(Encoding::ZBIN, FrameKind::ZDATA)]
    #[case(Encoding::ZBIN32, FrameKind::ZEOF)]
    fn round_trips_headers_through_encode_decode(#[case] encoding: Encoding, #[case] kind: FrameKind) {
        let header = Header::with_position(encoding, kind, 0x1234_5678);
        let wire = header.encode();

        let mut decoder = Decoder::new();
        let mut out = feed(&mut decoder, &wire);
        assert_eq!(out.len(), 1);
        assert_eq!(out.pop(), Some(DecodedFrame::Header(header)));
    }

    #[test]
    fn hunts_past_garbage_before_the_frame_prefix() {
        let header = Header::new(Encoding::ZHEX, FrameKind::ZRQINIT);
        let mut wire = vec![0xffu8, 0x00, 0x42];
        wire.extend_from_slice(&header.encode());

        let mut decoder = Decoder::new();
        let out = feed(&mut decoder, &wire);
        assert_eq!(out, vec![DecodedFrame::Header(header)]);
    }

    #[test]
    fn decodes_subpacket_payload_and_terminator() {
        let mut decoder = Decoder::new();
        decoder.arm_subpacket(Encoding::ZBIN32);

        let wire = crate::subpacket::encode(Encoding::ZBIN32, Packet::ZCRCE, b"hello world");
        let mut out = feed(&mut decoder, &wire);
        assert_eq!(
            out.pop(),
            Some(DecodedFrame::Packet {
                payload: b"hello world".to_vec(),
                terminator: Packet::ZCRCE,
            })
        );
    }

    #[test]
    fn reports_subpacket_crc_error_without_panicking() {
        let mut decoder = Decoder::new();
        decoder.arm_subpacket(Encoding::ZBIN);

        let mut wire = crate::subpacket::encode(Encoding::ZBIN, Packet::ZCRCW, b"abc");
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let out = feed(&mut decoder, &wire);
        assert_eq!(out, vec![DecodedFrame::PacketCrcError]);
    }

    #[test]
    fn header_crc_failure_is_silently_dropped() {
        let header = Header::new(Encoding::ZBIN, FrameKind::ZRQINIT);
        let mut wire = header.encode();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let mut decoder = Decoder::new();
        let out = feed(&mut decoder, &wire);
        assert!(out.is_empty());
    }

    #[test]
    fn accepts_uppercase_hex_digits_on_input() {
        let header = Header::with_position(Encoding::ZHEX, FrameKind::ZACK, 11);
        let mut wire = header.encode();
        for byte in wire.iter_mut() {
            if byte.is_ascii_lowercase() {
                *byte = byte.to_ascii_uppercase();
            }
        }
        let mut decoder = Decoder::new();
        let out = feed(&mut decoder, &wire);
        assert_eq!(out, vec![DecodedFrame::Header(header)]);
    }
}
