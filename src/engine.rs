// SPDX-License-Identifier: MIT OR Apache-2.0
//! The transfer controller: the top-level state machine that reacts to
//! decoded frames and drives file offer/accept, data streaming, position
//! resync, EOF, and session end.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error, trace, warn};

use crate::consts::DEFAULT_SUBPACKET_SIZE;
use crate::decoder::{DecodedFrame, Decoder};
use crate::error::EngineError;
use crate::frame::{Encoding, FrameKind, Header, PeerCapabilities};
use crate::io::ReadSeek;
use crate::subpacket::{self, Packet};

/// Tunable knobs that don't change protocol semantics at their defaults.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Consecutive data-level failures tolerated before the session aborts.
    pub max_fail_count: u32,
    /// Bytes read from disk per outbound `ZDATA` subpacket write call.
    pub subpacket_size: usize,
    /// Whether CRC32 framing is offered/honored at all, independent of
    /// whether the peer advertises `CANFC32`.
    pub allow_crc32: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_fail_count: 5,
            subpacket_size: DEFAULT_SUBPACKET_SIZE,
            allow_crc32: true,
        }
    }
}

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    None,
    Sending,
    /// Sender has emitted ZEOF for the current file and is waiting for the
    /// receiver's ZRINIT before advancing to the next queued file.
    SendingFin,
    Receiving,
}

/// A file queued to be offered to the peer.
#[derive(Clone, Debug)]
struct PendingFile {
    path: PathBuf,
    name: String,
    size: u64,
    mtime: SystemTime,
}

/// Information parsed out of a peer's `ZFILE` subpacket, handed to
/// [`Handler::on_accept_file`].
#[derive(Clone, Debug, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub mode: u32,
    pub serial: u32,
    pub files_remaining: u32,
    pub bytes_remaining: u64,
}

/// Embedder-facing event sink. All methods default to a no-op so an
/// embedder only implements the events it cares about.
/// Implementations must not panic — internal faults are surfaced through
/// [`Handler::on_error`] instead.
pub trait Handler {
    /// A complete outbound fragment must be written to the transport, in
    /// order, with no gaps.
    fn on_data(&mut self, _bytes: &[u8]) {}
    /// Bytes durably written to the active receive file so far.
    fn on_progress(&mut self, _pos: u32) {}
    /// A fatal or advisory error occurred; the message is human-readable.
    fn on_error(&mut self, _msg: &str) {}
    /// The active file finished (receive side: written to completion;
    /// send side: fully transmitted and ZEOF acknowledged).
    fn on_complete_file(&mut self) {}
    /// Peer asked to begin a receive session (`ZRQINIT`).
    fn on_receive_request(&mut self) {}
    /// Peer is ready to receive a file offer (`ZRINIT`, mode was `None`).
    fn on_send_request(&mut self) {}
    /// Peer offered a file; call `accept_file_as` or `skip_file` in
    /// response.
    fn on_accept_file(&mut self, _info: &FileInfo) {}
    /// Session reached its terminal `ZFIN` exchange.
    fn on_finish(&mut self) {}
}

/// The ZMODEM transfer engine. Generic over the embedder's [`Handler`].
pub struct Engine<H: Handler> {
    handler: H,
    config: EngineConfig,
    decoder: Decoder,
    mode: Mode,

    queue: VecDeque<PendingFile>,
    send_file: Option<Box<dyn ReadSeek>>,
    send_pos: u32,
    send_len: u64,
    send_encoding: Encoding,

    recv_file: Option<Box<dyn Write>>,
    recv_pos: u32,
    recv_encoding: Encoding,
    current_offer: Option<FileInfo>,

    fail_count: u32,
    allow32: bool,
    last_header: Option<FrameKind>,
}

impl<H: Handler> Engine<H> {
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, EngineConfig::default())
    }

    pub fn with_config(handler: H, config: EngineConfig) -> Self {
        Engine {
            handler,
            config,
            decoder: Decoder::new(),
            mode: Mode::None,
            queue: VecDeque::new(),
            send_file: None,
            send_pos: 0,
            send_len: 0,
            send_encoding: Encoding::ZBIN,
            recv_file: None,
            recv_pos: 0,
            recv_encoding: Encoding::ZBIN,
            current_offer: None,
            fail_count: 0,
            allow32: false,
            last_header: None,
        }
    }

    /// Gives back the embedder's handler, consuming the engine.
    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Stats each path and populates the send queue.
    pub fn set_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<(), EngineError> {
        for path in paths {
            let path = path.as_ref();
            let meta = fs::metadata(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| EngineError::Protocol(format!("no file name in {}", path.display())))?;
            self.queue.push_back(PendingFile {
                path: path.to_path_buf(),
                name,
                size: meta.len(),
                mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(())
    }

    /// Requires mode=None; sets mode=Receiving and emits ZRINIT.
    pub fn start_receiving(&mut self) {
        if self.mode != Mode::None {
            warn!("start_receiving called in mode {:?}", self.mode);
            return;
        }
        self.mode = Mode::Receiving;
        let flags = PeerCapabilities::CANOVIO | PeerCapabilities::CANCRY | PeerCapabilities::CANFC32;
        self.emit_header(Encoding::ZHEX, FrameKind::ZRINIT, [0, 0, 0, flags.bits()]);
    }

    /// Requires mode=None and a non-empty queue; sets mode=Sending. The
    /// first file offer is deferred to the peer's `ZRINIT` (see
    /// `on_zrinit`): the sender does not yet know the peer's capabilities
    /// (CRC32 support) or whether it is even listening.
    pub fn start_sending(&mut self) {
        if self.mode != Mode::None || self.queue.is_empty() {
            warn!("start_sending called in mode {:?} with {} queued files", self.mode, self.queue.len());
            return;
        }
        self.mode = Mode::Sending;
    }

    /// Valid only in mode=Receiving after `on_accept_file`: opens the
    /// output file, zeros `recv_pos`, emits ZRPOS(0).
    pub fn accept_file_as<P: AsRef<Path>>(&mut self, path: P) -> Result<(), EngineError> {
        if self.mode != Mode::Receiving || self.current_offer.is_none() {
            return Err(EngineError::Protocol("accept_file_as outside an active offer".into()));
        }
        let file = File::create(path)?;
        self.recv_file = Some(Box::new(file));
        self.recv_pos = 0;
        self.fail_count = 0;
        self.emit_position_header(Encoding::ZHEX, FrameKind::ZRPOS, 0);
        Ok(())
    }

    /// Valid only in mode=Receiving: emits ZSKIP, abandoning the current
    /// offer.
    pub fn skip_file(&mut self) {
        if self.mode != Mode::Receiving {
            warn!("skip_file called in mode {:?}", self.mode);
            return;
        }
        self.current_offer = None;
        self.emit_header(Encoding::ZHEX, FrameKind::ZSKIP, [0; 4]);
    }

    /// Valid only in mode=None: emits ZFIN and declines a send offer.
    pub fn deny_sending(&mut self) {
        if self.mode != Mode::None {
            warn!("deny_sending called in mode {:?}", self.mode);
            return;
        }
        self.emit_header(Encoding::ZHEX, FrameKind::ZFIN, [0; 4]);
    }

    /// Feeds one inbound byte to the engine.
    pub fn receive_byte(&mut self, byte: u8) {
        match self.decoder.receive_byte(byte) {
            None => {}
            Some(DecodedFrame::Header(header)) => self.process_header(header),
            Some(DecodedFrame::Packet { payload, terminator }) => self.process_packet(payload, terminator),
            Some(DecodedFrame::PacketCrcError) => self.resync("data subpacket CRC mismatch"),
        }
    }

    // -- outbound helpers -------------------------------------------------

    fn emit_header(&mut self, encoding: Encoding, kind: FrameKind, flags: [u8; 4]) {
        let header = Header::with_flags(encoding, kind, flags);
        trace!("emit {header}");
        let bytes = header.encode();
        self.handler.on_data(&bytes);
    }

    fn emit_position_header(&mut self, encoding: Encoding, kind: FrameKind, pos: u32) {
        let header = Header::with_position(encoding, kind, pos);
        trace!("emit {header} pos={pos}");
        let bytes = header.encode();
        self.handler.on_data(&bytes);
    }

    fn emit_subpacket(&mut self, encoding: Encoding, terminator: Packet, payload: &[u8]) {
        let bytes = subpacket::encode(encoding, terminator, payload);
        self.handler.on_data(&bytes);
    }

    // -- header dispatch ---------------------------------------------------

    fn process_header(&mut self, header: Header) {
        debug!("received {header}");
        self.last_header = Some(header.kind);
        match header.kind {
            FrameKind::ZRQINIT => self.handler.on_receive_request(),
            FrameKind::ZRINIT => self.on_zrinit(header),
            FrameKind::ZFILE => self.on_zfile(header),
            FrameKind::ZDATA => self.on_zdata(header),
            FrameKind::ZRPOS => self.on_zrpos(header),
            FrameKind::ZEOF => self.on_zeof(header),
            FrameKind::ZACK => self.on_zack(header),
            FrameKind::ZFIN => self.on_zfin(),
            FrameKind::ZSKIP => debug!("peer skipped the current file"),
            FrameKind::ZNAK => debug!("peer NAKed the last frame"),
            other => trace!("no handler for {other}, ignoring"),
        }
    }

    fn on_zrinit(&mut self, header: Header) {
        let flags = PeerCapabilities::from_bits_truncate(header.flags[3]);
        self.allow32 = self.config.allow_crc32 && flags.contains(PeerCapabilities::CANFC32);
        self.send_encoding = if self.allow32 { Encoding::ZBIN32 } else { Encoding::ZBIN };

        match self.mode {
            Mode::None => self.handler.on_send_request(),
            Mode::Sending => self.next_send(),
            Mode::SendingFin => {
                self.close_send_file();
                self.queue.pop_front();
                self.mode = Mode::Sending;
                self.next_send();
            }
            Mode::Receiving => {}
        }
    }

    fn on_zfile(&mut self, header: Header) {
        if self.mode != Mode::Receiving {
            trace!("ZFILE outside a receive session, ignoring");
            return;
        }
        self.recv_encoding = header.encoding;
        self.decoder.arm_subpacket(header.encoding);
    }

    fn on_zdata(&mut self, header: Header) {
        if self.mode != Mode::Receiving {
            trace!("ZDATA outside a receive session, ignoring");
            return;
        }
        let pos = header.position();
        if pos != self.recv_pos {
            self.resync("ZDATA position mismatch");
            return;
        }
        self.recv_encoding = header.encoding;
        self.decoder.arm_subpacket(header.encoding);
    }

    fn on_zrpos(&mut self, header: Header) {
        if self.mode != Mode::Sending && self.mode != Mode::SendingFin {
            trace!("ZRPOS outside a send session, ignoring");
            return;
        }
        self.send_pos = header.position();
        self.mode = Mode::Sending;
        self.send_data();
    }

    fn on_zeof(&mut self, header: Header) {
        if self.mode != Mode::Receiving {
            return;
        }
        let pos = header.position();
        if pos != self.recv_pos {
            self.resync("ZEOF position mismatch");
            return;
        }
        if let Some(offer) = &self.current_offer {
            if offer.size != self.recv_pos as u64 {
                warn!("received {} bytes, offer announced {}", self.recv_pos, offer.size);
            }
        }
        self.close_recv_file();
        self.handler.on_complete_file();
        let flags = PeerCapabilities::CANOVIO | PeerCapabilities::CANCRY | PeerCapabilities::CANFC32;
        self.emit_header(Encoding::ZHEX, FrameKind::ZRINIT, [0, 0, 0, flags.bits()]);
    }

    fn on_zack(&mut self, header: Header) {
        self.send_pos = header.position();
        if self.mode == Mode::Sending {
            self.send_data();
        }
    }

    fn on_zfin(&mut self) {
        match self.mode {
            Mode::Sending | Mode::SendingFin => {
                self.handler.on_data(b"OO");
                self.mode = Mode::None;
                self.handler.on_finish();
            }
            Mode::Receiving => {
                self.emit_header(Encoding::ZHEX, FrameKind::ZFIN, [0; 4]);
                self.mode = Mode::None;
                self.handler.on_finish();
            }
            Mode::None => {}
        }
    }

    // -- data subpacket dispatch -------------------------------------------

    fn process_packet(&mut self, payload: Vec<u8>, terminator: Packet) {
        match self.last_header {
            Some(FrameKind::ZFILE) => self.process_zfile_subpacket(&payload),
            Some(FrameKind::ZDATA) => self.process_data_subpacket(payload, terminator),
            _ => warn!("data subpacket with no pending ZFILE/ZDATA header, dropping"),
        }
    }

    fn process_zfile_subpacket(&mut self, payload: &[u8]) {
        match parse_zfile(payload) {
            Ok(info) => {
                debug!("file offer: {} ({} bytes)", info.name, info.size);
                self.current_offer = Some(info.clone());
                self.handler.on_accept_file(&info);
            }
            Err(e) => {
                error!("malformed ZFILE subpacket: {e}");
                self.handler.on_error(&e.to_string());
                self.emit_header(Encoding::ZHEX, FrameKind::ZNAK, [0; 4]);
            }
        }
    }

    fn process_data_subpacket(&mut self, payload: Vec<u8>, terminator: Packet) {
        if let Err(e) = self.write_recv_payload(&payload) {
            error!("write failed: {e}");
            self.handler.on_error(&e.to_string());
            self.abort();
            return;
        }
        self.recv_pos += payload.len() as u32;
        self.fail_count = 0;
        self.handler.on_progress(self.recv_pos);

        match terminator {
            Packet::ZCRCE => {}
            Packet::ZCRCG => self.decoder.arm_subpacket(self.recv_encoding),
            Packet::ZCRCQ => {
                self.emit_position_header(Encoding::ZHEX, FrameKind::ZACK, self.recv_pos);
                self.decoder.arm_subpacket(self.recv_encoding);
            }
            Packet::ZCRCW => self.emit_position_header(Encoding::ZHEX, FrameKind::ZACK, self.recv_pos),
        }
    }

    fn write_recv_payload(&mut self, payload: &[u8]) -> std::io::Result<()> {
        match self.recv_file.as_mut() {
            Some(file) => file.write_all(payload),
            None => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no active receive file")),
        }
    }

    // -- resync / abort -----------------------------------------------------

    fn resync(&mut self, reason: &str) {
        warn!("{reason}, fail_count={}", self.fail_count + 1);
        self.fail_count += 1;
        if self.fail_count > self.config.max_fail_count {
            self.abort();
            return;
        }
        self.emit_position_header(Encoding::ZHEX, FrameKind::ZRPOS, self.recv_pos);
    }

    fn abort(&mut self) {
        error!("fail count exceeded, aborting session");
        self.close_recv_file();
        self.close_send_file();
        self.decoder.reset();
        self.mode = Mode::None;
        self.fail_count = 0;
        self.handler.on_error("Fail count exceeded");
    }

    // -- sender side ----------------------------------------------------------

    /// Offers the next queued file: ZFIN when the queue is empty, otherwise
    /// ZFILE plus a ZCRCW-terminated options subpacket.
    fn next_send(&mut self) {
        let Some(file) = self.queue.front().cloned() else {
            self.emit_header(self.send_encoding, FrameKind::ZFIN, [0; 4]);
            return;
        };
        self.emit_header(self.send_encoding, FrameKind::ZFILE, [0; 4]);

        let files_remaining = self.queue.len() as u32;
        let bytes_remaining: u64 = self.queue.iter().map(|f| f.size).sum();
        let options = build_zfile_options(&file, files_remaining, bytes_remaining);
        self.emit_subpacket(self.send_encoding, Packet::ZCRCW, &options);
    }

    /// Sends the next chunk of the currently offered file, opening it on
    /// first use and emitting ZEOF once the file is exhausted.
    fn send_data(&mut self) {
        if self.send_file.is_none() {
            let Some(file) = self.queue.front() else {
                warn!("send_data called with an empty queue");
                return;
            };
            match File::open(&file.path) {
                Ok(f) => {
                    self.send_len = file.size;
                    self.send_file = Some(Box::new(f));
                }
                Err(e) => {
                    error!("failed to open {}: {e}", file.path.display());
                    self.handler.on_error(&e.to_string());
                    self.abort();
                    return;
                }
            }
        }

        if self.send_pos as u64 >= self.send_len {
            self.emit_position_header(self.send_encoding, FrameKind::ZEOF, self.send_pos);
            return;
        }

        let mut buf = vec![0u8; self.config.subpacket_size];
        let n = match self.read_send_chunk(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                error!("read failed: {e}");
                self.handler.on_error(&e.to_string());
                self.abort();
                return;
            }
        };
        let chunk = &buf[..n];

        if self.send_pos as u64 + n as u64 >= self.send_len {
            self.emit_position_header(self.send_encoding, FrameKind::ZDATA, self.send_pos);
            self.emit_subpacket(self.send_encoding, Packet::ZCRCE, chunk);
            self.send_pos += n as u32;
            self.handler.on_progress(self.send_pos);
            self.mode = Mode::SendingFin;
            self.emit_position_header(self.send_encoding, FrameKind::ZEOF, self.send_pos);
            self.handler.on_complete_file();
        } else {
            self.emit_position_header(self.send_encoding, FrameKind::ZDATA, self.send_pos);
            self.emit_subpacket(self.send_encoding, Packet::ZCRCW, chunk);
            self.send_pos += n as u32;
            self.handler.on_progress(self.send_pos);
        }
    }

    fn read_send_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let file = self.send_file.as_mut().expect("send_data opens the file first");
        file.seek(SeekFrom::Start(self.send_pos as u64))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn close_recv_file(&mut self) {
        self.recv_file = None;
        self.current_offer = None;
    }

    fn close_send_file(&mut self) {
        self.send_file = None;
        self.send_pos = 0;
        self.send_len = 0;
    }
}

fn build_zfile_options(file: &PendingFile, files_remaining: u32, bytes_remaining: u64) -> Vec<u8> {
    let mtime = file
        .mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut out = Vec::with_capacity(file.name.len() + 32);
    out.extend_from_slice(file.name.as_bytes());
    out.push(0);
    out.extend_from_slice(
        format!("{} {:o} 100644 0 {} {}", file.size, mtime, files_remaining, bytes_remaining).as_bytes(),
    );
    out.push(0);
    out
}

/// Parses a ZFILE subpacket body: a NUL-terminated filename followed by a
/// space-separated ASCII options string (length, octal mtime, octal mode,
/// serial number, files remaining, bytes remaining — trailing fields are
/// optional and default to zero).
fn parse_zfile(payload: &[u8]) -> Result<FileInfo, EngineError> {
    let nul = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| EngineError::Decode("ZFILE subpacket missing NUL after filename".into()))?;
    let name = String::from_utf8_lossy(&payload[..nul]).into_owned();
    if name.is_empty() {
        return Err(EngineError::Decode("ZFILE subpacket has an empty filename".into()));
    }

    let rest = &payload[nul + 1..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let options = String::from_utf8_lossy(&rest[..end]);
    let mut fields = options.split_whitespace();

    let size: u64 = fields
        .next()
        .ok_or_else(|| EngineError::Decode("ZFILE options missing length".into()))?
        .parse()
        .map_err(|_| EngineError::Decode("ZFILE length is not decimal".into()))?;
    let mtime_secs: Option<i64> = fields.next().and_then(|s| i64::from_str_radix(s, 8).ok());
    let mode = fields.next().and_then(|s| u32::from_str_radix(s, 8).ok()).unwrap_or(0);
    let serial = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let files_remaining = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let bytes_remaining = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    let mtime = mtime_secs.and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    Ok(FileInfo {
        name,
        size,
        mtime,
        mode,
        serial,
        files_remaining,
        bytes_remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_classic_zfile_option_string() {
        let mut payload = b"hello.bin\0".to_vec();
        payload.extend_from_slice(b"11 0 100644 0 1 11\0");
        let info = parse_zfile(&payload).unwrap();
        assert_eq!(info.name, "hello.bin");
        assert_eq!(info.size, 11);
        assert_eq!(info.mode, 0o100644);
        assert_eq!(info.files_remaining, 1);
        assert_eq!(info.bytes_remaining, 11);
    }

    #[test]
    fn parses_zfile_option_string_missing_trailing_fields() {
        let mut payload = b"a.txt\0".to_vec();
        payload.extend_from_slice(b"4\0");
        let info = parse_zfile(&payload).unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.size, 4);
        assert_eq!(info.mode, 0);
        assert_eq!(info.bytes_remaining, 0);
    }

    #[test]
    fn rejects_zfile_subpacket_without_nul() {
        assert!(parse_zfile(b"no nul terminator here").is_err());
    }

    #[derive(Default)]
    struct RecordingHandler {
        sent: Vec<u8>,
        progress: Vec<u32>,
        send_requests: u32,
        errors: Vec<String>,
    }

    impl Handler for RecordingHandler {
        fn on_data(&mut self, bytes: &[u8]) {
            self.sent.extend_from_slice(bytes);
        }
        fn on_progress(&mut self, pos: u32) {
            self.progress.push(pos);
        }
        fn on_send_request(&mut self) {
            self.send_requests += 1;
        }
        fn on_error(&mut self, msg: &str) {
            self.errors.push(msg.to_string());
        }
    }

    #[test]
    fn start_receiving_emits_zrinit_once() {
        let mut engine = Engine::new(RecordingHandler::default());
        engine.start_receiving();
        assert_eq!(engine.mode, Mode::Receiving);
        assert!(!engine.handler.sent.is_empty());
    }

    #[test]
    fn zrinit_in_none_mode_raises_send_request() {
        let mut engine = Engine::new(RecordingHandler::default());
        let header = Header::with_flags(Encoding::ZHEX, FrameKind::ZRINIT, [0, 0, 0, 0x23]);
        for byte in header.encode() {
            engine.receive_byte(byte);
        }
        assert_eq!(engine.handler.send_requests, 1);
    }
}
