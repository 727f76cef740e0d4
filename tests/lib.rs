// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios against the public `Engine` API.

use std::cell::RefCell;
use std::rc::Rc;

use tempfile::tempdir;
use zmodem::{DecodedFrame, Decoder, Encoding, Engine, FileInfo, FrameKind, Handler, Header, Packet};

/// Captures everything the engine emits; decodes it back with an
/// independent [`Decoder`] instance so assertions read the wire, not the
/// engine's own state.
#[derive(Default)]
struct Recorder {
    wire: Vec<u8>,
    progress: Vec<u32>,
    accepted: Vec<FileInfo>,
    complete_files: u32,
    errors: Vec<String>,
    receive_requests: u32,
}

impl Handler for Recorder {
    fn on_data(&mut self, bytes: &[u8]) {
        self.wire.extend_from_slice(bytes);
    }
    fn on_progress(&mut self, pos: u32) {
        self.progress.push(pos);
    }
    fn on_error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
    fn on_complete_file(&mut self) {
        self.complete_files += 1;
    }
    fn on_receive_request(&mut self) {
        self.receive_requests += 1;
    }
    fn on_accept_file(&mut self, info: &FileInfo) {
        self.accepted.push(info.clone());
    }
}

/// Decodes every header in `wire`, in order.
fn decoded_headers(wire: &[u8]) -> Vec<Header> {
    let mut decoder = Decoder::new();
    wire.iter()
        .filter_map(|&b| decoder.receive_byte(b))
        .filter_map(|f| match f {
            DecodedFrame::Header(h) => Some(h),
            _ => None,
        })
        .collect()
}

fn feed(engine: &mut Engine<Recorder>, bytes: &[u8]) {
    for &b in bytes {
        engine.receive_byte(b);
    }
}

#[test]
fn scenario_1_receive_handshake_emits_zrinit() {
    let mut engine = Engine::new(Recorder::default());
    engine.start_receiving();

    let headers = decoded_headers(&engine.handler_mut().wire);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].kind, FrameKind::ZRINIT);
    assert_eq!(headers[0].encoding, Encoding::ZHEX);
    // CANOVIO | CANCRY | CANFC32
    assert_eq!(headers[0].flags[3], 0x2a);
}

#[test]
fn scenario_2_file_offer_accepted() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");

    let mut engine = Engine::new(Recorder::default());
    engine.start_receiving();
    engine.handler_mut().wire.clear();

    feed(&mut engine, &Header::new(Encoding::ZHEX, FrameKind::ZRQINIT).encode());
    assert_eq!(engine.handler_mut().receive_requests, 1);

    feed(&mut engine, &Header::new(Encoding::ZBIN, FrameKind::ZFILE).encode());
    let mut payload = b"hello.bin\0".to_vec();
    payload.extend_from_slice(b"11 0 100644 0 1 11\0");
    feed(&mut engine, &zmodem::encode_subpacket(Encoding::ZBIN, Packet::ZCRCW, &payload));

    assert_eq!(engine.handler_mut().accepted.len(), 1);
    let offer = &engine.handler_mut().accepted[0];
    assert_eq!(offer.name, "hello.bin");
    assert_eq!(offer.size, 11);

    engine.handler_mut().wire.clear();
    engine.accept_file_as(&out_path).unwrap();
    let headers = decoded_headers(&engine.handler_mut().wire);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].kind, FrameKind::ZRPOS);
    assert_eq!(headers[0].encoding, Encoding::ZHEX);
    assert_eq!(headers[0].position(), 0);
}

fn offer_and_accept(engine: &mut Engine<Recorder>, out_path: &std::path::Path) {
    engine.start_receiving();
    feed(engine, &Header::new(Encoding::ZBIN, FrameKind::ZFILE).encode());
    let mut payload = b"hello.bin\0".to_vec();
    payload.extend_from_slice(b"11 0 100644 0 1 11\0");
    feed(engine, &zmodem::encode_subpacket(Encoding::ZBIN, Packet::ZCRCW, &payload));
    engine.accept_file_as(out_path).unwrap();
    engine.handler_mut().wire.clear();
}

#[test]
fn scenario_3_data_round_trip() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");

    let mut engine = Engine::new(Recorder::default());
    offer_and_accept(&mut engine, &out_path);

    feed(&mut engine, &Header::with_position(Encoding::ZBIN, FrameKind::ZDATA, 0).encode());
    feed(&mut engine, &zmodem::encode_subpacket(Encoding::ZBIN, Packet::ZCRCE, b"hello world"));

    assert_eq!(engine.handler_mut().progress, vec![11]);
    let written = std::fs::read(&out_path).unwrap();
    assert_eq!(written, b"hello world");

    engine.handler_mut().wire.clear();
    feed(&mut engine, &Header::with_position(Encoding::ZBIN, FrameKind::ZEOF, 11).encode());

    assert_eq!(engine.handler_mut().complete_files, 1);
    let headers = decoded_headers(&engine.handler_mut().wire);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].kind, FrameKind::ZRINIT);
}

#[test]
fn scenario_4_crc_failure_triggers_resync() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");

    let mut engine = Engine::new(Recorder::default());
    offer_and_accept(&mut engine, &out_path);

    feed(&mut engine, &Header::with_position(Encoding::ZBIN, FrameKind::ZDATA, 0).encode());
    let mut wire = zmodem::encode_subpacket(Encoding::ZBIN, Packet::ZCRCE, b"hello world");
    let last = wire.len() - 1;
    wire[last] ^= 0xff;
    feed(&mut engine, &wire);

    assert!(engine.handler_mut().progress.is_empty());
    assert_eq!(engine.handler_mut().complete_files, 0);
    assert_eq!(std::fs::read(&out_path).unwrap().len(), 0);

    let headers = decoded_headers(&engine.handler_mut().wire);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].kind, FrameKind::ZRPOS);
    assert_eq!(headers[0].position(), 0);
}

#[test]
fn scenario_5_send_drives_to_completion() {
    let dir = tempdir().unwrap();
    let in_path = dir.path().join("a.bin");
    let content = vec![0x42u8; 65];
    std::fs::write(&in_path, &content).unwrap();

    let mut engine = Engine::new(Recorder::default());
    engine.set_files(&[in_path]).unwrap();
    engine.start_sending();
    engine.handler_mut().wire.clear();

    feed(&mut engine, &Header::with_flags(Encoding::ZHEX, FrameKind::ZRINIT, [0, 0, 0, 0x23]).encode());
    let headers = decoded_headers(&engine.handler_mut().wire);
    assert_eq!(headers[0].kind, FrameKind::ZFILE);
    assert_eq!(headers[0].encoding, Encoding::ZBIN32);

    engine.handler_mut().wire.clear();
    feed(&mut engine, &Header::with_position(Encoding::ZHEX, FrameKind::ZRPOS, 0).encode());

    let headers = decoded_headers(&engine.handler_mut().wire);
    assert_eq!(headers.len(), 2);
    assert_eq!(headers[0].kind, FrameKind::ZDATA);
    assert_eq!(headers[0].position(), 0);
    assert_eq!(headers[1].kind, FrameKind::ZEOF);
    assert_eq!(headers[1].position(), 65);
    assert_eq!(engine.handler_mut().complete_files, 1);

    engine.handler_mut().wire.clear();
    feed(&mut engine, &Header::with_flags(Encoding::ZHEX, FrameKind::ZRINIT, [0, 0, 0, 0x23]).encode());
    let headers = decoded_headers(&engine.handler_mut().wire);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].kind, FrameKind::ZFIN);

    engine.handler_mut().wire.clear();
    feed(&mut engine, &Header::new(Encoding::ZHEX, FrameKind::ZFIN).encode());
    assert_eq!(engine.handler_mut().wire, b"OO");
}

#[test]
fn scenario_6_abort_after_six_crc_errors() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");

    let mut engine = Engine::new(Recorder::default());
    offer_and_accept(&mut engine, &out_path);

    for _ in 0..6 {
        feed(&mut engine, &Header::with_position(Encoding::ZBIN, FrameKind::ZDATA, 0).encode());
        let mut wire = zmodem::encode_subpacket(Encoding::ZBIN, Packet::ZCRCE, b"hello world");
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        feed(&mut engine, &wire);
    }

    assert_eq!(engine.handler_mut().errors, vec!["Fail count exceeded"]);
}

/// Drives a full send/receive pair purely in-process, alternating byte
/// delivery between two engines until both settle.
#[test]
fn lib_loopback_send_recv() {
    let dir = tempdir().unwrap();
    let in_path = dir.path().join("payload.bin");
    let out_path = dir.path().join("payload.out");
    let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&in_path, &content).unwrap();

    #[derive(Default)]
    struct Side {
        wire: Option<Rc<RefCell<Vec<u8>>>>,
        want_accept: Option<std::path::PathBuf>,
        out_path: std::path::PathBuf,
        done: bool,
    }
    impl Handler for Side {
        fn on_data(&mut self, bytes: &[u8]) {
            if let Some(wire) = &self.wire {
                wire.borrow_mut().extend_from_slice(bytes);
            }
        }
        fn on_accept_file(&mut self, _info: &FileInfo) {
            self.want_accept = Some(self.out_path.clone());
        }
        fn on_complete_file(&mut self) {
            self.done = true;
        }
        fn on_finish(&mut self) {
            self.done = true;
        }
    }

    let sender_wire = Rc::new(RefCell::new(Vec::new()));
    let receiver_wire = Rc::new(RefCell::new(Vec::new()));

    let mut sender = Engine::new(Side {
        wire: Some(sender_wire.clone()),
        ..Default::default()
    });
    sender.set_files(&[in_path]).unwrap();
    sender.start_sending();

    let mut receiver = Engine::new(Side {
        wire: Some(receiver_wire.clone()),
        out_path: out_path.clone(),
        ..Default::default()
    });
    receiver.start_receiving();

    for _ in 0..20_000 {
        let from_receiver: Vec<u8> = receiver_wire.borrow_mut().drain(..).collect();
        for b in from_receiver {
            sender.receive_byte(b);
        }
        let from_sender: Vec<u8> = sender_wire.borrow_mut().drain(..).collect();
        for b in from_sender {
            receiver.receive_byte(b);
        }
        if let Some(path) = receiver.handler_mut().want_accept.take() {
            receiver.accept_file_as(&path).unwrap();
        }
        if sender.handler_mut().done && receiver.handler_mut().done {
            break;
        }
    }

    assert!(sender.handler_mut().done, "sender never finished");
    assert!(receiver.handler_mut().done, "receiver never finished");
    let received = std::fs::read(&out_path).unwrap();
    assert_eq!(received, content);
}
