// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal `sz`-alike: drives a [`zmodem::Engine`] send session over
//! stdin/stdout, offering the given files to whatever peer is reading
//! stdout.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::Parser;
use zmodem::{Engine, Handler};

#[derive(Parser)]
#[command(about = "Pure Rust implementation of sz, built on the zmodem crate")]
struct Args {
    /// Files to send.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Default)]
struct Sender {
    finished: bool,
}

impl Handler for Sender {
    fn on_data(&mut self, bytes: &[u8]) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        lock.write_all(bytes).expect("write to stdout");
        lock.flush().ok();
    }

    fn on_progress(&mut self, pos: u32) {
        eprint!("\r{pos} bytes");
    }

    fn on_complete_file(&mut self) {
        eprintln!("\nfile sent");
    }

    fn on_error(&mut self, msg: &str) {
        eprintln!("error: {msg}");
        self.finished = true;
    }

    fn on_finish(&mut self) {
        self.finished = true;
    }
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let mut engine = Engine::new(Sender::default());
    engine
        .set_files(&args.files)
        .unwrap_or_else(|e| panic!("cannot stat input file: {e}"));
    engine.start_sending();

    let stdin = io::stdin();
    let mut lock = stdin.lock();
    let mut byte = [0u8; 1];
    while !engine.handler_mut().finished {
        match lock.read(&mut byte)? {
            0 => break,
            _ => engine.receive_byte(byte[0]),
        }
    }

    Ok(())
}
