// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal `rz`-alike: drives a [`zmodem::Engine`] receive session over
//! stdin/stdout, writing whatever file the peer offers into the current
//! (or a given) directory.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::Parser;
use zmodem::{Engine, FileInfo, Handler};

#[derive(Parser)]
#[command(about = "Pure Rust implementation of rz, built on the zmodem crate")]
struct Args {
    /// Directory to write received files into.
    #[arg(default_value = ".")]
    directory: PathBuf,
}

struct Receiver {
    directory: PathBuf,
    want_accept: Option<PathBuf>,
    finished: bool,
}

impl Handler for Receiver {
    fn on_data(&mut self, bytes: &[u8]) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        lock.write_all(bytes).expect("write to stdout");
        lock.flush().ok();
    }

    fn on_accept_file(&mut self, info: &FileInfo) {
        eprintln!("receiving {} ({} bytes)", info.name, info.size);
        self.want_accept = Some(self.directory.join(&info.name));
    }

    fn on_progress(&mut self, pos: u32) {
        eprint!("\r{pos} bytes");
    }

    fn on_complete_file(&mut self) {
        eprintln!("\ntransfer complete");
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

    let mut engine = Engine::new(Receiver {
        directory: args.directory,
        want_accept: None,
        finished: false,
    });
    engine.start_receiving();

    let stdin = io::stdin();
    let mut lock = stdin.lock();
    let mut byte = [0u8; 1];
    while !engine.handler_mut().finished {
        match lock.read(&mut byte)? {
            0 => break,
            _ => engine.receive_byte(byte[0]),
        }
        if let Some(path) = engine.handler_mut().want_accept.take() {
            engine.accept_file_as(&path).unwrap_or_else(|e| eprintln!("error: {e}"));
        }
    }

    Ok(())
}
