//! Read three fixed-size chunks of a file at spread offsets in one
//! batched graph.
//!
//! Usage: `batched_reads <file>`

use spindrift::backend::{Backend, Epoll};
use spindrift::buffer::MutableBuffer;
use spindrift::exec::{finally, let_value, sync_wait, when_any};
use spindrift::open_options::{Creation, Mode};
use spindrift::reactor::RunMode;
use spindrift::{ContextConfig, SeekableFile};
use std::process::ExitCode;

const CHUNK: usize = 64;

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: batched_reads <file>");
        return ExitCode::FAILURE;
    };

    let ctx = match Epoll::new_context(&ContextConfig::from_env()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("failed to create reactor: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut storage = vec![[0u8; CHUNK]; 3];
    let buffers: Vec<MutableBuffer> = storage
        .iter_mut()
        .map(|chunk| MutableBuffer::new(chunk))
        .collect();
    let offsets: Vec<u64> = vec![0, CHUNK as u64, 2 * CHUNK as u64];

    let file = SeekableFile::<Epoll>::new(&ctx, path, Mode::Read, Creation::OpenExisting);
    let work = let_value(file.open(), move |handle| {
        let close = handle.close();
        finally(handle.read_batched(buffers, offsets), close)
    });

    let outcome = sync_wait(when_any(work, Epoll::run(&ctx, RunMode::Stopped)));
    if let spindrift::Outcome::Error(err) = outcome {
        eprintln!("batched read failed: {err}");
        return ExitCode::FAILURE;
    }

    for (i, chunk) in storage.iter().enumerate() {
        println!("chunk {i}: {}", String::from_utf8_lossy(chunk));
    }
    ExitCode::SUCCESS
}
