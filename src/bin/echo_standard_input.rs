//! Echo standard input to standard output through the reactor.
//!
//! The reactor is driven on a dedicated thread while the main thread
//! submits one read-then-write round per buffer full, until EOF.

use spindrift::backend::{Backend, Epoll};
use spindrift::buffer::{ConstBufferSpan, MutableBuffer};
use spindrift::exec::sync_wait;
use spindrift::reactor::RunMode;
use spindrift::{ContextConfig, FileHandle, Outcome};
use std::process::ExitCode;

fn main() -> ExitCode {
    let ctx = match Epoll::new_context(&ContextConfig::from_env()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("failed to create reactor: {err}");
            return ExitCode::FAILURE;
        }
    };

    let input = match FileHandle::<Epoll>::adopt(&ctx, libc::STDIN_FILENO) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("failed to adopt stdin: {err}");
            return ExitCode::FAILURE;
        }
    };
    let output = match FileHandle::<Epoll>::adopt(&ctx, libc::STDOUT_FILENO) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("failed to adopt stdout: {err}");
            return ExitCode::FAILURE;
        }
    };

    let run_ctx = ctx.clone();
    let reactor = std::thread::spawn(move || {
        let _ = sync_wait(Epoll::run(&run_ctx, RunMode::Stopped));
    });

    let status = echo(&input, &output);

    Epoll::request_stop(&ctx);
    let _ = reactor.join();
    status
}

fn echo(input: &FileHandle<Epoll>, output: &FileHandle<Epoll>) -> ExitCode {
    let mut buffer = [0u8; 64];
    loop {
        let nread = match sync_wait(input.read_some(MutableBuffer::new(&mut buffer))) {
            Outcome::Value(0) => return ExitCode::SUCCESS,
            Outcome::Value(n) => n,
            Outcome::Error(err) => {
                eprintln!("read failed: {err}");
                return ExitCode::FAILURE;
            }
            Outcome::Stopped => return ExitCode::SUCCESS,
        };

        let data = ConstBufferSpan::single(spindrift::ConstBuffer::new(&buffer[..nread]));
        match sync_wait(output.write(data)) {
            Outcome::Value(written) if written == nread => {}
            Outcome::Value(_) => {
                eprintln!("failed to write all bytes");
                return ExitCode::FAILURE;
            }
            Outcome::Error(err) => {
                eprintln!("write failed: {err}");
                return ExitCode::FAILURE;
            }
            Outcome::Stopped => return ExitCode::SUCCESS,
        }
    }
}
