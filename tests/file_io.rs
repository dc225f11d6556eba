//! End-to-end file scenarios, run against both backends.

use spindrift::backend::{Backend, Epoll};
use spindrift::buffer::{ConstBuffer, ConstBufferSpan, MutableBuffer, MutableBufferSpan};
use spindrift::exec::{finally, let_value, sync_wait, then, when_any};
use spindrift::open_options::{Creation, Mode};
use spindrift::reactor::RunMode;
use spindrift::test_utils::{init_test_logging, test_config};
use spindrift::{test_complete, test_phase};
use spindrift::{File, SeekableFile};

fn init(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[cfg(feature = "io-uring")]
fn uring_available() -> bool {
    let available = spindrift::backend::Uring::new_context(&test_config()).is_ok();
    if !available {
        tracing::warn!("io_uring unavailable in this environment; skipping");
    }
    available
}

/// Reading /dev/null completes with 0 bytes and no error.
fn null_read<B: Backend>() {
    let ctx = B::new_context(&test_config()).expect("context");
    let file = File::<B>::new(&ctx, "/dev/null", Mode::Read, Creation::OpenExisting);

    let mut storage = [0u8; 8];
    let buffer = MutableBuffer::new(&mut storage);

    let work = let_value(file.open(), move |handle| {
        let close = handle.close();
        finally(
            then(handle.read_some(buffer), |n| assert_eq!(n, 0)),
            close,
        )
    });

    let outcome = sync_wait(when_any(work, B::run(&ctx, RunMode::Stopped)));
    assert!(outcome.is_value(), "null read graph completed");
}

#[test]
fn null_read_epoll() {
    init("null_read_epoll");
    null_read::<Epoll>();
    test_complete!("null_read_epoll");
}

#[cfg(feature = "io-uring")]
#[test]
fn null_read_uring() {
    init("null_read_uring");
    if !uring_available() {
        return;
    }
    null_read::<spindrift::backend::Uring>();
    test_complete!("null_read_uring");
}

/// Write bytes, reopen read-only, read them back byte-equal.
fn tempfile_round_trip<B: Backend>() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("roundtrip.bin");
    let ctx = B::new_context(&test_config()).expect("context");

    static DATA: &[u8] = b"hello world";
    let mut readback = [0u8; 11];
    let read_buffer = MutableBuffer::new(&mut readback);

    let writer = SeekableFile::<B>::new(&ctx, &path, Mode::Write, Creation::IfNeeded);
    let reader = SeekableFile::<B>::new(&ctx, &path, Mode::Read, Creation::OpenExisting);

    let write_phase = let_value(writer.open(), move |handle| {
        let close = handle.close();
        finally(
            then(
                handle.write_at(ConstBufferSpan::single(ConstBuffer::new(DATA)), 0),
                |n| assert_eq!(n, DATA.len()),
            ),
            close,
        )
    });
    let read_phase = let_value(reader.open(), move |handle| {
        let close = handle.close();
        finally(
            then(
                handle.read_at(MutableBufferSpan::single(read_buffer), 0),
                |n| assert_eq!(n, DATA.len()),
            ),
            close,
        )
    });
    let work = let_value(write_phase, move |()| read_phase);

    let outcome = sync_wait(when_any(work, B::run(&ctx, RunMode::Stopped)));
    assert!(outcome.is_value(), "round trip graph completed");
    assert_eq!(&readback, DATA, "read back byte-equal contents");
}

#[test]
fn tempfile_round_trip_epoll() {
    init("tempfile_round_trip_epoll");
    tempfile_round_trip::<Epoll>();
    test_complete!("tempfile_round_trip_epoll");
}

#[cfg(feature = "io-uring")]
#[test]
fn tempfile_round_trip_uring() {
    init("tempfile_round_trip_uring");
    if !uring_available() {
        return;
    }
    tempfile_round_trip::<spindrift::backend::Uring>();
    test_complete!("tempfile_round_trip_uring");
}

/// A scatter read fills multiple buffers in order.
fn scatter_read<B: Backend>() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scatter.bin");
    std::fs::write(&path, b"hello world").expect("fixture");

    let ctx = B::new_context(&test_config()).expect("context");
    let reader = SeekableFile::<B>::new(&ctx, &path, Mode::Read, Creation::OpenExisting);

    let mut head = [0u8; 6];
    let mut tail = [0u8; 5];
    let span = MutableBufferSpan::new(vec![
        MutableBuffer::new(&mut head),
        MutableBuffer::new(&mut tail),
    ]);

    let work = let_value(reader.open(), move |handle| {
        let close = handle.close();
        finally(then(handle.read_at(span, 0), |n| assert_eq!(n, 11)), close)
    });

    let outcome = sync_wait(when_any(work, B::run(&ctx, RunMode::Stopped)));
    assert!(outcome.is_value(), "scatter graph completed");
    assert_eq!(&head, b"hello ");
    assert_eq!(&tail, b"world");
}

#[test]
fn scatter_read_epoll() {
    init("scatter_read_epoll");
    scatter_read::<Epoll>();
    test_complete!("scatter_read_epoll");
}

#[cfg(feature = "io-uring")]
#[test]
fn scatter_read_uring() {
    init("scatter_read_uring");
    if !uring_available() {
        return;
    }
    scatter_read::<spindrift::backend::Uring>();
    test_complete!("scatter_read_uring");
}

/// Batched single-offset reads land each value in its own buffer.
fn batched_reads<B: Backend>() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("batched.bin");

    let mut contents = vec![0u8; 4096];
    contents[0..4].copy_from_slice(&42i32.to_le_bytes());
    contents[1024..1028].copy_from_slice(&4242i32.to_le_bytes());
    contents[2048..2052].copy_from_slice(&424_242i32.to_le_bytes());
    std::fs::write(&path, &contents).expect("fixture");

    let ctx = B::new_context(&test_config()).expect("context");
    let reader = SeekableFile::<B>::new(&ctx, &path, Mode::Read, Creation::OpenExisting);

    let mut cells = [[0u8; 4]; 3];
    let (buffers, offsets) = {
        let mut buffers = Vec::new();
        for cell in &mut cells {
            buffers.push(MutableBuffer::new(cell));
        }
        (buffers, vec![0u64, 1024, 2048])
    };

    let work = let_value(reader.open(), move |handle| {
        let close = handle.close();
        finally(handle.read_batched(buffers, offsets), close)
    });

    let outcome = sync_wait(when_any(work, B::run(&ctx, RunMode::Stopped)));
    assert!(outcome.is_value(), "batched graph completed");

    let values: Vec<i32> = cells.iter().map(|c| i32::from_le_bytes(*c)).collect();
    assert_eq!(values, vec![42, 4242, 424_242]);
}

#[test]
fn batched_reads_epoll() {
    init("batched_reads_epoll");
    batched_reads::<Epoll>();
    test_complete!("batched_reads_epoll");
}

#[cfg(feature = "io-uring")]
#[test]
fn batched_reads_uring() {
    init("batched_reads_uring");
    if !uring_available() {
        return;
    }
    batched_reads::<spindrift::backend::Uring>();
    test_complete!("batched_reads_uring");
}

/// `always_new` creation refuses an existing file.
fn always_new_refuses_existing<B: Backend>() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("exists.bin");
    std::fs::write(&path, b"occupied").expect("fixture");

    let ctx = B::new_context(&test_config()).expect("context");
    let writer = SeekableFile::<B>::new(&ctx, &path, Mode::Write, Creation::AlwaysNew);

    let work = then(writer.open(), |_handle| panic!("open must not succeed"));
    let outcome = sync_wait(when_any(work, B::run(&ctx, RunMode::Stopped)));
    match outcome {
        spindrift::Outcome::Error(err) => {
            assert_eq!(err.raw_os_error(), Some(libc::EEXIST));
        }
        other => panic!("expected EEXIST, got {other:?}"),
    }
}

#[test]
fn always_new_refuses_existing_epoll() {
    init("always_new_refuses_existing_epoll");
    always_new_refuses_existing::<Epoll>();
    test_complete!("always_new_refuses_existing_epoll");
}

#[cfg(feature = "io-uring")]
#[test]
fn always_new_refuses_existing_uring() {
    init("always_new_refuses_existing_uring");
    if !uring_available() {
        return;
    }
    always_new_refuses_existing::<spindrift::backend::Uring>();
    test_complete!("always_new_refuses_existing_uring");
}
