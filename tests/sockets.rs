//! End-to-end socket scenarios, run against both backends.

use spindrift::backend::{Backend, Epoll};
use spindrift::buffer::{ConstBuffer, ConstBufferSpan, MutableBuffer, MutableBufferSpan};
use spindrift::exec::{finally, just, let_value, sync_wait, then, when_all, when_any};
use spindrift::net::{Endpoint, Protocol, SocketOptions};
use spindrift::reactor::RunMode;
use spindrift::test_utils::{init_test_logging, test_config};
use spindrift::{test_complete, test_phase};
use spindrift::{Acceptor, Socket};
use std::net::SocketAddr;

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

/// Accept and connect complete concurrently on an ephemeral TCP port.
fn tcp_accept_connect<B: Backend>() {
    let ctx = B::new_context(&test_config()).expect("context");
    let loopback: SocketAddr = "127.0.0.1:0".parse().expect("address");
    let acceptor = Acceptor::<B>::new(&ctx, Protocol::tcp_v4(), Endpoint::from(loopback));
    let client_factory = Socket::<B>::new(&ctx, Protocol::tcp_v4());

    let work = let_value(acceptor.open(), move |acc| {
        let endpoint = acc.local_endpoint().expect("listening endpoint");
        let port = endpoint
            .to_socket_addr()
            .expect("ip endpoint")
            .port();
        assert_ne!(port, 0, "kernel assigned an ephemeral port");

        let server = {
            let acc = acc.clone();
            let_value(acc.accept_once(), move |peer| {
                let remote = peer.remote_endpoint().expect("peer endpoint");
                assert!(remote.to_socket_addr().is_some());
                finally(finally(just(()), peer.close()), acc.close())
            })
        };

        let client = let_value(client_factory.open(), move |socket| {
            let close = socket.close();
            finally(socket.connect(endpoint), close)
        });

        then(when_all(server, client), |((), ())| ())
    });

    let outcome = sync_wait(when_any(work, B::run(&ctx, RunMode::Stopped)));
    assert!(outcome.is_value(), "accept/connect graph completed");
}

#[test]
fn tcp_accept_connect_epoll() {
    init("tcp_accept_connect_epoll");
    tcp_accept_connect::<Epoll>();
    test_complete!("tcp_accept_connect_epoll");
}

#[cfg(feature = "io-uring")]
#[test]
fn tcp_accept_connect_uring() {
    init("tcp_accept_connect_uring");
    if !uring_available() {
        return;
    }
    tcp_accept_connect::<spindrift::backend::Uring>();
    test_complete!("tcp_accept_connect_uring");
}

/// A UNIX acceptor with `unlink_on_close` removes its path; five bytes
/// make it across the stream.
fn unix_unlink_on_close<B: Backend>() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stream.sock");
    let endpoint = Endpoint::unix(&path).expect("endpoint");

    let ctx = B::new_context(&test_config()).expect("context");
    let acceptor = Acceptor::<B>::new(&ctx, Protocol::unix_stream(), endpoint)
        .options(SocketOptions {
            unlink_on_close: true,
        });
    let client_factory = Socket::<B>::new(&ctx, Protocol::unix_stream());

    static MESSAGE: &[u8] = b"hello";
    let mut received = [0u8; 5];
    let receive_buffer = MutableBuffer::new(&mut received);

    let work = let_value(acceptor.open(), move |acc| {
        let server = {
            let acc = acc.clone();
            let_value(acc.accept_once(), move |peer| {
                let read = then(
                    peer.read(MutableBufferSpan::single(receive_buffer)),
                    |n| assert_eq!(n, MESSAGE.len()),
                );
                finally(finally(read, peer.close()), acc.close())
            })
        };

        let client = let_value(client_factory.open(), move |socket| {
            let writer = socket.clone();
            let connected = let_value(socket.connect(endpoint), move |()| {
                then(
                    writer.write(ConstBufferSpan::single(ConstBuffer::new(MESSAGE))),
                    |n| assert_eq!(n, MESSAGE.len()),
                )
            });
            finally(connected, socket.close())
        });

        then(when_all(server, client), |((), ())| ())
    });

    assert!(!path.exists(), "path must not exist before open");
    let path_probe = path.clone();

    let outcome = sync_wait(when_any(work, B::run(&ctx, RunMode::Stopped)));
    assert!(outcome.is_value(), "unix exchange graph completed");
    assert_eq!(&received, MESSAGE);
    assert!(
        !path_probe.exists(),
        "unlink_on_close removed the socket path"
    );
}

#[test]
fn unix_unlink_on_close_epoll() {
    init("unix_unlink_on_close_epoll");
    unix_unlink_on_close::<Epoll>();
    test_complete!("unix_unlink_on_close_epoll");
}

#[cfg(feature = "io-uring")]
#[test]
fn unix_unlink_on_close_uring() {
    init("unix_unlink_on_close_uring");
    if !uring_available() {
        return;
    }
    unix_unlink_on_close::<spindrift::backend::Uring>();
    test_complete!("unix_unlink_on_close_uring");
}

/// Cancelling an accept that never observed readiness completes the race
/// with the immediate arm's value; the acceptor still closes.
fn cancel_pending_accept<B: Backend>() {
    let ctx = B::new_context(&test_config()).expect("context");
    let loopback: SocketAddr = "127.0.0.1:0".parse().expect("address");
    let acceptor = Acceptor::<B>::new(&ctx, Protocol::tcp_v4(), Endpoint::from(loopback));

    let work = let_value(acceptor.open(), move |acc| {
        let pending = then(acc.accept_once(), |_peer| ());
        let race = when_any(pending, just(()));
        finally(race, acc.close())
    });

    let outcome = sync_wait(when_any(work, B::run(&ctx, RunMode::Stopped)));
    assert!(outcome.is_value(), "cancelled accept resolved the race");
}

#[test]
fn cancel_pending_accept_epoll() {
    init("cancel_pending_accept_epoll");
    cancel_pending_accept::<Epoll>();
    test_complete!("cancel_pending_accept_epoll");
}

#[cfg(feature = "io-uring")]
#[test]
fn cancel_pending_accept_uring() {
    init("cancel_pending_accept_uring");
    if !uring_available() {
        return;
    }
    cancel_pending_accept::<spindrift::backend::Uring>();
    test_complete!("cancel_pending_accept_uring");
}

/// CAN raw protocol values survive endpoint construction (no bus needed).
#[test]
fn can_protocol_shape() {
    init("can_protocol_shape");
    let protocol = Protocol::can_raw();
    assert_eq!(protocol.family(), libc::PF_CAN);
    let endpoint = Endpoint::can(0);
    assert_eq!(endpoint.can_ifindex(), Some(0));
    test_complete!("can_protocol_shape");
}
