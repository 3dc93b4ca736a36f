//! Connection behavior over loopback TCP.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wharf::net::ReadOutcome;
use wharf::{Config, Connection, Error, ShutdownGuard};

fn tcp_pair() -> (TcpStream, Arc<Connection>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let (server, _) = listener.accept().unwrap();
    let connection = Connection::from_tcp(server, &Config::default()).unwrap();
    (peer, connection)
}

fn read_blocking(connection: &Connection) -> ReadOutcome {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match connection.read_available().unwrap() {
            ReadOutcome::WouldBlock if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            outcome => return outcome,
        }
    }
}

#[test]
fn test_remote_address_is_peer() {
    let (peer, connection) = tcp_pair();
    assert_eq!(connection.remote_address(), peer.local_addr().unwrap().to_string());
}

#[test]
fn test_read_then_would_block() {
    let (mut peer, connection) = tcp_pair();
    assert_eq!(connection.read_available().unwrap(), ReadOutcome::WouldBlock);

    peer.write_all(b"ping").unwrap();
    match read_blocking(&connection) {
        ReadOutcome::Data(data) => assert_eq!(&data[..], b"ping"),
        other => panic!("unexpected {other:?}"),
    }

    drop(peer);
    assert_eq!(read_blocking(&connection), ReadOutcome::Eof);
}

#[test]
fn test_shutdown_drains_queue_first() {
    let (mut peer, connection) = tcp_pair();
    connection.queue_write(b"hello ").unwrap();
    connection.queue_write(b"world").unwrap();

    connection.shutdown();
    assert!(!connection.is_closed());
    assert!(matches!(
        connection.queue_write(b"late"),
        Err(Error::ShutdownRequested(_))
    ));

    connection.flush_writes().unwrap();
    assert!(connection.is_closed());

    let mut received = Vec::new();
    peer.read_to_end(&mut received).unwrap();
    assert_eq!(received, b"hello world");
}

#[test]
fn test_force_shutdown_discards_queue() {
    let (mut peer, connection) = tcp_pair();
    connection.queue_write(b"dropped").unwrap();

    connection.force_shutdown();
    assert!(connection.is_closed());
    assert!(!connection.has_pending_writes());

    let mut received = Vec::new();
    peer.read_to_end(&mut received).unwrap();
    assert!(received.is_empty());
}

#[test]
fn test_guard_defers_close_past_drain() {
    let (mut peer, connection) = tcp_pair();
    let guard = ShutdownGuard::new(Arc::clone(&connection));
    connection.queue_write(b"bye").unwrap();
    connection.shutdown();

    connection.flush_writes().unwrap();
    assert!(!connection.is_closed());

    drop(guard);
    assert!(connection.is_closed());

    let mut received = Vec::new();
    peer.read_to_end(&mut received).unwrap();
    assert_eq!(received, b"bye");
}

#[test]
fn test_large_write_flushes_across_calls() {
    let (mut peer, connection) = tcp_pair();
    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    connection.queue_write(&payload).unwrap();
    connection.shutdown();

    let reader = std::thread::spawn(move || {
        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        received
    });
    let deadline = Instant::now() + Duration::from_secs(10);
    while !connection.is_closed() && Instant::now() < deadline {
        connection.flush_writes().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(connection.is_closed());
    assert_eq!(reader.join().unwrap(), payload);
}
