//! Shared helpers for integration tests: in-memory connections, framing
//! helpers and recording handlers.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use wharf::net::MemorySocket;
use wharf::websocket::Frame;
use wharf::{Config, Connection, JobDispatcher};

pub const CLIENT_MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// Small pool so ordering bugs show up quickly.
pub fn config() -> Config {
    Config::default().with_worker_threads(4)
}

pub fn dispatcher() -> JobDispatcher {
    JobDispatcher::start(&config()).unwrap()
}

pub fn memory_connection() -> (Arc<MemorySocket>, Arc<Connection>) {
    let socket = Arc::new(MemorySocket::new());
    let connection = Connection::new(Arc::clone(&socket), "memory:1", 4096);
    (socket, connection)
}

/// Encode a frame the way a client sends it.
pub fn client_frame(frame: &Frame) -> Bytes {
    frame.to_bytes(Some(CLIENT_MASK))
}

/// Flush the connection and return everything written to the socket.
pub fn written(connection: &Connection, socket: &MemorySocket) -> Vec<u8> {
    connection.flush_writes().unwrap();
    socket.take_outbound()
}

/// Split server output into frames.
pub fn parse_frames(mut data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    while !data.is_empty() {
        let (frame, used) = Frame::parse(data).unwrap();
        frames.push(frame);
        data = &data[used..];
    }
    frames
}

/// Append-only log shared between a handler and the test body.
#[derive(Debug, Clone)]
pub struct Log<T>(Arc<Mutex<Vec<T>>>);

impl<T> Default for Log<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> Log<T> {
    pub fn push(&self, item: T) {
        self.0.lock().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}
