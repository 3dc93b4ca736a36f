use std::fmt;
use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::buffer::ByteQueue;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::net::socket::Socket;
use crate::net::WriteWaker;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Size of the scratch buffer a flush copies out of the write queue.
const FLUSH_CHUNK: usize = 16 * 1024;

/// Process-unique connection identifier.
///
/// Doubles as the dispatcher category key: jobs tagged with the same id never
/// overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a single non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes received.
    Data(Bytes),
    /// Nothing available right now.
    WouldBlock,
    /// The peer closed its side, or the connection is already closed.
    Eof,
}

/// One non-blocking socket with a pending-write queue and cooperative
/// shutdown.
///
/// ## Shutdown
///
/// [`shutdown`](Self::shutdown) only marks the connection. The socket is
/// closed once every queued byte has been flushed and no
/// [`ShutdownGuard`](super::ShutdownGuard) is outstanding.
/// [`force_shutdown`](Self::force_shutdown) closes right away and drops
/// whatever is still queued.
///
/// ## Locking
///
/// The write queue mutex is held only while bytes are appended, copied out or
/// discarded, never across a socket call. Concurrent flushes are serialized by
/// a second mutex that owns the scratch buffer.
pub struct Connection {
    id: ConnectionId,
    socket: Box<dyn Socket>,
    remote_address: String,
    writes: Mutex<ByteQueue>,
    flush_scratch: Mutex<Vec<u8>>,
    shutdown_requested: AtomicBool,
    closed: AtomicBool,
    guards: AtomicUsize,
    deadline: Mutex<Option<Instant>>,
    waker: Mutex<Option<Arc<dyn WriteWaker>>>,
    read_buffer_size: usize,
}

impl Connection {
    /// Wrap an already non-blocking socket.
    pub fn new(
        socket: impl Socket,
        remote_address: impl Into<String>,
        read_buffer_size: usize,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            socket: Box::new(socket),
            remote_address: remote_address.into(),
            writes: Mutex::new(ByteQueue::new()),
            flush_scratch: Mutex::new(Vec::new()),
            shutdown_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            guards: AtomicUsize::new(0),
            deadline: Mutex::new(None),
            waker: Mutex::new(None),
            read_buffer_size: read_buffer_size.max(1),
        });
        debug!(conn = %connection.id, remote = %connection.remote_address, "connection created");
        connection
    }

    /// Switch a TCP stream to non-blocking mode and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the stream options cannot be set.
    pub fn from_tcp(stream: TcpStream, config: &Config) -> Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let remote = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        Ok(Self::new(stream, remote, config.read_buffer_size))
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        !self.writes.lock().is_empty()
    }

    #[must_use]
    pub fn pending_write_len(&self) -> usize {
        self.writes.lock().len()
    }

    /// Number of guards currently deferring teardown.
    #[must_use]
    pub fn guard_count(&self) -> usize {
        self.guards.load(Ordering::Acquire)
    }

    /// Register the reactor's writer wake-up.
    pub fn attach_waker(&self, waker: Arc<dyn WriteWaker>) {
        *self.waker.lock() = Some(waker);
    }

    fn wake_writer(&self) {
        let waker = self.waker.lock().clone();
        if let Some(waker) = waker {
            waker.wake_writer();
        }
    }

    /// Perform one non-blocking read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on transport failure. The caller is expected to
    /// force the connection down.
    pub fn read_available(&self) -> Result<ReadOutcome> {
        if self.is_closed() {
            return Ok(ReadOutcome::Eof);
        }
        let mut buf = BytesMut::zeroed(self.read_buffer_size);
        loop {
            match self.socket.read(&mut buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => {
                    buf.truncate(n);
                    trace!(conn = %self.id, bytes = n, "read");
                    return Ok(ReadOutcome::Data(buf.freeze()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Append bytes to the write queue and wake the writer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownRequested`] once shutdown was requested.
    pub fn queue_write(&self, data: &[u8]) -> Result<()> {
        {
            let mut writes = self.writes.lock();
            // Checked under the lock so nothing lands after the queue is
            // judged empty by a deferred close.
            if self.is_shutdown_requested() {
                return Err(Error::ShutdownRequested(self.id.get()));
            }
            writes.put(data);
        }
        self.wake_writer();
        Ok(())
    }

    /// Append an already assembled queue without copying.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownRequested`] once shutdown was requested.
    pub fn queue_write_queue(&self, data: &mut ByteQueue) -> Result<()> {
        {
            let mut writes = self.writes.lock();
            if self.is_shutdown_requested() {
                return Err(Error::ShutdownRequested(self.id.get()));
            }
            writes.splice(data);
        }
        self.wake_writer();
        Ok(())
    }

    /// Write as much of the queue as the socket accepts without blocking.
    ///
    /// Returns the number of bytes written. A deferred shutdown is
    /// re-evaluated afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on transport failure; the connection is forced
    /// down before returning.
    pub fn flush_writes(&self) -> Result<usize> {
        let mut scratch = self.flush_scratch.lock();
        if scratch.len() != FLUSH_CHUNK {
            scratch.resize(FLUSH_CHUNK, 0);
        }
        let mut total = 0;
        while !self.is_closed() {
            let len = self.writes.lock().peek(&mut scratch);
            if len == 0 {
                break;
            }
            match self.socket.write(&scratch[..len]) {
                Ok(0) => {
                    self.force_shutdown();
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
                Ok(n) => {
                    self.writes.lock().discard(n);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(conn = %self.id, error = %e, "write failed");
                    self.force_shutdown();
                    return Err(e.into());
                }
            }
        }
        drop(scratch);
        if total > 0 {
            trace!(conn = %self.id, bytes = total, "flushed");
        }
        self.close_if_drained();
        Ok(total)
    }

    /// Request a graceful shutdown.
    ///
    /// Closes now if nothing is queued and no guard is outstanding, otherwise
    /// defers until both hold.
    pub fn shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::AcqRel) {
            debug!(conn = %self.id, "shutdown requested");
        }
        self.close_if_drained();
        if !self.is_closed() {
            self.wake_writer();
        }
    }

    /// Close immediately, discarding queued writes.
    pub fn force_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        self.writes.lock().clear();
        self.close();
    }

    /// Set the idle deadline to `timeout` from now.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.deadline.lock() = Some(Instant::now() + timeout);
    }

    pub fn clear_timeout(&self) {
        *self.deadline.lock() = None;
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    #[must_use]
    pub fn is_timed_out(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub(crate) fn acquire_guard(&self) {
        self.guards.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_guard(&self) {
        if self.guards.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.close_if_drained();
        }
    }

    fn close_if_drained(&self) {
        if !self.is_shutdown_requested() || self.is_closed() {
            return;
        }
        if self.guards.load(Ordering::Acquire) > 0 {
            return;
        }
        if self.writes.lock().is_empty() {
            self.close();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.socket.shutdown() {
            debug!(conn = %self.id, error = %e, "socket shutdown failed");
        }
        debug!(conn = %self.id, remote = %self.remote_address, "connection closed");
        self.wake_writer();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("shutdown_requested", &self.is_shutdown_requested())
            .field("closed", &self.is_closed())
            .field("guards", &self.guard_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemorySocket;

    fn memory_connection() -> (Arc<MemorySocket>, Arc<Connection>) {
        let socket = Arc::new(MemorySocket::new());
        let conn = Connection::new(Arc::clone(&socket), "memory", 64);
        (socket, conn)
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn test_read_available_outcomes() {
        let (socket, conn) = memory_connection();
        assert_eq!(conn.read_available().unwrap(), ReadOutcome::WouldBlock);

        socket.push_inbound(b"ping");
        assert_eq!(
            conn.read_available().unwrap(),
            ReadOutcome::Data(Bytes::from_static(b"ping"))
        );

        socket.close_inbound();
        assert_eq!(conn.read_available().unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_read_error_propagates() {
        let (socket, conn) = memory_connection();
        socket.fail_next_read(io::ErrorKind::ConnectionReset);
        assert!(matches!(conn.read_available(), Err(Error::Io(_))));
    }

    #[test]
    fn test_queue_and_flush() {
        let (socket, conn) = memory_connection();
        conn.queue_write(b"hello ").unwrap();
        conn.queue_write(b"world").unwrap();
        assert_eq!(conn.pending_write_len(), 11);

        assert_eq!(conn.flush_writes().unwrap(), 11);
        assert!(!conn.has_pending_writes());
        assert_eq!(socket.take_outbound(), b"hello world");
    }

    #[test]
    fn test_partial_flush_keeps_remainder() {
        let (socket, conn) = memory_connection();
        socket.set_write_capacity(Some(4));
        conn.queue_write(b"abcdefgh").unwrap();

        assert_eq!(conn.flush_writes().unwrap(), 4);
        assert_eq!(conn.pending_write_len(), 4);

        socket.set_write_capacity(None);
        assert_eq!(conn.flush_writes().unwrap(), 4);
        assert_eq!(socket.take_outbound(), b"abcdefgh");
    }

    #[test]
    fn test_shutdown_without_pending_closes_immediately() {
        let (socket, conn) = memory_connection();
        conn.shutdown();
        assert!(conn.is_closed());
        assert!(socket.is_shut_down());
    }

    #[test]
    fn test_shutdown_waits_for_drain() {
        let (socket, conn) = memory_connection();
        socket.set_write_capacity(Some(0));
        conn.queue_write(b"bye").unwrap();
        conn.shutdown();

        assert!(conn.is_shutdown_requested());
        assert!(!conn.is_closed());
        assert!(matches!(
            conn.queue_write(b"late"),
            Err(Error::ShutdownRequested(_))
        ));

        socket.set_write_capacity(None);
        conn.flush_writes().unwrap();
        assert!(conn.is_closed());
        assert_eq!(socket.take_outbound(), b"bye");
    }

    #[test]
    fn test_force_shutdown_drops_pending() {
        let (socket, conn) = memory_connection();
        socket.set_write_capacity(Some(0));
        conn.queue_write(b"never sent").unwrap();
        conn.force_shutdown();

        assert!(conn.is_closed());
        assert!(!conn.has_pending_writes());
        assert!(socket.take_outbound().is_empty());
    }

    #[test]
    fn test_read_after_close_is_eof() {
        let (socket, conn) = memory_connection();
        socket.push_inbound(b"unread");
        conn.force_shutdown();
        assert_eq!(conn.read_available().unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_timeout_deadline() {
        let (_socket, conn) = memory_connection();
        assert!(conn.deadline().is_none());
        assert!(!conn.is_timed_out(Instant::now()));

        conn.set_timeout(Duration::from_secs(30));
        let deadline = conn.deadline().unwrap();
        assert!(!conn.is_timed_out(Instant::now()));
        assert!(conn.is_timed_out(deadline + Duration::from_millis(1)));

        conn.clear_timeout();
        assert!(conn.deadline().is_none());
    }
}
