//! Non-blocking socket abstraction.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;

use parking_lot::Mutex;

/// A non-blocking byte stream owned by a [`Connection`](super::Connection).
///
/// All methods take `&self`: reads happen on the reactor path, writes on the
/// flush path, and shutdown may come from any thread. Implementations must
/// report "no data right now" as [`io::ErrorKind::WouldBlock`] and end of
/// stream as `Ok(0)` from `read`.
pub trait Socket: Send + Sync + 'static {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Close both directions.
    fn shutdown(&self) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut &*self, buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        match TcpStream::shutdown(self, std::net::Shutdown::Both) {
            // Already disconnected by the peer.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    peer_closed: bool,
    shut_down: bool,
    write_capacity: Option<usize>,
    read_error: Option<io::ErrorKind>,
}

/// In-memory socket for loopback use and tests.
///
/// Inbound bytes are pushed with [`push_inbound`](Self::push_inbound), written
/// bytes are collected and can be taken with
/// [`take_outbound`](Self::take_outbound). A write capacity can be set to
/// simulate a full kernel buffer.
#[derive(Debug, Default)]
pub struct MemorySocket {
    state: Mutex<MemoryState>,
}

impl MemorySocket {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, data: &[u8]) {
        self.state.lock().inbound.extend(data);
    }

    /// Make the next reads report end of stream once inbound data is drained.
    pub fn close_inbound(&self) {
        self.state.lock().peer_closed = true;
    }

    /// Make the next read fail with the given error kind.
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.state.lock().read_error = Some(kind);
    }

    /// Limit how many more bytes writes accept; `None` removes the limit.
    pub fn set_write_capacity(&self, capacity: Option<usize>) {
        self.state.lock().write_capacity = capacity;
    }

    /// Take every byte written so far.
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().outbound)
    }

    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.state.lock().outbound.len()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl Socket for MemorySocket {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if let Some(kind) = state.read_error.take() {
            return Err(kind.into());
        }
        if state.shut_down {
            return Ok(0);
        }
        if state.inbound.is_empty() {
            return if state.peer_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let count = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let count = match state.write_capacity {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(capacity) => capacity.min(buf.len()),
            None => buf.len(),
        };
        if let Some(capacity) = state.write_capacity.as_mut() {
            *capacity -= count;
        }
        state.outbound.extend_from_slice(&buf[..count]);
        Ok(count)
    }

    fn shutdown(&self) -> io::Result<()> {
        self.state.lock().shut_down = true;
        Ok(())
    }
}

impl<S: Socket> Socket for std::sync::Arc<S> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        (**self).shutdown()
    }
}
