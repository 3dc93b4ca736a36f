//! Non-blocking connection layer.
//!
//! A [`Connection`] owns one socket, a queue of bytes waiting to be written
//! and the shutdown state. The reactor reads from it and hands the bytes to a
//! [`StreamHandler`]; jobs write back through [`Connection::queue_write`],
//! which wakes the reactor through a [`WriteWaker`].

mod connection;
mod guard;
mod socket;

pub use connection::{Connection, ConnectionId, ReadOutcome};
pub use guard::ShutdownGuard;
pub use socket::{MemorySocket, Socket};

use std::sync::Arc;

/// Reactor-side hook telling the event loop that a connection has bytes to
/// flush or has changed shutdown state.
pub trait WriteWaker: Send + Sync {
    fn wake_writer(&self);
}

/// Protocol layer driven by the reactor.
///
/// Every call for one connection comes from the same reactor task, in order.
pub trait StreamHandler: Send + Sync {
    /// The connection is registered and ready.
    fn on_connect(&self);

    /// Bytes arrived.
    fn on_read_avail(&self, data: &[u8]);

    /// The peer closed its side or the read failed.
    fn on_read_hup(&self);

    /// The connection this handler is attached to.
    fn connection(&self) -> &Arc<Connection>;
}
