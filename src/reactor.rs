//! Tokio event loop driving [`Connection`]s.
//!
//! Each registered connection gets one task. The task waits on socket
//! readiness through an [`AsyncFd`] over a duplicate of the socket, on the
//! connection's write wake-up, and on its idle deadline. Reads are handed to
//! the connection's [`StreamHandler`]; writes are flushed from the
//! connection's queue.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::net::{Connection, ConnectionId, ReadOutcome, StreamHandler, WriteWaker};

/// Far enough ahead to stand in for "no deadline".
const IDLE_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

struct NotifyWaker(Notify);

impl WriteWaker for NotifyWaker {
    fn wake_writer(&self) {
        self.0.notify_one();
    }
}

/// Registry of live connections and the tasks that drive them.
pub struct Reactor {
    config: Config,
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Reactor {
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            connections: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.lock().get(&id).cloned()
    }

    /// Wrap `stream`, build its protocol handler and start driving it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the socket cannot be
    /// duplicated or registered with the runtime.
    pub fn register<F, H>(self: &Arc<Self>, stream: TcpStream, factory: F) -> Result<Arc<Connection>>
    where
        F: FnOnce(Arc<Connection>) -> Arc<H>,
        H: StreamHandler + 'static,
    {
        let readiness = AsyncFd::new(stream.try_clone()?)?;
        let connection = Connection::from_tcp(stream, &self.config)?;
        let waker = Arc::new(NotifyWaker(Notify::new()));
        connection.attach_waker(Arc::clone(&waker) as Arc<dyn WriteWaker>);
        let handler: Arc<dyn StreamHandler> = factory(Arc::clone(&connection));

        self.connections
            .lock()
            .insert(connection.id(), Arc::clone(&connection));
        tokio::spawn(Arc::clone(self).drive(readiness, handler, waker));
        Ok(connection)
    }

    /// Accept connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) on a fatal accept error.
    pub async fn serve<F, H>(self: Arc<Self>, listener: TcpListener, factory: F) -> Result<()>
    where
        F: Fn(Arc<Connection>) -> Arc<H>,
        H: StreamHandler + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }
        loop {
            let (stream, peer) = listener.accept().await?;
            let registered = stream
                .into_std()
                .map_err(Into::into)
                .and_then(|stream| self.register(stream, &factory));
            if let Err(e) = registered {
                warn!(%peer, error = %e, "failed to register connection");
            }
        }
    }

    /// Open an outgoing connection and start driving it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the connection fails.
    pub async fn connect<A, F, H>(self: &Arc<Self>, addr: A, factory: F) -> Result<Arc<Connection>>
    where
        A: ToSocketAddrs,
        F: FnOnce(Arc<Connection>) -> Arc<H>,
        H: StreamHandler + 'static,
    {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        self.register(stream.into_std()?, factory)
    }

    /// Request a graceful shutdown of every registered connection.
    pub fn shutdown_all(&self) {
        let connections: Vec<_> = self.connections.lock().values().cloned().collect();
        for connection in connections {
            connection.shutdown();
        }
    }

    async fn drive(
        self: Arc<Self>,
        readiness: AsyncFd<TcpStream>,
        handler: Arc<dyn StreamHandler>,
        waker: Arc<NotifyWaker>,
    ) {
        let connection = Arc::clone(handler.connection());
        handler.on_connect();
        let mut read_open = true;

        while !connection.is_closed() {
            if connection.has_pending_writes() {
                // Errors force the connection down; the loop condition sees it.
                let _ = connection.flush_writes();
                if connection.is_closed() {
                    break;
                }
            }
            let want_write = connection.has_pending_writes();
            let wake_at = connection
                .deadline()
                .map_or_else(|| tokio::time::Instant::now() + IDLE_HORIZON, Into::into);

            tokio::select! {
                ready = readiness.readable(), if read_open => match ready {
                    Ok(mut guard) => {
                        read_open = read_until_blocked(&connection, handler.as_ref());
                        if read_open {
                            guard.clear_ready();
                        }
                    }
                    Err(e) => {
                        warn!(conn = %connection.id(), error = %e, "read readiness failed");
                        connection.force_shutdown();
                    }
                },
                ready = readiness.writable(), if want_write => match ready {
                    Ok(mut guard) => {
                        let _ = connection.flush_writes();
                        if connection.has_pending_writes() {
                            guard.clear_ready();
                        }
                    }
                    Err(e) => {
                        warn!(conn = %connection.id(), error = %e, "write readiness failed");
                        connection.force_shutdown();
                    }
                },
                () = waker.0.notified() => {}
                () = tokio::time::sleep_until(wake_at) => {
                    if connection.is_timed_out(std::time::Instant::now()) {
                        info!(conn = %connection.id(), remote = %connection.remote_address(), "idle timeout");
                        connection.force_shutdown();
                    }
                }
            }
        }

        self.connections.lock().remove(&connection.id());
        debug!(conn = %connection.id(), "unregistered");
    }
}

/// Drain the socket into the handler. Returns `false` once the read side is
/// finished.
fn read_until_blocked(connection: &Connection, handler: &dyn StreamHandler) -> bool {
    loop {
        match connection.read_available() {
            Ok(ReadOutcome::Data(data)) => handler.on_read_avail(&data),
            Ok(ReadOutcome::WouldBlock) => return true,
            Ok(ReadOutcome::Eof) => {
                handler.on_read_hup();
                return false;
            }
            Err(e) => {
                debug!(conn = %connection.id(), error = %e, "read failed");
                handler.on_read_hup();
                connection.force_shutdown();
                return false;
            }
        }
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}
