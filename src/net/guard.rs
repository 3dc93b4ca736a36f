use std::sync::Arc;

use super::Connection;

/// Defers a connection's socket teardown while a job referencing it runs.
///
/// Creating a guard bumps the connection's guard count; dropping it lowers
/// the count and, if it was the last one, lets a requested shutdown proceed.
/// [`Connection::force_shutdown`] ignores guards.
#[derive(Debug)]
pub struct ShutdownGuard {
    connection: Arc<Connection>,
}

impl ShutdownGuard {
    pub fn new(connection: Arc<Connection>) -> Self {
        connection.acquire_guard();
        Self { connection }
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Clone for ShutdownGuard {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.connection))
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.connection.release_guard();
    }
}
