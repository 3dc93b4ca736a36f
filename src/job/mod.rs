//! Per-connection job dispatch.
//!
//! A [`Job`] is a unit of application work tagged with the [`ConnectionId`]
//! it belongs to. The [`JobDispatcher`] runs jobs on a fixed worker pool so
//! that jobs sharing a category execute one at a time in enqueue order, while
//! jobs of different categories run in parallel.

mod dispatcher;

pub use dispatcher::{FaultHook, JobDispatcher, JobSender};

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::net::{Connection, ConnectionId, ShutdownGuard};

/// Boxed work closure.
pub type Work = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A unit of work bound to a category.
pub struct Job {
    category: ConnectionId,
    guard: Option<ShutdownGuard>,
    work: Work,
}

impl Job {
    /// A job with no connection attached.
    pub fn new<F>(category: ConnectionId, work: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            category,
            guard: None,
            work: Box::new(work),
        }
    }

    /// A job that holds off the guard's connection teardown until it has run.
    ///
    /// The category is the guarded connection's id.
    pub fn guarded<F>(guard: ShutdownGuard, work: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            category: guard.connection().id(),
            guard: Some(guard),
            work: Box::new(work),
        }
    }

    /// A guarded job that calls `f` on `session` if it still exists when the
    /// job runs.
    ///
    /// Only a weak reference is captured: a session torn down before the job
    /// is scheduled turns the job into a no-op.
    pub fn for_session<S, F>(session: &Arc<S>, guard: ShutdownGuard, f: F) -> Self
    where
        S: Send + Sync + 'static,
        F: FnOnce(&S) -> Result<()> + Send + 'static,
    {
        Self::from_weak(Arc::downgrade(session), guard, f)
    }

    /// Same as [`for_session`](Self::for_session), from a weak reference.
    pub fn from_weak<S, F>(session: Weak<S>, guard: ShutdownGuard, f: F) -> Self
    where
        S: Send + Sync + 'static,
        F: FnOnce(&S) -> Result<()> + Send + 'static,
    {
        Self::guarded(guard, move || match session.upgrade() {
            Some(session) => f(&session),
            None => Ok(()),
        })
    }

    #[must_use]
    pub fn category(&self) -> ConnectionId {
        self.category
    }

    /// The guarded connection, if any.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.guard.as_ref().map(ShutdownGuard::connection)
    }

    pub(crate) fn into_parts(self) -> (ConnectionId, Option<ShutdownGuard>, Work) {
        (self.category, self.guard, self.work)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("category", &self.category)
            .field("guarded", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemorySocket;

    #[test]
    fn test_guarded_job_uses_connection_category() {
        let conn = Connection::new(MemorySocket::new(), "memory", 64);
        let job = Job::guarded(ShutdownGuard::new(Arc::clone(&conn)), || Ok(()));
        assert_eq!(job.category(), conn.id());
        assert_eq!(conn.guard_count(), 1);
        drop(job);
        assert_eq!(conn.guard_count(), 0);
    }

    #[test]
    fn test_for_session_noop_when_session_dropped() {
        let conn = Connection::new(MemorySocket::new(), "memory", 64);
        let session = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let job = Job::for_session(&session, ShutdownGuard::new(conn), |s| {
            s.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });
        drop(session);

        let (_, _guard, work) = job.into_parts();
        assert!(work().is_ok());
    }

    #[test]
    fn test_for_session_runs_when_alive() {
        let conn = Connection::new(MemorySocket::new(), "memory", 64);
        let session = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let job = Job::for_session(&session, ShutdownGuard::new(conn), |s| {
            s.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        let (_, _guard, work) = job.into_parts();
        work().unwrap();
        assert_eq!(session.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
