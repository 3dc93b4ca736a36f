use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use super::Job;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::net::ConnectionId;

/// Top-level handler told about every failed job.
pub type FaultHook = Arc<dyn Fn(ConnectionId, &Error) + Send + Sync>;

#[derive(Default)]
struct CategoryQueue {
    jobs: VecDeque<Job>,
    running: bool,
}

/// Scheduler state, guarded by one mutex.
///
/// A category sits in `ready` exactly when it has queued jobs and none of its
/// jobs is running.
#[derive(Default)]
struct Queues {
    categories: HashMap<ConnectionId, CategoryQueue>,
    ready: VecDeque<ConnectionId>,
    queued: usize,
    active: usize,
    stopping: bool,
}

struct Shared {
    queues: Mutex<Queues>,
    work_available: Condvar,
    idle: Condvar,
    completed: AtomicU64,
    faults: AtomicU64,
    fault_hook: Option<FaultHook>,
}

impl Shared {
    fn enqueue(&self, job: Job) -> Result<()> {
        let mut queues = self.queues.lock();
        if queues.stopping {
            return Err(Error::DispatcherStopped);
        }
        let category = job.category();
        let entry = queues.categories.entry(category).or_default();
        entry.jobs.push_back(job);
        let became_ready = !entry.running && entry.jobs.len() == 1;
        queues.queued += 1;
        if became_ready {
            queues.ready.push_back(category);
            drop(queues);
            self.work_available.notify_one();
        }
        Ok(())
    }

    fn worker_loop(&self) {
        let mut queues = self.queues.lock();
        loop {
            let Some(category) = queues.ready.pop_front() else {
                if queues.stopping {
                    break;
                }
                self.work_available.wait(&mut queues);
                continue;
            };

            let job = match queues.categories.get_mut(&category) {
                Some(entry) => {
                    entry.running = true;
                    entry.jobs.pop_front()
                }
                None => None,
            };
            let Some(job) = job else {
                queues.categories.remove(&category);
                continue;
            };
            queues.queued -= 1;
            queues.active += 1;

            drop(queues);
            self.execute(job);
            queues = self.queues.lock();

            queues.active -= 1;
            let requeue = match queues.categories.get_mut(&category) {
                Some(entry) => {
                    entry.running = false;
                    !entry.jobs.is_empty()
                }
                None => false,
            };
            if requeue {
                queues.ready.push_back(category);
            } else {
                queues.categories.remove(&category);
            }
            if queues.queued == 0 && queues.active == 0 {
                self.idle.notify_all();
            }
        }
    }

    fn execute(&self, job: Job) {
        let (category, guard, work) = job.into_parts();
        let failure = match catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(Error::JobPanicked(panic_message(payload.as_ref()))),
        };
        self.completed.fetch_add(1, Ordering::Relaxed);

        let Some(failure) = failure else {
            return;
        };
        if let Some(guard) = &guard {
            guard.connection().force_shutdown();
        }
        error!(category = %category, error = %failure, "job failed");
        self.faults.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = &self.fault_hook {
            if catch_unwind(AssertUnwindSafe(|| hook(category, &failure))).is_err() {
                error!(category = %category, "fault hook panicked");
            }
        }
        drop(guard);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Fixed pool of worker threads running [`Job`]s.
///
/// ## Ordering
///
/// Jobs of one category run in the order they were enqueued and never
/// overlap. Jobs of different categories may run at the same time on
/// different workers.
///
/// ## Failures
///
/// A job that returns `Err` or panics has its guarded connection forced down.
/// The failure is logged, counted and passed to the fault hook. The worker
/// keeps running.
///
/// ## Example
///
/// ```rust,ignore
/// use wharf::{Config, Job, JobDispatcher, ConnectionId};
///
/// let dispatcher = JobDispatcher::start(&Config::default())?;
/// dispatcher.enqueue(Job::new(ConnectionId::next(), || Ok(())))?;
/// dispatcher.wait_idle();
/// ```
pub struct JobDispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobDispatcher {
    /// Spawn `config.worker_threads` workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a worker thread cannot be spawned.
    pub fn start(config: &Config) -> Result<Self> {
        Self::spawn(config.worker_threads, None)
    }

    /// Like [`start`](Self::start), with a hook called for every failed job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a worker thread cannot be spawned.
    pub fn with_fault_hook(config: &Config, hook: FaultHook) -> Result<Self> {
        Self::spawn(config.worker_threads, Some(hook))
    }

    fn spawn(worker_threads: usize, fault_hook: Option<FaultHook>) -> Result<Self> {
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::default()),
            work_available: Condvar::new(),
            idle: Condvar::new(),
            completed: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            fault_hook,
        });
        let dispatcher = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(worker_threads)),
        };
        for index in 0..worker_threads.max(1) {
            let shared = Arc::clone(&dispatcher.shared);
            let handle = thread::Builder::new()
                .name(format!("wharf-job-{index}"))
                .spawn(move || shared.worker_loop())?;
            dispatcher.workers.lock().push(handle);
        }
        debug!(workers = worker_threads.max(1), "job dispatcher started");
        Ok(dispatcher)
    }

    /// Queue a job. Never blocks on other jobs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DispatcherStopped`] after [`stop`](Self::stop).
    pub fn enqueue(&self, job: Job) -> Result<()> {
        self.shared.enqueue(job)
    }

    /// Cloneable handle for enqueueing from sessions and from inside jobs.
    #[must_use]
    pub fn sender(&self) -> JobSender {
        JobSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until nothing is queued or running.
    ///
    /// Must not be called from inside a job.
    pub fn wait_idle(&self) {
        let mut queues = self.shared.queues.lock();
        while queues.queued > 0 || queues.active > 0 {
            self.shared.idle.wait(&mut queues);
        }
    }

    /// Jobs that have finished running, successfully or not.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Jobs that returned an error or panicked.
    #[must_use]
    pub fn fault_count(&self) -> u64 {
        self.shared.faults.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs, run what is already queued and join the workers.
    pub fn stop(&self) {
        {
            let mut queues = self.shared.queues.lock();
            if !queues.stopping {
                queues.stopping = true;
                debug!(queued = queues.queued, "job dispatcher stopping");
            }
        }
        self.shared.work_available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("job worker exited with a panic");
            }
        }
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("workers", &self.workers.lock().len())
            .field("completed", &self.completed_count())
            .field("faults", &self.fault_count())
            .finish()
    }
}

/// Enqueue-only handle to a [`JobDispatcher`].
#[derive(Clone)]
pub struct JobSender {
    shared: Arc<Shared>,
}

impl JobSender {
    /// Queue a job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DispatcherStopped`] once the dispatcher is stopping.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        self.shared.enqueue(job)
    }
}

impl fmt::Debug for JobSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSender").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn dispatcher(workers: usize) -> JobDispatcher {
        JobDispatcher::start(&Config::default().with_worker_threads(workers)).unwrap()
    }

    #[test]
    fn test_runs_jobs_in_category_order() {
        let dispatcher = dispatcher(4);
        let category = ConnectionId::next();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            dispatcher
                .enqueue(Job::new(category, move || {
                    seen.lock().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        dispatcher.wait_idle();

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
        assert_eq!(dispatcher.completed_count(), 100);
    }

    #[test]
    fn test_enqueue_after_stop_fails() {
        let dispatcher = dispatcher(1);
        dispatcher.stop();
        let result = dispatcher.enqueue(Job::new(ConnectionId::next(), || Ok(())));
        assert_eq!(result.unwrap_err(), Error::DispatcherStopped);
    }

    #[test]
    fn test_stop_drains_queue() {
        let dispatcher = dispatcher(2);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let count = Arc::clone(&count);
            dispatcher
                .enqueue(Job::new(ConnectionId::next(), move || {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }
        dispatcher.stop();
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_error_is_counted_and_worker_survives() {
        let dispatcher = dispatcher(1);
        let category = ConnectionId::next();
        dispatcher
            .enqueue(Job::new(category, || Err(Error::Application("boom".into()))))
            .unwrap();
        dispatcher
            .enqueue(Job::new(category, || panic!("job panic")))
            .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        dispatcher
            .enqueue(Job::new(category, move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        dispatcher.wait_idle();

        assert_eq!(dispatcher.fault_count(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
