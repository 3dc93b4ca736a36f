//! Job dispatcher ordering and fault containment.

mod harness;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use harness::{Log, config, memory_connection};
use parking_lot::Mutex;
use wharf::job::FaultHook;
use wharf::{ConnectionId, Error, Job, JobDispatcher, ShutdownGuard};

#[test]
fn test_same_category_runs_in_order_without_overlap() {
    let dispatcher = JobDispatcher::start(&config()).unwrap();
    let category = ConnectionId::next();
    let spans: Log<(usize, Instant, Instant)> = Log::default();

    for i in 0..20 {
        let spans = spans.clone();
        dispatcher
            .enqueue(Job::new(category, move || {
                let start = Instant::now();
                thread::sleep(Duration::from_millis(2));
                spans.push((i, start, Instant::now()));
                Ok(())
            }))
            .unwrap();
    }
    dispatcher.wait_idle();

    let spans = spans.items();
    assert_eq!(spans.iter().map(|s| s.0).collect::<Vec<_>>(), (0..20).collect::<Vec<_>>());
    for pair in spans.windows(2) {
        assert!(pair[0].2 <= pair[1].1, "jobs {} and {} overlapped", pair[0].0, pair[1].0);
    }
}

#[test]
fn test_different_categories_overlap() {
    let dispatcher = JobDispatcher::start(&config().with_worker_threads(2)).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        dispatcher
            .enqueue(Job::new(ConnectionId::next(), move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(2);
                // Hold until the other job has started, or give up.
                while peak.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(1));
                }
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
    }
    dispatcher.wait_idle();

    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failing_job_forces_its_connection_down() {
    let seen: Arc<Mutex<Vec<ConnectionId>>> = Arc::default();
    let hook: FaultHook = {
        let seen = Arc::clone(&seen);
        Arc::new(move |category, _err: &Error| seen.lock().push(category))
    };
    let dispatcher = JobDispatcher::with_fault_hook(&config(), hook).unwrap();

    let (socket, bad) = memory_connection();
    let (_, good) = memory_connection();
    bad.queue_write(b"never sent").unwrap();

    dispatcher
        .enqueue(Job::guarded(ShutdownGuard::new(bad.clone()), || {
            Err(Error::Application("boom".into()))
        }))
        .unwrap();
    dispatcher
        .enqueue(Job::guarded(ShutdownGuard::new(good.clone()), || panic!("kaboom")))
        .unwrap();
    let after = Arc::new(AtomicUsize::new(0));
    {
        let after = Arc::clone(&after);
        dispatcher
            .enqueue(Job::new(ConnectionId::next(), move || {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
    }
    dispatcher.wait_idle();

    assert!(bad.is_closed());
    assert!(good.is_closed());
    assert_eq!(socket.outbound_len(), 0);
    assert_eq!(dispatcher.fault_count(), 2);
    assert_eq!(dispatcher.completed_count(), 3);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    let mut seen = seen.lock().clone();
    seen.sort();
    let mut expected = vec![bad.id(), good.id()];
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn test_job_may_enqueue_follow_up_on_same_category() {
    let dispatcher = JobDispatcher::start(&config()).unwrap();
    let sender = dispatcher.sender();
    let category = ConnectionId::next();
    let order: Log<&'static str> = Log::default();

    {
        let order = order.clone();
        dispatcher
            .enqueue(Job::new(category, move || {
                order.push("first");
                let inner = order.clone();
                sender.enqueue(Job::new(category, move || {
                    inner.push("follow-up");
                    Ok(())
                }))?;
                thread::sleep(Duration::from_millis(5));
                order.push("first done");
                Ok(())
            }))
            .unwrap();
    }
    dispatcher.wait_idle();

    assert_eq!(order.items(), vec!["first", "first done", "follow-up"]);
}

#[test]
fn test_guard_holds_connection_until_job_runs() {
    let dispatcher = JobDispatcher::start(&config()).unwrap();
    let (_, conn) = memory_connection();
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock();

    {
        let gate = Arc::clone(&gate);
        let conn_in_job = Arc::clone(&conn);
        dispatcher
            .enqueue(Job::guarded(ShutdownGuard::new(conn.clone()), move || {
                let _open = gate.lock();
                assert!(!conn_in_job.is_closed());
                Ok(())
            }))
            .unwrap();
    }
    conn.shutdown();
    assert!(conn.is_shutdown_requested());
    assert!(!conn.is_closed());

    drop(held);
    dispatcher.wait_idle();
    assert!(conn.is_closed());
    assert_eq!(dispatcher.fault_count(), 0);
}

#[test]
fn test_enqueue_after_stop_fails() {
    let dispatcher = JobDispatcher::start(&config()).unwrap();
    let sender = dispatcher.sender();
    dispatcher.stop();
    assert_eq!(
        sender.enqueue(Job::new(ConnectionId::next(), || Ok(()))).unwrap_err(),
        Error::DispatcherStopped
    );
}

#[test]
fn test_stop_runs_already_queued_jobs() {
    let dispatcher = JobDispatcher::start(&config().with_worker_threads(1)).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let ran = Arc::clone(&ran);
        dispatcher
            .enqueue(Job::new(ConnectionId::next(), move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
    }
    dispatcher.stop();
    assert_eq!(ran.load(Ordering::SeqCst), 10);
}
