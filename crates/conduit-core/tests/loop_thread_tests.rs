//! Tests for dedicated loop threads and staged shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use conduit_core::{CancelLevel, JoinOutcome, LoopThread, LoopThreadConfig};

#[test]
fn test_thread_uses_configured_name() {
    let thread = LoopThread::spawn(&LoopThreadConfig::with_name("named-loop"), |cancel| {
        while !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::current().name().map(str::to_owned)
    })
    .unwrap();

    assert_eq!(thread.name(), "named-loop");
    match thread.shutdown(Duration::from_millis(500)) {
        JoinOutcome::Finished(name) => assert_eq!(name.as_deref(), Some("named-loop")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_graceful_shutdown_returns_body_value() {
    let thread = LoopThread::spawn(&LoopThreadConfig::default(), |cancel| {
        while cancel.level() < CancelLevel::Graceful {
            std::thread::sleep(Duration::from_millis(1));
        }
        cancel.level()
    })
    .unwrap();

    match thread.shutdown(Duration::from_millis(500)) {
        JoinOutcome::Finished(level) => assert_eq!(level, CancelLevel::Graceful),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_shutdown_escalates_to_forced() {
    // Ignores the graceful request, honours the forced one.
    let thread = LoopThread::spawn(&LoopThreadConfig::default(), |cancel| {
        while cancel.level() < CancelLevel::Forced {
            std::thread::sleep(Duration::from_millis(1));
        }
        cancel.level()
    })
    .unwrap();

    let started = Instant::now();
    match thread.shutdown(Duration::from_millis(50)) {
        JoinOutcome::Finished(level) => assert_eq!(level, CancelLevel::Forced),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_unresponsive_thread_is_detached() {
    let release = Arc::new(AtomicBool::new(false));
    let release_clone = release.clone();
    let thread = LoopThread::spawn(&LoopThreadConfig::default(), move |_cancel| {
        while !release_clone.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
    })
    .unwrap();

    let started = Instant::now();
    assert!(matches!(
        thread.shutdown(Duration::from_millis(20)),
        JoinOutcome::Detached
    ));
    assert!(started.elapsed() < Duration::from_secs(2));

    release.store(true, Ordering::SeqCst);
}

#[test]
fn test_panicking_body_is_reported() {
    let thread = LoopThread::spawn(&LoopThreadConfig::default(), |_cancel| -> u32 {
        panic!("loop body failed");
    })
    .unwrap();

    assert!(thread.wait_timeout(Duration::from_secs(1)));
    assert!(thread.is_finished());
    assert!(matches!(
        thread.shutdown(Duration::from_millis(100)),
        JoinOutcome::Panicked
    ));
}

#[test]
fn test_wait_timeout_reports_running_thread() {
    let thread = LoopThread::spawn(&LoopThreadConfig::default(), |cancel| {
        while !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(1));
        }
    })
    .unwrap();

    assert!(!thread.wait_timeout(Duration::from_millis(20)));
    assert!(!thread.is_finished());
    assert!(matches!(
        thread.shutdown(Duration::from_millis(500)),
        JoinOutcome::Finished(())
    ));
}

#[test]
fn test_drop_requests_forced_cancellation() {
    let observed = Arc::new(AtomicBool::new(false));
    let observed_clone = observed.clone();
    let thread = LoopThread::spawn(&LoopThreadConfig::default(), move |cancel| {
        while cancel.level() < CancelLevel::Forced {
            std::thread::sleep(Duration::from_millis(1));
        }
        observed_clone.store(true, Ordering::SeqCst);
    })
    .unwrap();

    drop(thread);

    for _ in 0..100 {
        if observed.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(observed.load(Ordering::SeqCst));
}
