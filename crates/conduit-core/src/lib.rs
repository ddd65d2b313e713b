//! Core systems for conduit.
//!
//! This crate provides the building blocks shared by the networking layer:
//!
//! - **Signals**: Synchronous, ordered observer lists ([`Signal`])
//! - **Loop Threads**: Dedicated threads with staged cancellation and a
//!   bounded join ([`LoopThread`])
//! - **Logging**: `tracing` target names for every subsystem
//!
//! # Signal Example
//!
//! ```
//! use conduit_core::Signal;
//!
//! let bytes_seen = Signal::<usize>::new();
//!
//! let id = bytes_seen.connect(|n| {
//!     println!("saw {n} bytes");
//! });
//!
//! bytes_seen.emit(42);
//! bytes_seen.disconnect(id);
//! ```
//!
//! # Loop Thread Example
//!
//! ```
//! use std::time::Duration;
//! use conduit_core::{CancelLevel, JoinOutcome, LoopThread, LoopThreadConfig};
//!
//! let thread = LoopThread::spawn(&LoopThreadConfig::with_name("poller"), |cancel| {
//!     while !cancel.is_cancelled() {
//!         std::thread::sleep(Duration::from_millis(5));
//!     }
//!     cancel.level()
//! })
//! .unwrap();
//!
//! match thread.shutdown(Duration::from_millis(500)) {
//!     JoinOutcome::Finished(level) => assert_eq!(level, CancelLevel::Graceful),
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! ```

pub mod logging;
pub mod loop_thread;
pub mod signal;

pub use loop_thread::{CancelLevel, CancelToken, JoinOutcome, LoopThread, LoopThreadConfig};
pub use signal::{ConnectionGuard, ConnectionId, Signal};
