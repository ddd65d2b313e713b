//! Dedicated loop threads with staged cancellation.
//!
//! A [`LoopThread`] runs one long-lived body on its own named OS thread. The
//! owner stops it in stages through a shared [`CancelToken`]:
//!
//! 1. [`CancelLevel::Graceful`]: the body should stop taking new work and
//!    return once the current unit of work is done.
//! 2. [`CancelLevel::Forced`]: the body should abandon in-flight work and
//!    return immediately.
//!
//! [`LoopThread::shutdown`] escalates through both levels, waiting at most the
//! given timeout after each, and detaches the thread if it still has not
//! exited. Threads cannot be killed, so a body that never observes the token
//! keeps running after it has been detached.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use conduit_core::loop_thread::{CancelLevel, JoinOutcome, LoopThread, LoopThreadConfig};
//!
//! let thread = LoopThread::spawn(&LoopThreadConfig::default(), |cancel| {
//!     let mut ticks = 0u32;
//!     while cancel.level() < CancelLevel::Graceful {
//!         ticks += 1;
//!         std::thread::sleep(Duration::from_millis(1));
//!     }
//!     ticks
//! })
//! .unwrap();
//!
//! assert!(matches!(
//!     thread.shutdown(Duration::from_millis(500)),
//!     JoinOutcome::Finished(_)
//! ));
//! ```

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tokio::sync::watch;

use crate::logging::targets;

/// How far a shutdown request has escalated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CancelLevel {
    /// No cancellation requested.
    #[default]
    Running,
    /// Finish the current unit of work, then exit.
    Graceful,
    /// Abandon in-flight work and exit now.
    Forced,
}

impl std::fmt::Display for CancelLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Graceful => write!(f, "Graceful"),
            Self::Forced => write!(f, "Forced"),
        }
    }
}

/// A cloneable handle for requesting and observing cancellation.
///
/// The level only ever increases. Synchronous code polls
/// [`level`](Self::level); async code awaits [`cancelled`](Self::cancelled).
#[derive(Clone, Debug)]
pub struct CancelToken {
    level: Arc<watch::Sender<CancelLevel>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a token at [`CancelLevel::Running`].
    pub fn new() -> Self {
        let (level, _) = watch::channel(CancelLevel::Running);
        Self {
            level: Arc::new(level),
        }
    }

    /// The current cancellation level.
    pub fn level(&self) -> CancelLevel {
        *self.level.borrow()
    }

    /// Whether any cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.level() > CancelLevel::Running
    }

    /// Raise the cancellation level. Requests below the current level are
    /// ignored.
    pub fn escalate(&self, level: CancelLevel) {
        self.level.send_if_modified(|current| {
            if level > *current {
                *current = level;
                true
            } else {
                false
            }
        });
    }

    /// Wait until the level reaches at least `level`.
    pub async fn cancelled(&self, level: CancelLevel) {
        let mut rx = self.level.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed
        // channel while we are borrowed.
        let _ = rx.wait_for(|current| *current >= level).await;
    }
}

/// Configuration for spawning a [`LoopThread`].
#[derive(Debug, Clone)]
pub struct LoopThreadConfig {
    /// Name for the thread.
    pub name: String,
    /// Stack size for the thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for LoopThreadConfig {
    fn default() -> Self {
        Self {
            name: "conduit-loop".to_string(),
            stack_size: None,
        }
    }
}

impl LoopThreadConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

/// Result of [`LoopThread::shutdown`].
#[derive(Debug)]
pub enum JoinOutcome<T> {
    /// The body returned this value.
    Finished(T),
    /// The body panicked.
    Panicked,
    /// The thread did not exit in time and was left running.
    Detached,
}

/// A dedicated thread running one long-lived body.
pub struct LoopThread<T> {
    name: String,
    handle: Option<JoinHandle<T>>,
    /// Disconnects when the thread exits, including by unwinding.
    exited: Receiver<()>,
    cancel: CancelToken,
}

impl<T: Send + 'static> LoopThread<T> {
    /// Spawn `body` on a new thread. The body receives the thread's
    /// cancellation token.
    pub fn spawn<F>(config: &LoopThreadConfig, body: F) -> io::Result<Self>
    where
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        let cancel = CancelToken::new();
        let (exit_tx, exit_rx) = bounded::<()>(1);

        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_cancel = cancel.clone();
        let handle = builder.spawn(move || {
            let _exit = exit_tx;
            body(thread_cancel)
        })?;

        tracing::debug!(target: targets::LOOP_THREAD, name = %config.name, "loop thread spawned");

        Ok(Self {
            name: config.name.clone(),
            handle: Some(handle),
            exited: exit_rx,
            cancel,
        })
    }
}

impl<T> LoopThread<T> {
    /// The thread's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The token shared with the body.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Whether the body has returned or unwound.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `true` if the thread exited within the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Stop the thread: request a graceful exit, then a forced one, waiting
    /// up to `timeout` after each request.
    pub fn shutdown(mut self, timeout: Duration) -> JoinOutcome<T> {
        self.cancel.escalate(CancelLevel::Graceful);
        if !self.wait_timeout(timeout) {
            tracing::warn!(
                target: targets::LOOP_THREAD,
                name = %self.name,
                timeout_ms = timeout.as_millis() as u64,
                "loop thread did not exit gracefully, forcing cancellation"
            );
            self.cancel.escalate(CancelLevel::Forced);
            if !self.wait_timeout(timeout) {
                tracing::error!(
                    target: targets::LOOP_THREAD,
                    name = %self.name,
                    "loop thread ignored forced cancellation, detaching"
                );
                self.handle.take();
                return JoinOutcome::Detached;
            }
        }

        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(value)) => {
                tracing::debug!(
                    target: targets::LOOP_THREAD,
                    name = %self.name,
                    "loop thread joined"
                );
                JoinOutcome::Finished(value)
            }
            Some(Err(_)) => {
                tracing::error!(
                    target: targets::LOOP_THREAD,
                    name = %self.name,
                    "loop thread panicked"
                );
                JoinOutcome::Panicked
            }
            None => JoinOutcome::Detached,
        }
    }
}

impl<T> Drop for LoopThread<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Don't block in drop - just request the fastest exit.
            self.cancel.escalate(CancelLevel::Forced);
        }
    }
}

impl<T> std::fmt::Debug for LoopThread<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopThread")
            .field("name", &self.name)
            .field("cancel", &self.cancel.level())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_is_monotonic() {
        let token = CancelToken::new();
        assert_eq!(token.level(), CancelLevel::Running);
        assert!(!token.is_cancelled());

        token.escalate(CancelLevel::Forced);
        token.escalate(CancelLevel::Graceful);
        assert_eq!(token.level(), CancelLevel::Forced);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_level() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.escalate(CancelLevel::Graceful);
        assert_eq!(token.level(), CancelLevel::Graceful);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_at_requested_level() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled(CancelLevel::Forced).await;
        });

        token.escalate(CancelLevel::Graceful);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        token.escalate(CancelLevel::Forced);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_already_reached() {
        let token = CancelToken::new();
        token.escalate(CancelLevel::Forced);
        tokio::time::timeout(Duration::from_millis(100), token.cancelled(CancelLevel::Graceful))
            .await
            .expect("already cancelled");
    }

    #[test]
    fn test_level_ordering() {
        assert!(CancelLevel::Running < CancelLevel::Graceful);
        assert!(CancelLevel::Graceful < CancelLevel::Forced);
        assert_eq!(CancelLevel::Forced.to_string(), "Forced");
    }
}
