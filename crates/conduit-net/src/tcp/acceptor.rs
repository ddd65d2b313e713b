//! The listening socket and the serialized accept loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use conduit_core::logging::targets;
use conduit_core::{CancelLevel, CancelToken};

use super::connection::{ConnectionContext, ListenerId};
use super::events::ServerEvents;
use super::pump::DataPump;
use crate::address::ServerEndpoint;
use crate::error::{AcceptError, BindError};

/// Owns a bound listening socket.
///
/// Between runs the socket is held in std form, so the
/// acceptor can be handed to a fresh runtime on every start.
#[derive(Debug)]
pub(crate) struct ConnectionAcceptor {
    id: ListenerId,
    endpoint: ServerEndpoint,
    local_addr: SocketAddr,
    listener: std::net::TcpListener,
}

impl ConnectionAcceptor {
    /// Bind and listen on `endpoint`.
    pub(crate) fn bind(endpoint: ServerEndpoint) -> Result<Self, BindError> {
        let port = endpoint.port();
        let listener = std::net::TcpListener::bind(endpoint.socket_addr())
            .map_err(|err| BindError::from_io(port, &err))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| BindError::from_io(port, &err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| BindError::from_io(port, &err))?;

        let id = ListenerId::new();
        tracing::info!(target: targets::ACCEPTOR, %id, %local_addr, "listening");

        Ok(Self {
            id,
            endpoint,
            local_addr,
            listener,
        })
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn endpoint(&self) -> ServerEndpoint {
        self.endpoint
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and drain connections one at a time until cancelled.
    ///
    /// Exactly one accept is armed at any moment, and the next one is armed
    /// only after the previous connection has been fully drained. Graceful
    /// cancellation stops waiting for new connections but lets a connection
    /// being drained finish; forced cancellation abandons it.
    ///
    /// Returns the acceptor when cancelled so the loop can be run again. An
    /// accept fault closes the listening socket and is returned instead.
    pub(crate) async fn run(
        self,
        pump: &DataPump,
        gate: &ServiceGate,
        cancel: &CancelToken,
        events: &ServerEvents,
    ) -> Result<Self, AcceptError> {
        let Self {
            id,
            endpoint,
            local_addr,
            listener,
        } = self;

        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(err) => return Err(Self::fail(events, AcceptError::register(&err))),
        };

        loop {
            let armed = ConnectionContext::armed(id, local_addr);
            tracing::debug!(target: targets::ACCEPTOR, connection = %armed.id(), "accept armed");

            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled(CancelLevel::Graceful) => break,
                result = listener.accept() => result,
            };

            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(err) => return Err(Self::fail(events, AcceptError::accept(&err))),
            };

            let _permit = gate.enter();
            tokio::select! {
                biased;
                _ = cancel.cancelled(CancelLevel::Forced) => {
                    tracing::warn!(
                        target: targets::ACCEPTOR,
                        "abandoning connection being drained"
                    );
                    break;
                }
                outcome = pump.drain(armed.attach(stream)) => {
                    tracing::debug!(target: targets::ACCEPTOR, ?outcome, "connection drained");
                }
            }
        }

        let listener = match listener.into_std() {
            Ok(listener) => listener,
            Err(err) => return Err(Self::fail(events, AcceptError::register(&err))),
        };
        tracing::debug!(target: targets::ACCEPTOR, %id, "accept loop exited");

        Ok(Self {
            id,
            endpoint,
            local_addr,
            listener,
        })
    }

    fn fail(events: &ServerEvents, err: AcceptError) -> AcceptError {
        tracing::error!(
            target: targets::ACCEPTOR,
            error = %err,
            "accept loop failed, closing listener"
        );
        events.accept_failed.emit(err.clone());
        err
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for ConnectionAcceptor {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.listener.as_raw_fd()
    }
}

/// Tracks the connection being serviced.
///
/// The accept loop holds a [`ServicePermit`] while a connection is drained.
/// Releasing it, on every exit path including unwinding, is what allows the
/// next accept to be armed.
#[derive(Debug, Default)]
pub(crate) struct ServiceGate {
    active: AtomicUsize,
    served: AtomicU64,
}

impl ServiceGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark a connection as being serviced.
    pub(crate) fn enter(&self) -> ServicePermit<'_> {
        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(previous, 0, "more than one connection serviced at once");
        self.served.fetch_add(1, Ordering::Relaxed);
        ServicePermit { gate: self }
    }

    /// Connections currently being serviced: 0 or 1.
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Connections serviced since the gate was created.
    pub(crate) fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}

/// Held while one connection is serviced.
#[must_use = "the connection counts as serviced only while the permit is held"]
pub(crate) struct ServicePermit<'a> {
    gate: &'a ServiceGate,
}

impl Drop for ServicePermit<'_> {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
    }
}
