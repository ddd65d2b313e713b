//! TCP server that serves one connection at a time.

use std::net::{Ipv4Addr, SocketAddr};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use conduit_core::logging::{span_names, targets};
use conduit_core::{JoinOutcome, LoopThread, LoopThreadConfig, Signal};
use parking_lot::Mutex;
use tracing::Instrument;

use super::acceptor::{ConnectionAcceptor, ServiceGate};
use super::config::TcpServerConfig;
use super::connection::{ConnectionInfo, DroppedConnection, ReceivedData};
use super::events::ServerEvents;
use super::pump::DataPump;
use super::state::ServerLifecycleState;
use crate::address::ServerEndpoint;
use crate::error::{AcceptError, BindError, Result, ServerError};
use crate::ports::PortAllocator;

/// What the accept loop thread hands back when it exits.
type LoopExit = std::result::Result<ConnectionAcceptor, AcceptError>;

/// Lifecycle state. Its lock is only held for short updates, never while
/// waiting on the accept loop thread.
struct Lifecycle {
    state: ServerLifecycleState,
    /// Present while the accept loop is not running.
    acceptor: Option<ConnectionAcceptor>,
    /// Present while the accept loop is running.
    thread: Option<LoopThread<LoopExit>>,
    dispose_requested: bool,
}

/// A TCP server that accepts one connection at a time and reports the bytes
/// it reads through signals.
///
/// The listening socket is bound when the server is constructed. `start()`
/// runs the accept loop on a dedicated thread: it accepts a connection,
/// drains it until the peer closes it or a read fails, and only then accepts
/// the next one. At most one connection is serviced at any instant; further
/// clients wait in the OS backlog.
///
/// # Signals
///
/// - [`data_received`](Self::data_received): a chunk of bytes was read
/// - [`data_dropped`](Self::data_dropped): a connection was dropped on a fault
/// - [`connection_accepted`](Self::connection_accepted): a connection is about to be drained
/// - [`accept_failed`](Self::accept_failed): the accept loop stopped on a fault
/// - [`started`](Self::started) / [`stopped`](Self::stopped): the accept loop started or stopped
/// - [`disposing`](Self::disposing) / [`disposed`](Self::disposed): disposal began or finished
///
/// Data and accept signals are emitted on the accept loop thread. A slot
/// that panics there takes the accept loop down with it; `stop()` then
/// reports [`ServerError::LoopPanicked`].
///
/// # Example
///
/// ```no_run
/// use conduit_net::tcp::{TcpServer, TcpServerConfig};
///
/// let server = TcpServer::bind(TcpServerConfig::loopback(46400))?;
///
/// server.data_received().connect(|data| {
///     println!("{} sent {} bytes", data.connection.id, data.len());
/// });
///
/// server.start()?;
/// // ...
/// server.dispose();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct TcpServer {
    config: TcpServerConfig,
    endpoint: ServerEndpoint,
    local_addr: SocketAddr,
    events: Arc<ServerEvents>,
    gate: Arc<ServiceGate>,
    /// Held for the whole of each start, stop or dispose, including the join.
    control: Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
}

impl TcpServer {
    /// Validate `config` and bind its endpoint.
    pub fn bind(config: TcpServerConfig) -> Result<Self, BindError> {
        let endpoint = config.endpoint()?;
        let acceptor = ConnectionAcceptor::bind(endpoint)?;
        Ok(Self::from_acceptor(config, acceptor))
    }

    /// Bind `address:port` with default settings.
    pub fn new(address: &str, port: u16) -> Result<Self, BindError> {
        Self::bind(TcpServerConfig::new(address, port))
    }

    /// Bind 127.0.0.1 on the first free port of the port catalog.
    ///
    /// The address and port in `config` are ignored. A port taken between
    /// the availability probe and the bind is skipped.
    pub fn bind_local(config: TcpServerConfig) -> Result<Self, BindError> {
        let mut last_in_use = None;

        for port in PortAllocator::default().available_ports(Ipv4Addr::LOCALHOST) {
            let candidate = TcpServerConfig {
                bind_address: Ipv4Addr::LOCALHOST.to_string(),
                port,
                ..config.clone()
            };
            match Self::bind(candidate) {
                Ok(server) => return Ok(server),
                Err(BindError::PortInUse(port)) => {
                    tracing::debug!(target: targets::SERVER, port, "lost port race, trying next");
                    last_in_use = Some(port);
                }
                Err(err) => return Err(err),
            }
        }

        Err(match last_in_use {
            Some(port) => BindError::PortInUse(port),
            None => BindError::ListenerStartFailed {
                code: None,
                message: "no free port in the catalog".to_string(),
            },
        })
    }

    fn from_acceptor(config: TcpServerConfig, acceptor: ConnectionAcceptor) -> Self {
        Self {
            config,
            endpoint: acceptor.endpoint(),
            local_addr: acceptor.local_addr(),
            events: Arc::new(ServerEvents::new()),
            gate: Arc::new(ServiceGate::new()),
            control: Mutex::new(()),
            lifecycle: Mutex::new(Lifecycle {
                state: ServerLifecycleState::Unstarted,
                acceptor: Some(acceptor),
                thread: None,
                dispose_requested: false,
            }),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &TcpServerConfig {
        &self.config
    }

    /// The validated endpoint the server was bound to.
    pub fn endpoint(&self) -> ServerEndpoint {
        self.endpoint
    }

    /// The address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the current lifecycle state.
    ///
    /// After an accept fault the state stays `Running` until `stop()`
    /// collects the fault.
    pub fn state(&self) -> ServerLifecycleState {
        self.lifecycle.lock().state
    }

    /// Check if the accept loop is running.
    pub fn is_running(&self) -> bool {
        let lifecycle = self.lifecycle.lock();
        lifecycle.state == ServerLifecycleState::Running
            && lifecycle.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Check if the server has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.state() == ServerLifecycleState::Disposed
    }

    /// Connections currently being drained: 0 or 1.
    pub fn active_connections(&self) -> usize {
        self.gate.active()
    }

    /// Connections accepted since the server was bound.
    pub fn connections_served(&self) -> u64 {
        self.gate.served()
    }

    /// All server signals.
    pub fn events(&self) -> &ServerEvents {
        &self.events
    }

    /// Emitted for every chunk of bytes read.
    pub fn data_received(&self) -> &Signal<ReceivedData> {
        &self.events.data_received
    }

    /// Emitted once for every connection dropped on a fault.
    pub fn data_dropped(&self) -> &Signal<DroppedConnection> {
        &self.events.data_dropped
    }

    /// Emitted when a connection is accepted, before it is read.
    pub fn connection_accepted(&self) -> &Signal<ConnectionInfo> {
        &self.events.connection_accepted
    }

    /// Emitted when the accept loop stops on a fault.
    pub fn accept_failed(&self) -> &Signal<AcceptError> {
        &self.events.accept_failed
    }

    /// Emitted when the accept loop starts.
    pub fn started(&self) -> &Signal<SocketAddr> {
        &self.events.started
    }

    /// Emitted when the accept loop stops.
    pub fn stopped(&self) -> &Signal<()> {
        &self.events.stopped
    }

    /// Emitted when disposal begins.
    pub fn disposing(&self) -> &Signal<()> {
        &self.events.disposing
    }

    /// Emitted when disposal has released the listening socket.
    pub fn disposed(&self) -> &Signal<()> {
        &self.events.disposed
    }

    /// Start the accept loop.
    ///
    /// A loop that is already running is stopped first, so calling `start()`
    /// twice restarts the server. Fails with [`ServerError::Disposed`] after
    /// disposal and with [`ServerError::ListenerClosed`] once an accept fault
    /// has closed the listening socket. A `stop()` or `dispose()` in progress
    /// on another thread is waited for.
    pub fn start(&self) -> Result<()> {
        let (restarted, started) = {
            let _control = self.control.lock();
            {
                let lifecycle = self.lifecycle.lock();
                if lifecycle.dispose_requested
                    || lifecycle.state == ServerLifecycleState::Disposed
                {
                    return Err(ServerError::Disposed);
                }
            }

            let restarted = self.halt();
            if let Some(Err(err)) = &restarted {
                tracing::warn!(
                    target: targets::SERVER,
                    error = %err,
                    "previous accept loop ended with an error"
                );
            }

            (restarted.is_some(), self.launch())
        };

        if restarted {
            self.events.stopped.emit(());
        }
        started?;
        self.events.started.emit(self.local_addr);
        Ok(())
    }

    /// Stop the accept loop.
    ///
    /// Requests a graceful stop and waits up to the configured join timeout,
    /// then forces cancellation and waits again. A connection being drained
    /// when cancellation is forced is closed without a `data_dropped`
    /// notification. Does nothing when the loop is not running.
    ///
    /// A loop that ignores forced cancellation too is abandoned and
    /// [`ServerError::LoopDetached`] is returned; the listening socket is
    /// lost with it.
    pub fn stop(&self) -> Result<()> {
        let halted = {
            let _control = self.control.lock();
            self.halt()
        };

        match halted {
            Some(result) => {
                self.events.stopped.emit(());
                result
            }
            None => Ok(()),
        }
    }

    /// Stop the accept loop and release the listening socket.
    ///
    /// Emits `disposing` first and `disposed` last. Errors from stopping are
    /// logged and swallowed. Only the first call has any effect.
    pub fn dispose(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.dispose_requested {
                return;
            }
            lifecycle.dispose_requested = true;
        }

        tracing::info!(target: targets::SERVER, endpoint = %self.endpoint, "disposing server");
        self.events.disposing.emit(());

        let halted = {
            let _control = self.control.lock();
            self.halt()
        };
        if let Some(result) = halted {
            if let Err(err) = result {
                tracing::warn!(
                    target: targets::SERVER,
                    error = %err,
                    "accept loop ended with an error during disposal"
                );
            }
            self.events.stopped.emit(());
        }

        self.release();
        self.events.disposed.emit(());
    }

    /// Close the listening socket and enter the terminal state.
    fn release(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.acceptor.take().is_some() {
            tracing::debug!(
                target: targets::SERVER,
                endpoint = %self.endpoint,
                "listening socket closed"
            );
        }
        lifecycle.state = ServerLifecycleState::Disposed;
    }

    /// Spawn the accept loop thread. The control lock must be held.
    fn launch(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        let Some(acceptor) = lifecycle.acceptor.take() else {
            return Err(ServerError::ListenerClosed);
        };

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                lifecycle.acceptor = Some(acceptor);
                return Err(ServerError::Runtime(err.to_string()));
            }
        };

        let pump = DataPump::new(acceptor.id(), self.config.socket.clone(), self.events.clone());
        let gate = self.gate.clone();
        let events = self.events.clone();
        let span = tracing::info_span!(
            target: targets::ACCEPTOR,
            span_names::ACCEPT_LOOP,
            endpoint = %self.endpoint,
        );

        let config = LoopThreadConfig::with_name(self.config.thread_name.clone());
        let thread = LoopThread::spawn(&config, move |cancel| {
            runtime.block_on(
                acceptor
                    .run(&pump, &gate, &cancel, &events)
                    .instrument(span),
            )
        })
        .map_err(|err| {
            tracing::error!(
                target: targets::SERVER,
                error = %err,
                "failed to spawn accept loop thread"
            );
            ServerError::Spawn(err.to_string())
        })?;

        tracing::info!(target: targets::SERVER, endpoint = %self.endpoint, "accept loop started");
        lifecycle.thread = Some(thread);
        lifecycle.state = ServerLifecycleState::Running;
        Ok(())
    }

    /// Stop the accept loop thread, if any. The control lock must be held.
    ///
    /// The lifecycle lock is released while waiting for the thread, so
    /// slots on the loop thread can still query the server.
    ///
    /// Returns `None` when no loop was running.
    fn halt(&self) -> Option<Result<()>> {
        let thread = {
            let mut lifecycle = self.lifecycle.lock();
            let thread = lifecycle.thread.take()?;
            lifecycle.state = ServerLifecycleState::Stopping;
            thread
        };
        tracing::info!(target: targets::SERVER, endpoint = %self.endpoint, "stopping accept loop");

        let (acceptor, result) = match thread.shutdown(self.config.join_timeout) {
            JoinOutcome::Finished(Ok(acceptor)) => (Some(acceptor), Ok(())),
            JoinOutcome::Finished(Err(err)) => (None, Err(ServerError::Accept(err))),
            JoinOutcome::Panicked => (None, Err(ServerError::LoopPanicked)),
            JoinOutcome::Detached => {
                tracing::warn!(
                    target: targets::SERVER,
                    endpoint = %self.endpoint,
                    "accept loop abandoned, listening socket closes when it exits"
                );
                (None, Err(ServerError::LoopDetached))
            }
        };

        let mut lifecycle = self.lifecycle.lock();
        if acceptor.is_some() {
            lifecycle.acceptor = acceptor;
        }
        lifecycle.state = ServerLifecycleState::Stopped;
        tracing::info!(target: targets::SERVER, endpoint = %self.endpoint, "accept loop stopped");
        Some(result)
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // Release without notifying; the loop thread is told to exit but
            // not waited for.
            let lifecycle = self.lifecycle.get_mut();
            lifecycle.dispose_requested = true;
            lifecycle.thread.take();
            lifecycle.acceptor.take();
            lifecycle.state = ServerLifecycleState::Disposed;
            return;
        }

        if catch_unwind(AssertUnwindSafe(|| self.dispose())).is_err() {
            tracing::error!(
                target: targets::SERVER,
                endpoint = %self.endpoint,
                "panic while disposing dropped server"
            );
        }
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_queries_do_not_wait_for_control() {
        let server = TcpServer::bind_local(TcpServerConfig::default()).unwrap();
        server.start().unwrap();

        let _control = server.control.lock();
        assert_eq!(server.state(), ServerLifecycleState::Running);
        assert!(server.is_running());
        assert!(!server.is_disposed());
    }

    // Shutting down a listening socket makes a pending accept fail on Linux.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_accept_fault_closes_listener() {
        use std::net::Shutdown;
        use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};

        let server = TcpServer::bind_local(TcpServerConfig::default()).unwrap();
        let port = server.local_addr().port();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        server
            .accept_failed()
            .connect(move |err| sink.lock().push(err.clone()));

        let fd = server
            .lifecycle
            .lock()
            .acceptor
            .as_ref()
            .map(|acceptor| acceptor.as_raw_fd())
            .unwrap();
        server.start().unwrap();

        let socket = unsafe { std::net::TcpStream::from_raw_fd(fd) };
        socket.shutdown(Shutdown::Both).unwrap();
        let _ = socket.into_raw_fd();

        assert!(wait_until(|| !server.is_running()));
        let failure = {
            let failures = failures.lock();
            assert_eq!(failures.len(), 1);
            failures[0].clone()
        };
        assert!(matches!(failure, AcceptError::Accept { .. }));
        assert_eq!(server.stop(), Err(ServerError::Accept(failure)));
        assert_eq!(server.start(), Err(ServerError::ListenerClosed));
        assert!(TcpServer::new("127.0.0.1", port).is_ok());
    }
}
