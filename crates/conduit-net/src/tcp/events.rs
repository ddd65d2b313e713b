//! Server notifications.

use std::net::SocketAddr;

use conduit_core::Signal;

use super::connection::{ConnectionInfo, DroppedConnection, ReceivedData};
use crate::error::AcceptError;

/// The signals a [`TcpServer`](super::TcpServer) emits.
///
/// Data and accept notifications are emitted on the accept loop thread,
/// one at a time and in order. Lifecycle notifications are emitted on the
/// thread that called `start`, `stop` or `dispose`. Slots may query the
/// server's state, but a slot on the accept loop thread must not call
/// `start`, `stop` or `dispose`.
#[derive(Debug, Default)]
pub struct ServerEvents {
    /// A chunk of bytes was read.
    pub data_received: Signal<ReceivedData>,
    /// A connection was dropped because of a fault.
    pub data_dropped: Signal<DroppedConnection>,
    /// A connection was accepted, before it is read.
    pub connection_accepted: Signal<ConnectionInfo>,
    /// The accept loop stopped on a fatal fault.
    pub accept_failed: Signal<AcceptError>,
    /// The accept loop started on this address.
    pub started: Signal<SocketAddr>,
    /// The accept loop stopped.
    pub stopped: Signal<()>,
    /// Disposal is about to release the listening socket.
    pub disposing: Signal<()>,
    /// Disposal finished.
    pub disposed: Signal<()>,
}

impl ServerEvents {
    /// Create a set of signals with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }
}
