//! Per-connection state passed from the acceptor to the data pump.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::error::TransportFault;

/// Unique identifier for an accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new connection ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifies the listening socket that armed an accept.
///
/// A pump only drains connections carrying its own listener's ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Identity of a connection, as reported to subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// The connection ID.
    pub id: ConnectionId,
    /// The listener that accepted it.
    pub listener: ListenerId,
    /// The server-side address.
    pub local_addr: SocketAddr,
    /// The remote address, if the stream could report it.
    pub peer_addr: Option<SocketAddr>,
}

/// State carried by one accept, from arming to completion.
///
/// The acceptor arms a context with its listener ID before waiting, then
/// attaches the accepted stream. The pump takes ownership of the whole
/// context and drops the stream when it is done.
#[derive(Debug)]
pub(crate) struct ConnectionContext {
    id: ConnectionId,
    owner: Option<ListenerId>,
    local_addr: SocketAddr,
    connection: Option<TcpStream>,
}

impl ConnectionContext {
    /// Create a context from raw parts.
    ///
    /// `owner` or `connection` may be absent; the pump reports such a
    /// context as dropped instead of reading from it.
    pub(crate) fn new(
        owner: Option<ListenerId>,
        local_addr: SocketAddr,
        connection: Option<TcpStream>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            owner,
            local_addr,
            connection,
        }
    }

    /// Create a context armed by `owner`, waiting for a stream.
    pub(crate) fn armed(owner: ListenerId, local_addr: SocketAddr) -> Self {
        Self::new(Some(owner), local_addr, None)
    }

    /// Attach the accepted stream.
    pub(crate) fn attach(mut self, stream: TcpStream) -> Self {
        self.connection = Some(stream);
        self
    }

    /// The connection ID.
    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    /// The listener that armed this context, if any.
    pub(crate) fn owner(&self) -> Option<ListenerId> {
        self.owner
    }

    /// Remove the attached stream.
    pub(crate) fn take_connection(&mut self) -> Option<TcpStream> {
        self.connection.take()
    }

    /// The identity reported to subscribers once `listener` has been
    /// checked as the owner.
    pub(crate) fn info(
        &self,
        listener: ListenerId,
        peer_addr: Option<SocketAddr>,
    ) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            listener,
            local_addr: self.local_addr,
            peer_addr,
        }
    }
}

/// One chunk of bytes read from a connection.
///
/// Each read produces its own chunk; `bytes` is never longer than the read
/// buffer and never shared with a later read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedData {
    /// The connection the bytes came from.
    pub connection: ConnectionInfo,
    /// The bytes, exactly as read.
    pub bytes: Bytes,
}

impl ReceivedData {
    /// Number of bytes in the chunk.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the chunk is empty. Emitted chunks never are.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

/// A connection dropped because of a fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DroppedConnection {
    /// The connection, when its callback state was valid.
    pub connection: Option<ConnectionInfo>,
    /// Why it was dropped.
    pub fault: TransportFault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(b > a);
        assert_ne!(ListenerId::new(), ListenerId::new());
    }

    #[test]
    fn test_armed_context() {
        let local: SocketAddr = "127.0.0.1:46400".parse().unwrap();
        let orphan = ConnectionContext::new(None, local, None);
        assert!(orphan.owner().is_none());

        let listener = ListenerId::new();
        let armed = ConnectionContext::armed(listener, local);
        assert_eq!(armed.owner(), Some(listener));
        let info = armed.info(listener, None);
        assert_eq!(info.listener, listener);
        assert_eq!(info.local_addr, local);
        assert_eq!(info.id, armed.id());
        assert!(armed.connection.is_none());
    }
}
