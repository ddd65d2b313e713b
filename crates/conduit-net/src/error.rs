//! Error types for the networking module.
//!
//! Errors fall into four groups by how far their damage reaches:
//!
//! - [`ConfigError`] and [`BindError`]: the server or client is never
//!   constructed.
//! - [`TransportFault`]: one connection is dropped; the accept loop carries on.
//! - [`AcceptError`]: the accept loop stops and the listening socket is closed.
//! - [`ServerError`]: a lifecycle operation on an existing server failed.

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Invalid configuration detected before any socket operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The address could not be parsed.
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),
    /// The address parsed but is not IPv4.
    #[error("Address {0} is not an IPv4 address")]
    NotIpv4(IpAddr),
    /// The text is not an `<ipv4>:<port>` pair.
    #[error("Invalid endpoint '{0}': expected <ipv4>:<port>")]
    InvalidEndpoint(String),
    /// The port cannot be connected to.
    #[error("Invalid port {0}")]
    InvalidPort(u16),
    /// A configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
    /// A configuration file could not be read.
    #[error("Failed to read configuration '{}': {message}", .path.display())]
    Io {
        /// The file that was being read.
        path: PathBuf,
        /// The underlying I/O error message.
        message: String,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Failure to bind the listening socket. Fatal to construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// The port lies in the well-known range 0-1024.
    #[error("Port {0} is in the reserved range 0-1024")]
    PortReserved(u16),
    /// The OS reported the port as occupied.
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    /// The address or endpoint failed validation.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] ConfigError),
    /// The bind or listen call failed for another reason.
    #[error("Failed to start listener (os error {code:?}): {message}")]
    ListenerStartFailed {
        /// Native error code, when the OS supplied one.
        code: Option<i32>,
        /// Description of the failure.
        message: String,
    },
}

impl BindError {
    /// Classify an error from binding `port`.
    pub(crate) fn from_io(port: u16, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => Self::PortInUse(port),
            _ => Self::ListenerStartFailed {
                code: err.raw_os_error(),
                message: err.to_string(),
            },
        }
    }

    /// The native error code captured for diagnostics, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::ListenerStartFailed { code, .. } => *code,
            _ => None,
        }
    }
}

/// What went wrong with a single connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportFaultKind {
    /// The read buffer is unusable.
    BufferError,
    /// A read was issued with an invalid offset or length.
    ReadRangeError,
    /// The socket failed: reset, aborted, timed out and similar.
    TransportError,
    /// The stream was already shut down.
    StreamClosed,
    /// The stream does not support reading.
    UnsupportedOperation,
    /// The connection was missing or could not be reached.
    ConnectionLost,
    /// The accept completed with missing or foreign callback state.
    ProtocolStateError,
}

impl std::fmt::Display for TransportFaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferError => write!(f, "BufferError"),
            Self::ReadRangeError => write!(f, "ReadRangeError"),
            Self::TransportError => write!(f, "TransportError"),
            Self::StreamClosed => write!(f, "StreamClosed"),
            Self::UnsupportedOperation => write!(f, "UnsupportedOperation"),
            Self::ConnectionLost => write!(f, "ConnectionLost"),
            Self::ProtocolStateError => write!(f, "ProtocolStateError"),
        }
    }
}

/// A fault scoped to one connection.
///
/// Faults are recovered locally: the connection is dropped and reported to
/// subscribers, and the server moves on to the next connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportFault {
    kind: TransportFaultKind,
    message: String,
}

impl TransportFault {
    /// Create a fault of the given kind.
    pub fn new(kind: TransportFaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an error returned by a stream read.
    pub fn from_read_error(err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::InvalidInput => TransportFaultKind::ReadRangeError,
            io::ErrorKind::NotConnected => TransportFaultKind::StreamClosed,
            io::ErrorKind::Unsupported => TransportFaultKind::UnsupportedOperation,
            _ => TransportFaultKind::TransportError,
        };
        Self::new(kind, err.to_string())
    }

    /// The fault kind.
    pub fn kind(&self) -> TransportFaultKind {
        self.kind
    }

    /// The fault description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A fault while arming or waiting on an accept. Fatal to the server
/// instance: the listening socket is closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcceptError {
    /// The accept call failed.
    #[error("Accept failed (os error {code:?}): {message}")]
    Accept {
        /// Native error code, when the OS supplied one.
        code: Option<i32>,
        /// Description of the failure.
        message: String,
    },
    /// The listening socket could not be handed to or back from the runtime.
    #[error("Failed to register listening socket: {message}")]
    Register {
        /// Description of the failure.
        message: String,
    },
}

impl AcceptError {
    pub(crate) fn accept(err: &io::Error) -> Self {
        Self::Accept {
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }

    pub(crate) fn register(err: &io::Error) -> Self {
        Self::Register {
            message: err.to_string(),
        }
    }
}

/// Failure of a lifecycle operation on an existing server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// The server has been disposed.
    #[error("Server has been disposed")]
    Disposed,
    /// The listening socket is gone; bind a new server.
    #[error("Listening socket has been closed")]
    ListenerClosed,
    /// The accept loop runtime could not be built.
    #[error("Failed to build accept loop runtime: {0}")]
    Runtime(String),
    /// The accept loop thread could not be spawned.
    #[error("Failed to spawn accept loop thread: {0}")]
    Spawn(String),
    /// The accept loop stopped on a fatal fault.
    #[error(transparent)]
    Accept(#[from] AcceptError),
    /// A subscriber or the loop itself panicked on the accept loop thread.
    #[error("Accept loop thread panicked")]
    LoopPanicked,
    /// The accept loop ignored cancellation and was abandoned. The
    /// listening socket closes when it eventually exits.
    #[error("Accept loop did not exit after forced cancellation")]
    LoopDetached,
}

/// A specialized Result type for server lifecycle operations.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_classification() {
        let cases = [
            (io::ErrorKind::InvalidInput, TransportFaultKind::ReadRangeError),
            (io::ErrorKind::NotConnected, TransportFaultKind::StreamClosed),
            (io::ErrorKind::Unsupported, TransportFaultKind::UnsupportedOperation),
            (io::ErrorKind::ConnectionReset, TransportFaultKind::TransportError),
            (io::ErrorKind::ConnectionAborted, TransportFaultKind::TransportError),
            (io::ErrorKind::BrokenPipe, TransportFaultKind::TransportError),
            (io::ErrorKind::TimedOut, TransportFaultKind::TransportError),
        ];

        for (io_kind, expected) in cases {
            let fault = TransportFault::from_read_error(&io::Error::new(io_kind, "boom"));
            assert_eq!(fault.kind(), expected, "for {io_kind:?}");
            assert_eq!(fault.message(), "boom");
        }
    }

    #[test]
    fn test_bind_error_from_io() {
        let in_use = io::Error::from(io::ErrorKind::AddrInUse);
        assert_eq!(BindError::from_io(5000, &in_use), BindError::PortInUse(5000));

        let denied = io::Error::from_raw_os_error(13);
        let err = BindError::from_io(5000, &denied);
        assert!(matches!(err, BindError::ListenerStartFailed { .. }));
        assert_eq!(err.code(), Some(13));
    }

    #[test]
    fn test_fault_display() {
        let fault = TransportFault::new(TransportFaultKind::ConnectionLost, "peer vanished");
        assert_eq!(fault.to_string(), "ConnectionLost: peer vanished");
    }

    #[test]
    fn test_config_error_converts_to_bind_error() {
        let err: BindError = ConfigError::InvalidAddress("nope".into()).into();
        assert_eq!(
            err,
            BindError::InvalidEndpoint(ConfigError::InvalidAddress("nope".into()))
        );
    }
}
