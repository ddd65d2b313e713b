//! Networking module for conduit.
//!
//! This crate provides a minimal TCP server/client pair:
//!
//! - **TcpServer**: binds an IPv4 port, accepts one connection at a time and
//!   reports every chunk it reads through signals
//! - **TcpClient**: opens a connection per send and writes one buffer
//! - **Address validation**: IPv4-only parsing and the reserved port rule
//! - **Port catalog**: named port ranges and availability probing
//!
//! Payload bytes are opaque: there is no framing or wire protocol, and each
//! notification carries exactly the bytes one read returned.
//!
//! # Serving one connection at a time
//!
//! ```no_run
//! use conduit_net::tcp::{TcpServer, TcpServerConfig};
//!
//! let server = TcpServer::bind_local(TcpServerConfig::default())?;
//! println!("listening on {}", server.local_addr());
//!
//! server.data_received().connect(|data| {
//!     println!("{}: {} bytes", data.connection.id, data.len());
//! });
//! server.data_dropped().connect(|dropped| {
//!     eprintln!("dropped: {}", dropped.fault);
//! });
//!
//! server.start()?;
//! // ...
//! server.stop()?;
//! server.dispose();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Errors
//!
//! Construction fails with [`BindError`] or [`ConfigError`]. Per-connection
//! faults never surface as errors; they are delivered to `data_dropped`
//! subscribers as a [`TransportFault`]. A fault in the accept loop itself is
//! fatal to the server and comes back from `stop()` as [`ServerError`].

mod error;

pub mod address;
pub mod ports;
pub mod tcp;

pub use error::{
    AcceptError, BindError, ConfigError, Result, ServerError, TransportFault, TransportFaultKind,
};

pub use address::ServerEndpoint;
pub use ports::{PORT_CATALOG, PortAllocator, PortRange};
pub use tcp::{
    DroppedConnection, ReceivedData, ServerLifecycleState, TcpClient, TcpClientConfig, TcpServer,
    TcpServerConfig,
};
