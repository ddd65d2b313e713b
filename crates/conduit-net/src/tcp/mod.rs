//! TCP server and client with signal-based event delivery.
//!
//! This module provides:
//! - **TcpServer**: binds a port and drains accepted connections one at a
//!   time, reporting each chunk read through signals
//! - **TcpClient**: opens a connection per send and writes one buffer
//!
//! # Server Example
//!
//! ```no_run
//! use conduit_net::tcp::{TcpServer, TcpServerConfig};
//!
//! let server = TcpServer::bind(TcpServerConfig::loopback(46400))?;
//!
//! server.data_received().connect(|data| {
//!     println!("Received: {:?}", data.as_slice());
//! });
//! server.data_dropped().connect(|dropped| {
//!     eprintln!("Dropped: {}", dropped.fault);
//! });
//!
//! server.start()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Client Example
//!
//! ```no_run
//! use conduit_net::tcp::{TcpClient, TcpClientConfig};
//!
//! # async fn demo() -> Result<(), conduit_net::ConfigError> {
//! let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", 46400).no_delay(true))?;
//! client.send(b"Hello, Server!").await;
//! # Ok(())
//! # }
//! ```

mod acceptor;
mod client;
mod config;
mod connection;
mod events;
mod pump;
mod server;
mod state;

pub use client::TcpClient;
pub use config::{
    DEFAULT_JOIN_TIMEOUT, DEFAULT_READ_BUFFER_SIZE, DEFAULT_THREAD_NAME, TcpClientConfig,
    TcpServerConfig, TcpSocketConfig,
};
pub use connection::{ConnectionId, ConnectionInfo, DroppedConnection, ListenerId, ReceivedData};
pub use events::ServerEvents;
pub use server::TcpServer;
pub use state::ServerLifecycleState;
