//! Logging facilities for conduit.
//!
//! conduit uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("conduit_net=debug")
//!         .init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! Every event is emitted with one of the [`targets`] below, so subsystems
//! can be filtered independently.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "conduit_core";
    /// Signal emission target.
    pub const SIGNAL: &str = "conduit_core::signal";
    /// Loop thread lifecycle target.
    pub const LOOP_THREAD: &str = "conduit_core::loop_thread";
    /// Networking crate target.
    pub const NET: &str = "conduit_net";
    /// Listening socket and accept loop target.
    pub const ACCEPTOR: &str = "conduit_net::acceptor";
    /// Per-connection read loop target.
    pub const PUMP: &str = "conduit_net::pump";
    /// Server lifecycle target.
    pub const SERVER: &str = "conduit_net::server";
    /// Send-only client target.
    pub const CLIENT: &str = "conduit_net::client";
    /// Port catalog and availability probing target.
    pub const PORTS: &str = "conduit_net::ports";
}

/// Span names used for long-lived operations.
pub mod span_names {
    /// The accept loop, entered once per loop thread.
    pub const ACCEPT_LOOP: &str = "accept_loop";
    /// A single drained connection.
    pub const CONNECTION: &str = "connection";
}
