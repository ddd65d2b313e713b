//! Configuration types for the TCP server and client.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::address::ServerEndpoint;
use crate::error::{BindError, ConfigError};

/// Default read buffer size in bytes. Small on purpose: one buffer is
/// allocated per connection and connections are served one at a time.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 256;

/// Default wait after each stop request before escalating.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Default name of the accept loop thread.
pub const DEFAULT_THREAD_NAME: &str = "conduit-accept";

/// Socket-level options for TCP connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSocketConfig {
    /// Enable TCP_NODELAY (disable Nagle's algorithm).
    pub no_delay: bool,
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Read timeout. `None` means no timeout.
    pub read_timeout: Option<Duration>,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            no_delay: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_timeout: None,
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl TcpSocketConfig {
    /// Create a new socket configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Disable connection timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect_timeout = None;
        self
    }
}

/// Configuration for a TCP server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpServerConfig {
    /// The IPv4 address to bind to.
    pub bind_address: String,
    /// The port to listen on.
    pub port: u16,
    /// Socket-level options for accepted connections.
    pub socket: TcpSocketConfig,
    /// How long `stop()` waits after each request before escalating.
    pub join_timeout: Duration,
    /// Name of the accept loop thread.
    pub thread_name: String,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self::new(Ipv4Addr::LOCALHOST.to_string(), 0)
    }
}

impl TcpServerConfig {
    /// Create a new server configuration.
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            socket: TcpSocketConfig::default(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Create a configuration bound to 127.0.0.1.
    pub fn loopback(port: u16) -> Self {
        Self::new(Ipv4Addr::LOCALHOST.to_string(), port)
    }

    /// Set socket options for accepted connections.
    pub fn socket_config(mut self, config: TcpSocketConfig) -> Self {
        self.socket = config;
        self
    }

    /// Enable TCP_NODELAY for accepted connections.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.socket.no_delay = enabled;
        self
    }

    /// Set the per-read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.socket.read_buffer_size = size;
        self
    }

    /// Drop a connection that stays silent for longer than `timeout`.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.socket.read_timeout = Some(timeout);
        self
    }

    /// Set the stop escalation timeout.
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Set the accept loop thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Get the bind address string (address:port).
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Validate the address and port.
    pub fn endpoint(&self) -> Result<ServerEndpoint, BindError> {
        ServerEndpoint::parse(&self.bind_address, self.port)
    }

    /// Load a configuration from TOML text.
    ///
    /// Settings live under a `[server]` table; missing keys keep their
    /// defaults. Durations are given in milliseconds.
    ///
    /// ```
    /// use conduit_net::tcp::TcpServerConfig;
    ///
    /// let config = TcpServerConfig::from_toml_str(r#"
    /// [server]
    /// bind_address = "127.0.0.1"
    /// port = 46400
    /// read_timeout_ms = 2000
    /// "#).unwrap();
    ///
    /// assert_eq!(config.port, 46400);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.server.into())
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&text)
    }
}

/// On-disk layout of a configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSettings {
    bind_address: String,
    port: u16,
    no_delay: bool,
    read_buffer_size: usize,
    read_timeout_ms: Option<u64>,
    join_timeout_ms: u64,
    thread_name: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = TcpServerConfig::default();
        Self {
            bind_address: defaults.bind_address,
            port: defaults.port,
            no_delay: defaults.socket.no_delay,
            read_buffer_size: defaults.socket.read_buffer_size,
            read_timeout_ms: None,
            join_timeout_ms: defaults.join_timeout.as_millis() as u64,
            thread_name: defaults.thread_name,
        }
    }
}

impl From<ServerSettings> for TcpServerConfig {
    fn from(settings: ServerSettings) -> Self {
        Self {
            bind_address: settings.bind_address,
            port: settings.port,
            socket: TcpSocketConfig {
                no_delay: settings.no_delay,
                read_buffer_size: settings.read_buffer_size,
                read_timeout: settings.read_timeout_ms.map(Duration::from_millis),
                ..TcpSocketConfig::default()
            },
            join_timeout: Duration::from_millis(settings.join_timeout_ms),
            thread_name: settings.thread_name,
        }
    }
}

/// Configuration for a send-only TCP client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpClientConfig {
    /// The IPv4 host to connect to.
    pub host: String,
    /// The port to connect to.
    pub port: u16,
    /// Socket-level options.
    pub socket: TcpSocketConfig,
}

impl TcpClientConfig {
    /// Create a new client configuration.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket: TcpSocketConfig::default(),
        }
    }

    /// Set socket options.
    pub fn socket_config(mut self, config: TcpSocketConfig) -> Self {
        self.socket = config;
        self
    }

    /// Enable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.socket.no_delay = enabled;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.socket.connect_timeout = Some(timeout);
        self
    }

    /// Get the address string (host:port).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<ServerEndpoint> for TcpClientConfig {
    fn from(endpoint: ServerEndpoint) -> Self {
        Self::new(endpoint.address().to_string(), endpoint.port())
    }
}

impl From<SocketAddr> for TcpClientConfig {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TcpServerConfig::default();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.socket.read_buffer_size, 256);
        assert_eq!(config.join_timeout, Duration::from_millis(500));
        assert_eq!(config.thread_name, "conduit-accept");
        assert_eq!(config.socket.read_timeout, None);
    }

    #[test]
    fn test_empty_toml_keeps_defaults() {
        let config = TcpServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, TcpServerConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = TcpServerConfig::from_toml_str(
            r#"
            [server]
            bind_address = "0.0.0.0"
            port = 46500
            no_delay = true
            read_buffer_size = 1024
            read_timeout_ms = 250
            join_timeout_ms = 100
            thread_name = "ingest"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:46500");
        assert!(config.socket.no_delay);
        assert_eq!(config.socket.read_buffer_size, 1024);
        assert_eq!(config.socket.read_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.join_timeout, Duration::from_millis(100));
        assert_eq!(config.thread_name, "ingest");
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        for text in ["[server]\nbacklog = 5\n", "[server]\nconnect_timeout_ms = 500\n"] {
            let err = TcpServerConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)), "for {text:?}");
        }
    }

    #[test]
    fn test_endpoint_validation() {
        assert_eq!(
            TcpServerConfig::loopback(80).endpoint(),
            Err(BindError::PortReserved(80))
        );
        assert!(TcpServerConfig::loopback(46400).endpoint().is_ok());
    }
}
