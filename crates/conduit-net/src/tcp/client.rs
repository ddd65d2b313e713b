//! Send-only TCP client.

use std::net::{SocketAddr, SocketAddrV4};

use conduit_core::Signal;
use conduit_core::logging::targets;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::config::TcpClientConfig;
use crate::address::parse_ipv4;
use crate::error::{ConfigError, TransportFault, TransportFaultKind};

/// A TCP client that delivers one buffer per connection.
///
/// Every [`send`](Self::send) opens a fresh connection, writes the whole
/// buffer, and closes the connection. Failures are not returned; they are
/// reported through [`connection_lost`](Self::connection_lost).
///
/// # Signals
///
/// - [`connection_lost`](Self::connection_lost): a send could not connect or write
/// - [`bytes_written`](Self::bytes_written): a send delivered this many bytes
///
/// # Example
///
/// ```no_run
/// use conduit_net::tcp::{TcpClient, TcpClientConfig};
///
/// # async fn demo() -> Result<(), conduit_net::ConfigError> {
/// let client = TcpClient::new(TcpClientConfig::new("127.0.0.1", 46400))?;
/// client.connection_lost.connect(|fault| eprintln!("send failed: {fault}"));
/// client.send(b"abc").await;
/// # Ok(())
/// # }
/// ```
pub struct TcpClient {
    config: TcpClientConfig,
    target: SocketAddr,

    /// Signal emitted when a send could not connect or write.
    pub connection_lost: Signal<TransportFault>,
    /// Signal emitted after a buffer has been fully written.
    pub bytes_written: Signal<usize>,
}

impl TcpClient {
    /// Create a client, validating the host as IPv4 and the port as non-zero.
    pub fn new(config: TcpClientConfig) -> Result<Self, ConfigError> {
        let host = parse_ipv4(&config.host)?;
        if config.port == 0 {
            return Err(ConfigError::InvalidPort(config.port));
        }

        Ok(Self {
            target: SocketAddr::V4(SocketAddrV4::new(host, config.port)),
            config,
            connection_lost: Signal::new(),
            bytes_written: Signal::new(),
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &TcpClientConfig {
        &self.config
    }

    /// The address every send connects to.
    pub fn address(&self) -> SocketAddr {
        self.target
    }

    /// Open a connection, write all of `data`, and close the connection.
    ///
    /// Emits `bytes_written` on success and `connection_lost` on failure.
    /// Calls are independent of each other and may run concurrently.
    pub async fn send(&self, data: &[u8]) {
        let mut stream = match self.connect().await {
            Ok(stream) => stream,
            Err(fault) => return self.lose(fault),
        };

        if self.config.socket.no_delay
            && let Err(err) = stream.set_nodelay(true)
        {
            tracing::debug!(target: targets::CLIENT, error = %err, "failed to set TCP_NODELAY");
        }

        let written = async {
            stream.write_all(data).await?;
            stream.shutdown().await
        }
        .await;

        match written {
            Ok(()) => {
                tracing::trace!(
                    target: targets::CLIENT,
                    addr = %self.target,
                    len = data.len(),
                    "sent"
                );
                self.bytes_written.emit(data.len());
            }
            Err(err) => self.lose(TransportFault::new(
                TransportFaultKind::TransportError,
                format!("write to {} failed: {err}", self.target),
            )),
        }
    }

    async fn connect(&self) -> Result<TcpStream, TransportFault> {
        let lost = |reason: String| {
            TransportFault::new(
                TransportFaultKind::ConnectionLost,
                format!("cannot connect to {}: {reason}", self.target),
            )
        };

        match self.config.socket.connect_timeout {
            Some(limit) => match timeout(limit, TcpStream::connect(self.target)).await {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(err)) => Err(lost(err.to_string())),
                Err(_) => Err(lost(format!("timed out after {}ms", limit.as_millis()))),
            },
            None => TcpStream::connect(self.target)
                .await
                .map_err(|err| lost(err.to_string())),
        }
    }

    fn lose(&self, fault: TransportFault) {
        tracing::warn!(target: targets::CLIENT, addr = %self.target, error = %fault, "send failed");
        self.connection_lost.emit(fault);
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_host() {
        let err = TcpClient::new(TcpClientConfig::new("example.com", 46400)).unwrap_err();
        assert_eq!(err, ConfigError::InvalidAddress("example.com".into()));

        let err = TcpClient::new(TcpClientConfig::new("::1", 46400)).unwrap_err();
        assert!(matches!(err, ConfigError::NotIpv4(_)));
    }

    #[test]
    fn test_rejects_port_zero() {
        let err = TcpClient::new(TcpClientConfig::new("127.0.0.1", 0)).unwrap_err();
        assert_eq!(err, ConfigError::InvalidPort(0));
    }

    #[test]
    fn test_address() {
        let client = TcpClient::new(TcpClientConfig::new(" 127.0.0.1 ", 46400)).unwrap();
        assert_eq!(client.address().to_string(), "127.0.0.1:46400");
    }
}
