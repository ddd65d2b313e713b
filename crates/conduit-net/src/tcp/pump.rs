//! The per-connection read loop.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use conduit_core::logging::{span_names, targets};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::Instrument;

use super::config::TcpSocketConfig;
use super::connection::{
    ConnectionContext, ConnectionInfo, DroppedConnection, ListenerId, ReceivedData,
};
use super::events::ServerEvents;
use crate::error::{TransportFault, TransportFaultKind};

/// How a drained connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PumpOutcome {
    /// The peer closed the stream after sending `bytes` bytes.
    Closed {
        /// Total bytes read from the connection.
        bytes: u64,
    },
    /// The connection was dropped; a `data_dropped` notification was emitted.
    Dropped(TransportFault),
}

/// Drains accepted connections into `data_received` notifications.
///
/// A pump belongs to one listener and only reads connections armed by it.
pub(crate) struct DataPump {
    listener: ListenerId,
    socket: TcpSocketConfig,
    events: Arc<ServerEvents>,
}

impl DataPump {
    pub(crate) fn new(
        listener: ListenerId,
        socket: TcpSocketConfig,
        events: Arc<ServerEvents>,
    ) -> Self {
        Self {
            listener,
            socket,
            events,
        }
    }

    /// Read `ctx`'s connection until the peer closes it or a read fails.
    ///
    /// Emits one `data_received` per non-empty read, in order, and at most
    /// one `data_dropped`. The stream is closed when this returns.
    pub(crate) async fn drain(&self, ctx: ConnectionContext) -> PumpOutcome {
        let span = tracing::debug_span!(
            target: targets::PUMP,
            span_names::CONNECTION,
            id = %ctx.id(),
        );
        self.drain_inner(ctx).instrument(span).await
    }

    async fn drain_inner(&self, mut ctx: ConnectionContext) -> PumpOutcome {
        let listener = match ctx.owner() {
            Some(owner) if owner == self.listener => owner,
            Some(owner) => {
                return self.drop_connection(
                    None,
                    TransportFault::new(
                        TransportFaultKind::ProtocolStateError,
                        format!("connection was armed by {owner}, not {}", self.listener),
                    ),
                );
            }
            None => {
                return self.drop_connection(
                    None,
                    TransportFault::new(
                        TransportFaultKind::ProtocolStateError,
                        "accept completed without callback state",
                    ),
                );
            }
        };

        let Some(stream) = ctx.take_connection() else {
            return self.drop_connection(
                Some(ctx.info(listener, None)),
                TransportFault::new(
                    TransportFaultKind::ConnectionLost,
                    "no connection was accepted",
                ),
            );
        };

        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(err) => {
                return self.drop_connection(
                    Some(ctx.info(listener, None)),
                    TransportFault::new(
                        TransportFaultKind::ConnectionLost,
                        format!("stream cannot be obtained: {err}"),
                    ),
                );
            }
        };

        let info = ctx.info(listener, Some(peer_addr));

        if self.socket.no_delay
            && let Err(err) = stream.set_nodelay(true)
        {
            tracing::debug!(target: targets::PUMP, error = %err, "failed to set TCP_NODELAY");
        }

        tracing::debug!(target: targets::PUMP, peer = %peer_addr, "draining connection");
        self.events.connection_accepted.emit(info);

        if self.socket.read_buffer_size == 0 {
            return self.drop_connection(
                Some(info),
                TransportFault::new(
                    TransportFaultKind::BufferError,
                    "read buffer has zero capacity",
                ),
            );
        }

        self.read_loop(stream, info).await
    }

    async fn read_loop(&self, mut stream: TcpStream, info: ConnectionInfo) -> PumpOutcome {
        let mut buffer = vec![0u8; self.socket.read_buffer_size];
        let mut total: u64 = 0;

        loop {
            match self.read_chunk(&mut stream, &mut buffer).await {
                Ok(0) => {
                    tracing::debug!(
                        target: targets::PUMP,
                        bytes = total,
                        "connection closed by peer"
                    );
                    return PumpOutcome::Closed { bytes: total };
                }
                Ok(n) => {
                    total += n as u64;
                    tracing::trace!(target: targets::PUMP, len = n, "read chunk");
                    self.events.data_received.emit(ReceivedData {
                        connection: info,
                        bytes: Bytes::copy_from_slice(&buffer[..n]),
                    });
                }
                Err(err) => {
                    return self.drop_connection(Some(info), TransportFault::from_read_error(&err));
                }
            }
        }
    }

    async fn read_chunk(&self, stream: &mut TcpStream, buffer: &mut [u8]) -> io::Result<usize> {
        match self.socket.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, stream.read(buffer)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data within {}ms", timeout.as_millis()),
                )),
            },
            None => stream.read(buffer).await,
        }
    }

    fn drop_connection(
        &self,
        connection: Option<ConnectionInfo>,
        fault: TransportFault,
    ) -> PumpOutcome {
        tracing::warn!(
            target: targets::PUMP,
            kind = %fault.kind(),
            reason = fault.message(),
            "dropping connection"
        );
        self.events.data_dropped.emit(DroppedConnection {
            connection,
            fault: fault.clone(),
        });
        PumpOutcome::Dropped(fault)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    struct Recorder {
        received: Arc<Mutex<Vec<u8>>>,
        dropped: Arc<Mutex<Vec<DroppedConnection>>>,
    }

    fn record(events: &ServerEvents) -> Recorder {
        let received = Arc::new(Mutex::new(Vec::new()));
        let dropped = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        events
            .data_received
            .connect(move |data| sink.lock().extend_from_slice(data.as_slice()));
        let sink = dropped.clone();
        events
            .data_dropped
            .connect(move |dropped| sink.lock().push(dropped.clone()));

        Recorder { received, dropped }
    }

    async fn accepted_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let client = TcpStream::connect(local).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client, local)
    }

    #[tokio::test]
    async fn test_drains_until_peer_closes() {
        let events = Arc::new(ServerEvents::new());
        let recorder = record(&events);
        let listener = ListenerId::new();
        let pump = DataPump::new(listener, TcpSocketConfig::default(), events.clone());

        let (server, mut client, local) = accepted_pair().await;
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        client.write_all(&payload).await.unwrap();
        drop(client);

        let ctx = ConnectionContext::armed(listener, local).attach(server);
        let outcome = pump.drain(ctx).await;

        assert_eq!(outcome, PumpOutcome::Closed { bytes: 1000 });
        assert_eq!(*recorder.received.lock(), payload);
        assert!(recorder.dropped.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_owner_is_protocol_state_error() {
        let events = Arc::new(ServerEvents::new());
        let recorder = record(&events);
        let pump = DataPump::new(ListenerId::new(), TcpSocketConfig::default(), events.clone());

        let (server, _client, local) = accepted_pair().await;
        let outcome = pump.drain(ConnectionContext::new(None, local, Some(server))).await;

        assert!(matches!(
            outcome,
            PumpOutcome::Dropped(ref fault)
                if fault.kind() == TransportFaultKind::ProtocolStateError
        ));
        let dropped = recorder.dropped.lock();
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].connection.is_none());
    }

    #[tokio::test]
    async fn test_foreign_owner_is_protocol_state_error() {
        let events = Arc::new(ServerEvents::new());
        let recorder = record(&events);
        let pump = DataPump::new(ListenerId::new(), TcpSocketConfig::default(), events.clone());

        let (server, _client, local) = accepted_pair().await;
        let ctx = ConnectionContext::armed(ListenerId::new(), local).attach(server);
        pump.drain(ctx).await;

        let dropped = recorder.dropped.lock();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].fault.kind(), TransportFaultKind::ProtocolStateError);
    }

    #[tokio::test]
    async fn test_missing_connection_is_connection_lost() {
        let events = Arc::new(ServerEvents::new());
        let recorder = record(&events);
        let listener = ListenerId::new();
        let pump = DataPump::new(listener, TcpSocketConfig::default(), events.clone());

        let local: SocketAddr = "127.0.0.1:46400".parse().unwrap();
        pump.drain(ConnectionContext::armed(listener, local)).await;

        let dropped = recorder.dropped.lock();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].fault.kind(), TransportFaultKind::ConnectionLost);
        assert_eq!(dropped[0].connection.map(|info| info.listener), Some(listener));
    }

    #[tokio::test]
    async fn test_zero_buffer_is_buffer_error() {
        let events = Arc::new(ServerEvents::new());
        let recorder = record(&events);
        let listener = ListenerId::new();
        let socket = TcpSocketConfig::default().read_buffer_size(0);
        let pump = DataPump::new(listener, socket, events.clone());

        let (server, _client, local) = accepted_pair().await;
        pump.drain(ConnectionContext::armed(listener, local).attach(server)).await;

        let dropped = recorder.dropped.lock();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].fault.kind(), TransportFaultKind::BufferError);
        assert!(dropped[0].connection.and_then(|info| info.peer_addr).is_some());
    }

    #[tokio::test]
    async fn test_read_timeout_drops_connection() {
        let events = Arc::new(ServerEvents::new());
        let recorder = record(&events);
        let listener = ListenerId::new();
        let socket = TcpSocketConfig::default().read_timeout(Duration::from_millis(50));
        let pump = DataPump::new(listener, socket, events.clone());

        let (server, mut client, local) = accepted_pair().await;
        client.write_all(b"hi").await.unwrap();

        let outcome = pump.drain(ConnectionContext::armed(listener, local).attach(server)).await;

        assert!(matches!(
            outcome,
            PumpOutcome::Dropped(ref fault) if fault.kind() == TransportFaultKind::TransportError
        ));
        assert_eq!(*recorder.received.lock(), b"hi");
        assert_eq!(recorder.dropped.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_chunks_never_exceed_buffer() {
        let events = Arc::new(ServerEvents::new());
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = sizes.clone();
        events.data_received.connect(move |data| sink.lock().push(data.len()));

        let listener = ListenerId::new();
        let pump = DataPump::new(listener, TcpSocketConfig::default(), events.clone());

        let (server, mut client, local) = accepted_pair().await;
        client.write_all(&[7u8; 4096]).await.unwrap();
        drop(client);

        pump.drain(ConnectionContext::armed(listener, local).attach(server)).await;

        let sizes = sizes.lock();
        assert_eq!(sizes.iter().sum::<usize>(), 4096);
        assert!(sizes.iter().all(|&n| n > 0 && n <= 256));
    }
}
