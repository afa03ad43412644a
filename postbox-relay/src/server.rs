//! Main relay server coordination.
//!
//! RelayServer owns the storage, the dispatcher and the set of live
//! connection handlers.

use crate::config::Config;
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::metrics::RelayMetrics;
use crate::storage::SqliteStorage;
use dashmap::DashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

/// Main relay server.
pub struct RelayServer {
    config: Config,
    storage: Arc<SqliteStorage>,
    dispatcher: Arc<Dispatcher>,
    /// Operational metrics (counters).
    metrics: Arc<RelayMetrics>,
    /// Live connection handlers by connection number.
    handlers: DashMap<u64, JoinHandle<()>>,
    next_connection_id: AtomicU64,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Create a new RelayServer with the given config and storage.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let storage = Arc::new(storage);
        let metrics = Arc::new(RelayMetrics::default());
        let dispatcher = Arc::new(Dispatcher::new(
            storage.clone(),
            storage.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            storage,
            dispatcher,
            metrics,
            handlers: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Number of connection handlers still running.
    pub fn active_connections(&self) -> usize {
        self.handlers
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Bind the relay listener with the configured backlog.
    pub fn bind(&self, addr: SocketAddr) -> Result<TcpListener, RelayError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(self.config.server.backlog)?)
    }

    /// Accept connections until `shutdown` completes, then drain handlers.
    ///
    /// Accept errors are logged and do not stop the loop. After shutdown
    /// the listener is closed and every handler is awaited for at most the
    /// configured shutdown timeout; handlers still running after that are
    /// aborted.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_handler(stream, peer),
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                }
            }
        }

        drop(listener);
        self.drain_handlers(self.config.server.shutdown_timeout())
            .await;
        Ok(())
    }

    fn spawn_handler(&self, stream: TcpStream, peer: SocketAddr) {
        self.handlers.retain(|_, handle| !handle.is_finished());

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        RelayMetrics::incr(&self.metrics.connections_total);
        tracing::info!("Connection {} accepted from {}", id, peer);

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let connection = Connection::new(
            stream,
            peer.to_string(),
            self.dispatcher.clone(),
            self.config.server.verify_checksums,
        );
        let handle = tokio::spawn(async move {
            match connection.run().await {
                Ok(()) => tracing::info!("Connection {} from {} closed", id, peer),
                Err(e) => tracing::info!("Connection {} from {} dropped: {}", id, peer, e),
            }
        });
        self.handlers.insert(id, handle);
    }

    async fn drain_handlers(&self, timeout: Duration) {
        let ids: Vec<u64> = self.handlers.iter().map(|entry| *entry.key()).collect();
        let handles: Vec<(u64, JoinHandle<()>)> = ids
            .into_iter()
            .filter_map(|id| self.handlers.remove(&id))
            .collect();

        if handles.is_empty() {
            return;
        }
        tracing::info!("Waiting for {} connection handlers", handles.len());

        futures_util::future::join_all(handles.into_iter().map(|(id, mut handle)| async move {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Connection {} task failed: {}", id, e),
                Err(_) => {
                    tracing::warn!("Connection {} still open after {:?}, aborting", id, timeout);
                    handle.abort();
                }
            }
        }))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postbox_types::payloads::{RegisterRequest, RegistrationResponse};
    use postbox_types::{decode_header, encode_frame, RequestCode, ResponseCode, HEADER_SIZE};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.bind_host = "127.0.0.1".into();
        config.server.shutdown_timeout_secs = 1;
        config
    }

    async fn start() -> (
        Arc<RelayServer>,
        SocketAddr,
        oneshot::Sender<()>,
        JoinHandle<Result<(), RelayError>>,
    ) {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let server = Arc::new(RelayServer::new(test_config(), storage));
        let addr = server.config().server.listen_addr(0).unwrap();
        let listener = server.bind(addr).unwrap();
        let local = listener.local_addr().unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let task = {
            let server = server.clone();
            tokio::spawn(async move {
                server
                    .serve(listener, async {
                        let _ = rx.await;
                    })
                    .await
            })
        };
        (server, local, tx, task)
    }

    async fn register(stream: &mut TcpStream, name: &str) -> RegistrationResponse {
        let payload = RegisterRequest {
            name: name.into(),
            public_key: format!("{name}-key"),
        }
        .encode()
        .unwrap();
        let frame = encode_frame(RequestCode::Register.as_u16(), &payload).unwrap();
        stream.write_all(&frame).await.unwrap();

        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).await.unwrap();
        let header = decode_header(&header).unwrap();
        assert_eq!(header.code, ResponseCode::RegistrationSuccess.as_u16());
        let mut payload = vec![0u8; header.payload_size as usize];
        stream.read_exact(&mut payload).await.unwrap();
        RegistrationResponse::decode(&payload).unwrap()
    }

    #[tokio::test]
    async fn serves_concurrent_connections() {
        let (server, addr, shutdown, task) = start().await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        let ra = register(&mut a, "alice").await;
        let rb = register(&mut b, "bob").await;
        assert_ne!(ra.client_id, rb.client_id);

        assert_eq!(server.active_connections(), 2);
        assert_eq!(
            RelayMetrics::get(&server.metrics().connections_total),
            2
        );

        drop(a);
        drop(b);
        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let (_server, addr, shutdown, task) = start().await;

        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_bounds_wait_for_idle_connections() {
        let (server, addr, shutdown, task) = start().await;

        // Connected but silent: the handler sits in a read.
        let mut idle = TcpStream::connect(addr).await.unwrap();
        register(&mut idle, "idle").await;

        let started = std::time::Instant::now();
        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn one_connection_failing_does_not_affect_others() {
        let (_server, addr, shutdown, task) = start().await;

        let mut good = TcpStream::connect(addr).await.unwrap();
        {
            let mut bad = TcpStream::connect(addr).await.unwrap();
            bad.write_all(&[1, 2, 3]).await.unwrap();
        }

        register(&mut good, "alice").await;
        register(&mut good, "bob").await;

        drop(good);
        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
