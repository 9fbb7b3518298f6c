//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::processor::{Dispatched, Processor};
use bytes::Bytes;
use skiff_protocol::{encode_frame, FrameDecoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum frame payload size in either direction.
    pub max_frame_size: usize,
    /// Maximum handlers running at once per connection.
    pub max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            max_frame_size: config.protocol.max_frame_size,
            max_in_flight: config.dispatch.max_in_flight,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for skiff services.
pub struct Server {
    config: ServerConfig,
    processor: Arc<Processor>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

/// Reply frames queued per connection before the reader waits on the writer.
const WRITE_QUEUE_CAPACITY: usize = 256;

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, processor: Processor) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            processor: Arc::new(processor),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections accepted from `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            "Server listening on {} ({} methods)",
            listener.local_addr()?,
            self.processor.method_names().len()
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            if let Err(e) = tcp_stream.set_nodelay(true) {
                                tracing::debug!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let processor = self.processor.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::info!("Client connected: {}", addr);

                                let result = handle_connection(
                                    tcp_stream,
                                    addr,
                                    processor,
                                    stats.clone(),
                                    &config,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }
}

/// Runs one connection: reads frames, dispatches them and writes replies.
///
/// Replies for in-flight handlers are flushed before this returns.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    processor: Arc<Processor>,
    stats: Arc<ServerStats>,
    config: &ServerConfig,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (reply_tx, reply_rx) = mpsc::channel::<Bytes>(WRITE_QUEUE_CAPACITY);
    let writer_task = tokio::spawn(write_loop(
        writer,
        reply_rx,
        addr,
        config.max_frame_size,
        stats.clone(),
    ));

    let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut decoder = FrameDecoder::with_max_frame_size(config.max_frame_size);
    let mut buf = [0u8; 8192];

    let result: Result<(), ServerError> = 'conn: loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        tracing::debug!("[{}] Connection closed by client", addr);
                        break 'conn Ok(());
                    }
                    Ok(n) => {
                        tracing::debug!("[{}] Received {} bytes", addr, n);
                        decoder.extend(&buf[..n]);
                    }
                    Err(e) => {
                        tracing::debug!("[{}] Read error: {}", addr, e);
                        break 'conn Err(ServerError::Io(e));
                    }
                }
            }

            _ = tokio::time::sleep(config.idle_timeout) => {
                tracing::debug!("[{}] Idle timeout", addr);
                break 'conn Ok(());
            }

            _ = shutdown.recv() => {
                tracing::debug!("[{}] Shutdown signal received", addr);
                break 'conn Err(ServerError::ShuttingDown);
            }
        }

        loop {
            let payload = match decoder.decode_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => break 'conn Err(e.into()),
            };
            stats.frames_in.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("[{}] Frame: {} bytes", addr, payload.len());

            match processor.dispatch(payload) {
                Ok(Dispatched::Reply(reply)) => {
                    if reply_tx.send(reply).await.is_err() {
                        break 'conn Ok(());
                    }
                }
                Ok(Dispatched::Deferred(handler)) => {
                    let Ok(permit) = in_flight.clone().acquire_owned().await else {
                        break 'conn Err(ServerError::ShuttingDown);
                    };
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = handler.await {
                            if reply_tx.send(reply).await.is_err() {
                                tracing::debug!("[{}] Reply dropped, writer closed", addr);
                            }
                        }
                        drop(permit);
                    });
                }
                Ok(Dispatched::Oneway(handler)) => {
                    let Ok(permit) = in_flight.clone().acquire_owned().await else {
                        break 'conn Err(ServerError::ShuttingDown);
                    };
                    tokio::spawn(async move {
                        handler.await;
                        drop(permit);
                    });
                }
                Ok(Dispatched::Ignored) => {}
                Err(e) => {
                    tracing::warn!("[{}] Closing connection: {}", addr, e);
                    if let Some(reply) = e.reply {
                        if reply_tx.send(reply).await.is_err() {
                            tracing::debug!("[{}] Error reply dropped, writer closed", addr);
                        }
                    }
                    break 'conn Err(e.source.into());
                }
            }
        }
    };

    // The writer exits once every in-flight handler has released its sender.
    drop(reply_tx);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("[{}] Write error: {}", addr, e),
        Err(e) => tracing::error!("[{}] Writer task failed: {}", addr, e),
    }

    result
}

/// Writes queued reply payloads, one whole frame at a time.
async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut replies: mpsc::Receiver<Bytes>,
    addr: SocketAddr,
    max_frame_size: usize,
    stats: Arc<ServerStats>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite,
{
    while let Some(payload) = replies.recv().await {
        let frame = match encode_frame(&payload, max_frame_size) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("[{}] Dropping reply: {}", addr, e);
                stats.errors_total.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        tracing::debug!("[{}] Writing {} bytes", addr, frame.len());
        writer.write_all(&frame).await?;
        stats.frames_out.fetch_add(1, Ordering::Relaxed);
    }
    writer.shutdown().await?;
    Ok(())
}
