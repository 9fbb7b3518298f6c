//! Connection management.

use crate::error::ClientError;
use crate::pending::{PendingCalls, ReplyFrame};
use skiff_protocol::{
    encode_frame, read_envelope, write_message_begin, CodecError, CodecOptions, Decoder,
    Encoder, FrameDecoder, MessageHeader, MessageType, ProtocolError, ThriftStruct,
    DEFAULT_MAX_FRAME_SIZE,
};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Maximum frame payload size in either direction.
    pub max_frame_size: usize,
    /// Codec options for requests and replies.
    pub codec: CodecOptions,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            codec: CodecOptions::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_codec_options(mut self, options: CodecOptions) -> Self {
        self.codec = options;
        self
    }
}

/// Future resolving to the reply for one call.
///
/// Dropping the handle before it resolves removes the pending entry; a reply
/// that arrives afterwards is discarded.
#[derive(Debug)]
pub struct CallHandle {
    seq_id: i32,
    rx: oneshot::Receiver<ReplyFrame>,
    pending: Arc<PendingCalls>,
    done: bool,
}

impl CallHandle {
    pub fn seq_id(&self) -> i32 {
        self.seq_id
    }

    /// Abandons the call. Nothing is sent to the server.
    pub fn cancel(self) {}
}

impl Future for CallHandle {
    type Output = Result<ReplyFrame, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };
        self.done = true;
        Poll::Ready(result.map_err(|_| ClientError::ConnectionClosed))
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        if !self.done && self.pending.cancel(self.seq_id) {
            tracing::debug!("Call seq={} cancelled", self.seq_id);
        }
    }
}

/// A multiplexed connection to a skiff server.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the stream. Each frame is written under one lock.
    writer: Mutex<Option<BoxWriter>>,
    /// Read half of the stream, owned by the read loop while it runs.
    reader: Mutex<Option<BoxReader>>,
    pending: Arc<PendingCalls>,
    connected: AtomicBool,
    closing: watch::Sender<bool>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            pending: Arc::new(PendingCalls::new()),
            connected: AtomicBool::new(false),
            closing,
        }
    }

    /// Connects to the server over TCP.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let tcp_stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        tcp_stream.set_nodelay(true).ok();
        self.attach(tcp_stream).await;
        Ok(())
    }

    /// Uses an already established stream as the transport.
    pub async fn attach<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(Box::new(write_half));
        *self.reader.lock().await = Some(Box::new(read_half));
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Sends a CALL and returns a handle for its reply.
    pub async fn send<A: ThriftStruct>(
        &self,
        method: &str,
        args: &A,
    ) -> Result<CallHandle, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let seq_id = self.pending.next_seq_id();
        let handle = CallHandle {
            seq_id,
            rx: self.pending.register(seq_id),
            pending: self.pending.clone(),
            done: false,
        };

        let header = MessageHeader::new(method, MessageType::Call, seq_id);
        self.write_message(&header, |enc| args.write(enc)).await?;
        tracing::debug!("Call '{}' seq={} sent", method, seq_id);
        Ok(handle)
    }

    /// Sends a CALL whose args struct is already encoded.
    pub async fn send_raw(&self, method: &str, args: &[u8]) -> Result<CallHandle, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let seq_id = self.pending.next_seq_id();
        let handle = CallHandle {
            seq_id,
            rx: self.pending.register(seq_id),
            pending: self.pending.clone(),
            done: false,
        };

        let header = MessageHeader::new(method, MessageType::Call, seq_id);
        self.write_message(&header, |enc| {
            enc.write_raw(args);
            Ok(())
        })
        .await?;
        tracing::debug!("Raw call '{}' seq={} sent", method, seq_id);
        Ok(handle)
    }

    /// Sends a ONEWAY message. No reply is expected.
    pub async fn send_oneway<A: ThriftStruct>(
        &self,
        method: &str,
        args: &A,
    ) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let seq_id = self.pending.next_seq_id();
        let header = MessageHeader::new(method, MessageType::Oneway, seq_id);
        self.write_message(&header, |enc| args.write(enc)).await?;
        tracing::debug!("Oneway '{}' seq={} sent", method, seq_id);
        Ok(())
    }

    /// Sends a ONEWAY message whose args struct is already encoded.
    pub async fn send_oneway_raw(&self, method: &str, args: &[u8]) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let seq_id = self.pending.next_seq_id();
        let header = MessageHeader::new(method, MessageType::Oneway, seq_id);
        self.write_message(&header, |enc| {
            enc.write_raw(args);
            Ok(())
        })
        .await
    }

    async fn write_message(
        &self,
        header: &MessageHeader,
        write_body: impl FnOnce(&mut Encoder) -> Result<(), CodecError>,
    ) -> Result<(), ClientError> {
        let mut enc = Encoder::with_options(self.config.codec);
        write_message_begin(&mut enc, header)?;
        write_body(&mut enc)?;
        let frame = encode_frame(enc.as_slice(), self.config.max_frame_size)?;

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!("Write failed: {}", e);
            self.connected.store(false, Ordering::SeqCst);
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    /// Reads replies and routes them to pending calls (run in a background task).
    ///
    /// On exit the connection is marked closed and every pending call fails.
    pub async fn read_loop(&self) -> Result<(), ClientError> {
        tracing::debug!("read_loop started");
        let result = self.read_replies().await;

        self.connected.store(false, Ordering::SeqCst);
        let failed = self.pending.fail_all();
        if failed > 0 {
            tracing::debug!("read_loop: failed {} pending calls", failed);
        }
        match &result {
            Ok(()) => tracing::debug!("read_loop: stopped"),
            Err(e) => tracing::debug!("read_loop: ended with {}", e),
        }
        result
    }

    async fn read_replies(&self) -> Result<(), ClientError> {
        let mut reader_guard = self.reader.lock().await;
        let reader = reader_guard.as_mut().ok_or(ClientError::NotConnected)?;
        let mut closing = self.closing.subscribe();
        let mut decoder = FrameDecoder::with_max_frame_size(self.config.max_frame_size);
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            if *closing.borrow() {
                return Ok(());
            }

            let n = tokio::select! {
                result = reader.read(&mut buf) => result?,
                _ = closing.changed() => return Ok(()),
            };

            if n == 0 {
                tracing::debug!("read_loop: connection closed");
                return Err(ClientError::ConnectionClosed);
            }
            tracing::debug!("read_loop: received {} bytes", n);
            decoder.extend(&buf[..n]);

            while let Some(payload) = decoder.decode_frame()? {
                let mut dec = Decoder::with_options(payload, self.config.codec);
                let header = read_envelope(&mut dec)?;

                match header.kind {
                    MessageType::Reply | MessageType::Exception => {
                        let seq_id = header.seq_id;
                        let reply = ReplyFrame {
                            header,
                            body: dec.into_remaining(),
                        };
                        if !self.pending.complete(seq_id, reply) {
                            tracing::debug!("read_loop: no pending call for seq={}", seq_id);
                        }
                    }
                    MessageType::Call | MessageType::Oneway => {
                        return Err(ProtocolError::UnexpectedMessageType {
                            name: header.name,
                            kind: header.kind.as_u8(),
                        }
                        .into());
                    }
                }
            }
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection and fails every pending call.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");

        self.connected.store(false, Ordering::SeqCst);
        self.closing.send_replace(true);

        if let Some(mut writer) = self.writer.lock().await.take() {
            tracing::debug!("Shutting down writer");
            let _ = writer.shutdown().await;
        }

        let failed = self.pending.fail_all();
        tracing::debug!("Connection closed ({} pending calls failed)", failed);
        Ok(())
    }

    /// Marks the connection closed and fails every pending call.
    ///
    /// Unlike [`close`](Self::close) this does not flush the writer, so it
    /// can run from a synchronous context such as `Drop`.
    pub fn fail_pending(&self) -> usize {
        self.connected.store(false, Ordering::SeqCst);
        self.closing.send_replace(true);
        self.pending.fail_all()
    }

    /// Returns the number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
