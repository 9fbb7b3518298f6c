//! High-level client API.

use crate::connection::{CallHandle, Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::pending::ReplyFrame;
use bytes::Bytes;
use skiff_protocol::{ApplicationException, Decoder, MessageType, ThriftStruct};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// High-level client for skiff services.
///
/// Owns a [`Connection`] and the background task that reads its replies.
pub struct Client {
    conn: Arc<Connection>,
    reader: Option<JoinHandle<Result<(), ClientError>>>,
}

impl Client {
    /// Connects over TCP and starts the read loop.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let conn = Arc::new(Connection::new(config));
        conn.connect().await?;
        Ok(Self::start(conn))
    }

    /// Uses an established stream and starts the read loop.
    pub async fn from_stream<S>(stream: S, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Arc::new(Connection::new(config));
        conn.attach(stream).await;
        Self::start(conn)
    }

    fn start(conn: Arc<Connection>) -> Self {
        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_loop().await })
        };
        Self {
            conn,
            reader: Some(reader),
        }
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Calls `method` and decodes its result struct.
    ///
    /// An EXCEPTION reply becomes [`ClientError::Application`]. If no reply
    /// arrives within the request timeout the pending call is cancelled.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, ClientError>
    where
        A: ThriftStruct,
        R: ThriftStruct,
    {
        let handle = self.conn.send(method, args).await?;
        let reply = self.wait(handle).await?;
        self.decode_reply(method, reply)
    }

    /// Calls `method` with an args struct that is already encoded.
    ///
    /// Returns the encoded result struct of a REPLY.
    pub async fn call_raw(&self, method: &str, args: &[u8]) -> Result<Bytes, ClientError> {
        let handle = self.conn.send_raw(method, args).await?;
        let reply = self.wait(handle).await?;
        self.check_method(method, &reply)?;
        match reply.header.kind {
            MessageType::Reply => Ok(reply.body),
            MessageType::Exception => {
                let mut dec = Decoder::with_options(reply.body, self.conn.config().codec);
                Err(ClientError::Application(ApplicationException::read(&mut dec)?))
            }
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Sends a ONEWAY call.
    pub async fn call_oneway<A: ThriftStruct>(
        &self,
        method: &str,
        args: &A,
    ) -> Result<(), ClientError> {
        self.conn.send_oneway(method, args).await
    }

    async fn wait(&self, handle: CallHandle) -> Result<ReplyFrame, ClientError> {
        let seq_id = handle.seq_id();
        tokio::time::timeout(self.conn.config().request_timeout, handle)
            .await
            .map_err(|_| {
                tracing::debug!("Call seq={} timed out", seq_id);
                ClientError::Timeout
            })?
    }

    fn decode_reply<R: ThriftStruct>(
        &self,
        method: &str,
        reply: ReplyFrame,
    ) -> Result<R, ClientError> {
        self.check_method(method, &reply)?;

        let mut dec = Decoder::with_options(reply.body, self.conn.config().codec);
        match reply.header.kind {
            MessageType::Reply => Ok(R::read(&mut dec)?),
            MessageType::Exception => {
                let exc = ApplicationException::read(&mut dec)?;
                Err(ClientError::Application(exc))
            }
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    fn check_method(&self, method: &str, reply: &ReplyFrame) -> Result<(), ClientError> {
        if reply.header.name != method {
            return Err(ClientError::WrongMethodName {
                expected: method.to_string(),
                actual: reply.header.name.clone(),
            });
        }
        Ok(())
    }

    /// Closes the connection and waits for the read loop to stop.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.conn.close().await?;
        if let Some(reader) = self.reader.take() {
            match reader.await {
                Ok(Ok(())) | Ok(Err(ClientError::ConnectionClosed)) => {}
                Ok(Err(e)) => tracing::debug!("Read loop ended with error: {}", e),
                Err(e) => tracing::warn!("Read loop task failed: {}", e),
            }
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // The aborted read loop never gets to fail the waiters itself.
        let failed = self.conn.fail_pending();
        if failed > 0 {
            tracing::debug!("Client dropped with {} pending calls", failed);
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
