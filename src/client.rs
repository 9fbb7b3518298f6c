//! Client side of the Endpoint registry.

use crate::types::{
    Endpoint, HeartbeatArgs, ListArgs, ListResult, LookupArgs, LookupResult, NotFound,
    RegisterArgs, RegisterResult,
};
use skiff_client::{Client, ClientError, ConnectionConfig};
use skiff_protocol::ApplicationException;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Failure of a `lookup` call.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Typed client for the Endpoint registry.
pub struct EndpointClient {
    client: Client,
}

impl EndpointClient {
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: Client::connect(config).await?,
        })
    }

    pub async fn from_stream<S>(stream: S, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            client: Client::from_stream(stream, config).await,
        }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Registers `endpoint`, returning whether an earlier entry was replaced.
    pub async fn register(&self, endpoint: Endpoint) -> Result<bool, ClientError> {
        let result: RegisterResult = self
            .client
            .call("register", &RegisterArgs { endpoint })
            .await?;
        result
            .success
            .ok_or_else(|| missing_result("register"))
    }

    pub async fn lookup(&self, service_name: &str) -> Result<Endpoint, LookupError> {
        let args = LookupArgs {
            service_name: service_name.to_string(),
        };
        let result: LookupResult = self.client.call("lookup", &args).await?;
        if let Some(endpoint) = result.success {
            return Ok(endpoint);
        }
        if let Some(not_found) = result.not_found {
            return Err(LookupError::NotFound(not_found));
        }
        Err(missing_result("lookup").into())
    }

    pub async fn list(&self) -> Result<Vec<Endpoint>, ClientError> {
        let result: ListResult = self.client.call("list", &ListArgs).await?;
        result.success.ok_or_else(|| missing_result("list"))
    }

    /// Sends a oneway heartbeat. Delivery is not confirmed.
    pub async fn heartbeat(&self, service_name: &str) -> Result<(), ClientError> {
        let args = HeartbeatArgs {
            service_name: service_name.to_string(),
        };
        self.client.call_oneway("heartbeat", &args).await
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.client.close().await
    }
}

fn missing_result(method: &str) -> ClientError {
    ClientError::Application(ApplicationException::missing_result(method))
}
