//! Server side of the Endpoint registry.

use crate::types::{
    Endpoint, HeartbeatArgs, ListArgs, ListResult, LookupArgs, LookupResult, NotFound,
    RegisterArgs, RegisterResult,
};
use parking_lot::RwLock;
use skiff_protocol::{ApplicationException, CodecOptions};
use skiff_server::Processor;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Handlers for the Endpoint registry methods.
pub trait EndpointService: Send + Sync + 'static {
    /// Registers `endpoint`, returning whether an earlier entry was replaced.
    fn register(
        &self,
        endpoint: Endpoint,
    ) -> impl Future<Output = Result<bool, ApplicationException>> + Send;

    fn lookup(&self, service_name: String) -> impl Future<Output = Result<Endpoint, NotFound>> + Send;

    fn list(&self) -> impl Future<Output = Result<Vec<Endpoint>, ApplicationException>> + Send;

    fn heartbeat(
        &self,
        service_name: String,
    ) -> impl Future<Output = Result<(), ApplicationException>> + Send;
}

/// Builds a processor serving every registry method with `service`.
pub fn processor<S: EndpointService>(service: Arc<S>, options: CodecOptions) -> Processor {
    let register = service.clone();
    let lookup = service.clone();
    let list = service.clone();
    let heartbeat = service;

    Processor::builder()
        .with_options(options)
        .method("register", move |args: RegisterArgs| {
            let service = register.clone();
            async move {
                let replaced = service.register(args.endpoint).await?;
                Ok::<_, ApplicationException>(RegisterResult {
                    success: Some(replaced),
                })
            }
        })
        .method("lookup", move |args: LookupArgs| {
            let service = lookup.clone();
            async move {
                let result = match service.lookup(args.service_name).await {
                    Ok(endpoint) => LookupResult {
                        success: Some(endpoint),
                        not_found: None,
                    },
                    Err(not_found) => LookupResult {
                        success: None,
                        not_found: Some(not_found),
                    },
                };
                Ok::<_, ApplicationException>(result)
            }
        })
        .method("list", move |_: ListArgs| {
            let service = list.clone();
            async move {
                Ok::<_, ApplicationException>(ListResult {
                    success: Some(service.list().await?),
                })
            }
        })
        .oneway("heartbeat", move |args: HeartbeatArgs| {
            let service = heartbeat.clone();
            async move { service.heartbeat(args.service_name).await }
        })
        .build()
}

#[derive(Debug)]
struct Registration {
    endpoint: Endpoint,
    last_seen: Instant,
}

/// Registry that keeps endpoints in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    endpoints: RwLock<BTreeMap<String, Registration>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Returns when `service_name` last registered or sent a heartbeat.
    pub fn last_seen(&self, service_name: &str) -> Option<Instant> {
        self.endpoints.read().get(service_name).map(|r| r.last_seen)
    }
}

impl EndpointService for InMemoryRegistry {
    async fn register(&self, endpoint: Endpoint) -> Result<bool, ApplicationException> {
        if endpoint.service_name.is_empty() {
            return Err(ApplicationException::internal("service name must not be empty"));
        }
        tracing::info!("Registered {}", endpoint);
        let registration = Registration {
            endpoint: endpoint.clone(),
            last_seen: Instant::now(),
        };
        let previous = self
            .endpoints
            .write()
            .insert(endpoint.service_name, registration);
        Ok(previous.is_some())
    }

    async fn lookup(&self, service_name: String) -> Result<Endpoint, NotFound> {
        self.endpoints
            .read()
            .get(&service_name)
            .map(|r| r.endpoint.clone())
            .ok_or(NotFound { service_name })
    }

    async fn list(&self) -> Result<Vec<Endpoint>, ApplicationException> {
        Ok(self
            .endpoints
            .read()
            .values()
            .map(|r| r.endpoint.clone())
            .collect())
    }

    async fn heartbeat(&self, service_name: String) -> Result<(), ApplicationException> {
        match self.endpoints.write().get_mut(&service_name) {
            Some(registration) => {
                registration.last_seen = Instant::now();
                Ok(())
            }
            None => Err(ApplicationException::internal(format!(
                "heartbeat from unregistered service '{}'",
                service_name
            ))),
        }
    }
}
