//! Pluggable transport dispatch
//!
//! Transports produce the low-level dial to the proxy server itself; the
//! per-destination framing over that connection belongs to the chained
//! connection layer and is out of scope here. One implementation per
//! transport kind, registered by name at process start.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::{Overrides, ServerConfig};
use crate::error::{DialerError, Result};

/// Trait for connections produced by transports
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> ProxyConnection for T {}

impl std::fmt::Debug for dyn ProxyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProxyConnection")
    }
}

/// A constructed dial path to one proxy server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a fresh connection to the proxy server
    async fn dial_server(&self) -> Result<Box<dyn ProxyConnection>>;
}

/// Factory building a transport for one server
///
/// Invoked once per dialer construction. Failures are wrapped in
/// [`DialerError::TransportConstruction`] by the caller.
pub trait TransportFactory: Send + Sync {
    fn build(
        &self,
        server: &ServerConfig,
        device_id: &str,
        overrides: &Overrides,
    ) -> anyhow::Result<Arc<dyn Transport>>;
}

/// Name-keyed registry of transport factories
///
/// The empty name maps to the default direct transport.
pub struct TransportRegistry {
    factories: HashMap<String, Arc<dyn TransportFactory>>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the default direct transport registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("", Arc::new(DirectTransportFactory));
        registry
    }

    /// Register a factory under a transport name, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn TransportFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Look up the factory for a transport name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TransportFactory>> {
        self.factories.get(name)
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Default transport: plain TCP to the server address
///
/// Honors the forced proxy address override. Any secured framing on top of
/// the raw stream (TLS, or a transport-specific handshake driven by the
/// server certificate) is applied by the chained connection layer.
pub struct DirectTransport {
    addr: String,
}

#[async_trait]
impl Transport for DirectTransport {
    async fn dial_server(&self) -> Result<Box<dyn ProxyConnection>> {
        debug!("Dialing chained server at {}", self.addr);

        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| DialerError::DialFailed(format!("TCP connect failed: {}", e)))?;

        Ok(Box::new(stream))
    }
}

/// Factory for [`DirectTransport`]
pub struct DirectTransportFactory;

impl TransportFactory for DirectTransportFactory {
    fn build(
        &self,
        server: &ServerConfig,
        _device_id: &str,
        overrides: &Overrides,
    ) -> anyhow::Result<Arc<dyn Transport>> {
        Ok(Arc::new(DirectTransport {
            addr: server.effective_addr(overrides).to_string(),
        }))
    }
}
