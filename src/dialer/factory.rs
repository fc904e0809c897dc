//! Dialer construction for chained servers
//!
//! Builds the record a balancer consumes: a labeled dial function, a
//! liveness check and the request-mutation hook for auth headers.

use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use tracing::debug;

use crate::config::{Overrides, ServerConfig};
use crate::error::{DialerError, Result};

use super::check::check_server;
use super::headers::attach_headers;
use super::idle::IdleTimeoutConn;
use super::transport::{ProxyConnection, Transport, TransportRegistry};

// Close connections idle for a period to avoid dangling connections. 1 hour
// is long enough not to interrupt normal traffic but short enough to avoid
// "too many open files".
const IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// A dialer backed by one chained server, ready for a balancer
///
/// Lives only as long as the balancer's reference to it; holds no storage
/// beyond the server's check-target rotation.
pub struct Dialer {
    label: String,
    trusted: bool,
    server: Arc<ServerConfig>,
    transport: Arc<dyn Transport>,
    device_id: String,
    overrides: Overrides,
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("label", &self.label)
            .field("trusted", &self.trusted)
            .finish_non_exhaustive()
    }
}

/// Build a dialer for a chained server
///
/// Fails when no transport factory is registered for the configured name or
/// when the factory itself errors; both are fatal for this server and the
/// caller should skip it.
pub fn build_dialer(
    server: Arc<ServerConfig>,
    device_id: &str,
    registry: &TransportRegistry,
    overrides: &Overrides,
) -> Result<Dialer> {
    if !server.pluggable_transport.is_empty() {
        debug!(
            "Using pluggable transport {} for server at {}",
            server.pluggable_transport, server.addr
        );
    }

    let factory = registry.get(&server.pluggable_transport).ok_or_else(|| {
        DialerError::UnsupportedTransport(server.pluggable_transport.clone())
    })?;
    let transport = factory
        .build(&server, device_id, overrides)
        .map_err(DialerError::TransportConstruction)?;

    // Diagnostics only, never identity.
    let trusted_prefix = if server.trusted { "(trusted) " } else { "" };
    let label = format!(
        "{}chained proxy at {} [{}]",
        trusted_prefix, server.addr, server.pluggable_transport
    );

    // Keep at most 10 sites to check; initialization is idempotent.
    server.check_targets();

    Ok(Dialer {
        label,
        trusted: server.trusted,
        server,
        transport,
        device_id: device_id.to_string(),
        overrides: overrides.clone(),
    })
}

impl Dialer {
    /// Display label for logging and diagnostics
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether this server may carry plain HTTP traffic
    pub fn trusted(&self) -> bool {
        self.trusted
    }

    /// Dial a destination through this server
    ///
    /// On success the destination is recorded as a candidate check target
    /// and the connection auto-closes after an hour of inactivity. Dial
    /// errors are returned unchanged; retrying belongs to the balancer.
    pub async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyConnection>> {
        let conn = self.transport.dial_server().await?;

        self.server.check_targets().note_dialed(addr);

        let label = self.label.clone();
        let addr = addr.to_string();
        let conn = IdleTimeoutConn::new(conn, IDLE_TIMEOUT, move || {
            debug!(
                "Connection to {} via {} idle for {:?}, closing",
                addr, label, IDLE_TIMEOUT
            );
        });
        Ok(Box::new(conn))
    }

    /// Probe whether this server is currently usable
    ///
    /// Never fails hard; the balancer only ever observes true or false.
    pub async fn check(&self) -> bool {
        check_server(&self.server, &self.transport, &self.device_id, &self.overrides).await
    }

    /// Request-mutation hook: attach auth and identity headers
    ///
    /// Must be applied to every HTTP request sent through this server.
    pub fn attach_headers(&self, headers: &mut HeaderMap) {
        attach_headers(headers, &self.server, &self.device_id, &self.overrides);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::dialer::headers::{AUTH_TOKEN_HEADER, DEVICE_ID_HEADER};
    use crate::dialer::transport::TransportFactory;

    // Transport whose peer answers any HTTP request with a fixed status.
    struct ScriptedTransport {
        status_line: &'static str,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn dial_server(&self) -> Result<Box<dyn ProxyConnection>> {
            let (near, mut far) = tokio::io::duplex(4096);
            let response = format!("{}\r\ncontent-length: 0\r\n\r\n", self.status_line);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 2048];
                if far.read(&mut buf).await.unwrap_or(0) > 0 {
                    let _ = far.write_all(response.as_bytes()).await;
                }
            });
            Ok(Box::new(near))
        }
    }

    struct ScriptedFactory {
        status_line: &'static str,
    }

    impl TransportFactory for ScriptedFactory {
        fn build(
            &self,
            _server: &ServerConfig,
            _device_id: &str,
            _overrides: &Overrides,
        ) -> anyhow::Result<Arc<dyn Transport>> {
            Ok(Arc::new(ScriptedTransport {
                status_line: self.status_line,
            }))
        }
    }

    struct BrokenFactory;

    impl TransportFactory for BrokenFactory {
        fn build(
            &self,
            _server: &ServerConfig,
            _device_id: &str,
            _overrides: &Overrides,
        ) -> anyhow::Result<Arc<dyn Transport>> {
            anyhow::bail!("missing obfs4 certificate")
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn dial_server(&self) -> Result<Box<dyn ProxyConnection>> {
            Err(DialerError::DialFailed("connection refused".to_string()))
        }
    }

    struct FailingDialFactory;

    impl TransportFactory for FailingDialFactory {
        fn build(
            &self,
            _server: &ServerConfig,
            _device_id: &str,
            _overrides: &Overrides,
        ) -> anyhow::Result<Arc<dyn Transport>> {
            Ok(Arc::new(FailingTransport))
        }
    }

    fn scripted_registry(status_line: &'static str) -> TransportRegistry {
        let mut registry = TransportRegistry::new();
        registry.register("", Arc::new(ScriptedFactory { status_line }));
        registry
    }

    #[test]
    fn test_unregistered_transport_fails_construction() {
        let mut server = ServerConfig::new("proxy.example.com:443");
        server.pluggable_transport = "obfs4".to_string();
        let server = Arc::new(server);

        let err = build_dialer(
            server,
            "device-1",
            &TransportRegistry::with_defaults(),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DialerError::UnsupportedTransport(ref name) if name == "obfs4"));
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_failing_factory_wraps_cause() {
        let mut registry = TransportRegistry::new();
        registry.register("obfs4", Arc::new(BrokenFactory));

        let mut server = ServerConfig::new("proxy.example.com:443");
        server.pluggable_transport = "obfs4".to_string();

        let err = build_dialer(
            Arc::new(server),
            "device-1",
            &registry,
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DialerError::TransportConstruction(_)));
        assert!(err.to_string().contains("missing obfs4 certificate"));
    }

    #[test]
    fn test_label_embeds_trust_and_transport() {
        let server = Arc::new(ServerConfig::new("proxy.example.com:443"));
        let dialer = build_dialer(
            server,
            "device-1",
            &scripted_registry("HTTP/1.1 200 OK"),
            &Overrides::default(),
        )
        .unwrap();
        assert_eq!(dialer.label(), "chained proxy at proxy.example.com:443 []");
        assert!(!dialer.trusted());

        let mut server = ServerConfig::new("proxy.example.com:443");
        server.trusted = true;
        server.pluggable_transport = "obfs4".to_string();
        let mut registry = TransportRegistry::new();
        registry.register(
            "obfs4",
            Arc::new(ScriptedFactory {
                status_line: "HTTP/1.1 200 OK",
            }),
        );
        let dialer = build_dialer(
            Arc::new(server),
            "device-1",
            &registry,
            &Overrides::default(),
        )
        .unwrap();
        assert_eq!(
            dialer.label(),
            "(trusted) chained proxy at proxy.example.com:443 [obfs4]"
        );
        assert!(dialer.trusted());
    }

    #[tokio::test]
    async fn test_dial_records_plain_http_targets_only() {
        let server = Arc::new(ServerConfig::new("proxy.example.com:443"));
        let dialer = build_dialer(
            Arc::clone(&server),
            "device-1",
            &scripted_registry("HTTP/1.1 200 OK"),
            &Overrides::default(),
        )
        .unwrap();

        dialer.dial("example.com:443").await.unwrap();
        assert!(server.check_targets().is_empty());

        dialer.dial("example.com:80").await.unwrap();
        assert_eq!(
            server.check_targets().get(),
            Some("example.com:80".to_string())
        );
    }

    #[tokio::test]
    async fn test_dial_error_propagates_and_records_nothing() {
        let mut registry = TransportRegistry::new();
        registry.register("", Arc::new(FailingDialFactory));

        let server = Arc::new(ServerConfig::new("proxy.example.com:443"));
        let dialer = build_dialer(
            Arc::clone(&server),
            "device-1",
            &registry,
            &Overrides::default(),
        )
        .unwrap();

        let err = dialer.dial("example.com:80").await.unwrap_err();
        assert!(matches!(err, DialerError::DialFailed(_)));
        assert!(server.check_targets().is_empty());
    }

    #[tokio::test]
    async fn test_dialed_connection_carries_traffic() {
        // The peer answers HTTP, so write a request manually and read back.
        let server = Arc::new(ServerConfig::new("proxy.example.com:443"));
        let dialer = build_dialer(
            Arc::clone(&server),
            "device-1",
            &scripted_registry("HTTP/1.1 200 OK"),
            &Overrides::default(),
        )
        .unwrap();

        let mut conn = dialer.dial("example.com:80").await.unwrap();
        conn.write_all(b"HEAD /index.html HTTP/1.1\r\nhost: example.com\r\n\r\n")
            .await
            .unwrap();

        let mut buf = vec![0u8; 128];
        let n = conn.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_dial_then_check_round_trip() {
        // First dial observes the destination; the following check consumes
        // it, probes successfully and re-seeds the rotation.
        let server = Arc::new(ServerConfig::new("proxy.example.com:443"));
        let dialer = build_dialer(
            Arc::clone(&server),
            "device-1",
            &scripted_registry("HTTP/1.1 200 OK"),
            &Overrides::default(),
        )
        .unwrap();

        dialer.dial("example.com:80").await.unwrap();
        assert_eq!(server.check_targets().len(), 1);

        assert!(dialer.check().await);
        assert_eq!(
            server.check_targets().get(),
            Some("example.com:80".to_string())
        );
    }

    #[tokio::test]
    async fn test_check_false_on_5xx() {
        let server = Arc::new(ServerConfig::new("proxy.example.com:443"));
        let dialer = build_dialer(
            Arc::clone(&server),
            "device-1",
            &scripted_registry("HTTP/1.1 503 Service Unavailable"),
            &Overrides::default(),
        )
        .unwrap();

        assert!(!dialer.check().await);
    }

    #[test]
    fn test_attach_headers_hook() {
        let mut server = ServerConfig::new("proxy.example.com:443");
        server.auth_token = "T".to_string();

        let overrides = Overrides {
            force_proxy_addr: String::new(),
            force_auth_token: "O".to_string(),
        };
        let dialer = build_dialer(
            Arc::new(server),
            "device-1",
            &scripted_registry("HTTP/1.1 200 OK"),
            &overrides,
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        dialer.attach_headers(&mut headers);
        assert_eq!(headers.get(AUTH_TOKEN_HEADER).unwrap(), "O");
        assert_eq!(headers.get(DEVICE_ID_HEADER).unwrap(), "device-1");
    }
}
