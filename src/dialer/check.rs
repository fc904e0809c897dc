//! Liveness checking through a chained server
//!
//! Each check dials the server fresh and issues a bounded HEAD request to a
//! recently observed destination, proving the whole path end to end.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::{Method, Request, Uri};
use http_body_util::Empty;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::time::timeout;
use tracing::{debug, error, trace};

use crate::config::{Overrides, ServerConfig};

use super::headers::{attach_headers, PING_HEADER};
use super::transport::Transport;

/// Overall bound on a single health check
pub(crate) const CHECK_TIMEOUT: Duration = Duration::from_secs(60);

// Synthetic target used when no organic check target is available. The
// upstream recognizes it and answers without fetching anything.
const SYNTHETIC_CHECK_URL: &str = "http://ping-chained-server";

/// Probe reachability through the server's dial path
///
/// Picks an organic check target when one is available, otherwise falls
/// back to the synthetic ping target. Reachable means a HEAD response with
/// status below 500; transport errors, 5xx responses and exceeding the
/// 60-second bound all count as unreachable. The in-flight request is
/// cancelled when the bound is exceeded.
pub(crate) async fn check_server(
    server: &ServerConfig,
    transport: &Arc<dyn Transport>,
    device_id: &str,
    overrides: &Overrides,
) -> bool {
    let target = server.check_targets().get();
    let url = match &target {
        Some(target) => format!("http://{}/index.html", target),
        None => SYNTHETIC_CHECK_URL.to_string(),
    };

    let attempt = probe(server, transport, &url, target.is_none(), device_id, overrides);
    let reachable = match timeout(CHECK_TIMEOUT, attempt).await {
        Ok(reachable) => reachable,
        Err(_) => {
            error!("Timed out checking server at: {}", server.addr);
            return false;
        }
    };

    if reachable {
        if let Some(target) = target {
            // Can serve as a check target again if no new sites appear.
            server.check_targets().add(target);
        }
    }
    reachable
}

async fn probe(
    server: &ServerConfig,
    transport: &Arc<dyn Transport>,
    url: &str,
    synthetic: bool,
    device_id: &str,
    overrides: &Overrides,
) -> bool {
    let uri: Uri = match url.parse() {
        Ok(uri) => uri,
        Err(e) => {
            error!("Could not parse check URL {}: {}", url, e);
            return false;
        }
    };
    let authority = match uri.authority() {
        Some(authority) => authority.to_string(),
        None => {
            error!("Check URL {} missing authority", url);
            return false;
        }
    };

    let stream = match transport.dial_server().await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("Error dialing server {} for check: {}", server.addr, e);
            return false;
        }
    };

    // A fresh connection per check: the value under test is whether one can
    // currently be established and used.
    let (mut sender, conn) = match http1::handshake(TokioIo::new(stream)).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!("Handshake with server {} failed: {}", server.addr, e);
            return false;
        }
    };
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            trace!("Check connection ended: {}", e);
        }
    });

    let mut req = match Request::builder()
        .method(Method::HEAD)
        .uri(uri)
        .body(Empty::<Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => {
            error!("Could not create check request: {}", e);
            return false;
        }
    };
    match HeaderValue::from_str(&authority) {
        Ok(host) => {
            req.headers_mut().insert(HOST, host);
        }
        Err(e) => {
            error!("Invalid check host {}: {}", authority, e);
            return false;
        }
    }
    if synthetic {
        req.headers_mut()
            .insert(PING_HEADER, HeaderValue::from_static("small"));
    }
    attach_headers(req.headers_mut(), server, device_id, overrides);

    let resp = match sender.send_request(req).await {
        Ok(resp) => resp,
        Err(e) => {
            debug!("Error testing dialer {} to {}: {}", server.addr, url, e);
            return false;
        }
    };

    let status = resp.status().as_u16();
    // Below 500 the target is at least reachable through this server, no
    // matter the specific code. A 5xx cannot be told apart from the server
    // rejecting this client (bad token etc.), so it counts as a failure.
    let reachable = status < 500;
    if reachable {
        trace!(
            "HEAD {} through chained server at {}, status code {}",
            url,
            server.addr,
            status
        );
    } else {
        debug!(
            "HEAD {} through chained server at {}, status code {}",
            url,
            server.addr,
            status
        );
    }
    reachable
}
