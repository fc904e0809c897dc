//! Authentication and identity headers attached to every proxied request

use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::config::{Overrides, ServerConfig};

pub const DEVICE_ID_HEADER: HeaderName = HeaderName::from_static("x-lantern-device-id");
pub const AUTH_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-lantern-auth-token");

/// Header marking the synthetic health-check request so the upstream can
/// short-circuit it cheaply
pub const PING_HEADER: HeaderName = HeaderName::from_static("x-lantern-ping");

/// Attach the device-id and auth-token headers for a server
///
/// The device id is always set. The auth token comes from the server config
/// unless the process-wide override is non-empty; if the effective token is
/// empty the header is omitted entirely.
pub fn attach_headers(
    headers: &mut HeaderMap,
    server: &ServerConfig,
    device_id: &str,
    overrides: &Overrides,
) {
    let auth_token = if overrides.force_auth_token.is_empty() {
        server.auth_token.as_str()
    } else {
        overrides.force_auth_token.as_str()
    };
    if !auth_token.is_empty() {
        set_header(headers, AUTH_TOKEN_HEADER, auth_token);
    }

    set_header(headers, DEVICE_ID_HEADER, device_id);
}

// Invalid header values are logged and skipped, never propagated.
fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => warn!("Skipping invalid value for header {}: {}", name, e),
    }
}
