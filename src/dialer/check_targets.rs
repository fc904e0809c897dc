//! Rotating set of recently observed plain-HTTP destinations
//!
//! Destinations dialed through a server on port 80 are kept as organic
//! health-check targets for that server.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{trace, warn};

/// Maximum number of check targets kept per server
pub(crate) const MAX_CHECK_TARGETS: usize = 10;

// Internal sites are never used as check targets.
const INTERNAL_SITE_SUFFIXES: &[&str] = &["getlantern.org", "getiantem.org", "lantern.io"];

/// Bounded rotating set of `host:port` check targets
///
/// Both `add` and `get` are non-blocking: the lock is only ever held for a
/// constant-time push or pop, and callers never wait for capacity or for
/// entries to appear.
#[derive(Debug)]
pub struct CheckTargetSet {
    capacity: usize,
    targets: Mutex<VecDeque<String>>,
}

impl CheckTargetSet {
    /// Create an empty set with a fixed capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            targets: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Insert a target, silently dropping it if the set is full
    ///
    /// Intentionally lossy: existing entries are never evicted to make room.
    pub fn add(&self, addr: impl Into<String>) {
        let mut targets = self.targets.lock();
        if targets.len() < self.capacity {
            targets.push_back(addr.into());
        }
    }

    /// Remove and return one target, or `None` if the set is empty
    pub fn get(&self) -> Option<String> {
        self.targets.lock().pop_front()
    }

    /// Number of targets currently held
    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    /// Whether the set currently holds no targets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a successfully dialed destination as a candidate check target
    ///
    /// Only plain-HTTP destinations (port 80) outside the internal domains
    /// are meaningful plaintext-reachability probes; everything else is
    /// skipped. Malformed addresses are logged and skipped, never propagated.
    pub fn note_dialed(&self, addr: &str) {
        let (host, port) = match parse_host_port(addr) {
            Some(parts) => parts,
            None => {
                warn!("Failed to split host and port from {}", addr);
                return;
            }
        };

        if port != 80 {
            trace!("Skip setting non-HTTP site {} as check target", addr);
            return;
        }

        if INTERNAL_SITE_SUFFIXES.iter().any(|s| host.ends_with(s)) {
            trace!("Skip setting internal site {} as check target", addr);
            return;
        }

        self.add(addr);
    }
}

/// Split `host:port`, handling bracketed IPv6 like `[::1]:80`
fn parse_host_port(addr: &str) -> Option<(String, u16)> {
    // A non-special scheme: the url crate would normalize away an explicit
    // :80 under http:// and we need to see it.
    let url = url::Url::parse(&format!("tcp://{}", addr)).ok()?;

    let host = url.host_str()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    let port = url.port()?;

    Some((host.to_string(), port))
}
