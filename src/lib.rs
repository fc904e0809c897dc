//! chained-dialer - Upstream proxy dialing and liveness verification
//!
//! Builds dialers for chained (upstream) proxy servers inside a
//! censorship-circumvention client and verifies their liveness for an
//! upstream-selection layer.
//!
//! ## Features
//!
//! - Pluggable-transport dispatch via a name-keyed factory registry
//! - Idle-timeout auto-closing of dialed connections
//! - Organic health-check targets harvested from recently dialed
//!   plain-HTTP destinations
//! - Bounded HEAD-probe liveness checks through the proxy
//! - Auth-token and device-id header injection with process-wide overrides

pub mod config;
pub mod dialer;
pub mod error;

pub use config::{Overrides, ServerConfig};
pub use dialer::{build_dialer, Dialer, TransportRegistry};
pub use error::{DialerError, Result};
