//! Chained-dialer core
//!
//! This module provides everything needed to turn a server configuration
//! into a balancer-ready dialer:
//! - Pluggable-transport dispatch and the default direct transport
//! - Idle-timeout wrapping of dialed connections
//! - Rotation of recently observed check targets
//! - HEAD-probe liveness checking
//! - Auth/identity header injection

mod check;
pub mod check_targets;
pub mod factory;
pub mod headers;
pub mod idle;
pub mod transport;

pub use check_targets::CheckTargetSet;
pub use factory::{build_dialer, Dialer};
pub use headers::attach_headers;
pub use idle::IdleTimeoutConn;
pub use transport::{
    DirectTransport, DirectTransportFactory, ProxyConnection, Transport, TransportFactory,
    TransportRegistry,
};
