//! Tandem: a single-origin HTTP/1.x reverse proxy.
//!
//! Every accepted client connection is paired with one origin connection.
//! Requests are forwarded one at a time, bodies stream through two bounded
//! pipes, and each side runs its own state machine over the shared pair.

pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pair;
pub mod protocol;
pub mod transport;

pub use config::schema::ProxyConfig;
pub use error::{ProtocolError, ProxyError};
pub use lifecycle::Shutdown;
pub use net::ProxyServer;
