//! Network layer: sockets, sessions and the accept loop.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → inbound.rs (client session, ClientEventHandler callbacks)
//!         → connector.rs (origin connect per pair)
//!         → outbound.rs (origin session, OriginEventHandler callbacks)
//!
//! Connection States:
//!     Active → Draining (graceful close) → Closed
//!     Active → Closed (shutdown, EOF, failure)
//! ```
//!
//! # Design Decisions
//! - Bounded accept via semaphore prevents resource exhaustion
//! - Each connection is tracked for graceful shutdown
//! - Both connection kinds share one session loop (session.rs)

pub mod connection;
pub mod connector;
pub mod inbound;
pub mod listener;
pub mod outbound;
pub mod server;
pub mod session;

pub use connection::{ConnectionControl, ConnectionId, ConnectionState, ConnectionTracker};
pub use connector::TcpConnector;
pub use inbound::InboundConnection;
pub use listener::{Listener, ListenerError};
pub use outbound::OutboundConnection;
pub use server::ProxyServer;
pub use session::SessionConfig;
