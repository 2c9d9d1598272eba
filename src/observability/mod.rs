//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Handlers and reactor produce ProxyEvent values
//!     → events.rs (EventHook fan-out)
//!         → TracingHook  → logging.rs subscriber (stdout)
//!         → MetricsHook  → metrics.rs recorder (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - The proxy core only knows the `EventHook` trait; sinks are registered
//!   by whoever assembles the server
//! - Pair IDs flow through every event so both connections of a pair correlate
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{default_hook, Direction, EventHook, HookChain, MetricsHook, ProxyEvent, TracingHook};
