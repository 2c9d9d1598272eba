//! Structured proxy events and the hooks that consume them.
//!
//! # Responsibilities
//! - Define the events handlers and the reactor report
//! - Log them through `tracing` (`TracingHook`)
//! - Count them through `metrics` (`MetricsHook`)
//!
//! # Design Decisions
//! - Hooks are called synchronously, sometimes under the pair lock, so they
//!   must not block
//! - Events borrow nothing; they are cheap to build and clone

use std::sync::Arc;

use http::{Method, StatusCode};

use crate::observability::metrics;
use crate::pair::{PairId, Side};
use crate::protocol::message::{ProtocolVersion, TargetHost};

/// Direction of body bytes through a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Request body, client to origin.
    Upstream,
    /// Response body, origin to client.
    Downstream,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

/// Something observable happened on a pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    PairOpened {
        pair: PairId,
        target: TargetHost,
    },
    PairClosed {
        pair: PairId,
    },
    OriginConnected {
        pair: PairId,
    },
    OriginConnectFailed {
        pair: PairId,
        target: TargetHost,
        error: String,
    },
    RequestReceived {
        pair: PairId,
        method: Method,
        target: String,
        version: ProtocolVersion,
    },
    RequestForwarded {
        pair: PairId,
        method: Method,
        target: String,
    },
    InterimResponseIgnored {
        pair: PairId,
        status: StatusCode,
    },
    ResponseReceived {
        pair: PairId,
        status: StatusCode,
    },
    ResponseSent {
        pair: PairId,
        status: StatusCode,
    },
    /// Body bytes handed to the receiving peer's encoder.
    BytesForwarded {
        pair: PairId,
        direction: Direction,
        bytes: usize,
    },
    BodyCompleted {
        pair: PairId,
        side: Side,
    },
    ExchangeFinished {
        pair: PairId,
        side: Side,
        keep_alive: bool,
    },
    ConnectionShutdown {
        pair: Option<PairId>,
        side: Side,
        reason: &'static str,
        detail: String,
    },
}

/// Receives every [`ProxyEvent`].
pub trait EventHook: Send + Sync {
    fn on_event(&self, event: &ProxyEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl EventHook for TracingHook {
    fn on_event(&self, event: &ProxyEvent) {
        match event {
            ProxyEvent::PairOpened { pair, target } => {
                tracing::info!(pair_id = %pair, target = %target, "Client connection opened");
            }
            ProxyEvent::PairClosed { pair } => {
                tracing::info!(pair_id = %pair, "Client connection closed");
            }
            ProxyEvent::OriginConnected { pair } => {
                tracing::debug!(pair_id = %pair, "Origin connection open");
            }
            ProxyEvent::OriginConnectFailed { pair, target, error } => {
                tracing::warn!(pair_id = %pair, target = %target, error = %error, "Origin connect failed");
            }
            ProxyEvent::RequestReceived {
                pair,
                method,
                target,
                version,
            } => {
                tracing::debug!(pair_id = %pair, method = %method, target = %target, version = %version, "[client] >> request");
            }
            ProxyEvent::RequestForwarded { pair, method, target } => {
                tracing::debug!(pair_id = %pair, method = %method, target = %target, "[proxy] >> request");
            }
            ProxyEvent::InterimResponseIgnored { pair, status } => {
                tracing::debug!(pair_id = %pair, status = status.as_u16(), "[origin] << interim response ignored");
            }
            ProxyEvent::ResponseReceived { pair, status } => {
                tracing::debug!(pair_id = %pair, status = status.as_u16(), "[origin] << response");
            }
            ProxyEvent::ResponseSent { pair, status } => {
                tracing::debug!(pair_id = %pair, status = status.as_u16(), "[proxy] << response");
            }
            ProxyEvent::BytesForwarded { pair, direction, bytes } => {
                tracing::trace!(pair_id = %pair, direction = direction.as_str(), bytes, "Body bytes moved");
            }
            ProxyEvent::BodyCompleted { pair, side } => {
                tracing::debug!(pair_id = %pair, side = %side, "Body complete");
            }
            ProxyEvent::ExchangeFinished { pair, side, keep_alive } => {
                tracing::debug!(pair_id = %pair, side = %side, keep_alive, "Exchange finished");
            }
            ProxyEvent::ConnectionShutdown {
                pair,
                side,
                reason,
                detail,
            } => {
                let pair = pair.map(|p| p.to_string()).unwrap_or_default();
                tracing::warn!(pair_id = %pair, side = %side, reason, detail = %detail, "Connection shut down");
            }
        }
    }
}

/// Records events as `metrics` counters and gauges.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsHook;

impl EventHook for MetricsHook {
    fn on_event(&self, event: &ProxyEvent) {
        match event {
            ProxyEvent::PairOpened { .. } => metrics::record_pair_opened(),
            ProxyEvent::PairClosed { .. } => metrics::record_pair_closed(),
            ProxyEvent::OriginConnectFailed { .. } => metrics::record_connect_failure(),
            ProxyEvent::BytesForwarded { direction, bytes, .. } => {
                metrics::record_bytes_forwarded(direction.as_str(), *bytes)
            }
            ProxyEvent::ExchangeFinished { side, keep_alive, .. } => {
                metrics::record_exchange_finished(side.as_str(), *keep_alive)
            }
            ProxyEvent::ConnectionShutdown { side, reason, .. } => metrics::record_shutdown(side.as_str(), *reason),
            _ => {}
        }
    }
}

/// Fans an event out to several hooks in order.
#[derive(Default, Clone)]
pub struct HookChain {
    hooks: Vec<Arc<dyn EventHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn EventHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl EventHook for HookChain {
    fn on_event(&self, event: &ProxyEvent) {
        for hook in &self.hooks {
            hook.on_event(event);
        }
    }
}

/// Logging plus metrics.
pub fn default_hook() -> Arc<dyn EventHook> {
    Arc::new(
        HookChain::new()
            .with(Arc::new(TracingHook))
            .with(Arc::new(MetricsHook)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counting(Mutex<usize>);

    impl EventHook for Counting {
        fn on_event(&self, _: &ProxyEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn chain_delivers_to_every_hook() {
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());
        let chain = HookChain::new().with(first.clone()).with(second.clone());
        chain.on_event(&ProxyEvent::PairClosed { pair: PairId::new() });
        assert_eq!(*first.0.lock().unwrap(), 1);
        assert_eq!(*second.0.lock().unwrap(), 1);
    }

    #[test]
    fn default_hook_accepts_events_without_recorder() {
        let hook = default_hook();
        hook.on_event(&ProxyEvent::BytesForwarded {
            pair: PairId::new(),
            direction: Direction::Downstream,
            bytes: 42,
        });
    }
}
