//! Asynchronous TCP connector for origin connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::net::connection::ConnectionTracker;
use crate::net::outbound::serve_origin;
use crate::net::session::SessionConfig;
use crate::observability::{EventHook, ProxyEvent};
use crate::pair::SharedPair;
use crate::protocol::message::TargetHost;
use crate::transport::{Connector, OriginEventHandler};

/// Opens a TCP connection per pair and runs it on its own task.
///
/// A failed connect is logged and marks the pair's origin as closed; the
/// client connection is left to its own idle timeout.
pub struct TcpConnector {
    handler: Arc<dyn OriginEventHandler>,
    session: SessionConfig,
    connect_timeout: Duration,
    tracker: ConnectionTracker,
    hook: Arc<dyn EventHook>,
}

impl TcpConnector {
    pub fn new(
        handler: Arc<dyn OriginEventHandler>,
        session: SessionConfig,
        connect_timeout: Duration,
        tracker: ConnectionTracker,
        hook: Arc<dyn EventHook>,
    ) -> Self {
        Self {
            handler,
            session,
            connect_timeout,
            tracker,
            hook,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, target: &TargetHost, pair: SharedPair) {
        let target = target.clone();
        let handler = Arc::clone(&self.handler);
        let session = self.session.clone();
        let connect_timeout = self.connect_timeout;
        let guard = self.tracker.track();
        let hook = Arc::clone(&self.hook);

        tokio::spawn(async move {
            let attempt = tokio::time::timeout(connect_timeout, TcpStream::connect((target.host.as_str(), target.port))).await;
            let error = match attempt {
                Ok(Ok(stream)) => {
                    tracing::trace!(pair_id = %pair.id(), target = %target, "Origin TCP connection established");
                    serve_origin(stream, pair, handler, session, guard).await;
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no connection within {connect_timeout:?}"),
            };

            hook.on_event(&ProxyEvent::OriginConnectFailed {
                pair: pair.id(),
                target,
                error,
            });
            match pair.lock() {
                Ok(mut state) => state.origin_closed = true,
                Err(e) => tracing::warn!(pair_id = %pair.id(), error = %e, "Could not mark origin closed"),
            }
        });
    }
}
