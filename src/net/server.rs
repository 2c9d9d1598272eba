//! Proxy server wiring and accept loop.
//!
//! # Responsibilities
//! - Build both handlers, their processing pipelines and the connector
//! - Accept client connections and spawn one session task per connection
//! - Stop accepting on shutdown and give open connections a grace period

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::handler::{ClientSideHandler, OriginSideHandler};
use crate::net::connection::ConnectionTracker;
use crate::net::connector::TcpConnector;
use crate::net::inbound::serve_client;
use crate::net::listener::{Listener, ListenerError};
use crate::net::session::SessionConfig;
use crate::observability::{default_hook, EventHook};
use crate::protocol::message::TargetHost;
use crate::protocol::processor::HttpProcessor;
use crate::protocol::reuse::DefaultReuseStrategy;
use crate::transport::ClientEventHandler;

/// Reverse proxy forwarding every client connection to one origin.
pub struct ProxyServer {
    client_handler: Arc<dyn ClientEventHandler>,
    session: SessionConfig,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl ProxyServer {
    /// Create a server from a validated configuration.
    pub fn new(config: &ProxyConfig) -> Self {
        Self::with_hook(config, default_hook())
    }

    /// Create a server reporting events to `hook`.
    pub fn with_hook(config: &ProxyConfig, hook: Arc<dyn EventHook>) -> Self {
        let target = TargetHost::new(config.target.host.clone(), config.target.port);
        let session = SessionConfig {
            idle_timeout: config.timeouts.socket(),
            buffer_size: config.connection.socket_buffer_size,
            max_head_size: config.connection.max_head_size,
            tcp_nodelay: config.connection.tcp_nodelay,
        };
        let tracker = ConnectionTracker::new();
        let reuse = Arc::new(DefaultReuseStrategy);

        let origin_processor = Arc::new(HttpProcessor::for_origin(
            config.identity.user_agent.clone(),
            config.connection.use_expect_continue,
        ));
        let origin_handler = OriginSideHandler::new(origin_processor, reuse.clone()).with_hook(Arc::clone(&hook));
        let connector = TcpConnector::new(
            Arc::new(origin_handler),
            session.clone(),
            config.timeouts.connect(),
            tracker.clone(),
            Arc::clone(&hook),
        );

        let client_processor = Arc::new(HttpProcessor::for_client(config.identity.origin_server.clone()));
        let client_handler = ClientSideHandler::new(target, Arc::new(connector), client_processor, reuse)
            .with_pipe_capacity(config.connection.pipe_buffer_size)
            .with_hook(hook);

        Self {
            client_handler: Arc::new(client_handler),
            session,
            tracker,
            shutdown_grace: config.timeouts.shutdown_grace(),
        }
    }

    /// Live client and origin connections.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(address = ?addr, "Proxy server starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signalled, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let handler = Arc::clone(&self.client_handler);
                        let session = self.session.clone();
                        let guard = self.tracker.track();
                        tokio::spawn(async move {
                            serve_client(stream, peer, handler, session, guard).await;
                            drop(permit);
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        // Usually descriptor exhaustion; back off briefly.
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        let open = self.tracker.active_count();
        if open > 0 {
            tracing::info!(open_connections = open, grace = ?self.shutdown_grace, "Waiting for connections to finish");
            if !self.tracker.wait_for_drain(self.shutdown_grace).await {
                tracing::warn!(open_connections = self.tracker.active_count(), "Grace period expired with open connections");
            }
        }
        tracing::info!("Proxy server stopped");
        Ok(())
    }
}
