//! Origin-facing half of the proxy.
//!
//! # Responsibilities
//! - Forward the stored request once the origin connection can take it
//! - Drain the request pipe into the origin, fill the response pipe from it
//! - Decide keep-alive for the origin connection
//!
//! # Design Decisions
//! - The forwarded request is a re-framed copy; the stored request keeps the
//!   client's own headers for the client-side pipeline
//! - Closing or failing the origin never touches the client connection
//!   directly, except a kept-alive client waiting idle for its next request

use std::io;
use std::sync::Arc;

use crate::error::ProxyError;
use crate::observability::{default_hook, Direction, EventHook, ProxyEvent};
use crate::pair::{ClientState, OriginEvent, OriginState, PairState, SharedPair, Side};
use crate::protocol::headers::{can_response_have_body, strip_request_headers};
use crate::protocol::processor::{ExchangeContext, HttpProcessor};
use crate::protocol::reuse::ConnectionReuseStrategy;
use crate::transport::{ContentDecoder, ContentEncoder, OriginConnection, OriginEventHandler};

/// Drives the origin-side state machine of every pair.
pub struct OriginSideHandler {
    processor: Arc<HttpProcessor>,
    reuse: Arc<dyn ConnectionReuseStrategy>,
    hook: Arc<dyn EventHook>,
}

impl OriginSideHandler {
    pub fn new(processor: Arc<HttpProcessor>, reuse: Arc<dyn ConnectionReuseStrategy>) -> Self {
        Self {
            processor,
            reuse,
            hook: default_hook(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn EventHook>) -> Self {
        self.hook = hook;
        self
    }

    fn fail(&self, conn: &mut dyn OriginConnection, reason: &'static str, detail: String) {
        self.hook.on_event(&ProxyEvent::ConnectionShutdown {
            pair: conn.pair().map(|p| p.id()),
            side: Side::Origin,
            reason,
            detail,
        });
        let _ = conn.control().shutdown();
    }

    fn fail_with(&self, conn: &mut dyn OriginConnection, error: ProxyError) {
        self.fail(conn, error.kind(), error.to_string());
    }

    /// Applies the keep-alive decision once the response is fully read.
    fn settle_connection(&self, conn: &mut dyn OriginConnection, state: &mut PairState) -> Result<(), ProxyError> {
        let keep_alive = state.origin_reusable && conn.is_open();
        self.hook.on_event(&ProxyEvent::ExchangeFinished {
            pair: state.id(),
            side: Side::Origin,
            keep_alive,
        });
        if !keep_alive {
            state.origin_closed = true;
            conn.control().close()?;
        }
        Ok(())
    }

    fn try_connected(&self, conn: &mut dyn OriginConnection, pair: SharedPair) -> Result<(), ProxyError> {
        {
            let mut state = pair.lock()?;
            state.origin_state.ensure(OriginEvent::Connect)?;
            if !state.client_control.as_ref().is_some_and(|c| c.is_open()) {
                tracing::debug!(pair_id = %pair.id(), "Client left before the origin connected");
                state.origin_closed = true;
                conn.control().shutdown()?;
                return Ok(());
            }
            state.origin_control = Some(conn.control());
            state.origin_state = OriginState::Connected;
            if state.request.is_some() {
                conn.control().request_output();
            }
        }
        conn.attach_pair(pair.clone());
        self.hook.on_event(&ProxyEvent::OriginConnected { pair: pair.id() });
        Ok(())
    }

    fn try_request_ready(&self, conn: &mut dyn OriginConnection) -> Result<(), ProxyError> {
        let pair = conn.pair().ok_or(ProxyError::Detached)?;
        let mut state = pair.lock()?;
        state.origin_state.ensure(OriginEvent::RequestReady)?;
        let Some(request) = state.request.as_ref() else {
            tracing::trace!(pair_id = %pair.id(), "Output readiness without a request ignored");
            conn.control().suspend_output();
            return Ok(());
        };

        let mut outgoing = request.clone();
        strip_request_headers(&mut outgoing);
        let context = ExchangeContext::new(conn.is_open()).with_target(state.target());
        self.processor.process_request(&mut outgoing, &context)?;
        conn.submit_request(&outgoing)?;
        state.origin_state = OriginState::RequestSent;
        self.hook.on_event(&ProxyEvent::RequestForwarded {
            pair: pair.id(),
            method: outgoing.method,
            target: outgoing.target,
        });
        Ok(())
    }

    fn try_output_ready(&self, conn: &mut dyn OriginConnection, encoder: &mut dyn ContentEncoder) -> Result<(), ProxyError> {
        let pair = conn.pair().ok_or(ProxyError::Detached)?;
        let mut state = pair.lock()?;
        state.origin_state.ensure(OriginEvent::RequestBody)?;

        let written = state.request_buffer.drain_into(encoder)?;
        if written > 0 {
            self.hook.on_event(&ProxyEvent::BytesForwarded {
                pair: pair.id(),
                direction: Direction::Upstream,
                bytes: written,
            });
        }

        if state.request_buffer.is_empty() {
            if state.client_state == ClientState::RequestBodyDone {
                encoder.complete()?;
            } else {
                conn.control().suspend_output();
            }
        }

        if encoder.is_completed() {
            state.origin_state = OriginState::RequestBodyDone;
            self.hook.on_event(&ProxyEvent::BodyCompleted {
                pair: pair.id(),
                side: Side::Origin,
            });
        } else {
            state.origin_state = OriginState::RequestBodyStream;
            if state.client_state != ClientState::RequestBodyDone {
                if let Some(client) = &state.client_control {
                    client.request_input();
                }
            }
        }
        Ok(())
    }

    fn try_response_received(&self, conn: &mut dyn OriginConnection) -> Result<(), ProxyError> {
        let pair = conn.pair().ok_or(ProxyError::Detached)?;
        let mut state = pair.lock()?;
        let response = conn.take_response().ok_or(ProxyError::MissingResponse)?;
        if response.status.is_informational() {
            self.hook.on_event(&ProxyEvent::InterimResponseIgnored {
                pair: pair.id(),
                status: response.status,
            });
            return Ok(());
        }
        state.origin_state.ensure(OriginEvent::ResponseReceived)?;

        self.hook.on_event(&ProxyEvent::ResponseReceived {
            pair: pair.id(),
            status: response.status,
        });
        let has_body = can_response_have_body(state.request.as_ref(), &response);
        let context = ExchangeContext::new(conn.is_open()).with_target(state.target());
        state.origin_reusable = self.reuse.keep_alive(&response, &context);
        state.response = Some(response);
        state.origin_state = OriginState::ResponseReceived;

        if !has_body {
            conn.reset_input();
            self.settle_connection(conn, &mut state)?;
        }
        if let Some(client) = &state.client_control {
            client.request_output();
        }
        Ok(())
    }

    fn try_input_ready(&self, conn: &mut dyn OriginConnection, decoder: &mut dyn ContentDecoder) -> Result<(), ProxyError> {
        let pair = conn.pair().ok_or(ProxyError::Detached)?;
        let mut state = pair.lock()?;
        state.origin_state.ensure(OriginEvent::ResponseBody)?;

        // Counted once the consuming side drains the pipe.
        state.response_buffer.fill_from(decoder)?;
        if state.response_buffer.is_full() {
            conn.control().suspend_input();
        }

        let completed = decoder.is_completed();
        if state.response_buffer.has_pending() || completed {
            if let Some(client) = &state.client_control {
                client.request_output();
            }
        }

        if completed {
            state.origin_state = OriginState::ResponseBodyDone;
            self.hook.on_event(&ProxyEvent::BodyCompleted {
                pair: pair.id(),
                side: Side::Origin,
            });
            self.settle_connection(conn, &mut state)?;
        } else {
            state.origin_state = OriginState::ResponseBodyStream;
        }
        Ok(())
    }
}

impl OriginEventHandler for OriginSideHandler {
    fn connected(&self, conn: &mut dyn OriginConnection, pair: SharedPair) {
        let pair_id = pair.id();
        if let Err(e) = self.try_connected(conn, pair) {
            self.hook.on_event(&ProxyEvent::ConnectionShutdown {
                pair: Some(pair_id),
                side: Side::Origin,
                reason: e.kind(),
                detail: e.to_string(),
            });
            let _ = conn.control().shutdown();
        }
    }

    fn request_ready(&self, conn: &mut dyn OriginConnection) {
        if let Err(e) = self.try_request_ready(conn) {
            self.fail_with(conn, e);
        }
    }

    fn output_ready(&self, conn: &mut dyn OriginConnection, encoder: &mut dyn ContentEncoder) {
        if let Err(e) = self.try_output_ready(conn, encoder) {
            self.fail_with(conn, e);
        }
    }

    fn response_received(&self, conn: &mut dyn OriginConnection) {
        if let Err(e) = self.try_response_received(conn) {
            self.fail_with(conn, e);
        }
    }

    fn input_ready(&self, conn: &mut dyn OriginConnection, decoder: &mut dyn ContentDecoder) {
        if let Err(e) = self.try_input_ready(conn, decoder) {
            self.fail_with(conn, e);
        }
    }

    fn closed(&self, conn: &mut dyn OriginConnection) {
        let Some(pair) = conn.pair() else {
            return;
        };
        let Ok(mut state) = pair.lock() else {
            return;
        };
        state.origin_closed = true;
        // A kept-alive client between requests can no longer be served.
        if state.client_state == ClientState::Idle {
            if let Some(client) = &state.client_control {
                let _ = client.close();
            }
        }
        tracing::debug!(pair_id = %pair.id(), "Origin connection closed");
    }

    fn protocol_error(&self, conn: &mut dyn OriginConnection, error: &ProxyError) {
        self.fail(conn, "protocol_error", error.to_string());
    }

    fn transport_error(&self, conn: &mut dyn OriginConnection, error: &io::Error) {
        self.fail(conn, "io_error", error.to_string());
    }

    fn timeout(&self, conn: &mut dyn OriginConnection) {
        self.fail(conn, "timeout", "idle timeout".to_string());
    }
}
