//! Client-facing half of the proxy.
//!
//! # Responsibilities
//! - Create the pair when a client connects and ask the connector for an origin
//! - Move request bodies into the request pipe and response bodies out of the
//!   response pipe
//! - Decide keep-alive for the client connection and recycle the pair
//!
//! # Design Decisions
//! - Every callback takes the pair lock once and releases it on return
//! - Errors are propagated internally with `?`; the public callback turns any
//!   failure into an abrupt shutdown of this connection only

use std::io;
use std::sync::Arc;

use http::header::{HeaderValue, CONNECTION};
use http::StatusCode;

use crate::error::ProxyError;
use crate::observability::{default_hook, Direction, EventHook, ProxyEvent};
use crate::pair::{ClientEvent, ClientState, OriginState, PairId, PairState, SharedPair, Side, DEFAULT_PIPE_CAPACITY};
use crate::protocol::headers::{can_response_have_body, strip_response_headers};
use crate::protocol::message::{ProtocolVersion, ResponseHead, TargetHost};
use crate::protocol::processor::{ExchangeContext, HttpProcessor};
use crate::protocol::reuse::ConnectionReuseStrategy;
use crate::transport::{ClientConnection, ClientEventHandler, Connector, ContentDecoder, ContentEncoder};

/// Drives the client-side state machine of every pair.
pub struct ClientSideHandler {
    target: TargetHost,
    connector: Arc<dyn Connector>,
    processor: Arc<HttpProcessor>,
    reuse: Arc<dyn ConnectionReuseStrategy>,
    pipe_capacity: usize,
    hook: Arc<dyn EventHook>,
}

impl ClientSideHandler {
    pub fn new(
        target: TargetHost,
        connector: Arc<dyn Connector>,
        processor: Arc<HttpProcessor>,
        reuse: Arc<dyn ConnectionReuseStrategy>,
    ) -> Self {
        Self {
            target,
            connector,
            processor,
            reuse,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            hook: default_hook(),
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn EventHook>) -> Self {
        self.hook = hook;
        self
    }

    fn fail(&self, conn: &mut dyn ClientConnection, reason: &'static str, detail: String) {
        self.hook.on_event(&ProxyEvent::ConnectionShutdown {
            pair: conn.pair().map(|p| p.id()),
            side: Side::Client,
            reason,
            detail,
        });
        // Shutdown of a dead connection has nothing left to report.
        let _ = conn.control().shutdown();
    }

    fn fail_with(&self, conn: &mut dyn ClientConnection, error: ProxyError) {
        self.fail(conn, error.kind(), error.to_string());
    }

    /// Ends an exchange: recycle the pair for the next request or close.
    fn finish_exchange(&self, conn: &mut dyn ClientConnection, state: &mut PairState, keep_alive: bool) -> Result<(), ProxyError> {
        self.hook.on_event(&ProxyEvent::ExchangeFinished {
            pair: state.id(),
            side: Side::Client,
            keep_alive,
        });
        if keep_alive {
            state.reset();
            conn.control().request_input();
        } else {
            conn.control().close()?;
        }
        Ok(())
    }

    fn keep_alive(&self, conn: &dyn ClientConnection, state: &PairState) -> Result<bool, ProxyError> {
        let response = state.response.as_ref().ok_or(ProxyError::MissingResponse)?;
        let context = ExchangeContext::new(conn.is_open()).with_request(state.request.as_ref());
        Ok(self.reuse.keep_alive(response, &context) && !state.origin_closed)
    }

    fn try_connected(&self, conn: &mut dyn ClientConnection) -> Result<(), ProxyError> {
        let pair = SharedPair::new(self.target.clone(), self.pipe_capacity);
        {
            let mut state = pair.lock()?;
            state.client_control = Some(conn.control());
            state.client_state = ClientState::Connected;
        }
        conn.attach_pair(pair.clone());
        self.hook.on_event(&ProxyEvent::PairOpened {
            pair: pair.id(),
            target: self.target.clone(),
        });
        self.connector.connect(&self.target, pair);
        Ok(())
    }

    fn try_request_received(&self, conn: &mut dyn ClientConnection) -> Result<(), ProxyError> {
        let pair = conn.pair().ok_or(ProxyError::Detached)?;
        let mut state = pair.lock()?;
        state.client_state.ensure(ClientEvent::RequestReceived)?;
        if state.origin_closed {
            return Err(ProxyError::OriginGone);
        }

        let mut request = conn.take_request().ok_or(ProxyError::MissingRequest)?;
        request.version = request.version.downgraded();
        self.hook.on_event(&ProxyEvent::RequestReceived {
            pair: pair.id(),
            method: request.method.clone(),
            target: request.target.clone(),
            version: request.version,
        });

        let has_body = request.entity.is_some();
        let ack = (has_body && request.expects_continue()).then(|| ResponseHead::new(request.version, StatusCode::CONTINUE));

        state.request = Some(request);
        state.client_state = ClientState::RequestReceived;

        if let Some(ack) = ack {
            conn.submit_response(&ack)?;
        }
        if !has_body {
            conn.control().suspend_input();
        }
        if let Some(origin) = &state.origin_control {
            origin.request_output();
        }
        Ok(())
    }

    fn try_input_ready(&self, conn: &mut dyn ClientConnection, decoder: &mut dyn ContentDecoder) -> Result<(), ProxyError> {
        let pair = conn.pair().ok_or(ProxyError::Detached)?;
        let mut state = pair.lock()?;
        state.client_state.ensure(ClientEvent::RequestBody)?;

        // Counted once the consuming side drains the pipe.
        state.request_buffer.fill_from(decoder)?;
        if state.request_buffer.is_full() {
            conn.control().suspend_input();
        }

        let completed = decoder.is_completed();
        if state.request_buffer.has_pending() || completed {
            if let Some(origin) = &state.origin_control {
                origin.request_output();
            }
        }

        if completed {
            state.client_state = ClientState::RequestBodyDone;
            conn.control().suspend_input();
            self.hook.on_event(&ProxyEvent::BodyCompleted {
                pair: pair.id(),
                side: Side::Client,
            });
        } else {
            state.client_state = ClientState::RequestBodyStream;
        }
        Ok(())
    }

    fn try_response_ready(&self, conn: &mut dyn ClientConnection) -> Result<(), ProxyError> {
        let pair = conn.pair().ok_or(ProxyError::Detached)?;
        let mut guard = pair.lock()?;
        if guard.client_state == ClientState::Idle {
            tracing::trace!(pair_id = %pair.id(), "Premature response readiness ignored");
            return Ok(());
        }
        guard.client_state.ensure(ClientEvent::ResponseReady)?;
        if guard.response.is_none() {
            // Origin has not answered yet; it wakes this side when it does.
            conn.control().suspend_output();
            return Ok(());
        }

        let open = conn.is_open();
        let state = &mut *guard;
        let response = state.response.as_mut().ok_or(ProxyError::MissingResponse)?;
        strip_response_headers(response);
        let context = ExchangeContext::new(open).with_request(state.request.as_ref());
        self.processor.process_response(response, &context)?;
        conn.submit_response(response)?;
        state.client_state = ClientState::ResponseSent;
        self.hook.on_event(&ProxyEvent::ResponseSent {
            pair: pair.id(),
            status: response.status,
        });

        if !can_response_have_body(state.request.as_ref(), response) {
            conn.reset_input();
            let keep_alive = self.keep_alive(conn, state)?;
            self.finish_exchange(conn, state, keep_alive)?;
        }
        Ok(())
    }

    fn try_output_ready(&self, conn: &mut dyn ClientConnection, encoder: &mut dyn ContentEncoder) -> Result<(), ProxyError> {
        let pair = conn.pair().ok_or(ProxyError::Detached)?;
        let mut state = pair.lock()?;
        state.client_state.ensure(ClientEvent::ResponseBody)?;
        if state.response.is_none() {
            return Err(ProxyError::MissingResponse);
        }

        let written = state.response_buffer.drain_into(encoder)?;
        if written > 0 {
            self.hook.on_event(&ProxyEvent::BytesForwarded {
                pair: pair.id(),
                direction: Direction::Downstream,
                bytes: written,
            });
        }

        if state.response_buffer.is_empty() {
            if state.origin_state == OriginState::ResponseBodyDone {
                encoder.complete()?;
            } else {
                conn.control().suspend_output();
            }
        }

        if encoder.is_completed() {
            state.client_state = ClientState::ResponseBodyDone;
            self.hook.on_event(&ProxyEvent::BodyCompleted {
                pair: pair.id(),
                side: Side::Client,
            });
            let keep_alive = self.keep_alive(conn, &state)?;
            self.finish_exchange(conn, &mut state, keep_alive)?;
        } else {
            state.client_state = ClientState::ResponseBodyStream;
            if state.origin_state != OriginState::ResponseBodyDone {
                if let Some(origin) = &state.origin_control {
                    origin.request_input();
                }
            }
        }
        Ok(())
    }

    fn try_protocol_error(&self, conn: &mut dyn ClientConnection) -> Result<(), ProxyError> {
        let mut response = ResponseHead::new(ProtocolVersion::HTTP_1_0, StatusCode::BAD_REQUEST)
            .header(CONNECTION, HeaderValue::from_static("Close"));
        let context = ExchangeContext::new(conn.is_open());
        self.processor.process_response(&mut response, &context)?;
        conn.submit_response(&response)?;
        conn.control().close()?;
        Ok(())
    }

    fn pair_id(conn: &dyn ClientConnection) -> Option<PairId> {
        conn.pair().map(|p| p.id())
    }
}

impl ClientEventHandler for ClientSideHandler {
    fn connected(&self, conn: &mut dyn ClientConnection) {
        if let Err(e) = self.try_connected(conn) {
            self.fail_with(conn, e);
        }
    }

    fn request_received(&self, conn: &mut dyn ClientConnection) {
        if let Err(e) = self.try_request_received(conn) {
            self.fail_with(conn, e);
        }
    }

    fn input_ready(&self, conn: &mut dyn ClientConnection, decoder: &mut dyn ContentDecoder) {
        if let Err(e) = self.try_input_ready(conn, decoder) {
            self.fail_with(conn, e);
        }
    }

    fn response_ready(&self, conn: &mut dyn ClientConnection) {
        if let Err(e) = self.try_response_ready(conn) {
            self.fail_with(conn, e);
        }
    }

    fn output_ready(&self, conn: &mut dyn ClientConnection, encoder: &mut dyn ContentEncoder) {
        if let Err(e) = self.try_output_ready(conn, encoder) {
            self.fail_with(conn, e);
        }
    }

    fn closed(&self, conn: &mut dyn ClientConnection) {
        let Some(pair) = conn.pair() else {
            return;
        };
        match pair.lock() {
            Ok(state) => {
                if let Some(origin) = &state.origin_control {
                    // The origin may already be gone; nothing to report then.
                    let _ = origin.shutdown();
                }
            }
            Err(e) => tracing::warn!(pair_id = %pair.id(), error = %e, "Could not reach origin on client close"),
        }
        self.hook.on_event(&ProxyEvent::PairClosed { pair: pair.id() });
    }

    fn protocol_error(&self, conn: &mut dyn ClientConnection, error: &ProxyError) {
        tracing::debug!(pair_id = ?Self::pair_id(conn), error = %error, "Malformed client request");
        if let Err(e) = self.try_protocol_error(conn) {
            self.fail(conn, "protocol_error", format!("{error}; 400 not delivered: {e}"));
        }
    }

    fn transport_error(&self, conn: &mut dyn ClientConnection, error: &io::Error) {
        self.fail(conn, "io_error", error.to_string());
    }

    fn timeout(&self, conn: &mut dyn ClientConnection) {
        self.fail(conn, "timeout", "idle timeout".to_string());
    }
}
