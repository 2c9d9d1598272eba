//! Origin-facing connections opened by the connector.
//!
//! # Data Flow
//! ```text
//! request_ready ──write_request_head──▶ Session::outbuf ──▶ origin
//! request pipe ──▶ output_ready ──BodyEncoder──▶ Session::outbuf
//! origin ──▶ Session::inbuf ──parse_response_head──▶ response_received
//!                          └──BodyDecoder──▶ input_ready ──▶ response pipe
//! ```
//!
//! A connection answers exactly one request at a time; bytes arriving while no
//! request is outstanding are a protocol error.

use std::io;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use http::Method;
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::error::{ProtocolError, ProxyError};
use crate::net::connection::{ConnectionControl, ConnectionGuard};
use crate::net::session::{drive, Endpoint, Session, SessionConfig};
use crate::pair::SharedPair;
use crate::protocol::codec::{outgoing_entity, parse_response_head, write_request_head, BodyDecoder, BodyEncoder, DecoderState, EncoderState};
use crate::protocol::headers::body_allowed;
use crate::protocol::message::{RequestHead, ResponseHead};
use crate::transport::{ControlHandle, IoControl, OriginConnection, OriginEventHandler};

/// Per-connection message state of an origin connection.
pub struct OutboundConnection {
    control: Arc<ConnectionControl>,
    pair: Option<SharedPair>,
    response: Option<ResponseHead>,
    method: Option<Method>,
    awaiting_response: bool,
    decoder: Option<DecoderState>,
    encoder: Option<EncoderState>,
    head_out: BytesMut,
    discard_input: bool,
}

impl OutboundConnection {
    fn new(control: Arc<ConnectionControl>) -> Self {
        Self {
            control,
            pair: None,
            response: None,
            method: None,
            awaiting_response: false,
            decoder: None,
            encoder: None,
            head_out: BytesMut::new(),
            discard_input: false,
        }
    }
}

impl OriginConnection for OutboundConnection {
    fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    fn take_response(&mut self) -> Option<ResponseHead> {
        self.response.take()
    }

    fn submit_request(&mut self, request: &RequestHead) -> Result<(), ProxyError> {
        if self.awaiting_response || self.encoder.is_some() {
            return Err(ProtocolError::MessageInProgress.into());
        }
        write_request_head(request, &mut self.head_out);
        self.method = Some(request.method.clone());
        self.awaiting_response = true;
        if request.entity.is_some() {
            self.encoder = Some(EncoderState::for_entity(outgoing_entity(&request.headers)?));
            self.control.request_output();
        }
        Ok(())
    }

    fn reset_input(&mut self) {
        self.decoder = None;
        self.discard_input = true;
    }

    fn pair(&self) -> Option<SharedPair> {
        self.pair.clone()
    }

    fn attach_pair(&mut self, pair: SharedPair) {
        self.pair = Some(pair);
    }
}

struct OriginEndpoint {
    conn: OutboundConnection,
    handler: Arc<dyn OriginEventHandler>,
}

impl OriginEndpoint {
    fn flush_heads(&mut self, io: &mut Session) {
        if !self.conn.head_out.is_empty() {
            io.outbuf.extend_from_slice(&self.conn.head_out);
            self.conn.head_out.clear();
        }
    }

    fn reject(&mut self, io: &mut Session, error: ProtocolError) -> bool {
        io.inbuf.clear();
        self.conn.control.suspend_input();
        self.handler.protocol_error(&mut self.conn, &ProxyError::Protocol(error));
        true
    }

    fn read_head(&mut self, io: &mut Session) -> bool {
        if io.inbuf.is_empty() {
            if io.eof {
                self.conn.control.mark_closed();
                return true;
            }
            return false;
        }
        if !self.conn.awaiting_response {
            return self.reject(io, ProtocolError::UnsolicitedResponse);
        }
        match parse_response_head(&io.inbuf, io.max_head_size()) {
            Ok(Some((head, consumed))) => {
                io.inbuf.advance(consumed);
                if !head.status.is_informational() {
                    self.conn.awaiting_response = false;
                    if body_allowed(self.conn.method.as_ref(), head.status) {
                        self.conn.decoder = head.entity.map(DecoderState::for_entity);
                    }
                }
                self.conn.response = Some(head);
                self.handler.response_received(&mut self.conn);
                self.flush_heads(io);
                true
            }
            Ok(None) if io.eof => {
                tracing::debug!(connection_id = %self.conn.control.id(), "Origin closed inside a response head");
                self.conn.control.mark_closed();
                true
            }
            Ok(None) => false,
            Err(e) => self.reject(io, e),
        }
    }
}

impl Endpoint for OriginEndpoint {
    fn control(&self) -> &ConnectionControl {
        &self.conn.control
    }

    fn dispatch_input(&mut self, io: &mut Session) -> bool {
        if self.conn.discard_input {
            io.inbuf.clear();
            self.conn.discard_input = false;
        }
        let Some(mut state) = self.conn.decoder else {
            return self.read_head(io);
        };
        // A zero-length body is complete as soon as its head is in.
        if io.inbuf.is_empty() && !io.eof && !state.is_done() {
            return false;
        }

        let before = io.inbuf.len();
        {
            let mut decoder = BodyDecoder::new(&mut state, &mut io.inbuf, io.eof);
            self.handler.input_ready(&mut self.conn, &mut decoder);
        }
        if self.conn.decoder.is_some() {
            self.conn.decoder = (!state.is_done()).then_some(state);
        }
        self.flush_heads(io);
        io.inbuf.len() != before || state.is_done()
    }

    fn dispatch_output(&mut self, io: &mut Session) -> bool {
        let Some(mut state) = self.conn.encoder else {
            if self.conn.awaiting_response || !self.conn.control.take_output_interest() {
                return false;
            }
            self.handler.request_ready(&mut self.conn);
            self.flush_heads(io);
            return true;
        };
        if !self.conn.control.wants_output() {
            return false;
        }

        let before = io.outbuf.len();
        let limit = io.out_limit();
        {
            let mut encoder = BodyEncoder::new(&mut state, &mut io.outbuf, limit);
            self.handler.output_ready(&mut self.conn, &mut encoder);
        }
        if self.conn.encoder.is_some() {
            if state.is_done() {
                self.conn.encoder = None;
                self.conn.control.take_output_interest();
            } else {
                self.conn.encoder = Some(state);
            }
        }
        self.flush_heads(io);
        io.outbuf.len() != before || state.is_done()
    }

    fn timeout(&mut self) {
        self.handler.timeout(&mut self.conn);
    }

    fn transport_error(&mut self, error: &io::Error) {
        self.handler.transport_error(&mut self.conn, error);
    }

    fn closed(&mut self) {
        self.handler.closed(&mut self.conn);
    }
}

/// Serves one established origin connection for `pair` until it closes.
pub(crate) async fn serve_origin(
    stream: TcpStream,
    pair: SharedPair,
    handler: Arc<dyn OriginEventHandler>,
    config: SessionConfig,
    guard: ConnectionGuard,
) {
    let span = tracing::debug_span!("origin", connection_id = %guard.id(), pair_id = %pair.id());
    async move {
        let io = match Session::new(stream, config) {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to configure origin socket");
                if let Ok(mut state) = pair.lock() {
                    state.origin_closed = true;
                }
                return;
            }
        };
        let mut endpoint = OriginEndpoint {
            conn: OutboundConnection::new(ConnectionControl::new(guard.id())),
            handler,
        };
        endpoint.handler.connected(&mut endpoint.conn, pair);
        drive(io, &mut endpoint).await;
        drop(guard);
    }
    .instrument(span)
    .await
}
