//! Client-facing connections accepted by the listener.
//!
//! # Data Flow
//! ```text
//! client ──▶ Session::inbuf ──parse_request_head──▶ request_received
//!                          └──BodyDecoder──▶ input_ready ──▶ request pipe
//! response pipe ──▶ output_ready ──BodyEncoder──▶ Session::outbuf ──▶ client
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use http::Method;
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::error::{ProtocolError, ProxyError};
use crate::net::connection::{ConnectionControl, ConnectionGuard};
use crate::net::session::{drive, Endpoint, Session, SessionConfig};
use crate::pair::SharedPair;
use crate::protocol::codec::{outgoing_entity, parse_request_head, write_response_head, BodyDecoder, BodyEncoder, DecoderState, EncoderState};
use crate::protocol::headers::body_allowed;
use crate::protocol::message::{RequestHead, ResponseHead};
use crate::transport::{ClientConnection, ClientEventHandler, ControlHandle, IoControl};

/// Per-connection message state of a client connection.
pub struct InboundConnection {
    control: Arc<ConnectionControl>,
    pair: Option<SharedPair>,
    request: Option<RequestHead>,
    /// Method of the request being answered; decides whether a response has a body.
    method: Option<Method>,
    decoder: Option<DecoderState>,
    encoder: Option<EncoderState>,
    head_out: BytesMut,
    discard_input: bool,
}

impl InboundConnection {
    fn new(control: Arc<ConnectionControl>) -> Self {
        Self {
            control,
            pair: None,
            request: None,
            method: None,
            decoder: None,
            encoder: None,
            head_out: BytesMut::new(),
            discard_input: false,
        }
    }
}

impl ClientConnection for InboundConnection {
    fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    fn take_request(&mut self) -> Option<RequestHead> {
        self.request.take()
    }

    fn submit_response(&mut self, response: &ResponseHead) -> Result<(), ProxyError> {
        if self.encoder.is_some() {
            return Err(ProtocolError::MessageInProgress.into());
        }
        write_response_head(response, &mut self.head_out);
        if response.status.is_informational() {
            return Ok(());
        }
        if body_allowed(self.method.as_ref(), response.status) && response.entity.is_some() {
            self.encoder = Some(EncoderState::for_entity(outgoing_entity(&response.headers)?));
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

/// Binds an [`InboundConnection`] to its handler for the session loop.
struct ClientEndpoint {
    conn: InboundConnection,
    handler: Arc<dyn ClientEventHandler>,
}

impl ClientEndpoint {
    fn flush_heads(&mut self, io: &mut Session) {
        if !self.conn.head_out.is_empty() {
            io.outbuf.extend_from_slice(&self.conn.head_out);
            self.conn.head_out.clear();
        }
    }

    fn read_head(&mut self, io: &mut Session) -> bool {
        if io.inbuf.is_empty() {
            if io.eof {
                self.conn.control.mark_closed();
                return true;
            }
            return false;
        }
        match parse_request_head(&io.inbuf, io.max_head_size()) {
            Ok(Some((head, consumed))) => {
                io.inbuf.advance(consumed);
                self.conn.method = Some(head.method.clone());
                self.conn.decoder = head.entity.map(DecoderState::for_entity);
                self.conn.request = Some(head);
                self.handler.request_received(&mut self.conn);
                self.flush_heads(io);
                true
            }
            Ok(None) if io.eof => {
                tracing::debug!(connection_id = %self.conn.control.id(), "Client closed inside a request head");
                self.conn.control.mark_closed();
                true
            }
            Ok(None) => false,
            Err(e) => {
                io.inbuf.clear();
                self.conn.control.suspend_input();
                self.handler.protocol_error(&mut self.conn, &ProxyError::Protocol(e));
                self.flush_heads(io);
                true
            }
        }
    }
}

impl Endpoint for ClientEndpoint {
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
            if !self.conn.control.take_output_interest() {
                return false;
            }
            self.handler.response_ready(&mut self.conn);
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

/// Serves one accepted client connection until it closes.
pub(crate) async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn ClientEventHandler>,
    config: SessionConfig,
    guard: ConnectionGuard,
) {
    let span = tracing::debug_span!("client", connection_id = %guard.id(), peer = %peer);
    async move {
        let io = match Session::new(stream, config) {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to configure client socket");
                return;
            }
        };
        let mut endpoint = ClientEndpoint {
            conn: InboundConnection::new(ConnectionControl::new(guard.id())),
            handler,
        };
        endpoint.handler.connected(&mut endpoint.conn);
        drive(io, &mut endpoint).await;
        drop(guard);
    }
    .instrument(span)
    .await
}
