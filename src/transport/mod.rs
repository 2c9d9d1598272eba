//! Seams between the proxy core and the I/O layer that drives it.
//!
//! # Responsibilities
//! - Readiness control over one connection (`IoControl`)
//! - Body transfer abstractions handed to input/output callbacks
//! - Connection views the handlers operate on
//! - Lifecycle callbacks a reactor delivers for each connection kind
//!
//! # Design Decisions
//! - The core never touches sockets; everything it needs is expressed here
//! - Control handles are shared (`Arc`) so one side of a pair can steer the
//!   other without owning its connection
//! - Interest changes are idempotent and safe to repeat

use std::io;
use std::sync::Arc;

use crate::error::ProxyError;
use crate::pair::SharedPair;
use crate::protocol::message::{RequestHead, ResponseHead, TargetHost};

/// Readiness interest and teardown for a single connection.
pub trait IoControl: Send + Sync {
    fn request_input(&self);
    fn suspend_input(&self);
    fn request_output(&self);
    fn suspend_output(&self);

    /// Abrupt close, discarding pending output. Safe to call repeatedly.
    fn shutdown(&self) -> io::Result<()>;

    /// Graceful close once pending output has been flushed.
    fn close(&self) -> io::Result<()>;

    fn is_open(&self) -> bool;
}

/// Shared handle to a connection's [`IoControl`].
pub type ControlHandle = Arc<dyn IoControl>;

/// Source of de-framed body bytes.
pub trait ContentDecoder {
    /// Reads as many body bytes as fit into `dst`; may return 0.
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize>;

    fn is_completed(&self) -> bool;
}

/// Sink framing body bytes onto the wire.
pub trait ContentEncoder {
    /// Accepts as many bytes of `src` as the output can take; may return 0.
    fn write(&mut self, src: &[u8]) -> io::Result<usize>;

    /// Marks the body as finished and writes any closing framing.
    fn complete(&mut self) -> io::Result<()>;

    fn is_completed(&self) -> bool;
}

/// Client-facing connection as seen by the client-side handler.
pub trait ClientConnection: Send {
    fn control(&self) -> ControlHandle;

    /// Removes the request whose head was just received.
    fn take_request(&mut self) -> Option<RequestHead>;

    /// Queues a response head; a body encoder follows when the response
    /// carries one.
    fn submit_response(&mut self, response: &ResponseHead) -> Result<(), ProxyError>;

    /// Drops buffered input of the current message.
    fn reset_input(&mut self);

    fn pair(&self) -> Option<SharedPair>;

    fn attach_pair(&mut self, pair: SharedPair);

    fn is_open(&self) -> bool {
        self.control().is_open()
    }
}

/// Origin-facing connection as seen by the origin-side handler.
pub trait OriginConnection: Send {
    fn control(&self) -> ControlHandle;

    /// Removes the response whose head was just received.
    fn take_response(&mut self) -> Option<ResponseHead>;

    /// Queues a request head; a body encoder follows when the request
    /// carries one.
    fn submit_request(&mut self, request: &RequestHead) -> Result<(), ProxyError>;

    /// Drops buffered input of the current message.
    fn reset_input(&mut self);

    fn pair(&self) -> Option<SharedPair>;

    fn attach_pair(&mut self, pair: SharedPair);

    fn is_open(&self) -> bool {
        self.control().is_open()
    }
}

/// Lifecycle callbacks for client-facing connections.
pub trait ClientEventHandler: Send + Sync {
    fn connected(&self, conn: &mut dyn ClientConnection);
    fn request_received(&self, conn: &mut dyn ClientConnection);
    fn input_ready(&self, conn: &mut dyn ClientConnection, decoder: &mut dyn ContentDecoder);
    fn response_ready(&self, conn: &mut dyn ClientConnection);
    fn output_ready(&self, conn: &mut dyn ClientConnection, encoder: &mut dyn ContentEncoder);
    fn closed(&self, conn: &mut dyn ClientConnection);
    fn protocol_error(&self, conn: &mut dyn ClientConnection, error: &ProxyError);
    fn transport_error(&self, conn: &mut dyn ClientConnection, error: &io::Error);
    fn timeout(&self, conn: &mut dyn ClientConnection);
}

/// Lifecycle callbacks for origin-facing connections.
pub trait OriginEventHandler: Send + Sync {
    fn connected(&self, conn: &mut dyn OriginConnection, pair: SharedPair);
    fn request_ready(&self, conn: &mut dyn OriginConnection);
    fn output_ready(&self, conn: &mut dyn OriginConnection, encoder: &mut dyn ContentEncoder);
    fn response_received(&self, conn: &mut dyn OriginConnection);
    fn input_ready(&self, conn: &mut dyn OriginConnection, decoder: &mut dyn ContentDecoder);
    fn closed(&self, conn: &mut dyn OriginConnection);
    fn protocol_error(&self, conn: &mut dyn OriginConnection, error: &ProxyError);
    fn transport_error(&self, conn: &mut dyn OriginConnection, error: &io::Error);
    fn timeout(&self, conn: &mut dyn OriginConnection);
}

/// Opens origin connections on behalf of new pairs.
///
/// `connect` returns immediately; the pair is handed back through
/// [`OriginEventHandler::connected`] once the connection is established.
pub trait Connector: Send + Sync {
    fn connect(&self, target: &TargetHost, pair: SharedPair);
}
