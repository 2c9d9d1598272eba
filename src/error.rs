//! Error taxonomy for the proxy core.
//!
//! # Categories
//! - `IllegalState`: an event fired while the pair's state does not admit it.
//!   Always fatal for the affected connection.
//! - `Io`: transport failure on one connection. Always an abrupt shutdown.
//! - `Protocol`: malformed or unframeable HTTP. Client-side protocol errors are
//!   answered with a synthesized 400 before closing.
//!
//! # Design Decisions
//! - No retries anywhere in the core
//! - Handlers propagate with `?` internally; the public callbacks apply the
//!   shutdown policy in one place

use thiserror::Error;

use crate::pair::Side;

/// Errors raised while driving a connection pair.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// An event was delivered outside its admissible source states.
    #[error("{event} is not admissible in {side} state {state}")]
    IllegalState {
        side: Side,
        event: &'static str,
        state: &'static str,
    },

    /// The pair holds no request although the event requires one.
    #[error("no request stored on the pair")]
    MissingRequest,

    /// The pair holds no response although the event requires one.
    #[error("no response stored on the pair")]
    MissingResponse,

    /// The connection has no pair attached.
    #[error("connection is not attached to a pair")]
    Detached,

    /// The origin connection of this pair has already gone away.
    #[error("origin connection of the pair is closed")]
    OriginGone,

    /// A previous callback panicked while holding the pair lock.
    #[error("pair state lock poisoned")]
    PairPoisoned,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// HTTP protocol violations detected by the codec or the post-processing pipeline.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request line")]
    InvalidRequestLine,

    #[error("malformed status line")]
    InvalidStatusLine,

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("invalid Content-Length value")]
    InvalidContentLength,

    #[error("malformed chunk framing")]
    InvalidChunk,

    #[error("{0} header already present")]
    HeaderAlreadyPresent(&'static str),

    #[error("chunked transfer encoding not allowed for {0}")]
    ChunkedNotAllowed(String),

    #[error("message body shorter than declared, {0} bytes missing")]
    IncompleteBody(u64),

    #[error("body exceeds declared Content-Length")]
    BodyOverrun,

    #[error("a message is already in progress on this connection")]
    MessageInProgress,

    #[error("response received without an outstanding request")]
    UnsolicitedResponse,
}

impl ProxyError {
    /// Short label used for shutdown metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::IllegalState { .. }
            | ProxyError::MissingRequest
            | ProxyError::MissingResponse
            | ProxyError::Detached => "illegal_state",
            ProxyError::OriginGone => "origin_gone",
            ProxyError::PairPoisoned => "poisoned",
            ProxyError::Protocol(_) => "protocol_error",
            ProxyError::Io(_) => "io_error",
        }
    }
}

impl ProtocolError {
    /// Maps framing failures that surface from byte transfer into an I/O error.
    pub fn into_io(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, self)
    }
}
