//! Keep-alive policy.

use http::header::CONNECTION;

use crate::protocol::headers::{tokens, PROXY_CONNECTION};
use crate::protocol::message::{Entity, ProtocolVersion, ResponseHead};
use crate::protocol::processor::ExchangeContext;

/// Decides whether a connection may carry another message after `response`.
pub trait ConnectionReuseStrategy: Send + Sync {
    fn keep_alive(&self, response: &ResponseHead, context: &ExchangeContext<'_>) -> bool;
}

/// HTTP/1.x persistence rules.
///
/// A connection is reused unless it is already closed, the body can only be
/// delimited by closing, the `Connection` (or legacy `Proxy-Connection`)
/// directive says `close`, or the response is HTTP/1.0 without an explicit
/// `keep-alive`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReuseStrategy;

impl ConnectionReuseStrategy for DefaultReuseStrategy {
    fn keep_alive(&self, response: &ResponseHead, context: &ExchangeContext<'_>) -> bool {
        if !context.connection_open {
            return false;
        }

        let version = response.version;
        match response.entity {
            Some(Entity::UntilClose) => return false,
            Some(Entity::Chunked) if version <= ProtocolVersion::HTTP_1_0 => return false,
            _ => {}
        }

        let directive = if response.headers.contains_key(CONNECTION) {
            CONNECTION
        } else {
            PROXY_CONNECTION.clone()
        };
        let mut explicit_keep_alive = false;
        for token in tokens(&response.headers, &directive) {
            if token.eq_ignore_ascii_case("close") {
                return false;
            }
            if token.eq_ignore_ascii_case("keep-alive") {
                explicit_keep_alive = true;
            }
        }
        if explicit_keep_alive {
            return true;
        }

        version > ProtocolVersion::HTTP_1_0
    }
}
