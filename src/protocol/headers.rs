//! Header manipulation shared by both sides of a pair.
//!
//! # Responsibilities
//! - Decide whether a response may carry a body
//! - Strip hop-by-hop and addressing headers before a message is re-framed
//! - Token matching for comma-separated header values

use http::header::{
    HeaderMap, HeaderName, CONNECTION, CONTENT_LENGTH, HOST, SERVER, TRANSFER_ENCODING, USER_AGENT,
};
use http::{Method, StatusCode};

use crate::protocol::message::{RequestHead, ResponseHead};

pub static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
pub static PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");

/// Body rule on raw parts: no body for HEAD, informational statuses,
/// 204 No Content, 205 Reset Content and 304 Not Modified.
pub fn body_allowed(method: Option<&Method>, status: StatusCode) -> bool {
    if method == Some(&Method::HEAD) {
        return false;
    }
    status.as_u16() >= 200
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
        && status != StatusCode::RESET_CONTENT
}

/// Whether `response`, answering `request`, may carry a body.
pub fn can_response_have_body(request: Option<&RequestHead>, response: &ResponseHead) -> bool {
    body_allowed(request.map(|r| &r.method), response.status)
}

/// Removes `Content-Length`, `Transfer-Encoding`, `Server`, `Connection` and `Keep-Alive`.
pub fn strip_response_headers(response: &mut ResponseHead) {
    for name in [CONTENT_LENGTH, TRANSFER_ENCODING, SERVER, CONNECTION] {
        response.headers.remove(name);
    }
    response.headers.remove(&KEEP_ALIVE);
}

/// Removes `Content-Length`, `Transfer-Encoding`, `Host`, `Connection`,
/// `User-Agent` and `Keep-Alive`.
pub fn strip_request_headers(request: &mut RequestHead) {
    for name in [CONTENT_LENGTH, TRANSFER_ENCODING, HOST, CONNECTION, USER_AGENT] {
        request.headers.remove(name);
    }
    request.headers.remove(&KEEP_ALIVE);
}

/// True when any value of `name` lists `token` (case-insensitive).
pub fn contains_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    tokens(headers, name).any(|t| t.eq_ignore_ascii_case(token))
}

/// Iterates the comma-separated tokens of every value of `name`.
pub fn tokens<'a>(headers: &'a HeaderMap, name: &HeaderName) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
