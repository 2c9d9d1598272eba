//! In-flight HTTP message heads.
//!
//! The proxy never buffers whole messages: a head carries the start line, the
//! header block and an [`Entity`] descriptor telling how the body is framed on
//! the wire it arrived from. Body bytes travel separately through the pair's
//! pipe buffers.

use std::fmt;

use http::header::{HeaderMap, HeaderName, HeaderValue, EXPECT};
use http::{Method, StatusCode};

/// Declared protocol version of a message (`HTTP/major.minor`).
///
/// Kept as raw numbers so versions the proxy does not speak (e.g. `HTTP/1.2`)
/// survive parsing and can be downgraded deliberately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const HTTP_1_0: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
    pub const HTTP_1_1: ProtocolVersion = ProtocolVersion { major: 1, minor: 1 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Returns the version unchanged, or HTTP/1.1 when it is newer than that.
    pub fn downgraded(self) -> Self {
        if self > Self::HTTP_1_1 {
            Self::HTTP_1_1
        } else {
            self
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// How a message body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// `Content-Length: n`
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Body runs until the peer closes the connection (responses only).
    UntilClose,
}

impl Entity {
    /// Length of the body when it is known up front.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Entity::Length(n) => Some(*n),
            _ => None,
        }
    }
}

/// Fixed origin server a pair forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetHost {
    pub host: String,
    pub port: u16,
}

impl TargetHost {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Value used for the outgoing `Host` header.
    pub fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Request line, headers and body framing of a request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request target exactly as received (origin-form or absolute-form).
    pub target: String,
    pub version: ProtocolVersion,
    pub headers: HeaderMap,
    pub entity: Option<Entity>,
}

impl RequestHead {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: ProtocolVersion::HTTP_1_1,
            headers: HeaderMap::new(),
            entity: None,
        }
    }

    /// Methods whose requests are defined to carry an enclosed entity.
    pub fn may_enclose_entity(&self) -> bool {
        self.method == Method::POST || self.method == Method::PUT
    }

    /// True when the client asked for a `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.headers.get_all(EXPECT).iter().any(|value| {
            value
                .to_str()
                .map(|v| v.trim().eq_ignore_ascii_case("100-continue"))
                .unwrap_or(false)
        })
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// Status line, headers and body framing of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: ProtocolVersion,
    pub status: StatusCode,
    /// Reason phrase as received; the canonical one is used when absent.
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub entity: Option<Entity>,
}

impl ResponseHead {
    pub fn new(version: ProtocolVersion, status: StatusCode) -> Self {
        Self {
            version,
            status,
            reason: None,
            headers: HeaderMap::new(),
            entity: None,
        }
    }

    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_and_downgrade() {
        let v12 = ProtocolVersion::new(1, 2);
        assert!(v12 > ProtocolVersion::HTTP_1_1);
        assert_eq!(v12.downgraded(), ProtocolVersion::HTTP_1_1);
        assert_eq!(ProtocolVersion::HTTP_1_0.downgraded(), ProtocolVersion::HTTP_1_0);
        assert_eq!(ProtocolVersion::new(2, 0).downgraded().to_string(), "HTTP/1.1");
    }

    #[test]
    fn expect_continue_detection() {
        let req = RequestHead::new(Method::POST, "/upload")
            .header(EXPECT, HeaderValue::from_static("100-Continue"));
        assert!(req.expects_continue());
        assert!(!RequestHead::new(Method::GET, "/").expects_continue());
    }

    #[test]
    fn target_host_header_includes_port() {
        let target = TargetHost::new("origin.internal", 8080);
        assert_eq!(target.host_header(), "origin.internal:8080");
    }
}
