//! Outgoing message post-processing pipeline.
//!
//! # Responsibilities
//! - Re-derive framing headers from the message entity after hop-by-hop stripping
//! - Add standard identification and connection-management headers
//!
//! # Design Decisions
//! - Interceptors run in registration order and each only adds what is missing
//! - A failing interceptor aborts the pipeline; the caller decides the fallout
//! - Pipelines for each direction are assembled once from configuration and
//!   shared by every pair

use std::time::SystemTime;

use http::header::{
    HeaderValue, CONNECTION, CONTENT_LENGTH, DATE, EXPECT, HOST, SERVER, TRANSFER_ENCODING,
    USER_AGENT,
};
use http::StatusCode;

use crate::error::ProtocolError;
use crate::protocol::message::{Entity, ProtocolVersion, RequestHead, ResponseHead, TargetHost};

/// Per-exchange facts interceptors and the reuse strategy may consult.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeContext<'a> {
    /// Request being answered (client side) or absent.
    pub request: Option<&'a RequestHead>,
    /// Origin the message is addressed to (origin side) or absent.
    pub target: Option<&'a TargetHost>,
    /// Whether the connection carrying the message is still open.
    pub connection_open: bool,
}

impl<'a> ExchangeContext<'a> {
    pub fn new(connection_open: bool) -> Self {
        Self {
            request: None,
            target: None,
            connection_open,
        }
    }

    pub fn with_request(mut self, request: Option<&'a RequestHead>) -> Self {
        self.request = request;
        self
    }

    pub fn with_target(mut self, target: &'a TargetHost) -> Self {
        self.target = Some(target);
        self
    }
}

/// Step applied to every outgoing request.
pub trait RequestInterceptor: Send + Sync {
    fn process(&self, request: &mut RequestHead, context: &ExchangeContext<'_>) -> Result<(), ProtocolError>;
}

/// Step applied to every outgoing response.
pub trait ResponseInterceptor: Send + Sync {
    fn process(&self, response: &mut ResponseHead, context: &ExchangeContext<'_>) -> Result<(), ProtocolError>;
}

/// Ordered interceptor chains for both message directions.
#[derive(Default)]
pub struct HttpProcessor {
    request: Vec<Box<dyn RequestInterceptor>>,
    response: Vec<Box<dyn ResponseInterceptor>>,
}

impl HttpProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.request.push(Box::new(interceptor));
        self
    }

    pub fn with_response_interceptor(mut self, interceptor: impl ResponseInterceptor + 'static) -> Self {
        self.response.push(Box::new(interceptor));
        self
    }

    /// Pipeline for requests forwarded to the origin.
    pub fn for_origin(user_agent: Option<String>, use_expect_continue: bool) -> Self {
        Self::new()
            .with_request_interceptor(RequestContent)
            .with_request_interceptor(RequestTargetHost)
            .with_request_interceptor(RequestConnControl)
            .with_request_interceptor(RequestUserAgent::new(user_agent))
            .with_request_interceptor(RequestExpectContinue::new(use_expect_continue))
    }

    /// Pipeline for responses returned to the client.
    pub fn for_client(origin_server: Option<String>) -> Self {
        Self::new()
            .with_response_interceptor(ResponseDate)
            .with_response_interceptor(ResponseServer::new(origin_server))
            .with_response_interceptor(ResponseContent)
            .with_response_interceptor(ResponseConnControl)
    }

    pub fn process_request(
        &self,
        request: &mut RequestHead,
        context: &ExchangeContext<'_>,
    ) -> Result<(), ProtocolError> {
        for interceptor in &self.request {
            interceptor.process(request, context)?;
        }
        Ok(())
    }

    pub fn process_response(
        &self,
        response: &mut ResponseHead,
        context: &ExchangeContext<'_>,
    ) -> Result<(), ProtocolError> {
        for interceptor in &self.response {
            interceptor.process(response, context)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProcessor")
            .field("request_interceptors", &self.request.len())
            .field("response_interceptors", &self.response.len())
            .finish()
    }
}

fn text_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}

/// Adds `Content-Length` or `Transfer-Encoding: chunked` for entity-enclosing requests.
#[derive(Debug, Clone, Copy)]
pub struct RequestContent;

impl RequestInterceptor for RequestContent {
    fn process(&self, request: &mut RequestHead, _: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if request.entity.is_none() && !request.may_enclose_entity() {
            return Ok(());
        }
        if request.headers.contains_key(TRANSFER_ENCODING) {
            return Err(ProtocolError::HeaderAlreadyPresent("Transfer-Encoding"));
        }
        if request.headers.contains_key(CONTENT_LENGTH) {
            return Err(ProtocolError::HeaderAlreadyPresent("Content-Length"));
        }
        match request.entity {
            None => {
                request.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
            Some(Entity::Length(length)) => {
                request.headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            }
            Some(Entity::Chunked) | Some(Entity::UntilClose) => {
                if request.version <= ProtocolVersion::HTTP_1_0 {
                    return Err(ProtocolError::ChunkedNotAllowed(request.version.to_string()));
                }
                request.headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
        }
        Ok(())
    }
}

/// Adds `Host` naming the target origin.
#[derive(Debug, Clone, Copy)]
pub struct RequestTargetHost;

impl RequestInterceptor for RequestTargetHost {
    fn process(&self, request: &mut RequestHead, context: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if request.headers.contains_key(HOST) {
            return Ok(());
        }
        if let Some(target) = context.target {
            let value = HeaderValue::from_str(&target.host_header())
                .map_err(|_| ProtocolError::InvalidHeader(format!("Host: {target}")))?;
            request.headers.insert(HOST, value);
        }
        Ok(())
    }
}

/// Asks the origin to keep the connection open.
#[derive(Debug, Clone, Copy)]
pub struct RequestConnControl;

impl RequestInterceptor for RequestConnControl {
    fn process(&self, request: &mut RequestHead, _: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if !request.headers.contains_key(CONNECTION) {
            request.headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        }
        Ok(())
    }
}

/// Adds the configured `User-Agent`.
#[derive(Debug, Clone)]
pub struct RequestUserAgent {
    value: Option<HeaderValue>,
}

impl RequestUserAgent {
    pub fn new(user_agent: Option<String>) -> Self {
        Self {
            value: user_agent.as_deref().and_then(text_value),
        }
    }
}

impl RequestInterceptor for RequestUserAgent {
    fn process(&self, request: &mut RequestHead, _: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if let Some(value) = &self.value {
            if !request.headers.contains_key(USER_AGENT) {
                request.headers.insert(USER_AGENT, value.clone());
            }
        }
        Ok(())
    }
}

/// Adds `Expect: 100-continue` to HTTP/1.1 requests with a body when enabled.
#[derive(Debug, Clone, Copy)]
pub struct RequestExpectContinue {
    enabled: bool,
}

impl RequestExpectContinue {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl RequestInterceptor for RequestExpectContinue {
    fn process(&self, request: &mut RequestHead, _: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if self.enabled
            && request.entity.is_some()
            && request.version >= ProtocolVersion::HTTP_1_1
            && !request.expects_continue()
        {
            request.headers.append(EXPECT, HeaderValue::from_static("100-continue"));
        }
        Ok(())
    }
}

/// Adds `Date` to final responses.
#[derive(Debug, Clone, Copy)]
pub struct ResponseDate;

impl ResponseInterceptor for ResponseDate {
    fn process(&self, response: &mut ResponseHead, _: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if response.status.as_u16() >= 200 && !response.headers.contains_key(DATE) {
            let now = httpdate::fmt_http_date(SystemTime::now());
            if let Some(value) = text_value(&now) {
                response.headers.insert(DATE, value);
            }
        }
        Ok(())
    }
}

/// Adds the configured `Server` identification.
#[derive(Debug, Clone)]
pub struct ResponseServer {
    value: Option<HeaderValue>,
}

impl ResponseServer {
    pub fn new(origin_server: Option<String>) -> Self {
        Self {
            value: origin_server.as_deref().and_then(text_value),
        }
    }
}

impl ResponseInterceptor for ResponseServer {
    fn process(&self, response: &mut ResponseHead, _: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if let Some(value) = &self.value {
            if !response.headers.contains_key(SERVER) {
                response.headers.insert(SERVER, value.clone());
            }
        }
        Ok(())
    }
}

/// Derives response framing headers from the entity.
#[derive(Debug, Clone, Copy)]
pub struct ResponseContent;

impl ResponseInterceptor for ResponseContent {
    fn process(&self, response: &mut ResponseHead, _: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if response.headers.contains_key(TRANSFER_ENCODING) {
            return Err(ProtocolError::HeaderAlreadyPresent("Transfer-Encoding"));
        }
        if response.headers.contains_key(CONTENT_LENGTH) {
            return Err(ProtocolError::HeaderAlreadyPresent("Content-Length"));
        }
        let status = response.status;
        if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        match response.entity {
            Some(Entity::Length(length)) => {
                response.headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            }
            Some(Entity::Chunked) | Some(Entity::UntilClose) => {
                if response.version >= ProtocolVersion::HTTP_1_1 {
                    response.headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                }
            }
            None if status != StatusCode::RESET_CONTENT => {
                response.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
            None => {}
        }
        Ok(())
    }
}

/// Decides the `Connection` directive sent to the client.
#[derive(Debug, Clone, Copy)]
pub struct ResponseConnControl;

impl ResponseConnControl {
    fn forces_close(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::BAD_REQUEST
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::LENGTH_REQUIRED
                | StatusCode::PAYLOAD_TOO_LARGE
                | StatusCode::URI_TOO_LONG
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::NOT_IMPLEMENTED
        )
    }
}

impl ResponseInterceptor for ResponseConnControl {
    fn process(&self, response: &mut ResponseHead, context: &ExchangeContext<'_>) -> Result<(), ProtocolError> {
        if Self::forces_close(response.status) {
            response.headers.insert(CONNECTION, HeaderValue::from_static("Close"));
            return Ok(());
        }
        let close_delimited = match response.entity {
            Some(Entity::UntilClose) | Some(Entity::Chunked) => response.version <= ProtocolVersion::HTTP_1_0,
            _ => false,
        };
        if close_delimited {
            response.headers.insert(CONNECTION, HeaderValue::from_static("Close"));
            return Ok(());
        }
        if let Some(value) = context.request.and_then(|r| r.headers.get(CONNECTION)) {
            response.headers.insert(CONNECTION, value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn ok(entity: Option<Entity>) -> ResponseHead {
        let mut response = ResponseHead::new(ProtocolVersion::HTTP_1_1, StatusCode::OK);
        response.entity = entity;
        response
    }

    #[test]
    fn origin_pipeline_adds_standard_headers() {
        let processor = HttpProcessor::for_origin(Some("tandem-proxy/0.1".into()), false);
        let target = TargetHost::new("origin.local", 8080);
        let mut request = RequestHead::new(Method::POST, "/upload");
        request.entity = Some(Entity::Length(42));

        let context = ExchangeContext::new(true).with_target(&target);
        processor.process_request(&mut request, &context).unwrap();

        assert_eq!(request.headers[CONTENT_LENGTH], "42");
        assert_eq!(request.headers[HOST], "origin.local:8080");
        assert_eq!(request.headers[CONNECTION], "Keep-Alive");
        assert_eq!(request.headers[USER_AGENT], "tandem-proxy/0.1");
        assert!(!request.headers.contains_key(EXPECT));
    }

    #[test]
    fn chunked_request_rejected_for_http_1_0() {
        let mut request = RequestHead::new(Method::POST, "/");
        request.version = ProtocolVersion::HTTP_1_0;
        request.entity = Some(Entity::Chunked);
        let err = RequestContent
            .process(&mut request, &ExchangeContext::new(true))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ChunkedNotAllowed(_)));
    }

    #[test]
    fn post_without_body_gets_zero_length() {
        let mut request = RequestHead::new(Method::POST, "/");
        RequestContent.process(&mut request, &ExchangeContext::new(true)).unwrap();
        assert_eq!(request.headers[CONTENT_LENGTH], "0");

        let mut get = RequestHead::new(Method::GET, "/");
        RequestContent.process(&mut get, &ExchangeContext::new(true)).unwrap();
        assert!(!get.headers.contains_key(CONTENT_LENGTH));
    }

    #[test]
    fn framing_headers_must_be_stripped_first() {
        let mut request = RequestHead::new(Method::PUT, "/")
            .header(CONTENT_LENGTH, HeaderValue::from_static("3"));
        request.entity = Some(Entity::Length(3));
        assert!(RequestContent.process(&mut request, &ExchangeContext::new(true)).is_err());
    }

    #[test]
    fn expect_continue_only_when_enabled() {
        let mut request = RequestHead::new(Method::PUT, "/");
        request.entity = Some(Entity::Length(3));
        RequestExpectContinue::new(true)
            .process(&mut request, &ExchangeContext::new(true))
            .unwrap();
        assert!(request.expects_continue());
    }

    #[test]
    fn client_pipeline_reframes_unknown_length_as_chunked() {
        let processor = HttpProcessor::for_client(Some("tandem-proxy/0.1".into()));
        let mut response = ok(Some(Entity::UntilClose));
        processor
            .process_response(&mut response, &ExchangeContext::new(true))
            .unwrap();
        assert_eq!(response.headers[TRANSFER_ENCODING], "chunked");
        assert_eq!(response.headers[SERVER], "tandem-proxy/0.1");
        assert!(response.headers.contains_key(DATE));
        assert!(!response.headers.contains_key(CONNECTION));
    }

    #[test]
    fn http_1_0_unknown_length_closes() {
        let mut response = ok(Some(Entity::UntilClose));
        response.version = ProtocolVersion::HTTP_1_0;
        let context = ExchangeContext::new(true);
        ResponseContent.process(&mut response, &context).unwrap();
        ResponseConnControl.process(&mut response, &context).unwrap();
        assert!(!response.headers.contains_key(TRANSFER_ENCODING));
        assert_eq!(response.headers[CONNECTION], "Close");
    }

    #[test]
    fn connection_directive_copied_from_request() {
        let request = RequestHead::new(Method::GET, "/")
            .header(CONNECTION, HeaderValue::from_static("close"));
        let mut response = ok(Some(Entity::Length(2)));
        let context = ExchangeContext::new(true).with_request(Some(&request));
        ResponseConnControl.process(&mut response, &context).unwrap();
        assert_eq!(response.headers[CONNECTION], "close");
    }

    #[test]
    fn bad_request_always_closes() {
        let mut response = ResponseHead::new(ProtocolVersion::HTTP_1_0, StatusCode::BAD_REQUEST);
        ResponseConnControl
            .process(&mut response, &ExchangeContext::new(true))
            .unwrap();
        assert_eq!(response.headers[CONNECTION], "Close");
    }

    #[test]
    fn no_content_has_no_framing() {
        let mut response = ResponseHead::new(ProtocolVersion::HTTP_1_1, StatusCode::NO_CONTENT);
        ResponseContent
            .process(&mut response, &ExchangeContext::new(true))
            .unwrap();
        assert!(response.headers.is_empty());
    }
}
