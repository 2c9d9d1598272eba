//! Message head parsing and serialization.
//!
//! Start lines are parsed by hand so that any `HTTP/x.y` version is accepted
//! and preserved; header blocks are handed to `httparse`.

use bytes::BytesMut;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, StatusCode};

use crate::error::ProtocolError;
use crate::protocol::headers::tokens;
use crate::protocol::message::{Entity, ProtocolVersion, RequestHead, ResponseHead};

/// Upper bound on header fields per message.
pub const MAX_HEADERS: usize = 64;

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_version(text: &str) -> Option<ProtocolVersion> {
    let (major, minor) = text.strip_prefix("HTTP/")?.split_once('.')?;
    Some(ProtocolVersion::new(major.parse().ok()?, minor.parse().ok()?))
}

fn header_map(raw: &[httparse::Header<'_>]) -> Result<HeaderMap, ProtocolError> {
    let mut map = HeaderMap::with_capacity(raw.len());
    for h in raw {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| ProtocolError::InvalidHeader(h.name.to_string()))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| ProtocolError::InvalidHeader(h.name.to_string()))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Splits off the start line and parses the header block that follows it.
///
/// Returns `Ok(None)` while the head is incomplete.
fn split_head(buf: &[u8], max_head: usize) -> Result<Option<(&str, HeaderMap, usize)>, ProtocolError> {
    // Tolerate stray CRLFs between messages.
    let mut skip = 0;
    while buf[skip..].starts_with(b"\r\n") {
        skip += 2;
    }
    let rest = &buf[skip..];

    let Some(line_end) = find_crlf(rest) else {
        return if rest.len() > max_head {
            Err(ProtocolError::HeadTooLarge(max_head))
        } else {
            Ok(None)
        };
    };
    let line = std::str::from_utf8(&rest[..line_end]).map_err(|_| ProtocolError::InvalidRequestLine)?;

    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    match httparse::parse_headers(&rest[line_end + 2..], &mut raw) {
        Ok(httparse::Status::Complete((len, parsed))) => {
            let consumed = skip + line_end + 2 + len;
            if consumed > max_head {
                return Err(ProtocolError::HeadTooLarge(max_head));
            }
            Ok(Some((line, header_map(parsed)?, consumed)))
        }
        Ok(httparse::Status::Partial) if rest.len() > max_head => Err(ProtocolError::HeadTooLarge(max_head)),
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(ProtocolError::InvalidHeader(e.to_string())),
    }
}

/// Parses a request head from the front of `buf`.
///
/// On success returns the head and the number of bytes it occupied.
pub fn parse_request_head(buf: &[u8], max_head: usize) -> Result<Option<(RequestHead, usize)>, ProtocolError> {
    let Some((line, headers, consumed)) = split_head(buf, max_head)? else {
        return Ok(None);
    };

    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::InvalidRequestLine);
    };
    if target.is_empty() {
        return Err(ProtocolError::InvalidRequestLine);
    }
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| ProtocolError::InvalidRequestLine)?;
    let version = parse_version(version).ok_or_else(|| ProtocolError::UnsupportedVersion(version.to_string()))?;
    if version.major != 1 {
        return Err(ProtocolError::UnsupportedVersion(version.to_string()));
    }

    let entity = request_entity(&headers)?;
    Ok(Some((
        RequestHead {
            method,
            target: target.to_string(),
            version,
            headers,
            entity,
        },
        consumed,
    )))
}

/// Parses a response head from the front of `buf`.
pub fn parse_response_head(buf: &[u8], max_head: usize) -> Result<Option<(ResponseHead, usize)>, ProtocolError> {
    let Some((line, headers, consumed)) = split_head(buf, max_head)? else {
        return Ok(None);
    };

    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .and_then(parse_version)
        .ok_or(ProtocolError::InvalidStatusLine)?;
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or(ProtocolError::InvalidStatusLine)?;
    let reason = parts.next().map(str::to_string).filter(|r| !r.is_empty());

    let entity = response_entity(status, &headers)?;
    Ok(Some((
        ResponseHead {
            version,
            status,
            reason,
            headers,
            entity,
        },
        consumed,
    )))
}

enum Coding {
    Chunked,
    Other,
    Absent,
}

fn transfer_coding(headers: &HeaderMap) -> Coding {
    let mut last = None;
    for token in tokens(headers, &TRANSFER_ENCODING) {
        if !token.eq_ignore_ascii_case("identity") {
            last = Some(token);
        }
    }
    match last {
        Some(t) if t.eq_ignore_ascii_case("chunked") => Coding::Chunked,
        Some(_) => Coding::Other,
        None => Coding::Absent,
    }
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>, ProtocolError> {
    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(ProtocolError::InvalidContentLength)?;
        match length {
            Some(existing) if existing != parsed => return Err(ProtocolError::InvalidContentLength),
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

/// Body framing of an incoming request. Requests without framing headers,
/// or with `Content-Length: 0`, carry no body.
pub fn request_entity(headers: &HeaderMap) -> Result<Option<Entity>, ProtocolError> {
    match transfer_coding(headers) {
        Coding::Chunked => return Ok(Some(Entity::Chunked)),
        Coding::Other => return Err(ProtocolError::InvalidHeader("Transfer-Encoding".into())),
        Coding::Absent => {}
    }
    Ok(content_length(headers)?.filter(|n| *n > 0).map(Entity::Length))
}

/// Body framing of an incoming response, as declared by its headers.
pub fn response_entity(status: StatusCode, headers: &HeaderMap) -> Result<Option<Entity>, ProtocolError> {
    if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return Ok(None);
    }
    match transfer_coding(headers) {
        Coding::Chunked => return Ok(Some(Entity::Chunked)),
        Coding::Other => return Ok(Some(Entity::UntilClose)),
        Coding::Absent => {}
    }
    Ok(Some(match content_length(headers)? {
        Some(n) => Entity::Length(n),
        None => Entity::UntilClose,
    }))
}

/// Framing of an outgoing body as dictated by its final headers.
pub fn outgoing_entity(headers: &HeaderMap) -> Result<Entity, ProtocolError> {
    match transfer_coding(headers) {
        Coding::Chunked => return Ok(Entity::Chunked),
        Coding::Other => return Ok(Entity::UntilClose),
        Coding::Absent => {}
    }
    Ok(match content_length(headers)? {
        Some(n) => Entity::Length(n),
        None => Entity::UntilClose,
    })
}

fn write_headers(headers: &HeaderMap, out: &mut BytesMut) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

/// Serializes a request line and header block.
pub fn write_request_head(request: &RequestHead, out: &mut BytesMut) {
    let line = format!("{} {} {}\r\n", request.method, request.target, request.version);
    out.extend_from_slice(line.as_bytes());
    write_headers(&request.headers, out);
}

/// Serializes a status line and header block.
pub fn write_response_head(response: &ResponseHead, out: &mut BytesMut) {
    let line = format!(
        "{} {} {}\r\n",
        response.version,
        response.status.as_str(),
        response.reason_phrase()
    );
    out.extend_from_slice(line.as_bytes());
    write_headers(&response.headers, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 8 * 1024;

    #[test]
    fn parses_request_with_future_version() {
        let raw = b"GET / HTTP/1.2\r\nHost: proxy\r\n\r\n";
        let (head, consumed) = parse_request_head(raw, LIMIT).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.target, "/");
        assert_eq!(head.version, ProtocolVersion::new(1, 2));
        assert_eq!(head.headers["host"], "proxy");
        assert!(head.entity.is_none());
    }

    #[test]
    fn incomplete_head_waits_for_more() {
        assert!(parse_request_head(b"POST /a HTTP/1.1\r\nContent-Le", LIMIT)
            .unwrap()
            .is_none());
        assert!(parse_request_head(b"POST /a HT", LIMIT).unwrap().is_none());
    }

    #[test]
    fn leaves_body_bytes_unconsumed() {
        let raw = b"\r\nPOST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (head, consumed) = parse_request_head(raw, LIMIT).unwrap().unwrap();
        assert_eq!(head.entity, Some(Entity::Length(5)));
        assert_eq!(&raw[consumed..], b"hello");
    }

    #[test]
    fn rejects_malformed_request_lines() {
        assert!(parse_request_head(b"GET /\r\n\r\n", LIMIT).is_err());
        assert!(parse_request_head(b"GET / FTP/1.0\r\n\r\n", LIMIT).is_err());
        assert!(parse_request_head(b"GET / HTTP/2.0\r\n\r\n", LIMIT).is_err());
        assert!(parse_request_head(b"GET / HTTP/1.1 extra\r\n\r\n", LIMIT).is_err());
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(200));
        assert!(matches!(
            parse_request_head(&raw, 64),
            Err(ProtocolError::HeadTooLarge(64))
        ));
    }

    #[test]
    fn chunked_wins_over_content_length() {
        let raw = b"PUT /x HTTP/1.1\r\nContent-Length: 10\r\nTransfer-Encoding: gzip, chunked\r\n\r\n";
        let (head, _) = parse_request_head(raw, LIMIT).unwrap().unwrap();
        assert_eq!(head.entity, Some(Entity::Chunked));
    }

    #[test]
    fn conflicting_content_lengths_rejected() {
        let raw = b"PUT /x HTTP/1.1\r\nContent-Length: 10\r\nContent-Length: 11\r\n\r\n";
        assert!(matches!(
            parse_request_head(raw, LIMIT),
            Err(ProtocolError::InvalidContentLength)
        ));
    }

    #[test]
    fn response_framing() {
        let (resp, _) = parse_response_head(b"HTTP/1.1 200 OK\r\n\r\n", LIMIT).unwrap().unwrap();
        assert_eq!(resp.entity, Some(Entity::UntilClose));
        assert_eq!(resp.reason.as_deref(), Some("OK"));

        let (resp, _) = parse_response_head(b"HTTP/1.1 204 No Content\r\n\r\n", LIMIT)
            .unwrap()
            .unwrap();
        assert_eq!(resp.entity, None);

        let (resp, _) = parse_response_head(b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n", LIMIT)
            .unwrap()
            .unwrap();
        assert_eq!(resp.version, ProtocolVersion::HTTP_1_0);
        assert_eq!(resp.entity, Some(Entity::Length(0)));

        let (resp, _) = parse_response_head(b"HTTP/1.1 100\r\n\r\n", LIMIT).unwrap().unwrap();
        assert_eq!(resp.status, StatusCode::CONTINUE);
        assert!(resp.reason.is_none());
    }

    #[test]
    fn serializes_heads() {
        let mut request = RequestHead::new(Method::GET, "/index.html");
        request.headers.insert("host", HeaderValue::from_static("origin:80"));
        let mut out = BytesMut::new();
        write_request_head(&request, &mut out);
        assert_eq!(&out[..], b"GET /index.html HTTP/1.1\r\nhost: origin:80\r\n\r\n");

        let response = ResponseHead::new(ProtocolVersion::HTTP_1_0, StatusCode::BAD_REQUEST);
        let mut out = BytesMut::new();
        write_response_head(&response, &mut out);
        assert_eq!(&out[..], b"HTTP/1.0 400 Bad Request\r\n\r\n");
    }
}
