//! Incremental body decoding.
//!
//! A [`DecoderState`] lives on the connection between reads. Every
//! `input_ready` callback borrows it together with the buffered input as a
//! [`BodyDecoder`], which hands de-framed body bytes to the handler.

use std::io;

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::message::Entity;
use crate::transport::ContentDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

/// Progress through one incoming body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderState {
    framing: Framing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(u64),
    Chunked(ChunkPhase),
    UntilClose,
    Done,
}

impl DecoderState {
    pub fn for_entity(entity: Entity) -> Self {
        let framing = match entity {
            Entity::Length(0) => Framing::Done,
            Entity::Length(n) => Framing::Length(n),
            Entity::Chunked => Framing::Chunked(ChunkPhase::Size),
            Entity::UntilClose => Framing::UntilClose,
        };
        Self { framing }
    }

    pub fn is_done(&self) -> bool {
        self.framing == Framing::Done
    }
}

/// Decoder view over a connection's buffered input.
pub struct BodyDecoder<'a> {
    state: &'a mut DecoderState,
    src: &'a mut BytesMut,
    eof: bool,
}

impl<'a> BodyDecoder<'a> {
    /// `eof` tells the decoder the peer has finished sending.
    pub fn new(state: &'a mut DecoderState, src: &'a mut BytesMut, eof: bool) -> Self {
        Self { state, src, eof }
    }

    fn truncated(&self) -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed inside message body")
    }

    fn copy(&mut self, dst: &mut [u8], limit: u64) -> usize {
        let n = dst.len().min(self.src.len()).min(usize::try_from(limit).unwrap_or(usize::MAX));
        dst[..n].copy_from_slice(&self.src[..n]);
        self.src.advance(n);
        n
    }

    /// Consumes one CRLF-terminated line, returning its content.
    fn take_line(&mut self) -> Option<BytesMut> {
        let end = self.src.windows(2).position(|w| w == b"\r\n")?;
        let line = self.src.split_to(end);
        self.src.advance(2);
        Some(line)
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidChunk)?;
    let size = text.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size, 16).map_err(|_| ProtocolError::InvalidChunk)
}

impl ContentDecoder for BodyDecoder<'_> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        loop {
            let room = dst.len() - written;
            match self.state.framing {
                Framing::Done => break,
                Framing::Length(remaining) => {
                    if room == 0 {
                        break;
                    }
                    let n = self.copy(&mut dst[written..], remaining);
                    written += n;
                    let left = remaining - n as u64;
                    self.state.framing = if left == 0 { Framing::Done } else { Framing::Length(left) };
                    if left > 0 && self.src.is_empty() && self.eof {
                        return Err(self.truncated());
                    }
                    break;
                }
                Framing::UntilClose => {
                    let n = self.copy(&mut dst[written..], u64::MAX);
                    written += n;
                    if self.src.is_empty() && self.eof {
                        self.state.framing = Framing::Done;
                    }
                    break;
                }
                Framing::Chunked(ChunkPhase::Size) => match self.take_line() {
                    Some(line) => {
                        let size = parse_chunk_size(&line).map_err(ProtocolError::into_io)?;
                        self.state.framing = Framing::Chunked(if size == 0 {
                            ChunkPhase::Trailer
                        } else {
                            ChunkPhase::Data(size)
                        });
                    }
                    None if self.eof => return Err(self.truncated()),
                    None => break,
                },
                Framing::Chunked(ChunkPhase::Data(remaining)) => {
                    if room == 0 {
                        break;
                    }
                    let n = self.copy(&mut dst[written..], remaining);
                    if n == 0 {
                        if self.eof {
                            return Err(self.truncated());
                        }
                        break;
                    }
                    written += n;
                    let left = remaining - n as u64;
                    self.state.framing = Framing::Chunked(if left == 0 {
                        ChunkPhase::DataEnd
                    } else {
                        ChunkPhase::Data(left)
                    });
                }
                Framing::Chunked(ChunkPhase::DataEnd) => {
                    if self.src.len() < 2 {
                        if self.eof {
                            return Err(self.truncated());
                        }
                        break;
                    }
                    if &self.src[..2] != b"\r\n" {
                        return Err(ProtocolError::InvalidChunk.into_io());
                    }
                    self.src.advance(2);
                    self.state.framing = Framing::Chunked(ChunkPhase::Size);
                }
                Framing::Chunked(ChunkPhase::Trailer) => match self.take_line() {
                    // Trailer fields are dropped; the blank line ends the body.
                    Some(line) if line.is_empty() => self.state.framing = Framing::Done,
                    Some(_) => {}
                    None if self.eof => return Err(self.truncated()),
                    None => break,
                },
            }
        }
        Ok(written)
    }

    fn is_completed(&self) -> bool {
        self.state.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(entity: Entity, wire: &[u8], eof: bool, step: usize) -> io::Result<(Vec<u8>, DecoderState, BytesMut)> {
        let mut state = DecoderState::for_entity(entity);
        let mut src = BytesMut::from(wire);
        let mut out = Vec::new();
        let mut buf = vec![0u8; step];
        loop {
            let mut decoder = BodyDecoder::new(&mut state, &mut src, eof);
            let n = decoder.read(&mut buf)?;
            out.extend_from_slice(&buf[..n]);
            if n == 0 || decoder.is_completed() {
                break;
            }
        }
        Ok((out, state, src))
    }

    #[test]
    fn length_body_stops_at_declared_size() {
        let (body, state, rest) = drain(Entity::Length(5), b"helloGET /", false, 3).unwrap();
        assert_eq!(body, b"hello");
        assert!(state.is_done());
        assert_eq!(&rest[..], b"GET /");
    }

    #[test]
    fn zero_length_is_immediately_complete() {
        let state = DecoderState::for_entity(Entity::Length(0));
        assert!(state.is_done());
    }

    #[test]
    fn chunked_body_with_extensions_and_trailers() {
        let wire = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nExpires: never\r\n\r\nNEXT";
        let (body, state, rest) = drain(Entity::Chunked, wire, false, 4).unwrap();
        assert_eq!(body, b"Wikipedia");
        assert!(state.is_done());
        assert_eq!(&rest[..], b"NEXT");
    }

    #[test]
    fn chunked_waits_for_partial_size_line() {
        let (body, state, rest) = drain(Entity::Chunked, b"4\r\nWi", false, 16).unwrap();
        assert_eq!(body, b"Wi");
        assert!(!state.is_done());
        assert!(rest.is_empty());
    }

    #[test]
    fn malformed_chunk_is_invalid_data() {
        let err = drain(Entity::Chunked, b"zz\r\n", false, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = drain(Entity::Chunked, b"2\r\nabXX", false, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn until_close_completes_on_eof() {
        let (body, state, _) = drain(Entity::UntilClose, b"tail", false, 16).unwrap();
        assert_eq!(body, b"tail");
        assert!(!state.is_done());

        let (body, state, _) = drain(Entity::UntilClose, b"tail", true, 16).unwrap();
        assert_eq!(body, b"tail");
        assert!(state.is_done());
    }

    #[test]
    fn truncated_length_body_fails_on_eof() {
        let err = drain(Entity::Length(10), b"abc", true, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
