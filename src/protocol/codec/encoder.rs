//! Incremental body encoding into a bounded output buffer.

use std::io;

use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::protocol::message::Entity;
use crate::transport::ContentEncoder;

// Room reserved for a chunk header and its trailing CRLF.
const CHUNK_OVERHEAD: usize = 12;

/// Progress through one outgoing body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Length(u64),
    Chunked,
    Identity,
    Done,
}

impl EncoderState {
    pub fn for_entity(entity: Entity) -> Self {
        match entity {
            Entity::Length(n) => EncoderState::Length(n),
            Entity::Chunked => EncoderState::Chunked,
            Entity::UntilClose => EncoderState::Identity,
        }
    }

    pub fn is_done(&self) -> bool {
        *self == EncoderState::Done
    }
}

/// Encoder view over a connection's pending output.
///
/// Writes stop once `dst` reaches `limit` bytes so that a slow peer applies
/// back-pressure instead of growing the buffer.
pub struct BodyEncoder<'a> {
    state: &'a mut EncoderState,
    dst: &'a mut BytesMut,
    limit: usize,
}

impl<'a> BodyEncoder<'a> {
    pub fn new(state: &'a mut EncoderState, dst: &'a mut BytesMut, limit: usize) -> Self {
        Self { state, dst, limit }
    }

    fn room(&self) -> usize {
        self.limit.saturating_sub(self.dst.len())
    }
}

impl ContentEncoder for BodyEncoder<'_> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let room = self.room();
        match *self.state {
            EncoderState::Done => Err(io::Error::other("body already completed")),
            EncoderState::Length(remaining) => {
                if remaining == 0 {
                    return Err(ProtocolError::BodyOverrun.into_io());
                }
                let n = src.len().min(room).min(usize::try_from(remaining).unwrap_or(usize::MAX));
                self.dst.extend_from_slice(&src[..n]);
                *self.state = EncoderState::Length(remaining - n as u64);
                Ok(n)
            }
            EncoderState::Chunked => {
                if room <= CHUNK_OVERHEAD {
                    return Ok(0);
                }
                let n = src.len().min(room - CHUNK_OVERHEAD);
                self.dst.extend_from_slice(format!("{n:x}\r\n").as_bytes());
                self.dst.extend_from_slice(&src[..n]);
                self.dst.extend_from_slice(b"\r\n");
                Ok(n)
            }
            EncoderState::Identity => {
                let n = src.len().min(room);
                self.dst.extend_from_slice(&src[..n]);
                Ok(n)
            }
        }
    }

    fn complete(&mut self) -> io::Result<()> {
        match *self.state {
            EncoderState::Length(remaining) if remaining > 0 => {
                return Err(ProtocolError::IncompleteBody(remaining).into_io());
            }
            EncoderState::Chunked => self.dst.extend_from_slice(b"0\r\n\r\n"),
            _ => {}
        }
        *self.state = EncoderState::Done;
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state.is_done()
    }
}
