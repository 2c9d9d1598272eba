//! Fixed-capacity single-producer/single-consumer byte pipe.
//!
//! One side of a pair fills the pipe from a [`ContentDecoder`], the other
//! drains it into a [`ContentEncoder`]. The capacity never changes: a full
//! pipe is the producer's cue to suspend input, which is how back-pressure
//! crosses from one connection to the other.

use std::io;

use crate::transport::{ContentDecoder, ContentEncoder};

/// Bounded byte pipe with read and write cursors.
#[derive(Debug)]
pub struct PipeBuffer {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl PipeBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes written and not yet consumed.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn has_pending(&self) -> bool {
        !self.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Pending bytes in order.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Pulls body bytes from `decoder` into the free space.
    pub fn fill_from(&mut self, decoder: &mut dyn ContentDecoder) -> io::Result<usize> {
        self.compact();
        let n = decoder.read(&mut self.data[self.end..])?;
        self.end += n;
        Ok(n)
    }

    /// Pushes pending bytes into `encoder`.
    pub fn drain_into(&mut self, encoder: &mut dyn ContentEncoder) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let n = encoder.write(&self.data[self.start..self.end])?;
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        Ok(n)
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Source(Vec<u8>);

    impl ContentDecoder for Source {
        fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
            let n = dst.len().min(self.0.len());
            dst[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }

        fn is_completed(&self) -> bool {
            self.0.is_empty()
        }
    }

    struct Sink {
        out: Vec<u8>,
        per_write: usize,
    }

    impl ContentEncoder for Sink {
        fn write(&mut self, src: &[u8]) -> io::Result<usize> {
            let n = src.len().min(self.per_write);
            self.out.extend_from_slice(&src[..n]);
            Ok(n)
        }

        fn complete(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn is_completed(&self) -> bool {
            false
        }
    }

    #[test]
    fn fill_stops_at_capacity() {
        let mut pipe = PipeBuffer::with_capacity(8);
        let mut source = Source(b"0123456789abc".to_vec());
        assert_eq!(pipe.fill_from(&mut source).unwrap(), 8);
        assert!(pipe.is_full());
        assert_eq!(pipe.fill_from(&mut source).unwrap(), 0);
        assert_eq!(pipe.pending(), b"01234567");
    }

    #[test]
    fn partial_drain_then_refill_preserves_order() {
        let mut pipe = PipeBuffer::with_capacity(8);
        let mut source = Source(b"0123456789abc".to_vec());
        let mut sink = Sink {
            out: Vec::new(),
            per_write: 3,
        };
        pipe.fill_from(&mut source).unwrap();
        assert_eq!(pipe.drain_into(&mut sink).unwrap(), 3);
        assert_eq!(pipe.len(), 5);
        assert_eq!(pipe.fill_from(&mut source).unwrap(), 3);
        while pipe.has_pending() || !source.0.is_empty() {
            pipe.drain_into(&mut sink).unwrap();
            pipe.fill_from(&mut source).unwrap();
        }
        assert_eq!(sink.out, b"0123456789abc");
        assert!(pipe.is_empty());
    }

    #[test]
    fn draining_empty_pipe_is_noop() {
        let mut pipe = PipeBuffer::with_capacity(4);
        let mut sink = Sink {
            out: Vec::new(),
            per_write: 4,
        };
        assert_eq!(pipe.drain_into(&mut sink).unwrap(), 0);
        assert!(sink.out.is_empty());
    }
}
