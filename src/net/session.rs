//! Readiness-driven I/O loop shared by client and origin connections.
//!
//! # Responsibilities
//! - Own the socket and its session buffers
//! - Wait for socket readiness, interest changes or the idle timeout
//! - Dispatch buffered input and free output space to an [`Endpoint`]
//! - Flush and close gracefully, or drop the socket on shutdown
//!
//! # Data Flow
//! ```text
//! socket ──try_read──▶ inbuf ──Endpoint::dispatch_input──▶ handler callbacks
//! handler callbacks ──Endpoint::dispatch_output──▶ outbuf ──try_write──▶ socket
//! ```
//!
//! # Design Decisions
//! - One task per connection: callbacks of one connection never overlap
//! - A dispatch that made no progress parks that direction until new bytes,
//!   flushed output or an interest change arrive, so the loop never spins

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWriteExt, Interest, Ready};
use tokio::net::TcpStream;

use crate::net::connection::{ConnectionControl, ConnectionState};

/// Per-connection I/O tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shut the connection down after this long without any event.
    pub idle_timeout: Duration,
    /// Read chunk size and soft limit on pending output.
    pub buffer_size: usize,
    /// Largest accepted message head.
    pub max_head_size: usize,
    pub tcp_nodelay: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            buffer_size: 8 * 1024,
            max_head_size: 8 * 1024,
            tcp_nodelay: true,
        }
    }
}

/// Socket plus its input and output buffers.
pub(crate) struct Session {
    stream: TcpStream,
    pub(crate) inbuf: BytesMut,
    pub(crate) outbuf: BytesMut,
    pub(crate) eof: bool,
    config: SessionConfig,
}

/// What ended a wait.
enum Wake {
    Io { read: bool, wrote: bool },
    Notified,
    TimedOut,
    Failed(io::Error),
}

impl Session {
    pub(crate) fn new(stream: TcpStream, config: SessionConfig) -> io::Result<Self> {
        stream.set_nodelay(config.tcp_nodelay)?;
        Ok(Self {
            stream,
            inbuf: BytesMut::with_capacity(config.buffer_size),
            outbuf: BytesMut::with_capacity(config.buffer_size),
            eof: false,
            config,
        })
    }

    pub(crate) fn out_limit(&self) -> usize {
        self.config.buffer_size
    }

    pub(crate) fn max_head_size(&self) -> usize {
        self.config.max_head_size
    }

    fn input_room(&self) -> bool {
        !self.eof && self.inbuf.len() < self.config.max_head_size + self.config.buffer_size
    }

    async fn wait(&mut self, control: &ConnectionControl, want_read: bool) -> Wake {
        let mut interest: Option<Interest> = None;
        if want_read && self.input_room() {
            interest = Some(Interest::READABLE);
        }
        if !self.outbuf.is_empty() {
            interest = Some(match interest {
                Some(i) => i.add(Interest::WRITABLE),
                None => Interest::WRITABLE,
            });
        }

        let ready = tokio::select! {
            biased;
            _ = control.changed() => return Wake::Notified,
            ready = readiness(&self.stream, interest) => ready,
            _ = tokio::time::sleep(self.config.idle_timeout) => return Wake::TimedOut,
        };
        match ready {
            Ok(ready) => self.transfer(ready),
            Err(e) => Wake::Failed(e),
        }
    }

    fn transfer(&mut self, ready: Ready) -> Wake {
        let mut read = false;
        let mut wrote = false;
        if ready.is_readable() || ready.is_read_closed() {
            self.inbuf.reserve(self.config.buffer_size);
            match self.stream.try_read_buf(&mut self.inbuf) {
                Ok(0) => {
                    self.eof = true;
                    read = true;
                }
                Ok(_) => read = true,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Wake::Failed(e),
            }
        }
        if ready.is_writable() && !self.outbuf.is_empty() {
            match self.stream.try_write(&self.outbuf) {
                Ok(n) => {
                    self.outbuf.advance(n);
                    wrote = n > 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Wake::Failed(e),
            }
        }
        Wake::Io { read, wrote }
    }

    /// Writes out everything pending, bounded by the idle timeout.
    async fn flush(&mut self) -> io::Result<()> {
        let limit = self.config.idle_timeout;
        let flush = async {
            while !self.outbuf.is_empty() {
                self.stream.writable().await?;
                match self.stream.try_write(&self.outbuf) {
                    Ok(n) => self.outbuf.advance(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
            self.stream.shutdown().await
        };
        match tokio::time::timeout(limit, flush).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "flush timed out")),
        }
    }
}

async fn readiness(stream: &TcpStream, interest: Option<Interest>) -> io::Result<Ready> {
    match interest {
        Some(interest) => stream.ready(interest).await,
        None => std::future::pending().await,
    }
}

/// Connection-kind specific dispatch driven by [`drive`].
pub(crate) trait Endpoint {
    fn control(&self) -> &ConnectionControl;

    /// Feeds buffered input to the handler. Returns whether anything moved.
    fn dispatch_input(&mut self, io: &mut Session) -> bool;

    /// Lets the handler produce output. Returns whether anything moved.
    fn dispatch_output(&mut self, io: &mut Session) -> bool;

    fn timeout(&mut self);

    fn transport_error(&mut self, error: &io::Error);

    fn closed(&mut self);
}

/// Runs one connection until it is closed, shut down or fails.
pub(crate) async fn drive<E: Endpoint>(mut io: Session, endpoint: &mut E) {
    let mut input_parked = false;
    let mut output_parked = false;

    loop {
        match endpoint.control().state() {
            ConnectionState::Closed => break,
            ConnectionState::Draining => {
                if let Err(e) = io.flush().await {
                    tracing::debug!(connection_id = %endpoint.control().id(), error = %e, "Flush on close failed");
                }
                break;
            }
            ConnectionState::Active => {}
        }

        let mut progressed = false;
        if endpoint.control().wants_input() && !input_parked {
            if endpoint.dispatch_input(&mut io) {
                progressed = true;
            } else {
                input_parked = true;
            }
        }
        if endpoint.control().state() != ConnectionState::Active {
            continue;
        }
        if !output_parked && io.outbuf.len() < io.out_limit() {
            if endpoint.dispatch_output(&mut io) {
                progressed = true;
            } else {
                output_parked = true;
            }
        }
        if progressed {
            continue;
        }

        let want_read = endpoint.control().wants_input();
        match io.wait(endpoint.control(), want_read).await {
            Wake::Io { read, wrote } => {
                input_parked &= !read;
                output_parked &= !wrote;
            }
            Wake::Notified => {
                input_parked = false;
                output_parked = false;
            }
            Wake::TimedOut => endpoint.timeout(),
            Wake::Failed(e) => endpoint.transport_error(&e),
        }
    }

    endpoint.control().mark_closed();
    drop(io);
    endpoint.closed();
}
