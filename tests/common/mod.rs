//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tandem_proxy::observability::{EventHook, ProxyEvent};
use tandem_proxy::pair::SharedPair;
use tandem_proxy::protocol::{RequestHead, ResponseHead, TargetHost};
use tandem_proxy::transport::{
    ClientConnection, Connector, ContentDecoder, ContentEncoder, ControlHandle, IoControl, OriginConnection,
};
use tandem_proxy::ProxyError;

/// Records interest flags and teardown calls instead of touching a socket.
#[derive(Debug)]
pub struct MockControl {
    input: AtomicBool,
    output: AtomicBool,
    open: AtomicBool,
    pub shutdowns: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            input: AtomicBool::new(true),
            output: AtomicBool::new(false),
            open: AtomicBool::new(true),
            shutdowns: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn wants_input(&self) -> bool {
        self.input.load(Ordering::SeqCst)
    }

    pub fn wants_output(&self) -> bool {
        self.output.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl IoControl for MockControl {
    fn request_input(&self) {
        self.input.store(true, Ordering::SeqCst);
    }

    fn suspend_input(&self) {
        self.input.store(false, Ordering::SeqCst);
    }

    fn request_output(&self) {
        self.output.store(true, Ordering::SeqCst);
    }

    fn suspend_output(&self) {
        self.output.store(false, Ordering::SeqCst);
    }

    fn shutdown(&self) -> io::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// In-memory client connection.
pub struct MockClient {
    pub control: Arc<MockControl>,
    pub pair: Option<SharedPair>,
    pub request: Option<RequestHead>,
    pub submitted: Vec<ResponseHead>,
    pub input_resets: usize,
    /// Makes `submit_response` fail like a broken socket.
    pub refuse_responses: bool,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            control: MockControl::new(),
            pair: None,
            request: None,
            submitted: Vec::new(),
            input_resets: 0,
            refuse_responses: false,
        }
    }
}

impl ClientConnection for MockClient {
    fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    fn take_request(&mut self) -> Option<RequestHead> {
        self.request.take()
    }

    fn submit_response(&mut self, response: &ResponseHead) -> Result<(), ProxyError> {
        if self.refuse_responses {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone").into());
        }
        self.submitted.push(response.clone());
        Ok(())
    }

    fn reset_input(&mut self) {
        self.input_resets += 1;
    }

    fn pair(&self) -> Option<SharedPair> {
        self.pair.clone()
    }

    fn attach_pair(&mut self, pair: SharedPair) {
        self.pair = Some(pair);
    }
}

/// In-memory origin connection.
pub struct MockOrigin {
    pub control: Arc<MockControl>,
    pub pair: Option<SharedPair>,
    pub response: Option<ResponseHead>,
    pub submitted: Vec<RequestHead>,
    pub input_resets: usize,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self {
            control: MockControl::new(),
            pair: None,
            response: None,
            submitted: Vec::new(),
            input_resets: 0,
        }
    }
}

impl OriginConnection for MockOrigin {
    fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    fn take_response(&mut self) -> Option<ResponseHead> {
        self.response.take()
    }

    fn submit_request(&mut self, request: &RequestHead) -> Result<(), ProxyError> {
        self.submitted.push(request.clone());
        Ok(())
    }

    fn reset_input(&mut self) {
        self.input_resets += 1;
    }

    fn pair(&self) -> Option<SharedPair> {
        self.pair.clone()
    }

    fn attach_pair(&mut self, pair: SharedPair) {
        self.pair = Some(pair);
    }
}

/// Hands out a body in randomly sized slices, like partial socket reads.
pub struct SliceDecoder {
    data: Vec<u8>,
    pos: usize,
    max_slice: usize,
    rng: fastrand::Rng,
}

impl SliceDecoder {
    pub fn new(data: Vec<u8>, max_slice: usize, seed: u64) -> Self {
        Self {
            data,
            pos: 0,
            max_slice,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl ContentDecoder for SliceDecoder {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let slice = self.rng.usize(0..=self.max_slice);
        let n = slice.min(dst.len()).min(self.remaining());
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn is_completed(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// Accepts randomly sized slices, like partial socket writes.
pub struct SliceEncoder {
    pub out: Vec<u8>,
    max_slice: usize,
    completed: bool,
    rng: fastrand::Rng,
}

impl SliceEncoder {
    pub fn new(max_slice: usize, seed: u64) -> Self {
        Self {
            out: Vec::new(),
            max_slice,
            completed: false,
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl ContentEncoder for SliceEncoder {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        let n = self.rng.usize(0..=self.max_slice).min(src.len());
        self.out.extend_from_slice(&src[..n]);
        Ok(n)
    }

    fn complete(&mut self) -> io::Result<()> {
        self.completed = true;
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Keeps every pair handed to it instead of connecting.
#[derive(Default)]
pub struct RecordingConnector {
    pub requests: Mutex<Vec<(TargetHost, SharedPair)>>,
}

impl RecordingConnector {
    pub fn take_last(&self) -> Option<SharedPair> {
        self.requests.lock().unwrap().pop().map(|(_, pair)| pair)
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Connector for RecordingConnector {
    fn connect(&self, target: &TargetHost, pair: SharedPair) {
        self.requests.lock().unwrap().push((target.clone(), pair));
    }
}

/// Collects every event.
#[derive(Default)]
pub struct RecordingHook {
    pub events: Mutex<Vec<ProxyEvent>>,
}

impl RecordingHook {
    pub fn snapshot(&self) -> Vec<ProxyEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventHook for RecordingHook {
    fn on_event(&self, event: &ProxyEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Reads one request head plus a `Content-Length` body from `socket`.
///
/// Returns `None` once the peer closed the connection.
pub async fn read_request(socket: &mut TcpStream, pending: &mut Vec<u8>) -> Option<(String, Vec<u8>)> {
    loop {
        if let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&pending[..end + 4]).to_string();
            let length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            while pending.len() < end + 4 + length {
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.ok()?;
                if n == 0 {
                    return None;
                }
                pending.extend_from_slice(&buf[..n]);
            }
            let body = pending[end + 4..end + 4 + length].to_vec();
            pending.drain(..end + 4 + length);
            return Some((head, body));
        }
        let mut buf = [0u8; 4096];
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        pending.extend_from_slice(&buf[..n]);
    }
}

/// What the mock origin saw.
#[derive(Default)]
pub struct OriginLog {
    pub connections: AtomicUsize,
    pub heads: Mutex<Vec<String>>,
}

/// Start a keep-alive HTTP/1.1 origin that echoes request bodies.
///
/// Every response carries `Content-Length`; a request for `/chunked` gets
/// its echo back with chunked framing instead.
pub async fn start_echo_origin() -> (SocketAddr, Arc<OriginLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(OriginLog::default());
    let shared = log.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            shared.connections.fetch_add(1, Ordering::SeqCst);
            let log = shared.clone();
            tokio::spawn(async move {
                let mut pending = Vec::new();
                while let Some((head, body)) = read_request(&mut socket, &mut pending).await {
                    let chunked = head.starts_with("POST /chunked") || head.starts_with("GET /chunked");
                    log.heads.lock().unwrap().push(head);
                    let payload = if body.is_empty() { b"hello from origin".to_vec() } else { body };
                    let mut response = Vec::new();
                    if chunked {
                        response.extend_from_slice(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
                        for piece in payload.chunks(1000) {
                            response.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
                            response.extend_from_slice(piece);
                            response.extend_from_slice(b"\r\n");
                        }
                        response.extend_from_slice(b"0\r\n\r\n");
                    } else {
                        response.extend_from_slice(
                            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Origin: echo\r\n\r\n", payload.len())
                                .as_bytes(),
                        );
                        response.extend_from_slice(&payload);
                    }
                    if socket.write_all(&response).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (addr, log)
}
