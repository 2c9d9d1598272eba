//! Shared state of one client/origin connection pair.
//!
//! # Responsibilities
//! - Hold both progress markers, both body pipes and the in-flight messages
//! - Hold control handles so either side can wake or tear down the other
//! - Serialize every mutation behind one lock per pair
//!
//! # Data Flow
//! ```text
//! client ──decode──▶ request_buffer ──encode──▶ origin
//! client ◀──encode── response_buffer ◀──decode── origin
//! ```
//!
//! # Design Decisions
//! - One `std::sync::Mutex` per pair, taken for exactly one callback and never
//!   held across an `.await`
//! - Poisoning surfaces as [`ProxyError::PairPoisoned`] so the callback fails
//!   its connection instead of panicking again

mod buffer;
mod state;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::error::ProxyError;
use crate::protocol::message::{RequestHead, ResponseHead, TargetHost};
use crate::transport::ControlHandle;

pub use buffer::PipeBuffer;
pub use state::{ClientEvent, ClientState, OriginEvent, OriginState, Side};

/// Capacity of each body pipe unless configured otherwise.
pub const DEFAULT_PIPE_CAPACITY: usize = 10 * 1024;

/// Identifier correlating both connections of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(Uuid);

impl PairId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PairId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pair-{}", self.0.simple())
    }
}

/// Mutable state shared by both handlers of a pair.
pub struct PairState {
    id: PairId,
    target: TargetHost,
    pub(crate) request_buffer: PipeBuffer,
    pub(crate) response_buffer: PipeBuffer,
    pub(crate) client_state: ClientState,
    pub(crate) origin_state: OriginState,
    pub(crate) request: Option<RequestHead>,
    pub(crate) response: Option<ResponseHead>,
    pub(crate) client_control: Option<ControlHandle>,
    pub(crate) origin_control: Option<ControlHandle>,
    pub(crate) origin_closed: bool,
    /// Reuse verdict on the origin's response as received, before the
    /// client-side pipeline rewrites it.
    pub(crate) origin_reusable: bool,
}

impl PairState {
    pub fn new(target: TargetHost, capacity: usize) -> Self {
        Self {
            id: PairId::new(),
            target,
            request_buffer: PipeBuffer::with_capacity(capacity),
            response_buffer: PipeBuffer::with_capacity(capacity),
            client_state: ClientState::Idle,
            origin_state: OriginState::Idle,
            request: None,
            response: None,
            client_control: None,
            origin_control: None,
            origin_closed: false,
            origin_reusable: false,
        }
    }

    /// Returns both halves to idle for the next exchange on kept-alive
    /// connections. Control handles stay in place.
    pub fn reset(&mut self) {
        self.request_buffer.clear();
        self.response_buffer.clear();
        self.client_state = ClientState::Idle;
        self.origin_state = OriginState::Idle;
        self.request = None;
        self.response = None;
        self.origin_reusable = false;
    }

    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn target(&self) -> &TargetHost {
        &self.target
    }

    pub fn client_state(&self) -> ClientState {
        self.client_state
    }

    pub fn origin_state(&self) -> OriginState {
        self.origin_state
    }

    pub fn request(&self) -> Option<&RequestHead> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&ResponseHead> {
        self.response.as_ref()
    }

    pub fn request_buffer(&self) -> &PipeBuffer {
        &self.request_buffer
    }

    pub fn response_buffer(&self) -> &PipeBuffer {
        &self.response_buffer
    }

    /// True once the origin connection has closed or was never established.
    pub fn is_origin_closed(&self) -> bool {
        self.origin_closed
    }
}

impl fmt::Debug for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairState")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("client_state", &self.client_state)
            .field("origin_state", &self.origin_state)
            .field("request_pending", &self.request_buffer.len())
            .field("response_pending", &self.response_buffer.len())
            .field("origin_closed", &self.origin_closed)
            .finish()
    }
}

/// Lock-guarded handle to a [`PairState`], cloned into both connections.
#[derive(Clone)]
pub struct SharedPair {
    id: PairId,
    inner: Arc<Mutex<PairState>>,
}

impl SharedPair {
    pub fn new(target: TargetHost, capacity: usize) -> Self {
        let state = PairState::new(target, capacity);
        Self {
            id: state.id(),
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Readable without taking the lock.
    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, PairState>, ProxyError> {
        self.inner.lock().map_err(|_| ProxyError::PairPoisoned)
    }

    pub fn ptr_eq(&self, other: &SharedPair) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedPair").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_returns_pair_to_idle() {
        let pair = SharedPair::new(TargetHost::new("origin", 80), 16);
        {
            let mut state = pair.lock().unwrap();
            state.client_state = ClientState::ResponseBodyDone;
            state.origin_state = OriginState::ResponseBodyDone;
            state.request = Some(RequestHead::new(http::Method::GET, "/"));
            state.origin_closed = true;
            state.reset();
        }
        let state = pair.lock().unwrap();
        assert_eq!(state.client_state(), ClientState::Idle);
        assert_eq!(state.origin_state(), OriginState::Idle);
        assert!(state.request().is_none());
        assert!(state.request_buffer().is_empty());
        assert!(state.is_origin_closed());
    }

    #[test]
    fn clones_share_one_state() {
        let pair = SharedPair::new(TargetHost::new("origin", 80), 16);
        let other = pair.clone();
        assert!(pair.ptr_eq(&other));
        assert_eq!(pair.id(), other.lock().unwrap().id());
    }

    #[test]
    fn poisoned_lock_is_reported() {
        let pair = SharedPair::new(TargetHost::new("origin", 80), 16);
        let clone = pair.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(matches!(pair.lock(), Err(ProxyError::PairPoisoned)));
    }
}
