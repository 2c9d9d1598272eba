//! Per-side progress markers and their admissible events.
//!
//! Every handler callback names the event it is about to apply and checks it
//! against the current state through [`ClientState::ensure`] or
//! [`OriginState::ensure`]. Transition validity lives here and nowhere else.

use std::fmt;

use crate::error::ProxyError;

/// Which connection of a pair an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Origin,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Origin => "origin",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the client-facing half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Idle,
    Connected,
    RequestReceived,
    RequestBodyStream,
    RequestBodyDone,
    ResponseSent,
    ResponseBodyStream,
    ResponseBodyDone,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Idle => "IDLE",
            ClientState::Connected => "CONNECTED",
            ClientState::RequestReceived => "REQUEST_RECEIVED",
            ClientState::RequestBodyStream => "REQUEST_BODY_STREAM",
            ClientState::RequestBodyDone => "REQUEST_BODY_DONE",
            ClientState::ResponseSent => "RESPONSE_SENT",
            ClientState::ResponseBodyStream => "RESPONSE_BODY_STREAM",
            ClientState::ResponseBodyDone => "RESPONSE_BODY_DONE",
        }
    }

    /// Fails unless `event` may be applied in this state.
    pub fn ensure(self, event: ClientEvent) -> Result<(), ProxyError> {
        if event.admits(self) {
            Ok(())
        } else {
            Err(ProxyError::IllegalState {
                side: Side::Client,
                event: event.as_str(),
                state: self.as_str(),
            })
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that advance the client-facing half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    RequestReceived,
    RequestBody,
    ResponseReady,
    ResponseBody,
}

impl ClientEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientEvent::RequestReceived => "request received",
            ClientEvent::RequestBody => "request body input",
            ClientEvent::ResponseReady => "response ready",
            ClientEvent::ResponseBody => "response body output",
        }
    }

    pub fn admits(self, state: ClientState) -> bool {
        use ClientState::*;
        match self {
            ClientEvent::RequestReceived => matches!(state, Idle | Connected),
            ClientEvent::RequestBody => matches!(state, RequestReceived | RequestBodyStream),
            ClientEvent::ResponseReady => matches!(state, RequestReceived | RequestBodyDone),
            ClientEvent::ResponseBody => matches!(state, ResponseSent | ResponseBodyStream),
        }
    }
}

/// Progress of the origin-facing half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginState {
    #[default]
    Idle,
    Connected,
    RequestSent,
    RequestBodyStream,
    RequestBodyDone,
    ResponseReceived,
    ResponseBodyStream,
    ResponseBodyDone,
}

impl OriginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginState::Idle => "IDLE",
            OriginState::Connected => "CONNECTED",
            OriginState::RequestSent => "REQUEST_SENT",
            OriginState::RequestBodyStream => "REQUEST_BODY_STREAM",
            OriginState::RequestBodyDone => "REQUEST_BODY_DONE",
            OriginState::ResponseReceived => "RESPONSE_RECEIVED",
            OriginState::ResponseBodyStream => "RESPONSE_BODY_STREAM",
            OriginState::ResponseBodyDone => "RESPONSE_BODY_DONE",
        }
    }

    /// Fails unless `event` may be applied in this state.
    pub fn ensure(self, event: OriginEvent) -> Result<(), ProxyError> {
        if event.admits(self) {
            Ok(())
        } else {
            Err(ProxyError::IllegalState {
                side: Side::Origin,
                event: event.as_str(),
                state: self.as_str(),
            })
        }
    }
}

impl fmt::Display for OriginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that advance the origin-facing half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginEvent {
    Connect,
    RequestReady,
    RequestBody,
    ResponseReceived,
    ResponseBody,
}

impl OriginEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginEvent::Connect => "connect",
            OriginEvent::RequestReady => "request ready",
            OriginEvent::RequestBody => "request body output",
            OriginEvent::ResponseReceived => "response received",
            OriginEvent::ResponseBody => "response body input",
        }
    }

    pub fn admits(self, state: OriginState) -> bool {
        use OriginState::*;
        match self {
            OriginEvent::Connect => state == Idle,
            OriginEvent::RequestReady => matches!(state, Idle | Connected),
            OriginEvent::RequestBody => matches!(state, RequestSent | RequestBodyStream),
            OriginEvent::ResponseReceived => matches!(state, RequestSent | RequestBodyDone),
            OriginEvent::ResponseBody => matches!(state, ResponseReceived | ResponseBodyStream),
        }
    }
}
