//! HTTP/1.x message model and processing.
//!
//! # Responsibilities
//! - Message heads and body framing descriptors (`message`)
//! - Header rules shared by both sides (`headers`)
//! - Outgoing interceptor pipelines (`processor`)
//! - Keep-alive policy (`reuse`)
//! - Wire codec (`codec`)

pub mod codec;
pub mod headers;
pub mod message;
pub mod processor;
pub mod reuse;

pub use message::{Entity, ProtocolVersion, RequestHead, ResponseHead, TargetHost};
pub use processor::{ExchangeContext, HttpProcessor};
pub use reuse::{ConnectionReuseStrategy, DefaultReuseStrategy};
