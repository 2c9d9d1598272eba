//! Event handlers for both connections of a pair.
//!
//! # Data Flow
//! ```text
//! client conn ──▶ ClientSideHandler ──┐
//!                                     ├──▶ SharedPair (states, pipes, messages)
//! origin conn ──▶ OriginSideHandler ──┘
//! ```
//!
//! Each handler only advances its own side's state and wakes the other side
//! through the control handle stored on the pair.

mod client;
mod origin;

pub use client::ClientSideHandler;
pub use origin::OriginSideHandler;
