//! Connection identity, readiness control and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Hold per-connection readiness interest that either side of a pair may flip
//! - Track the connection state (Active → Draining → Closed)
//! - Count live connections for graceful shutdown

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::transport::IoControl;

/// Source of connection IDs; only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is open and exchanging messages.
    Active,
    /// Graceful close requested: flush pending output, then close.
    Draining,
    /// Connection is closed or was shut down.
    Closed,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Active,
            1 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// Readiness interest and close requests for one connection.
///
/// Flags live in atomics so the other side of a pair can flip them without
/// the pair lock; the session task is woken through a [`Notify`].
#[derive(Debug)]
pub struct ConnectionControl {
    id: ConnectionId,
    input: AtomicBool,
    output: AtomicBool,
    state: AtomicU8,
    notify: Notify,
}

impl ConnectionControl {
    /// New control with input interest on and output interest off.
    pub fn new(id: ConnectionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            input: AtomicBool::new(true),
            output: AtomicBool::new(false),
            state: AtomicU8::new(0),
            notify: Notify::new(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn wants_input(&self) -> bool {
        self.input.load(Ordering::SeqCst)
    }

    pub fn wants_output(&self) -> bool {
        self.output.load(Ordering::SeqCst)
    }

    /// Clears output interest, returning whether it was set.
    pub fn take_output_interest(&self) -> bool {
        self.output.swap(false, Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn mark_closed(&self) {
        self.state.store(2, Ordering::SeqCst);
    }

    /// Resolves after the next interest or state change.
    pub async fn changed(&self) {
        self.notify.notified().await
    }

    fn set(&self, flag: &AtomicBool, value: bool) {
        if flag.swap(value, Ordering::SeqCst) != value {
            self.notify.notify_one();
        }
    }
}

impl IoControl for ConnectionControl {
    fn request_input(&self) {
        self.set(&self.input, true);
    }

    fn suspend_input(&self) {
        self.set(&self.input, false);
    }

    fn request_output(&self) {
        self.set(&self.output, true);
    }

    fn suspend_output(&self) {
        self.set(&self.output, false);
    }

    fn shutdown(&self) -> io::Result<()> {
        if self.state.swap(2, Ordering::SeqCst) != 2 {
            self.notify.notify_one();
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        if self.state.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.notify.notify_one();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Active
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed, giving up after `grace`.
    ///
    /// Returns `true` when every connection finished in time.
    pub async fn wait_for_drain(&self, grace: Duration) -> bool {
        let poll = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(grace, poll).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn interest_changes_are_idempotent() {
        let control = ConnectionControl::new(ConnectionId::new());
        assert!(control.wants_input());
        control.suspend_input();
        control.suspend_input();
        assert!(!control.wants_input());
        control.request_output();
        assert!(control.take_output_interest());
        assert!(!control.take_output_interest());
    }

    #[test]
    fn close_then_shutdown_ends_closed() {
        let control = ConnectionControl::new(ConnectionId::new());
        control.close().unwrap();
        assert_eq!(control.state(), ConnectionState::Draining);
        assert!(!control.is_open());
        control.shutdown().unwrap();
        control.shutdown().unwrap();
        assert_eq!(control.state(), ConnectionState::Closed);
        control.close().unwrap();
        assert_eq!(control.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn interest_change_wakes_waiter() {
        let control = ConnectionControl::new(ConnectionId::new());
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.changed().await })
        };
        tokio::task::yield_now().await;
        control.request_output();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn drain_wait_times_out_with_live_connections() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();
        assert!(!tracker.wait_for_drain(Duration::from_millis(60)).await);
    }
}
