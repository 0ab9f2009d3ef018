//! Pub/sub channel layer shared by the server fabric and client sessions.
//!
//! # Architecture
//!
//! ```text
//! PubSubSession (client)
//!     ├── CredentialSource (fetch/refresh channel credential)
//!     ├── ws transport (tokio-tungstenite)
//!     ├── protocol frames (subscribe / message / ping ...)
//!     ├── BackoffPolicy (exponential with cap + jitter)
//!     └── bounded event queue → consumer (Viewer)
//! ```
//!
//! The server side of the same protocol lives in [`crate::server::fabric`].
//!
//! # Connection states
//!
//! ```text
//! Idle → Connecting → Connected ⇄ Disconnected → Connecting (retry)
//!            │
//!            └── credential failure → Failed (terminal)
//! any → Closed (teardown)
//! ```

pub mod backoff;
pub mod event;
pub mod protocol;
pub mod session;

use std::sync::Arc;
use tokio::sync::watch;

/// Connection state for a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created but not opened.
    #[default]
    Idle,
    /// Fetching a credential or performing the handshake.
    Connecting,
    /// Subscribed and receiving.
    Connected,
    /// Transport lost; a retry is scheduled.
    Disconnected {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Milliseconds until the next attempt.
        next_retry_ms: u64,
    },
    /// Unrecoverable credential failure; a fresh session is required.
    Failed(String),
    /// Torn down by the application.
    Closed,
}

impl ConnectionState {
    /// Whether no further transitions will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected { attempt, next_retry_ms } => {
                write!(f, "disconnected (attempt {attempt}, retry in {next_retry_ms}ms)")
            }
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Builder is missing a required field.
    InvalidConfig(String),
    /// `open` was called on a session that is already running.
    AlreadyOpen,
    /// The session reached `Failed`.
    Failed(String),
    /// The session was closed.
    Closed,
    /// Waiting for a state timed out.
    Timeout,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "Invalid session config: {msg}"),
            Self::AlreadyOpen => write!(f, "Session already open"),
            Self::Failed(reason) => write!(f, "Session failed: {reason}"),
            Self::Closed => write!(f, "Session closed"),
            Self::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Connection state that can be observed from outside the session.
///
/// Every transition is logged; observers get a `watch` receiver.
#[derive(Debug)]
pub struct SharedConnectionState {
    tx: watch::Sender<ConnectionState>,
}

impl SharedConnectionState {
    /// Create new shared state in `Idle`.
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = watch::channel(ConnectionState::Idle);
        Arc::new(Self { tx })
    }

    /// Get the current state.
    pub fn get(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Set the state, logging the transition.
    pub fn set(&self, new_state: ConnectionState) {
        match &new_state {
            ConnectionState::Connected => log::info!("Channel connection: {}", new_state),
            ConnectionState::Disconnected { .. } => log::warn!("Channel connection: {}", new_state),
            ConnectionState::Failed(_) => log::error!("Channel connection: {}", new_state),
            _ => log::debug!("Channel connection: {}", new_state),
        }
        self.tx.send_replace(new_state);
    }

    /// Observe future transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(*self.tx.borrow(), ConnectionState::Connected)
    }
}

// Re-exports
pub use backoff::BackoffPolicy;
pub use event::{ChannelEvent, Submission, SubmissionPayload};
pub use protocol::{ClientFrame, ServerFrame};
pub use session::{PubSubSession, PubSubSessionBuilder};
