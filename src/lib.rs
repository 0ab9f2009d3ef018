//! Formcast - real-time form submission fan-out.
//!
//! A submitted form becomes one event on a shared channel; every connected
//! viewer receives it, keeps it in a newest-first feed and, if the user
//! allowed it, raises a desktop alert.
//!
//! # Architecture
//!
//! ```text
//! submit ──► server ──► SubmissionPublisher ──► Fabric (broadcast per channel)
//!              │                                   │
//!              └── ChannelAuthBroker (credentials) │ WebSocket /realtime
//!                                                  ▼
//!                                    PubSubSession (reconnecting)
//!                                                  │
//!                                     Viewer ─► DeliveryAgent ─► worker / backend
//! ```
//!
//! # Modules
//!
//! - [`auth`] - Credential minting, verification and fetching
//! - [`channel`] - Wire protocol, events and the client session
//! - [`server`] - axum application and in-process fabric
//! - [`notifications`] - Permission, alert delivery and the background worker
//! - [`viewer`] - Feed of received submissions
//! - [`config`] - Configuration loading/saving

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod constants;
pub mod env;
pub mod notifications;
pub mod server;
pub mod viewer;
pub mod ws;

// Re-export commonly used types
pub use auth::{ChannelAuthBroker, Credential, CredentialSource, HttpCredentialSource};
pub use channel::{ChannelEvent, ConnectionState, PubSubSession, Submission};
pub use config::Config;
pub use viewer::{NotificationFeed, NotificationRecord, Viewer};

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
