//! Application-wide constants for formcast.
//!
//! This module centralizes timeouts, backoff bounds and protocol names so
//! the server and the client agree on them without repeating literals.
//!
//! # Categories
//!
//! - **Timeouts**: Network operation bounds
//! - **Reconnection**: Session backoff and liveness
//! - **Channels**: Channel and event names on the fabric
//! - **Endpoints**: HTTP paths served by `formcast serve`

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Upper bound on fetching a channel credential.
///
/// Expiry is treated like a transport failure: the session reports
/// `Disconnected` and retries with backoff instead of hanging in `Connecting`.
pub const CREDENTIAL_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on publishing a single event to the fabric.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client request timeout for submissions and persistence calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the server's `welcome` frame after the handshake.
pub const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `PubSubSession::close` waits for the connection loop to finish.
pub const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the delivery agent waits for the background worker to activate
/// before falling back to a direct alert.
pub const WORKER_READY_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Reconnection & Liveness
// ============================================================================

/// First reconnect delay after a transport failure.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect delays never exceed this.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Random jitter added on top of each backoff delay.
pub const BACKOFF_JITTER: Duration = Duration::from_millis(1000);

/// A connection with no inbound traffic for this long is considered dead.
pub const CONNECTION_STALE_TIMEOUT: Duration = Duration::from_secs(15);

/// How often the session checks for staleness.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// How often the fabric pings each connected socket.
pub const FABRIC_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the per-session event queue between transport and consumer.
pub const SESSION_QUEUE_CAPACITY: usize = 100;

/// Capacity of each channel's fan-out buffer on the fabric.
pub const FABRIC_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Channels
// ============================================================================

/// Shared channel every viewer subscribes to.
pub const NOTIFICATIONS_CHANNEL: &str = "notifications";

/// Event name published for each accepted submission.
pub const FORM_SUBMISSION_EVENT: &str = "form-submission";

/// Client role embedded in every issued credential.
pub const DEFAULT_CLIENT_ROLE: &str = "notifications-client";

/// Credential lifetime when not configured.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(3600);

/// Title used for OS alerts raised from submissions.
pub const SUBMISSION_ALERT_TITLE: &str = "New Form Submission";

// ============================================================================
// Endpoints
// ============================================================================

/// Credential endpoint (GET).
pub const CREDENTIAL_PATH: &str = "/api/channel-auth";

/// Submission endpoint (POST).
pub const SUBMIT_PATH: &str = "/api/submit";

/// Legacy submission endpoint kept for older forms (POST).
pub const SUBMIT_FORM_PATH: &str = "/api/submit-form";

/// Realtime WebSocket endpoint.
pub const REALTIME_PATH: &str = "/realtime";

/// Application root opened when an alert is tapped.
pub const APP_ROOT_PATH: &str = "/";
