//! Turning received events into visible OS alerts.
//!
//! # Components
//!
//! - [`PermissionStore`]: the runtime's notification permission; prompts the
//!   user at most once per explicit request.
//! - [`ServiceWorkerLifecycle`]: a long-lived background worker that owns
//!   delivered alerts and routes taps back into the application.
//! - [`DeliveryAgent`]: the single "show an alert" entry point; goes through
//!   the worker when it is ready, directly through the backend otherwise.
//!
//! The platform surfaces are traits so the pipeline runs the same against a
//! terminal, a desktop bridge, or an in-memory fake in tests.

pub mod delivery;
pub mod permission;
pub mod terminal;
pub mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use delivery::{Delivery, DeliveryAgent};
pub use permission::{PermissionState, PermissionStore};
pub use terminal::{BrowserHost, TerminalBackend};
pub use worker::{ServiceWorkerLifecycle, WorkerError, WorkerHandle, WorkerPhase};

/// Icon and badge shown with every alert.
pub const DEFAULT_ALERT_ICON: &str = "/favicon.ico";

/// Vibration pattern in milliseconds (on, off, on).
pub const DEFAULT_VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];

/// One OS-level alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Coalescing key; a newer alert with the same tag replaces the older one.
    pub tag: String,
    /// Icon URL.
    pub icon: String,
    /// Badge URL.
    pub badge: String,
    /// Vibration pattern, milliseconds.
    pub vibrate: Vec<u32>,
    /// Keep the alert on screen until the user acts on it.
    pub require_interaction: bool,
}

impl Alert {
    /// Alert with the default icon, badge and vibration pattern.
    pub fn new(title: impl Into<String>, body: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            tag: tag.into(),
            icon: DEFAULT_ALERT_ICON.to_string(),
            badge: DEFAULT_ALERT_ICON.to_string(),
            vibrate: DEFAULT_VIBRATE_PATTERN.to_vec(),
            require_interaction: false,
        }
    }
}

/// A notification surface failed to show or dismiss an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError(pub String);

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Notification delivery failed: {}", self.0)
    }
}

impl std::error::Error for DeliveryError {}

/// The platform's notification surface.
#[async_trait]
pub trait NotificationBackend: Send + Sync + std::fmt::Debug {
    /// Whether this runtime can show notifications at all.
    fn is_supported(&self) -> bool;

    /// Permission as currently reported by the platform.
    fn permission(&self) -> PermissionState;

    /// Ask the user for permission (the OS prompt).
    async fn request_permission(&self) -> PermissionState;

    /// Display `alert`.
    async fn show(&self, alert: &Alert) -> Result<(), DeliveryError>;

    /// Remove the alert shown under `tag`, if any.
    async fn dismiss(&self, tag: &str) -> Result<(), DeliveryError>;
}

/// Windows belonging to this application.
#[async_trait]
pub trait WindowHost: Send + Sync + std::fmt::Debug {
    /// Bring an already open window showing `url` to the foreground.
    ///
    /// Returns `false` if no such window exists.
    async fn focus_existing(&self, url: &str) -> bool;

    /// Open a new window on `url`.
    async fn open_window(&self, url: &str) -> Result<(), DeliveryError>;
}
