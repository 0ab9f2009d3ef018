//! Single entry point for showing an alert.

use std::sync::Arc;
use std::time::Duration;

use crate::constants::WORKER_READY_TIMEOUT;

use super::{Alert, NotificationBackend, PermissionState, PermissionStore, ServiceWorkerLifecycle};

/// How an alert request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Permission is not granted; nothing was shown.
    Suppressed,
    /// Shown through the background worker.
    ViaWorker,
    /// Shown directly on the backend.
    Direct,
    /// The surface failed; the failure was logged.
    Failed,
}

/// Shows alerts, preferring the background worker when one is ready.
///
/// Never surfaces an error to the caller: a user who denied permission
/// sees nothing, and a failing surface is only logged.
#[derive(Debug, Clone)]
pub struct DeliveryAgent {
    permissions: Arc<PermissionStore>,
    backend: Arc<dyn NotificationBackend>,
    worker: Option<Arc<ServiceWorkerLifecycle>>,
    ready_timeout: Duration,
}

impl DeliveryAgent {
    /// Agent showing alerts directly on `backend`.
    pub fn new(permissions: Arc<PermissionStore>, backend: Arc<dyn NotificationBackend>) -> Self {
        Self {
            permissions,
            backend,
            worker: None,
            ready_timeout: WORKER_READY_TIMEOUT,
        }
    }

    /// Route alerts through `worker` whenever it becomes ready in time.
    #[must_use]
    pub fn with_worker(mut self, worker: Arc<ServiceWorkerLifecycle>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// How long to wait for the worker before showing directly.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Show an alert with `title` and `body`, coalesced under `tag`.
    pub async fn show(&self, title: &str, body: &str, tag: &str) -> Delivery {
        self.show_alert(Alert::new(title, body, tag)).await
    }

    /// Show a fully specified alert.
    pub async fn show_alert(&self, alert: Alert) -> Delivery {
        let permission = self.permissions.current_state();
        if permission != PermissionState::Granted {
            log::debug!("Alert suppressed, notification permission is {}", permission);
            return Delivery::Suppressed;
        }

        if let Some(worker) = self.worker.as_ref().filter(|w| w.is_registered()) {
            match tokio::time::timeout(self.ready_timeout, worker.await_ready()).await {
                Ok(Ok(handle)) => {
                    return match handle.show(alert).await {
                        Ok(()) => Delivery::ViaWorker,
                        Err(e) => {
                            log::error!("Error showing notification: {}", e);
                            Delivery::Failed
                        }
                    };
                }
                Ok(Err(e)) => log::debug!("Worker unavailable ({}), showing directly", e),
                Err(_) => log::debug!("Worker not ready in time, showing directly"),
            }
        }

        match self.backend.show(&alert).await {
            Ok(()) => Delivery::Direct,
            Err(e) => {
                log::error!("Error showing notification: {}", e);
                Delivery::Failed
            }
        }
    }
}
