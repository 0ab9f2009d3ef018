//! Background alert worker.
//!
//! The worker is a task that outlives any single view. It goes through the
//! install/activate lifecycle once, then owns every alert it displays:
//! alerts sharing a tag coalesce, and a tap on an alert dismisses it and
//! brings the application window forward (opening one if none exists).
//!
//! ```text
//! register() ─► Install (skip waiting) ─► Activate (claim views) ─► Active
//!                                                                   │
//!                     ShowAlert / NotificationTap ◄─────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::{Alert, DeliveryError, NotificationBackend, WindowHost};

const SIGNAL_QUEUE_CAPACITY: usize = 64;

/// Errors from the worker lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The runtime has no notification surface to run a worker against.
    Unsupported,
    /// `await_ready` was called before `register`.
    NotRegistered,
    /// The worker task has stopped.
    Stopped,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported => write!(f, "Background worker not supported"),
            Self::NotRegistered => write!(f, "Background worker not registered"),
            Self::Stopped => write!(f, "Background worker stopped"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Lifecycle phase of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Spawned, install not yet handled.
    Installing,
    /// Installed; skipped waiting for older views.
    Installed,
    /// Active and controlling all views.
    Active,
    /// Task has exited.
    Stopped,
}

/// Signals the worker task reacts to.
#[derive(Debug)]
enum WorkerSignal {
    Install,
    Activate,
    NotificationTap {
        tag: String,
    },
    ShowAlert {
        alert: Alert,
        reply: oneshot::Sender<Result<(), DeliveryError>>,
    },
}

/// Cheap handle for talking to an active worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerSignal>,
}

impl WorkerHandle {
    /// Display `alert` through the worker.
    pub async fn show(&self, alert: Alert) -> Result<(), DeliveryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerSignal::ShowAlert { alert, reply })
            .await
            .map_err(|_| DeliveryError(WorkerError::Stopped.to_string()))?;
        rx.await
            .map_err(|_| DeliveryError(WorkerError::Stopped.to_string()))?
    }

    /// Deliver a user tap on the alert shown under `tag`.
    pub async fn tap(&self, tag: &str) -> Result<(), WorkerError> {
        self.tx
            .send(WorkerSignal::NotificationTap {
                tag: tag.to_string(),
            })
            .await
            .map_err(|_| WorkerError::Stopped)
    }
}

#[derive(Debug)]
struct Registration {
    handle: WorkerHandle,
    phase_rx: watch::Receiver<WorkerPhase>,
    task: JoinHandle<()>,
}

/// Registers and supervises the background worker.
#[derive(Debug)]
pub struct ServiceWorkerLifecycle {
    backend: Arc<dyn NotificationBackend>,
    host: Arc<dyn WindowHost>,
    app_url: String,
    visible: Arc<StdRwLock<HashMap<String, Alert>>>,
    registration: StdRwLock<Option<Registration>>,
}

impl ServiceWorkerLifecycle {
    /// Lifecycle for a worker showing alerts on `backend` and raising
    /// `app_url` on `host` when one is tapped.
    pub fn new(
        backend: Arc<dyn NotificationBackend>,
        host: Arc<dyn WindowHost>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            host,
            app_url: app_url.into(),
            visible: Arc::new(StdRwLock::new(HashMap::new())),
            registration: StdRwLock::new(None),
        }
    }

    /// Register the worker. Registering a running worker is a no-op.
    pub fn register(&self) -> Result<(), WorkerError> {
        if !self.backend.is_supported() {
            log::warn!("Background worker not supported");
            return Err(WorkerError::Unsupported);
        }

        let mut registration = self
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if registration.as_ref().is_some_and(|r| !r.task.is_finished()) {
            log::debug!("Background worker already registered");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let (phase_tx, phase_rx) = watch::channel(WorkerPhase::Installing);

        let worker = Worker {
            backend: Arc::clone(&self.backend),
            host: Arc::clone(&self.host),
            app_url: self.app_url.clone(),
            visible: Arc::clone(&self.visible),
            phase_tx,
        };
        let task = tokio::spawn(worker.run(rx));

        // Platform lifecycle: a fresh registration is installed, then activated.
        for signal in [WorkerSignal::Install, WorkerSignal::Activate] {
            if tx.try_send(signal).is_err() {
                return Err(WorkerError::Stopped);
            }
        }

        *registration = Some(Registration {
            handle: WorkerHandle { tx },
            phase_rx,
            task,
        });
        log::info!("Background worker registered");
        Ok(())
    }

    /// Whether a worker has been registered.
    pub fn is_registered(&self) -> bool {
        self.registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Current lifecycle phase, if registered.
    pub fn phase(&self) -> Option<WorkerPhase> {
        self.registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| *r.phase_rx.borrow())
    }

    /// Suspend until the worker is active.
    pub async fn await_ready(&self) -> Result<WorkerHandle, WorkerError> {
        let (handle, mut phase_rx) = {
            let registration = self
                .registration
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let r = registration.as_ref().ok_or(WorkerError::NotRegistered)?;
            (r.handle.clone(), r.phase_rx.clone())
        };

        let phase = phase_rx
            .wait_for(|p| matches!(p, WorkerPhase::Active | WorkerPhase::Stopped))
            .await
            .map_err(|_| WorkerError::Stopped)?;
        match *phase {
            WorkerPhase::Active => Ok(handle),
            _ => Err(WorkerError::Stopped),
        }
    }

    /// Tags of alerts currently on screen.
    pub fn visible_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .visible
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }

    /// Stop the worker. A later `register` starts a fresh one.
    pub fn unregister(&self) {
        if let Some(registration) = self
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            registration.task.abort();
            log::info!("Background worker unregistered");
        }
    }
}

impl Drop for ServiceWorkerLifecycle {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// State owned by the worker task.
struct Worker {
    backend: Arc<dyn NotificationBackend>,
    host: Arc<dyn WindowHost>,
    app_url: String,
    visible: Arc<StdRwLock<HashMap<String, Alert>>>,
    phase_tx: watch::Sender<WorkerPhase>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<WorkerSignal>) {
        while let Some(signal) = rx.recv().await {
            match signal {
                WorkerSignal::Install => {
                    log::debug!("Worker installed, skipping wait");
                    self.phase_tx.send_replace(WorkerPhase::Installed);
                }
                WorkerSignal::Activate => {
                    log::debug!("Worker activated, claiming all views");
                    self.phase_tx.send_replace(WorkerPhase::Active);
                }
                WorkerSignal::ShowAlert { alert, reply } => {
                    let _ = reply.send(self.show(alert).await);
                }
                WorkerSignal::NotificationTap { tag } => self.on_tap(&tag).await,
            }
        }
        self.phase_tx.send_replace(WorkerPhase::Stopped);
    }

    async fn show(&self, alert: Alert) -> Result<(), DeliveryError> {
        let replaced = self
            .visible
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&alert.tag);
        if replaced {
            log::debug!("Replacing visible alert tagged {}", alert.tag);
            if let Err(e) = self.backend.dismiss(&alert.tag).await {
                log::debug!("Dismissing replaced alert failed: {}", e);
            }
        }

        self.backend.show(&alert).await?;
        self.visible
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alert.tag.clone(), alert);
        Ok(())
    }

    async fn on_tap(&self, tag: &str) {
        self.visible
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag);
        if let Err(e) = self.backend.dismiss(tag).await {
            log::warn!("Failed to dismiss tapped alert: {}", e);
        }

        if self.host.focus_existing(&self.app_url).await {
            log::debug!("Focused existing window on {}", self.app_url);
        } else if let Err(e) = self.host.open_window(&self.app_url).await {
            log::warn!("Failed to open {}: {}", self.app_url, e);
        }
    }
}
