//! Notification permission for one client runtime.
//!
//! `PermissionStore` is created once at startup and handed to whatever needs
//! it (delivery agent, viewer). The state only changes through an explicit
//! `request_consent` or an explicit `refresh` from the platform.

use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::NotificationBackend;

/// Notification permission as the platform reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// The runtime cannot show notifications.
    Unsupported,
    /// The user has not been asked yet.
    #[default]
    Default,
    /// The user allowed notifications.
    Granted,
    /// The user refused notifications.
    Denied,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported"),
            Self::Default => write!(f, "default"),
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Runtime-wide permission state with a serialized consent prompt.
#[derive(Debug)]
pub struct PermissionStore {
    backend: Arc<dyn NotificationBackend>,
    state: StdRwLock<PermissionState>,
    prompt: Mutex<()>,
}

impl PermissionStore {
    /// Create the store, seeded from what the platform reports now.
    pub fn new(backend: Arc<dyn NotificationBackend>) -> Self {
        let initial = Self::query(backend.as_ref());
        log::debug!("Notification permission at startup: {}", initial);
        Self {
            backend,
            state: StdRwLock::new(initial),
            prompt: Mutex::new(()),
        }
    }

    fn query(backend: &dyn NotificationBackend) -> PermissionState {
        if backend.is_supported() {
            backend.permission()
        } else {
            PermissionState::Unsupported
        }
    }

    fn store(&self, state: PermissionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Current permission for this runtime.
    pub fn current_state(&self) -> PermissionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether alerts may be shown.
    pub fn is_granted(&self) -> bool {
        self.current_state() == PermissionState::Granted
    }

    /// Re-read the platform's permission, e.g. after the user changed it in
    /// system settings.
    pub fn refresh(&self) -> PermissionState {
        let state = Self::query(self.backend.as_ref());
        self.store(state);
        state
    }

    /// Ask the user for permission.
    ///
    /// Already granted: returns immediately without prompting. Unsupported
    /// runtime: returns `Denied` without prompting. Concurrent callers share
    /// one prompt.
    pub async fn request_consent(&self) -> PermissionState {
        if !self.backend.is_supported() {
            log::warn!("Notifications not supported in this runtime");
            return PermissionState::Denied;
        }
        if self.is_granted() {
            return PermissionState::Granted;
        }

        let _prompt = self.prompt.lock().await;
        if self.is_granted() {
            return PermissionState::Granted;
        }

        let answer = self.backend.request_permission().await;
        log::info!("Notification permission: {}", answer);
        self.store(answer);
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::fakes::FakeBackend;

    #[test]
    fn test_starts_from_platform_state() {
        let backend = Arc::new(FakeBackend::new(PermissionState::Granted));
        *backend.reported.lock().unwrap() = PermissionState::Denied;
        let store = PermissionStore::new(backend);
        assert_eq!(store.current_state(), PermissionState::Denied);
    }

    #[test]
    fn test_unsupported_runtime() {
        let store = PermissionStore::new(Arc::new(FakeBackend::unsupported()));
        assert_eq!(store.current_state(), PermissionState::Unsupported);
    }

    #[tokio::test]
    async fn test_granted_is_not_prompted_again() {
        let backend = Arc::new(FakeBackend::new(PermissionState::Granted));
        let store = PermissionStore::new(backend.clone());

        assert_eq!(store.request_consent().await, PermissionState::Granted);
        assert_eq!(store.request_consent().await, PermissionState::Granted);
        assert_eq!(backend.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_denied_can_be_asked_again() {
        let backend = Arc::new(FakeBackend::new(PermissionState::Denied));
        let store = PermissionStore::new(backend.clone());

        assert_eq!(store.request_consent().await, PermissionState::Denied);
        assert_eq!(store.current_state(), PermissionState::Denied);
        store.request_consent().await;
        assert_eq!(backend.prompt_count(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_request_is_denied_without_prompt() {
        let backend = Arc::new(FakeBackend::unsupported());
        let store = PermissionStore::new(backend.clone());
        assert_eq!(store.request_consent().await, PermissionState::Denied);
        assert_eq!(backend.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_prompt() {
        let backend = Arc::new(FakeBackend::new(PermissionState::Granted));
        let store = Arc::new(PermissionStore::new(backend.clone()));

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.request_consent().await }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.request_consent().await }
        });

        assert_eq!(a.await.unwrap(), PermissionState::Granted);
        assert_eq!(b.await.unwrap(), PermissionState::Granted);
        assert_eq!(backend.prompt_count(), 1);
    }

    #[test]
    fn test_refresh_follows_platform() {
        let backend = Arc::new(FakeBackend::new(PermissionState::Granted));
        let store = PermissionStore::new(backend.clone());
        assert_eq!(store.current_state(), PermissionState::Default);

        *backend.reported.lock().unwrap() = PermissionState::Granted;
        assert_eq!(store.current_state(), PermissionState::Default);
        assert_eq!(store.refresh(), PermissionState::Granted);
    }

    #[test]
    fn test_display_matches_wire_names() {
        assert_eq!(PermissionState::Granted.to_string(), "granted");
        assert_eq!(
            serde_json::to_string(&PermissionState::Unsupported).unwrap(),
            "\"unsupported\""
        );
    }
}
