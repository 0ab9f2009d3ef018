//! Reconnecting client session on the realtime fabric.
//!
//! A `PubSubSession` owns one subscription (one channel, one event name) and
//! hands decoded events to its consumer through a bounded queue, in receipt
//! order.
//!
//! # Usage
//!
//! ```ignore
//! let mut session = PubSubSession::builder()
//!     .server_url("http://127.0.0.1:3000")
//!     .credentials(Arc::new(HttpCredentialSource::new("http://127.0.0.1:3000")?))
//!     .build()?;
//! session.open()?;
//!
//! while let Some(event) = session.recv().await {
//!     // ...
//! }
//! session.close().await;
//! ```
//!
//! # Delivery
//!
//! No deduplication happens across reconnects: an event published while the
//! old socket was half-dead may arrive twice. Consumers that need
//! exactly-once must key on content + timestamp.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::auth::{AuthError, Credential, CredentialSource};
use crate::constants::{
    CONNECTION_STALE_TIMEOUT, CREDENTIAL_FETCH_TIMEOUT, FORM_SUBMISSION_EVENT,
    HEALTH_CHECK_INTERVAL, NOTIFICATIONS_CHANNEL, REALTIME_PATH, SESSION_CLOSE_TIMEOUT,
    SESSION_QUEUE_CAPACITY, WELCOME_TIMEOUT,
};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

use super::{
    BackoffPolicy, ChannelError, ChannelEvent, ClientFrame, ConnectionState, ServerFrame,
    SharedConnectionState, SubmissionPayload,
};

/// Settings fixed at build time.
#[derive(Debug, Clone)]
struct SessionConfig {
    server_url: String,
    channel: String,
    event: String,
    backoff: BackoffPolicy,
    stale_timeout: Duration,
    health_interval: Duration,
    credential_timeout: Duration,
    queue_capacity: usize,
}

/// Builder for `PubSubSession`.
#[derive(Debug, Default)]
pub struct PubSubSessionBuilder {
    server_url: Option<String>,
    credentials: Option<Arc<dyn CredentialSource>>,
    channel: Option<String>,
    event: Option<String>,
    backoff: Option<BackoffPolicy>,
    stale_timeout: Option<Duration>,
    health_interval: Option<Duration>,
    credential_timeout: Option<Duration>,
    queue_capacity: Option<usize>,
}

impl PubSubSessionBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server URL (required).
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Set the credential source (required).
    #[must_use]
    pub fn credentials(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    /// Channel to subscribe to (default `notifications`).
    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Event name to receive (default `form-submission`).
    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Reconnect policy.
    #[must_use]
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = Some(policy);
        self
    }

    /// Silence on the socket longer than this counts as a lost connection.
    #[must_use]
    pub fn stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = Some(timeout);
        self
    }

    /// How often to check for staleness.
    #[must_use]
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = Some(interval);
        self
    }

    /// Upper bound on one credential fetch; expiry is retried with backoff.
    #[must_use]
    pub fn credential_timeout(mut self, timeout: Duration) -> Self {
        self.credential_timeout = Some(timeout);
        self
    }

    /// Capacity of the event queue.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Build the session (not yet connected).
    pub fn build(self) -> Result<PubSubSession, ChannelError> {
        let server_url = self
            .server_url
            .ok_or_else(|| ChannelError::InvalidConfig("server_url is required".into()))?;
        let credentials = self
            .credentials
            .ok_or_else(|| ChannelError::InvalidConfig("credentials are required".into()))?;

        Ok(PubSubSession {
            config: SessionConfig {
                server_url,
                channel: self.channel.unwrap_or_else(|| NOTIFICATIONS_CHANNEL.to_string()),
                event: self.event.unwrap_or_else(|| FORM_SUBMISSION_EVENT.to_string()),
                backoff: self.backoff.unwrap_or_default(),
                stale_timeout: self.stale_timeout.unwrap_or(CONNECTION_STALE_TIMEOUT),
                health_interval: self.health_interval.unwrap_or(HEALTH_CHECK_INTERVAL),
                credential_timeout: self.credential_timeout.unwrap_or(CREDENTIAL_FETCH_TIMEOUT),
                queue_capacity: self.queue_capacity.unwrap_or(SESSION_QUEUE_CAPACITY).max(1),
            },
            credentials,
            state: SharedConnectionState::new(),
            events_rx: None,
            shutdown_tx: None,
            task: None,
        })
    }
}

/// Client-held, reconnecting subscription to one channel event.
pub struct PubSubSession {
    config: SessionConfig,
    credentials: Arc<dyn CredentialSource>,
    state: Arc<SharedConnectionState>,
    events_rx: Option<mpsc::Receiver<ChannelEvent>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PubSubSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubSession")
            .field("server_url", &self.config.server_url)
            .field("channel", &self.config.channel)
            .field("event", &self.config.event)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl PubSubSession {
    /// Create a new session builder.
    #[must_use]
    pub fn builder() -> PubSubSessionBuilder {
        PubSubSessionBuilder::new()
    }

    /// Start the connection loop.
    ///
    /// Returns immediately; observe progress with [`Self::watch_state`].
    pub fn open(&mut self) -> Result<(), ChannelError> {
        if self.task.is_some() {
            return Err(ChannelError::AlreadyOpen);
        }
        if self.state.get() == ConnectionState::Closed {
            return Err(ChannelError::Closed);
        }

        let (events_tx, events_rx) = mpsc::channel(self.config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let connection = ConnectionLoop {
            config: self.config.clone(),
            credentials: Arc::clone(&self.credentials),
            state: Arc::clone(&self.state),
            events_tx,
            shutdown_rx,
            credential: None,
        };

        self.events_rx = Some(events_rx);
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(tokio::spawn(connection.run()));
        Ok(())
    }

    /// Next event in receipt order; `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events_rx.as_mut()?.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.events_rx.as_mut()?.try_recv().ok()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Observe connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Wait until the session is `Connected`.
    ///
    /// Fails early if the session reaches `Failed` or `Closed`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ChannelError> {
        let mut rx = self.state.subscribe();
        let wait = rx.wait_for(|s| matches!(s, ConnectionState::Connected) || s.is_terminal());
        let state = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) => return Err(ChannelError::Closed),
            Err(_) => return Err(ChannelError::Timeout),
        };
        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Failed(reason) => Err(ChannelError::Failed(reason)),
            _ => Err(ChannelError::Closed),
        }
    }

    /// Tear the session down.
    ///
    /// The loop unsubscribes, then closes the socket. Queued events are
    /// discarded; once this returns no further event is delivered.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut rx) = self.events_rx.take() {
            rx.close();
            let mut discarded = 0usize;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                log::debug!("Discarded {} undelivered events on close", discarded);
            }
        }

        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(SESSION_CLOSE_TIMEOUT, task).await.is_err() {
                log::warn!("Session loop did not stop in time, aborting");
                abort.abort();
            }
        }

        if !matches!(self.state.get(), ConnectionState::Failed(_)) {
            self.state.set(ConnectionState::Closed);
        }
    }
}

impl Drop for PubSubSession {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Why the message loop returned.
#[derive(Debug)]
enum LoopExit {
    /// Shutdown requested; the socket was torn down.
    Shutdown,
    /// The consumer dropped the queue; the socket was torn down.
    ConsumerGone,
    /// Transport lost; reconnect.
    Lost(String),
}

/// Why a connection attempt failed.
#[derive(Debug)]
enum AttemptError {
    /// The server refused our token; drop it and refetch.
    Unauthorized(String),
    /// The token is valid but may not subscribe to the channel.
    Rejected(String),
    /// Network or protocol failure; retry with backoff.
    Transport(String),
}

/// State owned by the spawned connection task.
struct ConnectionLoop {
    config: SessionConfig,
    credentials: Arc<dyn CredentialSource>,
    state: Arc<SharedConnectionState>,
    events_tx: mpsc::Sender<ChannelEvent>,
    shutdown_rx: oneshot::Receiver<()>,
    credential: Option<Credential>,
}

impl ConnectionLoop {
    /// Run the connection loop with automatic reconnection.
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.state.set(ConnectionState::Connecting);

            let fetched = tokio::select! {
                result = obtain_credential(
                    self.credentials.as_ref(),
                    &mut self.credential,
                    self.config.credential_timeout,
                ) => result,
                _ = &mut self.shutdown_rx => {
                    log::info!("Session shutdown during credential fetch");
                    self.state.set(ConnectionState::Closed);
                    return;
                }
            };

            let attempt_result = match fetched {
                Ok(token) => tokio::select! {
                    result = connect_and_subscribe(&self.config, &token) => result,
                    _ = &mut self.shutdown_rx => {
                        log::info!("Session shutdown during connect");
                        self.state.set(ConnectionState::Closed);
                        return;
                    }
                },
                // A slow auth endpoint is a transport problem, not a bad credential.
                Err(AuthError::Timeout) => {
                    Err(AttemptError::Transport(AuthError::Timeout.to_string()))
                }
                Err(e) => {
                    self.state.set(ConnectionState::Failed(e.to_string()));
                    return;
                }
            };

            match attempt_result {
                Ok((writer, reader)) => {
                    attempt = 0;
                    self.state.set(ConnectionState::Connected);
                    match self.run_message_loop(writer, reader).await {
                        LoopExit::Shutdown | LoopExit::ConsumerGone => {
                            self.state.set(ConnectionState::Closed);
                            return;
                        }
                        LoopExit::Lost(reason) => {
                            log::warn!("Lost connection to {}: {}", self.config.channel, reason);
                        }
                    }
                }
                Err(AttemptError::Unauthorized(reason)) => {
                    log::warn!("Credential refused by server ({}), will refetch", reason);
                    self.credential = None;
                }
                Err(AttemptError::Rejected(reason)) => {
                    self.state.set(ConnectionState::Failed(format!(
                        "subscription to {} rejected: {reason}",
                        self.config.channel
                    )));
                    return;
                }
                Err(AttemptError::Transport(reason)) => {
                    log::warn!("Failed to connect to {}: {}", self.config.server_url, reason);
                }
            }

            attempt = attempt.saturating_add(1);
            let wait = self.config.backoff.delay(attempt);
            self.state.set(ConnectionState::Disconnected {
                attempt,
                next_retry_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            });

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = &mut self.shutdown_rx => {
                    log::info!("Session shutdown during reconnect backoff");
                    self.state.set(ConnectionState::Closed);
                    return;
                }
            }
        }
    }

    /// Pump frames until the connection ends or shutdown is requested.
    async fn run_message_loop(&mut self, mut writer: WsWriter, mut reader: WsReader) -> LoopExit {
        let mut last_activity = Instant::now();
        let mut health = tokio::time::interval(self.config.health_interval);

        loop {
            tokio::select! {
                frame = reader.recv() => {
                    last_activity = Instant::now();
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            let Some(event) = self.decode(&text) else {
                                continue;
                            };
                            if self.events_tx.send(event).await.is_err() {
                                log::debug!("Event consumer gone, tearing down");
                                self.teardown(&mut writer).await;
                                return LoopExit::ConsumerGone;
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            if let Err(e) = writer.send_pong(data).await {
                                return LoopExit::Lost(e.to_string());
                            }
                        }
                        Some(Ok(WsMessage::Close { code, reason })) => {
                            return LoopExit::Lost(format!("closed by server ({code} {reason})"));
                        }
                        Some(Ok(WsMessage::Binary(_) | WsMessage::Pong)) => {}
                        Some(Err(e)) => return LoopExit::Lost(e.to_string()),
                        None => return LoopExit::Lost("stream ended".into()),
                    }
                }

                _ = health.tick() => {
                    if last_activity.elapsed() > self.config.stale_timeout {
                        return LoopExit::Lost(format!(
                            "no traffic for {}s",
                            last_activity.elapsed().as_secs()
                        ));
                    }
                }

                _ = &mut self.shutdown_rx => {
                    self.teardown(&mut writer).await;
                    return LoopExit::Shutdown;
                }
            }
        }
    }

    /// Decode a text frame into an event for this subscription, if it is one.
    fn decode(&self, text: &str) -> Option<ChannelEvent> {
        let frame = match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Ignoring undecodable frame: {}", e);
                return None;
            }
        };

        match frame {
            ServerFrame::Message { channel, name, data } => {
                if channel != self.config.channel || name != self.config.event {
                    log::trace!("Ignoring {} on {}", name, channel);
                    return None;
                }
                match serde_json::from_value::<SubmissionPayload>(data) {
                    Ok(payload) => Some(ChannelEvent::new(name, payload)),
                    Err(e) => {
                        log::warn!("Dropping malformed {} payload: {}", name, e);
                        None
                    }
                }
            }
            ServerFrame::Ping { .. } => None,
            other => {
                log::debug!("Unexpected frame while subscribed: {:?}", other);
                None
            }
        }
    }

    /// Unsubscribe, then close the socket.
    async fn teardown(&self, writer: &mut WsWriter) {
        let unsubscribe = ClientFrame::Unsubscribe {
            channel: self.config.channel.clone(),
        };
        if let Err(e) = writer.send_json(&unsubscribe).await {
            log::debug!("Unsubscribe on teardown failed: {}", e);
        }
        if let Err(e) = writer.close().await {
            log::debug!("Socket close on teardown failed: {}", e);
        }
        log::info!("Unsubscribed from {}", self.config.channel);
    }
}

/// Reuse the cached credential until it expires, otherwise fetch a new one.
async fn obtain_credential(
    source: &dyn CredentialSource,
    cached: &mut Option<Credential>,
    timeout: Duration,
) -> Result<String, AuthError> {
    let now = crate::now_millis();
    if let Some(credential) = cached.as_ref().filter(|c| !c.is_expired(now)) {
        return Ok(credential.token.clone());
    }

    let credential = tokio::time::timeout(timeout, source.fetch())
        .await
        .map_err(|_| AuthError::Timeout)??;
    let token = credential.token.clone();
    *cached = Some(credential);
    Ok(token)
}

/// Open the socket, wait for `welcome`, subscribe and wait for confirmation.
async fn connect_and_subscribe(
    config: &SessionConfig,
    token: &str,
) -> Result<(WsWriter, WsReader), AttemptError> {
    let url = format!(
        "{}{}",
        ws::http_to_ws_scheme(config.server_url.trim_end_matches('/')),
        REALTIME_PATH
    );
    log::debug!("Connecting to {}", url);

    let (mut writer, mut reader) = ws::connect(&url, token).await.map_err(|e| {
        if e.is_unauthorized() {
            AttemptError::Unauthorized(e.to_string())
        } else {
            AttemptError::Transport(e.to_string())
        }
    })?;

    let handshake = async {
        await_frame(&mut reader, |frame| match frame {
            ServerFrame::Welcome { connection_id } => {
                log::debug!("Welcome received (connection {})", connection_id);
                Some(Ok(()))
            }
            _ => None,
        })
        .await?;

        writer
            .send_json(&ClientFrame::Subscribe {
                channel: config.channel.clone(),
                event: config.event.clone(),
            })
            .await
            .map_err(|e| AttemptError::Transport(format!("subscribe failed: {e}")))?;

        await_frame(&mut reader, |frame| match frame {
            ServerFrame::ConfirmSubscription { channel, .. } if channel == config.channel => {
                Some(Ok(()))
            }
            ServerFrame::RejectSubscription { channel, reason } if channel == config.channel => {
                Some(Err(AttemptError::Rejected(reason)))
            }
            _ => None,
        })
        .await
    };

    match tokio::time::timeout(WELCOME_TIMEOUT, handshake).await {
        Ok(Ok(())) => {
            log::info!("Subscribed to {} ({})", config.channel, config.event);
            Ok((writer, reader))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AttemptError::Transport("timeout waiting for subscription".into())),
    }
}

/// Read frames until `pick` returns a verdict.
async fn await_frame(
    reader: &mut WsReader,
    mut pick: impl FnMut(ServerFrame) -> Option<Result<(), AttemptError>>,
) -> Result<(), AttemptError> {
    while let Some(msg) = reader.recv().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                if let Ok(frame) = serde_json::from_str::<ServerFrame>(&text) {
                    if let Some(verdict) = pick(frame) {
                        return verdict;
                    }
                }
            }
            Ok(WsMessage::Close { code, reason }) => {
                return Err(AttemptError::Transport(format!(
                    "closed during handshake ({code} {reason})"
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(AttemptError::Transport(e.to_string())),
        }
    }
    Err(AttemptError::Transport("socket closed during handshake".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingSource {
        calls: AtomicUsize,
        expires_at: i64,
    }

    #[async_trait]
    impl CredentialSource for CountingSource {
        async fn fetch(&self) -> Result<Credential, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                token: format!("token-{n}"),
                client_id: "c".into(),
                issued_at: 0,
                expires_at: self.expires_at,
            })
        }
    }

    #[derive(Debug)]
    struct BrokenSource;

    #[async_trait]
    impl CredentialSource for BrokenSource {
        async fn fetch(&self) -> Result<Credential, AuthError> {
            Err(AuthError::Fetch("HTTP 500: Channel signing key not configured".into()))
        }
    }

    fn session_with(source: Arc<dyn CredentialSource>) -> PubSubSession {
        PubSubSession::builder()
            .server_url("http://127.0.0.1:1")
            .credentials(source)
            .backoff(BackoffPolicy::fixed(Duration::from_millis(10)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_server_url_and_credentials() {
        let missing_url = PubSubSession::builder()
            .credentials(Arc::new(BrokenSource))
            .build();
        assert!(matches!(missing_url, Err(ChannelError::InvalidConfig(_))));

        let missing_creds = PubSubSession::builder().server_url("http://x").build();
        assert!(matches!(missing_creds, Err(ChannelError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = session_with(Arc::new(BrokenSource));
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_cached_credential_reused_until_expiry() {
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            expires_at: i64::MAX,
        };
        let mut cached = None;
        let first = obtain_credential(&source, &mut cached, CREDENTIAL_FETCH_TIMEOUT).await.unwrap();
        let second = obtain_credential(&source, &mut cached, CREDENTIAL_FETCH_TIMEOUT).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_credential_refetched() {
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            expires_at: 0,
        };
        let mut cached = None;
        let first = obtain_credential(&source, &mut cached, CREDENTIAL_FETCH_TIMEOUT).await.unwrap();
        let second = obtain_credential(&source, &mut cached, CREDENTIAL_FETCH_TIMEOUT).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_credential_failure_is_terminal() {
        let mut session = session_with(Arc::new(BrokenSource));
        session.open().unwrap();

        let result = session.wait_connected(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ChannelError::Failed(ref r)) if r.contains("not configured")));
        assert!(session.recv().await.is_none());

        session.close().await;
        assert!(matches!(session.state(), ConnectionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_schedules_retry() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            expires_at: i64::MAX,
        });
        let mut session = session_with(source);
        session.open().unwrap();

        let mut rx = session.watch_state();
        let reached = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| matches!(s, ConnectionState::Disconnected { .. })),
        )
        .await;
        assert!(reached.is_ok());

        session.close().await;
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_open_twice_rejected() {
        let mut session = session_with(Arc::new(BrokenSource));
        session.open().unwrap();
        assert_eq!(session.open(), Err(ChannelError::AlreadyOpen));
        session.close().await;
    }

    #[tokio::test]
    async fn test_recv_after_close_is_none() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            expires_at: i64::MAX,
        });
        let mut session = session_with(source);
        session.open().unwrap();
        session.close().await;
        assert!(session.recv().await.is_none());
        assert!(session.try_recv().is_none());
        assert_eq!(session.open(), Err(ChannelError::Closed));
    }

    #[derive(Debug, Default)]
    struct HangingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for HangingSource {
        async fn fetch(&self) -> Result<Credential, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_credential_timeout_retries_with_backoff() {
        let source = Arc::new(HangingSource::default());
        let mut session = PubSubSession::builder()
            .server_url("http://127.0.0.1:1")
            .credentials(Arc::clone(&source) as Arc<dyn CredentialSource>)
            .credential_timeout(Duration::from_millis(20))
            .backoff(BackoffPolicy::fixed(Duration::from_millis(200)))
            .build()
            .unwrap();
        session.open().unwrap();

        let mut rx = session.watch_state();
        let state = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| matches!(s, ConnectionState::Disconnected { .. }) || s.is_terminal()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(
            matches!(state, ConnectionState::Disconnected { attempt: 1, .. }),
            "unexpected state {state:?}"
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while source.calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!matches!(session.state(), ConnectionState::Failed(_)));

        session.close().await;
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_unsubscribes_before_closing_socket() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let welcome = ServerFrame::Welcome {
                connection_id: "c1".into(),
            };
            socket
                .send(Message::Text(serde_json::to_string(&welcome).unwrap()))
                .await
                .unwrap();

            let mut seen = Vec::new();
            while let Some(Ok(msg)) = socket.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text).unwrap() {
                        ClientFrame::Subscribe { channel, event } => {
                            let confirm = ServerFrame::ConfirmSubscription { channel, event };
                            socket
                                .send(Message::Text(serde_json::to_string(&confirm).unwrap()))
                                .await
                                .unwrap();
                        }
                        ClientFrame::Unsubscribe { channel } => {
                            seen.push(format!("unsubscribe {channel}"));
                        }
                    },
                    Message::Close(_) => {
                        seen.push("close".to_string());
                        break;
                    }
                    _ => {}
                }
            }
            seen
        });

        let mut session = PubSubSession::builder()
            .server_url(base)
            .credentials(Arc::new(CountingSource {
                calls: AtomicUsize::new(0),
                expires_at: i64::MAX,
            }))
            .build()
            .unwrap();
        session.open().unwrap();
        session.wait_connected(Duration::from_secs(2)).await.unwrap();
        session.close().await;

        let seen = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, ["unsubscribe notifications", "close"]);
    }
}
