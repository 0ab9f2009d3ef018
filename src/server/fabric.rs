//! In-process realtime fabric.
//!
//! One `broadcast` sender per channel fans published events out to every
//! socket subscribed to it. Each WebSocket gets its own task that owns at
//! most one subscription; a repeated `subscribe` replaces the previous one,
//! so a client that re-subscribes never accumulates duplicates.
//!
//! Delivery is ephemeral: a socket that falls behind by more than the
//! channel capacity loses the missed events (logged), and nothing is replayed
//! to late subscribers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use tokio::sync::{broadcast, watch};

use crate::auth::TokenClaims;
use crate::channel::{ChannelEvent, ClientFrame, ServerFrame};
use crate::constants::{FABRIC_CHANNEL_CAPACITY, FABRIC_PING_INTERVAL};

use super::publisher::PublishError;

/// A published event, serialized once and shared by all receivers.
#[derive(Debug)]
struct Published {
    name: String,
    frame: String,
}

/// Destination for published channel events.
#[async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Publish `event` on `channel`, returning how many subscriptions it reached.
    async fn publish(&self, channel: &str, event: &ChannelEvent) -> Result<usize, PublishError>;
}

#[derive(Debug)]
struct FabricInner {
    channels: StdRwLock<HashMap<String, broadcast::Sender<Arc<Published>>>>,
    kick_tx: watch::Sender<u64>,
    capacity: usize,
}

/// Channel registry shared by the publisher and every socket task.
#[derive(Debug, Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::with_capacity(FABRIC_CHANNEL_CAPACITY)
    }

    /// Create an empty fabric whose channels buffer `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (kick_tx, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(FabricInner {
                channels: StdRwLock::new(HashMap::new()),
                kick_tx,
                capacity: capacity.max(1),
            }),
        }
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Force-close every connected socket.
    ///
    /// Clients see a server close and go through their reconnect path.
    pub fn disconnect_all(&self) {
        self.inner.kick_tx.send_modify(|generation| *generation += 1);
        log::info!("Disconnecting all realtime sockets");
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Arc<Published>> {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe()
    }

    /// Drive one authenticated WebSocket until it closes.
    pub async fn serve_socket(self, socket: WebSocket, claims: TokenClaims) {
        let connection_id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "Realtime socket {} opened for {}",
            connection_id,
            claims.client_id
        );

        let mut socket = SocketTask {
            fabric: self,
            socket,
            claims,
            subscription: None,
        };
        socket.run(connection_id.clone()).await;

        log::info!("Realtime socket {} closed", connection_id);
    }
}

#[async_trait]
impl EventSink for Fabric {
    async fn publish(&self, channel: &str, event: &ChannelEvent) -> Result<usize, PublishError> {
        let data = serde_json::to_value(event.payload())
            .map_err(|e| PublishError::Transport(format!("encode payload: {e}")))?;
        let frame = serde_json::to_string(&ServerFrame::Message {
            channel: channel.to_string(),
            name: event.event_name().to_string(),
            data,
        })
        .map_err(|e| PublishError::Transport(format!("encode frame: {e}")))?;

        let sender = self
            .inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned();

        let reached = match sender {
            Some(tx) => tx
                .send(Arc::new(Published {
                    name: event.event_name().to_string(),
                    frame,
                }))
                .unwrap_or(0),
            None => 0,
        };

        log::debug!(
            "Published {} on {} to {} subscription(s)",
            event.event_name(),
            channel,
            reached
        );
        Ok(reached)
    }
}

/// The one subscription a socket may hold.
#[derive(Debug)]
struct Subscription {
    channel: String,
    event: String,
    rx: broadcast::Receiver<Arc<Published>>,
}

/// Why a socket task stopped.
enum SocketEnd {
    Client,
    Kicked,
    Error(String),
}

struct SocketTask {
    fabric: Fabric,
    socket: WebSocket,
    claims: TokenClaims,
    subscription: Option<Subscription>,
}

impl SocketTask {
    async fn run(&mut self, connection_id: String) {
        let mut kick_rx = self.fabric.inner.kick_tx.subscribe();
        kick_rx.mark_unchanged();

        if let Err(e) = self.send(&ServerFrame::Welcome { connection_id }).await {
            log::debug!("Failed to send welcome: {}", e);
            return;
        }

        let start = tokio::time::Instant::now() + FABRIC_PING_INTERVAL;
        let mut ping = tokio::time::interval_at(start, FABRIC_PING_INTERVAL);

        let end = loop {
            tokio::select! {
                incoming = self.socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_command(&text).await {
                                break SocketEnd::Error(e);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break SocketEnd::Client,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break SocketEnd::Error(e.to_string()),
                    }
                }

                published = next_published(&mut self.subscription) => {
                    match published {
                        Ok(published) => {
                            let wanted = self
                                .subscription
                                .as_ref()
                                .is_some_and(|s| s.event == published.name);
                            if wanted {
                                if let Err(e) = self.socket.send(Message::Text(published.frame.clone())).await {
                                    break SocketEnd::Error(e.to_string());
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            log::warn!("Realtime socket lagged, dropped {} event(s)", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            self.subscription = None;
                        }
                    }
                }

                _ = ping.tick() => {
                    let frame = ServerFrame::Ping { timestamp: crate::now_millis() };
                    if let Err(e) = self.send(&frame).await {
                        break SocketEnd::Error(e);
                    }
                }

                _ = kick_rx.changed() => break SocketEnd::Kicked,
            }
        };

        self.subscription = None;
        match end {
            SocketEnd::Client => {}
            SocketEnd::Kicked => {
                let _ = self.socket.send(Message::Close(None)).await;
            }
            SocketEnd::Error(e) => log::debug!("Realtime socket error: {}", e),
        }
    }

    async fn handle_command(&mut self, text: &str) -> Result<(), String> {
        let command = match serde_json::from_str::<ClientFrame>(text) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("Ignoring malformed command: {}", e);
                return Ok(());
            }
        };

        match command {
            ClientFrame::Subscribe { channel, event } => {
                if !self.claims.allows(&channel) {
                    log::warn!(
                        "Rejected subscription of {} to {}",
                        self.claims.client_id,
                        channel
                    );
                    return self
                        .send(&ServerFrame::RejectSubscription {
                            channel,
                            reason: "credential does not cover this channel".into(),
                        })
                        .await;
                }

                let replaced = self.subscription.replace(Subscription {
                    channel: channel.clone(),
                    event: event.clone(),
                    rx: self.fabric.subscribe(&channel),
                });
                if replaced.is_some() {
                    log::debug!("Replaced existing subscription with {}", channel);
                }
                drop(replaced);

                self.send(&ServerFrame::ConfirmSubscription { channel, event })
                    .await
            }
            ClientFrame::Unsubscribe { channel } => {
                if self
                    .subscription
                    .as_ref()
                    .is_some_and(|s| s.channel == channel)
                {
                    self.subscription = None;
                }
                self.send(&ServerFrame::Unsubscribed { channel }).await
            }
        }
    }

    async fn send(&mut self, frame: &ServerFrame) -> Result<(), String> {
        let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| e.to_string())
    }
}

/// Next event for the current subscription; pending forever without one.
async fn next_published(
    subscription: &mut Option<Subscription>,
) -> Result<Arc<Published>, broadcast::error::RecvError> {
    match subscription {
        Some(sub) => sub.rx.recv().await,
        None => std::future::pending().await,
    }
}
