//! HTTP + realtime server.
//!
//! # Routes
//!
//! ```text
//! GET  /                  liveness + version
//! GET  /api/channel-auth  mint a channel credential
//! POST /api/submit        persist (best effort), then publish
//! POST /api/submit-form   same handler
//! GET  /realtime          WebSocket fabric (bearer credential required)
//! ```

pub mod fabric;
pub mod persistence;
pub mod publisher;
pub mod routes;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::ChannelAuthBroker;
use crate::config::Config;
use crate::env::Environment;

pub use fabric::{EventSink, Fabric};
pub use persistence::{D1Store, PersistenceError, SubmissionStore};
pub use publisher::{PublishError, SubmissionPublisher};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Mints and verifies credentials.
    pub broker: ChannelAuthBroker,
    /// Realtime fan-out.
    pub fabric: Fabric,
    /// Publishes submission events onto the fabric.
    pub publisher: SubmissionPublisher,
    /// Optional submission storage.
    pub store: Option<Arc<dyn SubmissionStore>>,
}

impl AppState {
    /// Wire up state around `broker`.
    ///
    /// Publishing is only enabled when the broker has a signing secret.
    pub fn new(
        broker: ChannelAuthBroker,
        channel: &str,
        store: Option<Arc<dyn SubmissionStore>>,
    ) -> Self {
        let fabric = Fabric::new();
        let sink: Option<Arc<dyn EventSink>> = if broker.is_configured() {
            Some(Arc::new(fabric.clone()))
        } else {
            None
        };
        Self {
            broker,
            publisher: SubmissionPublisher::new(sink, channel),
            fabric,
            store,
        }
    }

    /// Build state from loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let broker = ChannelAuthBroker::from_config(config);
        if !broker.is_configured() {
            let msg = "FORMCAST_SIGNING_KEY is not set; credentials and submissions will fail";
            if Environment::current().is_production() {
                log::error!("{}", msg);
            } else {
                log::warn!("{}", msg);
            }
        }

        let store: Option<Arc<dyn SubmissionStore>> = match config.complete_persistence() {
            Some(settings) => match D1Store::new(settings) {
                Ok(store) => {
                    log::info!("Persisting submissions to D1 database {}", settings.database_id);
                    Some(Arc::new(store))
                }
                Err(e) => {
                    log::error!("D1 persistence disabled: {}", e);
                    None
                }
            },
            None => {
                log::info!("No D1 settings; submissions will not be stored");
                None
            }
        };

        Self::new(broker, &config.channel, store)
    }
}

/// Build the complete application with request logging.
pub fn build_app(state: AppState) -> Router {
    routes::routes(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Serve on `listener` until `shutdown` resolves.
///
/// Realtime sockets are force-closed on shutdown so clients reconnect
/// elsewhere instead of waiting for a ping timeout.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    let fabric = state.fabric.clone();
    let app = build_app(state);

    log::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("Shutting down server");
            fabric.disconnect_all();
        })
        .await
        .context("HTTP server failed")
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn run(
    config: &Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    serve(listener, AppState::from_config(config), shutdown).await
}
