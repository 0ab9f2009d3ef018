//! Publishes one channel event per accepted submission.

use std::sync::Arc;
use std::time::Duration;

use crate::channel::{ChannelEvent, Submission};
use crate::constants::{FORM_SUBMISSION_EVENT, PUBLISH_TIMEOUT};

use super::fabric::EventSink;

/// Errors from publishing a submission event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Publishing is disabled because the channel secret is not configured.
    ConfigMissing,
    /// The sink failed to accept the event.
    Transport(String),
    /// The sink did not accept the event in time.
    Timeout,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigMissing => write!(f, "Channel signing key not configured"),
            Self::Transport(msg) => write!(f, "Publish failed: {msg}"),
            Self::Timeout => write!(f, "Publish timed out"),
        }
    }
}

impl std::error::Error for PublishError {}

/// Server-side publisher for `form-submission` events.
///
/// Without a sink (no signing secret configured) every publish fails with
/// `ConfigMissing`: nobody could have subscribed to receive it.
#[derive(Debug, Clone)]
pub struct SubmissionPublisher {
    sink: Option<Arc<dyn EventSink>>,
    channel: String,
    event_name: String,
    timeout: Duration,
}

impl SubmissionPublisher {
    /// Publisher sending to `sink` on `channel`.
    pub fn new(sink: Option<Arc<dyn EventSink>>, channel: impl Into<String>) -> Self {
        Self {
            sink,
            channel: channel.into(),
            event_name: FORM_SUBMISSION_EVENT.to_string(),
            timeout: PUBLISH_TIMEOUT,
        }
    }

    /// Override the publish timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether publishing can succeed at all.
    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// Channel events are published on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Build and publish the event for `submission`, stamped with the current time.
    pub async fn publish(&self, submission: &Submission) -> Result<ChannelEvent, PublishError> {
        let sink = self.sink.as_ref().ok_or(PublishError::ConfigMissing)?;
        let event =
            ChannelEvent::from_submission(&self.event_name, submission, crate::now_millis());

        let reached = tokio::time::timeout(self.timeout, sink.publish(&self.channel, &event))
            .await
            .map_err(|_| PublishError::Timeout)??;

        log::info!(
            "Published submission from {} to {} subscriber(s)",
            submission.name,
            reached
        );
        Ok(event)
    }
}
