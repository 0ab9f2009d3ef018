//! Submission input and the event published for it.

use serde::{Deserialize, Serialize};

/// A form submission as posted by a submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Submitter's name.
    pub name: String,
    /// Submitter's email.
    pub email: String,
    /// Free-form message.
    pub message: String,
}

impl Submission {
    /// Human-readable one-line summary shown to viewers.
    pub fn summary(&self) -> String {
        format!(
            "New form submission from {} ({}): {}",
            self.name, self.email, self.message
        )
    }
}

/// Payload of a `form-submission` event, as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    /// Prebuilt human-readable summary.
    pub message: String,
    /// Submitter's name.
    pub name: String,
    /// Submitter's email.
    pub email: String,
    /// The submitter's original message.
    pub user_message: String,
    /// Publish time, epoch milliseconds; 0 when the publisher sent none.
    #[serde(default)]
    pub timestamp: i64,
}

/// An event on a channel.
///
/// Fields are read-only once constructed; consumers each get their own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEvent {
    event_name: String,
    payload: SubmissionPayload,
}

impl ChannelEvent {
    /// Wrap a decoded payload.
    pub fn new(event_name: impl Into<String>, payload: SubmissionPayload) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
        }
    }

    /// Build the event for `submission`, stamped with `published_at_ms`.
    pub fn from_submission(
        event_name: impl Into<String>,
        submission: &Submission,
        published_at_ms: i64,
    ) -> Self {
        Self::new(
            event_name,
            SubmissionPayload {
                message: submission.summary(),
                name: submission.name.clone(),
                email: submission.email.clone(),
                user_message: submission.message.clone(),
                timestamp: published_at_ms,
            },
        )
    }

    /// Event name, e.g. `form-submission`.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Event payload.
    pub fn payload(&self) -> &SubmissionPayload {
        &self.payload
    }
}
