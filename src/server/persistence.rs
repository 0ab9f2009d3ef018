//! Best-effort storage of accepted submissions.
//!
//! The submission endpoint calls the store before publishing and only logs a
//! failure; storage never gates real-time delivery.

use async_trait::async_trait;
use serde::Serialize;

use crate::channel::Submission;
use crate::config::D1Settings;
use crate::constants::HTTP_REQUEST_TIMEOUT;

/// Errors from a persistence attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Account, database or token is missing.
    NotConfigured,
    /// The request could not be sent or its response read.
    Request(String),
    /// The remote API answered with a non-success status.
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(
                f,
                "Missing Cloudflare credentials (CLOUDFLARE_ACCOUNT_ID, CLOUDFLARE_DATABASE_ID, CLOUDFLARE_API_TOKEN)"
            ),
            Self::Request(msg) => write!(f, "D1 request failed: {msg}"),
            Self::Rejected { status, body } => write!(f, "D1 query failed ({status}): {body}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Somewhere to record accepted submissions.
#[async_trait]
pub trait SubmissionStore: Send + Sync + std::fmt::Debug {
    /// Store one submission.
    async fn save(&self, submission: &Submission) -> Result<(), PersistenceError>;
}

#[derive(Serialize)]
struct QueryBody<'a> {
    sql: &'a str,
    params: [&'a str; 3],
}

const INSERT_SUBMISSION_SQL: &str =
    "INSERT INTO form_submissions (name, email, message) VALUES (?, ?, ?)";

/// Cloudflare D1 over its REST query API.
#[derive(Debug, Clone)]
pub struct D1Store {
    client: reqwest::Client,
    query_url: String,
    api_token: String,
}

impl D1Store {
    /// Build a store from settings; fails when any field is missing.
    pub fn new(settings: &D1Settings) -> Result<Self, PersistenceError> {
        if !settings.is_complete() {
            return Err(PersistenceError::NotConfigured);
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PersistenceError::Request(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            query_url: format!(
                "{}/accounts/{}/d1/database/{}/query",
                settings.api_base.trim_end_matches('/'),
                settings.account_id,
                settings.database_id
            ),
            api_token: settings.api_token.clone(),
        })
    }

    /// Full query endpoint URL.
    pub fn query_url(&self) -> &str {
        &self.query_url
    }
}

#[async_trait]
impl SubmissionStore for D1Store {
    async fn save(&self, submission: &Submission) -> Result<(), PersistenceError> {
        let body = QueryBody {
            sql: INSERT_SUBMISSION_SQL,
            params: [
                submission.name.as_str(),
                submission.email.as_str(),
                submission.message.as_str(),
            ],
        };

        let response = self
            .client
            .post(&self.query_url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PersistenceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        log::info!("Saved submission from {} to D1", submission.name);
        Ok(())
    }
}
