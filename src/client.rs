//! HTTP client for the submission endpoint.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::channel::Submission;
use crate::constants::{HTTP_REQUEST_TIMEOUT, SUBMIT_PATH};

#[derive(Debug, Deserialize)]
struct SuccessBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Posts submissions to a formcast server.
#[derive(Debug, Clone)]
pub struct SubmissionClient {
    client: reqwest::Client,
    url: String,
}

impl SubmissionClient {
    /// Client for `server_url` (without the endpoint path).
    pub fn new(server_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}{}", server_url.trim_end_matches('/'), SUBMIT_PATH),
        })
    }

    /// Submit and return the server's confirmation message.
    ///
    /// A non-success answer becomes an error carrying the server's message.
    pub async fn submit(&self, submission: &Submission) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(submission)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .map_or_else(|_| "no error detail".to_string(), |b| b.error);
            anyhow::bail!("Submission failed ({}): {}", status, detail);
        }

        let body: SuccessBody = response
            .json()
            .await
            .context("Invalid response from server")?;
        Ok(body.message)
    }
}
