//! Broadcast of signed envelopes to the network

use super::types::Envelope;
use crate::config::BroadcastConfig;
use crate::error::{BroadcastError, ServiceResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Network verdict on a submitted envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub hash: String,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl Submission {
    /// Hash of an accepted transaction, or the network's rejection
    pub fn into_confirmed(self) -> Result<String, BroadcastError> {
        match self.status {
            SubmissionStatus::Success => Ok(self.hash),
            SubmissionStatus::Failed => Err(BroadcastError::Rejected {
                hash: self.hash,
                message: self.message.unwrap_or_else(|| "no reason given".to_string()),
            }),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BroadcastClient: Send + Sync {
    /// Submit a signed envelope
    async fn send(&self, signed: &Envelope) -> Result<Submission, BroadcastError>;
}

/// Broadcaster reached over HTTP
pub struct HttpBroadcastClient {
    client: reqwest::Client,
    url: String,
    send_timeout: Duration,
}

impl HttpBroadcastClient {
    pub fn new(config: &BroadcastConfig) -> ServiceResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            url: config.url.clone(),
            send_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    envelope: &'a str,
}

#[async_trait]
impl BroadcastClient for HttpBroadcastClient {
    async fn send(&self, signed: &Envelope) -> Result<Submission, BroadcastError> {
        let request = self
            .client
            .post(&self.url)
            .json(&SendRequest {
                envelope: signed.as_str(),
            })
            .send();

        // Send with timeout
        let response = match timeout(self.send_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(BroadcastError::Transport(e.to_string())),
            Err(_) => {
                warn!("Broadcast timed out after {:?}", self.send_timeout);
                return Err(BroadcastError::Transport(format!(
                    "timed out after {:?}",
                    self.send_timeout
                )));
            }
        };

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BroadcastError::Transport(e.to_string()))?;

        let submission = classify_broadcast_response(status, &body)?;
        info!(hash = %submission.hash, status = ?submission.status, "Transaction broadcast");
        Ok(submission)
    }
}

/// Classify a raw broadcaster reply. Non-2xx is always fatal.
pub fn classify_broadcast_response(status: u16, body: &str) -> Result<Submission, BroadcastError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        return Err(BroadcastError::Http { status, message });
    }

    serde_json::from_str::<Submission>(body).map_err(|e| BroadcastError::Http {
        status,
        message: format!("Malformed broadcast response: {}", e),
    })
}
