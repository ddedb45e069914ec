//! Transaction builder boundary
//!
//! Turns an intent into an unsigned envelope. The builder answers with
//! either an envelope, a structured precondition failure carrying a
//! ready-made recovery envelope, or a plain failure.

use super::types::{
    AssetRef, Envelope, Intent, PreconditionError, RecoveryPlan, TRUSTLINE_MISSING_CODE,
};
use crate::config::BuilderConfig;
use crate::error::{BuildError, ServiceResult};

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuilderClient: Send + Sync {
    /// Build an unsigned envelope for the intent
    async fn build(&self, intent: &Intent) -> Result<Envelope, BuildError>;
}

/// Builder reached over HTTP
pub struct HttpBuilderClient {
    client: reqwest::Client,
    base_url: String,
    default_slippage_bps: u32,
}

impl HttpBuilderClient {
    pub fn new(config: &BuilderConfig) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_slippage_bps: config.default_slippage_bps,
        })
    }
}

#[async_trait]
impl BuilderClient for HttpBuilderClient {
    async fn build(&self, intent: &Intent) -> Result<Envelope, BuildError> {
        let request = intent.build_request(self.default_slippage_bps);
        let url = format!("{}/{}", self.base_url, request.path);

        debug!(account = %intent.account, kind = %intent.kind(), %url, "Requesting envelope");

        let response = self
            .client
            .post(&url)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| BuildError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BuildError::Transport(e.to_string()))?;

        classify_build_response(status, &body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildReply {
    envelope: Option<String>,
    error_code: Option<i64>,
    message: Option<String>,
    recovery: Option<RecoveryReply>,
    http_status: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecoveryReply {
    envelope: String,
    asset_code: String,
    #[serde(default)]
    asset_issuer: String,
    #[serde(default)]
    description: String,
}

/// Classify a raw builder reply
pub fn classify_build_response(status: u16, body: &str) -> Result<Envelope, BuildError> {
    let success = (200..300).contains(&status);

    let reply: BuildReply = match serde_json::from_str(body) {
        Ok(reply) => reply,
        Err(e) => {
            let message = if success {
                format!("Malformed builder response: {}", e)
            } else if body.trim().is_empty() {
                format!("Builder returned status {}", status)
            } else {
                body.trim().to_string()
            };
            return Err(BuildError::Rejected {
                message,
                http_status: Some(status),
            });
        }
    };

    if reply.error_code == Some(TRUSTLINE_MISSING_CODE) {
        if let Some(recovery) = reply.recovery {
            return Err(BuildError::Precondition(PreconditionError {
                code: TRUSTLINE_MISSING_CODE,
                message: reply.message.unwrap_or_default(),
                recovery: RecoveryPlan {
                    envelope: Envelope::new(recovery.envelope),
                    asset: AssetRef {
                        code: recovery.asset_code,
                        issuer: recovery.asset_issuer,
                    },
                    description: recovery.description,
                },
            }));
        }
    }

    match (success, reply.error_code, reply.envelope) {
        (true, None, Some(envelope)) if !envelope.is_empty() => Ok(Envelope::new(envelope)),
        (_, code, _) => {
            let message = reply.message.unwrap_or_else(|| match code {
                Some(code) => format!("Builder error code {}", code),
                None => format!("Builder returned status {} without an envelope", status),
            });
            Err(BuildError::Rejected {
                message,
                http_status: reply.http_status.or(Some(status)),
            })
        }
    }
}
