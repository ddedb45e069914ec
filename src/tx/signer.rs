//! External signer boundary
//!
//! The signer is user-controlled: a wallet bridge that prompts a human
//! for approval. Signing may take arbitrarily long, so no request
//! timeout is applied here.

use super::types::Envelope;
use crate::config::SignerConfig;
use crate::error::{ServiceResult, SignError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignerGateway: Send + Sync {
    /// Ask the account holder to sign the envelope
    async fn sign(&self, envelope: &Envelope, account: &str) -> Result<Envelope, SignError>;
}

/// Wallet bridge reached over HTTP
pub struct HttpSignerGateway {
    client: reqwest::Client,
    url: String,
}

impl HttpSignerGateway {
    pub fn new(config: &SignerConfig) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[derive(Serialize)]
struct SignRequest<'a> {
    envelope: &'a str,
    account: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignReply {
    signed_envelope: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl SignerGateway for HttpSignerGateway {
    async fn sign(&self, envelope: &Envelope, account: &str) -> Result<Envelope, SignError> {
        debug!(%account, ?envelope, "Requesting signature");

        let response = self
            .client
            .post(&self.url)
            .json(&SignRequest {
                envelope: envelope.as_str(),
                account,
            })
            .send()
            .await
            .map_err(|e| SignError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SignError::Unavailable(e.to_string()))?;

        classify_sign_response(status, &body)
    }
}

/// Classify a raw wallet bridge reply
pub fn classify_sign_response(status: u16, body: &str) -> Result<Envelope, SignError> {
    let reply: Option<SignReply> = serde_json::from_str(body).ok();

    if let Some(reply) = &reply {
        let rejected = matches!(
            reply.error.as_deref(),
            Some("user_rejected") | Some("rejected") | Some("cancelled")
        );
        if rejected || status == 403 {
            return Err(SignError::UserRejected(
                reply
                    .message
                    .clone()
                    .unwrap_or_else(|| "Signature request declined".to_string()),
            ));
        }
    }

    match reply {
        Some(SignReply {
            signed_envelope: Some(signed),
            ..
        }) if (200..300).contains(&status) && !signed.is_empty() => Ok(Envelope::new(signed)),
        Some(reply) => Err(SignError::Unavailable(
            reply
                .message
                .or(reply.error)
                .unwrap_or_else(|| format!("Signer returned status {}", status)),
        )),
        None if status == 403 => Err(SignError::UserRejected(
            "Signature request declined".to_string(),
        )),
        None => Err(SignError::Unavailable(format!(
            "Signer returned status {}",
            status
        ))),
    }
}
