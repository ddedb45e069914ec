//! Upstream price source

use crate::error::{FetchError, ServiceResult};

use async_trait::async_trait;
use serde::Deserialize;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Price for one asset; `None` when the upstream has no quote
    async fn price(&self, asset: &str) -> Result<Option<f64>, FetchError>;
}

/// Price API reached over HTTP: `GET {upstream_url}?asset={asset}`
pub struct HttpPriceSource {
    client: reqwest::Client,
    upstream_url: String,
}

impl HttpPriceSource {
    /// No request timeout here; the fetcher bounds each attempt
    pub fn new(upstream_url: impl Into<String>) -> ServiceResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            upstream_url: upstream_url.into(),
        })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn price(&self, asset: &str) -> Result<Option<f64>, FetchError> {
        validate_asset_key(asset)?;

        let response = self
            .client
            .get(&self.upstream_url)
            .query(&[("asset", asset)])
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        classify_price_response(status, &body)
    }
}

/// Reject keys that cannot be an asset identifier before spending a request
pub fn validate_asset_key(asset: &str) -> Result<(), FetchError> {
    if asset.is_empty() || asset.len() > 128 {
        return Err(FetchError::Malformed(format!("invalid asset key {:?}", asset)));
    }
    if asset.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(FetchError::Malformed(format!("invalid asset key {:?}", asset)));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PriceReply {
    price: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests")
}

/// Classify a raw upstream reply
pub fn classify_price_response(status: u16, body: &str) -> Result<Option<f64>, FetchError> {
    if status == 429 {
        return Err(FetchError::RateLimited);
    }

    if !(200..300).contains(&status) {
        if mentions_rate_limit(body) {
            return Err(FetchError::RateLimited);
        }
        return Err(FetchError::Http {
            status,
            message: body.trim().chars().take(200).collect(),
        });
    }

    let reply: PriceReply = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("price response: {}", e)))?;

    // Some upstreams signal throttling inside a 200 body
    if let Some(error) = reply.error {
        if mentions_rate_limit(&error) {
            return Err(FetchError::RateLimited);
        }
        return Err(FetchError::Http {
            status,
            message: error,
        });
    }

    Ok(reply.price)
}
