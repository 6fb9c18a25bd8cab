//! HTTP fetch collaborator.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// How a remote resource should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// The body is a JSON array of identifiers.
    Json,
    /// The body is free text scanned for integer tokens.
    Text,
}

/// A successfully fetched body.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResponse {
    Json(serde_json::Value),
    Raw(Vec<u8>),
}

impl FetchResponse {
    /// An empty body counts as a failed attempt.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Json(value) => match value {
                serde_json::Value::Null => true,
                serde_json::Value::Array(items) => items.is_empty(),
                serde_json::Value::Object(map) => map.is_empty(),
                serde_json::Value::String(s) => s.is_empty(),
                _ => false,
            },
            Self::Raw(bytes) => bytes.is_empty(),
        }
    }
}

/// Fetches remote resources; returns `None` on any failure.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, format: SourceFormat) -> Option<FetchResponse>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Default request timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a fetcher with the default timeout.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, format: SourceFormat) -> Option<FetchResponse> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Fetch of {} failed: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Fetch of {} returned status {}", url, response.status());
            return None;
        }

        match format {
            SourceFormat::Json => response.json().await.ok().map(FetchResponse::Json),
            SourceFormat::Text => response
                .bytes()
                .await
                .ok()
                .map(|b| FetchResponse::Raw(b.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_responses() {
        assert!(FetchResponse::Raw(Vec::new()).is_empty());
        assert!(FetchResponse::Json(serde_json::json!([])).is_empty());
        assert!(FetchResponse::Json(serde_json::Value::Null).is_empty());
        assert!(!FetchResponse::Json(serde_json::json!([1])).is_empty());
        assert!(!FetchResponse::Raw(b"1".to_vec()).is_empty());
    }
}
