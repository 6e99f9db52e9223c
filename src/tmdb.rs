use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

const TMDB_BASE: &str = "https://api.themoviedb.org/3";

/// Failure modes of a single upstream fetch. Non-2xx statuses stay
/// distinct so the handler can relay them verbatim.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream body was not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait MetadataApi: Send + Sync {
    /// Fetches one endpoint with the given string params and returns the
    /// upstream JSON unreshaped.
    async fn fetch(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> Result<Value, UpstreamError>;

    /// Whether the server-held upstream credential is present.
    fn configured(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl TmdbClient {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("TMDB_API_KEY").ok().filter(|s| !s.is_empty());
        Self::new(TMDB_BASE.to_string(), api_key)
    }

    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self> {
        let user_agent = format!("pirateone-gateway/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn build_url(&self, endpoint: &str, params: &HashMap<String, String>) -> String {
        let mut url = format!("{}{}", self.base_url, endpoint);
        let mut separator = '?';
        if let Some(key) = &self.api_key {
            url.push(separator);
            url.push_str("api_key=");
            url.push_str(&urlencoding::encode(key));
            separator = '&';
        }
        for (name, value) in params {
            url.push(separator);
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
            separator = '&';
        }
        url
    }
}

#[async_trait]
impl MetadataApi for TmdbClient {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> Result<Value, UpstreamError> {
        let url = self.build_url(endpoint, params);
        let res = self.client.get(&url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }
        let bytes = res.bytes().await?;
        let value = serde_json::from_slice(&bytes)?;
        Ok(value)
    }

    fn configured(&self) -> bool {
        self.api_key.is_some()
    }
}
