use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Who is calling, for rate-limit bucketing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Authenticated { user_id: String },
    Guest { ip: String },
}

impl Caller {
    /// Key used to bucket rate-limit counters.
    pub fn rate_key(&self) -> String {
        match self {
            Caller::Authenticated { user_id } => format!("user:{user_id}"),
            Caller::Guest { ip } => format!("ip:{ip}"),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::Authenticated { .. })
    }
}

/// Session backend lookup. `Ok(None)` means the token did not resolve to a
/// user; both that and `Err` leave the caller at the guest tier.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn resolve_user(&self, bearer: &str) -> Result<Option<String>>;
}

pub struct AuthClient {
    client: Client,
    base_url: Option<String>,
    anon_key: Option<String>,
}

impl AuthClient {
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("AUTH_URL").ok().filter(|s| !s.is_empty());
        let anon_key = env::var("AUTH_ANON_KEY").ok().filter(|s| !s.is_empty());
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build auth HTTP client")?;
        Ok(Self {
            client,
            base_url,
            anon_key,
        })
    }
}

#[async_trait]
impl AuthApi for AuthClient {
    async fn resolve_user(&self, bearer: &str) -> Result<Option<String>> {
        let Some(base) = &self.base_url else {
            return Ok(None);
        };

        #[derive(Deserialize)]
        struct User {
            id: String,
        }

        let mut request = self
            .client
            .get(format!("{base}/auth/v1/user"))
            .header("Authorization", format!("Bearer {bearer}"));
        if let Some(key) = &self.anon_key {
            request = request.header("apikey", key);
        }

        let res = request.send().await.context("auth request failed")?;
        if !res.status().is_success() {
            return Ok(None);
        }
        let user: User = res.json().await.context("auth response parse failed")?;
        Ok(Some(user.id))
    }
}

/// Identifies the caller for rate limiting.
pub async fn identify(auth: &dyn AuthApi, headers: &HeaderMap) -> Caller {
    if let Some(bearer) = bearer_token(headers) {
        match auth.resolve_user(bearer).await {
            Ok(Some(user_id)) => return Caller::Authenticated { user_id },
            Ok(None) => debug!("Bearer token did not resolve, treating as guest"),
            Err(e) => debug!("Auth check failed, treating as guest: {}", e),
        }
    }
    Caller::Guest {
        ip: client_ip(headers),
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Client address hint: first hop of x-forwarded-for, else x-real-ip, else
/// a shared sentinel bucket.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).expect("header name"),
                HeaderValue::from_str(value).expect("header value"),
            );
        }
        map
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(client_ip(&map), "203.0.113.7");
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let map = headers(&[("x-real-ip", "198.51.100.4")]);
        assert_eq!(client_ip(&map), "198.51.100.4");
    }

    #[test]
    fn missing_hints_fall_back_to_unknown() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn bearer_token_requires_the_scheme_prefix() {
        let map = headers(&[("authorization", "Bearer abc123")]);
        assert_eq!(bearer_token(&map), Some("abc123"));

        let map = headers(&[("authorization", "Basic abc123")]);
        assert_eq!(bearer_token(&map), None);

        let map = headers(&[("authorization", "Bearer ")]);
        assert_eq!(bearer_token(&map), None);
    }

    #[test]
    fn rate_keys_are_tier_prefixed() {
        let user = Caller::Authenticated {
            user_id: "u-42".to_string(),
        };
        let guest = Caller::Guest {
            ip: "1.2.3.4".to_string(),
        };
        assert_eq!(user.rate_key(), "user:u-42");
        assert_eq!(guest.rate_key(), "ip:1.2.3.4");
    }
}
