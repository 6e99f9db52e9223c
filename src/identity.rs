use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

const DEFAULT_PIRATE_API: &str = "https://pratik-pirate-api.vercel.app";

#[async_trait]
pub trait PirateApi: Send + Sync {
    /// Fetches one random pirate identity with an absolute image URL.
    async fn random_pirate(&self) -> Result<Value>;
}

pub struct PirateClient {
    client: Client,
    base_url: String,
}

impl PirateClient {
    pub fn from_env() -> Result<Self> {
        let base_url =
            env::var("PIRATE_API_URL").unwrap_or_else(|_| DEFAULT_PIRATE_API.to_string());
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build pirate API HTTP client")?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PirateApi for PirateClient {
    async fn random_pirate(&self) -> Result<Value> {
        let res = self
            .client
            .get(format!("{}/api/pirates/random", self.base_url))
            .send()
            .await
            .context("pirate API request failed")?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("pirate API responded with status {}", status));
        }
        let mut pirate: Value = res.json().await.context("pirate API body parse failed")?;
        absolutize_image(&mut pirate, &self.base_url);
        Ok(pirate)
    }
}

/// Rewrites a relative `imagePath` against the API base.
fn absolutize_image(pirate: &mut Value, base_url: &str) {
    let relative = pirate
        .get("imagePath")
        .and_then(|v| v.as_str())
        .filter(|path| !path.starts_with("http"))
        .map(str::to_string);
    if let Some(path) = relative {
        pirate["imagePath"] = Value::String(format!("{base_url}{path}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relative_image_paths_are_absolutized() {
        let mut pirate = json!({ "name": "Anne Bonny", "imagePath": "/images/anne.png" });
        absolutize_image(&mut pirate, "https://pirates.test");
        assert_eq!(
            pirate["imagePath"],
            json!("https://pirates.test/images/anne.png")
        );
    }

    #[test]
    fn absolute_image_paths_are_untouched() {
        let mut pirate = json!({ "imagePath": "https://cdn.test/anne.png" });
        absolutize_image(&mut pirate, "https://pirates.test");
        assert_eq!(pirate["imagePath"], json!("https://cdn.test/anne.png"));
    }

    #[test]
    fn missing_image_path_is_left_alone() {
        let mut pirate = json!({ "name": "Blackbeard" });
        absolutize_image(&mut pirate, "https://pirates.test");
        assert_eq!(pirate, json!({ "name": "Blackbeard" }));
    }
}
