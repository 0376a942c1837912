use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::error;
use serde_json::Value;

const ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Wraps links with a user's URL shortener.
#[async_trait]
pub trait Shortener: Send + Sync {
    /// Shorten `link` through `domain`, falling back to `link` itself when that fails.
    async fn shorten(&self, domain: &str, api_key: &str, link: &str) -> String;
}

/// Client for shorteners exposing `GET https://{domain}/api?api={key}&url={link}`.
pub struct HttpShortener {
    http: reqwest::Client,
}

impl HttpShortener {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
        })
    }

    async fn request(&self, domain: &str, api_key: &str, link: &str) -> Result<String> {
        let data: Value = self
            .http
            .get(format!("https://{}/api", domain))
            .query(&[("api", api_key), ("url", link)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        shortened_url(&data).ok_or_else(|| {
            anyhow!(
                "{}",
                data.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
            )
        })
    }
}

fn shortened_url(data: &Value) -> Option<String> {
    if data.get("status").and_then(Value::as_str) != Some("success") {
        return None;
    }
    data.get("shortenedUrl")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Shortener for HttpShortener {
    async fn shorten(&self, domain: &str, api_key: &str, link: &str) -> String {
        for attempt in 1..=ATTEMPTS {
            match self.request(domain, api_key, link).await {
                Ok(short) => return short,
                Err(err) => error!(
                    "Shortener {} failed (attempt {}/{}): {}",
                    domain, attempt, ATTEMPTS, err
                ),
            }
            if attempt < ATTEMPTS {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
        error!("All shortener attempts via {} failed, using the original link", domain);
        link.to_string()
    }
}
