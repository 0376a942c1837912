use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;

pub const DEFAULT_OMDB_ENDPOINT: &str = "https://www.omdbapi.com/";

/// Finds a poster image URL for a title.
#[async_trait]
pub trait PosterLookup: Send + Sync {
    async fn find_poster(&self, title: &str, year: Option<&str>) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct OmdbResponse {
    #[serde(rename = "Poster")]
    poster: Option<String>,
    #[serde(rename = "Response")]
    response: Option<String>,
}

/// OMDb-compatible poster search.
pub struct OmdbPosters {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OmdbPosters {
    pub fn new(api_key: &str, endpoint: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn request(&self, title: &str, year: Option<&str>) -> Result<Option<String>> {
        let mut query = vec![("t", title), ("apikey", self.api_key.as_str())];
        if let Some(year) = year {
            query.push(("y", year));
        }
        let data: OmdbResponse = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(poster_url(data))
    }
}

fn poster_url(data: OmdbResponse) -> Option<String> {
    if data.response.as_deref() == Some("False") {
        return None;
    }
    data.poster
        .filter(|url| url != "N/A" && url.starts_with("http"))
}

#[async_trait]
impl PosterLookup for OmdbPosters {
    async fn find_poster(&self, title: &str, year: Option<&str>) -> Option<String> {
        match self.request(title, year).await {
            Ok(Some(url)) => {
                debug!("Found poster for '{}': {}", title, url);
                Some(url)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("Poster lookup for '{}' failed: {}", title, err);
                None
            }
        }
    }
}
