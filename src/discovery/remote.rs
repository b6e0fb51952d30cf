use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::error::Category;
use thiserror::Error;

use super::DiscoveryEngine;
use crate::model::{DiscoveryRecord, Source};

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport { url: String, source: reqwest::Error },
    #[error("{url} responded with {status}")]
    Status { url: String, status: StatusCode },
    #[error("{url} did not return json: {source}")]
    NotJson {
        url: String,
        source: serde_json::Error,
    },
    #[error("{url} returned an invalid discovery document: {source}")]
    Schema {
        url: String,
        source: serde_json::Error,
    },
}

/// Fetches discovery documents with a plain GET, one request per source and
/// no retries.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: reqwest::Client,
}

impl HttpDiscovery {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DiscoveryEngine for HttpDiscovery {
    type Error = FetchError;

    async fn fetch(&self, source: &Source) -> Result<Vec<DiscoveryRecord>, FetchError> {
        let url = source.url.to_string();
        tracing::debug!("fetching {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        parse_records(&url, &body)
    }
}

fn parse_records(url: &str, body: &[u8]) -> Result<Vec<DiscoveryRecord>, FetchError> {
    serde_json::from_slice(body).map_err(|source| match source.classify() {
        Category::Data => FetchError::Schema {
            url: url.to_owned(),
            source,
        },
        _ => FetchError::NotJson {
            url: url.to_owned(),
            source,
        },
    })
}
