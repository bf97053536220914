//! Shared HTTP plumbing and the catalog download client.

use std::time::Duration;

use async_trait::async_trait;
use schwc_core::{CapabilityError, CatalogFetcher, SearchResponse};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::{extract_text, lookup};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("missing required {provider} credentials: {missing}")]
    Credentials {
        provider: &'static str,
        missing: String,
    },
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, SyncError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Map a request failure to the capability taxonomy.
pub(crate) fn capability_error(err: reqwest::Error, timeout: Duration) -> CapabilityError {
    if err.is_timeout() {
        CapabilityError::Timeout(timeout)
    } else {
        CapabilityError::Transport(err.to_string())
    }
}

/// Reduce a provider response to a [`SearchResponse`].
///
/// The body is decoded as JSON when possible. Text is only extracted from
/// successful responses, from the items found under `items_path`.
pub(crate) async fn search_response(
    resp: reqwest::Response,
    items_path: &[&str],
    fields_of_interest: &[&str],
    timeout: Duration,
) -> Result<SearchResponse, CapabilityError> {
    let status = resp.status().as_u16();
    let body = resp
        .text()
        .await
        .map_err(|e| capability_error(e, timeout))?;
    let raw_contents: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    let (fields, text) = if status == 200 {
        match lookup(&raw_contents, items_path) {
            Some(items) => extract_text(items, fields_of_interest),
            None => (Vec::new(), String::new()),
        }
    } else {
        warn!(status, "search provider returned an error status");
        (Vec::new(), String::new())
    };
    debug!(status, fields = fields.len(), chars = text.len(), "search response");

    Ok(SearchResponse {
        status_code: status,
        fields,
        text,
        raw_contents,
    })
}

/// Downloads the product catalog over HTTP(S).
pub struct HttpCatalogFetcher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpCatalogFetcher {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_client(timeout)?,
            url,
            timeout,
        })
    }
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    fn location(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<u8>, CapabilityError> {
        info!(url = %self.url, "downloading catalog");
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| capability_error(e, self.timeout))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| capability_error(e, self.timeout))?;
        info!(bytes = bytes.len(), "catalog downloaded");
        Ok(bytes.to_vec())
    }
}
