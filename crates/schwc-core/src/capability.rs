//! External capabilities injected into the engine: web search and catalog download.
//!
//! The engine never talks to a concrete provider. HTTP implementations live in
//! `schwc-sync`; tests substitute scripted in-memory versions.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure of a call to an external capability.
///
/// Every variant is retryable from the caller's point of view.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// A provider response, reduced to what the engine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub status_code: u16,
    /// Leaf names of the result fields that contributed to `text`.
    pub fields: Vec<String>,
    /// Concatenated text of the fields of interest.
    pub text: String,
    /// The provider's JSON body, `Null` when the body could not be decoded.
    pub raw_contents: serde_json::Value,
}

impl SearchResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// A web search provider.
///
/// Non-success HTTP statuses are returned as a [`SearchResponse`] carrying the
/// status code. Only failures without a response (transport, timeout) are errors.
#[async_trait]
pub trait SearchCapability: Send + Sync {
    /// Provider name recorded in word-cloud metadata ("GOOGLE", "BING").
    fn source(&self) -> &str;

    async fn search(&self, query: &str) -> Result<SearchResponse, CapabilityError>;
}

/// Downloads the raw catalog artifact.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Where the catalog comes from, for logs.
    fn location(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<u8>, CapabilityError>;
}
