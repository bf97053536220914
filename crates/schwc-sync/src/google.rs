//! Google Custom Search JSON API.

use std::time::Duration;

use async_trait::async_trait;
use schwc_core::{CapabilityError, SearchCapability, SearchResponse};
use serde::Deserialize;
use tracing::info;

use crate::http::{build_client, capability_error, search_response};
use crate::SyncError;

pub const SOURCE: &str = "GOOGLE";
const FIELDS_OF_INTEREST: &[&str] = &["title", "snippet", "og:title", "og:description"];
const ITEMS_PATH: &[&str] = &["items"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleCredentials {
    #[serde(rename = "google_search_api_key", default)]
    pub api_key: String,
    #[serde(rename = "google_search_endpoint", default)]
    pub endpoint: String,
    #[serde(rename = "google_search_engine_id", default)]
    pub engine_id: String,
}

pub struct GoogleSearch {
    client: reqwest::Client,
    credentials: GoogleCredentials,
    timeout: Duration,
}

impl GoogleSearch {
    pub fn new(credentials: GoogleCredentials, timeout: Duration) -> Result<Self, SyncError> {
        let missing: Vec<&str> = [
            ("google_search_api_key", &credentials.api_key),
            ("google_search_endpoint", &credentials.endpoint),
            ("google_search_engine_id", &credentials.engine_id),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();
        if !missing.is_empty() {
            return Err(SyncError::Credentials {
                provider: SOURCE,
                missing: missing.join(", "),
            });
        }
        Ok(Self {
            client: build_client(timeout)?,
            credentials,
            timeout,
        })
    }
}

#[async_trait]
impl SearchCapability for GoogleSearch {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, CapabilityError> {
        info!(query, "google search");
        let resp = self
            .client
            .get(&self.credentials.endpoint)
            .query(&[
                ("q", query),
                ("key", self.credentials.api_key.as_str()),
                ("cx", self.credentials.engine_id.as_str()),
                ("cr", "countryBR"),
                ("lr", "lang_pt"),
            ])
            .send()
            .await
            .map_err(|e| capability_error(e, self.timeout))?;
        search_response(resp, ITEMS_PATH, FIELDS_OF_INTEREST, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn credentials(endpoint: String) -> GoogleCredentials {
        GoogleCredentials {
            api_key: "k3y".into(),
            endpoint,
            engine_id: "engine".into(),
        }
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = GoogleSearch::new(
            GoogleCredentials {
                api_key: "k".into(),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        let msg = err.to_string();
        assert!(msg.contains("google_search_endpoint"));
        assert!(msg.contains("google_search_engine_id"));
        assert!(!msg.contains("google_search_api_key"));
    }

    #[tokio::test]
    async fn search_extracts_item_text() {
        let mut server = Server::new_async().await;
        let body = json!({
            "items": [
                {"title": "Roteador AX3000", "snippet": "roteador dual band",
                 "pagemap": {"metatags": [{"og:title": "Roteador"}]}},
                {"title": "Manual", "link": "http://example.com"}
            ]
        });
        let mock = server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "1234567890".into()),
                Matcher::UrlEncoded("key".into(), "k3y".into()),
                Matcher::UrlEncoded("cx".into(), "engine".into()),
                Matcher::UrlEncoded("cr".into(), "countryBR".into()),
                Matcher::UrlEncoded("lr".into(), "lang_pt".into()),
            ]))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let google = GoogleSearch::new(
            credentials(format!("{}/customsearch/v1", server.url())),
            Duration::from_secs(5),
        )
        .unwrap();
        let resp = google.search("1234567890").await.unwrap();

        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.fields, vec!["title", "snippet", "og:title"]);
        assert_eq!(resp.text, "Roteador AX3000 roteador dual band Roteador Manual");
        assert_eq!(resp.raw_contents, body);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn no_items_means_no_text() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"searchInformation": {"totalResults": "0"}}"#)
            .create_async()
            .await;

        let google = GoogleSearch::new(
            credentials(format!("{}/customsearch/v1", server.url())),
            Duration::from_secs(5),
        )
        .unwrap();
        let resp = google.search("0000000000").await.unwrap();
        assert!(resp.is_success());
        assert!(resp.text.is_empty());
        assert!(resp.fields.is_empty());
    }

    #[tokio::test]
    async fn throttled_status_is_a_response() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(r#"{"error": {"code": 429}}"#)
            .create_async()
            .await;

        let google = GoogleSearch::new(
            credentials(format!("{}/customsearch/v1", server.url())),
            Duration::from_secs(5),
        )
        .unwrap();
        let resp = google.search("1234567890").await.unwrap();
        assert_eq!(resp.status_code, 429);
        assert!(resp.text.is_empty());
        assert_eq!(resp.raw_contents["error"]["code"], 429);
    }
}
