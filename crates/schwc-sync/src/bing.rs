//! Bing Web Search API.

use std::time::Duration;

use async_trait::async_trait;
use schwc_core::{CapabilityError, SearchCapability, SearchResponse};
use serde::Deserialize;
use tracing::info;

use crate::http::{build_client, capability_error, search_response};
use crate::SyncError;

pub const SOURCE: &str = "BING";
const FIELDS_OF_INTEREST: &[&str] = &["name", "snippet"];
const ITEMS_PATH: &[&str] = &["webPages", "value"];
/// Results per request. Bing caps this at 50.
const RESULT_COUNT: &str = "50";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BingCredentials {
    #[serde(rename = "bing_search_api_key", default)]
    pub api_key: String,
    #[serde(rename = "bing_search_endpoint", default)]
    pub endpoint: String,
}

pub struct BingSearch {
    client: reqwest::Client,
    credentials: BingCredentials,
    timeout: Duration,
}

impl BingSearch {
    pub fn new(credentials: BingCredentials, timeout: Duration) -> Result<Self, SyncError> {
        let missing: Vec<&str> = [
            ("bing_search_api_key", &credentials.api_key),
            ("bing_search_endpoint", &credentials.endpoint),
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
impl SearchCapability for BingSearch {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, CapabilityError> {
        info!(query, "bing search");
        let resp = self
            .client
            .get(&self.credentials.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.credentials.api_key)
            .query(&[
                ("q", query),
                ("cc", "BR"),
                ("count", RESULT_COUNT),
                ("mkt", "pt-BR"),
                ("responseFilter", "Webpages"),
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

    #[tokio::test]
    async fn search_sends_key_header_and_reads_web_pages() {
        let mut server = Server::new_async().await;
        let body = json!({
            "webPages": {"value": [
                {"name": "Carregador Turbo", "snippet": "carregador USB-C", "url": "http://x"},
                {"name": "Fonte", "deepLinks": [{"name": "Loja", "snippet": ""}]}
            ]}
        });
        let mock = server
            .mock("GET", "/v7.0/search")
            .match_header("Ocp-Apim-Subscription-Key", "secret")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "9876543210".into()),
                Matcher::UrlEncoded("cc".into(), "BR".into()),
                Matcher::UrlEncoded("count".into(), "50".into()),
                Matcher::UrlEncoded("mkt".into(), "pt-BR".into()),
                Matcher::UrlEncoded("responseFilter".into(), "Webpages".into()),
            ]))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let bing = BingSearch::new(
            BingCredentials {
                api_key: "secret".into(),
                endpoint: format!("{}/v7.0/search", server.url()),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(bing.source(), "BING");
        let resp = bing.search("9876543210").await.unwrap();

        assert_eq!(resp.fields, vec!["name", "snippet"]);
        assert_eq!(resp.text, "Carregador Turbo carregador USB-C Fonte Loja");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn undecodable_body_is_null_contents() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v7.0/search")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("<html>busy</html>")
            .create_async()
            .await;

        let bing = BingSearch::new(
            BingCredentials {
                api_key: "secret".into(),
                endpoint: format!("{}/v7.0/search", server.url()),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let resp = bing.search("1").await.unwrap();
        assert_eq!(resp.status_code, 503);
        assert_eq!(resp.raw_contents, serde_json::Value::Null);
    }

    #[test]
    fn credentials_deserialize_from_table() {
        let creds: BingCredentials = serde_json::from_value(json!({
            "bing_search_api_key": "k",
            "bing_search_endpoint": "https://api.bing.microsoft.com/v7.0/search",
            "google_search_api_key": "ignored"
        }))
        .unwrap();
        assert_eq!(creds.api_key, "k");
        assert!(BingSearch::new(creds, Duration::from_secs(1)).is_ok());
    }
}
