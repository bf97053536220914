//! HTTP capabilities: Google / Bing web search and the catalog download.

pub mod bing;
pub mod extract;
pub mod google;
pub mod http;

pub use bing::{BingCredentials, BingSearch};
pub use google::{GoogleCredentials, GoogleSearch};
pub use http::{HttpCatalogFetcher, SyncError};
