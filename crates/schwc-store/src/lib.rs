//! Storage layer: catalog cache (CSV), annotation ledger (CSV), search history (Parquet).

mod atomic;
pub mod catalog;
mod error;
pub mod history;
pub mod ledger;
pub mod sheet;

pub use catalog::{CatalogCache, CatalogOptions, CatalogTable, CATALOG_FILENAME};
pub use error::StoreError;
pub use history::{HistoryEntry, SearchHistory, SEARCH_HISTORY_FILENAME};
pub use ledger::{
    AnnotationLedger, FlushReport, LedgerDestinations, LedgerSources, PendingAnnotations,
};
