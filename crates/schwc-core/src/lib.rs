pub mod capability;
pub mod key;
pub mod record;
pub mod schema;
mod stopwords;
pub mod wordcloud;

pub use capability::{CapabilityError, CatalogFetcher, SearchCapability, SearchResponse};
pub use key::HomologationKey;
pub use record::{
    Actor, AnnotationRecord, CatalogRecord, Category, Outcome, SearchResult, ANNOTATION_TS_FORMAT,
    WORDCLOUD_ATTRIBUTE,
};
pub use wordcloud::WordCloud;
