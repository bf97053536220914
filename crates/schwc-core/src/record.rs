//! Row types shared by the catalog cache, the annotation ledger and the crawler.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::capability::SearchResponse;
use crate::key::HomologationKey;
use crate::wordcloud::WordCloud;

/// `Atributo` value marking rows produced by this engine.
pub const WORDCLOUD_ATTRIBUTE: &str = "WordCloud";

/// Format of the `DataHora` column.
pub const ANNOTATION_TS_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Product category published in the catalog (`Categoria do Produto`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    One,
    Two,
    Three,
}

impl Category {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One catalog row. The catalog may hold several rows per homologation number
/// (one per certificate); deduplication happens in the backlog resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub key: HomologationKey,
    /// The number exactly as published.
    pub homologation_number: String,
    pub homologation_date: Option<NaiveDate>,
    pub category: Option<Category>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub product_type: Option<String>,
}

/// Outcome of a past search, stored in the `Situação` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `1`: the search produced a result.
    Positive,
    /// `-1`: searched, nothing found.
    Null,
    /// Anything else, kept verbatim so rewriting a file does not alter it.
    Other(String),
}

impl Outcome {
    /// Parse a `Situação` cell. Spreadsheet exports sometimes write `1.0`.
    pub fn from_code(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(v) if v == 1.0 => Self::Positive,
            Ok(v) if v == -1.0 => Self::Null,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Positive => "1",
            Self::Null => "-1",
            Self::Other(raw) => raw,
        }
    }

    /// Positive and null outcomes both mean "already searched".
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Positive | Self::Null)
    }
}

/// Machine and user that produced an annotation. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub computer: String,
    pub user: String,
}

impl Actor {
    pub fn new(computer: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            computer: computer.into(),
            user: user.into(),
        }
    }

    /// Read the identity from the usual Windows / Unix environment variables.
    pub fn from_env() -> Self {
        let lookup = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| std::env::var(n).ok().filter(|v| !v.is_empty()))
                .unwrap_or_else(|| "unknown".to_string())
        };
        Self {
            computer: lookup(&["COMPUTERNAME", "HOSTNAME"]),
            user: lookup(&["USERNAME", "USER"]),
        }
    }
}

/// One annotation row (`ID;DataHora;Computador;Usuário;Homologação;Atributo;Valor;Situação`).
///
/// Fields are kept as text so that rows written by other workflows survive a
/// read-modify-write cycle untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub id: String,
    pub timestamp: String,
    pub actor: Actor,
    /// `Homologação` as stored, usually in display form.
    pub homologation: String,
    pub attribute: String,
    pub value: String,
    pub outcome: Outcome,
}

impl AnnotationRecord {
    pub fn key(&self) -> Option<HomologationKey> {
        HomologationKey::parse(&self.homologation)
    }

    pub fn is_wordcloud(&self) -> bool {
        self.attribute == WORDCLOUD_ATTRIBUTE
    }
}

/// A completed search, cached in memory until the next flush.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub key: HomologationKey,
    pub status_code: u16,
    pub wordcloud: WordCloud,
    pub searched_at: NaiveDateTime,
    pub raw_contents: serde_json::Value,
}

impl SearchResult {
    /// Build the word cloud for a provider response. Only successful responses
    /// contribute words; anything else yields an empty payload.
    pub fn from_response(
        key: HomologationKey,
        source: &str,
        response: SearchResponse,
        searched_at: NaiveDateTime,
    ) -> Self {
        let text = if response.is_success() {
            response.text.as_str()
        } else {
            ""
        };
        let wordcloud = WordCloud::build(key.as_str(), source, &response.fields, text);
        Self {
            key,
            status_code: response.status_code,
            wordcloud,
            searched_at,
            raw_contents: response.raw_contents,
        }
    }

    /// The extracted payload (serialised word counts); empty when nothing was found.
    pub fn payload(&self) -> &str {
        &self.wordcloud.cloud_of_words
    }

    pub fn outcome(&self) -> Outcome {
        if self.payload().is_empty() {
            Outcome::Null
        } else {
            Outcome::Positive
        }
    }
}
