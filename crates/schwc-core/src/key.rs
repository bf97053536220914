//! Homologation key normalisation.
//!
//! The catalog publishes homologation numbers as bare digits ("1234567890")
//! while the annotation spreadsheets store them in display form
//! ("12345-67-890"). Both sides are compared through [`HomologationKey`],
//! which keeps only the ASCII/Unicode alphanumeric characters of the input.
//!
//! # Display form
//!
//! - First 5 characters, a dash, the next 2 characters, a dash, the rest.
//! - Keys shorter than 8 characters have no display form and are written as-is.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A homologation number with all separators stripped.
///
/// Two raw values that differ only in punctuation or whitespace produce
/// equal keys, so this is the type used for every join between the catalog
/// and the annotation ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HomologationKey(String);

impl HomologationKey {
    /// Normalise a raw homologation number.
    ///
    /// Returns `None` when nothing alphanumeric is left, which is how rows with
    /// a missing primary key are detected.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display form used in the `Homologação` column of annotation files.
    ///
    /// "1234567890" → "12345-67-890"
    pub fn display_form(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() < 8 {
            return self.0.clone();
        }
        let head: String = chars[..5].iter().collect();
        let mid: String = chars[5..7].iter().collect();
        let tail: String = chars[7..].iter().collect();
        format!("{head}-{mid}-{tail}")
    }
}

impl fmt::Display for HomologationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HomologationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
