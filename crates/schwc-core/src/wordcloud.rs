//! Word-frequency extraction for search result text.
//!
//! The annotation payload is a small JSON document describing the most
//! frequent words found in the search results for one homologation number.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::stopwords::is_stopword;

/// Number of words kept in a cloud.
pub const N_WORDS: usize = 25;
pub const WORDCLOUD_VERSION: u32 = 1;
pub const WORDCLOUD_MODE: &str = "API";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordCloudMeta {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Mode")]
    pub mode: String,
    #[serde(rename = "Fields")]
    pub fields: Vec<String>,
    pub n_words: usize,
}

/// The `Valor` payload of a `WordCloud` annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordCloud {
    #[serde(rename = "metaData")]
    pub meta: WordCloudMeta,
    #[serde(rename = "searchedWord")]
    pub searched_word: String,
    /// JSON object `{word: count}`, or an empty string when nothing was found.
    #[serde(rename = "cloudOfWords")]
    pub cloud_of_words: String,
}

impl WordCloud {
    pub fn build(query: &str, source: &str, fields: &[String], text: &str) -> Self {
        Self {
            meta: WordCloudMeta {
                version: WORDCLOUD_VERSION,
                source: source.to_string(),
                mode: WORDCLOUD_MODE.to_string(),
                fields: fields.to_vec(),
                n_words: N_WORDS,
            },
            searched_word: query.to_string(),
            cloud_of_words: cloud_of_words(text, N_WORDS),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cloud_of_words.is_empty()
    }
}

/// Lower-cased alphabetic tokens of at least two characters, stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|tok| tok.chars().count() >= 2 && tok.chars().all(char::is_alphabetic))
        .filter(|tok| !is_stopword(tok))
        .map(str::to_string)
        .collect()
}

/// The `n` most frequent tokens, most frequent first. Ties keep first-seen order.
pub fn word_counts(text: &str, n: usize) -> Vec<(String, usize)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(String, usize)> = Vec::new();
    for token in tokenize(text) {
        match index.get(&token) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(token.clone(), counts.len());
                counts.push((token, 1));
            }
        }
    }
    // Stable sort keeps insertion order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(n);
    counts
}

/// Serialise the top `n` words as a JSON object, or `""` when there are none.
pub fn cloud_of_words(text: &str, n: usize) -> String {
    let counts = word_counts(text, n);
    if counts.is_empty() {
        return String::new();
    }
    let map: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(word, count)| (word, serde_json::Value::from(count)))
        .collect();
    serde_json::Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_short_numeric_and_stopwords() {
        let tokens = tokenize("O Roteador X 5G de 2024 e_mail para casa");
        assert_eq!(tokens, vec!["roteador", "casa"]);
    }

    #[test]
    fn tokenize_keeps_accented_words() {
        assert_eq!(tokenize("Câmera Ação"), vec!["câmera", "ação"]);
    }

    #[test]
    fn counts_are_sorted_with_stable_ties() {
        let counts = word_counts("modem router modem antenna router modem", 10);
        assert_eq!(
            counts,
            vec![
                ("modem".to_string(), 3),
                ("router".to_string(), 2),
                ("antenna".to_string(), 1),
            ]
        );

        let tied = word_counts("beta alpha gamma", 10);
        let words: Vec<&str> = tied.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, vec!["beta", "alpha", "gamma"]);
    }

    #[test]
    fn counts_are_truncated() {
        let counts = word_counts("aa bb cc dd ee", 2);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn empty_text_gives_empty_cloud() {
        assert_eq!(cloud_of_words("", N_WORDS), "");
        assert_eq!(cloud_of_words("the and de 42", N_WORDS), "");
    }

    #[test]
    fn cloud_is_ordered_json_object() {
        let cloud = cloud_of_words("sensor sensor câmera", N_WORDS);
        assert_eq!(cloud, r#"{"sensor":2,"câmera":1}"#);
    }

    #[test]
    fn wordcloud_serialises_with_spreadsheet_names() {
        let wc = WordCloud::build("1234567890", "GOOGLE", &["title".to_string()], "tablet");
        let json = serde_json::to_value(&wc).unwrap();
        assert_eq!(json["searchedWord"], "1234567890");
        assert_eq!(json["metaData"]["Source"], "GOOGLE");
        assert_eq!(json["metaData"]["Mode"], "API");
        assert_eq!(json["metaData"]["n_words"], 25);
        assert_eq!(json["cloudOfWords"], r#"{"tablet":1}"#);
        assert!(!wc.is_empty());
    }
}
