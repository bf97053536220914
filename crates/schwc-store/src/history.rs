//! Raw provider responses, appended to a Parquet log for later inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int32Array, StringArray, new_null_array};
use arrow::compute::cast;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use schwc_core::SearchResult;
use schwc_core::schema::history::search_history_schema;
use tracing::{debug, info};

use crate::StoreError;
use crate::atomic::write_replace;

pub const SEARCH_HISTORY_FILENAME: &str = "search_history.parquet";
const SEARCHED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub query: String,
    pub status_code: u16,
    pub searched_at: String,
    pub raw_contents: Option<String>,
}

impl HistoryEntry {
    pub fn from_result(result: &SearchResult) -> Self {
        let raw_contents = match &result.raw_contents {
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        };
        Self {
            query: result.key.as_str().to_string(),
            status_code: result.status_code,
            searched_at: result.searched_at.format(SEARCHED_AT_FORMAT).to_string(),
            raw_contents,
        }
    }
}

/// Buffered history log. Entries are written by [`SearchHistory::flush`].
pub struct SearchHistory {
    path: PathBuf,
    pending: Vec<HistoryEntry>,
}

impl SearchHistory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            pending: Vec::new(),
        }
    }

    /// `search_history.parquet` inside `dir`.
    pub fn in_folder(dir: &Path) -> Self {
        Self::new(dir.join(SEARCH_HISTORY_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.pending.push(entry);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append pending entries to the log file. Returns the number of rows added.
    ///
    /// Pending entries are kept when the write fails.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let schema = Arc::new(search_history_schema());
        let mut batches = if self.path.exists() {
            read_conformed(&self.path, &schema).map_err(|e| StoreError::persist(&self.path, e))?
        } else {
            Vec::new()
        };
        batches.push(entries_to_batch(&self.pending)?);

        write_replace(&self.path, |file| {
            let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
            for batch in &batches {
                writer.write(batch)?;
            }
            writer.close()?;
            Ok(())
        })
        .map_err(|e| StoreError::persist(&self.path, e))?;

        let added = self.pending.len();
        self.pending.clear();
        info!(path = %self.path.display(), rows = added, "search history saved");
        Ok(added)
    }
}

/// Read every entry of a history file.
pub fn read_history(path: &Path) -> Result<Vec<HistoryEntry>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let schema = Arc::new(search_history_schema());
    let mut entries = Vec::new();
    for batch in read_conformed(path, &schema)? {
        entries.extend(entries_from_batch(&batch)?);
    }
    debug!(path = %path.display(), rows = entries.len(), "read search history");
    Ok(entries)
}

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

/// Read a history file and project every batch onto `schema`.
fn read_conformed(path: &Path, schema: &SchemaRef) -> Result<Vec<RecordBatch>, StoreError> {
    read_parquet(path)?
        .iter()
        .map(|batch| conform(batch, schema))
        .collect()
}

/// Project `batch` onto `schema`: absent columns become nulls, others are cast.
fn conform(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch, StoreError> {
    if batch.schema() == *schema {
        return Ok(batch.clone());
    }
    let columns = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(col) if col.data_type() == field.data_type() => Ok(col.clone()),
            Some(col) => cast(col, field.data_type()),
            None => Ok(new_null_array(field.data_type(), batch.num_rows())),
        })
        .collect::<Result<Vec<ArrayRef>, _>>()?;
    debug!(
        columns = batch.num_columns(),
        rows = batch.num_rows(),
        "carried forward search history batch with an older layout"
    );
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn entries_to_batch(entries: &[HistoryEntry]) -> Result<RecordBatch, StoreError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            entries.iter().map(|e| e.query.as_str()),
        )),
        Arc::new(Int32Array::from_iter_values(
            entries.iter().map(|e| i32::from(e.status_code)),
        )),
        Arc::new(StringArray::from_iter_values(
            entries.iter().map(|e| e.searched_at.as_str()),
        )),
        Arc::new(
            entries
                .iter()
                .map(|e| e.raw_contents.as_deref())
                .collect::<StringArray>(),
        ),
    ];
    Ok(RecordBatch::try_new(
        Arc::new(search_history_schema()),
        columns,
    )?)
}

fn entries_from_batch(batch: &RecordBatch) -> Result<Vec<HistoryEntry>, StoreError> {
    let malformed = |name: &str| StoreError::Malformed {
        what: "search history".into(),
        reason: format!("missing or mistyped column '{name}'"),
    };
    let text = |name: &str| {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| malformed(name))
    };
    let query = text("query")?;
    let searched_at = text("searched_at")?;
    let raw = text("raw_contents")?;
    let status = batch
        .column_by_name("status_code")
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| malformed("status_code"))?;

    let text_at = |col: &StringArray, row: usize| {
        (!col.is_null(row)).then(|| col.value(row).to_string())
    };
    Ok((0..batch.num_rows())
        .map(|row| HistoryEntry {
            query: text_at(query, row).unwrap_or_default(),
            status_code: if status.is_null(row) {
                0
            } else {
                u16::try_from(status.value(row)).unwrap_or_default()
            },
            searched_at: text_at(searched_at, row).unwrap_or_default(),
            raw_contents: text_at(raw, row),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use schwc_core::{HomologationKey, SearchResponse};
    use serde_json::json;
    use tempfile::TempDir;

    fn result(key: &str, status: u16, raw: serde_json::Value) -> SearchResult {
        SearchResult::from_response(
            HomologationKey::parse(key).unwrap(),
            "GOOGLE",
            SearchResponse {
                status_code: status,
                fields: vec![],
                text: String::new(),
                raw_contents: raw,
            },
            NaiveDate::from_ymd_opt(2025, 3, 1)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
        )
    }

    #[test]
    fn entry_from_result() {
        let entry = HistoryEntry::from_result(&result("12345-67-890", 200, json!({"items": []})));
        assert_eq!(entry.query, "1234567890");
        assert_eq!(entry.status_code, 200);
        assert_eq!(entry.searched_at, "2025-03-01 09:15:00");
        assert_eq!(entry.raw_contents.as_deref(), Some(r#"{"items":[]}"#));

        let empty = HistoryEntry::from_result(&result("1", 500, serde_json::Value::Null));
        assert!(empty.raw_contents.is_none());
    }

    #[test]
    fn flush_appends_across_runs() {
        let tmp = TempDir::new().unwrap();
        let mut history = SearchHistory::in_folder(tmp.path());

        history.push(HistoryEntry::from_result(&result("1", 200, json!({}))));
        history.push(HistoryEntry::from_result(&result("2", 500, serde_json::Value::Null)));
        assert_eq!(history.flush().unwrap(), 2);
        assert_eq!(history.pending_len(), 0);

        let mut next_run = SearchHistory::in_folder(tmp.path());
        next_run.push(HistoryEntry::from_result(&result("3", 200, json!({"a": 1}))));
        assert_eq!(next_run.flush().unwrap(), 1);

        let rows = read_history(&tmp.path().join(SEARCH_HISTORY_FILENAME)).unwrap();
        let queries: Vec<&str> = rows.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, vec!["1", "2", "3"]);
        assert_eq!(rows[1].status_code, 500);
        assert!(rows[1].raw_contents.is_none());
    }

    #[test]
    fn flush_without_entries_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut history = SearchHistory::in_folder(tmp.path());
        assert_eq!(history.flush().unwrap(), 0);
        assert!(!history.path().exists());
    }

    #[test]
    fn flush_extends_single_column_log() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SEARCH_HISTORY_FILENAME);

        // A log holding only the raw responses.
        let legacy_schema = Arc::new(arrow::datatypes::Schema::new(vec![
            arrow::datatypes::Field::new("raw_contents", arrow::datatypes::DataType::Utf8, true),
        ]));
        let legacy = RecordBatch::try_new(
            legacy_schema.clone(),
            vec![Arc::new(StringArray::from(vec![Some(r#"{"items":[]}"#), None])) as ArrayRef],
        )
        .unwrap();
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, legacy_schema, None).unwrap();
        writer.write(&legacy).unwrap();
        writer.close().unwrap();

        let mut history = SearchHistory::new(path.clone());
        history.push(HistoryEntry::from_result(&result("3", 200, json!({"a": 1}))));
        assert_eq!(history.flush().unwrap(), 1);

        let rows = read_history(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].query, "");
        assert_eq!(rows[0].status_code, 0);
        assert_eq!(rows[0].raw_contents.as_deref(), Some(r#"{"items":[]}"#));
        assert!(rows[1].raw_contents.is_none());
        assert_eq!(rows[2].query, "3");
        assert_eq!(rows[2].status_code, 200);
        assert_eq!(rows[2].searched_at, "2025-03-01 09:15:00");

        // The rewritten file carries the full layout.
        let batches = read_parquet(&path).unwrap();
        assert!(batches.iter().all(|b| b.num_columns() == 4));
    }

    #[test]
    fn failed_flush_keeps_pending() {
        let tmp = TempDir::new().unwrap();
        let mut history = SearchHistory::new(tmp.path().join("missing").join("h.parquet"));
        history.push(HistoryEntry::from_result(&result("1", 200, json!({}))));

        let err = history.flush().unwrap_err();
        assert!(matches!(err, StoreError::Persist { .. }));
        assert_eq!(history.pending_len(), 1);
    }
}
