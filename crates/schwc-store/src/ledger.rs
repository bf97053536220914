//! Annotation ledger: the merged history of past searches plus a buffer of new ones.
//!
//! Two source files feed the ledger. `Annotation.csv` (mandatory) holds the
//! consolidated annotations; `AnnotationNull.csv` (optional) holds searches that
//! found nothing. Both are mirrored locally, concatenated, reduced to the
//! `WordCloud` rows and deduplicated by `ID`.
//!
//! New results are buffered in [`PendingAnnotations`] and written by
//! [`AnnotationLedger::flush`]:
//! - positive rows go to a new timestamp-named file in the post folder, never
//!   overwriting an existing file;
//! - null rows are merged into the local `AnnotationNull.csv`, one row per `ID`.
//!
//! The two writes are independent. If the second fails after the first
//! succeeded, the pending buffer is kept and a retry writes the positive rows
//! again into another new file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use schwc_core::{
    Actor, AnnotationRecord, HomologationKey, Outcome, SearchResult, ANNOTATION_TS_FORMAT,
    WORDCLOUD_ATTRIBUTE,
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::atomic::{write_new, write_replace};
use crate::sheet::{read_annotations, write_annotations};
use crate::StoreError;

pub const ANNOTATION_FILE: &str = "Annotation.csv";
pub const NULL_ANNOTATION_FILE: &str = "AnnotationNull.csv";
/// Timestamp embedded in positive flush file names.
pub const ANNOTATION_FILE_TS_FORMAT: &str = "%Y.%m.%d_T%H.%M.%S";

/// Where the ledger is read from.
#[derive(Debug, Clone)]
pub struct LedgerSources {
    pub positive: PathBuf,
    pub null: PathBuf,
}

impl LedgerSources {
    /// The standard file names inside one shared folder.
    pub fn in_folder(dir: &Path) -> Self {
        Self {
            positive: dir.join(ANNOTATION_FILE),
            null: dir.join(NULL_ANNOTATION_FILE),
        }
    }
}

/// Where flushed annotations go.
#[derive(Debug, Clone)]
pub struct LedgerDestinations {
    /// Folder receiving one new file per flush with positive rows.
    pub positive_dir: PathBuf,
    /// Local null-annotation file, rewritten on each flush with null rows.
    pub null_file: PathBuf,
}

/// Counts reported by a flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub positive_written: usize,
    pub null_written: usize,
    pub positive_file: Option<PathBuf>,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.positive_written + self.null_written
    }
}

/// Annotations created since the last successful flush.
#[derive(Debug, Clone, Default)]
pub struct PendingAnnotations {
    records: Vec<AnnotationRecord>,
}

impl PendingAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AnnotationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    fn with_outcome(&self, outcome: &Outcome) -> Vec<AnnotationRecord> {
        self.records
            .iter()
            .filter(|r| &r.outcome == outcome)
            .cloned()
            .collect()
    }

    fn take(&mut self) -> Vec<AnnotationRecord> {
        std::mem::take(&mut self.records)
    }
}

/// Collapse rows sharing an `ID`, keeping the last occurrence.
///
/// Rows with an empty `ID` are never collapsed.
pub fn dedup_by_id(records: Vec<AnnotationRecord>) -> Vec<AnnotationRecord> {
    let mut seen = HashSet::new();
    let mut kept: Vec<AnnotationRecord> = records
        .into_iter()
        .rev()
        .filter(|r| r.id.is_empty() || seen.insert(r.id.clone()))
        .collect();
    kept.reverse();
    kept
}

pub struct AnnotationLedger {
    /// Committed `WordCloud` rows, unique by `ID`.
    records: Vec<AnnotationRecord>,
    /// homologation key → `ID`, used to reuse ids across searches.
    ids: HashMap<HomologationKey, String>,
    pending: PendingAnnotations,
    destinations: LedgerDestinations,
    actor: Actor,
}

impl AnnotationLedger {
    /// Mirror the sources into `mirror_dir` and build the merged ledger.
    ///
    /// Fails with [`StoreError::NotFound`] when the positive source is absent.
    pub fn load(
        sources: &LedgerSources,
        mirror_dir: &Path,
        positive_dir: PathBuf,
        actor: Actor,
    ) -> Result<Self, StoreError> {
        if !sources.positive.exists() {
            error!(path = %sources.positive.display(), "annotation source not found");
            return Err(StoreError::NotFound(sources.positive.clone()));
        }
        std::fs::create_dir_all(mirror_dir)?;

        let local_positive = mirror_dir.join(ANNOTATION_FILE);
        mirror(&sources.positive, &local_positive)?;
        let mut rows = read_annotations(&local_positive)?;
        let positive_rows = rows.len();

        let local_null = mirror_dir.join(NULL_ANNOTATION_FILE);
        if sources.null.exists() {
            mirror(&sources.null, &local_null)?;
        }
        if local_null.exists() {
            rows.extend(read_annotations(&local_null)?);
        }
        let total_rows = rows.len();

        let wordcloud_rows: Vec<AnnotationRecord> =
            rows.into_iter().filter(|r| r.is_wordcloud()).collect();
        let records = dedup_by_id(wordcloud_rows);
        info!(
            positive_rows,
            null_rows = total_rows - positive_rows,
            ledger_rows = records.len(),
            "loaded annotation ledger"
        );

        let destinations = LedgerDestinations {
            positive_dir,
            null_file: local_null,
        };
        Ok(Self::from_records(records, destinations, actor))
    }

    /// Build a ledger from rows already in memory.
    pub fn from_records(
        records: Vec<AnnotationRecord>,
        destinations: LedgerDestinations,
        actor: Actor,
    ) -> Self {
        let mut ids = HashMap::new();
        for record in &records {
            if record.id.is_empty() {
                continue;
            }
            if let Some(key) = record.key() {
                ids.insert(key, record.id.clone());
            }
        }
        Self {
            records,
            ids,
            pending: PendingAnnotations::new(),
            destinations,
            actor,
        }
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending(&self) -> &PendingAnnotations {
        &self.pending
    }

    pub fn destinations(&self) -> &LedgerDestinations {
        &self.destinations
    }

    /// The `ID` previously assigned to a homologation key.
    pub fn id_for(&self, key: &HomologationKey) -> Option<&str> {
        self.ids.get(key).map(String::as_str)
    }

    /// `(key, ID)` of every committed row whose outcome marks the key as searched.
    pub fn settled(&self) -> impl Iterator<Item = (HomologationKey, &str)> {
        self.records
            .iter()
            .filter(|r| !r.id.is_empty() && r.outcome.is_settled())
            .filter_map(|r| r.key().map(|k| (k, r.id.as_str())))
    }

    /// Turn a search result into an annotation and buffer it.
    ///
    /// The `ID` is reused when the key was annotated before, otherwise a fresh
    /// UUID is minted. Persisted files are not touched.
    pub fn append(&mut self, result: &SearchResult) -> Result<AnnotationRecord, StoreError> {
        let id = match self.ids.get(&result.key) {
            Some(id) => id.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                self.ids.insert(result.key.clone(), id.clone());
                id
            }
        };
        let value = serde_json::to_string(&result.wordcloud)
            .map_err(|e| StoreError::Other(format!("serialise word cloud: {e}")))?;

        let record = AnnotationRecord {
            id,
            timestamp: result.searched_at.format(ANNOTATION_TS_FORMAT).to_string(),
            actor: self.actor.clone(),
            homologation: result.key.display_form(),
            attribute: WORDCLOUD_ATTRIBUTE.to_string(),
            value,
            outcome: result.outcome(),
        };
        debug!(key = %result.key, id = %record.id, outcome = record.outcome.code(), "annotation buffered");
        self.pending.push(record.clone());
        Ok(record)
    }

    /// Persist the pending buffer.
    ///
    /// On failure the buffer is left intact and a [`StoreError::Persist`] is returned.
    pub fn flush(&mut self) -> Result<FlushReport, StoreError> {
        self.flush_at(Local::now().naive_local())
    }

    pub fn flush_at(&mut self, now: NaiveDateTime) -> Result<FlushReport, StoreError> {
        if self.pending.is_empty() {
            info!("no new annotations to save");
            return Ok(FlushReport::default());
        }

        let positive = self.pending.with_outcome(&Outcome::Positive);
        let null = self.pending.with_outcome(&Outcome::Null);
        let mut report = FlushReport::default();

        if !positive.is_empty() {
            let path = write_positive(&self.destinations.positive_dir, &positive, now)?;
            info!(path = %path.display(), rows = positive.len(), "annotation file saved");
            report.positive_written = positive.len();
            report.positive_file = Some(path);
        }

        if !null.is_empty() {
            let total = merge_null(&self.destinations.null_file, null.clone())?;
            info!(
                path = %self.destinations.null_file.display(),
                rows = null.len(),
                total,
                "null annotation file updated"
            );
            report.null_written = null.len();
        }

        let flushed = self.pending.take();
        let mut records = std::mem::take(&mut self.records);
        records.extend(flushed);
        self.records = dedup_by_id(records);
        Ok(report)
    }
}

/// Copy a source into the mirror, skipping the copy when both are the same file.
fn mirror(source: &Path, target: &Path) -> Result<(), StoreError> {
    if let (Ok(a), Ok(b)) = (source.canonicalize(), target.canonicalize()) {
        if a == b {
            return Ok(());
        }
    }
    std::fs::copy(source, target)?;
    debug!(source = %source.display(), target = %target.display(), "mirrored annotation file");
    Ok(())
}

/// Write positive rows to a fresh `Annotation_<timestamp>.csv`.
fn write_positive(
    dir: &Path,
    records: &[AnnotationRecord],
    now: NaiveDateTime,
) -> Result<PathBuf, StoreError> {
    let stamp = now.format(ANNOTATION_FILE_TS_FORMAT).to_string();
    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            format!("Annotation_{stamp}.csv")
        } else {
            format!("Annotation_{stamp}_{suffix}.csv")
        };
        let path = dir.join(name);
        let created = write_new(&path, |f| write_annotations(f, records))
            .map_err(|e| StoreError::persist(&path, e))?;
        if created {
            return Ok(path);
        }
        suffix += 1;
    }
}

/// Merge null rows into the null file, one row per `ID`. Returns the file's row count.
fn merge_null(path: &Path, new_rows: Vec<AnnotationRecord>) -> Result<usize, StoreError> {
    let mut rows = if path.exists() {
        read_annotations(path).map_err(|e| StoreError::persist(path, e))?
    } else {
        Vec::new()
    };
    rows.extend(new_rows);
    let rows = dedup_by_id(rows);
    write_replace(path, |f| write_annotations(f, &rows)).map_err(|e| StoreError::persist(path, e))?;
    Ok(rows.len())
}
