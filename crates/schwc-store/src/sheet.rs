//! Annotation spreadsheets as semicolon-delimited text, via Arrow's CSV reader/writer.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::record_batch::RecordBatch;
use schwc_core::schema::annotation::{self, annotation_schema};
use schwc_core::{Actor, AnnotationRecord, Outcome};

use crate::StoreError;

pub const DELIMITER: u8 = b';';

/// Read every row of an annotation file. Rows are never dropped here, so a
/// read-modify-write cycle preserves rows from other workflows.
pub fn read_annotations(path: &Path) -> Result<Vec<AnnotationRecord>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let reader = ReaderBuilder::new(Arc::new(annotation_schema()))
        .with_header(true)
        .with_delimiter(DELIMITER)
        .with_truncated_rows(true)
        .build(file)?;

    let mut records = Vec::new();
    for batch in reader {
        records.extend(records_from_batch(&batch?)?);
    }
    Ok(records)
}

/// Write `records` with a header row to an already-open file.
pub fn write_annotations(file: &mut File, records: &[AnnotationRecord]) -> Result<(), StoreError> {
    let batch = records_to_batch(records)?;
    let mut buf = Vec::new();
    {
        let mut writer = WriterBuilder::new()
            .with_header(true)
            .with_delimiter(DELIMITER)
            .build(&mut buf);
        writer.write(&batch)?;
    }
    file.write_all(&buf)?;
    Ok(())
}

pub fn records_to_batch(records: &[AnnotationRecord]) -> Result<RecordBatch, StoreError> {
    fn column<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
        Arc::new(values.map(Some).collect::<StringArray>())
    }

    let columns: Vec<ArrayRef> = vec![
        column(records.iter().map(|r| r.id.as_str())),
        column(records.iter().map(|r| r.timestamp.as_str())),
        column(records.iter().map(|r| r.actor.computer.as_str())),
        column(records.iter().map(|r| r.actor.user.as_str())),
        column(records.iter().map(|r| r.homologation.as_str())),
        column(records.iter().map(|r| r.attribute.as_str())),
        column(records.iter().map(|r| r.value.as_str())),
        column(records.iter().map(|r| r.outcome.code())),
    ];
    Ok(RecordBatch::try_new(Arc::new(annotation_schema()), columns)?)
}

pub fn records_from_batch(batch: &RecordBatch) -> Result<Vec<AnnotationRecord>, StoreError> {
    let col = |name: &str| -> Result<&StringArray, StoreError> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| StoreError::Malformed {
                what: "annotation batch".into(),
                reason: format!("missing text column '{name}'"),
            })
    };
    let id = col(annotation::ID)?;
    let timestamp = col(annotation::TIMESTAMP)?;
    let computer = col(annotation::COMPUTER)?;
    let user = col(annotation::USER)?;
    let homologation = col(annotation::HOMOLOGATION)?;
    let attribute = col(annotation::ATTRIBUTE)?;
    let value = col(annotation::VALUE)?;
    let outcome = col(annotation::OUTCOME)?;

    let records = (0..batch.num_rows())
        .map(|row| AnnotationRecord {
            id: cell(id, row),
            timestamp: cell(timestamp, row),
            actor: Actor::new(cell(computer, row), cell(user, row)),
            homologation: cell(homologation, row),
            attribute: cell(attribute, row),
            value: cell(value, row),
            outcome: Outcome::from_code(&cell(outcome, row)),
        })
        .collect();
    Ok(records)
}

/// Empty cells come back from the CSV reader as nulls.
fn cell(col: &StringArray, row: usize) -> String {
    if col.is_null(row) {
        String::new()
    } else {
        col.value(row).to_string()
    }
}
