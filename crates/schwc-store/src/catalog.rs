//! Local cache of the published product catalog.
//!
//! The catalog is a semicolon-delimited text file kept at
//! `<dir>/produtos_certificados.csv`. It is downloaded when missing, and
//! re-downloaded when older than the grace period or when forced. Downloads
//! land in a temporary sibling and are renamed into place, so a failed
//! download never damages the previous copy.

use std::borrow::Cow;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arrow::array::{Array, StringArray};
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use chrono::NaiveDate;
use schwc_core::schema::catalog as cols;
use schwc_core::{CapabilityError, CatalogFetcher, CatalogRecord, Category, HomologationKey};
use tracing::{debug, error, info, warn};

use crate::atomic::write_replace;
use crate::StoreError;

pub const CATALOG_FILENAME: &str = "produtos_certificados.csv";

const DELIMITER: u8 = b';';
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const SECS_PER_DAY: u64 = 86_400;

/// How [`CatalogCache::load`] treats the local copy.
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub download_if_missing: bool,
    /// Re-download when the local copy is older than this many days.
    pub grace_period_days: u32,
    pub force: bool,
    /// Total download attempts.
    pub retries: u32,
    /// Base delay; attempt `n` waits `n * retry_delay` before the next one.
    pub retry_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            download_if_missing: true,
            grace_period_days: 180,
            force: false,
            retries: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

/// The parsed catalog. May hold several rows per homologation number.
#[derive(Debug, Clone)]
pub struct CatalogTable {
    pub records: Vec<CatalogRecord>,
    /// Rows dropped because their homologation number was missing.
    pub dropped: usize,
}

impl CatalogTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct CatalogCache {
    dir: PathBuf,
    fetcher: Arc<dyn CatalogFetcher>,
}

impl CatalogCache {
    pub fn new(dir: impl Into<PathBuf>, fetcher: Arc<dyn CatalogFetcher>) -> Self {
        Self {
            dir: dir.into(),
            fetcher,
        }
    }

    /// Canonical path of the local copy.
    pub fn path(&self) -> PathBuf {
        self.dir.join(CATALOG_FILENAME)
    }

    /// Make sure a fresh-enough local copy exists, then parse it.
    pub async fn load(&self, opts: &CatalogOptions) -> Result<CatalogTable, StoreError> {
        let path = self.path();

        if path.exists() {
            let age_days = file_age_days(&path)?;
            if age_days > u64::from(opts.grace_period_days) {
                info!(
                    path = %path.display(),
                    age_days,
                    grace_period_days = opts.grace_period_days,
                    "catalog is older than the grace period, re-downloading"
                );
                self.download(opts).await?;
            } else if opts.force {
                info!(path = %path.display(), age_days, "forced catalog re-download");
                self.download(opts).await?;
            } else {
                debug!(path = %path.display(), age_days, "using cached catalog");
            }
        } else if opts.download_if_missing {
            info!(path = %path.display(), "catalog not cached, downloading");
            self.download(opts).await?;
        } else {
            error!(path = %path.display(), "catalog not cached and downloading is disabled");
            return Err(StoreError::Unavailable(path));
        }

        let bytes = std::fs::read(&path)?;
        let table = parse_catalog(&bytes)?;
        info!(
            rows = table.records.len(),
            dropped = table.dropped,
            "loaded catalog"
        );
        Ok(table)
    }

    async fn download(&self, opts: &CatalogOptions) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path();
        let location = self.fetcher.location().to_string();
        let attempts = opts.retries.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(location = %location, attempt, "downloading catalog");
            let fetched = match tokio::time::timeout(opts.timeout, self.fetcher.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout(opts.timeout)),
            };

            match fetched {
                Ok(bytes) => {
                    write_replace(&path, |f| Ok(f.write_all(&bytes)?))
                        .map_err(|e| StoreError::persist(&path, e))?;
                    info!(path = %path.display(), bytes = bytes.len(), "catalog downloaded");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    let delay = opts.retry_delay * attempt;
                    warn!(error = %e, attempt, ?delay, "catalog download failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(error = %e, attempts, "catalog download failed");
                    return Err(StoreError::Download {
                        location,
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }
}

fn file_age_days(path: &Path) -> Result<u64, StoreError> {
    let modified = std::fs::metadata(path)?.modified()?;
    // A modification time in the future counts as brand new.
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    Ok(age.as_secs() / SECS_PER_DAY)
}

/// Parse catalog bytes into records.
///
/// Rows without a homologation number are dropped and counted. Unparsable
/// dates and categories become `None`.
pub fn parse_catalog(bytes: &[u8]) -> Result<CatalogTable, StoreError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    // Stray Latin-1 bytes in descriptive columns must not sink the whole load.
    let decoded = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = decoded {
        warn!("catalog contains invalid UTF-8, replaced with U+FFFD");
    }
    let bytes = decoded.as_bytes();
    if bytes.is_empty() {
        return Ok(CatalogTable {
            records: Vec::new(),
            dropped: 0,
        });
    }

    // Read the header only, then force every column to text.
    let format = Format::default()
        .with_header(true)
        .with_delimiter(DELIMITER);
    let (inferred, _) = format.infer_schema(Cursor::new(bytes), Some(0))?;
    let names: Vec<String> = inferred
        .fields()
        .iter()
        .map(|f| f.name().trim().to_string())
        .collect();
    let schema = Schema::new(
        names
            .iter()
            .map(|n| Field::new(n, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    );

    let index_of = |name: &str| names.iter().position(|n| n == name);
    let key_idx = index_of(cols::HOMOLOGATION_NUMBER).ok_or_else(|| StoreError::Malformed {
        what: "catalog".into(),
        reason: format!("missing column '{}'", cols::HOMOLOGATION_NUMBER),
    })?;
    let date_idx = index_of(cols::HOMOLOGATION_DATE);
    let category_idx = index_of(cols::CATEGORY);
    let manufacturer_idx = index_of(cols::MANUFACTURER);
    let model_idx = index_of(cols::MODEL);
    let product_type_idx = index_of(cols::PRODUCT_TYPE);

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_header(true)
        .with_delimiter(DELIMITER)
        .with_truncated_rows(true)
        .build(Cursor::new(bytes))?;

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for batch in reader {
        let batch = batch?;
        let text = |idx: usize| {
            batch
                .column(idx)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| StoreError::Other(format!("catalog column {idx} not utf8")))
        };
        let keys = text(key_idx)?;
        let dates = date_idx.map(text).transpose()?;
        let categories = category_idx.map(text).transpose()?;
        let manufacturers = manufacturer_idx.map(text).transpose()?;
        let models = model_idx.map(text).transpose()?;
        let product_types = product_type_idx.map(text).transpose()?;

        for row in 0..batch.num_rows() {
            let raw = value(Some(keys), row).unwrap_or_default();
            let Some(key) = HomologationKey::parse(&raw) else {
                dropped += 1;
                continue;
            };
            records.push(CatalogRecord {
                key,
                homologation_number: raw,
                homologation_date: value(dates, row).and_then(|d| parse_date(&d)),
                category: value(categories, row).and_then(|c| parse_category(&c)),
                manufacturer: value(manufacturers, row),
                model: value(models, row),
                product_type: value(product_types, row),
            });
        }
    }

    if dropped > 0 {
        debug!(dropped, "dropped catalog rows without a homologation number");
    }
    Ok(CatalogTable { records, dropped })
}

fn value(col: Option<&StringArray>, row: usize) -> Option<String> {
    let col = col?;
    if col.is_null(row) {
        return None;
    }
    let v = col.value(row).trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, cols::DATE_FORMAT).ok()
}

fn parse_category(raw: &str) -> Option<Category> {
    let code = raw
        .parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|f| f as i64))?;
    Category::from_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const HEADER: &str = "Data da Homologação;Número de Homologação;Nome do Fabricante;Modelo;Categoria do Produto;Tipo do Produto";

    fn catalog_text(rows: &[&str]) -> String {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text.push('\n');
        text
    }

    /// Returns each scripted result in turn, repeating the last one.
    struct ScriptedFetcher {
        script: Mutex<Vec<Result<Vec<u8>, CapabilityError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Vec<u8>, CapabilityError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn ok(text: &str) -> Arc<Self> {
            Self::new(vec![Ok(text.as_bytes().to_vec())])
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogFetcher for ScriptedFetcher {
        fn location(&self) -> &str {
            "memory://catalog"
        }

        async fn fetch(&self) -> Result<Vec<u8>, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                match &script[0] {
                    Ok(bytes) => Ok(bytes.clone()),
                    Err(_) => Err(CapabilityError::Transport("scripted failure".into())),
                }
            }
        }
    }

    fn transport_err() -> Result<Vec<u8>, CapabilityError> {
        Err(CapabilityError::Transport("connection reset".into()))
    }

    fn fast_opts() -> CatalogOptions {
        CatalogOptions {
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn age_file(path: &Path, days: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(days * SECS_PER_DAY + 60))
            .unwrap();
    }

    #[test]
    fn parse_keeps_repeats_and_drops_missing_keys() {
        let text = catalog_text(&[
            "01/02/2020;1234567890;ACME;X1;2;Roteador",
            "01/02/2020;1234567890;ACME;X1;2;Roteador",
            "01/02/2020;;ACME;X2;2;Roteador",
            "01/02/2020; - ;ACME;X3;2;Roteador",
        ]);
        let table = parse_catalog(text.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.dropped, 2);
        assert_eq!(table.records[0].key.as_str(), "1234567890");
        assert_eq!(table.records[0].manufacturer.as_deref(), Some("ACME"));
        assert_eq!(table.records[0].product_type.as_deref(), Some("Roteador"));
    }

    #[test]
    fn parse_dates_and_categories() {
        let text = catalog_text(&[
            "15/06/2021;00001-11-00001;A;M;1;T",
            "not a date;0000211000002;A;M;9;T",
            ";0000311000003;A;M;;T",
        ]);
        let table = parse_catalog(text.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);

        let first = &table.records[0];
        assert_eq!(first.key.as_str(), "0000111000001");
        assert_eq!(first.homologation_number, "00001-11-00001");
        assert_eq!(first.homologation_date, NaiveDate::from_ymd_opt(2021, 6, 15));
        assert_eq!(first.category, Some(Category::One));

        assert_eq!(table.records[1].homologation_date, None);
        assert_eq!(table.records[1].category, None);
        assert_eq!(table.records[2].homologation_date, None);
    }

    #[test]
    fn parse_strips_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend(catalog_text(&["01/01/2020;1;A;M;2;T"]).into_bytes());
        let table = parse_catalog(&bytes).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn parse_tolerates_invalid_utf8_in_descriptive_columns() {
        let mut bytes = catalog_text(&["01/01/2020;1111111111;A;M1;2;T"]).into_bytes();
        bytes.extend_from_slice(b"01/01/2020;2222222222;A;Cabe\xe7a;2;T\n");
        bytes.extend_from_slice(b"01/01/2020;3333333333;A;M3;2;T\n");

        let table = parse_catalog(&bytes).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.dropped, 0);
        assert_eq!(table.records[1].key.as_str(), "2222222222");
        assert_eq!(table.records[1].model.as_deref(), Some("Cabe\u{fffd}a"));
        assert_eq!(table.records[2].model.as_deref(), Some("M3"));
    }

    #[test]
    fn parse_requires_key_column() {
        let result = parse_catalog(b"Modelo;Categoria do Produto\nX;2\n");
        assert!(matches!(result, Err(StoreError::Malformed { .. })));
    }

    #[test]
    fn parse_empty_input() {
        let table = parse_catalog(b"").unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn missing_without_download_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::ok("unused");
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());
        let opts = CatalogOptions {
            download_if_missing: false,
            ..fast_opts()
        };

        let result = cache.load(&opts).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn missing_is_downloaded() {
        let tmp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::ok(&catalog_text(&["01/01/2020;1234567890;A;M;2;T"]));
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());

        let table = cache.load(&fast_opts()).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(fetcher.calls(), 1);
        assert!(cache.path().exists());
    }

    #[tokio::test]
    async fn fresh_copy_is_not_downloaded() {
        let tmp = TempDir::new().unwrap();
        let cache_path = tmp.path().join(CATALOG_FILENAME);
        std::fs::write(&cache_path, catalog_text(&["01/01/2020;111;A;M;2;T"])).unwrap();
        let fetcher = ScriptedFetcher::ok("unused");
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());

        let table = cache.load(&fast_opts()).await.unwrap();
        assert_eq!(table.records[0].key.as_str(), "111");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn stale_copy_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let cache_path = tmp.path().join(CATALOG_FILENAME);
        std::fs::write(&cache_path, catalog_text(&["01/01/2020;111;A;M;2;T"])).unwrap();
        age_file(&cache_path, 200);

        let fetcher = ScriptedFetcher::ok(&catalog_text(&["01/01/2020;222;A;M;2;T"]));
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());

        let table = cache.load(&fast_opts()).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(table.records[0].key.as_str(), "222");
    }

    #[tokio::test]
    async fn force_replaces_fresh_copy() {
        let tmp = TempDir::new().unwrap();
        let cache_path = tmp.path().join(CATALOG_FILENAME);
        std::fs::write(&cache_path, catalog_text(&["01/01/2020;111;A;M;2;T"])).unwrap();

        let fetcher = ScriptedFetcher::ok(&catalog_text(&["01/01/2020;333;A;M;2;T"]));
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());
        let opts = CatalogOptions {
            force: true,
            ..fast_opts()
        };

        let table = cache.load(&opts).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(table.records[0].key.as_str(), "333");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let tmp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(vec![
            transport_err(),
            transport_err(),
            Ok(catalog_text(&["01/01/2020;444;A;M;2;T"]).into_bytes()),
        ]);
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());

        let table = cache.load(&fast_opts()).await.unwrap();
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backoff_is_linear() {
        let tmp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(vec![
            transport_err(),
            transport_err(),
            Ok(catalog_text(&["01/01/2020;444;A;M;2;T"]).into_bytes()),
        ]);
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());
        let opts = CatalogOptions {
            retry_delay: Duration::from_secs(1),
            ..Default::default()
        };

        let start = tokio::time::Instant::now();
        cache.load(&opts).await.unwrap();
        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    /// Never answers.
    struct HangingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CatalogFetcher for HangingFetcher {
        fn location(&self) -> &str {
            "memory://hanging"
        }

        async fn fetch(&self) -> Result<Vec<u8>, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_download_times_out_each_attempt() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(HangingFetcher {
            calls: AtomicUsize::new(0),
        });
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());
        let opts = CatalogOptions {
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
            ..Default::default()
        };

        let start = tokio::time::Instant::now();
        let result = cache.load(&opts).await;
        match result {
            Err(StoreError::Download { attempts, source, .. }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, CapabilityError::Timeout(t) if t.as_secs() == 10));
            }
            other => panic!("expected download error, got {other:?}"),
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        // Three 10s timeouts plus 1s and 2s of backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(33));
        assert!(!cache.path().exists());
    }

    #[tokio::test]
    async fn exhausted_download_keeps_previous_copy() {
        let tmp = TempDir::new().unwrap();
        let cache_path = tmp.path().join(CATALOG_FILENAME);
        let original = catalog_text(&["01/01/2020;111;A;M;2;T"]);
        std::fs::write(&cache_path, &original).unwrap();
        age_file(&cache_path, 365);

        let fetcher = ScriptedFetcher::new(vec![transport_err()]);
        let cache = CatalogCache::new(tmp.path(), fetcher.clone());

        let result = cache.load(&fast_opts()).await;
        match result {
            Err(StoreError::Download { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected download error, got {other:?}"),
        }
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(std::fs::read_to_string(&cache_path).unwrap(), original);

        // No temporary siblings left behind.
        let leftovers = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
