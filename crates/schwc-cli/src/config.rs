//! TOML configuration, data-home layout and provider credentials.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use schwc_crawl::{CategoryFilter, CrawlOptions, ResolveOptions};
use schwc_store::CatalogOptions;
use serde::Deserialize;

pub const DATA_HOME_ENV: &str = "SCH_DATAHOME";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub data_home: Option<String>,
    pub cloud: CloudConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudConfig {
    /// Folder holding the consolidated `Annotation.csv` (and optionally `AnnotationNull.csv`).
    pub annotation_get_folder: String,
    /// Folder receiving new positive annotation files.
    pub annotation_post_folder: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    pub url: String,
    #[serde(default = "default_grace_period")]
    pub grace_period_days: u32,
    #[serde(default = "default_true")]
    pub download_if_missing: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_catalog_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Bing,
}

/// `category = "any"` or `category = 2`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CategorySetting {
    Code(i64),
    Name(String),
}

impl CategorySetting {
    pub fn to_filter(&self) -> Result<CategoryFilter> {
        let raw = match self {
            Self::Code(code) => code.to_string(),
            Self::Name(name) => name.clone(),
        };
        raw.parse::<CategoryFilter>().map_err(anyhow::Error::msg)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_category")]
    pub category: CategorySetting,
    #[serde(default = "default_grace_period")]
    pub grace_period_days: u32,
    #[serde(default = "default_true")]
    pub shuffle: bool,
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    #[serde(default = "default_search_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            category: default_category(),
            grace_period_days: default_grace_period(),
            shuffle: true,
            max_retries: default_retries(),
            retry_delay_secs: default_search_retry_delay(),
            timeout_secs: default_search_timeout(),
            max_items: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_grace_period() -> u32 {
    180
}
fn default_retries() -> u32 {
    3
}
fn default_catalog_retry_delay() -> u64 {
    1
}
fn default_catalog_timeout() -> u64 {
    120
}
fn default_search_retry_delay() -> u64 {
    5
}
fn default_search_timeout() -> u64 {
    30
}
fn default_provider() -> Provider {
    Provider::Google
}
fn default_category() -> CategorySetting {
    CategorySetting::Code(2)
}

impl CatalogConfig {
    pub fn options(&self) -> CatalogOptions {
        CatalogOptions {
            download_if_missing: self.download_if_missing,
            grace_period_days: self.grace_period_days,
            force: self.force,
            retries: self.retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl SearchConfig {
    pub fn resolve_options(&self) -> Result<ResolveOptions> {
        Ok(ResolveOptions {
            category: self.category.to_filter()?,
            grace_period_days: self.grace_period_days,
            shuffle: self.shuffle,
        })
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            max_items: self.max_items,
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Expand a leading `~` to the user's home folder.
pub fn expand_home(raw: &str) -> PathBuf {
    let rest = match raw.strip_prefix('~') {
        Some(rest) => rest,
        None => return PathBuf::from(raw),
    };
    match home_dir() {
        Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(raw),
    }
}

/// Local folders used by a run.
#[derive(Debug, Clone)]
pub struct DataHome {
    pub root: PathBuf,
    /// Mirror of the annotation files.
    pub annotation: PathBuf,
    /// Cached catalog.
    pub sch: PathBuf,
    pub search_results: PathBuf,
}

impl DataHome {
    /// Pick the data home: explicit setting, then `SCH_DATAHOME`, then the platform default.
    pub fn locate(setting: Option<&str>) -> PathBuf {
        if let Some(raw) = setting {
            return expand_home(raw);
        }
        if let Ok(raw) = std::env::var(DATA_HOME_ENV) {
            if !raw.is_empty() {
                return expand_home(&raw);
            }
        }
        let base = std::env::var_os("LOCALAPPDATA")
            .map(PathBuf::from)
            .or_else(home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("schwordcloud").join("datasets")
    }

    /// Create the folder layout under `root`.
    pub fn bootstrap(root: PathBuf) -> Result<Self> {
        if root.exists() && !root.is_dir() {
            bail!("data home is not a directory: {}", root.display());
        }
        let home = Self {
            annotation: root.join("annotation"),
            sch: root.join("sch"),
            search_results: root.join("search_results"),
            root,
        };
        for dir in [&home.annotation, &home.sch, &home.search_results] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(home)
    }
}

/// An existing folder named in the config.
pub fn existing_folder(raw: &str, what: &str) -> Result<PathBuf> {
    let path = expand_home(raw);
    if !path.is_dir() {
        bail!("{what} folder not found: {}", path.display());
    }
    Ok(path)
}

/// The `[credentials]` table of the credentials file.
pub fn load_credentials(setting: Option<&str>) -> Result<toml::Value> {
    let path = expand_home(setting.unwrap_or("~/credentials.toml"));
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
    let mut doc: toml::Table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse credentials file: {}", path.display()))?;
    match doc.remove("credentials") {
        Some(table @ toml::Value::Table(_)) => Ok(table),
        _ => bail!("no [credentials] table in {}", path.display()),
    }
}
