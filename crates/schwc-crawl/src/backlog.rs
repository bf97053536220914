//! Backlog resolution: catalog keys with no settled annotation, old enough to search.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use rand::seq::SliceRandom;
use schwc_core::{CatalogRecord, Category, HomologationKey};
use schwc_store::{AnnotationLedger, CatalogTable};
use tracing::{debug, info};

use crate::worklist::Worklist;

/// Which product categories enter the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    Any,
    Only(Category),
}

impl CategoryFilter {
    fn accepts(self, category: Option<Category>) -> bool {
        match self {
            Self::Any => true,
            Self::Only(wanted) => category == Some(wanted),
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("any") {
            return Ok(Self::Any);
        }
        s.parse::<i64>()
            .ok()
            .and_then(Category::from_code)
            .map(Self::Only)
            .ok_or_else(|| format!("invalid category '{s}': expected any, 1, 2 or 3"))
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Only(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub category: CategoryFilter,
    /// Items homologated this many days ago or fewer are deferred. `0` disables the filter.
    pub grace_period_days: u32,
    pub shuffle: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            category: CategoryFilter::Any,
            grace_period_days: 180,
            shuffle: true,
        }
    }
}

/// Resolve the backlog as of today.
pub fn resolve(catalog: &CatalogTable, ledger: &AnnotationLedger, opts: &ResolveOptions) -> Worklist {
    resolve_at(Local::now().date_naive(), catalog, ledger, opts)
}

pub fn resolve_at(
    today: NaiveDate,
    catalog: &CatalogTable,
    ledger: &AnnotationLedger,
    opts: &ResolveOptions,
) -> Worklist {
    let annotated = ledger.settled().map(|(key, _)| key);
    resolve_records(today, &catalog.records, annotated, opts)
}

/// Resolve against any set of already-searched keys.
pub fn resolve_records(
    today: NaiveDate,
    records: &[CatalogRecord],
    annotated: impl IntoIterator<Item = HomologationKey>,
    opts: &ResolveOptions,
) -> Worklist {
    let annotated: HashSet<HomologationKey> = annotated.into_iter().collect();

    let mut seen = HashSet::new();
    let candidates: Vec<&CatalogRecord> = records
        .iter()
        .filter(|r| opts.category.accepts(r.category))
        .filter(|r| seen.insert(&r.key))
        .collect();
    let unique = candidates.len();

    let grace = i64::from(opts.grace_period_days);
    let mut keys: Vec<HomologationKey> = candidates
        .into_iter()
        .filter(|r| !annotated.contains(&r.key))
        .filter(|r| {
            if grace == 0 {
                return true;
            }
            match r.homologation_date {
                Some(date) => (today - date).num_days() > grace,
                None => false,
            }
        })
        .map(|r| r.key.clone())
        .collect();

    if opts.shuffle {
        keys.shuffle(&mut rand::rng());
    }
    debug!(unique, annotated = annotated.len(), "backlog inputs");
    info!(
        backlog = keys.len(),
        category = %opts.category,
        grace_period_days = opts.grace_period_days,
        "resolved backlog"
    );
    Worklist::from(keys)
}
