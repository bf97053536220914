//! The crawl loop.
//!
//! Each worklist item goes through `pending -> attempting -> {succeeded, exhausted}`:
//! - a 200 response is appended to the ledger and the key leaves the worklist;
//! - any other response, a transport error or a timeout is retried after
//!   `retry_delay`, up to `max_retries` attempts in total;
//! - a rate-limit or service-unavailable response stops the whole run, leaving
//!   that key and everything after it in the worklist.
//!
//! The ledger and the search history are flushed when the loop ends, whatever
//! the reason it ended.

use std::fmt;
use std::time::Duration;

use chrono::Local;
use schwc_core::{HomologationKey, Outcome, SearchCapability, SearchResult};
use schwc_store::history::HistoryEntry;
use schwc_store::{AnnotationLedger, FlushReport, SearchHistory, StoreError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::worklist::{StopSignal, Worklist};

/// Statuses treated as a global backpressure signal rather than an item failure.
pub const BACKPRESSURE_STATUSES: [u16; 2] = [429, 503];

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Total attempts per item.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Deadline for a single search call.
    pub timeout: Duration,
    /// Stop after this many items.
    pub max_items: Option<usize>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
            max_items: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Backpressure { key: HomologationKey, status: u16 },
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backpressure { key, status } => {
                write!(f, "provider returned {status} while searching {key}")
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Items that reached a final state (succeeded or exhausted).
    pub processed: usize,
    pub positive: usize,
    pub null: usize,
    pub exhausted: usize,
    pub stopped: Option<StopReason>,
    /// Keys still in the worklist after the run.
    pub remaining: usize,
    pub flush: FlushReport,
    pub history_rows: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {} (positive {}, null {}, exhausted {}), {} remaining",
            self.processed, self.positive, self.null, self.exhausted, self.remaining
        )?;
        if let Some(reason) = &self.stopped {
            write!(f, "; stopped early: {reason}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStage {
    Annotations,
    History,
}

impl fmt::Display for FlushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Annotations => f.write_str("annotations"),
            Self::History => f.write_str("search history"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CrawlError {
    /// Searching finished but its results could not be saved. The report
    /// describes the work done; unsaved annotations stay pending in the ledger.
    #[error("failed to save {stage} ({report}): {source}")]
    Flush {
        stage: FlushStage,
        report: Box<RunReport>,
        #[source]
        source: StoreError,
    },
}

impl CrawlError {
    pub fn report(&self) -> &RunReport {
        match self {
            Self::Flush { report, .. } => report,
        }
    }
}

enum ItemOutcome {
    Succeeded(SearchResult),
    Exhausted,
    Backpressure(u16),
}

pub struct CrawlOrchestrator {
    opts: CrawlOptions,
}

impl CrawlOrchestrator {
    pub fn new(opts: CrawlOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.opts
    }

    /// Search every key in `worklist`, then flush the ledger and the history.
    ///
    /// Successful keys are removed from `worklist`; everything else stays for
    /// the next run. Only a flush failure is an error.
    pub async fn run(
        &self,
        worklist: &mut Worklist,
        search: &dyn SearchCapability,
        ledger: &mut AnnotationLedger,
        history: &mut SearchHistory,
        stop: &StopSignal,
    ) -> Result<RunReport, CrawlError> {
        let keys: Vec<HomologationKey> = worklist.iter().cloned().collect();
        let limit = self.opts.max_items.unwrap_or(keys.len()).min(keys.len());
        let mut report = RunReport::default();
        info!(items = limit, source = search.source(), "starting crawl");

        for (index, key) in keys.into_iter().take(limit).enumerate() {
            if stop.is_stopped() {
                warn!("stop requested, ending crawl");
                report.stopped = Some(StopReason::Cancelled);
                break;
            }
            info!(item = index + 1, of = limit, key = %key, "searching");

            match self.search_item(&key, search, history).await {
                ItemOutcome::Succeeded(result) => match ledger.append(&result) {
                    Ok(record) => {
                        match record.outcome {
                            Outcome::Positive => report.positive += 1,
                            Outcome::Null => report.null += 1,
                            Outcome::Other(_) => {}
                        }
                        worklist.remove(&key);
                        report.processed += 1;
                    }
                    Err(e) => {
                        error!(key = %key, error = %e, "could not record annotation");
                        report.exhausted += 1;
                        report.processed += 1;
                    }
                },
                ItemOutcome::Exhausted => {
                    warn!(key = %key, attempts = self.attempts(), "retries exhausted");
                    report.exhausted += 1;
                    report.processed += 1;
                }
                ItemOutcome::Backpressure(status) => {
                    warn!(key = %key, status, "provider backpressure, stopping run");
                    report.stopped = Some(StopReason::Backpressure { key, status });
                    break;
                }
            }
        }
        report.remaining = worklist.len();
        info!(%report, "crawl finished");

        self.flush(report, ledger, history)
    }

    fn attempts(&self) -> u32 {
        self.opts.max_retries.max(1)
    }

    async fn search_item(
        &self,
        key: &HomologationKey,
        search: &dyn SearchCapability,
        history: &mut SearchHistory,
    ) -> ItemOutcome {
        for attempt in 1..=self.attempts() {
            if attempt > 1 {
                tokio::time::sleep(self.opts.retry_delay).await;
            }
            let searched_at = Local::now().naive_local();
            match tokio::time::timeout(self.opts.timeout, search.search(key.as_str())).await {
                Ok(Ok(response)) => {
                    let status = response.status_code;
                    if BACKPRESSURE_STATUSES.contains(&status) {
                        return ItemOutcome::Backpressure(status);
                    }
                    let result =
                        SearchResult::from_response(key.clone(), search.source(), response, searched_at);
                    history.push(HistoryEntry::from_result(&result));
                    if status == 200 {
                        return ItemOutcome::Succeeded(result);
                    }
                    warn!(key = %key, attempt, status, "search failed");
                }
                Ok(Err(e)) => warn!(key = %key, attempt, error = %e, "search failed"),
                Err(_) => warn!(key = %key, attempt, timeout = ?self.opts.timeout, "search timed out"),
            }
        }
        ItemOutcome::Exhausted
    }

    /// Flush both stores. The history is flushed even when the ledger fails.
    fn flush(
        &self,
        mut report: RunReport,
        ledger: &mut AnnotationLedger,
        history: &mut SearchHistory,
    ) -> Result<RunReport, CrawlError> {
        let ledger_result = ledger.flush();
        let history_result = history.flush();

        if let Ok(rows) = &history_result {
            report.history_rows = *rows;
        }
        match ledger_result {
            Ok(flush) => report.flush = flush,
            Err(source) => {
                error!(error = %source, "annotation flush failed");
                return Err(CrawlError::Flush {
                    stage: FlushStage::Annotations,
                    report: Box::new(report),
                    source,
                });
            }
        }
        match history_result {
            Ok(_) => Ok(report),
            Err(source) => {
                error!(error = %source, "search history flush failed");
                Err(CrawlError::Flush {
                    stage: FlushStage::History,
                    report: Box::new(report),
                    source,
                })
            }
        }
    }
}
