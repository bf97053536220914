//! Backlog resolution and the crawl loop.

pub mod backlog;
pub mod orchestrator;
pub mod worklist;

pub use backlog::{resolve, resolve_at, CategoryFilter, ResolveOptions};
pub use orchestrator::{
    CrawlError, CrawlOptions, CrawlOrchestrator, FlushStage, RunReport, StopReason,
    BACKPRESSURE_STATUSES,
};
pub use worklist::{StopSignal, Worklist};
