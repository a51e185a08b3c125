//! Incremental sync: item fetching, sweep termination and orchestration.

mod engine;
mod fetcher;
mod termination;

pub use engine::{
    BackfillReport, DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_PAUSE_EVERY, DEFAULT_PAGE_SIZE, SyncEngine,
    SyncOptions, SyncReport,
};
pub use fetcher::{FetchedItem, ItemFetcher};
pub use termination::{DEFAULT_CAUGHT_UP_PAGES, StopReason, SweepTracker, TerminationPolicy};
