//! Articlesync Core Library
//!
//! Incrementally mirrors one author's long-form articles, and the author's
//! own follow-up comments on them, from a rate-limited upstream into a local
//! Markdown archive.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - Transport seam and upstream endpoint wrappers
//! - [`pacing`] - Adaptive inter-request delay and WAF-aware retry
//! - [`content`] - Article body extraction and HTML to Markdown conversion
//! - [`manifest`] - Persistent sync checkpoint
//! - [`storage`] - Atomic file output and document layout
//! - [`sync`] - Item fetching and the sync/backfill orchestrator
//! - [`config`] - Layered run configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod content;
pub mod error;
pub mod manifest;
pub mod pacing;
pub mod storage;
pub mod sync;

mod user_agent;

// Re-export commonly used types
pub use api::{ApiClient, ApiResponse, ReqwestTransport, Transport, TransportError};
pub use config::SyncConfig;
pub use content::{ExtractionChain, MarkdownConverter};
pub use error::SyncError;
pub use manifest::{CommentStatus, ManifestSummary, SweepState, SyncManifest, SyncManifestEntry};
pub use pacing::{AdaptiveDelay, RetryExecutor, RetryPolicy};
pub use storage::{FsStorage, Storage, StorageError};
pub use sync::{BackfillReport, ItemFetcher, SyncEngine, SyncOptions, SyncReport};
