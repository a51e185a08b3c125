//! Sync orchestrator.
//!
//! [`SyncEngine`] drives the incremental sweep over the author's article list
//! and the comments backfill. It owns the run's [`AdaptiveDelay`] and the
//! manifest for the duration of an operation; nothing runs concurrently.
//!
//! # Checkpoints
//!
//! - `sync` writes the manifest after every list page.
//! - `backfill_comments` writes it after every entry.
//!
//! A crash therefore loses at most one page of work, and the lost items are
//! simply fetched again on the next run.
//!
//! The manifest also records how far the current sweep got. An interrupted
//! sweep resumes at its first unfinished page, and the caught-up stop is only
//! used once a sweep has reached the end of the listing with every article
//! saved. Until then, known pages near the top say nothing about the rest.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use articlesync_core::api::{ApiClient, ReqwestTransport, DEFAULT_BASE_URL};
//! use articlesync_core::content::MarkdownConverter;
//! use articlesync_core::pacing::{AdaptiveDelay, RetryPolicy};
//! use articlesync_core::storage::FsStorage;
//! use articlesync_core::sync::{ItemFetcher, SyncEngine, SyncOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = ReqwestTransport::new(DEFAULT_BASE_URL, "xq_a_token=...", Duration::from_secs(30))?;
//! let api = ApiClient::new(Arc::new(transport), RetryPolicy::default());
//! let fetcher = ItemFetcher::new(api.clone(), Arc::new(MarkdownConverter));
//! let pacing = AdaptiveDelay::new(
//!     Duration::from_secs(9),
//!     Duration::from_secs(3),
//!     Duration::from_secs(120),
//! );
//! let mut engine = SyncEngine::new(
//!     api,
//!     fetcher,
//!     Arc::new(FsStorage::new("data/articles")),
//!     pacing,
//!     SyncOptions::default(),
//! );
//! let report = engine.sync("123456").await?;
//! println!("{} new articles", report.new_items);
//! # Ok(())
//! # }
//! ```

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, info, instrument, warn};

use super::fetcher::ItemFetcher;
use super::termination::{StopReason, TerminationPolicy};
use crate::api::{ApiClient, ArticleSummary};
use crate::error::SyncError;
use crate::manifest::{CommentStatus, ManifestSummary, SyncManifest, SyncManifestEntry};
use crate::pacing::AdaptiveDelay;
use crate::storage::{AUTHOR_NOTES_MARKER, AppendOutcome, Storage, render_author_notes};

/// Default articles requested per list page.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Default number of attempted items between batch pauses.
pub const DEFAULT_BATCH_PAUSE_EVERY: u32 = 5;

/// Default bounds of the batch pause.
pub const DEFAULT_BATCH_PAUSE: RangeInclusive<Duration> =
    Duration::from_secs(30)..=Duration::from_secs(60);

/// Knobs for a sync run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Articles requested per list page.
    pub page_size: u32,
    /// Attempted items between batch pauses; 0 disables batch pauses.
    pub batch_pause_every: u32,
    /// Batch pause length is drawn uniformly from this range.
    pub batch_pause: RangeInclusive<Duration>,
    pub termination: TerminationPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_pause_every: DEFAULT_BATCH_PAUSE_EVERY,
            batch_pause: DEFAULT_BATCH_PAUSE,
            termination: TerminationPolicy::default(),
        }
    }
}

/// Outcome of a `sync` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// List pages fetched successfully.
    pub pages_fetched: u32,
    /// Articles saved and recorded this run.
    pub new_items: usize,
    /// Articles skipped after their body could not be fetched.
    pub failed_items: usize,
    /// Manifest entries awaiting a comments backfill after the run.
    pub comments_pending: usize,
    /// Why the sweep ended.
    pub stop_reason: Option<StopReason>,
}

/// Outcome of a `backfill_comments` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Entries eligible when the run started.
    pub pending: usize,
    /// Entries whose comments are now complete.
    pub backfilled: usize,
    /// Entries still pending after this run.
    pub failed: usize,
}

/// Drives sync and backfill against one storage root.
pub struct SyncEngine {
    api: ApiClient,
    fetcher: ItemFetcher,
    storage: Arc<dyn Storage>,
    pacing: AdaptiveDelay,
    options: SyncOptions,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("fetcher", &self.fetcher)
            .field("pacing", &self.pacing)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        api: ApiClient,
        fetcher: ItemFetcher,
        storage: Arc<dyn Storage>,
        pacing: AdaptiveDelay,
        options: SyncOptions,
    ) -> Self {
        Self {
            api,
            fetcher,
            storage,
            pacing,
            options,
        }
    }

    /// The run's pacing controller.
    #[must_use]
    pub fn pacing(&self) -> &AdaptiveDelay {
        &self.pacing
    }

    /// Fetches every article of `user_id` not yet in the manifest.
    ///
    /// Per-article failures are logged and skipped; the skipped article is
    /// not recorded and will be retried by the next run, which walks the
    /// whole listing again. A sweep cut short by a list failure or the page
    /// limit continues from its next page on the following run.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Configuration`] if the manifest belongs to another user
    /// - [`SyncError::Storage`] if the manifest is corrupt or a write fails
    /// - the list-page error if a list page cannot be fetched; pages before it
    ///   are already checkpointed
    #[instrument(skip(self))]
    pub async fn sync(&mut self, user_id: &str) -> Result<SyncReport, SyncError> {
        let mut manifest = self.storage.load_manifest()?;
        // Only persisted by the first checkpoint, i.e. after a list page succeeded.
        manifest.bind_user(user_id)?;

        let caught_up_allowed = manifest.caught_up_allowed();
        let policy = if caught_up_allowed {
            self.options.termination
        } else {
            self.options.termination.without_caught_up()
        };

        let mut report = SyncReport::default();
        let mut tracker = policy.tracker();
        let mut attempted = 0u32;
        let first_page = manifest.begin_sweep();
        let mut page = first_page;

        info!(
            known_items = manifest.len(),
            first_page,
            caught_up_allowed,
            "starting sync"
        );

        loop {
            if page > first_page {
                self.pacing.wait().await;
            }

            let listing = match self
                .api
                .fetch_article_list(&mut self.pacing, user_id, page, self.options.page_size)
                .await
            {
                Ok(listing) => listing,
                Err(err) => {
                    error!(page, error = %err, "list page failed, aborting sync");
                    return Err(err);
                }
            };
            report.pages_fetched += 1;

            let unknown: Vec<ArticleSummary> = listing
                .articles
                .iter()
                .filter(|article| !manifest.contains(&article.item_id()))
                .cloned()
                .collect();
            info!(
                page,
                max_page = listing.max_page,
                items = listing.articles.len(),
                new_items = unknown.len(),
                "list page fetched"
            );

            for summary in &unknown {
                self.sync_item(&mut manifest, summary, user_id, &mut report)
                    .await?;

                self.pacing.wait().await;
                attempted += 1;
                if self.options.batch_pause_every > 0
                    && attempted % self.options.batch_pause_every == 0
                {
                    self.batch_pause().await;
                }
            }

            let stop =
                tracker.after_page(page, listing.max_page, listing.articles.len(), unknown.len());
            match stop {
                Some(StopReason::PageLimit) | None => manifest.checkpoint_page(page),
                Some(_) => manifest.finish_sweep(),
            }
            self.storage.save_manifest(&mut manifest)?;
            debug!(page, entries = manifest.len(), "checkpoint written");

            if let Some(reason) = stop {
                info!(page, reason = %reason, "sweep finished");
                report.stop_reason = Some(reason);
                break;
            }
            page += 1;
        }

        report.comments_pending = manifest.pending_backfill().len();
        info!(
            pages = report.pages_fetched,
            new_items = report.new_items,
            failed_items = report.failed_items,
            comments_pending = report.comments_pending,
            "sync complete"
        );
        Ok(report)
    }

    /// Retries the comments fetch for every entry marked failed.
    ///
    /// Paced like `sync`, including the batch pause every
    /// `batch_pause_every` attempted entries.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Configuration`] if no sync has bound the manifest to a user
    /// - [`SyncError::Storage`] if the manifest or an article file cannot be written
    #[instrument(skip(self))]
    pub async fn backfill_comments(&mut self) -> Result<BackfillReport, SyncError> {
        let mut manifest = self.storage.load_manifest()?;
        let user_id = manifest
            .user_id()
            .ok_or_else(|| {
                SyncError::configuration("manifest has no user_id; run sync before backfilling")
            })?
            .to_string();
        let author_id: u64 = user_id.parse().map_err(|_| {
            SyncError::configuration(format!("manifest user_id {user_id} is not numeric"))
        })?;

        let pending = manifest.pending_backfill();
        let mut report = BackfillReport {
            pending: pending.len(),
            ..BackfillReport::default()
        };
        info!(pending = report.pending, "starting comments backfill");

        for (index, item_id) in pending.iter().enumerate() {
            if index > 0 {
                self.pacing.wait().await;
            }
            let Some(file_path) = manifest.get(item_id).map(|entry| entry.file_path.clone())
            else {
                continue;
            };

            match self
                .fetcher
                .fetch_author_notes(&mut self.pacing, item_id, author_id)
                .await
            {
                Ok(notes) => {
                    if notes.is_empty() {
                        debug!(item_id = %item_id, "no author comments");
                    } else {
                        let outcome = self.storage.append(
                            &file_path,
                            AUTHOR_NOTES_MARKER,
                            &render_author_notes(&notes),
                        )?;
                        if outcome == AppendOutcome::AlreadyPresent {
                            debug!(item_id = %item_id, "notes already in file");
                        }
                    }
                    manifest.mark_comments_fetched(item_id);
                    report.backfilled += 1;
                    info!(item_id = %item_id, notes = notes.len(), "comments backfilled");
                }
                Err(err) if err.is_item_scoped() => {
                    warn!(item_id = %item_id, error = %err, "backfill failed, will retry next run");
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }

            self.storage.save_manifest(&mut manifest)?;

            let attempted = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if self.options.batch_pause_every > 0
                && attempted % self.options.batch_pause_every == 0
                && index + 1 < pending.len()
            {
                self.batch_pause().await;
            }
        }

        info!(
            backfilled = report.backfilled,
            failed = report.failed,
            "backfill complete"
        );
        Ok(report)
    }

    /// Checks the cookie against the upstream, paced like any other call.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::check_auth`].
    pub async fn check_auth(&mut self, user_id: &str) -> Result<bool, SyncError> {
        self.api.check_auth(&mut self.pacing, user_id).await
    }

    /// Summarizes the stored manifest.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the manifest is unreadable.
    pub fn status(&self) -> Result<ManifestSummary, SyncError> {
        Ok(self.storage.load_manifest()?.summary())
    }

    /// Fetches, saves and records one article.
    async fn sync_item(
        &mut self,
        manifest: &mut SyncManifest,
        summary: &ArticleSummary,
        user_id: &str,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let item_id = summary.item_id();
        if manifest.contains(&item_id) {
            debug!(item_id = %item_id, "listed twice, already recorded");
            return Ok(());
        }
        match self
            .fetcher
            .fetch_item(&mut self.pacing, summary, user_id)
            .await
        {
            Ok(item) => {
                let file_path = self.storage.save(&item.document)?;
                manifest.upsert(SyncManifestEntry::new(
                    item_id,
                    item.document.title,
                    file_path,
                    Utc::now(),
                    item.comments,
                ));
                if item.comments == CommentStatus::Failed {
                    debug!(item_id = summary.id, "comments pending backfill");
                }
                report.new_items += 1;
                Ok(())
            }
            Err(err) if err.is_item_scoped() => {
                error!(item_id = %item_id, error = %err, "article failed, skipping");
                manifest.record_item_failure();
                report.failed_items += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn batch_pause(&self) {
        let (low, high) = (
            self.options.batch_pause.start().as_secs_f64(),
            self.options.batch_pause.end().as_secs_f64(),
        );
        let secs = if high > low {
            rand::thread_rng().gen_range(low..=high)
        } else {
            low
        };
        let pause = Duration::from_secs_f64(secs);
        info!(pause_secs = pause.as_secs(), "batch pause");
        tokio::time::sleep(pause).await;
    }
}
