//! Durable sync checkpoint.
//!
//! The manifest is the single source of truth for which articles have been
//! fetched. An entry exists only once its article file has been written, and
//! records whether the author's comments made it into that file.
//!
//! Entries live in a sorted map so identical state always serializes to
//! identical bytes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncError;

/// State of an article's secondary content (author comments).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStatus {
    /// Comments were fetched and written with the article (possibly none).
    Fetched,
    /// Fetching failed or was skipped; eligible for backfill.
    Failed,
}

/// Sync state of a single article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncManifestEntry {
    pub item_id: String,
    pub title: String,
    /// Article file, relative to the data directory.
    pub file_path: PathBuf,
    /// When the article body was saved.
    pub fetched_at: DateTime<Utc>,
    comments_fetched: bool,
    comments_failed: bool,
}

impl SyncManifestEntry {
    /// Creates an entry for a durably saved article.
    #[must_use]
    pub fn new(
        item_id: impl Into<String>,
        title: impl Into<String>,
        file_path: impl Into<PathBuf>,
        fetched_at: DateTime<Utc>,
        comments: CommentStatus,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            title: title.into(),
            file_path: file_path.into(),
            fetched_at,
            comments_fetched: comments == CommentStatus::Fetched,
            comments_failed: comments == CommentStatus::Failed,
        }
    }

    #[must_use]
    pub fn comments_fetched(&self) -> bool {
        self.comments_fetched
    }

    #[must_use]
    pub fn comments_failed(&self) -> bool {
        self.comments_failed
    }

    /// Returns the comment status.
    #[must_use]
    pub fn comment_status(&self) -> CommentStatus {
        if self.comments_fetched && !self.comments_failed {
            CommentStatus::Fetched
        } else {
            CommentStatus::Failed
        }
    }

    fn set_comment_status(&mut self, status: CommentStatus) {
        self.comments_fetched = status == CommentStatus::Fetched;
        self.comments_failed = status == CommentStatus::Failed;
    }
}

/// Progress of the list sweep across runs.
///
/// A run may only stop early on "caught up" once a sweep has reached the end
/// of the listing with every item saved; until then known pages say nothing
/// about the pages after them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepState {
    /// A sweep reached the end of the listing without item failures.
    #[serde(default)]
    pub complete: bool,
    /// First list page not yet checkpointed by an interrupted sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_page: Option<u32>,
    /// An item failed since the current sweep started at page 1.
    #[serde(default)]
    pub item_failed: bool,
}

/// Aggregate checkpoint for one author.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncManifest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    sweep: SweepState,
    #[serde(default)]
    entries: BTreeMap<String, SyncManifestEntry>,
}

/// Counts shown by the status command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSummary {
    pub user_id: Option<String>,
    pub total_entries: usize,
    pub comments_fetched: usize,
    pub pending_backfill: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The author this manifest tracks, once bound.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Binds the manifest to `user_id`; binding is permanent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] if the manifest already tracks a
    /// different author.
    pub fn bind_user(&mut self, user_id: &str) -> Result<(), SyncError> {
        match self.user_id.as_deref() {
            None => {
                self.user_id = Some(user_id.to_string());
                Ok(())
            }
            Some(existing) if existing == user_id => Ok(()),
            Some(existing) => Err(SyncError::configuration(format!(
                "manifest tracks user {existing}, refusing to sync user {user_id}"
            ))),
        }
    }

    /// When the manifest was last persisted.
    #[must_use]
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// Records a persist time.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
    }

    #[must_use]
    pub fn sweep(&self) -> SweepState {
        self.sweep
    }

    /// Whether this run may stop on consecutive fully-known pages.
    #[must_use]
    pub fn caught_up_allowed(&self) -> bool {
        self.sweep.complete && self.sweep.resume_page.is_none()
    }

    /// Starts or resumes a sweep and returns the first list page to fetch.
    pub fn begin_sweep(&mut self) -> u32 {
        match self.sweep.resume_page {
            Some(page) => page,
            None => {
                self.sweep.item_failed = false;
                1
            }
        }
    }

    /// Records that `page` is fully processed and the sweep continues after it.
    pub fn checkpoint_page(&mut self, page: u32) {
        self.sweep.resume_page = Some(page.saturating_add(1));
    }

    /// Records an item that will have to be retried by a later sweep.
    pub fn record_item_failure(&mut self) {
        self.sweep.item_failed = true;
    }

    /// Ends the sweep; it counts as complete only if no item failed in it.
    pub fn finish_sweep(&mut self) {
        self.sweep.resume_page = None;
        self.sweep.complete = !self.sweep.item_failed;
    }

    #[must_use]
    pub fn contains(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    #[must_use]
    pub fn get(&self, item_id: &str) -> Option<&SyncManifestEntry> {
        self.entries.get(item_id)
    }

    /// Inserts or replaces the entry keyed by its `item_id`.
    pub fn upsert(&mut self, entry: SyncManifestEntry) {
        self.entries.insert(entry.item_id.clone(), entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = &SyncManifestEntry> {
        self.entries.values()
    }

    /// Ids of entries whose comments still need fetching, in key order.
    #[must_use]
    pub fn pending_backfill(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.comments_failed)
            .map(|entry| entry.item_id.clone())
            .collect()
    }

    /// Marks an entry's comments as fetched. Returns false for unknown ids.
    pub fn mark_comments_fetched(&mut self, item_id: &str) -> bool {
        match self.entries.get_mut(item_id) {
            Some(entry) => {
                entry.set_comment_status(CommentStatus::Fetched);
                true
            }
            None => false,
        }
    }

    /// Repairs entries loaded with inconsistent comment flags.
    ///
    /// Entries with both flags set, or neither, are demoted to failed so
    /// backfill revisits them; the idempotent append keeps that harmless.
    /// Returns the number repaired.
    pub fn normalize(&mut self) -> usize {
        let mut repaired = 0;
        for entry in self.entries.values_mut() {
            if entry.comments_fetched == entry.comments_failed {
                warn!(
                    item_id = %entry.item_id,
                    comments_fetched = entry.comments_fetched,
                    "entry had inconsistent comment flags, marking failed"
                );
                entry.set_comment_status(CommentStatus::Failed);
                repaired += 1;
            }
        }
        repaired
    }

    /// Summarizes the manifest for display.
    #[must_use]
    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary {
            user_id: self.user_id.clone(),
            total_entries: self.entries.len(),
            comments_fetched: self.entries.values().filter(|e| e.comments_fetched).count(),
            pending_backfill: self.entries.values().filter(|e| e.comments_failed).count(),
            last_sync: self.last_sync,
        }
    }
}
