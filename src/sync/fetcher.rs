//! Materializes one article: body, metadata and the author's own comments.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::api::{ApiClient, ArticleDetail, ArticleSummary, upstream_datetime};
use crate::content::{ContentConverter, clean_comment_text, strip_tags};
use crate::error::SyncError;
use crate::manifest::CommentStatus;
use crate::pacing::AdaptiveDelay;
use crate::storage::{ArticleDocument, AuthorNote};

/// Characters of the description used when an article has no title.
const DESCRIPTION_TITLE_CHARS: usize = 30;

/// A fully fetched article ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedItem {
    pub document: ArticleDocument,
    /// Whether the author notes in `document` are complete.
    pub comments: CommentStatus,
}

/// Composes API calls into complete articles.
#[derive(Clone)]
pub struct ItemFetcher {
    api: ApiClient,
    converter: Arc<dyn ContentConverter>,
    skip_comments: bool,
}

impl std::fmt::Debug for ItemFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemFetcher")
            .field("api", &self.api)
            .field("skip_comments", &self.skip_comments)
            .finish_non_exhaustive()
    }
}

impl ItemFetcher {
    /// Creates a fetcher converting bodies with `converter`.
    #[must_use]
    pub fn new(api: ApiClient, converter: Arc<dyn ContentConverter>) -> Self {
        Self {
            api,
            converter,
            skip_comments: false,
        }
    }

    /// Skips the comments fetch; items are then recorded as pending backfill.
    #[must_use]
    pub fn with_skip_comments(mut self, skip: bool) -> Self {
        self.skip_comments = skip;
        self
    }

    /// Fetches and converts one article listed in `summary`.
    ///
    /// A comments failure does not fail the item; it comes back with
    /// [`CommentStatus::Failed`] so the manifest marks it for backfill.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Configuration`] if comments are wanted but the author's
    ///   id is neither listed nor numeric in `user_id`
    /// - [`SyncError`] from the upstream if the article body cannot be obtained
    #[instrument(skip(self, pacing, summary), fields(item_id = summary.id))]
    pub async fn fetch_item(
        &self,
        pacing: &mut AdaptiveDelay,
        summary: &ArticleSummary,
        user_id: &str,
    ) -> Result<FetchedItem, SyncError> {
        let item_id = summary.item_id();
        let author_id = if self.skip_comments {
            None
        } else {
            Some(resolve_author_id(summary, user_id)?)
        };
        let (body_html, detail) = self.fetch_body(pacing, user_id, &item_id).await?;
        let body = self.convert(&body_html);

        let (author_notes, comments) = if let Some(author_id) = author_id {
            pacing.wait().await;
            match self.fetch_author_notes(pacing, &item_id, author_id).await {
                Ok(notes) => (notes, CommentStatus::Fetched),
                Err(err) if err.is_item_scoped() => {
                    warn!(error = %err, "comments unavailable, marking for backfill");
                    (Vec::new(), CommentStatus::Failed)
                }
                Err(err) => return Err(err),
            }
        } else {
            debug!("comments skipped by configuration");
            (Vec::new(), CommentStatus::Failed)
        };

        let detail = detail.unwrap_or_default();
        let document = ArticleDocument {
            title: derive_title(summary, &detail),
            published_at: upstream_datetime(summary.created_at),
            url: self.api.article_url(user_id, &item_id),
            view_count: detail.view_count.unwrap_or(summary.view_count),
            like_count: detail.fav_count.unwrap_or(summary.like_count),
            reply_count: detail.reply_count.unwrap_or(summary.reply_count),
            retweet_count: detail.retweet_count.unwrap_or(summary.retweet_count),
            body,
            author_notes,
            item_id,
        };
        Ok(FetchedItem { document, comments })
    }

    /// Fetches the author's comments on an article as notes, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if any comments page fails.
    pub async fn fetch_author_notes(
        &self,
        pacing: &mut AdaptiveDelay,
        article_id: &str,
        author_id: u64,
    ) -> Result<Vec<AuthorNote>, SyncError> {
        let comments = self
            .api
            .fetch_author_comments(pacing, article_id, author_id)
            .await?;
        Ok(comments
            .iter()
            .map(|comment| AuthorNote {
                created_at: upstream_datetime(comment.created_at),
                text: clean_comment_text(&comment.text),
            })
            .filter(|note| !note.text.is_empty())
            .collect())
    }

    /// Returns the body HTML, from the detail payload or else the article page.
    async fn fetch_body(
        &self,
        pacing: &mut AdaptiveDelay,
        user_id: &str,
        item_id: &str,
    ) -> Result<(String, Option<ArticleDetail>), SyncError> {
        let detail = match self.api.fetch_article_detail(pacing, item_id).await {
            Ok(detail) if !detail.text.trim().is_empty() => {
                let html = detail.text.clone();
                return Ok((html, Some(detail)));
            }
            Ok(detail) => {
                debug!("detail has no body, falling back to article page");
                Some(detail)
            }
            Err(SyncError::Rejected { status, .. }) => {
                debug!(status, "detail rejected, falling back to article page");
                None
            }
            Err(err) => return Err(err),
        };

        pacing.wait().await;
        let html = self
            .api
            .fetch_article_page(pacing, user_id, item_id)
            .await?;
        Ok((html, detail))
    }

    fn convert(&self, html: &str) -> String {
        match self.converter.convert(html) {
            Ok(markdown) => markdown,
            Err(err) => {
                warn!(error = %err, "conversion failed, storing plain text");
                strip_tags(html)
            }
        }
    }
}

/// Picks a title: listing title, detail title, then the start of the description.
fn derive_title(summary: &ArticleSummary, detail: &ArticleDetail) -> String {
    if !summary.title.trim().is_empty() {
        return summary.title.trim().to_string();
    }
    if let Some(title) = detail.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    strip_tags(&summary.description)
        .chars()
        .take(DESCRIPTION_TITLE_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

/// The author whose comments become notes: the listed author, else `user_id`.
fn resolve_author_id(summary: &ArticleSummary, user_id: &str) -> Result<u64, SyncError> {
    summary
        .author_id()
        .or_else(|| user_id.parse().ok().filter(|id| *id != 0))
        .ok_or_else(|| {
            SyncError::configuration(format!(
                "article {} has no author and user id {user_id:?} is not numeric",
                summary.id
            ))
        })
}
