//! Upstream API access.
//!
//! [`ApiClient`] wraps each endpoint the sync engine needs. Every call goes
//! through a [`RetryExecutor`] with an endpoint-specific [`ResponseShape`], and
//! every outcome is reported to the run's [`AdaptiveDelay`].

mod transport;
mod types;

use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, error, instrument, warn};

pub use transport::{
    ApiResponse, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT, ReqwestTransport, RequestDecorator,
    Transport, TransportError, rotating_user_agent,
};
pub use types::{
    ArticleDetail, ArticleListResponse, ArticleSummary, ArticleUser, Comment, CommentUser,
    CommentsResponse, UPSTREAM_UTC_OFFSET_SECS, upstream_datetime,
};

use crate::content::ExtractionChain;
use crate::error::SyncError;
use crate::pacing::{
    AdaptiveDelay, Classification, JsonShape, ResponseShape, RetryExecutor, RetryPolicy,
};

/// Author's original-article timeline.
pub const ARTICLE_LIST_PATH: &str = "/statuses/original/timeline.json";

/// Single article detail.
pub const ARTICLE_DETAIL_PATH: &str = "/statuses/show.json";

/// Comments on an article.
pub const COMMENTS_PATH: &str = "/statuses/comments.json";

/// Comments requested per page.
pub const COMMENTS_PAGE_SIZE: u32 = 20;

/// Hard cap on comment pages walked for one article.
pub const MAX_COMMENT_PAGES: u32 = 50;

/// The comments endpoint is throttled harder; its backoff base is this many
/// times the configured base.
pub const COMMENTS_DELAY_FACTOR: u32 = 3;

/// Shape of the article HTML page: success means the extraction chain found a body.
#[derive(Debug)]
struct ArticlePageShape<'a> {
    chain: &'a ExtractionChain,
}

impl ResponseShape for ArticlePageShape<'_> {
    type Output = String;

    fn classify(&self, response: &ApiResponse) -> Classification<String> {
        if matches!(response.status, 404 | 410) {
            return Classification::Rejected {
                status: response.status,
            };
        }
        match self.chain.extract(&response.text()) {
            Some(body) => Classification::Success(body),
            None => Classification::SoftBlock {
                reason: format!("no article body in page (HTTP {})", response.status),
            },
        }
    }
}

/// Endpoint wrappers over a [`Transport`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    executor: RetryExecutor,
    comments_executor: RetryExecutor,
    extraction: Arc<ExtractionChain>,
    site_url: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("policy", self.executor.policy())
            .field("site_url", &self.site_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client; comment calls use `policy` scaled by [`COMMENTS_DELAY_FACTOR`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        let executor = RetryExecutor::new(policy);
        let comments_executor = executor.scaled(COMMENTS_DELAY_FACTOR);
        Self {
            transport,
            executor,
            comments_executor,
            extraction: Arc::new(ExtractionChain::default()),
            site_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Replaces the article-page extraction chain.
    #[must_use]
    pub fn with_extraction_chain(mut self, chain: ExtractionChain) -> Self {
        self.extraction = Arc::new(chain);
        self
    }

    /// Sets the site used for canonical article URLs.
    #[must_use]
    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = site_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Canonical URL of an article page.
    #[must_use]
    pub fn article_url(&self, user_id: &str, article_id: &str) -> String {
        format!("{}/{user_id}/{article_id}", self.site_url)
    }

    /// Fetches one page of the author's article timeline.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the page cannot be fetched.
    #[instrument(level = "debug", skip(self, pacing))]
    pub async fn fetch_article_list(
        &self,
        pacing: &mut AdaptiveDelay,
        user_id: &str,
        page: u32,
        count: u32,
    ) -> Result<ArticleListResponse, SyncError> {
        let params = [
            ("user_id", user_id.to_string()),
            ("page", page.to_string()),
            ("count", count.to_string()),
        ];
        self.executor
            .execute(
                pacing,
                "article list",
                &JsonShape::<ArticleListResponse>::new(),
                || self.transport.request(Method::GET, ARTICLE_LIST_PATH, &params),
            )
            .await
    }

    /// Fetches the detail payload of one article.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the detail cannot be fetched.
    #[instrument(level = "debug", skip(self, pacing))]
    pub async fn fetch_article_detail(
        &self,
        pacing: &mut AdaptiveDelay,
        article_id: &str,
    ) -> Result<ArticleDetail, SyncError> {
        let params = [("id", article_id.to_string())];
        self.executor
            .execute(
                pacing,
                "article detail",
                &JsonShape::<ArticleDetail>::new(),
                || {
                    self.transport
                        .request(Method::GET, ARTICLE_DETAIL_PATH, &params)
                },
            )
            .await
    }

    /// Fetches the article's HTML page and extracts its body HTML.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when no body can be obtained.
    #[instrument(level = "debug", skip(self, pacing))]
    pub async fn fetch_article_page(
        &self,
        pacing: &mut AdaptiveDelay,
        user_id: &str,
        article_id: &str,
    ) -> Result<String, SyncError> {
        let path = format!("/{user_id}/{article_id}");
        let shape = ArticlePageShape {
            chain: &self.extraction,
        };
        self.executor
            .execute(pacing, "article page", &shape, || {
                self.transport.request(Method::GET, &path, &[])
            })
            .await
    }

    /// Fetches every comment `author_id` left on an article, oldest first.
    ///
    /// Walks comment pages until the upstream's last page, an empty page, or
    /// [`MAX_COMMENT_PAGES`], pacing between pages. Hitting the cap first is
    /// logged as a warning since later comments are not read.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if any page fails; partial results are discarded.
    #[instrument(level = "debug", skip(self, pacing))]
    pub async fn fetch_author_comments(
        &self,
        pacing: &mut AdaptiveDelay,
        article_id: &str,
        author_id: u64,
    ) -> Result<Vec<Comment>, SyncError> {
        let mut author_comments = Vec::new();
        let mut page = 1u32;

        loop {
            let params = [
                ("id", article_id.to_string()),
                ("count", COMMENTS_PAGE_SIZE.to_string()),
                ("page", page.to_string()),
                ("asc", "false".to_string()),
            ];
            let response = self
                .comments_executor
                .execute(
                    pacing,
                    "comments",
                    &JsonShape::<CommentsResponse>::new(),
                    || self.transport.request(Method::GET, COMMENTS_PATH, &params),
                )
                .await?;

            let exhausted = response.comments.is_empty() || page >= response.max_page;
            if !exhausted && page >= MAX_COMMENT_PAGES {
                warn!(
                    article_id,
                    max_page = response.max_page,
                    cap = MAX_COMMENT_PAGES,
                    "comment page cap reached, later comments not read"
                );
            }
            let last_page = exhausted || page >= MAX_COMMENT_PAGES;
            author_comments.extend(
                response
                    .comments
                    .into_iter()
                    .filter(|comment| comment.is_by(author_id)),
            );

            if last_page {
                break;
            }
            page += 1;
            pacing.wait().await;
        }

        author_comments.sort_by_key(|comment| comment.created_at);
        debug!(
            pages = page,
            author_comments = author_comments.len(),
            "comments fetched"
        );
        Ok(author_comments)
    }

    /// Checks that the cookie grants access by requesting a single list item.
    ///
    /// Per-request failures are logged and reported as `false`.
    ///
    /// # Errors
    ///
    /// Only non-request errors (configuration, storage) propagate.
    #[instrument(level = "debug", skip(self, pacing))]
    pub async fn check_auth(
        &self,
        pacing: &mut AdaptiveDelay,
        user_id: &str,
    ) -> Result<bool, SyncError> {
        match self.fetch_article_list(pacing, user_id, 1, 1).await {
            Ok(response) => Ok(response.total > 0),
            Err(err) if err.is_item_scoped() => {
                error!(error = %err, "auth check failed");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
