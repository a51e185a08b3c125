//! Upstream JSON shapes.
//!
//! Only the fields the sync pipeline reads are modeled; everything else in
//! the payloads is ignored. Missing fields fall back to defaults so minor
//! upstream schema drift does not register as a shape mismatch.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserialize;

/// The upstream reports and renders timestamps in UTC+08:00.
pub const UPSTREAM_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Converts a millisecond Unix timestamp into the upstream's local time.
///
/// Out-of-range values clamp to the Unix epoch.
#[must_use]
pub fn upstream_datetime(millis: i64) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(UPSTREAM_UTC_OFFSET_SECS).unwrap_or(Utc.fix());
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .with_timezone(&offset)
}

/// User info embedded in list entries.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ArticleUser {
    /// Upstream account id.
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub screen_name: String,
}

/// One entry of the author's original-article timeline.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArticleSummary {
    /// Stable article id.
    pub id: u64,
    pub title: String,
    pub description: String,
    /// Creation time, Unix milliseconds.
    pub created_at: i64,
    pub user_id: u64,
    pub user: Option<ArticleUser>,
    pub view_count: u64,
    pub like_count: u64,
    pub reply_count: u64,
    pub retweet_count: u64,
}

impl ArticleSummary {
    /// Returns the author id, preferring the flat field over the embedded user.
    #[must_use]
    pub fn author_id(&self) -> Option<u64> {
        if self.user_id != 0 {
            return Some(self.user_id);
        }
        self.user.as_ref().map(|user| user.id).filter(|id| *id != 0)
    }

    /// Returns the manifest key for this article.
    #[must_use]
    pub fn item_id(&self) -> String {
        self.id.to_string()
    }
}

/// Response of the timeline listing endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ArticleListResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(rename = "maxPage", default = "first_page")]
    pub max_page: u32,
    #[serde(rename = "list")]
    pub articles: Vec<ArticleSummary>,
}

fn first_page() -> u32 {
    1
}

/// Response of the article detail endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArticleDetail {
    pub id: u64,
    pub title: Option<String>,
    /// Article body HTML.
    pub text: String,
    pub description: String,
    pub view_count: Option<u64>,
    /// Likes are reported as favourites on this endpoint.
    pub fav_count: Option<u64>,
    pub reply_count: Option<u64>,
    pub retweet_count: Option<u64>,
}

/// User info embedded in comments.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CommentUser {
    pub id: u64,
    #[serde(default)]
    pub screen_name: String,
}

/// A single comment on an article.
///
/// Author notes are the comments whose `user.id` equals the article author.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Comment {
    pub id: u64,
    /// Comment body, may contain inline HTML.
    pub text: String,
    /// Creation time, Unix milliseconds.
    pub created_at: i64,
    pub user: Option<CommentUser>,
    pub like_count: u64,
}

impl Comment {
    /// Returns true when the comment was written by `author_id`.
    #[must_use]
    pub fn is_by(&self, author_id: u64) -> bool {
        self.user.as_ref().is_some_and(|user| user.id == author_id)
    }
}

/// Response of the comments endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CommentsResponse {
    #[serde(default)]
    pub count: u64,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(rename = "maxPage", default = "first_page")]
    pub max_page: u32,
    pub comments: Vec<Comment>,
}
