//! In-memory stand-in for the upstream API, shared by integration tests.
//!
//! `FakeUpstream` serves the article timeline, detail payloads, article pages
//! and comments from a mutable script. Individual endpoints can be switched
//! into a permanent soft-block (HTML challenge page) and healed again between
//! runs, and every request is recorded.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use articlesync_core::api::{
    ARTICLE_DETAIL_PATH, ARTICLE_LIST_PATH, ApiClient, ApiResponse, COMMENTS_PATH, Transport,
    TransportError,
};
use articlesync_core::content::MarkdownConverter;
use articlesync_core::pacing::{AdaptiveDelay, MAX_RETRIES, RetryPolicy};
use articlesync_core::storage::{FsStorage, Storage};
use articlesync_core::sync::{ItemFetcher, SyncEngine, SyncOptions, TerminationPolicy};
use articlesync_core::SyncManifest;
use async_trait::async_trait;
use reqwest::Method;

pub const AUTHOR_ID: u64 = 42;
pub const USER_ID: &str = "42";
pub const OTHER_USER_ID: u64 = 7;

/// 2024-03-01 10:00 in the upstream's zone.
const BASE_CREATED_AT: i64 = 1_709_258_400_000;

const CHALLENGE_PAGE: &str =
    "<!DOCTYPE html><html><body><script>window.location.reload()</script></body></html>";

#[derive(Debug, Clone)]
pub struct FakeArticle {
    pub id: u64,
    pub title: String,
    pub created_at: i64,
    /// `(commenter id, text)` in posting order.
    pub comments: Vec<(u64, String)>,
    /// Body HTML; a generated two-paragraph body when unset.
    pub body: Option<String>,
}

impl FakeArticle {
    /// An article whose creation time grows with `id`.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            title: format!("Article {id}"),
            created_at: BASE_CREATED_AT + i64::try_from(id).unwrap_or(0) * 3_600_000,
            comments: Vec::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, html: &str) -> Self {
        self.body = Some(html.to_string());
        self
    }

    fn body_html(&self) -> String {
        self.body.clone().unwrap_or_else(|| {
            format!(
                "<p>Body of article {}</p><p><b>Second</b> paragraph.</p>",
                self.id
            )
        })
    }

    pub fn with_comment(mut self, user_id: u64, text: &str) -> Self {
        self.comments.push((user_id, text.to_string()));
        self
    }
}

#[derive(Default)]
struct State {
    /// Newest first, as the timeline lists them.
    articles: Vec<FakeArticle>,
    blocked_articles: HashSet<u64>,
    blocked_comments: HashSet<u64>,
    blocked_list_pages: HashSet<u32>,
    requests: Vec<(String, HashMap<String, String>)>,
}

#[derive(Default)]
pub struct FakeUpstream {
    state: Mutex<State>,
}

impl FakeUpstream {
    pub fn with_articles(articles: Vec<FakeArticle>) -> Arc<Self> {
        let upstream = Self::default();
        upstream.state.lock().unwrap().articles = articles;
        Arc::new(upstream)
    }

    /// `count` articles with ids `count..=1`, newest first, each carrying one
    /// author comment and one comment from someone else.
    pub fn with_article_count(count: u64) -> Arc<Self> {
        Self::with_articles(
            (1..=count)
                .rev()
                .map(|id| {
                    FakeArticle::new(id)
                        .with_comment(OTHER_USER_ID, "nice post")
                        .with_comment(AUTHOR_ID, &format!("Update on {id}"))
                })
                .collect(),
        )
    }

    /// Publishes a new article at the top of the timeline.
    pub fn publish(&self, article: FakeArticle) {
        self.state.lock().unwrap().articles.insert(0, article);
    }

    pub fn block_article(&self, id: u64) {
        self.state.lock().unwrap().blocked_articles.insert(id);
    }

    pub fn heal_article(&self, id: u64) {
        self.state.lock().unwrap().blocked_articles.remove(&id);
    }

    pub fn block_comments(&self, id: u64) {
        self.state.lock().unwrap().blocked_comments.insert(id);
    }

    pub fn heal_comments(&self, id: u64) {
        self.state.lock().unwrap().blocked_comments.remove(&id);
    }

    pub fn block_list_page(&self, page: u32) {
        self.state.lock().unwrap().blocked_list_pages.insert(page);
    }

    pub fn heal_list_page(&self, page: u32) {
        self.state.lock().unwrap().blocked_list_pages.remove(&page);
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    /// The `id` parameter of every request made to `path`.
    pub fn ids_requested(&self, path: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(p, _)| p == path)
            .filter_map(|(_, params)| params.get("id").cloned())
            .collect()
    }

    pub fn list_pages_requested(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(p, _)| p == ARTICLE_LIST_PATH)
            .filter_map(|(_, params)| params.get("page").cloned())
            .collect()
    }

    fn list(state: &State, params: &HashMap<String, String>) -> ApiResponse {
        let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        let count: usize = params.get("count").and_then(|c| c.parse().ok()).unwrap_or(10);
        if state.blocked_list_pages.contains(&u32::try_from(page).unwrap()) {
            return ApiResponse::html(200, CHALLENGE_PAGE);
        }

        let total = state.articles.len();
        let max_page = total.div_ceil(count).max(1);
        let items: Vec<serde_json::Value> = state
            .articles
            .iter()
            .skip((page - 1) * count)
            .take(count)
            .map(|article| {
                serde_json::json!({
                    "id": article.id,
                    "title": article.title,
                    "description": format!("<p>Summary of {}</p>", article.id),
                    "created_at": article.created_at,
                    "user_id": AUTHOR_ID,
                    "user": {"id": AUTHOR_ID, "screen_name": "author"},
                    "view_count": 100,
                    "like_count": 5,
                    "reply_count": article.comments.len(),
                    "retweet_count": 1,
                })
            })
            .collect();
        json_response(&serde_json::json!({
            "total": total,
            "page": page,
            "maxPage": max_page,
            "list": items,
        }))
    }

    fn detail(state: &State, params: &HashMap<String, String>) -> ApiResponse {
        let Some(article) = find(state, params.get("id")) else {
            return json_response(&serde_json::json!({"error_code": "404"})).with_status(404);
        };
        if state.blocked_articles.contains(&article.id) {
            return ApiResponse::html(200, CHALLENGE_PAGE);
        }
        json_response(&serde_json::json!({
            "id": article.id,
            "title": article.title,
            "text": article.body_html(),
            "description": "",
            "view_count": 120,
            "fav_count": 6,
            "reply_count": article.comments.len(),
            "retweet_count": 2,
        }))
    }

    fn page(state: &State, path: &str) -> ApiResponse {
        let id = path.rsplit('/').next().map(str::to_string);
        let Some(article) = find(state, id.as_ref()) else {
            return ApiResponse::html(404, "<html><body>not found</body></html>");
        };
        if state.blocked_articles.contains(&article.id) {
            return ApiResponse::html(200, CHALLENGE_PAGE);
        }
        ApiResponse::html(
            200,
            format!(
                r#"<html><body><div class="article__bd__detail"><p>Body of article {}</p></div></body></html>"#,
                article.id
            ),
        )
    }

    fn comments(state: &State, params: &HashMap<String, String>) -> ApiResponse {
        let Some(article) = find(state, params.get("id")) else {
            return json_response(&serde_json::json!({"comments": [], "maxPage": 1}));
        };
        if state.blocked_comments.contains(&article.id) {
            return ApiResponse::html(200, CHALLENGE_PAGE);
        }
        let comments: Vec<serde_json::Value> = article
            .comments
            .iter()
            .enumerate()
            .rev()
            .map(|(index, (user_id, text))| {
                let offset = i64::try_from(index).unwrap() + 1;
                serde_json::json!({
                    "id": article.id * 1000 + u64::try_from(index).unwrap(),
                    "text": text,
                    "created_at": article.created_at + offset * 60_000,
                    "user": {"id": user_id, "screen_name": format!("user{user_id}")},
                    "like_count": 0,
                })
            })
            .collect();
        json_response(&serde_json::json!({
            "count": comments.len(),
            "page": 1,
            "maxPage": 1,
            "comments": comments,
        }))
    }
}

fn find<'a>(state: &'a State, id: Option<&String>) -> Option<&'a FakeArticle> {
    let id: u64 = id?.parse().ok()?;
    state.articles.iter().find(|article| article.id == id)
}

fn json_response(value: &serde_json::Value) -> ApiResponse {
    ApiResponse::json(value.to_string())
}

#[async_trait]
impl Transport for FakeUpstream {
    async fn request(
        &self,
        _method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse, TransportError> {
        let params: HashMap<String, String> = params
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect();
        let mut state = self.state.lock().unwrap();
        state.requests.push((path.to_string(), params.clone()));

        let response = match path {
            ARTICLE_LIST_PATH => Self::list(&state, &params),
            ARTICLE_DETAIL_PATH => Self::detail(&state, &params),
            COMMENTS_PATH => Self::comments(&state, &params),
            other => Self::page(&state, other),
        };
        Ok(response)
    }
}

/// Engine options tuned for tests: small pages, no batch pauses.
pub fn options(page_size: u32, caught_up_pages: u32, max_pages: Option<u32>) -> SyncOptions {
    SyncOptions {
        page_size,
        batch_pause_every: 0,
        termination: TerminationPolicy::new(max_pages, caught_up_pages),
        ..SyncOptions::default()
    }
}

/// Builds an engine against `upstream` writing into `data_dir`.
pub fn engine(
    upstream: &Arc<FakeUpstream>,
    data_dir: &Path,
    options: SyncOptions,
    skip_comments: bool,
) -> SyncEngine {
    let transport: Arc<dyn Transport> = upstream.clone();
    let api = ApiClient::new(
        transport,
        RetryPolicy::new(MAX_RETRIES, Duration::from_secs(3)),
    );
    let fetcher = ItemFetcher::new(api.clone(), Arc::new(MarkdownConverter))
        .with_skip_comments(skip_comments);
    let pacing = AdaptiveDelay::new(
        Duration::from_secs(9),
        Duration::from_secs(3),
        Duration::from_secs(120),
    );
    SyncEngine::new(
        api,
        fetcher,
        Arc::new(FsStorage::new(data_dir)),
        pacing,
        options,
    )
}

pub fn load_manifest(data_dir: &Path) -> SyncManifest {
    FsStorage::new(data_dir).load_manifest().unwrap()
}

/// Contents of the stored file for `item_id`.
pub fn article_file(data_dir: &Path, item_id: &str) -> String {
    let manifest = load_manifest(data_dir);
    let entry = manifest.get(item_id).unwrap();
    std::fs::read_to_string(data_dir.join(&entry.file_path)).unwrap()
}
