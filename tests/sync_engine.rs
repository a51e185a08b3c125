//! Integration tests for the sync orchestrator against a fake upstream.

mod support;

use std::time::Duration;

use articlesync_core::api::{ARTICLE_DETAIL_PATH, COMMENTS_PATH};
use articlesync_core::storage::{AUTHOR_NOTES_HEADING, AUTHOR_NOTES_MARKER};
use articlesync_core::sync::{StopReason, SyncOptions};
use articlesync_core::{CommentStatus, SyncError, SyncManifestEntry};
use support::{
    AUTHOR_ID, FakeArticle, FakeUpstream, USER_ID, article_file, engine, load_manifest, options,
};
use tempfile::TempDir;

fn entries(dir: &TempDir) -> Vec<SyncManifestEntry> {
    load_manifest(dir.path()).entries().cloned().collect()
}

// ==================== Sync Tests ====================

#[tokio::test(start_paused = true)]
async fn test_sync_saves_every_article_with_author_notes() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(3);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, None), false);

    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.new_items, 3);
    assert_eq!(report.failed_items, 0);
    assert_eq!(report.comments_pending, 0);
    assert_eq!(report.stop_reason, Some(StopReason::LastPage));

    let manifest = load_manifest(dir.path());
    assert_eq!(manifest.user_id(), Some(USER_ID));
    assert_eq!(manifest.len(), 3);
    assert!(manifest.last_sync().is_some());

    let file = article_file(dir.path(), "3");
    assert!(file.starts_with("---\n"));
    assert!(file.contains("# Article 3"));
    assert!(file.contains("Body of article 3"));
    assert!(file.contains("**Second** paragraph."));
    assert!(file.contains(AUTHOR_NOTES_MARKER));
    assert!(file.contains("Update on 3"));
    assert!(!file.contains("nice post"), "other users' comments are dropped");

    let entry = manifest.get("3").unwrap();
    assert_eq!(entry.comment_status(), CommentStatus::Fetched);
    assert!(entry.file_path.starts_with("2024"));
}

#[tokio::test(start_paused = true)]
async fn test_second_sync_fetches_nothing_and_keeps_entries() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(3);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, None), false);
    engine.sync(USER_ID).await.unwrap();
    let before = entries(&dir);

    upstream.clear_requests();
    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.new_items, 0);
    assert_eq!(report.stop_reason, Some(StopReason::CaughtUp));
    assert!(upstream.ids_requested(ARTICLE_DETAIL_PATH).is_empty());
    assert!(upstream.ids_requested(COMMENTS_PATH).is_empty());
    assert_eq!(entries(&dir), before);
}

#[tokio::test(start_paused = true)]
async fn test_sync_picks_up_newly_published_article() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(3);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, None), false);
    engine.sync(USER_ID).await.unwrap();

    upstream.publish(FakeArticle::new(4).with_comment(AUTHOR_ID, "fresh thoughts"));
    upstream.clear_requests();
    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.new_items, 1);
    assert_eq!(upstream.ids_requested(ARTICLE_DETAIL_PATH), vec!["4"]);
    assert_eq!(load_manifest(dir.path()).len(), 4);
    assert!(article_file(dir.path(), "4").contains("fresh thoughts"));
}

#[tokio::test(start_paused = true)]
async fn test_list_failure_keeps_earlier_pages_and_next_run_resumes() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(4);
    upstream.block_list_page(2);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, None), false);

    let err = engine.sync(USER_ID).await.unwrap_err();
    assert!(matches!(err, SyncError::RateLimitExceeded { .. }));

    let manifest = load_manifest(dir.path());
    assert_eq!(manifest.len(), 2);
    assert!(manifest.contains("4"));
    assert!(manifest.contains("3"));

    upstream.heal_list_page(2);
    upstream.clear_requests();
    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.new_items, 2);
    assert_eq!(upstream.ids_requested(ARTICLE_DETAIL_PATH), vec!["2", "1"]);
    assert_eq!(load_manifest(dir.path()).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_article_is_skipped_then_fetched_next_run() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(5);
    upstream.block_article(3);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, None), false);

    let report = engine.sync(USER_ID).await.unwrap();
    assert_eq!(report.new_items, 4);
    assert_eq!(report.failed_items, 1);
    assert!(!load_manifest(dir.path()).contains("3"));

    upstream.heal_article(3);
    upstream.clear_requests();
    let report = engine.sync(USER_ID).await.unwrap();

    // Page 1 is fully known, page 2 still holds the skipped article.
    assert_eq!(report.new_items, 1);
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(upstream.ids_requested(ARTICLE_DETAIL_PATH), vec!["3"]);
    assert!(load_manifest(dir.path()).contains("3"));
}

#[tokio::test(start_paused = true)]
async fn test_caught_up_stops_before_last_page() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(10);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, None), false);
    engine.sync(USER_ID).await.unwrap();

    upstream.publish(FakeArticle::new(11));
    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.new_items, 1);
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(report.stop_reason, Some(StopReason::CaughtUp));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_caught_up_walks_every_page() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(10);
    let mut engine = engine(&upstream, dir.path(), options(2, 0, None), false);
    engine.sync(USER_ID).await.unwrap();

    upstream.publish(FakeArticle::new(11));
    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.new_items, 1);
    assert_eq!(report.pages_fetched, 6);
    assert_eq!(report.stop_reason, Some(StopReason::LastPage));
}

#[tokio::test(start_paused = true)]
async fn test_max_pages_limits_sweep() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(6);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, Some(1)), false);

    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.new_items, 2);
    assert_eq!(report.stop_reason, Some(StopReason::PageLimit));
    assert_eq!(upstream.list_pages_requested(), vec!["1"]);
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_first_sweep_resumes_at_unfinished_page() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(6);
    upstream.block_list_page(3);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, None), false);

    engine.sync(USER_ID).await.unwrap_err();
    assert_eq!(load_manifest(dir.path()).len(), 4);
    assert_eq!(load_manifest(dir.path()).sweep().resume_page, Some(3));

    // Pages 1 and 2 are fully known, but the sweep never saw page 3.
    upstream.heal_list_page(3);
    upstream.clear_requests();
    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(upstream.list_pages_requested(), vec!["3"]);
    assert_eq!(upstream.ids_requested(ARTICLE_DETAIL_PATH), vec!["2", "1"]);
    assert_eq!(report.new_items, 2);
    assert_eq!(report.stop_reason, Some(StopReason::LastPage));
    assert_eq!(load_manifest(dir.path()).len(), 6);
    assert!(load_manifest(dir.path()).caught_up_allowed());

    upstream.clear_requests();
    let report = engine.sync(USER_ID).await.unwrap();
    assert_eq!(report.new_items, 0);
    assert_eq!(report.stop_reason, Some(StopReason::CaughtUp));
    assert_eq!(upstream.list_pages_requested(), vec!["1", "2"]);
}

#[tokio::test(start_paused = true)]
async fn test_page_limited_runs_walk_the_whole_listing() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(6);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, Some(1)), false);

    for expected in [StopReason::PageLimit, StopReason::PageLimit, StopReason::LastPage] {
        let report = engine.sync(USER_ID).await.unwrap();
        assert_eq!(report.new_items, 2);
        assert_eq!(report.stop_reason, Some(expected));
    }

    assert_eq!(upstream.list_pages_requested(), vec!["1", "2", "3"]);
    assert_eq!(load_manifest(dir.path()).len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_deep_failed_article_is_retried_despite_known_top_pages() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(10);
    upstream.block_article(1);
    let mut engine = engine(&upstream, dir.path(), options(2, 2, None), false);

    let report = engine.sync(USER_ID).await.unwrap();
    assert_eq!(report.failed_items, 1);
    assert_eq!(report.stop_reason, Some(StopReason::LastPage));
    assert!(!load_manifest(dir.path()).caught_up_allowed());

    upstream.heal_article(1);
    upstream.clear_requests();
    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.pages_fetched, 5);
    assert_eq!(report.new_items, 1);
    assert_eq!(upstream.ids_requested(ARTICLE_DETAIL_PATH), vec!["1"]);
    assert_eq!(load_manifest(dir.path()).len(), 10);

    let report = engine.sync(USER_ID).await.unwrap();
    assert_eq!(report.stop_reason, Some(StopReason::CaughtUp));
}

#[tokio::test(start_paused = true)]
async fn test_empty_timeline() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_articles(Vec::new());
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);

    let report = engine.sync(USER_ID).await.unwrap();

    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.new_items, 0);
    assert_eq!(report.stop_reason, Some(StopReason::EmptyPage));
}

#[tokio::test(start_paused = true)]
async fn test_sync_rejects_manifest_of_other_user() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(1);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);
    engine.sync(USER_ID).await.unwrap();

    upstream.clear_requests();
    let err = engine.sync("43").await.unwrap_err();

    assert!(matches!(err, SyncError::Configuration(_)));
    assert_eq!(upstream.request_count(), 0);
    assert_eq!(load_manifest(dir.path()).user_id(), Some(USER_ID));
}

// ==================== Backfill Tests ====================

#[tokio::test(start_paused = true)]
async fn test_comments_failure_is_backfilled_alone() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(3);
    upstream.block_comments(2);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);

    let report = engine.sync(USER_ID).await.unwrap();
    assert_eq!(report.new_items, 3);
    assert_eq!(report.comments_pending, 1);
    assert_eq!(
        load_manifest(dir.path()).get("2").unwrap().comment_status(),
        CommentStatus::Failed
    );
    assert!(!article_file(dir.path(), "2").contains(AUTHOR_NOTES_MARKER));

    upstream.heal_comments(2);
    upstream.clear_requests();
    let report = engine.backfill_comments().await.unwrap();

    assert_eq!(report.pending, 1);
    assert_eq!(report.backfilled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(upstream.ids_requested(COMMENTS_PATH), vec!["2"]);
    assert!(upstream.ids_requested(ARTICLE_DETAIL_PATH).is_empty());
    assert!(upstream.list_pages_requested().is_empty());

    let file = article_file(dir.path(), "2");
    assert!(file.contains("Body of article 2"));
    assert_eq!(file.matches(AUTHOR_NOTES_MARKER).count(), 1);
    assert!(file.contains("Update on 2"));
    assert_eq!(load_manifest(dir.path()).pending_backfill(), Vec::<String>::new());
}

#[tokio::test(start_paused = true)]
async fn test_backfill_with_nothing_pending_makes_no_requests() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(2);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);
    engine.sync(USER_ID).await.unwrap();

    upstream.clear_requests();
    let report = engine.backfill_comments().await.unwrap();

    assert_eq!(report.pending, 0);
    assert_eq!(report.backfilled, 0);
    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backfill_twice_appends_notes_once() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(2);
    upstream.block_comments(2);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);
    engine.sync(USER_ID).await.unwrap();
    upstream.heal_comments(2);
    assert_eq!(engine.backfill_comments().await.unwrap().backfilled, 1);

    upstream.clear_requests();
    let report = engine.backfill_comments().await.unwrap();

    assert_eq!(report.pending, 0);
    assert_eq!(upstream.request_count(), 0);
    let file = article_file(dir.path(), "2");
    assert_eq!(file.matches(AUTHOR_NOTES_MARKER).count(), 1);
    assert_eq!(file.matches("Update on 2").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backfill_of_entry_with_notes_already_written_does_not_duplicate() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(1);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);
    engine.sync(USER_ID).await.unwrap();

    // A crash between writing the notes and checkpointing leaves the entry pending.
    let manifest_path = dir.path().join("manifest.json");
    let raw = std::fs::read_to_string(&manifest_path).unwrap();
    let mut json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    json["entries"]["1"]["comments_fetched"] = serde_json::Value::Bool(false);
    json["entries"]["1"]["comments_failed"] = serde_json::Value::Bool(true);
    std::fs::write(&manifest_path, json.to_string()).unwrap();

    let report = engine.backfill_comments().await.unwrap();

    assert_eq!(report.backfilled, 1);
    let file = article_file(dir.path(), "1");
    assert_eq!(file.matches(AUTHOR_NOTES_MARKER).count(), 1);
    assert_eq!(file.matches("Update on 1").count(), 1);
    assert!(load_manifest(dir.path()).pending_backfill().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backfill_appends_notes_when_body_has_notes_heading() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_articles(vec![
        FakeArticle::new(1)
            .with_body(&format!(
                "<p>Intro</p><h2>{}</h2><p>Written by hand.</p>",
                AUTHOR_NOTES_HEADING.trim_start_matches("## ")
            ))
            .with_comment(AUTHOR_ID, "late update"),
    ]);
    upstream.block_comments(1);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);
    engine.sync(USER_ID).await.unwrap();
    assert!(article_file(dir.path(), "1").contains(AUTHOR_NOTES_HEADING));

    upstream.heal_comments(1);
    let report = engine.backfill_comments().await.unwrap();

    assert_eq!(report.backfilled, 1);
    let file = article_file(dir.path(), "1");
    assert!(file.contains("Written by hand."));
    assert!(file.contains("late update"));
    assert_eq!(file.matches(AUTHOR_NOTES_MARKER).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backfill_takes_batch_pauses() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(3);
    let mut skipping = engine(&upstream, dir.path(), options(10, 2, None), true);
    skipping.sync(USER_ID).await.unwrap();

    let pause = Duration::from_secs(10_000);
    let paced = SyncOptions {
        batch_pause_every: 2,
        batch_pause: pause..=pause,
        ..options(10, 2, None)
    };
    let mut engine = engine(&upstream, dir.path(), paced, false);

    let started = tokio::time::Instant::now();
    let report = engine.backfill_comments().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.backfilled, 3);
    // One pause after the second entry; none after the last.
    assert!(elapsed >= pause, "{elapsed:?}");
    assert!(elapsed < pause * 2, "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_backfill_failure_stays_pending() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(2);
    upstream.block_comments(1);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);
    engine.sync(USER_ID).await.unwrap();

    let report = engine.backfill_comments().await.unwrap();

    assert_eq!(report.pending, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(load_manifest(dir.path()).pending_backfill(), vec!["1"]);
}

#[tokio::test(start_paused = true)]
async fn test_skip_comments_then_backfill_everything() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(3);
    let mut skipping = engine(&upstream, dir.path(), options(10, 2, None), true);

    let report = skipping.sync(USER_ID).await.unwrap();
    assert_eq!(report.comments_pending, 3);
    assert!(upstream.ids_requested(COMMENTS_PATH).is_empty());

    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);
    let report = engine.backfill_comments().await.unwrap();

    assert_eq!(report.backfilled, 3);
    for id in ["1", "2", "3"] {
        let file = article_file(dir.path(), id);
        assert!(file.contains(&format!("Update on {id}")));
    }
    assert_eq!(load_manifest(dir.path()).summary().pending_backfill, 0);
}

#[tokio::test(start_paused = true)]
async fn test_backfill_before_any_sync_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(1);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);

    let err = engine.backfill_comments().await.unwrap_err();

    assert!(matches!(err, SyncError::Configuration(_)));
    assert_eq!(upstream.request_count(), 0);
}

// ==================== Auth and Status Tests ====================

#[tokio::test(start_paused = true)]
async fn test_check_auth() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(1);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);
    assert!(engine.check_auth(USER_ID).await.unwrap());

    upstream.block_list_page(1);
    assert!(!engine.check_auth(USER_ID).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_status_reflects_manifest() {
    let dir = TempDir::new().unwrap();
    let upstream = FakeUpstream::with_article_count(3);
    upstream.block_comments(3);
    let mut engine = engine(&upstream, dir.path(), options(10, 2, None), false);

    let summary = engine.status().unwrap();
    assert_eq!(summary.total_entries, 0);
    assert!(summary.last_sync.is_none());

    engine.sync(USER_ID).await.unwrap();
    let summary = engine.status().unwrap();
    assert_eq!(summary.user_id.as_deref(), Some(USER_ID));
    assert_eq!(summary.total_entries, 3);
    assert_eq!(summary.comments_fetched, 2);
    assert_eq!(summary.pending_backfill, 1);
}
