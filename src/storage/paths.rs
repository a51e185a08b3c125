//! Output path construction for stored articles.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

/// Maximum characters kept from a title when building a filename.
pub const MAX_TITLE_CHARS: usize = 50;

/// Name of the manifest file inside the data directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Anything outside word characters (Unicode-aware, so CJK survives) and `-`.
#[allow(clippy::expect_used)]
static UNSAFE_FILENAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\w\-]").expect("filename regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static UNDERSCORE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("underscore regex is valid"));

/// Makes a title safe for use inside a filename.
///
/// Disallowed characters become `_`, runs of `_` collapse, leading and
/// trailing `_` are trimmed, and the result is cut to [`MAX_TITLE_CHARS`]
/// characters. An empty result becomes `untitled`.
#[must_use]
pub fn sanitize_filename(title: &str) -> String {
    let replaced = UNSAFE_FILENAME_CHARS.replace_all(title, "_");
    let collapsed = UNDERSCORE_RUN.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');

    let truncated: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
    let truncated = truncated.trim_end_matches('_');

    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated.to_string()
    }
}

/// Builds `data_dir/YYYY/YYYY-MM-DD_<title>_<id>.md` for an article.
#[must_use]
pub fn build_article_path(
    data_dir: &Path,
    published_at: &DateTime<FixedOffset>,
    title: &str,
    item_id: &str,
) -> PathBuf {
    let file_name = format!(
        "{}_{}_{}.md",
        published_at.format("%Y-%m-%d"),
        sanitize_filename(title),
        item_id
    );
    data_dir
        .join(published_at.format("%Y").to_string())
        .join(file_name)
}

/// Returns the manifest location inside `data_dir`.
#[must_use]
pub fn manifest_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MANIFEST_FILE_NAME)
}
