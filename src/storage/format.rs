//! Markdown document layout for stored articles.
//!
//! ```text
//! ---
//! title: "..."
//! date: 2024-01-15T07:50:00+08:00
//! article_id: 123
//! ...
//! ---
//!
//! # Title
//!
//! body
//!
//! ---
//!
//! <!-- author-notes -->
//! ## 补充说明
//!
//! ### 2024-01-15 09:00
//!
//! note
//! ```
//!
//! The author-notes section is rendered identically whether it is written
//! with the article or appended later by a backfill, so both paths produce
//! the same file.
//!
//! The section opens with [`AUTHOR_NOTES_MARKER`], an HTML comment on its own
//! line. Body lines that would read as the marker are entity-escaped on
//! render, so only a written notes section ever carries it.

use chrono::{DateTime, FixedOffset};

/// Line marking a written author-notes section; the append idempotency key.
pub const AUTHOR_NOTES_MARKER: &str = "<!-- author-notes -->";

/// Visible heading of the author-notes section.
pub const AUTHOR_NOTES_HEADING: &str = "## 补充说明";

const ESCAPED_AUTHOR_NOTES_MARKER: &str = "&lt;!-- author-notes --&gt;";

/// A comment the article's author left on their own article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorNote {
    /// Creation time in the upstream's local zone.
    pub created_at: DateTime<FixedOffset>,
    /// Plain text, already stripped of markup.
    pub text: String,
}

/// Everything needed to write one article file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleDocument {
    pub item_id: String,
    pub title: String,
    pub published_at: DateTime<FixedOffset>,
    /// Canonical page URL.
    pub url: String,
    pub view_count: u64,
    pub like_count: u64,
    pub reply_count: u64,
    pub retweet_count: u64,
    /// Converted Markdown body.
    pub body: String,
    pub author_notes: Vec<AuthorNote>,
}

/// Renders the full file contents for `document`.
#[must_use]
pub fn render_document(document: &ArticleDocument) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("title: \"{}\"\n", escape_yaml(&document.title)));
    out.push_str(&format!(
        "date: {}\n",
        document.published_at.format("%Y-%m-%dT%H:%M:%S%:z")
    ));
    out.push_str(&format!("article_id: {}\n", document.item_id));
    out.push_str(&format!("url: {}\n", document.url));
    out.push_str(&format!("view_count: {}\n", document.view_count));
    out.push_str(&format!("like_count: {}\n", document.like_count));
    out.push_str(&format!("reply_count: {}\n", document.reply_count));
    out.push_str(&format!("retweet_count: {}\n", document.retweet_count));
    out.push_str("---\n\n");
    out.push_str(&format!("# {}\n\n", document.title));
    for line in document.body.trim_end().lines() {
        if is_marker_line(line) {
            out.push_str(ESCAPED_AUTHOR_NOTES_MARKER);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !document.author_notes.is_empty() {
        out.push('\n');
        out.push_str(&render_author_notes(&document.author_notes));
    }
    out
}

/// Renders the author-notes section, starting with a rule and the marker.
#[must_use]
pub fn render_author_notes(notes: &[AuthorNote]) -> String {
    let mut out = format!("---\n\n{AUTHOR_NOTES_MARKER}\n{AUTHOR_NOTES_HEADING}\n");
    for note in notes {
        out.push_str(&format!(
            "\n### {}\n\n{}\n",
            note.created_at.format("%Y-%m-%d %H:%M"),
            note.text.trim()
        ));
    }
    out
}

/// True when `line` is exactly the notes marker, ignoring surrounding whitespace.
#[must_use]
pub fn is_marker_line(line: &str) -> bool {
    line.trim() == AUTHOR_NOTES_MARKER
}

fn escape_yaml(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
