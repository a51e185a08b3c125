//! HTML to Markdown conversion.
//!
//! [`MarkdownConverter`] walks the DOM produced by `scraper` and emits
//! Markdown for the handful of elements article bodies actually use.
//! Everything unrecognized is flattened to its text.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use thiserror::Error;

/// Errors produced by a [`ContentConverter`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    /// Non-empty HTML produced no text at all.
    #[error("conversion produced no text from {input_len} bytes of HTML")]
    Empty {
        /// Length of the rejected input.
        input_len: usize,
    },
}

/// Turns article HTML into stored text.
pub trait ContentConverter: Send + Sync {
    /// Converts `html`. Empty input converts to an empty string.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] when the input cannot be rendered.
    fn convert(&self, html: &str) -> Result<String, ConversionError>;
}

#[allow(clippy::expect_used)]
static BLANK_LINE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line regex is valid"));

#[allow(clippy::expect_used)]
static BR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("br regex is valid"));

/// DOM-walking Markdown converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownConverter;

impl ContentConverter for MarkdownConverter {
    fn convert(&self, html: &str) -> Result<String, ConversionError> {
        if html.trim().is_empty() {
            return Ok(String::new());
        }

        let fragment = Html::parse_fragment(html);
        let mut out = String::new();
        render_block_children(fragment.root_element(), &mut out);

        let markdown = tidy(&out);
        if markdown.is_empty() {
            return Err(ConversionError::Empty {
                input_len: html.len(),
            });
        }
        Ok(markdown)
    }
}

/// Degraded rendering: all tags dropped, entities decoded.
#[must_use]
pub fn strip_tags(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Cleans a comment body: `<br>` becomes a newline, other markup is dropped.
#[must_use]
pub fn clean_comment_text(text: &str) -> String {
    strip_tags(&BR_TAG.replace_all(text, "\n"))
}

fn render_block_children(parent: ElementRef<'_>, out: &mut String) {
    for child in parent.children() {
        if let Some(element) = ElementRef::wrap(child) {
            render_block(element, out);
        } else if let Some(text) = child.value().as_text() {
            if !text.trim().is_empty() {
                out.push_str(text);
            }
        }
    }
}

fn render_block(element: ElementRef<'_>, out: &mut String) {
    match element.value().name() {
        name @ ("h1" | "h2" | "h3" | "h4" | "h5" | "h6") => {
            let level = usize::from(name.as_bytes()[1] - b'0');
            let text = collapse_whitespace(&element.text().collect::<String>());
            if !text.is_empty() {
                push_block(out, &format!("{} {text}", "#".repeat(level)));
            }
        }
        "p" => {
            let text = inline_children(element);
            let text = text.trim();
            if !text.is_empty() {
                push_block(out, text);
            }
        }
        "br" => out.push('\n'),
        "hr" => push_block(out, "---"),
        "blockquote" => {
            let mut inner = String::new();
            render_block_children(element, &mut inner);
            let inner = tidy(&inner);
            if !inner.is_empty() {
                let quoted: Vec<String> = inner
                    .lines()
                    .map(|line| {
                        if line.is_empty() {
                            ">".to_string()
                        } else {
                            format!("> {line}")
                        }
                    })
                    .collect();
                push_block(out, &quoted.join("\n"));
            }
        }
        list @ ("ul" | "ol") => {
            let items: Vec<String> = element
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|child| child.value().name() == "li")
                .enumerate()
                .map(|(index, item)| {
                    let text = collapse_whitespace(&inline_children(item));
                    if list == "ol" {
                        format!("{}. {text}", index + 1)
                    } else {
                        format!("- {text}")
                    }
                })
                .collect();
            if !items.is_empty() {
                push_block(out, &items.join("\n"));
            }
        }
        "script" | "style" => {}
        "a" | "strong" | "b" | "em" | "i" | "code" | "img" | "span" => {
            render_inline(element, out);
        }
        _ => render_block_children(element, out),
    }
}

fn render_inline(element: ElementRef<'_>, out: &mut String) {
    let value = element.value();
    match value.name() {
        "a" => {
            let inner = inline_children(element);
            let inner = inner.trim();
            match value.attr("href").map(str::trim) {
                Some(href) if !href.is_empty() && !inner.is_empty() => {
                    out.push_str(&format!("[{inner}]({href})"));
                }
                _ => out.push_str(inner),
            }
        }
        "strong" | "b" => wrap_inline(element, "**", out),
        "em" | "i" => wrap_inline(element, "*", out),
        "code" => wrap_inline(element, "`", out),
        "img" => {
            if let Some(src) = value.attr("src").filter(|src| !src.is_empty()) {
                let alt = value.attr("alt").unwrap_or_default();
                out.push_str(&format!("![{alt}]({})", absolute_image_url(src)));
            }
        }
        "br" => out.push('\n'),
        "script" | "style" => {}
        _ => out.push_str(&inline_children(element)),
    }
}

fn inline_children(parent: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in parent.children() {
        if let Some(element) = ElementRef::wrap(child) {
            render_inline(element, &mut out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
    out
}

fn wrap_inline(element: ElementRef<'_>, marker: &str, out: &mut String) {
    let inner = inline_children(element);
    let inner = inner.trim();
    if !inner.is_empty() {
        out.push_str(&format!("{marker}{inner}{marker}"));
    }
}

/// Upgrades protocol-relative image URLs to https.
fn absolute_image_url(src: &str) -> String {
    if src.starts_with("//") {
        format!("https:{src}")
    } else {
        src.to_string()
    }
}

fn push_block(out: &mut String, text: &str) {
    out.push_str("\n\n");
    out.push_str(text);
    out.push_str("\n\n");
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trims line ends, collapses blank-line runs and trims the whole text.
fn tidy(text: &str) -> String {
    let trimmed_lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let joined = trimmed_lines.join("\n");
    BLANK_LINE_RUN
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}
