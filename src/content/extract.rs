//! Article body extraction from a full HTML page.
//!
//! The article page is sometimes server-rendered and sometimes a client-side
//! shell with the content embedded as JSON in a script tag. Each layout has
//! an [`ExtractionStrategy`]; an [`ExtractionChain`] tries them in order and
//! the first non-empty result wins.
//!
//! # Example
//!
//! ```
//! use articlesync_core::content::ExtractionChain;
//!
//! let page = r#"<html><body><div class="article__bd__detail"><p>Hi</p></div></body></html>"#;
//! let body = ExtractionChain::default().extract(page);
//! assert_eq!(body.as_deref(), Some("<p>Hi</p>"));
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, trace};

/// CSS selector for the server-rendered article body.
pub const ARTICLE_BODY_SELECTOR: &str = "div.article__bd__detail";

#[allow(clippy::expect_used)]
static ARTICLE_BODY: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(ARTICLE_BODY_SELECTOR).expect("article selector is valid") // Static pattern, safe to panic
});

/// Matches the status object the page script assigns on load.
#[allow(clippy::expect_used)]
static EMBEDDED_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)SNB\.data\.current_status\s*=\s*(\{.*?\})\s*;")
        .expect("embedded status regex is valid")
});

/// One way of finding the article body in a page.
pub trait ExtractionStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns the article body HTML, or `None` if this layout does not apply.
    fn extract(&self, page: &str) -> Option<String>;
}

/// Reads the body from the server-rendered article container.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomSelectorStrategy;

impl ExtractionStrategy for DomSelectorStrategy {
    fn name(&self) -> &'static str {
        "dom-selector"
    }

    fn extract(&self, page: &str) -> Option<String> {
        let document = Html::parse_document(page);
        let element = document.select(&ARTICLE_BODY).next()?;
        let inner = element.inner_html();
        let inner = inner.trim();
        (!inner.is_empty()).then(|| inner.to_string())
    }
}

/// Reads the body from the JSON object embedded in a page script.
///
/// Prefers the `text` field and falls back to `description`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedJsonStrategy;

impl ExtractionStrategy for EmbeddedJsonStrategy {
    fn name(&self) -> &'static str {
        "embedded-json"
    }

    fn extract(&self, page: &str) -> Option<String> {
        let raw = EMBEDDED_STATUS.captures(page)?.get(1)?.as_str();
        let status: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(error) => {
                trace!(error = %error, "embedded status is not valid JSON");
                return None;
            }
        };

        ["text", "description"]
            .iter()
            .filter_map(|field| status.get(*field).and_then(Value::as_str))
            .map(str::trim)
            .find(|body| !body.is_empty())
            .map(str::to_string)
    }
}

/// Ordered list of strategies; first non-empty result wins.
pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl fmt::Debug for ExtractionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("ExtractionChain")
            .field("strategies", &names)
            .finish()
    }
}

impl Default for ExtractionChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(DomSelectorStrategy),
            Box::new(EmbeddedJsonStrategy),
        ])
    }
}

impl ExtractionChain {
    /// Creates a chain trying `strategies` in order.
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Returns the first non-empty body any strategy finds.
    #[must_use]
    pub fn extract(&self, page: &str) -> Option<String> {
        for strategy in &self.strategies {
            if let Some(body) = strategy.extract(page) {
                debug!(strategy = strategy.name(), bytes = body.len(), "article body extracted");
                return Some(body);
            }
            trace!(strategy = strategy.name(), "strategy found nothing");
        }
        None
    }
}
