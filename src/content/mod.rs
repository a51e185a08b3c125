//! Article content handling: body extraction and Markdown conversion.

mod extract;
mod markdown;

pub use extract::{
    ARTICLE_BODY_SELECTOR, DomSelectorStrategy, EmbeddedJsonStrategy, ExtractionChain,
    ExtractionStrategy,
};
pub use markdown::{
    ContentConverter, ConversionError, MarkdownConverter, clean_comment_text, strip_tags,
};
