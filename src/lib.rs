//! # Galley
//!
//! A paragraph-pulling text layout engine.
//!
//! Content is not broken into paragraphs up front. Each container pulls
//! its next paragraph from the content as formatting reaches it, keeps the
//! chain it built, and on the next pass patches only the part a change
//! touched. The same chain feeds two paginations: finite pages that break
//! and continue, and a single bottomless page (a galley) that grows with
//! its content and reflows incrementally.
//!
//! ## Architecture
//!
//! ```text
//! Content (JSON/API)
//!       ↓
//!   [content]    — Symbol stream, element tree, dirty ranges
//!       ↓
//!   [paragraph]  — Pull protocol, update records, paragraph kinds, floats
//!       ↓
//!   [text]       — Line composer: breaking, bidi, alignment, trimming
//!       ↓
//!   [client]     — Formatted instances, arrange, hit testing, visuals
//!       ↓
//!   [page]       — Finite and bottomless pages, columns
//!       ↓
//!   [document]   — Pagination cache, incremental passes, pass guard
//! ```

pub mod client;
pub mod config;
pub mod content;
pub mod document;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod page;
pub mod paragraph;
pub mod style;
pub mod text;

pub use config::LayoutConfig;
pub use content::{DocNode, ElementId, ElementKind, FlowDocument, TextContainer};
pub use document::{DocumentFormatter, PageSlot};
pub use error::{LayoutError, Result};
pub use geometry::{LayoutPoint, LayoutRect, LayoutUnit, Thickness};
pub use page::PageResult;

/// Paginate a document into finite pages and report every page.
///
/// `size` and `margin` are in layout units. Pages are arranged before they
/// are reported.
pub fn paginate(
    document: &FlowDocument,
    config: LayoutConfig,
    size: (LayoutUnit, LayoutUnit),
    margin: Thickness,
) -> Result<Vec<PageResult>> {
    let metrics = config.text_metrics();
    let mut formatter = DocumentFormatter::new(config);
    let mut pages = Vec::new();
    let mut index = 0;
    while formatter
        .format_page(document, metrics.as_ref(), size, margin, index)?
        .is_some()
    {
        formatter.arrange(PageSlot::Finite(index))?;
        pages.push(formatter.page_results(document, metrics.as_ref(), PageSlot::Finite(index))?);
        index += 1;
    }
    formatter.close()?;
    Ok(pages)
}

/// Paginate a document described as JSON.
pub fn paginate_json(
    json: &str,
    config: LayoutConfig,
    size: (LayoutUnit, LayoutUnit),
    margin: Thickness,
) -> Result<Vec<PageResult>> {
    let document = FlowDocument::from_json(json)?;
    paginate(&document, config, size, margin)
}
