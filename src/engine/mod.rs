//! # Engine Context
//!
//! The capability object every formatting entry point receives. It owns
//! the handle tables for paragraph nodes, paragraph clients and page
//! contexts, the stack of nested format frames, the measured sizes of
//! embedded objects and the sticky illegal-mutation flag.
//!
//! Nothing here is global: a [`DocumentFormatter`](crate::document::DocumentFormatter)
//! owns exactly one context for its lifetime and threads it through every
//! call, together with a [`LayoutHost`] that borrows the content and the
//! text metrics for the duration of one pass.

pub mod handle;

use serde::Serialize;

use crate::client::ParagraphClient;
use crate::config::LayoutConfig;
use crate::content::TextContainer;
use crate::error::{LayoutError, Result};
use crate::geometry::DpiScale;
use crate::page::context::{FormatFrame, PageContext};
use crate::page::dirty::DirtyRangeList;
use crate::paragraph::{ParaId, ParagraphNode};
use crate::text::{LineBreakRecord, ObjectSizeCache, TextMetrics};

pub use handle::{Handle, HandleTable};

/// Outcome of a format call. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FormatStatus {
    /// All content fit.
    Complete,
    /// Some content fit; a break record says where to continue.
    Continued,
    /// Nothing fit. No height is used and no client is produced.
    NoProgress,
    /// A float could not be placed without overlapping another one.
    Collision,
    /// A stretch floater offered less than the full track width.
    Rejected,
    /// The host asked formatting to stop.
    Interrupted,
}

impl FormatStatus {
    pub fn made_progress(self) -> bool {
        matches!(self, FormatStatus::Complete | FormatStatus::Continued)
    }
}

/// Which of the three formatting entry points is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    Finite,
    Bottomless,
    /// Bottomless, reusing whatever the last pass produced for unchanged
    /// paragraphs.
    UpdateBottomless,
}

impl FormatMode {
    pub fn is_finite(self) -> bool {
        self == FormatMode::Finite
    }
}

/// Where finite formatting of a paragraph stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum BreakRecord {
    /// Resume with the line starting at the recorded position.
    Text { line: LineBreakRecord },
    /// Resume a segment at `child`; `inner` continues inside it, `None`
    /// restarts it.
    Segment {
        child: ParaId,
        inner: Option<Box<BreakRecord>>,
    },
    /// Resume a table at the given row.
    Table { row: usize },
    /// Resume a multi-column subpage.
    Columns { inner: Box<BreakRecord> },
}

impl BreakRecord {
    pub fn duplicate(&self) -> BreakRecord {
        self.clone()
    }
}

/// Counters accumulated across passes, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatStats {
    pub paragraphs_created: usize,
    pub paragraphs_formatted: usize,
    pub paragraphs_reused: usize,
    pub paragraphs_disposed: usize,
    pub lines_formatted: usize,
    pub lines_recreated: usize,
    pub update_records: usize,
    pub floats_placed: usize,
    pub floats_deferred: usize,
    pub auto_width_passes: usize,
}

/// Borrowed collaborators for one pass.
pub struct LayoutHost<'a> {
    pub content: &'a dyn TextContainer,
    pub metrics: &'a dyn TextMetrics,
    interrupt: Option<&'a dyn Fn() -> bool>,
}

impl<'a> LayoutHost<'a> {
    pub fn new(content: &'a dyn TextContainer, metrics: &'a dyn TextMetrics) -> Self {
        Self { content, metrics, interrupt: None }
    }

    /// Install a cooperative abort check, polled between paragraphs.
    pub fn with_interrupt(mut self, interrupt: &'a dyn Fn() -> bool) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.map(|f| f()).unwrap_or(false)
    }
}

pub struct EngineContext {
    pub paragraphs: HandleTable<ParagraphNode>,
    pub clients: HandleTable<ParagraphClient>,
    pub page_contexts: HandleTable<PageContext>,
    pub objects: ObjectSizeCache,
    pub stats: FormatStats,
    pub(crate) pass_dirty: DirtyRangeList,
    config: LayoutConfig,
    format_stack: Vec<FormatFrame>,
    invalid_operation: bool,
    pass_generation: Option<u64>,
}

impl EngineContext {
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            paragraphs: HandleTable::new(),
            clients: HandleTable::new(),
            page_contexts: HandleTable::new(),
            objects: ObjectSizeCache::new(),
            stats: FormatStats::default(),
            pass_dirty: DirtyRangeList::new(),
            config,
            format_stack: Vec::new(),
            invalid_operation: false,
            pass_generation: None,
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn dpi(&self) -> DpiScale {
        self.config.dpi()
    }

    // ── Format context stack ───────────────────────────────────────

    /// Run `f` with `frame` pushed. The frame is popped whatever `f`
    /// returns.
    pub fn with_format_context<R>(
        &mut self,
        frame: FormatFrame,
        f: impl FnOnce(&mut EngineContext) -> Result<R>,
    ) -> Result<R> {
        self.format_stack.push(frame);
        let depth = self.format_stack.len();
        let result = f(self);
        if self.format_stack.len() != depth {
            log::warn!("format context stack unbalanced: {} != {depth}", self.format_stack.len());
            self.invalid_operation = true;
            self.format_stack.truncate(depth);
        }
        self.format_stack.pop();
        result
    }

    pub fn current_frame(&self) -> Option<&FormatFrame> {
        self.format_stack.last()
    }

    pub fn format_depth(&self) -> usize {
        self.format_stack.len()
    }

    pub fn is_incremental(&self) -> bool {
        self.current_frame().map(|f| f.incremental_update).unwrap_or(false)
    }

    // ── Illegal mutation detection ─────────────────────────────────

    /// Start a pass over content at its current generation.
    pub fn begin_pass(&mut self, host: &LayoutHost) {
        self.pass_generation = Some(host.content.generation());
        self.invalid_operation = false;
    }

    /// Compare the content generation with the one the pass started at.
    /// A mismatch sets the sticky flag; formatting carries on to a clean
    /// unwind and the flag is reported by [`EngineContext::end_pass`].
    pub fn checkpoint(&mut self, host: &LayoutHost) -> bool {
        if let Some(generation) = self.pass_generation {
            if host.content.generation() != generation && !self.invalid_operation {
                log::warn!("content mutated during layout pass (generation {generation})");
                self.invalid_operation = true;
            }
        }
        self.invalid_operation
    }

    pub fn invalid_operation(&self) -> bool {
        self.invalid_operation
    }

    pub fn end_pass(&mut self) -> Result<()> {
        self.pass_generation = None;
        if std::mem::take(&mut self.invalid_operation) {
            return Err(LayoutError::IllegalMutation);
        }
        if !self.format_stack.is_empty() {
            return Err(LayoutError::invariant("format context left on the stack after a pass"));
        }
        Ok(())
    }

    // ── Handle resolution ──────────────────────────────────────────

    pub fn paragraph(&self, id: ParaId) -> Result<&ParagraphNode> {
        self.paragraphs.resolve(id, "paragraph")
    }

    pub fn paragraph_mut(&mut self, id: ParaId) -> Result<&mut ParagraphNode> {
        self.paragraphs.resolve_mut(id, "paragraph")
    }

    pub fn client(&self, id: crate::client::ClientId) -> Result<&ParagraphClient> {
        self.clients.resolve(id, "client")
    }

    pub fn client_mut(&mut self, id: crate::client::ClientId) -> Result<&mut ParagraphClient> {
        self.clients.resolve_mut(id, "client")
    }

    pub fn page_context(&self, id: crate::page::context::PageContextId) -> Result<&PageContext> {
        self.page_contexts.resolve(id, "page context")
    }

    pub fn page_context_mut(
        &mut self,
        id: crate::page::context::PageContextId,
    ) -> Result<&mut PageContext> {
        self.page_contexts.resolve_mut(id, "page context")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::FlowDocument;
    use crate::geometry::Thickness;
    use crate::text::MonospaceMetrics;
    use std::cell::Cell;

    fn frame() -> FormatFrame {
        FormatFrame {
            page_size: (1000, 1000),
            page_margin: Thickness::default(),
            incremental_update: true,
            finite_page: false,
        }
    }

    #[test]
    fn frames_pop_even_on_error() {
        let mut ctx = EngineContext::new(LayoutConfig::default());
        let result: Result<()> = ctx.with_format_context(frame(), |ctx| {
            assert_eq!(ctx.format_depth(), 1);
            assert!(ctx.is_incremental());
            ctx.with_format_context(frame(), |_| Err(LayoutError::EngineFailure("boom".into())))
        });
        assert!(result.is_err());
        assert_eq!(ctx.format_depth(), 0);
        assert!(!ctx.is_incremental());
    }

    #[test]
    fn interrupt_is_polled() {
        let doc = FlowDocument::default();
        let metrics = MonospaceMetrics::default();
        let calls = Cell::new(0);
        let stop = || {
            calls.set(calls.get() + 1);
            calls.get() > 1
        };
        let host = LayoutHost::new(&doc, &metrics).with_interrupt(&stop);
        assert!(!host.interrupted());
        assert!(host.interrupted());
    }

    #[test]
    fn clean_pass_ends_ok() {
        let doc = FlowDocument::default();
        let metrics = MonospaceMetrics::default();
        let host = LayoutHost::new(&doc, &metrics);
        let mut ctx = EngineContext::new(LayoutConfig::default());
        ctx.begin_pass(&host);
        assert!(!ctx.checkpoint(&host));
        assert!(ctx.end_pass().is_ok());
    }
}
