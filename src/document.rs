//! # Document Formatter
//!
//! Entry point for a whole document. A [`DocumentFormatter`] owns the
//! engine context, the root paragraph and the pages formatted from it,
//! in one of two paginations:
//!
//! - **Finite**: fixed-size pages, formatted in order and cached with the
//!   break record each one started from. A change drops the cached pages
//!   from the one holding it onwards; earlier pages are kept.
//! - **Bottomless**: one page as tall as the content, updated
//!   incrementally from the dirty ranges collected since the last pass.
//!
//! Every pass runs under a re-entrancy guard and is bracketed by the
//! engine's illegal-mutation checks. A mutation detected mid-pass fails a
//! finite page format; a bottomless page recovers by rebuilding on the
//! next pass.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::LayoutConfig;
use crate::content::{ElementId, TextContainer};
use crate::engine::{EngineContext, FormatStats, FormatStatus, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::{LayoutPoint, LayoutRect, LayoutUnit, Thickness};
use crate::page::dirty::{DirtyRangeList, DirtyTextRange};
use crate::page::{FlowPage, PageBreakRecord, PageFormatResult, PageResult, PageState, PageVisual};
use crate::paragraph::{self, ChangeKind, ParaId};
use crate::text::TextMetrics;

// ── Re-entrancy ────────────────────────────────────────────────────

/// Marks a document as having a pass in progress. Formatters of the same
/// document share one guard.
#[derive(Debug, Clone, Default)]
pub struct ReentrancyGuard {
    active: Rc<Cell<bool>>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Start a pass. Fails if one is already running.
    pub fn enter(&self) -> Result<ActivePass> {
        if self.active.replace(true) {
            return Err(LayoutError::Reentrant);
        }
        Ok(ActivePass { active: Rc::clone(&self.active) })
    }
}

/// A running pass; ends when dropped.
#[derive(Debug)]
pub struct ActivePass {
    active: Rc<Cell<bool>>,
}

impl Drop for ActivePass {
    fn drop(&mut self) {
        self.active.set(false);
    }
}

// ── Pages ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageSlot {
    Bottomless,
    Finite(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pagination {
    Finite {
        size: (LayoutUnit, LayoutUnit),
        margin: Thickness,
    },
    Bottomless,
}

#[derive(Debug)]
struct CachedPage {
    start: Option<PageBreakRecord>,
    page: FlowPage,
    result: PageFormatResult,
    /// Positions the page covered when it was formatted.
    range: Option<(usize, usize)>,
}

/// Outcome of one slice of background formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundProgress {
    pub pages_formatted: usize,
    /// Every page of the document is formatted.
    pub complete: bool,
    /// Called again before the throttle interval elapsed; nothing was done.
    pub throttled: bool,
}

pub struct DocumentFormatter {
    ctx: EngineContext,
    guard: ReentrancyGuard,
    root: Option<ParaId>,
    pagination: Option<Pagination>,
    pages: Vec<CachedPage>,
    bottomless: Option<FlowPage>,
    bottomless_width: Option<LayoutUnit>,
    pending: DirtyRangeList,
    force_full: bool,
    last_background: Option<Instant>,
}

impl DocumentFormatter {
    pub fn new(config: LayoutConfig) -> Self {
        Self::with_guard(config, ReentrancyGuard::new())
    }

    /// A formatter that shares `guard` with others formatting the same
    /// document.
    pub fn with_guard(config: LayoutConfig, guard: ReentrancyGuard) -> Self {
        Self {
            ctx: EngineContext::new(config),
            guard,
            root: None,
            pagination: None,
            pages: Vec::new(),
            bottomless: None,
            bottomless_width: None,
            pending: DirtyRangeList::new(),
            force_full: false,
            last_background: None,
        }
    }

    pub fn guard(&self) -> ReentrancyGuard {
        self.guard.clone()
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn stats(&self) -> FormatStats {
        self.ctx.stats
    }

    pub fn formatted_page_count(&self) -> usize {
        self.pages.len()
    }

    /// Whether the last cached finite page ends the document.
    pub fn is_paginated(&self) -> bool {
        self.pages.last().is_some_and(|p| p.result.break_record.is_none())
    }

    pub fn page(&self, slot: PageSlot) -> Option<&FlowPage> {
        match slot {
            PageSlot::Bottomless => self.bottomless.as_ref(),
            PageSlot::Finite(i) => self.pages.get(i).map(|p| &p.page),
        }
    }

    fn page_mut(&mut self, slot: PageSlot) -> Result<&mut FlowPage> {
        let page = match slot {
            PageSlot::Bottomless => self.bottomless.as_mut(),
            PageSlot::Finite(i) => self.pages.get_mut(i).map(|p| &mut p.page),
        };
        page.ok_or_else(|| LayoutError::invariant(format!("no formatted page in {slot:?}")))
    }

    // ── Dirty ranges ───────────────────────────────────────────────

    /// Record a content change for the next pass.
    pub fn add_dirty_range(&mut self, range: DirtyTextRange) {
        self.pending.add(range);
    }

    pub fn add_dirty_ranges(&mut self, ranges: impl IntoIterator<Item = DirtyTextRange>) {
        for r in ranges {
            self.pending.add(r);
        }
    }

    pub fn dirty_ranges(&self) -> &[DirtyTextRange] {
        self.pending.ranges()
    }

    // ── Passes ─────────────────────────────────────────────────────

    /// Run `f` as one pass over `host`'s content. An error from `f` wins
    /// over the illegal-mutation report of the pass.
    fn run_pass<R>(
        &mut self,
        host: &LayoutHost,
        f: impl FnOnce(&mut Self, &LayoutHost) -> Result<R>,
    ) -> Result<R> {
        self.ctx.begin_pass(host);
        let result = f(self, host);
        let ended = self.ctx.end_pass();
        let r = result?;
        ended?;
        Ok(r)
    }

    fn ensure_root(&mut self, host: &LayoutHost) -> Result<ParaId> {
        match self.root {
            Some(root) if self.ctx.paragraphs.contains(root) => Ok(root),
            _ => {
                let root = paragraph::create_root(&mut self.ctx, host)?;
                log::debug!("created root paragraph {root:?}");
                self.root = Some(root);
                Ok(root)
            }
        }
    }

    /// Switch pagination, dropping everything formatted under another one.
    fn select(&mut self, pagination: Pagination) -> Result<()> {
        match (self.pagination, pagination) {
            (Some(current), wanted) if current == wanted => return Ok(()),
            (Some(Pagination::Finite { .. }), Pagination::Finite { .. }) => {
                log::debug!("page size changed; dropping {} cached page(s)", self.pages.len());
                self.drop_pages_from(0)?;
            }
            (None, _) => {}
            _ => {
                log::debug!("pagination changed to {pagination:?}");
                self.reset()?;
            }
        }
        self.pagination = Some(pagination);
        Ok(())
    }

    fn drop_pages_from(&mut self, index: usize) -> Result<()> {
        if index >= self.pages.len() {
            return Ok(());
        }
        for mut cached in self.pages.drain(index..) {
            cached.page.dispose(&mut self.ctx)?;
        }
        Ok(())
    }

    /// Dispose every page and the root paragraph.
    fn reset(&mut self) -> Result<()> {
        self.drop_pages_from(0)?;
        if let Some(mut page) = self.bottomless.take() {
            page.dispose(&mut self.ctx)?;
        }
        if let Some(root) = self.root.take() {
            paragraph::dispose(&mut self.ctx, root)?;
        }
        self.bottomless_width = None;
        Ok(())
    }

    /// Release everything this formatter holds.
    pub fn close(&mut self) -> Result<()> {
        let _pass = self.guard.enter()?;
        self.reset()?;
        self.pagination = None;
        self.pending.clear();
        Ok(())
    }

    /// Drop cached structure from the first pending change onwards.
    /// Returns whether the root itself was invalidated.
    fn invalidate_from_pending(&mut self) -> Result<bool> {
        let Some(first) = self.pending.ranges().first() else {
            return Ok(false);
        };
        let from = first.start.max(0) as usize;
        let Some(root) = self.root else {
            return Ok(false);
        };
        if !self.ctx.paragraphs.contains(root) {
            return Ok(true);
        }
        if paragraph::invalidate_structure(&mut self.ctx, root, from)? {
            log::debug!("change at {from} invalidates the root");
            paragraph::dispose(&mut self.ctx, root)?;
            self.root = None;
            return Ok(true);
        }
        Ok(false)
    }

    // ── Bottomless ─────────────────────────────────────────────────

    /// Format the document as one page of unbounded height and return its
    /// natural size.
    pub fn format_bottomless(
        &mut self,
        content: &dyn TextContainer,
        metrics: &dyn TextMetrics,
        size: (LayoutUnit, LayoutUnit),
        margin: Thickness,
    ) -> Result<PageFormatResult> {
        let _pass = self.guard.enter()?;
        self.select(Pagination::Bottomless)?;
        let host = LayoutHost::new(content, metrics);

        let unchanged = self.pending.is_empty() && !self.force_full && self.bottomless_width == Some(size.0);
        if let (true, Some(page)) = (unchanged, self.bottomless.as_ref()) {
            if page.state() != PageState::Unformatted {
                log::trace!("bottomless page is up to date");
                return Ok(PageFormatResult {
                    status: FormatStatus::Complete,
                    break_record: None,
                    size: page.size(),
                });
            }
        }

        let result = self.run_pass(&host, |this, host| this.bottomless_pass(host, size, margin));
        self.pending.clear();
        self.ctx.pass_dirty.clear();
        match result {
            Err(LayoutError::IllegalMutation) => {
                log::warn!("bottomless pass hit a content mutation; next pass rebuilds");
                self.force_full = true;
                Err(LayoutError::IllegalMutation)
            }
            other => other,
        }
    }

    fn bottomless_pass(&mut self, host: &LayoutHost, size: (LayoutUnit, LayoutUnit), margin: Thickness) -> Result<PageFormatResult> {
        if self.force_full {
            if let Some(mut page) = self.bottomless.take() {
                page.dispose(&mut self.ctx)?;
            }
            if let Some(root) = self.root.take() {
                paragraph::dispose(&mut self.ctx, root)?;
            }
            self.bottomless_width = None;
            self.force_full = false;
        }
        let incremental = self.bottomless_width == Some(size.0) && self.root.is_some();
        if !self.pending.is_empty() {
            if incremental {
                self.ctx.pass_dirty = self.pending.clone();
                if let Some(root) = self.root {
                    self.ctx.paragraph_mut(root)?.change = ChangeKind::Inside;
                }
            } else {
                self.invalidate_from_pending()?;
            }
        }

        let root = self.ensure_root(host)?;
        let reusable = self
            .bottomless
            .as_ref()
            .is_some_and(|p| p.state() != PageState::Disposed && p.root() == root);
        if !reusable {
            if let Some(mut stale) = self.bottomless.take() {
                stale.dispose(&mut self.ctx)?;
            }
        }
        let page = self.bottomless.get_or_insert_with(|| FlowPage::new(root));
        let result = page.format_bottomless(&mut self.ctx, host, size, margin, incremental)?;
        if result.status == FormatStatus::Complete {
            self.bottomless_width = Some(size.0);
        }
        Ok(result)
    }

    // ── Finite ─────────────────────────────────────────────────────

    /// Format finite pages up to and including `index`. `None` when the
    /// document ends before that page.
    pub fn format_page(
        &mut self,
        content: &dyn TextContainer,
        metrics: &dyn TextMetrics,
        size: (LayoutUnit, LayoutUnit),
        margin: Thickness,
        index: usize,
    ) -> Result<Option<PageFormatResult>> {
        let _pass = self.guard.enter()?;
        self.select(Pagination::Finite { size, margin })?;
        let host = LayoutHost::new(content, metrics);
        self.finite_pass(&host, |this, host| this.page_at(host, size, margin, index))
    }

    /// Format as many further pages as fit in the background budget.
    pub fn format_background(
        &mut self,
        content: &dyn TextContainer,
        metrics: &dyn TextMetrics,
        size: (LayoutUnit, LayoutUnit),
        margin: Thickness,
    ) -> Result<BackgroundProgress> {
        let _pass = self.guard.enter()?;
        let now = Instant::now();
        let throttle = Duration::from_millis(self.ctx.config().background_throttle_ms);
        if let Some(last) = self.last_background {
            if now.duration_since(last) < throttle {
                return Ok(BackgroundProgress { throttled: true, ..Default::default() });
            }
        }
        self.last_background = Some(now);
        self.select(Pagination::Finite { size, margin })?;

        let deadline = now + Duration::from_millis(self.ctx.config().background_budget_ms);
        let over = move || Instant::now() >= deadline;
        let host = LayoutHost::new(content, metrics).with_interrupt(&over);
        self.finite_pass(&host, |this, host| {
            let mut progress = BackgroundProgress::default();
            while !this.is_paginated() && !host.interrupted() {
                match this.format_next(host, size, margin)? {
                    Some(r) if r.status == FormatStatus::Interrupted => break,
                    Some(_) => progress.pages_formatted += 1,
                    None => break,
                }
            }
            progress.complete = this.is_paginated();
            log::debug!("background slice formatted {} page(s)", progress.pages_formatted);
            Ok(progress)
        })
    }

    /// Run a finite pass, restarting pagination once when a cached break
    /// record turns out to reference disposed paragraphs.
    fn finite_pass<R>(
        &mut self,
        host: &LayoutHost,
        mut f: impl FnMut(&mut Self, &LayoutHost) -> Result<R>,
    ) -> Result<R> {
        let mut restarted = false;
        loop {
            let result = self.run_pass(host, |this, host| {
                this.apply_pending_finite(host)?;
                f(this, host)
            });
            match result {
                Err(LayoutError::StaleHandle { kind }) if !restarted => {
                    log::debug!("stale {kind} handle in cached pages; repaginating");
                    restarted = true;
                    self.drop_pages_from(0)?;
                }
                Err(LayoutError::IllegalMutation) => {
                    log::warn!("finite page format hit a content mutation");
                    if let Some(last) = self.pages.len().checked_sub(1) {
                        self.drop_pages_from(last)?;
                    }
                    return Err(LayoutError::IllegalMutation);
                }
                other => return other,
            }
        }
    }

    fn apply_pending_finite(&mut self, host: &LayoutHost) -> Result<()> {
        let Some(first) = self.pending.ranges().first() else {
            return Ok(());
        };
        let from = first.start.max(0) as usize;
        let mut keep = self
            .pages
            .iter()
            .position(|p| p.range.map(|(_, end)| end >= from).unwrap_or(true))
            .unwrap_or(self.pages.len());
        // A paragraph split onto the changed page can pull lines back onto
        // the page before it.
        let split = keep
            .checked_sub(1)
            .and_then(|k| self.pages[k].result.break_record.as_ref())
            .map(PageBreakRecord::splits_paragraph)
            .unwrap_or(false);
        if split {
            keep -= 1;
        }
        log::debug!("change at {from}: keeping {keep} of {} page(s)", self.pages.len());
        self.drop_pages_from(keep)?;
        if self.invalidate_from_pending()? {
            self.drop_pages_from(0)?;
        }
        self.pending.clear();
        self.ensure_root(host)?;
        Ok(())
    }

    fn page_at(
        &mut self,
        host: &LayoutHost,
        size: (LayoutUnit, LayoutUnit),
        margin: Thickness,
        index: usize,
    ) -> Result<Option<PageFormatResult>> {
        while self.pages.len() <= index {
            match self.format_next(host, size, margin)? {
                Some(r) if r.status == FormatStatus::Interrupted => return Ok(Some(r)),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        if self.pages[index].page.state() == PageState::Unformatted {
            self.reformat(host, size, margin, index)?;
        }
        self.evict(index)?;
        Ok(Some(self.pages[index].result.clone()))
    }

    /// Format the page after the last cached one.
    fn format_next(
        &mut self,
        host: &LayoutHost,
        size: (LayoutUnit, LayoutUnit),
        margin: Thickness,
    ) -> Result<Option<PageFormatResult>> {
        let start = match self.pages.last() {
            None => None,
            Some(p) => match &p.result.break_record {
                Some(record) => Some(record.clone()),
                None => return Ok(None),
            },
        };
        let root = self.ensure_root(host)?;
        let mut page = FlowPage::new(root);
        let result = page.format_finite(&mut self.ctx, host, size, margin, start.as_ref())?;
        if result.status == FormatStatus::Interrupted {
            page.dispose(&mut self.ctx)?;
            return Ok(Some(result));
        }
        let range = page.content_range(&self.ctx, host)?;
        log::debug!("page {} covers {range:?}", self.pages.len());
        self.pages.push(CachedPage { start, page, result: result.clone(), range });
        Ok(Some(result))
    }

    /// Format an evicted page again from its cached start.
    fn reformat(&mut self, host: &LayoutHost, size: (LayoutUnit, LayoutUnit), margin: Thickness, index: usize) -> Result<()> {
        let cached = &mut self.pages[index];
        let result = cached.page.format_finite(&mut self.ctx, host, size, margin, cached.start.as_ref())?;
        if result.break_record != cached.result.break_record {
            log::debug!("page {index} broke differently; dropping the pages after it");
            cached.result = result;
            cached.range = cached.page.content_range(&self.ctx, host)?;
            self.drop_pages_from(index + 1)?;
        } else {
            cached.result = result;
        }
        Ok(())
    }

    /// Release the clients of the pages furthest from `index` beyond the
    /// cache limit. Their break records stay.
    fn evict(&mut self, index: usize) -> Result<()> {
        let limit = self.ctx.config().page_cache_limit.max(1);
        let mut live: Vec<usize> = (0..self.pages.len())
            .filter(|&i| self.pages[i].page.state() != PageState::Unformatted)
            .collect();
        if live.len() <= limit {
            return Ok(());
        }
        live.sort_by_key(|&i| std::cmp::Reverse(i.abs_diff(index)));
        for i in live.into_iter().filter(|&i| i != index) {
            let formatted = self
                .pages
                .iter()
                .filter(|p| p.page.state() != PageState::Unformatted)
                .count();
            if formatted <= limit {
                break;
            }
            log::trace!("releasing page {i}");
            self.pages[i].page.release(&mut self.ctx)?;
        }
        Ok(())
    }

    // ── Arrange, visuals and queries ───────────────────────────────

    pub fn arrange(&mut self, slot: PageSlot) -> Result<()> {
        let _pass = self.guard.enter()?;
        let page = match slot {
            PageSlot::Bottomless => self.bottomless.as_mut(),
            PageSlot::Finite(i) => self.pages.get_mut(i).map(|p| &mut p.page),
        };
        let page = page.ok_or_else(|| LayoutError::invariant(format!("no formatted page in {slot:?}")))?;
        page.arrange(&mut self.ctx)
    }

    pub fn update_viewport(&mut self, slot: PageSlot, viewport: Option<LayoutRect>) -> Result<()> {
        self.page_mut(slot)?.update_viewport(viewport);
        Ok(())
    }

    pub fn validate_visual(&mut self, slot: PageSlot) -> Result<PageVisual> {
        let _pass = self.guard.enter()?;
        let page = match slot {
            PageSlot::Bottomless => self.bottomless.as_mut(),
            PageSlot::Finite(i) => self.pages.get_mut(i).map(|p| &mut p.page),
        };
        let page = page.ok_or_else(|| LayoutError::invariant(format!("no formatted page in {slot:?}")))?;
        page.validate_visual(&self.ctx).cloned()
    }

    pub fn input_hit_test(&self, slot: PageSlot, point: LayoutPoint) -> Result<Option<ElementId>> {
        self.require(slot)?.input_hit_test(&self.ctx, point)
    }

    pub fn text_position_from_point(&self, slot: PageSlot, point: LayoutPoint) -> Result<Option<usize>> {
        self.require(slot)?.text_position_from_point(&self.ctx, point)
    }

    pub fn page_results(
        &self,
        content: &dyn TextContainer,
        metrics: &dyn TextMetrics,
        slot: PageSlot,
    ) -> Result<PageResult> {
        let host = LayoutHost::new(content, metrics);
        self.require(slot)?.results(&self.ctx, &host)
    }

    fn require(&self, slot: PageSlot) -> Result<&FlowPage> {
        self.page(slot)
            .ok_or_else(|| LayoutError::invariant(format!("no formatted page in {slot:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{DocNode, ElementKind, FlowDocument, LogicalDirection, PointerContext};
    use crate::engine::FormatMode;
    use crate::style::Style;
    use crate::text::MonospaceMetrics;

    const CH: LayoutUnit = 2880;
    const LINE: LayoutUnit = 6000;

    fn doc(n: usize) -> FlowDocument {
        FlowDocument::from_nodes(
            Style::default(),
            (0..n).map(|i| DocNode::paragraph(format!("p{i}"))).collect(),
        )
    }

    #[test]
    fn second_pass_on_the_same_guard_is_rejected() {
        let d = doc(2);
        let metrics = MonospaceMetrics::default();
        let mut a = DocumentFormatter::new(LayoutConfig::default());
        let mut b = DocumentFormatter::with_guard(LayoutConfig::default(), a.guard());

        let running = a.guard().enter().unwrap();
        let err = b.format_bottomless(&d, &metrics, (20 * CH, 0), Thickness::default());
        assert!(matches!(err, Err(LayoutError::Reentrant)));
        drop(running);

        b.format_bottomless(&d, &metrics, (20 * CH, 0), Thickness::default()).unwrap();
        assert!(!a.guard().is_active());
        a.format_bottomless(&d, &metrics, (20 * CH, 0), Thickness::default()).unwrap();
    }

    #[test]
    fn edit_inside_one_paragraph_reuses_the_others() {
        let mut d = doc(4);
        let metrics = MonospaceMetrics::default();
        let mut f = DocumentFormatter::new(LayoutConfig::default());
        f.format_bottomless(&d, &metrics, (20 * CH, 0), Thickness::default()).unwrap();
        f.arrange(PageSlot::Bottomless).unwrap();
        f.validate_visual(PageSlot::Bottomless).unwrap();

        let p1 = d.elements_of_kind(ElementKind::Paragraph)[1];
        let (start, _) = d.element_span(p1).unwrap();
        d.insert_text(start + 2, "x").unwrap();
        f.add_dirty_ranges(d.take_changes());
        assert_eq!(f.dirty_ranges().len(), 1);

        let r = f.format_bottomless(&d, &metrics, (20 * CH, 0), Thickness::default()).unwrap();
        assert_eq!(r.size, (20 * CH, 4 * LINE));
        assert_eq!(f.page(PageSlot::Bottomless).unwrap().last_mode(), Some(FormatMode::UpdateBottomless));
        assert_eq!(f.stats().update_records, 1);
        assert!(f.dirty_ranges().is_empty());

        f.arrange(PageSlot::Bottomless).unwrap();
        f.validate_visual(PageSlot::Bottomless).unwrap();
        let stats = f.page(PageSlot::Bottomless).unwrap().visual_stats();
        assert_eq!(stats.reused, 3);
        assert_eq!(stats.created, 1);
    }

    #[test]
    fn finite_edit_keeps_earlier_pages() {
        let mut d = doc(5);
        let metrics = MonospaceMetrics::default();
        let mut f = DocumentFormatter::new(LayoutConfig::default());
        let size = (20 * CH, 2 * LINE);
        assert!(f.format_page(&d, &metrics, size, Thickness::default(), 2).unwrap().is_some());
        assert!(f.format_page(&d, &metrics, size, Thickness::default(), 3).unwrap().is_none());
        assert_eq!(f.formatted_page_count(), 3);
        assert!(f.is_paginated());
        let first = f.page(PageSlot::Finite(0)).unwrap().clients();

        let p4 = d.elements_of_kind(ElementKind::Paragraph)[4];
        let (start, _) = d.element_span(p4).unwrap();
        d.insert_text(start + 2, "x").unwrap();
        f.add_dirty_ranges(d.take_changes());

        let last = f.format_page(&d, &metrics, size, Thickness::default(), 2).unwrap().unwrap();
        assert_eq!(last.status, FormatStatus::Complete);
        assert_eq!(f.page(PageSlot::Finite(0)).unwrap().clients(), first);
        assert_eq!(f.formatted_page_count(), 3);
    }

    #[test]
    fn background_formatting_paginates_and_throttles() {
        let d = doc(6);
        let metrics = MonospaceMetrics::default();
        let config = LayoutConfig { background_throttle_ms: 60_000, background_budget_ms: 60_000, ..Default::default() };
        let mut f = DocumentFormatter::new(config);
        let size = (20 * CH, 2 * LINE);
        let progress = f.format_background(&d, &metrics, size, Thickness::default()).unwrap();
        assert_eq!(progress.pages_formatted, 3);
        assert!(progress.complete);
        let again = f.format_background(&d, &metrics, size, Thickness::default()).unwrap();
        assert!(again.throttled);
    }

    /// Content whose generation moves on every query, as if edited
    /// during the pass.
    struct Unstable<'a> {
        doc: &'a FlowDocument,
        ticks: Cell<u64>,
    }

    impl TextContainer for Unstable<'_> {
        fn symbol_count(&self) -> usize {
            self.doc.symbol_count()
        }
        fn pointer_context(&self, position: usize, direction: LogicalDirection) -> PointerContext {
            self.doc.pointer_context(position, direction)
        }
        fn adjacent_element(&self, position: usize, direction: LogicalDirection) -> Option<ElementId> {
            self.doc.adjacent_element(position, direction)
        }
        fn text_run(&self, position: usize) -> String {
            self.doc.text_run(position)
        }
        fn element_kind(&self, element: ElementId) -> Option<ElementKind> {
            self.doc.element_kind(element)
        }
        fn element_span(&self, element: ElementId) -> Option<(usize, usize)> {
            self.doc.element_span(element)
        }
        fn parent_element(&self, element: ElementId) -> Option<ElementId> {
            self.doc.parent_element(element)
        }
        fn root_element(&self) -> ElementId {
            self.doc.root_element()
        }
        fn style(&self, element: ElementId) -> Option<&Style> {
            self.doc.style(element)
        }
        fn generation(&self) -> u64 {
            self.ticks.set(self.ticks.get() + 1);
            self.ticks.get()
        }
        fn object_size(&self, element: ElementId) -> Option<(f64, f64)> {
            self.doc.object_size(element)
        }
    }

    #[test]
    fn mutation_during_a_bottomless_pass_forces_a_rebuild() {
        let d = doc(3);
        let metrics = MonospaceMetrics::default();
        let mut f = DocumentFormatter::new(LayoutConfig::default());
        f.format_bottomless(&d, &metrics, (20 * CH, 0), Thickness::default()).unwrap();

        let unstable = Unstable { doc: &d, ticks: Cell::new(0) };
        f.add_dirty_range(DirtyTextRange::new(2, 0, 0));
        let err = f.format_bottomless(&unstable, &metrics, (20 * CH, 0), Thickness::default());
        assert!(matches!(err, Err(LayoutError::IllegalMutation)));
        assert!(!f.guard().is_active());

        let r = f.format_bottomless(&d, &metrics, (20 * CH, 0), Thickness::default()).unwrap();
        assert_eq!(r.size.1, 3 * LINE);
        assert_eq!(f.page(PageSlot::Bottomless).unwrap().last_mode(), Some(FormatMode::Bottomless));
    }
}
