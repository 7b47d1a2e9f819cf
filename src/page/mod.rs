//! # Pages
//!
//! A [`FlowPage`] is one page of the document's root flow. Finite pages
//! have a fixed height, fill their columns in order and hand a
//! [`PageBreakRecord`] to the next page. A bottomless page is as tall as
//! its content, uses a single column and is updated incrementally between
//! passes.
//!
//! Each page owns a page context (floats, exclusions, deferred floats) and
//! the clients its format call produced. Disposing the page releases both.

pub mod context;
pub mod dirty;

use serde::Serialize;

use crate::client::visual::{validate_visual, Visual, VisualCache, VisualStats};
use crate::client::{self, ArrangeFrame, ClientId, ParagraphResult, TrackLayout, UpdateKind};
use crate::config::LayoutConfig;
use crate::content::ElementId;
use crate::engine::{BreakRecord, EngineContext, FormatMode, FormatStatus, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::{FlowDirection, FlowTransform, LayoutPoint, LayoutRect, LayoutUnit, Thickness, MAX_LAYOUT_SIZE, MIN_WIDTH};
use crate::paragraph::block::{format_tracks, TracksOutput};
use crate::paragraph::container::union;
use crate::paragraph::{self, floating, update, ChangeKind, ParaId, TrackScope};
use crate::style::Color;
use context::{ColumnMetrics, FormatFrame, PageContext, PageContextId, PageGeometry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageState {
    Unformatted,
    Formatted,
    /// Arranged since the visual was last validated.
    VisualStale,
    Disposed,
}

/// Where the root flow stands at a page boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowPosition {
    At(BreakRecord),
    /// The flow is done; only deferred floats remain.
    Finished,
}

/// Continuation handed from a finite page to the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBreakRecord {
    pub flow: FlowPosition,
    /// Floats that did not fit and go to the top of the next page.
    pub deferred: Vec<ParaId>,
}

impl PageBreakRecord {
    /// Whether the next page resumes inside a paragraph rather than at a
    /// paragraph boundary.
    pub fn splits_paragraph(&self) -> bool {
        fn inside(record: &BreakRecord) -> bool {
            match record {
                BreakRecord::Segment { inner: Some(inner), .. } => inside(inner),
                BreakRecord::Segment { inner: None, .. } => false,
                _ => true,
            }
        }
        match &self.flow {
            FlowPosition::At(record) => inside(record),
            FlowPosition::Finished => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageFormatResult {
    pub status: FormatStatus,
    pub break_record: Option<PageBreakRecord>,
    /// Page size as formatted: clamped for finite pages, the natural size
    /// of the content for bottomless ones.
    pub size: (LayoutUnit, LayoutUnit),
}

/// Render-ready page: column rules plus the visuals of the page's clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisual {
    pub size: (LayoutUnit, LayoutUnit),
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<LayoutRect>,
    pub rule_color: Color,
    pub children: Vec<Visual>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnResult {
    pub rect: LayoutRect,
    pub paragraphs: Vec<ParagraphResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub size: (LayoutUnit, LayoutUnit),
    pub margin: Thickness,
    pub columns: Vec<ColumnResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub floats: Vec<ParagraphResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_range: Option<(usize, usize)>,
}

#[derive(Debug)]
pub struct FlowPage {
    root: ParaId,
    state: PageState,
    size: (LayoutUnit, LayoutUnit),
    /// Physical margins, after column adjustment.
    margin: Thickness,
    direction: FlowDirection,
    geometry: Option<PageGeometry>,
    page_context: Option<PageContextId>,
    tracks: Vec<TrackLayout>,
    floats: Vec<ClientId>,
    last_mode: Option<FormatMode>,
    formatted_width: Option<LayoutUnit>,
    transform: Option<FlowTransform>,
    viewport: Option<LayoutRect>,
    rebuild_visual: bool,
    visual: Option<PageVisual>,
    visual_stats: VisualStats,
}

impl FlowPage {
    pub fn new(root: ParaId) -> Self {
        Self {
            root,
            state: PageState::Unformatted,
            size: (0, 0),
            margin: Thickness::default(),
            direction: FlowDirection::LeftToRight,
            geometry: None,
            page_context: None,
            tracks: Vec::new(),
            floats: Vec::new(),
            last_mode: None,
            formatted_width: None,
            transform: None,
            viewport: None,
            rebuild_visual: false,
            visual: None,
            visual_stats: VisualStats::default(),
        }
    }

    pub fn root(&self) -> ParaId {
        self.root
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn size(&self) -> (LayoutUnit, LayoutUnit) {
        self.size
    }

    pub fn margin(&self) -> Thickness {
        self.margin
    }

    pub fn geometry(&self) -> Option<&PageGeometry> {
        self.geometry.as_ref()
    }

    pub fn last_mode(&self) -> Option<FormatMode> {
        self.last_mode
    }

    pub fn visual_stats(&self) -> VisualStats {
        self.visual_stats
    }

    pub fn tracks(&self) -> &[TrackLayout] {
        &self.tracks
    }

    /// Top-level clients: the flow of every column, then the floats placed
    /// at column tops.
    pub fn clients(&self) -> Vec<ClientId> {
        self.tracks
            .iter()
            .flat_map(|t| t.clients.iter().copied())
            .chain(self.floats.iter().copied())
            .collect()
    }

    // ── Formatting ─────────────────────────────────────────────────

    /// Format a page of fixed size, starting at `start` (the previous
    /// page's break record, `None` for the first page).
    pub fn format_finite(
        &mut self,
        ctx: &mut EngineContext,
        host: &LayoutHost,
        size: (LayoutUnit, LayoutUnit),
        margin: Thickness,
        start: Option<&PageBreakRecord>,
    ) -> Result<PageFormatResult> {
        self.check_alive()?;
        self.release(ctx)?;
        let (size, margin) = clamp_page(ctx.config(), size, margin);
        let style = host.content.resolved_style(host.content.root_element());
        let direction = style.flow_direction;

        let mut logical = margin;
        if direction.is_rtl() {
            logical.mirror();
        }
        let page = LayoutRect::new(0, 0, size.0, size.1);
        let content_width = (size.0 - logical.horizontal()).max(MIN_WIDTH);
        let columns = ColumnMetrics::compute(content_width, &style);
        let adjust = columns.page_margin_adjustment(content_width, ctx.config().column_rounding_epsilon);
        if adjust > 0 {
            log::debug!("widening end margin by {adjust} for {} whole columns", columns.count);
            logical.right += adjust;
        }
        let content = page.deflate(&logical);
        let geometry = PageGeometry { page, content, columns };
        let pc = ctx.page_contexts.insert(PageContext::new(geometry, direction, true));
        if let Some(start) = start {
            let pc = ctx.page_context_mut(pc)?;
            for float in &start.deferred {
                pc.defer(*float);
            }
        }
        self.begin(size, logical, direction, geometry, pc, FormatMode::Finite);

        let frame = FormatFrame {
            page_size: size,
            page_margin: margin,
            incremental_update: false,
            finite_page: true,
        };
        let root = self.root;
        let out = ctx.with_format_context(frame, |ctx| match start.map(|s| &s.flow) {
            Some(FlowPosition::Finished) => place_deferred(ctx, host, pc, content, columns, FormatMode::Finite),
            resume => {
                let resume = match resume {
                    Some(FlowPosition::At(record)) => Some(record.duplicate()),
                    _ => None,
                };
                format_tracks(ctx, host, root, pc, content, columns, direction, FormatMode::Finite, resume, true)
            }
        })?;

        let status = out.status;
        if status == FormatStatus::Interrupted {
            self.keep(out);
            self.release(ctx)?;
            return Ok(PageFormatResult { status, break_record: None, size });
        }
        if status == FormatStatus::NoProgress {
            self.keep(out);
            self.release(ctx)?;
            return Err(LayoutError::EngineFailure("page made no progress from its top".into()));
        }

        let leftover = ctx.page_context_mut(pc)?.take_deferred();
        let resume = out.resume.clone();
        self.keep(out);
        self.state = PageState::Formatted;
        let break_record = match (status, resume) {
            (FormatStatus::Continued, Some(record)) => Some(PageBreakRecord {
                flow: FlowPosition::At(record),
                deferred: leftover,
            }),
            _ if !leftover.is_empty() => Some(PageBreakRecord { flow: FlowPosition::Finished, deferred: leftover }),
            _ => None,
        };
        log::debug!(
            "finite page {}x{}: {} client(s), {}",
            size.0,
            size.1,
            self.clients().len(),
            if break_record.is_some() { "continues" } else { "ends the flow" }
        );
        let status = if break_record.is_some() { FormatStatus::Continued } else { FormatStatus::Complete };
        Ok(PageFormatResult { status, break_record, size })
    }

    /// Format a page of unbounded height and report its natural size.
    ///
    /// With `incremental` set and the width unchanged, the root flow is
    /// patched with update records built from the pass's dirty ranges;
    /// otherwise it is reformatted from scratch.
    pub fn format_bottomless(
        &mut self,
        ctx: &mut EngineContext,
        host: &LayoutHost,
        size: (LayoutUnit, LayoutUnit),
        margin: Thickness,
        incremental: bool,
    ) -> Result<PageFormatResult> {
        self.check_alive()?;
        let (size, margin) = clamp_page(ctx.config(), (size.0, MAX_LAYOUT_SIZE), margin);
        let width_changed = self.formatted_width.is_some_and(|w| w != size.0);
        let mode = if incremental && !width_changed && self.formatted_width.is_some() {
            FormatMode::UpdateBottomless
        } else {
            FormatMode::Bottomless
        };
        if width_changed {
            log::debug!("page width changed to {}; full reformat", size.0);
            paragraph::invalidate_format_cache(ctx, self.root)?;
        }
        self.release(ctx)?;

        let style = host.content.resolved_style(host.content.root_element());
        let direction = style.flow_direction;
        let mut logical = margin;
        if direction.is_rtl() {
            logical.mirror();
        }
        let page = LayoutRect::new(0, 0, size.0, size.1);
        let content = page.deflate(&logical);
        let columns = ColumnMetrics::single(content.du);
        let geometry = PageGeometry { page, content, columns };
        let pc = ctx.page_contexts.insert(PageContext::new(geometry, direction, false));
        self.begin(size, logical, direction, geometry, pc, mode);

        let frame = FormatFrame {
            page_size: size,
            page_margin: margin,
            incremental_update: mode == FormatMode::UpdateBottomless,
            finite_page: false,
        };
        let root = self.root;
        let out = ctx.with_format_context(frame, |ctx| {
            if mode == FormatMode::UpdateBottomless && ctx.paragraph(root)?.change != ChangeKind::None {
                update::build_update_records(ctx, host, root)?;
            }
            format_tracks(ctx, host, root, pc, content, columns, direction, mode, None, true)
        })?;

        let status = out.status;
        let used = out
            .bbox
            .map(|b| b.v_end() - content.v)
            .unwrap_or(0)
            .max(out.height);
        self.keep(out);
        if status == FormatStatus::Interrupted {
            self.release(ctx)?;
            return Ok(PageFormatResult { status, break_record: None, size: self.size });
        }

        paragraph::clear_update_info(ctx, root)?;
        let cch = paragraph::current_cch(ctx, host, root)?;
        ctx.paragraph_mut(root)?.last_format_cch = cch;

        let natural = (size.0, logical.vertical() + used);
        self.size = natural;
        if let Some(g) = self.geometry.as_mut() {
            g.page.dv = natural.1;
            g.content.dv = used.max(MIN_WIDTH);
        }
        self.formatted_width = Some(size.0);
        self.state = PageState::Formatted;
        log::debug!("bottomless page {:?} in {mode:?}: natural height {}", size.0, natural.1);
        Ok(PageFormatResult { status: FormatStatus::Complete, break_record: None, size: natural })
    }

    fn begin(
        &mut self,
        size: (LayoutUnit, LayoutUnit),
        logical: Thickness,
        direction: FlowDirection,
        geometry: PageGeometry,
        pc: PageContextId,
        mode: FormatMode,
    ) {
        let mut physical = logical;
        if direction.is_rtl() {
            physical.mirror();
        }
        self.size = size;
        self.margin = physical;
        self.direction = direction;
        self.geometry = Some(geometry);
        self.page_context = Some(pc);
        self.last_mode = Some(mode);
        self.transform = None;
    }

    fn keep(&mut self, out: TracksOutput) {
        self.tracks = out.tracks;
        self.floats = out.floats;
    }

    /// Dispose this page's clients and page context, keeping the page
    /// reusable.
    pub fn release(&mut self, ctx: &mut EngineContext) -> Result<()> {
        for c in self.clients() {
            client::dispose(ctx, c)?;
        }
        self.tracks.clear();
        self.floats.clear();
        if let Some(pc) = self.page_context.take() {
            ctx.page_contexts.remove(pc);
        }
        self.transform = None;
        if self.state != PageState::Disposed {
            self.state = PageState::Unformatted;
        }
        Ok(())
    }

    pub fn dispose(&mut self, ctx: &mut EngineContext) -> Result<()> {
        self.release(ctx)?;
        self.visual = None;
        self.state = PageState::Disposed;
        Ok(())
    }

    fn check_alive(&self) -> Result<()> {
        if self.state == PageState::Disposed {
            return Err(LayoutError::invariant("page used after it was disposed"));
        }
        Ok(())
    }

    fn check_formatted(&self) -> Result<()> {
        match self.state {
            PageState::Formatted | PageState::VisualStale => Ok(()),
            state => Err(LayoutError::invariant(format!("page is {state:?}, not formatted"))),
        }
    }

    // ── Arrange and visuals ────────────────────────────────────────

    /// Resolve the physical rectangles of every client on the page.
    pub fn arrange(&mut self, ctx: &mut EngineContext) -> Result<()> {
        self.check_formatted()?;
        let page = LayoutRect::new(0, 0, self.size.0, self.size.1);
        let transform = FlowTransform::for_box(&page, self.direction);
        let frame = ArrangeFrame::new(transform, self.direction);
        let fmt = FormatFrame {
            page_size: self.size,
            page_margin: self.margin,
            incremental_update: false,
            finite_page: self.last_mode == Some(FormatMode::Finite),
        };
        let clients = self.clients();
        ctx.with_format_context(fmt, |ctx| {
            for c in clients {
                client::arrange(ctx, c, frame)?;
            }
            Ok(())
        })?;
        self.transform = Some(transform);
        self.state = PageState::VisualStale;
        Ok(())
    }

    /// Restrict visual validation to `rect` (physical page coordinates).
    pub fn update_viewport(&mut self, viewport: Option<LayoutRect>) {
        if self.viewport != viewport {
            self.viewport = viewport;
            // Reused visuals may lack clients that just became visible.
            self.rebuild_visual = true;
            if self.state == PageState::Formatted {
                self.state = PageState::VisualStale;
            }
        }
    }

    /// Bring the page's visual up to date with its arranged clients.
    pub fn validate_visual(&mut self, ctx: &EngineContext) -> Result<&PageVisual> {
        if self.transform.is_none() {
            return Err(LayoutError::invariant("visual validated before the page was arranged"));
        }
        if self.state == PageState::Formatted && self.visual.is_some() && !self.rebuild_visual {
            return self
                .visual
                .as_ref()
                .ok_or_else(|| LayoutError::invariant("page visual vanished"));
        }
        self.check_formatted()?;

        let inherited = if self.rebuild_visual || self.last_mode != Some(FormatMode::UpdateBottomless) {
            UpdateKind::New
        } else {
            UpdateKind::ChangeInside
        };
        let mut cache = VisualCache::new(self.visual.take().map(|v| v.children).unwrap_or_default());
        let mut stats = VisualStats::default();
        let mut children = Vec::new();
        for c in self.clients() {
            let previous = if inherited == UpdateKind::New { None } else { cache.take(ctx.client(c)?.paragraph) };
            let visual = validate_visual(
                ctx,
                c,
                LayoutPoint::default(),
                inherited,
                previous,
                self.viewport.as_ref(),
                &mut stats,
            )?;
            children.extend(visual);
        }

        let (rules, rule_color) = self.column_rules();
        log::trace!("page visual: {stats:?}");
        self.visual_stats = stats;
        self.rebuild_visual = false;
        self.state = PageState::Formatted;
        Ok(self.visual.insert(PageVisual { size: self.size, rules, rule_color, children }))
    }

    fn column_rules(&self) -> (Vec<LayoutRect>, Color) {
        let (Some(g), Some(t)) = (self.geometry, self.transform) else {
            return (Vec::new(), Color::TRANSPARENT);
        };
        if g.columns.count < 2 || g.columns.rule_width <= 0 {
            return (Vec::new(), Color::TRANSPARENT);
        }
        let height = self.tracks.iter().map(|t| t.rect.dv).max().unwrap_or(0);
        let width = g.columns.rule_width;
        let rules = self
            .tracks
            .windows(2)
            .map(|pair| {
                let middle = (pair[0].rect.u_end() + pair[1].rect.u) / 2;
                t.apply(&LayoutRect::new(middle - width / 2, g.content.v, width, height))
            })
            .collect();
        (rules, g.columns.rule_color)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Element under `point`. Floats registered on the page are tested
    /// before the flow.
    pub fn input_hit_test(&self, ctx: &EngineContext, point: LayoutPoint) -> Result<Option<ElementId>> {
        self.check_arranged()?;
        let floats = match self.page_context {
            Some(pc) => ctx.page_context(pc)?.floating().to_vec(),
            None => Vec::new(),
        };
        if let Some(e) = client::first_hit(ctx, floats.into_iter(), point)? {
            return Ok(Some(e));
        }
        client::first_hit(ctx, self.tracks.iter().flat_map(|t| t.clients.iter().copied()), point)
    }

    /// Content position of the line under `point`.
    pub fn text_position_from_point(&self, ctx: &EngineContext, point: LayoutPoint) -> Result<Option<usize>> {
        self.check_arranged()?;
        for c in self.tracks.iter().flat_map(|t| t.clients.iter()) {
            let Some(arranged) = ctx.client(*c)?.arranged else {
                continue;
            };
            if point.v >= arranged.rect.v && point.v < arranged.rect.v_end() {
                if let Some(cp) = client::text_position_from_point(ctx, *c, point)? {
                    return Ok(Some(cp));
                }
            }
        }
        Ok(None)
    }

    /// Positions the page's flow covers.
    pub fn content_range(&self, ctx: &EngineContext, host: &LayoutHost) -> Result<Option<(usize, usize)>> {
        let mut range: Option<(usize, usize)> = None;
        for c in self.tracks.iter().flat_map(|t| t.clients.iter()) {
            if let Some((s, e)) = client::text_content_range(ctx, host, *c)? {
                range = Some(match range {
                    Some((rs, re)) => (rs.min(s), re.max(e)),
                    None => (s, e),
                });
            }
        }
        Ok(range)
    }

    pub fn results(&self, ctx: &EngineContext, host: &LayoutHost) -> Result<PageResult> {
        let transform = self.check_arranged()?;
        let mut columns = Vec::new();
        for track in &self.tracks {
            let mut paragraphs = Vec::new();
            for c in &track.clients {
                paragraphs.push(client::paragraph_results(ctx, host, *c)?);
            }
            columns.push(ColumnResult { rect: transform.apply(&track.rect), paragraphs });
        }
        let mut floats = Vec::new();
        for f in &self.floats {
            floats.push(client::paragraph_results(ctx, host, *f)?);
        }
        Ok(PageResult {
            size: self.size,
            margin: self.margin,
            columns,
            floats,
            content_range: self.content_range(ctx, host)?,
        })
    }

    fn check_arranged(&self) -> Result<FlowTransform> {
        self.transform
            .ok_or_else(|| LayoutError::invariant("page queried before it was arranged"))
    }
}

/// Place the floats carried over to a page whose flow is already done.
fn place_deferred(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    pc: PageContextId,
    area: LayoutRect,
    columns: ColumnMetrics,
    mode: FormatMode,
) -> Result<TracksOutput> {
    let mut out = TracksOutput {
        status: FormatStatus::Complete,
        tracks: Vec::new(),
        floats: Vec::new(),
        resume: None,
        bbox: None,
        height: 0,
    };
    for index in 0..columns.count.max(1) {
        let track = columns.column_rect(index, &area);
        let scope = TrackScope { page_context: pc, track };
        for float in ctx.page_context_mut(pc)?.take_deferred() {
            if !ctx.paragraphs.contains(float) {
                continue;
            }
            if let floating::Placement::Placed(c) = floating::place(ctx, host, float, track.v, &scope, mode, true, true)? {
                out.floats.push(c);
                out.bbox = union(out.bbox, Some(ctx.client(c)?.rect));
            }
        }
        out.tracks.push(TrackLayout { rect: LayoutRect::new(track.u, track.v, track.du, 0), clients: Vec::new() });
        if !ctx.page_context(pc)?.has_deferred() {
            break;
        }
    }
    Ok(out)
}

/// Clamp a page to the engine's size limit. Margins that would leave no
/// content width give way to it.
fn clamp_page(
    config: &LayoutConfig,
    size: (LayoutUnit, LayoutUnit),
    margin: Thickness,
) -> ((LayoutUnit, LayoutUnit), Thickness) {
    let max = config.max_page_size;
    let clamped = (size.0.clamp(MIN_WIDTH, max), size.1.clamp(MIN_WIDTH, max));
    if clamped != size && size.1 != MAX_LAYOUT_SIZE {
        log::warn!("page size {size:?} clamped to {clamped:?}");
    }
    let side = |m: LayoutUnit| m.clamp(0, max);
    let mut m = Thickness::new(side(margin.left), side(margin.top), side(margin.right), side(margin.bottom));
    if m.horizontal() > clamped.0 - MIN_WIDTH {
        log::warn!("horizontal page margins {} exceed the page width {}", m.horizontal(), clamped.0);
        m.left = 0;
        m.right = 0;
    }
    if m.vertical() > clamped.1 - MIN_WIDTH {
        log::warn!("vertical page margins {} exceed the page height {}", m.vertical(), clamped.1);
        m.top = 0;
        m.bottom = 0;
    }
    (clamped, m)
}
