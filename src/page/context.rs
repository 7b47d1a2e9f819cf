//! # Page Context
//!
//! Per-page (and per-subpage) state shared by every paragraph formatted
//! into that page: its geometry and columns, the floating clients anchored
//! into it, the flow-around rectangles they leave behind, and floats that
//! had to be deferred to a later column.
//!
//! Also home of [`FormatFrame`], one entry of the engine's format context
//! stack.

use serde::Serialize;

use crate::client::ClientId;
use crate::engine::Handle;
use crate::error::{LayoutError, Result};
use crate::geometry::{to_layout, FlowDirection, LayoutRect, LayoutUnit, Thickness, MIN_WIDTH};
use crate::paragraph::ParaId;
use crate::style::{Color, ResolvedStyle, WrapDirection};

pub type PageContextId = Handle<PageContext>;

/// One frame of the format context stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatFrame {
    pub page_size: (LayoutUnit, LayoutUnit),
    pub page_margin: Thickness,
    pub incremental_update: bool,
    pub finite_page: bool,
}

// ── Columns ────────────────────────────────────────────────────────

/// Column layout of a page or subpage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetrics {
    pub count: usize,
    pub width: LayoutUnit,
    pub gap: LayoutUnit,
    pub rule_width: LayoutUnit,
    pub rule_color: Color,
}

impl ColumnMetrics {
    pub fn single(width: LayoutUnit) -> Self {
        Self {
            count: 1,
            width: width.max(MIN_WIDTH),
            gap: 0,
            rule_width: 0,
            rule_color: Color::TRANSPARENT,
        }
    }

    /// Columns for `available` width under `style`.
    ///
    /// An explicit column width decides the count (as many as fit); it is
    /// stretched to fill the width when flexible. Without one,
    /// `columnCount` columns share the width.
    pub fn compute(available: LayoutUnit, style: &ResolvedStyle) -> Self {
        let available = available.max(MIN_WIDTH);
        let gap = to_layout(style.column_gap).max(0);
        let (count, width) = match style.column_width {
            Some(px) => {
                let cw = to_layout(px).max(MIN_WIDTH);
                let count = ((available + gap) / (cw + gap)).max(1) as usize;
                let width = if style.is_column_width_flexible {
                    share(available, count, gap)
                } else {
                    cw.min(available)
                };
                (count, width)
            }
            None => {
                let count = style.column_count.max(1) as usize;
                (count, share(available, count, gap))
            }
        };
        if count == 1 {
            return ColumnMetrics::single(available);
        }
        Self {
            count,
            width,
            gap,
            rule_width: to_layout(style.column_rule_width),
            rule_color: style.column_rule_color,
        }
    }

    /// Width the columns and gaps occupy.
    pub fn used_width(&self) -> LayoutUnit {
        let n = self.count as LayoutUnit;
        n * self.width + (n - 1).max(0) * self.gap
    }

    /// Rectangle of column `index` inside `area`.
    pub fn column_rect(&self, index: usize, area: &LayoutRect) -> LayoutRect {
        let u = area.u + index as LayoutUnit * (self.width + self.gap);
        LayoutRect::new(u, area.v, self.width, area.dv)
    }

    /// Column containing the inline offset `u` of `area`, clamped.
    pub fn column_at(&self, u: LayoutUnit, area: &LayoutRect) -> usize {
        let pitch = (self.width + self.gap).max(MIN_WIDTH);
        let index = ((u - area.u).max(0) / pitch) as usize;
        index.min(self.count.saturating_sub(1))
    }

    /// How much to widen the right page margin so that `content_width`
    /// holds the columns exactly, with no fractional leftover column.
    ///
    /// The leftover is reduced by `epsilon` so that rounding can never push
    /// the narrowed width below the columns' own width.
    pub fn page_margin_adjustment(&self, content_width: LayoutUnit, epsilon: LayoutUnit) -> LayoutUnit {
        if self.count < 2 {
            return 0;
        }
        (content_width - self.used_width() - epsilon).max(0)
    }
}

fn share(available: LayoutUnit, count: usize, gap: LayoutUnit) -> LayoutUnit {
    let n = count as LayoutUnit;
    ((available - (n - 1) * gap) / n).max(MIN_WIDTH)
}

/// Rectangles of a page or subpage, in its own frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageGeometry {
    pub page: LayoutRect,
    /// The page minus its margins.
    pub content: LayoutRect,
    pub columns: ColumnMetrics,
}

impl PageGeometry {
    pub fn column(&self, index: usize) -> LayoutRect {
        self.columns.column_rect(index, &self.content)
    }
}

// ── Floats ─────────────────────────────────────────────────────────

/// Space a placed float keeps text away from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exclusion {
    pub rect: LayoutRect,
    pub wrap: WrapDirection,
    pub client: ClientId,
}

#[derive(Debug)]
pub struct PageContext {
    pub geometry: PageGeometry,
    pub direction: FlowDirection,
    pub finite: bool,
    floating: Vec<ClientId>,
    exclusions: Vec<Exclusion>,
    deferred: Vec<ParaId>,
}

impl PageContext {
    pub fn new(geometry: PageGeometry, direction: FlowDirection, finite: bool) -> Self {
        Self {
            geometry,
            direction,
            finite,
            floating: Vec::new(),
            exclusions: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Floating clients in registration order.
    pub fn floating(&self) -> &[ClientId] {
        &self.floating
    }

    pub fn add_floating(&mut self, client: ClientId) -> Result<()> {
        if self.floating.contains(&client) {
            return Err(LayoutError::invariant("floating client registered twice"));
        }
        self.floating.push(client);
        Ok(())
    }

    /// Drop a client from the registry and its exclusion.
    pub fn remove_floating(&mut self, client: ClientId) -> bool {
        self.exclusions.retain(|e| e.client != client);
        let before = self.floating.len();
        self.floating.retain(|c| *c != client);
        before != self.floating.len()
    }

    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    pub fn add_exclusion(&mut self, exclusion: Exclusion) {
        self.exclusions.push(exclusion);
    }

    pub fn defer(&mut self, float: ParaId) {
        if !self.deferred.contains(&float) {
            self.deferred.push(float);
        }
    }

    pub fn cancel_deferred(&mut self, float: ParaId) {
        self.deferred.retain(|f| *f != float);
    }

    pub fn take_deferred(&mut self) -> Vec<ParaId> {
        std::mem::take(&mut self.deferred)
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// The inline span of `track` left free by floats over `[v, v + dv)`,
    /// or `None` when a float blocks the whole width.
    pub fn available_span(&self, track: &LayoutRect, v: LayoutUnit, dv: LayoutUnit) -> Option<(LayoutUnit, LayoutUnit)> {
        let mut left = track.u;
        let mut right = track.u_end();
        let center2 = track.u + track.u_end();
        for ex in self.overlapping(track, v, dv.max(MIN_WIDTH)) {
            match ex.wrap {
                WrapDirection::None => return None,
                WrapDirection::Left => right = right.min(ex.rect.u),
                WrapDirection::Right => left = left.max(ex.rect.u_end()),
                WrapDirection::Both => {
                    if ex.rect.u + ex.rect.u_end() < center2 {
                        left = left.max(ex.rect.u_end());
                    } else {
                        right = right.min(ex.rect.u);
                    }
                }
            }
        }
        (right - left >= MIN_WIDTH).then_some((left, right - left))
    }

    /// The lowest block position past `v` where a float overlapping
    /// `[v, v + dv)` ends.
    pub fn next_free_v(&self, track: &LayoutRect, v: LayoutUnit, dv: LayoutUnit) -> Option<LayoutUnit> {
        self.overlapping(track, v, dv.max(MIN_WIDTH))
            .map(|ex| ex.rect.v_end())
            .filter(|end| *end > v)
            .min()
    }

    /// Move `v` below every float on the sides `clear` names.
    pub fn clear_below(&self, track: &LayoutRect, v: LayoutUnit, clear: crate::style::Clear) -> LayoutUnit {
        let center2 = track.u + track.u_end();
        self.exclusions
            .iter()
            .filter(|ex| ex.rect.u < track.u_end() && track.u < ex.rect.u_end())
            .filter(|ex| {
                let on_left = ex.rect.u + ex.rect.u_end() < center2;
                (on_left && clear.clears_left()) || (!on_left && clear.clears_right())
            })
            .map(|ex| ex.rect.v_end())
            .fold(v, LayoutUnit::max)
    }

    /// Whether `rect` overlaps a float already placed.
    pub fn collides(&self, rect: &LayoutRect) -> bool {
        self.exclusions.iter().any(|ex| ex.rect.intersects(rect))
    }

    fn overlapping<'s>(
        &'s self,
        track: &'s LayoutRect,
        v: LayoutUnit,
        dv: LayoutUnit,
    ) -> impl Iterator<Item = &'s Exclusion> + 's {
        self.exclusions.iter().filter(move |ex| {
            ex.rect.overlaps_v(v, v + dv) && ex.rect.u < track.u_end() && track.u < ex.rect.u_end()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HandleTable;
    use crate::style::{Clear, Style};

    fn px(v: f64) -> LayoutUnit {
        to_layout(v)
    }

    fn context() -> (PageContext, HandleTable<crate::client::ParagraphClient>) {
        let content = LayoutRect::new(0, 0, 1000, 1000);
        let geometry = PageGeometry {
            page: content,
            content,
            columns: ColumnMetrics::single(1000),
        };
        (PageContext::new(geometry, FlowDirection::LeftToRight, false), HandleTable::new())
    }

    fn fake_client(table: &mut HandleTable<crate::client::ParagraphClient>) -> ClientId {
        table.insert(crate::client::ParagraphClient::detached())
    }

    #[test]
    fn explicit_width_decides_column_count() {
        let style = Style {
            column_width: Some(200.0),
            column_gap: Some(0.0),
            is_column_width_flexible: Some(false),
            ..Default::default()
        }
        .resolve(None);
        let columns = ColumnMetrics::compute(px(602.0), &style);
        assert_eq!(columns.count, 3);
        assert_eq!(columns.width, px(200.0));
        assert_eq!(columns.used_width(), px(600.0));
    }

    #[test]
    fn margin_adjustment_removes_fractional_column() {
        let style = Style {
            column_width: Some(200.0),
            column_gap: Some(0.0),
            is_column_width_flexible: Some(false),
            ..Default::default()
        }
        .resolve(None);
        let content = px(602.0);
        let columns = ColumnMetrics::compute(content, &style);
        let adjustment = columns.page_margin_adjustment(content, 3);
        assert_eq!(adjustment, px(2.0) - 3);
        let narrowed = content - adjustment;
        assert_eq!(narrowed, px(600.0) + 3);
        assert_eq!(ColumnMetrics::compute(narrowed, &style).count, 3);
    }

    #[test]
    fn column_count_shares_width() {
        let style = Style { column_count: Some(2), column_gap: Some(10.0), ..Default::default() }.resolve(None);
        let columns = ColumnMetrics::compute(px(210.0), &style);
        assert_eq!(columns.count, 2);
        assert_eq!(columns.width, px(100.0));
        let area = LayoutRect::new(0, 0, px(210.0), 100);
        assert_eq!(columns.column_rect(1, &area).u, px(110.0));
        assert_eq!(columns.column_at(px(150.0), &area), 1);
        assert_eq!(columns.column_at(px(500.0), &area), 1);
    }

    #[test]
    fn floats_narrow_the_available_span() {
        let (mut ctx, mut clients) = context();
        let track = LayoutRect::new(0, 0, 1000, 1000);
        ctx.add_exclusion(Exclusion {
            rect: LayoutRect::new(0, 0, 300, 200),
            wrap: WrapDirection::Both,
            client: fake_client(&mut clients),
        });
        ctx.add_exclusion(Exclusion {
            rect: LayoutRect::new(800, 100, 200, 200),
            wrap: WrapDirection::Both,
            client: fake_client(&mut clients),
        });
        assert_eq!(ctx.available_span(&track, 0, 50), Some((300, 700)));
        assert_eq!(ctx.available_span(&track, 150, 10), Some((300, 500)));
        assert_eq!(ctx.available_span(&track, 400, 10), Some((0, 1000)));
        assert_eq!(ctx.next_free_v(&track, 150, 10), Some(200));
        assert_eq!(ctx.clear_below(&track, 0, Clear::Left), 200);
        assert_eq!(ctx.clear_below(&track, 0, Clear::Both), 300);
    }

    #[test]
    fn wrap_none_blocks_the_line() {
        let (mut ctx, mut clients) = context();
        let track = LayoutRect::new(0, 0, 1000, 1000);
        ctx.add_exclusion(Exclusion {
            rect: LayoutRect::new(400, 0, 100, 100),
            wrap: WrapDirection::None,
            client: fake_client(&mut clients),
        });
        assert_eq!(ctx.available_span(&track, 50, 10), None);
        assert_eq!(ctx.next_free_v(&track, 50, 10), Some(100));
    }

    #[test]
    fn registry_is_symmetric() {
        let (mut ctx, mut clients) = context();
        let client = fake_client(&mut clients);
        ctx.add_floating(client).unwrap();
        assert!(ctx.add_floating(client).is_err());
        ctx.add_exclusion(Exclusion { rect: LayoutRect::new(0, 0, 1, 1), wrap: WrapDirection::Both, client });
        assert!(ctx.remove_floating(client));
        assert!(ctx.floating().is_empty());
        assert!(ctx.exclusions().is_empty());
        assert!(!ctx.remove_floating(client));
    }
}
