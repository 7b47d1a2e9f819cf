//! # Tables
//!
//! A table is a grid of rows and cells. Each cell is formatted as a
//! container paragraph owned by the table; column widths come from
//! explicit cell widths, with the rest of the width shared by the
//! remaining columns. Finite formatting breaks between rows, never inside
//! one.

use std::collections::{HashMap, HashSet};

use super::{
    child_elements, create_paragraph, dispose, ChangeKind, FormatInput, FormatOutput, NewParagraph, ParaId,
    ParagraphKind, TrackScope,
};
use crate::client::{self, ClientBody, TableRowLayout};
use crate::content::{ElementId, ElementKind, TextContainer};
use crate::engine::{BreakRecord, EngineContext, FormatMode, FormatStatus, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::geometry::margin::realize;
use crate::geometry::{
    collapse_bottom_margin, collapse_top_margin, to_layout, LayoutRect, LayoutUnit, MbpInfo, MAX_LAYOUT_SIZE,
    MIN_WIDTH,
};
use crate::style::Clear;

#[derive(Debug, Default)]
pub struct TableParagraph {
    pub cells: HashMap<ElementId, ParaId>,
}

/// Cells of every row of `table`, in order.
fn grid(content: &dyn TextContainer, table: ElementId) -> Vec<Vec<ElementId>> {
    child_elements(content, table)
        .into_iter()
        .filter(|row| content.element_kind(*row) == Some(ElementKind::TableRow))
        .map(|row| {
            child_elements(content, row)
                .into_iter()
                .filter(|cell| content.element_kind(*cell) == Some(ElementKind::TableCell))
                .collect()
        })
        .collect()
}

/// Width of each column. The first cell of a column with an explicit width
/// fixes it; the other columns share what is left.
fn column_widths(content: &dyn TextContainer, rows: &[Vec<ElementId>], available: LayoutUnit) -> Vec<LayoutUnit> {
    let count = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut explicit: Vec<Option<LayoutUnit>> = vec![None; count];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if explicit[i].is_none() {
                explicit[i] = content.resolved_style(*cell).width.map(to_layout);
            }
        }
    }
    let fixed: LayoutUnit = explicit.iter().flatten().sum();
    let auto = explicit.iter().filter(|w| w.is_none()).count() as LayoutUnit;
    let share = if auto > 0 { ((available - fixed) / auto).max(MIN_WIDTH) } else { 0 };
    explicit
        .into_iter()
        .map(|w| w.unwrap_or(share).max(MIN_WIDTH))
        .collect()
}

/// Cell nodes for the current grid: stale ones disposed, missing ones
/// created.
fn sync_cells(ctx: &mut EngineContext, host: &LayoutHost, id: ParaId, rows: &[Vec<ElementId>]) -> Result<()> {
    let live: HashSet<ElementId> = rows.iter().flatten().copied().collect();
    let stale: Vec<ParaId> = match &ctx.paragraph(id)?.kind {
        ParagraphKind::Table(t) => t
            .cells
            .iter()
            .filter(|(e, _)| !live.contains(*e))
            .map(|(_, p)| *p)
            .collect(),
        _ => return Err(LayoutError::invariant("expected a table paragraph")),
    };
    for cell in stale {
        dispose(ctx, cell)?;
    }
    for cell in rows.iter().flatten() {
        let known = match &ctx.paragraph(id)?.kind {
            ParagraphKind::Table(t) => t.cells.get(cell).copied().filter(|p| ctx.paragraphs.contains(*p)),
            _ => None,
        };
        if known.is_some() {
            continue;
        }
        let (start, _) = host
            .content
            .element_span(*cell)
            .ok_or(LayoutError::StaleHandle { kind: "element" })?;
        let node = create_paragraph(ctx, host, NewParagraph::Container(*cell), id, start)?;
        if let ParagraphKind::Table(t) = &mut ctx.paragraph_mut(id)?.kind {
            t.cells.insert(*cell, node);
        }
    }
    if let ParagraphKind::Table(t) = &mut ctx.paragraph_mut(id)?.kind {
        t.cells.retain(|e, _| live.contains(e));
    }
    Ok(())
}

pub(crate) fn format_table(
    ctx: &mut EngineContext,
    host: &LayoutHost,
    id: ParaId,
    input: FormatInput,
    mode: FormatMode,
    scope: &TrackScope,
) -> Result<FormatOutput> {
    let (element, change) = {
        let node = ctx.paragraph(id)?;
        let element = node
            .element
            .ok_or_else(|| LayoutError::invariant("table paragraph without an element"))?;
        (element, node.change)
    };
    let style = host.content.resolved_style(element);
    let mbp = MbpInfo::compute_for_track(&style, ctx.dpi(), input.direction);
    let first_chunk = input.break_record.is_none();
    let first_row = match input.break_record {
        None => 0,
        Some(BreakRecord::Table { row }) => row,
        Some(other) => {
            return Err(LayoutError::invariant(format!("table resumed with {other:?}")));
        }
    };

    let r = input.rect;
    let border_v = if first_chunk {
        let (open, space) = collapse_top_margin(&mbp, input.mcs);
        r.v + space + realize(open)
    } else {
        r.v
    };
    let content_v = border_v + if first_chunk { mbp.bp.top } else { 0 };
    let content_u = r.u + mbp.mbp.left;
    let content_width = (r.du - mbp.mbp.horizontal()).max(MIN_WIDTH);

    let rows = grid(host.content, element);
    let widths = column_widths(host.content, &rows, content_width);
    sync_cells(ctx, host, id, &rows)?;
    let cells: HashMap<ElementId, ParaId> = match &ctx.paragraph(id)?.kind {
        ParagraphKind::Table(t) => t.cells.clone(),
        _ => HashMap::new(),
    };
    if mode == FormatMode::UpdateBottomless && change != ChangeKind::None {
        for cell in cells.values() {
            let node = ctx.paragraph_mut(*cell)?;
            if node.change == ChangeKind::None {
                node.change = ChangeKind::Inside;
            }
        }
    }
    let cell_mode = if mode.is_finite() { FormatMode::Bottomless } else { mode };
    let bottom = r.v_end() - mbp.bp.bottom;

    let mut v = content_v;
    let mut placed: Vec<TableRowLayout> = Vec::new();
    let mut status = FormatStatus::Complete;
    let mut break_record = None;
    for (index, row) in rows.iter().enumerate().skip(first_row) {
        let mut u = content_u;
        let mut row_clients = Vec::new();
        let mut row_height = 0;
        for (column, cell) in row.iter().enumerate() {
            let width = widths.get(column).copied().unwrap_or(MIN_WIDTH);
            let Some(cell_id) = cells.get(cell).copied() else {
                continue;
            };
            let cell_input = FormatInput {
                rect: LayoutRect::new(u, v, width, MAX_LAYOUT_SIZE),
                direction: style.flow_direction,
                mcs: None,
                clear: Clear::None,
                break_record: None,
                at_track_top: true,
            };
            let out = super::format(ctx, host, cell_id, cell_input, cell_mode, scope)?;
            row_clients.extend(out.client);
            row_height = row_height.max(out.used_height);
            u += width;
        }

        let forced = placed.is_empty() && input.at_track_top;
        if mode.is_finite() && v + row_height > bottom && !forced {
            for c in row_clients {
                client::dispose(ctx, c)?;
            }
            if placed.is_empty() {
                return Ok(FormatOutput::no_progress());
            }
            status = FormatStatus::Continued;
            break_record = Some(BreakRecord::Table { row: index });
            break;
        }
        placed.push(TableRowLayout {
            rect: LayoutRect::new(content_u, v, content_width, row_height),
            cells: row_clients,
        });
        v += row_height;
    }

    let complete = status == FormatStatus::Complete;
    let (mcs, bottom_bp) = if complete {
        (collapse_bottom_margin(&mbp, None).0, mbp.bp.bottom)
    } else {
        (None, 0)
    };
    let border = LayoutRect::new(
        r.u + mbp.margin.left,
        border_v,
        (r.du - mbp.margin.horizontal()).max(MIN_WIDTH),
        v + bottom_bp - border_v,
    );
    log::trace!("table {id:?}: {} row(s) from row {first_row}", placed.len());
    let client = super::create_client(ctx, id, border, style.flow_direction, ClientBody::Table { rows: placed })?;
    {
        let c = ctx.client_mut(client)?;
        c.content_rect = LayoutRect::new(content_u, content_v, content_width, v - content_v);
        c.mbp = mbp;
    }
    Ok(FormatOutput {
        status,
        client: Some(client),
        used_height: border.v_end() - r.v,
        bbox: Some(border),
        mcs,
        clear: Clear::None,
        break_record,
    })
}
