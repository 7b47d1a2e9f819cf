//! # Update Records
//!
//! Incremental reflow of a bottomless page keeps the paragraph chain of the
//! last pass and patches it. Before a segment is pulled in update mode, the
//! pending dirty ranges that touch it are turned into a list of
//! [`UpdateRecord`]s:
//!
//! - `first` is the first cached paragraph the change affects, `None` when
//!   the change appends past the last one.
//! - `sync` is the first cached paragraph after the change that can be
//!   reused as is, `None` when nothing after it survives.
//! - Paragraphs strictly between the two are disposed right away; the pull
//!   protocol re-creates whatever the new content needs there.
//!
//! Records whose ranges overlap or share a boundary are merged, so the
//! list is sorted and disjoint.

use super::{chain, dispose, ChangeKind, ParaId, ParagraphKindTag};
use crate::engine::{EngineContext, LayoutHost};
use crate::error::{LayoutError, Result};
use crate::page::dirty::DirtyTextRange;

#[derive(Debug)]
pub struct UpdateRecord {
    /// The change, relative to the segment's old content start.
    pub dtr: DirtyTextRange,
    pub first: Option<ParaId>,
    /// Where the change starts inside `first`.
    pub first_offset: usize,
    pub change: ChangeKind,
    pub sync: Option<ParaId>,
    /// Set once the pull protocol has reached `first`.
    pub in_processing: bool,
    pub next: Option<Box<UpdateRecord>>,
}

/// One cached child as it was at the end of the last pass.
#[derive(Debug, Clone, Copy)]
struct OldChild {
    id: ParaId,
    start: usize,
    cch: usize,
    is_text: bool,
}

impl OldChild {
    fn end(&self) -> usize {
        self.start + self.cch
    }
}

/// Working form of a record: indices into the old chain, `n` meaning
/// "past the end".
#[derive(Debug, Clone, Copy)]
struct Draft {
    dtr: DirtyTextRange,
    first: usize,
    first_offset: usize,
    change: ChangeKind,
    sync: usize,
}

/// Build the update records of `owner` from the pass's dirty ranges.
pub fn build_update_records(ctx: &mut EngineContext, host: &LayoutHost, owner: ParaId) -> Result<()> {
    let (element, old_cch, first_child) = {
        let node = ctx.paragraph(owner)?;
        let element = node
            .element
            .ok_or_else(|| LayoutError::invariant("segment owner has no element"))?;
        (element, node.last_format_cch, node.segment()?.first_child)
    };
    let Some((content_start, _)) = host.content.content_range(element) else {
        return Err(LayoutError::StaleHandle { kind: "element" });
    };
    let dtrs = ctx.pass_dirty.dtrs_from_range(content_start, old_cch.saturating_sub(2));
    if dtrs.is_empty() {
        return Ok(());
    }
    if dtrs.iter().any(|d| d.start < 0) {
        log::debug!("change precedes the children of {owner:?}; rebuilding its segment");
        ctx.paragraph_mut(owner)?.segment_mut()?.full_recalc = true;
        return Ok(());
    }

    let mut old = Vec::new();
    let mut offset = 0;
    for id in chain(ctx, first_child) {
        let node = ctx.paragraph(id)?;
        old.push(OldChild {
            id,
            start: offset,
            cch: node.last_format_cch,
            is_text: node.tag() == ParagraphKindTag::Text,
        });
        offset += node.last_format_cch;
    }
    let n = old.len();

    let mut drafts: Vec<Draft> = dtrs.iter().map(|dtr| draft(&old, *dtr)).collect();
    drafts = merge(drafts, n);

    let mut keep = vec![true; n];
    for d in &drafts {
        for k in keep.iter_mut().take(d.sync.min(n)).skip(d.first.saturating_add(1)) {
            *k = false;
        }
    }
    for (child, keep) in old.iter().zip(&keep) {
        if !keep {
            dispose(ctx, child.id)?;
        }
    }
    for (child, keep) in old.iter().zip(&keep) {
        if !keep {
            continue;
        }
        let shift: isize = dtrs
            .iter()
            .filter(|d| d.old_end() <= child.start as isize)
            .map(|d| d.delta())
            .sum();
        let shifted = (content_start + child.start) as isize + shift;
        ctx.paragraph_mut(child.id)?.cp_first = shifted.max(0) as usize;
    }

    let count = drafts.len();
    let mut head: Option<Box<UpdateRecord>> = None;
    for d in drafts.into_iter().rev() {
        head = Some(Box::new(UpdateRecord {
            dtr: d.dtr,
            first: old.get(d.first).map(|c| c.id),
            first_offset: d.first_offset,
            change: d.change,
            sync: old.get(d.sync).map(|c| c.id),
            in_processing: false,
            next: head,
        }));
    }
    log::debug!("{count} update record(s) for {owner:?}");
    ctx.stats.update_records += count;
    ctx.paragraph_mut(owner)?.segment_mut()?.update = head;
    Ok(())
}

fn draft(old: &[OldChild], dtr: DirtyTextRange) -> Draft {
    let n = old.len();
    let s = dtr.start as usize;
    let dtr_end = s + dtr.removed;

    let mut first = n;
    let mut change = ChangeKind::New;
    for (i, child) in old.iter().enumerate() {
        if child.start == s {
            first = i;
            break;
        }
        if child.start < s && (s < child.end() || (s == child.end() && child.is_text)) {
            first = i;
            change = ChangeKind::Inside;
            break;
        }
        if child.start > s {
            first = i;
            break;
        }
    }

    let sync = if first == n {
        n
    } else {
        let x = (first..n).find(|&j| match change {
            ChangeKind::Inside => old[j].end() >= dtr_end,
            _ => old[j].end() > dtr_end,
        });
        match x {
            Some(j) if old[j].start >= dtr_end => j,
            Some(j) => j + 1,
            None => n,
        }
    };

    let first_offset = match change {
        ChangeKind::Inside => s - old[first].start,
        _ => 0,
    };
    Draft { dtr, first, first_offset, change, sync }
}

/// Merge records whose ranges overlap or share a boundary.
fn merge(drafts: Vec<Draft>, n: usize) -> Vec<Draft> {
    let mut out: Vec<Draft> = Vec::with_capacity(drafts.len());
    for d in drafts {
        if let Some(last) = out.last_mut() {
            if d.first <= last.sync || last.sync >= n {
                if last.change != d.change {
                    last.change = ChangeKind::Inside;
                }
                if last.first >= n {
                    last.first = d.first;
                }
                last.sync = last.sync.max(d.sync);
                continue;
            }
        }
        out.push(d);
    }
    out
}

/// Drop the head record once its sync node has been reached.
pub fn pop_record(ctx: &mut EngineContext, owner: ParaId) -> Result<()> {
    let seg = ctx.paragraph_mut(owner)?.segment_mut()?;
    seg.update = seg.update.take().and_then(|r| r.next);
    Ok(())
}
