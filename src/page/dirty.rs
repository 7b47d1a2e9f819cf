//! # Dirty Text Ranges
//!
//! Content mutations are recorded as `{start, removed, added}` triples. The
//! list keeps them sorted and coalesced: each stored range is expressed in
//! current (post-mutation) positions, and no two stored ranges overlap or
//! touch.

use serde::Serialize;

/// One changed region of the content.
///
/// `start` is a position; `removed` symbols that used to follow it were
/// replaced by `added` new ones. In a list the start is in current
/// coordinates. Ranges handed out by [`DirtyRangeList::dtrs_from_range`]
/// are rebased to a container's start in its old coordinates, and may be
/// negative when the change began before the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirtyTextRange {
    pub start: isize,
    pub removed: usize,
    pub added: usize,
}

impl DirtyTextRange {
    pub fn new(start: usize, removed: usize, added: usize) -> Self {
        Self { start: start as isize, removed, added }
    }

    /// End of the replaced region in old coordinates.
    pub fn old_end(&self) -> isize {
        self.start + self.removed as isize
    }

    /// End of the replacement in new coordinates.
    pub fn new_end(&self) -> isize {
        self.start + self.added as isize
    }

    pub fn delta(&self) -> isize {
        self.added as isize - self.removed as isize
    }
}

/// Coalescing list of dirty ranges for one document.
#[derive(Debug, Clone, Default)]
pub struct DirtyRangeList {
    ranges: Vec<DirtyTextRange>,
}

impl DirtyRangeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[DirtyTextRange] {
        &self.ranges
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Record a mutation. `range.start` is in current coordinates, i.e. it
    /// already accounts for every range recorded before it.
    pub fn add(&mut self, range: DirtyTextRange) {
        let r_start = range.start;
        let r_end = range.old_end();

        let mut merged_start = r_start;
        let mut merged_end = r_end;
        let mut sum_removed = 0usize;
        let mut sum_added = 0usize;
        let mut first = None;
        let mut last = None;

        for (i, e) in self.ranges.iter().enumerate() {
            let touches = e.start <= r_end && r_start <= e.new_end();
            if touches {
                first.get_or_insert(i);
                last = Some(i);
                merged_start = merged_start.min(e.start);
                merged_end = merged_end.max(e.new_end());
                sum_removed += e.removed;
                sum_added += e.added;
            }
        }

        let delta = range.delta();
        match (first, last) {
            (Some(first), Some(last)) => {
                let union = (merged_end - merged_start) as usize;
                let merged = DirtyTextRange {
                    start: merged_start,
                    removed: union + sum_removed - sum_added,
                    added: union + range.added - range.removed,
                };
                self.ranges.splice(first..=last, std::iter::once(merged));
                for e in self.ranges.iter_mut().skip(first + 1) {
                    e.start += delta;
                }
            }
            _ => {
                let at = self.ranges.partition_point(|e| e.start < r_start);
                for e in self.ranges.iter_mut().skip(at) {
                    e.start += delta;
                }
                self.ranges.insert(at, range);
            }
        }
    }

    /// Ranges that touch a container which now starts at `offset_new` and
    /// spanned `old_len` positions when it was last formatted.
    ///
    /// Returned starts are relative to the container's start, in the
    /// container's old coordinates. A negative start means the change began
    /// before the container.
    pub fn dtrs_from_range(&self, offset_new: usize, old_len: usize) -> Vec<DirtyTextRange> {
        let offset_new = offset_new as isize;
        let old_len = old_len as isize;
        let mut inside_delta = 0isize;
        let mut out = Vec::new();

        for e in &self.ranges {
            if e.new_end() <= offset_new && e.start < offset_new {
                continue;
            }
            if e.start < offset_new {
                // Straddles the container start.
                out.push(DirtyTextRange {
                    start: e.start - offset_new,
                    removed: e.removed,
                    added: e.added,
                });
                inside_delta += e.delta();
                continue;
            }
            let old_rel = e.start - offset_new - inside_delta;
            if old_rel > old_len {
                break;
            }
            out.push(DirtyTextRange {
                start: old_rel,
                removed: e.removed,
                added: e.added,
            });
            inside_delta += e.delta();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn disjoint_ranges_stay_sorted_and_shift() {
        let mut list = DirtyRangeList::new();
        list.add(DirtyTextRange::new(50, 0, 5));
        list.add(DirtyTextRange::new(10, 2, 0));
        assert_eq!(list.ranges()[0], DirtyTextRange::new(10, 2, 0));
        assert_eq!(list.ranges()[1], DirtyTextRange::new(48, 0, 5));
    }

    #[test]
    fn overlapping_ranges_coalesce() {
        let mut list = DirtyRangeList::new();
        list.add(DirtyTextRange::new(10, 0, 5)); // now [10,15) is new text
        list.add(DirtyTextRange::new(12, 6, 1)); // replace [12,18)
        assert_eq!(list.len(), 1);
        // Old [10, 13) became two inserted symbols plus one replacement.
        assert_eq!(list.ranges()[0], DirtyTextRange::new(10, 3, 3));
    }

    #[test]
    fn adjacent_ranges_coalesce() {
        let mut list = DirtyRangeList::new();
        list.add(DirtyTextRange::new(10, 0, 2));
        list.add(DirtyTextRange::new(12, 0, 3));
        assert_eq!(list.ranges(), &[DirtyTextRange::new(10, 0, 5)]);
    }

    #[test]
    fn query_rebases_to_container_start() {
        let mut list = DirtyRangeList::new();
        list.add(DirtyTextRange::new(2, 0, 4)); // before the container
        list.add(DirtyTextRange::new(26, 3, 5)); // inside: old position 22
        list.add(DirtyTextRange::new(200, 1, 0)); // after
        // Container used to start at 10; it now starts at 14.
        let dtrs = list.dtrs_from_range(14, 30);
        assert_eq!(dtrs, vec![DirtyTextRange { start: 12, removed: 3, added: 5 }]);
    }

    #[test]
    fn query_reports_straddling_change_as_negative() {
        let mut list = DirtyRangeList::new();
        list.add(DirtyTextRange::new(5, 10, 10));
        let dtrs = list.dtrs_from_range(8, 20);
        assert_eq!(dtrs.len(), 1);
        assert!(dtrs[0].start < 0);
    }

    #[test]
    fn insertion_at_container_end_is_included() {
        let mut list = DirtyRangeList::new();
        list.add(DirtyTextRange::new(30, 0, 4));
        let dtrs = list.dtrs_from_range(10, 20);
        assert_eq!(dtrs, vec![DirtyTextRange { start: 20, removed: 0, added: 4 }]);
    }

    proptest! {
        /// Applying the recorded ranges to a model string must reproduce the
        /// edited string's length, however the edits overlapped.
        #[test]
        fn coalesced_ranges_account_for_every_symbol(
            edits in prop::collection::vec((0usize..60, 0usize..6, 0usize..6), 1..12)
        ) {
            let mut len = 100usize;
            let mut list = DirtyRangeList::new();
            for (start, removed, added) in edits {
                let start = start.min(len);
                let removed = removed.min(len - start);
                list.add(DirtyTextRange::new(start, removed, added));
                len = len - removed + added;
            }
            let delta: isize = list.ranges().iter().map(|r| r.delta()).sum();
            prop_assert_eq!(100isize + delta, len as isize);
            for pair in list.ranges().windows(2) {
                prop_assert!(pair[0].new_end() < pair[1].start);
            }
        }
    }
}
