//! # Margin Collapsing
//!
//! Adjoining vertical margins are not added: the largest positive margin and
//! the most negative margin of the adjoining set are summed. While a margin
//! is still open (no border, padding or content has been reached yet) it
//! travels between formatting calls as a [`MarginCollapsingState`].
//!
//! The state has a single owner at a time. It is moved into the next
//! formatting call and either realized into concrete space or handed back
//! as part of that call's result; [`MarginCollapsingState::duplicate`]
//! exists for the few places that must format speculatively.

use super::mbp::MbpInfo;
use super::LayoutUnit;

/// An open, adjoining vertical margin.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct MarginCollapsingState {
    max_positive: LayoutUnit,
    min_negative: LayoutUnit,
}

impl MarginCollapsingState {
    pub fn new(margin: LayoutUnit) -> Self {
        let mut state = Self::default();
        state.append(margin);
        state
    }

    /// Fold another adjoining margin into this one.
    pub fn append(&mut self, margin: LayoutUnit) {
        if margin > 0 {
            self.max_positive = self.max_positive.max(margin);
        } else if margin < 0 {
            self.min_negative = self.min_negative.min(margin);
        }
    }

    /// Fold another open state into this one, consuming it.
    pub fn collapse(&mut self, other: MarginCollapsingState) {
        self.max_positive = self.max_positive.max(other.max_positive);
        self.min_negative = self.min_negative.min(other.min_negative);
    }

    /// The concrete space this margin occupies once realized.
    pub fn margin(&self) -> LayoutUnit {
        self.max_positive + self.min_negative
    }

    pub fn is_zero(&self) -> bool {
        self.max_positive == 0 && self.min_negative == 0
    }

    pub fn duplicate(&self) -> MarginCollapsingState {
        MarginCollapsingState {
            max_positive: self.max_positive,
            min_negative: self.min_negative,
        }
    }
}

/// Realize an optional open margin into concrete space.
pub fn realize(mcs: Option<MarginCollapsingState>) -> LayoutUnit {
    mcs.map(|m| m.margin()).unwrap_or(0)
}

/// Collapse an element's top margin with the incoming open margin.
///
/// Returns the still-open margin (if any) and the space to leave above the
/// element's border box. When the element has a top border or padding the
/// margin closes there and the combined value is returned as space.
pub fn collapse_top_margin(
    mbp: &MbpInfo,
    incoming: Option<MarginCollapsingState>,
) -> (Option<MarginCollapsingState>, LayoutUnit) {
    let had_incoming = incoming.is_some();
    let mut state = MarginCollapsingState::new(mbp.margin.top);
    if let Some(open) = incoming {
        state.collapse(open);
    }

    if mbp.bp.top != 0 {
        (None, state.margin())
    } else if !had_incoming && mbp.margin.top == 0 {
        (None, 0)
    } else {
        (Some(state), 0)
    }
}

/// Collapse an element's bottom margin with the open margin coming out of
/// its last child.
///
/// Returns the open margin leaving the element and the space to realize
/// inside it, above its bottom border. Only called when the element
/// completes on this page.
pub fn collapse_bottom_margin(
    mbp: &MbpInfo,
    incoming: Option<MarginCollapsingState>,
) -> (Option<MarginCollapsingState>, LayoutUnit) {
    if mbp.bp.bottom != 0 {
        let inner = realize(incoming);
        let outgoing = (mbp.margin.bottom != 0).then(|| MarginCollapsingState::new(mbp.margin.bottom));
        return (outgoing, inner);
    }

    match incoming {
        Some(mut open) => {
            open.append(mbp.margin.bottom);
            (Some(open), 0)
        }
        None if mbp.margin.bottom != 0 => (Some(MarginCollapsingState::new(mbp.margin.bottom)), 0),
        None => (None, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Thickness;
    use proptest::prelude::*;

    fn mbp(top: LayoutUnit, bottom: LayoutUnit, bp: LayoutUnit) -> MbpInfo {
        let mut m = MbpInfo::empty();
        m.margin = Thickness::new(0, top, 0, bottom);
        m.padding = Thickness::new(0, bp, 0, bp);
        m.bp = m.padding;
        m.mbp = m.margin.sum(&m.bp);
        m
    }

    #[test]
    fn adjacent_margins_collapse_to_the_larger() {
        let first = mbp(0, 300, 0);
        let second = mbp(500, 0, 0);
        let (open, space) = collapse_bottom_margin(&first, None);
        assert_eq!(space, 0);
        let (open, space) = collapse_top_margin(&second, open);
        assert_eq!(space, 0);
        assert_eq!(realize(open), 500);
    }

    #[test]
    fn negative_margins_sum_with_largest_positive() {
        let mut s = MarginCollapsingState::new(400);
        s.append(-100);
        s.append(200);
        s.append(-250);
        assert_eq!(s.margin(), 150);
    }

    #[test]
    fn padding_closes_top_margin() {
        let outer = mbp(200, 0, 30);
        let (open, space) = collapse_top_margin(&outer, Some(MarginCollapsingState::new(600)));
        assert!(open.is_none());
        assert_eq!(space, 600);
    }

    #[test]
    fn no_margin_and_no_incoming_yields_nothing() {
        let (open, space) = collapse_top_margin(&mbp(0, 0, 0), None);
        assert!(open.is_none());
        assert_eq!(space, 0);
    }

    #[test]
    fn bottom_border_realizes_child_margin_inside() {
        let outer = mbp(0, 100, 30);
        let (open, inner) = collapse_bottom_margin(&outer, Some(MarginCollapsingState::new(250)));
        assert_eq!(inner, 250);
        assert_eq!(realize(open), 100);
    }

    proptest! {
        #[test]
        fn gap_between_siblings_is_max_not_sum(a in 0..50_000i32, b in 0..50_000i32) {
            let (open, _) = collapse_bottom_margin(&mbp(0, a, 0), None);
            let (open, _) = collapse_top_margin(&mbp(b, 0, 0), open);
            prop_assert_eq!(realize(open), a.max(b));
        }
    }
}
