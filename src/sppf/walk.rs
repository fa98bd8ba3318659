//! # Forest Walkers
//!
//! Three traversal shapes over an [`Sppf`](super::Sppf):
//!
//! - [`Walker`] passes through the nodes literally from a start point:
//!   walk left, walk right, or backtrack the way it came (never above
//!   the start).
//! - [`NonTerminalWalker`] iterates the immediate nonterminal symbol
//!   descendants of the start node, hiding packed and intermediate
//!   plumbing.
//! - [`SubProductionWalker`] additionally descends, on construction,
//!   through nonterminal nestings that cover exactly the start node's
//!   token range, then behaves like [`NonTerminalWalker`].
//!
//! All three are explicit state machines over a trail of child
//! positions; the trail is what makes backtracking cheap and the
//! traversal order easy to reason about.

use super::{Sppf, SppfId, SppfKind};

/// Raw walker: a trail of `(node, child index)` positions below the
/// start node.
pub struct Walker<'a> {
    sppf: &'a Sppf,
    start: SppfId,
    trail: Vec<(SppfId, usize)>,
}

impl<'a> Walker<'a> {
    #[must_use]
    pub fn new(sppf: &'a Sppf, start: SppfId) -> Self {
        Self {
            sppf,
            start,
            trail: Vec::new(),
        }
    }

    #[must_use]
    pub const fn sppf(&self) -> &'a Sppf {
        self.sppf
    }

    #[must_use]
    pub const fn start(&self) -> SppfId {
        self.start
    }

    /// The node currently walked to (the start node while the trail is
    /// empty).
    #[must_use]
    pub fn node(&self) -> SppfId {
        self.trail
            .last()
            .map_or(self.start, |&(parent, index)| {
                self.sppf.node(parent).children()[index]
            })
    }

    #[must_use]
    pub fn at_start(&self) -> bool {
        self.trail.is_empty()
    }

    /// Descend to the leftmost child; failing that, backtrack (never
    /// past `stop_at`) until a left turn is possible.
    pub fn walk_left(&mut self, stop_at: Option<SppfId>) -> bool {
        let mut pos = self.node();
        if self.sppf.node(pos).has_children() {
            self.trail.push((pos, 0));
            return true;
        }

        let mut prev = pos;
        while Some(pos) != stop_at && self.backtrack() {
            pos = self.node();
            if self.sppf.node(pos).children()[0] != prev {
                self.trail.push((pos, 0));
                return true;
            }
            prev = pos;
        }
        false
    }

    /// Descend to the right-hand child (the only child when there is
    /// just one, the first when the children are packed); failing that,
    /// backtrack until a right turn is possible.
    pub fn walk_right(&mut self, stop_at: Option<SppfId>) -> bool {
        let mut pos = self.node();
        let children = self.sppf.node(pos).children();
        if !children.is_empty() {
            let mut index = 0;
            if !self.sppf.node(children[0]).is_packed() && children.len() > 1 {
                index = 1;
            }
            self.trail.push((pos, index));
            return true;
        }

        let mut prev = pos;
        while Some(pos) != stop_at && self.backtrack() {
            pos = self.node();
            let children = self.sppf.node(pos).children();
            let index = usize::from(children.len() > 1);
            if children[index] != prev {
                self.trail.push((pos, index));
                return true;
            }
            prev = pos;
        }
        false
    }

    /// Step back up one level. `false` when already at the start.
    pub fn backtrack(&mut self) -> bool {
        self.trail.pop().is_some()
    }

    /// Forget the trail and restart from `new_start`.
    pub fn reset(&mut self, new_start: SppfId) {
        self.trail.clear();
        self.start = new_start;
    }

    /// Splice another walker's trail below this one; `other` must have
    /// started at this walker's current node.
    fn extend(&mut self, other: Self) {
        debug_assert_eq!(other.start, self.node());
        self.trail.extend(other.trail);
    }
}

/// Iterator over the immediate nonterminal symbol descendants of a
/// node. Terminals, intermediates and packed nodes are stepped over; on
/// the way back up, a walker that arrived from a left child crosses to
/// the right sibling.
pub struct NonTerminalWalker<'a> {
    walker: Walker<'a>,
    finish: SppfId,
}

impl<'a> NonTerminalWalker<'a> {
    #[must_use]
    pub fn new(sppf: &'a Sppf, start: SppfId) -> Self {
        let mut this = Self {
            walker: Walker::new(sppf, start),
            finish: start,
        };
        this.advance();
        this
    }

    fn valid(&self) -> bool {
        !self.walker.at_start() && self.walker.node() != self.finish
    }

    /// The nonterminal currently walked to, without advancing.
    #[must_use]
    pub fn peek(&self) -> Option<SppfId> {
        if self.valid() { Some(self.walker.node()) } else { None }
    }

    /// Move to the next nonterminal symbol node, if any.
    pub fn advance(&mut self) {
        let sppf = self.walker.sppf;
        let mut pos = self.walker.node();

        loop {
            if self.walker.at_start() {
                if !self.walker.walk_left(Some(self.finish)) {
                    break;
                }
            } else if sppf.node(pos).is_symbol() {
                // came from a symbol we already delivered: climb until a
                // right-hand sibling can be taken
                loop {
                    if !self.walker.backtrack() {
                        return;
                    }
                    let prev = pos;
                    pos = self.walker.node();
                    let children = sppf.node(pos).children();

                    /* packed children represent separate parses, not a
                       binarised left/right pair; only cross right when we
                       came up out of the left-hand one of two children */
                    if !sppf.node(prev).is_packed()
                        && children.len() > 1
                        && children[0] == prev
                    {
                        self.walker.walk_right(Some(self.finish));
                        break;
                    }
                }
            } else if !self.walker.walk_left(Some(pos))
                && !self.walker.walk_right(Some(self.finish))
            {
                return;
            }

            pos = self.walker.node();
            if pos == self.finish || sppf.node(pos).kind() == SppfKind::NonTerminal {
                break;
            }
        }
    }
}

impl Iterator for NonTerminalWalker<'_> {
    type Item = SppfId;

    fn next(&mut self) -> Option<SppfId> {
        let current = self.peek()?;
        self.advance();
        Some(current)
    }
}

/// Like [`NonTerminalWalker`], but skips pure pass-through nestings
/// first: on construction it descends while the walked-to nonterminal
/// covers exactly the same token range as the node it descended from.
pub struct SubProductionWalker<'a> {
    inner: NonTerminalWalker<'a>,
}

impl<'a> SubProductionWalker<'a> {
    #[must_use]
    pub fn new(sppf: &'a Sppf, start: SppfId) -> Self {
        let mut this = Self {
            inner: NonTerminalWalker::new(sppf, start),
        };
        this.bypass_identical_children();
        this
    }

    /// The nonterminal currently walked to, without advancing.
    #[must_use]
    pub fn peek(&self) -> Option<SppfId> {
        self.inner.peek()
    }

    fn bypass_identical_children(&mut self) {
        let sppf = self.inner.walker.sppf;
        let start = self.inner.walker.start;

        let Some(mut pos) = self.inner.peek() else {
            return;
        };
        if !sppf.node(pos).same_extent(sppf.node(start)) {
            return;
        }

        loop {
            let child = NonTerminalWalker::new(sppf, pos);
            let Some(child_node) = child.peek() else {
                break;
            };
            if !sppf.node(child_node).same_extent(sppf.node(pos)) {
                break;
            }
            self.inner.walker.extend(child.walker);
            pos = self.inner.walker.node();
        }
    }
}

impl Iterator for SubProductionWalker<'_> {
    type Item = SppfId;

    fn next(&mut self) -> Option<SppfId> {
        let current = self.inner.peek()?;
        self.inner.advance();
        Some(current)
    }
}

/// Number of immediate nonterminal descendants under `node`.
#[must_use]
pub fn count_non_terminals(sppf: &Sppf, node: SppfId) -> usize {
    sppf.non_terminals(node).count()
}
