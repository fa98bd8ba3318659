//! # Shared Packed Parse Forest
//!
//! An SPPF represents every grammar traversal that matched a given
//! sequence of input tokens, ambiguities included; it is the parse-tree
//! concept extended to a DAG. Nodes come in four variants:
//!
//! - **Terminal symbol** nodes wrap one matched token (possibly the
//!   empty match at a position) and have no children.
//! - **Nonterminal symbol** nodes are labelled with a nonterminal and
//!   the (possibly empty) range of tokens it covered.
//! - **Intermediate** nodes represent a partially matched rule; they are
//!   labelled with a grammar slot and binarise the forest so the GLL
//!   algorithm stays within cubic bounds.
//! - **Packed** nodes represent one complete parse of their parent, are
//!   labelled with a grammar slot plus a pivot token, and have at most
//!   two children.
//!
//! Rules to remember: symbol and intermediate nodes have either packed
//! children or up-to-two non-packed children, never a mixture; more than
//! one packed child means the parse was ambiguous; packed nodes only
//! have symbol or intermediate children.
//!
//! Nodes live in an arena addressed by [`SppfId`] and are shared: two
//! parses that agree on (variant, label, token range) get the same
//! handle. Traversal is provided by the walkers in [`walk`].

pub mod dot;
pub mod walk;

use crate::grammar::{Grammar, NonTerminal, Slot};
use crate::token::{TokenBuf, TokenId, TokenKind};
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use walk::{NonTerminalWalker, SubProductionWalker, Walker};

/// Handle of a node within an [`Sppf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SppfId(u32);

impl SppfId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The four node variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SppfKind {
    NonTerminal,
    Terminal,
    Packed,
    Intermediate,
}

/// Node label: variant plus the grammar object it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Label {
    Terminal,
    NonTerminal(NonTerminal),
    Intermediate(Slot),
    Packed(Slot),
}

/// One node of the forest.
pub struct SppfNode {
    label: Label,
    /// `None` for an empty match; `last` then records the position.
    first: Option<TokenId>,
    last: TokenId,
    children: SmallVec<[SppfId; 2]>,
    aux: Option<Rc<dyn Any>>,
}

impl fmt::Debug for SppfNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SppfNode")
            .field("label", &self.label)
            .field("first", &self.first)
            .field("last", &self.last)
            .field("children", &self.children)
            .field("aux", &self.aux.is_some())
            .finish()
    }
}

impl SppfNode {
    #[must_use]
    pub const fn kind(&self) -> SppfKind {
        match self.label {
            Label::Terminal => SppfKind::Terminal,
            Label::NonTerminal(_) => SppfKind::NonTerminal,
            Label::Intermediate(_) => SppfKind::Intermediate,
            Label::Packed(_) => SppfKind::Packed,
        }
    }

    /// First token covered; `None` if the node matched zero tokens.
    #[must_use]
    pub const fn first_token(&self) -> Option<TokenId> {
        self.first
    }

    /// Last token covered, or the stream position for an empty node.
    #[must_use]
    pub const fn last_token(&self) -> TokenId {
        self.last
    }

    /// Whether the node matched zero tokens.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    #[must_use]
    pub fn children(&self) -> &[SppfId] {
        &self.children
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    #[must_use]
    pub const fn is_symbol(&self) -> bool {
        matches!(self.label, Label::Terminal | Label::NonTerminal(_))
    }

    #[must_use]
    pub const fn is_packed(&self) -> bool {
        matches!(self.label, Label::Packed(_))
    }

    /// The grammar slot labelling an intermediate or packed node.
    #[must_use]
    pub const fn slot(&self) -> Option<Slot> {
        match self.label {
            Label::Intermediate(slot) | Label::Packed(slot) => Some(slot),
            _ => None,
        }
    }

    /// The nonterminal labelling a nonterminal symbol node.
    #[must_use]
    pub const fn nonterminal_label(&self) -> Option<NonTerminal> {
        match self.label {
            Label::NonTerminal(nt) => Some(nt),
            _ => None,
        }
    }

    /// Whether both nodes cover the same token extents.
    #[must_use]
    pub fn same_extent(&self, other: &Self) -> bool {
        self.first == other.first && self.last == other.last
    }
}

/// Content identity used for sharing symbol and intermediate nodes.
/// Packed nodes are canonicalized within their parent instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeKey {
    label: Label,
    first: Option<TokenId>,
    last: TokenId,
}

/// The forest arena.
#[derive(Default)]
pub struct Sppf {
    nodes: Vec<SppfNode>,
    canonical: HashMap<NodeKey, SppfId, ahash::RandomState>,
}

impl fmt::Debug for Sppf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sppf").field("nodes", &self.nodes).finish()
    }
}

impl Sppf {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: SppfId) -> &SppfNode {
        &self.nodes[id.index()]
    }

    /// Iterate over all node handles in creation order.
    pub fn ids(&self) -> impl Iterator<Item = SppfId> {
        (0..self.nodes.len() as u32).map(SppfId)
    }

    fn intern(&mut self, label: Label, first: Option<TokenId>, last: TokenId) -> SppfId {
        let key = NodeKey { label, first, last };
        if let Some(&existing) = self.canonical.get(&key) {
            return existing;
        }
        let id = self.push(label, first, last);
        self.canonical.insert(key, id);
        id
    }

    fn push(&mut self, label: Label, first: Option<TokenId>, last: TokenId) -> SppfId {
        let id = SppfId(u32::try_from(self.nodes.len()).expect("forest overflow"));
        self.nodes.push(SppfNode {
            label,
            first,
            last,
            children: SmallVec::new(),
            aux: None,
        });
        id
    }

    /// The canonical terminal symbol node for `token`.
    pub(crate) fn get_node_t(&mut self, token: TokenId) -> SppfId {
        self.intern(Label::Terminal, Some(token), token)
    }

    /// The canonical empty node at `position`.
    pub(crate) fn get_empty_node_at(&mut self, position: TokenId) -> SppfId {
        self.intern(Label::Terminal, None, position)
    }

    pub(crate) fn intern_nonterminal(
        &mut self,
        nonterminal: NonTerminal,
        first: Option<TokenId>,
        last: TokenId,
    ) -> SppfId {
        self.intern(Label::NonTerminal(nonterminal), first, last)
    }

    pub(crate) fn intern_intermediate(
        &mut self,
        slot: Slot,
        first: Option<TokenId>,
        last: TokenId,
    ) -> SppfId {
        self.intern(Label::Intermediate(slot), first, last)
    }

    /// Create a packed node labelled `(slot, pivot)`; not canonicalized
    /// globally.
    pub(crate) fn new_packed(&mut self, slot: Slot, pivot: TokenId, empty: bool) -> SppfId {
        let first = if empty { None } else { Some(pivot) };
        self.push(Label::Packed(slot), first, pivot)
    }

    /// Look up an existing packed child of `parent` with the given
    /// label.
    pub(crate) fn find_packed_child(
        &self,
        parent: SppfId,
        slot: Slot,
        pivot: TokenId,
        empty: bool,
    ) -> Option<SppfId> {
        for &child_id in self.node(parent).children() {
            let child = self.node(child_id);
            if child.slot() == Some(slot) && child.is_packed() {
                if empty && child.is_empty() && child.last == pivot {
                    return Some(child_id);
                }
                if !empty && !child.is_empty() && child.first == Some(pivot) {
                    return Some(child_id);
                }
            }
        }
        None
    }

    /// Attach `child` to `parent`. A packed child added to a node that
    /// already has children is prepended, which makes a late-discovered
    /// ambiguity visible to post-parse actions.
    pub(crate) fn add_child(&mut self, parent: SppfId, child: SppfId) {
        debug_assert_ne!(parent, child, "node cannot be its own child");
        let prepend = self.node(child).is_packed() && self.node(parent).has_children();
        let children = &mut self.nodes[parent.index()].children;
        if prepend {
            children.insert(0, child);
        } else {
            children.push(child);
        }
    }

    #[must_use]
    pub fn first_child(&self, id: SppfId) -> Option<SppfId> {
        self.node(id).children().first().copied()
    }

    #[must_use]
    pub fn last_child(&self, id: SppfId) -> Option<SppfId> {
        self.node(id).children().last().copied()
    }

    /// Number of tokens covered by a node.
    #[must_use]
    pub fn count_tokens(&self, id: SppfId) -> usize {
        let node = self.node(id);
        match node.first {
            None => 0,
            Some(first) => node.last.index() - first.index() + 1,
        }
    }

    /// Byte offset where the node's match begins (the position offset
    /// for an empty node).
    #[must_use]
    pub fn start_offset(&self, id: SppfId, tokens: &TokenBuf) -> u32 {
        let node = self.node(id);
        tokens.get(node.first.unwrap_or(node.last)).offset()
    }

    /// Byte offset just past the node's match. A trailing empty child
    /// can extend the range past the last matched token.
    #[must_use]
    pub fn end_offset(&self, id: SppfId, tokens: &TokenBuf) -> u32 {
        let node = self.node(id);
        let last = tokens.get(node.last);
        let mut offset = last.offset();
        if !node.is_empty() {
            offset += last.bytes();
        }

        if let Some(last_child) = self.last_child(id)
            && self.node(last_child).is_empty()
        {
            offset = offset.max(self.end_offset(last_child, tokens));
        }

        offset
    }

    /// Covered length in bytes.
    #[must_use]
    pub fn size(&self, id: SppfId, tokens: &TokenBuf) -> u32 {
        self.end_offset(id, tokens) - self.start_offset(id, tokens)
    }

    /// Reconstruct the covered text from token spellings. A space is
    /// inserted before a token flagged as preceded-by-whitespace or
    /// starts-line. `max_tokens < 0` means no limit; truncation is
    /// marked with `...`.
    #[must_use]
    pub fn content(&self, id: SppfId, tokens: &TokenBuf, max_tokens: i32) -> String {
        use crate::token::{TF_SPACE_BEFORE, TF_STARTS_LINE};

        let node = self.node(id);
        let Some(first) = node.first else {
            return String::new();
        };

        let mut content = String::new();
        for (i, index) in (first.index()..=node.last.index()).enumerate() {
            if max_tokens >= 0 && i >= max_tokens as usize {
                content.push_str("...");
                break;
            }
            let token = tokens.get(TokenId(index as u32));
            if i > 0 && token.flags() & (TF_SPACE_BEFORE | TF_STARTS_LINE) != 0 {
                content.push(' ');
            }
            content.push_str(token.spelling());
        }
        content
    }

    /// The nonterminal associated with a node: its own label for a
    /// nonterminal symbol node, the owning rule's nonterminal for
    /// intermediate and packed nodes.
    #[must_use]
    pub fn node_nonterminal(&self, id: SppfId, grammar: &Grammar) -> Option<NonTerminal> {
        match self.node(id).label {
            Label::NonTerminal(nt) => Some(nt),
            Label::Intermediate(slot) | Label::Packed(slot) => {
                Some(grammar.rule_nonterminal(slot.rule))
            }
            Label::Terminal => None,
        }
    }

    /// The matched terminal kind of a single-token terminal node.
    #[must_use]
    pub fn terminal_kind(&self, id: SppfId, tokens: &TokenBuf) -> Option<TokenKind> {
        let node = self.node(id);
        match (node.label, node.first) {
            (Label::Terminal, Some(first)) => Some(tokens.get(first).kind()),
            _ => None,
        }
    }

    /// Whether the node is a single token of the given kind.
    #[must_use]
    pub fn is_kind(&self, id: SppfId, kind: TokenKind, tokens: &TokenBuf) -> bool {
        let node = self.node(id);
        node.first.is_some() && node.first == Some(node.last) && tokens.get(node.last).is(kind)
    }

    /// Whether the node represents `nonterminal`, either directly or
    /// through a chain of same-extent nonterminal children.
    #[must_use]
    pub fn is_nonterminal(&self, id: SppfId, nonterminal: NonTerminal, grammar: &Grammar) -> bool {
        self.position_of(id, nonterminal, grammar).is_some()
    }

    /// Like [`is_nonterminal`](Self::is_nonterminal), but returns the
    /// node that actually carries the nonterminal.
    #[must_use]
    pub fn position_of(
        &self,
        id: SppfId,
        nonterminal: NonTerminal,
        grammar: &Grammar,
    ) -> Option<SppfId> {
        if self.node_nonterminal(id, grammar) == Some(nonterminal) {
            return Some(id);
        }

        let mut walker = NonTerminalWalker::new(self, id);
        while let Some(child) = walker.peek() {
            if !self.node(child).same_extent(self.node(id)) {
                break;
            }
            if self.node(child).nonterminal_label() == Some(nonterminal) {
                return Some(child);
            }
            walker = NonTerminalWalker::new(self, child);
        }
        None
    }

    /// Search the sub-productions below `id` for `nonterminal`,
    /// descending at most `max_depth` levels (`-1` for unbounded).
    #[must_use]
    pub fn find(
        &self,
        id: SppfId,
        nonterminal: NonTerminal,
        grammar: &Grammar,
        max_depth: i32,
    ) -> Option<SppfId> {
        if let Some(found) = self.position_of(id, nonterminal, grammar) {
            return Some(found);
        }
        if max_depth == 0 {
            return None;
        }

        let children: Vec<SppfId> = self.sub_productions(id).collect();
        for &child in &children {
            if let Some(found) = self.position_of(child, nonterminal, grammar) {
                return Some(found);
            }
        }
        if max_depth != 1 {
            for &child in &children {
                if let Some(found) = self.find(child, nonterminal, grammar, max_depth - 1) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Attach an auxiliary value to a node, replacing any previous one.
    pub fn set_aux(&mut self, id: SppfId, value: Rc<dyn Any>) {
        self.nodes[id.index()].aux = Some(value);
    }

    /// The raw auxiliary value of a node.
    #[must_use]
    pub fn aux(&self, id: SppfId) -> Option<&Rc<dyn Any>> {
        self.node(id).aux.as_ref()
    }

    /// The auxiliary value of a node, downcast to `T`.
    #[must_use]
    pub fn aux_as<T: 'static>(&self, id: SppfId) -> Option<&T> {
        self.node(id).aux.as_ref()?.downcast_ref::<T>()
    }

    /// Content hash of a node: variant, label and token extents. Child
    /// lists and auxiliary data are not involved, so shared nodes hash
    /// identically across parses of the same input.
    #[must_use]
    pub fn node_hash(&self, id: SppfId) -> u64 {
        let node = self.node(id);
        let mut hasher = std::hash::DefaultHasher::new();
        node.label.hash(&mut hasher);
        node.first.hash(&mut hasher);
        node.last.hash(&mut hasher);
        hasher.finish()
    }

    /// Raw walker starting at `id`.
    #[must_use]
    pub fn walker(&self, id: SppfId) -> Walker<'_> {
        Walker::new(self, id)
    }

    /// Iterate over the immediate nonterminal symbol descendants of
    /// `id`.
    #[must_use]
    pub fn non_terminals(&self, id: SppfId) -> NonTerminalWalker<'_> {
        NonTerminalWalker::new(self, id)
    }

    /// Like [`non_terminals`](Self::non_terminals), but first descends
    /// through pass-through nestings covering the same extent as `id`.
    #[must_use]
    pub fn sub_productions(&self, id: SppfId) -> SubProductionWalker<'_> {
        SubProductionWalker::new(self, id)
    }
}

/// A successful parse: the forest, its root node, and the matched
/// tokens, owned together.
pub struct SppfRoot {
    forest: Sppf,
    root: SppfId,
    tokens: TokenBuf,
}

impl fmt::Debug for SppfRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SppfRoot")
            .field("forest", &self.forest)
            .field("root", &self.root)
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl SppfRoot {
    pub(crate) fn new(forest: Sppf, root: SppfId, tokens: TokenBuf) -> Self {
        Self {
            forest,
            root,
            tokens,
        }
    }

    #[must_use]
    pub fn root(&self) -> SppfId {
        self.root
    }

    #[must_use]
    pub fn forest(&self) -> &Sppf {
        &self.forest
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenBuf {
        &self.tokens
    }

    #[must_use]
    pub fn node(&self, id: SppfId) -> &SppfNode {
        self.forest.node(id)
    }

    /// Covered text of the whole match.
    #[must_use]
    pub fn content(&self) -> String {
        self.forest.content(self.root, &self.tokens, -1)
    }

    /// Whether the root represents `nonterminal`.
    #[must_use]
    pub fn is_nonterminal(&self, nonterminal: NonTerminal, grammar: &Grammar) -> bool {
        self.forest.is_nonterminal(self.root, nonterminal, grammar)
    }

    /// Find `nonterminal` at or below the root.
    #[must_use]
    pub fn find(&self, nonterminal: NonTerminal, grammar: &Grammar) -> Option<SppfId> {
        self.forest.find(self.root, nonterminal, grammar, -1)
    }

    /// The auxiliary value of a node, downcast to `T`.
    #[must_use]
    pub fn value_of<T: 'static>(&self, id: SppfId) -> Option<&T> {
        self.forest.aux_as(id)
    }
}
