//! # Grammar Model
//!
//! Definition of context-free grammars: nonterminals, rules, and the
//! terminal/nonterminal/predicate components that make up each rule,
//! plus the derived first-set / LL(1) / matches-empty analyses in
//! [`analysis`].
//!
//! A [`Grammar`] is an arena: nonterminals and rules are addressed by
//! the copyable handles [`NonTerminal`] and [`RuleId`], which makes
//! recursive and mutually recursive grammars straightforward to build:
//!
//! ```
//! use sylva::{Component, Grammar, TokenKind};
//!
//! const TOK_A: TokenKind = TokenKind::user(0);
//!
//! let mut g = Grammar::new();
//! let list = g.nonterminal("list");
//! // list := list 'a' | 'a'   (left recursion is fine under GLL)
//! g.rule(list, [Component::nt(list), Component::term(TOK_A)]).unwrap();
//! g.rule(list, [Component::term(TOK_A)]).unwrap();
//! assert!(!g.is_ll1(list));
//! ```
//!
//! Grammars are immutable during a parse; any structural change (adding
//! rules, toggling a rule) invalidates the cached analyses.

pub mod analysis;

use crate::lexer::Lexer;
use crate::parser::ParseState;
use crate::token::{TOK_NULL, TokenKind};
use analysis::NtAnalysis;
use std::fmt::{self, Write as _};
use std::sync::OnceLock;
use thiserror::Error;

/// Handle of a nonterminal within a [`Grammar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonTerminal(pub(crate) u32);

/// Handle of a rule within a [`Grammar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub(crate) u32);

/// A grammar slot: the address of one component position inside one
/// rule. Slots label intermediate and packed SPPF nodes and serve as GLL
/// return addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub rule: RuleId,
    pub pos: u16,
}

impl Slot {
    /// The slot one component further right in the same rule.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            rule: self.rule,
            pos: self.pos + 1,
        }
    }
}

/// Callback evaluated against the current parse state. Predicates gate
/// individual components; actions run before and after rules.
pub type Predicate = fn(&mut ParseState<'_>) -> bool;

/// Pre-/post-parse action registered on a nonterminal.
pub type Action = fn(&mut ParseState<'_>) -> bool;

/// Nonterminal display flags, OR-combinable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtFlags(u8);

/// Always hide this nonterminal's nodes from the forest.
pub const TRANSPARENT: NtFlags = NtFlags(1);
/// Hide a node when its rule is a single-nonterminal delegation.
pub const HIDE_IF_DELEGATE: NtFlags = NtFlags(1 << 1);
/// Preserve self-recursive children instead of flattening the spine.
pub const KEEP_RECURSION: NtFlags = NtFlags(1 << 2);

impl std::ops::BitOr for NtFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl NtFlags {
    const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// The payload of a component: what it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Symbol {
    NonTerminal(NonTerminal),
    Terminal(TokenKind),
}

/// One slot of a rule: a terminal, a nonterminal reference, or a bare
/// predicate, optionally marked optional and optionally guarded.
#[derive(Debug, Clone, Copy)]
pub struct Component {
    symbol: Symbol,
    optional: bool,
    predicate: Option<Predicate>,
}

impl Component {
    /// A terminal component. `TOK_NULL` matches any token.
    #[must_use]
    pub const fn term(kind: TokenKind) -> Self {
        Self {
            symbol: Symbol::Terminal(kind),
            optional: false,
            predicate: None,
        }
    }

    /// A nonterminal component.
    #[must_use]
    pub const fn nt(nonterminal: NonTerminal) -> Self {
        Self {
            symbol: Symbol::NonTerminal(nonterminal),
            optional: false,
            predicate: None,
        }
    }

    /// A bare predicate component: matches nothing, succeeds iff the
    /// predicate does.
    #[must_use]
    pub const fn pred(predicate: Predicate) -> Self {
        Self {
            symbol: Symbol::Terminal(TOK_NULL),
            optional: false,
            predicate: Some(predicate),
        }
    }

    /// Mark this component optional.
    #[must_use]
    pub const fn opt(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Attach a predicate guard.
    #[must_use]
    pub const fn guard(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.symbol, Symbol::Terminal(_))
    }

    #[must_use]
    pub const fn is_non_terminal(&self) -> bool {
        matches!(self.symbol, Symbol::NonTerminal(_))
    }

    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    #[must_use]
    pub const fn predicate(&self) -> Option<Predicate> {
        self.predicate
    }

    /// The terminal kind, or `TOK_NULL` for nonterminal components.
    #[must_use]
    pub const fn as_terminal(&self) -> TokenKind {
        match self.symbol {
            Symbol::Terminal(kind) => kind,
            Symbol::NonTerminal(_) => TOK_NULL,
        }
    }

    #[must_use]
    pub const fn as_non_terminal(&self) -> Option<NonTerminal> {
        match self.symbol {
            Symbol::NonTerminal(nt) => Some(nt),
            Symbol::Terminal(_) => None,
        }
    }

    fn order_key(&self) -> (bool, bool, Symbol, usize) {
        (
            self.is_terminal(),
            self.optional,
            self.symbol,
            self.predicate.map_or(0, |p| p as usize),
        )
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for Component {}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// Errors detected while building a grammar.
#[derive(Debug, Clone, Error)]
pub enum GrammarError {
    /// A rule with no components was added; empty matches are expressed
    /// with optional components instead.
    #[error("rule for nonterminal '{nonterminal}' has no components")]
    EmptyRule { nonterminal: String },
}

pub(crate) struct RuleData {
    pub(crate) nonterminal: NonTerminal,
    /// Index of this rule within its nonterminal.
    pub(crate) index: u32,
    pub(crate) components: Vec<Component>,
    pub(crate) enabled: bool,
}

struct NtData {
    name: String,
    flags: NtFlags,
    rules: Vec<RuleId>,
    pre_parse_actions: Vec<Action>,
    post_parse_actions: Vec<Action>,
    analysis: OnceLock<NtAnalysis>,
}

/// A context-free grammar: an arena of nonterminals and rules.
#[derive(Default)]
pub struct Grammar {
    nonterminals: Vec<NtData>,
    rules: Vec<RuleData>,
}

impl Grammar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a nonterminal with default flags.
    pub fn nonterminal(&mut self, name: impl Into<String>) -> NonTerminal {
        self.nonterminal_with_flags(name, NtFlags::default())
    }

    /// Create a nonterminal with the given display flags.
    pub fn nonterminal_with_flags(
        &mut self,
        name: impl Into<String>,
        flags: NtFlags,
    ) -> NonTerminal {
        let id =
            NonTerminal(u32::try_from(self.nonterminals.len()).expect("too many nonterminals"));
        self.nonterminals.push(NtData {
            name: name.into(),
            flags,
            rules: Vec::new(),
            pre_parse_actions: Vec::new(),
            post_parse_actions: Vec::new(),
            analysis: OnceLock::new(),
        });
        id
    }

    /// Append a rule to `nonterminal`. Rule order is significant: it
    /// breaks ties in the first-set and decides which of two equal
    /// matches is kept.
    pub fn rule(
        &mut self,
        nonterminal: NonTerminal,
        components: impl IntoIterator<Item = Component>,
    ) -> Result<RuleId, GrammarError> {
        let components: Vec<Component> = components.into_iter().collect();
        if components.is_empty() {
            return Err(GrammarError::EmptyRule {
                nonterminal: self.name(nonterminal).to_string(),
            });
        }

        let id = RuleId(u32::try_from(self.rules.len()).expect("too many rules"));
        let index = u32::try_from(self.nonterminals[nonterminal.0 as usize].rules.len())
            .expect("too many rules per nonterminal");
        self.rules.push(RuleData {
            nonterminal,
            index,
            components,
            enabled: true,
        });
        self.nonterminals[nonterminal.0 as usize].rules.push(id);
        self.invalidate_analysis();
        Ok(id)
    }

    /// Enable or disable a rule. Disabled rules are skipped during
    /// analysis and parsing.
    pub fn set_rule_enabled(&mut self, rule: RuleId, enabled: bool) {
        self.rules[rule.0 as usize].enabled = enabled;
        self.invalidate_analysis();
    }

    fn invalidate_analysis(&mut self) {
        // first sets depend transitively on callees, so everything goes
        for nt in &mut self.nonterminals {
            nt.analysis = OnceLock::new();
        }
    }

    #[must_use]
    pub fn name(&self, nonterminal: NonTerminal) -> &str {
        &self.nonterminals[nonterminal.0 as usize].name
    }

    #[must_use]
    pub fn is_transparent(&self, nonterminal: NonTerminal) -> bool {
        self.nonterminals[nonterminal.0 as usize]
            .flags
            .contains(TRANSPARENT)
    }

    #[must_use]
    pub fn hide_if_delegate(&self, nonterminal: NonTerminal) -> bool {
        self.nonterminals[nonterminal.0 as usize]
            .flags
            .contains(HIDE_IF_DELEGATE)
    }

    #[must_use]
    pub fn keep_recursion(&self, nonterminal: NonTerminal) -> bool {
        self.nonterminals[nonterminal.0 as usize]
            .flags
            .contains(KEEP_RECURSION)
    }

    /// The rules of `nonterminal`, in declaration order.
    #[must_use]
    pub fn rules_of(&self, nonterminal: NonTerminal) -> &[RuleId] {
        &self.nonterminals[nonterminal.0 as usize].rules
    }

    #[must_use]
    pub fn nonterminal_count(&self) -> usize {
        self.nonterminals.len()
    }

    pub(crate) fn nt_analysis_cell(&self, nonterminal: NonTerminal) -> &OnceLock<NtAnalysis> {
        &self.nonterminals[nonterminal.0 as usize].analysis
    }

    pub(crate) fn rule_data(&self, rule: RuleId) -> &RuleData {
        &self.rules[rule.0 as usize]
    }

    /// The nonterminal a rule belongs to.
    #[must_use]
    pub fn rule_nonterminal(&self, rule: RuleId) -> NonTerminal {
        self.rule_data(rule).nonterminal
    }

    /// Index of a rule within its nonterminal.
    #[must_use]
    pub fn rule_index(&self, rule: RuleId) -> u32 {
        self.rule_data(rule).index
    }

    #[must_use]
    pub fn rule_components(&self, rule: RuleId) -> &[Component] {
        &self.rule_data(rule).components
    }

    #[must_use]
    pub fn rule_is_enabled(&self, rule: RuleId) -> bool {
        self.rule_data(rule).enabled
    }

    /// A rule is left-recursive if its first component refers back to its
    /// own nonterminal.
    #[must_use]
    pub fn rule_is_left_recursive(&self, rule: RuleId) -> bool {
        let data = self.rule_data(rule);
        data.components[0].as_non_terminal() == Some(data.nonterminal)
    }

    /// A rule is recursive if any component refers back to its own
    /// nonterminal.
    #[must_use]
    pub fn rule_is_recursive(&self, rule: RuleId) -> bool {
        let data = self.rule_data(rule);
        data.components
            .iter()
            .any(|c| c.as_non_terminal() == Some(data.nonterminal))
    }

    /// A delegate rule consists of exactly one nonterminal component.
    #[must_use]
    pub fn rule_is_delegate(&self, rule: RuleId) -> bool {
        let data = self.rule_data(rule);
        data.components.len() == 1 && data.components[0].is_non_terminal()
    }

    /// Whether forest nodes produced by this rule are hidden when
    /// attached to their parent: the nonterminal is transparent, or the
    /// rule is a delegation and the nonterminal hides delegates.
    #[must_use]
    pub fn rule_must_hide(&self, rule: RuleId) -> bool {
        let nt = self.rule_nonterminal(rule);
        self.is_transparent(nt) || (self.rule_is_delegate(rule) && self.hide_if_delegate(nt))
    }

    /// Whether this rule can match zero tokens.
    #[must_use]
    pub fn rule_matches_empty(&self, rule: RuleId) -> bool {
        for component in self.rule_components(rule) {
            if component.is_optional() {
                continue;
            }
            match component.as_non_terminal() {
                None => return false,
                Some(nt) => {
                    if !self.matches_empty(nt) {
                        return false;
                    }
                }
            }
        }
        true
    }

    #[must_use]
    pub fn slot_component(&self, slot: Slot) -> &Component {
        &self.rule_components(slot.rule)[slot.pos as usize]
    }

    /// Whether `slot` is the last component of its rule.
    #[must_use]
    pub fn slot_is_last(&self, slot: Slot) -> bool {
        slot.pos as usize + 1 == self.rule_components(slot.rule).len()
    }

    /// Whether the component at `slot` refers back to the rule's own
    /// nonterminal.
    #[must_use]
    pub fn slot_is_recursive(&self, slot: Slot) -> bool {
        self.slot_component(slot).as_non_terminal() == Some(self.rule_nonterminal(slot.rule))
    }

    /// Register a pre-parse action; it runs before any rule of
    /// `nonterminal` is attempted and can veto the attempt.
    pub fn add_pre_parse_action(&mut self, nonterminal: NonTerminal, action: Action) {
        self.nonterminals[nonterminal.0 as usize]
            .pre_parse_actions
            .push(action);
    }

    /// Register a post-parse action; it runs when a rule of
    /// `nonterminal` completes and can reject the match. The most
    /// recently registered action runs first.
    pub fn add_post_parse_action(&mut self, nonterminal: NonTerminal, action: Action) {
        self.nonterminals[nonterminal.0 as usize]
            .post_parse_actions
            .insert(0, action);
    }

    /// Remove a previously registered pre-parse action by identity.
    pub fn remove_pre_parse_action(&mut self, nonterminal: NonTerminal, action: Action) -> bool {
        Self::remove_action(
            &mut self.nonterminals[nonterminal.0 as usize].pre_parse_actions,
            action,
        )
    }

    /// Remove a previously registered post-parse action by identity.
    pub fn remove_post_parse_action(&mut self, nonterminal: NonTerminal, action: Action) -> bool {
        Self::remove_action(
            &mut self.nonterminals[nonterminal.0 as usize].post_parse_actions,
            action,
        )
    }

    fn remove_action(actions: &mut Vec<Action>, target: Action) -> bool {
        if let Some(pos) = actions.iter().position(|&a| std::ptr::fn_addr_eq(a, target)) {
            actions.remove(pos);
            true
        } else {
            false
        }
    }

    /// Run all pre-parse actions of `nonterminal`. Every action is
    /// invoked; the results are AND-ed.
    pub(crate) fn invoke_pre_parse_actions(
        &self,
        nonterminal: NonTerminal,
        state: &mut ParseState<'_>,
    ) -> bool {
        Self::invoke_actions(
            &self.nonterminals[nonterminal.0 as usize].pre_parse_actions,
            state,
        )
    }

    /// Run all post-parse actions of `nonterminal`. Every action is
    /// invoked; the results are AND-ed.
    pub(crate) fn invoke_post_parse_actions(
        &self,
        nonterminal: NonTerminal,
        state: &mut ParseState<'_>,
    ) -> bool {
        Self::invoke_actions(
            &self.nonterminals[nonterminal.0 as usize].post_parse_actions,
            state,
        )
    }

    fn invoke_actions(actions: &[Action], state: &mut ParseState<'_>) -> bool {
        let mut ok = true;
        for action in actions {
            ok = action(state) && ok;
        }
        ok
    }

    /// Write a human-readable dump of one component.
    pub fn dump_component(
        &self,
        component: &Component,
        lexer: &dyn Lexer,
        out: &mut dyn fmt::Write,
    ) -> fmt::Result {
        let mut suffix = "";
        if component.is_optional() {
            out.write_str("opt(")?;
            suffix = ")";
        } else if component.predicate().is_some() {
            out.write_str("pred(")?;
            suffix = ")";
        }

        match component.as_non_terminal() {
            Some(nt) => out.write_str(self.name(nt))?,
            None => out.write_str(lexer.token_kind_name(component.as_terminal()))?,
        }

        if component.predicate().is_some() {
            out.write_str(", ...")?;
        }

        out.write_str(suffix)
    }

    /// Write a human-readable dump of one rule.
    pub fn dump_rule(
        &self,
        rule: RuleId,
        lexer: &dyn Lexer,
        out: &mut dyn fmt::Write,
    ) -> fmt::Result {
        for component in self.rule_components(rule) {
            self.dump_component(component, lexer, out)?;
            out.write_char(' ')?;
        }
        write!(
            out,
            "[sz={};lr={};r={};d={}]",
            self.rule_components(rule).len(),
            u8::from(self.rule_is_left_recursive(rule)),
            u8::from(self.rule_is_recursive(rule)),
            u8::from(self.rule_is_delegate(rule)),
        )
    }

    /// Write a human-readable dump of a nonterminal: its rules and its
    /// computed initial terminals.
    pub fn dump_nonterminal(
        &self,
        nonterminal: NonTerminal,
        lexer: &dyn Lexer,
        out: &mut dyn fmt::Write,
    ) -> fmt::Result {
        writeln!(out, "{}:", self.name(nonterminal))?;

        for &rule in self.rules_of(nonterminal) {
            out.write_str("    ")?;
            self.dump_rule(rule, lexer, out)?;
            out.write_char('\n')?;
        }

        let first = self.first_set(nonterminal);
        if first.is_empty() {
            out.write_str("Initial terminals undetermined\n")
        } else {
            out.write_str("Initial terminals:\n")?;
            let mut kinds: Vec<TokenKind> = first.keys().copied().collect();
            kinds.sort_unstable();
            for kind in kinds {
                writeln!(out, "    {}", lexer.token_kind_name(kind))?;
            }
            Ok(())
        }
    }
}
