//! The GLL engine: a worklist of parse descriptors driven over a
//! graph-structured stack, building a shared packed parse forest.
//!
//! One descriptor is one resumable position: a grammar slot, a GSS
//! head, an input position and the partial forest node built for the
//! rule so far. The engine keeps four sets, named after the GLL
//! literature: the worklist `R` (LIFO), the visited set `U` (a
//! descriptor is scheduled at most once), the popped set `P` (completed
//! matches per GSS node, replayed down late-added edges) and the GSS
//! itself. Failures never propagate out; they only record a candidate
//! mismatch for error reporting, and the farthest-reaching candidates
//! win.

use super::{ParseState, Parser};
use super::gss::{Gss, GssEdge, GssId};
use crate::diagnostics::{Diagnostic, Severity};
use crate::grammar::{Grammar, NonTerminal, RuleId, Slot};
use crate::sppf::{Sppf, SppfId};
use crate::token::{TOK_EOF, TOK_NULL, TokenId, TokenKind};
use hashbrown::HashSet;
use smallvec::SmallVec;
use std::io::Write as _;

const DEBUG_INDENT: usize = 4;

/// One pending unit of parse work.
#[derive(Debug, Clone, Copy)]
struct Descriptor {
    /// `None` stands for the top level (L0).
    slot: Option<Slot>,
    gss: GssId,
    input: TokenId,
    sppf: Option<SppfId>,
    depth: u16,
    /// Pull the next token before the first step.
    advance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MismatchKind {
    NoRule,
    TerminalMismatch,
    PredicateFailed,
    PostActionFailed,
}

#[derive(Debug, Clone, Copy)]
struct Mismatch {
    d: Descriptor,
    kind: MismatchKind,
}

type VisitedItem = (TokenId, Option<Slot>, GssId, Option<SppfId>);

pub(crate) struct Gll<'a> {
    parser: &'a mut Parser,
    grammar: &'a Grammar,
    start: NonTerminal,
    gss: Gss,
    sppf: Sppf,
    /// Longest top-level match seen so far.
    matched: Option<SppfId>,
    /// P: completed matches per GSS node.
    popped: hashbrown::HashMap<GssId, Vec<SppfId>, ahash::RandomState>,
    /// R: pending descriptors, LIFO.
    worklist: Vec<Descriptor>,
    /// U: descriptors already scheduled.
    visited: HashSet<VisitedItem, ahash::RandomState>,
    /// Farthest input position any failure reached.
    recovery_pos: Option<TokenId>,
    /// Mismatches recorded at `recovery_pos`, most recent first.
    candidates: Vec<Mismatch>,
}

impl<'a> Gll<'a> {
    pub(crate) fn new(parser: &'a mut Parser, grammar: &'a Grammar, start: NonTerminal) -> Self {
        Self {
            parser,
            grammar,
            start,
            gss: Gss::new(),
            sppf: Sppf::new(),
            matched: None,
            popped: hashbrown::HashMap::default(),
            worklist: Vec::new(),
            visited: HashSet::default(),
            recovery_pos: None,
            candidates: Vec::new(),
        }
    }

    /// The main loop; returns the forest and the root of the longest
    /// top-level match.
    pub(crate) fn run(mut self, input_start: TokenId) -> Option<(Sppf, SppfId)> {
        let (u0, _) = self.gss.node(None, None);
        let (u1, _) = self.gss.node(None, Some(input_start));
        self.gss.add_edge(u1, u0, None);

        if !self.begin_nonterminal(self.start, u1, input_start, 0) {
            self.recovery_pos = Some(input_start);
            self.candidates.push(Mismatch {
                d: Descriptor {
                    slot: None,
                    gss: u1,
                    input: input_start,
                    sppf: None,
                    depth: 0,
                    advance: false,
                },
                kind: MismatchKind::NoRule,
            });
        }

        while let Some(d) = self.worklist.pop() {
            if self.fatal() {
                return None;
            }
            self.parse_step(d);
        }
        if self.fatal() {
            return None;
        }

        if self.matched.is_none() && self.recovery_pos.is_some() {
            self.report();
        }

        let root = self.matched?;
        Some((self.sppf, root))
    }

    fn fatal(&self) -> bool {
        self.parser.diag.fatal().is_some()
    }

    /// Dispatch `nonterminal` at `input`: pick candidate rules through
    /// the first-set and schedule (or, on the LL(1) fast path, directly
    /// run) one descriptor per candidate. `false` if no rule was
    /// started.
    fn begin_nonterminal(
        &mut self,
        nonterminal: NonTerminal,
        gss: GssId,
        input: TokenId,
        depth: u16,
    ) -> bool {
        let grammar = self.grammar;
        let first = grammar.first_set(nonterminal);
        let mut count = 0usize;

        if first.is_empty() {
            // no useful prediction: try every enabled rule
            for &rule in grammar.rules_of(nonterminal) {
                if grammar.rule_is_enabled(rule) && self.begin_rule(rule, gss, input, depth, false)
                {
                    count += 1;
                }
            }
        } else {
            let kind = self.parser.tokens.get(input).kind();
            if let Some(indices) = first.get(&kind) {
                if !grammar.matches_empty(nonterminal) && indices.len() == 1 {
                    let rule = grammar.rules_of(nonterminal)[indices[0] as usize];
                    if self.begin_rule(rule, gss, input, depth, true) {
                        return true;
                    }
                } else {
                    for &index in indices {
                        let rule = grammar.rules_of(nonterminal)[index as usize];
                        if self.begin_rule(rule, gss, input, depth, false) {
                            count += 1;
                        }
                    }
                }
            }

            if grammar.matches_empty(nonterminal)
                && let Some(indices) = first.get(&TOK_NULL)
            {
                for &index in indices {
                    let rule = grammar.rules_of(nonterminal)[index as usize];
                    if self.begin_rule(rule, gss, input, depth, false) {
                        count += 1;
                    }
                }
            }
        }

        if count == 0 && self.parser.debug {
            let offset = self.parser.tokens.get(input).offset();
            let name = grammar.name(nonterminal).to_string();
            self.trace(depth, format_args!("NORULE {name} @ {offset}"));
        }

        count > 0
    }

    /// Run the pre-parse actions and schedule the rule's first slot;
    /// `immediate` short-circuits the worklist for the LL(1) fast path.
    fn begin_rule(
        &mut self,
        rule: RuleId,
        gss: GssId,
        input: TokenId,
        depth: u16,
        immediate: bool,
    ) -> bool {
        let grammar = self.grammar;
        let nonterminal = grammar.rule_nonterminal(rule);
        let ok = self.with_state(rule, input, None, |state| {
            grammar.invoke_pre_parse_actions(nonterminal, state)
        });
        if !ok {
            return false;
        }

        let d = Descriptor {
            slot: Some(Slot { rule, pos: 0 }),
            gss,
            input,
            sppf: None,
            depth,
            advance: false,
        };
        if immediate {
            self.parse_step(d);
        } else {
            self.add(d);
        }
        true
    }

    /// Drive one descriptor: advance component by component until the
    /// rule completes, fails, or dispatches a nonterminal (which hands
    /// control back to the main loop; the continuation is reached
    /// through the GSS when the callee pops).
    fn parse_step(&mut self, mut d: Descriptor) {
        let Some(mut slot) = d.slot else {
            return; // L0
        };
        let grammar = self.grammar;
        let rule = slot.rule;
        let len = grammar.rule_components(rule).len() as u16;

        if self.parser.debug && slot.pos < len {
            if d.advance {
                // pull the token now so the trace shows the real offset
                d.input = self.parser.next_token(Some(d.input));
                d.advance = false;
            }
            let word = if slot.pos == 0 { "ENTER" } else { "RESUME" };
            let line = format!(
                "{word} {}.{}[{}] @ {}",
                grammar.name(grammar.rule_nonterminal(rule)),
                grammar.rule_index(rule),
                slot.pos,
                self.parser.tokens.get(d.input).offset()
            );
            self.trace(d.depth, format_args!("{line}"));
        }

        while slot.pos < len {
            if d.advance {
                d.input = self.parser.next_token(Some(d.input));
                d.advance = false;
                if self.fatal() {
                    return;
                }
            }

            let component = *grammar.slot_component(slot);
            d.slot = Some(slot);

            if let Some(predicate) = component.predicate() {
                let ok = self.with_state(rule, d.input, d.sppf, |state| predicate(state));
                if !ok && !component.is_optional() {
                    self.end_rule(&d, Some(MismatchKind::PredicateFailed));
                    return;
                }
            }

            if component.is_terminal() {
                let terminal = component.as_terminal();
                let input_kind = self.parser.tokens.get(d.input).kind();

                if terminal == TOK_NULL || terminal == input_kind {
                    let t_node = self.sppf.get_node_t(d.input);
                    if slot.pos == 0 && len >= 2 {
                        // first of at least two components: the terminal
                        // node itself is the partial parse
                        d.sppf = Some(t_node);
                    } else {
                        d.sppf = Some(self.get_node_p(slot, d.sppf, t_node));
                    }
                    d.advance = true;
                } else if !component.is_optional() {
                    self.end_rule(&d, Some(MismatchKind::TerminalMismatch));
                    return;
                } else {
                    let empty = self.sppf.get_empty_node_at(d.input);
                    d.sppf = Some(self.get_node_p(slot, d.sppf, empty));
                }
            } else if let Some(nonterminal) = component.as_non_terminal() {
                let return_slot = slot.next();

                let skip_optional = component.is_optional()
                    && !grammar.matches_empty(nonterminal)
                    && !self
                        .visited
                        .contains(&(d.input, Some(return_slot), d.gss, d.sppf));

                let mut ok = false;
                if self.test(d.input, nonterminal, Some(return_slot)) {
                    let new_gss = self.create(slot, d.gss, d.input, d.sppf, d.depth + 1);
                    ok = self.begin_nonterminal(nonterminal, new_gss, d.input, d.depth + 1);
                } else if self.parser.debug {
                    let offset = self.parser.tokens.get(d.input).offset();
                    let name = grammar.name(nonterminal).to_string();
                    self.trace(d.depth, format_args!("NORULE {name} @ {offset}"));
                }

                ok = ok || skip_optional;
                if !ok {
                    self.end_rule(&d, Some(MismatchKind::NoRule));
                    return;
                }

                if !skip_optional {
                    // hand control back to the main loop; the GSS edge
                    // added by create() resumes this rule on pop
                    return;
                }
                /* optional nonterminal that cannot match empty and
                   whose path was not tried yet: attempt the rule with
                   the nonterminal omitted */
                let empty = self.sppf.get_empty_node_at(d.input);
                d.sppf = Some(self.get_node_p(slot, d.sppf, empty));
            }

            slot = slot.next();
        }

        d.slot = Some(slot); // sentinel
        if self.end_rule(&d, None)
            && let Some(parsed) = d.sppf
        {
            self.pop(d.gss, parsed, d.depth);
        }
    }

    /// Complete or fail a rule: run post-parse actions on success,
    /// record a mismatch candidate on failure. `true` when the rule
    /// completed cleanly.
    fn end_rule(&mut self, d: &Descriptor, mismatch: Option<MismatchKind>) -> bool {
        let grammar = self.grammar;
        let Some(slot) = d.slot else {
            return mismatch.is_none();
        };
        let rule = slot.rule;

        let mut mismatch = mismatch;
        let mut dbg_word = None;
        if mismatch.is_none() {
            let nonterminal = grammar.rule_nonterminal(rule);
            let ok = self.with_state(rule, d.input, d.sppf, |state| {
                grammar.invoke_post_parse_actions(nonterminal, state)
            });
            if !ok {
                mismatch = Some(MismatchKind::PostActionFailed);
                dbg_word = Some("XCFAIL");
            }
        }

        if let Some(kind) = mismatch {
            let offset = self.parser.tokens.get(d.input).offset();
            let farthest = self
                .recovery_pos
                .is_none_or(|rp| offset >= self.parser.tokens.get(rp).offset());
            if farthest {
                let moved = self
                    .recovery_pos
                    .is_none_or(|rp| offset > self.parser.tokens.get(rp).offset());
                if moved {
                    self.candidates.clear();
                }
                self.recovery_pos = Some(d.input);
                self.candidates.insert(0, Mismatch { d: *d, kind });
            }
        }

        if self.parser.debug {
            let nt_name = grammar.name(grammar.rule_nonterminal(rule)).to_string();
            let rule_index = grammar.rule_index(rule);
            let line = match (mismatch, dbg_word) {
                (None, _) => {
                    let end = d
                        .sppf
                        .map_or(0, |sppf| self.sppf.end_offset(sppf, &self.parser.tokens));
                    format!("FINISH {nt_name}.{rule_index} @ {end}")
                }
                (Some(_), Some(word)) => {
                    let offset = self.parser.tokens.get(d.input).offset();
                    format!("{word} {nt_name}.{rule_index} @ {offset}")
                }
                (Some(_), None) => {
                    let offset = self.parser.tokens.get(d.input).offset();
                    format!("FAIL {nt_name}.{rule_index}[{}] @ {offset}", slot.pos)
                }
            };
            self.trace(d.depth, format_args!("{line}"));
        }

        mismatch.is_none()
    }

    /// Schedule a descriptor unless an identical one was already
    /// scheduled during this parse.
    fn add(&mut self, d: Descriptor) {
        if self.visited.insert((d.input, d.slot, d.gss, d.sppf)) {
            self.worklist.push(d);
        } else if self.parser.debug {
            let grammar = self.grammar;
            let offset = self.parser.tokens.get(d.input).offset();
            let line = match d.slot {
                Some(slot) => format!(
                    "IGNORE {}.{}[{}] @ {offset}",
                    grammar.name(grammar.rule_nonterminal(slot.rule)),
                    grammar.rule_index(slot.rule),
                    slot.pos
                ),
                None => format!("IGNORE {} @ {offset}", grammar.name(self.start)),
            };
            self.trace(d.depth, format_args!("{line}"));
        }
    }

    /// Record a completed match and resume every stack frame waiting on
    /// this GSS node. A pop reaching the bottom of the stack is a
    /// top-level match; the longest one wins, first seen on ties.
    fn pop(&mut self, gss_head: GssId, parsed: SppfId, depth: u16) {
        let recorded = self.popped.entry(gss_head).or_default();
        if !recorded.contains(&parsed) {
            recorded.push(parsed);
        }

        let return_slot = self.gss.return_slot(gss_head);
        let edges: SmallVec<[GssEdge; 4]> = self.gss.edges(gss_head).iter().copied().collect();

        for edge in edges {
            match return_slot {
                Some(slot) => {
                    let hidden = self.hide_delegate(parsed);
                    let y = self.get_node_p(slot, edge.sppf, hidden);
                    let last = self.sppf.node(parsed).last_token();
                    let empty = self.sppf.node(parsed).is_empty();
                    self.add(Descriptor {
                        slot: Some(slot.next()),
                        gss: edge.child,
                        input: last,
                        sppf: Some(y),
                        depth: depth.saturating_sub(1),
                        advance: !empty,
                    });
                }
                None => {
                    let longer = self.matched.is_none_or(|m| {
                        let parsed_end = self.sppf.node(parsed).last_token();
                        let matched_end = self.sppf.node(m).last_token();
                        self.parser.tokens.get(parsed_end).offset()
                            > self.parser.tokens.get(matched_end).offset()
                    });
                    if longer {
                        self.matched = Some(parsed);
                    }
                }
            }
        }
    }

    /// Find-or-create the GSS node for a nonterminal dispatch and link
    /// it to the caller. A new edge into a node that has already popped
    /// replays the recorded matches down it.
    fn create(
        &mut self,
        return_slot: Slot,
        gss_head: GssId,
        input: TokenId,
        sppf: Option<SppfId>,
        depth: u16,
    ) -> GssId {
        let (v, inserted) = self.gss.node(Some(return_slot), Some(input));

        if self.gss.add_edge(v, gss_head, sppf) && !inserted {
            let replay: Vec<SppfId> = self.popped.get(&v).cloned().unwrap_or_default();
            for z in replay {
                let hidden = self.hide_delegate(z);
                let y = self.get_node_p(return_slot, sppf, hidden);
                let last = self.sppf.node(z).last_token();
                let empty = self.sppf.node(z).is_empty();
                self.add(Descriptor {
                    slot: Some(return_slot.next()),
                    gss: gss_head,
                    input: last,
                    sppf: Some(y),
                    depth: depth.saturating_sub(1),
                    advance: !empty,
                });
            }
        }

        v
    }

    /// Whether dispatching `nonterminal` at `input` can possibly make
    /// progress: its first-set is uninformative, contains the current
    /// token, or the nonterminal may match empty and the rest of the
    /// rule (transitively) admits the token.
    fn test(&self, input: TokenId, nonterminal: NonTerminal, trailing: Option<Slot>) -> bool {
        let first = self.grammar.first_set(nonterminal);
        first.is_empty()
            || first.contains_key(&self.parser.tokens.get(input).kind())
            || (self.grammar.matches_empty(nonterminal) && self.test_follow(input, trailing))
    }

    fn test_follow(&self, input: TokenId, trailing: Option<Slot>) -> bool {
        let Some(mut slot) = trailing else {
            return true;
        };
        let grammar = self.grammar;
        let len = grammar.rule_components(slot.rule).len() as u16;
        let input_kind = self.parser.tokens.get(input).kind();

        while slot.pos < len {
            let component = grammar.slot_component(slot);

            if let Some(nonterminal) = component.as_non_terminal() {
                return self.test(input, nonterminal, Some(slot.next()));
            }

            let terminal = component.as_terminal();
            if terminal == TOK_NULL || terminal == input_kind {
                return true;
            }
            if !component.is_optional() {
                return false;
            }
            slot = slot.next();
        }
        true
    }

    /// Substitute a pass-through match with its payload: a node whose
    /// single packed child belongs to a rule that must hide (transparent
    /// nonterminal, or hidden delegation) and wraps a single symbol is
    /// replaced by that symbol when attached to its parent.
    fn hide_delegate(&self, parsed: SppfId) -> SppfId {
        let node = self.sppf.node(parsed);
        if let [child_id] = node.children() {
            let child = self.sppf.node(*child_id);
            if child.is_packed()
                && let Some(slot) = child.slot()
                && self.grammar.rule_must_hide(slot.rule)
                && let [grandchild] = child.children()
                && self.sppf.node(*grandchild).is_symbol()
            {
                return *grandchild;
            }
        }
        parsed
    }

    /// Binarise one step: combine the partial parse `left` with the
    /// newly matched `right` under the parent node labelled by `slot`
    /// (the rule's nonterminal on the last slot, an intermediate node
    /// otherwise), sharing packed children by (slot, pivot).
    fn get_node_p(&mut self, slot: Slot, left: Option<SppfId>, right: SppfId) -> SppfId {
        let grammar = self.grammar;
        let rule = slot.rule;
        let on_last_slot = grammar.slot_is_last(slot);

        let right_first = self.sppf.node(right).first_token();
        let right_last = self.sppf.node(right).last_token();

        let left_extent = match left {
            Some(l) => {
                let left_node = self.sppf.node(l);
                if !left_node.is_empty() {
                    left_node.first_token()
                } else if right_first.is_some() {
                    Some(left_node.last_token())
                } else {
                    None // completely empty
                }
            }
            None => right_first,
        };

        let (pivot, right_extent) = match right_first {
            Some(first) => (first, right_last),
            None => (
                right_last,
                left.map_or(right_last, |l| self.sppf.node(l).last_token()),
            ),
        };

        let parent = if on_last_slot {
            self.sppf
                .intern_nonterminal(grammar.rule_nonterminal(rule), left_extent, right_extent)
        } else {
            let parent = self
                .sppf
                .intern_intermediate(slot, left_extent, right_extent);

            // collapse a left-recursive spine into a flat child list
            if left.is_none()
                && self.sppf.node(right).nonterminal_label() == Some(grammar.rule_nonterminal(rule))
                && grammar.slot_is_recursive(slot)
                && !grammar.keep_recursion(grammar.rule_nonterminal(rule))
            {
                let adopted: SmallVec<[SppfId; 4]> =
                    self.sppf.node(right).children().iter().copied().collect();
                for child in adopted {
                    self.sppf.add_child(parent, child);
                }
                return parent;
            }
            parent
        };

        let empty = right_first.is_none();
        if self
            .sppf
            .find_packed_child(parent, slot, pivot, empty)
            .is_none()
        {
            let packed = self.sppf.new_packed(slot, pivot, empty);
            if let Some(l) = left {
                self.sppf.add_child(packed, l);
            }
            self.sppf.add_child(packed, right);
            self.sppf.add_child(parent, packed);
        }

        parent
    }

    /// Synthesize the "expected ..." diagnostic from the mismatches
    /// recorded at the farthest failure position.
    fn report(&mut self) {
        let Some(recovery) = self.recovery_pos else {
            return;
        };
        let grammar = self.grammar;

        let mut expected: Vec<TokenKind> = Vec::new();
        for mismatch in &self.candidates {
            match mismatch.kind {
                // semantic rejections carry no terminal expectation
                MismatchKind::PredicateFailed | MismatchKind::PostActionFailed => {}
                MismatchKind::NoRule => {
                    let nonterminal = mismatch
                        .d
                        .slot
                        .and_then(|slot| grammar.slot_component(slot).as_non_terminal())
                        .unwrap_or(self.start);
                    for &kind in grammar.first_set(nonterminal).keys() {
                        if kind != TOK_EOF && kind != TOK_NULL {
                            expected.push(kind);
                        }
                    }
                }
                MismatchKind::TerminalMismatch => {
                    if let Some(slot) = mismatch.d.slot {
                        let kind = grammar.slot_component(slot).as_terminal();
                        if kind != TOK_NULL {
                            expected.push(kind);
                        }
                    }
                }
            }
        }

        expected.sort_unstable();
        expected.dedup();
        if expected.is_empty() {
            return;
        }

        let Some(lexer) = self.parser.lexer.as_deref() else {
            return;
        };
        let names: Vec<String> = expected
            .iter()
            .map(|&kind| {
                let name = lexer.token_kind_name(kind);
                if name.chars().count() == 1 {
                    // single-character terminal names are quoted
                    if name == "'" {
                        "'\\''".to_string()
                    } else {
                        format!("'{name}'")
                    }
                } else {
                    name.to_string()
                }
            })
            .collect();

        let expect = match names.as_slice() {
            [] => return,
            [only] => only.clone(),
            [first, second] => format!("{first} or {second}"),
            [init @ .., last] => format!("{}, or {last}", init.join(", ")),
        };

        let token = self.parser.tokens.get(recovery).clone();
        self.parser.diag.emit(Diagnostic::at_token(
            Severity::Error,
            "expected {}",
            &token,
            format!("expected {expect}"),
        ));
    }

    /// Build a callback view and run `f` against it.
    fn with_state<R>(
        &mut self,
        rule: RuleId,
        input: TokenId,
        parsed: Option<SppfId>,
        f: impl FnOnce(&mut ParseState<'_>) -> R,
    ) -> R {
        let parser = &mut *self.parser;
        let mut state = ParseState {
            grammar: self.grammar,
            tokens: &parser.tokens,
            diag: &mut parser.diag,
            forest: &mut self.sppf,
            start: self.start,
            rule,
            input,
            parsed,
        };
        f(&mut state)
    }

    fn trace(&mut self, depth: u16, line: std::fmt::Arguments<'_>) {
        let indent = depth as usize * DEBUG_INDENT;
        let _ = writeln!(self.parser.debug_out, "{:indent$}{line}", "");
    }
}
