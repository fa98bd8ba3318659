//! # Grammar Analysis
//!
//! First-set, LL(1) and matches-empty computation for nonterminals.
//!
//! The first-set of a nonterminal maps each terminal kind that may begin
//! one of its derivations to the rule indices that can start with that
//! terminal; `TOK_NULL` as a key means "may match zero tokens". An empty
//! first-set means the analysis could not predict anything useful (a lone
//! predicate, or a callee with an empty first-set) and the parser falls
//! back to trying every rule.
//!
//! Left recursion is detected during the visit; left-recursive rules are
//! broadcast into every terminal key's rule list, after the
//! non-left-recursive indices. A nonterminal is LL(1) iff every terminal
//! key maps to exactly one rule.
//!
//! Results are memoized per nonterminal and recomputed from scratch after
//! any structural change to the grammar.

use crate::grammar::{Grammar, NonTerminal, RuleId};
use crate::token::{TOK_NULL, TokenKind};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

/// Rule indices (within one nonterminal) that can begin with a given
/// terminal, in try-order.
pub type RuleIndices = SmallVec<[u32; 4]>;

/// Mapping from initial terminal kind to the rules it predicts.
pub type FirstSet = HashMap<TokenKind, RuleIndices, ahash::RandomState>;

/// Memoized per-nonterminal analysis results.
pub(crate) struct NtAnalysis {
    pub(crate) first: FirstSet,
    pub(crate) is_ll1: bool,
    pub(crate) matches_empty: bool,
}

impl NtAnalysis {
    fn fresh() -> Self {
        // assumed until proven otherwise
        Self {
            first: FirstSet::default(),
            is_ll1: true,
            matches_empty: false,
        }
    }

    fn indeterminate() -> Self {
        Self {
            first: FirstSet::default(),
            is_ll1: false,
            matches_empty: false,
        }
    }
}

/// Outcome of analyzing one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    /// The rule is (possibly hidden) left-recursive: the walk reached a
    /// self-reference with only optional or empty-matching components
    /// before it.
    IsLr,
    /// The rule's start cannot be predicted.
    Indeterminate,
}

/// In-flight analysis state for one memoization pass. Partially computed
/// entries are visible to mutually recursive nonterminals, which is what
/// bounds the recursion.
#[derive(Default)]
struct Scratch {
    map: HashMap<u32, NtAnalysis, ahash::RandomState>,
    visited: HashSet<u32, ahash::RandomState>,
}

impl Grammar {
    /// The first-set of `nonterminal`. Empty means "no useful
    /// prediction, try every rule".
    #[must_use]
    pub fn first_set(&self, nonterminal: NonTerminal) -> &FirstSet {
        &self.analysis(nonterminal).first
    }

    /// Whether every initial terminal of `nonterminal` predicts exactly
    /// one rule.
    #[must_use]
    pub fn is_ll1(&self, nonterminal: NonTerminal) -> bool {
        self.analysis(nonterminal).is_ll1
    }

    /// Whether some enabled rule of `nonterminal` can match zero tokens.
    #[must_use]
    pub fn matches_empty(&self, nonterminal: NonTerminal) -> bool {
        self.analysis(nonterminal).matches_empty
    }

    pub(crate) fn analysis(&self, nonterminal: NonTerminal) -> &NtAnalysis {
        if let Some(done) = self.nt_analysis_cell(nonterminal).get() {
            return done;
        }

        let mut scratch = Scratch::default();
        self.analyze_nt(nonterminal, &mut scratch);

        let target = scratch
            .map
            .remove(&nonterminal.0)
            .unwrap_or_else(NtAnalysis::indeterminate);
        // commit every nonterminal this pass completed; a cell that was
        // filled in the meantime keeps its value
        for (idx, result) in scratch.map {
            let _ = self.nt_analysis_cell(NonTerminal(idx)).set(result);
        }
        self.nt_analysis_cell(nonterminal).get_or_init(|| target)
    }

    fn analyze_nt(&self, nt: NonTerminal, scratch: &mut Scratch) {
        if self.nt_analysis_cell(nt).get().is_some() || !scratch.visited.insert(nt.0) {
            return;
        }
        scratch.map.insert(nt.0, NtAnalysis::fresh());

        let mut lr_rules: RuleIndices = SmallVec::new();

        for &rule in self.rules_of(nt) {
            if !self.rule_is_enabled(rule) {
                continue;
            }

            match self.analyze_rule(nt, rule, scratch) {
                Status::Ok => {}
                Status::IsLr => lr_rules.push(self.rule_index(rule)),
                Status::Indeterminate => {
                    lr_rules.clear();
                    break;
                }
            }
        }

        if !lr_rules.is_empty()
            && let Some(entry) = scratch.map.get_mut(&nt.0)
        {
            for indices in entry.first.values_mut() {
                indices.extend(lr_rules.iter().copied());
            }
        }
    }

    fn analyze_rule(&self, nt: NonTerminal, rule: RuleId, scratch: &mut Scratch) -> Status {
        // assumed until proven otherwise
        let mut rule_matches_empty = true;
        let mut lone_predicate = false;
        let mut subprod_indeterminate = false;

        for component in self.rule_components(rule) {
            if let Some(other) = component.as_non_terminal() {
                if other == nt {
                    if let Some(entry) = scratch.map.get_mut(&nt.0) {
                        entry.is_ll1 = false;
                    }
                    return Status::IsLr;
                }

                if self.nt_analysis_cell(other).get().is_none() {
                    self.analyze_nt(other, scratch);
                }

                let (other_empty_first, other_matches_empty, other_keys) =
                    self.peek_analysis(other, scratch);

                rule_matches_empty =
                    rule_matches_empty && (component.is_optional() || other_matches_empty);

                if other_empty_first {
                    subprod_indeterminate = true;
                    break;
                }

                for kind in other_keys {
                    self.update_first_and_ll1(nt, kind, rule, scratch);
                }
            } else {
                rule_matches_empty = rule_matches_empty && component.is_optional();
                let kind = component.as_terminal();

                if kind == TOK_NULL {
                    if component.predicate().is_some() {
                        lone_predicate = true;
                    }
                } else {
                    self.update_first_and_ll1(nt, kind, rule, scratch);
                }
            }

            if !rule_matches_empty {
                break;
            }
            // otherwise the next component must be examined
        }

        if lone_predicate || subprod_indeterminate {
            if let Some(entry) = scratch.map.get_mut(&nt.0) {
                entry.is_ll1 = false;
                entry.first.clear();
            }
            return Status::Indeterminate;
        }

        if rule_matches_empty {
            self.update_first_and_ll1(nt, TOK_NULL, rule, scratch);
            if let Some(entry) = scratch.map.get_mut(&nt.0) {
                entry.matches_empty = true;
            }
        }

        Status::Ok
    }

    /// Read another nonterminal's analysis, finished or in progress.
    fn peek_analysis(
        &self,
        nt: NonTerminal,
        scratch: &Scratch,
    ) -> (bool, bool, SmallVec<[TokenKind; 8]>) {
        let (first, matches_empty) = if let Some(done) = self.nt_analysis_cell(nt).get() {
            (&done.first, done.matches_empty)
        } else if let Some(in_progress) = scratch.map.get(&nt.0) {
            (&in_progress.first, in_progress.matches_empty)
        } else {
            return (true, false, SmallVec::new());
        };

        (
            first.is_empty(),
            matches_empty,
            first.keys().copied().collect(),
        )
    }

    fn update_first_and_ll1(
        &self,
        nt: NonTerminal,
        kind: TokenKind,
        rule: RuleId,
        scratch: &mut Scratch,
    ) {
        let index = self.rule_index(rule);
        if let Some(entry) = scratch.map.get_mut(&nt.0) {
            let indices = entry.first.entry(kind).or_default();
            let was_unclaimed = indices.is_empty();
            indices.push(index);
            entry.is_ll1 = entry.is_ll1 && was_unclaimed;
        }
    }
}
