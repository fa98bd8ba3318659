//! Engine-level tests: ambiguity surfacing, left-recursion flattening,
//! forest invariants, longest-match selection, hiding flags, recovery
//! messages and boundary behaviors.

use std::cell::RefCell;
use std::rc::Rc;

use sylva::{
    Component, Diagnostic, DiagnosticSink, Grammar, KEEP_RECURSION, Lexer, NonTerminal,
    ParseState, Parser, Severity, SppfId, SppfKind, SppfRoot, TOK_EOF, TRANSPARENT, Token,
    TokenId, TokenKind,
};

const TOK_A: TokenKind = TokenKind::user(0);
const TOK_B: TokenKind = TokenKind::user(1);
const TOK_C: TokenKind = TokenKind::user(2);
const TOK_PLUS: TokenKind = TokenKind::user(3);
const TOK_LPAREN: TokenKind = TokenKind::user(4);
const TOK_RPAREN: TokenKind = TokenKind::user(5);

/// Replays a fixed token sequence, then end of input.
struct SeqLexer {
    tokens: Vec<(TokenKind, &'static str)>,
    pos: usize,
    offset: u32,
}

impl SeqLexer {
    fn new(tokens: Vec<(TokenKind, &'static str)>) -> Self {
        Self {
            tokens,
            pos: 0,
            offset: 0,
        }
    }
}

impl Lexer for SeqLexer {
    fn lex(&mut self, out: &mut Token) -> Result<(), Diagnostic> {
        if let Some(&(kind, spelling)) = self.tokens.get(self.pos) {
            out.set_kind(kind)
                .set_offset(self.offset)
                .set_line_column(1, self.offset + 1)
                .set_spelling(spelling);
            self.pos += 1;
            self.offset += spelling.len() as u32;
        } else {
            out.set_kind(TOK_EOF)
                .set_offset(self.offset)
                .set_line_column(1, self.offset + 1);
        }
        Ok(())
    }

    fn token_kind_name(&self, kind: TokenKind) -> &str {
        match kind {
            TOK_A => "alpha",
            TOK_B => "beta",
            TOK_C => "gamma",
            TOK_PLUS => "+",
            TOK_LPAREN => "(",
            TOK_RPAREN => ")",
            TOK_EOF => "end of input",
            _ => "?",
        }
    }
}

struct Collect(Rc<RefCell<Vec<Diagnostic>>>);

impl DiagnosticSink for Collect {
    fn on_diagnostic(&mut self, d: &Diagnostic) {
        self.0.borrow_mut().push(d.clone());
    }
}

fn parse_with(
    grammar: &Grammar,
    start: NonTerminal,
    tokens: Vec<(TokenKind, &'static str)>,
) -> (Option<SppfRoot>, Vec<Diagnostic>) {
    let diagnostics = Rc::new(RefCell::new(Vec::new()));
    let mut parser = Parser::with_lexer(Box::new(SeqLexer::new(tokens)));
    parser.add_diagnostic_handler(Box::new(Collect(diagnostics.clone())));
    let root = parser.parse(grammar, start);
    let diagnostics = diagnostics.borrow().clone();
    (root, diagnostics)
}

/// Forest invariants from the node-construction rules: children are
/// all-packed or all-unpacked, and packed nodes carry one or two.
fn assert_forest_invariants(root: &SppfRoot) {
    let forest = root.forest();
    for id in forest.ids() {
        let node = forest.node(id);
        if node.has_children() {
            let packed = forest.node(node.children()[0]).kind() == SppfKind::Packed;
            for &child in node.children() {
                assert_eq!(
                    forest.node(child).kind() == SppfKind::Packed,
                    packed,
                    "packed and non-packed children must not mix"
                );
            }
            if !packed {
                assert!(node.children().len() <= 2, "binarised nodes have at most two children");
            }
        }
        if node.kind() == SppfKind::Packed {
            assert!(!node.children().is_empty() && node.children().len() <= 2);
        }
        if node.kind() == SppfKind::Terminal {
            assert!(!node.has_children());
        }
    }
}

#[test]
fn test_ambiguous_grammar_enumerates_derivations() {
    // s := s s | 'a'
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::nt(s), Component::nt(s)]).unwrap();
    g.rule(s, [Component::term(TOK_A)]).unwrap();

    let (root, diagnostics) = parse_with(
        &g,
        s,
        vec![(TOK_A, "a"), (TOK_A, "a"), (TOK_A, "a")],
    );
    let root = root.expect("ambiguous input still parses");
    assert!(diagnostics.is_empty());

    // the root covers all three tokens and carries one packed child per
    // derivation: (a)(aa) and (aa)(a)
    assert_eq!(root.content(), "aaa");
    let node = root.node(root.root());
    assert_eq!(node.children().len(), 2);
    for &child in node.children() {
        assert_eq!(root.node(child).kind(), SppfKind::Packed);
    }

    assert_forest_invariants(&root);
}

#[test]
fn test_left_recursion_is_flattened() {
    // expr := expr '+' term | term ; term := 'a'
    let mut g = Grammar::new();
    let expr = g.nonterminal("expr");
    let term = g.nonterminal("term");
    g.rule(expr, [Component::nt(expr), Component::term(TOK_PLUS), Component::nt(term)])
        .unwrap();
    g.rule(expr, [Component::nt(term)]).unwrap();
    g.rule(term, [Component::term(TOK_A)]).unwrap();

    let input = vec![
        (TOK_A, "a"),
        (TOK_PLUS, "+"),
        (TOK_A, "a"),
        (TOK_PLUS, "+"),
        (TOK_A, "a"),
    ];
    let (root, _) = parse_with(&g, expr, input);
    let root = root.expect("left-recursive chain parses");
    assert_eq!(root.content(), "a+a+a");

    // the recursive spine collapses: one term per operand, left to right
    let terms: Vec<SppfId> = root.forest().sub_productions(root.root()).collect();
    assert_eq!(terms.len(), 3);
    for id in &terms {
        assert_eq!(root.node(*id).nonterminal_label(), Some(term));
    }

    assert_forest_invariants(&root);
}

#[test]
fn test_keep_recursion_preserves_the_spine() {
    let mut g = Grammar::new();
    let expr = g.nonterminal_with_flags("expr", KEEP_RECURSION);
    let term = g.nonterminal("term");
    g.rule(expr, [Component::nt(expr), Component::term(TOK_PLUS), Component::nt(term)])
        .unwrap();
    g.rule(expr, [Component::nt(term)]).unwrap();
    g.rule(term, [Component::term(TOK_A)]).unwrap();

    let input = vec![
        (TOK_A, "a"),
        (TOK_PLUS, "+"),
        (TOK_A, "a"),
        (TOK_PLUS, "+"),
        (TOK_A, "a"),
    ];
    let (root, _) = parse_with(&g, expr, input);
    let root = root.expect("chain parses with keep-recursion");

    // the nested expr child survives instead of being spliced flat
    let children: Vec<SppfId> = root.forest().sub_productions(root.root()).collect();
    assert_eq!(children.len(), 2);
    assert_eq!(root.node(children[0]).nonterminal_label(), Some(expr));
    assert_eq!(root.node(children[1]).nonterminal_label(), Some(term));
}

#[test]
fn test_transparent_nonterminal_leaves_no_node() {
    let mut g = Grammar::new();
    let outer = g.nonterminal("outer");
    let inner = g.nonterminal_with_flags("inner", TRANSPARENT);
    g.rule(
        outer,
        [
            Component::term(TOK_LPAREN),
            Component::nt(inner),
            Component::term(TOK_RPAREN),
        ],
    )
    .unwrap();
    g.rule(inner, [Component::term(TOK_A)]).unwrap();

    let (root, _) = parse_with(
        &g,
        outer,
        vec![(TOK_LPAREN, "("), (TOK_A, "a"), (TOK_RPAREN, ")")],
    );
    let root = root.expect("parses");
    assert_eq!(root.content(), "(a)");

    // the transparent node was substituted by its single symbol child
    assert_eq!(root.forest().non_terminals(root.root()).count(), 0);
}

#[test]
fn test_parse_is_deterministic() {
    fn grammar() -> (Grammar, NonTerminal) {
        let mut g = Grammar::new();
        let s = g.nonterminal("s");
        g.rule(s, [Component::nt(s), Component::nt(s)]).unwrap();
        g.rule(s, [Component::term(TOK_A)]).unwrap();
        (g, s)
    }

    fn signature(root: &SppfRoot) -> Vec<(SppfKind, Option<TokenId>, TokenId, Vec<SppfId>, u64)> {
        let forest = root.forest();
        forest
            .ids()
            .map(|id| {
                let node = forest.node(id);
                (
                    node.kind(),
                    node.first_token(),
                    node.last_token(),
                    node.children().to_vec(),
                    forest.node_hash(id),
                )
            })
            .collect()
    }

    let input = || vec![(TOK_A, "a"), (TOK_A, "a"), (TOK_A, "a")];
    let (g1, s1) = grammar();
    let (g2, s2) = grammar();
    let (root1, _) = parse_with(&g1, s1, input());
    let (root2, _) = parse_with(&g2, s2, input());
    let (root1, root2) = (root1.unwrap(), root2.unwrap());

    assert_eq!(root1.root(), root2.root());
    assert_eq!(signature(&root1), signature(&root2));
}

#[test]
fn test_longest_match_wins() {
    // s := 'a' | 'a' 'b'
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A)]).unwrap();
    g.rule(s, [Component::term(TOK_A), Component::term(TOK_B)])
        .unwrap();

    let (root, diagnostics) = parse_with(&g, s, vec![(TOK_A, "a"), (TOK_B, "b")]);
    let root = root.expect("parses");
    assert!(diagnostics.is_empty());
    assert_eq!(root.content(), "ab");
}

#[test]
fn test_eof_only_input_returns_none() {
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A)]).unwrap();

    let (root, diagnostics) = parse_with(&g, s, vec![]);
    assert!(root.is_none());
    assert!(diagnostics.is_empty());
}

#[test]
fn test_no_enabled_rules_returns_none_silently() {
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    let rule = g.rule(s, [Component::term(TOK_A)]).unwrap();
    g.set_rule_enabled(rule, false);

    let (root, diagnostics) = parse_with(&g, s, vec![(TOK_A, "a")]);
    assert!(root.is_none());
    assert!(diagnostics.is_empty());
}

#[test]
fn test_terminal_mismatch_names_the_expected_terminal() {
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A), Component::term(TOK_B)])
        .unwrap();

    let (root, diagnostics) = parse_with(&g, s, vec![(TOK_A, "a"), (TOK_C, "c")]);
    assert!(root.is_none());
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].text(), "expected beta");
    assert_eq!(diagnostics[0].offset(), 1);
}

#[test]
fn test_no_rule_failure_reports_the_first_set() {
    // s := 'a' | 'b', input 'c'
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A)]).unwrap();
    g.rule(s, [Component::term(TOK_B)]).unwrap();

    let (root, diagnostics) = parse_with(&g, s, vec![(TOK_C, "c")]);
    assert!(root.is_none());
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].text(), "expected alpha or beta");
}

#[test]
fn test_optional_terminal_both_ways() {
    // s := 'a' 'b'? 'c'
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(
        s,
        [
            Component::term(TOK_A),
            Component::term(TOK_B).opt(),
            Component::term(TOK_C),
        ],
    )
    .unwrap();

    let (with, _) = parse_with(&g, s, vec![(TOK_A, "a"), (TOK_B, "b"), (TOK_C, "c")]);
    assert_eq!(with.expect("abc parses").content(), "abc");

    let (without, _) = parse_with(&g, s, vec![(TOK_A, "a"), (TOK_C, "c")]);
    assert_eq!(without.expect("ac parses").content(), "ac");
}

#[test]
fn test_optional_nonterminal_both_ways() {
    // s := m? 'c' ; m := 'b'
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    let m = g.nonterminal("m");
    g.rule(s, [Component::nt(m).opt(), Component::term(TOK_C)])
        .unwrap();
    g.rule(m, [Component::term(TOK_B)]).unwrap();

    let (with, _) = parse_with(&g, s, vec![(TOK_B, "b"), (TOK_C, "c")]);
    assert_eq!(with.expect("bc parses").content(), "bc");

    let (without, diagnostics) = parse_with(&g, s, vec![(TOK_C, "c")]);
    assert_eq!(without.expect("c parses").content(), "c");
    assert!(diagnostics.is_empty());
}

fn veto(_state: &mut ParseState<'_>) -> bool {
    false
}

#[test]
fn test_pre_parse_veto_suppresses_the_rule() {
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A)]).unwrap();
    g.add_pre_parse_action(s, veto);

    let (root, diagnostics) = parse_with(&g, s, vec![(TOK_A, "a")]);
    assert!(root.is_none());
    // the veto surfaces as "no rule matched" at the start position
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].text(), "expected alpha");
}

fn reject(_state: &mut ParseState<'_>) -> bool {
    false
}

#[test]
fn test_post_parse_rejection_fails_the_match() {
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A)]).unwrap();
    g.add_post_parse_action(s, reject);

    let (root, diagnostics) = parse_with(&g, s, vec![(TOK_A, "a")]);
    assert!(root.is_none());
    // semantic rejections carry no terminal expectation
    assert!(diagnostics.is_empty());
}

fn fatal_action(state: &mut ParseState<'_>) -> bool {
    state.emit(Severity::FatalError, "boom", "boom".to_string());
    true
}

#[test]
fn test_fatal_diagnostic_aborts_the_parse() {
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A)]).unwrap();
    g.add_post_parse_action(s, fatal_action);

    let mut parser = Parser::with_lexer(Box::new(SeqLexer::new(vec![(TOK_A, "a")])));
    let outcome = parser.try_parse(&g, s);
    let abort = outcome.expect_err("fatal diagnostic must abort");
    assert_eq!(abort.0.id(), "boom");
    assert_eq!(parser.diagnostics().fatal_error_count(), 1);
}

fn guard_spelling_is_a(state: &mut ParseState<'_>) -> bool {
    state.input_token().spelling() == "a"
}

#[test]
fn test_component_predicate_gates_a_match() {
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A).guard(guard_spelling_is_a)])
        .unwrap();

    let (good, _) = parse_with(&g, s, vec![(TOK_A, "a")]);
    assert!(good.is_some());

    // same kind, different spelling: the predicate rejects it
    let (bad, _) = parse_with(&g, s, vec![(TOK_A, "x")]);
    assert!(bad.is_none());
}

#[test]
fn test_first_set_prediction_never_prunes_a_viable_rule() {
    // every terminal in the first-set must start a parse attempt that
    // succeeds on a matching input
    let mut g = Grammar::new();
    let s = g.nonterminal("s");
    g.rule(s, [Component::term(TOK_A), Component::term(TOK_C)])
        .unwrap();
    g.rule(s, [Component::term(TOK_B), Component::term(TOK_C)])
        .unwrap();

    for (kind, spelling) in [(TOK_A, "a"), (TOK_B, "b")] {
        assert!(g.first_set(s).contains_key(&kind));
        let (root, _) = parse_with(&g, s, vec![(kind, spelling), (TOK_C, "c")]);
        assert!(root.is_some(), "input starting with a first-set terminal must parse");
    }
}

#[test]
fn test_nested_parentheses_share_nodes() {
    // p := '(' p ')' | 'a'
    let mut g = Grammar::new();
    let p = g.nonterminal("p");
    g.rule(
        p,
        [
            Component::term(TOK_LPAREN),
            Component::nt(p),
            Component::term(TOK_RPAREN),
        ],
    )
    .unwrap();
    g.rule(p, [Component::term(TOK_A)]).unwrap();

    let (root, _) = parse_with(
        &g,
        p,
        vec![
            (TOK_LPAREN, "("),
            (TOK_LPAREN, "("),
            (TOK_A, "a"),
            (TOK_RPAREN, ")"),
            (TOK_RPAREN, ")"),
        ],
    );
    let root = root.expect("nested parens parse");
    assert_eq!(root.content(), "((a))");
    assert_forest_invariants(&root);

    // unambiguous: exactly one packed child per level
    let node = root.node(root.root());
    assert_eq!(node.children().len(), 1);
}
