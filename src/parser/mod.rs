//! # Parser
//!
//! The public parsing interface. A [`Parser`] owns the token stream it
//! reads from its [`Lexer`], the diagnostic machinery (handlers,
//! per-severity counters, dedup, error limit) and the debug-trace sink;
//! [`Parser::parse`] drives the GLL engine in [`gll`] over a
//! caller-supplied [`Grammar`] and returns the root of the longest
//! top-level match as an [`SppfRoot`], or `None`.
//!
//! Grammar callbacks (predicates, pre-/post-parse actions) receive a
//! [`ParseState`]: a view of the parse at the point of invocation, with
//! access to the forest built so far, the token stream, and diagnostic
//! emission.

pub(crate) mod gll;
pub(crate) mod gss;

use crate::diagnostics::{
    DiagState, Diagnostic, DiagnosticCounter, DiagnosticSink, FatalAbort, Severity,
};
use crate::grammar::{Grammar, NonTerminal, RuleId};
use crate::lexer::Lexer;
use crate::sppf::walk::{NonTerminalWalker, SubProductionWalker};
use crate::sppf::{Sppf, SppfId, SppfRoot};
use crate::token::{TOK_EOF, TOK_NULL, Token, TokenBuf, TokenId};
use std::any::Any;
use std::io::{self, Write};
use std::rc::Rc;

/// Number of consecutive null-kind tokens at one offset before the
/// lexer is declared stuck.
const LEXER_STRIKE_LIMIT: u32 = 3;

/// A generalized parser over user-defined grammars.
///
/// ```no_run
/// use sylva::{Grammar, Parser};
/// # struct MyLexer;
/// # impl sylva::Lexer for MyLexer {
/// #     fn lex(&mut self, out: &mut sylva::Token) -> Result<(), sylva::Diagnostic> {
/// #         out.set_kind(sylva::TOK_EOF);
/// #         Ok(())
/// #     }
/// #     fn token_kind_name(&self, _kind: sylva::TokenKind) -> &str { "?" }
/// # }
///
/// let mut grammar = Grammar::new();
/// let start = grammar.nonterminal("start");
/// // ... rules ...
///
/// let mut parser = Parser::new();
/// parser.set_lexer(Box::new(MyLexer));
/// if let Some(root) = parser.parse(&grammar, start) {
///     println!("matched: {}", root.content());
/// }
/// ```
pub struct Parser {
    lexer: Option<Box<dyn Lexer>>,
    tokens: TokenBuf,
    diag: DiagState,
    debug: bool,
    debug_out: Box<dyn Write>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lexer: None,
            tokens: TokenBuf::new(),
            diag: DiagState::new(),
            debug: false,
            debug_out: Box::new(io::stderr()),
        }
    }

    #[must_use]
    pub fn with_lexer(lexer: Box<dyn Lexer>) -> Self {
        let mut parser = Self::new();
        parser.set_lexer(lexer);
        parser
    }

    /// Bind the token source. Replacing the lexer does not discard
    /// tokens already read.
    pub fn set_lexer(&mut self, lexer: Box<dyn Lexer>) -> &mut Self {
        self.lexer = Some(lexer);
        self
    }

    #[must_use]
    pub fn lexer(&self) -> Option<&dyn Lexer> {
        self.lexer.as_deref()
    }

    /// The tokens read so far.
    #[must_use]
    pub fn tokens(&self) -> &TokenBuf {
        &self.tokens
    }

    /// Handle of the most recently read token.
    #[must_use]
    pub fn last_token(&self) -> Option<TokenId> {
        self.tokens.last_id()
    }

    /// Register a receiver for diagnostics.
    pub fn add_diagnostic_handler(&mut self, handler: Box<dyn DiagnosticSink>) -> &mut Self {
        self.diag.add_handler(handler);
        self
    }

    /// Per-severity diagnostic totals.
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticCounter {
        self.diag.counter()
    }

    #[must_use]
    pub fn error_limit(&self) -> usize {
        self.diag.error_limit()
    }

    /// Number of errors tolerated before a fatal diagnostic is
    /// synthesized (default [`DEFAULT_ERROR_LIMIT`](crate::diagnostics::DEFAULT_ERROR_LIMIT)).
    pub fn set_error_limit(&mut self, limit: usize) -> &mut Self {
        self.diag.set_error_limit(limit);
        self
    }

    /// Enable per-descriptor trace lines
    /// (`ENTER / RESUME / FINISH / FAIL / NORULE / IGNORE / XCFAIL`) on
    /// the debug sink.
    pub fn enable_debug(&mut self, enable: bool) -> &mut Self {
        self.debug = enable;
        self
    }

    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// Redirect trace output (stderr by default).
    pub fn set_debug_writer(&mut self, out: Box<dyn Write>) -> &mut Self {
        self.debug_out = out;
        self
    }

    /// The token after `pos`, reading from the lexer if required;
    /// `None` requests the first token of the stream.
    ///
    /// # Panics
    ///
    /// Panics if no lexer is bound and a token must be read.
    pub fn next_token(&mut self, pos: Option<TokenId>) -> TokenId {
        match pos {
            None => {
                if self.tokens.is_empty() {
                    self.read_token()
                } else {
                    TokenId(0)
                }
            }
            Some(p) => {
                if Some(p) == self.tokens.last_id() {
                    self.read_token()
                } else {
                    p.next()
                }
            }
        }
    }

    fn read_token(&mut self) -> TokenId {
        assert!(self.lexer.is_some(), "Parser::next_token(): no lexer set");
        let id = self.tokens.push(Token::new());

        let mut strikes = 0;
        let mut strike_offset: Option<u32> = None;

        loop {
            let Some(lexer) = self.lexer.as_mut() else {
                break;
            };
            let out = self.tokens.get_mut(id);
            out.reset();
            let lexed = lexer.lex(out);

            if let Err(d) = lexed {
                self.diag.emit(d);
            }

            let token = self.tokens.get(id);
            if !token.is(TOK_NULL) {
                break;
            }

            // lexer error; count consecutive strikes at one offset
            if strike_offset == Some(token.offset()) {
                strikes += 1;
            } else {
                strikes = 1;
                strike_offset = Some(token.offset());
            }
            if strikes == LEXER_STRIKE_LIMIT {
                let d = Diagnostic::at_token(
                    Severity::FatalError,
                    "lexer not returning any tokens",
                    token,
                    "lexer not returning any tokens".to_string(),
                );
                self.diag.emit(d);
            }
            if self.diag.fatal().is_some() {
                break;
            }
        }

        id
    }

    /// Discard all read tokens, the diagnostic dedup state and the
    /// counters; the lexer binding is preserved.
    pub fn reset(&mut self) -> &mut Self {
        self.tokens.clear();
        self.diag.clear_emitted();
        self.diag.reset_counts();
        self
    }

    /// Parse `start` over the bound lexer's token stream.
    ///
    /// Returns the root of the longest top-level match, or `None` when
    /// nothing matched (a diagnostic describes the farthest failure),
    /// when the first token is end-of-input, when `start` has no
    /// enabled rules, or when the parse was aborted by a fatal
    /// diagnostic. On success the matched tokens move into the returned
    /// [`SppfRoot`]; unmatched lookahead stays queued for the next
    /// call.
    ///
    /// # Panics
    ///
    /// Panics if no lexer is bound.
    pub fn parse(&mut self, grammar: &Grammar, start: NonTerminal) -> Option<SppfRoot> {
        self.try_parse(grammar, start).ok().flatten()
    }

    /// Like [`parse`](Self::parse), but surfaces a fatal abort as an
    /// error instead of folding it into `None`.
    pub fn try_parse(
        &mut self,
        grammar: &Grammar,
        start: NonTerminal,
    ) -> Result<Option<SppfRoot>, FatalAbort> {
        assert!(self.lexer.is_some(), "Parser::parse(): no lexer set");

        if !grammar
            .rules_of(start)
            .iter()
            .any(|&rule| grammar.rule_is_enabled(rule))
        {
            return Ok(None);
        }
        if self.diag.counter().fatal_error_count() > 0 {
            return Ok(None);
        }

        let first = self.next_token(None);
        if let Some(abort) = self.diag.take_fatal() {
            self.diag.clear_emitted();
            return Err(abort);
        }
        if self.tokens.get(first).is(TOK_EOF) {
            return Ok(None);
        }

        let outcome = gll::Gll::new(self, grammar, start).run(first);

        // recorded diagnostics only dedup within one parse call
        self.diag.clear_emitted();
        if let Some(abort) = self.diag.take_fatal() {
            return Err(abort);
        }

        let Some((sppf, root)) = outcome else {
            return Ok(None);
        };

        // hand the matched prefix of the token stream to the result;
        // the remainder is re-based for the next parse
        let last = sppf.node(root).last_token();
        let rest = self.tokens.detach_after(last);
        let matched = std::mem::replace(&mut self.tokens, rest);
        Ok(Some(SppfRoot::new(sppf, root, matched)))
    }
}

/// Callback view of an in-flight parse: the rule being matched, the
/// current input position, the partial forest, and diagnostic output.
pub struct ParseState<'p> {
    grammar: &'p Grammar,
    tokens: &'p TokenBuf,
    diag: &'p mut DiagState,
    forest: &'p mut Sppf,
    start: NonTerminal,
    rule: RuleId,
    input: TokenId,
    parsed: Option<SppfId>,
}

impl<'p> ParseState<'p> {
    #[must_use]
    pub fn grammar(&self) -> &'p Grammar {
        self.grammar
    }

    /// The parse's entry nonterminal.
    #[must_use]
    pub const fn start(&self) -> NonTerminal {
        self.start
    }

    /// The rule being attempted or completed.
    #[must_use]
    pub const fn rule(&self) -> RuleId {
        self.rule
    }

    /// Index of [`rule`](Self::rule) within its nonterminal.
    #[must_use]
    pub fn rule_index(&self) -> u32 {
        self.grammar.rule_index(self.rule)
    }

    /// The nonterminal owning [`rule`](Self::rule).
    #[must_use]
    pub fn nonterminal(&self) -> NonTerminal {
        self.grammar.rule_nonterminal(self.rule)
    }

    /// Current input position.
    #[must_use]
    pub const fn input(&self) -> TokenId {
        self.input
    }

    #[must_use]
    pub fn input_token(&self) -> &Token {
        self.tokens.get(self.input)
    }

    /// The completed match (post-parse actions only).
    #[must_use]
    pub const fn parsed_node(&self) -> Option<SppfId> {
        self.parsed
    }

    #[must_use]
    pub fn tokens(&self) -> &'p TokenBuf {
        self.tokens
    }

    #[must_use]
    pub fn forest(&self) -> &Sppf {
        self.forest
    }

    /// Iterate the sub-productions of a forest node.
    #[must_use]
    pub fn sub_productions(&self, id: SppfId) -> SubProductionWalker<'_> {
        self.forest.sub_productions(id)
    }

    /// Iterate the immediate nonterminal children of a forest node.
    #[must_use]
    pub fn non_terminals(&self, id: SppfId) -> NonTerminalWalker<'_> {
        self.forest.non_terminals(id)
    }

    /// The token following a node's last token, if already read.
    #[must_use]
    pub fn token_after_node(&self, id: SppfId) -> Option<&Token> {
        self.tokens.after(self.forest.node(id).last_token())
    }

    /// Attach a semantic value to the parsed node. No-op when there is
    /// no parsed node (pre-parse actions).
    pub fn set_value<T: Any>(&mut self, value: T) {
        if let Some(parsed) = self.parsed {
            self.forest.set_aux(parsed, Rc::new(value));
        }
    }

    /// The semantic value of a node, downcast to `T`.
    #[must_use]
    pub fn value_of<T: Any>(&self, id: SppfId) -> Option<&T> {
        self.forest.aux_as(id)
    }

    /// Share another node's semantic value with the parsed node.
    /// `false` when the source has no value.
    pub fn share_value_from(&mut self, source: SppfId) -> bool {
        let Some(parsed) = self.parsed else {
            return false;
        };
        let Some(value) = self.forest.aux(source).cloned() else {
            return false;
        };
        self.forest.set_aux(parsed, value);
        true
    }

    /// Emit a diagnostic at the current input position.
    pub fn emit(&mut self, severity: Severity, id: &'static str, text: String) {
        let d = Diagnostic::at_token(severity, id, self.input_token(), text);
        self.diag.emit(d);
    }
}
