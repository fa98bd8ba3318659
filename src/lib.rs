//! # Sylva
//!
//! A generalized parsing engine: feed it any context-free grammar —
//! ambiguous and left-recursive grammars included — plus a token
//! stream, and it produces a Shared Packed Parse Forest (SPPF)
//! representing every valid derivation. The engine implements the GLL
//! algorithm (Scott & Johnstone): recursive-descent-like parsing over a
//! graph-structured stack and a worklist of descriptors, with
//! worst-case cubic time and space.
//!
//! ## Overview
//!
//! - **Grammar model** ([`grammar`]): nonterminals, rules and
//!   components, with derived first-set / LL(1) / matches-empty
//!   analyses used to prune the parse.
//! - **Engine** ([`parser`]): the GLL worklist loop, the
//!   graph-structured stack, longest-match selection and
//!   farthest-failure error reporting.
//! - **Forest** ([`sppf`]): shared, hash-consed parse forest nodes with
//!   raw, nonterminal and sub-production walkers plus GraphViz output.
//! - **Diagnostics** ([`diagnostics`]): severities, sinks, counters,
//!   dedup and the error limit.
//! - **Tokens** ([`token`]) and the [`lexer`] contract: the engine only
//!   needs typed tokens with offsets and a way to name token kinds.
//!
//! ## Quick start
//!
//! ```
//! use sylva::{Component, Diagnostic, Grammar, Lexer, Parser, Token, TokenKind, TOK_EOF};
//!
//! const TOK_WORD: TokenKind = TokenKind::user(0);
//!
//! /// One-shot lexer producing a single word, then end of input.
//! struct WordLexer(bool);
//!
//! impl Lexer for WordLexer {
//!     fn lex(&mut self, out: &mut Token) -> Result<(), Diagnostic> {
//!         if self.0 {
//!             out.set_kind(TOK_EOF).set_offset(5).set_line_column(1, 6);
//!         } else {
//!             self.0 = true;
//!             out.set_kind(TOK_WORD).set_line_column(1, 1).set_spelling("hello");
//!         }
//!         Ok(())
//!     }
//!
//!     fn token_kind_name(&self, kind: TokenKind) -> &str {
//!         match kind {
//!             TOK_WORD => "word",
//!             _ => "end of input",
//!         }
//!     }
//! }
//!
//! let mut grammar = Grammar::new();
//! let greeting = grammar.nonterminal("greeting");
//! grammar.rule(greeting, [Component::term(TOK_WORD)]).unwrap();
//!
//! let mut parser = Parser::with_lexer(Box::new(WordLexer(false)));
//! let root = parser.parse(&grammar, greeting).expect("should match");
//! assert_eq!(root.content(), "hello");
//! ```
//!
//! Ambiguity is surfaced, not resolved: when a symbol or intermediate
//! node carries more than one packed child, each child is one
//! derivation. Semantic choices between derivations belong to the
//! embedder, via the walkers or registered post-parse actions.

pub mod diagnostics;
pub mod grammar;
pub mod lexer;
pub mod parser;
pub mod sppf;
pub mod token;

pub use diagnostics::{
    DEFAULT_ERROR_LIMIT, Diagnostic, DiagnosticCounter, DiagnosticSink, FatalAbort, Severity,
};
pub use grammar::{
    Component, Grammar, GrammarError, HIDE_IF_DELEGATE, KEEP_RECURSION, NonTerminal, NtFlags,
    RuleId, Slot, TRANSPARENT,
};
pub use lexer::Lexer;
pub use parser::{ParseState, Parser};
pub use sppf::walk::{NonTerminalWalker, SubProductionWalker, Walker};
pub use sppf::{Sppf, SppfId, SppfKind, SppfNode, SppfRoot};
pub use token::{
    TF_SPACE_BEFORE, TF_STARTS_LINE, TF_USER_MIN, TOK_EOF, TOK_NULL, TOK_USER_MIN, Token, TokenBuf,
    TokenFlags, TokenId, TokenKind,
};
