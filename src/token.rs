//! # Token Model
//!
//! Tokens are the indivisible pieces of text read by a lexer: each one
//! carries its kind (its "meaning" in the language), its byte offset and
//! length within the raw input, its line/column position, bit flags and a
//! spelling. The parser chains tokens into an input stream as it reads
//! them; inside a [`TokenBuf`] the token after `TokenId(n)` is
//! `TokenId(n + 1)`.
//!
//! Language implementations define their own kind constants at or above
//! [`TOK_USER_MIN`]; values below it are reserved.

use compact_str::CompactString;

/// A token's type (its "meaning"). 16-bit; values below [`TOK_USER_MIN`]
/// are reserved for the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKind(pub u16);

impl TokenKind {
    /// Nth user-defined kind, counting from [`TOK_USER_MIN`].
    #[must_use]
    pub const fn user(n: u16) -> Self {
        Self(TOK_USER_MIN.0 + n)
    }
}

/// Expresses "empty token" or "any token" depending on context; otherwise
/// not a valid kind.
pub const TOK_NULL: TokenKind = TokenKind(0);
/// End of input.
pub const TOK_EOF: TokenKind = TokenKind(1);
/// First language-specific kind.
pub const TOK_USER_MIN: TokenKind = TokenKind(0x0400);

/// Per-token bit flags. The top eight bits are free for language-specific
/// use.
pub type TokenFlags = u16;

/// Token is immediately preceded by whitespace.
pub const TF_SPACE_BEFORE: TokenFlags = 1;
/// Token is the first on its line.
pub const TF_STARTS_LINE: TokenFlags = 1 << 1;
/// First language-specific flag bit.
pub const TF_USER_MIN: TokenFlags = 1 << 8;

/// Handle of a token within a [`TokenBuf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub(crate) u32);

impl TokenId {
    /// The token immediately following this one in its buffer.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One lexeme.
///
/// The parser never mutates a token's kind or offset once read; lexers
/// populate all fields through the setter chain:
///
/// ```
/// use sylva::{Token, TokenKind, TF_STARTS_LINE};
///
/// let mut t = Token::new();
/// t.set_kind(TokenKind::user(0))
///     .set_offset(12)
///     .set_line_column(2, 1)
///     .set_flags(TF_STARTS_LINE)
///     .set_spelling("while");
/// assert_eq!(t.bytes(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    flags: TokenFlags,
    bytes: u16,
    offset: u32,
    line: u32,
    column: u32,
    spelling: CompactString,
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl Token {
    /// A null token: kind [`TOK_NULL`], zero offset/length, no flags,
    /// empty spelling.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kind: TOK_NULL,
            flags: 0,
            bytes: 0,
            offset: 0,
            line: 0,
            column: 0,
            spelling: CompactString::const_new(""),
        }
    }

    /// Reset all attributes to their defaults.
    pub fn reset(&mut self) -> &mut Self {
        *self = Self::new();
        self
    }

    pub fn set_kind(&mut self, kind: TokenKind) -> &mut Self {
        self.kind = kind;
        self
    }

    pub fn set_offset(&mut self, offset: u32) -> &mut Self {
        self.offset = offset;
        self
    }

    pub fn set_line_column(&mut self, line: u32, column: u32) -> &mut Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Replace all flags.
    pub fn set_flags(&mut self, flags: TokenFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    /// OR the given flags into those already set.
    pub fn add_flags(&mut self, flags: TokenFlags) -> &mut Self {
        self.flags |= flags;
        self
    }

    /// Clear the given flags.
    pub fn clear_flags(&mut self, flags: TokenFlags) -> &mut Self {
        self.flags &= !flags;
        self
    }

    /// Set the spelling and the byte length along with it.
    ///
    /// # Panics
    ///
    /// Panics if the spelling is longer than `u16::MAX` bytes; no real
    /// lexeme is.
    pub fn set_spelling(&mut self, spelling: &str) -> &mut Self {
        self.bytes = u16::try_from(spelling.len()).expect("token spelling too long");
        self.spelling = CompactString::new(spelling);
        self
    }

    #[must_use]
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    /// `true` if the kind matches.
    #[must_use]
    pub const fn is(&self, kind: TokenKind) -> bool {
        self.kind.0 == kind.0
    }

    /// Byte offset within the raw input text.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Number of bytes occupied within the raw input text.
    #[must_use]
    pub const fn bytes(&self) -> u32 {
        self.bytes as u32
    }

    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub const fn column(&self) -> u32 {
        self.column
    }

    #[must_use]
    pub const fn flags(&self) -> TokenFlags {
        self.flags
    }

    #[must_use]
    pub fn spelling(&self) -> &str {
        &self.spelling
    }

    /// `true` for any kind other than [`TOK_NULL`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.kind.0 != TOK_NULL.0
    }
}

/// The parser's token stream: an append-only arena addressed by
/// [`TokenId`].
#[derive(Debug, Default, Clone)]
pub struct TokenBuf {
    tokens: Vec<Token>,
}

impl TokenBuf {
    #[must_use]
    pub const fn new() -> Self {
        Self { tokens: Vec::new() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Append a token, returning its handle.
    pub fn push(&mut self, token: Token) -> TokenId {
        let id = TokenId(u32::try_from(self.tokens.len()).expect("token buffer overflow"));
        self.tokens.push(token);
        id
    }

    #[must_use]
    pub fn get(&self, id: TokenId) -> &Token {
        &self.tokens[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: TokenId) -> &mut Token {
        &mut self.tokens[id.index()]
    }

    /// Handle of the most recently read token.
    #[must_use]
    pub fn last_id(&self) -> Option<TokenId> {
        if self.tokens.is_empty() {
            None
        } else {
            Some(TokenId(self.tokens.len() as u32 - 1))
        }
    }

    /// The token after `id`, if already read.
    #[must_use]
    pub fn after(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(id.index() + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    /// Split the buffer after `last`: `self` keeps the prefix up to and
    /// including `last`, the remainder is returned re-based at index 0.
    pub(crate) fn detach_after(&mut self, last: TokenId) -> Self {
        let rest = self.tokens.split_off(last.index() + 1);
        Self { tokens: rest }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_defaults() {
        let t = Token::new();
        assert_eq!(t.kind(), TOK_NULL);
        assert_eq!(t.offset(), 0);
        assert_eq!(t.bytes(), 0);
        assert_eq!(t.flags(), 0);
        assert_eq!(t.spelling(), "");
        assert!(!t.is_valid());
    }

    #[test]
    fn test_spelling_round_trip() {
        // short spellings stay inline, long ones spill to the heap; byte
        // equality must hold either way
        for spelling in ["", "+", "0x1f", "a-rather-long-token-spelling-indeed"] {
            let mut t = Token::new();
            t.set_spelling(spelling);
            assert_eq!(t.spelling(), spelling);
            assert_eq!(t.bytes() as usize, spelling.len());
        }
    }

    #[test]
    fn test_flag_manipulation() {
        let mut t = Token::new();
        t.set_flags(TF_SPACE_BEFORE);
        t.add_flags(TF_STARTS_LINE | TF_USER_MIN);
        assert_eq!(t.flags(), TF_SPACE_BEFORE | TF_STARTS_LINE | TF_USER_MIN);
        t.clear_flags(TF_SPACE_BEFORE);
        assert_eq!(t.flags(), TF_STARTS_LINE | TF_USER_MIN);
    }

    #[test]
    fn test_kind_comparison() {
        let mut t = Token::new();
        t.set_kind(TOK_EOF);
        assert!(t.is(TOK_EOF));
        assert!(!t.is(TOK_NULL));
        assert!(t.is_valid());
        assert_eq!(TokenKind::user(3), TokenKind(0x0403));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut t = Token::new();
        t.set_kind(TokenKind::user(0))
            .set_offset(42)
            .set_line_column(3, 7)
            .set_flags(TF_STARTS_LINE)
            .set_spelling("abc");
        t.reset();
        assert_eq!(t, Token::new());
    }

    #[test]
    fn test_buf_next_links() {
        let mut buf = TokenBuf::new();
        let a = buf.push(Token::new());
        let b = buf.push(Token::new());
        assert_eq!(a.next(), b);
        assert_eq!(buf.last_id(), Some(b));
        assert!(buf.after(b).is_none());
    }

    #[test]
    fn test_buf_detach_after() {
        let mut buf = TokenBuf::new();
        for i in 0..4 {
            let mut t = Token::new();
            t.set_offset(i);
            buf.push(t);
        }
        let rest = buf.detach_after(TokenId(1));
        assert_eq!(buf.len(), 2);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest.get(TokenId(0)).offset(), 2);
    }
}
