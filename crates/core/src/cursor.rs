//! Token cursor: the token-source boundary of the parser.
//!
//! Reads an immutable, `Eof`-terminated token slice with bounded lookahead
//! and save/restore marks for speculative parsing.

use crate::lexer::{Spanned, Token};

/// A saved cursor position, restored with [`TokenCursor::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

#[derive(Debug, Clone)]
pub struct TokenCursor<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    /// `tokens` must be non-empty and end with `Token::Eof`.
    pub fn new(tokens: &'a [Spanned]) -> Self {
        debug_assert!(matches!(tokens.last(), Some(s) if s.token == Token::Eof));
        TokenCursor { tokens, pos: 0 }
    }

    pub fn current(&self) -> &'a Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub fn peek(&self) -> &'a Token {
        &self.current().token
    }

    /// Token `k` positions ahead of the current one; `Eof` past the end.
    pub fn peek_nth(&self, k: usize) -> &'a Token {
        let idx = (self.pos + k).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    pub fn line(&self) -> u32 {
        self.current().line
    }

    /// Consume the current token. The cursor never moves past `Eof`.
    pub fn next(&mut self) -> &'a Spanned {
        let t = self.current();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    pub fn mark(&self) -> Mark {
        Mark(self.pos)
    }

    pub fn reset(&mut self, mark: Mark) {
        self.pos = mark.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    #[test]
    fn peek_nth_saturates_at_eof() {
        let toks = lex("a b").unwrap();
        let c = TokenCursor::new(&toks);
        assert_eq!(c.peek_nth(1), &Token::Word("b".into()));
        assert_eq!(c.peek_nth(7), &Token::Eof);
    }

    #[test]
    fn reset_restores_position() {
        let toks = lex("a b c").unwrap();
        let mut c = TokenCursor::new(&toks);
        c.next();
        let m = c.mark();
        c.next();
        c.next();
        assert_eq!(c.peek(), &Token::Eof);
        c.reset(m);
        assert_eq!(c.peek(), &Token::Word("b".into()));
    }

    #[test]
    fn next_stops_at_eof() {
        let toks = lex("").unwrap();
        let mut c = TokenCursor::new(&toks);
        c.next();
        c.next();
        assert_eq!(c.peek(), &Token::Eof);
    }
}
