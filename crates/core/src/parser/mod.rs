//! Recursive-descent parser from a token slice to the opcode tree.
//!
//! Productions are methods on [`Parser`] and return finished nodes. The
//! first error aborts the unit; there is no recovery.

use crate::compile::CompiledUnit;
use crate::config::ParserConfig;
use crate::cursor::TokenCursor;
use crate::error::{VfrError, VfrResult};
use crate::flags::{self, FlagItem, FlagKind, FlagSet};
use crate::lexer::{is_keyword, Spanned, Token};
use crate::link::link;
use crate::opcode::{ExpressionInfo, OpcodeNode};
use crate::symbols::SymbolTable;
use tracing::{event, Level};

mod constants;
mod expressions;
mod formset;
mod questions;
mod statements;
mod types;

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

pub(crate) struct Parser<'a> {
    cursor: TokenCursor<'a>,
    symbols: SymbolTable,
    max_depth: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], config: &ParserConfig) -> Self {
        Parser {
            cursor: TokenCursor::new(tokens),
            symbols: SymbolTable::new(config.default_pack),
            max_depth: config.max_depth,
            depth: 0,
        }
    }

    fn peek(&self) -> &'a Token {
        self.cursor.peek()
    }

    fn line(&self) -> u32 {
        self.cursor.line()
    }

    fn advance(&mut self) -> &'a Spanned {
        self.cursor.next()
    }

    fn err(&self, msg: impl Into<String>) -> VfrError {
        VfrError::syntax(self.line(), msg)
    }

    fn unexpected(&self, expected: &str) -> VfrError {
        self.err(format!("expected {}, got {}", expected, self.peek()))
    }

    fn is(&self, t: &Token) -> bool {
        self.peek() == t
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(x) if x == w)
    }

    fn is_word_at(&self, k: usize, w: &str) -> bool {
        matches!(self.cursor.peek_nth(k), Token::Word(x) if x == w)
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.is(t) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, w: &str) -> bool {
        if self.is_word(w) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: &Token) -> VfrResult<u32> {
        if self.is(t) {
            Ok(self.advance().line)
        } else {
            Err(self.unexpected(&t.to_string()))
        }
    }

    fn expect_word(&mut self, w: &str) -> VfrResult<u32> {
        if self.is_word(w) {
            Ok(self.advance().line)
        } else {
            Err(self.unexpected(&format!("'{}'", w)))
        }
    }

    /// `key =`
    fn clause(&mut self, key: &str) -> VfrResult<u32> {
        let line = self.expect_word(key)?;
        self.expect(&Token::Assign)?;
        Ok(line)
    }

    /// `, key =` when the clause is present.
    fn eat_clause(&mut self, key: &str) -> VfrResult<bool> {
        if self.is(&Token::Comma) && self.is_word_at(1, key) {
            self.advance();
            self.clause(key)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// A user identifier; reserved words are rejected.
    fn take_ident(&mut self) -> VfrResult<String> {
        match self.peek() {
            Token::Word(w) if !is_keyword(w) => {
                let w = w.clone();
                self.advance();
                Ok(w)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn end_statement(&mut self) -> VfrResult<u32> {
        self.expect(&Token::Semicolon)
    }

    /// Run `f` as a speculative alternative: on failure the cursor is put
    /// back and `None` returned. `f` must not touch the symbol tables.
    fn speculate<T>(&mut self, f: impl FnOnce(&mut Self) -> VfrResult<T>) -> Option<T> {
        let mark = self.cursor.mark();
        match f(self) {
            Ok(v) => Some(v),
            Err(e) => {
                event!(Level::TRACE, "speculation rejected: {}", e);
                self.cursor.reset(mark);
                None
            }
        }
    }

    /// Charge one level against `max_depth`. Callers restore `depth`.
    fn deeper(&mut self) -> VfrResult<()> {
        if self.depth >= self.max_depth {
            return Err(self.err(format!("nesting deeper than {} levels", self.max_depth)));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run a production one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> VfrResult<T>) -> VfrResult<T> {
        self.deeper()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    // -- Flags --------------------------------------------------

    /// `A | B | 0x10`
    fn parse_flag_items(&mut self) -> VfrResult<Vec<FlagItem>> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Token::Word(w) => {
                    items.push(FlagItem::Name(w.clone()));
                    self.advance();
                }
                Token::Number(_) => items.push(FlagItem::Number(self.take_number()?)),
                _ => return Err(self.unexpected("flag name or number")),
            }
            if !self.eat(&Token::Pipe) {
                return Ok(items);
            }
        }
    }

    fn parse_flags(&mut self, kind: FlagKind) -> VfrResult<FlagSet> {
        let line = self.line();
        let items = self.parse_flag_items()?;
        flags::fold(kind, &items, line)
    }

    // -- Program ------------------------------------------------

    fn parse_program(&mut self) -> VfrResult<OpcodeNode> {
        loop {
            match self.peek() {
                Token::Hash => self.parse_pragma()?,
                Token::Word(w) if w == "typedef" => self.parse_typedef()?,
                Token::Word(w) if w == "formset" => break,
                _ => return Err(self.unexpected("'formset'")),
            }
        }
        let formset = self.parse_formset()?;
        if !self.is(&Token::Eof) {
            return Err(self.unexpected("end of input after 'endformset'"));
        }
        Ok(formset)
    }
}

/// Parse and link one compilation unit.
pub fn parse(tokens: &[Spanned], config: &ParserConfig) -> VfrResult<CompiledUnit> {
    let mut unit = parse_unlinked(tokens, config)?;
    let linked = link(&mut unit.formset, &unit.symbols)?;
    event!(Level::DEBUG, "{} forward references linked", linked);
    Ok(unit)
}

/// Parse one compilation unit, leaving forward references pending.
pub fn parse_unlinked(tokens: &[Spanned], config: &ParserConfig) -> VfrResult<CompiledUnit> {
    config.validate()?;
    let mut p = Parser::new(tokens, config);
    let formset = p.parse_program()?;
    event!(
        Level::DEBUG,
        "formset parsed: {} opcodes, {} questions",
        formset.count(),
        p.symbols.question_count()
    );
    Ok(CompiledUnit {
        formset,
        symbols: p.symbols,
    })
}

/// Parse a standalone expression that must span the whole token slice.
pub fn parse_expression(tokens: &[Spanned], config: &ParserConfig) -> VfrResult<ExpressionInfo> {
    config.validate()?;
    let mut p = Parser::new(tokens, config);
    let info = p.parse_expression()?;
    if !p.is(&Token::Eof) {
        return Err(p.unexpected("end of expression"));
    }
    Ok(info)
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
