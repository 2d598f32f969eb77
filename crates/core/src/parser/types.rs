use super::Parser;
use crate::error::{VfrError, VfrResult};
use crate::layout::{FieldDecl, FieldType};
use crate::lexer::Token;
use tracing::{event, Level};

impl<'a> Parser<'a> {
    // -- Type parsing -------------------------------------------

    /// A built-in type keyword or a previously declared typedef.
    pub(super) fn parse_type_name(&mut self) -> VfrResult<FieldType> {
        let line = self.line();
        match self.peek() {
            Token::Word(w) => {
                let ty = self
                    .symbols
                    .types
                    .lookup(w)
                    .ok_or_else(|| VfrError::undeclared(line, w.clone()))?;
                self.advance();
                Ok(ty)
            }
            _ => Err(self.unexpected("type name")),
        }
    }

    /// `typedef (struct|union) [Tag] { fields } [Name] ;`
    pub(super) fn parse_typedef(&mut self) -> VfrResult<()> {
        let line = self.expect_word("typedef")?;
        let is_union = if self.eat_word("union") {
            true
        } else {
            self.expect_word("struct")?;
            false
        };
        let tag = if self.is(&Token::LBrace) {
            None
        } else {
            Some(self.take_ident()?)
        };
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.is(&Token::RBrace) {
            fields.push(self.parse_field_decl()?);
        }
        self.advance();
        let alias = if self.is(&Token::Semicolon) {
            None
        } else {
            Some(self.take_ident()?)
        };
        self.end_statement()?;
        let name = alias
            .or(tag)
            .ok_or_else(|| VfrError::syntax(line, "typedef needs a name"))?;
        self.symbols.types.declare(&name, is_union, fields, line)?;
        Ok(())
    }

    /// `TYPE Name ;`, `TYPE Name[N] ;` or `TYPE [Name] : Width ;`
    fn parse_field_decl(&mut self) -> VfrResult<FieldDecl> {
        let line = self.line();
        let ty = self.parse_type_name()?;
        let name = if self.is(&Token::Colon) {
            None
        } else {
            Some(self.take_ident()?)
        };
        let mut decl = FieldDecl {
            name,
            ty,
            array_len: None,
            bit_width: None,
            line,
        };
        if self.eat(&Token::LBracket) {
            decl.array_len = Some(self.take_u32("array size")?);
            self.expect(&Token::RBracket)?;
        } else if self.eat(&Token::Colon) {
            decl.bit_width = Some(self.take_u32("bitfield width")?);
        } else if decl.name.is_none() {
            return Err(self.unexpected("':'"));
        }
        self.end_statement()?;
        Ok(decl)
    }

    // -- Pragmas ------------------------------------------------

    /// `#pragma pack ( [show | push [, id] [, N] | pop [, id] [, N] | N] )`
    pub(super) fn parse_pragma(&mut self) -> VfrResult<()> {
        let line = self.expect(&Token::Hash)?;
        self.expect_word("pragma")?;
        self.expect_word("pack")?;
        self.expect(&Token::LParen)?;
        if self.eat(&Token::RParen) {
            return self.symbols.types.set_pack(None, line);
        }
        if let Token::Number(_) = self.peek() {
            let value = self.take_u32("pack")?;
            self.expect(&Token::RParen)?;
            return self.symbols.types.set_pack(Some(value), line);
        }
        let action = self.take_ident()?;
        let mut id = None;
        let mut value = None;
        while self.eat(&Token::Comma) {
            match self.peek() {
                Token::Number(_) if value.is_none() => value = Some(self.take_u32("pack")?),
                Token::Word(_) if id.is_none() && value.is_none() => id = Some(self.take_ident()?),
                _ => return Err(self.unexpected("pack identifier or value")),
            }
        }
        self.expect(&Token::RParen)?;
        match action.as_str() {
            "show" => {
                event!(Level::INFO, "line {}: pack alignment is {}", line, self.symbols.types.pack());
                Ok(())
            }
            "push" => self.symbols.types.push_pack(id, value, line),
            "pop" => self.symbols.types.pop_pack(id.as_deref(), value, line),
            other => Err(VfrError::syntax(
                line,
                format!("unknown pack action '{}'", other),
            )),
        }
    }
}
