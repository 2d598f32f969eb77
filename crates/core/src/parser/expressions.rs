use super::Parser;
use crate::error::{VfrError, VfrResult};
use crate::flags::{self, FlagKind};
use crate::layout::FieldType;
use crate::lexer::Token;
use crate::opcode::{
    BinaryOp, Comparison, Constant, ExpressionInfo, Opcode, OpcodeNode, QuestionId, Reference,
    StringId, UnaryOp,
};
use crate::symbols::VarStoreInfo;

fn word_is(t: &Token, a: &str, b: &str) -> bool {
    matches!(t, Token::Word(w) if w == a || w == b)
}

fn binary(op: BinaryOp, line: u32, left: OpcodeNode, right: OpcodeNode) -> OpcodeNode {
    OpcodeNode::with_children(Opcode::Binary(op), line, vec![left, right])
}

fn unary(op: Opcode, line: u32, operand: OpcodeNode) -> OpcodeNode {
    OpcodeNode::with_children(op, line, vec![operand])
}

fn question_ref(question: Reference<QuestionId>, line: u32) -> OpcodeNode {
    OpcodeNode::new(Opcode::QuestionRef1 { question }, line)
}

impl<'a> Parser<'a> {
    // -- Expression parsing --------------------------------------

    pub(crate) fn parse_expression(&mut self) -> VfrResult<ExpressionInfo> {
        let line = self.line();
        let root = self.parse_or_expr()?;
        Ok(ExpressionInfo::new(line, root))
    }

    /// One left-associative precedence layer. Every fold deepens the tree
    /// by one level and is charged against `max_depth`.
    fn fold_chain(
        &mut self,
        next: fn(&mut Self) -> VfrResult<OpcodeNode>,
        op_of: fn(&Token) -> Option<BinaryOp>,
    ) -> VfrResult<OpcodeNode> {
        let depth = self.depth;
        let result = self.fold_links(next, op_of);
        self.depth = depth;
        result
    }

    fn fold_links(
        &mut self,
        next: fn(&mut Self) -> VfrResult<OpcodeNode>,
        op_of: fn(&Token) -> Option<BinaryOp>,
    ) -> VfrResult<OpcodeNode> {
        let mut left = next(self)?;
        while let Some(op) = op_of(self.peek()) {
            self.deeper()?;
            let line = self.advance().line;
            let right = next(self)?;
            left = binary(op, line, left, right);
        }
        Ok(left)
    }

    fn parse_or_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_and_expr, |t| {
            word_is(t, "OR", "or").then_some(BinaryOp::Or)
        })
    }

    fn parse_and_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_bitor_expr, |t| {
            word_is(t, "AND", "and").then_some(BinaryOp::And)
        })
    }

    fn parse_bitor_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_bitand_expr, |t| {
            (t == &Token::Pipe).then_some(BinaryOp::BitwiseOr)
        })
    }

    fn parse_bitand_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_equality_expr, |t| {
            (t == &Token::Amp).then_some(BinaryOp::BitwiseAnd)
        })
    }

    fn parse_equality_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_relational_expr, |t| match t {
            Token::EqEq => Some(BinaryOp::Equal),
            Token::NotEq => Some(BinaryOp::NotEqual),
            _ => None,
        })
    }

    fn parse_relational_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_shift_expr, |t| match t {
            Token::Lt => Some(BinaryOp::LessThan),
            Token::Le => Some(BinaryOp::LessEqual),
            Token::Gt => Some(BinaryOp::GreaterThan),
            Token::Ge => Some(BinaryOp::GreaterEqual),
            _ => None,
        })
    }

    fn parse_shift_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_additive_expr, |t| match t {
            Token::Shl => Some(BinaryOp::ShiftLeft),
            Token::Shr => Some(BinaryOp::ShiftRight),
            _ => None,
        })
    }

    fn parse_additive_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_multiplicative_expr, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Subtract),
            _ => None,
        })
    }

    fn parse_multiplicative_expr(&mut self) -> VfrResult<OpcodeNode> {
        self.fold_chain(Self::parse_cast_expr, |t| match t {
            Token::Star => Some(BinaryOp::Multiply),
            Token::Slash => Some(BinaryOp::Divide),
            Token::Percent => Some(BinaryOp::Modulo),
            _ => None,
        })
    }

    /// `(BOOLEAN) x`, `(UINT16) x`, ... applied right to left.
    fn parse_cast_expr(&mut self) -> VfrResult<OpcodeNode> {
        let cast = match (self.peek(), self.cursor.peek_nth(1), self.cursor.peek_nth(2)) {
            (Token::LParen, Token::Word(w), Token::RParen) => match w.as_str() {
                "BOOLEAN" => Some(UnaryOp::ToBoolean),
                "UINT8" | "UINT16" | "UINT32" | "UINT64" => Some(UnaryOp::ToUint),
                _ => None,
            },
            _ => None,
        };
        match cast {
            Some(op) => {
                let line = self.advance().line;
                self.advance();
                self.advance();
                let operand = self.nested(Self::parse_cast_expr)?;
                Ok(unary(Opcode::Unary(op), line, operand))
            }
            None => self.parse_atom(),
        }
    }

    // -- Atoms ----------------------------------------------------

    fn parse_atom(&mut self) -> VfrResult<OpcodeNode> {
        self.nested(Self::parse_atom_inner)
    }

    fn parse_atom_inner(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.line();
        let w = match self.peek() {
            Token::Tilde => {
                self.advance();
                let [operand] = self.parse_args::<1>()?;
                return Ok(unary(Opcode::Unary(UnaryOp::BitwiseNot), line, operand));
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_or_expr()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Token::Number(_) => {
                let n = self.take_number()?;
                return Ok(OpcodeNode::new(Opcode::Constant(Constant::uint(n)), line));
            }
            Token::Word(w) => w.as_str(),
            _ => return Err(self.unexpected("expression")),
        };

        let constant = match w {
            "TRUE" | "true" => Some(Constant::True),
            "FALSE" | "false" => Some(Constant::False),
            "ONE" | "one" => Some(Constant::One),
            "ONES" | "ones" => Some(Constant::Ones),
            "ZERO" | "zero" => Some(Constant::Zero),
            "UNDEFINED" | "undefined" => Some(Constant::Undefined),
            "VERSION" | "version" => Some(Constant::Version),
            _ => None,
        };
        if let Some(c) = constant {
            self.advance();
            return Ok(OpcodeNode::new(Opcode::Constant(c), line));
        }

        let simple_unary = match w {
            "length" => Some(UnaryOp::Length),
            "bitwisenot" => Some(UnaryOp::BitwiseNot),
            "boolval" => Some(UnaryOp::ToBoolean),
            "uintval" | "unintval" => Some(UnaryOp::ToUint),
            "toupper" => Some(UnaryOp::ToUpper),
            "tolower" => Some(UnaryOp::ToLower),
            _ => None,
        };
        if let Some(op) = simple_unary {
            self.advance();
            let [operand] = self.parse_args::<1>()?;
            return Ok(unary(Opcode::Unary(op), line, operand));
        }

        self.advance();
        match w {
            "NOT" | "not" => {
                let operand = self.parse_atom()?;
                Ok(unary(Opcode::Unary(UnaryOp::Not), line, operand))
            }
            "dup" => Ok(OpcodeNode::new(Opcode::Dup, line)),
            "pushthis" => Ok(OpcodeNode::new(Opcode::This, line)),
            "catenate" => {
                let args = self.parse_args::<2>()?;
                Ok(OpcodeNode::with_children(Opcode::Catenate, line, args.into()))
            }
            "match" => {
                let args = self.parse_args::<2>()?;
                Ok(OpcodeNode::with_children(Opcode::Match, line, args.into()))
            }
            "match2" => {
                self.expect(&Token::LParen)?;
                let pattern = self.parse_or_expr()?;
                self.expect(&Token::Comma)?;
                let target = self.parse_or_expr()?;
                self.expect(&Token::Comma)?;
                let guid = self.parse_guid()?;
                self.expect(&Token::RParen)?;
                Ok(OpcodeNode::with_children(
                    Opcode::Match2 { guid },
                    line,
                    vec![pattern, target],
                ))
            }
            "stringrefval" => {
                let [operand] = self.parse_args::<1>()?;
                Ok(unary(Opcode::StringRef2, line, operand))
            }
            "mid" => {
                let args = self.parse_args::<3>()?;
                Ok(OpcodeNode::with_children(Opcode::Mid, line, args.into()))
            }
            "tok" => {
                let args = self.parse_args::<3>()?;
                Ok(OpcodeNode::with_children(Opcode::Token, line, args.into()))
            }
            "vareqval" => self.parse_vareqval(line),
            "ideqval" => self.parse_ideqval(line),
            "ideqid" => self.parse_ideqid(line),
            "ideqvallist" => self.parse_ideqvallist(line),
            "questionref" => {
                self.expect(&Token::LParen)?;
                let question = match self.peek() {
                    Token::Number(_) => Reference::Resolved(QuestionId(self.take_u16("question id")?)),
                    _ => {
                        let name_line = self.line();
                        let name = self.take_ident()?;
                        self.symbols.question_ref(&name, name_line)
                    }
                };
                self.expect(&Token::RParen)?;
                Ok(question_ref(question, line))
            }
            "questionrefval" => self.parse_questionrefval(line),
            "ruleref" => {
                self.expect(&Token::LParen)?;
                let name_line = self.line();
                let name = self.take_ident()?;
                self.expect(&Token::RParen)?;
                let rule = self.symbols.rule_ref(&name, name_line);
                Ok(OpcodeNode::new(Opcode::RuleRef { rule }, line))
            }
            "stringref" => {
                self.expect(&Token::LParen)?;
                let string = match self.peek() {
                    Token::Number(_) => StringId(self.take_u16("string id")?),
                    _ => self.parse_string_token()?,
                };
                self.expect(&Token::RParen)?;
                Ok(OpcodeNode::new(Opcode::StringRef1 { string }, line))
            }
            "security" => {
                self.expect(&Token::LParen)?;
                let guid = self.parse_guid()?;
                self.expect(&Token::RParen)?;
                Ok(OpcodeNode::new(Opcode::Security { guid }, line))
            }
            "get" => {
                self.expect(&Token::LParen)?;
                let storage = self.parse_storage_access()?;
                self.expect(&Token::RParen)?;
                Ok(OpcodeNode::new(Opcode::Get { storage }, line))
            }
            "set" => {
                self.expect(&Token::LParen)?;
                let storage = self.parse_storage_access()?;
                self.expect(&Token::Comma)?;
                let value = self.parse_or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(unary(Opcode::Set { storage }, line, value))
            }
            "stringval" => {
                let mut format = 0;
                if self.is_word("format") {
                    self.clause("format")?;
                    format = self.take_u8("format")?;
                    self.expect(&Token::Comma)?;
                }
                let [operand] = self.parse_args::<1>()?;
                Ok(unary(Opcode::ToString { format }, line, operand))
            }
            "cond" => {
                self.expect(&Token::LParen)?;
                let condition = self.parse_or_expr()?;
                self.expect(&Token::Question)?;
                let when_true = self.parse_or_expr()?;
                self.expect(&Token::Colon)?;
                let when_false = self.parse_or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(OpcodeNode::with_children(
                    Opcode::Conditional,
                    line,
                    vec![condition, when_true, when_false],
                ))
            }
            "find" => {
                self.expect(&Token::LParen)?;
                let format = self.parse_flags(FlagKind::FindFormat)?.kind_u8(line)?;
                let rest = self.parse_trailing_args::<3>()?;
                Ok(OpcodeNode::with_children(Opcode::Find { format }, line, rest.into()))
            }
            "span" => {
                self.expect(&Token::LParen)?;
                self.clause("flags")?;
                let flags = self.parse_flags(FlagKind::Span)?.kind_u8(line)?;
                let rest = self.parse_trailing_args::<3>()?;
                Ok(OpcodeNode::with_children(Opcode::Span { flags }, line, rest.into()))
            }
            "map" => {
                self.expect(&Token::LParen)?;
                let mut children = vec![self.parse_or_expr()?];
                self.expect(&Token::Colon)?;
                while !self.is(&Token::RParen) {
                    children.push(self.parse_or_expr()?);
                    self.expect(&Token::Comma)?;
                    children.push(self.parse_or_expr()?);
                    self.expect(&Token::Semicolon)?;
                }
                self.advance();
                Ok(OpcodeNode::with_children(Opcode::Map, line, children))
            }
            other => Err(VfrError::syntax(
                line,
                format!("expected expression, got '{}'", other),
            )),
        }
    }

    /// `( e , e , ... )` with exactly `N` operands.
    fn parse_args<const N: usize>(&mut self) -> VfrResult<[OpcodeNode; N]> {
        self.expect(&Token::LParen)?;
        let args = self.parse_arg_list::<N>()?;
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    /// `, e , e , e )` after a leading clause.
    fn parse_trailing_args<const N: usize>(&mut self) -> VfrResult<[OpcodeNode; N]> {
        self.expect(&Token::Comma)?;
        let args = self.parse_arg_list::<N>()?;
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_arg_list<const N: usize>(&mut self) -> VfrResult<[OpcodeNode; N]> {
        let mut args = Vec::with_capacity(N);
        for i in 0..N {
            if i > 0 {
                self.expect(&Token::Comma)?;
            }
            args.push(self.parse_or_expr()?);
        }
        args.try_into()
            .map_err(|_| self.err("wrong number of operands"))
    }

    fn parse_comparison(&mut self) -> VfrResult<Comparison> {
        let cmp = match self.peek() {
            Token::EqEq => Comparison::Equal,
            Token::Le => Comparison::LessEqual,
            Token::Lt => Comparison::LessThan,
            Token::Ge => Comparison::GreaterEqual,
            Token::Gt => Comparison::GreaterThan,
            _ => return Err(self.unexpected("comparison operator")),
        };
        self.advance();
        Ok(cmp)
    }

    /// A question named by `name=` or by its varid path. Paths are checked
    /// against the store layout before the question lookup.
    fn parse_question_locator(&mut self) -> VfrResult<Reference<QuestionId>> {
        let line = self.line();
        let key = if matches!(self.cursor.peek_nth(1), Token::Dot | Token::LBracket) {
            let path = self.parse_var_path()?;
            self.symbols.resolve_var_id(&path)?;
            path.to_string()
        } else {
            self.take_ident()?
        };
        Ok(self.symbols.question_ref(&key, line))
    }

    /// `vareqval var ( N ) op N`
    fn parse_vareqval(&mut self, line: u32) -> VfrResult<OpcodeNode> {
        self.expect_word("var")?;
        self.expect(&Token::LParen)?;
        let var_index = self.take_u16("variable index")?;
        self.expect(&Token::RParen)?;
        let comparison = self.parse_comparison()?;
        let value = self.take_u16("comparison value")?;
        Ok(OpcodeNode::new(
            Opcode::VarEqVal {
                var_index,
                comparison,
                value,
            },
            line,
        ))
    }

    /// `ideqval Q op N`. Only `==` has a dedicated opcode; other comparators
    /// compare a question reference against a constant.
    fn parse_ideqval(&mut self, line: u32) -> VfrResult<OpcodeNode> {
        let question = self.parse_question_locator()?;
        let comparison = self.parse_comparison()?;
        let value = self.take_u16("comparison value")?;
        Ok(match comparison {
            Comparison::Equal => OpcodeNode::new(Opcode::EqIdVal { question, value }, line),
            other => binary(
                other.as_binary(),
                line,
                question_ref(question, line),
                OpcodeNode::new(Opcode::Constant(Constant::uint(u64::from(value))), line),
            ),
        })
    }

    /// `ideqid Q op Q`
    fn parse_ideqid(&mut self, line: u32) -> VfrResult<OpcodeNode> {
        let question1 = self.parse_question_locator()?;
        let comparison = self.parse_comparison()?;
        let question2 = self.parse_question_locator()?;
        Ok(match comparison {
            Comparison::Equal => OpcodeNode::new(Opcode::EqIdId { question1, question2 }, line),
            other => binary(
                other.as_binary(),
                line,
                question_ref(question1, line),
                question_ref(question2, line),
            ),
        })
    }

    /// `ideqvallist Q == N N ...`
    fn parse_ideqvallist(&mut self, line: u32) -> VfrResult<OpcodeNode> {
        let question = self.parse_question_locator()?;
        self.expect(&Token::EqEq)?;
        let mut values = vec![self.take_u16("list value")?];
        while matches!(self.peek(), Token::Number(_)) {
            values.push(self.take_u16("list value")?);
        }
        Ok(OpcodeNode::new(Opcode::EqIdValList { question, values }, line))
    }

    /// `questionrefval ( [devicepath = S ,] [uuid = G ,] e )`
    fn parse_questionrefval(&mut self, line: u32) -> VfrResult<OpcodeNode> {
        self.expect(&Token::LParen)?;
        let mut device_path = None;
        let mut guid = None;
        if self.is_word("devicepath") {
            self.clause("devicepath")?;
            device_path = Some(self.parse_string_token()?);
            self.expect(&Token::Comma)?;
        }
        if self.is_word("uuid") {
            self.clause("uuid")?;
            guid = Some(self.parse_guid()?);
            self.expect(&Token::Comma)?;
        }
        let operand = self.parse_or_expr()?;
        self.expect(&Token::RParen)?;
        let op = if device_path.is_none() && guid.is_none() {
            Opcode::QuestionRef2
        } else {
            Opcode::QuestionRef3 { device_path, guid }
        };
        Ok(unary(op, line, operand))
    }

    /// `V [| flags = F]` inside `get(...)` / `set(...)`. A size flag types
    /// name/value storage, which carries no type of its own.
    fn parse_storage_access(&mut self) -> VfrResult<VarStoreInfo> {
        let path = self.parse_var_path()?;
        let mut storage = self.symbols.resolve_var_id(&path)?;
        if self.is(&Token::Pipe) && self.is_word_at(1, "flags") {
            self.advance();
            self.clause("flags")?;
            let set = self.parse_flags(FlagKind::Numeric)?;
            if let Some(width) = flags::explicit_numeric_width(&set) {
                if storage.var_type.is_none() {
                    storage.var_type = FieldType::uint_of_width(width);
                    storage.size = u32::from(width);
                }
            }
        }
        Ok(storage)
    }
}
