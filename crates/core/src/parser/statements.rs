use super::constants::mask_to_width;
use super::Parser;
use crate::builder::Scope;
use crate::error::{VfrError, VfrResult};
use crate::flags::FlagKind;
use crate::layout::{self, PathSegment};
use crate::lexer::Token;
use crate::opcode::{
    Alignment, BannerLayout, FormId, GotoTarget, Guid, GuidDatum, GuidOpData, Opcode,
    OpcodeNode, QuestionHeader, QuestionId, Reference, StatementHeader, ValueType,
};

impl<'a> Parser<'a> {
    // -- Form items ---------------------------------------------

    /// Anything allowed directly inside `form` / `formmap`.
    pub(super) fn parse_form_item(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.line();
        match self.peek() {
            Token::Word(w) if w == "rule" => self.parse_rule(),
            Token::Word(w) if w == "banner" => self.parse_banner(),
            Token::Word(w) if w == "modal" => {
                self.advance();
                self.end_statement()?;
                Ok(OpcodeNode::new(Opcode::Modal, line))
            }
            _ => self.parse_statement(),
        }
    }

    /// A statement, question or conditional block.
    pub(super) fn parse_statement(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.line();
        let w = match self.peek() {
            Token::Word(w) => w.as_str(),
            _ => return Err(self.unexpected("statement")),
        };
        match w {
            "subtitle" => self.parse_subtitle(),
            "text" => self.parse_text(),
            "goto" => self.parse_goto(),
            "resetbutton" => self.parse_resetbutton(),
            "label" => {
                self.advance();
                let number = self.take_u16("label number")?;
                self.end_statement()?;
                Ok(OpcodeNode::new(Opcode::Label { number }, line))
            }
            "checkbox" => self.parse_checkbox(),
            "numeric" => self.parse_numeric(),
            "oneof" => self.parse_oneof(),
            "orderedlist" => self.parse_orderedlist(),
            "string" => self.parse_string(),
            "password" => self.parse_password(),
            "date" => self.parse_date(),
            "time" => self.parse_time(),
            "action" => self.parse_action(),
            "guidop" => self.parse_guidop(),
            "suppressif" => self.parse_statement_conditional(Opcode::SuppressIf),
            "grayoutif" => self.parse_statement_conditional(Opcode::GrayOutIf),
            "disableif" => self.parse_statement_conditional(Opcode::DisableIf),
            "inconsistentif" | "nosubmitif" | "warningif" => self.parse_check_if(),
            "image" | "locked" => {
                let tag = self.parse_tag()?;
                self.end_statement()?;
                Ok(tag)
            }
            _ => Err(self.unexpected("statement")),
        }
    }

    /// `suppressif expr ; statement* endif ;`
    fn parse_statement_conditional(&mut self, op: Opcode) -> VfrResult<OpcodeNode> {
        self.nested(|p| {
            let line = p.advance().line;
            let mut scope = Scope::open(op, line);
            scope.condition(p.parse_expression()?);
            p.end_statement()?;
            scope.begin_body();
            while !p.is_word("endif") {
                let stmt = p.parse_statement()?;
                scope.emit(stmt);
            }
            let end_line = p.advance().line;
            p.end_statement()?;
            Ok(scope.close(end_line))
        })
    }

    // -- Tags ---------------------------------------------------

    pub(super) fn is_tag_start(&self) -> bool {
        matches!(
            self.peek(),
            Token::Word(w) if matches!(
                w.as_str(),
                "image" | "locked" | "refresh" | "refreshguid" | "varstoredevice" | "guidop"
            )
        )
    }

    /// `image = IMAGE_TOKEN(N)`, `locked`, `refresh interval = N`,
    /// `refreshguid = G`, `varstoredevice = S` or a guid extension.
    pub(super) fn parse_tag(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.line();
        let w = match self.peek() {
            Token::Word(w) => w.as_str(),
            _ => return Err(self.unexpected("tag")),
        };
        let op = match w {
            "image" => {
                self.clause("image")?;
                Opcode::Image {
                    image_id: self.parse_image_token()?,
                }
            }
            "locked" => {
                self.advance();
                Opcode::Locked
            }
            "refresh" => {
                self.advance();
                self.clause("interval")?;
                Opcode::Refresh {
                    interval: self.take_u8("refresh interval")?,
                }
            }
            "refreshguid" => {
                self.clause("refreshguid")?;
                Opcode::RefreshId {
                    guid: self.parse_guid()?,
                }
            }
            "varstoredevice" => {
                self.clause("varstoredevice")?;
                Opcode::VarStoreDevice {
                    device_path: self.parse_string_token()?,
                }
            }
            "guidop" => return self.parse_guidop(),
            _ => return Err(self.unexpected("tag")),
        };
        Ok(OpcodeNode::new(op, line))
    }

    // -- Display statements -------------------------------------

    /// `subtitle text = S [, flags = F] ( ; | , tags statements endsubtitle ; )`
    fn parse_subtitle(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("subtitle")?;
        self.clause("text")?;
        let prompt = self.parse_string_token()?;
        let mut flags = 0;
        if self.eat_clause("flags")? {
            let flags_line = self.line();
            flags = self.parse_flags(FlagKind::Subtitle)?.kind_u8(flags_line)?;
        }
        let mut scope = Scope::open(Opcode::Subtitle { prompt, flags }, line);
        if self.eat(&Token::Semicolon) {
            return Ok(scope.finish());
        }
        self.expect(&Token::Comma)?;
        while self.is_tag_start() {
            let tag = self.parse_tag()?;
            scope.emit(tag);
            self.eat(&Token::Comma);
        }
        self.nested(|p| {
            while !p.is_word("endsubtitle") {
                let stmt = p.parse_statement()?;
                scope.emit(stmt);
            }
            Ok(())
        })?;
        let end_line = self.advance().line;
        self.end_statement()?;
        Ok(scope.close(end_line))
    }

    /// `text help = S , text = S [, text = S] [, flags = F , key = N] (, tag)* ;`
    ///
    /// With `flags` and `key` the text is interactive and becomes an
    /// action question keyed by `key`.
    fn parse_text(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("text")?;
        self.clause("help")?;
        let help = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        self.clause("text")?;
        let text = self.parse_string_token()?;
        let mut text_two = None;
        if self.eat_clause("text")? {
            text_two = Some(self.parse_string_token()?);
        }
        let mut interactive = None;
        if self.eat_clause("flags")? {
            let flags_line = self.line();
            let set = self.parse_flags(FlagKind::Question)?;
            self.expect(&Token::Comma)?;
            self.clause("key")?;
            let key = self.take_u16("key")?;
            interactive = Some((set, key, flags_line));
        }
        let mut tags = Vec::new();
        while self.eat(&Token::Comma) {
            tags.push(self.parse_tag()?);
        }
        let end_line = self.end_statement()?;

        match interactive {
            None => Ok(OpcodeNode::with_children(
                Opcode::Text {
                    help,
                    text,
                    text_two,
                },
                line,
                tags,
            )),
            Some((set, key, flags_line)) => {
                let question_id =
                    self.symbols
                        .register_question(None, None, Some(key), flags_line)?;
                let header = QuestionHeader {
                    prompt: text,
                    help,
                    question_id,
                    name: None,
                    storage: None,
                    flags: set.question,
                };
                let mut scope = Scope::open(
                    Opcode::Action {
                        header,
                        config: None,
                    },
                    line,
                );
                scope.emit_all(tags);
                Ok(scope.close(end_line))
            }
        }
    }

    // -- Cross references ---------------------------------------

    /// `goto [target ,] header [, flags = F] [, key = N] [, items] ;`
    fn parse_goto(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("goto")?;
        let target = self.parse_goto_target()?;
        let mut header = self.parse_question_header(line)?;
        if self.eat_clause("flags")? {
            header.flags |= self.parse_flags(FlagKind::Question)?.question;
        }
        if self.eat_clause("key")? {
            let key_line = self.line();
            let new = QuestionId(self.take_u16("key")?);
            self.symbols
                .rekey_question(header.question_id, new, key_line);
            header.question_id = new;
        }
        let mut children = Vec::new();
        if self.eat(&Token::Comma) {
            while let Some(item) = self.parse_question_item(ValueType::Ref)? {
                children.push(item);
            }
        }
        self.end_statement()?;
        Ok(OpcodeNode::with_children(
            Opcode::Goto { header, target },
            line,
            children,
        ))
    }

    /// The reference shapes a goto can start with; none means the target
    /// is computed from the question's value.
    fn parse_goto_target(&mut self) -> VfrResult<GotoTarget> {
        if self.is_word("devicepath") {
            self.clause("devicepath")?;
            let device_path = self.parse_string_token()?;
            self.expect(&Token::Comma)?;
            let (formset_guid, form_id, question_id) = self.parse_formset_target()?;
            return Ok(GotoTarget::DevicePath {
                device_path,
                formset_guid,
                form_id,
                question_id,
            });
        }
        if self.is_word("formsetguid") {
            let (formset_guid, form_id, question_id) = self.parse_formset_target()?;
            return Ok(GotoTarget::FormSet {
                formset_guid,
                form_id,
                question_id,
            });
        }
        if self.is_word("formid") {
            self.clause("formid")?;
            let form_id = FormId(self.take_u16("form id")?);
            self.expect(&Token::Comma)?;
            return Ok(match self.speculate(Self::parse_goto_question) {
                Some(question) => GotoTarget::FormQuestion { form_id, question },
                None => GotoTarget::Form { form_id },
            });
        }
        if matches!(self.peek(), Token::Number(_)) && matches!(self.cursor.peek_nth(1), Token::Comma) {
            let form_id = FormId(self.take_u16("form id")?);
            self.advance();
            return Ok(GotoTarget::Form { form_id });
        }
        Ok(GotoTarget::Dynamic)
    }

    /// `formsetguid = G , formid = N , question = N ,`
    fn parse_formset_target(&mut self) -> VfrResult<(Guid, FormId, QuestionId)> {
        self.clause("formsetguid")?;
        let guid = self.parse_guid()?;
        self.expect(&Token::Comma)?;
        self.clause("formid")?;
        let form_id = FormId(self.take_u16("form id")?);
        self.expect(&Token::Comma)?;
        self.clause("question")?;
        let question_id = QuestionId(self.take_u16("question id")?);
        self.expect(&Token::Comma)?;
        Ok((guid, form_id, question_id))
    }

    /// `question = (id | N) ,`
    fn parse_goto_question(&mut self) -> VfrResult<Reference<QuestionId>> {
        let line = self.clause("question")?;
        let question = match self.peek() {
            Token::Number(_) => Reference::Resolved(QuestionId(self.take_u16("question id")?)),
            _ => {
                let name = self.take_ident()?;
                self.symbols.question_ref(&name, line)
            }
        };
        self.expect(&Token::Comma)?;
        Ok(question)
    }

    /// `resetbutton defaultstore = id , prompt = S , help = S , (tag ,)*
    ///  endresetbutton ;`
    fn parse_resetbutton(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("resetbutton")?;
        let store_line = self.clause("defaultstore")?;
        let store = self.take_ident()?;
        let default_id = self.symbols.default_store(&store, store_line)?;
        self.expect(&Token::Comma)?;
        self.clause("prompt")?;
        let prompt = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        self.clause("help")?;
        let help = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        let mut tags = Vec::new();
        while self.is_tag_start() {
            tags.push(self.parse_tag()?);
            self.expect(&Token::Comma)?;
        }
        self.expect_word("endresetbutton")?;
        self.end_statement()?;
        Ok(OpcodeNode::with_children(
            Opcode::ResetButton {
                statement: StatementHeader { prompt, help },
                default_id,
            },
            line,
            tags,
        ))
    }

    // -- Form-level statements ----------------------------------

    /// `rule Name , expr endrule ;`
    fn parse_rule(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("rule")?;
        let name = self.take_ident()?;
        self.expect(&Token::Comma)?;
        let rule_id = self.symbols.declare_rule(&name, line)?;
        let mut scope = Scope::open(Opcode::Rule { rule_id, name }, line);
        scope.condition(self.parse_expression()?);
        let end_line = self.expect_word("endrule")?;
        self.end_statement()?;
        Ok(scope.close(end_line))
    }

    /// `banner [,] title = S , ( line N , align A ; | timeout = N ; )`
    fn parse_banner(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("banner")?;
        self.eat(&Token::Comma);
        self.clause("title")?;
        let title = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        let layout = if self.eat_word("line") {
            let row = self.take_u16("banner line")?;
            self.expect(&Token::Comma)?;
            self.expect_word("align")?;
            let align = if self.eat_word("left") {
                Alignment::Left
            } else if self.eat_word("center") {
                Alignment::Center
            } else if self.eat_word("right") {
                Alignment::Right
            } else {
                return Err(self.unexpected("'left', 'center' or 'right'"));
            };
            BannerLayout::Line { line: row, align }
        } else {
            self.clause("timeout")?;
            BannerLayout::Timeout(self.take_u16("banner timeout")?)
        };
        self.end_statement()?;
        Ok(OpcodeNode::new(Opcode::Banner { title, layout }, line))
    }

    // -- Guid extensions ----------------------------------------

    /// `guidop guid = G [, datatype = T[N]] (, data[i].f = N)*
    ///  [, (guidop | statement)* endguidop] ;`
    pub(super) fn parse_guidop(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("guidop")?;
        self.clause("guid")?;
        let guid = self.parse_guid()?;
        let mut data = GuidOpData {
            guid,
            data_type: None,
            array_len: None,
            size: 0,
            data: Vec::new(),
        };
        let mut ty = None;
        if self.eat_clause("datatype")? {
            let t = self.parse_type_name()?;
            data.array_len = self.parse_index()?;
            data.size = layout::mul(
                self.symbols.types.size_of(&t),
                data.array_len.unwrap_or(1),
                line,
                t.name(),
            )?;
            data.data_type = Some(t.name().to_owned());
            ty = Some(t);
        }
        while self.is(&Token::Comma) && self.is_word_at(1, "data") {
            self.advance();
            let data_line = self.advance().line;
            let root = ty
                .as_ref()
                .ok_or_else(|| VfrError::syntax(data_line, "'data' needs a 'datatype'"))?;
            let index = self.parse_index()?.unwrap_or(0);
            let bound = data.array_len.unwrap_or(1);
            if index >= bound {
                return Err(VfrError::malformed(
                    data_line,
                    format!("data index {} out of bounds for {} elements", index, bound),
                ));
            }
            let mut fields = Vec::new();
            while self.eat(&Token::Dot) {
                let name = self.take_member_name()?;
                let index = self.parse_index()?;
                fields.push(PathSegment { name, index });
            }
            self.expect(&Token::Assign)?;
            let value = self.take_signed()?;
            let field = self.symbols.types.resolve_path(root, &fields, data_line)?;
            let elem = self.symbols.types.size_of(root);
            let width = field.ty.scalar_width().unwrap_or(8);
            data.data.push(GuidDatum {
                offset: index * elem + field.offset,
                size: field.size,
                value: mask_to_width(value, width),
            });
        }

        let mut scope = Scope::open(Opcode::GuidOp(data), line);
        if !self.eat(&Token::Comma) {
            self.end_statement()?;
            return Ok(scope.finish());
        }
        self.nested(|p| {
            while !p.is_word("endguidop") {
                let stmt = if p.is_word("guidop") {
                    p.parse_guidop()?
                } else {
                    p.parse_statement()?
                };
                scope.emit(stmt);
            }
            Ok(())
        })?;
        let end_line = self.advance().line;
        self.end_statement()?;
        Ok(scope.close(end_line))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::VfrError;
    use crate::opcode::{
        Alignment, BannerLayout, FormId, GotoTarget, Opcode, QuestionId, Reference, RuleId,
    };
    use crate::parser::tests::{compile_src, form_body, in_form};
    use crate::parser::parse_unlinked;
    use crate::config::ParserConfig;
    use crate::lexer::lex;

    #[test]
    fn sibling_conditionals_own_only_their_statements() {
        let unit = compile_src(&in_form(
            "    suppressif TRUE;\n\
               text help = STRING_TOKEN(5), text = STRING_TOKEN(5);\n\
             endif;\n\
             suppressif FALSE;\n\
               text help = STRING_TOKEN(6), text = STRING_TOKEN(6);\n\
               label 0x10;\n\
             endif;",
        ))
        .unwrap();
        let body = form_body(&unit);
        assert_eq!(body.len(), 2);
        assert_eq!(body[0].body().len(), 2);
        assert_eq!(body[1].body().len(), 3);
        assert_eq!(body[1].body()[2].op, Opcode::Label { number: 0x10 });
    }

    #[test]
    fn subtitle_with_and_without_a_body() {
        let body = form_body(
            &compile_src(&in_form(
                "    subtitle text = STRING_TOKEN(5);\n\
                 subtitle text = STRING_TOKEN(6), flags = HORIZONTAL,\n\
                   text help = STRING_TOKEN(7), text = STRING_TOKEN(7);\n\
                 endsubtitle;",
            ))
            .unwrap(),
        );
        assert!(body[0].children.is_empty());
        assert_eq!(body[1].op, Opcode::Subtitle { prompt: crate::opcode::StringId(6), flags: 1 });
        assert_eq!(body[1].children.last().unwrap().op, Opcode::End);
    }

    #[test]
    fn interactive_text_becomes_an_action() {
        let body = form_body(
            &compile_src(&in_form(
                "    text help = STRING_TOKEN(5), text = STRING_TOKEN(6),\n\
                   flags = INTERACTIVE, key = 0x20;",
            ))
            .unwrap(),
        );
        match &body[0].op {
            Opcode::Action { header, config } => {
                assert_eq!(header.question_id, QuestionId(0x20));
                assert_eq!(header.flags, 0x04);
                assert!(config.is_none());
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn goto_reference_shapes() {
        let unit = compile_src(&in_form(
            "    goto 1, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6);\n\
             goto formid = 1, question = Later, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6);\n\
             goto formid = 1, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6);\n\
             goto prompt = STRING_TOKEN(5), help = STRING_TOKEN(6), flags = READ_ONLY;\n\
             checkbox name = Later, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
             endcheckbox;",
        ))
        .unwrap();
        let targets: Vec<GotoTarget> = form_body(&unit)
            .into_iter()
            .filter_map(|n| match n.op {
                Opcode::Goto { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        let later = unit.symbols.find_question("Later").unwrap();
        assert_eq!(
            targets,
            vec![
                GotoTarget::Form { form_id: FormId(1) },
                GotoTarget::FormQuestion {
                    form_id: FormId(1),
                    question: Reference::Resolved(later),
                },
                GotoTarget::Form { form_id: FormId(1) },
                GotoTarget::Dynamic,
            ]
        );
    }

    #[test]
    fn goto_to_a_missing_form_fails_at_link() {
        let src = in_form("    goto 7, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6);");
        let tokens = lex(&src).unwrap();
        assert!(parse_unlinked(&tokens, &ParserConfig::default()).is_ok());
        assert!(matches!(
            compile_src(&src).unwrap_err(),
            VfrError::UndeclaredSymbol { .. }
        ));
    }

    #[test]
    fn resetbutton_and_banner() {
        let body = form_body(
            &compile_src(&in_form(
                "    resetbutton defaultstore = MyStandard, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
                   image = IMAGE_TOKEN(2),\n\
                 endresetbutton;\n\
                 banner title = STRING_TOKEN(7), line 3, align center;\n\
                 banner, title = STRING_TOKEN(7), timeout = 15;",
            ))
            .unwrap(),
        );
        assert_eq!(body[0].children[0].op, Opcode::Image { image_id: 2 });
        assert_eq!(
            body[1].op,
            Opcode::Banner {
                title: crate::opcode::StringId(7),
                layout: BannerLayout::Line {
                    line: 3,
                    align: Alignment::Center
                },
            }
        );
        assert!(matches!(
            body[2].op,
            Opcode::Banner {
                layout: BannerLayout::Timeout(15),
                ..
            }
        ));
    }

    #[test]
    fn rules_are_numbered_in_order() {
        let body = form_body(
            &compile_src(&in_form(
                "    rule First, TRUE endrule;\n\
                 rule Second, ruleref(First) AND pushthis endrule;",
            ))
            .unwrap(),
        );
        assert!(matches!(body[1].op, Opcode::Rule { rule_id: RuleId(1), .. }));
        assert_eq!(body[1].children.len(), 2);
        assert_eq!(body[1].children[1].op, Opcode::End);
    }

    #[test]
    fn duplicate_rule_names_are_rejected() {
        let err = compile_src(&in_form(
            "    rule Same, TRUE endrule;\n\
             rule Same, FALSE endrule;",
        ))
        .unwrap_err();
        assert!(matches!(err, VfrError::DuplicateDeclaration { line: 18, first_line: 17, .. }));
    }

    #[test]
    fn guidop_data_lands_at_field_offsets() {
        let body = form_body(
            &compile_src(&in_form(
                "    guidop guid = {0x1, 0x2, 0x3, {0, 0, 0, 0, 0, 0, 0, 1}},\n\
                   datatype = MY_DATA[2], data[1].Timeout = 0x1ffff, data.Enable = 1;\n\
                 guidop guid = {0x1, 0x2, 0x3, {0, 0, 0, 0, 0, 0, 0, 2}},\n\
                   label 1;\n\
                 endguidop;",
            ))
            .unwrap(),
        );
        match &body[0].op {
            Opcode::GuidOp(g) => {
                assert_eq!(g.data_type.as_deref(), Some("MY_DATA"));
                assert_eq!(g.size, 2 * 28);
                assert_eq!(g.data[0].offset, 28 + 2);
                assert_eq!(g.data[0].value, 0xffff);
                assert_eq!(g.data[1].offset, 0);
            }
            other => panic!("expected guidop, got {:?}", other),
        }
        assert!(body[0].children.is_empty());
        assert_eq!(body[1].body()[0].op, Opcode::Label { number: 1 });
    }

    #[test]
    fn modal_locked_and_image_are_form_items() {
        let body = form_body(
            &compile_src(&in_form("    modal;\n    locked;\n    image = IMAGE_TOKEN(9);")).unwrap(),
        );
        assert_eq!(
            body.iter().map(|n| n.op.clone()).collect::<Vec<_>>(),
            vec![Opcode::Modal, Opcode::Locked, Opcode::Image { image_id: 9 }]
        );
    }

    #[test]
    fn guidop_data_larger_than_u32_is_malformed() {
        let err = compile_src(&in_form(
            "    guidop guid = {0x1, 0x2, 0x3, {0, 0, 0, 0, 0, 0, 0, 1}},\n\
               datatype = UINT64[0x20000000];",
        ))
        .unwrap_err();
        assert!(matches!(err, VfrError::MalformedLiteral { .. }), "{:?}", err);
    }
}
