use super::constants::mask_to_width;
use super::Parser;
use crate::builder::Scope;
use crate::error::{VfrError, VfrResult};
use crate::flags::{self, FlagKind, FlagSet};
use crate::layout::PathSegment;
use crate::lexer::Token;
use crate::opcode::{
    ConstValue, DateTimeOp, HiiDate, HiiTime, NumericOp, NumericRange, Opcode, OpcodeNode,
    OptionOp, OrderedListOp, QuestionHeader, QuestionId, SplitStorage, StringId, StringOp,
    ValueType, DEFAULT_STORE_STANDARD,
};
use crate::symbols::{VarPath, VarStoreInfo};
use tracing::{event, Level};

const STORAGE_FLAGS: &[&str] = &["STORAGE_NORMAL", "STORAGE_TIME", "STORAGE_WAKEUP"];
const STORAGE_TIME: u8 = 0x10;

/// Type a literal for a question whose numeric values are `value_type`.
fn typed_value(value_type: ValueType, value: ConstValue) -> (ValueType, ConstValue) {
    match value {
        ConstValue::Number(n) => match value_type {
            ValueType::Boolean => (ValueType::Boolean, ConstValue::Bool(n != 0)),
            vt => match vt.width() {
                Some(w) => (vt, ConstValue::Number(mask_to_width(n, w))),
                None => (ValueType::Uint64, ConstValue::Number(n)),
            },
        },
        ConstValue::Bool(_) => (ValueType::Boolean, value),
        ConstValue::Date(_) => (ValueType::Date, value),
        ConstValue::Time(_) => (ValueType::Time, value),
        ConstValue::Ref(_) => (ValueType::Ref, value),
        ConstValue::String(_) => (ValueType::String, value),
        ConstValue::Buffer(_) => (ValueType::Buffer, value),
    }
}

/// `flags =` and `key =` clauses after a question header, in either order.
struct QuestionClauses {
    flags: FlagSet,
    line: u32,
    key: Option<u16>,
}

#[derive(Clone, Copy)]
enum Clock {
    Date,
    Time,
}

impl Clock {
    fn keyword(self) -> &'static str {
        match self {
            Clock::Date => "date",
            Clock::Time => "time",
        }
    }

    fn end_keyword(self) -> &'static str {
        match self {
            Clock::Date => "enddate",
            Clock::Time => "endtime",
        }
    }

    fn parts(self) -> [&'static str; 3] {
        match self {
            Clock::Date => ["year", "month", "day"],
            Clock::Time => ["hour", "minute", "second"],
        }
    }

    fn flag_kind(self) -> FlagKind {
        match self {
            Clock::Date => FlagKind::Date,
            Clock::Time => FlagKind::Time,
        }
    }

    fn value_type(self) -> ValueType {
        match self {
            Clock::Date => ValueType::Date,
            Clock::Time => ValueType::Time,
        }
    }

    fn opcode(self, op: DateTimeOp) -> Opcode {
        match self {
            Clock::Date => Opcode::Date(op),
            Clock::Time => Opcode::Time(op),
        }
    }
}

/// One `year varid = ..., prompt = ..., ...` part of a split date or time.
struct SplitPart {
    path: VarPath,
    storage: VarStoreInfo,
    prompt: StringId,
    help: StringId,
    minimum: u16,
    default: Option<u16>,
}

fn narrow(value: u16, what: &str, line: u32) -> VfrResult<u8> {
    u8::try_from(value)
        .map_err(|_| VfrError::malformed(line, format!("{} value {} exceeds 255", what, value)))
}

impl<'a> Parser<'a> {
    // -- Varid paths --------------------------------------------

    /// `[ N ]` if present.
    pub(super) fn parse_index(&mut self) -> VfrResult<Option<u32>> {
        if !self.eat(&Token::LBracket) {
            return Ok(None);
        }
        let index = self.take_u32("index")?;
        self.expect(&Token::RBracket)?;
        Ok(Some(index))
    }

    /// Store and member names. Type names are accepted too: an EFI store
    /// named by a string token is addressed by its type.
    pub(super) fn take_member_name(&mut self) -> VfrResult<String> {
        match self.peek() {
            Token::Word(w) => {
                self.advance();
                Ok(w.clone())
            }
            _ => Err(self.unexpected("name")),
        }
    }

    /// `Store[n]` or `Store(.Field[i])*`
    pub(super) fn parse_var_path(&mut self) -> VfrResult<VarPath> {
        let line = self.line();
        let mut path = VarPath::new(self.take_member_name()?, line);
        path.store_index = self.parse_index()?;
        while self.eat(&Token::Dot) {
            let name = self.take_member_name()?;
            let index = self.parse_index()?;
            path.fields.push(PathSegment { name, index });
        }
        Ok(path)
    }

    // -- Question header ----------------------------------------

    /// `[name = id ,] [varid = V ,] [questionid = N ,] prompt = S , help = S`
    pub(super) fn parse_question_header(&mut self, line: u32) -> VfrResult<QuestionHeader> {
        let mut name = None;
        if self.is_word("name") {
            self.clause("name")?;
            name = Some(self.take_ident()?);
            self.expect(&Token::Comma)?;
        }
        let mut path = None;
        if self.is_word("varid") {
            self.clause("varid")?;
            path = Some(self.parse_var_path()?);
            self.expect(&Token::Comma)?;
        }
        let mut explicit = None;
        if self.is_word("questionid") {
            self.clause("questionid")?;
            explicit = Some(self.take_u16("question id")?);
            self.expect(&Token::Comma)?;
        }
        self.clause("prompt")?;
        let prompt = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        self.clause("help")?;
        let help = self.parse_string_token()?;

        let storage = match &path {
            Some(p) => Some(self.symbols.resolve_var_id(p)?),
            None => None,
        };
        let question_id =
            self.symbols
                .register_question(name.as_deref(), path.as_ref(), explicit, line)?;
        Ok(QuestionHeader {
            prompt,
            help,
            question_id,
            name,
            storage,
            flags: 0,
        })
    }

    /// `[flags = F ,] [key = N ,]` in either order, each at most once.
    fn parse_question_clauses(&mut self, kind: FlagKind) -> VfrResult<QuestionClauses> {
        let mut clauses = QuestionClauses {
            flags: FlagSet::default(),
            line: self.line(),
            key: None,
        };
        let mut seen_flags = false;
        loop {
            if self.is_word("flags") && !seen_flags {
                clauses.line = self.clause("flags")?;
                clauses.flags = self.parse_flags(kind)?;
                seen_flags = true;
            } else if self.is_word("key") && clauses.key.is_none() {
                self.clause("key")?;
                clauses.key = Some(self.take_u16("key")?);
            } else {
                return Ok(clauses);
            }
            self.expect(&Token::Comma)?;
        }
    }

    /// Fold the common flags into the header and move it to its `key`.
    fn apply_clauses(&mut self, header: &mut QuestionHeader, clauses: &QuestionClauses) {
        header.flags |= clauses.flags.question;
        if let Some(key) = clauses.key {
            let new = QuestionId(key);
            self.symbols
                .rekey_question(header.question_id, new, clauses.line);
            header.question_id = new;
        }
    }

    /// Storage width and flags byte of a numeric or oneof question.
    fn numeric_width(header: &QuestionHeader, clauses: &QuestionClauses) -> VfrResult<(u8, u8)> {
        let mut bits = clauses.flags.kind_u8(clauses.line)?;
        let width = match flags::explicit_numeric_width(&clauses.flags) {
            Some(w) => w,
            None => {
                let w = header
                    .storage
                    .as_ref()
                    .and_then(VarStoreInfo::width)
                    .unwrap_or(8);
                bits |= flags::numeric_size_bits(w);
                w
            }
        };
        Ok((width, bits))
    }

    /// `minimum = [-]N , maximum = [-]N , [step = N ,]`
    fn parse_range(&mut self, width: u8) -> VfrResult<NumericRange> {
        self.clause("minimum")?;
        let min = mask_to_width(self.take_signed()?, width);
        self.expect(&Token::Comma)?;
        self.clause("maximum")?;
        let max = mask_to_width(self.take_signed()?, width);
        self.expect(&Token::Comma)?;
        let mut step = 0;
        if self.is_word("step") {
            self.clause("step")?;
            step = self.take_number()?;
            self.expect(&Token::Comma)?;
        }
        Ok(NumericRange { min, max, step })
    }

    /// Parse the option list, then the closing keyword and `;`.
    fn finish_question(
        &mut self,
        mut scope: Scope,
        value_type: ValueType,
        end: &str,
    ) -> VfrResult<OpcodeNode> {
        while let Some(item) = self.parse_question_item(value_type)? {
            scope.emit(item);
        }
        let end_line = self.expect_word(end)?;
        self.end_statement()?;
        Ok(scope.close(end_line))
    }

    // -- Questions ----------------------------------------------

    pub(super) fn parse_checkbox(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("checkbox")?;
        let mut header = self.parse_question_header(line)?;
        self.expect(&Token::Comma)?;
        let clauses = self.parse_question_clauses(FlagKind::CheckBox)?;
        self.apply_clauses(&mut header, &clauses);
        let flags = clauses.flags.kind_u8(clauses.line)?;
        let scope = Scope::open(Opcode::CheckBox { header, flags }, line);
        self.finish_question(scope, ValueType::Boolean, "endcheckbox")
    }

    pub(super) fn parse_numeric(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("numeric")?;
        let mut header = self.parse_question_header(line)?;
        self.expect(&Token::Comma)?;
        let clauses = self.parse_question_clauses(FlagKind::Numeric)?;
        self.apply_clauses(&mut header, &clauses);
        let (width, flags) = Self::numeric_width(&header, &clauses)?;
        let range = self.parse_range(width)?;
        let op = NumericOp {
            header,
            flags,
            range: Some(range),
            width,
        };
        let scope = Scope::open(Opcode::Numeric(op), line);
        self.finish_question(scope, ValueType::of_width(width), "endnumeric")
    }

    pub(super) fn parse_oneof(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("oneof")?;
        let mut header = self.parse_question_header(line)?;
        self.expect(&Token::Comma)?;
        let clauses = self.parse_question_clauses(FlagKind::Numeric)?;
        self.apply_clauses(&mut header, &clauses);
        let (width, flags) = Self::numeric_width(&header, &clauses)?;
        let range = if self.is_word("minimum") {
            Some(self.parse_range(width)?)
        } else {
            None
        };
        let op = NumericOp {
            header,
            flags,
            range,
            width,
        };
        let scope = Scope::open(Opcode::OneOf(op), line);
        self.finish_question(scope, ValueType::of_width(width), "endoneof")
    }

    pub(super) fn parse_orderedlist(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("orderedlist")?;
        let mut header = self.parse_question_header(line)?;
        self.expect(&Token::Comma)?;
        let mut max_containers = None;
        if self.is_word("maxcontainers") {
            self.clause("maxcontainers")?;
            max_containers = Some(self.take_u8("maxcontainers")?);
            self.expect(&Token::Comma)?;
        }
        let clauses = self.parse_question_clauses(FlagKind::OrderedList)?;
        self.apply_clauses(&mut header, &clauses);
        let flags = clauses.flags.kind_u8(clauses.line)?;

        let storage = header.storage.as_ref();
        let max_containers = max_containers.unwrap_or_else(|| {
            storage
                .map(|s| s.array_len.unwrap_or(s.size))
                .map_or(0, |n| u8::try_from(n).unwrap_or(u8::MAX))
        });
        let element = storage
            .and_then(|s| s.var_type.as_ref())
            .and_then(|t| t.scalar_width())
            .map_or(ValueType::Uint8, ValueType::of_width);
        let op = OrderedListOp {
            header,
            flags,
            max_containers,
        };
        let scope = Scope::open(Opcode::OrderedList(op), line);
        self.finish_question(scope, element, "endlist")
    }

    /// `minsize = N , maxsize = N ,`
    fn parse_size_bounds(&mut self) -> VfrResult<(u16, u16)> {
        self.clause("minsize")?;
        let min = self.take_u16("minsize")?;
        self.expect(&Token::Comma)?;
        self.clause("maxsize")?;
        let max = self.take_u16("maxsize")?;
        self.expect(&Token::Comma)?;
        Ok((min, max))
    }

    pub(super) fn parse_string(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("string")?;
        let mut header = self.parse_question_header(line)?;
        self.expect(&Token::Comma)?;
        let clauses = self.parse_question_clauses(FlagKind::String)?;
        self.apply_clauses(&mut header, &clauses);
        let flags = clauses.flags.kind_u8(clauses.line)?;
        let (min_size, max_size) = self.parse_size_bounds()?;
        let op = StringOp {
            header,
            flags,
            min_size,
            max_size,
        };
        let scope = Scope::open(Opcode::String(op), line);
        self.finish_question(scope, ValueType::String, "endstring")
    }

    pub(super) fn parse_password(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("password")?;
        let mut header = self.parse_question_header(line)?;
        self.expect(&Token::Comma)?;
        let clauses = self.parse_question_clauses(FlagKind::Question)?;
        self.apply_clauses(&mut header, &clauses);
        let flags = clauses.flags.kind_u8(clauses.line)?;
        let (min_size, max_size) = self.parse_size_bounds()?;
        if self.is_word("encoding") {
            let enc_line = self.clause("encoding")?;
            let encoding = self.take_number()?;
            self.expect(&Token::Comma)?;
            event!(Level::TRACE, "line {}: password encoding {} ignored", enc_line, encoding);
        }
        let op = StringOp {
            header,
            flags,
            min_size,
            max_size,
        };
        let scope = Scope::open(Opcode::Password(op), line);
        self.finish_question(scope, ValueType::String, "endpassword")
    }

    pub(super) fn parse_action(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("action")?;
        let mut header = self.parse_question_header(line)?;
        self.expect(&Token::Comma)?;
        let clauses = self.parse_question_clauses(FlagKind::Question)?;
        self.apply_clauses(&mut header, &clauses);
        self.clause("config")?;
        let config = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        let scope = Scope::open(
            Opcode::Action {
                header,
                config: Some(config),
            },
            line,
        );
        self.finish_question(scope, ValueType::String, "endaction")
    }

    pub(super) fn parse_date(&mut self) -> VfrResult<OpcodeNode> {
        self.parse_date_time(Clock::Date)
    }

    pub(super) fn parse_time(&mut self) -> VfrResult<OpcodeNode> {
        self.parse_date_time(Clock::Time)
    }

    fn parse_date_time(&mut self, clock: Clock) -> VfrResult<OpcodeNode> {
        let line = self.expect_word(clock.keyword())?;
        if self.is_word(clock.parts()[0]) {
            return self.parse_split_date_time(clock, line);
        }
        let mut header = self.parse_question_header(line)?;
        self.expect(&Token::Comma)?;
        let clauses = self.parse_question_clauses(clock.flag_kind())?;
        self.apply_clauses(&mut header, &clauses);
        let op = DateTimeOp {
            header,
            flags: clauses.flags.kind_u8(clauses.line)?,
            split: None,
        };
        let scope = Scope::open(clock.opcode(op), line);
        self.finish_question(scope, clock.value_type(), clock.end_keyword())
    }

    /// Date or time stored in three separate fields.
    fn parse_split_date_time(&mut self, clock: Clock, line: u32) -> VfrResult<OpcodeNode> {
        let [a, b, c] = clock.parts();
        let first = self.parse_split_part(a)?;
        let second = self.parse_split_part(b)?;
        let third = self.parse_split_part(c)?;

        let question_id = self
            .symbols
            .register_question(None, Some(&first.path), None, line)?;
        let mut header = QuestionHeader {
            prompt: first.prompt,
            help: first.help,
            question_id,
            name: None,
            storage: None,
            flags: 0,
        };
        let clauses = self.parse_question_clauses(clock.flag_kind())?;
        self.apply_clauses(&mut header, &clauses);
        let mut flags = clauses.flags.kind_u8(clauses.line)?;
        if !clauses.flags.has_any(STORAGE_FLAGS) {
            flags |= STORAGE_TIME;
        }

        let has_default =
            first.default.is_some() || second.default.is_some() || third.default.is_some();
        let pick = |p: &SplitPart| p.default.unwrap_or(p.minimum);
        let default_value = match clock {
            Clock::Date => ConstValue::Date(HiiDate {
                year: pick(&first),
                month: narrow(pick(&second), b, line)?,
                day: narrow(pick(&third), c, line)?,
            }),
            Clock::Time => ConstValue::Time(HiiTime {
                hour: narrow(pick(&first), a, line)?,
                minute: narrow(pick(&second), b, line)?,
                second: narrow(pick(&third), c, line)?,
            }),
        };
        let op = DateTimeOp {
            header,
            flags,
            split: Some(SplitStorage {
                parts: [first.storage, second.storage, third.storage],
            }),
        };
        let mut scope = Scope::open(clock.opcode(op), line);
        if has_default {
            scope.emit(OpcodeNode::new(
                Opcode::Default {
                    default_id: DEFAULT_STORE_STANDARD,
                    value_type: clock.value_type(),
                    value: Some(default_value),
                },
                line,
            ));
        }
        self.finish_question(scope, clock.value_type(), clock.end_keyword())
    }

    /// `part varid = V , prompt = S , help = S , minimum = N , maximum = N ,
    ///  [step = N ,] [default = N ,]`
    fn parse_split_part(&mut self, part: &str) -> VfrResult<SplitPart> {
        self.expect_word(part)?;
        self.clause("varid")?;
        let path = self.parse_var_path()?;
        self.expect(&Token::Comma)?;
        let storage = self.symbols.resolve_var_id(&path)?;
        self.clause("prompt")?;
        let prompt = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        self.clause("help")?;
        let help = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        self.clause("minimum")?;
        let minimum = self.take_u16("minimum")?;
        self.expect(&Token::Comma)?;
        self.clause("maximum")?;
        self.take_u16("maximum")?;
        self.expect(&Token::Comma)?;
        if self.is_word("step") {
            self.clause("step")?;
            self.take_number()?;
            self.expect(&Token::Comma)?;
        }
        let mut default = None;
        if self.is_word("default") {
            self.clause("default")?;
            default = Some(self.take_u16("default")?);
            self.expect(&Token::Comma)?;
        }
        Ok(SplitPart {
            path,
            storage,
            prompt,
            help,
            minimum,
            default,
        })
    }

    // -- Option lists -------------------------------------------

    /// One item of a question body, or `None` when the next token cannot
    /// start one.
    pub(super) fn parse_question_item(
        &mut self,
        value_type: ValueType,
    ) -> VfrResult<Option<OpcodeNode>> {
        let line = self.line();
        let w = match self.peek() {
            Token::Word(w) => w.as_str(),
            _ => return Ok(None),
        };
        let node = match w {
            "option" => self.parse_option(value_type)?,
            "default" => self.parse_default(value_type)?,
            "value" => {
                self.clause("value")?;
                let expr = self.parse_expression()?;
                self.end_statement()?;
                OpcodeNode::with_children(Opcode::Value, line, vec![expr.root])
            }
            "read" | "write" => {
                self.advance();
                let expr = self.parse_expression()?;
                self.end_statement()?;
                let op = if w == "read" { Opcode::Read } else { Opcode::Write };
                OpcodeNode::with_children(op, line, vec![expr.root])
            }
            "suppressif" => self.parse_question_conditional(Opcode::SuppressIf, value_type)?,
            "grayoutif" => self.parse_question_conditional(Opcode::GrayOutIf, value_type)?,
            "disableif" => self.parse_question_conditional(Opcode::DisableIf, value_type)?,
            "inconsistentif" | "nosubmitif" | "warningif" => self.parse_check_if()?,
            _ if self.is_tag_start() => {
                let tag = self.parse_tag()?;
                self.eat(&Token::Comma);
                tag
            }
            _ => return Ok(None),
        };
        Ok(Some(node))
    }

    /// `option text = S , value = C [, flags = F] [, key = N] (, tag)* ;`
    fn parse_option(&mut self, value_type: ValueType) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("option")?;
        self.clause("text")?;
        let text = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        self.clause("value")?;
        let (value_type, value) = typed_value(value_type, self.parse_const_value()?);
        let mut set = FlagSet::default();
        if self.eat_clause("flags")? {
            set = self.parse_flags(FlagKind::Option)?;
        }
        let mut key = None;
        if self.eat_clause("key")? {
            key = Some(self.take_u16("key")?);
        }
        let mut tags = Vec::new();
        while self.eat(&Token::Comma) {
            tags.push(self.parse_tag()?);
        }
        self.end_statement()?;
        Ok(OpcodeNode::with_children(
            Opcode::OneOfOption(OptionOp {
                text,
                flags: set.kind_u8(line)?,
                question_flags: set.question,
                value_type,
                value,
                key,
            }),
            line,
            tags,
        ))
    }

    /// `default ( = C | value = expr ) , [defaultstore = id ,]`
    fn parse_default(&mut self, value_type: ValueType) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("default")?;
        let mut children = Vec::new();
        let (value_type, value) = if self.eat(&Token::Assign) {
            let (vt, c) = typed_value(value_type, self.parse_const_value()?);
            (vt, Some(c))
        } else {
            self.clause("value")?;
            children.push(self.parse_expression()?.root);
            (value_type, None)
        };
        self.expect(&Token::Comma)?;
        let mut default_id = DEFAULT_STORE_STANDARD;
        if self.is_word("defaultstore") {
            let store_line = self.clause("defaultstore")?;
            let name = self.take_ident()?;
            default_id = self.symbols.default_store(&name, store_line)?;
            self.expect(&Token::Comma)?;
        }
        Ok(OpcodeNode::with_children(
            Opcode::Default {
                default_id,
                value_type,
                value,
            },
            line,
            children,
        ))
    }

    /// `suppressif expr ; items endif [;]` inside a question body.
    fn parse_question_conditional(
        &mut self,
        op: Opcode,
        value_type: ValueType,
    ) -> VfrResult<OpcodeNode> {
        self.nested(|p| {
            let line = p.advance().line;
            let mut scope = Scope::open(op, line);
            scope.condition(p.parse_expression()?);
            p.end_statement()?;
            scope.begin_body();
            while let Some(item) = p.parse_question_item(value_type)? {
                scope.emit(item);
            }
            let end_line = p.expect_word("endif")?;
            p.eat(&Token::Semicolon);
            Ok(scope.close(end_line))
        })
    }

    /// `inconsistentif`, `nosubmitif` or `warningif`:
    /// `prompt = S , [flags = N , | timeout = N ,] expr endif [;]`
    pub(super) fn parse_check_if(&mut self) -> VfrResult<OpcodeNode> {
        let kw = self.advance();
        let line = kw.line;
        let keyword = match &kw.token {
            Token::Word(w) => w.as_str(),
            _ => return Err(VfrError::syntax(line, "expected check statement")),
        };
        self.clause("prompt")?;
        let message = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        let op = if keyword == "warningif" {
            let mut timeout = 0;
            if self.is_word("timeout") {
                self.clause("timeout")?;
                timeout = self.take_u8("timeout")?;
                self.expect(&Token::Comma)?;
            }
            Opcode::WarningIf {
                warning: message,
                timeout,
            }
        } else {
            let mut flags = 0;
            if self.is_word("flags") {
                let flags_line = self.clause("flags")?;
                flags = self.parse_flags(FlagKind::Raw)?.kind_u8(flags_line)?;
                self.expect(&Token::Comma)?;
            }
            if keyword == "inconsistentif" {
                Opcode::InconsistentIf {
                    error: message,
                    flags,
                }
            } else {
                Opcode::NoSubmitIf {
                    error: message,
                    flags,
                }
            }
        };
        let mut scope = Scope::open(op, line);
        scope.condition(self.parse_expression()?);
        let end_line = self.expect_word("endif")?;
        self.eat(&Token::Semicolon);
        Ok(scope.close(end_line))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::VfrError;
    use crate::opcode::{
        ConstValue, DefaultId, NumericRange, Opcode, OpcodeNode, QuestionId, ValueType,
    };
    use crate::parser::tests::{compile_src, form_body, in_form};
    use crate::symbols::VarLocation;

    fn only_question(body: &str) -> OpcodeNode {
        let unit = compile_src(&in_form(body)).unwrap();
        form_body(&unit).into_iter().next().unwrap()
    }

    #[test]
    fn numeric_bound_to_a_word_field() {
        let q = only_question(
            "    numeric varid = MyVar.Timeout, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
                   minimum = 1, maximum = 10, step = 1,\n\
             endnumeric;",
        );
        match &q.op {
            Opcode::Numeric(op) => {
                assert_eq!(op.width, 2);
                assert_eq!(op.flags & 0x03, 0x01);
                assert_eq!(
                    op.range,
                    Some(NumericRange {
                        min: 1,
                        max: 10,
                        step: 1
                    })
                );
                let storage = op.header.storage.as_ref().unwrap();
                assert_eq!(storage.width(), Some(2));
                assert_eq!(storage.location, VarLocation::Offset(2));
            }
            other => panic!("expected numeric, got {:?}", other),
        }
        assert_eq!(q.children.last().unwrap().op, Opcode::End);
    }

    #[test]
    fn explicit_size_flag_wins_over_storage() {
        let q = only_question(
            "    numeric varid = MyVar.Timeout, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
                   flags = NUMERIC_SIZE_4 | DISPLAY_UINT_HEX | READ_ONLY,\n\
                   minimum = -1, maximum = 0xff,\n\
             endnumeric;",
        );
        match &q.op {
            Opcode::Numeric(op) => {
                assert_eq!(op.width, 4);
                assert_eq!(op.flags, 0x22);
                assert_eq!(op.header.flags, 0x01);
                assert_eq!(op.range.unwrap().min, 0xffff_ffff);
            }
            other => panic!("expected numeric, got {:?}", other),
        }
    }

    #[test]
    fn key_moves_the_question_id() {
        let unit = compile_src(&in_form(
            "    checkbox name = Box, varid = MyVar.Enable, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
                   flags = CHECKBOX_DEFAULT, key = 0x1234,\n\
             endcheckbox;",
        ))
        .unwrap();
        let q = &form_body(&unit)[0];
        let header = q.op.question_header().unwrap();
        assert_eq!(header.question_id, QuestionId(0x1234));
        assert_eq!(unit.symbols.find_question("Box"), Some(QuestionId(0x1234)));
        assert_eq!(
            unit.symbols.find_question("MyVar.Enable"),
            Some(QuestionId(0x1234))
        );
    }

    #[test]
    fn oneof_options_take_the_storage_width() {
        let q = only_question(
            "    oneof varid = MyVar.Timeout, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               option text = STRING_TOKEN(7), value = 0x10002, flags = DEFAULT;\n\
               option text = STRING_TOKEN(8), value = 3, flags = 0;\n\
             endoneof;",
        );
        match &q.children[0].op {
            Opcode::OneOfOption(op) => {
                assert_eq!(op.value_type, ValueType::Uint16);
                assert_eq!(op.value, ConstValue::Number(2));
                assert_eq!(op.flags, 0x10);
            }
            other => panic!("expected option, got {:?}", other),
        }
        assert_eq!(q.body().len(), 2);
    }

    #[test]
    fn defaults_name_their_store() {
        let q = only_question(
            "    checkbox varid = MyVar.Enable, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               default = TRUE, defaultstore = MyStandard,\n\
               default value = 1 + 1,\n\
             endcheckbox;",
        );
        let body = q.body();
        assert_eq!(
            body[0].op,
            Opcode::Default {
                default_id: DefaultId(0),
                value_type: ValueType::Boolean,
                value: Some(ConstValue::Bool(true)),
            }
        );
        assert_eq!(body[1].children.len(), 1);
    }

    #[test]
    fn undeclared_default_store_is_reported() {
        let err = compile_src(&in_form(
            "    checkbox varid = MyVar.Enable, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               default = 1, defaultstore = Nowhere,\n\
             endcheckbox;",
        ))
        .unwrap_err();
        assert_eq!(err, VfrError::undeclared(18, "Nowhere"));
    }

    #[test]
    fn missing_close_errors_at_the_next_token() {
        let err = compile_src(&in_form(
            "    checkbox varid = MyVar.Enable, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               default = 1,\n\
             text help = STRING_TOKEN(7), text = STRING_TOKEN(7);",
        ))
        .unwrap_err();
        assert!(matches!(err, VfrError::Syntax { line: 19, .. }));
    }

    #[test]
    fn orderedlist_defaults_its_containers() {
        let q = only_question(
            "    orderedlist varid = MyVar.Values, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               option text = STRING_TOKEN(7), value = 1, flags = 0;\n\
             endlist;",
        );
        match (&q.op, &q.children[0].op) {
            (Opcode::OrderedList(list), Opcode::OneOfOption(opt)) => {
                assert_eq!(list.max_containers, 4);
                assert_eq!(opt.value_type, ValueType::Uint32);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn string_password_and_action() {
        let unit = compile_src(&in_form(
            "    string varid = MyVar.Values, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               flags = MULTI_LINE, minsize = 1, maxsize = 8,\n\
             endstring;\n\
             password prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               minsize = 6, maxsize = 20, encoding = 1,\n\
             endpassword;\n\
             action questionid = 9, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               flags = INTERACTIVE, config = STRING_TOKEN(10),\n\
             endaction;",
        ))
        .unwrap();
        let body = form_body(&unit);
        assert!(matches!(&body[0].op, Opcode::String(op) if op.flags == 1 && op.max_size == 8));
        assert!(matches!(&body[1].op, Opcode::Password(op) if op.min_size == 6));
        match &body[2].op {
            Opcode::Action { header, config } => {
                assert_eq!(header.question_id, QuestionId(9));
                assert_eq!(header.flags, 0x04);
                assert!(config.is_some());
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn split_date_collects_three_parts() {
        let q = only_question(
            "    date year varid = MyVar.When.Year, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
                   minimum = 2000, maximum = 2099, default = 2024,\n\
                 month varid = MyVar.When.Month, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
                   minimum = 1, maximum = 12, step = 1,\n\
                 day varid = MyVar.When.Day, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
                   minimum = 1, maximum = 31,\n\
             enddate;",
        );
        match &q.op {
            Opcode::Date(op) => {
                assert_eq!(op.flags, 0x10);
                assert!(op.header.storage.is_none());
                let parts = &op.split.as_ref().unwrap().parts;
                assert_eq!(parts[1].width(), Some(1));
            }
            other => panic!("expected date, got {:?}", other),
        }
        match &q.children[0].op {
            Opcode::Default {
                value: Some(ConstValue::Date(d)),
                ..
            } => assert_eq!((d.year, d.month, d.day), (2024, 1, 1)),
            other => panic!("expected date default, got {:?}", other),
        }
    }

    #[test]
    fn question_conditionals_and_checks_nest_in_bodies() {
        let q = only_question(
            "    numeric varid = MyVar.Enable, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
               minimum = 0, maximum = 9,\n\
               suppressif TRUE;\n\
                 refresh interval = 3\n\
               endif;\n\
               inconsistentif prompt = STRING_TOKEN(7), ideqval MyVar.Enable == 4 endif\n\
               warningif prompt = STRING_TOKEN(8), timeout = 5, pushthis > 7 endif;\n\
             endnumeric;",
        );
        let body = q.body();
        assert_eq!(body.len(), 3);
        assert_eq!(body[0].op, Opcode::SuppressIf);
        assert_eq!(body[0].children[1].op, Opcode::Refresh { interval: 3 });
        assert!(matches!(body[1].op, Opcode::InconsistentIf { .. }));
        assert!(matches!(body[2].op, Opcode::WarningIf { timeout: 5, .. }));
        assert_eq!(body[2].children.last().unwrap().op, Opcode::End);
    }

    #[test]
    fn duplicate_question_names_are_rejected() {
        let err = compile_src(&in_form(
            "    checkbox name = A, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
             endcheckbox;\n\
             checkbox name = A, prompt = STRING_TOKEN(5), help = STRING_TOKEN(6),\n\
             endcheckbox;",
        ))
        .unwrap_err();
        assert!(matches!(err, VfrError::DuplicateDeclaration { .. }));
    }
}
