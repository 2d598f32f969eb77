use super::Parser;
use crate::builder::Scope;
use crate::error::{VfrError, VfrResult};
use crate::flags::FlagKind;
use crate::layout::FieldType;
use crate::lexer::Token;
use crate::opcode::{
    DefaultId, EfiVarName, FormId, FormMapMethod, FormSetOp, Opcode, OpcodeNode,
    VarStoreEfiOp, VarStoreNameValueOp, VarStoreOp, PLATFORM_SETUP_CLASS_GUID,
};
use crate::symbols::{VarStoreDecl, VarStoreKind};

impl<'a> Parser<'a> {
    // -- Formset ------------------------------------------------

    pub(super) fn parse_formset(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("formset")?;
        self.clause("guid")?;
        let guid = self.parse_guid()?;
        self.expect(&Token::Comma)?;
        self.clause("title")?;
        let title = self.parse_string_token()?;
        self.expect(&Token::Comma)?;
        self.clause("help")?;
        let help = self.parse_string_token()?;
        self.expect(&Token::Comma)?;

        let mut class_guids = Vec::new();
        if self.is_word("classguid") {
            self.clause("classguid")?;
            class_guids.push(self.parse_guid()?);
            while self.eat(&Token::Pipe) {
                if class_guids.len() == 4 {
                    return Err(self.err("at most 4 class GUIDs are allowed"));
                }
                class_guids.push(self.parse_guid()?);
            }
            self.expect(&Token::Comma)?;
        } else {
            class_guids.push(PLATFORM_SETUP_CLASS_GUID);
        }
        let mut class = None;
        if self.is_word("class") {
            let clause_line = self.clause("class")?;
            class = Some(self.parse_flags(FlagKind::Class)?.kind_u16(clause_line)?);
            self.expect(&Token::Comma)?;
        }
        let mut subclass = None;
        if self.is_word("subclass") {
            let clause_line = self.clause("subclass")?;
            subclass = Some(self.parse_flags(FlagKind::Subclass)?.kind_u16(clause_line)?);
            self.expect(&Token::Comma)?;
        }

        let mut scope = Scope::open(
            Opcode::FormSet(FormSetOp {
                guid,
                title,
                help,
                class_guids,
                class,
                subclass,
            }),
            line,
        );
        while !self.is_word("endformset") {
            let item = self.parse_formset_item()?;
            scope.emit_all(item);
        }
        let end_line = self.advance().line;
        self.end_statement()?;
        Ok(scope.close(end_line))
    }

    /// One formset-level item. Declarations that produce no node yield
    /// nothing.
    fn parse_formset_item(&mut self) -> VfrResult<Option<OpcodeNode>> {
        let line = self.line();
        let w = match self.peek() {
            Token::Word(w) => w.as_str(),
            _ => return Err(self.unexpected("formset item or 'endformset'")),
        };
        match w {
            "form" => self.parse_form().map(Some),
            "formmap" => self.parse_formmap().map(Some),
            "varstore" => self.parse_varstore().map(Some),
            "efivarstore" => self.parse_efivarstore().map(Some),
            "namevaluevarstore" => self.parse_namevaluevarstore().map(Some),
            "defaultstore" => self.parse_defaultstore().map(Some),
            "guidop" => self.parse_guidop().map(Some),
            "image" => {
                let node = self.parse_tag()?;
                self.end_statement()?;
                Ok(Some(node))
            }
            "disableif" | "suppressif" => {
                let op = if w == "disableif" {
                    Opcode::DisableIf
                } else {
                    Opcode::SuppressIf
                };
                self.nested(|p| {
                    p.advance();
                    let mut scope = Scope::open(op, line);
                    scope.condition(p.parse_expression()?);
                    p.end_statement()?;
                    scope.begin_body();
                    while !p.is_word("endif") {
                        let item = p.parse_formset_item()?;
                        scope.emit_all(item);
                    }
                    let end_line = p.advance().line;
                    p.end_statement()?;
                    Ok(Some(scope.close(end_line)))
                })
            }
            _ => Err(self.unexpected("formset item or 'endformset'")),
        }
    }

    // -- Forms --------------------------------------------------

    /// `form formid = N , title = S ; items endform ;`
    fn parse_form(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("form")?;
        self.clause("formid")?;
        let form_id = FormId(self.take_u16("form id")?);
        self.expect(&Token::Comma)?;
        self.clause("title")?;
        let title = self.parse_string_token()?;
        self.end_statement()?;
        self.symbols.declare_form(form_id, line)?;

        let mut scope = Scope::open(Opcode::Form { form_id, title }, line);
        self.parse_form_items(&mut scope)?;
        let end_line = self.expect_word("endform")?;
        self.end_statement()?;
        Ok(scope.close(end_line))
    }

    /// `formmap formid = N , (maptitle = S ; mapguid = G ;)* items endform ;`
    fn parse_formmap(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("formmap")?;
        self.clause("formid")?;
        let form_id = FormId(self.take_u16("form id")?);
        self.expect(&Token::Comma)?;
        let mut methods = Vec::new();
        while self.is_word("maptitle") {
            self.clause("maptitle")?;
            let title = self.parse_string_token()?;
            self.end_statement()?;
            self.clause("mapguid")?;
            let guid = self.parse_guid()?;
            self.end_statement()?;
            methods.push(FormMapMethod { title, guid });
        }
        self.symbols.declare_form(form_id, line)?;

        let mut scope = Scope::open(Opcode::FormMap { form_id, methods }, line);
        self.parse_form_items(&mut scope)?;
        let end_line = self.expect_word("endform")?;
        self.end_statement()?;
        Ok(scope.close(end_line))
    }

    fn parse_form_items(&mut self, scope: &mut Scope) -> VfrResult<()> {
        while !self.is_word("endform") {
            let node = self.parse_form_item()?;
            scope.emit(node);
        }
        Ok(())
    }

    // -- Storage ------------------------------------------------

    /// `[varid = N ,]`
    fn parse_optional_varstore_id(&mut self) -> VfrResult<Option<u16>> {
        if !self.is_word("varid") {
            return Ok(None);
        }
        self.clause("varid")?;
        let id = self.take_u16("varstore id")?;
        self.expect(&Token::Comma)?;
        Ok(Some(id))
    }

    /// `varstore TYPE , [varid = N ,] name = Name , guid = G ;`
    fn parse_varstore(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("varstore")?;
        let var_type = self.parse_type_name()?;
        self.expect(&Token::Comma)?;
        let varstore_id = self.parse_optional_varstore_id()?;
        self.clause("name")?;
        let name = self.take_ident()?;
        self.expect(&Token::Comma)?;
        self.clause("guid")?;
        let guid = self.parse_guid()?;
        self.end_statement()?;

        let type_name = var_type.name().to_owned();
        let id = self.symbols.declare_varstore(VarStoreDecl {
            name: name.clone(),
            kind: VarStoreKind::Buffer,
            var_type: Some(var_type),
            names: Vec::new(),
            varstore_id,
            guid,
            line,
        })?;
        let size = self.symbols.varstore(&name).map_or(0, |v| v.size);
        Ok(OpcodeNode::new(
            Opcode::VarStore(VarStoreOp {
                varstore_id: id,
                guid,
                name,
                type_name,
                size,
            }),
            line,
        ))
    }

    /// `efivarstore TYPE , [varid = N ,] attribute = A (| A)* ,
    ///  ( name = Name , | name = S , varsize = N , ) guid = G ;`
    ///
    /// A store named by a string token is referenced by its type name.
    fn parse_efivarstore(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("efivarstore")?;
        let declared_type = self.parse_type_name()?;
        self.expect(&Token::Comma)?;
        let varstore_id = self.parse_optional_varstore_id()?;
        self.clause("attribute")?;
        let attributes = self.parse_flags(FlagKind::EfiAttribute)?.kind;
        self.expect(&Token::Comma)?;
        self.clause("name")?;

        let (store_name, name, var_type) = if self.is_word("STRING_TOKEN") {
            let token = self.parse_string_token()?;
            self.expect(&Token::Comma)?;
            let size_line = self.clause("varsize")?;
            let size = self.take_u8("varsize")?;
            self.expect(&Token::Comma)?;
            let var_type = FieldType::uint_of_width(size).ok_or_else(|| {
                VfrError::malformed(size_line, format!("varsize must be 1, 2, 4 or 8, got {}", size))
            })?;
            (declared_type.name().to_owned(), EfiVarName::Token(token), var_type)
        } else {
            let ident = self.take_ident()?;
            self.expect(&Token::Comma)?;
            (ident.clone(), EfiVarName::Ident(ident), declared_type.clone())
        };
        self.clause("guid")?;
        let guid = self.parse_guid()?;
        self.end_statement()?;

        let id = self.symbols.declare_varstore(VarStoreDecl {
            name: store_name.clone(),
            kind: VarStoreKind::Efi,
            var_type: Some(var_type),
            names: Vec::new(),
            varstore_id,
            guid,
            line,
        })?;
        let size = self.symbols.varstore(&store_name).map_or(0, |v| v.size);
        Ok(OpcodeNode::new(
            Opcode::VarStoreEfi(VarStoreEfiOp {
                varstore_id: id,
                guid,
                name,
                type_name: declared_type.name().to_owned(),
                attributes,
                size,
            }),
            line,
        ))
    }

    /// `namevaluevarstore Name , [varid = N ,] (name = S ,)+ guid = G ;`
    fn parse_namevaluevarstore(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("namevaluevarstore")?;
        let name = self.take_ident()?;
        self.expect(&Token::Comma)?;
        let varstore_id = self.parse_optional_varstore_id()?;
        let mut names = Vec::new();
        while self.is_word("name") {
            self.clause("name")?;
            names.push(self.parse_string_token()?);
            self.expect(&Token::Comma)?;
        }
        if names.is_empty() {
            return Err(self.unexpected("'name'"));
        }
        self.clause("guid")?;
        let guid = self.parse_guid()?;
        self.end_statement()?;

        let id = self.symbols.declare_varstore(VarStoreDecl {
            name: name.clone(),
            kind: VarStoreKind::NameValue,
            var_type: None,
            names: names.clone(),
            varstore_id,
            guid,
            line,
        })?;
        Ok(OpcodeNode::new(
            Opcode::VarStoreNameValue(VarStoreNameValueOp {
                varstore_id: id,
                guid,
                name,
                names,
            }),
            line,
        ))
    }

    /// `defaultstore Name , prompt = S [, attribute = N] ;`
    fn parse_defaultstore(&mut self) -> VfrResult<OpcodeNode> {
        let line = self.expect_word("defaultstore")?;
        let name = self.take_ident()?;
        self.expect(&Token::Comma)?;
        self.clause("prompt")?;
        let prompt = self.parse_string_token()?;
        let mut default_id = DefaultId(0);
        if self.eat_clause("attribute")? {
            default_id = DefaultId(self.take_u16("default store id")?);
        }
        self.end_statement()?;
        self.symbols.declare_default_store(&name, default_id, line)?;
        Ok(OpcodeNode::new(
            Opcode::DefaultStore {
                name,
                prompt,
                default_id,
            },
            line,
        ))
    }
}
