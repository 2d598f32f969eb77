//! Name tables for one compilation unit: varstores, default stores,
//! questions, rules and forms, plus the typedef layouts they resolve
//! against.

use crate::error::{VfrError, VfrResult};
use crate::layout::{BitField, FieldType, PathSegment, TypeDb};
use crate::opcode::{
    DefaultId, FormId, Guid, QuestionId, Reference, RuleId, StringId, VarStoreId,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{event, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarStoreKind {
    Buffer,
    Efi,
    NameValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarLocation {
    /// Byte offset into a buffer or EFI variable.
    Offset(u32),
    /// Name string of a name/value store entry.
    Name(StringId),
}

/// Where a question's value lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarStoreInfo {
    pub varstore_id: VarStoreId,
    pub kind: VarStoreKind,
    pub location: VarLocation,
    /// `None` for name/value entries, which carry no type.
    pub var_type: Option<FieldType>,
    pub size: u32,
    pub array_len: Option<u32>,
    pub bit: Option<BitField>,
}

impl VarStoreInfo {
    /// Byte width of scalar numeric storage: 1, 2, 4 or 8.
    pub fn width(&self) -> Option<u8> {
        if self.array_len.is_some() || self.bit.is_some() {
            return None;
        }
        self.var_type.as_ref().and_then(FieldType::scalar_width)
    }
}

/// A varid path as written: `Store[.Field[idx]]*`, or `Store[n]` for a
/// name/value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarPath {
    pub store: String,
    pub store_index: Option<u32>,
    pub fields: Vec<PathSegment>,
    pub line: u32,
}

impl VarPath {
    pub fn new(store: impl Into<String>, line: u32) -> Self {
        VarPath {
            store: store.into(),
            store_index: None,
            fields: Vec::new(),
            line,
        }
    }
}

impl fmt::Display for VarPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.store)?;
        if let Some(i) = self.store_index {
            write!(f, "[{}]", i)?;
        }
        for seg in &self.fields {
            write!(f, ".{}", seg.name)?;
            if let Some(i) = seg.index {
                write!(f, "[{}]", i)?;
            }
        }
        Ok(())
    }
}

/// A declared variable store.
#[derive(Debug, Clone, Serialize)]
pub struct VarStore {
    pub varstore_id: VarStoreId,
    pub kind: VarStoreKind,
    pub name: String,
    /// Layout root of buffer and EFI stores.
    pub var_type: Option<FieldType>,
    pub size: u32,
    /// Entry names of a name/value store.
    pub names: Vec<StringId>,
    pub guid: Guid,
    pub line: u32,
}

/// Input to [`SymbolTable::declare_varstore`].
#[derive(Debug, Clone)]
pub struct VarStoreDecl {
    pub name: String,
    pub kind: VarStoreKind,
    pub var_type: Option<FieldType>,
    pub names: Vec<StringId>,
    pub varstore_id: Option<u16>,
    pub guid: Guid,
    pub line: u32,
}

#[derive(Debug, Clone, Copy)]
struct Named<T> {
    id: T,
    line: u32,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    pub types: TypeDb,
    varstores: Vec<VarStore>,
    varstore_index: HashMap<String, usize>,
    default_stores: HashMap<String, Named<DefaultId>>,
    questions_by_name: HashMap<String, Named<QuestionId>>,
    questions_by_path: HashMap<String, QuestionId>,
    question_ids: BTreeSet<u16>,
    rules: HashMap<String, Named<RuleId>>,
    next_rule: u16,
    forms: BTreeMap<u16, u32>,
}

impl SymbolTable {
    pub fn new(default_pack: u32) -> Self {
        SymbolTable {
            types: TypeDb::new(default_pack),
            varstores: Vec::new(),
            varstore_index: HashMap::new(),
            default_stores: HashMap::new(),
            questions_by_name: HashMap::new(),
            questions_by_path: HashMap::new(),
            question_ids: BTreeSet::new(),
            rules: HashMap::new(),
            next_rule: 0,
            forms: BTreeMap::new(),
        }
    }

    // ── varstores ──────────────────────────────────────────────

    pub fn declare_varstore(&mut self, decl: VarStoreDecl) -> VfrResult<VarStoreId> {
        if let Some(&i) = self.varstore_index.get(&decl.name) {
            return Err(VfrError::duplicate(
                decl.line,
                decl.name,
                self.varstores[i].line,
            ));
        }
        let id = match decl.varstore_id {
            Some(0) => {
                return Err(VfrError::malformed(decl.line, "varstore id 0 is reserved"));
            }
            Some(id) => {
                if let Some(prev) = self.varstores.iter().find(|v| v.varstore_id.0 == id) {
                    return Err(VfrError::duplicate(
                        decl.line,
                        format!("varid {}", id),
                        prev.line,
                    ));
                }
                id
            }
            None => (1..=u16::MAX)
                .find(|id| self.varstores.iter().all(|v| v.varstore_id.0 != *id))
                .ok_or_else(|| VfrError::malformed(decl.line, "varstore ids exhausted"))?,
        };
        let size = decl
            .var_type
            .as_ref()
            .map_or(0, |ty| self.types.size_of(ty));
        event!(
            Level::DEBUG,
            "line {}: {:?} varstore '{}' registered as id {} ({} bytes)",
            decl.line,
            decl.kind,
            decl.name,
            id,
            size
        );
        self.varstore_index
            .insert(decl.name.clone(), self.varstores.len());
        self.varstores.push(VarStore {
            varstore_id: VarStoreId(id),
            kind: decl.kind,
            name: decl.name,
            var_type: decl.var_type,
            size,
            names: decl.names,
            guid: decl.guid,
            line: decl.line,
        });
        Ok(VarStoreId(id))
    }

    pub fn varstore(&self, name: &str) -> Option<&VarStore> {
        self.varstore_index.get(name).map(|&i| &self.varstores[i])
    }

    pub fn varstores(&self) -> &[VarStore] {
        &self.varstores
    }

    /// Resolve a varid path to its storage. The store must be declared and
    /// every field segment must exist in the store's layout.
    pub fn resolve_var_id(&self, path: &VarPath) -> VfrResult<VarStoreInfo> {
        let line = path.line;
        let store = self
            .varstore(&path.store)
            .ok_or_else(|| VfrError::undeclared(line, path.store.clone()))?;

        if store.kind == VarStoreKind::NameValue {
            if let Some(seg) = path.fields.first() {
                return Err(VfrError::undeclared(line, seg.name.clone()));
            }
            let idx = path.store_index.ok_or_else(|| {
                VfrError::syntax(
                    line,
                    format!("name/value varstore '{}' must be indexed", store.name),
                )
            })?;
            let name = store.names.get(idx as usize).ok_or_else(|| {
                VfrError::malformed(
                    line,
                    format!(
                        "index {} out of bounds for '{}' with {} names",
                        idx,
                        store.name,
                        store.names.len()
                    ),
                )
            })?;
            let info = VarStoreInfo {
                varstore_id: store.varstore_id,
                kind: store.kind,
                location: VarLocation::Name(*name),
                var_type: None,
                size: 0,
                array_len: None,
                bit: None,
            };
            event!(Level::TRACE, "line {}: {} -> name {}", line, path, name);
            return Ok(info);
        }

        if path.store_index.is_some() {
            return Err(VfrError::syntax(
                line,
                format!("varstore '{}' cannot be indexed", store.name),
            ));
        }
        let root = store
            .var_type
            .as_ref()
            .ok_or_else(|| VfrError::undeclared(line, path.store.clone()))?;
        let field = self.types.resolve_path(root, &path.fields, line)?;
        event!(
            Level::TRACE,
            "line {}: {} -> varstore {} offset {} ({} bytes)",
            line,
            path,
            store.varstore_id,
            field.offset,
            field.size
        );
        Ok(VarStoreInfo {
            varstore_id: store.varstore_id,
            kind: store.kind,
            location: VarLocation::Offset(field.offset),
            var_type: Some(field.ty),
            size: field.size,
            array_len: field.array_len,
            bit: field.bits,
        })
    }

    // ── default stores ─────────────────────────────────────────

    pub fn declare_default_store(&mut self, name: &str, id: DefaultId, line: u32) -> VfrResult<()> {
        if let Some(prev) = self.default_stores.get(name) {
            return Err(VfrError::duplicate(line, name, prev.line));
        }
        event!(Level::DEBUG, "line {}: default store '{}' = {}", line, name, id);
        self.default_stores
            .insert(name.to_owned(), Named { id, line });
        Ok(())
    }

    pub fn default_store(&self, name: &str, line: u32) -> VfrResult<DefaultId> {
        self.default_stores
            .get(name)
            .map(|d| d.id)
            .ok_or_else(|| VfrError::undeclared(line, name))
    }

    // ── questions ──────────────────────────────────────────────

    /// Register a question under its name and varid path. The explicit id
    /// is taken as given; otherwise the lowest free id from 1 is allocated.
    pub fn register_question(
        &mut self,
        name: Option<&str>,
        path: Option<&VarPath>,
        explicit: Option<u16>,
        line: u32,
    ) -> VfrResult<QuestionId> {
        if let Some(n) = name {
            if let Some(prev) = self.questions_by_name.get(n) {
                return Err(VfrError::duplicate(line, n, prev.line));
            }
        }
        let id = match explicit {
            Some(id) => id,
            None => (1..=u16::MAX)
                .find(|id| !self.question_ids.contains(id))
                .ok_or_else(|| VfrError::malformed(line, "question ids exhausted"))?,
        };
        self.question_ids.insert(id);
        let qid = QuestionId(id);
        if let Some(n) = name {
            self.questions_by_name
                .insert(n.to_owned(), Named { id: qid, line });
        }
        if let Some(p) = path {
            self.questions_by_path.entry(p.to_string()).or_insert(qid);
        }
        event!(
            Level::DEBUG,
            "line {}: question {} registered (name {:?}, varid {:?})",
            line,
            qid,
            name,
            path.map(ToString::to_string)
        );
        Ok(qid)
    }

    /// Move a question to a new id (`key = N`).
    pub fn rekey_question(&mut self, old: QuestionId, new: QuestionId, line: u32) {
        if old == new {
            return;
        }
        self.question_ids.remove(&old.0);
        self.question_ids.insert(new.0);
        for q in self.questions_by_name.values_mut() {
            if q.id == old {
                q.id = new;
            }
        }
        for q in self.questions_by_path.values_mut() {
            if *q == old {
                *q = new;
            }
        }
        event!(Level::DEBUG, "line {}: question {} rekeyed to {}", line, old, new);
    }

    /// Look a question up by name, then by normalized varid path.
    pub fn find_question(&self, key: &str) -> Option<QuestionId> {
        self.questions_by_name
            .get(key)
            .map(|q| q.id)
            .or_else(|| self.questions_by_path.get(key).copied())
    }

    /// Reference a question; unknown names stay pending until link.
    pub fn question_ref(&self, key: &str, line: u32) -> Reference<QuestionId> {
        match self.find_question(key) {
            Some(id) => Reference::Resolved(id),
            None => {
                event!(Level::DEBUG, "line {}: forward question reference '{}'", line, key);
                Reference::Pending {
                    name: key.to_owned(),
                    line,
                }
            }
        }
    }

    pub fn question_count(&self) -> usize {
        self.question_ids.len()
    }

    // ── rules ──────────────────────────────────────────────────

    pub fn declare_rule(&mut self, name: &str, line: u32) -> VfrResult<RuleId> {
        if let Some(prev) = self.rules.get(name) {
            return Err(VfrError::duplicate(line, name, prev.line));
        }
        let id = u8::try_from(self.next_rule)
            .map_err(|_| VfrError::malformed(line, "more than 256 rules in one formset"))?;
        self.next_rule += 1;
        event!(Level::DEBUG, "line {}: rule '{}' = {}", line, name, id);
        self.rules.insert(
            name.to_owned(),
            Named {
                id: RuleId(id),
                line,
            },
        );
        Ok(RuleId(id))
    }

    pub fn find_rule(&self, name: &str) -> Option<RuleId> {
        self.rules.get(name).map(|r| r.id)
    }

    pub fn rule_ref(&self, name: &str, line: u32) -> Reference<RuleId> {
        match self.find_rule(name) {
            Some(id) => Reference::Resolved(id),
            None => {
                event!(Level::DEBUG, "line {}: forward rule reference '{}'", line, name);
                Reference::Pending {
                    name: name.to_owned(),
                    line,
                }
            }
        }
    }

    // ── forms ──────────────────────────────────────────────────

    pub fn declare_form(&mut self, id: FormId, line: u32) -> VfrResult<()> {
        if let Some(&prev) = self.forms.get(&id.0) {
            return Err(VfrError::duplicate(line, format!("form {}", id), prev));
        }
        self.forms.insert(id.0, line);
        event!(Level::DEBUG, "line {}: form {} declared", line, id);
        Ok(())
    }

    pub fn has_form(&self, id: FormId) -> bool {
        self.forms.contains_key(&id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FieldDecl;

    fn table_with_store() -> SymbolTable {
        let mut t = SymbolTable::new(8);
        t.types
            .declare(
                "Data",
                false,
                vec![
                    FieldDecl {
                        name: Some("A".into()),
                        ty: FieldType::Uint8,
                        array_len: None,
                        bit_width: None,
                        line: 1,
                    },
                    FieldDecl {
                        name: Some("B".into()),
                        ty: FieldType::Uint16,
                        array_len: Some(3),
                        bit_width: None,
                        line: 1,
                    },
                ],
                1,
            )
            .unwrap();
        t.declare_varstore(VarStoreDecl {
            name: "Store".into(),
            kind: VarStoreKind::Buffer,
            var_type: Some(FieldType::Struct("Data".into())),
            names: vec![],
            varstore_id: None,
            guid: Guid::default(),
            line: 2,
        })
        .unwrap();
        t
    }

    fn path(store: &str, fields: &[(&str, Option<u32>)]) -> VarPath {
        VarPath {
            store: store.into(),
            store_index: None,
            fields: fields
                .iter()
                .map(|(n, i)| PathSegment {
                    name: (*n).into(),
                    index: *i,
                })
                .collect(),
            line: 9,
        }
    }

    #[test]
    fn varstore_ids_fill_the_lowest_gap() {
        let mut t = table_with_store();
        let id = t
            .declare_varstore(VarStoreDecl {
                name: "Other".into(),
                kind: VarStoreKind::Buffer,
                var_type: Some(FieldType::Uint8),
                names: vec![],
                varstore_id: Some(3),
                guid: Guid::default(),
                line: 3,
            })
            .unwrap();
        assert_eq!(id, VarStoreId(3));
        let next = t
            .declare_varstore(VarStoreDecl {
                name: "Third".into(),
                kind: VarStoreKind::Buffer,
                var_type: Some(FieldType::Uint8),
                names: vec![],
                varstore_id: None,
                guid: Guid::default(),
                line: 4,
            })
            .unwrap();
        assert_eq!(next, VarStoreId(2));
        assert_eq!(t.varstore("Store").unwrap().size, 8);
    }

    #[test]
    fn indexed_field_resolves_to_element_offset() {
        let t = table_with_store();
        let info = t.resolve_var_id(&path("Store", &[("B", Some(1))])).unwrap();
        assert_eq!(info.location, VarLocation::Offset(4));
        assert_eq!(info.width(), Some(2));
    }

    #[test]
    fn unindexed_array_has_no_scalar_width() {
        let t = table_with_store();
        let info = t.resolve_var_id(&path("Store", &[("B", None)])).unwrap();
        assert_eq!(info.size, 6);
        assert_eq!(info.width(), None);
    }

    #[test]
    fn undeclared_store_is_named_in_the_error() {
        let t = table_with_store();
        assert_eq!(
            t.resolve_var_id(&path("Nope", &[("A", None)])).unwrap_err(),
            VfrError::undeclared(9, "Nope")
        );
    }

    #[test]
    fn name_value_entries_resolve_by_index() {
        let mut t = SymbolTable::new(8);
        t.declare_varstore(VarStoreDecl {
            name: "Nv".into(),
            kind: VarStoreKind::NameValue,
            var_type: None,
            names: vec![StringId(10), StringId(11)],
            varstore_id: None,
            guid: Guid::default(),
            line: 1,
        })
        .unwrap();
        let mut p = VarPath::new("Nv", 4);
        p.store_index = Some(1);
        let info = t.resolve_var_id(&p).unwrap();
        assert_eq!(info.location, VarLocation::Name(StringId(11)));
        assert_eq!(info.width(), None);
        p.store_index = Some(2);
        assert!(matches!(
            t.resolve_var_id(&p).unwrap_err(),
            VfrError::MalformedLiteral { .. }
        ));
    }

    #[test]
    fn questions_are_found_by_name_and_path() {
        let mut t = table_with_store();
        let p = path("Store", &[("A", None)]);
        let id = t.register_question(Some("Q"), Some(&p), None, 5).unwrap();
        assert_eq!(id, QuestionId(1));
        assert_eq!(t.find_question("Q"), Some(id));
        assert_eq!(t.find_question("Store.A"), Some(id));
        assert!(t.question_ref("Later", 6).is_pending());
        let dup = t.register_question(Some("Q"), None, None, 7).unwrap_err();
        assert_eq!(dup, VfrError::duplicate(7, "Q", 5));
    }

    #[test]
    fn rekey_moves_every_index() {
        let mut t = table_with_store();
        let p = path("Store", &[("A", None)]);
        let id = t.register_question(Some("Q"), Some(&p), None, 5).unwrap();
        t.rekey_question(id, QuestionId(0x100), 5);
        assert_eq!(t.find_question("Q"), Some(QuestionId(0x100)));
        assert_eq!(t.find_question("Store.A"), Some(QuestionId(0x100)));
        let next = t.register_question(None, None, None, 6).unwrap();
        assert_eq!(next, QuestionId(1));
    }

    #[test]
    fn rules_are_numbered_in_declaration_order() {
        let mut t = SymbolTable::new(8);
        assert_eq!(t.declare_rule("First", 1).unwrap(), RuleId(0));
        assert_eq!(t.declare_rule("Second", 2).unwrap(), RuleId(1));
        assert_eq!(t.rule_ref("Second", 3), Reference::Resolved(RuleId(1)));
        assert!(t.declare_rule("First", 4).is_err());
    }
}
