//! Opcode tree produced by the parser.
//!
//! One `OpcodeNode` per completed production. Every node owns its children;
//! named lookups live in the symbol tables, never as back-pointers. Field
//! values are logical (ids, offsets, flags), never packed bytes: encoding is
//! the serializer's job.

use crate::symbols::VarStoreInfo;
use serde::Serialize;
use std::fmt;

// ──────────────────────────────────────────────
// Identifiers
// ──────────────────────────────────────────────

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident($inner:ty)) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// `STRING_TOKEN(n)`
    StringId(u16)
);
id_type!(QuestionId(u16));
id_type!(FormId(u16));
id_type!(VarStoreId(u16));
id_type!(DefaultId(u16));
id_type!(RuleId(u8));

/// The standard (non-manufacturing) default store.
pub const DEFAULT_STORE_STANDARD: DefaultId = DefaultId(0);
/// The manufacturing default store.
pub const DEFAULT_STORE_MANUFACTURING: DefaultId = DefaultId(1);

/// 128-bit GUID in its registry field layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// Formset class GUID used when `classguid` is absent.
pub const PLATFORM_SETUP_CLASS_GUID: Guid = Guid {
    data1: 0x9303_9971,
    data2: 0x8545,
    data3: 0x4b04,
    data4: [0xb4, 0x5e, 0x32, 0xeb, 0x83, 0x26, 0x04, 0x0e],
};

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl Serialize for Guid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A named reference. Backward references resolve while parsing; forward
/// references stay `Pending` until the link pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Reference<T> {
    Resolved(T),
    Pending { name: String, line: u32 },
}

impl<T: Copy> Reference<T> {
    pub fn id(&self) -> Option<T> {
        match self {
            Reference::Resolved(id) => Some(*id),
            Reference::Pending { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Reference::Pending { .. })
    }
}

// ──────────────────────────────────────────────
// Constant values
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Boolean,
    Date,
    Time,
    String,
    Ref,
    Buffer,
    Other,
}

impl ValueType {
    pub fn of_width(width: u8) -> ValueType {
        match width {
            1 => ValueType::Uint8,
            2 => ValueType::Uint16,
            4 => ValueType::Uint32,
            _ => ValueType::Uint64,
        }
    }

    /// Byte width of an unsigned value type.
    pub fn width(self) -> Option<u8> {
        match self {
            ValueType::Uint8 => Some(1),
            ValueType::Uint16 => Some(2),
            ValueType::Uint32 => Some(4),
            ValueType::Uint64 => Some(8),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HiiDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HiiTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HiiRef {
    pub question_id: QuestionId,
    pub form_id: FormId,
    pub formset_guid: Guid,
    pub device_path: StringId,
}

/// A literal baked into a node at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConstValue {
    Number(u64),
    Bool(bool),
    Date(HiiDate),
    Time(HiiTime),
    Ref(HiiRef),
    String(StringId),
    Buffer(Vec<u64>),
}

// ──────────────────────────────────────────────
// Statement payloads
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementHeader {
    pub prompt: StringId,
    pub help: StringId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionHeader {
    pub prompt: StringId,
    pub help: StringId,
    pub question_id: QuestionId,
    pub name: Option<String>,
    pub storage: Option<VarStoreInfo>,
    /// Common question flags (read-only, interactive, reset-required, ...).
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormSetOp {
    pub guid: Guid,
    pub title: StringId,
    pub help: StringId,
    pub class_guids: Vec<Guid>,
    pub class: Option<u16>,
    pub subclass: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormMapMethod {
    pub title: StringId,
    pub guid: Guid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarStoreOp {
    pub varstore_id: VarStoreId,
    pub guid: Guid,
    pub name: String,
    pub type_name: String,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EfiVarName {
    Ident(String),
    Token(StringId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarStoreEfiOp {
    pub varstore_id: VarStoreId,
    pub guid: Guid,
    pub name: EfiVarName,
    pub type_name: String,
    pub attributes: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarStoreNameValueOp {
    pub varstore_id: VarStoreId,
    pub guid: Guid,
    pub name: String,
    pub names: Vec<StringId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GotoTarget {
    /// No target: the destination comes from the question value.
    Dynamic,
    Form { form_id: FormId },
    FormQuestion {
        form_id: FormId,
        question: Reference<QuestionId>,
    },
    FormSet {
        formset_guid: Guid,
        form_id: FormId,
        question_id: QuestionId,
    },
    DevicePath {
        device_path: StringId,
        formset_guid: Guid,
        form_id: FormId,
        question_id: QuestionId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NumericRange {
    pub min: u64,
    pub max: u64,
    pub step: u64,
}

/// Shared by `numeric` and `oneof`. Minimum, maximum and step are carried in
/// `range` on the node itself rather than as child literal nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumericOp {
    pub header: QuestionHeader,
    /// Size and display flags; the low two bits encode the storage width.
    pub flags: u8,
    pub range: Option<NumericRange>,
    /// Width of the stored value in bytes.
    pub width: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionOp {
    pub text: StringId,
    pub flags: u8,
    pub question_flags: u8,
    pub value_type: ValueType,
    pub value: ConstValue,
    pub key: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringOp {
    pub header: QuestionHeader,
    pub flags: u8,
    pub min_size: u16,
    pub max_size: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderedListOp {
    pub header: QuestionHeader,
    pub flags: u8,
    pub max_containers: u8,
}

/// Storage of a date or time question declared with three separate varids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitStorage {
    pub parts: [VarStoreInfo; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateTimeOp {
    pub header: QuestionHeader,
    pub flags: u8,
    pub split: Option<SplitStorage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BannerLayout {
    Line { line: u16, align: Alignment },
    Timeout(u16),
}

/// One `data... = N` assignment inside a guid extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuidDatum {
    pub offset: u32,
    pub size: u32,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuidOpData {
    pub guid: Guid,
    pub data_type: Option<String>,
    pub array_len: Option<u32>,
    /// Byte length of the typed payload.
    pub size: u32,
    pub data: Vec<GuidDatum>,
}

// ──────────────────────────────────────────────
// Expression payloads
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Or,
    And,
    BitwiseOr,
    BitwiseAnd,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    ShiftLeft,
    ShiftRight,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    /// Precedence layer, lowest binding first.
    pub fn layer(self) -> u8 {
        match self {
            BinaryOp::Or => 0,
            BinaryOp::And => 1,
            BinaryOp::BitwiseOr => 2,
            BinaryOp::BitwiseAnd => 3,
            BinaryOp::Equal | BinaryOp::NotEqual => 4,
            BinaryOp::LessThan
            | BinaryOp::LessEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterEqual => 5,
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => 6,
            BinaryOp::Add | BinaryOp::Subtract => 7,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 8,
        }
    }
}

/// Comparators accepted by `ideqval`, `ideqid` and `vareqval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Equal,
    LessEqual,
    LessThan,
    GreaterEqual,
    GreaterThan,
}

impl Comparison {
    pub fn as_binary(self) -> BinaryOp {
        match self {
            Comparison::Equal => BinaryOp::Equal,
            Comparison::LessEqual => BinaryOp::LessEqual,
            Comparison::LessThan => BinaryOp::LessThan,
            Comparison::GreaterEqual => BinaryOp::GreaterEqual,
            Comparison::GreaterThan => BinaryOp::GreaterThan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    BitwiseNot,
    Length,
    ToBoolean,
    ToUint,
    ToUpper,
    ToLower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Constant {
    True,
    False,
    One,
    Ones,
    Zero,
    Undefined,
    Version,
    /// Numeric literal stored in the narrowest width that holds it.
    Uint { value: u64, width: u8 },
}

impl Constant {
    pub fn uint(value: u64) -> Constant {
        let width = if value <= u64::from(u8::MAX) {
            1
        } else if value <= u64::from(u16::MAX) {
            2
        } else if value <= u64::from(u32::MAX) {
            4
        } else {
            8
        };
        Constant::Uint { value, width }
    }
}

// ──────────────────────────────────────────────
// Opcode
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Opcode {
    // structure
    FormSet(FormSetOp),
    Form { form_id: FormId, title: StringId },
    FormMap { form_id: FormId, methods: Vec<FormMapMethod> },
    End,

    // storage
    VarStore(VarStoreOp),
    VarStoreEfi(VarStoreEfiOp),
    VarStoreNameValue(VarStoreNameValueOp),
    DefaultStore { name: String, prompt: StringId, default_id: DefaultId },

    // statements
    Subtitle { prompt: StringId, flags: u8 },
    Text { help: StringId, text: StringId, text_two: Option<StringId> },
    Image { image_id: u16 },
    Locked,
    Label { number: u16 },
    Banner { title: StringId, layout: BannerLayout },
    Modal,
    Goto { header: QuestionHeader, target: GotoTarget },
    ResetButton { statement: StatementHeader, default_id: DefaultId },

    // questions
    Action { header: QuestionHeader, config: Option<StringId> },
    CheckBox { header: QuestionHeader, flags: u8 },
    Numeric(NumericOp),
    OneOf(NumericOp),
    OneOfOption(OptionOp),
    String(StringOp),
    Password(StringOp),
    OrderedList(OrderedListOp),
    Date(DateTimeOp),
    Time(DateTimeOp),

    // conditionals and question tags
    SuppressIf,
    GrayOutIf,
    DisableIf,
    InconsistentIf { error: StringId, flags: u8 },
    NoSubmitIf { error: StringId, flags: u8 },
    WarningIf { warning: StringId, timeout: u8 },
    Rule { rule_id: RuleId, name: String },
    Default { default_id: DefaultId, value_type: ValueType, value: Option<ConstValue> },
    Value,
    Read,
    Write,
    Refresh { interval: u8 },
    RefreshId { guid: Guid },
    VarStoreDevice { device_path: StringId },
    GuidOp(GuidOpData),

    // expressions
    Binary(BinaryOp),
    Unary(UnaryOp),
    Constant(Constant),
    ToString { format: u8 },
    Catenate,
    Match,
    Match2 { guid: Guid },
    Conditional,
    Find { format: u8 },
    Mid,
    Token,
    Span { flags: u8 },
    Map,
    QuestionRef1 { question: Reference<QuestionId> },
    QuestionRef2,
    QuestionRef3 { device_path: Option<StringId>, guid: Option<Guid> },
    EqIdVal { question: Reference<QuestionId>, value: u16 },
    EqIdId { question1: Reference<QuestionId>, question2: Reference<QuestionId> },
    EqIdValList { question: Reference<QuestionId>, values: Vec<u16> },
    VarEqVal { var_index: u16, comparison: Comparison, value: u16 },
    RuleRef { rule: Reference<RuleId> },
    StringRef1 { string: StringId },
    StringRef2,
    This,
    Security { guid: Guid },
    Dup,
    Get { storage: VarStoreInfo },
    Set { storage: VarStoreInfo },
}

impl Opcode {
    /// Kinds whose children are closed by an explicit `End`.
    pub fn opens_scope(&self) -> bool {
        match self {
            Opcode::FormSet(_)
            | Opcode::Form { .. }
            | Opcode::FormMap { .. }
            | Opcode::Subtitle { .. }
            | Opcode::Action { .. }
            | Opcode::CheckBox { .. }
            | Opcode::Numeric(_)
            | Opcode::OneOf(_)
            | Opcode::String(_)
            | Opcode::Password(_)
            | Opcode::OrderedList(_)
            | Opcode::Date(_)
            | Opcode::Time(_)
            | Opcode::SuppressIf
            | Opcode::GrayOutIf
            | Opcode::DisableIf
            | Opcode::InconsistentIf { .. }
            | Opcode::NoSubmitIf { .. }
            | Opcode::WarningIf { .. }
            | Opcode::Rule { .. }
            | Opcode::GuidOp(_) => true,
            _ => false,
        }
    }

    /// Question header of question kinds.
    pub fn question_header(&self) -> Option<&QuestionHeader> {
        match self {
            Opcode::Goto { header, .. }
            | Opcode::Action { header, .. }
            | Opcode::CheckBox { header, .. } => Some(header),
            Opcode::Numeric(op) | Opcode::OneOf(op) => Some(&op.header),
            Opcode::String(op) | Opcode::Password(op) => Some(&op.header),
            Opcode::OrderedList(op) => Some(&op.header),
            Opcode::Date(op) | Opcode::Time(op) => Some(&op.header),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpcodeNode {
    pub op: Opcode,
    pub line: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OpcodeNode>,
}

impl OpcodeNode {
    pub fn new(op: Opcode, line: u32) -> Self {
        OpcodeNode {
            op,
            line,
            children: Vec::new(),
        }
    }

    pub fn with_children(op: Opcode, line: u32, children: Vec<OpcodeNode>) -> Self {
        OpcodeNode { op, line, children }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(OpcodeNode::count).sum::<usize>()
    }

    /// Pre-order traversal.
    pub fn walk<'s>(&'s self, f: &mut impl FnMut(&'s OpcodeNode)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    /// Children with the trailing `End` stripped.
    pub fn body(&self) -> &[OpcodeNode] {
        match self.children.last() {
            Some(last) if last.op == Opcode::End && self.op.opens_scope() => {
                &self.children[..self.children.len() - 1]
            }
            _ => &self.children,
        }
    }
}

/// Result of parsing one expression statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionInfo {
    /// Line of the first token of the expression.
    pub line: u32,
    pub root: OpcodeNode,
    pub opcode_count: usize,
}

impl ExpressionInfo {
    pub fn new(line: u32, root: OpcodeNode) -> Self {
        let opcode_count = root.count();
        ExpressionInfo {
            line,
            root,
            opcode_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_displays_in_registry_format() {
        assert_eq!(
            PLATFORM_SETUP_CLASS_GUID.to_string(),
            "93039971-8545-4b04-b45e-32eb8326040e"
        );
    }

    #[test]
    fn numeric_constants_take_the_narrowest_width() {
        assert_eq!(Constant::uint(255), Constant::Uint { value: 255, width: 1 });
        assert_eq!(Constant::uint(256), Constant::Uint { value: 256, width: 2 });
        assert_eq!(Constant::uint(0x1_0000), Constant::Uint { value: 0x1_0000, width: 4 });
        assert_eq!(
            Constant::uint(u64::MAX),
            Constant::Uint { value: u64::MAX, width: 8 }
        );
    }

    #[test]
    fn body_strips_only_the_closing_end() {
        let node = OpcodeNode::with_children(
            Opcode::SuppressIf,
            1,
            vec![
                OpcodeNode::new(Opcode::Constant(Constant::True), 1),
                OpcodeNode::new(Opcode::End, 2),
            ],
        );
        assert_eq!(node.body().len(), 1);
        assert_eq!(node.count(), 3);
    }
}
