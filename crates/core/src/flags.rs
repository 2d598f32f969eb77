//! Flag clause folding.
//!
//! A `flags = A | B | 0x10` clause folds over the lookup table of the
//! production it belongs to. Question kinds accept the common question
//! flags alongside their own.

use crate::error::{VfrError, VfrResult};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagBits {
    /// Bits of the common question header flags.
    Question(u8),
    /// Bits of the production's own flags field.
    Kind(u32),
}

/// Which lookup table a flag clause folds over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagKind {
    /// Questions with no kind-specific flags (goto, action, password, text).
    Question,
    CheckBox,
    Numeric,
    OrderedList,
    String,
    Date,
    Time,
    Option,
    Subtitle,
    /// Numbers only.
    Raw,
    FindFormat,
    Span,
    EfiAttribute,
    Class,
    Subclass,
}

const QUESTION: &[(&str, FlagBits)] = &[
    ("READ_ONLY", FlagBits::Question(0x01)),
    ("INTERACTIVE", FlagBits::Question(0x04)),
    ("RESET_REQUIRED", FlagBits::Question(0x10)),
    ("REST_STYLE", FlagBits::Question(0x20)),
    ("RECONNECT_REQUIRED", FlagBits::Question(0x40)),
    ("OPTIONS_ONLY", FlagBits::Question(0x80)),
    ("NV_ACCESS", FlagBits::Question(0x00)),
    ("LATE_CHECK", FlagBits::Question(0x00)),
];

const CHECKBOX: &[(&str, FlagBits)] = &[
    ("CHECKBOX_DEFAULT", FlagBits::Kind(0x01)),
    ("CHECKBOX_DEFAULT_MFG", FlagBits::Kind(0x02)),
];

const NUMERIC: &[(&str, FlagBits)] = &[
    ("NUMERIC_SIZE_1", FlagBits::Kind(0x00)),
    ("NUMERIC_SIZE_2", FlagBits::Kind(0x01)),
    ("NUMERIC_SIZE_4", FlagBits::Kind(0x02)),
    ("NUMERIC_SIZE_8", FlagBits::Kind(0x03)),
    ("DISPLAY_INT_DEC", FlagBits::Kind(0x00)),
    ("DISPLAY_UINT_DEC", FlagBits::Kind(0x10)),
    ("DISPLAY_UINT_HEX", FlagBits::Kind(0x20)),
];

const ORDERED_LIST: &[(&str, FlagBits)] = &[
    ("UNIQUE", FlagBits::Kind(0x01)),
    ("NOEMPTY", FlagBits::Kind(0x02)),
];

const STRING: &[(&str, FlagBits)] = &[("MULTI_LINE", FlagBits::Kind(0x01))];

const DATE: &[(&str, FlagBits)] = &[
    ("YEAR_SUPPRESS", FlagBits::Kind(0x01)),
    ("MONTH_SUPPRESS", FlagBits::Kind(0x02)),
    ("DAY_SUPPRESS", FlagBits::Kind(0x04)),
    ("STORAGE_NORMAL", FlagBits::Kind(0x00)),
    ("STORAGE_TIME", FlagBits::Kind(0x10)),
    ("STORAGE_WAKEUP", FlagBits::Kind(0x20)),
];

const TIME: &[(&str, FlagBits)] = &[
    ("HOUR_SUPPRESS", FlagBits::Kind(0x01)),
    ("MINUTE_SUPPRESS", FlagBits::Kind(0x02)),
    ("SECOND_SUPPRESS", FlagBits::Kind(0x04)),
    ("STORAGE_NORMAL", FlagBits::Kind(0x00)),
    ("STORAGE_TIME", FlagBits::Kind(0x10)),
    ("STORAGE_WAKEUP", FlagBits::Kind(0x20)),
];

const OPTION: &[(&str, FlagBits)] = &[
    ("OPTION_DEFAULT", FlagBits::Kind(0x10)),
    ("OPTION_DEFAULT_MFG", FlagBits::Kind(0x20)),
    ("DEFAULT", FlagBits::Kind(0x10)),
    ("MANUFACTURING", FlagBits::Kind(0x20)),
];

const SUBTITLE: &[(&str, FlagBits)] = &[("HORIZONTAL", FlagBits::Kind(0x01))];

const FIND_FORMAT: &[(&str, FlagBits)] = &[
    ("SENSITIVE", FlagBits::Kind(0x00)),
    ("INSENSITIVE", FlagBits::Kind(0x01)),
];

const SPAN: &[(&str, FlagBits)] = &[
    ("LAST_NON_MATCH", FlagBits::Kind(0x00)),
    ("FIRST_NON_MATCH", FlagBits::Kind(0x01)),
];

const EFI_ATTRIBUTE: &[(&str, FlagBits)] = &[
    ("EFI_VARIABLE_NON_VOLATILE", FlagBits::Kind(0x01)),
    ("EFI_VARIABLE_BOOTSERVICE_ACCESS", FlagBits::Kind(0x02)),
    ("EFI_VARIABLE_RUNTIME_ACCESS", FlagBits::Kind(0x04)),
];

const CLASS: &[(&str, FlagBits)] = &[
    ("NON_DEVICE", FlagBits::Kind(0x00)),
    ("DISK_DEVICE", FlagBits::Kind(0x01)),
    ("VIDEO_DEVICE", FlagBits::Kind(0x02)),
    ("NETWORK_DEVICE", FlagBits::Kind(0x04)),
    ("INPUT_DEVICE", FlagBits::Kind(0x08)),
    ("ONBOARD_DEVICE", FlagBits::Kind(0x10)),
    ("OTHER_DEVICE", FlagBits::Kind(0x20)),
];

const SUBCLASS: &[(&str, FlagBits)] = &[
    ("SETUP_APPLICATION", FlagBits::Kind(0x00)),
    ("GENERAL_APPLICATION", FlagBits::Kind(0x01)),
    ("FRONT_PAGE", FlagBits::Kind(0x02)),
    ("SINGLE_USE", FlagBits::Kind(0x03)),
];

impl FlagKind {
    fn own_table(self) -> &'static [(&'static str, FlagBits)] {
        match self {
            FlagKind::Question | FlagKind::Raw => &[],
            FlagKind::CheckBox => CHECKBOX,
            FlagKind::Numeric => NUMERIC,
            FlagKind::OrderedList => ORDERED_LIST,
            FlagKind::String => STRING,
            FlagKind::Date => DATE,
            FlagKind::Time => TIME,
            FlagKind::Option => OPTION,
            FlagKind::Subtitle => SUBTITLE,
            FlagKind::FindFormat => FIND_FORMAT,
            FlagKind::Span => SPAN,
            FlagKind::EfiAttribute => EFI_ATTRIBUTE,
            FlagKind::Class => CLASS,
            FlagKind::Subclass => SUBCLASS,
        }
    }

    fn accepts_question_flags(self) -> bool {
        matches!(
            self,
            FlagKind::Question
                | FlagKind::CheckBox
                | FlagKind::Numeric
                | FlagKind::OrderedList
                | FlagKind::String
                | FlagKind::Date
                | FlagKind::Time
                | FlagKind::Option
        )
    }

    /// Look a flag name up in this kind's table.
    pub fn lookup(self, name: &str) -> Option<(&'static str, FlagBits)> {
        let own = self.own_table().iter();
        let common: &'static [(&'static str, FlagBits)] = if self.accepts_question_flags() {
            QUESTION
        } else {
            &[]
        };
        own.chain(common.iter())
            .find(|(n, _)| *n == name)
            .copied()
    }
}

/// One operand of a flag clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagItem {
    Name(String),
    Number(u64),
}

/// Result of folding a flag clause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlagSet {
    pub question: u8,
    pub kind: u32,
    /// Names seen, including zero-valued ones such as `NUMERIC_SIZE_1`.
    pub named: BTreeSet<&'static str>,
}

impl FlagSet {
    pub fn has(&self, name: &str) -> bool {
        self.named.contains(name)
    }

    pub fn has_any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.named.contains(n))
    }

    /// Kind bits narrowed to a byte-sized flags field.
    pub fn kind_u8(&self, line: u32) -> VfrResult<u8> {
        u8::try_from(self.kind)
            .map_err(|_| VfrError::malformed(line, format!("flags value {:#x} exceeds 8 bits", self.kind)))
    }

    pub fn kind_u16(&self, line: u32) -> VfrResult<u16> {
        u16::try_from(self.kind).map_err(|_| {
            VfrError::malformed(line, format!("flags value {:#x} exceeds 16 bits", self.kind))
        })
    }
}

/// Fold `items` over `kind`'s table. Unknown names are syntax errors;
/// numbers are OR'd into the kind bits.
pub fn fold(kind: FlagKind, items: &[FlagItem], line: u32) -> VfrResult<FlagSet> {
    let mut set = FlagSet::default();
    for item in items {
        match item {
            FlagItem::Number(n) => {
                let n = u32::try_from(*n).map_err(|_| {
                    VfrError::malformed(line, format!("flags value {:#x} exceeds 32 bits", n))
                })?;
                set.kind |= n;
            }
            FlagItem::Name(name) => {
                let (canonical, bits) = kind
                    .lookup(name)
                    .ok_or_else(|| VfrError::syntax(line, format!("unknown flag '{}'", name)))?;
                set.named.insert(canonical);
                match bits {
                    FlagBits::Question(b) => set.question |= b,
                    FlagBits::Kind(b) => set.kind |= b,
                }
            }
        }
    }
    Ok(set)
}

/// Size bits of a numeric flags byte for a storage width.
pub fn numeric_size_bits(width: u8) -> u8 {
    match width {
        1 => 0x00,
        2 => 0x01,
        4 => 0x02,
        _ => 0x03,
    }
}

/// Storage width named by an explicit `NUMERIC_SIZE_*` flag.
pub fn explicit_numeric_width(set: &FlagSet) -> Option<u8> {
    [
        ("NUMERIC_SIZE_1", 1),
        ("NUMERIC_SIZE_2", 2),
        ("NUMERIC_SIZE_4", 4),
        ("NUMERIC_SIZE_8", 8),
    ]
    .iter()
    .find(|(n, _)| set.has(n))
    .map(|(_, w)| *w)
}
