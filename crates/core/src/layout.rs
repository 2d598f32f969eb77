//! Struct/union layout database.
//!
//! Typedef bodies are laid out with C packing rules: natural alignment capped
//! by the active `#pragma pack` value, struct alignment equal to the widest
//! field alignment, size rounded up to that alignment, unions overlaid at
//! offset 0. Consecutive bitfields of one base type share a storage unit.

use crate::error::{VfrError, VfrResult};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{event, Level};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum FieldType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Boolean,
    StringId,
    Date,
    Time,
    Ref,
    Guid,
    Struct(String),
}

impl FieldType {
    /// Built-in type keyword, if `name` is one.
    pub fn builtin(name: &str) -> Option<FieldType> {
        Some(match name {
            "UINT8" => FieldType::Uint8,
            "UINT16" => FieldType::Uint16,
            "UINT32" => FieldType::Uint32,
            "UINT64" => FieldType::Uint64,
            "BOOLEAN" => FieldType::Boolean,
            "EFI_STRING_ID" => FieldType::StringId,
            "EFI_HII_DATE" => FieldType::Date,
            "EFI_HII_TIME" => FieldType::Time,
            "EFI_HII_REF" => FieldType::Ref,
            "EFI_GUID" => FieldType::Guid,
            _ => return None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            FieldType::Uint8 => "UINT8",
            FieldType::Uint16 => "UINT16",
            FieldType::Uint32 => "UINT32",
            FieldType::Uint64 => "UINT64",
            FieldType::Boolean => "BOOLEAN",
            FieldType::StringId => "EFI_STRING_ID",
            FieldType::Date => "EFI_HII_DATE",
            FieldType::Time => "EFI_HII_TIME",
            FieldType::Ref => "EFI_HII_REF",
            FieldType::Guid => "EFI_GUID",
            FieldType::Struct(name) => name,
        }
    }

    /// Types that can back a bitfield.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Uint8
                | FieldType::Uint16
                | FieldType::Uint32
                | FieldType::Uint64
                | FieldType::Boolean
        )
    }

    /// Byte width of a scalar numeric type.
    pub fn scalar_width(&self) -> Option<u8> {
        match self {
            FieldType::Uint8 | FieldType::Boolean => Some(1),
            FieldType::Uint16 | FieldType::StringId => Some(2),
            FieldType::Uint32 => Some(4),
            FieldType::Uint64 => Some(8),
            _ => None,
        }
    }

    /// Unsigned integer type of the given byte width.
    pub fn uint_of_width(width: u8) -> Option<FieldType> {
        match width {
            1 => Some(FieldType::Uint8),
            2 => Some(FieldType::Uint16),
            4 => Some(FieldType::Uint32),
            8 => Some(FieldType::Uint64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitField {
    /// Bit offset from the start of the enclosing struct.
    pub bit_offset: u32,
    pub width: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLayout {
    pub name: String,
    pub ty: FieldType,
    /// Byte offset; for bitfields, the offset of the storage unit.
    pub offset: u32,
    pub array_len: Option<u32>,
    pub bits: Option<BitField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeLayout {
    pub name: String,
    pub size: u32,
    pub align: u32,
    pub is_union: bool,
    pub fields: Vec<FieldLayout>,
    /// 0 for built-in composite types.
    pub line: u32,
}

impl TypeLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A member as written in a typedef body, before layout.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    /// `None` only for anonymous bitfields.
    pub name: Option<String>,
    pub ty: FieldType,
    pub array_len: Option<u32>,
    pub bit_width: Option<u32>,
    pub line: u32,
}

/// One `.name[index]` step of a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub index: Option<u32>,
}

/// The storage a field path lands on, relative to the path root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub offset: u32,
    pub ty: FieldType,
    /// Total bytes covered (element size times array length when unindexed).
    pub size: u32,
    pub array_len: Option<u32>,
    /// Absolute bit offset from the path root, for bitfields.
    pub bits: Option<BitField>,
}

#[derive(Debug, Clone)]
struct PackEntry {
    id: Option<String>,
    align: u32,
}

struct BitUnit {
    ty: FieldType,
    start: u32,
    used: u32,
}

#[derive(Debug, Clone)]
pub struct TypeDb {
    types: HashMap<String, TypeLayout>,
    default_pack: u32,
    pack: u32,
    pack_stack: Vec<PackEntry>,
}

/// Alignments `#pragma pack` accepts.
pub const PACK_ALIGNMENTS: [u32; 5] = [1, 2, 4, 8, 16];

fn too_large(line: u32, name: &str) -> VfrError {
    VfrError::malformed(line, format!("size of {} exceeds 4 GiB", name))
}

fn align_up(value: u32, align: u32, line: u32, name: &str) -> VfrResult<u32> {
    value
        .checked_next_multiple_of(align)
        .ok_or_else(|| too_large(line, name))
}

/// `a + b` for byte offsets and sizes.
fn add(a: u32, b: u32, line: u32, name: &str) -> VfrResult<u32> {
    a.checked_add(b).ok_or_else(|| too_large(line, name))
}

/// `a * b` for byte offsets and sizes.
pub(crate) fn mul(a: u32, b: u32, line: u32, name: &str) -> VfrResult<u32> {
    a.checked_mul(b).ok_or_else(|| too_large(line, name))
}

fn check_pack(value: u32, line: u32) -> VfrResult<u32> {
    if PACK_ALIGNMENTS.contains(&value) {
        Ok(value)
    } else {
        Err(VfrError::malformed(
            line,
            format!("pack alignment must be 1, 2, 4, 8 or 16, got {}", value),
        ))
    }
}

fn builtin_layout(name: &str, size: u32, align: u32, fields: &[(&str, FieldType, u32, Option<u32>)]) -> TypeLayout {
    TypeLayout {
        name: name.to_owned(),
        size,
        align,
        is_union: false,
        fields: fields
            .iter()
            .map(|(n, ty, offset, array_len)| FieldLayout {
                name: (*n).to_owned(),
                ty: ty.clone(),
                offset: *offset,
                array_len: *array_len,
                bits: None,
            })
            .collect(),
        line: 0,
    }
}

impl TypeDb {
    pub fn new(default_pack: u32) -> Self {
        let mut types = HashMap::new();
        for layout in [
            builtin_layout(
                "EFI_HII_DATE",
                4,
                2,
                &[
                    ("Year", FieldType::Uint16, 0, None),
                    ("Month", FieldType::Uint8, 2, None),
                    ("Day", FieldType::Uint8, 3, None),
                ],
            ),
            builtin_layout(
                "EFI_HII_TIME",
                3,
                1,
                &[
                    ("Hour", FieldType::Uint8, 0, None),
                    ("Minute", FieldType::Uint8, 1, None),
                    ("Second", FieldType::Uint8, 2, None),
                ],
            ),
            builtin_layout(
                "EFI_GUID",
                16,
                4,
                &[
                    ("Data1", FieldType::Uint32, 0, None),
                    ("Data2", FieldType::Uint16, 4, None),
                    ("Data3", FieldType::Uint16, 6, None),
                    ("Data4", FieldType::Uint8, 8, Some(8)),
                ],
            ),
            builtin_layout(
                "EFI_HII_REF",
                22,
                4,
                &[
                    ("QuestionId", FieldType::Uint16, 0, None),
                    ("FormId", FieldType::Uint16, 2, None),
                    ("FormSetGuid", FieldType::Guid, 4, None),
                    ("DevicePath", FieldType::StringId, 20, None),
                ],
            ),
        ] {
            types.insert(layout.name.clone(), layout);
        }
        TypeDb {
            types,
            default_pack,
            pack: default_pack,
            pack_stack: Vec::new(),
        }
    }

    /// Resolve a type name written in source: a built-in keyword or a
    /// previously declared typedef.
    pub fn lookup(&self, name: &str) -> Option<FieldType> {
        FieldType::builtin(name).or_else(|| {
            self.types
                .get(name)
                .filter(|l| l.line != 0)
                .map(|_| FieldType::Struct(name.to_owned()))
        })
    }

    /// Field layout of a composite type; `None` for scalars.
    pub fn layout_of(&self, ty: &FieldType) -> Option<&TypeLayout> {
        match ty {
            FieldType::Date | FieldType::Time | FieldType::Ref | FieldType::Guid => {
                self.types.get(ty.name())
            }
            FieldType::Struct(name) => self.types.get(name),
            _ => None,
        }
    }

    pub fn size_of(&self, ty: &FieldType) -> u32 {
        match ty.scalar_width() {
            Some(w) => u32::from(w),
            None => self.layout_of(ty).map_or(0, |l| l.size),
        }
    }

    fn align_of(&self, ty: &FieldType) -> u32 {
        match ty.scalar_width() {
            Some(w) => u32::from(w),
            None => self.layout_of(ty).map_or(1, |l| l.align),
        }
    }

    pub fn pack(&self) -> u32 {
        self.pack
    }

    /// `#pragma pack(N)` or `#pragma pack()` (restore the default).
    pub fn set_pack(&mut self, value: Option<u32>, line: u32) -> VfrResult<()> {
        self.pack = match value {
            Some(v) => check_pack(v, line)?,
            None => self.default_pack,
        };
        event!(Level::DEBUG, "line {}: pack alignment set to {}", line, self.pack);
        Ok(())
    }

    /// `#pragma pack(push[, id][, N])`
    pub fn push_pack(&mut self, id: Option<String>, value: Option<u32>, line: u32) -> VfrResult<()> {
        let new_pack = value.map(|v| check_pack(v, line)).transpose()?;
        self.pack_stack.push(PackEntry {
            id,
            align: self.pack,
        });
        if let Some(v) = new_pack {
            self.pack = v;
        }
        event!(Level::DEBUG, "line {}: pack pushed, now {}", line, self.pack);
        Ok(())
    }

    /// `#pragma pack(pop[, id][, N])`. With an id, entries are popped up to
    /// and including the one pushed under that id.
    pub fn pop_pack(&mut self, id: Option<&str>, value: Option<u32>, line: u32) -> VfrResult<()> {
        let new_pack = value.map(|v| check_pack(v, line)).transpose()?;
        match id {
            Some(id) => {
                let pos = self
                    .pack_stack
                    .iter()
                    .rposition(|e| e.id.as_deref() == Some(id))
                    .ok_or_else(|| VfrError::undeclared(line, id))?;
                self.pack = self.pack_stack[pos].align;
                self.pack_stack.truncate(pos);
            }
            None => match self.pack_stack.pop() {
                Some(e) => self.pack = e.align,
                None => event!(Level::WARN, "line {}: #pragma pack(pop) with an empty stack", line),
            },
        }
        if let Some(v) = new_pack {
            self.pack = v;
        }
        event!(Level::DEBUG, "line {}: pack popped, now {}", line, self.pack);
        Ok(())
    }

    /// Lay out and register a typedef.
    pub fn declare(
        &mut self,
        name: &str,
        is_union: bool,
        decls: Vec<FieldDecl>,
        line: u32,
    ) -> VfrResult<&TypeLayout> {
        if FieldType::builtin(name).is_some() {
            return Err(VfrError::duplicate(line, name, 0));
        }
        if let Some(prev) = self.types.get(name) {
            return Err(VfrError::duplicate(line, name, prev.line));
        }

        let mut fields: Vec<FieldLayout> = Vec::new();
        let mut offset = 0u32;
        let mut max_size = 0u32;
        let mut align = 1u32;
        let mut unit: Option<BitUnit> = None;

        for decl in decls {
            if let Some(n) = &decl.name {
                if fields.iter().any(|f| &f.name == n) {
                    return Err(VfrError::duplicate(decl.line, n.clone(), line));
                }
            }
            let ty_size = self.size_of(&decl.ty);
            let ty_align = self.align_of(&decl.ty).min(self.pack);
            align = align.max(ty_align);

            if let Some(width) = decl.bit_width {
                if !decl.ty.is_integer() {
                    return Err(VfrError::syntax(
                        decl.line,
                        format!("bitfield must use an integer type, got {}", decl.ty.name()),
                    ));
                }
                if width > ty_size * 8 {
                    return Err(VfrError::malformed(
                        decl.line,
                        format!("bitfield width {} exceeds {} bits of {}", width, ty_size * 8, decl.ty.name()),
                    ));
                }
                if width == 0 {
                    if decl.name.is_some() {
                        return Err(VfrError::malformed(decl.line, "named bitfield has zero width"));
                    }
                    unit = None;
                    continue;
                }
                let (unit_offset, bit_offset) = if is_union {
                    max_size = max_size.max(ty_size);
                    (0, 0)
                } else {
                    let u = match unit.take() {
                        Some(u) if u.ty == decl.ty && u.used + width <= ty_size * 8 => u,
                        _ => {
                            offset = align_up(offset, ty_align, decl.line, name)?;
                            let u = BitUnit {
                                ty: decl.ty.clone(),
                                start: offset,
                                used: 0,
                            };
                            offset = add(offset, ty_size, decl.line, name)?;
                            u
                        }
                    };
                    let unit_bits = mul(u.start, 8, decl.line, name)?;
                    let placed = (u.start, add(unit_bits, u.used, decl.line, name)?);
                    unit = Some(BitUnit {
                        used: u.used + width,
                        ..u
                    });
                    placed
                };
                if let Some(n) = decl.name {
                    fields.push(FieldLayout {
                        name: n,
                        ty: decl.ty,
                        offset: unit_offset,
                        array_len: None,
                        bits: Some(BitField {
                            bit_offset,
                            width: width as u8,
                        }),
                    });
                }
                continue;
            }

            unit = None;
            let count = match decl.array_len {
                Some(0) => {
                    return Err(VfrError::malformed(decl.line, "array size must be non-zero"));
                }
                Some(n) => n,
                None => 1,
            };
            let total = mul(ty_size, count, decl.line, name)?;
            let field_offset = if is_union {
                max_size = max_size.max(total);
                0
            } else {
                offset = align_up(offset, ty_align, decl.line, name)?;
                let at = offset;
                offset = add(offset, total, decl.line, name)?;
                at
            };
            fields.push(FieldLayout {
                name: decl.name.unwrap_or_default(),
                ty: decl.ty,
                offset: field_offset,
                array_len: decl.array_len,
                bits: None,
            });
        }

        let size = align_up(if is_union { max_size } else { offset }, align, line, name)?;
        event!(
            Level::DEBUG,
            "line {}: {} {} laid out: size {}, align {}, {} fields",
            line,
            if is_union { "union" } else { "struct" },
            name,
            size,
            align,
            fields.len()
        );
        self.types.insert(
            name.to_owned(),
            TypeLayout {
                name: name.to_owned(),
                size,
                align,
                is_union,
                fields,
                line,
            },
        );
        Ok(&self.types[name])
    }

    /// Walk `segments` from a value of type `root`. Unknown members and
    /// indexes on non-array members are undeclared-symbol errors; an index
    /// past the array bound is a literal error.
    pub fn resolve_path(
        &self,
        root: &FieldType,
        segments: &[PathSegment],
        line: u32,
    ) -> VfrResult<ResolvedField> {
        let mut current = ResolvedField {
            offset: 0,
            ty: root.clone(),
            size: self.size_of(root),
            array_len: None,
            bits: None,
        };
        for seg in segments {
            if current.array_len.is_some() || current.bits.is_some() {
                return Err(VfrError::undeclared(line, seg.name.clone()));
            }
            let layout = self
                .layout_of(&current.ty)
                .ok_or_else(|| VfrError::undeclared(line, seg.name.clone()))?;
            let field = layout
                .field(&seg.name)
                .ok_or_else(|| VfrError::undeclared(line, seg.name.clone()))?;
            let base = current.offset;
            let elem_size = self.size_of(&field.ty);
            let start = add(base, field.offset, line, &seg.name)?;
            current = match (seg.index, field.array_len) {
                (Some(_), None) => {
                    return Err(VfrError::undeclared(line, format!("{}[]", seg.name)));
                }
                (Some(idx), Some(len)) => {
                    if idx >= len {
                        return Err(VfrError::malformed(
                            line,
                            format!("index {} out of bounds for {}[{}]", idx, seg.name, len),
                        ));
                    }
                    ResolvedField {
                        offset: add(start, mul(idx, elem_size, line, &seg.name)?, line, &seg.name)?,
                        ty: field.ty.clone(),
                        size: elem_size,
                        array_len: None,
                        bits: None,
                    }
                }
                (None, len) => ResolvedField {
                    offset: start,
                    ty: field.ty.clone(),
                    size: mul(elem_size, len.unwrap_or(1), line, &seg.name)?,
                    array_len: len,
                    bits: match field.bits {
                        Some(b) => Some(BitField {
                            bit_offset: add(mul(base, 8, line, &seg.name)?, b.bit_offset, line, &seg.name)?,
                            width: b.width,
                        }),
                        None => None,
                    },
                },
            };
        }
        Ok(current)
    }
}
