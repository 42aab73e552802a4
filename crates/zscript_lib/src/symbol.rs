use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Void,
    Float,
    Int,
    String,
    Class,
    Function,
    Prototype,
    Instance,
}

impl DataType {
    pub fn from_raw(v: u32) -> Option<Self> {
        let t = match v {
            0 => DataType::Void,
            1 => DataType::Float,
            2 => DataType::Int,
            3 => DataType::String,
            4 => DataType::Class,
            5 => DataType::Function,
            6 => DataType::Prototype,
            7 => DataType::Instance,
            _ => return None,
        };
        Some(t)
    }

    /// Type code as stored in the properties word.
    pub fn raw(self) -> u32 {
        match self {
            DataType::Void => 0,
            DataType::Float => 1,
            DataType::Int => 2,
            DataType::String => 3,
            DataType::Class => 4,
            DataType::Function => 5,
            DataType::Prototype => 6,
            DataType::Instance => 7,
        }
    }

    /// Keyword used for this type in Daedalus source.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Void => "void",
            DataType::Float => "float",
            DataType::Int => "int",
            DataType::String => "string",
            DataType::Class => "class",
            DataType::Function => "func",
            DataType::Prototype => "prototype",
            DataType::Instance => "instance",
        }
    }

    /// One-letter code used by the symbol listing.
    pub fn abbrev(self) -> char {
        match self {
            DataType::Void => 'v',
            DataType::Float => 'f',
            DataType::Int => 'i',
            DataType::String => 's',
            DataType::Class => 'C',
            DataType::Function => 'F',
            DataType::Prototype => 'P',
            DataType::Instance => 'I',
        }
    }

    pub fn is_callable(self) -> bool {
        matches!(self, DataType::Function | DataType::Prototype | DataType::Instance)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolFlags(pub u32);

impl SymbolFlags {
    pub const NONE: SymbolFlags = SymbolFlags(0);
    pub const CONST: SymbolFlags = SymbolFlags(1);
    pub const RETURN: SymbolFlags = SymbolFlags(1 << 1);
    pub const MEMBER: SymbolFlags = SymbolFlags(1 << 2);
    pub const EXTERNAL: SymbolFlags = SymbolFlags(1 << 3);
    pub const MERGED: SymbolFlags = SymbolFlags(1 << 4);
    /// Not stored in the flag word on disk; derived from the name when loading.
    pub const GENERATED: SymbolFlags = SymbolFlags(1 << 6);

    /// Bits of the on-disk properties word that carry flags.
    pub const DISK_MASK: u32 = 0x3F;

    pub fn contains(self, other: SymbolFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SymbolFlags {
    type Output = SymbolFlags;

    fn bitor(self, rhs: SymbolFlags) -> SymbolFlags {
        SymbolFlags(self.0 | rhs.0)
    }
}

/// Inline literal data of a constant symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SymbolValue {
    #[default]
    None,
    Int(Vec<i32>),
    Float(Vec<f32>),
    String(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file_index: u32,
    pub line_start: u32,
    pub line_count: u32,
    pub char_start: u32,
    pub char_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// Position in the symbol table; the only cross-reference between symbols.
    pub index: u32,
    pub name: String,
    pub kind: DataType,
    pub flags: SymbolFlags,
    /// Array arity for variables, parameter count for functions.
    pub count: u32,
    pub address: u32,
    pub parent: Option<u32>,
    pub return_type: DataType,
    pub member_offset: u32,
    pub class_size: u32,
    pub class_offset: u32,
    pub location: SourceLocation,
    pub value: SymbolValue,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: DataType) -> Self {
        Self {
            index: 0,
            name: name.into(),
            kind,
            flags: SymbolFlags::NONE,
            count: 1,
            address: 0,
            parent: None,
            return_type: DataType::Void,
            member_offset: 0,
            class_size: 0,
            class_offset: 0,
            location: SourceLocation::default(),
            value: SymbolValue::None,
        }
    }

    pub fn with_flags(mut self, flags: SymbolFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    pub fn with_parent(mut self, parent: u32) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_return_type(mut self, rtype: DataType) -> Self {
        self.return_type = rtype;
        self.flags = self.flags | SymbolFlags::RETURN;
        self
    }

    pub fn with_value(mut self, value: SymbolValue) -> Self {
        self.count = match &value {
            SymbolValue::None => self.count,
            SymbolValue::Int(v) => v.len() as u32,
            SymbolValue::Float(v) => v.len() as u32,
            SymbolValue::String(v) => v.len() as u32,
        };
        self.value = value;
        self
    }

    pub fn with_file(mut self, file_index: u32) -> Self {
        self.location.file_index = file_index;
        self
    }

    pub fn is_const(&self) -> bool {
        self.flags.contains(SymbolFlags::CONST)
    }

    pub fn has_return(&self) -> bool {
        self.flags.contains(SymbolFlags::RETURN)
    }

    pub fn is_member(&self) -> bool {
        self.flags.contains(SymbolFlags::MEMBER)
    }

    pub fn is_external(&self) -> bool {
        self.flags.contains(SymbolFlags::EXTERNAL)
    }

    pub fn is_merged(&self) -> bool {
        self.flags.contains(SymbolFlags::MERGED)
    }

    pub fn is_generated(&self) -> bool {
        self.flags.contains(SymbolFlags::GENERATED)
    }

    /// The part of a dotted name before the first `.`, e.g. the class of a member.
    pub fn scope(&self) -> Option<&str> {
        self.name.split_once('.').map(|(scope, _)| scope)
    }

    /// The name with any scope prefix removed.
    pub fn local_name(&self) -> &str {
        self.name.split_once('.').map_or(self.name.as_str(), |(_, local)| local)
    }

    /// Constants carry a literal value; callables and instances do not.
    pub fn has_constant_value(&self) -> bool {
        self.is_const() && !self.kind.is_callable()
    }

    pub fn int_at(&self, i: usize) -> Option<i32> {
        match &self.value {
            SymbolValue::Int(v) => v.get(i).copied(),
            _ => None,
        }
    }

    pub fn float_at(&self, i: usize) -> Option<f32> {
        match &self.value {
            SymbolValue::Float(v) => v.get(i).copied(),
            _ => None,
        }
    }

    pub fn string_at(&self, i: usize) -> Option<&str> {
        match &self.value {
            SymbolValue::String(v) => v.get(i).map(String::as_str),
            _ => None,
        }
    }
}
