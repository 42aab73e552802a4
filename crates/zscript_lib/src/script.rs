use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ScriptError;
use crate::opcode::{Instr, decode};
use crate::reader::{Reader, decode_text};
use crate::symbol::{DataType, SourceLocation, Symbol, SymbolFlags, SymbolValue};

/// A compiled script: the code segment plus its symbol table.
///
/// Immutable once built, so one `Script` can back any number of concurrent
/// decompilations.
#[derive(Debug, Clone)]
pub struct Script {
    code: Vec<u8>,
    symbols: Vec<Symbol>,
    by_name: HashMap<String, u32>,
    by_address: HashMap<u32, u32>,
    scopes: HashMap<String, Vec<u32>>,
}

impl Script {
    /// Builds a script from parts. Symbol indices are reassigned to table positions.
    pub fn new(code: Vec<u8>, mut symbols: Vec<Symbol>) -> Self {
        for (i, s) in symbols.iter_mut().enumerate() {
            s.index = i as u32;
        }

        let mut by_name = HashMap::with_capacity(symbols.len());
        let mut scopes: HashMap<String, Vec<u32>> = HashMap::new();
        for s in &symbols {
            by_name.entry(s.name.to_uppercase()).or_insert(s.index);
            if let Some(scope) = s.scope() {
                scopes.entry(scope.to_uppercase()).or_default().push(s.index);
            }
        }

        // Entry points of real bodies win over callables that merely share an address.
        let mut by_address = HashMap::new();
        for definite in [true, false] {
            for s in &symbols {
                if s.kind.is_callable() && !s.is_external() && s.is_const() == definite {
                    by_address.entry(s.address).or_insert(s.index);
                }
            }
        }

        Self {
            code,
            symbols,
            by_name,
            by_address,
            scopes,
        }
    }

    /// Loads a compiled `.DAT` script.
    pub fn parse(bytes: &[u8]) -> Result<Self, ScriptError> {
        let mut r = Reader::new(bytes);
        let version = r.get_u8()?;
        let count = r.get_u32()? as usize;

        // Sorted-by-name index table; lookups are rebuilt in `new`.
        let sort_len = count.checked_mul(4).ok_or(ScriptError::Eof)?;
        r.get_bytes(sort_len)?;

        let mut symbols = Vec::with_capacity(count);
        for i in 0..count {
            symbols.push(read_symbol(&mut r, i as u32)?);
        }

        let code_len = r.get_u32()? as usize;
        let code = r.get_bytes(code_len)?.to_vec();
        if r.remaining() > 0 {
            warn!(trailing = r.remaining(), "ignoring data after the code segment");
        }

        debug!(version, symbols = symbols.len(), code = code.len(), "loaded script");
        Ok(Self::new(code, symbols))
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Length of the code segment in bytes.
    pub fn size(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn instruction_at(&self, pc: u32) -> Result<Instr, ScriptError> {
        decode(&self.code, pc).map(|(instr, _)| instr)
    }

    pub fn symbol_by_index(&self, index: u32) -> Option<&Symbol> {
        self.symbols.get(index as usize)
    }

    /// The callable whose body starts exactly at `address`.
    pub fn symbol_by_address(&self, address: u32) -> Option<&Symbol> {
        self.by_address.get(&address).and_then(|&i| self.symbol_by_index(i))
    }

    /// Case-insensitive, as Daedalus identifiers are.
    pub fn symbol_by_name(&self, name: &str) -> Option<&Symbol> {
        self.by_name
            .get(&name.to_uppercase())
            .and_then(|&i| self.symbol_by_index(i))
    }

    pub fn parent_of(&self, sym: &Symbol) -> Option<&Symbol> {
        sym.parent.and_then(|p| self.symbol_by_index(p))
    }

    /// Declared parameters of a function or prototype, in declaration order.
    pub fn parameters_of(&self, callable: &Symbol) -> Vec<&Symbol> {
        self.scope_members(&callable.name)
            .filter(|s| s.is_member() && !s.is_generated())
            .collect()
    }

    /// Every symbol whose dotted prefix is `scope`.
    pub fn scope_members<'a>(&'a self, scope: &str) -> impl Iterator<Item = &'a Symbol> + 'a {
        self.scopes
            .get(&scope.to_uppercase())
            .into_iter()
            .flatten()
            .filter_map(|&i| self.symbol_by_index(i))
    }

    /// Fields declared by `class`, in declaration order.
    ///
    /// Instance-typed parameters also point at their class, so the dotted prefix must match too.
    pub fn class_fields<'a>(&'a self, class: &'a Symbol) -> impl Iterator<Item = &'a Symbol> + 'a {
        self.symbols.iter().filter(move |s| {
            s.is_member()
                && s.parent == Some(class.index)
                && s.scope().is_some_and(|scope| scope.eq_ignore_ascii_case(&class.name))
        })
    }

    /// Whether `sym` is a field of a class (as opposed to a parameter or local of a callable).
    pub fn is_class_member(&self, sym: &Symbol) -> bool {
        if !sym.is_member() {
            return false;
        }
        if self.parent_of(sym).is_some_and(|p| p.kind == DataType::Class) {
            return true;
        }
        sym.scope()
            .and_then(|scope| self.symbol_by_name(scope))
            .is_some_and(|owner| owner.kind == DataType::Class)
    }
}

fn read_symbol(r: &mut Reader<'_>, index: u32) -> Result<Symbol, ScriptError> {
    let named = r.get_u32()? != 0;
    let (name, generated) = if named {
        let raw = r.get_raw_line()?;
        (decode_text(raw), raw.first() == Some(&0xFF))
    } else {
        (String::new(), false)
    };

    let vary = r.get_u32()?;
    let props = r.get_u32()?;
    let raw_type = (props >> 12) & 0xF;
    let kind = DataType::from_raw(raw_type).unwrap_or_else(|| {
        warn!(index, raw_type, "unknown symbol type, treating as void");
        DataType::Void
    });

    let mut sym = Symbol::new(name, kind);
    sym.index = index;
    sym.count = props & 0xFFF;
    sym.flags = SymbolFlags((props >> 16) & SymbolFlags::DISK_MASK);
    if generated {
        sym.flags = sym.flags | SymbolFlags::GENERATED;
    }
    sym.location = SourceLocation {
        file_index: r.get_u32()?,
        line_start: r.get_u32()?,
        line_count: r.get_u32()?,
        char_start: r.get_u32()?,
        char_count: r.get_u32()?,
    };

    if sym.is_member() {
        sym.member_offset = vary;
    } else if kind == DataType::Class {
        sym.class_size = vary;
    } else if kind == DataType::Function {
        sym.return_type = DataType::from_raw(vary).unwrap_or(DataType::Void);
    }

    if !sym.is_member() {
        let n = sym.count as usize;
        match kind {
            DataType::Float => {
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push(r.get_f32()?);
                }
                sym.value = SymbolValue::Float(v);
            }
            DataType::Int => {
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push(r.get_i32()?);
                }
                sym.value = SymbolValue::Int(v);
            }
            DataType::String => {
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push(r.get_line()?);
                }
                sym.value = SymbolValue::String(v);
            }
            DataType::Class => sym.class_offset = r.get_u32()?,
            DataType::Function | DataType::Prototype | DataType::Instance => sym.address = r.get_u32()?,
            DataType::Void => {}
        }
    }

    let parent = r.get_i32()?;
    sym.parent = u32::try_from(parent).ok();
    Ok(sym)
}
