use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::ScriptError;
use crate::definition::definition_indented;
use crate::disasm::format_instr;
use crate::opcode::{Opcode, decode};
use crate::script::Script;
use crate::symbol::{DataType, Symbol};

/// Selects symbols for [`list_symbols`].
///
/// `include` and `exclude` hold one-letter codes: flags `c r m e M g` and
/// types `v f i s C F P I`. A symbol matches a code set if any code applies to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilter {
    pub include: String,
    pub exclude: String,
    /// Case-sensitive substring of the name.
    pub search: String,
}

fn has_any_code(sym: &Symbol, codes: &str) -> bool {
    let flags = [
        ('c', sym.is_const()),
        ('r', sym.has_return()),
        ('m', sym.is_member()),
        ('e', sym.is_external()),
        ('M', sym.is_merged()),
        ('g', sym.is_generated()),
    ];
    flags.iter().any(|&(code, set)| set && codes.contains(code)) || codes.contains(sym.kind.abbrev())
}

impl SymbolFilter {
    pub fn matches(&self, sym: &Symbol) -> bool {
        let included = self.include.is_empty() || has_any_code(sym, &self.include);
        let excluded = !self.exclude.is_empty() && has_any_code(sym, &self.exclude);
        included && !excluded && sym.name.contains(self.search.as_str())
    }
}

fn flag_column(sym: &Symbol) -> String {
    let mut out = String::from(sym.kind.abbrev());
    for (code, set) in [
        ('c', sym.is_const()),
        ('r', sym.has_return()),
        ('m', sym.is_member()),
        ('e', sym.is_external()),
        ('M', sym.is_merged()),
        ('g', sym.is_generated()),
    ] {
        out.push(if set { code } else { ' ' });
    }
    out
}

/// Tabular listing of the symbols accepted by `filter`.
pub fn list_symbols(script: &Script, filter: &SymbolFilter) -> String {
    let mut out = String::from("Index    Flags   Parent                    Address  R Name\n");

    for sym in script.symbols().iter().filter(|s| filter.matches(s)) {
        let parent = match sym.parent {
            None => "*UND*",
            Some(_) => script.parent_of(sym).map_or("*ERR*", |p| p.name.as_str()),
        };
        let ret = if sym.kind == DataType::Function && sym.is_const() {
            if sym.has_return() { sym.return_type.abbrev() } else { 'v' }
        } else {
            ' '
        };
        let _ = writeln!(
            out,
            "{:08x} {} {parent:<25} {:08x} {ret} {}",
            sym.index,
            flag_column(sym),
            sym.address,
            sym.name
        );
    }

    out
}

fn yes_no(v: bool) -> &'static str {
    if v { "Yes" } else { "No" }
}

/// Multi-line report of everything known about one symbol.
pub fn describe_symbol(script: &Script, sym: &Symbol) -> String {
    let mut out = String::new();
    let loc = &sym.location;

    let _ = writeln!(out, "{:08x} <{}>", sym.index, sym.name);
    let _ = writeln!(out, "\tName: {}", sym.name);
    let _ = writeln!(out, "\tAddress: {:x}", sym.address);
    let _ = writeln!(out, "\tSize: {}", sym.count);
    let _ = writeln!(out, "\tType: {}", sym.kind);
    let _ = writeln!(out, "\tGenerated: {}", yes_no(sym.is_generated()));
    let _ = writeln!(out, "\tFlags:");
    let _ = writeln!(out, "\t\tConst: {}", yes_no(sym.is_const()));
    let _ = writeln!(out, "\t\tReturn: {}", yes_no(sym.has_return()));
    let _ = writeln!(out, "\t\tMember: {}", yes_no(sym.is_member()));
    let _ = writeln!(out, "\t\tExtern: {}", yes_no(sym.is_external()));
    let _ = writeln!(out, "\t\tMerged: {}", yes_no(sym.is_merged()));
    let _ = writeln!(out, "\tFile Index: {}", loc.file_index);
    let _ = writeln!(out, "\tLine Start: {}", loc.line_start);
    let _ = writeln!(out, "\tLine Count: {}", loc.line_count);
    let _ = writeln!(out, "\tChar Start: {}", loc.char_start);
    let _ = writeln!(out, "\tChar Count: {}", loc.char_count);

    if let Some(parent) = script.parent_of(sym) {
        let _ = writeln!(out, "\tParent: {} ({:x})", parent.name, parent.index);
    }
    if sym.is_member() {
        let _ = writeln!(out, "\tVariable Offset: {}", sym.member_offset);
    }
    if sym.kind == DataType::Class {
        let _ = writeln!(out, "\tClass Size: {}", sym.class_size);
    }
    if sym.is_const() && sym.kind == DataType::Function {
        let _ = writeln!(out, "\tReturn Type: {}", sym.return_type);
    }
    if !sym.is_member() {
        let _ = writeln!(out, "\tDefinition:\n{}", definition_indented(script, sym, "\t\t"));
    }

    out
}

/// One instruction referring to a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub address: u32,
    /// Name of the function whose body contains the instruction, if any.
    pub function: Option<String>,
    pub instruction: String,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] at {:08x} in {}",
            self.instruction,
            self.address,
            self.function.as_deref().unwrap_or("???")
        )
    }
}

/// Scans the whole code segment for instructions naming `sym`, or calling its address.
pub fn find_usages(script: &Script, sym: &Symbol) -> Result<Vec<Usage>, ScriptError> {
    let mut usages = Vec::new();
    let mut current: Option<&Symbol> = None;
    let mut pc = 0;

    while pc < script.size() {
        let (instr, next) = decode(script.code(), pc)?;
        if let Some(func) = script.symbol_by_address(pc) {
            current = Some(func);
        }

        let hit = match instr.op {
            Opcode::Call => sym.kind.is_callable() && instr.address() == Some(sym.address),
            Opcode::CallExtern | Opcode::PushVar | Opcode::PushInstance | Opcode::PushArrayVar => {
                instr.symbol() == Some(sym.index)
            }
            _ => false,
        };
        if hit {
            usages.push(Usage {
                address: pc,
                function: current.map(|f| f.name.clone()),
                instruction: format_instr(script, &instr, false),
            });
        }

        pc = next;
    }

    Ok(usages)
}
