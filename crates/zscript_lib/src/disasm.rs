use std::fmt::Write;

use tracing::{debug, warn};

use crate::ScriptError;
use crate::definition::format_value;
use crate::opcode::{Instr, Opcode};
use crate::script::Script;
use crate::symbol::{DataType, Symbol};

/// Width of the raw byte column: opcode plus at most five operand bytes.
const BYTES_WIDTH: usize = 18;

fn raw_bytes(script: &Script, instr: &Instr) -> String {
    let start = instr.pc as usize;
    let bytes = script.code().get(start..start + instr.size as usize).unwrap_or_default();
    let mut out = String::with_capacity(BYTES_WIDTH);
    for b in bytes {
        let _ = write!(out, "{b:02x} ");
    }
    format!("{out:<BYTES_WIDTH$}")
}

/// Mnemonic and operand of one instruction.
///
/// With `annotate` set, referenced symbols are named and constant values shown.
pub fn format_instr(script: &Script, instr: &Instr, annotate: bool) -> String {
    let mut out = instr.op.mnemonic().to_string();

    match instr.op {
        Opcode::Call => {
            let target = instr.address().unwrap_or_default();
            let _ = write!(out, " {target:08x}");
            if let Some(callee) = script.symbol_by_address(target).filter(|_| annotate) {
                let _ = write!(out, " ; <{}>", callee.name);
            }
        }
        Opcode::Jump | Opcode::JumpIfZero => {
            let _ = write!(out, " {:08x}", instr.address().unwrap_or_default());
        }
        Opcode::PushVar | Opcode::PushInstance | Opcode::CallExtern | Opcode::SetInstance => {
            let index = instr.symbol().unwrap_or_default();
            let _ = write!(out, " {index:08x}");
            if let Some(sym) = script.symbol_by_index(index).filter(|_| annotate) {
                let _ = write!(out, " ; <{}>", sym.name);
                if sym.has_constant_value() {
                    let _ = write!(out, " = {}", format_value(sym, None));
                }
            }
        }
        Opcode::PushInt => {
            let _ = write!(out, " {}", instr.immediate().unwrap_or_default());
        }
        Opcode::PushArrayVar => {
            let index = instr.symbol().unwrap_or_default();
            let element = instr.element().unwrap_or_default();
            let _ = write!(out, " {index:08x} + {element}");
            if let Some(sym) = script.symbol_by_index(index).filter(|_| annotate) {
                let _ = write!(out, " ; <{}+{element}>", sym.name);
                if sym.has_constant_value() {
                    let _ = write!(out, " = {}", format_value(sym, Some(element as usize)));
                }
            }
        }
        _ => {}
    }

    out
}

/// Linear listing of one callable's body.
///
/// Stops at the first return past every forward branch target seen so far.
pub fn disassemble(script: &Script, sym: &Symbol) -> Result<String, ScriptError> {
    if sym.is_external() {
        return Err(ScriptError::ExternalSymbol(sym.name.clone()));
    }
    if !sym.kind.is_callable() {
        return Err(ScriptError::NotCallable(sym.name.clone()));
    }
    debug!(symbol = %sym.name, address = sym.address, "disassembling");

    let mut out = String::new();
    let _ = writeln!(out, "{:08x} <{}>:", sym.address, sym.name);

    let mut pc = sym.address;
    let mut return_after = pc;
    while pc < script.size() {
        let instr = script.instruction_at(pc)?;
        let _ = writeln!(
            out,
            "{pc:>8x}:\t{} {}",
            raw_bytes(script, &instr),
            format_instr(script, &instr, true)
        );

        if instr.op.is_branch() {
            return_after = return_after.max(instr.address().unwrap_or_default());
        }
        pc = instr.next_pc();

        if instr.op == Opcode::Ret && pc > return_after {
            break;
        }
    }

    Ok(out)
}

fn has_code(sym: &Symbol) -> bool {
    !sym.is_external()
        && match sym.kind {
            DataType::Prototype => true,
            DataType::Function | DataType::Instance => sym.is_const(),
            _ => false,
        }
}

/// Listings of every function, prototype and instance with a body, separated by blank lines.
pub fn disassemble_all(script: &Script) -> String {
    let mut out = String::new();
    for sym in script.symbols().iter().filter(|s| has_code(s)) {
        match disassemble(script, sym) {
            Ok(listing) => out.push_str(&listing),
            Err(e) => {
                warn!(symbol = %sym.name, error = %e, "failed to disassemble");
                let _ = writeln!(out, "{:08x} <{}>:\n\t; {e}", sym.address, sym.name);
            }
        }
        out.push('\n');
    }
    out
}
