use serde::{Deserialize, Serialize};
use thiserror::Error;

mod decompile;
mod definition;
mod disasm;
mod expr;
mod inspect;
mod opcode;
mod reader;
mod script;
mod symbol;

#[cfg(test)]
mod testing;

pub use decompile::{SOURCE_LIST, SourceFile, decompile, decompile_script, decompile_with_options};
pub use definition::{definition, definition_indented, format_value};
pub use disasm::{disassemble, disassemble_all, format_instr};
pub use inspect::{SymbolFilter, Usage, describe_symbol, find_usages, list_symbols};
pub use opcode::{Instr, Opcode, Operand, decode};
pub use script::Script;
pub use symbol::{DataType, SourceLocation, Symbol, SymbolFlags, SymbolValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    /// Spaces before each top-level statement of a body.
    pub indent: usize,
    /// Deepest allowed nesting of `if` blocks.
    pub max_depth: usize,
    /// Wrap the body in the symbol's declaration.
    pub declarations: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            indent: 4,
            max_depth: 256,
            declarations: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unexpected end of input")]
    Eof,

    #[error("invalid opcode 0x{byte:02x} at pc={pc:#x}")]
    InvalidOpcode { pc: u32, byte: u8 },

    #[error("truncated instruction at pc={pc:#x} (size={size}, remaining={remaining})")]
    TruncatedInstr { pc: u32, size: usize, remaining: usize },

    #[error("pc={pc:#x} is outside the code segment (length {len})")]
    PcOutOfBounds { pc: u32, len: usize },

    #[error("symbol {0} is external and has no body")]
    ExternalSymbol(String),

    #[error("symbol {0} is not a function, prototype or instance")]
    NotCallable(String),

    #[error("conditional branch at pc={pc:#x} jumps back to {target:#x}")]
    BackwardBranch { pc: u32, target: u32 },

    #[error("blocks nested deeper than {limit} at pc={pc:#x}")]
    NestingTooDeep { limit: usize, pc: u32 },

    #[error("symbol {0} not found")]
    SymbolNotFound(String),
}

impl Script {
    /// Looks up a symbol by name, failing with [`ScriptError::SymbolNotFound`].
    pub fn require_symbol(&self, name: &str) -> Result<&Symbol, ScriptError> {
        self.symbol_by_name(name)
            .ok_or_else(|| ScriptError::SymbolNotFound(name.to_string()))
    }
}
