use byteorder::{ByteOrder, LittleEndian};

use crate::ScriptError;

/// Every instruction understood by the Daedalus virtual machine.
///
/// The discriminants are the on-disk opcode bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Mod = 4,
    BitOr = 5,
    BitAnd = 6,
    Lt = 7,
    Gt = 8,
    MovInt = 9,
    LogOr = 11,
    LogAnd = 12,
    Shl = 13,
    Shr = 14,
    Lte = 15,
    Eq = 16,
    Neq = 17,
    Gte = 18,
    AddMov = 19,
    SubMov = 20,
    MulMov = 21,
    DivMov = 22,
    Plus = 30,
    Negate = 31,
    Not = 32,
    Complement = 33,
    Nop = 45,
    Ret = 60,
    Call = 61,
    CallExtern = 62,
    PushInt = 64,
    PushVar = 65,
    PushInstance = 67,
    MovStr = 70,
    MovStrPtr = 71,
    MovVarFloat = 72,
    MovFloat = 73,
    MovVarInstance = 74,
    Jump = 75,
    JumpIfZero = 76,
    SetInstance = 80,
    PushArrayVar = 245,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Self> {
        use Opcode::*;
        let op = match b {
            0 => Add,
            1 => Sub,
            2 => Mul,
            3 => Div,
            4 => Mod,
            5 => BitOr,
            6 => BitAnd,
            7 => Lt,
            8 => Gt,
            9 => MovInt,
            11 => LogOr,
            12 => LogAnd,
            13 => Shl,
            14 => Shr,
            15 => Lte,
            16 => Eq,
            17 => Neq,
            18 => Gte,
            19 => AddMov,
            20 => SubMov,
            21 => MulMov,
            22 => DivMov,
            30 => Plus,
            31 => Negate,
            32 => Not,
            33 => Complement,
            45 => Nop,
            60 => Ret,
            61 => Call,
            62 => CallExtern,
            64 => PushInt,
            65 => PushVar,
            67 => PushInstance,
            70 => MovStr,
            71 => MovStrPtr,
            72 => MovVarFloat,
            73 => MovFloat,
            74 => MovVarInstance,
            75 => Jump,
            76 => JumpIfZero,
            80 => SetInstance,
            245 => PushArrayVar,
            _ => return None,
        };
        Some(op)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// The traditional assembler mnemonic.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            BitOr => "OR",
            BitAnd => "ANDB",
            Lt => "LT",
            Gt => "GT",
            MovInt => "MOVI",
            LogOr => "ORR",
            LogAnd => "AND",
            Shl => "LSL",
            Shr => "LSR",
            Lte => "LTE",
            Eq => "EQ",
            Neq => "NEQ",
            Gte => "GTE",
            AddMov => "ADDMOVI",
            SubMov => "SUBMOVI",
            MulMov => "MULMOVI",
            DivMov => "DIVMOVI",
            Plus => "PLUS",
            Negate => "NEGATE",
            Not => "NOT",
            Complement => "CMPL",
            Nop => "NOP",
            Ret => "RSR",
            Call => "BL",
            CallExtern => "BE",
            PushInt => "PUSHI",
            PushVar => "PUSHV",
            PushInstance => "PUSHVI",
            MovStr => "MOVS",
            MovStrPtr => "MOVSS",
            MovVarFloat => "MOVVF",
            MovFloat => "MOVF",
            MovVarInstance => "MOVVI",
            Jump => "B",
            JumpIfZero => "BZ",
            SetInstance => "GMOVI",
            PushArrayVar => "PUSHVV",
        }
    }

    /// Source-level operator for arithmetic, logical and compound assignment opcodes.
    pub fn operator(self) -> Option<&'static str> {
        use Opcode::*;
        let s = match self {
            Add | Plus => "+",
            Sub | Negate => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            BitOr => "|",
            BitAnd => "&",
            Lt => "<",
            Gt => ">",
            LogOr => "||",
            LogAnd => "&&",
            Shl => "<<",
            Shr => ">>",
            Lte => "<=",
            Eq => "==",
            Neq => "!=",
            Gte => ">=",
            Not => "!",
            Complement => "~",
            AddMov => "+=",
            SubMov => "-=",
            MulMov => "*=",
            DivMov => "/=",
            _ => return None,
        };
        Some(s)
    }

    pub fn is_binary(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Add | Sub | Mul | Div | Mod | BitOr | BitAnd | Lt | Gt | LogOr | LogAnd | Shl | Shr | Lte | Eq | Neq | Gte
        )
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Opcode::Plus | Opcode::Negate | Opcode::Not | Opcode::Complement)
    }

    pub fn is_compound_assign(self) -> bool {
        matches!(self, Opcode::AddMov | Opcode::SubMov | Opcode::MulMov | Opcode::DivMov)
    }

    pub fn is_move(self) -> bool {
        use Opcode::*;
        matches!(self, MovInt | MovStr | MovStrPtr | MovVarFloat | MovFloat | MovVarInstance)
    }

    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfZero)
    }

    /// Number of operand bytes following the opcode byte.
    pub fn operand_len(self) -> usize {
        use Opcode::*;
        match self {
            Call | Jump | JumpIfZero => 4,
            PushInt => 4,
            CallExtern | PushVar | PushInstance | SetInstance => 4,
            PushArrayVar => 5,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Absolute code address of a branch or call target.
    Address(u32),
    /// Literal integer; float literals share the same bit pattern.
    Immediate(i32),
    Symbol(u32),
    /// Symbol plus array element, used by `PUSHVV`.
    SymbolElement(u32, u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub pc: u32,
    pub op: Opcode,
    pub size: u8,
    pub operand: Option<Operand>,
}

impl Instr {
    pub fn address(&self) -> Option<u32> {
        match self.operand {
            Some(Operand::Address(a)) => Some(a),
            _ => None,
        }
    }

    pub fn immediate(&self) -> Option<i32> {
        match self.operand {
            Some(Operand::Immediate(v)) => Some(v),
            _ => None,
        }
    }

    pub fn symbol(&self) -> Option<u32> {
        match self.operand {
            Some(Operand::Symbol(s)) | Some(Operand::SymbolElement(s, _)) => Some(s),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<u8> {
        match self.operand {
            Some(Operand::SymbolElement(_, i)) => Some(i),
            _ => None,
        }
    }

    pub fn next_pc(&self) -> u32 {
        self.pc + self.size as u32
    }
}

/// Decodes the instruction starting at `pc`, returning it with the address of the next one.
pub fn decode(code: &[u8], pc: u32) -> Result<(Instr, u32), ScriptError> {
    let start = pc as usize;
    let Some(&byte) = code.get(start) else {
        return Err(ScriptError::PcOutOfBounds { pc, len: code.len() });
    };
    let op = Opcode::from_byte(byte).ok_or(ScriptError::InvalidOpcode { pc, byte })?;
    let size = 1 + op.operand_len();
    let remaining = code.len() - start;
    if remaining < size {
        return Err(ScriptError::TruncatedInstr { pc, size, remaining });
    }
    let args = &code[start + 1..start + size];

    let operand = match op {
        Opcode::Call | Opcode::Jump | Opcode::JumpIfZero => Some(Operand::Address(LittleEndian::read_u32(args))),
        Opcode::PushInt => Some(Operand::Immediate(LittleEndian::read_i32(args))),
        Opcode::CallExtern | Opcode::PushVar | Opcode::PushInstance | Opcode::SetInstance => {
            Some(Operand::Symbol(LittleEndian::read_u32(args)))
        }
        Opcode::PushArrayVar => Some(Operand::SymbolElement(LittleEndian::read_u32(args), args[4])),
        _ => None,
    };

    let instr = Instr {
        pc,
        op,
        size: size as u8,
        operand,
    };
    Ok((instr, pc + size as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_opcode_byte_round_trips_through_from_byte() {
        for b in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(b) {
                assert_eq!(op.byte(), b, "{}", op.mnemonic());
            }
        }
    }

    #[test]
    fn decodes_variable_length_stream() {
        let code = [
            64, 0xE8, 0x03, 0, 0, // PUSHI 1000
            245, 7, 0, 0, 0, 2, // PUSHVV 7 + 2
            0,  // ADD
            76, 0x20, 0, 0, 0, // BZ 0x20
            60, // RSR
        ];

        let (a, pc) = decode(&code, 0).unwrap();
        assert_eq!(a.op, Opcode::PushInt);
        assert_eq!(a.immediate(), Some(1000));
        assert_eq!(pc, 5);

        let (b, pc) = decode(&code, pc).unwrap();
        assert_eq!(b.op, Opcode::PushArrayVar);
        assert_eq!(b.symbol(), Some(7));
        assert_eq!(b.element(), Some(2));
        assert_eq!(b.size, 6);

        let (c, pc) = decode(&code, pc).unwrap();
        assert_eq!(c.op, Opcode::Add);
        assert_eq!(c.operand, None);

        let (d, pc) = decode(&code, pc).unwrap();
        assert_eq!(d.address(), Some(0x20));

        let (e, pc) = decode(&code, pc).unwrap();
        assert_eq!(e.op, Opcode::Ret);
        assert_eq!(pc as usize, code.len());
    }

    #[test]
    fn rejects_pc_past_end() {
        let err = decode(&[60], 1).unwrap_err();
        assert!(matches!(err, ScriptError::PcOutOfBounds { pc: 1, len: 1 }));
    }

    #[test]
    fn rejects_truncated_operand() {
        let err = decode(&[61, 1, 2], 0).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::TruncatedInstr {
                pc: 0,
                size: 5,
                remaining: 3
            }
        ));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let err = decode(&[10], 0).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidOpcode { pc: 0, byte: 10 }));
    }
}
