//! Builders for hand-assembled scripts used by the unit tests.

use crate::opcode::Opcode;
use crate::symbol::{DataType, Symbol, SymbolFlags, SymbolValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Label(usize);

/// Emits bytecode with branch labels, patched in `finish`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Asm {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
}

impl Asm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pc(&self) -> u32 {
        self.code.len() as u32
    }

    pub(crate) fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op.byte());
        self
    }

    fn op_u32(&mut self, op: Opcode, v: u32) -> &mut Self {
        self.code.push(op.byte());
        self.code.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub(crate) fn push_int(&mut self, v: i32) -> &mut Self {
        self.op_u32(Opcode::PushInt, v as u32)
    }

    pub(crate) fn push_var(&mut self, sym: u32) -> &mut Self {
        self.op_u32(Opcode::PushVar, sym)
    }

    pub(crate) fn push_instance(&mut self, sym: u32) -> &mut Self {
        self.op_u32(Opcode::PushInstance, sym)
    }

    pub(crate) fn push_array(&mut self, sym: u32, element: u8) -> &mut Self {
        self.op_u32(Opcode::PushArrayVar, sym);
        self.code.push(element);
        self
    }

    pub(crate) fn call(&mut self, address: u32) -> &mut Self {
        self.op_u32(Opcode::Call, address)
    }

    pub(crate) fn call_extern(&mut self, sym: u32) -> &mut Self {
        self.op_u32(Opcode::CallExtern, sym)
    }

    pub(crate) fn set_instance(&mut self, sym: u32) -> &mut Self {
        self.op_u32(Opcode::SetInstance, sym)
    }

    pub(crate) fn ret(&mut self) -> &mut Self {
        self.op(Opcode::Ret)
    }

    pub(crate) fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub(crate) fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.pc());
        self
    }

    fn branch(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.fixups.push((self.code.len() + 1, label));
        self.op_u32(op, 0)
    }

    pub(crate) fn jump(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::Jump, label)
    }

    pub(crate) fn jump_if_zero(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::JumpIfZero, label)
    }

    /// The assembled code with every branch patched. Panics on an unbound label.
    pub(crate) fn finish(&self) -> Vec<u8> {
        let mut code = self.code.clone();
        for &(at, label) in &self.fixups {
            let target = self.labels[label.0].expect("branch to unbound label");
            code[at..at + 4].copy_from_slice(&target.to_le_bytes());
        }
        code
    }
}

/// A const function with a body at `address`.
pub(crate) fn function(name: &str, address: u32) -> Symbol {
    Symbol::new(name, DataType::Function)
        .with_flags(SymbolFlags::CONST)
        .with_address(address)
}

pub(crate) fn prototype(name: &str, parent: u32, address: u32) -> Symbol {
    Symbol::new(name, DataType::Prototype).with_parent(parent).with_address(address)
}

/// A variable instance; add `SymbolFlags::CONST` for one with a body.
pub(crate) fn instance(name: &str, parent: u32, address: u32) -> Symbol {
    Symbol::new(name, DataType::Instance).with_parent(parent).with_address(address)
}

pub(crate) fn class(name: &str, size: u32) -> Symbol {
    let mut sym = Symbol::new(name, DataType::Class);
    sym.class_size = size;
    sym
}

pub(crate) fn field(name: &str, kind: DataType, class: u32) -> Symbol {
    Symbol::new(name, kind).with_flags(SymbolFlags::MEMBER).with_parent(class)
}

pub(crate) fn param(name: &str, kind: DataType) -> Symbol {
    Symbol::new(name, kind).with_flags(SymbolFlags::MEMBER)
}

pub(crate) fn int_var(name: &str) -> Symbol {
    Symbol::new(name, DataType::Int)
}

pub(crate) fn float_var(name: &str) -> Symbol {
    Symbol::new(name, DataType::Float)
}

/// A compiler-generated string constant, as emitted for string literals.
pub(crate) fn string_literal(text: &str) -> Symbol {
    Symbol::new(format!("\u{FF}{}", text.len()), DataType::String)
        .with_flags(SymbolFlags::CONST | SymbolFlags::GENERATED)
        .with_value(SymbolValue::String(vec![text.to_string()]))
}
