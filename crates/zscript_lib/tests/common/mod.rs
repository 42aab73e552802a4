use byteorder::{LittleEndian, WriteBytesExt};
use encoding_rs::WINDOWS_1252;
use zscript_lib::{DataType, Symbol, SymbolFlags, SymbolValue};

fn put_line(out: &mut Vec<u8>, text: &str) {
    let (bytes, _, _) = WINDOWS_1252.encode(text);
    out.extend_from_slice(&bytes);
    out.push(b'\n');
}

/// Serializes symbols and code into a compiled `.DAT` image.
pub fn write_dat(symbols: &[Symbol], code: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(50);
    out.write_u32::<LittleEndian>(symbols.len() as u32).unwrap();
    for i in 0..symbols.len() {
        out.write_u32::<LittleEndian>(i as u32).unwrap();
    }

    for sym in symbols {
        out.write_u32::<LittleEndian>(u32::from(!sym.name.is_empty())).unwrap();
        if !sym.name.is_empty() {
            put_line(&mut out, &sym.name);
        }

        let vary = if sym.is_member() {
            sym.member_offset
        } else if sym.kind == DataType::Class {
            sym.class_size
        } else {
            sym.return_type.raw()
        };
        out.write_u32::<LittleEndian>(vary).unwrap();

        let flags = sym.flags.0 & SymbolFlags::DISK_MASK;
        let props = (sym.count & 0xFFF) | (sym.kind.raw() << 12) | (flags << 16);
        out.write_u32::<LittleEndian>(props).unwrap();

        let loc = &sym.location;
        for v in [loc.file_index, loc.line_start, loc.line_count, loc.char_start, loc.char_count] {
            out.write_u32::<LittleEndian>(v).unwrap();
        }

        if !sym.is_member() {
            match (&sym.value, sym.kind) {
                (SymbolValue::Float(v), _) => v.iter().for_each(|f| out.write_f32::<LittleEndian>(*f).unwrap()),
                (SymbolValue::Int(v), _) => v.iter().for_each(|i| out.write_i32::<LittleEndian>(*i).unwrap()),
                (SymbolValue::String(v), _) => v.iter().for_each(|s| put_line(&mut out, s)),
                (SymbolValue::None, DataType::Float | DataType::Int) => {
                    for _ in 0..sym.count {
                        out.write_u32::<LittleEndian>(0).unwrap();
                    }
                }
                (SymbolValue::None, DataType::String) => {
                    for _ in 0..sym.count {
                        out.push(b'\n');
                    }
                }
                (SymbolValue::None, DataType::Class) => out.write_u32::<LittleEndian>(sym.class_offset).unwrap(),
                (SymbolValue::None, DataType::Function | DataType::Prototype | DataType::Instance) => {
                    out.write_u32::<LittleEndian>(sym.address).unwrap()
                }
                (SymbolValue::None, DataType::Void) => {}
            }
        }

        let parent = sym.parent.map_or(-1, |p| p as i32);
        out.write_i32::<LittleEndian>(parent).unwrap();
    }

    out.write_u32::<LittleEndian>(code.len() as u32).unwrap();
    out.extend_from_slice(code);
    out
}

/// Appends little-endian instructions to a code buffer.
#[derive(Default)]
pub struct Code(pub Vec<u8>);

impl Code {
    pub fn op(mut self, byte: u8) -> Self {
        self.0.push(byte);
        self
    }

    pub fn with_u32(mut self, byte: u8, v: u32) -> Self {
        self.0.push(byte);
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn pc(&self) -> u32 {
        self.0.len() as u32
    }
}

pub const ADD: u8 = 0;
pub const MOVI: u8 = 9;
pub const EQ: u8 = 16;
pub const RSR: u8 = 60;
pub const BL: u8 = 61;
pub const BE: u8 = 62;
pub const PUSHI: u8 = 64;
pub const PUSHV: u8 = 65;
pub const PUSHVI: u8 = 67;
pub const MOVS: u8 = 70;
pub const MOVVI: u8 = 74;
pub const B: u8 = 75;
pub const BZ: u8 = 76;
pub const GMOVI: u8 = 80;
