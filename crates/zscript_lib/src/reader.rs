use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::WINDOWS_1252;

use crate::ScriptError;

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8, ScriptError> {
        if self.remaining() < 1 {
            return Err(ScriptError::Eof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32, ScriptError> {
        Ok(LittleEndian::read_u32(self.get_bytes(4)?))
    }

    pub(crate) fn get_i32(&mut self) -> Result<i32, ScriptError> {
        Ok(LittleEndian::read_i32(self.get_bytes(4)?))
    }

    pub(crate) fn get_f32(&mut self) -> Result<f32, ScriptError> {
        Ok(LittleEndian::read_f32(self.get_bytes(4)?))
    }

    pub(crate) fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], ScriptError> {
        if self.remaining() < n {
            return Err(ScriptError::Eof);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Raw bytes up to the next `\n`; the terminator is consumed but not returned.
    pub(crate) fn get_raw_line(&mut self) -> Result<&'a [u8], ScriptError> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let len = rest.iter().position(|&b| b == b'\n').ok_or(ScriptError::Eof)?;
        let line = &rest[..len];
        self.pos += len + 1;
        Ok(line)
    }

    pub(crate) fn get_line(&mut self) -> Result<String, ScriptError> {
        let raw = self.get_raw_line()?;
        Ok(decode_text(raw))
    }
}

/// Script text is stored as Windows-1252.
pub(crate) fn decode_text(raw: &[u8]) -> String {
    let (s, _) = WINDOWS_1252.decode_without_bom_handling(raw);
    s.into_owned()
}
