//! Random-access input stream with the on-disk codec
//!
//! An `IndexInput` is a cursor over an immutable byte buffer. Cloning is
//! cheap and yields an independent cursor over the same bytes, which is
//! how one open file serves the term dictionary, several posting readers
//! and the merger at once.
//!
//! ## Codec
//!
//! All multi-byte integers use VInt / VLong: 7 data bits per byte, high
//! bit set on continuation bytes, least-significant group first. Strings
//! are a VInt count of UTF-16 code units followed by modified UTF-8
//! (NUL encoded as two bytes, supplementary planes as surrogate pairs).
//! Fixed-width scalars are big-endian.

use std::sync::Arc;

use lucerna_core::{Error, Result};

/// Shared immutable bytes backing one or more cursors.
///
/// Both mmap'd files and RAM files coerce into this.
pub type SharedBytes = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// Random-access read cursor over an immutable file.
pub struct IndexInput {
    data: SharedBytes,
    pos: usize,
}

impl Clone for IndexInput {
    /// Independent cursor over the same bytes, starting at the same
    /// position.
    fn clone(&self) -> Self {
        IndexInput {
            data: Arc::clone(&self.data),
            pos: self.pos,
        }
    }
}

impl std::fmt::Debug for IndexInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexInput")
            .field("len", &self.len())
            .field("pos", &self.pos)
            .finish()
    }
}

impl IndexInput {
    /// Wrap shared bytes in a cursor positioned at 0.
    pub fn new(data: SharedBytes) -> Self {
        IndexInput { data, pos: 0 }
    }

    /// Wrap an owned buffer. Used by tests and the RAM directory.
    pub fn from_vec(data: Vec<u8>) -> Self {
        IndexInput::new(Arc::new(data))
    }

    fn bytes(&self) -> &[u8] {
        (*self.data).as_ref()
    }

    /// Total file length in bytes.
    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Current cursor position.
    pub fn tell(&self) -> u64 {
        self.pos as u64
    }

    /// Remaining bytes after the cursor.
    pub fn remaining(&self) -> u64 {
        self.len() - self.tell()
    }

    /// Move the cursor to an absolute offset.
    ///
    /// Fails with `CorruptIndex` if the offset is past EOF; a declared
    /// offset beyond the file is a structural fault of the file that
    /// declared it.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len() {
            return Err(Error::corrupt(format!(
                "seek to {} past EOF (len {})",
                pos,
                self.len()
            )));
        }
        self.pos = pos as usize;
        Ok(())
    }

    /// Read one byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        let bytes = self.bytes();
        let b = *bytes
            .get(self.pos)
            .ok_or_else(|| Error::corrupt("read past EOF"))?;
        self.pos += 1;
        Ok(b)
    }

    /// Fill `buf` from the cursor.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        let bytes = self.bytes();
        if end > bytes.len() {
            return Err(Error::corrupt("read past EOF"));
        }
        buf.copy_from_slice(&bytes[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    /// Read `n` bytes into a fresh buffer.
    pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_bytes(&mut buf)?;
        Ok(buf)
    }

    /// Read a big-endian 32-bit integer.
    pub fn read_int(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    /// Read a big-endian 64-bit integer.
    pub fn read_long(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Read a big-endian IEEE-754 32-bit float.
    pub fn read_float(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(f32::from_be_bytes(buf))
    }

    /// Read a variable-length 32-bit integer.
    ///
    /// Fails with `CorruptIndex` when the encoding runs past five bytes.
    pub fn read_vint(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        let mut shift = 0;
        for _ in 0..5 {
            let byte = self.read_byte()?;
            value |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(Error::corrupt("VInt longer than five bytes"))
    }

    /// Read a variable-length 64-bit integer (at most ten bytes).
    pub fn read_vlong(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        for _ in 0..10 {
            let byte = self.read_byte()?;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(Error::corrupt("VLong longer than ten bytes"))
    }

    /// Read a length-prefixed modified-UTF-8 string.
    ///
    /// The prefix counts UTF-16 code units, matching the classical
    /// format. Fails with `CorruptIndex` on truncation or an invalid
    /// surrogate sequence.
    pub fn read_string(&mut self) -> Result<String> {
        let unit_count = self.read_vint()? as usize;
        if unit_count as u64 > self.remaining() {
            return Err(Error::corrupt(format!(
                "string of {} units exceeds remaining file",
                unit_count
            )));
        }
        let mut units: Vec<u16> = Vec::with_capacity(unit_count);
        for _ in 0..unit_count {
            let b0 = self.read_byte()?;
            let unit = match b0 {
                0x00..=0x7F => b0 as u16,
                0xC0..=0xDF => {
                    let b1 = self.read_byte()?;
                    if b1 & 0xC0 != 0x80 {
                        return Err(Error::corrupt("bad modified-UTF-8 continuation"));
                    }
                    (((b0 & 0x1F) as u16) << 6) | (b1 & 0x3F) as u16
                }
                0xE0..=0xEF => {
                    let b1 = self.read_byte()?;
                    let b2 = self.read_byte()?;
                    if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                        return Err(Error::corrupt("bad modified-UTF-8 continuation"));
                    }
                    (((b0 & 0x0F) as u16) << 12)
                        | (((b1 & 0x3F) as u16) << 6)
                        | (b2 & 0x3F) as u16
                }
                _ => return Err(Error::corrupt("bad modified-UTF-8 lead byte")),
            };
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| Error::corrupt("unpaired surrogate in string"))
    }
}
