//! Buffered output stream with the on-disk codec
//!
//! An `IndexOutput` writes one named file. Filesystem outputs buffer
//! through `BufWriter` and fsync on close; RAM outputs publish their
//! buffer into the directory's file map on close, so a file becomes
//! visible to readers only once fully written.
//!
//! `seek` supports the one backward-patching pattern the formats need:
//! reserving a fixed-width slot (a term count, a pointer) and filling it
//! in once the value is known.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use lucerna_core::{Error, Result};
use parking_lot::RwLock;

/// Shared name → bytes map of a RAM directory.
pub(crate) type FileMap = Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>;

enum Sink {
    File {
        writer: BufWriter<File>,
        pos: u64,
    },
    Ram {
        name: String,
        buf: Vec<u8>,
        pos: usize,
        files: FileMap,
    },
    Buffer {
        buf: Vec<u8>,
        pos: usize,
    },
}

/// Write stream for one directory file.
pub struct IndexOutput {
    sink: Sink,
}

impl std::fmt::Debug for IndexOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sink {
            Sink::File { pos, .. } => f.debug_struct("IndexOutput").field("pos", pos).finish(),
            Sink::Ram { name, pos, .. } => f
                .debug_struct("IndexOutput")
                .field("name", name)
                .field("pos", pos)
                .finish(),
            Sink::Buffer { pos, .. } => f.debug_struct("IndexOutput").field("pos", pos).finish(),
        }
    }
}

impl IndexOutput {
    /// Stream into a filesystem file.
    pub(crate) fn file(file: File) -> Self {
        IndexOutput {
            sink: Sink::File {
                writer: BufWriter::new(file),
                pos: 0,
            },
        }
    }

    /// Stream into a RAM directory file, published on close.
    pub(crate) fn ram(name: String, files: FileMap) -> Self {
        IndexOutput {
            sink: Sink::Ram {
                name,
                buf: Vec::new(),
                pos: 0,
                files,
            },
        }
    }

    /// Stream into a detached in-memory buffer, retrieved with
    /// `into_bytes`. Used where the full encoding is needed before it
    /// reaches the directory (checksummed manifests).
    pub fn buffer() -> Self {
        IndexOutput {
            sink: Sink::Buffer {
                buf: Vec::new(),
                pos: 0,
            },
        }
    }

    /// Consume a `buffer()` output and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self.sink {
            Sink::Buffer { buf, .. } => buf,
            _ => Vec::new(),
        }
    }

    /// Current write position.
    pub fn tell(&self) -> u64 {
        match &self.sink {
            Sink::File { pos, .. } => *pos,
            Sink::Ram { pos, .. } | Sink::Buffer { pos, .. } => *pos as u64,
        }
    }

    /// Move the write position to an absolute offset within what has
    /// already been written.
    pub fn seek(&mut self, to: u64) -> Result<()> {
        match &mut self.sink {
            Sink::File { writer, pos } => {
                writer.flush()?;
                writer.get_mut().seek(SeekFrom::Start(to))?;
                *pos = to;
            }
            Sink::Ram { buf, pos, .. } | Sink::Buffer { buf, pos } => {
                if to > buf.len() as u64 {
                    return Err(Error::InvalidArgument(format!(
                        "seek to {} past end of output ({})",
                        to,
                        buf.len()
                    )));
                }
                *pos = to as usize;
            }
        }
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.sink {
            Sink::File { writer, pos } => {
                writer.write_all(bytes)?;
                *pos += bytes.len() as u64;
            }
            Sink::Ram { buf, pos, .. } | Sink::Buffer { buf, pos } => {
                let end = *pos + bytes.len();
                if end <= buf.len() {
                    buf[*pos..end].copy_from_slice(bytes);
                } else {
                    let overlap = buf.len().saturating_sub(*pos);
                    buf[*pos..].copy_from_slice(&bytes[..overlap]);
                    buf.extend_from_slice(&bytes[overlap..]);
                }
                *pos = end;
            }
        }
        Ok(())
    }

    /// Write one byte.
    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_raw(&[b])
    }

    /// Write a byte slice.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_raw(bytes)
    }

    /// Write a big-endian 32-bit integer.
    pub fn write_int(&mut self, v: i32) -> Result<()> {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, v);
        self.write_raw(&buf)
    }

    /// Write a big-endian 64-bit integer.
    pub fn write_long(&mut self, v: i64) -> Result<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, v);
        self.write_raw(&buf)
    }

    /// Write a big-endian IEEE-754 32-bit float.
    pub fn write_float(&mut self, v: f32) -> Result<()> {
        let mut buf = [0u8; 4];
        BigEndian::write_f32(&mut buf, v);
        self.write_raw(&buf)
    }

    /// Write a variable-length 32-bit integer (one to five bytes).
    pub fn write_vint(&mut self, mut v: u32) -> Result<()> {
        while v & !0x7F != 0 {
            self.write_byte(((v & 0x7F) | 0x80) as u8)?;
            v >>= 7;
        }
        self.write_byte(v as u8)
    }

    /// Write a variable-length 64-bit integer (one to ten bytes).
    pub fn write_vlong(&mut self, mut v: u64) -> Result<()> {
        while v & !0x7F != 0 {
            self.write_byte(((v & 0x7F) | 0x80) as u8)?;
            v >>= 7;
        }
        self.write_byte(v as u8)
    }

    /// Write a string as a VInt count of UTF-16 code units followed by
    /// modified UTF-8: NUL as `C0 80`, supplementary characters as
    /// surrogate pairs of three bytes each.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        let unit_count: usize = s.chars().map(char::len_utf16).sum();
        self.write_vint(unit_count as u32)?;
        for ch in s.chars() {
            let mut units = [0u16; 2];
            for &unit in ch.encode_utf16(&mut units).iter() {
                self.write_unit(unit)?;
            }
        }
        Ok(())
    }

    fn write_unit(&mut self, unit: u16) -> Result<()> {
        match unit {
            0x0001..=0x007F => self.write_byte(unit as u8),
            // NUL and the two-byte range share the C0..DF encoding
            0x0000 | 0x0080..=0x07FF => {
                self.write_byte(0xC0 | (unit >> 6) as u8)?;
                self.write_byte(0x80 | (unit & 0x3F) as u8)
            }
            _ => {
                self.write_byte(0xE0 | (unit >> 12) as u8)?;
                self.write_byte(0x80 | ((unit >> 6) & 0x3F) as u8)?;
                self.write_byte(0x80 | (unit & 0x3F) as u8)
            }
        }
    }

    /// Finish the file: flush and fsync (filesystem) or publish the
    /// buffer (RAM). Must be called; dropping an unclosed output
    /// discards buffered bytes.
    pub fn close(self) -> Result<()> {
        match self.sink {
            Sink::File { mut writer, .. } => {
                writer.flush()?;
                writer.get_ref().sync_all()?;
                Ok(())
            }
            Sink::Ram { name, buf, files, .. } => {
                files.write().insert(name, Arc::new(buf));
                Ok(())
            }
            Sink::Buffer { .. } => Ok(()),
        }
    }
}

/// Encode through a throwaway buffer output and return the bytes.
#[cfg(test)]
pub(crate) fn encode_for_test(f: impl FnOnce(&mut IndexOutput) -> Result<()>) -> Vec<u8> {
    let mut out = IndexOutput::buffer();
    f(&mut out).unwrap();
    out.into_bytes()
}
