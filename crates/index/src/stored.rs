//! Stored field payloads (.fdx / .fdt)
//!
//! One record per document. The .fdx index holds a fixed-width pointer
//! per doc so retrieval is a seek plus one record parse; the .fdt data
//! file holds the records themselves.
//!
//! ## File Format
//!
//! ```text
//! .fdx: per doc
//!   dataOffset          Int64  (into .fdt)
//! .fdt: per doc
//!   fieldCount          VInt
//!   per stored field:
//!     fieldOrd          VInt
//!     bits              Byte {tokenized, binary}
//!     value             String, or VInt len + bytes when binary
//! ```

use lucerna_core::{Document, Error, Field, FieldValue, Result};
use lucerna_store::{Directory, IndexInput, IndexOutput};

use crate::field_infos::FieldInfos;

const TOKENIZED: u8 = 0x01;
const BINARY: u8 = 0x02;

/// One stored value, keyed by field ordinal.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Field ordinal within the segment
    pub field: u32,
    /// The field was tokenized at index time
    pub tokenized: bool,
    /// The stored payload
    pub value: FieldValue,
}

// ============================================================================
// StoredFieldsWriter
// ============================================================================

/// Writes stored field records in doc-id order.
pub struct StoredFieldsWriter {
    fdx: IndexOutput,
    fdt: IndexOutput,
    doc_count: u32,
}

impl StoredFieldsWriter {
    /// Create the stored-field files for `segment`.
    pub fn new(dir: &dyn Directory, segment: &str) -> Result<Self> {
        Ok(StoredFieldsWriter {
            fdx: dir.create_output(&format!("{}.fdx", segment))?,
            fdt: dir.create_output(&format!("{}.fdt", segment))?,
            doc_count: 0,
        })
    }

    /// Append one document's stored fields.
    pub fn add_doc(&mut self, entries: &[StoredEntry]) -> Result<()> {
        self.fdx.write_long(self.fdt.tell() as i64)?;
        self.fdt.write_vint(entries.len() as u32)?;
        for entry in entries {
            self.fdt.write_vint(entry.field)?;
            let mut bits = 0u8;
            if entry.tokenized {
                bits |= TOKENIZED;
            }
            if matches!(entry.value, FieldValue::Binary(_)) {
                bits |= BINARY;
            }
            self.fdt.write_byte(bits)?;
            match &entry.value {
                FieldValue::Text(s) => self.fdt.write_string(s)?,
                FieldValue::Binary(b) => {
                    self.fdt.write_vint(b.len() as u32)?;
                    self.fdt.write_bytes(b)?;
                }
            }
        }
        self.doc_count += 1;
        Ok(())
    }

    /// Number of documents written so far.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Close both files.
    pub fn close(self) -> Result<()> {
        self.fdx.close()?;
        self.fdt.close()
    }
}

// ============================================================================
// StoredFieldsReader
// ============================================================================

/// Random-access reader over stored field records.
pub struct StoredFieldsReader {
    fdx: IndexInput,
    fdt: IndexInput,
    doc_count: u32,
}

impl StoredFieldsReader {
    /// Open the stored fields of `segment`.
    pub fn open(dir: &dyn Directory, segment: &str, doc_count: u32) -> Result<Self> {
        let fdx = dir.open_input(&format!("{}.fdx", segment))?;
        if fdx.len() != doc_count as u64 * 8 {
            return Err(Error::corrupt(format!(
                ".fdx length {} does not match doc count {}",
                fdx.len(),
                doc_count
            )));
        }
        Ok(StoredFieldsReader {
            fdx,
            fdt: dir.open_input(&format!("{}.fdt", segment))?,
            doc_count,
        })
    }

    /// Raw stored entries of doc `n`, field ordinals unresolved.
    /// This is the merger's path; it rewrites ordinals itself.
    pub fn raw(&self, n: u32) -> Result<Vec<StoredEntry>> {
        if n >= self.doc_count {
            return Err(Error::InvalidArgument(format!(
                "doc {} out of range (maxDoc {})",
                n, self.doc_count
            )));
        }
        let mut fdx = self.fdx.clone();
        fdx.seek(n as u64 * 8)?;
        let offset = fdx.read_long()?;
        if offset < 0 {
            return Err(Error::corrupt("negative stored-field offset"));
        }
        let mut fdt = self.fdt.clone();
        fdt.seek(offset as u64)?;

        let count = fdt.read_vint()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let field = fdt.read_vint()?;
            let bits = fdt.read_byte()?;
            let value = if bits & BINARY != 0 {
                let len = fdt.read_vint()? as usize;
                FieldValue::Binary(fdt.read_vec(len)?)
            } else {
                FieldValue::Text(fdt.read_string()?)
            };
            entries.push(StoredEntry {
                field,
                tokenized: bits & TOKENIZED != 0,
                value,
            });
        }
        Ok(entries)
    }

    /// Reconstruct the stored view of doc `n` as a `Document`.
    pub fn doc(&self, n: u32, field_infos: &FieldInfos) -> Result<Document> {
        let mut doc = Document::new();
        for entry in self.raw(n)? {
            let info = field_infos.info(entry.field).ok_or_else(|| {
                Error::corrupt(format!("stored field ordinal {} not in .fnm", entry.field))
            })?;
            let binary = matches!(entry.value, FieldValue::Binary(_));
            doc.add(Field {
                name: info.name.clone(),
                value: entry.value,
                boost: 1.0,
                stored: true,
                indexed: info.indexed,
                tokenized: entry.tokenized,
                binary,
                store_term_vector: info.store_term_vector,
            });
        }
        Ok(doc)
    }
}
