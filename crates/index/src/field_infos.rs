//! Per-segment field table (.fnm)
//!
//! Maps field names to dense ordinals and carries per-field flags. The
//! ordinal is the sort key of the term dictionary and the suffix of the
//! norm file name, so assignment order is part of the segment format:
//! first-seen order at write time.
//!
//! ## File Format
//!
//! ```text
//! fieldCount            VInt
//! per field:
//!   name                String
//!   flags               Byte {indexed, storeTermVector,
//!                             storePositionsWithTermVector,
//!                             storeOffsetsWithTermVector,
//!                             omitNorms, storePayloads}
//! ```

use lucerna_core::{Error, Result};
use lucerna_store::{Directory, IndexInput};
use rustc_hash::FxHashMap;

const INDEXED: u8 = 0x01;
const STORE_TERM_VECTOR: u8 = 0x02;
const STORE_POSITIONS_WITH_TERM_VECTOR: u8 = 0x04;
const STORE_OFFSETS_WITH_TERM_VECTOR: u8 = 0x08;
const OMIT_NORMS: u8 = 0x10;
const STORE_PAYLOADS: u8 = 0x20;

/// Flags and ordinal of one field within a segment.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Dense ordinal within the segment
    pub number: u32,
    /// Field participates in the inverted index
    pub indexed: bool,
    /// A term vector is kept
    pub store_term_vector: bool,
    /// Term vector includes positions
    pub store_positions_with_term_vector: bool,
    /// Term vector includes character offsets
    pub store_offsets_with_term_vector: bool,
    /// No norm byte is kept for this field
    pub omit_norms: bool,
    /// Postings carry payloads
    pub store_payloads: bool,
}

impl FieldInfo {
    fn flags(&self) -> u8 {
        let mut b = 0u8;
        if self.indexed {
            b |= INDEXED;
        }
        if self.store_term_vector {
            b |= STORE_TERM_VECTOR;
        }
        if self.store_positions_with_term_vector {
            b |= STORE_POSITIONS_WITH_TERM_VECTOR;
        }
        if self.store_offsets_with_term_vector {
            b |= STORE_OFFSETS_WITH_TERM_VECTOR;
        }
        if self.omit_norms {
            b |= OMIT_NORMS;
        }
        if self.store_payloads {
            b |= STORE_PAYLOADS;
        }
        b
    }

    /// Whether a norm file exists for this field.
    pub fn has_norms(&self) -> bool {
        self.indexed && !self.omit_norms
    }
}

/// The field table of one segment.
#[derive(Debug, Default)]
pub struct FieldInfos {
    by_number: Vec<FieldInfo>,
    by_name: FxHashMap<String, u32>,
}

impl FieldInfos {
    /// Empty table.
    pub fn new() -> Self {
        FieldInfos::default()
    }

    /// Get or create the field, merging flags into an existing entry.
    /// Ordinals are assigned in first-seen order.
    pub fn add(&mut self, name: &str, indexed: bool, store_term_vector: bool) -> u32 {
        if let Some(&number) = self.by_name.get(name) {
            let info = &mut self.by_number[number as usize];
            info.indexed |= indexed;
            info.store_term_vector |= store_term_vector;
            return number;
        }
        let number = self.by_number.len() as u32;
        self.by_number.push(FieldInfo {
            name: name.to_string(),
            number,
            indexed,
            store_term_vector,
            store_positions_with_term_vector: false,
            store_offsets_with_term_vector: false,
            omit_norms: false,
            store_payloads: false,
        });
        self.by_name.insert(name.to_string(), number);
        number
    }

    /// Ordinal of a field name, if present.
    pub fn number(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Field info by ordinal.
    pub fn info(&self, number: u32) -> Option<&FieldInfo> {
        self.by_number.get(number as usize)
    }

    /// Field name by ordinal.
    pub fn name(&self, number: u32) -> Option<&str> {
        self.info(number).map(|i| i.name.as_str())
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    /// Iterate fields in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.by_number.iter()
    }

    /// Write the table as `<segment>.fnm`.
    pub fn write(&self, dir: &dyn Directory, segment: &str) -> Result<()> {
        let mut out = dir.create_output(&format!("{}.fnm", segment))?;
        out.write_vint(self.by_number.len() as u32)?;
        for info in &self.by_number {
            out.write_string(&info.name)?;
            out.write_byte(info.flags())?;
        }
        out.close()
    }

    /// Read the table from `<segment>.fnm`.
    pub fn read(dir: &dyn Directory, segment: &str) -> Result<Self> {
        let mut input = dir.open_input(&format!("{}.fnm", segment))?;
        let count = input.read_vint()?;
        let mut infos = FieldInfos::new();
        for number in 0..count {
            let name = input.read_string()?;
            let flags = input.read_byte()?;
            if infos.by_name.contains_key(&name) {
                return Err(Error::corrupt(format!("duplicate field {:?} in .fnm", name)));
            }
            infos.by_name.insert(name.clone(), number);
            infos.by_number.push(FieldInfo {
                name,
                number,
                indexed: flags & INDEXED != 0,
                store_term_vector: flags & STORE_TERM_VECTOR != 0,
                store_positions_with_term_vector: flags & STORE_POSITIONS_WITH_TERM_VECTOR != 0,
                store_offsets_with_term_vector: flags & STORE_OFFSETS_WITH_TERM_VECTOR != 0,
                omit_norms: flags & OMIT_NORMS != 0,
                store_payloads: flags & STORE_PAYLOADS != 0,
            });
        }
        Self::check_eof(&input)?;
        Ok(infos)
    }

    fn check_eof(input: &IndexInput) -> Result<()> {
        if input.remaining() != 0 {
            return Err(Error::corrupt("trailing bytes in .fnm"));
        }
        Ok(())
    }
}
