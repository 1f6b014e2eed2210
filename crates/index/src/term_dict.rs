//! Term dictionary (.tis / .tii)
//!
//! The dictionary maps `(fieldOrd, term)` to a `TermInfo` holding the
//! term's document frequency and its pointers into the posting streams.
//! Entries are prefix-compressed against their predecessor and strictly
//! sorted by `(fieldOrd, term)`. Every `indexInterval`-th entry, the
//! state of the previous entry is replicated into the small .tii file
//! together with the .tis offset of the upcoming record; the .tii is
//! held in memory and binary-searched, and a lookup then scans at most
//! `indexInterval` entries of the .tis block. The first .tii record is
//! the empty sentinel, so every search has a floor.
//!
//! ## File Format (both files)
//!
//! ```text
//! format                Int32  (-2)
//! termCount             Int64  (patched on close)
//! indexInterval         Int32
//! skipInterval          Int32
//! per term:
//!   prefixLen           VInt   (UTF-16 units shared with previous term)
//!   suffix              String
//!   fieldOrd            VInt
//!   docFreq             VInt
//!   freqPtrDelta        VLong
//!   proxPtrDelta        VLong
//!   skipDelta           VInt   (only if docFreq >= skipInterval)
//!   tisPtrDelta         VLong  (.tii only)
//! ```

use std::sync::Arc;

use lucerna_core::{Error, Result};
use lucerna_store::{Directory, IndexInput, IndexOutput};

/// Dictionary format version.
const FORMAT: i32 = -2;
/// Byte offset of the patched term count in the header.
const SIZE_OFFSET: u64 = 4;

/// Dictionary entry: document frequency plus posting-stream pointers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermInfo {
    /// Number of documents containing the term
    pub doc_freq: u32,
    /// Offset of the term's postings in .frq
    pub freq_pointer: u64,
    /// Offset of the term's positions in .prx
    pub prox_pointer: u64,
    /// Byte distance from `freq_pointer` to the skip region
    /// (meaningful only when `doc_freq >= skipInterval`)
    pub skip_offset: u32,
}

/// Take the prefix of `s` covering `units` UTF-16 code units.
///
/// The writer only cuts at character boundaries, so a split inside a
/// surrogate pair means a corrupt file.
fn utf16_prefix(s: &str, units: u32) -> Result<&str> {
    if units == 0 {
        return Ok("");
    }
    let mut seen = 0u32;
    for (byte_idx, ch) in s.char_indices() {
        if seen == units {
            return Ok(&s[..byte_idx]);
        }
        seen += ch.len_utf16() as u32;
    }
    if seen == units {
        return Ok(s);
    }
    Err(Error::corrupt("term prefix splits a character"))
}

fn utf16_len(s: &str) -> u32 {
    s.chars().map(|c| c.len_utf16() as u32).sum()
}

/// Longest common prefix of two strings that ends on a char boundary.
fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let mut end = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            break;
        }
        end += ca.len_utf8();
    }
    &a[..end]
}

// ============================================================================
// TermDictWriter
// ============================================================================

/// Writes the .tis and .tii files of one segment.
///
/// Terms must arrive in strictly ascending `(fieldOrd, text)` order.
pub struct TermDictWriter {
    tis: IndexOutput,
    tii: IndexOutput,
    index_interval: u32,
    skip_interval: u32,
    size: u64,
    index_size: u64,
    // previous .tis entry
    last_field: u32,
    last_text: String,
    last_info: TermInfo,
    // previous .tii entry
    index_last_field: u32,
    index_last_text: String,
    index_last_info: TermInfo,
    index_last_pointer: u64,
    started: bool,
}

impl TermDictWriter {
    /// Create the dictionary files for `segment`.
    pub fn new(
        dir: &dyn Directory,
        segment: &str,
        index_interval: u32,
        skip_interval: u32,
    ) -> Result<Self> {
        let mut tis = dir.create_output(&format!("{}.tis", segment))?;
        let mut tii = dir.create_output(&format!("{}.tii", segment))?;
        for out in [&mut tis, &mut tii] {
            out.write_int(FORMAT)?;
            out.write_long(0)?; // size, patched on close
            out.write_int(index_interval as i32)?;
            out.write_int(skip_interval as i32)?;
        }
        Ok(TermDictWriter {
            tis,
            tii,
            index_interval,
            skip_interval,
            size: 0,
            index_size: 0,
            last_field: 0,
            last_text: String::new(),
            last_info: TermInfo::default(),
            index_last_field: 0,
            index_last_text: String::new(),
            index_last_info: TermInfo::default(),
            index_last_pointer: 0,
            started: false,
        })
    }

    /// Append one term.
    pub fn add(&mut self, field: u32, text: &str, info: &TermInfo) -> Result<()> {
        if self.started && (field, text) <= (self.last_field, self.last_text.as_str()) {
            return Err(Error::corrupt(format!(
                "terms out of order: {}:{:?} after {}:{:?}",
                field, text, self.last_field, self.last_text
            )));
        }
        if self.size % self.index_interval as u64 == 0 {
            // replicate the previous entry's state into the index (the
            // empty sentinel on the first call) plus the offset of the
            // record about to be written
            let prefix = common_prefix(&self.index_last_text, &self.last_text);
            self.tii.write_vint(utf16_len(prefix))?;
            self.tii.write_string(&self.last_text[prefix.len()..])?;
            self.tii.write_vint(self.last_field)?;
            self.tii.write_vint(self.last_info.doc_freq)?;
            self.tii
                .write_vlong(self.last_info.freq_pointer - self.index_last_info.freq_pointer)?;
            self.tii
                .write_vlong(self.last_info.prox_pointer - self.index_last_info.prox_pointer)?;
            if self.last_info.doc_freq >= self.skip_interval {
                self.tii.write_vint(self.last_info.skip_offset)?;
            }
            self.tii
                .write_vlong(self.tis.tell() - self.index_last_pointer)?;
            self.index_last_field = self.last_field;
            self.index_last_text = self.last_text.clone();
            self.index_last_info = self.last_info;
            self.index_last_pointer = self.tis.tell();
            self.index_size += 1;
        }

        let prefix = common_prefix(&self.last_text, text);
        self.tis.write_vint(utf16_len(prefix))?;
        self.tis.write_string(&text[prefix.len()..])?;
        self.tis.write_vint(field)?;
        self.tis.write_vint(info.doc_freq)?;
        self.tis
            .write_vlong(info.freq_pointer - self.last_info.freq_pointer)?;
        self.tis
            .write_vlong(info.prox_pointer - self.last_info.prox_pointer)?;
        if info.doc_freq >= self.skip_interval {
            self.tis.write_vint(info.skip_offset)?;
        }

        self.last_field = field;
        self.last_text = text.to_string();
        self.last_info = *info;
        self.size += 1;
        self.started = true;
        Ok(())
    }

    /// Patch the term counts into both headers and close.
    pub fn close(mut self) -> Result<()> {
        let tis_end = self.tis.tell();
        self.tis.seek(SIZE_OFFSET)?;
        self.tis.write_long(self.size as i64)?;
        self.tis.seek(tis_end)?;

        let tii_end = self.tii.tell();
        self.tii.seek(SIZE_OFFSET)?;
        self.tii.write_long(self.index_size as i64)?;
        self.tii.seek(tii_end)?;

        self.tis.close()?;
        self.tii.close()
    }
}

// ============================================================================
// TermsCursor
// ============================================================================

/// Restartable cursor over a segment's term dictionary in sort order.
///
/// Owns its file cursor; advancing never touches shared state, so any
/// number of cursors can be open over one segment.
pub struct TermsCursor {
    input: IndexInput,
    size: u64,
    position: u64,
    skip_interval: u32,
    field: u32,
    text: String,
    info: TermInfo,
    valid: bool,
}

impl TermsCursor {
    /// Whether the cursor currently points at a term.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Field ordinal of the current term.
    pub fn field(&self) -> u32 {
        self.field
    }

    /// Text of the current term.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Dictionary entry of the current term.
    pub fn info(&self) -> TermInfo {
        self.info
    }

    /// Advance to the next term. Returns false at the end.
    pub fn next(&mut self) -> Result<bool> {
        if self.position >= self.size {
            self.valid = false;
            return Ok(false);
        }
        let prefix_units = self.input.read_vint()?;
        let suffix = self.input.read_string()?;
        let field = self.input.read_vint()?;

        let mut text = utf16_prefix(&self.text, prefix_units)?.to_string();
        text.push_str(&suffix);
        if self.valid && (field, text.as_str()) <= (self.field, self.text.as_str()) {
            return Err(Error::corrupt(format!(
                "term dictionary out of order at {}:{:?}",
                field, text
            )));
        }

        let doc_freq = self.input.read_vint()?;
        let freq_pointer = self.info.freq_pointer + self.input.read_vlong()?;
        let prox_pointer = self.info.prox_pointer + self.input.read_vlong()?;
        let skip_offset = if doc_freq >= self.skip_interval {
            self.input.read_vint()?
        } else {
            0
        };

        self.field = field;
        self.text = text;
        self.info = TermInfo {
            doc_freq,
            freq_pointer,
            prox_pointer,
            skip_offset,
        };
        self.position += 1;
        self.valid = true;
        Ok(true)
    }
}

// ============================================================================
// TermDictReader
// ============================================================================

#[derive(Debug, Clone)]
struct IndexEntry {
    field: u32,
    text: String,
    info: TermInfo,
    /// Absolute .tis offset of the record following this entry's term
    tis_pointer: u64,
}

/// Reader over a segment's term dictionary.
///
/// Holds the .tii index in memory; lookups binary-search it and scan
/// forward through at most `indexInterval` .tis entries.
pub struct TermDictReader {
    tis: IndexInput,
    size: u64,
    index_interval: u32,
    skip_interval: u32,
    header_len: u64,
    index: Arc<Vec<IndexEntry>>,
}

impl TermDictReader {
    /// Open the dictionary of `segment`.
    pub fn open(dir: &dyn Directory, segment: &str) -> Result<Self> {
        let mut tis = dir.open_input(&format!("{}.tis", segment))?;
        let (size, index_interval, skip_interval) = Self::read_header(&mut tis)?;
        let header_len = tis.tell();

        let mut tii = dir.open_input(&format!("{}.tii", segment))?;
        let (index_size, tii_interval, tii_skip) = Self::read_header(&mut tii)?;
        if tii_interval != index_interval || tii_skip != skip_interval {
            return Err(Error::corrupt(".tii header disagrees with .tis"));
        }

        let mut index: Vec<IndexEntry> = Vec::with_capacity(index_size as usize);
        let mut prev_field = 0u32;
        let mut prev_text = String::new();
        let mut prev_info = TermInfo::default();
        let mut prev_pointer = 0u64;
        for i in 0..index_size {
            let prefix_units = tii.read_vint()?;
            let suffix = tii.read_string()?;
            let field = tii.read_vint()?;
            let mut text = utf16_prefix(&prev_text, prefix_units)?.to_string();
            text.push_str(&suffix);
            // entry 0 is the sentinel; real entries must ascend
            if i > 1 && (field, text.as_str()) <= (prev_field, prev_text.as_str()) {
                return Err(Error::corrupt("term index out of order"));
            }
            let doc_freq = tii.read_vint()?;
            let freq_pointer = prev_info.freq_pointer + tii.read_vlong()?;
            let prox_pointer = prev_info.prox_pointer + tii.read_vlong()?;
            let skip_offset = if doc_freq >= skip_interval {
                tii.read_vint()?
            } else {
                0
            };
            let tis_pointer = prev_pointer + tii.read_vlong()?;
            let info = TermInfo {
                doc_freq,
                freq_pointer,
                prox_pointer,
                skip_offset,
            };
            index.push(IndexEntry {
                field,
                text: text.clone(),
                info,
                tis_pointer,
            });
            prev_field = field;
            prev_text = text;
            prev_info = info;
            prev_pointer = tis_pointer;
        }
        Ok(TermDictReader {
            tis,
            size,
            index_interval,
            skip_interval,
            header_len,
            index: Arc::new(index),
        })
    }

    fn read_header(input: &mut IndexInput) -> Result<(u64, u32, u32)> {
        let format = input.read_int()?;
        if format != FORMAT {
            return Err(Error::corrupt(format!(
                "unsupported term dictionary format {}",
                format
            )));
        }
        let size = input.read_long()?;
        let index_interval = input.read_int()?;
        let skip_interval = input.read_int()?;
        if size < 0 || index_interval <= 0 || skip_interval <= 0 {
            return Err(Error::corrupt("bad term dictionary header"));
        }
        Ok((size as u64, index_interval as u32, skip_interval as u32))
    }

    /// Number of terms in the dictionary.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The skip interval postings were written with.
    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    /// Cursor positioned before the first term.
    pub fn cursor(&self) -> Result<TermsCursor> {
        let mut input = self.tis.clone();
        input.seek(self.header_len)?;
        Ok(TermsCursor {
            input,
            size: self.size,
            position: 0,
            skip_interval: self.skip_interval,
            field: 0,
            text: String::new(),
            info: TermInfo::default(),
            valid: false,
        })
    }

    /// Cursor seeded from index entry `k`: its state is the term
    /// preceding record `k * indexInterval`, and the next advance reads
    /// that record.
    fn cursor_at(&self, k: usize) -> Result<TermsCursor> {
        let entry = &self.index[k];
        let mut input = self.tis.clone();
        input.seek(entry.tis_pointer)?;
        Ok(TermsCursor {
            input,
            size: self.size,
            position: k as u64 * self.index_interval as u64,
            skip_interval: self.skip_interval,
            field: entry.field,
            text: entry.text.clone(),
            info: entry.info,
            valid: k > 0,
        })
    }

    /// Index slot of the greatest indexed entry <= `(field, text)`.
    /// Slot 0 (the sentinel) is the universal floor.
    fn index_slot(&self, field: u32, text: &str) -> usize {
        let target = (field, text);
        match self
            .index
            .binary_search_by(|e| (e.field, e.text.as_str()).cmp(&target))
        {
            Ok(k) => k,
            Err(0) => 0,
            Err(k) => k - 1,
        }
    }

    /// Exact lookup.
    pub fn get(&self, field: u32, text: &str) -> Result<Option<TermInfo>> {
        if self.size == 0 {
            return Ok(None);
        }
        let mut cursor = self.cursor_at(self.index_slot(field, text))?;
        if cursor.is_valid() && (cursor.field(), cursor.text()) == (field, text) {
            return Ok(Some(cursor.info()));
        }
        while cursor.next()? {
            match (cursor.field(), cursor.text()).cmp(&(field, text)) {
                std::cmp::Ordering::Equal => return Ok(Some(cursor.info())),
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => {}
            }
        }
        Ok(None)
    }

    /// Cursor positioned on the first term >= `(field, text)`.
    ///
    /// The cursor is invalid when every term sorts below the target.
    pub fn seek_ge(&self, field: u32, text: &str) -> Result<TermsCursor> {
        if self.size == 0 {
            return self.cursor();
        }
        let mut cursor = self.cursor_at(self.index_slot(field, text))?;
        if !cursor.is_valid() {
            cursor.next()?;
        }
        while cursor.is_valid() && (cursor.field(), cursor.text()) < (field, text) {
            if !cursor.next()? {
                break;
            }
        }
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucerna_store::RamDirectory;

    fn info(doc_freq: u32, freq: u64, prox: u64) -> TermInfo {
        TermInfo {
            doc_freq,
            freq_pointer: freq,
            prox_pointer: prox,
            skip_offset: 0,
        }
    }

    /// Write a dictionary with a small index interval so lookups cross
    /// index blocks even with few terms.
    fn write_dict(dir: &RamDirectory, terms: &[(u32, &str)]) {
        let mut writer = TermDictWriter::new(dir, "_0", 4, 16).unwrap();
        for (i, (field, text)) in terms.iter().enumerate() {
            let i = i as u64;
            writer
                .add(*field, text, &info(1 + i as u32, i * 10, i * 7))
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_iterate_all_terms_in_order() {
        let dir = RamDirectory::new();
        let terms: Vec<(u32, &str)> = vec![
            (0, "apple"),
            (0, "apricot"),
            (0, "banana"),
            (1, "apple"),
            (1, "cherry"),
        ];
        write_dict(&dir, &terms);

        let reader = TermDictReader::open(&dir, "_0").unwrap();
        assert_eq!(reader.size(), 5);
        let mut cursor = reader.cursor().unwrap();
        let mut seen = Vec::new();
        while cursor.next().unwrap() {
            seen.push((cursor.field(), cursor.text().to_string()));
        }
        let expected: Vec<(u32, String)> =
            terms.iter().map(|(f, t)| (*f, t.to_string())).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_get_across_index_blocks() {
        let dir = RamDirectory::new();
        // 40 terms with index interval 4: ten index blocks
        let texts: Vec<String> = (0..40).map(|i| format!("term{:03}", i)).collect();
        let terms: Vec<(u32, &str)> = texts.iter().map(|t| (0, t.as_str())).collect();
        write_dict(&dir, &terms);

        let reader = TermDictReader::open(&dir, "_0").unwrap();
        for (i, (f, t)) in terms.iter().enumerate() {
            let found = reader.get(*f, t).unwrap().expect("term present");
            assert_eq!(found.doc_freq, 1 + i as u32, "term {}", t);
            assert_eq!(found.freq_pointer, i as u64 * 10);
            assert_eq!(found.prox_pointer, i as u64 * 7);
        }
        assert!(reader.get(0, "aaa").unwrap().is_none()); // below first
        assert!(reader.get(0, "term0005x").unwrap().is_none()); // between
        assert!(reader.get(0, "zzz").unwrap().is_none()); // above last
        assert!(reader.get(7, "term000").unwrap().is_none()); // unknown field
    }

    #[test]
    fn test_prefix_compression_with_shared_prefixes() {
        let dir = RamDirectory::new();
        let terms: Vec<(u32, &str)> = vec![
            (0, "inter"),
            (0, "internal"),
            (0, "international"),
            (0, "internet"),
            (0, "interval"),
        ];
        write_dict(&dir, &terms);

        let reader = TermDictReader::open(&dir, "_0").unwrap();
        for (f, t) in &terms {
            assert!(reader.get(*f, t).unwrap().is_some(), "term {}", t);
        }
    }

    #[test]
    fn test_non_ascii_terms() {
        let dir = RamDirectory::new();
        // multi-byte chars exercise the UTF-16 prefix accounting
        let mut terms: Vec<(u32, String)> = vec![
            (0, "caf\u{e9}".to_string()),
            (0, "caf\u{e9}s".to_string()),
            (0, "\u{65e5}\u{672c}".to_string()),
            (0, "\u{65e5}\u{672c}\u{8a9e}".to_string()),
            (0, "\u{1F600}grin".to_string()),
            (0, "\u{1F600}grins".to_string()),
        ];
        terms.sort_by(|a, b| a.1.cmp(&b.1));
        let refs: Vec<(u32, &str)> = terms.iter().map(|(f, t)| (*f, t.as_str())).collect();
        write_dict(&dir, &refs);

        let reader = TermDictReader::open(&dir, "_0").unwrap();
        for (f, t) in &refs {
            assert!(reader.get(*f, t).unwrap().is_some(), "term {:?}", t);
        }
        let mut cursor = reader.cursor().unwrap();
        let mut count = 0;
        while cursor.next().unwrap() {
            count += 1;
        }
        assert_eq!(count, refs.len());
    }

    #[test]
    fn test_seek_ge() {
        let dir = RamDirectory::new();
        let terms: Vec<(u32, &str)> =
            vec![(0, "bat"), (0, "cat"), (0, "dog"), (1, "ant")];
        write_dict(&dir, &terms);
        let reader = TermDictReader::open(&dir, "_0").unwrap();

        let cursor = reader.seek_ge(0, "car").unwrap();
        assert!(cursor.is_valid());
        assert_eq!(cursor.text(), "cat");

        let cursor = reader.seek_ge(0, "a").unwrap();
        assert_eq!(cursor.text(), "bat");

        let cursor = reader.seek_ge(0, "elephant").unwrap();
        assert_eq!((cursor.field(), cursor.text()), (1, "ant"));

        let cursor = reader.seek_ge(1, "bee").unwrap();
        assert!(!cursor.is_valid());
    }

    #[test]
    fn test_seek_ge_continues_iteration() {
        let dir = RamDirectory::new();
        let texts: Vec<String> = (0..20).map(|i| format!("w{:02}", i)).collect();
        let terms: Vec<(u32, &str)> = texts.iter().map(|t| (0, t.as_str())).collect();
        write_dict(&dir, &terms);
        let reader = TermDictReader::open(&dir, "_0").unwrap();

        let mut cursor = reader.seek_ge(0, "w07").unwrap();
        let mut seen = vec![cursor.text().to_string()];
        while cursor.next().unwrap() {
            seen.push(cursor.text().to_string());
        }
        assert_eq!(seen.len(), 13);
        assert_eq!(seen[0], "w07");
        assert_eq!(seen.last().unwrap(), "w19");
    }

    #[test]
    fn test_out_of_order_write_rejected() {
        let dir = RamDirectory::new();
        let mut writer = TermDictWriter::new(&dir, "_0", 4, 16).unwrap();
        writer.add(0, "m", &info(1, 0, 0)).unwrap();
        assert!(writer.add(0, "m", &info(1, 0, 0)).is_err());
        assert!(writer.add(0, "a", &info(1, 0, 0)).is_err());
        // field ordinals must not decrease either
        writer.add(1, "a", &info(1, 0, 0)).unwrap();
        assert!(writer.add(0, "z", &info(1, 0, 0)).is_err());
    }

    #[test]
    fn test_empty_dictionary() {
        let dir = RamDirectory::new();
        let writer = TermDictWriter::new(&dir, "_0", 4, 16).unwrap();
        writer.close().unwrap();

        let reader = TermDictReader::open(&dir, "_0").unwrap();
        assert_eq!(reader.size(), 0);
        assert!(reader.get(0, "x").unwrap().is_none());
        let mut cursor = reader.cursor().unwrap();
        assert!(!cursor.next().unwrap());
        let cursor = reader.seek_ge(0, "x").unwrap();
        assert!(!cursor.is_valid());
    }

    #[test]
    fn test_skip_offset_survives_roundtrip() {
        let dir = RamDirectory::new();
        let mut writer = TermDictWriter::new(&dir, "_0", 4, 16).unwrap();
        let with_skip = TermInfo {
            doc_freq: 40, // >= skip interval, so skip_offset is encoded
            freq_pointer: 100,
            prox_pointer: 50,
            skip_offset: 77,
        };
        writer.add(0, "common", &with_skip).unwrap();
        writer.add(0, "rare", &info(2, 300, 200)).unwrap();
        writer.close().unwrap();

        let reader = TermDictReader::open(&dir, "_0").unwrap();
        let found = reader.get(0, "common").unwrap().unwrap();
        assert_eq!(found, with_skip);
        let rare = reader.get(0, "rare").unwrap().unwrap();
        assert_eq!(rare.skip_offset, 0);
        assert_eq!(rare.freq_pointer, 300);
    }
}
