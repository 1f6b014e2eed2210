//! Segment reader
//!
//! Opens one immutable segment: field table, term dictionary, posting
//! streams, norms, stored fields, and the deletion bitmap. All file
//! data is loaded or mapped at open, so a reader keeps working after
//! the writer deletes the files underneath it.
//!
//! The deletion bitmap is the one mutable piece. The owning writer
//! mutates it copy-on-write behind a lock; posting cursors take an
//! `Arc` snapshot when they open, which is exactly the committed-or-
//! pending view the caller asked for at that moment.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use lucerna_core::{Document, Error, Result, Term};
use lucerna_store::{Directory, IndexInput};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::bitvector::BitVector;
use crate::field_infos::FieldInfos;
use crate::postings::SegmentPostings;
use crate::segment_infos::{to_base36, SegmentInfo};
use crate::stored::{StoredEntry, StoredFieldsReader};
use crate::term_dict::{TermDictReader, TermInfo, TermsCursor};

/// Read view of one segment.
pub struct SegmentReader {
    info: SegmentInfo,
    field_infos: Arc<FieldInfos>,
    dict: TermDictReader,
    freq_in: IndexInput,
    prox_in: IndexInput,
    norms: FxHashMap<u32, Arc<Vec<u8>>>,
    stored: StoredFieldsReader,
    deletions: RwLock<Option<Arc<BitVector>>>,
    dirty_deletions: AtomicBool,
    committed_del_gen: AtomicI64,
}

impl SegmentReader {
    /// Open the segment named by `info`.
    pub fn open(dir: &dyn Directory, info: &SegmentInfo) -> Result<Self> {
        let field_infos = Arc::new(FieldInfos::read(dir, &info.name)?);
        let dict = TermDictReader::open(dir, &info.name)?;
        let freq_in = dir.open_input(&format!("{}.frq", info.name))?;
        let prox_in = dir.open_input(&format!("{}.prx", info.name))?;
        let stored = StoredFieldsReader::open(dir, &info.name, info.doc_count)?;

        let mut norms = FxHashMap::default();
        for field in field_infos.iter().filter(|f| f.has_norms()) {
            let mut input = dir.open_input(&format!("{}.f{}", info.name, field.number))?;
            if input.len() != info.doc_count as u64 {
                return Err(Error::corrupt(format!(
                    "norm file {}.f{} has {} bytes for {} docs",
                    info.name,
                    field.number,
                    input.len(),
                    info.doc_count
                )));
            }
            norms.insert(field.number, Arc::new(input.read_vec(info.doc_count as usize)?));
        }

        let deletions = match info.del_file_name() {
            Some(del_name) => {
                let bits = BitVector::read(dir, &del_name)?;
                if bits.size() != info.doc_count {
                    return Err(Error::corrupt(format!(
                        "deletion bitmap {} sized {} for {} docs",
                        del_name,
                        bits.size(),
                        info.doc_count
                    )));
                }
                Some(Arc::new(bits))
            }
            None => None,
        };

        debug!(
            target: "lucerna::index",
            segment = %info.name,
            docs = info.doc_count,
            deleted = deletions.as_ref().map(|d| d.count()).unwrap_or(0),
            "opened segment"
        );
        Ok(SegmentReader {
            info: info.clone(),
            field_infos,
            dict,
            freq_in,
            prox_in,
            norms,
            stored,
            deletions: RwLock::new(deletions),
            dirty_deletions: AtomicBool::new(false),
            committed_del_gen: AtomicI64::new(info.del_gen),
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Per-segment field table.
    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    // ========================================================================
    // Doc counts & deletions
    // ========================================================================

    /// Total docs, deleted included.
    pub fn max_doc(&self) -> u32 {
        self.info.doc_count
    }

    /// Live docs.
    pub fn num_docs(&self) -> u32 {
        self.info.doc_count - self.deleted_count()
    }

    /// Number of deleted docs, pending deletions included.
    pub fn deleted_count(&self) -> u32 {
        self.deletions.read().as_ref().map_or(0, |d| d.count())
    }

    /// Whether any doc is deleted.
    pub fn has_deletions(&self) -> bool {
        self.deleted_count() > 0
    }

    /// Whether local doc `id` is deleted.
    pub fn is_deleted(&self, id: u32) -> bool {
        self.deletions.read().as_ref().is_some_and(|d| d.get(id))
    }

    /// Snapshot of the deletion bitmap for cursors.
    pub fn deletions_snapshot(&self) -> Option<Arc<BitVector>> {
        self.deletions.read().clone()
    }

    /// Tombstone local doc `id`. Idempotent; visible to cursors opened
    /// afterwards, durable at the next deletion commit. Returns whether
    /// the doc was newly deleted.
    pub fn delete_doc(&self, id: u32) -> Result<bool> {
        if id >= self.info.doc_count {
            return Err(Error::InvalidArgument(format!(
                "doc {} out of range (maxDoc {})",
                id, self.info.doc_count
            )));
        }
        let mut guard = self.deletions.write();
        let bits = guard.get_or_insert_with(|| Arc::new(BitVector::new(self.info.doc_count)));
        if bits.get(id) {
            return Ok(false);
        }
        Arc::make_mut(bits).set(id);
        self.dirty_deletions.store(true, Ordering::Release);
        Ok(true)
    }

    /// Whether deletions were added since the last commit.
    pub fn has_dirty_deletions(&self) -> bool {
        self.dirty_deletions.load(Ordering::Acquire)
    }

    /// Drop tombstones added since the last commit by reloading the
    /// committed bitmap (or clearing, when none was ever committed).
    pub fn undelete_all(&self, dir: &dyn Directory) -> Result<()> {
        let committed_gen = self.committed_del_gen.load(Ordering::Acquire);
        let committed = SegmentInfo {
            del_gen: committed_gen,
            ..self.info.clone()
        };
        let restored = match committed.del_file_name() {
            Some(name) => Some(Arc::new(BitVector::read(dir, &name)?)),
            None => None,
        };
        *self.deletions.write() = restored;
        self.dirty_deletions.store(false, Ordering::Release);
        Ok(())
    }

    /// Persist pending deletions as the next deletion generation.
    /// Returns the new generation, or `None` when nothing was pending.
    pub fn commit_deletions(&self, dir: &dyn Directory) -> Result<Option<i64>> {
        if !self.has_dirty_deletions() {
            return Ok(None);
        }
        let bits = self
            .deletions
            .read()
            .clone()
            .ok_or_else(|| Error::InvalidArgument("dirty deletions without bitmap".into()))?;
        let new_gen = self.committed_del_gen.load(Ordering::Acquire).max(0) + 1;
        let name = format!("{}_{}.del", self.info.name, to_base36(new_gen as u64));
        bits.write(dir, &name)?;
        self.committed_del_gen.store(new_gen, Ordering::Release);
        self.dirty_deletions.store(false, Ordering::Release);
        debug!(
            target: "lucerna::index",
            segment = %self.info.name,
            generation = new_gen,
            deleted = bits.count(),
            "committed deletion bitmap"
        );
        Ok(Some(new_gen))
    }

    /// Deletion generation as of the last commit.
    pub fn committed_del_gen(&self) -> i64 {
        self.committed_del_gen.load(Ordering::Acquire)
    }

    // ========================================================================
    // Terms & postings
    // ========================================================================

    /// Dictionary entry for a term, if present.
    pub fn term_info(&self, term: &Term) -> Result<Option<TermInfo>> {
        let Some(field) = self.field_infos.number(&term.field) else {
            return Ok(None);
        };
        self.dict.get(field, &term.text)
    }

    /// Postings cursor for a term; deleted docs are filtered.
    pub fn term_docs(&self, term: &Term, with_positions: bool) -> Result<Option<SegmentPostings>> {
        let Some(info) = self.term_info(term)? else {
            return Ok(None);
        };
        let prox = with_positions.then(|| self.prox_in.clone());
        Ok(Some(SegmentPostings::open(
            self.freq_in.clone(),
            prox,
            info,
            self.deletions_snapshot(),
            self.dict.skip_interval(),
        )?))
    }

    /// Raw postings cursor: no deletion filtering. The merger's path.
    pub fn raw_postings(&self, info: TermInfo, with_positions: bool) -> Result<SegmentPostings> {
        let prox = with_positions.then(|| self.prox_in.clone());
        SegmentPostings::open(
            self.freq_in.clone(),
            prox,
            info,
            None,
            self.dict.skip_interval(),
        )
    }

    /// Live document frequency of a term.
    ///
    /// Equals the dictionary count unless the segment has deletions, in
    /// which case the postings are counted against the bitmap.
    pub fn doc_freq(&self, term: &Term) -> Result<u32> {
        let Some(info) = self.term_info(term)? else {
            return Ok(0);
        };
        if !self.has_deletions() {
            return Ok(info.doc_freq);
        }
        let mut postings = SegmentPostings::open(
            self.freq_in.clone(),
            None,
            info,
            self.deletions_snapshot(),
            self.dict.skip_interval(),
        )?;
        let mut count = 0;
        while postings.next_doc()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Cursor over the whole dictionary.
    pub fn terms(&self) -> Result<TermsCursor> {
        self.dict.cursor()
    }

    /// Cursor positioned on the first term >= the target.
    pub fn terms_from(&self, term: &Term) -> Result<Option<TermsCursor>> {
        let Some(field) = self.field_infos.number(&term.field) else {
            return Ok(None);
        };
        Ok(Some(self.dict.seek_ge(field, &term.text)?))
    }

    // ========================================================================
    // Stored fields & norms
    // ========================================================================

    /// Stored view of a live document.
    pub fn document(&self, id: u32) -> Result<Document> {
        if id >= self.info.doc_count {
            return Err(Error::InvalidArgument(format!(
                "doc {} out of range (maxDoc {})",
                id, self.info.doc_count
            )));
        }
        if self.is_deleted(id) {
            return Err(Error::InvalidArgument(format!("doc {} is deleted", id)));
        }
        self.stored.doc(id, &self.field_infos)
    }

    /// Raw stored entries, deleted or not. The merger's path.
    pub fn stored_raw(&self, id: u32) -> Result<Vec<StoredEntry>> {
        self.stored.raw(id)
    }

    /// Norm byte for `(doc, field)`; 0 when the field has no norms
    /// or the doc lacks the field.
    pub fn norm(&self, id: u32, field: &str) -> u8 {
        self.field_infos
            .number(field)
            .and_then(|ord| self.norms.get(&ord))
            .and_then(|bytes| bytes.get(id as usize).copied())
            .unwrap_or(0)
    }

    /// Norm bytes of a whole field, if kept. The merger's path.
    pub fn norms_bytes(&self, field: u32) -> Option<&Arc<Vec<u8>>> {
        self.norms.get(&field)
    }

    /// Every file belonging to this segment at its current deletion
    /// generation. Drives the file deleter.
    pub fn files(&self) -> Vec<String> {
        let name = &self.info.name;
        let mut files: Vec<String> = ["fnm", "fdx", "fdt", "tis", "tii", "frq", "prx"]
            .iter()
            .map(|ext| format!("{}.{}", name, ext))
            .collect();
        for field in self.field_infos.iter().filter(|f| f.has_norms()) {
            files.push(format!("{}.f{}", name, field.number));
        }
        let committed = SegmentInfo {
            del_gen: self.committed_del_gen(),
            ..self.info.clone()
        };
        if let Some(del) = committed.del_file_name() {
            files.push(del);
        }
        files
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("name", &self.info.name)
            .field("max_doc", &self.info.doc_count)
            .field("deleted", &self.deleted_count())
            .finish()
    }
}
