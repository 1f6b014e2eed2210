//! The `Index` handle: single-writer, snapshot-reader surface
//!
//! One `Index` owns a directory's `write.lock` for its whole lifetime.
//! Added documents buffer in RAM and become segment files when the
//! buffer crosses `maxBufferedDocs` or a commit runs; deletions
//! tombstone immediately in the handle's own view and become `.del`
//! files at commit. `commit` is the visibility boundary for every
//! other reader: flush, apply deletions, run the merge policy, then
//! atomically rename the next `segments_<gen>` into place.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use lucerna_core::{Analyzer, Document, Error, Result, SimpleAnalyzer, Term};
use lucerna_index::{
    BufferedSegment, IndexConfig, IndexReader, MergePolicy, MultiTermsCursor, SegmentInfo,
    SegmentMerger, SegmentReader, SegmentInfos, write_segment, SEGMENTS_GEN, WRITE_LOCK,
};
use lucerna_search::{execute, DocRef, Query, QueryHit, Similarity};
use lucerna_store::{Directory, FsDirectory, Lock};

/// The only on-disk format this build reads or writes.
const SUPPORTED_FORMAT: i32 = lucerna_index::segment_infos::FORMAT;

/// Embedded full-text index over one directory.
///
/// Combines the writer and reader surface: the handle's own reads see
/// its uncommitted deletions, while independently opened readers see
/// only committed generations.
pub struct Index {
    dir: Arc<dyn Directory>,
    analyzer: Arc<dyn Analyzer>,
    config: IndexConfig,
    infos: SegmentInfos,
    readers: Vec<Arc<SegmentReader>>,
    buffered: BufferedSegment,
    /// Readers handed out by `reader()`, pinned against file deletion
    pinned: Mutex<Vec<Weak<IndexReader>>>,
    /// Anything to commit since the last generation
    dirty: bool,
    _lock: Lock,
}

impl Index {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a fresh index in `dir`, writing an empty first commit.
    /// Any previous index in the directory is superseded.
    pub fn create(dir: Arc<dyn Directory>) -> Result<Self> {
        Self::with_options(dir, IndexConfig::default(), Arc::new(SimpleAnalyzer), true)
    }

    /// Open the existing index in `dir`.
    pub fn open(dir: Arc<dyn Directory>) -> Result<Self> {
        Self::with_options(dir, IndexConfig::default(), Arc::new(SimpleAnalyzer), false)
    }

    /// Create a fresh index under a filesystem path.
    pub fn create_in(path: impl AsRef<Path>) -> Result<Self> {
        Self::create(Arc::new(FsDirectory::open(path)?))
    }

    /// Open the index under a filesystem path.
    pub fn open_in(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Arc::new(FsDirectory::open(path)?))
    }

    /// Full-control constructor.
    pub fn with_options(
        dir: Arc<dyn Directory>,
        config: IndexConfig,
        analyzer: Arc<dyn Analyzer>,
        create: bool,
    ) -> Result<Self> {
        let lock = dir.obtain_lock(WRITE_LOCK, config.lock_timeout)?;

        let mut index = Index {
            infos: SegmentInfos::new(),
            readers: Vec::new(),
            buffered: BufferedSegment::new(),
            pinned: Mutex::new(Vec::new()),
            dirty: false,
            analyzer,
            config,
            dir,
            _lock: lock,
        };
        if create {
            // continue the generation sequence if one exists, so stale
            // readers fall behind instead of colliding
            if let Ok(previous) = SegmentInfos::read_current(index.dir.as_ref()) {
                index.infos.generation = previous.generation;
                index.infos.version = previous.version;
                index.infos.name_counter = previous.name_counter;
            }
            index.infos.write_commit(index.dir.as_ref())?;
            index.delete_unused_files();
            info!(
                target: "lucerna::index",
                generation = index.infos.generation,
                "created index"
            );
        } else {
            index.infos = SegmentInfos::read_current(index.dir.as_ref())?;
            let segments = index.infos.segments.clone();
            for info in &segments {
                index
                    .readers
                    .push(Arc::new(open_segment(index.dir.as_ref(), info)?));
            }
        }
        Ok(index)
    }

    /// The directory this index lives in.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.dir
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Buffer one document; flushes a segment when the buffer crosses
    /// `maxBufferedDocs`. Buffered docs become searchable at the flush.
    pub fn add_document(&mut self, doc: &Document) -> Result<()> {
        self.buffered.add_document(doc, self.analyzer.as_ref())?;
        if self.buffered.doc_count() as usize >= self.config.max_buffered_docs {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush buffered documents as a new segment. No-op when empty.
    ///
    /// A failed flush drops the buffer; the on-disk index is unchanged.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        let name = self.infos.next_segment_name();
        let result = write_segment(
            self.dir.as_ref(),
            &name,
            &self.buffered,
            self.config.index_interval,
            self.config.skip_interval,
        )
        .and_then(|info| {
            let reader = open_segment(self.dir.as_ref(), &info)?;
            Ok((info, reader))
        });
        match result {
            Ok((info, reader)) => {
                self.infos.segments.push(info);
                self.readers.push(Arc::new(reader));
                self.buffered.clear();
                self.dirty = true;
                Ok(())
            }
            Err(e) => {
                self.buffered.clear();
                Err(e)
            }
        }
    }

    /// Tombstone a document. Visible to this handle's reads at once;
    /// durable and visible to new readers after `commit`.
    pub fn delete(&mut self, doc: impl Into<DocRef>) -> Result<()> {
        let id = doc.into().id();
        let (segment, local) = self.locate(id)?;
        if self.readers[segment].delete_doc(local)? {
            self.dirty = true;
        }
        Ok(())
    }

    /// Drop every tombstone added since the last commit. Docs deleted
    /// by previously committed generations stay deleted.
    pub fn undelete_all(&mut self) -> Result<()> {
        for reader in &self.readers {
            reader.undelete_all(self.dir.as_ref())?;
        }
        Ok(())
    }

    /// Make all pending changes durable: flush, persist deletions, run
    /// the merge policy, then publish the next generation atomically.
    pub fn commit(&mut self) -> Result<()> {
        self.flush()?;
        self.apply_deletions()?;
        self.apply_merges(false)?;
        self.publish()
    }

    /// Merge everything down to one segment (as far as `maxMergeDocs`
    /// permits), committing the result.
    pub fn optimize(&mut self) -> Result<()> {
        self.flush()?;
        self.apply_deletions()?;
        self.apply_merges(true)?;
        self.publish()
    }

    fn publish(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.infos.write_commit(self.dir.as_ref())?;
        self.dirty = false;
        self.delete_unused_files();
        Ok(())
    }

    fn apply_deletions(&mut self) -> Result<()> {
        for (reader, info) in self.readers.iter().zip(self.infos.segments.iter_mut()) {
            if let Some(new_gen) = reader.commit_deletions(self.dir.as_ref())? {
                info.del_gen = new_gen;
                self.dirty = true;
            }
        }
        Ok(())
    }

    fn apply_merges(&mut self, optimize: bool) -> Result<()> {
        let policy = MergePolicy {
            merge_factor: self.config.merge_factor,
            max_merge_docs: self.config.max_merge_docs,
        };
        loop {
            let doc_counts: Vec<u32> = self.infos.segments.iter().map(|s| s.doc_count).collect();
            let group = if optimize {
                policy.find_optimize_merge(&doc_counts)
            } else {
                policy.find_merge(&doc_counts)
            };
            let group = match group {
                Some(group) => group,
                // optimize also compacts a lone segment with tombstones
                None if optimize
                    && self.readers.len() == 1
                    && self.readers[0].has_deletions()
                    && self.readers[0].num_docs() as u64 <= self.config.max_merge_docs as u64 =>
                {
                    vec![0]
                }
                None => break,
            };
            self.run_merge(&group)?;
            self.dirty = true;
        }
        Ok(())
    }

    fn run_merge(&mut self, group: &[usize]) -> Result<()> {
        let name = self.infos.next_segment_name();
        let sources: Vec<&SegmentReader> =
            group.iter().map(|&i| self.readers[i].as_ref()).collect();
        let merged = SegmentMerger::new(
            self.dir.as_ref(),
            &name,
            sources,
            self.config.index_interval,
            self.config.skip_interval,
        )
        .merge()?;

        let insert_at = group[0];
        for &i in group.iter().rev() {
            self.infos.segments.remove(i);
            self.readers.remove(i);
        }
        // a merge of fully-deleted segments leaves nothing to keep
        if merged.doc_count > 0 {
            let reader = Arc::new(open_segment(self.dir.as_ref(), &merged)?);
            self.infos.segments.insert(insert_at, merged);
            self.readers.insert(insert_at, reader);
        }
        Ok(())
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Snapshot reader over this handle's current view. The snapshot
    /// pins its segment files against the deletion pass until dropped.
    pub fn reader(&self) -> Arc<IndexReader> {
        let reader = Arc::new(IndexReader::from_segments(
            self.readers.clone(),
            self.infos.generation,
            self.infos.version,
        ));
        self.pinned.lock().push(Arc::downgrade(&reader));
        reader
    }

    /// Run a query and return ranked hits.
    pub fn find(&self, query: &Query) -> Result<Vec<QueryHit>> {
        let view = IndexReader::from_segments(
            self.readers.clone(),
            self.infos.generation,
            self.infos.version,
        );
        execute(&view, query)
    }

    /// Stored view of a live document.
    pub fn document(&self, doc: impl Into<DocRef>) -> Result<Document> {
        let id = doc.into().id();
        let (segment, local) = self.locate(id)?;
        self.readers[segment].document(local)
    }

    /// One past the largest assigned doc id (committed or flushed).
    pub fn max_doc(&self) -> u32 {
        self.readers.iter().map(|r| r.max_doc()).sum()
    }

    /// Live docs, pending deletions excluded.
    pub fn num_docs(&self) -> u32 {
        self.readers.iter().map(|r| r.num_docs()).sum()
    }

    /// Whether any segment carries deletions.
    pub fn has_deletions(&self) -> bool {
        self.readers.iter().any(|r| r.has_deletions())
    }

    /// Whether a doc id is deleted.
    pub fn is_deleted(&self, doc: impl Into<DocRef>) -> Result<bool> {
        let id = doc.into().id();
        let (segment, local) = self.locate(id)?;
        Ok(self.readers[segment].is_deleted(local))
    }

    /// Merged stream over every term in the index.
    pub fn terms(&self) -> Result<MultiTermsCursor> {
        self.view().terms()
    }

    /// Live document frequency of a term.
    pub fn doc_freq(&self, term: &Term) -> Result<u32> {
        self.view().doc_freq(term)
    }

    /// Global ids of the live docs containing a term.
    pub fn term_docs(&self, term: &Term) -> Result<Vec<u32>> {
        let view = self.view();
        let mut postings = view.term_docs(term)?;
        let mut docs = Vec::new();
        while let Some(doc) = postings.next_doc()? {
            docs.push(doc);
        }
        Ok(docs)
    }

    /// `(doc, freq)` pairs for a term's live docs.
    pub fn term_freqs(&self, term: &Term) -> Result<Vec<(u32, u32)>> {
        let view = self.view();
        let mut postings = view.term_docs(term)?;
        let mut freqs = Vec::new();
        while let Some(doc) = postings.next_doc()? {
            freqs.push((doc, postings.freq()));
        }
        Ok(freqs)
    }

    /// `(doc, positions)` pairs for a term's live docs.
    pub fn term_positions(&self, term: &Term) -> Result<Vec<(u32, Vec<u32>)>> {
        let view = self.view();
        let mut postings = view.term_positions(term)?;
        let mut result = Vec::new();
        while let Some(doc) = postings.next_doc()? {
            result.push((doc, postings.positions()?));
        }
        Ok(result)
    }

    /// Decoded length norm for `(doc, field)`.
    pub fn norm(&self, doc: impl Into<DocRef>, field: &str) -> Result<f32> {
        self.view().norm(doc.into().id(), field)
    }

    /// Union of field names, optionally indexed fields only.
    pub fn field_names(&self, indexed_only: bool) -> Vec<String> {
        self.view().field_names(indexed_only)
    }

    // ========================================================================
    // Configuration surface
    // ========================================================================

    /// On-disk format of the current commit.
    pub fn format_version(&self) -> i32 {
        SUPPORTED_FORMAT
    }

    /// Request a format for the next commit. Only the current format
    /// is supported; anything else is rejected.
    pub fn set_format_version(&mut self, version: i32) -> Result<()> {
        if version != SUPPORTED_FORMAT {
            return Err(Error::InvalidArgument(format!(
                "unsupported segments format {} (supported: {})",
                version, SUPPORTED_FORMAT
            )));
        }
        Ok(())
    }

    /// Buffered docs before an automatic flush.
    pub fn max_buffered_docs(&self) -> usize {
        self.config.max_buffered_docs
    }

    /// Set the flush threshold.
    pub fn set_max_buffered_docs(&mut self, n: usize) {
        self.config.max_buffered_docs = n.max(1);
    }

    /// Upper bound on a merged segment's doc count.
    pub fn max_merge_docs(&self) -> u32 {
        self.config.max_merge_docs
    }

    /// Set the merged-segment size cap.
    pub fn set_max_merge_docs(&mut self, n: u32) {
        self.config.max_merge_docs = n;
    }

    /// Segments per level before a merge triggers.
    pub fn merge_factor(&self) -> usize {
        self.config.merge_factor
    }

    /// Set the merge factor.
    pub fn set_merge_factor(&mut self, n: usize) {
        self.config.merge_factor = n.max(2);
    }

    /// The similarity used for scoring.
    pub fn similarity(&self) -> Similarity {
        Similarity
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn view(&self) -> IndexReader {
        IndexReader::from_segments(
            self.readers.clone(),
            self.infos.generation,
            self.infos.version,
        )
    }

    fn locate(&self, id: u32) -> Result<(usize, u32)> {
        let mut base = 0u32;
        for (segment, reader) in self.readers.iter().enumerate() {
            let next = base + reader.max_doc();
            if id < next {
                return Ok((segment, id - base));
            }
            base = next;
        }
        Err(Error::InvalidArgument(format!(
            "doc {} out of range (maxDoc {})",
            id, base
        )))
    }

    /// Remove index files that no generation and no live reader
    /// references.
    fn delete_unused_files(&self) {
        let mut referenced: HashSet<String> = HashSet::new();
        referenced.insert(WRITE_LOCK.to_string());
        referenced.insert(SEGMENTS_GEN.to_string());
        referenced.insert(SegmentInfos::file_name(self.infos.generation));
        for reader in &self.readers {
            referenced.extend(reader.files());
        }
        {
            let mut pinned = self.pinned.lock();
            pinned.retain(|weak| weak.upgrade().is_some());
            for weak in pinned.iter() {
                if let Some(snapshot) = weak.upgrade() {
                    referenced.insert(SegmentInfos::file_name(snapshot.generation()));
                    for segment in snapshot.segment_readers() {
                        referenced.extend(segment.files());
                    }
                }
            }
        }

        let names = match self.dir.list_all() {
            Ok(names) => names,
            Err(e) => {
                warn!(target: "lucerna::index", error = %e, "deletion pass could not list directory");
                return;
            }
        };
        for name in names {
            if referenced.contains(&name) || !is_index_file(&name) {
                continue;
            }
            match self.dir.delete_file(&name) {
                Ok(()) => debug!(target: "lucerna::index", file = %name, "deleted unused file"),
                Err(e) => {
                    warn!(target: "lucerna::index", file = %name, error = %e, "could not delete unused file")
                }
            }
        }
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("generation", &self.infos.generation)
            .field("segments", &self.readers.len())
            .field("buffered", &self.buffered.doc_count())
            .field("max_doc", &self.max_doc())
            .finish()
    }
}

/// Open a segment, translating a vanished file into `StaleReader`: the
/// generation that named it has been superseded and cleaned up.
fn open_segment(dir: &dyn Directory, info: &SegmentInfo) -> Result<SegmentReader> {
    SegmentReader::open(dir, info).map_err(|e| match e {
        Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => Error::StaleReader,
        other => other,
    })
}

/// Whether a file name belongs to this index's format.
fn is_index_file(name: &str) -> bool {
    if name.starts_with("segments_") || name.starts_with("pending_segments_") {
        return true;
    }
    if !name.starts_with('_') {
        return false;
    }
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    matches!(ext, "fnm" | "fdx" | "fdt" | "tis" | "tii" | "frq" | "prx" | "del")
        || (ext.len() > 1 && ext.starts_with('f') && ext[1..].bytes().all(|b| b.is_ascii_digit()))
}
