//! Multi-segment read view
//!
//! An `IndexReader` is a snapshot of one committed generation: the
//! segments named by that generation's manifest, concatenated. Global
//! doc ids are `segmentBase + localId` in manifest order. The reader
//! is unaffected by later commits; its segment data is mapped or
//! loaded at open, so even file deletion under it is harmless.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use lucerna_core::{Document, Error, Result, Term};
use lucerna_store::Directory;

use crate::norms::decode_norm;
use crate::postings::SegmentPostings;
use crate::segment::SegmentReader;
use crate::segment_infos::SegmentInfos;
use crate::term_dict::TermsCursor;

/// Snapshot view over every segment of one generation.
pub struct IndexReader {
    segments: Vec<Arc<SegmentReader>>,
    /// Doc-id base per segment, plus the grand total at the end
    starts: Vec<u32>,
    generation: i64,
    version: i64,
}

impl IndexReader {
    /// Open the current committed generation of `dir`.
    ///
    /// Reads `segments.gen`, falls back to listing the directory, then
    /// opens every named segment.
    pub fn open(dir: &dyn Directory) -> Result<Self> {
        let infos = SegmentInfos::read_current(dir)?;
        let mut segments = Vec::with_capacity(infos.segments.len());
        for info in &infos.segments {
            segments.push(Arc::new(SegmentReader::open(dir, info)?));
        }
        Ok(Self::from_segments(
            segments,
            infos.generation,
            infos.version,
        ))
    }

    /// Assemble a view from already-open segments.
    pub fn from_segments(segments: Vec<Arc<SegmentReader>>, generation: i64, version: i64) -> Self {
        let mut starts = Vec::with_capacity(segments.len() + 1);
        let mut base = 0u32;
        for segment in &segments {
            starts.push(base);
            base += segment.max_doc();
        }
        starts.push(base);
        IndexReader {
            segments,
            starts,
            generation,
            version,
        }
    }

    /// Generation this snapshot was opened at.
    pub fn generation(&self) -> i64 {
        self.generation
    }

    /// Commit version this snapshot was opened at.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The underlying segments, in global order.
    pub fn segment_readers(&self) -> &[Arc<SegmentReader>] {
        &self.segments
    }

    /// One past the largest assigned doc id.
    pub fn max_doc(&self) -> u32 {
        *self.starts.last().unwrap_or(&0)
    }

    /// Live docs across all segments.
    pub fn num_docs(&self) -> u32 {
        self.segments.iter().map(|s| s.num_docs()).sum()
    }

    /// Deleted docs across all segments.
    pub fn deleted_docs(&self) -> u32 {
        self.segments.iter().map(|s| s.deleted_count()).sum()
    }

    /// Whether any segment carries deletions.
    pub fn has_deletions(&self) -> bool {
        self.segments.iter().any(|s| s.has_deletions())
    }

    /// Resolve a global doc id to `(segment index, local id)`.
    pub fn segment_for(&self, doc: u32) -> Result<(usize, u32)> {
        if doc >= self.max_doc() {
            return Err(Error::InvalidArgument(format!(
                "doc {} out of range (maxDoc {})",
                doc,
                self.max_doc()
            )));
        }
        // starts is non-decreasing; find the segment whose id range
        // holds doc (duplicates from empty segments resolve forward)
        let mut idx = match self.starts.binary_search(&doc) {
            Ok(i) => i.min(self.segments.len() - 1),
            Err(i) => i - 1,
        };
        while self.starts[idx + 1] <= doc {
            idx += 1;
        }
        Ok((idx, doc - self.starts[idx]))
    }

    /// Whether global doc `id` is deleted.
    pub fn is_deleted(&self, doc: u32) -> Result<bool> {
        let (idx, local) = self.segment_for(doc)?;
        Ok(self.segments[idx].is_deleted(local))
    }

    /// Stored view of a live document.
    pub fn document(&self, doc: u32) -> Result<Document> {
        let (idx, local) = self.segment_for(doc)?;
        self.segments[idx].document(local)
    }

    /// Decoded norm for `(doc, field)`.
    pub fn norm(&self, doc: u32, field: &str) -> Result<f32> {
        let (idx, local) = self.segment_for(doc)?;
        Ok(decode_norm(self.segments[idx].norm(local, field)))
    }

    /// Live document frequency of a term across segments.
    pub fn doc_freq(&self, term: &Term) -> Result<u32> {
        let mut total = 0;
        for segment in &self.segments {
            total += segment.doc_freq(term)?;
        }
        Ok(total)
    }

    /// Postings cursor over all segments, without positions.
    pub fn term_docs(&self, term: &Term) -> Result<MultiPostings> {
        self.open_postings(term, false)
    }

    /// Postings cursor over all segments, with positions.
    pub fn term_positions(&self, term: &Term) -> Result<MultiPostings> {
        self.open_postings(term, true)
    }

    fn open_postings(&self, term: &Term, with_positions: bool) -> Result<MultiPostings> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for (segment, &base) in self.segments.iter().zip(&self.starts) {
            parts.push((base, segment.term_docs(term, with_positions)?));
        }
        Ok(MultiPostings { parts, current: 0 })
    }

    /// Merged cursor over every term in the index, in `(field, text)`
    /// order with per-term summed dictionary doc freq.
    pub fn terms(&self) -> Result<MultiTermsCursor> {
        let cursors = self
            .segments
            .iter()
            .map(|s| s.terms().map(|c| (s.clone(), c)))
            .collect::<Result<Vec<_>>>()?;
        MultiTermsCursor::new(cursors)
    }

    /// Merged cursor starting at the first term >= `term`.
    pub fn terms_from(&self, term: &Term) -> Result<MultiTermsCursor> {
        let mut cursors = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            if let Some(cursor) = segment.terms_from(term)? {
                cursors.push((segment.clone(), cursor));
            }
        }
        MultiTermsCursor::new_seeked(cursors)
    }

    /// Union of field names, optionally restricted to indexed fields.
    pub fn field_names(&self, indexed_only: bool) -> Vec<String> {
        let mut names = Vec::new();
        for segment in &self.segments {
            for field in segment.field_infos().iter() {
                if indexed_only && !field.indexed {
                    continue;
                }
                if !names.contains(&field.name) {
                    names.push(field.name.clone());
                }
            }
        }
        names
    }
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("segments", &self.segments.len())
            .field("max_doc", &self.max_doc())
            .field("generation", &self.generation)
            .finish()
    }
}

// ============================================================================
// MultiPostings
// ============================================================================

/// Postings over the concatenated segments, yielding global doc ids.
pub struct MultiPostings {
    parts: Vec<(u32, Option<SegmentPostings>)>,
    current: usize,
}

impl MultiPostings {
    /// Advance to the next live doc; `None` when exhausted.
    pub fn next_doc(&mut self) -> Result<Option<u32>> {
        while self.current < self.parts.len() {
            let (base, cursor) = &mut self.parts[self.current];
            if let Some(cursor) = cursor {
                if let Some(local) = cursor.next_doc()? {
                    return Ok(Some(*base + local));
                }
            }
            self.current += 1;
        }
        Ok(None)
    }

    /// Advance to the first live doc >= `target` (global id).
    pub fn skip_to(&mut self, target: u32) -> Result<Option<u32>> {
        while self.current < self.parts.len() {
            let (base, cursor) = &mut self.parts[self.current];
            if let Some(cursor) = cursor {
                let local_target = target.saturating_sub(*base);
                if let Some(local) = cursor.skip_to(local_target)? {
                    return Ok(Some(*base + local));
                }
            }
            self.current += 1;
        }
        Ok(None)
    }

    /// Global doc id of the current posting.
    pub fn doc(&self) -> u32 {
        match self.parts.get(self.current) {
            Some((base, Some(cursor))) => base + cursor.doc(),
            _ => u32::MAX,
        }
    }

    /// Term frequency of the current posting.
    pub fn freq(&self) -> u32 {
        match self.parts.get(self.current) {
            Some((_, Some(cursor))) => cursor.freq(),
            _ => 0,
        }
    }

    /// Positions of the current posting.
    pub fn positions(&mut self) -> Result<Vec<u32>> {
        match self.parts.get_mut(self.current) {
            Some((_, Some(cursor))) => cursor.positions(),
            _ => Err(Error::InvalidArgument(
                "positions on exhausted cursor".into(),
            )),
        }
    }
}

// ============================================================================
// MultiTermsCursor
// ============================================================================

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TermsKey {
    field: String,
    text: String,
    source: usize,
}

/// Heap-merged terms stream across segments.
///
/// Yields each distinct `(field, text)` once with its summed dictionary
/// document frequency (deleted docs included, as in the dictionaries).
pub struct MultiTermsCursor {
    sources: Vec<(Arc<SegmentReader>, TermsCursor)>,
    heap: BinaryHeap<Reverse<TermsKey>>,
}

impl MultiTermsCursor {
    fn new(mut sources: Vec<(Arc<SegmentReader>, TermsCursor)>) -> Result<Self> {
        let mut heap = BinaryHeap::new();
        for (idx, (segment, cursor)) in sources.iter_mut().enumerate() {
            if cursor.next()? {
                heap.push(Reverse(Self::key(segment, cursor, idx)?));
            }
        }
        Ok(MultiTermsCursor { sources, heap })
    }

    /// Like `new`, but for cursors already positioned by a seek.
    fn new_seeked(sources: Vec<(Arc<SegmentReader>, TermsCursor)>) -> Result<Self> {
        let mut heap = BinaryHeap::new();
        for (idx, (segment, cursor)) in sources.iter().enumerate() {
            if cursor.is_valid() {
                heap.push(Reverse(Self::key(segment, cursor, idx)?));
            }
        }
        Ok(MultiTermsCursor { sources, heap })
    }

    fn key(segment: &SegmentReader, cursor: &TermsCursor, source: usize) -> Result<TermsKey> {
        let field = segment
            .field_infos()
            .name(cursor.field())
            .ok_or_else(|| Error::corrupt("term references unknown field ordinal"))?
            .to_string();
        Ok(TermsKey {
            field,
            text: cursor.text().to_string(),
            source,
        })
    }

    /// Next distinct term with its summed doc freq.
    pub fn next(&mut self) -> Result<Option<(Term, u32)>> {
        let Some(Reverse(top)) = self.heap.pop() else {
            return Ok(None);
        };
        let mut group = vec![top];
        while let Some(Reverse(peek)) = self.heap.peek() {
            if peek.field == group[0].field && peek.text == group[0].text {
                group.push(self.heap.pop().expect("peeked entry present").0);
            } else {
                break;
            }
        }
        let term = Term::new(group[0].field.clone(), group[0].text.clone());
        let mut doc_freq = 0;
        for key in group {
            let (segment, cursor) = &mut self.sources[key.source];
            doc_freq += cursor.info().doc_freq;
            if cursor.next()? {
                let key = Self::key(segment, cursor, key.source)?;
                self.heap.push(Reverse(key));
            }
        }
        Ok(Some((term, doc_freq)))
    }
}
