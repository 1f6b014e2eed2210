//! Posting streams (.frq / .prx)
//!
//! The frequency stream holds, per term, delta-coded doc ids with
//! frequencies folded into the low bit; the position stream holds, per
//! document, `freq` delta-coded positions. A sparse skip list is
//! appended to the frequency stream after each long posting list.
//!
//! ## Encoding
//!
//! ```text
//! .frq per posting:
//!   docDelta << 1 | (freq == 1)     VInt
//!   freq                            VInt, only if low bit clear
//! .frq skip region (after a term's postings, if docFreq >= skipInterval):
//!   per skipInterval postings:
//!     docDelta                      VInt   (from previous skip entry)
//!     freqPtrDelta                  VLong
//!     proxPtrDelta                  VLong
//! .prx per document:
//!   freq position deltas            VInt each
//! ```

use std::sync::Arc;

use lucerna_core::{Error, Result};
use lucerna_store::{Directory, IndexInput, IndexOutput};

use crate::bitvector::BitVector;
use crate::term_dict::TermInfo;

#[derive(Debug, Clone, Copy)]
struct SkipPoint {
    doc: u32,
    freq_ptr: u64,
    prox_ptr: u64,
}

// ============================================================================
// PostingsWriter
// ============================================================================

/// Writes the .frq and .prx streams of one segment, term by term.
///
/// Call order per term: `start_term`, `add_doc` in ascending doc order,
/// `end_term` (which returns the dictionary entry for the term).
pub struct PostingsWriter {
    freq_out: IndexOutput,
    prox_out: IndexOutput,
    skip_interval: u32,
    // per-term state
    freq_start: u64,
    prox_start: u64,
    last_doc: u32,
    doc_freq: u32,
    skip_points: Vec<SkipPoint>,
}

impl PostingsWriter {
    /// Create the posting streams for `segment`.
    pub fn new(dir: &dyn Directory, segment: &str, skip_interval: u32) -> Result<Self> {
        Ok(PostingsWriter {
            freq_out: dir.create_output(&format!("{}.frq", segment))?,
            prox_out: dir.create_output(&format!("{}.prx", segment))?,
            skip_interval,
            freq_start: 0,
            prox_start: 0,
            last_doc: 0,
            doc_freq: 0,
            skip_points: Vec::new(),
        })
    }

    /// Begin a new term.
    pub fn start_term(&mut self) {
        self.freq_start = self.freq_out.tell();
        self.prox_start = self.prox_out.tell();
        self.last_doc = 0;
        self.doc_freq = 0;
        self.skip_points.clear();
    }

    /// Append one posting. `positions` must be ascending and non-empty.
    pub fn add_doc(&mut self, doc: u32, positions: &[u32]) -> Result<()> {
        if positions.is_empty() {
            return Err(Error::InvalidArgument("posting with no positions".into()));
        }
        if self.doc_freq > 0 && doc <= self.last_doc {
            return Err(Error::corrupt(format!(
                "postings out of order: doc {} after {}",
                doc, self.last_doc
            )));
        }
        let delta = doc - self.last_doc;
        let freq = positions.len() as u32;
        if freq == 1 {
            self.freq_out.write_vint(delta << 1 | 1)?;
        } else {
            self.freq_out.write_vint(delta << 1)?;
            self.freq_out.write_vint(freq)?;
        }
        let mut last_pos = 0u32;
        for &pos in positions {
            debug_assert!(pos >= last_pos || last_pos == 0);
            self.prox_out.write_vint(pos - last_pos)?;
            last_pos = pos;
        }
        self.last_doc = doc;
        self.doc_freq += 1;
        if self.doc_freq % self.skip_interval == 0 {
            self.skip_points.push(SkipPoint {
                doc,
                freq_ptr: self.freq_out.tell(),
                prox_ptr: self.prox_out.tell(),
            });
        }
        Ok(())
    }

    /// Finish the term: append the skip region and return its
    /// dictionary entry.
    pub fn end_term(&mut self) -> Result<TermInfo> {
        let mut skip_offset = 0u32;
        if self.doc_freq >= self.skip_interval {
            let skip_start = self.freq_out.tell();
            let mut prev = SkipPoint {
                doc: 0,
                freq_ptr: self.freq_start,
                prox_ptr: self.prox_start,
            };
            for point in &self.skip_points {
                self.freq_out.write_vint(point.doc - prev.doc)?;
                self.freq_out.write_vlong(point.freq_ptr - prev.freq_ptr)?;
                self.freq_out.write_vlong(point.prox_ptr - prev.prox_ptr)?;
                prev = *point;
            }
            skip_offset = (skip_start - self.freq_start) as u32;
        }
        Ok(TermInfo {
            doc_freq: self.doc_freq,
            freq_pointer: self.freq_start,
            prox_pointer: self.prox_start,
            skip_offset,
        })
    }

    /// Close both streams.
    pub fn close(self) -> Result<()> {
        self.freq_out.close()?;
        self.prox_out.close()
    }
}

// ============================================================================
// SegmentPostings
// ============================================================================

/// Cursor over one term's postings within one segment.
///
/// Deleted documents are silently dropped when a deletion snapshot is
/// attached; the merger reads raw. Positions are decoded lazily, so a
/// consumer that never asks for them pays only the stream advance.
pub struct SegmentPostings {
    freq_in: IndexInput,
    prox_in: Option<IndexInput>,
    deletions: Option<Arc<BitVector>>,
    skip_interval: u32,
    info: TermInfo,
    count: u32,
    doc: u32,
    freq: u32,
    pending_positions: u32,
    skip_entries: Option<Vec<SkipPoint>>,
}

impl SegmentPostings {
    /// Open a cursor at a term's posting list.
    ///
    /// `freq_in` / `prox_in` are master clones of the segment's streams;
    /// the cursor seeks them to the term's pointers.
    pub fn open(
        mut freq_in: IndexInput,
        prox_in: Option<IndexInput>,
        info: TermInfo,
        deletions: Option<Arc<BitVector>>,
        skip_interval: u32,
    ) -> Result<Self> {
        freq_in.seek(info.freq_pointer)?;
        let prox_in = match prox_in {
            Some(mut p) => {
                p.seek(info.prox_pointer)?;
                Some(p)
            }
            None => None,
        };
        Ok(SegmentPostings {
            freq_in,
            prox_in,
            deletions,
            skip_interval,
            info,
            count: 0,
            doc: 0,
            freq: 0,
            pending_positions: 0,
            skip_entries: None,
        })
    }

    /// Doc id of the current posting.
    pub fn doc(&self) -> u32 {
        self.doc
    }

    /// Term frequency of the current posting.
    pub fn freq(&self) -> u32 {
        self.freq
    }

    fn drain_pending_positions(&mut self) -> Result<()> {
        if let Some(prox) = &mut self.prox_in {
            for _ in 0..self.pending_positions {
                prox.read_vint()?;
            }
        }
        self.pending_positions = 0;
        Ok(())
    }

    /// Advance to the next live document; `None` when exhausted.
    pub fn next_doc(&mut self) -> Result<Option<u32>> {
        loop {
            if self.count >= self.info.doc_freq {
                return Ok(None);
            }
            self.drain_pending_positions()?;
            let code = self.freq_in.read_vint()?;
            self.doc += code >> 1;
            self.freq = if code & 1 == 1 {
                1
            } else {
                self.freq_in.read_vint()?
            };
            self.count += 1;
            self.pending_positions = if self.prox_in.is_some() { self.freq } else { 0 };
            if let Some(del) = &self.deletions {
                if del.get(self.doc) {
                    continue;
                }
            }
            return Ok(Some(self.doc));
        }
    }

    /// Advance to the first live document with id >= `target`.
    ///
    /// Consults the skip region to jump over whole runs of postings,
    /// then scans linearly.
    pub fn skip_to(&mut self, target: u32) -> Result<Option<u32>> {
        if self.count > 0 && self.doc >= target {
            // current posting may itself have been a deleted doc the
            // caller never saw; only a live current counts
            if self
                .deletions
                .as_ref()
                .map_or(true, |del| !del.get(self.doc))
            {
                return Ok(Some(self.doc));
            }
        }
        if self.info.doc_freq >= self.skip_interval {
            self.load_skip_entries()?;
            let entries = self.skip_entries.as_ref().map(|e| e.as_slice()).unwrap_or(&[]);
            let mut best: Option<usize> = None;
            for (k, entry) in entries.iter().enumerate() {
                let consumed = (k as u32 + 1) * self.skip_interval;
                if entry.doc < target && consumed > self.count {
                    best = Some(k);
                }
            }
            if let Some(k) = best {
                let entry = entries[k];
                self.freq_in.seek(entry.freq_ptr)?;
                if let Some(prox) = &mut self.prox_in {
                    prox.seek(entry.prox_ptr)?;
                }
                self.doc = entry.doc;
                self.count = (k as u32 + 1) * self.skip_interval;
                self.pending_positions = 0;
            }
        }
        while let Some(doc) = self.next_doc()? {
            if doc >= target {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    fn load_skip_entries(&mut self) -> Result<()> {
        if self.skip_entries.is_some() {
            return Ok(());
        }
        let mut skip_in = self.freq_in.clone();
        skip_in.seek(self.info.freq_pointer + self.info.skip_offset as u64)?;
        let n = (self.info.doc_freq / self.skip_interval) as usize;
        let mut entries = Vec::with_capacity(n);
        let mut prev = SkipPoint {
            doc: 0,
            freq_ptr: self.info.freq_pointer,
            prox_ptr: self.info.prox_pointer,
        };
        for _ in 0..n {
            let point = SkipPoint {
                doc: prev.doc + skip_in.read_vint()?,
                freq_ptr: prev.freq_ptr + skip_in.read_vlong()?,
                prox_ptr: prev.prox_ptr + skip_in.read_vlong()?,
            };
            entries.push(point);
            prev = point;
        }
        self.skip_entries = Some(entries);
        Ok(())
    }

    /// Positions of the current posting, in ascending order.
    ///
    /// Must be called at most once per posting, before the next advance.
    pub fn positions(&mut self) -> Result<Vec<u32>> {
        let prox = self
            .prox_in
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument("postings opened without positions".into()))?;
        let mut positions = Vec::with_capacity(self.pending_positions as usize);
        let mut pos = 0u32;
        for _ in 0..self.pending_positions {
            pos += prox.read_vint()?;
            positions.push(pos);
        }
        self.pending_positions = 0;
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucerna_store::RamDirectory;

    const SKIP_INTERVAL: u32 = 16;

    /// Write one term with the given (doc, positions) postings and
    /// reopen a cursor over it.
    fn write_and_open(
        dir: &RamDirectory,
        postings: &[(u32, Vec<u32>)],
        with_positions: bool,
        deletions: Option<Arc<BitVector>>,
    ) -> SegmentPostings {
        let mut writer = PostingsWriter::new(dir, "_t", SKIP_INTERVAL).unwrap();
        writer.start_term();
        for (doc, positions) in postings {
            writer.add_doc(*doc, positions).unwrap();
        }
        let info = writer.end_term().unwrap();
        writer.close().unwrap();

        let freq_in = dir.open_input("_t.frq").unwrap();
        let prox_in = if with_positions {
            Some(dir.open_input("_t.prx").unwrap())
        } else {
            None
        };
        SegmentPostings::open(freq_in, prox_in, info, deletions, SKIP_INTERVAL).unwrap()
    }

    #[test]
    fn test_roundtrip_docs_freqs_positions() {
        let dir = RamDirectory::new();
        let postings = vec![
            (0u32, vec![1u32, 5, 9]),
            (3, vec![0]),
            (7, vec![2, 4]),
        ];
        let mut cursor = write_and_open(&dir, &postings, true, None);

        for (doc, positions) in &postings {
            assert_eq!(cursor.next_doc().unwrap(), Some(*doc));
            assert_eq!(cursor.freq(), positions.len() as u32);
            assert_eq!(&cursor.positions().unwrap(), positions);
        }
        assert_eq!(cursor.next_doc().unwrap(), None);
    }

    #[test]
    fn test_lazy_positions_stay_aligned() {
        let dir = RamDirectory::new();
        let postings = vec![
            (1u32, vec![4u32, 8]),
            (2, vec![1, 2, 3]),
            (9, vec![7]),
        ];
        let mut cursor = write_and_open(&dir, &postings, true, None);

        // Skip positions of the first two docs entirely
        cursor.next_doc().unwrap();
        cursor.next_doc().unwrap();
        assert_eq!(cursor.next_doc().unwrap(), Some(9));
        assert_eq!(cursor.positions().unwrap(), vec![7]);
    }

    #[test]
    fn test_deletions_are_dropped() {
        let dir = RamDirectory::new();
        let postings: Vec<(u32, Vec<u32>)> =
            (0..6).map(|d| (d * 2, vec![0u32])).collect();
        let mut del = BitVector::new(11);
        del.set(4);
        del.set(8);
        let mut cursor = write_and_open(&dir, &postings, false, Some(Arc::new(del)));

        let mut docs = Vec::new();
        while let Some(d) = cursor.next_doc().unwrap() {
            docs.push(d);
        }
        assert_eq!(docs, vec![0, 2, 6, 10]);
    }

    #[test]
    fn test_skip_to_with_skip_list() {
        let dir = RamDirectory::new();
        // 100 postings at even doc ids: several skip entries
        let postings: Vec<(u32, Vec<u32>)> =
            (0..100).map(|d| (d * 2, vec![d])).collect();
        let mut cursor = write_and_open(&dir, &postings, true, None);

        assert_eq!(cursor.skip_to(91).unwrap(), Some(92));
        assert_eq!(cursor.positions().unwrap(), vec![46]);
        // Forward-only: earlier targets return the current doc
        assert_eq!(cursor.skip_to(10).unwrap(), Some(92));
        assert_eq!(cursor.skip_to(180).unwrap(), Some(180));
        assert_eq!(cursor.skip_to(199).unwrap(), None);
    }

    #[test]
    fn test_skip_to_exact_hit_on_skip_boundary() {
        let dir = RamDirectory::new();
        let postings: Vec<(u32, Vec<u32>)> =
            (0..64).map(|d| (d, vec![0u32])).collect();
        let mut cursor = write_and_open(&dir, &postings, false, None);

        // Doc 31 is the 32nd posting, exactly two skip intervals in
        assert_eq!(cursor.skip_to(31).unwrap(), Some(31));
    }

    #[test]
    fn test_skip_to_without_skip_list() {
        let dir = RamDirectory::new();
        let postings: Vec<(u32, Vec<u32>)> =
            (0..5).map(|d| (d * 3, vec![0u32])).collect();
        let mut cursor = write_and_open(&dir, &postings, false, None);

        assert_eq!(cursor.skip_to(7).unwrap(), Some(9));
        assert_eq!(cursor.next_doc().unwrap(), Some(12));
    }

    #[test]
    fn test_out_of_order_docs_rejected() {
        let dir = RamDirectory::new();
        let mut writer = PostingsWriter::new(&dir, "_t", SKIP_INTERVAL).unwrap();
        writer.start_term();
        writer.add_doc(5, &[0]).unwrap();
        assert!(writer.add_doc(5, &[0]).is_err());
        assert!(writer.add_doc(3, &[0]).is_err());
    }

    #[test]
    fn test_multiple_terms_share_streams() {
        let dir = RamDirectory::new();
        let mut writer = PostingsWriter::new(&dir, "_t", SKIP_INTERVAL).unwrap();

        writer.start_term();
        writer.add_doc(1, &[0]).unwrap();
        let info_a = writer.end_term().unwrap();

        writer.start_term();
        writer.add_doc(0, &[3, 4]).unwrap();
        writer.add_doc(2, &[1]).unwrap();
        let info_b = writer.end_term().unwrap();
        writer.close().unwrap();

        assert_eq!(info_a.doc_freq, 1);
        assert_eq!(info_b.doc_freq, 2);
        assert!(info_b.freq_pointer > info_a.freq_pointer);

        let freq_in = dir.open_input("_t.frq").unwrap();
        let prox_in = dir.open_input("_t.prx").unwrap();
        let mut b = SegmentPostings::open(
            freq_in,
            Some(prox_in),
            info_b,
            None,
            SKIP_INTERVAL,
        )
        .unwrap();
        assert_eq!(b.next_doc().unwrap(), Some(0));
        assert_eq!(b.positions().unwrap(), vec![3, 4]);
        assert_eq!(b.next_doc().unwrap(), Some(2));
    }
}
