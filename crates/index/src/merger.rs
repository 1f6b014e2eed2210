//! Segment merger
//!
//! Folds k segments into one, dropping tombstoned docs and renumbering
//! the survivors by concatenation order. Term streams merge through a
//! min-heap keyed by `(mergedFieldOrd, term)`; equal keys drain
//! together, concatenating their postings through the doc-id maps.
//! Each source posting list is already sorted and the id maps preserve
//! order, so ascending doc ids come out without any global sort.
//!
//! Any failure unlinks the partial output; the inputs are untouched.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use lucerna_core::{Error, Result};
use lucerna_store::Directory;
use tracing::info;

use crate::field_infos::FieldInfos;
use crate::postings::PostingsWriter;
use crate::segment::SegmentReader;
use crate::segment_infos::{delete_segment_files, SegmentInfo};
use crate::stored::{StoredEntry, StoredFieldsWriter};
use crate::term_dict::{TermDictWriter, TermsCursor};

/// Heap key: merged field ordinal, term text, then source index so
/// equal terms drain in global segment order.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    field: u32,
    text: String,
    source: usize,
}

struct MergeSource {
    cursor: TermsCursor,
    /// source field ordinal → merged field ordinal
    field_map: Vec<u32>,
}

/// Merges segments `readers` (in global order) into segment `name`.
pub struct SegmentMerger<'a> {
    dir: &'a dyn Directory,
    name: String,
    readers: Vec<&'a SegmentReader>,
    index_interval: u32,
    skip_interval: u32,
}

impl<'a> SegmentMerger<'a> {
    /// Prepare a merge of `readers` into a segment called `name`.
    pub fn new(
        dir: &'a dyn Directory,
        name: impl Into<String>,
        readers: Vec<&'a SegmentReader>,
        index_interval: u32,
        skip_interval: u32,
    ) -> Self {
        SegmentMerger {
            dir,
            name: name.into(),
            readers,
            index_interval,
            skip_interval,
        }
    }

    /// Run the merge. On failure the partial output is unlinked and the
    /// error propagated; the input segments remain valid either way.
    pub fn merge(&self) -> Result<SegmentInfo> {
        match self.merge_inner() {
            Ok(info) => {
                info!(
                    target: "lucerna::index",
                    segment = %info.name,
                    sources = self.readers.len(),
                    docs = info.doc_count,
                    "merged segments"
                );
                Ok(info)
            }
            Err(e) => {
                delete_segment_files(self.dir, &self.name);
                Err(e)
            }
        }
    }

    fn merge_inner(&self) -> Result<SegmentInfo> {
        if self.readers.is_empty() {
            return Err(Error::InvalidArgument("merge of zero segments".into()));
        }

        // 1. merged field table: union of names, ordinals reassigned in
        // name order so the merged ordinal order agrees with every
        // name-sorted input stream
        let mut union: std::collections::BTreeMap<String, (bool, bool)> =
            std::collections::BTreeMap::new();
        for reader in &self.readers {
            for field in reader.field_infos().iter() {
                let entry = union.entry(field.name.clone()).or_default();
                entry.0 |= field.indexed;
                entry.1 |= field.store_term_vector;
            }
        }
        let mut merged_infos = FieldInfos::new();
        for (name, (indexed, store_term_vector)) in &union {
            merged_infos.add(name, *indexed, *store_term_vector);
        }

        // 2. doc-id maps that skip deletions
        let mut doc_maps: Vec<Vec<Option<u32>>> = Vec::with_capacity(self.readers.len());
        let mut next_id = 0u32;
        for reader in &self.readers {
            let mut map = Vec::with_capacity(reader.max_doc() as usize);
            for local in 0..reader.max_doc() {
                if reader.is_deleted(local) {
                    map.push(None);
                } else {
                    map.push(Some(next_id));
                    next_id += 1;
                }
            }
            doc_maps.push(map);
        }
        let doc_count = next_id;

        // 3. stored fields, rewritten through the merged field table
        let mut stored = StoredFieldsWriter::new(self.dir, &self.name)?;
        for (reader, map) in self.readers.iter().zip(&doc_maps) {
            for local in 0..reader.max_doc() {
                if map[local as usize].is_none() {
                    continue;
                }
                let entries: Vec<StoredEntry> = reader
                    .stored_raw(local)?
                    .into_iter()
                    .map(|entry| {
                        let name = reader
                            .field_infos()
                            .name(entry.field)
                            .ok_or_else(|| Error::corrupt("stored field not in .fnm"))?;
                        let field = merged_infos
                            .number(name)
                            .ok_or_else(|| Error::corrupt("merged field table missing name"))?;
                        Ok(StoredEntry { field, ..entry })
                    })
                    .collect::<Result<_>>()?;
                stored.add_doc(&entries)?;
            }
        }
        stored.close()?;

        // 4. term dictionaries and postings through the heap
        self.merge_terms(&merged_infos, &doc_maps)?;

        // 5. norms in the new doc order, zero-filled where a source
        // segment never saw the field
        for field in merged_infos.iter().filter(|f| f.has_norms()) {
            let mut bytes = Vec::with_capacity(doc_count as usize);
            for (reader, map) in self.readers.iter().zip(&doc_maps) {
                let source = reader
                    .field_infos()
                    .number(&field.name)
                    .and_then(|ord| reader.norms_bytes(ord));
                for local in 0..reader.max_doc() {
                    if map[local as usize].is_some() {
                        bytes.push(source.map_or(0, |n| n[local as usize]));
                    }
                }
            }
            let mut out = self
                .dir
                .create_output(&format!("{}.f{}", self.name, field.number))?;
            out.write_bytes(&bytes)?;
            out.close()?;
        }

        // 6. merged field table
        merged_infos.write(self.dir, &self.name)?;

        Ok(SegmentInfo {
            name: self.name.clone(),
            doc_count,
            del_gen: -1,
        })
    }

    fn merge_terms(
        &self,
        merged_infos: &FieldInfos,
        doc_maps: &[Vec<Option<u32>>],
    ) -> Result<()> {
        let mut postings = PostingsWriter::new(self.dir, &self.name, self.skip_interval)?;
        let mut dict =
            TermDictWriter::new(self.dir, &self.name, self.index_interval, self.skip_interval)?;

        let mut sources = Vec::with_capacity(self.readers.len());
        let mut heap: BinaryHeap<Reverse<HeapKey>> = BinaryHeap::new();
        for (idx, reader) in self.readers.iter().enumerate() {
            let field_map: Vec<u32> = reader
                .field_infos()
                .iter()
                .map(|f| {
                    merged_infos
                        .number(&f.name)
                        .ok_or_else(|| Error::corrupt("merged field table missing name"))
                })
                .collect::<Result<_>>()?;
            let mut cursor = reader.terms()?;
            if cursor.next()? {
                heap.push(Reverse(HeapKey {
                    field: field_map[cursor.field() as usize],
                    text: cursor.text().to_string(),
                    source: idx,
                }));
            }
            sources.push(MergeSource { cursor, field_map });
        }

        while let Some(Reverse(top)) = heap.pop() {
            // drain every source positioned on the same (field, term)
            let mut group = vec![top];
            while let Some(Reverse(peek)) = heap.peek() {
                if peek.field == group[0].field && peek.text == group[0].text {
                    group.push(heap.pop().expect("peeked entry present").0);
                } else {
                    break;
                }
            }

            postings.start_term();
            let mut doc_freq = 0u32;
            for key in &group {
                let source = &mut sources[key.source];
                let info = source.cursor.info();
                let mut cursor = self.readers[key.source].raw_postings(info, true)?;
                while let Some(local) = cursor.next_doc()? {
                    if let Some(new_doc) = doc_maps[key.source][local as usize] {
                        let positions = cursor.positions()?;
                        postings.add_doc(new_doc, &positions)?;
                        doc_freq += 1;
                    }
                }
            }
            let info = postings.end_term()?;
            if doc_freq > 0 {
                dict.add(group[0].field, &group[0].text, &info)?;
            }

            for key in group {
                let source = &mut sources[key.source];
                if source.cursor.next()? {
                    heap.push(Reverse(HeapKey {
                        field: source.field_map[source.cursor.field() as usize],
                        text: source.cursor.text().to_string(),
                        source: key.source,
                    }));
                }
            }
        }

        postings.close()?;
        dict.close()
    }
}

/// Convenience used by tests: merge buffered segments written with
/// `segment_writer::write_segment`.
#[cfg(test)]
pub(crate) fn write_test_segment(
    dir: &dyn Directory,
    name: &str,
    texts: &[&str],
) -> Result<SegmentReader> {
    use lucerna_core::{Document, Field, SimpleAnalyzer};

    let mut buffered = crate::buffered::BufferedSegment::new();
    for text in texts {
        let mut doc = Document::new();
        doc.add(Field::text("body", *text));
        buffered.add_document(&doc, &SimpleAnalyzer)?;
    }
    let info = crate::segment_writer::write_segment(dir, name, &buffered, 128, 16)?;
    SegmentReader::open(dir, &info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_writer;
    use lucerna_core::{Document, Field, SimpleAnalyzer, Term};
    use lucerna_store::RamDirectory;

    fn collect_docs(reader: &SegmentReader, term: &Term) -> Vec<u32> {
        let mut docs = Vec::new();
        if let Some(mut postings) = reader.term_docs(term, false).unwrap() {
            while let Some(d) = postings.next_doc().unwrap() {
                docs.push(d);
            }
        }
        docs
    }

    #[test]
    fn test_merge_concatenates_and_renumbers() {
        let dir = RamDirectory::new();
        let a = write_test_segment(&dir, "_0", &["apple banana", "banana"]).unwrap();
        let b = write_test_segment(&dir, "_1", &["apple", "cherry apple"]).unwrap();

        let merger = SegmentMerger::new(&dir, "_2", vec![&a, &b], 128, 16);
        let info = merger.merge().unwrap();
        assert_eq!(info.doc_count, 4);

        let merged = SegmentReader::open(&dir, &info).unwrap();
        assert_eq!(collect_docs(&merged, &Term::new("body", "apple")), vec![0, 2, 3]);
        assert_eq!(collect_docs(&merged, &Term::new("body", "banana")), vec![0, 1]);
        assert_eq!(collect_docs(&merged, &Term::new("body", "cherry")), vec![3]);

        // stored fields follow the renumbering
        assert_eq!(merged.document(2).unwrap().get("body").unwrap(), "apple");
        assert_eq!(
            merged.document(3).unwrap().get("body").unwrap(),
            "cherry apple"
        );
    }

    #[test]
    fn test_merge_drops_deleted_docs() {
        let dir = RamDirectory::new();
        let a = write_test_segment(&dir, "_0", &["one shared", "two shared", "three"]).unwrap();
        let b = write_test_segment(&dir, "_1", &["four shared"]).unwrap();
        a.delete_doc(1).unwrap();

        let merger = SegmentMerger::new(&dir, "_2", vec![&a, &b], 128, 16);
        let info = merger.merge().unwrap();
        assert_eq!(info.doc_count, 3);

        let merged = SegmentReader::open(&dir, &info).unwrap();
        assert!(!merged.has_deletions());
        // "two" vanished with its doc; survivors renumbered 0,1,2
        assert!(collect_docs(&merged, &Term::new("body", "two")).is_empty());
        assert_eq!(collect_docs(&merged, &Term::new("body", "shared")), vec![0, 2]);
        assert_eq!(merged.document(1).unwrap().get("body").unwrap(), "three");

        // dictionary docFreq equals the surviving posting count
        let shared = merged
            .term_info(&Term::new("body", "shared"))
            .unwrap()
            .unwrap();
        assert_eq!(shared.doc_freq, 2);
    }

    #[test]
    fn test_merge_unions_field_tables() {
        let dir = RamDirectory::new();

        let mut buffered = crate::buffered::BufferedSegment::new();
        let mut doc = Document::new();
        doc.add(Field::text("title", "alpha"));
        buffered.add_document(&doc, &SimpleAnalyzer).unwrap();
        let info_a = segment_writer::write_segment(&dir, "_0", &buffered, 128, 16).unwrap();
        let a = SegmentReader::open(&dir, &info_a).unwrap();

        let mut buffered = crate::buffered::BufferedSegment::new();
        let mut doc = Document::new();
        doc.add(Field::text("body", "beta"));
        doc.add(Field::text("title", "gamma"));
        buffered.add_document(&doc, &SimpleAnalyzer).unwrap();
        let info_b = segment_writer::write_segment(&dir, "_1", &buffered, 128, 16).unwrap();
        let b = SegmentReader::open(&dir, &info_b).unwrap();

        let info = SegmentMerger::new(&dir, "_2", vec![&a, &b], 128, 16)
            .merge()
            .unwrap();
        let merged = SegmentReader::open(&dir, &info).unwrap();

        assert_eq!(collect_docs(&merged, &Term::new("title", "alpha")), vec![0]);
        assert_eq!(collect_docs(&merged, &Term::new("title", "gamma")), vec![1]);
        assert_eq!(collect_docs(&merged, &Term::new("body", "beta")), vec![1]);

        // norms: doc 0 never had a body field
        assert_eq!(merged.norm(0, "body"), 0);
        assert!(merged.norm(1, "body") > 0);
        assert!(merged.norm(0, "title") > 0);
    }

    #[test]
    fn test_merge_preserves_positions() {
        let dir = RamDirectory::new();
        let a = write_test_segment(&dir, "_0", &["w x w"]).unwrap();
        let b = write_test_segment(&dir, "_1", &["y w"]).unwrap();

        let info = SegmentMerger::new(&dir, "_2", vec![&a, &b], 128, 16)
            .merge()
            .unwrap();
        let merged = SegmentReader::open(&dir, &info).unwrap();

        let mut postings = merged
            .term_docs(&Term::new("body", "w"), true)
            .unwrap()
            .unwrap();
        assert_eq!(postings.next_doc().unwrap(), Some(0));
        assert_eq!(postings.positions().unwrap(), vec![0, 2]);
        assert_eq!(postings.next_doc().unwrap(), Some(1));
        assert_eq!(postings.positions().unwrap(), vec![1]);
    }

    #[test]
    fn test_single_segment_merge_compacts_deletions() {
        let dir = RamDirectory::new();
        let a = write_test_segment(&dir, "_0", &["a", "b", "c"]).unwrap();
        a.delete_doc(0).unwrap();
        a.delete_doc(2).unwrap();

        let info = SegmentMerger::new(&dir, "_1", vec![&a], 128, 16)
            .merge()
            .unwrap();
        assert_eq!(info.doc_count, 1);
        let merged = SegmentReader::open(&dir, &info).unwrap();
        assert_eq!(merged.document(0).unwrap().get("body").unwrap(), "b");
    }
}
