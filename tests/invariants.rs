//! Index-wide invariants
//!
//! Each test pins one structural property of the engine: doc
//! accounting, dictionary/postings agreement, roundtrip fidelity,
//! merge preservation, commit atomicity, idempotence, and the scope
//! of undelete.

use std::collections::BTreeMap;
use std::sync::Arc;

use lucerna::{Directory, Document, Field, Index, IndexReader, Query, RamDirectory, Term};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn doc_with(field: &str, text: &str) -> Document {
    let mut doc = Document::new();
    doc.add(Field::text(field, text));
    doc
}

fn ram_index() -> (Arc<dyn Directory>, Index) {
    let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
    let index = Index::create(Arc::clone(&dir)).unwrap();
    (dir, index)
}

/// numDocs + deletedDocs == maxDoc == sum of segment maxDocs.
#[test]
fn test_doc_accounting() {
    let (_dir, mut index) = ram_index();
    index.set_max_buffered_docs(3);
    for i in 0..10 {
        index
            .add_document(&doc_with("body", &format!("word{} filler", i)))
            .unwrap();
    }
    index.commit().unwrap();
    index.delete(2u32).unwrap();
    index.delete(7u32).unwrap();

    let reader = index.reader();
    let segment_total: u32 = reader.segment_readers().iter().map(|s| s.max_doc()).sum();
    assert_eq!(index.max_doc(), 10);
    assert_eq!(segment_total, 10);
    assert_eq!(index.num_docs() + reader.deleted_docs(), index.max_doc());
    assert_eq!(index.num_docs(), 8);
}

/// docFreq(t) equals the length of termDocs(t), with and without
/// deletions in play.
#[test]
fn test_doc_freq_matches_term_docs() {
    let (_dir, mut index) = ram_index();
    for text in ["apple pie", "apple tart", "apple apple crumble", "banana"] {
        index.add_document(&doc_with("body", text)).unwrap();
    }
    index.commit().unwrap();

    let apple = Term::new("body", "apple");
    assert_eq!(
        index.doc_freq(&apple).unwrap() as usize,
        index.term_docs(&apple).unwrap().len()
    );

    index.delete(0u32).unwrap();
    assert_eq!(index.doc_freq(&apple).unwrap(), 2);
    assert_eq!(
        index.doc_freq(&apple).unwrap() as usize,
        index.term_docs(&apple).unwrap().len()
    );
}

/// termPositions(t)[d] has exactly termFreqs(t)[d] entries.
#[test]
fn test_positions_agree_with_freqs() {
    let (_dir, mut index) = ram_index();
    index
        .add_document(&doc_with("body", "echo echo echo delta"))
        .unwrap();
    index.add_document(&doc_with("body", "delta echo")).unwrap();
    index.commit().unwrap();

    for term_text in ["echo", "delta"] {
        let term = Term::new("body", term_text);
        let freqs: BTreeMap<u32, u32> = index.term_freqs(&term).unwrap().into_iter().collect();
        for (doc, positions) in index.term_positions(&term).unwrap() {
            assert_eq!(
                positions.len() as u32,
                freqs[&doc],
                "term {} doc {}",
                term_text,
                doc
            );
        }
    }
}

/// Writing then reopening reproduces the term set, postings,
/// positions, norms and stored fields byte-for-byte.
#[test]
fn test_index_roundtrip_through_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let texts = [
        "the quick brown fox jumps",
        "pack my box with five dozen jugs",
        "quick zephyrs blow vexing daft jim",
    ];
    {
        let mut index = Index::create_in(tmp.path()).unwrap();
        for text in &texts {
            index.add_document(&doc_with("body", text)).unwrap();
        }
        index.commit().unwrap();
    }

    let original = Index::open_in(tmp.path()).unwrap();
    let mut expected_terms = Vec::new();
    {
        let mut cursor = original.terms().unwrap();
        while let Some((term, df)) = cursor.next().unwrap() {
            expected_terms.push((term, df));
        }
    }
    assert!(expected_terms.len() >= 15);

    // a second open must agree on everything observable
    drop(original);
    let reopened = Index::open_in(tmp.path()).unwrap();
    let mut seen_terms = Vec::new();
    let mut cursor = reopened.terms().unwrap();
    while let Some((term, df)) = cursor.next().unwrap() {
        seen_terms.push((term, df));
    }
    assert_eq!(seen_terms, expected_terms);

    for (term, df) in &seen_terms {
        assert_eq!(reopened.doc_freq(term).unwrap(), *df);
        for (doc, positions) in reopened.term_positions(term).unwrap() {
            assert!(!positions.is_empty());
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
            let _ = doc;
        }
    }
    for (i, text) in texts.iter().enumerate() {
        assert_eq!(
            reopened.document(i as u32).unwrap().get("body").unwrap(),
            *text
        );
        assert!(reopened.norm(i as u32, "body").unwrap() > 0.0);
    }
}

/// Merging preserves exactly the live postings of the inputs.
#[test]
fn test_merge_preserves_live_postings() {
    let (_dir, mut index) = ram_index();
    index.set_max_buffered_docs(2);

    let mut rng = StdRng::seed_from_u64(42);
    let vocab = ["red", "green", "blue", "cyan", "plum"];
    let mut texts = Vec::new();
    for _ in 0..12 {
        let words: Vec<&str> = (0..4)
            .map(|_| vocab[rng.gen_range(0..vocab.len())])
            .collect();
        texts.push(words.join(" "));
    }
    for text in &texts {
        index.add_document(&doc_with("body", text)).unwrap();
    }
    index.commit().unwrap();
    index.delete(3u32).unwrap();
    index.delete(8u32).unwrap();

    // expected live docs per term, renumbered by skipping deletions
    let mut remap = Vec::new();
    let mut next = 0u32;
    for i in 0..texts.len() as u32 {
        if i == 3 || i == 8 {
            remap.push(None);
        } else {
            remap.push(Some(next));
            next += 1;
        }
    }
    let mut expected: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for (i, text) in texts.iter().enumerate() {
        if let Some(new_id) = remap[i] {
            for word in vocab {
                if text.split(' ').any(|w| w == word) {
                    let docs = expected.entry(word).or_default();
                    if docs.last() != Some(&new_id) {
                        docs.push(new_id);
                    }
                }
            }
        }
    }

    index.optimize().unwrap();
    assert_eq!(index.reader().segment_readers().len(), 1);
    assert!(!index.has_deletions());
    assert_eq!(index.num_docs(), 10);

    for word in vocab {
        let docs = index.term_docs(&Term::new("body", word)).unwrap();
        assert_eq!(
            docs,
            expected.get(word).cloned().unwrap_or_default(),
            "term {}",
            word
        );
    }
}

/// A reader opened after a crash between flush and the manifest
/// rename sees the previous commit, untouched.
#[test]
fn test_commit_atomicity_at_crash_point() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut index = Index::create_in(tmp.path()).unwrap();
        index.add_document(&doc_with("body", "committed")).unwrap();
        index.commit().unwrap();

        // crash point: segment files flushed, manifest never renamed
        index.add_document(&doc_with("body", "orphaned")).unwrap();
        index.flush().unwrap();
        // the handle drops without committing, as a crash would
    }

    let dir = lucerna::FsDirectory::open(tmp.path()).unwrap();
    let reader = IndexReader::open(&dir).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(
        reader.document(0).unwrap().get("body").unwrap(),
        "committed"
    );

    // a writer reopened after the crash recovers and carries on
    let mut recovered = Index::open_in(tmp.path()).unwrap();
    assert_eq!(recovered.num_docs(), 1);
    recovered.add_document(&doc_with("body", "fresh")).unwrap();
    recovered.commit().unwrap();
    assert_eq!(recovered.num_docs(), 2);
    assert!(recovered
        .find(&Query::term("body", "orphaned"))
        .unwrap()
        .is_empty());
}

/// optimize twice equals optimize once; commit twice equals commit
/// once. The generation only moves when something changed.
#[test]
fn test_idempotence_of_optimize_and_commit() {
    let (_dir, mut index) = ram_index();
    index.set_max_buffered_docs(1);
    for i in 0..5 {
        index
            .add_document(&doc_with("body", &format!("text {}", i)))
            .unwrap();
    }
    index.commit().unwrap();

    index.optimize().unwrap();
    let generation = index.reader().generation();
    let docs_after = index.num_docs();

    index.optimize().unwrap();
    assert_eq!(index.reader().generation(), generation);
    assert_eq!(index.num_docs(), docs_after);
    assert_eq!(index.reader().segment_readers().len(), 1);

    index.commit().unwrap();
    assert_eq!(index.reader().generation(), generation);
}

/// undeleteAll restores exactly the tombstones added since the last
/// commit; previously committed deletions stay.
#[test]
fn test_undelete_scope() {
    let (_dir, mut index) = ram_index();
    for text in ["one", "two", "three"] {
        index.add_document(&doc_with("body", text)).unwrap();
    }
    index.commit().unwrap();

    index.delete(0u32).unwrap();
    index.commit().unwrap();
    assert_eq!(index.num_docs(), 2);

    index.delete(1u32).unwrap();
    assert_eq!(index.num_docs(), 1);

    index.undelete_all().unwrap();
    assert_eq!(index.num_docs(), 2);
    assert!(index.is_deleted(0u32).unwrap());
    assert!(!index.is_deleted(1u32).unwrap());
}

/// The deletion pass removes superseded files but never files pinned
/// by a live snapshot.
#[test]
fn test_file_deletion_respects_pinned_readers() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = Index::create_in(tmp.path()).unwrap();
    index.set_max_buffered_docs(1);
    index.set_merge_factor(2);

    index.add_document(&doc_with("body", "aaa")).unwrap();
    index.commit().unwrap();
    let snapshot = index.reader();
    let pinned_files: Vec<String> = index
        .reader()
        .segment_readers()
        .iter()
        .flat_map(|s| s.files())
        .collect();

    // merges obsolete the first segment
    for text in ["bbb", "ccc", "ddd"] {
        index.add_document(&doc_with("body", text)).unwrap();
        index.commit().unwrap();
    }

    for file in &pinned_files {
        assert!(
            tmp.path().join(file).exists(),
            "pinned file {} deleted",
            file
        );
    }
    assert_eq!(snapshot.num_docs(), 1);

    // once the snapshot drops, the next pass reclaims its files
    drop(snapshot);
    index.add_document(&doc_with("body", "eee")).unwrap();
    index.commit().unwrap();
    assert!(pinned_files
        .iter()
        .any(|file| !tmp.path().join(file).exists()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Random corpora roundtrip: every indexed token is findable and
    /// every stored body comes back verbatim.
    #[test]
    fn prop_corpus_roundtrip(words in prop::collection::vec("[a-d]{1,3}", 1..24)) {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let mut index = Index::create(Arc::clone(&dir)).unwrap();
        index.set_max_buffered_docs(4);

        // three words per doc
        let texts: Vec<String> = words.chunks(3).map(|c| c.join(" ")).collect();
        for text in &texts {
            index.add_document(&doc_with("body", text)).unwrap();
        }
        index.commit().unwrap();

        prop_assert_eq!(index.num_docs() as usize, texts.len());
        for (i, text) in texts.iter().enumerate() {
            let stored = index.document(i as u32).unwrap();
            prop_assert_eq!(stored.get("body").unwrap(), text.as_str());
            for word in text.split(' ') {
                let docs = index.term_docs(&Term::new("body", word)).unwrap();
                prop_assert!(docs.contains(&(i as u32)), "word {} of doc {}", word, i);
            }
        }
    }
}
