//! In-memory buffered segment
//!
//! Documents added to the writer accumulate here as the same data an
//! on-disk segment holds: a sorted term → postings map, per-field norm
//! bytes and stored payloads. Everything is keyed by field name while
//! buffered; the flush assigns field ordinals in name order, so the
//! name-sorted maps walk straight into the ordinal-sorted files and
//! every segment agrees on what `(fieldOrd, term)` order means.

use std::collections::BTreeMap;

use lucerna_core::{Analyzer, Document, Error, FieldValue, Result, Token};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::norms::{encode_norm, length_norm};

type Positions = SmallVec<[u32; 4]>;

/// Postings of one term while buffered: `(localDoc, positions)` pairs
/// in ascending doc order.
pub(crate) type BufferedPostings = Vec<(u32, Positions)>;

/// Flags of one buffered field.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BufferedField {
    pub indexed: bool,
    pub store_term_vector: bool,
}

/// One stored payload while buffered, keyed by field name.
#[derive(Debug, Clone)]
pub(crate) struct BufferedStored {
    pub name: String,
    pub tokenized: bool,
    pub value: FieldValue,
}

/// The writer's RAM segment.
#[derive(Default)]
pub struct BufferedSegment {
    /// Field name → flags; name order becomes ordinal order at flush
    pub(crate) fields: BTreeMap<String, BufferedField>,
    /// `(fieldName, term)` → postings, sorted by the map itself
    pub(crate) postings: BTreeMap<(String, String), BufferedPostings>,
    /// field name → one norm byte per buffered doc
    pub(crate) norms: FxHashMap<String, Vec<u8>>,
    /// per-doc stored entries
    pub(crate) stored: Vec<Vec<BufferedStored>>,
    doc_count: u32,
}

impl BufferedSegment {
    /// Empty buffer.
    pub fn new() -> Self {
        BufferedSegment::default()
    }

    /// Number of buffered documents.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    /// Number of distinct buffered terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        *self = BufferedSegment::default();
    }

    /// Analyze and buffer one document, assigning the next local id.
    pub fn add_document(&mut self, doc: &Document, analyzer: &dyn Analyzer) -> Result<()> {
        let local_id = self.doc_count;
        // per-field accumulation across repeated field instances:
        // (token count, next position base, accumulated boost)
        let mut field_state: FxHashMap<String, (u32, u32, f32)> = FxHashMap::default();
        let mut stored_entries = Vec::new();

        for field in doc.fields() {
            if field.binary && field.indexed {
                return Err(Error::InvalidArgument(format!(
                    "binary field {:?} cannot be indexed",
                    field.name
                )));
            }
            let flags = self.fields.entry(field.name.clone()).or_default();
            flags.indexed |= field.indexed;
            flags.store_term_vector |= field.store_term_vector;

            if field.indexed {
                let text = field.value.as_text().ok_or_else(|| {
                    Error::InvalidArgument(format!("indexed field {:?} has no text", field.name))
                })?;
                let tokens = if field.tokenized {
                    analyzer.analyze(&field.name, text)
                } else {
                    vec![Token {
                        text: text.to_string(),
                        position: 0,
                    }]
                };
                let state = field_state.entry(field.name.clone()).or_insert((0, 0, 1.0));
                state.2 *= field.boost;
                let base = state.1;
                let mut last_position = base;
                for token in &tokens {
                    let position = base + token.position;
                    let postings = self
                        .postings
                        .entry((field.name.clone(), token.text.clone()))
                        .or_default();
                    match postings.last_mut() {
                        Some((doc_id, positions)) if *doc_id == local_id => {
                            positions.push(position)
                        }
                        _ => postings.push((local_id, SmallVec::from_slice(&[position]))),
                    }
                    last_position = position;
                }
                state.0 += tokens.len() as u32;
                if !tokens.is_empty() {
                    state.1 = last_position + 1;
                }
            }

            if field.stored {
                stored_entries.push(BufferedStored {
                    name: field.name.clone(),
                    tokenized: field.tokenized,
                    value: field.value.clone(),
                });
            }
        }

        self.stored.push(stored_entries);
        for (name, (token_count, _, boost)) in field_state {
            let byte = encode_norm(doc.boost * boost * length_norm(token_count));
            let norms = self.norms.entry(name).or_default();
            norms.resize(local_id as usize, 0);
            norms.push(byte);
        }
        self.doc_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucerna_core::{Field, SimpleAnalyzer};

    fn buffer_with(docs: &[Document]) -> BufferedSegment {
        let mut buffered = BufferedSegment::new();
        for doc in docs {
            buffered.add_document(doc, &SimpleAnalyzer).unwrap();
        }
        buffered
    }

    fn text_doc(field: &str, value: &str) -> Document {
        let mut doc = Document::new();
        doc.add(Field::text(field, value));
        doc
    }

    fn postings_of<'a>(
        buffered: &'a BufferedSegment,
        field: &str,
        term: &str,
    ) -> &'a BufferedPostings {
        &buffered.postings[&(field.to_string(), term.to_string())]
    }

    #[test]
    fn test_postings_accumulate_positions() {
        let buffered = buffer_with(&[text_doc("body", "to be or not to be")]);
        let to = postings_of(&buffered, "body", "to");
        assert_eq!(to.len(), 1);
        assert_eq!(to[0].0, 0);
        assert_eq!(to[0].1.as_slice(), &[0, 4]);
        let be = postings_of(&buffered, "body", "be");
        assert_eq!(be[0].1.as_slice(), &[1, 5]);
    }

    #[test]
    fn test_docs_ascend_within_term() {
        let buffered = buffer_with(&[
            text_doc("body", "alpha"),
            text_doc("body", "beta"),
            text_doc("body", "alpha gamma"),
        ]);
        let alpha = postings_of(&buffered, "body", "alpha");
        let docs: Vec<u32> = alpha.iter().map(|(d, _)| *d).collect();
        assert_eq!(docs, vec![0, 2]);
        assert_eq!(buffered.doc_count(), 3);
    }

    #[test]
    fn test_repeated_field_instances_continue_positions() {
        let mut doc = Document::new();
        doc.add(Field::text("tag", "red green"));
        doc.add(Field::text("tag", "red"));
        let buffered = buffer_with(&[doc]);

        let red = postings_of(&buffered, "tag", "red");
        // second instance starts after the first's last position
        assert_eq!(red[0].1.as_slice(), &[0, 2]);
        // norm covers all three tokens
        assert_eq!(buffered.norms["tag"][0], encode_norm(length_norm(3)));
    }

    #[test]
    fn test_keyword_field_is_single_term() {
        let mut doc = Document::new();
        doc.add(Field::keyword("id", "Doc-17 A"));
        let buffered = buffer_with(&[doc]);
        assert_eq!(postings_of(&buffered, "id", "Doc-17 A")[0].0, 0);
        assert_eq!(buffered.term_count(), 1);
    }

    #[test]
    fn test_norms_leave_gaps_for_missing_fields() {
        let mut title_only = Document::new();
        title_only.add(Field::text("title", "one"));
        let buffered = buffer_with(&[text_doc("body", "x y z w"), title_only]);

        assert_eq!(buffered.norms["body"].len(), 1); // padded at flush
        let title_norms = &buffered.norms["title"];
        assert_eq!(title_norms.len(), 2);
        assert_eq!(title_norms[0], 0); // doc 0 has no title
        assert_eq!(title_norms[1], encode_norm(1.0));
    }

    #[test]
    fn test_boosts_fold_into_norm() {
        let mut doc = Document::new();
        doc.boost = 2.0;
        doc.add(Field::text("body", "word").with_boost(3.0));
        let buffered = buffer_with(&[doc]);
        assert_eq!(buffered.norms["body"][0], encode_norm(6.0));
    }

    #[test]
    fn test_fields_collect_in_name_order() {
        let mut doc = Document::new();
        doc.add(Field::text("title", "t"));
        doc.add(Field::text("body", "b"));
        doc.add(Field::unindexed("author", "a"));
        let buffered = buffer_with(&[doc]);

        let names: Vec<&str> = buffered.fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["author", "body", "title"]);
        assert!(!buffered.fields["author"].indexed);
        assert!(buffered.fields["title"].indexed);
    }

    #[test]
    fn test_binary_field_not_indexable() {
        let mut field = Field::binary("blob", vec![1, 2]);
        field.indexed = true;
        let mut doc = Document::new();
        doc.add(field);
        let mut buffered = BufferedSegment::new();
        assert!(matches!(
            buffered.add_document(&doc, &SimpleAnalyzer),
            Err(Error::InvalidArgument(_))
        ));
    }
}
