//! Documents and fields
//!
//! A document is an ordered list of named fields. Fields carry their
//! indexing flags: whether the value is stored for retrieval, indexed
//! for search, tokenized by the analyzer, binary, and whether a term
//! vector is kept. Documents have no user-visible key; the index assigns
//! a dense internal id per segment.

use crate::error::{Error, Result};

/// Value of a field: analyzed text or opaque bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// UTF-8 text
    Text(String),
    /// Opaque binary payload (stored only, never indexed)
    Binary(Vec<u8>),
}

impl FieldValue {
    /// View as text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Binary(_) => None,
        }
    }

    /// View as bytes, if this is a binary value.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Text(_) => None,
            FieldValue::Binary(b) => Some(b),
        }
    }
}

/// A named field of a document.
#[derive(Debug, Clone)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field value
    pub value: FieldValue,
    /// Per-field boost, folded into the field norm at flush
    pub boost: f32,
    /// Value is kept in the stored-fields file for retrieval
    pub stored: bool,
    /// Value participates in the inverted index
    pub indexed: bool,
    /// Value is split into terms by the analyzer (vs. indexed whole)
    pub tokenized: bool,
    /// Value is an opaque byte payload
    pub binary: bool,
    /// A term vector is kept for this field
    pub store_term_vector: bool,
}

impl Field {
    /// Tokenized, indexed, and stored. The common case for body text.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Text(value.into()),
            boost: 1.0,
            stored: true,
            indexed: true,
            tokenized: true,
            binary: false,
            store_term_vector: false,
        }
    }

    /// Indexed as a single term, stored, not tokenized. For identifiers.
    pub fn keyword(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Text(value.into()),
            boost: 1.0,
            stored: true,
            indexed: true,
            tokenized: false,
            binary: false,
            store_term_vector: false,
        }
    }

    /// Stored only; invisible to search.
    pub fn unindexed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Text(value.into()),
            boost: 1.0,
            stored: true,
            indexed: false,
            tokenized: false,
            binary: false,
            store_term_vector: false,
        }
    }

    /// Tokenized and indexed but not stored. For large bodies that are
    /// retrieved from elsewhere.
    pub fn un_stored(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Text(value.into()),
            boost: 1.0,
            stored: false,
            indexed: true,
            tokenized: true,
            binary: false,
            store_term_vector: false,
        }
    }

    /// Stored opaque bytes; never indexed.
    pub fn binary(name: impl Into<String>, value: Vec<u8>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Binary(value),
            boost: 1.0,
            stored: true,
            indexed: false,
            tokenized: false,
            binary: true,
            store_term_vector: false,
        }
    }

    /// Builder: set the field boost.
    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    /// Builder: keep a term vector for this field.
    pub fn with_term_vector(mut self) -> Self {
        self.store_term_vector = true;
        self
    }
}

/// A document: an ordered list of fields plus a document boost.
#[derive(Debug, Clone)]
pub struct Document {
    fields: Vec<Field>,
    /// Document boost, folded into every indexed field's norm at flush
    pub boost: f32,
}

impl Default for Document {
    fn default() -> Self {
        Document::new()
    }
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document {
            fields: Vec::new(),
            boost: 1.0,
        }
    }

    /// Append a field. Repeated names are allowed; all occurrences are
    /// indexed and the first stored occurrence wins for retrieval.
    pub fn add(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// First field with the given name, if any.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Text value of the first field with the given name.
    ///
    /// Fails with `InvalidArgument` if the field is absent or binary.
    pub fn get(&self, name: &str) -> Result<&str> {
        self.field(name)
            .and_then(|f| f.value.as_text())
            .ok_or_else(|| Error::InvalidArgument(format!("no text field {:?}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_constructors() {
        let t = Field::text("body", "hello world");
        assert!(t.stored && t.indexed && t.tokenized && !t.binary);

        let k = Field::keyword("id", "doc-17");
        assert!(k.stored && k.indexed && !k.tokenized);

        let u = Field::unindexed("path", "/tmp/a");
        assert!(u.stored && !u.indexed);

        let s = Field::un_stored("body", "hello");
        assert!(!s.stored && s.indexed && s.tokenized);

        let b = Field::binary("blob", vec![1, 2, 3]);
        assert!(b.binary && b.stored && !b.indexed);
        assert_eq!(b.value.as_binary(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_document_get() {
        let mut doc = Document::new();
        doc.add(Field::text("title", "the quick brown fox"));
        doc.add(Field::binary("blob", vec![0]));

        assert_eq!(doc.get("title").unwrap(), "the quick brown fox");
        assert!(doc.get("missing").is_err());
        assert!(doc.get("blob").is_err());
    }

    #[test]
    fn test_document_repeated_fields() {
        let mut doc = Document::new();
        doc.add(Field::text("tag", "alpha"));
        doc.add(Field::text("tag", "beta"));

        assert_eq!(doc.fields().len(), 2);
        assert_eq!(doc.get("tag").unwrap(), "alpha");
    }

    #[test]
    fn test_field_boost_builder() {
        let f = Field::text("title", "x").with_boost(2.0);
        assert_eq!(f.boost, 2.0);
    }
}
