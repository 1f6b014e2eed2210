//! # Lucerna
//!
//! An embedded full-text search engine compatible at the on-disk level
//! with the classical Lucene segment format: immutable segment files,
//! tombstoned deletions, and generation-based commits, queried through
//! ranked Boolean / phrase / fuzzy / wildcard / range search.
//!
//! # Quick Start
//!
//! ```no_run
//! use lucerna::{Document, Field, Index, Query};
//!
//! fn main() -> lucerna::Result<()> {
//!     let mut index = Index::create_in("./my-index")?;
//!
//!     let mut doc = Document::new();
//!     doc.add(Field::text("title", "the quick brown fox"));
//!     index.add_document(&doc)?;
//!     index.commit()?;
//!
//!     let hits = index.find(&Query::term("title", "quick"))?;
//!     assert_eq!(hits.len(), 1);
//!     println!("doc {} scored {}", hits[0].doc, hits[0].score);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The [`Index`] handle is the main entry point: a single writer per
//! directory (enforced by `write.lock`) combined with snapshot reads.
//! Underneath, the workspace crates split the engine the way the files
//! split on disk:
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `lucerna-core` | errors, documents, terms, analysis |
//! | `lucerna-store` | directories, streams, the binary codec |
//! | `lucerna-index` | segments, postings, dictionaries, merging, commits |
//! | `lucerna-search` | query tree, rewriting, scoring, hit collection |
//!
//! Readers are snapshot-isolated at the generation they open; `commit`
//! is the only visibility boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod index;

pub use index::Index;

pub use lucerna_core::{
    Analyzer, Document, Error, Field, FieldValue, Result, SimpleAnalyzer, Term, Token,
};
pub use lucerna_index::{IndexConfig, IndexReader, MultiTermsCursor, SegmentInfos};
pub use lucerna_search::{
    BooleanClause, BooleanQuery, DocRef, FuzzyQuery, MultiTermQuery, PhraseQuery, Query, QueryHit,
    RangeQuery, Sign, Similarity, TermQuery, WildcardQuery,
};
pub use lucerna_store::{Directory, FsDirectory, RamDirectory};
