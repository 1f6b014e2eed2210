//! Query evaluation for Lucerna
//!
//! This crate holds the query tree, the rewrite pass that expands
//! Range / Wildcard / Fuzzy queries against the term dictionary, the
//! tf·idf similarity, and the weight/scorer pipeline that turns a
//! query plus a reader snapshot into ranked hits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod doc_ref;
pub mod hits;
pub mod query;
pub mod scorer;
pub mod similarity;

pub use doc_ref::DocRef;
pub use hits::{rank, QueryHit};
pub use query::{
    BooleanClause, BooleanQuery, FuzzyQuery, MultiTermQuery, PhraseQuery, Query, RangeQuery, Sign,
    TermQuery, WildcardQuery,
};
pub use scorer::execute;
pub use similarity::Similarity;
