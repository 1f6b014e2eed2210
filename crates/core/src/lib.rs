//! Core types for the Lucerna search engine
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: unified error type for all engine APIs
//! - Document / Field: the unit of indexing, a list of named fields
//! - Term: a `(field, text)` pair, the unit of the inverted index
//! - Analyzer: the tokenization contract and the default implementation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod document;
pub mod error;
pub mod term;

pub use analysis::{Analyzer, SimpleAnalyzer, Token};
pub use document::{Document, Field, FieldValue};
pub use error::{Error, Result};
pub use term::Term;
