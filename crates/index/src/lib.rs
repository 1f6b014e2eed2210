//! Segment machinery for Lucerna
//!
//! This crate implements the inverted-index read/write path and the
//! segmented index model:
//! - field tables, norms, deletion bitmaps
//! - term dictionary with a memory-resident index
//! - posting streams with embedded skip lists
//! - stored field payloads
//! - the writer's in-memory buffered segment and the flush path
//! - the k-way segment merger and the logarithmic merge policy
//! - the generation-based commit manifest
//! - the multi-segment snapshot reader

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitvector;
pub mod buffered;
pub mod config;
pub mod field_infos;
pub mod merge_policy;
pub mod merger;
pub mod norms;
pub mod postings;
pub mod reader;
pub mod segment;
pub mod segment_infos;
pub mod segment_writer;
pub mod stored;
pub mod term_dict;

pub use bitvector::BitVector;
pub use buffered::BufferedSegment;
pub use config::IndexConfig;
pub use field_infos::{FieldInfo, FieldInfos};
pub use merge_policy::MergePolicy;
pub use merger::SegmentMerger;
pub use norms::{decode_norm, encode_norm, length_norm};
pub use postings::{PostingsWriter, SegmentPostings};
pub use reader::{IndexReader, MultiPostings, MultiTermsCursor};
pub use segment::SegmentReader;
pub use segment_infos::{SegmentInfo, SegmentInfos, SEGMENTS_GEN, WRITE_LOCK};
pub use segment_writer::write_segment;
pub use stored::{StoredEntry, StoredFieldsReader, StoredFieldsWriter};
pub use term_dict::{TermDictReader, TermDictWriter, TermInfo, TermsCursor};
