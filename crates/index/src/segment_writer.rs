//! Flush: turn a buffered segment into segment files
//!
//! The buffered structures already hold the data in on-disk shape:
//! field ordinals are assigned in name order, which is exactly the
//! iteration order of the buffered maps, so the walk into the field
//! table, stored payloads, dictionary, posting streams and norm files
//! is a straight copy. A failure unlinks whatever was partially
//! written; only the RAM buffer is lost.

use lucerna_core::{Error, Result};
use lucerna_store::Directory;
use tracing::debug;

use crate::buffered::BufferedSegment;
use crate::field_infos::FieldInfos;
use crate::postings::PostingsWriter;
use crate::segment_infos::{delete_segment_files, SegmentInfo};
use crate::stored::{StoredEntry, StoredFieldsWriter};
use crate::term_dict::TermDictWriter;

/// Write `buffered` as segment `name`. Returns its manifest entry.
pub fn write_segment(
    dir: &dyn Directory,
    name: &str,
    buffered: &BufferedSegment,
    index_interval: u32,
    skip_interval: u32,
) -> Result<SegmentInfo> {
    match write_inner(dir, name, buffered, index_interval, skip_interval) {
        Ok(info) => {
            debug!(
                target: "lucerna::index",
                segment = %name,
                docs = info.doc_count,
                terms = buffered.term_count(),
                "flushed segment"
            );
            Ok(info)
        }
        Err(e) => {
            delete_segment_files(dir, name);
            Err(e)
        }
    }
}

fn write_inner(
    dir: &dyn Directory,
    name: &str,
    buffered: &BufferedSegment,
    index_interval: u32,
    skip_interval: u32,
) -> Result<SegmentInfo> {
    let doc_count = buffered.doc_count();

    // ordinals in name order: the buffered maps iterate in exactly
    // this order
    let mut field_infos = FieldInfos::new();
    for (field_name, flags) in &buffered.fields {
        field_infos.add(field_name, flags.indexed, flags.store_term_vector);
    }
    field_infos.write(dir, name)?;

    let ord = |field_name: &str| {
        field_infos
            .number(field_name)
            .ok_or_else(|| Error::corrupt(format!("buffered field {:?} missing", field_name)))
    };

    let mut stored = StoredFieldsWriter::new(dir, name)?;
    for entries in &buffered.stored {
        let mapped: Vec<StoredEntry> = entries
            .iter()
            .map(|entry| {
                Ok(StoredEntry {
                    field: ord(&entry.name)?,
                    tokenized: entry.tokenized,
                    value: entry.value.clone(),
                })
            })
            .collect::<Result<_>>()?;
        stored.add_doc(&mapped)?;
    }
    stored.close()?;

    let mut postings = PostingsWriter::new(dir, name, skip_interval)?;
    let mut dict = TermDictWriter::new(dir, name, index_interval, skip_interval)?;
    for ((field_name, text), term_postings) in &buffered.postings {
        postings.start_term();
        for (doc, positions) in term_postings {
            postings.add_doc(*doc, positions)?;
        }
        let info = postings.end_term()?;
        dict.add(ord(field_name)?, text, &info)?;
    }
    postings.close()?;
    dict.close()?;

    for field in field_infos.iter().filter(|f| f.has_norms()) {
        let mut bytes = buffered
            .norms
            .get(&field.name)
            .cloned()
            .unwrap_or_default();
        bytes.resize(doc_count as usize, 0);
        let mut out = dir.create_output(&format!("{}.f{}", name, field.number))?;
        out.write_bytes(&bytes)?;
        out.close()?;
    }

    Ok(SegmentInfo {
        name: name.to_string(),
        doc_count,
        del_gen: -1,
    })
}
