//! Commit state: the segments manifest and its generations
//!
//! The committed state of an index is one `segments_<gen>` file naming
//! every live segment. Generations are monotone and base-36 encoded; a
//! commit writes the next generation to a pending name, fsyncs, then
//! renames atomically, so a reader opened at any instant sees exactly
//! one committed state. The `segments.gen` sentinel duplicates the
//! current generation for readers that cannot list the directory
//! cheaply; it is advisory and staleness is tolerated.
//!
//! ## File Format (`segments_<gen>`)
//!
//! ```text
//! format        Int32   (-9)
//! version       Int64   (monotone across commits)
//! nameCounter   Int32
//! segmentCount  Int32
//! per segment:
//!   name        String
//!   docCount    Int32
//!   delGen      Int64   (-1 none, 0 legacy .del, >0 generation)
//! checksum      Int64   (sum of preceding bytes mod 2^63)
//! ```

use lucerna_core::{Error, Result};
use lucerna_store::{Directory, IndexOutput};
use tracing::{debug, warn};

/// The only supported segments-file format.
pub const FORMAT: i32 = -9;
/// Sentinel file format version.
const GEN_FORMAT: i32 = -2;
/// Name of the sentinel file.
pub const SEGMENTS_GEN: &str = "segments.gen";
/// Name of the writer lock file.
pub const WRITE_LOCK: &str = "write.lock";

/// Render a non-negative number in lowercase base 36.
pub fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}

/// Parse lowercase base 36; `None` on any foreign character.
pub fn parse_base36(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for c in s.bytes() {
        let digit = match c {
            b'0'..=b'9' => (c - b'0') as u64,
            b'a'..=b'z' => (c - b'a') as u64 + 10,
            _ => return None,
        };
        n = n.checked_mul(36)?.checked_add(digit)?;
    }
    Some(n)
}

/// One committed segment: its name, size, and deletion generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment name (`_<counter base36>`)
    pub name: String,
    /// Number of documents, deleted included
    pub doc_count: u32,
    /// Deletion generation: -1 none, 0 legacy, >0 generation suffix
    pub del_gen: i64,
}

impl SegmentInfo {
    /// Name of the live deletion bitmap file, if any.
    pub fn del_file_name(&self) -> Option<String> {
        match self.del_gen {
            g if g < 0 => None,
            0 => Some(format!("{}.del", self.name)),
            g => Some(format!("{}_{}.del", self.name, to_base36(g as u64))),
        }
    }
}

/// The manifest: segment list plus commit counters.
#[derive(Debug, Clone)]
pub struct SegmentInfos {
    /// Monotone commit version
    pub version: i64,
    /// Source of fresh segment names
    pub name_counter: u32,
    /// Live segments in global doc-id order
    pub segments: Vec<SegmentInfo>,
    /// Generation this state was read from, or -1 for a fresh index
    pub generation: i64,
}

impl Default for SegmentInfos {
    fn default() -> Self {
        SegmentInfos::new()
    }
}

impl SegmentInfos {
    /// State of a fresh index: nothing committed yet.
    pub fn new() -> Self {
        SegmentInfos {
            version: 0,
            name_counter: 0,
            segments: Vec::new(),
            generation: -1,
        }
    }

    /// Manifest file name for a generation.
    pub fn file_name(generation: i64) -> String {
        format!("segments_{}", to_base36(generation as u64))
    }

    /// Claim the next fresh segment name.
    pub fn next_segment_name(&mut self) -> String {
        let name = format!("_{}", to_base36(self.name_counter as u64));
        self.name_counter += 1;
        name
    }

    /// Sum of live docs across segments is computed by callers; this is
    /// the raw total including deleted docs.
    pub fn total_doc_count(&self) -> u32 {
        self.segments.iter().map(|s| s.doc_count).sum()
    }

    // ========================================================================
    // Generation discovery
    // ========================================================================

    /// Find the current generation: trust `segments.gen` when it points
    /// at an existing manifest, otherwise fall back to listing the
    /// directory. Returns -1 when no manifest exists.
    pub fn current_generation(dir: &dyn Directory) -> Result<i64> {
        if let Some(generation) = Self::generation_from_sentinel(dir) {
            if dir.exists(&Self::file_name(generation)) {
                return Ok(generation);
            }
            debug!(
                target: "lucerna::index",
                generation,
                "segments.gen points at a missing manifest, listing directory"
            );
        }
        Self::generation_from_listing(dir)
    }

    fn generation_from_sentinel(dir: &dyn Directory) -> Option<i64> {
        if !dir.exists(SEGMENTS_GEN) {
            return None;
        }
        let mut input = dir.open_input(SEGMENTS_GEN).ok()?;
        if input.read_int().ok()? != GEN_FORMAT {
            return None;
        }
        let gen0 = input.read_long().ok()?;
        let gen1 = input.read_long().ok()?;
        if gen0 == gen1 && gen0 > 0 {
            Some(gen0)
        } else {
            None
        }
    }

    fn generation_from_listing(dir: &dyn Directory) -> Result<i64> {
        let mut best = -1i64;
        for name in dir.list_all()? {
            if let Some(suffix) = name.strip_prefix("segments_") {
                if let Some(generation) = parse_base36(suffix) {
                    best = best.max(generation as i64);
                }
            }
        }
        Ok(best)
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Read the manifest of the current generation.
    ///
    /// Fails with a not-found I/O error when the directory holds no
    /// committed index.
    pub fn read_current(dir: &dyn Directory) -> Result<Self> {
        let generation = Self::current_generation(dir)?;
        if generation < 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no segments file: index does not exist",
            )));
        }
        Self::read(dir, generation)
    }

    /// Read the manifest of a specific generation.
    pub fn read(dir: &dyn Directory, generation: i64) -> Result<Self> {
        let name = Self::file_name(generation);
        let mut input = dir.open_input(&name)?;
        let file_len = input.len();
        if file_len < 8 {
            return Err(Error::corrupt(format!("{} truncated", name)));
        }

        // verify the additive checksum before trusting any field
        let body = input.read_vec((file_len - 8) as usize)?;
        let expected = input.read_long()?;
        let actual = checksum(&body);
        if actual != expected {
            return Err(Error::corrupt(format!(
                "checksum mismatch in {}: stored {}, computed {}",
                name, expected, actual
            )));
        }

        input.seek(0)?;
        let format = input.read_int()?;
        if format != FORMAT {
            return Err(Error::corrupt(format!(
                "unsupported segments format {} (supported: {})",
                format, FORMAT
            )));
        }
        let version = input.read_long()?;
        let name_counter = input.read_int()?;
        let segment_count = input.read_int()?;
        if name_counter < 0 || segment_count < 0 {
            return Err(Error::corrupt(format!("negative counters in {}", name)));
        }
        let mut segments = Vec::with_capacity(segment_count as usize);
        for _ in 0..segment_count {
            let seg_name = input.read_string()?;
            let doc_count = input.read_int()?;
            let del_gen = input.read_long()?;
            if doc_count < 0 {
                return Err(Error::corrupt(format!(
                    "negative doc count for segment {:?}",
                    seg_name
                )));
            }
            segments.push(SegmentInfo {
                name: seg_name,
                doc_count: doc_count as u32,
                del_gen,
            });
        }
        if input.remaining() != 8 {
            return Err(Error::corrupt(format!("trailing bytes in {}", name)));
        }
        Ok(SegmentInfos {
            version,
            name_counter: name_counter as u32,
            segments,
            generation,
        })
    }

    // ========================================================================
    // Write
    // ========================================================================

    /// Commit this state as the next generation: pending file, fsync,
    /// atomic rename, then best-effort sentinel update.
    pub fn write_commit(&mut self, dir: &dyn Directory) -> Result<()> {
        self.generation = if self.generation < 0 {
            1
        } else {
            self.generation + 1
        };
        self.version += 1;

        let mut body = IndexOutput::buffer();
        body.write_int(FORMAT)?;
        body.write_long(self.version)?;
        body.write_int(self.name_counter as i32)?;
        body.write_int(self.segments.len() as i32)?;
        for segment in &self.segments {
            body.write_string(&segment.name)?;
            body.write_int(segment.doc_count as i32)?;
            body.write_long(segment.del_gen)?;
        }
        let body = body.into_bytes();

        let final_name = Self::file_name(self.generation);
        let pending_name = format!("pending_{}", final_name);
        let mut out = dir.create_output(&pending_name)?;
        out.write_bytes(&body)?;
        out.write_long(checksum(&body))?;
        out.close()?; // fsync happens here for filesystem directories
        dir.rename(&pending_name, &final_name)?;

        // sentinel is advisory; a failure must not fail the commit
        if let Err(e) = self.write_sentinel(dir) {
            warn!(
                target: "lucerna::index",
                error = %e,
                "failed to update segments.gen"
            );
        }
        debug!(
            target: "lucerna::index",
            generation = self.generation,
            version = self.version,
            segments = self.segments.len(),
            "committed segments file"
        );
        Ok(())
    }

    fn write_sentinel(&self, dir: &dyn Directory) -> Result<()> {
        let mut out = dir.create_output(SEGMENTS_GEN)?;
        out.write_int(GEN_FORMAT)?;
        out.write_long(self.generation)?;
        out.write_long(self.generation)?;
        out.close()
    }
}

/// Additive checksum: byte sum mod 2^63.
fn checksum(bytes: &[u8]) -> i64 {
    let sum = bytes
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_add(b as u64));
    (sum & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

/// Best-effort removal of every file belonging to a partially written
/// segment. Used by flush and merge failure paths.
pub(crate) fn delete_segment_files(dir: &dyn Directory, segment: &str) {
    let prefix = format!("{}.", segment);
    if let Ok(names) = dir.list_all() {
        for name in names {
            if name.starts_with(&prefix) {
                if let Err(e) = dir.delete_file(&name) {
                    warn!(
                        target: "lucerna::index",
                        file = %name,
                        error = %e,
                        "could not remove partial segment file"
                    );
                }
            }
        }
    }
}
