//! Weighting and scoring
//!
//! Searching is a three-step pipeline over a rewritten query tree:
//! build a `Weight` (an owned value holding the idf and norm snapshots
//! it needs, never a reader back-pointer), normalize the whole tree by
//! one query norm, then turn each weight into a `DocScorer` cursor and
//! drain it into ranked hits.
//!
//! Term scores follow `tf(freq) · idf² · queryNorm · boost ·
//! norm(doc, field)`; the idf appears squared because it enters once in
//! the weight and once in the scorer. Boolean conjunctions leapfrog
//! REQUIRED cursors with `skip_to`, unions accumulate OPTIONAL scores,
//! and PROHIBITED cursors mask docs out; the sum is scaled by the
//! coordination factor.

use std::sync::Arc;

use lucerna_core::{Result, Term};
use lucerna_index::{decode_norm, IndexReader, MultiPostings};
use tracing::trace;

use crate::hits::{rank, QueryHit};
use crate::query::{BooleanQuery, MultiTermQuery, PhraseQuery, Query, Sign, TermQuery};
use crate::similarity::Similarity;

/// Run a query against a reader snapshot and rank the hits.
pub fn execute(reader: &IndexReader, query: &Query) -> Result<Vec<QueryHit>> {
    let rewritten = query.rewrite(reader)?;
    let mut weight = Weight::build(&rewritten, reader)?;
    let norm = Similarity::query_norm(weight.sum_of_squared_weights());
    weight.normalize(norm);

    let mut hits = Vec::new();
    if let Some(mut scorer) = weight.into_scorer(reader)? {
        while let Some(doc) = scorer.next()? {
            hits.push(QueryHit {
                doc,
                score: scorer.score()?,
            });
        }
    }
    trace!(
        target: "lucerna::search",
        candidates = hits.len(),
        "scored query"
    );
    Ok(rank(hits))
}

// ============================================================================
// Norm snapshots
// ============================================================================

/// Per-field norm bytes snapshotted out of every segment, addressed by
/// global doc id.
struct FieldNorms {
    /// `(base, bytes)` per segment; bases ascend
    parts: Vec<(u32, Option<Arc<Vec<u8>>>)>,
}

impl FieldNorms {
    fn snapshot(reader: &IndexReader, field: &str) -> Self {
        let mut parts = Vec::with_capacity(reader.segment_readers().len());
        let mut base = 0u32;
        for segment in reader.segment_readers() {
            let bytes = segment
                .field_infos()
                .number(field)
                .and_then(|ord| segment.norms_bytes(ord))
                .cloned();
            parts.push((base, bytes));
            base += segment.max_doc();
        }
        FieldNorms { parts }
    }

    fn get(&self, doc: u32) -> f32 {
        let idx = match self.parts.binary_search_by_key(&doc, |(base, _)| *base) {
            Ok(i) => i,
            Err(0) => return 0.0,
            Err(i) => i - 1,
        };
        let (base, bytes) = &self.parts[idx];
        let byte = bytes
            .as_ref()
            .and_then(|b| b.get((doc - base) as usize).copied())
            .unwrap_or(0);
        decode_norm(byte)
    }
}

// ============================================================================
// Weights
// ============================================================================

/// One-shot scoring state for a rewritten query.
enum Weight {
    Term(TermWeight),
    Phrase(PhraseWeight),
    Boolean(BooleanWeight),
    Empty,
}

struct TermWeight {
    term: Term,
    idf: f32,
    boost: f32,
    value: f32,
}

struct PhraseWeight {
    terms: Vec<Term>,
    offsets: Vec<u32>,
    slop: u32,
    field: String,
    idf: f32,
    boost: f32,
    value: f32,
}

struct BooleanWeight {
    clauses: Vec<(Weight, Sign)>,
    boost: f32,
}

impl Weight {
    fn build(query: &Query, reader: &IndexReader) -> Result<Weight> {
        Ok(match query {
            Query::Term(q) => Weight::Term(TermWeight::build(q, reader)?),
            Query::Phrase(q) => Weight::Phrase(PhraseWeight::build(q, reader)?),
            Query::Boolean(q) => Weight::Boolean(BooleanWeight::build(q, reader)?),
            Query::MultiTerm(q) => Weight::Boolean(BooleanWeight::build_multi(q, reader)?),
            Query::Empty => Weight::Empty,
            // rewrite() has eliminated these
            Query::Range(_) | Query::Fuzzy(_) | Query::Wildcard(_) => {
                let rewritten = query.rewrite(reader)?;
                Weight::build(&rewritten, reader)?
            }
        })
    }

    fn sum_of_squared_weights(&self) -> f32 {
        match self {
            Weight::Term(w) => (w.idf * w.boost).powi(2),
            Weight::Phrase(w) => (w.idf * w.boost).powi(2),
            Weight::Boolean(w) => {
                let sum: f32 = w
                    .clauses
                    .iter()
                    .filter(|(_, sign)| *sign != Sign::Prohibited)
                    .map(|(weight, _)| weight.sum_of_squared_weights())
                    .sum();
                // an all-prohibited or empty sum would divide by zero
                let sum = if sum > 0.0 { sum } else { 1.0 };
                w.boost.powi(2) * sum
            }
            Weight::Empty => 0.0,
        }
    }

    fn normalize(&mut self, norm: f32) {
        match self {
            Weight::Term(w) => w.value = norm * w.boost * w.idf * w.idf,
            Weight::Phrase(w) => w.value = norm * w.boost * w.idf * w.idf,
            Weight::Boolean(w) => {
                let child_norm = norm * w.boost;
                for (weight, _) in &mut w.clauses {
                    weight.normalize(child_norm);
                }
            }
            Weight::Empty => {}
        }
    }

    fn into_scorer(self, reader: &IndexReader) -> Result<Option<Box<dyn DocScorer>>> {
        match self {
            Weight::Term(w) => {
                let postings = reader.term_docs(&w.term)?;
                let norms = FieldNorms::snapshot(reader, &w.term.field);
                Ok(Some(Box::new(TermScorer {
                    postings,
                    norms,
                    value: w.value,
                })))
            }
            Weight::Phrase(w) => {
                let mut parts = Vec::with_capacity(w.terms.len());
                for (term, &offset) in w.terms.iter().zip(&w.offsets) {
                    parts.push(PhrasePart {
                        postings: reader.term_positions(term)?,
                        offset: offset as i64,
                    });
                }
                let norms = FieldNorms::snapshot(reader, &w.field);
                Ok(Some(Box::new(PhraseScorer {
                    parts,
                    slop: w.slop,
                    norms,
                    value: w.value,
                    doc: 0,
                    freq: 0.0,
                })))
            }
            Weight::Boolean(w) => BooleanScorer::build(w, reader),
            Weight::Empty => Ok(None),
        }
    }
}

impl TermWeight {
    fn build(query: &TermQuery, reader: &IndexReader) -> Result<TermWeight> {
        let idf = Similarity::idf(reader.doc_freq(&query.term)?, reader.num_docs());
        Ok(TermWeight {
            term: query.term.clone(),
            idf,
            boost: query.boost,
            value: 0.0,
        })
    }
}

impl PhraseWeight {
    fn build(query: &PhraseQuery, reader: &IndexReader) -> Result<PhraseWeight> {
        let mut idf = 0.0;
        for term in &query.terms {
            idf += Similarity::idf(reader.doc_freq(term)?, reader.num_docs());
        }
        Ok(PhraseWeight {
            field: query.terms[0].field.clone(),
            terms: query.terms.clone(),
            offsets: query.positions.clone(),
            slop: query.slop,
            idf,
            boost: query.boost,
            value: 0.0,
        })
    }
}

impl BooleanWeight {
    fn build(query: &BooleanQuery, reader: &IndexReader) -> Result<BooleanWeight> {
        let mut clauses = Vec::with_capacity(query.clauses.len());
        for clause in &query.clauses {
            clauses.push((Weight::build(&clause.query, reader)?, clause.sign));
        }
        Ok(BooleanWeight {
            clauses,
            boost: query.boost,
        })
    }

    /// A MultiTerm query scores as a Boolean of its signed terms.
    fn build_multi(query: &MultiTermQuery, reader: &IndexReader) -> Result<BooleanWeight> {
        let mut clauses = Vec::with_capacity(query.terms.len());
        for (term, sign) in &query.terms {
            let term_query = TermQuery {
                term: term.clone(),
                boost: 1.0,
            };
            clauses.push((Weight::Term(TermWeight::build(&term_query, reader)?), *sign));
        }
        Ok(BooleanWeight {
            clauses,
            boost: query.boost,
        })
    }
}

// ============================================================================
// Scorers
// ============================================================================

/// Forward-only cursor over matching docs with a score per doc.
trait DocScorer {
    /// Advance to the next matching doc.
    fn next(&mut self) -> Result<Option<u32>>;
    /// Advance to the first matching doc >= `target`.
    fn skip_to(&mut self, target: u32) -> Result<Option<u32>>;
    /// Score of the current doc.
    fn score(&mut self) -> Result<f32>;
}

struct TermScorer {
    postings: MultiPostings,
    norms: FieldNorms,
    value: f32,
}

impl DocScorer for TermScorer {
    fn next(&mut self) -> Result<Option<u32>> {
        self.postings.next_doc()
    }

    fn skip_to(&mut self, target: u32) -> Result<Option<u32>> {
        self.postings.skip_to(target)
    }

    fn score(&mut self) -> Result<f32> {
        let doc = self.postings.doc();
        let tf = Similarity::tf(self.postings.freq() as f32);
        Ok(tf * self.value * self.norms.get(doc))
    }
}

struct PhrasePart {
    postings: MultiPostings,
    offset: i64,
}

struct PhraseScorer {
    parts: Vec<PhrasePart>,
    slop: u32,
    norms: FieldNorms,
    value: f32,
    doc: u32,
    freq: f32,
}

impl PhraseScorer {
    /// Align every term cursor on one doc; `None` when any list ends.
    fn align(&mut self, mut target: u32) -> Result<Option<u32>> {
        loop {
            let mut max = target;
            for part in &mut self.parts {
                match part.postings.skip_to(target)? {
                    Some(doc) => max = max.max(doc),
                    None => return Ok(None),
                }
            }
            if max == target {
                return Ok(Some(target));
            }
            target = max;
        }
    }

    /// Phrase frequency at the aligned doc: each anchor position of
    /// the first term contributes `1/(1+displacement)` when the other
    /// terms can line up within `slop` total displacement.
    fn phrase_freq(&mut self) -> Result<f32> {
        let base_offset = self.parts[0].offset;
        let mut all_positions = Vec::with_capacity(self.parts.len());
        for part in &mut self.parts {
            all_positions.push(part.postings.positions()?);
        }

        let mut freq = 0.0f32;
        for &anchor in &all_positions[0] {
            let mut displacement = 0u64;
            let mut feasible = true;
            for (part, positions) in self.parts.iter().zip(&all_positions).skip(1) {
                let expected = anchor as i64 + (part.offset - base_offset);
                let best = positions
                    .iter()
                    .map(|&p| (p as i64 - expected).unsigned_abs())
                    .min();
                match best {
                    Some(d) => displacement += d,
                    None => {
                        feasible = false;
                        break;
                    }
                }
                if displacement > self.slop as u64 {
                    feasible = false;
                    break;
                }
            }
            if feasible && displacement <= self.slop as u64 {
                freq += 1.0 / (1.0 + displacement as f32);
            }
        }
        Ok(freq)
    }

    fn advance(&mut self, first: Option<u32>) -> Result<Option<u32>> {
        let mut candidate = first;
        while let Some(target) = candidate {
            match self.align(target)? {
                None => return Ok(None),
                Some(doc) => {
                    let freq = self.phrase_freq()?;
                    if freq > 0.0 {
                        self.doc = doc;
                        self.freq = freq;
                        return Ok(Some(doc));
                    }
                    candidate = self.parts[0].postings.next_doc()?;
                }
            }
        }
        Ok(None)
    }
}

impl DocScorer for PhraseScorer {
    fn next(&mut self) -> Result<Option<u32>> {
        let first = self.parts[0].postings.next_doc()?;
        self.advance(first)
    }

    fn skip_to(&mut self, target: u32) -> Result<Option<u32>> {
        if self.freq > 0.0 && self.doc >= target {
            return Ok(Some(self.doc));
        }
        let first = self.parts[0].postings.skip_to(target)?;
        self.advance(first)
    }

    fn score(&mut self) -> Result<f32> {
        Ok(Similarity::tf(self.freq) * self.value * self.norms.get(self.doc))
    }
}

/// A sub-scorer plus its buffered cursor state.
struct Sub {
    scorer: Box<dyn DocScorer>,
    current: Option<u32>,
    started: bool,
}

impl Sub {
    fn new(scorer: Box<dyn DocScorer>) -> Self {
        Sub {
            scorer,
            current: None,
            started: false,
        }
    }

    fn ensure_started(&mut self) -> Result<()> {
        if !self.started {
            self.current = self.scorer.next()?;
            self.started = true;
        }
        Ok(())
    }

    fn catch_up(&mut self, target: u32) -> Result<Option<u32>> {
        if !self.started || self.current.is_some_and(|d| d < target) {
            self.current = self.scorer.skip_to(target)?;
            self.started = true;
        }
        Ok(self.current)
    }
}

struct BooleanScorer {
    required: Vec<Sub>,
    optional: Vec<Sub>,
    prohibited: Vec<Sub>,
    coord_denominator: usize,
    doc: u32,
    score: f32,
}

impl BooleanScorer {
    fn build(weight: BooleanWeight, reader: &IndexReader) -> Result<Option<Box<dyn DocScorer>>> {
        let mut required = Vec::new();
        let mut optional = Vec::new();
        let mut prohibited = Vec::new();
        for (sub_weight, sign) in weight.clauses {
            let Some(scorer) = sub_weight.into_scorer(reader)? else {
                continue;
            };
            match sign {
                Sign::Required => required.push(Sub::new(scorer)),
                Sign::Optional => optional.push(Sub::new(scorer)),
                Sign::Prohibited => prohibited.push(Sub::new(scorer)),
            }
        }
        if required.is_empty() && optional.is_empty() {
            return Ok(None);
        }
        let coord_denominator = required.len() + optional.len();
        Ok(Some(Box::new(BooleanScorer {
            required,
            optional,
            prohibited,
            coord_denominator,
            doc: 0,
            score: 0.0,
        })))
    }

    fn excluded(&mut self, doc: u32) -> Result<bool> {
        for sub in &mut self.prohibited {
            if sub.catch_up(doc)? == Some(doc) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Align every REQUIRED cursor on one doc at or past `candidate`.
    fn align_required(&mut self, mut candidate: u32) -> Result<Option<u32>> {
        loop {
            let mut max = candidate;
            for sub in &mut self.required {
                match sub.catch_up(candidate)? {
                    Some(doc) => max = max.max(doc),
                    None => return Ok(None),
                }
            }
            if max == candidate {
                return Ok(Some(candidate));
            }
            candidate = max;
        }
    }

    fn next_conjunction(&mut self, mut candidate: Option<u32>) -> Result<Option<u32>> {
        while let Some(target) = candidate {
            match self.align_required(target)? {
                None => return Ok(None),
                Some(doc) => {
                    if self.excluded(doc)? {
                        candidate = doc.checked_add(1);
                        continue;
                    }
                    let mut score = 0.0;
                    for sub in &mut self.required {
                        score += sub.scorer.score()?;
                    }
                    let mut matched = self.required.len();
                    for sub in &mut self.optional {
                        if sub.catch_up(doc)? == Some(doc) {
                            score += sub.scorer.score()?;
                            matched += 1;
                        }
                    }
                    self.doc = doc;
                    self.score = score * Similarity::coord(matched, self.coord_denominator);
                    return Ok(Some(doc));
                }
            }
        }
        Ok(None)
    }

    fn next_union(&mut self, floor: Option<u32>) -> Result<Option<u32>> {
        loop {
            let mut min_doc: Option<u32> = None;
            for sub in &mut self.optional {
                match floor {
                    Some(target) => {
                        sub.catch_up(target)?;
                    }
                    None => sub.ensure_started()?,
                }
                if let Some(doc) = sub.current {
                    min_doc = Some(min_doc.map_or(doc, |m| m.min(doc)));
                }
            }
            let Some(candidate) = min_doc else {
                return Ok(None);
            };
            let mut score = 0.0;
            let mut matched = 0;
            for sub in &mut self.optional {
                if sub.current == Some(candidate) {
                    score += sub.scorer.score()?;
                    matched += 1;
                    sub.current = sub.scorer.next()?;
                }
            }
            if self.excluded(candidate)? {
                continue;
            }
            self.doc = candidate;
            self.score = score * Similarity::coord(matched, self.coord_denominator);
            return Ok(Some(candidate));
        }
    }
}

impl DocScorer for BooleanScorer {
    fn next(&mut self) -> Result<Option<u32>> {
        if self.required.is_empty() {
            self.next_union(None)
        } else {
            let candidate = match self.required[0].started {
                true => self.required[0].current.and_then(|d| d.checked_add(1)),
                false => Some(0),
            };
            // reuse the leapfrog: the leader catches up like the rest
            self.next_conjunction(candidate)
        }
    }

    fn skip_to(&mut self, target: u32) -> Result<Option<u32>> {
        if self.required.is_empty() {
            self.next_union(Some(target))
        } else {
            self.next_conjunction(Some(target))
        }
    }

    fn score(&mut self) -> Result<f32> {
        Ok(self.score)
    }
}
