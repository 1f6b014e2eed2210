//! Query tree
//!
//! Queries form a sum type. `rewrite` expands the dictionary-driven
//! variants (Range, Wildcard, Fuzzy) against a reader's term
//! dictionary, so the tree that reaches weighting consists only of
//! Term, Phrase, Boolean, MultiTerm and Empty. `Empty` matches nothing
//! and is the identity of impossible rewrites.

use lucerna_core::{Error, Result, Term};
use lucerna_index::IndexReader;
use tracing::debug;

/// Expansion cap for Range / Wildcard / Fuzzy rewrites.
const MAX_CLAUSES: usize = 1024;

/// How a clause participates in a Boolean or MultiTerm query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Every matching doc must satisfy the clause
    Required,
    /// Docs satisfying the clause are excluded
    Prohibited,
    /// The clause contributes score when it matches
    Optional,
}

/// A single term query.
#[derive(Debug, Clone)]
pub struct TermQuery {
    /// The term to match
    pub term: Term,
    /// Query boost
    pub boost: f32,
}

/// Terms that must appear at relative positions, within `slop` edits.
#[derive(Debug, Clone)]
pub struct PhraseQuery {
    /// Phrase terms, all in one field
    pub terms: Vec<Term>,
    /// Position offset of each term within the phrase
    pub positions: Vec<u32>,
    /// Permitted total position displacement
    pub slop: u32,
    /// Query boost
    pub boost: f32,
}

/// One clause of a Boolean query.
#[derive(Debug, Clone)]
pub struct BooleanClause {
    /// The sub-query
    pub query: Query,
    /// Participation sign
    pub sign: Sign,
}

/// Signed combination of sub-queries.
#[derive(Debug, Clone)]
pub struct BooleanQuery {
    /// The clauses
    pub clauses: Vec<BooleanClause>,
    /// Query boost
    pub boost: f32,
}

/// Term range over one field's dictionary.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    /// Field to scan
    pub field: String,
    /// Lower bound; `None` is unbounded
    pub lower: Option<String>,
    /// Upper bound; `None` is unbounded
    pub upper: Option<String>,
    /// Whether the lower bound itself matches
    pub inclusive_lower: bool,
    /// Whether the upper bound itself matches
    pub inclusive_upper: bool,
    /// Query boost
    pub boost: f32,
}

/// Terms within an edit-distance-derived similarity of a target.
#[derive(Debug, Clone)]
pub struct FuzzyQuery {
    /// The target term
    pub term: Term,
    /// Minimum similarity in (0, 1)
    pub min_similarity: f32,
    /// Leading characters that must match exactly
    pub prefix_length: usize,
    /// Query boost
    pub boost: f32,
}

/// Terms matching a `*` / `?` pattern.
#[derive(Debug, Clone)]
pub struct WildcardQuery {
    /// Field and pattern (`*` any run, `?` any single char)
    pub term: Term,
    /// Query boost
    pub boost: f32,
}

/// A flat signed set of terms, the target of multi-term rewrites.
#[derive(Debug, Clone)]
pub struct MultiTermQuery {
    /// Signed terms
    pub terms: Vec<(Term, Sign)>,
    /// Query boost
    pub boost: f32,
}

/// The query tree.
#[derive(Debug, Clone)]
pub enum Query {
    /// Single term
    Term(TermQuery),
    /// Positional phrase
    Phrase(PhraseQuery),
    /// Signed combination
    Boolean(BooleanQuery),
    /// Dictionary range
    Range(RangeQuery),
    /// Edit-distance expansion
    Fuzzy(FuzzyQuery),
    /// Pattern expansion
    Wildcard(WildcardQuery),
    /// Flat signed term set
    MultiTerm(MultiTermQuery),
    /// Matches nothing
    Empty,
}

impl Query {
    /// Term query with boost 1.
    pub fn term(field: impl Into<String>, text: impl Into<String>) -> Query {
        Query::Term(TermQuery {
            term: Term::new(field, text),
            boost: 1.0,
        })
    }

    /// Phrase query over consecutive positions, boost 1.
    pub fn phrase(field: &str, words: &[&str], slop: u32) -> Query {
        Query::Phrase(PhraseQuery {
            terms: words.iter().map(|w| Term::new(field, *w)).collect(),
            positions: (0..words.len() as u32).collect(),
            slop,
            boost: 1.0,
        })
    }

    /// Boolean query from signed sub-queries, boost 1.
    pub fn boolean(clauses: Vec<(Query, Sign)>) -> Query {
        Query::Boolean(BooleanQuery {
            clauses: clauses
                .into_iter()
                .map(|(query, sign)| BooleanClause { query, sign })
                .collect(),
            boost: 1.0,
        })
    }

    /// Fuzzy query, boost 1.
    pub fn fuzzy(field: &str, text: &str, min_similarity: f32, prefix_length: usize) -> Query {
        Query::Fuzzy(FuzzyQuery {
            term: Term::new(field, text),
            min_similarity,
            prefix_length,
            boost: 1.0,
        })
    }

    /// Wildcard query, boost 1.
    pub fn wildcard(field: &str, pattern: &str) -> Query {
        Query::Wildcard(WildcardQuery {
            term: Term::new(field, pattern),
            boost: 1.0,
        })
    }

    /// Inclusive-by-default range query, boost 1.
    pub fn range(field: &str, lower: Option<&str>, upper: Option<&str>) -> Query {
        Query::Range(RangeQuery {
            field: field.to_string(),
            lower: lower.map(str::to_string),
            upper: upper.map(str::to_string),
            inclusive_lower: true,
            inclusive_upper: true,
            boost: 1.0,
        })
    }

    /// This query's boost.
    pub fn boost(&self) -> f32 {
        match self {
            Query::Term(q) => q.boost,
            Query::Phrase(q) => q.boost,
            Query::Boolean(q) => q.boost,
            Query::Range(q) => q.boost,
            Query::Fuzzy(q) => q.boost,
            Query::Wildcard(q) => q.boost,
            Query::MultiTerm(q) => q.boost,
            Query::Empty => 1.0,
        }
    }

    /// Set this query's boost.
    pub fn set_boost(&mut self, boost: f32) {
        match self {
            Query::Term(q) => q.boost = boost,
            Query::Phrase(q) => q.boost = boost,
            Query::Boolean(q) => q.boost = boost,
            Query::Range(q) => q.boost = boost,
            Query::Fuzzy(q) => q.boost = boost,
            Query::Wildcard(q) => q.boost = boost,
            Query::MultiTerm(q) => q.boost = boost,
            Query::Empty => {}
        }
    }

    /// Expand dictionary-driven variants against `reader`.
    ///
    /// The result contains only Term / Phrase / Boolean / MultiTerm /
    /// Empty nodes.
    pub fn rewrite(&self, reader: &IndexReader) -> Result<Query> {
        match self {
            Query::Term(_) | Query::MultiTerm(_) | Query::Empty => Ok(self.clone()),
            Query::Phrase(q) => Ok(match q.terms.len() {
                0 => Query::Empty,
                1 => Query::Term(TermQuery {
                    term: q.terms[0].clone(),
                    boost: q.boost,
                }),
                _ => {
                    let field = &q.terms[0].field;
                    if q.terms.iter().any(|t| &t.field != field) {
                        return Err(Error::InvalidArgument(
                            "phrase terms must share one field".into(),
                        ));
                    }
                    if q.terms.len() != q.positions.len() {
                        return Err(Error::InvalidArgument(
                            "phrase terms and positions differ in length".into(),
                        ));
                    }
                    self.clone()
                }
            }),
            Query::Boolean(q) => rewrite_boolean(q, reader),
            Query::Range(q) => rewrite_range(q, reader),
            Query::Wildcard(q) => rewrite_wildcard(q, reader),
            Query::Fuzzy(q) => rewrite_fuzzy(q, reader),
        }
    }
}

fn rewrite_boolean(query: &BooleanQuery, reader: &IndexReader) -> Result<Query> {
    let mut clauses = Vec::with_capacity(query.clauses.len());
    for clause in &query.clauses {
        let rewritten = clause.query.rewrite(reader)?;
        if matches!(rewritten, Query::Empty) {
            match clause.sign {
                // a required clause that can never match sinks the query
                Sign::Required => return Ok(Query::Empty),
                Sign::Prohibited | Sign::Optional => continue,
            }
        }
        clauses.push(BooleanClause {
            query: rewritten,
            sign: clause.sign,
        });
    }
    if clauses.iter().all(|c| c.sign == Sign::Prohibited) {
        return Ok(Query::Empty);
    }
    Ok(Query::Boolean(BooleanQuery {
        clauses,
        boost: query.boost,
    }))
}

fn rewrite_range(query: &RangeQuery, reader: &IndexReader) -> Result<Query> {
    let start = Term::new(
        query.field.clone(),
        query.lower.clone().unwrap_or_default(),
    );
    let mut cursor = reader.terms_from(&start)?;
    let mut terms = Vec::new();
    while let Some((term, _)) = cursor.next()? {
        if term.field != query.field {
            break;
        }
        if let Some(lower) = &query.lower {
            if !query.inclusive_lower && &term.text == lower {
                continue;
            }
        }
        if let Some(upper) = &query.upper {
            if &term.text > upper || (!query.inclusive_upper && &term.text == upper) {
                break;
            }
        }
        push_clause(&mut terms, term)?;
    }
    Ok(multi_term_or_empty(terms, query.boost, "range"))
}

fn rewrite_wildcard(query: &WildcardQuery, reader: &IndexReader) -> Result<Query> {
    let pattern = &query.term.text;
    let prefix: String = pattern
        .chars()
        .take_while(|c| *c != '*' && *c != '?')
        .collect();
    let start = Term::new(query.term.field.clone(), prefix.clone());
    let mut cursor = reader.terms_from(&start)?;
    let mut terms = Vec::new();
    while let Some((term, _)) = cursor.next()? {
        if term.field != query.term.field || !term.text.starts_with(&prefix) {
            break;
        }
        if wildcard_match(pattern, &term.text) {
            push_clause(&mut terms, term)?;
        }
    }
    Ok(multi_term_or_empty(terms, query.boost, "wildcard"))
}

fn rewrite_fuzzy(query: &FuzzyQuery, reader: &IndexReader) -> Result<Query> {
    let target: Vec<char> = query.term.text.chars().collect();
    let prefix_len = query.prefix_length.min(target.len());
    let prefix: String = target[..prefix_len].iter().collect();
    let target_suffix = &target[prefix_len..];

    let start = Term::new(query.term.field.clone(), prefix.clone());
    let mut cursor = reader.terms_from(&start)?;
    let mut terms = Vec::new();
    while let Some((term, _)) = cursor.next()? {
        if term.field != query.term.field || !term.text.starts_with(&prefix) {
            break;
        }
        let candidate: Vec<char> = term.text.chars().collect();
        let candidate_suffix = &candidate[prefix_len.min(candidate.len())..];
        let distance = levenshtein(target_suffix, candidate_suffix);
        let denominator = target_suffix.len().min(candidate_suffix.len()).max(1);
        let similarity = 1.0 - distance as f32 / denominator as f32;
        if similarity >= query.min_similarity {
            push_clause(&mut terms, term)?;
        }
    }
    Ok(multi_term_or_empty(terms, query.boost, "fuzzy"))
}

fn push_clause(terms: &mut Vec<(Term, Sign)>, term: Term) -> Result<()> {
    if terms.len() >= MAX_CLAUSES {
        return Err(Error::InvalidArgument(format!(
            "rewrite expands past {} terms",
            MAX_CLAUSES
        )));
    }
    terms.push((term, Sign::Optional));
    Ok(())
}

fn multi_term_or_empty(terms: Vec<(Term, Sign)>, boost: f32, kind: &str) -> Query {
    debug!(
        target: "lucerna::search",
        kind,
        expanded = terms.len(),
        "rewrote multi-term query"
    );
    if terms.is_empty() {
        Query::Empty
    } else {
        Query::MultiTerm(MultiTermQuery { terms, boost })
    }
}

/// Match `text` against a pattern of literals, `?` and `*`.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    // dp[j]: pattern[..i] can consume text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for &pc in &pattern {
        let mut next = vec![false; text.len() + 1];
        if pc == '*' {
            // a star extends any previous match to all longer prefixes
            let mut reachable = false;
            for (j, slot) in next.iter_mut().enumerate() {
                reachable |= dp[j];
                *slot = reachable;
            }
        } else {
            for j in 0..text.len() {
                next[j + 1] = dp[j] && (pc == '?' || text[j] == pc);
            }
        }
        dp = next;
    }
    dp[text.len()]
}

/// Levenshtein distance over char slices, two-row DP.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("te?t", "test"));
        assert!(wildcard_match("te*t", "tent"));
        assert!(wildcard_match("te*", "te"));
        assert!(wildcard_match("*st", "test"));
        assert!(wildcard_match("t*e*t", "tet"));
        assert!(!wildcard_match("te?t", "tet"));
        assert!(!wildcard_match("te*t", "tesla"));
        assert!(wildcard_match("*", ""));
    }

    #[test]
    fn test_levenshtein() {
        let chars = |s: &str| s.chars().collect::<Vec<char>>();
        assert_eq!(levenshtein(&chars("colour"), &chars("color")), 1);
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
        assert_eq!(levenshtein(&chars("abc"), &chars("abc")), 0);
    }

    #[test]
    fn test_phrase_builder_positions() {
        let Query::Phrase(p) = Query::phrase("body", &["a", "b", "c"], 1) else {
            panic!("expected phrase");
        };
        assert_eq!(p.positions, vec![0, 1, 2]);
        assert_eq!(p.slop, 1);
        assert!(p.terms.iter().all(|t| t.field == "body"));
    }

    #[test]
    fn test_boost_accessors() {
        let mut q = Query::term("f", "x");
        assert_eq!(q.boost(), 1.0);
        q.set_boost(2.5);
        assert_eq!(q.boost(), 2.5);
    }
}
