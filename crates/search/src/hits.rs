//! Hit collection

/// One ranked search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryHit {
    /// Global document id
    pub doc: u32,
    /// Relevance score
    pub score: f32,
}

/// Rank raw scores: non-positive scores are dropped, the rest sort by
/// descending score with ascending doc id breaking ties.
pub fn rank(mut hits: Vec<QueryHit>) -> Vec<QueryHit> {
    hits.retain(|h| h.score > 0.0);
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.doc.cmp(&b.doc)));
    hits
}
