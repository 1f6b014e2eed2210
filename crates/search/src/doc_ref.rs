//! Document references at the API boundary
//!
//! Callers address documents either by global id or by a hit they got
//! back from a search; both resolve to the id.

use crate::hits::QueryHit;

/// A document id or a search hit standing in for one.
#[derive(Debug, Clone, Copy)]
pub enum DocRef {
    /// Global document id
    Id(u32),
    /// A hit returned by `find`
    Hit(QueryHit),
}

impl DocRef {
    /// The global document id referred to.
    pub fn id(&self) -> u32 {
        match self {
            DocRef::Id(id) => *id,
            DocRef::Hit(hit) => hit.doc,
        }
    }
}

impl From<u32> for DocRef {
    fn from(id: u32) -> Self {
        DocRef::Id(id)
    }
}

impl From<QueryHit> for DocRef {
    fn from(hit: QueryHit) -> Self {
        DocRef::Hit(hit)
    }
}

impl From<&QueryHit> for DocRef {
    fn from(hit: &QueryHit) -> Self {
        DocRef::Hit(*hit)
    }
}
