//! Default tf·idf similarity

use lucerna_index::length_norm;

/// The scoring formula's tunable pieces.
///
/// One stateless implementation; every factor is an associated
/// function so weights and scorers call them without threading an
/// object through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Similarity;

impl Similarity {
    /// Term-frequency factor: `√freq`.
    pub fn tf(freq: f32) -> f32 {
        freq.sqrt()
    }

    /// Inverse document frequency: `1 + ln(numDocs / (docFreq + 1))`.
    pub fn idf(doc_freq: u32, num_docs: u32) -> f32 {
        1.0 + (num_docs as f32 / (doc_freq as f32 + 1.0)).ln()
    }

    /// Length normalization: `1/√numTokens`.
    pub fn length_norm(num_tokens: u32) -> f32 {
        length_norm(num_tokens)
    }

    /// Boolean coordination factor: `overlap / max`.
    pub fn coord(overlap: usize, max: usize) -> f32 {
        if max == 0 {
            1.0
        } else {
            overlap as f32 / max as f32
        }
    }

    /// Query normalization: `1/√sumOfSquaredWeights`.
    pub fn query_norm(sum_of_squared_weights: f32) -> f32 {
        if sum_of_squared_weights <= 0.0 {
            1.0
        } else {
            1.0 / sum_of_squared_weights.sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tf_grows_sublinearly() {
        assert_eq!(Similarity::tf(1.0), 1.0);
        assert_eq!(Similarity::tf(4.0), 2.0);
        assert!(Similarity::tf(2.0) < 2.0);
    }

    #[test]
    fn test_idf_rewards_rare_terms() {
        let rare = Similarity::idf(1, 1000);
        let common = Similarity::idf(900, 1000);
        assert!(rare > common);
        assert!(Similarity::idf(999, 1000) > 0.0);
    }

    #[test]
    fn test_coord() {
        assert_eq!(Similarity::coord(2, 4), 0.5);
        assert_eq!(Similarity::coord(0, 0), 1.0);
    }

    #[test]
    fn test_query_norm_guards_zero() {
        assert_eq!(Similarity::query_norm(0.0), 1.0);
        assert_eq!(Similarity::query_norm(4.0), 0.5);
    }
}
