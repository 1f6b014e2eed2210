//! Tokenization contract
//!
//! Analysis is an external collaborator to the index engine: the engine
//! consumes a stream of `(token, position)` pairs per field and never
//! inspects raw text itself. This module defines that contract and a
//! minimal default implementation.
//!
//! The default pipeline is intentionally small: split on alphanumeric
//! runs, lowercase. No stemming and no stopwords, so indexed terms match
//! query terms byte-for-byte.

/// One token produced by analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Term text after normalization
    pub text: String,
    /// Position of the token within the field, starting at 0
    pub position: u32,
}

/// Produces the token stream for a field value.
///
/// Implementations must emit strictly non-decreasing positions.
pub trait Analyzer: Send + Sync {
    /// Tokenize one field value.
    fn analyze(&self, field: &str, text: &str) -> Vec<Token>;
}

/// Default analyzer: lowercase alphanumeric runs, consecutive positions.
#[derive(Debug, Clone, Default)]
pub struct SimpleAnalyzer;

impl Analyzer for SimpleAnalyzer {
    fn analyze(&self, _field: &str, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut position = 0u32;

        for ch in text.chars() {
            if ch.is_alphanumeric() {
                current.extend(ch.to_lowercase());
            } else if !current.is_empty() {
                tokens.push(Token {
                    text: std::mem::take(&mut current),
                    position,
                });
                position += 1;
            }
        }
        if !current.is_empty() {
            tokens.push(Token {
                text: current,
                position,
            });
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_analyzer_splits_and_lowercases() {
        let tokens = SimpleAnalyzer.analyze("body", "The Quick, Brown FOX!");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["the", "quick", "brown", "fox"]);
    }

    #[test]
    fn test_simple_analyzer_positions_are_consecutive() {
        let tokens = SimpleAnalyzer.analyze("body", "a b  c");
        let positions: Vec<u32> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_simple_analyzer_empty_input() {
        assert!(SimpleAnalyzer.analyze("body", "").is_empty());
        assert!(SimpleAnalyzer.analyze("body", " ,;- ").is_empty());
    }

    #[test]
    fn test_simple_analyzer_keeps_digits() {
        let tokens = SimpleAnalyzer.analyze("body", "error 404 page");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["error", "404", "page"]);
    }
}
