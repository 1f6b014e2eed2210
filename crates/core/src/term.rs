//! Term type: the `(field, text)` pair that keys the inverted index

use std::cmp::Ordering;
use std::fmt;

/// A term is a word from text, scoped to the field it occurred in.
///
/// Terms order lexicographically by `(field, text)`; this is the sort
/// order of the on-disk term dictionary within a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Term {
    /// Name of the field the term belongs to
    pub field: String,
    /// Term text after analysis
    pub text: String,
}

impl Term {
    /// Create a new term.
    pub fn new(field: impl Into<String>, text: impl Into<String>) -> Self {
        Term {
            field: field.into(),
            text: text.into(),
        }
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.field
            .cmp(&other.field)
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_ordering() {
        let a = Term::new("body", "apple");
        let b = Term::new("body", "banana");
        let c = Term::new("title", "apple");

        assert!(a < b);
        assert!(b < c); // field compares before text
        assert!(a < c);
    }

    #[test]
    fn test_term_display() {
        let t = Term::new("title", "quick");
        assert_eq!(t.to_string(), "title:quick");
    }
}
