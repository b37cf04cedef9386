//! Filter expression parsing
//!
//! Filters are query-string-like: `category=wellness`, or several pairs joined
//! with `&`, all of which must hold. Parsing is local and never touches the
//! network.

use crate::types::KeywordEntry;

/// Error type for filter parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("invalid filter expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
}

impl FilterError {
    fn invalid(expr: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

/// Predicate over keyword entries derived from a filter expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPredicate {
    categories: Vec<String>,
}

impl FilterPredicate {
    /// Predicate that accepts every entry.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// True if the predicate places no constraint.
    pub fn is_accept_all(&self) -> bool {
        self.categories.is_empty()
    }

    /// Categories an entry must carry (all of them).
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    #[inline]
    pub fn accepts(&self, entry: &KeywordEntry) -> bool {
        self.categories.iter().all(|c| entry.has_category(c))
    }
}

/// Parse a filter expression into a predicate.
pub fn parse_filter(expr: &str) -> Result<FilterPredicate, FilterError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Ok(FilterPredicate::accept_all());
    }

    let mut categories = Vec::new();

    for raw in trimmed.split('&') {
        let pair = raw.trim();
        if pair.is_empty() {
            return Err(FilterError::invalid(expr, "empty clause"));
        }

        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| FilterError::invalid(expr, format!("expected key=value, got '{pair}'")))?;

        let key = key.trim();
        let value = value.trim();

        if value.is_empty() {
            return Err(FilterError::invalid(expr, format!("missing value for '{key}'")));
        }

        if key.eq_ignore_ascii_case("category") {
            let category = value.to_lowercase();
            if !categories.contains(&category) {
                categories.push(category);
            }
            continue;
        }

        return Err(FilterError::invalid(expr, format!("unknown key '{key}'")));
    }

    Ok(FilterPredicate { categories })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(categories: &[&str]) -> KeywordEntry {
        KeywordEntry::new("sewerslide", categories.iter().copied())
    }

    #[test]
    fn test_empty_accepts_all() {
        let predicate = parse_filter("").unwrap();
        assert!(predicate.is_accept_all());
        assert!(predicate.accepts(&entry(&[])));
        assert!(parse_filter("   ").unwrap().is_accept_all());
    }

    #[test]
    fn test_single_category() {
        let predicate = parse_filter("category=wellness").unwrap();
        assert_eq!(predicate.categories(), ["wellness"]);
        assert!(predicate.accepts(&entry(&["wellness", "other"])));
        assert!(!predicate.accepts(&entry(&["self-harm"])));
        assert!(!predicate.accepts(&entry(&[])));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let predicate = parse_filter(" Category = Wellness ").unwrap();
        assert!(predicate.accepts(&entry(&["WELLNESS"])));
    }

    #[test]
    fn test_conjunction() {
        let predicate = parse_filter("category=a&category=b").unwrap();
        assert!(predicate.accepts(&entry(&["a", "b", "c"])));
        assert!(!predicate.accepts(&entry(&["a"])));
    }

    #[test]
    fn test_duplicate_clause_collapses() {
        let predicate = parse_filter("category=a&category=A").unwrap();
        assert_eq!(predicate.categories().len(), 1);
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in ["category", "category=", "lang=en", "=x", "category=a&", "&category=a", "category=a&&category=b"] {
            assert!(
                matches!(parse_filter(expr), Err(FilterError::Invalid { .. })),
                "expected '{expr}' to be rejected"
            );
        }
    }
}
