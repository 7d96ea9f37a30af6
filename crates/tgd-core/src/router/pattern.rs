use regex::Regex;

use crate::{errors::Error, Result};

/// Ordered (pattern, handler) list; the lowest-priority routing mechanism.
///
/// Patterns are evaluated in registration order on every lookup and the
/// first one that matches wins. Nothing is cached. Matching uses
/// `Regex::is_match`, i.e. unanchored search; anchor with `^...$` for a full
/// match.
#[derive(Debug)]
pub struct PatternRouter<V> {
    routes: Vec<(Regex, V)>,
}

impl<V> Default for PatternRouter<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PatternRouter<V> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn register(&mut self, pattern: Regex, value: V) {
        self.routes.push((pattern, value));
    }

    /// Compile and append. An invalid pattern is reported to the caller and
    /// nothing is registered.
    pub fn register_str(&mut self, pattern: &str, value: V) -> Result<()> {
        let re = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.register(re, value);
        Ok(())
    }

    pub fn find(&self, discriminant: &str) -> Option<&V> {
        self.routes
            .iter()
            .find(|(re, _)| re.is_match(discriminant))
            .map(|(_, v)| v)
    }

    /// Drop every pattern whose source text equals `pattern`. Returns how many
    /// were removed.
    pub fn unregister(&mut self, pattern: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|(re, _)| re.as_str() != pattern);
        before - self.routes.len()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registered_match_wins() {
        let mut p = PatternRouter::new();
        p.register_str(r"^/num\d+$", "digits").unwrap();
        p.register_str(r"^/num", "prefix").unwrap();
        p.register_str(".*", "any").unwrap();

        assert_eq!(p.find("/num42"), Some(&"digits"));
        assert_eq!(p.find("/numx"), Some(&"prefix"));
        assert_eq!(p.find("hello"), Some(&"any"));
    }

    #[test]
    fn no_match_is_none() {
        let mut p = PatternRouter::new();
        p.register_str("^a$", 1).unwrap();
        assert_eq!(p.find("b"), None);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut p: PatternRouter<u8> = PatternRouter::new();
        let err = p.register_str("(", 1).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
        assert!(p.is_empty());
    }

    #[test]
    fn unregister_by_source_text() {
        let mut p = PatternRouter::new();
        p.register_str("^a", 1).unwrap();
        p.register_str("^b", 2).unwrap();
        p.register_str("^a", 3).unwrap();
        assert_eq!(p.unregister("^a"), 2);
        assert_eq!(p.find("abc"), None);
        assert_eq!(p.find("bcd"), Some(&2));
    }
}
