//! Discriminant routing: exact keys first, then regex patterns.

pub mod exact;
pub mod pattern;

pub use exact::ExactRouter;
pub use pattern::PatternRouter;

/// Exact and pattern routes for one event category.
#[derive(Debug)]
pub struct Routes<H> {
    pub exact: ExactRouter<H>,
    pub patterns: PatternRouter<H>,
}

impl<H> Default for Routes<H> {
    fn default() -> Self {
        Self {
            exact: ExactRouter::new(),
            patterns: PatternRouter::new(),
        }
    }
}

impl<H: Clone> Routes<H> {
    /// Exact match wins; patterns are only consulted on a miss.
    pub fn resolve(&self, discriminant: &str) -> Option<H> {
        if let Some(h) = self.exact.lookup(discriminant) {
            return Some(h.clone());
        }
        self.patterns.find(discriminant).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_beats_pattern() {
        let mut r: Routes<&'static str> = Routes::default();
        r.patterns.register_str(".*", "A").unwrap();
        r.exact.register("/help", "B");

        assert_eq!(r.resolve("/help"), Some("B"));
        assert_eq!(r.resolve("/xyz"), Some("A"));
    }

    #[test]
    fn miss_is_none() {
        let mut r: Routes<u8> = Routes::default();
        r.exact.register("/a", 1);
        assert_eq!(r.resolve("/b"), None);
    }
}
