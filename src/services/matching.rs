use std::collections::HashSet;
use std::fmt;

/// Comparison key for invoice numbers: trimmed and lowercased. No fuzzy matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchKey(String);

impl MatchKey {
    /// Returns `None` for blank input, which never matches anything.
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Snapshot of invoice numbers already registered, taken once per import.
#[derive(Debug, Clone, Default)]
pub struct KnownInvoiceNumbers {
    keys: HashSet<MatchKey>,
}

impl KnownInvoiceNumbers {
    pub fn from_numbers<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: numbers
                .into_iter()
                .filter_map(|n| MatchKey::new(n.as_ref()))
                .collect(),
        }
    }

    pub fn contains(&self, raw: &str) -> bool {
        MatchKey::new(raw).map_or(false, |key| self.keys.contains(&key))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(MatchKey::new("ABC-1 "), MatchKey::new("abc-1"));
        assert_eq!(MatchKey::new("  "), None);
    }

    #[test]
    fn test_known_numbers() {
        let known = KnownInvoiceNumbers::from_numbers(vec!["FAC-100", " fac-101", ""]);
        assert_eq!(known.len(), 2);
        assert!(known.contains("fac-100"));
        assert!(known.contains("FAC-101 "));
        assert!(!known.contains("FAC-200"));
        assert!(!known.contains(""));
    }
}
