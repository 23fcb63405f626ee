//! Identifiers the model has observed in tool results during a request.
//!
//! Grows monotonically; transferable across requests via the `past.known`
//! field of a request. The optional know-before-use guard consults this set
//! before a query or terminal call may reference an IRI.

use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct KnownSet {
    items: HashSet<String>,
}

/// Angle brackets around full IRIs are presentation, not identity.
fn normalize(identifier: &str) -> &str {
    identifier
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(identifier)
}

impl KnownSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for identifier in identifiers {
            set.insert(identifier.as_ref());
        }
        set
    }

    pub fn insert(&mut self, identifier: &str) {
        self.items.insert(normalize(identifier).to_string());
    }

    pub fn extend<I, S>(&mut self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for identifier in identifiers {
            self.insert(identifier.as_ref());
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.items.contains(normalize(identifier))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sorted snapshot for the terminal output event.
    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut items: Vec<String> = self.items.iter().cloned().collect();
        items.sort();
        items
    }
}
