//! Accumulated-change ledger maintained across steps.
//!
//! The model sees what it has already produced through this ledger, so later
//! steps can build on earlier ones without re-reading disk. Invariant: at most
//! one entry per path; iteration order reflects the last touch.

use crate::core::types::FileChange;

/// Ordered collection of file changes, unique by path with last-write-wins
/// semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedChanges {
    entries: Vec<FileChange>,
}

impl AccumulatedChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one change. An existing entry for the same path is replaced and
    /// the path moves to the end of the iteration order.
    pub fn record(&mut self, change: FileChange) {
        self.entries.retain(|existing| existing.path != change.path);
        self.entries.push(change);
    }

    /// Record a whole step's worth of changes in emission order.
    pub fn record_all(&mut self, changes: &[FileChange]) {
        for change in changes {
            self.record(change.clone());
        }
    }

    /// Latest content recorded for a path, if any.
    pub fn get(&self, path: &str) -> Option<&FileChange> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    /// Iterate entries in last-touch order.
    pub fn iter(&self) -> impl Iterator<Item = &FileChange> {
        self.entries.iter()
    }

    /// Paths of all recorded entries, in last-touch order.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, content: &str) -> FileChange {
        FileChange {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn later_writes_replace_earlier_entries() {
        let mut acc = AccumulatedChanges::new();
        acc.record(change("app/page.tsx", "v1"));
        acc.record(change("app/layout.tsx", "l1"));
        acc.record(change("app/page.tsx", "v2"));

        assert_eq!(acc.len(), 2);
        assert_eq!(acc.get("app/page.tsx").expect("entry").content, "v2");
    }

    #[test]
    fn order_reflects_last_touch() {
        let mut acc = AccumulatedChanges::new();
        acc.record(change("a.ts", "1"));
        acc.record(change("b.ts", "1"));
        acc.record(change("a.ts", "2"));

        assert_eq!(acc.paths(), vec!["b.ts", "a.ts"]);
    }

    #[test]
    fn record_all_preserves_emission_order() {
        let mut acc = AccumulatedChanges::new();
        acc.record_all(&[change("x.ts", "1"), change("y.ts", "1")]);
        assert_eq!(acc.paths(), vec!["x.ts", "y.ts"]);
        assert!(!acc.is_empty());
    }
}
