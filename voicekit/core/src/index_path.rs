//! Conversation Coordinates
//!
//! A `(section, row)` pair addressing one entry of a [`Conversation`].
//! The type is a plain value; it knows nothing about the collection it
//! points into, so every read must be preceded by
//! [`Conversation::is_bounded`].
//!
//! [`Conversation`]: crate::conversation::Conversation
//! [`Conversation::is_bounded`]: crate::conversation::Conversation::is_bounded

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coordinate of an entry inside a conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexPath {
    /// Section (day bucket) index
    pub section: usize,
    /// Row inside the section
    pub row: usize,
}

impl IndexPath {
    /// Create a new coordinate
    #[must_use]
    pub const fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }

    /// The first coordinate of any collection
    #[must_use]
    pub const fn first() -> Self {
        Self { section: 0, row: 0 }
    }

    /// Same section, different row
    #[must_use]
    pub const fn with_row(self, row: usize) -> Self {
        Self {
            section: self.section,
            row,
        }
    }

    /// Same row, different section
    #[must_use]
    pub const fn with_section(self, section: usize) -> Self {
        Self {
            section,
            row: self.row,
        }
    }

    /// Move the row by `delta` inside the same section
    ///
    /// Returns `None` when the result would be negative. No section
    /// rollover happens here; that needs the collection extents and lives
    /// in `Conversation::before` / `Conversation::after`.
    #[must_use]
    pub fn offset_row(self, delta: isize) -> Option<Self> {
        self.row
            .checked_add_signed(delta)
            .map(|row| self.with_row(row))
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.row)
    }
}

impl From<(usize, usize)> for IndexPath {
    fn from((section, row): (usize, usize)) -> Self {
        Self::new(section, row)
    }
}

/// Sort coordinates descending by `(section, row)` and drop duplicates
///
/// Bulk removal must walk coordinates in this order so that removing one
/// entry never shifts a coordinate that is still pending.
#[must_use]
pub fn sorted_descending(paths: &[IndexPath]) -> Vec<IndexPath> {
    let mut sorted = paths.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_section_major() {
        assert!(IndexPath::new(0, 9) < IndexPath::new(1, 0));
        assert!(IndexPath::new(2, 1) > IndexPath::new(2, 0));
    }

    #[test]
    fn test_offset_row() {
        let path = IndexPath::new(3, 2);
        assert_eq!(path.offset_row(1), Some(IndexPath::new(3, 3)));
        assert_eq!(path.offset_row(-2), Some(IndexPath::new(3, 0)));
        assert_eq!(path.offset_row(-3), None);
    }

    #[test]
    fn test_sorted_descending_dedups() {
        let paths = [
            IndexPath::new(0, 1),
            IndexPath::new(1, 0),
            IndexPath::new(0, 3),
            IndexPath::new(1, 0),
        ];
        assert_eq!(
            sorted_descending(&paths),
            vec![
                IndexPath::new(1, 0),
                IndexPath::new(0, 3),
                IndexPath::new(0, 1),
            ]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(IndexPath::new(4, 7).to_string(), "[4, 7]");
    }
}
