//! Day Sections
//!
//! A [`Section`] groups the entries of one calendar day. Days are computed
//! in UTC from the section's anchor timestamp so that bucketing does not
//! depend on the machine's local zone.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::bubble::Bubble;
use crate::conversation::SortOrder;

/// Entries sharing one calendar day
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Timestamp that decides the section's day
    pub anchor: DateTime<Utc>,
    /// Ordered entries
    pub bubbles: Vec<Bubble>,
    /// Selected for a batch operation
    #[serde(default)]
    pub is_selected: bool,
}

impl Section {
    /// Start a section with its first entry
    #[must_use]
    pub fn with_bubble(bubble: Bubble) -> Self {
        Self {
            anchor: bubble.timestamp,
            bubbles: vec![bubble],
            is_selected: false,
        }
    }

    /// Calendar day of this section
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.anchor.date_naive()
    }

    /// Day-match predicate used by insertion
    #[must_use]
    pub fn matches_day(&self, timestamp: &DateTime<Utc>) -> bool {
        self.day() == timestamp.date_naive()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    /// Whether the section holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    /// Row at which `timestamp` belongs
    ///
    /// Entries with an equal timestamp keep insertion order: the new entry
    /// lands after them when ascending and before them when descending,
    /// which is the same visual position once the order is reversed.
    #[must_use]
    pub fn insertion_row(&self, timestamp: &DateTime<Utc>, order: SortOrder) -> usize {
        match order {
            SortOrder::Ascending => self
                .bubbles
                .partition_point(|existing| existing.timestamp <= *timestamp),
            SortOrder::Descending => self
                .bubbles
                .partition_point(|existing| existing.timestamp > *timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_matches_day() {
        let section = Section::with_bubble(Bubble::user_text("a").at(at(3, 8)));
        assert!(section.matches_day(&at(3, 23)));
        assert!(!section.matches_day(&at(4, 0)));
    }

    #[test]
    fn test_insertion_row_ascending_keeps_ties_in_order() {
        let mut section = Section::with_bubble(Bubble::user_text("a").at(at(3, 8)));
        section.bubbles.push(Bubble::user_text("b").at(at(3, 10)));

        assert_eq!(section.insertion_row(&at(3, 7), SortOrder::Ascending), 0);
        assert_eq!(section.insertion_row(&at(3, 8), SortOrder::Ascending), 1);
        assert_eq!(section.insertion_row(&at(3, 11), SortOrder::Ascending), 2);
    }

    #[test]
    fn test_insertion_row_descending() {
        let mut section = Section::with_bubble(Bubble::user_text("b").at(at(3, 10)));
        section.bubbles.push(Bubble::user_text("a").at(at(3, 8)));

        assert_eq!(section.insertion_row(&at(3, 11), SortOrder::Descending), 0);
        assert_eq!(section.insertion_row(&at(3, 8), SortOrder::Descending), 1);
        assert_eq!(section.insertion_row(&at(3, 7), SortOrder::Descending), 2);
    }
}
