//! Conversation Collection
//!
//! The [`Conversation`] is an ordered list of day [`Section`]s, each owning
//! an ordered list of [`Bubble`]s. It is the single source of truth the
//! host view renders; every mutation reports the coordinates it touched so
//! the view can be updated in lockstep.
//!
//! # Invariants
//!
//! - No section is ever empty. Removing the last entry of a section removes
//!   the section.
//! - Sections are sorted by day, entries inside a section by timestamp,
//!   both following [`SortOrder`].
//! - Coordinate reads return `None` when out of bounds; callers consult
//!   [`Conversation::is_bounded`] before trusting a coordinate.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::bubble::{Bubble, BubbleKey};
use crate::index_path::{sorted_descending, IndexPath};
use crate::section::Section;

/// Direction in which days and entries are laid out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first (chat layout)
    #[default]
    Ascending,
    /// Newest first (history browser layout)
    Descending,
}

impl SortOrder {
    /// Whether a section of day `a` is laid out before a section of day `b`
    #[must_use]
    pub fn day_precedes(self, a: NaiveDate, b: NaiveDate) -> bool {
        match self {
            Self::Ascending => a < b,
            Self::Descending => a > b,
        }
    }
}

/// Where an inserted entry landed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Insertion {
    /// Coordinate of the new entry
    pub index_path: IndexPath,
    /// Whether a section was created for it
    pub new_section: bool,
}

/// Result of a bulk removal
///
/// Coordinates are expressed in the collection as it was *before* the
/// removal, which is what batch view updates expect.
#[derive(Clone, Debug, Default)]
pub struct Removal {
    /// Removed entries with their former coordinates, ascending
    pub removed: Vec<(IndexPath, Bubble)>,
    /// Sections that became empty and were dropped, ascending
    pub deleted_sections: Vec<usize>,
}

impl Removal {
    /// Row coordinates to delete, excluding rows of deleted sections
    #[must_use]
    pub fn row_paths(&self) -> Vec<IndexPath> {
        self.removed
            .iter()
            .map(|(path, _)| *path)
            .filter(|path| !self.deleted_sections.contains(&path.section))
            .collect()
    }

    /// Whether nothing was removed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    /// History ids of the removed entries, deduplicated, in removal order
    #[must_use]
    pub fn history_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for (_, bubble) in &self.removed {
            if let Some(id) = &bubble.history_id {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }
}

/// Day-bucketed conversation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub(crate) sections: Vec<Section>,
    order: SortOrder,
    /// Section touched by the last insertion; the next insertion looks
    /// here and at its neighbours first.
    #[serde(skip)]
    cursor: usize,
}

impl Conversation {
    /// Create an empty conversation
    #[must_use]
    pub fn new(order: SortOrder) -> Self {
        Self {
            sections: Vec::new(),
            order,
            cursor: 0,
        }
    }

    /// Layout order
    #[must_use]
    pub fn order(&self) -> SortOrder {
        self.order
    }

    /// All sections
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// One section
    #[must_use]
    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// Number of sections
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Number of rows in a section (0 when out of bounds)
    #[must_use]
    pub fn row_count(&self, section: usize) -> usize {
        self.sections.get(section).map_or(0, Section::len)
    }

    /// Total number of visible entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.iter().map(Section::len).sum()
    }

    /// Whether the conversation has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Whether `path` addresses an existing entry
    #[must_use]
    pub fn is_bounded(&self, path: IndexPath) -> bool {
        path.section < self.sections.len() && path.row < self.sections[path.section].len()
    }

    /// Entry at `path`
    #[must_use]
    pub fn get(&self, path: IndexPath) -> Option<&Bubble> {
        self.sections.get(path.section)?.bubbles.get(path.row)
    }

    /// Mutable entry at `path`
    pub fn get_mut(&mut self, path: IndexPath) -> Option<&mut Bubble> {
        self.sections.get_mut(path.section)?.bubbles.get_mut(path.row)
    }

    /// Replace the entry at `path`, returning the previous one
    ///
    /// Returns `None` (and drops `bubble`) when `path` is out of bounds.
    pub fn set(&mut self, path: IndexPath, bubble: Bubble) -> Option<Bubble> {
        let slot = self.get_mut(path)?;
        Some(std::mem::replace(slot, bubble))
    }

    /// Coordinate preceding `path`, rolling over to the previous section
    #[must_use]
    pub fn before(&self, path: IndexPath) -> Option<IndexPath> {
        if !self.is_bounded(path) {
            return None;
        }
        if path.row > 0 {
            return Some(path.with_row(path.row - 1));
        }
        let section = path.section.checked_sub(1)?;
        let rows = self.row_count(section);
        Some(IndexPath::new(section, rows.checked_sub(1)?))
    }

    /// Coordinate following `path`, rolling over to the next section
    #[must_use]
    pub fn after(&self, path: IndexPath) -> Option<IndexPath> {
        if !self.is_bounded(path) {
            return None;
        }
        if path.row + 1 < self.row_count(path.section) {
            return Some(path.with_row(path.row + 1));
        }
        let section = path.section + 1;
        (self.row_count(section) > 0).then(|| IndexPath::new(section, 0))
    }

    /// Last coordinate of the collection
    #[must_use]
    pub fn last_index_path(&self) -> Option<IndexPath> {
        let section = self.sections.len().checked_sub(1)?;
        Some(IndexPath::new(section, self.sections[section].len().checked_sub(1)?))
    }

    /// Iterate entries with their coordinates, in display order
    pub fn iter(&self) -> impl Iterator<Item = (IndexPath, &Bubble)> + '_ {
        self.sections.iter().enumerate().flat_map(|(s, section)| {
            section
                .bubbles
                .iter()
                .enumerate()
                .map(move |(r, bubble)| (IndexPath::new(s, r), bubble))
        })
    }

    /// First coordinate whose entry satisfies `predicate`
    pub fn first_index<P>(&self, mut predicate: P) -> Option<IndexPath>
    where
        P: FnMut(&Bubble) -> bool,
    {
        self.iter()
            .find(|(_, bubble)| predicate(bubble))
            .map(|(path, _)| path)
    }

    /// Last coordinate whose entry satisfies `predicate`
    pub fn last_index<P>(&self, mut predicate: P) -> Option<IndexPath>
    where
        P: FnMut(&Bubble) -> bool,
    {
        self.iter()
            .filter(|(_, bubble)| predicate(bubble))
            .map(|(path, _)| path)
            .last()
    }

    /// Coordinate of the entry with `key`
    #[must_use]
    pub fn index_of(&self, key: BubbleKey) -> Option<IndexPath> {
        self.first_index(|bubble| bubble.key == key)
    }

    /// Coordinates of every visible entry carrying `history_id`
    #[must_use]
    pub fn indexes_of_history(&self, history_id: &str) -> Vec<IndexPath> {
        self.iter()
            .filter(|(_, bubble)| bubble.history_id.as_deref() == Some(history_id))
            .map(|(path, _)| path)
            .collect()
    }

    /// Insert an entry at its sorted position
    ///
    /// The section touched by the previous insertion and its two neighbours
    /// are tried first; insertions usually arrive grouped by day, so this
    /// almost always hits without a scan. Otherwise a matching section is
    /// searched, and failing that a new section is created at its sorted
    /// position.
    pub fn insert(&mut self, bubble: Bubble) -> Insertion {
        let timestamp = bubble.timestamp;

        if self.sections.is_empty() {
            self.sections.push(Section::with_bubble(bubble));
            self.cursor = 0;
            return Insertion {
                index_path: IndexPath::first(),
                new_section: true,
            };
        }

        let cursor = self.cursor.min(self.sections.len() - 1);
        let candidates = [Some(cursor), cursor.checked_sub(1), Some(cursor + 1)];
        let matching = candidates
            .into_iter()
            .flatten()
            .filter(|&index| index < self.sections.len())
            .find(|&index| self.sections[index].matches_day(&timestamp))
            .or_else(|| {
                self.sections
                    .iter()
                    .position(|section| section.matches_day(&timestamp))
            });

        if let Some(section_index) = matching {
            let section = &mut self.sections[section_index];
            let row = section.insertion_row(&timestamp, self.order);
            section.bubbles.insert(row, bubble);
            self.cursor = section_index;
            return Insertion {
                index_path: IndexPath::new(section_index, row),
                new_section: false,
            };
        }

        let day = timestamp.date_naive();
        let order = self.order;
        let section_index = self
            .sections
            .partition_point(|section| order.day_precedes(section.day(), day));
        self.sections
            .insert(section_index, Section::with_bubble(bubble));
        self.cursor = section_index;
        tracing::trace!(section = section_index, %day, "Created day section");

        Insertion {
            index_path: IndexPath::new(section_index, 0),
            new_section: true,
        }
    }

    /// Insert each entry in turn
    pub fn append_all<I>(&mut self, bubbles: I) -> Vec<Insertion>
    where
        I: IntoIterator<Item = Bubble>,
    {
        bubbles.into_iter().map(|bubble| self.insert(bubble)).collect()
    }

    /// Insert at an explicit coordinate, bypassing sorting
    ///
    /// `path.row` may equal the section length (append). Returns `false`
    /// when the coordinate cannot hold an entry.
    pub fn insert_at(&mut self, path: IndexPath, bubble: Bubble) -> bool {
        match self.sections.get_mut(path.section) {
            Some(section) if path.row <= section.len() => {
                section.bubbles.insert(path.row, bubble);
                true
            }
            _ => false,
        }
    }

    /// Remove the entries at `paths`
    ///
    /// Coordinates are applied in descending `(section, row)` order so that
    /// no pending coordinate is invalidated. Out-of-bounds coordinates are
    /// skipped. Sections left empty are removed.
    pub fn remove(&mut self, paths: &[IndexPath]) -> Removal {
        let mut removal = Removal::default();

        for path in sorted_descending(paths) {
            if !self.is_bounded(path) {
                tracing::warn!(%path, "Skipping removal of out-of-bounds entry");
                continue;
            }
            let bubble = self.sections[path.section].bubbles.remove(path.row);
            removal.removed.push((path, bubble));

            if self.sections[path.section].is_empty() {
                self.sections.remove(path.section);
                removal.deleted_sections.push(path.section);
            }
        }

        removal.removed.reverse();
        removal.deleted_sections.reverse();
        self.cursor = self.cursor.min(self.sections.len().saturating_sub(1));

        tracing::debug!(
            removed = removal.removed.len(),
            sections_removed = removal.deleted_sections.len(),
            remaining = self.len(),
            "Removed conversation entries"
        );
        removal
    }

    /// Remove a whole section
    pub fn remove_section(&mut self, index: usize) -> Option<Section> {
        if index >= self.sections.len() {
            return None;
        }
        let section = self.sections.remove(index);
        self.cursor = self.cursor.min(self.sections.len().saturating_sub(1));
        Some(section)
    }

    /// Drop every section that ended up empty
    pub(crate) fn purge_empty_sections(&mut self) -> Vec<usize> {
        let mut purged = Vec::new();
        let mut index = 0;
        self.sections.retain(|section| {
            let keep = !section.is_empty();
            if !keep {
                purged.push(index);
            }
            index += 1;
            keep
        });
        self.cursor = self.cursor.min(self.sections.len().saturating_sub(1));
        purged
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.sections.clear();
        self.cursor = 0;
    }

    // ------------------------------------------------------------------
    // Selection (batch delete)
    // ------------------------------------------------------------------

    /// Select or deselect one entry
    pub fn set_selected(&mut self, path: IndexPath, selected: bool) -> bool {
        let Some(bubble) = self.get_mut(path) else {
            return false;
        };
        bubble.is_selected = selected;
        if !selected {
            self.sections[path.section].is_selected = false;
        }
        true
    }

    /// Select or deselect a section and all of its entries
    pub fn set_section_selected(&mut self, index: usize, selected: bool) -> bool {
        let Some(section) = self.sections.get_mut(index) else {
            return false;
        };
        section.is_selected = selected;
        for bubble in &mut section.bubbles {
            bubble.is_selected = selected;
        }
        true
    }

    /// Coordinates of every selected entry
    #[must_use]
    pub fn selected_index_paths(&self) -> Vec<IndexPath> {
        self.iter()
            .filter(|(path, bubble)| bubble.is_selected || self.sections[path.section].is_selected)
            .map(|(path, _)| path)
            .collect()
    }

    /// Deselect everything
    pub fn clear_selection(&mut self) {
        for section in &mut self.sections {
            section.is_selected = false;
            for bubble in &mut section.bubbles {
                bubble.is_selected = false;
            }
        }
    }
}
