//! Error Bubble Grouping
//!
//! Consecutive error turns ("Sorry, I didn't get that") are folded behind a
//! single header entry so that a streak of failures does not flood the
//! conversation.
//!
//! # States
//!
//! ```text
//!   collapsed ──toggle──▶ expanded
//!   header owns `hidden`   members spliced right after the header
//!             ◀──toggle──
//! ```
//!
//! An entry belongs to at most one group. While a group is collapsed the
//! header owns its entries; while it is expanded the section owns them and
//! the header only remembers their keys. Collapsing removes exactly the
//! contiguous run of the header's own, still-erroneous members.

use std::collections::HashSet;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::bubble::{Bubble, BubbleContent, BubbleKey, Origin};
use crate::conversation::Conversation;
use crate::index_path::IndexPath;
use crate::section::Section;

/// Collapsible run of error entries, stored in its header bubble
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorGroup {
    /// Keys of the grouped entries, in display order
    pub members: Vec<BubbleKey>,
    /// The grouped entries while collapsed (empty while expanded)
    pub hidden: Vec<Bubble>,
    /// Whether members are spliced into the conversation
    pub expanded: bool,
}

impl ErrorGroup {
    /// A collapsed group owning `bubbles`
    #[must_use]
    pub fn collapsed(bubbles: Vec<Bubble>) -> Self {
        Self {
            members: bubbles.iter().map(|bubble| bubble.key).collect(),
            hidden: bubbles,
            expanded: false,
        }
    }

    /// Number of grouped entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `key` is grouped here
    #[must_use]
    pub fn contains(&self, key: BubbleKey) -> bool {
        self.members.contains(&key)
    }
}

/// Outcome of expanding or collapsing a group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupToggle {
    /// Header coordinate
    pub header: IndexPath,
    /// State after the toggle
    pub expanded: bool,
    /// Rows inserted (expand) or removed (collapse)
    pub rows: Vec<IndexPath>,
}

/// Counters reported by [`Conversation::grouping_errors`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupingReport {
    /// New groups created from loose error runs
    pub created: usize,
    /// Adjacent groups merged into their predecessor
    pub merged: usize,
    /// Loose error entries absorbed by a preceding group
    pub absorbed: usize,
    /// Headers dropped because all their members were gone
    pub emptied: usize,
}

impl GroupingReport {
    /// Whether the pass changed anything
    #[must_use]
    pub fn changed(&self) -> bool {
        self.created + self.merged + self.absorbed + self.emptied > 0
    }
}

fn header(bubbles: &[Bubble], row: usize) -> Option<&ErrorGroup> {
    bubbles.get(row).and_then(Bubble::as_error_group)
}

/// Length of the run of the header's own members spliced after it
fn spliced_run(bubbles: &[Bubble], row: usize) -> usize {
    let Some(group) = header(bubbles, row) else {
        return 0;
    };
    if !group.expanded {
        return 0;
    }
    bubbles[row + 1..]
        .iter()
        .take_while(|bubble| bubble.is_error() && group.contains(bubble.key))
        .count()
}

/// Rows covered by a header and its spliced members
fn block_len(bubbles: &[Bubble], row: usize) -> usize {
    1 + spliced_run(bubbles, row)
}

/// Splice hidden members after the header; returns inserted rows
fn expand_in(bubbles: &mut Vec<Bubble>, row: usize) -> Vec<usize> {
    let Some(group) = bubbles.get_mut(row).and_then(Bubble::as_error_group_mut) else {
        return Vec::new();
    };
    if group.expanded {
        return Vec::new();
    }
    let hidden = mem::take(&mut group.hidden);
    group.expanded = true;
    let count = hidden.len();
    bubbles.splice(row + 1..row + 1, hidden);
    (row + 1..row + 1 + count).collect()
}

/// Pull the header's spliced run back into it; returns removed rows
fn collapse_in(bubbles: &mut Vec<Bubble>, row: usize) -> Vec<usize> {
    let run = spliced_run(bubbles, row);
    let Some(is_expanded) = header(bubbles, row).map(|group| group.expanded) else {
        return Vec::new();
    };
    if !is_expanded {
        return Vec::new();
    }
    let removed: Vec<Bubble> = bubbles.drain(row + 1..row + 1 + run).collect();
    if let Some(group) = bubbles[row].as_error_group_mut() {
        // Members deleted or no longer erroneous are dropped from the group.
        group.members = removed.iter().map(|bubble| bubble.key).collect();
        group.hidden = removed;
        group.expanded = false;
    }
    (row + 1..row + 1 + run).collect()
}

/// Merge the header at `other` (directly after `target`'s block) into `target`
///
/// The merged group always ends up expanded, whatever either group's
/// state was before.
fn merge_in(bubbles: &mut Vec<Bubble>, target: usize, other: usize) {
    let other_run = spliced_run(bubbles, other);
    let mut incoming: Vec<Bubble> = bubbles.drain(other + 1..other + 1 + other_run).collect();
    let mut other_header = bubbles.remove(other);
    if let Some(group) = other_header.as_error_group_mut() {
        if !group.expanded {
            incoming = mem::take(&mut group.hidden);
        }
    }

    expand_in(bubbles, target);
    let end = target + block_len(bubbles, target);

    let Some(group) = bubbles[target].as_error_group_mut() else {
        return;
    };
    let mut known: HashSet<BubbleKey> = group.members.iter().copied().collect();
    incoming.retain(|bubble| known.insert(bubble.key));
    group.members.extend(incoming.iter().map(|bubble| bubble.key));
    bubbles.splice(end..end, incoming);
}

/// Add the loose errors at `run` to the group at `target`
fn absorb_in(bubbles: &mut Vec<Bubble>, target: usize, run: std::ops::Range<usize>) -> usize {
    let count = run.len();
    let expanded = header(bubbles, target).is_some_and(|group| group.expanded);
    if expanded {
        // Already in place right after the block; only membership changes.
        let keys: Vec<BubbleKey> = bubbles[run].iter().map(|bubble| bubble.key).collect();
        if let Some(group) = bubbles[target].as_error_group_mut() {
            group.members.extend(keys);
        }
    } else {
        let loose: Vec<Bubble> = bubbles.drain(run).collect();
        if let Some(group) = bubbles[target].as_error_group_mut() {
            group.members.extend(loose.iter().map(|bubble| bubble.key));
            group.hidden.extend(loose);
        }
    }
    count
}

fn group_section(bubbles: &mut Vec<Bubble>, min_run: usize, report: &mut GroupingReport) {
    let mut row = 0;
    // Header whose block ends exactly at `row`
    let mut previous: Option<usize> = None;

    while row < bubbles.len() {
        if let Some(group) = header(bubbles, row) {
            let is_empty = if group.expanded {
                spliced_run(bubbles, row) == 0
            } else {
                group.hidden.is_empty()
            };
            if is_empty {
                bubbles.remove(row);
                report.emptied += 1;
                continue;
            }
            match previous {
                Some(target) => {
                    merge_in(bubbles, target, row);
                    report.merged += 1;
                    row = target + block_len(bubbles, target);
                }
                None => {
                    previous = Some(row);
                    row += block_len(bubbles, row);
                }
            }
            continue;
        }

        if bubbles[row].is_error() {
            let run_end = row
                + bubbles[row..]
                    .iter()
                    .take_while(|bubble| bubble.is_error())
                    .count();

            if let Some(target) = previous {
                report.absorbed += absorb_in(bubbles, target, row..run_end);
                row = target + block_len(bubbles, target);
            } else if run_end - row >= min_run {
                let members: Vec<Bubble> = bubbles.drain(row..run_end).collect();
                let timestamp = members[0].timestamp;
                let mut group_header = Bubble::new(
                    Origin::Assistant,
                    BubbleContent::ErrorGroup(ErrorGroup::collapsed(members)),
                )
                .at(timestamp);
                group_header.failed_exchange = true;
                bubbles.insert(row, group_header);
                report.created += 1;
                previous = Some(row);
                row += 1;
            } else {
                previous = None;
                row = run_end;
            }
            continue;
        }

        previous = None;
        row += 1;
    }
}

/// Header whose block runs to the end of the section
fn trailing_header(bubbles: &[Bubble]) -> Option<usize> {
    let row = bubbles.iter().rposition(|bubble| bubble.as_error_group().is_some())?;
    (row + block_len(bubbles, row) == bubbles.len()).then_some(row)
}

/// Merge a group opening a day into the group closing the previous day
///
/// The moved block is spliced after the earlier header's block, so the
/// merged group lives in the earlier day's section. Entries keep their
/// timestamps, which leaves the section's rows in sort order. A later
/// section left empty is purged by the caller.
fn merge_across_days(sections: &mut [Section], report: &mut GroupingReport) {
    let mut previous = 0;
    for index in 1..sections.len() {
        let (head, tail) = sections.split_at_mut(index);
        let earlier = &mut head[previous].bubbles;
        let later = &mut tail[0].bubbles;

        if let Some(target) = trailing_header(earlier) {
            if header(later, 0).is_some() {
                let run = block_len(later, 0);
                let other = earlier.len();
                earlier.extend(later.drain(..run));
                merge_in(earlier, target, other);
                report.merged += 1;
            }
        }
        if !later.is_empty() {
            previous = index;
        }
    }
}

impl Conversation {
    /// Expand a collapsed group, splicing its members after the header
    pub fn expand_error_group(&mut self, path: IndexPath) -> Option<GroupToggle> {
        let section = self.sections.get_mut(path.section)?;
        header(&section.bubbles, path.row)?;
        let rows = expand_in(&mut section.bubbles, path.row);
        Some(GroupToggle {
            header: path,
            expanded: true,
            rows: rows.into_iter().map(|row| path.with_row(row)).collect(),
        })
    }

    /// Collapse an expanded group, moving its spliced run back into the header
    pub fn collapse_error_group(&mut self, path: IndexPath) -> Option<GroupToggle> {
        let section = self.sections.get_mut(path.section)?;
        header(&section.bubbles, path.row)?;
        let rows = collapse_in(&mut section.bubbles, path.row);
        Some(GroupToggle {
            header: path,
            expanded: false,
            rows: rows.into_iter().map(|row| path.with_row(row)).collect(),
        })
    }

    /// Flip a group between collapsed and expanded
    ///
    /// Returns `None` when `path` is not an error group header.
    pub fn toggle_error_group(&mut self, path: IndexPath) -> Option<GroupToggle> {
        let expanded = self.get(path)?.as_error_group()?.expanded;
        let toggle = if expanded {
            self.collapse_error_group(path)
        } else {
            self.expand_error_group(path)
        };
        if let Some(ref toggle) = toggle {
            tracing::debug!(
                header = %toggle.header,
                expanded = toggle.expanded,
                rows = toggle.rows.len(),
                "Toggled error group"
            );
        }
        toggle
    }

    /// Fold error runs into groups and merge adjacent groups
    ///
    /// Runs at least `min_run` long become collapsed groups; a group, or
    /// loose errors, directly following another group's block in the same
    /// day are merged into it. When one day ends with a group and the next
    /// day opens with one, the later group is merged into the earlier one
    /// and its entries move to the earlier day's section.
    pub fn grouping_errors(&mut self, min_run: usize) -> GroupingReport {
        let mut report = GroupingReport::default();
        let min_run = min_run.max(1);
        for section in &mut self.sections {
            group_section(&mut section.bubbles, min_run, &mut report);
        }
        merge_across_days(&mut self.sections, &mut report);
        self.purge_empty_sections();

        if report.changed() {
            tracing::debug!(
                created = report.created,
                merged = report.merged,
                absorbed = report.absorbed,
                emptied = report.emptied,
                "Regrouped error bubbles"
            );
        }
        report
    }

    /// Coordinates of a header and its spliced members
    #[must_use]
    pub fn group_block(&self, path: IndexPath) -> Vec<IndexPath> {
        let Some(section) = self.sections.get(path.section) else {
            return Vec::new();
        };
        if header(&section.bubbles, path.row).is_none() {
            return Vec::new();
        }
        (path.row..path.row + block_len(&section.bubbles, path.row))
            .map(|row| path.with_row(row))
            .collect()
    }

    /// Collapsed headers hiding an entry with `history_id`
    #[must_use]
    pub fn headers_hiding_history(&self, history_id: &str) -> Vec<IndexPath> {
        self.iter()
            .filter(|(_, bubble)| {
                bubble.as_error_group().is_some_and(|group| {
                    group
                        .hidden
                        .iter()
                        .any(|hidden| hidden.history_id.as_deref() == Some(history_id))
                })
            })
            .map(|(path, _)| path)
            .collect()
    }

    /// Whether an entry with `history_id` is shown or folded into a header
    #[must_use]
    pub fn contains_history(&self, history_id: &str) -> bool {
        !self.indexes_of_history(history_id).is_empty()
            || !self.headers_hiding_history(history_id).is_empty()
    }

    /// History ids of a group's members, hidden or spliced
    #[must_use]
    pub fn group_history_ids(&self, path: IndexPath) -> Vec<String> {
        let Some(group) = self.get(path).and_then(Bubble::as_error_group) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = Vec::new();
        let mut push = |bubble: &Bubble| {
            if let Some(id) = &bubble.history_id {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        };
        if group.expanded {
            for block_path in self.group_block(path).into_iter().skip(1) {
                if let Some(bubble) = self.get(block_path) {
                    push(bubble);
                }
            }
        } else {
            group.hidden.iter().for_each(&mut push);
        }
        ids
    }
}
