//! History Pagination
//!
//! Server-persisted request/response pairs are fetched one page at a time,
//! anchored at the oldest (or newest) entry already loaded.
//!
//! # Page Flow
//!
//! ```text
//! 1. Refuse if a page load is already in flight (Busy)
//! 2. Fetch `limit` entries before/after the boundary (token retry applies)
//! 3. Drop entries outside the active date range / device filter
//! 4. Drop ids already seen (pages may overlap or arrive reversed)
//! 5. Sort newest first, move the boundaries
//! 6. Flag the oldest boundary when the page came back short or the
//!    date cutoff was crossed mid-page
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::api::{ApiError, HistoryDataSource, TokenRetry};
use crate::bubble::{Bubble, BubbleContent, Card, Vote};

/// Assistant side of a history entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryResponse {
    /// Spoken/written answer
    Text {
        /// The answer
        text: String,
    },
    /// Structured card
    Card(Card),
    /// The request failed
    Error {
        /// Backend error code
        code: String,
        /// Human-readable message
        message: String,
    },
    /// No answer recorded
    Empty,
}

impl HistoryResponse {
    /// Whether the exchange failed
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Assistant bubble for this response, if it shows anything
    #[must_use]
    pub fn into_bubble(self) -> Option<Bubble> {
        let content = match self {
            Self::Text { text } => BubbleContent::Text { text },
            Self::Card(card) => BubbleContent::Card(card),
            Self::Error { code, message } => BubbleContent::ErrorText { code, message },
            Self::Empty => return None,
        };
        Some(Bubble::new(crate::bubble::Origin::Assistant, content))
    }
}

/// One server-persisted exchange
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Server history identifier
    pub id: String,
    /// When the exchange happened
    pub timestamp: DateTime<Utc>,
    /// What the user said, if recorded
    #[serde(default)]
    pub request: Option<String>,
    /// What the assistant answered
    pub response: HistoryResponse,
    /// Device the exchange happened on
    #[serde(default)]
    pub device_serial: Option<String>,
    /// Server trace identifier
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Feedback already given
    #[serde(default)]
    pub vote: Vote,
}

impl HistoryEntry {
    /// Bubbles for this exchange: the user turn (if any), then the answer
    ///
    /// Both share the history and trace identifiers. When the answer is an
    /// error, both are flagged as part of a failed exchange so they group
    /// together.
    #[must_use]
    pub fn into_bubbles(self) -> Vec<Bubble> {
        let failed = self.response.is_error();
        let decorate = |mut bubble: Bubble| {
            bubble.timestamp = self.timestamp;
            bubble.history_id = Some(self.id.clone());
            bubble.trace_id.clone_from(&self.trace_id);
            bubble.failed_exchange = failed;
            bubble
        };

        let mut bubbles = Vec::with_capacity(2);
        if let Some(ref request) = self.request {
            bubbles.push(decorate(Bubble::user_text(request.clone())));
        }
        if let Some(mut answer) = self.response.clone().into_bubble() {
            answer.vote = self.vote;
            bubbles.push(decorate(answer));
        }
        bubbles
    }
}

/// Which side of the anchor to fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryDirection {
    /// Entries older than the anchor
    Before,
    /// Entries newer than the anchor
    After,
}

/// Page request handed to the data source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Boundary timestamp (exclusive)
    pub anchor: DateTime<Utc>,
    /// Which side of the anchor
    pub direction: HistoryDirection,
    /// Maximum number of entries
    pub limit: usize,
    /// Restrict to one device
    pub device_serial: Option<String>,
}

/// Active date range / device filter
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Oldest accepted timestamp (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Newest accepted timestamp (inclusive)
    pub to: Option<DateTime<Utc>>,
    /// Only entries from this device
    pub device_serial: Option<String>,
}

impl HistoryFilter {
    /// Whether `entry` passes the filter
    #[must_use]
    pub fn accepts(&self, entry: &HistoryEntry) -> bool {
        let after_from = self.from.map_or(true, |from| entry.timestamp >= from);
        let before_to = self.to.map_or(true, |to| entry.timestamp <= to);
        let device = match (&self.device_serial, &entry.device_serial) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
        };
        after_from && before_to && device
    }

    /// Whether `entry` is older than the range start
    #[must_use]
    pub fn is_before_range(&self, entry: &HistoryEntry) -> bool {
        self.from.is_some_and(|from| entry.timestamp < from)
    }
}

/// A filtered, deduplicated page
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryPage {
    /// Entries, newest first
    pub entries: Vec<HistoryEntry>,
    /// Whether nothing older remains
    pub reached_oldest: bool,
}

impl HistoryPage {
    /// Bubbles of every entry, in page order
    #[must_use]
    pub fn into_bubbles(self) -> Vec<Bubble> {
        self.entries
            .into_iter()
            .flat_map(HistoryEntry::into_bubbles)
            .collect()
    }
}

/// Shift that turns the exclusive anchor of a query into one that still
/// covers the boundary timestamp
fn boundary_overlap() -> chrono::Duration {
    chrono::Duration::milliseconds(1)
}

/// Result of a page load
#[derive(Clone, Debug, PartialEq)]
pub enum PageOutcome {
    /// Another page load was in flight; nothing was requested
    Busy,
    /// The oldest boundary was reached earlier; nothing was requested
    Exhausted,
    /// A page was fetched (possibly empty after filtering)
    Loaded(HistoryPage),
}

#[derive(Debug, Default)]
struct PaginationState {
    filter: HistoryFilter,
    oldest: Option<DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
    /// Ids fetched at exactly `oldest`
    oldest_ids: HashSet<String>,
    /// Ids fetched at exactly `newest`
    newest_ids: HashSet<String>,
    seen: HashSet<String>,
    reached_oldest: bool,
}

impl PaginationState {
    fn absorb(
        &mut self,
        raw: Vec<HistoryEntry>,
        direction: HistoryDirection,
        limit: usize,
    ) -> HistoryPage {
        let fetched = raw.len();

        // Boundaries move on raw timestamps so a fully filtered page still
        // advances the anchor.
        for entry in &raw {
            if self.oldest.map_or(true, |oldest| entry.timestamp < oldest) {
                self.oldest = Some(entry.timestamp);
                self.oldest_ids.clear();
            }
            if self.oldest == Some(entry.timestamp) {
                self.oldest_ids.insert(entry.id.clone());
            }
            if self.newest.map_or(true, |newest| entry.timestamp > newest) {
                self.newest = Some(entry.timestamp);
                self.newest_ids.clear();
            }
            if self.newest == Some(entry.timestamp) {
                self.newest_ids.insert(entry.id.clone());
            }
        }

        let mut cutoff_hit = false;
        let mut entries = Vec::with_capacity(fetched);
        for entry in raw {
            if self.filter.is_before_range(&entry) {
                cutoff_hit = true;
                continue;
            }
            if !self.filter.accepts(&entry) {
                continue;
            }
            if !self.seen.insert(entry.id.clone()) {
                continue;
            }
            entries.push(entry);
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if direction == HistoryDirection::Before && (fetched < limit || cutoff_hit) {
            self.reached_oldest = true;
        }

        tracing::debug!(
            fetched = fetched,
            kept = entries.len(),
            cutoff_hit = cutoff_hit,
            reached_oldest = self.reached_oldest,
            "Absorbed history page"
        );

        HistoryPage {
            entries,
            reached_oldest: self.reached_oldest,
        }
    }
}

/// Clears the refreshing flag when the load finishes, however it finishes
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Tracks pagination boundaries and fetches pages
pub struct HistoryPaginator {
    source: Arc<dyn HistoryDataSource>,
    retry: TokenRetry,
    page_size: usize,
    state: Mutex<PaginationState>,
    refreshing: AtomicBool,
}

impl HistoryPaginator {
    /// Create a paginator over `source`
    pub fn new(source: Arc<dyn HistoryDataSource>, retry: TokenRetry, page_size: usize) -> Self {
        Self {
            source,
            retry,
            page_size: page_size.max(1),
            state: Mutex::new(PaginationState::default()),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Whether a page load is in flight
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Whether nothing older remains
    pub fn reached_oldest(&self) -> bool {
        self.state.lock().reached_oldest
    }

    /// Oldest timestamp seen so far
    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.state.lock().oldest
    }

    /// Newest timestamp seen so far
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.state.lock().newest
    }

    /// Active filter
    pub fn filter(&self) -> HistoryFilter {
        self.state.lock().filter.clone()
    }

    /// Forget all boundaries and switch to `filter`
    pub fn reset(&self, filter: HistoryFilter) {
        let mut state = self.state.lock();
        *state = PaginationState {
            filter,
            ..PaginationState::default()
        };
        tracing::debug!("History pagination reset");
    }

    /// Fetch the page preceding the oldest loaded entry
    ///
    /// # Errors
    ///
    /// Returns the collaborator's error once the token retry gave up.
    pub async fn load_older(&self) -> Result<PageOutcome, ApiError> {
        let Some(_guard) = RefreshGuard::acquire(&self.refreshing) else {
            tracing::debug!("History page already loading");
            return Ok(PageOutcome::Busy);
        };

        let query = {
            let state = self.state.lock();
            if state.reached_oldest {
                return Ok(PageOutcome::Exhausted);
            }
            // The boundary timestamp is fetched again, with room for the
            // entries already known there, so that entries sharing it with
            // the last page are not skipped. `seen` drops the repeats.
            let (anchor, overlap) = match state.oldest {
                Some(oldest) => (oldest + boundary_overlap(), state.oldest_ids.len()),
                None => (
                    state
                        .filter
                        .to
                        .map_or_else(Utc::now, |to| to + boundary_overlap()),
                    0,
                ),
            };
            HistoryQuery {
                anchor,
                direction: HistoryDirection::Before,
                limit: self.page_size + overlap,
                device_serial: state.filter.device_serial.clone(),
            }
        };

        self.fetch(query).await
    }

    /// Fetch entries newer than the newest loaded entry
    ///
    /// # Errors
    ///
    /// Returns the collaborator's error once the token retry gave up.
    pub async fn load_newer(&self) -> Result<PageOutcome, ApiError> {
        let Some(guard) = RefreshGuard::acquire(&self.refreshing) else {
            tracing::debug!("History page already loading");
            return Ok(PageOutcome::Busy);
        };

        let query = {
            let state = self.state.lock();
            state.newest.map(|newest| HistoryQuery {
                anchor: newest - boundary_overlap(),
                direction: HistoryDirection::After,
                limit: self.page_size + state.newest_ids.len(),
                device_serial: state.filter.device_serial.clone(),
            })
        };
        let Some(query) = query else {
            // Nothing loaded yet: the first page is the most recent one.
            drop(guard);
            return self.load_older().await;
        };

        self.fetch(query).await
    }

    async fn fetch(&self, query: HistoryQuery) -> Result<PageOutcome, ApiError> {
        tracing::debug!(
            anchor = %query.anchor,
            direction = ?query.direction,
            limit = query.limit,
            "Fetching history page"
        );
        let raw = self
            .retry
            .run("history.fetch", || self.source.fetch_history(&query))
            .await?;

        let page = self
            .state
            .lock()
            .absorb(raw, query.direction, query.limit);
        Ok(PageOutcome::Loaded(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{entry, error_entry, MockBackend};
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, day, hour, 0, 0).unwrap()
    }

    fn paginator(backend: Arc<MockBackend>, page_size: usize) -> HistoryPaginator {
        HistoryPaginator::new(backend, TokenRetry::disabled(), page_size)
    }

    #[test]
    fn test_entry_into_bubbles_pairs_share_ids() {
        let bubbles = error_entry("h9", at(1, 8)).into_bubbles();
        assert_eq!(bubbles.len(), 2);
        assert!(bubbles.iter().all(|b| b.history_id.as_deref() == Some("h9")));
        assert!(bubbles.iter().all(Bubble::is_error));
        assert_eq!(bubbles[0].timestamp, at(1, 8));
    }

    #[test]
    fn test_filter_accepts() {
        let filter = HistoryFilter {
            from: Some(at(2, 0)),
            to: Some(at(4, 0)),
            device_serial: Some("speaker-1".into()),
        };
        let mut inside = entry("a", at(3, 0));
        inside.device_serial = Some("speaker-1".into());
        assert!(filter.accepts(&inside));

        let mut other_device = inside.clone();
        other_device.device_serial = Some("phone".into());
        assert!(!filter.accepts(&other_device));

        let old = entry("b", at(1, 0));
        assert!(filter.is_before_range(&old));
        assert!(!filter.accepts(&old));
    }

    #[tokio::test]
    async fn test_short_page_reaches_oldest() {
        let backend = Arc::new(MockBackend::with_history(vec![
            entry("1", at(1, 9)),
            entry("2", at(2, 9)),
        ]));
        let paginator = paginator(backend.clone(), 10);

        let PageOutcome::Loaded(page) = paginator.load_older().await.unwrap() else {
            panic!("expected a page");
        };
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].id, "2");
        assert!(page.reached_oldest);
        assert_eq!(paginator.oldest(), Some(at(1, 9)));

        assert_eq!(paginator.load_older().await.unwrap(), PageOutcome::Exhausted);
        assert_eq!(backend.history_calls(), 1);
    }

    #[tokio::test]
    async fn test_pages_walk_backwards_and_dedupe() {
        let backend = Arc::new(MockBackend::with_history(
            (1..=5).map(|day| entry(&format!("e{day}"), at(day, 9))).collect(),
        ));
        let paginator = paginator(backend.clone(), 2);

        let PageOutcome::Loaded(first) = paginator.load_older().await.unwrap() else {
            panic!("expected a page");
        };
        let ids: Vec<_> = first.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e5", "e4"]);
        assert!(!first.reached_oldest);

        let PageOutcome::Loaded(second) = paginator.load_older().await.unwrap() else {
            panic!("expected a page");
        };
        let ids: Vec<_> = second.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e2"]);
    }

    #[tokio::test]
    async fn test_entries_sharing_the_boundary_are_not_skipped() {
        let backend = Arc::new(MockBackend::with_history(vec![
            entry("e0", at(1, 8)),
            entry("e1", at(1, 9)),
            entry("e2", at(1, 9)),
        ]));
        let paginator = paginator(backend.clone(), 1);

        let mut ids = Vec::new();
        while let PageOutcome::Loaded(page) = paginator.load_older().await.unwrap() {
            ids.extend(page.entries.into_iter().map(|e| e.id));
        }
        ids.sort();
        assert_eq!(ids, vec!["e0", "e1", "e2"]);
        assert!(paginator.reached_oldest());
        assert_eq!(backend.history_calls(), 4);
    }

    #[tokio::test]
    async fn test_cutoff_mid_page_reaches_oldest() {
        let backend = Arc::new(MockBackend::with_history(
            (1..=6).map(|day| entry(&format!("e{day}"), at(day, 9))).collect(),
        ));
        let paginator = paginator(backend, 4);
        paginator.reset(HistoryFilter {
            from: Some(at(4, 0)),
            ..HistoryFilter::default()
        });

        let PageOutcome::Loaded(page) = paginator.load_older().await.unwrap() else {
            panic!("expected a page");
        };
        let ids: Vec<_> = page.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e6", "e5", "e4"]);
        assert!(page.reached_oldest);
    }

    #[tokio::test]
    async fn test_busy_flag_blocks_concurrent_loads() {
        let backend = Arc::new(MockBackend::with_history(vec![entry("1", at(1, 9))]));
        let paginator = paginator(backend, 5);

        paginator.refreshing.store(true, Ordering::Release);
        assert_eq!(paginator.load_older().await.unwrap(), PageOutcome::Busy);
        paginator.refreshing.store(false, Ordering::Release);

        assert!(matches!(
            paginator.load_older().await.unwrap(),
            PageOutcome::Loaded(_)
        ));
        assert!(!paginator.is_refreshing());
    }

    #[tokio::test]
    async fn test_load_newer_after_first_page() {
        let backend = Arc::new(MockBackend::with_history(vec![
            entry("1", at(1, 9)),
            entry("2", at(2, 9)),
        ]));
        let paginator = paginator(backend.clone(), 10);
        paginator.load_older().await.unwrap();

        backend.push_history(entry("3", at(3, 9)));
        let PageOutcome::Loaded(page) = paginator.load_newer().await.unwrap() else {
            panic!("expected a page");
        };
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].id, "3");
        assert_eq!(paginator.newest(), Some(at(3, 9)));
    }
}
