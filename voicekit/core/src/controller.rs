//! Conversation Controller
//!
//! Owns the [`Conversation`] and every collaborator, performs bubble
//! actions, and reports each change to the host surface.
//!
//! # Lockstep Updates
//!
//! Every [`SurfaceUpdate`] is emitted after the mutation it describes has
//! been applied, and in the order the mutations happened. A host that
//! applies updates one by one therefore always sees coordinates that are
//! valid for its own copy of the rows.
//!
//! # Failure Handling
//!
//! Network calls go through the shared [`TokenRetry`]. When a call still
//! fails, an error toast is emitted and the error is returned to the
//! caller; nothing is retried a second time.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::actions::{self, BubbleAction, Gesture};
use crate::api::{
    ApiError, ConversationService, HistoryDataSource, InvocationResult, TokenRetry, Vocalizer,
};
use crate::bubble::{Bubble, BubbleContent, BubbleKey, Origin, Vote};
use crate::config::VoiceKitConfig;
use crate::conversation::{Conversation, Removal};
use crate::history::{HistoryFilter, HistoryPaginator, PageOutcome};
use crate::index_path::IndexPath;
use crate::messages::{NotifyLevel, SurfaceUpdate};
use crate::preferences::{Preferences, WELCOME_MESSAGE_SHOWN};
use crate::recognition::TranscriptionEvent;

/// Collaborators the controller calls out to
#[derive(Clone)]
pub struct Services {
    /// Text invocation
    pub conversation: Arc<dyn ConversationService>,
    /// History persistence
    pub history: Arc<dyn HistoryDataSource>,
    /// Speech output
    pub vocalizer: Arc<dyn Vocalizer>,
}

/// Drives one conversation screen
pub struct ConversationController {
    conversation: Conversation,
    services: Services,
    retry: TokenRetry,
    paginator: HistoryPaginator,
    tx: mpsc::Sender<SurfaceUpdate>,
    min_error_run: usize,
    welcome_message: Option<String>,
}

impl ConversationController {
    /// Create a controller emitting updates on `tx`
    pub fn new(
        config: &VoiceKitConfig,
        services: Services,
        retry: TokenRetry,
        tx: mpsc::Sender<SurfaceUpdate>,
    ) -> Self {
        let paginator = HistoryPaginator::new(
            Arc::clone(&services.history),
            retry.clone(),
            config.history.page_size,
        );
        Self {
            conversation: Conversation::new(config.history.sort_order),
            services,
            retry,
            paginator,
            tx,
            min_error_run: config.history.error_group_min_run,
            welcome_message: config.session.welcome_message.clone(),
        }
    }

    /// The conversation as currently shown
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Mutable access for selection changes
    ///
    /// Structural changes made through this bypass the update channel.
    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    /// History pagination state
    pub fn paginator(&self) -> &HistoryPaginator {
        &self.paginator
    }

    // ------------------------------------------------------------------
    // Gestures and actions
    // ------------------------------------------------------------------

    /// Resolve a gesture on the bubble at `path` and perform the result
    ///
    /// Returns the action performed, if any.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the performed action.
    pub async fn handle_gesture(
        &mut self,
        gesture: Gesture,
        path: IndexPath,
    ) -> Result<Option<BubbleAction>, ApiError> {
        let Some(action) = self
            .conversation
            .get(path)
            .and_then(|bubble| actions::resolve(gesture, bubble))
        else {
            return Ok(None);
        };
        self.perform(action, path).await?;
        Ok(Some(action))
    }

    /// Perform `action` on the bubble at `path`
    ///
    /// Out-of-bounds coordinates are ignored.
    ///
    /// # Errors
    ///
    /// Returns the collaborator error after emitting an error toast.
    pub async fn perform(&mut self, action: BubbleAction, path: IndexPath) -> Result<(), ApiError> {
        if !self.conversation.is_bounded(path) {
            tracing::warn!(%path, ?action, "Ignoring action on out-of-bounds entry");
            return Ok(());
        }
        tracing::debug!(%path, ?action, "Performing bubble action");

        match action {
            BubbleAction::Resend => self.resend(path).await,
            BubbleAction::Delete => self.delete_at(path).await.map(drop),
            BubbleAction::Feedback(vote) => self.feedback(path, vote).await,
            BubbleAction::Enunciate => self.enunciate(path).await,
            BubbleAction::Share => {
                if let Some(text) = self.text_at(path) {
                    self.emit(SurfaceUpdate::Share(text)).await;
                }
                Ok(())
            }
            BubbleAction::Copy => {
                if let Some(text) = self.text_at(path) {
                    self.emit(SurfaceUpdate::Copy(text)).await;
                }
                Ok(())
            }
            BubbleAction::Inspect => {
                if let Some(bubble) = self.conversation.get(path) {
                    let update = SurfaceUpdate::Inspect {
                        history_id: bubble.history_id.clone(),
                        trace_id: bubble.trace_id.clone(),
                    };
                    self.emit(update).await;
                }
                Ok(())
            }
            BubbleAction::ToggleGroup => {
                self.toggle_group(path).await;
                Ok(())
            }
        }
    }

    async fn resend(&mut self, path: IndexPath) -> Result<(), ApiError> {
        let text = match self.conversation.get(path) {
            Some(bubble) if bubble.origin == Origin::User => bubble.text().map(str::to_string),
            _ => None,
        };
        let Some(text) = text else {
            tracing::debug!(%path, "Nothing to resend");
            return Ok(());
        };
        self.send_text(&text).await
    }

    async fn feedback(&mut self, path: IndexPath, vote: Vote) -> Result<(), ApiError> {
        let Some(history_id) = self
            .conversation
            .get(path)
            .and_then(|bubble| bubble.history_id.clone())
        else {
            self.toast(NotifyLevel::Warning, "This answer cannot be rated yet")
                .await;
            return Ok(());
        };

        let result = self
            .retry
            .run("history.feedback", || {
                self.services.history.send_feedback(&history_id, vote)
            })
            .await;
        if let Err(err) = result {
            return Err(self.report(err).await);
        }

        if let Some(bubble) = self.conversation.get_mut(path) {
            bubble.vote = vote;
        }
        self.emit(SurfaceUpdate::RowsReloaded(vec![path])).await;
        tracing::info!(history_id = %history_id, ?vote, "Feedback recorded");
        Ok(())
    }

    async fn enunciate(&mut self, path: IndexPath) -> Result<(), ApiError> {
        let Some(text) = self.text_at(path) else {
            return Ok(());
        };
        let result = self
            .retry
            .run("vocalizer.vocalize", || self.services.vocalizer.vocalize(&text))
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(self.report(err).await),
        }
    }

    async fn toggle_group(&mut self, path: IndexPath) {
        let Some(toggle) = self.conversation.toggle_error_group(path) else {
            return;
        };
        if !toggle.rows.is_empty() {
            let update = if toggle.expanded {
                SurfaceUpdate::RowsInserted(toggle.rows)
            } else {
                SurfaceUpdate::RowsDeleted(toggle.rows)
            };
            self.emit(update).await;
        }
        self.emit(SurfaceUpdate::RowsReloaded(vec![toggle.header]))
            .await;
    }

    // ------------------------------------------------------------------
    // Text invocation
    // ------------------------------------------------------------------

    /// Send a user utterance and show the answer
    ///
    /// The user bubble and a waiting indicator are inserted first; the
    /// indicator is then replaced by the answer (or by an error bubble).
    ///
    /// # Errors
    ///
    /// Returns the invocation error after the exchange was marked failed.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ApiError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let user = Bubble::user_text(text);
        let user_key = user.key;
        self.insert_and_emit(user).await;
        let waiting = Bubble::waiting();
        let waiting_key = waiting.key;
        self.insert_and_emit(waiting).await;

        let result = self
            .retry
            .run("conversation.send_text", || {
                self.services.conversation.send_text(text)
            })
            .await;

        let outcome = match result {
            Ok(invocation) => {
                self.settle_exchange(user_key, waiting_key, invocation).await;
                Ok(())
            }
            Err(err) => {
                self.fail_exchange(user_key, waiting_key, &err).await;
                Err(err)
            }
        };
        self.regroup().await;

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => Err(self.report(err).await),
        }
    }

    async fn settle_exchange(
        &mut self,
        user_key: BubbleKey,
        waiting_key: BubbleKey,
        invocation: InvocationResult,
    ) {
        let failed = invocation.response.is_error();
        let InvocationResult {
            history_id,
            trace_id,
            response,
            ..
        } = invocation;

        let mut reloaded = Vec::with_capacity(2);
        if let Some(path) = self.conversation.index_of(user_key) {
            if let Some(user) = self.conversation.get_mut(path) {
                user.history_id.clone_from(&history_id);
                user.trace_id.clone_from(&trace_id);
                user.failed_exchange = failed;
            }
            reloaded.push(path);
        }

        let Some(waiting_path) = self.conversation.index_of(waiting_key) else {
            self.emit(SurfaceUpdate::RowsReloaded(reloaded)).await;
            return;
        };

        match response.into_bubble() {
            Some(mut answer) => {
                if let Some(waiting) = self.conversation.get(waiting_path) {
                    answer.timestamp = waiting.timestamp;
                }
                answer.history_id = history_id;
                answer.trace_id = trace_id;
                answer.failed_exchange = failed;
                self.conversation.set(waiting_path, answer);
                reloaded.push(waiting_path);
                self.emit(SurfaceUpdate::RowsReloaded(reloaded)).await;
            }
            None => {
                if !reloaded.is_empty() {
                    self.emit(SurfaceUpdate::RowsReloaded(reloaded)).await;
                }
                let removal = self.conversation.remove(&[waiting_path]);
                self.emit_removal(&removal).await;
            }
        }
    }

    async fn fail_exchange(&mut self, user_key: BubbleKey, waiting_key: BubbleKey, err: &ApiError) {
        let mut reloaded = Vec::with_capacity(2);
        if let Some(path) = self.conversation.index_of(user_key) {
            if let Some(user) = self.conversation.get_mut(path) {
                user.failed_exchange = true;
            }
            reloaded.push(path);
        }
        if let Some(path) = self.conversation.index_of(waiting_key) {
            let code = err.code();
            if let Some(waiting) = self.conversation.get_mut(path) {
                let timestamp = waiting.timestamp;
                *waiting = Bubble::error(code.code, code.message).at(timestamp).failed();
            }
            reloaded.push(path);
        }
        if !reloaded.is_empty() {
            self.emit(SurfaceUpdate::RowsReloaded(reloaded)).await;
        }
    }

    /// Forward a recognition event to the surface
    ///
    /// A final transcription is then handled like typed text, unless the
    /// server already stored the exchange, in which case the newest
    /// history page is pulled instead.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the follow-up request.
    pub async fn on_transcription(&mut self, event: TranscriptionEvent) -> Result<(), ApiError> {
        self.emit(SurfaceUpdate::Transcription {
            text: event.text().to_string(),
            is_final: event.is_final(),
        })
        .await;

        match event {
            TranscriptionEvent::Partial(_) => Ok(()),
            TranscriptionEvent::Final {
                history_id: Some(_),
                ..
            } => self.load_newer_history().await.map(drop),
            TranscriptionEvent::Final { text, .. } => self.send_text(&text).await,
        }
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete the exchange at `path`, locally and on the server
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns the server error; nothing is removed locally in that case.
    pub async fn delete_at(&mut self, path: IndexPath) -> Result<usize, ApiError> {
        let (paths, ids) = self.deletion_scope(&[path]);
        self.delete_scope(paths, ids).await
    }

    /// Delete every selected entry and section
    ///
    /// # Errors
    ///
    /// Returns the server error; the selection is kept in that case.
    pub async fn delete_selected(&mut self) -> Result<usize, ApiError> {
        let selected = self.conversation.selected_index_paths();
        if selected.is_empty() {
            return Ok(0);
        }
        let (paths, ids) = self.deletion_scope(&selected);
        let removed = self.delete_scope(paths, ids).await?;
        self.conversation.clear_selection();
        Ok(removed)
    }

    /// Rows to remove and history ids to delete for `targets`
    ///
    /// A request and its answer share a history id and go together; a
    /// group header takes its whole block and every member's id.
    fn deletion_scope(&self, targets: &[IndexPath]) -> (Vec<IndexPath>, Vec<String>) {
        let mut paths = BTreeSet::new();
        let mut ids: Vec<String> = Vec::new();
        let mut push_id = |id: String| {
            if !ids.contains(&id) {
                ids.push(id);
            }
        };

        for &target in targets {
            let Some(bubble) = self.conversation.get(target) else {
                continue;
            };
            if bubble.as_error_group().is_some() {
                paths.extend(self.conversation.group_block(target));
                self.conversation
                    .group_history_ids(target)
                    .into_iter()
                    .for_each(&mut push_id);
            } else if let Some(id) = &bubble.history_id {
                paths.extend(self.conversation.indexes_of_history(id));
                push_id(id.clone());
            } else {
                paths.insert(target);
            }
        }
        (paths.into_iter().collect(), ids)
    }

    async fn delete_scope(
        &mut self,
        paths: Vec<IndexPath>,
        ids: Vec<String>,
    ) -> Result<usize, ApiError> {
        if !ids.is_empty() {
            let result = self
                .retry
                .run("history.delete", || self.services.history.delete_history(&ids))
                .await;
            if let Err(err) = result {
                return Err(self.report(err).await);
            }
        }

        let removal = self.conversation.remove(&paths);
        self.emit_removal(&removal).await;
        self.regroup().await;

        tracing::info!(
            removed = removal.removed.len(),
            server_ids = ids.len(),
            "Deleted conversation entries"
        );
        Ok(removal.removed.len())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Load the page preceding the oldest loaded entry
    ///
    /// Returns the number of bubbles inserted.
    ///
    /// # Errors
    ///
    /// Returns the history error after emitting an error toast.
    pub async fn load_older_history(&mut self) -> Result<usize, ApiError> {
        self.emit_history_state(true).await;
        let outcome = self.paginator.load_older().await;
        self.absorb_page(outcome).await
    }

    /// Load entries newer than the newest loaded entry
    ///
    /// # Errors
    ///
    /// Returns the history error after emitting an error toast.
    pub async fn load_newer_history(&mut self) -> Result<usize, ApiError> {
        self.emit_history_state(true).await;
        let outcome = self.paginator.load_newer().await;
        self.absorb_page(outcome).await
    }

    /// Switch to another date range / device and reload from scratch
    ///
    /// # Errors
    ///
    /// Returns the error of the first page load.
    pub async fn apply_filter(&mut self, filter: HistoryFilter) -> Result<usize, ApiError> {
        tracing::debug!(?filter, "Applying history filter");
        self.conversation.clear();
        self.paginator.reset(filter);
        self.emit(SurfaceUpdate::Reloaded).await;
        self.load_older_history().await
    }

    async fn absorb_page(&mut self, outcome: Result<PageOutcome, ApiError>) -> Result<usize, ApiError> {
        let result = match outcome {
            Ok(PageOutcome::Loaded(page)) => {
                let bubbles: Vec<Bubble> = page
                    .into_bubbles()
                    .into_iter()
                    .filter(|bubble| {
                        bubble
                            .history_id
                            .as_deref()
                            .map_or(true, |id| !self.conversation.contains_history(id))
                    })
                    .collect();
                let inserted = bubbles.len();
                if inserted > 0 {
                    self.conversation.append_all(bubbles);
                    self.conversation.grouping_errors(self.min_error_run);
                    self.emit(SurfaceUpdate::Reloaded).await;
                }
                Ok(inserted)
            }
            Ok(PageOutcome::Busy | PageOutcome::Exhausted) => Ok(0),
            Err(err) => Err(err),
        };

        self.emit_history_state(false).await;
        match result {
            Ok(inserted) => Ok(inserted),
            Err(err) => Err(self.report(err).await),
        }
    }

    /// Visible rows of an exchange
    ///
    /// A collapsed group hiding the exchange is expanded first, with the
    /// usual surface updates. Empty when the exchange is not loaded.
    pub async fn reveal_history(&mut self, history_id: &str) -> Vec<IndexPath> {
        // Later headers first so earlier coordinates stay valid.
        let headers = self.conversation.headers_hiding_history(history_id);
        for header in headers.into_iter().rev() {
            self.toggle_group(header).await;
        }
        self.conversation.indexes_of_history(history_id)
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Insert the welcome message unless it was shown before
    ///
    /// Sets the flag in `prefs`; saving it is up to the caller.
    pub async fn show_welcome_if_needed(&mut self, prefs: &mut Preferences) -> bool {
        let Some(message) = self.welcome_message.clone() else {
            return false;
        };
        if prefs.flag(WELCOME_MESSAGE_SHOWN) {
            return false;
        }
        let welcome = Bubble::new(Origin::System, BubbleContent::Text { text: message });
        self.insert_and_emit(welcome).await;
        prefs.set_flag(WELCOME_MESSAGE_SHOWN, true);
        tracing::debug!("Welcome message shown");
        true
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn text_at(&self, path: IndexPath) -> Option<String> {
        self.conversation
            .get(path)
            .and_then(Bubble::text)
            .map(str::to_string)
    }

    async fn insert_and_emit(&mut self, bubble: Bubble) {
        let insertion = self.conversation.insert(bubble);
        let update = if insertion.new_section {
            SurfaceUpdate::SectionsInserted(vec![insertion.index_path.section])
        } else {
            SurfaceUpdate::RowsInserted(vec![insertion.index_path])
        };
        self.emit(update).await;
    }

    async fn emit_removal(&self, removal: &Removal) {
        let rows = removal.row_paths();
        if !rows.is_empty() {
            self.emit(SurfaceUpdate::RowsDeleted(rows)).await;
        }
        if !removal.deleted_sections.is_empty() {
            self.emit(SurfaceUpdate::SectionsDeleted(removal.deleted_sections.clone()))
                .await;
        }
    }

    async fn regroup(&mut self) {
        if self.conversation.grouping_errors(self.min_error_run).changed() {
            self.emit(SurfaceUpdate::Reloaded).await;
        }
    }

    async fn emit_history_state(&self, refreshing: bool) {
        self.emit(SurfaceUpdate::HistoryState {
            refreshing,
            reached_oldest: self.paginator.reached_oldest(),
        })
        .await;
    }

    async fn toast(&self, level: NotifyLevel, message: &str) {
        self.emit(SurfaceUpdate::Toast {
            level,
            message: message.to_string(),
        })
        .await;
    }

    /// Toast `err` and hand it back for returning
    async fn report(&self, err: ApiError) -> ApiError {
        tracing::warn!(error = %err, "Conversation action failed");
        self.toast(NotifyLevel::Error, &err.to_string()).await;
        err
    }

    async fn emit(&self, update: SurfaceUpdate) {
        if let Err(e) = self.tx.send(update).await {
            tracing::warn!("Failed to send update to surface: {}", e);
        }
    }
}
