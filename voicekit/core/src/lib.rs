//! VoiceKit Core - Headless Conversation Engine for SmartVoiceKit
//!
//! This crate holds the conversation logic of the SmartVoiceKit assistant,
//! independent of any UI toolkit. A host surface (mobile list view, console,
//! test harness) feeds gestures and utterances in and applies the row
//! updates that come back out.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Host Surface                          │
//! │        (list view, console, automation harness)              │
//! └───────────────┬──────────────────────────────▲───────────────┘
//!                 │ Gesture / text / transcript  │ SurfaceUpdate
//! ┌───────────────▼──────────────────────────────┴───────────────┐
//! │                  ConversationController                      │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────────┐ │
//! │  │ Conversation │  │   History    │  │   Collaborators     │ │
//! │  │ (day buckets,│  │  Paginator   │  │ (REST, vocalizer,   │ │
//! │  │ error groups)│  │              │  │  token retry)       │ │
//! │  └──────────────┘  └──────────────┘  └─────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Conversation`]: Day-bucketed bubbles addressed by [`IndexPath`]
//! - [`ConversationController`]: Performs actions and emits [`SurfaceUpdate`]s
//! - [`HistoryPaginator`]: Loads server history page by page
//! - [`RecognitionSession`]: Speech recognition over a duplex channel
//! - [`HttpBackend`]: Bundled REST implementation of the collaborator traits
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use voicekit_core::{
//!     api::{HttpBackend, NoRefresh, TokenRetry, TokenStore, Vocalizer},
//!     config::load_config,
//!     controller::{ConversationController, Services},
//! };
//! use tokio::sync::mpsc;
//!
//! // Speech output is provided by the host platform
//! fn host_vocalizer() -> Arc<dyn Vocalizer> {
//!     unimplemented!()
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let backend = Arc::new(HttpBackend::new(&config.api, TokenStore::with_token("t"))?);
//!     let services = Services {
//!         conversation: backend.clone(),
//!         history: backend,
//!         vocalizer: host_vocalizer(),
//!     };
//!
//!     let (tx, mut rx) = mpsc::channel(100);
//!     let mut controller =
//!         ConversationController::new(&config, services, TokenRetry::new(Arc::new(NoRefresh)), tx);
//!
//!     controller.load_older_history().await?;
//!     while let Ok(update) = rx.try_recv() {
//!         // Apply the update to the list view
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # No UI Dependencies
//!
//! Nothing here draws. Share sheets, clipboards and inspectors are
//! requested through [`SurfaceUpdate`] and left to the host.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actions;
pub mod api;
pub mod bubble;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod error_group;
pub mod history;
pub mod index_path;
pub mod messages;
pub mod preferences;
pub mod recognition;
pub mod section;

// Re-exports for convenience
pub use actions::{available_actions, BubbleAction, Gesture};
pub use api::{ApiError, HttpBackend, TokenRetry, TokenStore};
pub use bubble::{Bubble, BubbleContent, BubbleKey, Card, CardKind, Origin, Vote};
pub use config::{load_config, ConfigOverrides, VoiceKitConfig, VoiceKitContext};
pub use controller::{ConversationController, Services};
pub use conversation::{Conversation, Insertion, Removal, SortOrder};
pub use error_group::{ErrorGroup, GroupToggle, GroupingReport};
pub use history::{
    HistoryEntry, HistoryFilter, HistoryPage, HistoryPaginator, HistoryResponse, PageOutcome,
};
pub use index_path::IndexPath;
pub use messages::{NotifyLevel, SurfaceUpdate};
pub use preferences::Preferences;
pub use recognition::{RecognitionOptions, RecognitionSession, TranscriptionEvent};
pub use section::Section;
