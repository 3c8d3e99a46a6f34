//! Collaborator Traits
//!
//! The conversation core never talks to the network directly. Hosts plug
//! in implementations of these traits: the bundled [`HttpBackend`], a mock
//! in tests, or a bridge to a platform SDK.
//!
//! [`HttpBackend`]: super::http::HttpBackend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::bubble::Vote;
use crate::history::{HistoryEntry, HistoryQuery, HistoryResponse};

/// Answer to a text invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    /// History identifier assigned to the exchange
    #[serde(default)]
    pub history_id: Option<String>,
    /// Server trace identifier
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Server timestamp of the answer
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// The answer
    pub response: HistoryResponse,
}

/// A device registered to the user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Serial number, used by the history device filter
    pub serial_number: String,
    /// User-facing name
    pub name: String,
    /// Hardware model
    #[serde(default)]
    pub model: Option<String>,
}

/// A terms-of-use document the user must accept
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    /// Agreement identifier
    pub id: String,
    /// Title
    pub title: String,
    /// Where the full text lives
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the user already accepted it
    #[serde(default)]
    pub accepted: bool,
}

/// Sends user utterances to the assistant
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Invoke the assistant with typed or transcribed text
    async fn send_text(&self, text: &str) -> Result<InvocationResult, ApiError>;
}

/// Server-side conversation history
#[async_trait]
pub trait HistoryDataSource: Send + Sync {
    /// Fetch one page of entries around `query.anchor`
    async fn fetch_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, ApiError>;

    /// Delete entries by history id
    async fn delete_history(&self, ids: &[String]) -> Result<(), ApiError>;

    /// Record feedback on an answer
    async fn send_feedback(&self, history_id: &str, vote: Vote) -> Result<(), ApiError>;

    /// Devices the history can be filtered on
    async fn devices(&self) -> Result<Vec<Device>, ApiError>;
}

/// User account operations
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Agreements the user is asked to accept
    async fn user_agreements(&self) -> Result<Vec<Agreement>, ApiError>;

    /// Accept agreements by id
    async fn accept_agreements(&self, ids: &[String]) -> Result<(), ApiError>;
}

/// Speaks text aloud (text-to-speech or local playback)
#[async_trait]
pub trait Vocalizer: Send + Sync {
    /// Speak `text`
    async fn vocalize(&self, text: &str) -> Result<(), ApiError>;
}

/// Host callback invoked when the backend rejects the access token
///
/// Returning `true` means a fresh token is now available and the failed
/// request may be replayed once.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Re-authenticate; `true` on success
    async fn refresh_token(&self) -> bool;
}

/// Refresher for hosts without re-authentication
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRefresh;

#[async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh_token(&self) -> bool {
        false
    }
}
