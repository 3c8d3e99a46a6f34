//! HTTP Backend
//!
//! REST client for the assistant backend. Implements the conversation,
//! history, and account collaborator traits over `reqwest`.
//!
//! # Endpoints
//!
//! - `POST /invoke` - text invocation
//! - `GET /history?before|after=&limit=&deviceSerial=` - history page
//! - `DELETE /history` - delete entries (ids in body)
//! - `PUT /history/{id}/feedback` - vote on an answer
//! - `GET /devices` - registered devices
//! - `GET /users/agreements`, `PUT /users/agreements` - terms of use
//!
//! Every request carries the bearer token, the `X-Client-Metadata` header,
//! and a fresh `X-Trace-Id`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::error::ApiError;
use super::traits::{
    AccountService, Agreement, ConversationService, Device, HistoryDataSource, InvocationResult,
};
use crate::bubble::Vote;
use crate::config::ApiConfig;
use crate::history::{HistoryDirection, HistoryEntry, HistoryQuery};

const CLIENT_METADATA_HEADER: &str = "X-Client-Metadata";
const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Shared access token
///
/// The host writes a fresh token after re-authenticating; every clone sees
/// it.
#[derive(Clone, Debug, Default)]
pub struct TokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `token`
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(token);
        store
    }

    /// Replace the token
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Forget the token
    pub fn clear(&self) {
        *self.token.write() = None;
    }

    /// Current token, if any
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.token.read().clone()
    }
}

/// Query parameters for a history page request
pub(crate) fn history_params(query: &HistoryQuery) -> Vec<(&'static str, String)> {
    let anchor_key = match query.direction {
        HistoryDirection::Before => "before",
        HistoryDirection::After => "after",
    };
    let mut params = vec![
        (anchor_key, query.anchor.to_rfc3339()),
        ("limit", query.limit.to_string()),
    ];
    if let Some(ref serial) = query.device_serial {
        params.push(("deviceSerial", serial.clone()));
    }
    params
}

/// REST client for the assistant backend
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client_metadata: String,
    tokens: TokenStore,
    http_client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend from API settings
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig, tokens: TokenStore) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_metadata: config.client_metadata.clone(),
            tokens,
            http_client,
        })
    }

    /// Token store shared with the host
    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start an authenticated request; fails without touching the network
    /// when no token is stored
    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self.tokens.get().ok_or(ApiError::MissingToken)?;
        let trace_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(method = %method, path = path, trace_id = %trace_id, "Backend request");
        Ok(self
            .http_client
            .request(method, self.url(path))
            .bearer_auth(token)
            .header(CLIENT_METADATA_HEADER, &self.client_metadata)
            .header(TRACE_ID_HEADER, trace_id))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "Backend returned an error status");
        Err(ApiError::from_status(status.as_u16(), body))
    }

    async fn decode<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ApiError> {
        let response = Self::send(builder).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("client_metadata", &self.client_metadata)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConversationService for HttpBackend {
    async fn send_text(&self, text: &str) -> Result<InvocationResult, ApiError> {
        let builder = self
            .request(Method::POST, "/invoke")?
            .json(&json!({ "text": text }));
        Self::decode(builder).await
    }
}

#[async_trait]
impl HistoryDataSource for HttpBackend {
    async fn fetch_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, ApiError> {
        let builder = self
            .request(Method::GET, "/history")?
            .query(&history_params(query));
        Self::decode(builder).await
    }

    async fn delete_history(&self, ids: &[String]) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Ok(());
        }
        let builder = self
            .request(Method::DELETE, "/history")?
            .json(&json!({ "ids": ids }));
        Self::send(builder).await.map(drop)
    }

    async fn send_feedback(&self, history_id: &str, vote: Vote) -> Result<(), ApiError> {
        let builder = self
            .request(Method::PUT, &format!("/history/{history_id}/feedback"))?
            .json(&json!({ "vote": vote }));
        Self::send(builder).await.map(drop)
    }

    async fn devices(&self) -> Result<Vec<Device>, ApiError> {
        Self::decode(self.request(Method::GET, "/devices")?).await
    }
}

#[async_trait]
impl AccountService for HttpBackend {
    async fn user_agreements(&self) -> Result<Vec<Agreement>, ApiError> {
        Self::decode(self.request(Method::GET, "/users/agreements")?).await
    }

    async fn accept_agreements(&self, ids: &[String]) -> Result<(), ApiError> {
        let builder = self
            .request(Method::PUT, "/users/agreements")?
            .json(&json!({ "accepted": ids }));
        Self::send(builder).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn backend(tokens: TokenStore) -> HttpBackend {
        let config = ApiConfig {
            // Port 9 (discard) on loopback; nothing in these tests may reach it.
            base_url: "http://127.0.0.1:9/api/".into(),
            ..ApiConfig::default()
        };
        HttpBackend::new(&config, tokens).unwrap()
    }

    #[test]
    fn test_history_params() {
        let query = HistoryQuery {
            anchor: Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap(),
            direction: HistoryDirection::Before,
            limit: 20,
            device_serial: Some("speaker-1".into()),
        };
        let params = history_params(&query);
        assert_eq!(params[0], ("before", "2024-08-01T12:00:00+00:00".to_string()));
        assert_eq!(params[1], ("limit", "20".to_string()));
        assert_eq!(params[2], ("deviceSerial", "speaker-1".to_string()));

        let newer = HistoryQuery {
            direction: HistoryDirection::After,
            device_serial: None,
            ..query
        };
        let params = history_params(&newer);
        assert_eq!(params[0].0, "after");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let backend = backend(TokenStore::new());
        assert_eq!(backend.url("/devices"), "http://127.0.0.1:9/api/devices");
    }

    #[test]
    fn test_token_store_is_shared() {
        let store = TokenStore::new();
        let clone = store.clone();
        store.set("abc");
        assert_eq!(clone.get().as_deref(), Some("abc"));
        clone.clear();
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_network() {
        let backend = backend(TokenStore::new());

        assert_eq!(backend.devices().await, Err(ApiError::MissingToken));
        assert_eq!(
            backend.send_text("hello").await.map(|_| ()),
            Err(ApiError::MissingToken)
        );
    }

    #[tokio::test]
    async fn test_empty_delete_is_a_no_op() {
        let backend = backend(TokenStore::new());
        assert_eq!(backend.delete_history(&[]).await, Ok(()));
    }
}
